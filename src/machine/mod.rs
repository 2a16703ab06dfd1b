//! Machine-side protocol: bootstrap script, storage layout, and reports.

pub mod reports;
pub mod script;
pub mod stop;
pub mod storage;

use std::collections::BTreeMap;

use crate::common::{Identifier, Provider};

pub use reports::{LogLine, StatusReport, fold_status, is_ready};
pub use script::{BootstrapScript, DEFAULT_BINARY_URL, LOG_DIRECTORY, TASK_DIRECTORY};
pub use stop::{report_stop, write_status_report};
pub use storage::{RCLONE, RcloneConnection, Storage};

/// Variables every machine receives regardless of provider.
#[must_use]
pub fn task_variables(
    provider: Provider,
    region: &str,
    identifier: &Identifier,
    remote: &str,
) -> BTreeMap<String, String> {
    BTreeMap::from([
        (String::from("RCLONE_REMOTE"), remote.to_owned()),
        (
            String::from("TPI_TASK_CLOUD_PROVIDER"),
            provider.as_str().to_owned(),
        ),
        (String::from("TPI_TASK_CLOUD_REGION"), region.to_owned()),
        (
            String::from("TPI_TASK_IDENTIFIER"),
            identifier.long().to_owned(),
        ),
    ])
}

/// Resolved task variables overlaid with provider variables.
///
/// Unresolved entries are dropped; provider variables win on conflict.
#[must_use]
pub fn machine_environment(
    variables: &BTreeMap<String, Option<String>>,
    provider: BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut environment: BTreeMap<String, String> = variables
        .iter()
        .filter_map(|(name, value)| value.clone().map(|resolved| (name.clone(), resolved)))
        .collect();
    environment.extend(provider);
    environment
}
