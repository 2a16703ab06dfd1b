//! Runtime settings threaded from the binary into the backends.

use crate::machine::{DEFAULT_BINARY_URL, RCLONE};

use super::backoff::Backoff;

/// Client executables used to reach each provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Programs {
    /// AWS CLI.
    pub aws: String,
    /// Azure CLI.
    pub az: String,
    /// Google Cloud CLI.
    pub gcloud: String,
    /// Google Cloud Storage CLI used for bucket removal.
    pub gsutil: String,
    /// Kubernetes CLI.
    pub kubectl: String,
    /// rclone.
    pub rclone: String,
}

impl Default for Programs {
    fn default() -> Self {
        Self {
            aws: String::from("aws"),
            az: String::from("az"),
            gcloud: String::from("gcloud"),
            gsutil: String::from("gsutil"),
            kubectl: String::from("kubectl"),
            rclone: RCLONE.to_owned(),
        }
    }
}

/// Settings shared by every backend.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Settings {
    /// Client executables.
    pub programs: Programs,
    /// Download location of the `tpi` binary installed on machines.
    pub binary_url: String,
    /// Poll schedule for long-running provider operations.
    pub backoff: Backoff,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            programs: Programs::default(),
            binary_url: DEFAULT_BINARY_URL.to_owned(),
            backoff: Backoff::default(),
        }
    }
}
