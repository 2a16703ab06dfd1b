//! Machine-side `tpi --stop` reporter run by the task unit's `ExecStop`.

use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};

use crate::common::ResourceError;
use crate::exec::CommandRunner;

use super::reports::{STATUS_PREFIX, StatusReport};
use super::script::LOG_DIRECTORY;
use super::storage::Storage;

/// Variable holding the per-machine identity set by the bootstrap script.
pub const MACHINE_IDENTITY_VARIABLE: &str = "TPI_MACHINE_IDENTITY";
/// Variable holding the local report directory.
pub const LOG_DIRECTORY_VARIABLE: &str = "TPI_LOG_DIRECTORY";
/// Variable holding the task storage remote.
pub const REMOTE_VARIABLE: &str = "RCLONE_REMOTE";

/// Writes `report` as `status-<identity>` into `directory`, creating it when
/// missing, and returns the written path.
///
/// # Errors
///
/// Returns [`ResourceError::Io`] when the directory or file cannot be written.
pub fn write_status_report(
    directory: &Utf8Path,
    identity: &str,
    report: &StatusReport,
) -> Result<Utf8PathBuf, ResourceError> {
    let io_error = |err: std::io::Error| ResourceError::Io {
        path: directory.to_string(),
        message: err.to_string(),
    };

    Dir::create_ambient_dir_all(directory, ambient_authority()).map_err(io_error)?;
    let dir = Dir::open_ambient_dir(directory, ambient_authority()).map_err(io_error)?;
    let name = format!("{STATUS_PREFIX}{identity}");
    let body = serde_json::to_string(report)
        .map_err(|err| ResourceError::parse("status report", err))?;
    dir.write(&name, body).map_err(io_error)?;
    Ok(directory.join(name))
}

/// Records the unit outcome from systemd's environment and uploads the
/// report directory to the task storage.
///
/// # Errors
///
/// Returns [`ResourceError::Invalid`] when `RCLONE_REMOTE` is unset, or the
/// error of the failing write or upload.
pub fn report_stop(
    lookup: impl Fn(&str) -> Option<String>,
    runner: Arc<dyn CommandRunner>,
    rclone: &str,
) -> Result<(), ResourceError> {
    let remote = lookup(REMOTE_VARIABLE)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ResourceError::invalid(REMOTE_VARIABLE, "variable is not set"))?;
    let identity = lookup(MACHINE_IDENTITY_VARIABLE)
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let directory = lookup(LOG_DIRECTORY_VARIABLE)
        .filter(|value| !value.is_empty())
        .map_or_else(|| Utf8PathBuf::from(LOG_DIRECTORY), Utf8PathBuf::from);

    let report = StatusReport::from_env(&lookup);
    let path = write_status_report(&directory, &identity, &report)?;
    tracing::info!(%path, code = %report.code, "recorded task status");

    Storage::new(runner, remote)
        .with_program(rclone)
        .upload_reports(&directory)
}
