//! Object storage layout shared by machines and façades, accessed through
//! `rclone`.
//!
//! ```text
//! <remote>/data/...               synced working directory
//! <remote>/log/machine-<id>       raw journal dumps
//! <remote>/reports/status-<id>    JSON status reports
//! <remote>/reports/task-<id>      task unit output
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use camino::Utf8Path;

use crate::common::{ResourceError, Status};
use crate::exec::{CommandOutput, CommandRunner, Invocation};

use super::reports::{STATUS_PREFIX, StatusReport, TASK_PREFIX, fold_status, is_ready};

/// Default `rclone` program name.
pub const RCLONE: &str = "rclone";

const DATA: &str = "data";
const LOG: &str = "log";
const REPORTS: &str = "reports";

/// On-the-fly `rclone` remote with inline configuration.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RcloneConnection {
    /// rclone backend name (`s3`, `azureblob`, `googlecloudstorage`).
    pub backend: String,
    /// Bucket or container.
    pub container: String,
    /// Optional prefix inside the container.
    pub path: String,
    /// Backend options rendered as `key='value'`.
    pub config: BTreeMap<String, String>,
}

impl fmt::Display for RcloneConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{}", self.backend)?;
        for (key, value) in &self.config {
            write!(f, ",{key}='{}'", value.replace('\'', "''"))?;
        }
        write!(f, ":{}", self.container)?;
        let path = self.path.trim_start_matches('/');
        if !path.is_empty() {
            write!(f, "/{path}")?;
        }
        Ok(())
    }
}

/// Client for a task's object storage.
#[derive(Clone)]
pub struct Storage {
    runner: Arc<dyn CommandRunner>,
    remote: String,
    program: String,
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("program", &self.program)
            .finish_non_exhaustive()
    }
}

impl Storage {
    /// Wraps `remote`, which usually comes from an [`RcloneConnection`].
    pub fn new(runner: Arc<dyn CommandRunner>, remote: impl Into<String>) -> Self {
        Self {
            runner,
            remote: remote.into(),
            program: RCLONE.to_owned(),
        }
    }

    /// Overrides the `rclone` executable.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn location(&self, segment: &str) -> String {
        format!("{}/{segment}", self.remote.trim_end_matches('/'))
    }

    fn run(&self, args: Vec<String>) -> Result<CommandOutput, ResourceError> {
        let invocation = Invocation::new(&self.program).args(args);
        let output = self.runner.run(&invocation)?;
        if output.is_success() {
            Ok(output)
        } else {
            Err(ResourceError::from_output(&self.program, &output))
        }
    }

    /// Uploads `local` to `data`, skipping the exclude list.
    ///
    /// Existing remote files are overwritten but never removed.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::Provider`] when `rclone` fails.
    pub fn push(
        &self,
        local: &Utf8Path,
        include: Option<&str>,
        exclude: &[String],
    ) -> Result<(), ResourceError> {
        let mut args = vec![
            String::from("copy"),
            local.to_string(),
            self.location(DATA),
        ];
        args.extend(filters(include, exclude));
        self.run(args).map(|_| ())
    }

    /// Downloads `data` into `local`.
    ///
    /// A missing `data` path, as left by a task that never wrote anything,
    /// downloads nothing.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::Provider`] when `rclone` fails.
    pub fn pull(
        &self,
        local: &Utf8Path,
        include: Option<&str>,
        exclude: &[String],
    ) -> Result<(), ResourceError> {
        let mut args = vec![
            String::from("copy"),
            self.location(DATA),
            local.to_string(),
        ];
        args.extend(filters(include, exclude));
        match self.run(args) {
            Ok(_) => Ok(()),
            Err(err) if is_missing_directory(&err) => {
                tracing::debug!(remote = %self.location(DATA), "nothing to download");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Lists object names under `directory` that start with `prefix`, sorted.
    ///
    /// A missing directory lists as empty.
    fn list(&self, directory: &str, prefix: &str) -> Result<Vec<String>, ResourceError> {
        let args = vec![
            String::from("lsf"),
            String::from("--files-only"),
            self.location(directory),
        ];
        let output = match self.run(args) {
            Ok(output) => output,
            Err(err) if is_missing_directory(&err) => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };

        let mut names: Vec<String> = output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|name| name.starts_with(prefix))
            .map(ToOwned::to_owned)
            .collect();
        names.sort();
        Ok(names)
    }

    fn cat(&self, directory: &str, name: &str) -> Result<String, ResourceError> {
        let args = vec![
            String::from("cat"),
            format!("{}/{name}", self.location(directory)),
        ];
        self.run(args).map(|output| output.stdout)
    }

    /// Folds every status report onto `initial`.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::Parse`] for malformed reports and
    /// [`ResourceError::Provider`] when `rclone` fails.
    pub fn status(&self, initial: Status) -> Result<Status, ResourceError> {
        let mut reports = Vec::new();
        for name in self.list(REPORTS, STATUS_PREFIX)? {
            let body = self.cat(REPORTS, &name)?;
            let report: StatusReport = serde_json::from_str(&body)
                .map_err(|err| ResourceError::parse(format!("status report {name}"), err))?;
            reports.push(report);
        }
        Ok(fold_status(initial, &reports))
    }

    /// Returns task log bodies ordered by object name.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::Provider`] when `rclone` fails.
    pub fn logs(&self) -> Result<Vec<String>, ResourceError> {
        self.list(REPORTS, TASK_PREFIX)?
            .iter()
            .map(|name| self.cat(REPORTS, name))
            .collect()
    }

    /// Returns `true` once any raw machine log reports readiness.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::Provider`] when `rclone` fails.
    pub fn ready(&self) -> Result<bool, ResourceError> {
        for name in self.list(LOG, "")? {
            if is_ready(&self.cat(LOG, &name)?) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Uploads the contents of a local report directory to `reports`.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::Provider`] when `rclone` fails.
    pub fn upload_reports(&self, local: &Utf8Path) -> Result<(), ResourceError> {
        let args = vec![
            String::from("copy"),
            local.to_string(),
            self.location(REPORTS),
        ];
        self.run(args).map(|_| ())
    }
}

fn is_missing_directory(err: &ResourceError) -> bool {
    matches!(err, ResourceError::Provider { message, .. } if message.contains("directory not found"))
}

fn filters(include: Option<&str>, exclude: &[String]) -> Vec<String> {
    let mut args = Vec::new();
    for pattern in exclude {
        args.push(String::from("--filter"));
        args.push(format!("- {pattern}"));
    }
    if let Some(pattern) = include.filter(|pattern| !pattern.is_empty()) {
        args.push(String::from("--filter"));
        args.push(format!("+ {pattern}"));
        args.push(String::from("--filter"));
        args.push(String::from("- **"));
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedRunner;

    fn azure() -> RcloneConnection {
        RcloneConnection {
            backend: String::from("azureblob"),
            container: String::from("container"),
            path: String::new(),
            config: BTreeMap::from([
                (String::from("account"), String::from("account")),
                (String::from("key"), String::from("key")),
            ]),
        }
    }

    #[test]
    fn connection_renders_inline_config() {
        assert_eq!(
            azure().to_string(),
            ":azureblob,account='account',key='key':container"
        );
    }

    #[test]
    fn connection_appends_path_once() {
        let with_path = RcloneConnection {
            path: String::from("subdirectory"),
            ..azure()
        };
        let with_slash = RcloneConnection {
            path: String::from("/subdirectory"),
            ..azure()
        };
        let expected = ":azureblob,account='account',key='key':container/subdirectory";
        assert_eq!(with_path.to_string(), expected);
        assert_eq!(with_slash.to_string(), expected);
    }

    #[test]
    fn connection_doubles_single_quotes() {
        let connection = RcloneConnection {
            config: BTreeMap::from([(String::from("key"), String::from("it's"))]),
            ..azure()
        };
        assert_eq!(connection.to_string(), ":azureblob,key='it''s':container");
    }

    #[test]
    fn status_folds_sorted_reports() {
        let runner = ScriptedRunner::new();
        runner.push_output(Some(0), "task-b\nstatus-b\nstatus-a\n", "");
        runner.push_output(Some(0), r#"{"Result":"success","Status":"exited","Code":"0"}"#, "");
        runner.push_output(Some(0), r#"{"Result":"exit-code","Status":"exited","Code":"1"}"#, "");
        let storage = Storage::new(Arc::new(runner.clone()), ":s3:bucket");

        let status = storage.status(Status::default()).expect("status should fold");

        assert_eq!((status.succeeded, status.failed), (1, 1));
        let commands: Vec<String> = runner
            .invocations()
            .iter()
            .map(Invocation::command_string)
            .collect();
        assert_eq!(
            commands,
            vec![
                "rclone lsf --files-only :s3:bucket/reports",
                "rclone cat :s3:bucket/reports/status-a",
                "rclone cat :s3:bucket/reports/status-b",
            ]
        );
    }

    #[test]
    fn missing_reports_directory_lists_empty() {
        let runner = ScriptedRunner::new();
        runner.push_output(Some(3), "", "ERROR : : error listing: directory not found");
        let storage = Storage::new(Arc::new(runner), ":s3:bucket");
        assert_eq!(storage.logs(), Ok(Vec::new()));
    }

    #[test]
    fn pull_of_missing_data_downloads_nothing() {
        let runner = ScriptedRunner::new();
        runner.push_output(
            Some(3),
            "",
            "ERROR : : error reading source root directory: directory not found",
        );
        let storage = Storage::new(Arc::new(runner.clone()), ":s3:bucket");

        assert_eq!(storage.pull(Utf8Path::new("out"), None, &[]), Ok(()));
        assert_eq!(runner.commands(), vec!["rclone copy :s3:bucket/data out"]);
    }

    #[test]
    fn pull_surfaces_other_failures() {
        let runner = ScriptedRunner::new();
        runner.push_output(Some(1), "", "ERROR : AccessDenied: Access Denied");
        let storage = Storage::new(Arc::new(runner), ":s3:bucket");

        let result = storage.pull(Utf8Path::new("out"), None, &[]);
        assert!(matches!(result, Err(ResourceError::Provider { .. })));
    }

    #[test]
    fn push_applies_filters() {
        let runner = ScriptedRunner::new();
        runner.push_success();
        let storage = Storage::new(Arc::new(runner.clone()), ":s3:bucket");

        storage
            .push(Utf8Path::new("work"), Some("*.csv"), &[String::from(".git")])
            .expect("push should succeed");

        let invocations = runner.invocations();
        assert_eq!(
            invocations.first().map(Invocation::command_string).as_deref(),
            Some("rclone copy work :s3:bucket/data --filter - .git --filter + *.csv --filter - **")
        );
    }

    #[test]
    fn ready_scans_machine_logs() {
        let runner = ScriptedRunner::new();
        runner.push_output(Some(0), "machine-1\n", "");
        runner.push_output(Some(0), "{\"status\":\"ready\"}\n", "");
        let storage = Storage::new(Arc::new(runner), ":s3:bucket");
        assert_eq!(storage.ready(), Ok(true));
    }
}
