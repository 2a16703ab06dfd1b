//! Structured reports written by machines and read back by the façades.

use serde::{Deserialize, Serialize};

use crate::common::Status;

/// Prefix of status report objects under `reports/`.
pub const STATUS_PREFIX: &str = "status-";
/// Prefix of task log objects under `reports/`.
pub const TASK_PREFIX: &str = "task-";

/// Outcome of one task unit run, as written by `tpi --stop`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatusReport {
    /// systemd `SERVICE_RESULT`.
    #[serde(default)]
    pub result: String,
    /// systemd `EXIT_CODE`, the kind of exit (`exited`, `killed`, ...).
    #[serde(default)]
    pub status: String,
    /// systemd `EXIT_STATUS`, the numeric exit status or signal name.
    #[serde(default)]
    pub code: String,
}

impl StatusReport {
    /// Builds a report from systemd's `ExecStop` environment.
    #[must_use]
    pub fn from_env(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            result: lookup("SERVICE_RESULT").unwrap_or_default(),
            status: lookup("EXIT_CODE").unwrap_or_default(),
            code: lookup("EXIT_STATUS").unwrap_or_default(),
        }
    }

    /// Returns `true` for a clean exit.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.code == "0"
    }
}

/// Adds the outcome of `reports` to `initial`.
///
/// Counts only grow: folding the same reports twice counts them twice.
#[must_use]
pub fn fold_status(initial: Status, reports: &[StatusReport]) -> Status {
    reports.iter().fold(initial, |mut status, report| {
        if report.succeeded() {
            status.succeeded = status.succeeded.saturating_add(1);
        } else {
            status.failed = status.failed.saturating_add(1);
        }
        status
    })
}

/// One line of the machine agent's JSON Lines log.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct LogLine {
    /// Log level.
    #[serde(default)]
    pub level: String,
    /// Timestamp as written by the agent.
    #[serde(default)]
    pub time: String,
    /// Repository the agent serves.
    #[serde(default)]
    pub repo: String,
    /// Job name.
    #[serde(default)]
    pub job: String,
    /// Agent state such as `ready`.
    #[serde(default)]
    pub status: String,
    /// Whether the last job succeeded.
    #[serde(default)]
    pub success: bool,
}

/// Returns `true` once any JSON line in `log` reports `status == "ready"`.
///
/// Lines that are not JSON objects are skipped.
#[must_use]
pub fn is_ready(log: &str) -> bool {
    log.lines()
        .filter_map(|line| serde_json::from_str::<LogLine>(line.trim()).ok())
        .any(|line| line.status == "ready")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(code: &str) -> StatusReport {
        StatusReport {
            result: String::from("exit-code"),
            status: String::from("exited"),
            code: code.to_owned(),
        }
    }

    #[test]
    fn fold_counts_success_and_failure() {
        let reports = [report("0"), report("1")];
        let status = fold_status(Status::default(), &reports);
        assert_eq!(
            status,
            Status {
                running: 0,
                succeeded: 1,
                failed: 1,
            }
        );
    }

    #[test]
    fn fold_accumulates_across_reads() {
        let reports = [report("0"), report("1")];
        let once = fold_status(Status::default(), &reports);
        let twice = fold_status(once, &reports);
        assert_eq!((twice.succeeded, twice.failed), (2, 2));
    }

    #[test]
    fn reports_use_pascal_case_keys() {
        let parsed: StatusReport =
            serde_json::from_str(r#"{"Result":"success","Status":"exited","Code":"0"}"#)
                .expect("report should parse");
        assert!(parsed.succeeded());
        let rendered = serde_json::to_string(&parsed).expect("report should render");
        assert_eq!(rendered, r#"{"Result":"success","Status":"exited","Code":"0"}"#);
    }

    #[test]
    fn readiness_needs_a_ready_line() {
        let log = concat!(
            "plain journal text\n",
            r#"{"level":"info","time":"t","repo":"r","job":"","status":"waiting","success":false}"#,
            "\n",
        );
        assert!(!is_ready(log));

        let ready = format!(
            "{log}{}\n",
            r#"{"level":"info","time":"t","repo":"r","job":"","status":"ready","success":true}"#
        );
        assert!(is_ready(&ready));
    }

    #[test]
    fn from_env_reads_systemd_variables() {
        let report = StatusReport::from_env(|name| match name {
            "SERVICE_RESULT" => Some(String::from("exit-code")),
            "EXIT_CODE" => Some(String::from("exited")),
            "EXIT_STATUS" => Some(String::from("2")),
            _ => None,
        });
        assert_eq!(report.status, "exited");
        assert_eq!(report.code, "2");
        assert!(!report.succeeded());
    }
}
