//! Bootstrap script that turns a fresh machine into a task runner.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

/// Release asset installed as `/usr/bin/tpi` on every machine.
pub const DEFAULT_BINARY_URL: &str =
    "https://github.com/tpi-dev/tpi/releases/latest/download/tpi-x86_64-unknown-linux-gnu";

/// Working directory of the task on the machine.
pub const TASK_DIRECTORY: &str = "/tmp/tpi-task";
/// Local directory holding reports before upload.
pub const LOG_DIRECTORY: &str = "/tmp/tpi-log";

const ENVIRONMENT_FILE: &str = "/tmp/tpi-environment";
const TASK_SCRIPT: &str = "/usr/bin/tpi-task";
const START_WRAPPER: &str = "/usr/bin/tpi-task-wrapper";
const STOP_WRAPPER: &str = "/usr/bin/tpi-task-stop";
const UNIT_FILE: &str = "/etc/systemd/system/tpi-task.service";
const UNIT_NAME: &str = "tpi-task.service";

/// Inputs of the bootstrap script.
#[derive(Clone, Debug)]
pub struct BootstrapScript<'a> {
    /// User script run by the task unit.
    pub script: &'a str,
    /// Fully resolved environment, including `RCLONE_REMOTE`.
    pub environment: &'a BTreeMap<String, String>,
    /// Task unit time limit.
    pub timeout: Duration,
    /// Download location of the `tpi` binary.
    pub binary_url: &'a str,
}

impl BootstrapScript<'_> {
    /// Renders the script.
    #[must_use]
    pub fn render(&self) -> String {
        let seconds = self.timeout.as_secs().max(1);
        let start_wrapper = format!(
            "#!/bin/bash\nset -a\nsource {ENVIRONMENT_FILE}\nset +a\ncd {TASK_DIRECTORY}\nexec {TASK_SCRIPT}\n"
        );
        let stop_wrapper = format!(
            "#!/bin/bash\nset -a\nsource {ENVIRONMENT_FILE}\nset +a\nexec /usr/bin/tpi --stop\n"
        );
        let unit = format!(
            "[Unit]\nAfter=default.target\n\n[Service]\nType=simple\nExecStart={START_WRAPPER}\nExecStop={STOP_WRAPPER}\nTimeoutStartSec={seconds}\nRuntimeMaxSec={seconds}\n\n[Install]\nWantedBy=default.target\n"
        );

        let mut lines = vec![
            String::from("#!/bin/bash"),
            String::from("set -e"),
            format!("sudo mkdir --parents {TASK_DIRECTORY} {LOG_DIRECTORY}"),
            embed(TASK_SCRIPT, &with_interpreter(self.script)),
            embed(START_WRAPPER, &start_wrapper),
            embed(STOP_WRAPPER, &stop_wrapper),
            embed(ENVIRONMENT_FILE, &environment_block(self.environment)),
            embed(UNIT_FILE, &unit),
            format!(
                "echo \"export TPI_MACHINE_IDENTITY=$(uuidgen)\" | sudo tee --append {ENVIRONMENT_FILE} > /dev/null"
            ),
            format!(
                "echo \"export TPI_LOG_DIRECTORY={LOG_DIRECTORY}\" | sudo tee --append {ENVIRONMENT_FILE} > /dev/null"
            ),
            format!("sudo chmod a+rx {TASK_SCRIPT} {START_WRAPPER} {STOP_WRAPPER}"),
            String::from("curl --fail --silent --location https://rclone.org/install.sh | sudo bash"),
            format!(
                "sudo curl --fail --silent --location {} --output /usr/bin/tpi",
                shell_escape::unix::escape(Cow::Borrowed(self.binary_url))
            ),
            String::from("sudo chmod a+rx /usr/bin/tpi"),
            String::from("set -a"),
            format!("source {ENVIRONMENT_FILE}"),
            String::from("set +a"),
            // The data path is absent until something is pushed.
            format!(
                "sudo --preserve-env rclone copy \"$RCLONE_REMOTE/data\" {TASK_DIRECTORY} || true"
            ),
            String::from("sudo systemctl daemon-reload"),
            format!("sudo systemctl start {UNIT_NAME} --no-block"),
            String::from("set +e"),
        ];

        lines.push(String::from("while sleep 5; do"));
        lines.push(format!(
            "  sudo journalctl > \"{LOG_DIRECTORY}/machine-$TPI_MACHINE_IDENTITY\""
        ));
        lines.push(format!(
            "  sudo --preserve-env rclone copyto \"{LOG_DIRECTORY}/machine-$TPI_MACHINE_IDENTITY\" \"$RCLONE_REMOTE/log/machine-$TPI_MACHINE_IDENTITY\""
        ));
        lines.push(format!(
            "  sudo journalctl --unit {UNIT_NAME} --no-pager --output cat > \"{LOG_DIRECTORY}/task-$TPI_MACHINE_IDENTITY\""
        ));
        lines.push(format!(
            "  sudo --preserve-env rclone copy {LOG_DIRECTORY} \"$RCLONE_REMOTE/reports\" --include 'task-*' --include 'status-*'"
        ));
        lines.push(String::from("done &"));

        lines.push(String::from("while sleep 10; do"));
        lines.push(format!(
            "  sudo --preserve-env rclone copy {TASK_DIRECTORY} \"$RCLONE_REMOTE/data\""
        ));
        lines.push(String::from("done &"));

        let mut rendered = lines.join("\n");
        rendered.push('\n');
        rendered
    }
}

fn with_interpreter(script: &str) -> Cow<'_, str> {
    if script.starts_with("#!") {
        Cow::Borrowed(script)
    } else {
        Cow::Owned(format!("#!/bin/bash\n{script}"))
    }
}

fn embed(path: &str, contents: &str) -> String {
    format!(
        "base64 --decode <<< {} | sudo tee {path} > /dev/null",
        STANDARD.encode(contents)
    )
}

/// Renders `export KEY=value` lines with shell-escaped values.
#[must_use]
pub fn environment_block(environment: &BTreeMap<String, String>) -> String {
    environment
        .iter()
        .map(|(key, value)| {
            format!(
                "export {key}={}\n",
                shell_escape::unix::escape(Cow::Borrowed(value.as_str()))
            )
        })
        .collect()
}
