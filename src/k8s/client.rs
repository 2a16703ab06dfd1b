//! Wrapper around `kubectl` bound to one kubeconfig.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::io::Write as _;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;

use crate::common::{Backoff, Cloud, Identifier, ResourceError, Settings};
use crate::exec::{CommandRunner, Invocation};

static REASON: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"Error from server \(([A-Za-z]+)\)").ok());

/// `kubectl` reading a private copy of the cluster configuration.
pub struct Client {
    runner: Arc<dyn CommandRunner>,
    program: String,
    env: BTreeMap<String, String>,
    _kubeconfig: NamedTempFile,
    /// Region reported to machines; the cluster itself is not regional.
    pub region: String,
    /// Task identifier used to name every object.
    pub identifier: Identifier,
    /// Labels applied to every object.
    pub tags: BTreeMap<String, String>,
    /// Settings threaded from the binary.
    pub settings: Settings,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("program", &self.program)
            .field("identifier", &self.identifier)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Stages the kubeconfig from `cloud`; no command runs yet.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::Credentials`] when `cloud` carries no
    /// kubeconfig and [`ResourceError::Io`] when it cannot be staged.
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        cloud: &Cloud,
        identifier: Identifier,
        tags: BTreeMap<String, String>,
        settings: Settings,
    ) -> Result<Self, ResourceError> {
        let credentials = cloud
            .credentials
            .kubernetes
            .as_ref()
            .ok_or_else(|| ResourceError::Credentials(String::from("missing Kubernetes credentials")))?;

        let io_error = |err: std::io::Error| ResourceError::Io {
            path: String::from("kubeconfig"),
            message: err.to_string(),
        };
        let mut kubeconfig = NamedTempFile::new().map_err(io_error)?;
        kubeconfig
            .write_all(credentials.config.as_bytes())
            .and_then(|()| kubeconfig.flush())
            .map_err(io_error)?;
        let env = BTreeMap::from([(
            String::from("KUBECONFIG"),
            kubeconfig.path().to_string_lossy().into_owned(),
        )]);

        Ok(Self {
            runner,
            program: settings.programs.kubectl.clone(),
            env,
            _kubeconfig: kubeconfig,
            region: cloud.region.as_str().to_owned(),
            identifier,
            tags,
            settings,
        })
    }

    /// Poll schedule for pod scheduling.
    #[must_use]
    pub const fn backoff(&self) -> &Backoff {
        &self.settings.backoff
    }

    /// Object name shared by every object of the task.
    #[must_use]
    pub fn name(&self) -> &str {
        self.identifier.long()
    }

    /// Labels as a JSON object for manifests.
    #[must_use]
    pub fn labels(&self) -> serde_json::Value {
        self.tags
            .iter()
            .map(|(key, value)| (key.clone(), serde_json::Value::from(value.as_str())))
            .collect::<serde_json::Map<_, _>>()
            .into()
    }

    fn invoke(&self, invocation: Invocation) -> Result<String, ResourceError> {
        let output = self.runner.run(&invocation.envs(&self.env))?;
        if output.is_success() {
            Ok(output.stdout)
        } else {
            Err(classify(&self.program, output.code, &output.stderr))
        }
    }

    /// Runs `kubectl <args>` and returns stdout.
    ///
    /// # Errors
    ///
    /// Returns the classified provider error on a non-zero exit.
    pub fn run<I, S>(&self, args: I) -> Result<String, ResourceError>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.invoke(Invocation::new(&self.program).args(args))
    }

    /// Runs `kubectl <args> --output json` and decodes the result.
    ///
    /// # Errors
    ///
    /// Returns the provider error or [`ResourceError::Parse`].
    pub fn json<T, I, S>(&self, what: &str, args: I) -> Result<T, ResourceError>
    where
        T: DeserializeOwned,
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let stdout = self.invoke(
            Invocation::new(&self.program)
                .args(args)
                .args(["--output", "json"]),
        )?;
        serde_json::from_str(&stdout).map_err(|err| ResourceError::parse(what, err))
    }

    /// Creates the object described by `manifest`.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::AlreadyExists`] when the object exists and
    /// the classified provider error otherwise.
    pub fn create(&self, manifest: &serde_json::Value) -> Result<(), ResourceError> {
        self.invoke(
            Invocation::new(&self.program)
                .args(["create", "--filename", "-"])
                .stdin(manifest.to_string()),
        )
        .map(|_| ())
    }
}

/// Maps `kubectl` stderr onto the lifecycle sentinels.
#[must_use]
pub fn classify(program: &str, exit: Option<i32>, stderr: &str) -> ResourceError {
    let reason = REASON
        .as_ref()
        .and_then(|pattern| pattern.captures(stderr))
        .and_then(|captures| captures.get(1))
        .map(|found| found.as_str());
    match reason {
        Some("NotFound") => ResourceError::NotFound,
        Some("AlreadyExists") => ResourceError::AlreadyExists(stderr.trim().to_owned()),
        _ => ResourceError::Provider {
            program: program.to_owned(),
            code: reason.map_or_else(
                || exit.map_or_else(|| String::from("signal"), |value| value.to_string()),
                str::to_owned,
            ),
            message: stderr.trim().to_owned(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    use crate::k8s::tests::client;
    use crate::test_support::ScriptedRunner;

    #[rstest]
    #[case(r#"Error from server (NotFound): jobs.batch "tpi-x" not found"#)]
    #[case(r#"Error from server (NotFound): persistentvolumeclaims "tpi-x" not found"#)]
    fn classify_detects_absence(#[case] stderr: &str) {
        assert_eq!(classify("kubectl", Some(1), stderr), ResourceError::NotFound);
    }

    #[test]
    fn classify_detects_duplicates() {
        assert!(matches!(
            classify("kubectl", Some(1), r#"Error from server (AlreadyExists): configmaps "tpi-x" already exists"#),
            ResourceError::AlreadyExists(_)
        ));
    }

    #[rstest]
    #[case("Error from server (Forbidden): jobs.batch is forbidden", "Forbidden")]
    #[case("error: You must be logged in to the server", "1")]
    fn classify_reports_reason_or_exit_code(#[case] stderr: &str, #[case] expected: &str) {
        assert!(matches!(
            classify("kubectl", Some(1), stderr),
            ResourceError::Provider { ref code, .. } if code == expected
        ));
    }

    #[test]
    fn create_feeds_manifest_through_stdin() {
        let runner = ScriptedRunner::new();
        runner.push_success();
        let client = client(&runner);

        client
            .create(&serde_json::json!({"kind": "ConfigMap"}))
            .expect("create");

        let invocation = runner.invocations().into_iter().next().expect("invocation");
        assert_eq!(invocation.command_string(), "kubectl create --filename -");
        assert_eq!(invocation.stdin.as_deref(), Some(r#"{"kind":"ConfigMap"}"#));
        assert!(invocation.env.contains_key("KUBECONFIG"));
    }
}
