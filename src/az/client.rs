//! Authenticated wrapper around the `az` CLI.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::de::DeserializeOwned;
use tempfile::TempDir;

use crate::common::{AzureCredentials, Backoff, Cloud, Identifier, ResourceError, Settings};
use crate::exec::{CommandRunner, Invocation};

static ERROR_CODE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?m)\(([A-Za-z]+)\)|^Code: ([A-Za-z]+)|ErrorCode:\s*([A-Za-z]+)").ok()
});

/// `az` CLI logged in as one service principal, isolated in a private
/// configuration directory.
pub struct Client {
    runner: Arc<dyn CommandRunner>,
    program: String,
    env: BTreeMap<String, String>,
    logged_in: AtomicBool,
    _config: TempDir,
    /// Provider location such as `eastus`.
    pub location: String,
    /// Task identifier used to name every object.
    pub identifier: Identifier,
    /// Tags applied to every taggable object.
    pub tags: BTreeMap<String, String>,
    /// Service principal, also forwarded to machines.
    pub credentials: AzureCredentials,
    /// Settings threaded from the binary.
    pub settings: Settings,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("program", &self.program)
            .field("location", &self.location)
            .field("identifier", &self.identifier)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Binds the CLI to `cloud`'s service principal and resolved location.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::Credentials`] when `cloud` carries no Azure
    /// credentials and [`ResourceError::Io`] when the configuration directory
    /// cannot be created.
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        cloud: &Cloud,
        identifier: Identifier,
        tags: BTreeMap<String, String>,
        settings: Settings,
    ) -> Result<Self, ResourceError> {
        let credentials = cloud
            .credentials
            .azure
            .clone()
            .ok_or_else(|| ResourceError::Credentials(String::from("missing Azure credentials")))?;
        let config = tempfile::Builder::new()
            .prefix("tpi-az-")
            .tempdir()
            .map_err(|err| ResourceError::Io {
                path: String::from("azure configuration directory"),
                message: err.to_string(),
            })?;
        let env = BTreeMap::from([
            (
                String::from("AZURE_CONFIG_DIR"),
                config.path().to_string_lossy().into_owned(),
            ),
            (String::from("AZURE_CORE_COLLECT_TELEMETRY"), String::from("false")),
            (String::from("AZURE_CORE_NO_COLOR"), String::from("true")),
        ]);

        Ok(Self {
            runner,
            program: settings.programs.az.clone(),
            env,
            logged_in: AtomicBool::new(false),
            _config: config,
            location: super::region(cloud.region.as_str()),
            identifier,
            tags,
            credentials,
            settings,
        })
    }

    /// Shared command runner, also used for storage transfers.
    #[must_use]
    pub fn runner(&self) -> Arc<dyn CommandRunner> {
        Arc::clone(&self.runner)
    }

    /// Poll schedule for long operations.
    #[must_use]
    pub const fn backoff(&self) -> &Backoff {
        &self.settings.backoff
    }

    /// Name shared by the resource group and most objects inside it.
    #[must_use]
    pub fn group(&self) -> &str {
        self.identifier.long()
    }

    /// `--tags key=value ...` arguments, empty when there are no tags.
    #[must_use]
    pub fn tag_args(&self) -> Vec<String> {
        if self.tags.is_empty() {
            return Vec::new();
        }
        let mut args = vec![String::from("--tags")];
        args.extend(self.tags.iter().map(|(key, value)| format!("{key}={value}")));
        args
    }

    fn invoke<I, S>(&self, args: I) -> Result<String, ResourceError>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let invocation = Invocation::new(&self.program)
            .args(args)
            .args(["--output", "json"])
            .envs(&self.env);
        let output = self.runner.run(&invocation)?;
        if output.is_success() {
            Ok(output.stdout)
        } else {
            Err(classify(&self.program, output.code, &output.stderr))
        }
    }

    fn login(&self) -> Result<(), ResourceError> {
        if self.logged_in.load(Ordering::Acquire) {
            return Ok(());
        }
        tracing::debug!(client_id = %self.credentials.client_id, "logging in service principal");
        self.invoke([
            "login",
            "--service-principal",
            "--username",
            self.credentials.client_id.as_str(),
            "--password",
            self.credentials.client_secret.as_str(),
            "--tenant",
            self.credentials.tenant_id.as_str(),
        ])?;
        self.invoke([
            "account",
            "set",
            "--subscription",
            self.credentials.subscription_id.as_str(),
        ])?;
        self.logged_in.store(true, Ordering::Release);
        Ok(())
    }

    /// Runs `az <args> --output json` after logging in and returns stdout.
    ///
    /// # Errors
    ///
    /// Returns the classified provider error on a non-zero exit.
    pub fn run<I, S>(&self, args: I) -> Result<String, ResourceError>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.login()?;
        self.invoke(args)
    }

    /// Runs a command and decodes its JSON output.
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
        let stdout = self.run(args)?;
        serde_json::from_str(&stdout).map_err(|err| ResourceError::parse(what, err))
    }
}

/// Maps `az` CLI stderr onto the lifecycle sentinels.
#[must_use]
pub fn classify(program: &str, exit: Option<i32>, stderr: &str) -> ResourceError {
    let code = ERROR_CODE
        .as_ref()
        .and_then(|pattern| pattern.captures(stderr))
        .and_then(|captures| {
            captures
                .get(1)
                .or_else(|| captures.get(2))
                .or_else(|| captures.get(3))
        })
        .map(|found| found.as_str().to_owned());

    let Some(code) = code else {
        return ResourceError::Provider {
            program: program.to_owned(),
            code: exit.map_or_else(|| String::from("signal"), |value| value.to_string()),
            message: stderr.trim().to_owned(),
        };
    };

    if code.contains("NotFound") {
        ResourceError::NotFound
    } else if code.contains("AlreadyExists") {
        ResourceError::AlreadyExists(stderr.trim().to_owned())
    } else {
        ResourceError::Provider {
            program: program.to_owned(),
            code,
            message: stderr.trim().to_owned(),
        }
    }
}
