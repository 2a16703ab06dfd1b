//! Authenticated wrapper around the `gcloud` and `gsutil` CLIs.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::io::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::de::DeserializeOwned;
use tempfile::{NamedTempFile, TempDir};

use crate::common::{Backoff, Cloud, GcpCredentials, Identifier, ResourceError, Settings};
use crate::exec::{CommandRunner, Invocation};

static COMMAND: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\((gcloud\.[A-Za-z0-9._-]+)\)").ok());

static HTTP_STATUS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?:HTTPError |code[=:] ?|^)(404|409)\b").ok());

fn io_error(what: &str) -> impl Fn(std::io::Error) -> ResourceError + '_ {
    move |err| ResourceError::Io {
        path: what.to_owned(),
        message: err.to_string(),
    }
}

/// `gcloud` activated with one service account key inside a private
/// configuration directory.
pub struct Client {
    runner: Arc<dyn CommandRunner>,
    program: String,
    env: BTreeMap<String, String>,
    activated: AtomicBool,
    key_file: NamedTempFile,
    _config: TempDir,
    /// Project owning every object.
    pub project: String,
    /// Zone such as `us-east1-c`.
    pub zone: String,
    /// Task identifier used to name every object.
    pub identifier: Identifier,
    /// Labels applied to every labelable object.
    pub tags: BTreeMap<String, String>,
    /// Service account key, also forwarded to machines.
    pub credentials: GcpCredentials,
    /// Settings threaded from the binary.
    pub settings: Settings,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("program", &self.program)
            .field("project", &self.project)
            .field("zone", &self.zone)
            .field("identifier", &self.identifier)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Binds the CLI to `cloud`'s service account and resolved zone.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::Credentials`] when the key is missing or
    /// malformed and [`ResourceError::Io`] when the key cannot be staged.
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        cloud: &Cloud,
        identifier: Identifier,
        tags: BTreeMap<String, String>,
        settings: Settings,
    ) -> Result<Self, ResourceError> {
        let credentials = cloud
            .credentials
            .gcp
            .clone()
            .ok_or_else(|| ResourceError::Credentials(String::from("missing GCP credentials")))?;
        let project = credentials.project_id()?;

        let config = tempfile::Builder::new()
            .prefix("tpi-gcloud-")
            .tempdir()
            .map_err(io_error("gcloud configuration directory"))?;
        let mut key_file = NamedTempFile::new().map_err(io_error("service account key"))?;
        key_file
            .write_all(credentials.application_credentials.as_bytes())
            .and_then(|()| key_file.flush())
            .map_err(io_error("service account key"))?;

        let env = BTreeMap::from([
            (
                String::from("CLOUDSDK_CONFIG"),
                config.path().to_string_lossy().into_owned(),
            ),
            (String::from("CLOUDSDK_CORE_DISABLE_PROMPTS"), String::from("1")),
        ]);

        Ok(Self {
            runner,
            program: settings.programs.gcloud.clone(),
            env,
            activated: AtomicBool::new(false),
            key_file,
            _config: config,
            project,
            zone: super::region(cloud.region.as_str()),
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

    /// Region containing the zone.
    #[must_use]
    pub fn region(&self) -> &str {
        self.zone
            .rsplit_once('-')
            .map_or(self.zone.as_str(), |(region, _)| region)
    }

    /// Labels as a `key=value,...` list, `None` when there are none.
    #[must_use]
    pub fn labels(&self) -> Option<String> {
        if self.tags.is_empty() {
            return None;
        }
        Some(
            self.tags
                .iter()
                .map(|(key, value)| format!("{}={}", label(key), label(value)))
                .collect::<Vec<_>>()
                .join(","),
        )
    }

    fn invoke(&self, program: &str, invocation: Invocation) -> Result<String, ResourceError> {
        let output = self.runner.run(&invocation.envs(&self.env))?;
        if output.is_success() {
            Ok(output.stdout)
        } else {
            Err(classify(program, output.code, &output.stderr))
        }
    }

    fn activate(&self) -> Result<(), ResourceError> {
        if self.activated.load(Ordering::Acquire) {
            return Ok(());
        }
        let key_file = self.key_file.path().to_string_lossy().into_owned();
        tracing::debug!(project = %self.project, "activating service account");
        self.invoke(
            &self.program,
            Invocation::new(&self.program).args([
                String::from("auth"),
                String::from("activate-service-account"),
                format!("--key-file={key_file}"),
            ]),
        )?;
        self.activated.store(true, Ordering::Release);
        Ok(())
    }

    /// Runs `gcloud <args> --project <project> --format json` and returns
    /// stdout.
    ///
    /// # Errors
    ///
    /// Returns the classified provider error on a non-zero exit.
    pub fn run<I, S>(&self, args: I) -> Result<String, ResourceError>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.activate()?;
        let invocation = Invocation::new(&self.program)
            .args(args)
            .args(["--project", self.project.as_str(), "--format", "json"]);
        self.invoke(&self.program, invocation)
    }

    /// Runs `gsutil <args>` with the activated account.
    ///
    /// # Errors
    ///
    /// Returns the classified provider error on a non-zero exit.
    pub fn gsutil<I, S>(&self, args: I) -> Result<String, ResourceError>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.activate()?;
        let program = &self.settings.programs.gsutil;
        self.invoke(program, Invocation::new(program).args(args))
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

/// Lowercases and replaces characters labels do not accept.
fn label(value: &str) -> String {
    value
        .chars()
        .map(|character| {
            if character.is_ascii_alphanumeric() || character == '-' || character == '_' {
                character.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Maps `gcloud`/`gsutil` stderr onto the lifecycle sentinels.
#[must_use]
pub fn classify(program: &str, exit: Option<i32>, stderr: &str) -> ResourceError {
    let lowered = stderr.to_ascii_lowercase();
    let status = HTTP_STATUS
        .as_ref()
        .and_then(|pattern| pattern.captures(stderr))
        .and_then(|captures| captures.get(1))
        .map(|found| found.as_str());

    if lowered.contains("was not found")
        || lowered.contains("does not exist")
        || status == Some("404")
    {
        return ResourceError::NotFound;
    }
    if lowered.contains("already exists") || status == Some("409") {
        return ResourceError::AlreadyExists(stderr.trim().to_owned());
    }

    let code = COMMAND
        .as_ref()
        .and_then(|pattern| pattern.captures(stderr))
        .and_then(|captures| captures.get(1))
        .map(|found| found.as_str().to_owned())
        .unwrap_or_else(|| exit.map_or_else(|| String::from("signal"), |value| value.to_string()));
    ResourceError::Provider {
        program: program.to_owned(),
        code,
        message: stderr.trim().to_owned(),
    }
}
