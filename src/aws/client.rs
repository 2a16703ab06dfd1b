//! Authenticated wrapper around the `aws` CLI.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::common::{AwsCredentials, Backoff, Cloud, Identifier, ResourceError, Settings};
use crate::exec::{CommandRunner, Invocation};

static ERROR_CODE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"An error occurred \(([A-Za-z0-9.]+)\)").ok());

static ENCODED_MESSAGE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"Encoded authorization failure message: ([A-Za-z0-9_-]+)").ok());

/// `aws` CLI bound to one set of credentials and one region.
#[derive(Clone)]
pub struct Client {
    runner: Arc<dyn CommandRunner>,
    program: String,
    env: BTreeMap<String, String>,
    /// Provider region such as `us-east-1`.
    pub region: String,
    /// Task identifier used to name every object.
    pub identifier: Identifier,
    /// Tags applied to every taggable object.
    pub tags: BTreeMap<String, String>,
    /// Credentials, also forwarded to machines.
    pub credentials: AwsCredentials,
    /// Settings threaded from the binary.
    pub settings: Settings,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("program", &self.program)
            .field("region", &self.region)
            .field("identifier", &self.identifier)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Binds the CLI to `cloud`'s credentials and resolved region.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::Credentials`] when `cloud` carries no AWS
    /// credentials.
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        cloud: &Cloud,
        identifier: Identifier,
        tags: BTreeMap<String, String>,
        settings: Settings,
    ) -> Result<Self, ResourceError> {
        let credentials = cloud
            .credentials
            .aws
            .clone()
            .ok_or_else(|| ResourceError::Credentials(String::from("missing AWS credentials")))?;
        let region = super::region(cloud.region.as_str());

        let mut env = BTreeMap::from([
            (
                String::from("AWS_ACCESS_KEY_ID"),
                credentials.access_key_id.clone(),
            ),
            (
                String::from("AWS_SECRET_ACCESS_KEY"),
                credentials.secret_access_key.clone(),
            ),
            (String::from("AWS_DEFAULT_REGION"), region.clone()),
            (String::from("AWS_PAGER"), String::new()),
        ]);
        if let Some(token) = &credentials.session_token {
            env.insert(String::from("AWS_SESSION_TOKEN"), token.clone());
        }

        Ok(Self {
            runner,
            program: settings.programs.aws.clone(),
            env,
            region,
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

    /// Runs `aws <args> --output json` and returns stdout.
    ///
    /// # Errors
    ///
    /// Returns the classified provider error on a non-zero exit.
    pub fn run<I, S>(&self, args: I) -> Result<String, ResourceError>
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
            return Ok(output.stdout);
        }

        let error = classify(&self.program, output.code, &output.stderr);
        match (&error, encoded_message(&output.stderr)) {
            (ResourceError::Provider { .. }, Some(encoded)) => Err(self.decode(&error, &encoded)),
            _ => Err(error),
        }
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

    /// Tags as `Key=..,Value=..` shorthand entries.
    #[must_use]
    pub fn tag_list(&self) -> Vec<serde_json::Value> {
        self.tags
            .iter()
            .map(|(key, value)| serde_json::json!({ "Key": key, "Value": value }))
            .collect()
    }

    fn decode(&self, original: &ResourceError, encoded: &str) -> ResourceError {
        #[derive(Deserialize)]
        #[serde(rename_all = "PascalCase")]
        struct Decoded {
            decoded_message: String,
        }

        let invocation = Invocation::new(&self.program)
            .args([
                "sts",
                "decode-authorization-message",
                "--encoded-message",
                encoded,
                "--output",
                "json",
            ])
            .envs(&self.env);
        let decoded = self
            .runner
            .run(&invocation)
            .ok()
            .filter(crate::exec::CommandOutput::is_success)
            .and_then(|output| serde_json::from_str::<Decoded>(&output.stdout).ok());

        match (original, decoded) {
            (ResourceError::Provider { program, code, .. }, Some(message)) => {
                ResourceError::Provider {
                    program: program.clone(),
                    code: code.clone(),
                    message: message.decoded_message,
                }
            }
            _ => original.clone(),
        }
    }
}

/// Maps `aws` CLI stderr onto the lifecycle sentinels.
#[must_use]
pub fn classify(program: &str, exit: Option<i32>, stderr: &str) -> ResourceError {
    let code = ERROR_CODE
        .as_ref()
        .and_then(|pattern| pattern.captures(stderr))
        .and_then(|captures| captures.get(1))
        .map(|found| found.as_str().to_owned());

    let Some(code) = code else {
        return ResourceError::Provider {
            program: program.to_owned(),
            code: exit.map_or_else(|| String::from("signal"), |value| value.to_string()),
            message: stderr.trim().to_owned(),
        };
    };

    let lowered = stderr.to_ascii_lowercase();
    if code.contains("NotFound")
        || code.starts_with("NoSuch")
        || code == "404"
        || (code == "ValidationError" && lowered.contains("not found"))
    {
        ResourceError::NotFound
    } else if code.contains("Duplicate")
        || code.contains("AlreadyExists")
        || code == "BucketAlreadyOwnedByYou"
    {
        ResourceError::AlreadyExists(stderr.trim().to_owned())
    } else {
        ResourceError::Provider {
            program: program.to_owned(),
            code,
            message: stderr.trim().to_owned(),
        }
    }
}

fn encoded_message(stderr: &str) -> Option<String> {
    ENCODED_MESSAGE
        .as_ref()
        .and_then(|pattern| pattern.captures(stderr))
        .and_then(|captures| captures.get(1))
        .map(|found| found.as_str().to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    use crate::aws::tests::client;
    use crate::test_support::ScriptedRunner;

    #[rstest]
    #[case("An error occurred (InvalidGroup.NotFound) when calling the DescribeSecurityGroups operation: missing")]
    #[case("An error occurred (NoSuchBucket) when calling the DeleteBucket operation: gone")]
    #[case("An error occurred (404) when calling the HeadBucket operation: Not Found")]
    #[case("An error occurred (ValidationError) when calling the DeleteAutoScalingGroup operation: AutoScalingGroup name not found")]
    fn classify_detects_absence(#[case] stderr: &str) {
        assert_eq!(classify("aws", Some(254), stderr), ResourceError::NotFound);
    }

    #[rstest]
    #[case("An error occurred (InvalidKeyPair.Duplicate) when calling the ImportKeyPair operation: exists")]
    #[case("An error occurred (AlreadyExists) when calling the CreateAutoScalingGroup operation: exists")]
    #[case("An error occurred (BucketAlreadyOwnedByYou) when calling the CreateBucket operation: yours")]
    fn classify_detects_duplicates(#[case] stderr: &str) {
        assert!(matches!(
            classify("aws", Some(254), stderr),
            ResourceError::AlreadyExists(_)
        ));
    }

    #[test]
    fn classify_keeps_other_codes() {
        let err = classify(
            "aws",
            Some(254),
            "An error occurred (ValidationError) when calling the CreateLaunchTemplate operation: bad",
        );
        assert!(matches!(err, ResourceError::Provider { ref code, .. } if code == "ValidationError"));
    }

    #[test]
    fn run_decodes_authorization_failures() {
        let runner = ScriptedRunner::new();
        runner.push_failure(
            254,
            "An error occurred (UnauthorizedOperation) when calling the RunInstances operation: \
             You are not authorized. Encoded authorization failure message: abc-DEF_123",
        );
        runner.push_stdout(r#"{"DecodedMessage":"{\"allowed\":false}"}"#);
        let client = client(&runner);

        let err = client.run(["ec2", "run-instances"]).expect_err("should fail");

        assert_eq!(
            err,
            ResourceError::Provider {
                program: String::from("aws"),
                code: String::from("UnauthorizedOperation"),
                message: String::from(r#"{"allowed":false}"#),
            }
        );
        assert_eq!(
            runner.commands().last().map(String::as_str),
            Some("aws sts decode-authorization-message --encoded-message abc-DEF_123 --output json")
        );
    }

    #[test]
    fn run_injects_credentials_into_environment() {
        let runner = ScriptedRunner::new();
        runner.push_stdout("{}");
        let client = client(&runner);

        client.run(["ec2", "describe-vpcs"]).expect("should succeed");

        let invocation = runner.invocations().pop().expect("one invocation");
        assert_eq!(
            invocation.env.get("AWS_ACCESS_KEY_ID").map(String::as_str),
            Some("AKIATEST")
        );
        assert_eq!(invocation.command_string(), "aws ec2 describe-vpcs --output json");
    }
}
