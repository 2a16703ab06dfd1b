//! S3 bucket holding task data, logs, and reports, plus the credentials that
//! machines use to reach it.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::aws::Client;
use crate::common::{Provider, Resource, ResourceError, ResourceFuture, Slot, ignore_not_found};
use crate::machine::{RcloneConnection, task_variables};

/// Task bucket named after the identifier.
#[derive(Debug)]
pub struct Bucket {
    client: Arc<Client>,
    /// Observed bucket name.
    pub name: Slot<String>,
}

impl Bucket {
    /// Creates an unresolved handle.
    #[must_use]
    pub fn new(client: Arc<Client>) -> Self {
        Self {
            client,
            name: Slot::new("bucket"),
        }
    }

    fn bucket_name(&self) -> String {
        self.client.identifier.long().to_owned()
    }

    fn create_bucket(&self) -> Result<(), ResourceError> {
        let name = self.bucket_name();
        let mut args = vec![
            String::from("s3api"),
            String::from("create-bucket"),
            String::from("--bucket"),
            name.clone(),
        ];
        if self.client.region != "us-east-1" {
            args.push(String::from("--create-bucket-configuration"));
            args.push(format!("LocationConstraint={}", self.client.region));
        }
        self.client.run(args)?;

        if !self.client.tags.is_empty() {
            let tagging = serde_json::json!({ "TagSet": self.client.tag_list() });
            self.client.run([
                String::from("s3api"),
                String::from("put-bucket-tagging"),
                String::from("--bucket"),
                name,
                String::from("--tagging"),
                tagging.to_string(),
            ])?;
        }
        self.lookup()
    }

    fn lookup(&self) -> Result<(), ResourceError> {
        let name = self.bucket_name();
        self.client
            .run(["s3api", "head-bucket", "--bucket", name.as_str()])?;
        self.name.set(name);
        Ok(())
    }
}

impl Resource for Bucket {
    fn create(&self) -> ResourceFuture<'_> {
        Box::pin(async move {
            match self.create_bucket() {
                Err(ResourceError::AlreadyExists(_)) => self.lookup(),
                other => other,
            }
        })
    }

    fn read(&self) -> ResourceFuture<'_> {
        Box::pin(async move { self.lookup() })
    }

    fn delete(&self) -> ResourceFuture<'_> {
        Box::pin(async move {
            let url = format!("s3://{}", self.bucket_name());
            ignore_not_found(
                self.client
                    .run(["s3", "rb", url.as_str(), "--force"])
                    .map(|_| ()),
            )?;
            self.name.clear();
            Ok(())
        })
    }
}

/// Storage connection and provider variables handed to machines.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CredentialsState {
    /// rclone remote of the task bucket.
    pub remote: String,
    /// Variables exported on every machine.
    pub variables: BTreeMap<String, String>,
}

/// Derived credentials; no cloud object backs them.
#[derive(Debug)]
pub struct Credentials {
    client: Arc<Client>,
    bucket: Slot<String>,
    /// Observed connection and variables.
    pub state: Slot<CredentialsState>,
}

impl Credentials {
    /// Creates an unresolved handle depending on `bucket`.
    #[must_use]
    pub fn new(client: Arc<Client>, bucket: Slot<String>) -> Self {
        Self {
            client,
            bucket,
            state: Slot::new("credentials"),
        }
    }

    fn resolve(&self) -> Result<(), ResourceError> {
        let bucket = self.bucket.require()?;
        let credentials = &self.client.credentials;

        let mut config = BTreeMap::from([
            (String::from("provider"), String::from("AWS")),
            (String::from("region"), self.client.region.clone()),
            (
                String::from("access_key_id"),
                credentials.access_key_id.clone(),
            ),
            (
                String::from("secret_access_key"),
                credentials.secret_access_key.clone(),
            ),
        ]);
        if let Some(token) = &credentials.session_token {
            config.insert(String::from("session_token"), token.clone());
        }
        let remote = RcloneConnection {
            backend: String::from("s3"),
            container: bucket,
            path: String::new(),
            config,
        }
        .to_string();

        let mut variables = task_variables(
            Provider::Aws,
            &self.client.region,
            &self.client.identifier,
            &remote,
        );
        variables.insert(
            String::from("AWS_ACCESS_KEY_ID"),
            credentials.access_key_id.clone(),
        );
        variables.insert(
            String::from("AWS_SECRET_ACCESS_KEY"),
            credentials.secret_access_key.clone(),
        );
        if let Some(token) = &credentials.session_token {
            variables.insert(String::from("AWS_SESSION_TOKEN"), token.clone());
        }

        self.state.set(CredentialsState { remote, variables });
        Ok(())
    }
}

impl Resource for Credentials {
    fn create(&self) -> ResourceFuture<'_> {
        self.read()
    }

    fn read(&self) -> ResourceFuture<'_> {
        Box::pin(async move { self.resolve() })
    }

    fn delete(&self) -> ResourceFuture<'_> {
        Box::pin(async move {
            self.state.clear();
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::tests::client;
    use crate::test_support::ScriptedRunner;

    const BUCKET: &str = "tpi-test-3z4xlzwq-3u0vweb4";

    #[tokio::test]
    async fn create_converges_on_owned_bucket() {
        let runner = ScriptedRunner::new();
        runner.push_failure(
            254,
            "An error occurred (BucketAlreadyOwnedByYou) when calling the CreateBucket operation: yours",
        );
        runner.push_stdout("");
        let bucket = Bucket::new(Arc::new(client(&runner)));

        bucket.create().await.expect("create should converge");

        assert_eq!(bucket.name.get().as_deref(), Some(BUCKET));
        assert_eq!(
            runner.commands(),
            vec![
                format!("aws s3api create-bucket --bucket {BUCKET} --create-bucket-configuration LocationConstraint=us-west-1 --output json"),
                format!("aws s3api head-bucket --bucket {BUCKET} --output json"),
            ]
        );
    }

    #[tokio::test]
    async fn delete_twice_tolerates_absence() {
        let runner = ScriptedRunner::new();
        runner.push_success();
        runner.push_failure(
            254,
            "An error occurred (NoSuchBucket) when calling the DeleteBucket operation: gone",
        );
        let bucket = Bucket::new(Arc::new(client(&runner)));

        assert_eq!(bucket.delete().await, Ok(()));
        assert_eq!(bucket.delete().await, Ok(()));
        assert!(!bucket.name.is_set());
    }

    #[tokio::test]
    async fn read_reports_missing_bucket() {
        let runner = ScriptedRunner::new();
        runner.push_failure(
            254,
            "An error occurred (404) when calling the HeadBucket operation: Not Found",
        );
        let bucket = Bucket::new(Arc::new(client(&runner)));
        assert_eq!(bucket.read().await, Err(ResourceError::NotFound));
        assert!(!bucket.name.is_set());
    }

    #[tokio::test]
    async fn credentials_expose_remote_and_variables() {
        let runner = ScriptedRunner::new();
        let client = Arc::new(client(&runner));
        let bucket = Bucket::new(Arc::clone(&client));
        bucket.name.set(String::from(BUCKET));
        let credentials = Credentials::new(client, bucket.name.clone());

        credentials.read().await.expect("credentials read");

        let state = credentials.state.require().expect("state");
        assert_eq!(
            state.remote,
            format!(":s3,access_key_id='AKIATEST',provider='AWS',region='us-west-1',secret_access_key='secret':{BUCKET}")
        );
        assert_eq!(
            state.variables.get("TPI_TASK_CLOUD_PROVIDER").map(String::as_str),
            Some("aws")
        );
        assert_eq!(
            state.variables.get("RCLONE_REMOTE"),
            Some(&state.remote)
        );
    }
}
