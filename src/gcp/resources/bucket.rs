//! Cloud Storage bucket and the credentials machines use to reach it.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;

use crate::common::{Provider, Resource, ResourceError, ResourceFuture, Slot, ignore_not_found};
use crate::gcp::Client;
use crate::machine::{RcloneConnection, task_variables};

#[derive(Deserialize)]
struct Described {
    name: String,
}

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

    fn url(&self) -> String {
        format!("gs://{}", self.client.identifier.long())
    }

    fn lookup(&self) -> Result<(), ResourceError> {
        let url = self.url();
        let bucket: Described = self
            .client
            .json("bucket", ["storage", "buckets", "describe", url.as_str()])?;
        self.name.set(bucket.name);
        Ok(())
    }
}

impl Resource for Bucket {
    fn create(&self) -> ResourceFuture<'_> {
        Box::pin(async move {
            let mut args = vec![
                String::from("storage"),
                String::from("buckets"),
                String::from("create"),
                self.url(),
                String::from("--location"),
                self.client.region().to_owned(),
                String::from("--uniform-bucket-level-access"),
            ];
            if let Some(labels) = self.client.labels() {
                args.push(format!("--default-labels={labels}"));
            }
            match self.client.run(args) {
                Ok(_) | Err(ResourceError::AlreadyExists(_)) => self.lookup(),
                Err(err) => Err(err),
            }
        })
    }

    fn read(&self) -> ResourceFuture<'_> {
        Box::pin(async move { self.lookup() })
    }

    fn delete(&self) -> ResourceFuture<'_> {
        Box::pin(async move {
            let url = self.url();
            ignore_not_found(
                self.client
                    .gsutil(["-m", "rm", "-r", url.as_str()])
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
        let key = &self.client.credentials.application_credentials;

        let remote = RcloneConnection {
            backend: String::from("googlecloudstorage"),
            container: bucket,
            path: String::new(),
            config: BTreeMap::from([(String::from("service_account_credentials"), key.clone())]),
        }
        .to_string();

        let mut variables = task_variables(
            Provider::Gcp,
            &self.client.zone,
            &self.client.identifier,
            &remote,
        );
        variables.insert(
            String::from("GOOGLE_APPLICATION_CREDENTIALS_DATA"),
            key.clone(),
        );

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
    use crate::gcp::tests::{KEY, client};
    use crate::test_support::ScriptedRunner;

    #[tokio::test]
    async fn create_places_bucket_in_zone_region() {
        let runner = ScriptedRunner::new();
        runner.push_success();
        runner.push_success();
        runner.push_stdout(r#"{"name":"tpi-test-3z4xlzwq-3u0vweb4"}"#);
        let bucket = Bucket::new(Arc::new(client(&runner)));

        bucket.create().await.expect("create");

        let create = runner.commands().get(1).cloned().unwrap_or_default();
        assert!(create.starts_with(
            "gcloud storage buckets create gs://tpi-test-3z4xlzwq-3u0vweb4 --location us-east1"
        ));
        assert_eq!(bucket.name.get().as_deref(), Some("tpi-test-3z4xlzwq-3u0vweb4"));
    }

    #[tokio::test]
    async fn delete_removes_objects_with_gsutil() {
        let runner = ScriptedRunner::new();
        runner.push_success();
        runner.push_failure(1, "BucketNotFoundException: 404 gs://tpi-test-3z4xlzwq-3u0vweb4 bucket does not exist.");
        let bucket = Bucket::new(Arc::new(client(&runner)));

        assert_eq!(bucket.delete().await, Ok(()));
        assert_eq!(
            runner.commands().get(1).map(String::as_str),
            Some("gsutil -m rm -r gs://tpi-test-3z4xlzwq-3u0vweb4")
        );
    }

    #[tokio::test]
    async fn credentials_embed_service_account_key() {
        let runner = ScriptedRunner::new();
        let client = Arc::new(client(&runner));
        let bucket = Slot::new("bucket");
        bucket.set(String::from("tpi-bucket"));
        let credentials = Credentials::new(client, bucket);

        credentials.read().await.expect("read");

        let state = credentials.state.require().expect("state");
        assert_eq!(
            state.remote,
            format!(":googlecloudstorage,service_account_credentials='{KEY}':tpi-bucket")
        );
        assert_eq!(
            state.variables.get("GOOGLE_APPLICATION_CREDENTIALS_DATA").map(String::as_str),
            Some(KEY)
        );
    }
}
