//! EC2 key pair imported from the deterministic task key.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::aws::Client;
use crate::common::{
    DeterministicKeyPair, Resource, ResourceError, ResourceFuture, Slot, ignore_not_found,
};

/// Imported public key named after the identifier.
#[derive(Debug)]
pub struct KeyPair {
    client: Arc<Client>,
    public_key: String,
    /// Observed key pair name.
    pub name: Slot<String>,
}

impl KeyPair {
    /// Creates an unresolved handle for `keys`.
    #[must_use]
    pub fn new(client: Arc<Client>, keys: &DeterministicKeyPair) -> Self {
        Self {
            client,
            public_key: keys.public_openssh(),
            name: Slot::new("key pair"),
        }
    }

    fn key_name(&self) -> String {
        self.client.identifier.long().to_owned()
    }

    fn lookup(&self) -> Result<(), ResourceError> {
        let name = self.key_name();
        self.client
            .run(["ec2", "describe-key-pairs", "--key-names", name.as_str()])?;
        self.name.set(name);
        Ok(())
    }
}

impl Resource for KeyPair {
    fn create(&self) -> ResourceFuture<'_> {
        Box::pin(async move {
            let name = self.key_name();
            // The CLI expects binary parameters base64 encoded.
            let material = STANDARD.encode(self.public_key.as_bytes());
            let result = self.client.run([
                String::from("ec2"),
                String::from("import-key-pair"),
                String::from("--key-name"),
                name,
                String::from("--public-key-material"),
                material,
            ]);
            match result {
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
            let name = self.key_name();
            ignore_not_found(
                self.client
                    .run(["ec2", "delete-key-pair", "--key-name", name.as_str()])
                    .map(|_| ()),
            )?;
            self.name.clear();
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::tests::client;
    use crate::test_support::ScriptedRunner;

    fn keys() -> DeterministicKeyPair {
        DeterministicKeyPair::with_bits("secret", "tpi-test", 1024).expect("key should derive")
    }

    #[tokio::test]
    async fn create_imports_encoded_public_key() {
        let runner = ScriptedRunner::new();
        runner.push_failure(
            254,
            "An error occurred (InvalidKeyPair.Duplicate) when calling the ImportKeyPair operation: exists",
        );
        runner.push_stdout(r#"{"KeyPairs":[{"KeyName":"tpi-test-3z4xlzwq-3u0vweb4"}]}"#);
        let keys = keys();
        let pair = KeyPair::new(Arc::new(client(&runner)), &keys);

        pair.create().await.expect("create converges");

        let invocation = runner.invocations().into_iter().next().expect("import call");
        let material = invocation
            .args
            .get(5)
            .map(|arg| arg.to_string_lossy().into_owned())
            .expect("material argument");
        let decoded = STANDARD.decode(material).expect("base64 material");
        assert_eq!(decoded, keys.public_openssh().into_bytes());
        assert_eq!(pair.name.get().as_deref(), Some("tpi-test-3z4xlzwq-3u0vweb4"));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let runner = ScriptedRunner::new();
        runner.push_success();
        runner.push_failure(
            254,
            "An error occurred (InvalidKeyPair.NotFound) when calling the DeleteKeyPair operation: gone",
        );
        let pair = KeyPair::new(Arc::new(client(&runner)), &keys());

        assert_eq!(pair.delete().await, Ok(()));
        assert_eq!(pair.delete().await, Ok(()));
    }
}
