//! Boot image resolved from an image family.

use std::sync::Arc;

use serde::Deserialize;

use crate::common::{Resource, ResourceError, ResourceFuture, Slot, split_image};
use crate::gcp::Client;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Described {
    self_link: String,
}

/// Resolved image and login user.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageState {
    /// Full image URL.
    pub self_link: String,
    /// SSH login user.
    pub user: String,
}

/// Newest image of a `project/family` reference.
#[derive(Debug)]
pub struct Image {
    client: Arc<Client>,
    reference: String,
    /// Observed image.
    pub state: Slot<ImageState>,
}

impl Image {
    /// Creates an unresolved handle for an image alias or `user@project/family`.
    #[must_use]
    pub fn new(client: Arc<Client>, image: &str) -> Self {
        Self {
            client,
            reference: crate::gcp::image(image),
            state: Slot::new("image"),
        }
    }

    fn lookup(&self) -> Result<(), ResourceError> {
        let (user, image) = split_image(&self.reference);
        let Some((project, family)) = image.split_once('/') else {
            return Err(ResourceError::invalid(
                "image",
                format!("{image} is not of the form project/family"),
            ));
        };
        let described: Described = self.client.json(
            "image",
            [
                "compute",
                "images",
                "describe-from-family",
                family,
                "--image-project",
                project,
            ],
        )?;
        self.state.set(ImageState {
            self_link: described.self_link,
            user: user.to_owned(),
        });
        Ok(())
    }
}

impl Resource for Image {
    fn create(&self) -> ResourceFuture<'_> {
        self.read()
    }

    fn read(&self) -> ResourceFuture<'_> {
        Box::pin(async move { self.lookup() })
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
    use crate::gcp::tests::client;
    use crate::test_support::ScriptedRunner;

    #[tokio::test]
    async fn resolves_family_alias() {
        let runner = ScriptedRunner::new();
        runner.push_success();
        runner.push_stdout(r#"{"selfLink":"https://compute/projects/ubuntu-os-cloud/global/images/ubuntu-2004-focal-v1"}"#);
        let image = Image::new(Arc::new(client(&runner)), "ubuntu");

        image.read().await.expect("read");

        assert_eq!(
            runner.commands().get(1).map(String::as_str),
            Some("gcloud compute images describe-from-family ubuntu-2004-lts --image-project ubuntu-os-cloud --project project --format json")
        );
        assert_eq!(image.state.get().map(|state| state.user), Some(String::from("ubuntu")));
    }

    #[tokio::test]
    async fn rejects_references_without_family() {
        let runner = ScriptedRunner::new();
        let image = Image::new(Arc::new(client(&runner)), "debian");
        assert!(matches!(image.read().await, Err(ResourceError::Invalid { .. })));
    }
}
