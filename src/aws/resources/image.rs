//! Machine image lookup.

use std::sync::Arc;

use serde::Deserialize;

use crate::aws::Client;
use crate::common::{Resource, ResourceError, ResourceFuture, Slot, split_image};

/// Resolved AMI and its login user.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageState {
    /// AMI identifier.
    pub id: String,
    /// SSH login user.
    pub user: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Images {
    #[serde(default)]
    images: Vec<Ami>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Ami {
    image_id: String,
    #[serde(default)]
    creation_date: String,
}

/// The newest AMI matching `owner:architecture:name-pattern`.
#[derive(Debug)]
pub struct Image {
    client: Arc<Client>,
    reference: String,
    /// Observed image.
    pub state: Slot<ImageState>,
}

impl Image {
    /// Creates an unresolved handle for an alias or image reference.
    #[must_use]
    pub fn new(client: Arc<Client>, image: &str) -> Self {
        Self {
            client,
            reference: crate::aws::image(image),
            state: Slot::new("image"),
        }
    }

    fn lookup(&self) -> Result<(), ResourceError> {
        let (user, image) = split_image(&self.reference);
        if image.starts_with("ami-") && !image.contains(':') {
            self.state.set(ImageState {
                id: image.to_owned(),
                user: user.to_owned(),
            });
            return Ok(());
        }

        let mut parts = image.splitn(3, ':');
        let (Some(owner), Some(architecture), Some(pattern)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(ResourceError::invalid(
                "image",
                format!("{image} is not of the form owner:architecture:name-pattern"),
            ));
        };

        let found: Images = self.client.json(
            "images",
            [
                String::from("ec2"),
                String::from("describe-images"),
                String::from("--owners"),
                owner.to_owned(),
                String::from("--filters"),
                format!("Name=architecture,Values={architecture}"),
                format!("Name=name,Values={pattern}"),
            ],
        )?;

        let newest = found
            .images
            .into_iter()
            .max_by(|left, right| left.creation_date.cmp(&right.creation_date))
            .ok_or(ResourceError::NotFound)?;
        self.state.set(ImageState {
            id: newest.image_id,
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
