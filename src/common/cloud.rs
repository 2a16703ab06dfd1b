//! Cloud selection, credentials, and per-operation timeouts.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use super::error::ResourceError;

/// Supported cloud backends.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Provider {
    /// Amazon Web Services.
    Aws,
    /// Microsoft Azure.
    Azure,
    /// Google Cloud Platform.
    Gcp,
    /// Kubernetes cluster reachable through a kubeconfig.
    Kubernetes,
}

impl Provider {
    /// Short name used on the command line and in machine environments.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Aws => "aws",
            Self::Azure => "az",
            Self::Gcp => "gcp",
            Self::Kubernetes => "k8s",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = ResourceError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "aws" => Ok(Self::Aws),
            "az" | "azure" => Ok(Self::Azure),
            "gcp" => Ok(Self::Gcp),
            "k8s" | "kubernetes" => Ok(Self::Kubernetes),
            other => Err(ResourceError::invalid(
                "provider",
                format!("unknown provider {other}; expected aws, az, gcp or k8s"),
            )),
        }
    }
}

/// Region or zone name; backends translate the generic aliases.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Region(pub String);

impl Region {
    /// Returns the region name as given by the user.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Region {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// AWS access key credentials.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AwsCredentials {
    /// `AWS_ACCESS_KEY_ID`.
    pub access_key_id: String,
    /// `AWS_SECRET_ACCESS_KEY`.
    pub secret_access_key: String,
    /// `AWS_SESSION_TOKEN`, when using temporary credentials.
    pub session_token: Option<String>,
}

/// Azure service principal credentials.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AzureCredentials {
    /// `AZURE_CLIENT_ID`.
    pub client_id: String,
    /// `AZURE_CLIENT_SECRET`.
    pub client_secret: String,
    /// `AZURE_SUBSCRIPTION_ID`.
    pub subscription_id: String,
    /// `AZURE_TENANT_ID`.
    pub tenant_id: String,
}

/// Google service account key.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct GcpCredentials {
    /// Service account key file contents (`GOOGLE_APPLICATION_CREDENTIALS_DATA`).
    pub application_credentials: String,
}

#[derive(Deserialize)]
struct ServiceAccountKey {
    project_id: Option<String>,
    private_key: Option<String>,
}

impl GcpCredentials {
    /// Returns the project declared in the service account key.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::Credentials`] when the key is not valid JSON
    /// or carries no project.
    pub fn project_id(&self) -> Result<String, ResourceError> {
        self.key()?
            .project_id
            .filter(|project| !project.is_empty())
            .ok_or_else(|| ResourceError::Credentials(String::from("service account key has no project_id")))
    }

    /// Returns the private key embedded in the service account key.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::Credentials`] when the key is malformed.
    pub fn private_key(&self) -> Result<String, ResourceError> {
        self.key()?
            .private_key
            .filter(|key| !key.is_empty())
            .ok_or_else(|| ResourceError::Credentials(String::from("service account key has no private_key")))
    }

    fn key(&self) -> Result<ServiceAccountKey, ResourceError> {
        serde_json::from_str(&self.application_credentials)
            .map_err(|err| ResourceError::Credentials(format!("invalid service account key: {err}")))
    }
}

/// Kubernetes cluster access.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct KubernetesCredentials {
    /// Kubeconfig contents (`KUBECONFIG_DATA`).
    pub config: String,
}

/// Discriminated union of provider credentials; exactly one variant may be set.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Credentials {
    /// AWS credentials.
    pub aws: Option<AwsCredentials>,
    /// Azure credentials.
    pub azure: Option<AzureCredentials>,
    /// GCP credentials.
    pub gcp: Option<GcpCredentials>,
    /// Kubernetes credentials.
    pub kubernetes: Option<KubernetesCredentials>,
}

impl Credentials {
    /// Ensures exactly one credential variant is populated.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::Credentials`] with `empty credentials` when no
    /// variant is set and `conflicting credentials` when several are.
    pub fn validate(&self) -> Result<(), ResourceError> {
        let populated = [
            self.aws.is_some(),
            self.azure.is_some(),
            self.gcp.is_some(),
            self.kubernetes.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count();

        match populated {
            0 => Err(ResourceError::Credentials(String::from("empty credentials"))),
            1 => Ok(()),
            _ => Err(ResourceError::Credentials(String::from(
                "conflicting credentials",
            ))),
        }
    }

    /// Reads the conventional environment variables for `provider`.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::Credentials`] naming the first missing
    /// variable.
    pub fn from_env(
        provider: Provider,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ResourceError> {
        let require = |name: &str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| ResourceError::Credentials(format!("{name} is not set")))
        };

        let credentials = match provider {
            Provider::Aws => Self {
                aws: Some(AwsCredentials {
                    access_key_id: require("AWS_ACCESS_KEY_ID")?,
                    secret_access_key: require("AWS_SECRET_ACCESS_KEY")?,
                    session_token: lookup("AWS_SESSION_TOKEN").filter(|token| !token.is_empty()),
                }),
                ..Self::default()
            },
            Provider::Azure => Self {
                azure: Some(AzureCredentials {
                    client_id: require("AZURE_CLIENT_ID")?,
                    client_secret: require("AZURE_CLIENT_SECRET")?,
                    subscription_id: require("AZURE_SUBSCRIPTION_ID")?,
                    tenant_id: require("AZURE_TENANT_ID")?,
                }),
                ..Self::default()
            },
            Provider::Gcp => Self {
                gcp: Some(GcpCredentials {
                    application_credentials: require("GOOGLE_APPLICATION_CREDENTIALS_DATA")?,
                }),
                ..Self::default()
            },
            Provider::Kubernetes => Self {
                kubernetes: Some(KubernetesCredentials {
                    config: require("KUBECONFIG_DATA")?,
                }),
                ..Self::default()
            },
        };
        Ok(credentials)
    }
}

/// Upper bounds for each lifecycle operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Timeouts {
    /// Bound for `create`, `push`, and `start`.
    pub create: Duration,
    /// Bound for `read`, `status`, `logs`, and `pull`.
    pub read: Duration,
    /// Bound for `start` and `stop` resizes.
    pub update: Duration,
    /// Bound for `delete`.
    pub delete: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            create: Duration::from_secs(15 * 60),
            read: Duration::from_secs(3 * 60),
            update: Duration::from_secs(3 * 60),
            delete: Duration::from_secs(15 * 60),
        }
    }
}

/// Where and how a task runs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Cloud {
    /// Backend selection.
    pub provider: Provider,
    /// Region or zone, possibly a generic alias.
    pub region: Region,
    /// Provider credentials.
    pub credentials: Credentials,
    /// Tags applied to every cloud object that supports them.
    pub tags: BTreeMap<String, String>,
    /// Per-operation deadlines.
    pub timeouts: Timeouts,
}

impl Cloud {
    /// Bundles a validated cloud description.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::Credentials`] when the credentials are empty,
    /// conflicting, or belong to another provider.
    pub fn new(
        provider: Provider,
        region: Region,
        credentials: Credentials,
    ) -> Result<Self, ResourceError> {
        credentials.validate()?;
        let matches_provider = match provider {
            Provider::Aws => credentials.aws.is_some(),
            Provider::Azure => credentials.azure.is_some(),
            Provider::Gcp => credentials.gcp.is_some(),
            Provider::Kubernetes => credentials.kubernetes.is_some(),
        };
        if !matches_provider {
            return Err(ResourceError::Credentials(format!(
                "credentials do not match provider {provider}"
            )));
        }
        Ok(Self {
            provider,
            region,
            credentials,
            tags: BTreeMap::new(),
            timeouts: Timeouts::default(),
        })
    }

    /// Replaces the tag set.
    #[must_use]
    pub fn with_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.tags = tags;
        self
    }

    /// Replaces the per-operation timeouts.
    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn aws() -> AwsCredentials {
        AwsCredentials {
            access_key_id: String::from("AKIA"),
            secret_access_key: String::from("secret"),
            session_token: None,
        }
    }

    #[test]
    fn validate_rejects_empty_credentials() {
        let err = Credentials::default().validate().expect_err("empty");
        assert_eq!(err.to_string(), "credentials error: empty credentials");
    }

    #[test]
    fn validate_rejects_conflicting_credentials() {
        let credentials = Credentials {
            aws: Some(aws()),
            kubernetes: Some(KubernetesCredentials::default()),
            ..Credentials::default()
        };
        let err = credentials.validate().expect_err("conflicting");
        assert_eq!(err.to_string(), "credentials error: conflicting credentials");
    }

    #[test]
    fn validate_accepts_a_single_variant() {
        let credentials = Credentials {
            aws: Some(aws()),
            ..Credentials::default()
        };
        assert!(credentials.validate().is_ok());
    }

    #[rstest]
    #[case("aws", Provider::Aws)]
    #[case("az", Provider::Azure)]
    #[case("GCP", Provider::Gcp)]
    #[case("k8s", Provider::Kubernetes)]
    fn provider_parses_short_names(#[case] raw: &str, #[case] expected: Provider) {
        assert_eq!(raw.parse::<Provider>(), Ok(expected));
    }

    #[test]
    fn cloud_rejects_mismatched_credentials() {
        let credentials = Credentials {
            aws: Some(aws()),
            ..Credentials::default()
        };
        let err = Cloud::new(Provider::Gcp, Region::from("us-east"), credentials)
            .expect_err("mismatch");
        assert!(matches!(err, ResourceError::Credentials(_)));
    }

    #[test]
    fn from_env_names_the_missing_variable() {
        let err = Credentials::from_env(Provider::Azure, |name| {
            (name == "AZURE_CLIENT_ID").then(|| String::from("id"))
        })
        .expect_err("secret missing");
        assert_eq!(
            err,
            ResourceError::Credentials(String::from("AZURE_CLIENT_SECRET is not set"))
        );
    }

    #[test]
    fn gcp_credentials_expose_project() {
        let credentials = GcpCredentials {
            application_credentials: String::from(r#"{"project_id":"demo","private_key":"pk"}"#),
        };
        assert_eq!(credentials.project_id().as_deref(), Ok("demo"));
        assert_eq!(credentials.private_key().as_deref(), Ok("pk"));
    }
}
