//! Configuration loading via `ortho-config`.
//!
//! [`TpiConfig`] carries the defaults applied when a command-line flag is
//! omitted, the client executables, and the per-operation deadlines. Values
//! merge defaults, `tpi.toml`, and `TPI_*` environment variables. Cloud
//! credentials never live here; they come from each provider's conventional
//! environment variables.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::common::{Backoff, Programs, Provider, Settings, Timeouts};
use crate::machine::{DEFAULT_BINARY_URL, RCLONE};

/// Layered `tpi` configuration.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "TPI",
    discovery(
        app_name = "tpi",
        env_var = "TPI_CONFIG_PATH",
        config_file_name = "tpi.toml",
        dotfile_name = ".tpi.toml",
        project_file_name = "tpi.toml"
    )
)]
pub struct TpiConfig {
    /// Provider used when `--provider` is omitted.
    #[ortho_config(default = "aws".to_owned())]
    pub provider: String,
    /// Region used when `--region` is omitted.
    #[ortho_config(default = "us-east".to_owned())]
    pub region: String,
    /// Machine alias used when `--machine` is omitted.
    #[ortho_config(default = "m".to_owned())]
    pub machine: String,
    /// Image alias used when `--image` is omitted.
    #[ortho_config(default = "ubuntu".to_owned())]
    pub image: String,
    /// Machine count used when `--parallelism` is omitted.
    #[ortho_config(default = 1)]
    pub parallelism: u16,
    /// Download location of the `tpi` binary installed on machines.
    #[ortho_config(default = DEFAULT_BINARY_URL.to_owned())]
    pub binary_url: String,
    /// Path to the AWS CLI.
    #[ortho_config(default = "aws".to_owned())]
    pub aws_bin: String,
    /// Path to the Azure CLI.
    #[ortho_config(default = "az".to_owned())]
    pub az_bin: String,
    /// Path to the Google Cloud CLI.
    #[ortho_config(default = "gcloud".to_owned())]
    pub gcloud_bin: String,
    /// Path to `gsutil`.
    #[ortho_config(default = "gsutil".to_owned())]
    pub gsutil_bin: String,
    /// Path to `kubectl`.
    #[ortho_config(default = "kubectl".to_owned())]
    pub kubectl_bin: String,
    /// Path to `rclone`.
    #[ortho_config(default = RCLONE.to_owned())]
    pub rclone_bin: String,
    /// Deadline for `create`, `push`, and `start`, in seconds.
    #[ortho_config(default = 900)]
    pub create_timeout_secs: u64,
    /// Deadline for `read`, `status`, `logs`, and `pull`, in seconds.
    #[ortho_config(default = 180)]
    pub read_timeout_secs: u64,
    /// Deadline for `start` and `stop` resizes, in seconds.
    #[ortho_config(default = 180)]
    pub update_timeout_secs: u64,
    /// Deadline for `delete`, in seconds.
    #[ortho_config(default = 900)]
    pub delete_timeout_secs: u64,
    /// Task timeout used when `--timeout` is omitted, in seconds.
    #[ortho_config(default = 86_400)]
    pub task_timeout_secs: u64,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn missing(&self) -> ConfigError {
        ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to tpi.toml",
            self.description, self.env_var, self.toml_key
        ))
    }
}

impl TpiConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("tpi")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages name both the
    /// environment variable and the configuration key.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] for blank values and
    /// [`ConfigError::Invalid`] for zero timeouts or parallelism.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            (&self.provider, FieldMetadata::new("provider", "TPI_PROVIDER", "provider")),
            (&self.region, FieldMetadata::new("region", "TPI_REGION", "region")),
            (&self.machine, FieldMetadata::new("machine", "TPI_MACHINE", "machine")),
            (&self.image, FieldMetadata::new("image", "TPI_IMAGE", "image")),
            (
                &self.binary_url,
                FieldMetadata::new("binary URL", "TPI_BINARY_URL", "binary_url"),
            ),
            (&self.aws_bin, FieldMetadata::new("AWS CLI path", "TPI_AWS_BIN", "aws_bin")),
            (&self.az_bin, FieldMetadata::new("Azure CLI path", "TPI_AZ_BIN", "az_bin")),
            (
                &self.gcloud_bin,
                FieldMetadata::new("gcloud path", "TPI_GCLOUD_BIN", "gcloud_bin"),
            ),
            (
                &self.gsutil_bin,
                FieldMetadata::new("gsutil path", "TPI_GSUTIL_BIN", "gsutil_bin"),
            ),
            (
                &self.kubectl_bin,
                FieldMetadata::new("kubectl path", "TPI_KUBECTL_BIN", "kubectl_bin"),
            ),
            (
                &self.rclone_bin,
                FieldMetadata::new("rclone path", "TPI_RCLONE_BIN", "rclone_bin"),
            ),
        ];
        if let Some((_, metadata)) = required.iter().find(|(value, _)| value.trim().is_empty()) {
            return Err(metadata.missing());
        }

        if self.parallelism == 0 {
            return Err(ConfigError::Invalid(String::from(
                "parallelism must be at least 1 (TPI_PARALLELISM)",
            )));
        }
        let timeouts = [
            ("create_timeout_secs", self.create_timeout_secs),
            ("read_timeout_secs", self.read_timeout_secs),
            ("update_timeout_secs", self.update_timeout_secs),
            ("delete_timeout_secs", self.delete_timeout_secs),
            ("task_timeout_secs", self.task_timeout_secs),
        ];
        if let Some((key, _)) = timeouts.iter().find(|(_, seconds)| *seconds == 0) {
            return Err(ConfigError::Invalid(format!("{key} must be positive")));
        }
        Ok(())
    }

    /// Parses the default provider.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an unknown provider name.
    pub fn provider(&self) -> Result<Provider, ConfigError> {
        self.provider
            .parse()
            .map_err(|err: crate::common::ResourceError| ConfigError::Invalid(err.to_string()))
    }

    /// Client executables and the machine binary location.
    #[must_use]
    pub fn settings(&self) -> Settings {
        Settings {
            programs: Programs {
                aws: self.aws_bin.clone(),
                az: self.az_bin.clone(),
                gcloud: self.gcloud_bin.clone(),
                gsutil: self.gsutil_bin.clone(),
                kubectl: self.kubectl_bin.clone(),
                rclone: self.rclone_bin.clone(),
            },
            binary_url: self.binary_url.clone(),
            backoff: Backoff::default(),
        }
    }

    /// Per-operation deadlines.
    #[must_use]
    pub const fn timeouts(&self) -> Timeouts {
        Timeouts {
            create: Duration::from_secs(self.create_timeout_secs),
            read: Duration::from_secs(self.read_timeout_secs),
            update: Duration::from_secs(self.update_timeout_secs),
            delete: Duration::from_secs(self.delete_timeout_secs),
        }
    }

    /// Task timeout applied when the command line sets none.
    #[must_use]
    pub const fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configuration value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn defaults() -> TpiConfig {
        TpiConfig {
            provider: String::from("aws"),
            region: String::from("us-east"),
            machine: String::from("m"),
            image: String::from("ubuntu"),
            parallelism: 1,
            binary_url: DEFAULT_BINARY_URL.to_owned(),
            aws_bin: String::from("aws"),
            az_bin: String::from("az"),
            gcloud_bin: String::from("gcloud"),
            gsutil_bin: String::from("gsutil"),
            kubectl_bin: String::from("kubectl"),
            rclone_bin: String::from("rclone"),
            create_timeout_secs: 900,
            read_timeout_secs: 180,
            update_timeout_secs: 180,
            delete_timeout_secs: 900,
            task_timeout_secs: 86_400,
        }
    }

    #[rstest]
    fn defaults_validate(defaults: TpiConfig) {
        assert_eq!(defaults.validate(), Ok(()));
        assert_eq!(defaults.provider(), Ok(Provider::Aws));
    }

    #[rstest]
    fn timeouts_match_lifecycle_defaults(defaults: TpiConfig) {
        assert_eq!(defaults.timeouts(), Timeouts::default());
    }

    #[rstest]
    fn settings_carry_program_paths(defaults: TpiConfig) {
        let settings = TpiConfig {
            kubectl_bin: String::from("/opt/bin/kubectl"),
            ..defaults
        }
        .settings();
        assert_eq!(settings.programs.kubectl, "/opt/bin/kubectl");
        assert_eq!(settings.programs.aws, "aws");
    }

    #[rstest]
    fn blank_program_names_env_var_and_key(defaults: TpiConfig) {
        let config = TpiConfig {
            rclone_bin: String::from("  "),
            ..defaults
        };
        let message = config.validate().expect_err("blank rclone").to_string();
        assert!(message.contains("TPI_RCLONE_BIN"), "message: {message}");
        assert!(message.contains("rclone_bin"), "message: {message}");
        assert!(message.contains("tpi.toml"), "message: {message}");
    }

    #[rstest]
    fn zero_timeout_is_rejected(defaults: TpiConfig) {
        let config = TpiConfig {
            read_timeout_secs: 0,
            ..defaults
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::Invalid(String::from(
                "read_timeout_secs must be positive"
            )))
        );
    }

    #[rstest]
    fn unknown_provider_is_invalid(defaults: TpiConfig) {
        let config = TpiConfig {
            provider: String::from("openstack"),
            ..defaults
        };
        assert!(matches!(config.provider(), Err(ConfigError::Invalid(_))));
    }
}
