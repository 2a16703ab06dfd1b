//! Provider-agnostic description of a task and its observed state.

use std::collections::BTreeMap;
use std::time::Duration;

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use glob::Pattern;

use super::firewall::Firewall;

/// Machine class alias or provider machine type, plus disk size.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Size {
    /// Generic alias (`s`, `m`, `l+v100`, ...) or a provider machine type.
    pub machine: String,
    /// Boot disk size in gigabytes; `None` keeps the image default.
    pub storage_gb: Option<u32>,
}

impl Default for Size {
    fn default() -> Self {
        Self {
            machine: String::from("m"),
            storage_gb: None,
        }
    }
}

/// What runs on the machines and how long it may run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Environment {
    /// Image alias (`ubuntu`, `nvidia`) or a provider image reference.
    pub image: String,
    /// Shell script executed by the task unit.
    pub script: String,
    /// Variables exported to the script.
    ///
    /// A `None` value is a glob pattern matched against the ambient process
    /// environment.
    pub variables: BTreeMap<String, Option<String>>,
    /// Hard limit for the task unit.
    pub timeout: Duration,
    /// Local directory uploaded before the machines start.
    pub directory: Option<Utf8PathBuf>,
    /// Local directory receiving results on delete; defaults to `directory`.
    pub directory_out: Option<Utf8PathBuf>,
    /// rclone filter patterns excluded from transfers.
    pub exclude_list: Vec<String>,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            image: String::from("ubuntu"),
            script: String::new(),
            variables: BTreeMap::new(),
            timeout: Duration::from_secs(24 * 60 * 60),
            directory: None,
            directory_out: None,
            exclude_list: Vec::new(),
        }
    }
}

impl Environment {
    /// Resolves unset variables from `ambient`.
    ///
    /// Names without glob metacharacters pick the matching ambient variable
    /// when present; patterns copy every matching ambient variable.
    #[must_use]
    pub fn resolve_variables<I>(&self, ambient: I) -> BTreeMap<String, String>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let environ: Vec<(String, String)> = ambient.into_iter().collect();
        let mut resolved = BTreeMap::new();

        for (name, explicit) in &self.variables {
            if let Some(value) = explicit {
                resolved.insert(name.clone(), value.clone());
                continue;
            }
            match Pattern::new(name) {
                Ok(pattern) => {
                    for (key, value) in &environ {
                        if pattern.matches(key) {
                            resolved.insert(key.clone(), value.clone());
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(variable = %name, error = %err, "invalid variable pattern");
                }
            }
        }
        resolved
    }

    /// Directory receiving pulled results, if any.
    #[must_use]
    pub fn output_directory(&self) -> Option<&Utf8PathBuf> {
        self.directory_out.as_ref().or(self.directory.as_ref())
    }
}

/// Splits an image reference of the form `user@image` into its login user
/// and provider image, defaulting the user to `ubuntu`.
#[must_use]
pub fn split_image(image: &str) -> (&str, &str) {
    image
        .split_once('@')
        .filter(|(user, _)| !user.is_empty())
        .unwrap_or(("ubuntu", image))
}

/// Spot pricing policy, encoded as a single number.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Spot(pub f64);

/// Decoded [`Spot`] policy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SpotPolicy {
    /// On-demand capacity only.
    OnDemand,
    /// Spot capacity at market price.
    Auto,
    /// Spot capacity with a fixed maximum hourly price.
    Fixed(f64),
}

impl Spot {
    /// On-demand capacity.
    pub const DISABLED: Self = Self(-1.0);
    /// Spot capacity at market price.
    pub const AUTO: Self = Self(0.0);

    /// Decodes the numeric encoding.
    #[must_use]
    pub fn policy(self) -> SpotPolicy {
        if self.0 < 0.0 {
            SpotPolicy::OnDemand
        } else if self.0 == 0.0 {
            SpotPolicy::Auto
        } else {
            SpotPolicy::Fixed(self.0)
        }
    }
}

impl Default for Spot {
    fn default() -> Self {
        Self::DISABLED
    }
}

/// Normalised cloud activity record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Event {
    /// When the provider recorded the activity.
    pub time: DateTime<Utc>,
    /// Provider status code or activity kind.
    pub code: String,
    /// Free-form details.
    pub description: Vec<String>,
}

/// Machine and run counts.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Status {
    /// Machines currently running.
    pub running: u32,
    /// Runs that exited with code `0`.
    pub succeeded: u32,
    /// Runs that exited with any other code.
    pub failed: u32,
}

/// Everything needed to provision and run one task.
#[derive(Clone, Debug, PartialEq)]
pub struct Task {
    /// Machine size.
    pub size: Size,
    /// Script, image, and variables.
    pub environment: Environment,
    /// Network policy.
    pub firewall: Firewall,
    /// Pricing policy.
    pub spot: Spot,
    /// Desired number of machines.
    pub parallelism: u16,
    /// Extra tags applied to cloud objects.
    pub tags: BTreeMap<String, String>,
    /// Public addresses observed after the last create or read.
    pub addresses: Vec<String>,
    /// Counts observed after the last read or status call.
    pub status: Status,
    /// Activity observed after the last read.
    pub events: Vec<Event>,
}

impl Default for Task {
    fn default() -> Self {
        Self {
            size: Size::default(),
            environment: Environment::default(),
            firewall: Firewall::default(),
            spot: Spot::default(),
            parallelism: 1,
            tags: BTreeMap::new(),
            addresses: Vec::new(),
            status: Status::default(),
            events: Vec::new(),
        }
    }
}
