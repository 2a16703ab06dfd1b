//! Cluster objects of one task.

mod claim;
mod config_map;
mod job;
mod transfer;

pub use claim::{DEFAULT_STORAGE_GB, PersistentVolumeClaim};
pub use config_map::{ConfigMap, SCRIPT_KEY};
pub use job::{Job, JobInputs, JobState, PodResources};
pub use transfer::{Transfer, VOLUME_PATH};
