//! Core library for the `tpi` task runner.
//!
//! The crate provisions short-lived cloud tasks (a script run on one or more
//! machines with storage, firewall, and pricing policy) on AWS, Azure, GCP,
//! and Kubernetes behind one lifecycle API. Each backend sequences resource
//! objects driven through the provider's command-line client; machines report
//! status and logs back through object storage.

pub mod aws;
pub mod az;
pub mod common;
pub mod config;
pub mod exec;
pub mod gcp;
pub mod k8s;
pub mod machine;
pub mod script_source;
pub mod task;
pub mod test_support;

pub use common::{Cloud, Identifier, Provider, ResourceError, Task};
pub use config::{ConfigError, TpiConfig};
pub use exec::{CommandOutput, CommandRunner, ExecError, Invocation, ProcessCommandRunner};
pub use task::TaskBackend;
