//! Command-line interface definitions for the `tpi` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page. It
//! must not depend on library types for that reason.

use clap::{Args, Parser, Subcommand};

/// Top-level CLI for the `tpi` binary.
#[derive(Debug, Parser)]
#[command(
    name = "tpi",
    about = "Run short-lived tasks on AWS, Azure, GCP and Kubernetes",
    version,
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Record the task unit outcome and upload machine reports.
    ///
    /// Invoked by the systemd unit installed on task machines; reads
    /// `SERVICE_RESULT`, `EXIT_CODE` and `EXIT_STATUS` from the environment.
    #[arg(long, hide = true, exclusive = true)]
    pub(crate) stop: bool,
    /// Log filter such as `info` or `tpi=debug`; defaults to `RUST_LOG`.
    #[arg(long, global = true, value_name = "FILTER")]
    pub(crate) log_level: Option<String>,
    /// Lifecycle operation to run.
    #[command(subcommand)]
    pub(crate) command: Option<Command>,
}

/// Lifecycle operations on one task.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Provision every resource and start the machines.
    Create(TaskArgs),
    /// Refresh the task from the provider and print its state and SSH keys.
    Read(TaskArgs),
    /// Pull results and logs, then remove every resource.
    Delete(TaskArgs),
    /// Scale the machines back to the configured parallelism.
    Start(TaskArgs),
    /// Scale the machines to zero, keeping storage and network.
    Stop(TaskArgs),
    /// Print running, succeeded, and failed counts.
    Status(TaskArgs),
    /// Print the task logs reported by the machines.
    Logs(TaskArgs),
    /// Upload a local directory into the task storage.
    Push(PushArgs),
    /// Download the task storage into a local directory.
    Pull(PullArgs),
}

/// Task description shared by every subcommand.
#[derive(Debug, Args)]
pub(crate) struct TaskArgs {
    /// Task name or canonical `tpi-...` identifier.
    #[arg(value_name = "NAME")]
    pub(crate) name: String,
    /// Cloud provider: `aws`, `az`, `gcp` or `k8s`.
    #[arg(long, value_name = "PROVIDER")]
    pub(crate) provider: Option<String>,
    /// Region alias (`us-east`, `us-west`, `eu-north`, `eu-west`) or a
    /// provider region.
    #[arg(long, value_name = "REGION")]
    pub(crate) region: Option<String>,
    /// Machine alias (`s`, `m`, `l`, `xl`, optionally `+k80`, `+v100`) or a
    /// provider machine type.
    #[arg(long, value_name = "MACHINE")]
    pub(crate) machine: Option<String>,
    /// Boot disk size in gigabytes.
    #[arg(long, value_name = "GB")]
    pub(crate) disk_size: Option<u32>,
    /// Image alias (`ubuntu`, `nvidia`) or a provider image reference.
    #[arg(long, value_name = "IMAGE")]
    pub(crate) image: Option<String>,
    /// Task script given inline.
    #[arg(long, value_name = "SCRIPT", conflicts_with = "script_file")]
    pub(crate) script: Option<String>,
    /// Task script read from a local file.
    #[arg(long, value_name = "PATH", conflicts_with = "script")]
    pub(crate) script_file: Option<String>,
    /// Variable exported to the script; a bare name or glob copies matching
    /// variables from the local environment.
    #[arg(long = "env", value_name = "NAME[=VALUE]")]
    pub(crate) env: Vec<String>,
    /// Hard limit for the task script, in seconds.
    #[arg(long, value_name = "SECONDS")]
    pub(crate) timeout: Option<u64>,
    /// Local directory uploaded before the machines start.
    #[arg(long, value_name = "PATH")]
    pub(crate) directory: Option<String>,
    /// Local directory receiving results on delete; defaults to `--directory`.
    #[arg(long, value_name = "PATH")]
    pub(crate) directory_out: Option<String>,
    /// rclone filter pattern excluded from directory transfers.
    #[arg(long, value_name = "PATTERN")]
    pub(crate) exclude: Vec<String>,
    /// Spot price: negative for on-demand, `0` for market price, or a
    /// maximum hourly price.
    #[arg(long, value_name = "PRICE", allow_hyphen_values = true)]
    pub(crate) spot: Option<f64>,
    /// Number of machines.
    #[arg(long, value_name = "COUNT")]
    pub(crate) parallelism: Option<u16>,
    /// Extra tag applied to cloud objects.
    #[arg(long = "tag", value_name = "KEY=VALUE")]
    pub(crate) tags: Vec<String>,
    /// Networks allowed to reach the machines; empty denies all ingress.
    #[arg(long, value_name = "CIDR,...", value_delimiter = ',')]
    pub(crate) ingress_nets: Option<Vec<String>>,
    /// Ports opened for ingress; empty denies all ingress.
    #[arg(long, value_name = "PORT,...", value_delimiter = ',')]
    pub(crate) ingress_ports: Option<Vec<String>>,
    /// Networks the machines may reach; empty denies all egress.
    #[arg(long, value_name = "CIDR,...", value_delimiter = ',')]
    pub(crate) egress_nets: Option<Vec<String>>,
    /// Ports opened for egress; empty denies all egress.
    #[arg(long, value_name = "PORT,...", value_delimiter = ',')]
    pub(crate) egress_ports: Option<Vec<String>>,
}

/// Arguments for `tpi push`.
#[derive(Debug, Args)]
pub(crate) struct PushArgs {
    /// Task to upload into.
    #[command(flatten)]
    pub(crate) task: TaskArgs,
    /// Local directory to upload.
    #[arg(long, value_name = "PATH")]
    pub(crate) source: String,
    /// Only upload files matching this rclone pattern.
    #[arg(long, value_name = "PATTERN")]
    pub(crate) include: Option<String>,
}

/// Arguments for `tpi pull`.
#[derive(Debug, Args)]
pub(crate) struct PullArgs {
    /// Task to download from.
    #[command(flatten)]
    pub(crate) task: TaskArgs,
    /// Local directory receiving the files.
    #[arg(long, value_name = "PATH")]
    pub(crate) destination: String,
    /// Only download files matching this rclone pattern.
    #[arg(long, value_name = "PATTERN")]
    pub(crate) include: Option<String>,
}
