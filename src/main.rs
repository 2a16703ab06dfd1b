//! Binary entry point for the `tpi` CLI.

use std::collections::BTreeMap;
use std::env;
use std::io::{self, Write};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use tpi::common::{
    Cloud, Credentials, DeterministicKeyPair, Environment, Firewall, FirewallRule, Identifier, Provider, Region,
    ResourceError, Size, Spot, Task,
};
use tpi::config::{ConfigError, TpiConfig};
use tpi::exec::{CommandRunner, ProcessCommandRunner};
use tpi::machine::{RCLONE, report_stop};
use tpi::script_source::{ScriptSourceError, resolve_script};
use tpi::task::TaskBackend;

mod cli;
#[cfg(test)]
mod main_tests;

use cli::{Cli, Command, TaskArgs};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid argument: {0}")]
    Argument(String),
    #[error(transparent)]
    Script(#[from] ScriptSourceError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error("create failed: {create}; cleanup also failed: {cleanup}")]
    Rollback {
        create: ResourceError,
        cleanup: ResourceError,
    },
    #[error("failed to install log subscriber: {0}")]
    Logging(String),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = init_tracing(cli.log_level.as_deref()) {
        report_error(&err);
    }

    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing(level: Option<&str>) -> Result<(), CliError> {
    let filter = level
        .map_or_else(
            || EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info")),
            EnvFilter::try_new,
        )
        .map_err(|err| CliError::Logging(err.to_string()))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init()
        .map_err(|err| CliError::Logging(err.to_string()))
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    if cli.stop {
        let runner: Arc<dyn CommandRunner> = Arc::new(ProcessCommandRunner);
        return Ok(report_stop(|name| env::var(name).ok(), runner, RCLONE)?);
    }

    let Some(command) = cli.command else {
        return Err(CliError::Argument(String::from("a subcommand is required")));
    };
    let config = TpiConfig::load_without_cli_args()?;
    config.validate()?;

    execute(
        command,
        &config,
        Arc::new(ProcessCommandRunner),
        |name| env::var(name).ok(),
        env::vars(),
        &mut io::stdout(),
    )
    .await
}

/// Runs one lifecycle subcommand against the backend it selects.
async fn execute(
    command: Command,
    config: &TpiConfig,
    runner: Arc<dyn CommandRunner>,
    lookup: impl Fn(&str) -> Option<String>,
    ambient: impl IntoIterator<Item = (String, String)>,
    out: &mut impl Write,
) -> Result<(), CliError> {
    let args = task_args(&command);
    let cloud = build_cloud(args, config, &lookup)?;
    let task = build_task(args, config, ambient)?;
    let backend = tpi::task::new(
        &cloud,
        Identifier::new(&args.name),
        task,
        runner,
        config.settings(),
    )?;

    match command {
        Command::Create(_) => create(backend.as_ref(), out).await,
        Command::Read(_) => {
            backend.read().await?;
            describe(backend.as_ref(), out);
            write_key_pair(backend.key_pair(), out)
        }
        Command::Delete(_) => Ok(backend.delete().await?),
        Command::Start(_) => Ok(backend.start().await?),
        Command::Stop(_) => Ok(backend.stop().await?),
        Command::Status(_) => {
            let status = backend.status().await?;
            let ready = backend.ready().await?;
            writeln!(out, "running: {}", status.running).ok();
            writeln!(out, "succeeded: {}", status.succeeded).ok();
            writeln!(out, "failed: {}", status.failed).ok();
            writeln!(out, "ready: {ready}").ok();
            Ok(())
        }
        Command::Logs(_) => {
            for log in backend.logs().await? {
                write!(out, "{log}").ok();
                if !log.ends_with('\n') {
                    writeln!(out).ok();
                }
            }
            Ok(())
        }
        Command::Push(push) => Ok(backend
            .push(Utf8Path::new(&push.source), push.include.as_deref())
            .await?),
        Command::Pull(pull) => Ok(backend
            .pull(Utf8Path::new(&pull.destination), pull.include.as_deref())
            .await?),
    }
}

/// Creates the task, deleting whatever was provisioned when creation fails.
async fn create(backend: &dyn TaskBackend, out: &mut impl Write) -> Result<(), CliError> {
    match backend.create().await {
        Ok(()) => {
            describe(backend, out);
            Ok(())
        }
        Err(create) => {
            tracing::error!(error = %create, "create failed, deleting provisioned resources");
            match backend.delete().await {
                Ok(()) => Err(CliError::Resource(create)),
                Err(cleanup) => Err(CliError::Rollback { create, cleanup }),
            }
        }
    }
}

fn describe(backend: &dyn TaskBackend, out: &mut impl Write) {
    writeln!(out, "identifier: {}", backend.identifier()).ok();
    for address in backend.addresses() {
        writeln!(out, "address: {address}").ok();
    }
    for event in backend.events() {
        writeln!(
            out,
            "event: {} {} {}",
            event.time.to_rfc3339(),
            event.code,
            event.description.join(" ")
        )
        .ok();
    }
}

/// Prints the machine key pair; providers without one print nothing.
fn write_key_pair(
    key_pair: Result<&DeterministicKeyPair, ResourceError>,
    out: &mut impl Write,
) -> Result<(), CliError> {
    let keys = match key_pair {
        Ok(keys) => keys,
        Err(ResourceError::NotImplemented) => return Ok(()),
        Err(err) => return Err(err.into()),
    };
    writeln!(out, "public key: {}", keys.public_openssh()).ok();
    write!(out, "{}", keys.private_pem()?).ok();
    Ok(())
}

const fn task_args(command: &Command) -> &TaskArgs {
    match command {
        Command::Create(args)
        | Command::Read(args)
        | Command::Delete(args)
        | Command::Start(args)
        | Command::Stop(args)
        | Command::Status(args)
        | Command::Logs(args) => args,
        Command::Push(push) => &push.task,
        Command::Pull(pull) => &pull.task,
    }
}

fn build_cloud(
    args: &TaskArgs,
    config: &TpiConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Cloud, CliError> {
    let provider = args.provider.as_deref().map_or_else(
        || config.provider().map_err(CliError::from),
        |name| name.parse::<Provider>().map_err(CliError::from),
    )?;
    let region = args.region.as_deref().unwrap_or(&config.region);
    let credentials = Credentials::from_env(provider, lookup)?;
    Ok(Cloud::new(provider, Region::from(region), credentials)?.with_timeouts(config.timeouts()))
}

fn build_task(
    args: &TaskArgs,
    config: &TpiConfig,
    ambient: impl IntoIterator<Item = (String, String)>,
) -> Result<Task, CliError> {
    let parallelism = args.parallelism.unwrap_or(config.parallelism);
    if parallelism == 0 {
        return Err(CliError::Argument(String::from(
            "parallelism must be at least 1",
        )));
    }

    let script = resolve_script(args.script.as_deref(), args.script_file.as_deref())?
        .unwrap_or_default();
    let requested = Environment {
        variables: parse_variables(&args.env)?,
        ..Environment::default()
    };
    let variables = requested
        .resolve_variables(ambient)
        .into_iter()
        .map(|(name, value)| (name, Some(value)))
        .collect();

    let environment = Environment {
        image: args.image.clone().unwrap_or_else(|| config.image.clone()),
        script,
        variables,
        timeout: args
            .timeout
            .map_or_else(|| config.task_timeout(), Duration::from_secs),
        directory: args.directory.as_deref().map(Utf8PathBuf::from),
        directory_out: args.directory_out.as_deref().map(Utf8PathBuf::from),
        exclude_list: args.exclude.clone(),
    };

    let defaults = Firewall::default();
    let firewall = Firewall {
        ingress: firewall_rule(
            args.ingress_nets.as_deref(),
            args.ingress_ports.as_deref(),
            defaults.ingress,
        )?,
        egress: firewall_rule(
            args.egress_nets.as_deref(),
            args.egress_ports.as_deref(),
            defaults.egress,
        )?,
    };

    Ok(Task {
        size: Size {
            machine: args
                .machine
                .clone()
                .unwrap_or_else(|| config.machine.clone()),
            storage_gb: args.disk_size,
        },
        environment,
        firewall,
        spot: args.spot.map_or_else(Spot::default, Spot),
        parallelism,
        tags: parse_tags(&args.tags)?,
        ..Task::default()
    })
}

/// Parses `NAME=VALUE` pairs; a bare name is resolved from the local
/// environment later.
fn parse_variables(raw: &[String]) -> Result<BTreeMap<String, Option<String>>, CliError> {
    raw.iter()
        .map(|entry| {
            let (name, value) = entry
                .split_once('=')
                .map_or((entry.as_str(), None), |(name, value)| {
                    (name, Some(value.to_owned()))
                });
            if name.trim().is_empty() {
                return Err(CliError::Argument(format!(
                    "environment variable `{entry}` has no name"
                )));
            }
            Ok((name.to_owned(), value))
        })
        .collect()
}

fn parse_tags(raw: &[String]) -> Result<BTreeMap<String, String>, CliError> {
    raw.iter()
        .map(|entry| match entry.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_owned(), value.to_owned())),
            _ => Err(CliError::Argument(format!(
                "tag `{entry}` must have the form KEY=VALUE"
            ))),
        })
        .collect()
}

/// Overrides `default` with the flags given; blank entries are dropped so an
/// empty flag value denies the direction entirely.
fn firewall_rule(
    net_flags: Option<&[String]>,
    port_flags: Option<&[String]>,
    default: FirewallRule,
) -> Result<FirewallRule, CliError> {
    let nets = net_flags
        .map(|values| {
            values
                .iter()
                .map(|net| net.trim())
                .filter(|net| !net.is_empty())
                .map(str::to_owned)
                .collect()
        })
        .or(default.nets);
    let ports = port_flags.map(parse_ports).transpose()?.or(default.ports);
    Ok(FirewallRule { nets, ports })
}

fn parse_ports(values: &[String]) -> Result<Vec<u16>, CliError> {
    values
        .iter()
        .map(|port| port.trim())
        .filter(|port| !port.is_empty())
        .map(|port| {
            port.parse::<u16>()
                .map_err(|err| CliError::Argument(format!("invalid port `{port}`: {err}")))
        })
        .collect()
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
