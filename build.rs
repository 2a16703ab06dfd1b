//! Build script rendering the `tpi` manual pages.
//!
//! `tpi.1` covers the global flags and lists the lifecycle subcommands;
//! each subcommand also gets a `tpi-<name>.1` page describing the shared
//! task flags (provider, sizing, script, firewall, spot pricing) plus its
//! own arguments. Pages land in `OUT_DIR` for the packaging pipeline.

use std::env;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

use cli::Cli;

fn render(page: Man, target: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut buffer = Vec::new();
    page.render(&mut buffer)?;
    File::create(target)?.write_all(&buffer)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = std::io::stdout();
    writeln!(stdout, "cargo:rerun-if-changed=build.rs")?;
    writeln!(stdout, "cargo:rerun-if-changed=src/cli/mod.rs")?;

    let out_dir =
        PathBuf::from(env::var_os("OUT_DIR").ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "OUT_DIR was not set")
        })?);

    let command = Cli::command();
    for subcommand in command.get_subcommands() {
        let title = format!("tpi-{}", subcommand.get_name());
        let target = out_dir.join(format!("{title}.1"));
        render(Man::new(subcommand.clone()).title(title), &target)?;
    }
    render(Man::new(command), &out_dir.join("tpi.1"))
}
