use anyhow::{bail, Context};
use clap::Parser;

use sql2textfs::cli::Cli;
use sql2textfs::{logging, MountConfig, TextFs};

fn running_as_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => MountConfig::load(path)?,
        None => MountConfig::default(),
    };
    let config = cli.apply(config);

    let _log_guard = logging::init(config.log_file.as_deref(), config.verbose)
        .context("failed to open log file")?;

    if running_as_root() && !config.allow_root {
        bail!("refusing to run as root; pass --root to allow it");
    }

    let engine = engine::connect(&cli.conn_string)
        .with_context(|| format!("failed to connect to {}", cli.conn_string))?;
    if let Err(e) = engine.list_databases() {
        if e.is_fatal() {
            return Err(e).context("table engine is unusable");
        }
        tracing::warn!(error = %e, "initial database listing failed");
    }
    let fs = TextFs::new(engine, config.text_fs_options())
        .context("failed to set up mirror directory")?;

    tracing::info!(
        mountpoint = %cli.mountpoint.display(),
        reload = config.reload,
        "mounting"
    );
    mount(fs, &cli, &config)
}

#[cfg(feature = "fuse")]
fn mount(fs: TextFs, cli: &Cli, config: &MountConfig) -> anyhow::Result<()> {
    sql2textfs::fuse::mount(fs, &cli.mountpoint, &config.mount_options)
        .with_context(|| format!("failed to mount at {}", cli.mountpoint.display()))
}

#[cfg(not(feature = "fuse"))]
fn mount(_fs: TextFs, _cli: &Cli, _config: &MountConfig) -> anyhow::Result<()> {
    bail!("built without FUSE support; enable the `fuse` feature")
}
