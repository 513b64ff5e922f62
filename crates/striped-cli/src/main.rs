#![allow(clippy::multiple_crate_versions)]

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod dir_subvolume;
mod filesystem;
mod mount;
mod scenario;

use cli::{Cli, Command};

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Mount(args) => mount::run(args),
        Command::Scenario(args) => scenario::run(args),
    }
}

fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();
}
