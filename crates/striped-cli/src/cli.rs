//! Command-line surface for the `striped-cli` binary: a real FUSE mount
//! over N local directories, and an in-memory scenario runner for
//! exercising the engine without touching a filesystem at all.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Root command.
#[derive(Parser, Debug)]
#[command(author, version, about = "Striping storage translator front end")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Mount a FUSE filesystem that stripes files across N directories.
    Mount(MountArgs),
    /// Run the engine's end-to-end scenarios against an in-memory mock
    /// and print a pass/fail report.
    Scenario(ScenarioArgs),
}

/// Arguments for `striped-cli mount`.
#[derive(Args, Debug)]
pub struct MountArgs {
    /// Where to mount the striped filesystem.
    #[arg(long)]
    pub mount_point: PathBuf,

    /// One directory per subvolume, in stripe order. At least two are
    /// required; subvolume 0 is always the primary.
    #[arg(long = "subvolume", required = true, num_args = 1.., value_name = "DIR")]
    pub subvolumes: Vec<PathBuf>,

    /// Stripe size for newly created files: a bare byte count, or a
    /// `glob:size[,glob:size...]` list matched in order against the new
    /// file's path, falling back to 131072 if nothing matches (e.g.
    /// `/video/*:1048576,/logs/*:65536`).
    #[arg(long, default_value = "131072")]
    pub block_size: String,

    /// Store new files coalesced (packed, no per-subvolume holes) rather
    /// than at their sparse logical offsets.
    #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
    pub coalesce: bool,

    /// Send geometry xattrs on create. Disabling this is a legacy
    /// compatibility path for subvolumes that infer geometry from size.
    #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
    pub use_xattr: bool,

    /// Allow other users to access the mount (requires `user_allow_other`
    /// in `/etc/fuse.conf`).
    #[arg(long, action = clap::ArgAction::Set, default_value_t = false)]
    pub allow_other: bool,
}

/// Arguments for `striped-cli scenario`.
#[derive(Args, Debug)]
pub struct ScenarioArgs {
    /// Number of subvolumes to simulate.
    #[arg(long, default_value_t = 4)]
    pub subvolumes: u64,

    /// Stripe size in bytes for the simulated geometry.
    #[arg(long, default_value_t = 131_072)]
    pub stripe_size: u64,
}
