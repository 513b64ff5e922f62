//! `striped-rs`: the striping storage translator's core engine — geometry
//! discovery, the offset mapper, the inode/fd context cache, the per-fop
//! fanout engine, self-heal, and the pattern/config resolver. No network
//! or filesystem front end lives here; `striped-cli` drives this engine
//! over real subvolumes.

pub mod cache;
pub mod config;
pub mod error;
pub mod fanout;
pub mod geometry;
pub mod heal;
pub mod metrics;
pub mod offset;
pub mod subvolume;
