//! Wires `striped-rs`'s fanout engine to a real FUSE mount, using
//! ordinary local directories as the N backend subvolumes — a concrete
//! implementation of the "opaque subvolume handle" the core engine only
//! ever calls through a trait object.

use std::sync::Arc;

use anyhow::{Context, Result};
use fuser::MountOption;
use striped_rs::config::{Config, PatternRules};
use striped_rs::fanout::Engine;
use striped_rs::subvolume::{Subvolume, SubvolumeId};

use crate::cli::MountArgs;
use crate::dir_subvolume::DirSubvolume;
use crate::filesystem::StripedFs;

pub fn run(args: MountArgs) -> Result<()> {
    if args.subvolumes.len() < 2 {
        anyhow::bail!("at least two --subvolume directories are required");
    }

    let patterns = resolve_patterns(&args.block_size)?;
    let config = Config::new(patterns, args.use_xattr, args.coalesce);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build the async runtime")?;
    let handle = runtime.handle().clone();

    let subvolumes: Vec<Arc<dyn Subvolume>> = args
        .subvolumes
        .iter()
        .enumerate()
        .map(|(i, dir)| {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create subvolume directory {}", dir.display()))?;
            Ok(Arc::new(DirSubvolume::new(SubvolumeId::new(i as u64), dir.clone())) as Arc<dyn Subvolume>)
        })
        .collect::<Result<_>>()?;

    std::fs::create_dir_all(&args.mount_point)
        .with_context(|| format!("failed to create mount point {}", args.mount_point.display()))?;

    let engine = Arc::new(Engine::new(subvolumes, config));
    let fs = StripedFs::new(engine, handle);

    let mut options = vec![MountOption::RW, MountOption::FSName("striped".into())];
    options.push(if args.allow_other {
        MountOption::AllowOther
    } else {
        MountOption::AllowRoot
    });

    tracing::info!(
        mount_point = %args.mount_point.display(),
        subvolumes = args.subvolumes.len(),
        "mounting striped filesystem"
    );

    fuser::mount2(fs, &args.mount_point, &options)
        .with_context(|| format!("failed to mount filesystem at {}", args.mount_point.display()))?;

    drop(runtime);
    Ok(())
}

fn resolve_patterns(block_size: &str) -> Result<PatternRules> {
    if block_size.contains(':') {
        PatternRules::parse(block_size, 131_072).context("invalid --block-size pattern list")
    } else {
        let default: u64 = block_size
            .parse()
            .with_context(|| format!("--block-size {block_size:?} must be a byte count or a glob:size list"))?;
        PatternRules::new(Vec::new(), default).context("invalid --block-size")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_patterns_accepts_a_bare_byte_count() {
        let patterns = resolve_patterns("65536").unwrap();
        assert_eq!(patterns.resolve("/anything"), 65536);
    }

    #[test]
    fn resolve_patterns_accepts_a_glob_list() {
        let patterns = resolve_patterns("/video/*:1048576,/logs/*:65536").unwrap();
        assert_eq!(patterns.resolve("/video/a.mp4"), 1_048_576);
        assert_eq!(patterns.resolve("/docs/a.txt"), 131_072);
    }

    #[test]
    fn resolve_patterns_rejects_garbage() {
        assert!(resolve_patterns("not-a-number").is_err());
    }
}
