//! In-memory scenario runner: exercises the fanout engine end to end
//! against `MockSubvolume`s, without touching a real filesystem or
//! mounting FUSE. Useful for smoke-testing a build and for demonstrating
//! the translator's failure-handling behavior (short writes, rollback on
//! a failed create, self-heal) without root or a kernel FUSE module.

use std::sync::Arc;

use anyhow::Result;

use striped_rs::config::{Config, PatternRules};
use striped_rs::fanout::Engine;
use striped_rs::geometry::{Geometry, StripeXattrs};
use striped_rs::subvolume::{MockSubvolume, Subvolume, SubvolumeId};

use crate::cli::ScenarioArgs;

struct Scenario {
    name: &'static str,
    run: fn(u64, u64) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), String>>>>,
}

macro_rules! scenario {
    ($name:expr, $body:expr) => {
        Scenario {
            name: $name,
            run: |count, stripe_size| Box::pin($body(count, stripe_size)),
        }
    };
}

pub fn run(args: ScenarioArgs) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;

    let scenarios = vec![
        scenario!("create publishes geometry and stamps every stripe-index", scenario_create),
        scenario!("write spans every subvolume and reconciles size", scenario_write_read_roundtrip),
        scenario!("a failing child truncates a write to the last good stripe", scenario_write_partial_failure),
        scenario!("truncate reconciles size across every subvolume", scenario_truncate),
        scenario!("a missing entry is discovered and self-healed on lookup", scenario_self_heal),
        scenario!("namespace fops fail fast when a subvolume is down", scenario_namespace_requires_all_up),
        scenario!("rename moves the file on every subvolume", scenario_rename),

        scenario!("a failed phase-2 create rolls back every subvolume", scenario_create_rollback),
    ];

    println!("running {} scenarios: N={} subvolumes, stripe_size={} bytes\n", scenarios.len(), args.subvolumes, args.stripe_size);

    let mut failures = 0;
    for scenario in &scenarios {
        let outcome = runtime.block_on((scenario.run)(args.subvolumes, args.stripe_size));
        match outcome {
            Ok(()) => println!("  ok   - {}", scenario.name),
            Err(message) => {
                failures += 1;
                println!("  FAIL - {}: {message}", scenario.name);
            }
        }
    }

    println!();
    if failures == 0 {
        println!("all {} scenarios passed", scenarios.len());
        Ok(())
    } else {
        anyhow::bail!("{failures} of {} scenarios failed", scenarios.len());
    }
}

fn mock_engine(count: u64, stripe_size: u64) -> (Engine, Vec<Arc<MockSubvolume>>) {
    let mocks: Vec<Arc<MockSubvolume>> = (0..count).map(|i| Arc::new(MockSubvolume::new(SubvolumeId::new(i)))).collect();
    let subs: Vec<Arc<dyn Subvolume>> = mocks.iter().map(|m| m.clone() as Arc<dyn Subvolume>).collect();
    let config = Config::new(PatternRules::new(Vec::new(), stripe_size).unwrap(), true, true);
    (Engine::new(subs, config), mocks)
}

async fn create_striped_file(mocks: &[Arc<MockSubvolume>], name: &str, stripe_size: u64) {
    let count = mocks.len();
    for (i, sv) in mocks.iter().enumerate() {
        let xattrs = StripeXattrs {
            stripe_size: stripe_size as i64,
            stripe_count: count as i32,
            stripe_index: i as i32,
            stripe_coalesce: 1,
        };
        sv.create("/", name, 0o644, Some(xattrs), None).await.unwrap();
    }
}

fn require(condition: bool, message: impl Into<String>) -> Result<(), String> {
    if condition {
        Ok(())
    } else {
        Err(message.into())
    }
}

async fn scenario_create(count: u64, stripe_size: u64) -> Result<(), String> {
    let (engine, mocks) = mock_engine(count, stripe_size);
    let outcome = engine.create(1, "/", "a.bin", 0o644, stripe_size).await.map_err(|e| e.to_string())?;
    require(outcome.geometry.stripe_count() == count as usize, "geometry stripe count mismatch")?;
    for (i, sv) in mocks.iter().enumerate() {
        let index = sv.getxattr("/a.bin", "stripe-index").await.map_err(|e| e.to_string())?;
        require(i32::from_le_bytes(index.try_into().unwrap()) == i as i32, "stripe-index not stamped in order")?;
    }
    Ok(())
}

async fn scenario_write_read_roundtrip(count: u64, stripe_size: u64) -> Result<(), String> {
    let (engine, mocks) = mock_engine(count, stripe_size);
    create_striped_file(&mocks, "a.bin", stripe_size).await;
    let geometry = Geometry::new(stripe_size, (0..count).map(SubvolumeId::new).collect(), true).map_err(|e| e.to_string())?;

    let total = stripe_size * count * 2;
    let data = vec![0x42u8; total as usize];
    let write = engine.write(&geometry, "/a.bin", 0, &data).await.map_err(|e| e.to_string())?;
    require(write.written == total as usize, "short write on a healthy fanout")?;

    let read = engine.read(&geometry, "/a.bin", 0, total as usize).await.map_err(|e| e.to_string())?;
    require(read.data == data, "read did not return what was written")?;
    require(read.attr.size == total, "reconciled size does not match written length")?;
    Ok(())
}

async fn scenario_write_partial_failure(count: u64, stripe_size: u64) -> Result<(), String> {
    if count < 2 {
        return Ok(());
    }
    let (engine, mocks) = mock_engine(count, stripe_size);
    create_striped_file(&mocks, "a.bin", stripe_size).await;
    let geometry = Geometry::new(stripe_size, (0..count).map(SubvolumeId::new).collect(), true).map_err(|e| e.to_string())?;

    let failing_index = (count / 2) as usize;
    mocks[failing_index].inject_failure(libc::EIO);

    let data = vec![0x11u8; (stripe_size * count) as usize];
    let outcome = engine.write(&geometry, "/a.bin", 0, &data).await.map_err(|e| e.to_string())?;
    let expected = stripe_size * failing_index as u64;
    require(
        outcome.written as u64 == expected,
        format!("expected {expected} bytes written before the failing child, got {}", outcome.written),
    )
}

async fn scenario_truncate(count: u64, stripe_size: u64) -> Result<(), String> {
    let (engine, mocks) = mock_engine(count, stripe_size);
    create_striped_file(&mocks, "a.bin", stripe_size).await;
    let geometry = Geometry::new(stripe_size, (0..count).map(SubvolumeId::new).collect(), true).map_err(|e| e.to_string())?;

    let full = stripe_size * count;
    engine.fallocate(&geometry, "/a.bin", 0, full, false).await.map_err(|e| e.to_string())?;
    let target = full / 2;
    let result = engine.truncate(&geometry, "/a.bin", target).await.map_err(|e| e.to_string())?;
    require(result.post.size == target, "truncated size does not match target")
}

async fn scenario_self_heal(count: u64, stripe_size: u64) -> Result<(), String> {
    if count < 2 {
        return Ok(());
    }
    let (engine, mocks) = mock_engine(count, stripe_size);
    create_striped_file(&mocks, "a.bin", stripe_size).await;
    mocks[1].unlink("/", "a.bin").await.map_err(|e| e.to_string())?;

    engine.lookup(1, "/", "a.bin").await.map_err(|e| e.to_string())?;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let healed = mocks[1].lookup("/", "a.bin").await;
    require(healed.is_ok(), "lagging subvolume was not self-healed after lookup")
}

async fn scenario_namespace_requires_all_up(count: u64, stripe_size: u64) -> Result<(), String> {
    if count < 2 {
        return Ok(());
    }
    let (engine, _mocks) = mock_engine(count, stripe_size);
    engine.health().set_up(1, false);
    let err = engine.mkdir("/", "sub", 0o755).await.err().ok_or("mkdir succeeded despite a down subvolume")?;
    require(err.errno() == libc::ENOTCONN, "wrong errno for a down subvolume")
}

async fn scenario_rename(count: u64, stripe_size: u64) -> Result<(), String> {
    let (engine, mocks) = mock_engine(count, stripe_size);
    engine.mkdir("/", "dst", 0o755).await.map_err(|e| e.to_string())?;
    create_striped_file(&mocks, "a.bin", stripe_size).await;
    engine.rename("/", "a.bin", "/dst", "b.bin").await.map_err(|e| e.to_string())?;
    for sv in &mocks {
        require(sv.lookup("/dst", "b.bin").await.is_ok(), "renamed entry missing on a subvolume")?;
        require(sv.lookup("/", "a.bin").await.is_err(), "old entry still present on a subvolume")?;
    }
    Ok(())
}

async fn scenario_create_rollback(count: u64, stripe_size: u64) -> Result<(), String> {
    if count < 2 {
        return Ok(());
    }
    let (engine, mocks) = mock_engine(count, stripe_size);
    let failing_index = (count - 1) as usize;
    mocks[failing_index].inject_failure(libc::ENOSPC);

    let err = engine
        .create(1, "/", "a.bin", 0o644, stripe_size)
        .await
        .err()
        .ok_or("create succeeded despite a failing phase-2 child")?;
    require(err.errno() == libc::ENOSPC, "wrong errno surfaced from the failing child")?;
    for sv in &mocks {
        require(sv.lookup("/", "a.bin").await.is_err(), "rollback left a stub behind on some subvolume")?;
    }
    Ok(())
}
