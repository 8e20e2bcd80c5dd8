//! Garbage-collection command implementation.

use super::open_existing;
use rollcall_core::Replica;
use rollcall_protocol::EntityKind;
use std::path::Path;

/// Runs the gc command.
pub fn run(path: &Path, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    let replica = open_existing(path)?;

    println!("Collecting garbage in {}", path.display());
    println!();

    let eligible = purgeable_tombstones(&replica);
    println!("Acknowledged tombstones: {eligible}");
    for kind in EntityKind::ALL {
        let dead = replica.store().dead_records(kind);
        if dead > 0 {
            println!("  {kind}: {dead} superseded records");
        }
    }

    if dry_run {
        println!();
        println!("Dry run - no changes made");
        return Ok(());
    }

    let report = replica.collect_garbage()?;
    println!();
    println!("Purged:      {} tombstones", report.purged);
    println!("Compacted:   {} tables", report.compacted_tables);
    println!("Reclaimed:   {} bytes", report.reclaimed_bytes);
    Ok(())
}

/// Tombstones whose deletes the remote has acknowledged.
fn purgeable_tombstones(replica: &Replica) -> usize {
    EntityKind::ALL
        .iter()
        .flat_map(|&kind| replica.store().list_with_tombstones(kind))
        .filter(|e| e.deleted && replica.changelog().pending_for(e.kind(), e.id).is_empty())
        .count()
}
