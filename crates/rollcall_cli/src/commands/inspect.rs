//! Inspect command implementation.

use super::open_existing;
use rollcall_core::Replica;
use rollcall_protocol::EntityKind;
use serde::Serialize;
use std::path::Path;

/// Replica inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Replica directory.
    pub path: String,
    /// This device's id.
    pub device_id: String,
    /// Last remote watermark applied.
    pub remote_watermark: u64,
    /// Change-log entries on disk.
    pub changelog_entries: usize,
    /// Highest local sequence assigned.
    pub last_seq: u64,
    /// Highest sequence the remote acknowledged.
    pub last_acknowledged: u64,
    /// Entries not yet acknowledged.
    pub pending: usize,
    /// Reserved attendance triples.
    pub attendance_keys: usize,
    /// Per-table statistics.
    pub tables: Vec<TableStats>,
}

/// Statistics for one entity table.
#[derive(Debug, Serialize)]
pub struct TableStats {
    /// Entity type.
    pub kind: String,
    /// Live entities.
    pub live: usize,
    /// Tombstones awaiting GC.
    pub tombstones: usize,
    /// Superseded records compaction would drop.
    pub dead_records: usize,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let replica = open_existing(path)?;
    let result = inspect(&replica, path);

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn inspect(replica: &Replica, path: &Path) -> InspectResult {
    let changelog = replica.changelog();
    let tables = EntityKind::ALL
        .iter()
        .map(|&kind| {
            let all = replica.store().len(kind);
            let live = replica.list(kind, |_| true).len();
            TableStats {
                kind: kind.as_str().to_string(),
                live,
                tombstones: all - live,
                dead_records: replica.store().dead_records(kind),
            }
        })
        .collect();

    InspectResult {
        path: path.display().to_string(),
        device_id: replica.device_id().to_string(),
        remote_watermark: replica.remote_watermark(),
        changelog_entries: changelog.len(),
        last_seq: changelog.last_seq(),
        last_acknowledged: changelog.last_acknowledged(),
        pending: changelog.pending_count(),
        attendance_keys: replica.attendance_index().len(),
        tables,
    }
}

fn print_text_output(result: &InspectResult) {
    println!("Rollcall Replica Inspection");
    println!("===========================");
    println!();
    println!("Path:      {}", result.path);
    println!("Device:    {}", result.device_id);
    println!("Watermark: {}", result.remote_watermark);
    println!();
    println!("Change log:");
    println!("  Entries:           {}", result.changelog_entries);
    println!("  Last sequence:     {}", result.last_seq);
    println!("  Last acknowledged: {}", result.last_acknowledged);
    println!("  Pending:           {}", result.pending);
    println!();
    println!("Tables:");
    for table in &result.tables {
        println!(
            "  {:<12} {} live, {} tombstones, {} dead records",
            table.kind, table.live, table.tombstones, table.dead_records
        );
    }
    println!();
    println!("Attendance keys: {}", result.attendance_keys);
}
