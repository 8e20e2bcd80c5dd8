//! Dump-changelog command implementation.

use super::open_existing;
use rollcall_core::Replica;
use rollcall_protocol::ChangeLogEntry;
use serde::Serialize;
use std::path::Path;

/// Change-log entry representation for output.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryInfo {
    /// The entry as it is replicated.
    #[serde(flatten)]
    pub entry: ChangeLogEntry,
    /// Whether the remote has acknowledged it.
    pub acknowledged: bool,
}

/// Runs the dump-changelog command.
pub fn run(
    path: &Path,
    pending_only: bool,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let replica = open_existing(path)?;
    let entries = collect_entries(&replica, pending_only, limit);

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        _ => {
            print_text_output(&entries);
        }
    }

    Ok(())
}

fn collect_entries(replica: &Replica, pending_only: bool, limit: Option<usize>) -> Vec<EntryInfo> {
    let acked = replica.changelog().last_acknowledged();
    let from = if pending_only { acked } else { 0 };
    replica
        .changelog()
        .entries_since(from)
        .into_iter()
        .take(limit.unwrap_or(usize::MAX))
        .map(|entry| EntryInfo {
            acknowledged: entry.local_seq <= acked,
            entry,
        })
        .collect()
}

fn print_text_output(entries: &[EntryInfo]) {
    println!("Change Log Entries");
    println!("==================");
    println!();

    for info in entries {
        let entry = &info.entry;
        println!(
            "#{:<6} {:<7} {:<10} {} v{} -> v{} @{} {:?}{}",
            entry.local_seq,
            format!("{:?}", entry.op).to_uppercase(),
            entry.entity_type,
            entry.entity_id,
            entry.base_version,
            entry.version,
            entry.updated_at,
            entry.origin,
            if info.acknowledged { " (acked)" } else { "" },
        );
    }

    println!();
    println!("Total: {} entries", entries.len());
}
