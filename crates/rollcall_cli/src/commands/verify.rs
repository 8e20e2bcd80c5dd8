//! Verify command implementation.

use super::open_existing;
use rollcall_core::{Replica, ReplicaDir};
use rollcall_protocol::EntityKind;
use rollcall_storage::{crc32, FRAME_HEADER_SIZE};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of records checked.
    pub records_checked: usize,
    /// Bytes of a torn final record, which the next open discards.
    pub torn_bytes: u64,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    fn merge(&mut self, other: VerifyResult) {
        self.records_checked += other.records_checked;
        self.torn_bytes += other.torn_bytes;
        self.errors.extend(other.errors);
    }
}

/// Runs the verify command.
///
/// Framing is checked on the raw files before the replica is opened, since
/// opening truncates torn tails and rolls the change log forward.
pub fn run(path: &Path, check_logs: bool, check_state: bool) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying replica at {}", path.display());
    println!();

    let mut log_result = VerifyResult::default();
    let mut state_result = VerifyResult::default();

    if check_logs {
        println!("Checking log framing...");
        for file in log_files(path)? {
            if !file.exists() {
                continue;
            }
            let bytes = fs::read(&file)?;
            let mut result = scan_frames(&bytes);
            for error in &mut result.errors {
                *error = format!("{}: {}", file.display(), error);
            }
            log_result.merge(result);
        }
        print_result("Logs", &log_result);
    }

    if check_state {
        println!("Checking replica state...");
        match open_existing(path) {
            Ok(replica) => state_result = verify_state(&replica),
            Err(e) => state_result.errors.push(format!("failed to open replica: {e}")),
        }
        print_result("State", &state_result);
    }

    println!();
    if log_result.is_ok() && state_result.is_ok() {
        println!("✓ Replica verification passed");
        Ok(())
    } else {
        println!("✗ Replica verification failed");
        Err("Verification failed".into())
    }
}

/// Lists the change log and every table log, holding the directory lock
/// only while the paths are resolved.
fn log_files(path: &Path) -> Result<Vec<PathBuf>, Box<dyn std::error::Error>> {
    let dir = ReplicaDir::open(path, false)?;
    let mut files = vec![dir.changelog_path()];
    files.extend(EntityKind::ALL.iter().map(|&kind| dir.table_path(kind)));
    Ok(files)
}

fn scan_frames(bytes: &[u8]) -> VerifyResult {
    let mut result = VerifyResult::default();
    let total = bytes.len();
    let mut offset = 0usize;

    while offset < total {
        if total - offset < FRAME_HEADER_SIZE {
            break;
        }
        let header = &bytes[offset..offset + FRAME_HEADER_SIZE];
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let expected = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        let end = offset + FRAME_HEADER_SIZE + len;
        if end > total {
            break;
        }

        result.records_checked += 1;
        if crc32(&bytes[offset + FRAME_HEADER_SIZE..end]) != expected {
            if end == total {
                break;
            }
            result
                .errors
                .push(format!("checksum mismatch at offset {offset} with data following"));
            return result;
        }
        offset = end;
    }

    result.torn_bytes = (total - offset) as u64;
    result
}

fn verify_state(replica: &Replica) -> VerifyResult {
    let mut result = VerifyResult::default();
    let changelog = replica.changelog();

    let entries = changelog.entries_since(0);
    result.records_checked += entries.len();
    for pair in entries.windows(2) {
        if pair[1].local_seq <= pair[0].local_seq {
            result.errors.push(format!(
                "change log out of order: {} follows {}",
                pair[1].local_seq, pair[0].local_seq
            ));
        }
    }
    if changelog.last_acknowledged() > changelog.last_seq() {
        result.errors.push(format!(
            "acknowledged sequence {} beyond last sequence {}",
            changelog.last_acknowledged(),
            changelog.last_seq()
        ));
    }

    for entry in replica.pending(usize::MAX) {
        match replica.get(entry.entity_type, entry.entity_id) {
            Some(entity) if entity.version >= entry.version => {}
            Some(entity) => result.errors.push(format!(
                "{} {} at version {} behind pending change {} (version {})",
                entry.entity_type, entry.entity_id, entity.version, entry.local_seq, entry.version
            )),
            None => result.errors.push(format!(
                "pending change {} refers to missing {} {}",
                entry.local_seq, entry.entity_type, entry.entity_id
            )),
        }
    }

    let mut seen = HashSet::new();
    for record in replica.list(EntityKind::Attendance, |_| true) {
        result.records_checked += 1;
        let Some(key) = record.attendance_key() else {
            continue;
        };
        if replica.attendance_index().lookup(&key) != Some(record.id) {
            result
                .errors
                .push(format!("attendance {} missing from uniqueness index", record.id));
        }
        if !seen.insert(key) {
            result
                .errors
                .push(format!("attendance {} duplicates a live record", record.id));
        }
    }

    result
}

fn print_result(name: &str, result: &VerifyResult) {
    println!("  {name}:");
    println!("    Records checked: {}", result.records_checked);
    if result.torn_bytes > 0 {
        println!("    Torn tail bytes: {} (discarded on next open)", result.torn_bytes);
    }

    if !result.errors.is_empty() {
        println!("    Errors:");
        for error in &result.errors {
            println!("      - {error}");
        }
    }
}
