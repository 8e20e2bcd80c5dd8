//! Crash recovery tests for on-disk replicas.

use rollcall_core::{CoreError, Replica, ReplicaConfig};
use rollcall_protocol::{AttendanceRecord, Class, EntityId, EntityKind, Payload};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use tempfile::tempdir;

fn class(name: &str) -> Payload {
    Payload::Class(Class {
        name: name.into(),
        age_group: "5-7".into(),
        teacher_ids: vec![],
        schedule: None,
        room: None,
    })
}

fn table(path: &Path, kind: EntityKind) -> std::path::PathBuf {
    path.join("tables").join(format!("{}.log", kind.as_str()))
}

#[test]
fn store_write_lost_after_logging_is_rolled_forward() {
    let temp = tempdir().unwrap();
    let (id, version) = {
        let replica = Replica::open(temp.path()).unwrap();
        let v1 = replica.create(class("Lambs")).unwrap();
        let v2 = replica
            .update(EntityKind::Class, v1.id, class("Lions"))
            .unwrap();
        (v2.id, v2.version)
    };

    // The change log has both entries; the table loses everything, as if
    // the process died after each log append.
    fs::write(table(temp.path(), EntityKind::Class), b"").unwrap();

    let replica = Replica::open(temp.path()).unwrap();
    let entity = replica.get(EntityKind::Class, id).unwrap();
    assert_eq!(entity.version, version);
    assert_eq!(entity.payload, class("Lions"));
    assert_eq!(replica.changelog().pending_count(), 2);
}

#[test]
fn torn_table_tail_is_discarded() {
    let temp = tempdir().unwrap();
    let id = {
        let replica = Replica::open(temp.path()).unwrap();
        replica.create(class("Lambs")).unwrap().id
    };

    let mut file = OpenOptions::new()
        .append(true)
        .open(table(temp.path(), EntityKind::Class))
        .unwrap();
    file.write_all(&[0x40, 0, 0, 0, 1, 2]).unwrap();
    drop(file);

    let replica = Replica::open(temp.path()).unwrap();
    assert_eq!(replica.get(EntityKind::Class, id).unwrap().version, 1);
    replica.create(class("Lions")).unwrap();
}

#[test]
fn acknowledged_entries_survive_restart() {
    let temp = tempdir().unwrap();
    {
        let replica = Replica::open(temp.path()).unwrap();
        for name in ["A", "B", "C", "D"] {
            replica.create(class(name)).unwrap();
        }
        replica.commit_sync(Some(2), Some(11)).unwrap();
    }

    let replica = Replica::open(temp.path()).unwrap();
    let since: Vec<u64> = replica
        .changelog()
        .entries_since(replica.changelog().last_acknowledged())
        .iter()
        .map(|e| e.local_seq)
        .collect();
    assert_eq!(since, vec![3, 4]);
    assert_eq!(replica.remote_watermark(), 11);
}

#[test]
fn garbage_collected_tombstones_are_not_resurrected() {
    let temp = tempdir().unwrap();
    let id = {
        let replica = Replica::open(temp.path()).unwrap();
        let entity = replica.create(class("Lambs")).unwrap();
        replica.delete(EntityKind::Class, entity.id).unwrap();
        replica.commit_sync(Some(2), None).unwrap();
        assert_eq!(replica.collect_garbage().unwrap().purged, 1);
        entity.id
    };
    let replica = Replica::open(temp.path()).unwrap();
    assert!(replica.get(EntityKind::Class, id).is_none());
}

#[test]
fn attendance_index_is_rebuilt_on_open() {
    let temp = tempdir().unwrap();
    let (student, class_id) = (EntityId::new(), EntityId::new());
    let record = |present| {
        Payload::Attendance(AttendanceRecord {
            student_id: student,
            class_id,
            date: "2024-06-01".into(),
            present,
            notes: None,
        })
    };
    {
        let replica = Replica::open(temp.path()).unwrap();
        replica.create(record(true)).unwrap();
    }
    let replica = Replica::open(temp.path()).unwrap();
    assert!(matches!(
        replica.create(record(false)),
        Err(CoreError::Validation(_))
    ));
}

#[test]
fn missing_replica_without_create_fails() {
    let temp = tempdir().unwrap();
    let result = Replica::open_with_config(
        &temp.path().join("absent"),
        ReplicaConfig::new().create_if_missing(false),
    );
    assert!(matches!(result, Err(CoreError::InvalidFormat { .. })));
}
