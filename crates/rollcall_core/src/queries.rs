//! Read-side queries and attendance marking.
//!
//! Queries are filters over the entity store; they never consult the
//! change log and never return tombstones.

use crate::error::{CoreError, CoreResult};
use crate::replica::Replica;
use rollcall_protocol::{AttendanceRecord, Entity, EntityId, EntityKind, Payload};
use tracing::debug;

/// Present/absent totals for one student.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttendanceStats {
    /// Records marked present.
    pub present: usize,
    /// Records marked absent.
    pub absent: usize,
    /// All records.
    pub total: usize,
}

impl AttendanceStats {
    /// Share of records marked present, 0 to 100.
    #[must_use]
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.present as f64 * 100.0 / self.total as f64
    }
}

/// One student's line in a bulk attendance submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentMark {
    /// Student.
    pub student_id: EntityId,
    /// Whether the student was present.
    pub present: bool,
    /// Optional notes.
    pub notes: Option<String>,
}

/// Per-student result of [`Replica::bulk_mark_attendance`].
#[derive(Debug)]
pub struct MarkOutcome {
    /// Student.
    pub student_id: EntityId,
    /// The written attendance record, or why it failed.
    pub result: CoreResult<Entity>,
}

/// How many events a dashboard lists when the caller has no preference.
pub const UPCOMING_EVENTS_LIMIT: usize = 10;

fn attendance_of(entity: &Entity) -> Option<&AttendanceRecord> {
    entity.payload.as_attendance()
}

fn date_of(entity: &Entity) -> &str {
    match &entity.payload {
        Payload::Attendance(a) => &a.date,
        Payload::Lesson(l) => &l.date,
        Payload::Event(e) => &e.date,
        Payload::Student(_) | Payload::Class(_) => "",
    }
}

impl Replica {
    /// Attendance taken on `date`, optionally for one class only.
    pub fn attendance_on(&self, date: &str, class_id: Option<EntityId>) -> Vec<Entity> {
        self.list(EntityKind::Attendance, |e| {
            attendance_of(e).is_some_and(|a| {
                a.date == date && class_id.map_or(true, |c| a.class_id == c)
            })
        })
    }

    /// A student's attendance history, most recent date first.
    pub fn attendance_history(&self, student_id: EntityId) -> Vec<Entity> {
        let mut records = self.list(EntityKind::Attendance, |e| {
            attendance_of(e).is_some_and(|a| a.student_id == student_id)
        });
        records.sort_by(|a, b| date_of(b).cmp(date_of(a)));
        records
    }

    /// Present/absent totals over a student's history.
    pub fn attendance_stats(&self, student_id: EntityId) -> AttendanceStats {
        self.attendance_history(student_id)
            .iter()
            .filter_map(attendance_of)
            .fold(AttendanceStats::default(), |mut stats, record| {
                if record.present {
                    stats.present += 1;
                } else {
                    stats.absent += 1;
                }
                stats.total += 1;
                stats
            })
    }

    /// Students enrolled in a class.
    pub fn students_in_class(&self, class_id: EntityId) -> Vec<Entity> {
        self.list(EntityKind::Student, |e| {
            matches!(&e.payload, Payload::Student(s) if s.class_id == class_id)
        })
    }

    /// Lesson plans for a class, by date.
    pub fn lessons_for_class(&self, class_id: EntityId) -> Vec<Entity> {
        let mut lessons = self.list(EntityKind::Lesson, |e| {
            matches!(&e.payload, Payload::Lesson(l) if l.class_id == class_id)
        });
        lessons.sort_by(|a, b| date_of(a).cmp(date_of(b)));
        lessons
    }

    /// Events on a date.
    pub fn events_on(&self, date: &str) -> Vec<Entity> {
        self.list(EntityKind::Event, |e| date_of(e) == date)
    }

    /// Events a class takes part in (including all-class events), by date.
    pub fn events_for_class(&self, class_id: EntityId) -> Vec<Entity> {
        let mut events = self.list(EntityKind::Event, |e| {
            matches!(&e.payload, Payload::Event(ev) if ev.is_for_class(class_id))
        });
        events.sort_by(|a, b| date_of(a).cmp(date_of(b)));
        events
    }

    /// Events dated `today` or later, soonest first, at most `limit` of them.
    pub fn upcoming_events(&self, today: &str, limit: usize) -> Vec<Entity> {
        let mut events = self.list(EntityKind::Event, |e| date_of(e) >= today);
        events.sort_by(|a, b| {
            let key = |e: &Entity| match &e.payload {
                Payload::Event(ev) => (ev.date.clone(), ev.time.clone()),
                _ => (String::new(), String::new()),
            };
            key(a).cmp(&key(b))
        });
        events.truncate(limit);
        events
    }

    /// Marks a lesson as taught. A lesson already marked is returned as-is
    /// without a new change-log entry.
    pub fn complete_lesson(&self, id: EntityId) -> CoreResult<Entity> {
        let lesson = self.require(EntityKind::Lesson, id)?;
        let Payload::Lesson(mut plan) = lesson.payload.clone() else {
            return Err(CoreError::NotFound {
                kind: EntityKind::Lesson,
                id,
            });
        };
        if plan.completed {
            return Ok(lesson);
        }
        plan.completed = true;
        self.update(EntityKind::Lesson, id, Payload::Lesson(plan))
    }

    /// Records a student's attendance, updating the existing record for the
    /// same class and date in place or creating one.
    pub fn mark_attendance(
        &self,
        student_id: EntityId,
        class_id: EntityId,
        date: &str,
        present: bool,
        notes: Option<String>,
    ) -> CoreResult<Entity> {
        let record = AttendanceRecord {
            student_id,
            class_id,
            date: date.to_string(),
            present,
            notes,
        };
        let key = record.key();
        let payload = Payload::Attendance(record);
        payload.validate()?;

        let _writer = self.writer(EntityKind::Attendance);
        match self.index.lookup(&key) {
            Some(id) => self.update_locked(EntityKind::Attendance, id, payload),
            None => self.create_locked(EntityId::new(), payload),
        }
    }

    /// Marks a whole class for one date. Each student is handled on its
    /// own; a failure for one does not stop the others.
    pub fn bulk_mark_attendance(
        &self,
        class_id: EntityId,
        date: &str,
        marks: &[StudentMark],
    ) -> Vec<MarkOutcome> {
        let outcomes: Vec<MarkOutcome> = marks
            .iter()
            .map(|mark| MarkOutcome {
                student_id: mark.student_id,
                result: self.mark_attendance(
                    mark.student_id,
                    class_id,
                    date,
                    mark.present,
                    mark.notes.clone(),
                ),
            })
            .collect();
        let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
        debug!(%class_id, date, marked = outcomes.len() - failed, failed, "bulk attendance");
        outcomes
    }

    /// Looks up a live entity or fails with `NotFound`.
    pub fn require(&self, kind: EntityKind, id: EntityId) -> CoreResult<Entity> {
        self.get(kind, id)
            .filter(Entity::is_live)
            .ok_or(CoreError::NotFound { kind, id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_protocol::{Class, Event, LessonPlan, Student, ValidationError};

    fn seeded() -> (Replica, EntityId, EntityId, EntityId) {
        let replica = Replica::open_in_memory().unwrap();
        let class = replica
            .create(Payload::Class(Class {
                name: "Lambs".into(),
                age_group: "3-4".into(),
                teacher_ids: vec![],
                schedule: None,
                room: None,
            }))
            .unwrap();
        let student = |first: &str| {
            replica
                .create(Payload::Student(Student {
                    first_name: first.into(),
                    last_name: "Lee".into(),
                    date_of_birth: "2019-05-05".into(),
                    class_id: class.id,
                    parent_ids: vec![],
                    photo_url: None,
                    notes: None,
                }))
                .unwrap()
                .id
        };
        let (ann, bo) = (student("Ann"), student("Bo"));
        (replica, class.id, ann, bo)
    }

    #[test]
    fn mark_attendance_upserts() {
        let (replica, class, ann, _) = seeded();
        let first = replica
            .mark_attendance(ann, class, "2024-06-02", true, None)
            .unwrap();
        let second = replica
            .mark_attendance(ann, class, "2024-06-02", false, Some("left early".into()))
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.version, 2);
        assert_eq!(replica.attendance_on("2024-06-02", Some(class)).len(), 1);
    }

    #[test]
    fn bulk_marking_reports_each_student() {
        let (replica, class, ann, bo) = seeded();
        let marks = vec![
            StudentMark {
                student_id: ann,
                present: true,
                notes: None,
            },
            StudentMark {
                student_id: bo,
                present: false,
                notes: None,
            },
        ];
        let outcomes = replica.bulk_mark_attendance(class, "2024-06-09", &marks);
        assert!(outcomes.iter().all(|o| o.result.is_ok()));
        assert_eq!(replica.attendance_on("2024-06-09", None).len(), 2);

        let bad = replica.bulk_mark_attendance(class, "June 9", &marks);
        assert!(bad.iter().all(|o| matches!(
            o.result,
            Err(CoreError::Validation(ValidationError::InvalidDate { .. }))
        )));
    }

    #[test]
    fn stats_and_history() {
        let (replica, class, ann, _) = seeded();
        for (date, present) in [("2024-06-02", true), ("2024-06-09", false), ("2024-06-16", true)] {
            replica
                .mark_attendance(ann, class, date, present, None)
                .unwrap();
        }
        let stats = replica.attendance_stats(ann);
        assert_eq!(
            stats,
            AttendanceStats {
                present: 2,
                absent: 1,
                total: 3
            }
        );
        assert!((stats.percentage() - 66.666).abs() < 0.01);
        assert_eq!(AttendanceStats::default().percentage(), 0.0);

        let history = replica.attendance_history(ann);
        assert_eq!(date_of(&history[0]), "2024-06-16");
        assert_eq!(date_of(&history[2]), "2024-06-02");
    }

    #[test]
    fn class_scoped_queries() {
        let (replica, class, ann, bo) = seeded();
        let students: Vec<EntityId> = replica.students_in_class(class).iter().map(|e| e.id).collect();
        assert_eq!(students.len(), 2);
        assert!(students.contains(&ann) && students.contains(&bo));

        for date in ["2024-06-16", "2024-06-02"] {
            replica
                .create(Payload::Lesson(LessonPlan {
                    class_id: class,
                    title: "Creation".into(),
                    date: date.into(),
                    bible_verse: None,
                    objectives: vec![],
                    materials: vec![],
                    activities: vec![],
                    notes: None,
                    completed: false,
                }))
                .unwrap();
        }
        let lessons = replica.lessons_for_class(class);
        assert_eq!(date_of(&lessons[0]), "2024-06-02");

        let event = |class_ids: Vec<EntityId>| {
            Payload::Event(Event {
                title: "Picnic".into(),
                description: None,
                date: "2024-07-04".into(),
                time: "12:00".into(),
                location: None,
                class_ids,
            })
        };
        replica.create(event(vec![])).unwrap();
        replica.create(event(vec![class])).unwrap();
        replica.create(event(vec![EntityId::new()])).unwrap();
        assert_eq!(replica.events_on("2024-07-04").len(), 3);
        assert_eq!(replica.events_for_class(class).len(), 2);
    }

    #[test]
    fn upcoming_events_start_today_and_respect_the_limit() {
        let (replica, _, _, _) = seeded();
        let event = |title: &str, date: &str, time: &str| {
            Payload::Event(Event {
                title: title.into(),
                description: None,
                date: date.into(),
                time: time.into(),
                location: None,
                class_ids: vec![],
            })
        };
        replica.create(event("Picnic", "2024-07-04", "12:00")).unwrap();
        replica.create(event("Past", "2024-05-30", "09:00")).unwrap();
        replica.create(event("Choir", "2024-06-02", "11:30")).unwrap();
        replica.create(event("Breakfast", "2024-06-02", "08:00")).unwrap();
        let cancelled = replica.create(event("Trip", "2024-06-20", "10:00")).unwrap();
        replica.delete(EntityKind::Event, cancelled.id).unwrap();

        let titles = |events: Vec<Entity>| -> Vec<String> {
            events
                .into_iter()
                .filter_map(|e| match e.payload {
                    Payload::Event(ev) => Some(ev.title),
                    _ => None,
                })
                .collect()
        };
        assert_eq!(
            titles(replica.upcoming_events("2024-06-02", UPCOMING_EVENTS_LIMIT)),
            ["Breakfast", "Choir", "Picnic"]
        );
        assert_eq!(
            titles(replica.upcoming_events("2024-06-02", 2)),
            ["Breakfast", "Choir"]
        );
        assert!(replica.upcoming_events("2024-08-01", 10).is_empty());
    }

    #[test]
    fn completing_a_lesson_is_a_logged_update() {
        let (replica, class, _, _) = seeded();
        let lesson = replica
            .create(Payload::Lesson(LessonPlan {
                class_id: class,
                title: "Noah".into(),
                date: "2024-06-09".into(),
                bible_verse: None,
                objectives: vec![],
                materials: vec![],
                activities: vec![],
                notes: None,
                completed: false,
            }))
            .unwrap();
        let logged = replica.changelog().len();

        let done = replica.complete_lesson(lesson.id).unwrap();
        assert_eq!(done.version, 2);
        assert!(matches!(&done.payload, Payload::Lesson(l) if l.completed && l.title == "Noah"));
        assert_eq!(replica.changelog().len(), logged + 1);

        assert_eq!(replica.complete_lesson(lesson.id).unwrap(), done);
        assert_eq!(replica.changelog().len(), logged + 1);

        replica.delete(EntityKind::Lesson, lesson.id).unwrap();
        assert!(matches!(
            replica.complete_lesson(lesson.id),
            Err(CoreError::NotFound { .. })
        ));
        assert!(replica.complete_lesson(class).is_err());
    }

    #[test]
    fn require_hides_tombstones() {
        let (replica, _, ann, _) = seeded();
        assert!(replica.require(EntityKind::Student, ann).is_ok());
        replica.delete(EntityKind::Student, ann).unwrap();
        assert!(matches!(
            replica.require(EntityKind::Student, ann),
            Err(CoreError::NotFound { .. })
        ));
    }
}
