//! Per-type payload schemas.
//!
//! Field names follow the REST wire format (camelCase). Every payload is
//! checked with [`Payload::validate`] on local writes and again when it
//! crosses the transport boundary.

use crate::error::{ProtocolResult, ValidationError};
use crate::id::EntityId;
use crate::kind::EntityKind;
use serde::{Deserialize, Serialize};

/// A student enrolled in a class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub last_name: String,
    /// `YYYY-MM-DD`.
    pub date_of_birth: String,
    /// Class the student attends.
    pub class_id: EntityId,
    /// Parent user ids.
    #[serde(default)]
    pub parent_ids: Vec<String>,
    /// Profile photo.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    /// Free-form notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// A class (age group).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Class {
    /// Display name.
    pub name: String,
    /// Age group label, e.g. "5-7".
    pub age_group: String,
    /// Teacher user ids.
    #[serde(default)]
    pub teacher_ids: Vec<String>,
    /// Meeting schedule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    /// Room.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
}

/// One student's attendance for one class on one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    /// Student.
    pub student_id: EntityId,
    /// Class.
    pub class_id: EntityId,
    /// `YYYY-MM-DD`.
    pub date: String,
    /// Whether the student was present.
    #[serde(default)]
    pub present: bool,
    /// Free-form notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl AttendanceRecord {
    /// The uniqueness key of this record.
    #[must_use]
    pub fn key(&self) -> AttendanceKey {
        AttendanceKey {
            student_id: self.student_id,
            class_id: self.class_id,
            date: self.date.clone(),
        }
    }
}

/// The `(student, class, date)` triple unique among live attendance records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttendanceKey {
    /// Student.
    pub student_id: EntityId,
    /// Class.
    pub class_id: EntityId,
    /// `YYYY-MM-DD`.
    pub date: String,
}

/// A lesson plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonPlan {
    /// Class the lesson is for.
    pub class_id: EntityId,
    /// Title.
    pub title: String,
    /// `YYYY-MM-DD`.
    pub date: String,
    /// Memory verse.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bible_verse: Option<String>,
    /// Learning objectives.
    #[serde(default)]
    pub objectives: Vec<String>,
    /// Materials to bring.
    #[serde(default)]
    pub materials: Vec<String>,
    /// Planned activities.
    #[serde(default)]
    pub activities: Vec<String>,
    /// Free-form notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Whether the lesson was taught.
    #[serde(default)]
    pub completed: bool,
}

/// A calendar event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Title.
    pub title: String,
    /// Description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// `YYYY-MM-DD`.
    pub date: String,
    /// Start time as entered, e.g. "10:30".
    pub time: String,
    /// Location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Classes the event is for. Empty means every class.
    #[serde(default)]
    pub class_ids: Vec<EntityId>,
}

impl Event {
    /// Whether the event concerns `class_id`.
    #[must_use]
    pub fn is_for_class(&self, class_id: EntityId) -> bool {
        self.class_ids.is_empty() || self.class_ids.contains(&class_id)
    }
}

/// The domain fields of an entity, tagged with its type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "fields", rename_all = "snake_case")]
pub enum Payload {
    /// Student fields.
    Student(Student),
    /// Class fields.
    Class(Class),
    /// Attendance fields.
    Attendance(AttendanceRecord),
    /// Lesson plan fields.
    Lesson(LessonPlan),
    /// Event fields.
    Event(Event),
}

impl Payload {
    /// The entity type this payload belongs to.
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        match self {
            Payload::Student(_) => EntityKind::Student,
            Payload::Class(_) => EntityKind::Class,
            Payload::Attendance(_) => EntityKind::Attendance,
            Payload::Lesson(_) => EntityKind::Lesson,
            Payload::Event(_) => EntityKind::Event,
        }
    }

    /// Attendance fields, if this is an attendance payload.
    #[must_use]
    pub fn as_attendance(&self) -> Option<&AttendanceRecord> {
        match self {
            Payload::Attendance(record) => Some(record),
            _ => None,
        }
    }

    /// Checks required fields and date formats.
    pub fn validate(&self) -> ProtocolResult<()> {
        let kind = self.kind();
        match self {
            Payload::Student(s) => {
                required(kind, "firstName", &s.first_name)?;
                required(kind, "lastName", &s.last_name)?;
                date(kind, "dateOfBirth", &s.date_of_birth)
            }
            Payload::Class(c) => {
                required(kind, "name", &c.name)?;
                required(kind, "ageGroup", &c.age_group)
            }
            Payload::Attendance(a) => date(kind, "date", &a.date),
            Payload::Lesson(l) => {
                required(kind, "title", &l.title)?;
                date(kind, "date", &l.date)
            }
            Payload::Event(e) => {
                required(kind, "title", &e.title)?;
                date(kind, "date", &e.date)?;
                required(kind, "time", &e.time)
            }
        }
    }
}

fn required(kind: EntityKind, field: &'static str, value: &str) -> ProtocolResult<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField { kind, field });
    }
    Ok(())
}

fn date(kind: EntityKind, field: &'static str, value: &str) -> ProtocolResult<()> {
    required(kind, field, value)?;
    if !is_calendar_date(value) {
        return Err(ValidationError::InvalidDate {
            kind,
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Whether `value` is a real `YYYY-MM-DD` calendar date.
#[must_use]
pub fn is_calendar_date(value: &str) -> bool {
    let bytes = value.as_bytes();
    if bytes.len() != 10 || bytes[4] != b'-' || bytes[7] != b'-' {
        return false;
    }
    let digits = |range: std::ops::Range<usize>| -> Option<u32> {
        let part = &value[range];
        if part.bytes().all(|b| b.is_ascii_digit()) {
            part.parse().ok()
        } else {
            None
        }
    };
    let (Some(year), Some(month), Some(day)) = (digits(0..4), digits(5..7), digits(8..10)) else {
        return false;
    };
    let leap = (year % 4 == 0 && year % 100 != 0) || year % 400 == 0;
    let days_in_month = match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if leap => 29,
        2 => 28,
        _ => return false,
    };
    (1..=days_in_month).contains(&day)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attendance(date: &str) -> Payload {
        Payload::Attendance(AttendanceRecord {
            student_id: EntityId::new(),
            class_id: EntityId::new(),
            date: date.to_string(),
            present: true,
            notes: None,
        })
    }

    #[test]
    fn calendar_dates() {
        assert!(is_calendar_date("2024-06-01"));
        assert!(is_calendar_date("2024-02-29"));
        assert!(is_calendar_date("2000-02-29"));
        assert!(!is_calendar_date("1900-02-29"));
        assert!(!is_calendar_date("2023-02-29"));
        assert!(!is_calendar_date("2024-13-01"));
        assert!(!is_calendar_date("2024-04-31"));
        assert!(!is_calendar_date("2024-6-1"));
        assert!(!is_calendar_date("2024/06/01"));
        assert!(!is_calendar_date("2024-06-01T00:00:00Z"));
        assert!(!is_calendar_date("+024-06-01"));
    }

    #[test]
    fn attendance_requires_a_date() {
        assert!(attendance("2024-06-01").validate().is_ok());
        assert_eq!(
            attendance("June 1").validate(),
            Err(ValidationError::InvalidDate {
                kind: EntityKind::Attendance,
                field: "date",
                value: "June 1".into(),
            })
        );
        assert!(matches!(
            attendance("").validate(),
            Err(ValidationError::MissingField { field: "date", .. })
        ));
    }

    #[test]
    fn blank_names_are_missing() {
        let student = Payload::Student(Student {
            first_name: "  ".into(),
            last_name: "Doe".into(),
            date_of_birth: "2017-03-04".into(),
            class_id: EntityId::new(),
            parent_ids: vec![],
            photo_url: None,
            notes: None,
        });
        assert_eq!(
            student.validate(),
            Err(ValidationError::MissingField {
                kind: EntityKind::Student,
                field: "firstName",
            })
        );
    }

    #[test]
    fn event_needs_a_time() {
        let event = Payload::Event(Event {
            title: "Picnic".into(),
            description: None,
            date: "2024-07-04".into(),
            time: String::new(),
            location: None,
            class_ids: vec![],
        });
        assert!(matches!(
            event.validate(),
            Err(ValidationError::MissingField { field: "time", .. })
        ));
    }

    #[test]
    fn wire_format_is_tagged_camel_case() {
        let json = serde_json::to_value(attendance("2024-06-01")).unwrap();
        assert_eq!(json["type"], "attendance");
        assert_eq!(json["fields"]["date"], "2024-06-01");
        assert_eq!(json["fields"]["present"], true);
        assert!(json["fields"].get("studentId").is_some());
        assert!(json["fields"].get("notes").is_none());
    }

    #[test]
    fn optional_fields_default_when_absent() {
        let class_id = EntityId::new();
        let json = serde_json::json!({
            "type": "lesson",
            "fields": { "classId": class_id, "title": "Creation", "date": "2024-06-02" }
        });
        let payload: Payload = serde_json::from_value(json).unwrap();
        let Payload::Lesson(lesson) = payload else {
            panic!("expected a lesson");
        };
        assert!(!lesson.completed);
        assert!(lesson.objectives.is_empty());
        assert_eq!(lesson.class_id, class_id);
    }

    #[test]
    fn empty_class_list_means_every_class() {
        let mut event = Event {
            title: "Picnic".into(),
            description: None,
            date: "2024-07-04".into(),
            time: "12:00".into(),
            location: None,
            class_ids: vec![],
        };
        let class_id = EntityId::new();
        assert!(event.is_for_class(class_id));
        event.class_ids.push(EntityId::new());
        assert!(!event.is_for_class(class_id));
    }
}
