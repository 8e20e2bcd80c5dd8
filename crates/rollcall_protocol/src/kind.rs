//! Entity types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The roster entity types a replica stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A student enrolled in one class.
    Student,
    /// A class (age group with teachers and a schedule).
    Class,
    /// One student's attendance for one class on one day.
    Attendance,
    /// A lesson plan for a class.
    Lesson,
    /// A calendar event.
    Event,
}

impl EntityKind {
    /// Every kind, in table order.
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Student,
        EntityKind::Class,
        EntityKind::Attendance,
        EntityKind::Lesson,
        EntityKind::Event,
    ];

    /// Stable lowercase name, used for table file names and logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Student => "student",
            EntityKind::Class => "class",
            EntityKind::Attendance => "attendance",
            EntityKind::Lesson => "lesson",
            EntityKind::Event => "event",
        }
    }

    /// Position in [`EntityKind::ALL`].
    #[must_use]
    pub const fn index(&self) -> usize {
        match self {
            EntityKind::Student => 0,
            EntityKind::Class => 1,
            EntityKind::Attendance => 2,
            EntityKind::Lesson => 3,
            EntityKind::Event => 4,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown entity kind: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_matches_all_order() {
        for (i, kind) in EntityKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
            assert_eq!(kind.as_str().parse::<EntityKind>().unwrap(), *kind);
        }
        assert!("teacher".parse::<EntityKind>().is_err());
    }
}
