use serde::{Deserialize, Serialize};

use super::{Assignment, ClassSession};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Class {
    pub id: i64,
    pub name: String,
    pub subject: Option<String>,
    #[serde(rename = "teacherId")]
    pub teacher_id: Option<i64>,
    #[serde(rename = "teacherName")]
    pub teacher_name: Option<String>,
    pub room: Option<String>,
    pub capacity: Option<i32>,
    #[serde(rename = "studentCount", default)]
    pub student_count: i32,
    #[serde(rename = "startDate")]
    pub start_date: Option<String>,
    #[serde(rename = "endDate")]
    pub end_date: Option<String>,
    #[serde(rename = "isActive", default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl Class {
    /// Seats left before the class reaches capacity. `None` if uncapped.
    pub fn seats_remaining(&self) -> Option<i32> {
        self.capacity.map(|cap| (cap - self.student_count).max(0))
    }

    pub fn is_full(&self) -> bool {
        self.seats_remaining() == Some(0)
    }

    pub fn display_enrollment(&self) -> String {
        match self.capacity {
            Some(cap) => format!("{}/{} students", self.student_count, cap),
            None => format!("{} students", self.student_count),
        }
    }
}

/// Body for `POST /Classes` and `PUT /Classes/{id}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct NewClass {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(rename = "teacherId", skip_serializing_if = "Option::is_none")]
    pub teacher_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity: Option<i32>,
    #[serde(rename = "startDate", skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(rename = "endDate", skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
}

/// A class together with its schedule and coursework, as shown on the
/// class detail screen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassOverview {
    pub class: Class,
    pub sessions: Vec<ClassSession>,
    pub assignments: Vec<Assignment>,
}

impl ClassOverview {
    pub fn upcoming_sessions(&self) -> impl Iterator<Item = &ClassSession> {
        self.sessions.iter().filter(|s| s.is_upcoming())
    }
}
