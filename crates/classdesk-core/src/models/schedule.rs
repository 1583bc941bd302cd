use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
    #[serde(other)]
    Unmarked,
}

impl std::fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttendanceStatus::Present => write!(f, "Present"),
            AttendanceStatus::Absent => write!(f, "Absent"),
            AttendanceStatus::Late => write!(f, "Late"),
            AttendanceStatus::Excused => write!(f, "Excused"),
            AttendanceStatus::Unmarked => write!(f, "Unmarked"),
        }
    }
}

impl AttendanceStatus {
    /// Parse user input such as "p", "late" or "EXCUSED"
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "p" | "present" => Some(AttendanceStatus::Present),
            "a" | "absent" => Some(AttendanceStatus::Absent),
            "l" | "late" => Some(AttendanceStatus::Late),
            "e" | "excused" => Some(AttendanceStatus::Excused),
            _ => None,
        }
    }

    /// Late arrivals still count toward attendance totals
    pub fn counts_as_attended(&self) -> bool {
        matches!(self, AttendanceStatus::Present | AttendanceStatus::Late)
    }
}

/// A scheduled meeting of a class.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct ClassSession {
    pub id: i64,
    #[serde(rename = "classId")]
    pub class_id: i64,
    #[serde(rename = "startsAt")]
    pub starts_at: DateTime<Utc>,
    #[serde(rename = "endsAt")]
    pub ends_at: Option<DateTime<Utc>>,
    pub topic: Option<String>,
    pub room: Option<String>,
}

impl ClassSession {
    pub fn is_upcoming(&self) -> bool {
        self.starts_at > Utc::now()
    }

    pub fn duration_minutes(&self) -> Option<i64> {
        self.ends_at.map(|end| (end - self.starts_at).num_minutes())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct AttendanceRecord {
    #[serde(rename = "studentId")]
    pub student_id: i64,
    #[serde(rename = "studentName")]
    pub student_name: Option<String>,
    #[serde(default = "unmarked")]
    pub status: AttendanceStatus,
    pub note: Option<String>,
}

fn unmarked() -> AttendanceStatus {
    AttendanceStatus::Unmarked
}

/// One entry of the `PUT /Sessions/{id}/Attendance` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct AttendanceMark {
    #[serde(rename = "studentId")]
    pub student_id: i64,
    pub status: AttendanceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Share of marked students who attended, as a percentage
pub fn attendance_rate(records: &[AttendanceRecord]) -> Option<f64> {
    let marked: Vec<_> = records
        .iter()
        .filter(|r| r.status != AttendanceStatus::Unmarked)
        .collect();
    if marked.is_empty() {
        return None;
    }
    let attended = marked.iter().filter(|r| r.status.counts_as_attended()).count();
    Some(attended as f64 * 100.0 / marked.len() as f64)
}
