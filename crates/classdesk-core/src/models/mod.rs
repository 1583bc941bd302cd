//! Data models for classdesk entities.
//!
//! This module contains the data structures exchanged with the
//! administration API:
//!
//! - `Class`, `NewClass`: taught classes and their form payload
//! - `Teacher`, `Student`, `NewStudent`: people in the directory
//! - `ClassSession`, `AttendanceRecord`, `AttendanceMark`: schedules and attendance
//! - `Assignment`, `NewAssignment`: coursework attached to a class
//! - `UserProfile`: the identity snapshot kept in the session

pub mod assignment;
pub mod class;
pub mod person;
pub mod schedule;
pub mod user;

pub use assignment::{Assignment, NewAssignment};
pub use class::{Class, ClassOverview, NewClass};
pub use person::{NewStudent, Student, Teacher};
pub use schedule::{attendance_rate, AttendanceMark, AttendanceRecord, AttendanceStatus, ClassSession};
pub use user::UserProfile;
