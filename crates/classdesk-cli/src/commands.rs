//! Command handlers.

use std::io::{self, BufRead, Write};

use anyhow::{bail, Context, Result};
use chrono::Local;
use serde::Serialize;

use classdesk_core::models::{attendance_rate, AttendanceMark, AttendanceStatus};
use classdesk_core::{ApiClient, AuthService};

use crate::Command;

pub async fn run(command: Command, json: bool, auth: &AuthService, api: &ApiClient) -> Result<()> {
    match command {
        Command::Login => login(auth).await,
        Command::Logout => {
            auth.logout().await;
            println!("Signed out.");
            Ok(())
        }
        Command::Whoami => whoami(json, auth, api).await,
        Command::Classes => {
            require_session(auth)?;
            let mut classes = api.list_classes().await.context("Failed to fetch classes")?;
            if json {
                return print_json(&classes);
            }
            classes.sort_by(|a, b| a.name.cmp(&b.name));
            for class in classes.iter().filter(|c| c.is_active) {
                println!(
                    "{:>6}  {:<32} {:<12} {}",
                    class.id,
                    class.name,
                    class.room.as_deref().unwrap_or("-"),
                    class.display_enrollment()
                );
            }
            Ok(())
        }
        Command::Class { id } => {
            require_session(auth)?;
            let overview = api.class_overview(id).await.context("Failed to fetch class")?;
            if json {
                return print_json(&overview);
            }
            let class = &overview.class;
            println!("{} ({})", class.name, class.display_enrollment());
            if let Some(ref teacher) = class.teacher_name {
                println!("Teacher: {}", teacher);
            }
            println!("\nUpcoming sessions:");
            for session in overview.upcoming_sessions() {
                println!(
                    "{:>6}  {}  {}",
                    session.id,
                    session.starts_at.with_timezone(&Local).format("%a %b %-d %H:%M"),
                    session.topic.as_deref().unwrap_or("")
                );
            }
            println!("\nAssignments:");
            for assignment in &overview.assignments {
                let flag = if assignment.is_overdue() { " (overdue)" } else { "" };
                println!("{:>6}  {}{}", assignment.id, assignment.title, flag);
            }
            Ok(())
        }
        Command::Students { search } => {
            require_session(auth)?;
            let mut students = match search {
                Some(ref query) => api.search_students(query).await,
                None => api.list_students().await,
            }
            .context("Failed to fetch students")?;
            if json {
                return print_json(&students);
            }
            students.sort_by_key(|s| s.sort_name());
            for student in &students {
                let grade = student.grade.map(|g| g.to_string()).unwrap_or_default();
                println!("{:>6}  {:<32} {}", student.id, student.sort_name(), grade);
            }
            Ok(())
        }
        Command::Attendance { session_id, marks } => {
            require_session(auth)?;
            if !marks.is_empty() {
                let marks = marks.iter().map(|m| parse_mark(m)).collect::<Result<Vec<_>>>()?;
                api.mark_attendance(session_id, &marks)
                    .await
                    .context("Failed to save attendance")?;
                println!("Marked {} students.", marks.len());
            }
            let records = api.get_attendance(session_id).await.context("Failed to fetch attendance")?;
            if json {
                return print_json(&records);
            }
            for record in &records {
                println!(
                    "{:>6}  {:<32} {}",
                    record.student_id,
                    record.student_name.as_deref().unwrap_or(""),
                    record.status
                );
            }
            if let Some(rate) = attendance_rate(&records) {
                println!("\nAttendance: {:.0}%", rate);
            }
            Ok(())
        }
        Command::Assignments { class_id } => {
            require_session(auth)?;
            let assignments = api
                .list_assignments(class_id)
                .await
                .context("Failed to fetch assignments")?;
            if json {
                return print_json(&assignments);
            }
            for assignment in &assignments {
                let due = assignment
                    .due_at
                    .map(|d| d.with_timezone(&Local).format("%Y-%m-%d").to_string())
                    .unwrap_or_else(|| "no due date".to_string());
                println!("{:>6}  {:<40} {}", assignment.id, assignment.title, due);
            }
            Ok(())
        }
    }
}

async fn login(auth: &AuthService) -> Result<()> {
    let url = auth.begin_login().await.context("Failed to start login")?;
    println!("Open this URL in your browser and sign in:\n\n  {}\n", url);
    print!("Paste the address you were redirected to: ");
    io::stdout().flush()?;

    let mut redirect = String::new();
    io::stdin().lock().read_line(&mut redirect)?;
    auth.complete_login(redirect.trim()).await.context("Login failed")?;

    let user = auth.store().user().unwrap_or_default();
    println!("Signed in as {}.", user.display_name());
    Ok(())
}

async fn whoami(json: bool, auth: &AuthService, api: &ApiClient) -> Result<()> {
    require_session(auth)?;
    let user = match api.current_user().await {
        Ok(user) => user,
        Err(e) if e.requires_login() => bail!("Session expired. Run `classdesk login`."),
        // Fall back to the identity captured at login
        Err(_) => auth.store().user().unwrap_or_default(),
    };
    if json {
        return print_json(&user);
    }
    println!("{}", user.display_name());
    if let Some(ref email) = user.email {
        println!("{}", email);
    }
    if let Some(ref role) = user.role {
        println!("Role: {}", role);
    }
    Ok(())
}

fn require_session(auth: &AuthService) -> Result<()> {
    if !auth.store().is_authenticated() {
        bail!("Not signed in. Run `classdesk login` first.");
    }
    Ok(())
}

/// Parse "42=present" into an attendance mark
fn parse_mark(raw: &str) -> Result<AttendanceMark> {
    let (id, status) = raw
        .split_once('=')
        .with_context(|| format!("Expected STUDENT_ID=STATUS, got {:?}", raw))?;
    let student_id = id.trim().parse().with_context(|| format!("Invalid student id {:?}", id))?;
    let status = AttendanceStatus::parse(status).with_context(|| format!("Unknown status {:?}", status))?;
    Ok(AttendanceMark {
        student_id,
        status,
        note: None,
    })
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
