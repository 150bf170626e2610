//! Homework catalog items and per-student assignments.

use rusqlite::{params, OptionalExtension};

use portal_shared::types::AssignmentStatus;

use crate::codec::{get_enum, get_opt_ts, get_ts, opt_ts, ts};
use crate::database::Database;
use crate::error::{duplicate, not_found, Result};
use crate::models::{Homework, HomeworkAssignment};

const HOMEWORK_COLUMNS: &str =
    "id, title, subject, week, description, lesson_id, created_by, created_date";

const ASSIGNMENT_COLUMNS: &str = "id, homework_id, student_email, tutor_email, assigned_date, \
     due_date, status, notes, submitted_date, completed_date, grade, feedback, version";

impl Database {
    // ------------------------------------------------------------------
    // Catalog
    // ------------------------------------------------------------------

    pub fn insert_homework(&self, hw: &Homework) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO homework (id, title, subject, week, description, lesson_id,
                                       created_by, created_date)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    hw.id,
                    hw.title,
                    hw.subject,
                    hw.week,
                    hw.description,
                    hw.lesson_id,
                    hw.created_by,
                    ts(&hw.created_date),
                ],
            )
            .map_err(duplicate(&hw.id))?;
        Ok(())
    }

    pub fn find_homework(&self, id: &str) -> Result<Option<Homework>> {
        let hw = self
            .conn()
            .query_row(
                &format!("SELECT {HOMEWORK_COLUMNS} FROM homework WHERE id = ?1"),
                params![id],
                row_to_homework,
            )
            .optional()?;
        Ok(hw)
    }

    /// Whole catalog ordered by subject, week, then title.
    pub fn list_homework(&self) -> Result<Vec<Homework>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {HOMEWORK_COLUMNS} FROM homework ORDER BY subject, week, title"
        ))?;
        let rows = stmt.query_map([], row_to_homework)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Assignments
    // ------------------------------------------------------------------

    pub fn insert_assignment(&self, a: &HomeworkAssignment) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO homework_assignments (id, homework_id, student_email, tutor_email,
                     assigned_date, due_date, status, notes, submitted_date, completed_date,
                     grade, feedback, version)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    a.id,
                    a.homework_id,
                    a.student_email,
                    a.tutor_email,
                    ts(&a.assigned_date),
                    ts(&a.due_date),
                    a.status.as_str(),
                    a.notes,
                    opt_ts(&a.submitted_date),
                    opt_ts(&a.completed_date),
                    a.grade,
                    a.feedback,
                    a.version,
                ],
            )
            .map_err(duplicate(&a.id))?;
        Ok(())
    }

    pub fn get_assignment(&self, id: &str) -> Result<HomeworkAssignment> {
        self.conn()
            .query_row(
                &format!("SELECT {ASSIGNMENT_COLUMNS} FROM homework_assignments WHERE id = ?1"),
                params![id],
                row_to_assignment,
            )
            .map_err(not_found)
    }

    /// A student's assignments, newest first, optionally only those set by
    /// one tutor.
    pub fn list_assignments_for_student(
        &self,
        student_email: &str,
        tutor_email: Option<&str>,
    ) -> Result<Vec<HomeworkAssignment>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM homework_assignments
             WHERE student_email = ?1 AND (?2 IS NULL OR tutor_email = ?2)
             ORDER BY assigned_date DESC, id ASC"
        ))?;
        let rows = stmt.query_map(params![student_email, tutor_email], row_to_assignment)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Versioned write-back; returns the record with its new version.
    pub fn update_assignment(&self, a: &HomeworkAssignment) -> Result<HomeworkAssignment> {
        let affected = self.conn().execute(
            "UPDATE homework_assignments SET due_date = ?2, status = ?3, notes = ?4,
                    submitted_date = ?5, completed_date = ?6, grade = ?7, feedback = ?8,
                    version = version + 1
             WHERE id = ?1 AND version = ?9",
            params![
                a.id,
                ts(&a.due_date),
                a.status.as_str(),
                a.notes,
                opt_ts(&a.submitted_date),
                opt_ts(&a.completed_date),
                a.grade,
                a.feedback,
                a.version,
            ],
        )?;
        Database::check_versioned(self.conn(), affected, "homework_assignments", "id", &a.id)?;
        let mut updated = a.clone();
        updated.version += 1;
        Ok(updated)
    }

    /// Delete an assignment.  Returns `true` if a row was deleted.
    pub fn delete_assignment(&self, id: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM homework_assignments WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }
}

fn row_to_homework(row: &rusqlite::Row<'_>) -> rusqlite::Result<Homework> {
    Ok(Homework {
        id: row.get("id")?,
        title: row.get("title")?,
        subject: row.get("subject")?,
        week: row.get("week")?,
        description: row.get("description")?,
        lesson_id: row.get("lesson_id")?,
        created_by: row.get("created_by")?,
        created_date: get_ts(row, "created_date")?,
    })
}

fn row_to_assignment(row: &rusqlite::Row<'_>) -> rusqlite::Result<HomeworkAssignment> {
    Ok(HomeworkAssignment {
        id: row.get("id")?,
        homework_id: row.get("homework_id")?,
        student_email: row.get("student_email")?,
        tutor_email: row.get("tutor_email")?,
        assigned_date: get_ts(row, "assigned_date")?,
        due_date: get_ts(row, "due_date")?,
        status: get_enum(row, "status", AssignmentStatus::parse)?,
        notes: row.get("notes")?,
        submitted_date: get_opt_ts(row, "submitted_date")?,
        completed_date: get_opt_ts(row, "completed_date")?,
        grade: row.get("grade")?,
        feedback: row.get("feedback")?,
        version: row.get("version")?,
    })
}
