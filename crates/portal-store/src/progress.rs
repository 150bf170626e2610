//! Append-only student progress records.

use rusqlite::params;

use crate::codec::{get_bool, get_json, get_opt_ts, get_ts, opt_ts, to_json, ts};
use crate::database::Database;
use crate::error::{duplicate, Result};
use crate::models::ProgressRecord;

const PROGRESS_COLUMNS: &str = "id, student_id, kind, title, score, status, due_date, \
     submitted_date, completed_date, assignment_id, details, data_processing_consent, \
     created_by, created_date";

impl Database {
    pub fn insert_progress(&self, record: &ProgressRecord) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO progress_records (id, student_id, kind, title, score, status,
                     due_date, submitted_date, completed_date, assignment_id, details,
                     data_processing_consent, created_by, created_date)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    record.id,
                    record.student_id,
                    record.kind,
                    record.title,
                    record.score,
                    record.status,
                    opt_ts(&record.due_date),
                    opt_ts(&record.submitted_date),
                    opt_ts(&record.completed_date),
                    record.assignment_id,
                    to_json(&record.details)?,
                    record.data_processing_consent,
                    record.created_by,
                    ts(&record.created_date),
                ],
            )
            .map_err(duplicate(&record.id))?;
        Ok(())
    }

    /// All records for a student, newest first.
    pub fn list_progress(&self, student_id: &str) -> Result<Vec<ProgressRecord>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {PROGRESS_COLUMNS} FROM progress_records
             WHERE student_id = ?1
             ORDER BY created_date DESC"
        ))?;
        let rows = stmt.query_map(params![student_id], row_to_progress)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Homework-type records for a student, soonest due first.
    pub fn list_homework_progress(&self, student_id: &str) -> Result<Vec<ProgressRecord>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {PROGRESS_COLUMNS} FROM progress_records
             WHERE student_id = ?1 AND kind = 'homework'
             ORDER BY due_date ASC"
        ))?;
        let rows = stmt.query_map(params![student_id], row_to_progress)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}

fn row_to_progress(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProgressRecord> {
    Ok(ProgressRecord {
        id: row.get("id")?,
        student_id: row.get("student_id")?,
        kind: row.get("kind")?,
        title: row.get("title")?,
        score: row.get("score")?,
        status: row.get("status")?,
        due_date: get_opt_ts(row, "due_date")?,
        submitted_date: get_opt_ts(row, "submitted_date")?,
        completed_date: get_opt_ts(row, "completed_date")?,
        assignment_id: row.get("assignment_id")?,
        details: get_json(row, "details")?,
        data_processing_consent: get_bool(row, "data_processing_consent")?,
        created_by: row.get("created_by")?,
        created_date: get_ts(row, "created_date")?,
    })
}
