//! Content view analytics.

use rusqlite::params;

use crate::codec::{get_ts, ts};
use crate::database::Database;
use crate::error::Result;
use crate::models::ViewEvent;

impl Database {
    pub fn insert_view_event(&self, event: &ViewEvent) -> Result<i64> {
        self.conn().execute(
            "INSERT INTO view_events (user_id, event_type, lesson_id, lesson_title, category,
                 session_id, view_duration, message, user_agent, client_ip, client_timestamp,
                 created_date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                event.user_id,
                event.event_type,
                event.lesson_id,
                event.lesson_title,
                event.category,
                event.session_id,
                event.view_duration,
                event.message,
                event.user_agent,
                event.client_ip,
                event.client_timestamp,
                ts(&event.created_date),
            ],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    /// A user's view events, newest first.
    pub fn list_view_events_for_user(&self, user_id: &str, limit: usize) -> Result<Vec<ViewEvent>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id, event_type, lesson_id, lesson_title, category, session_id,
                    view_duration, message, user_agent, client_ip, client_timestamp, created_date
             FROM view_events
             WHERE user_id = ?1
             ORDER BY created_date DESC, id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![user_id, limit as i64], |row| {
            Ok(ViewEvent {
                user_id: row.get("user_id")?,
                event_type: row.get("event_type")?,
                lesson_id: row.get("lesson_id")?,
                lesson_title: row.get("lesson_title")?,
                category: row.get("category")?,
                session_id: row.get("session_id")?,
                view_duration: row.get("view_duration")?,
                message: row.get("message")?,
                user_agent: row.get("user_agent")?,
                client_ip: row.get("client_ip")?,
                client_timestamp: row.get("client_timestamp")?,
                created_date: get_ts(row, "created_date")?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}
