//! CRUD operations for [`Lesson`] content items.

use rusqlite::types::Value as SqlValue;
use rusqlite::{named_params, params, params_from_iter};

use portal_shared::types::ContentType;

use crate::codec::{get_bool, get_enum, get_json, get_opt_ts, get_ts, opt_ts, to_json, ts};
use crate::database::Database;
use crate::error::{duplicate, not_found, Result};
use crate::models::{Lesson, LessonFilter};

const LESSON_COLUMNS: &str = "id, title, description, content_type, year_group, week, subject, \
     category, resource_type, source_file, file_url, original_file_name, file_type, file_size, \
     content, tags, metadata, published, visible, created_by, created_date, updated_by, \
     updated_date, version";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    pub fn insert_lesson(&self, lesson: &Lesson) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO lessons (id, title, description, content_type, year_group, week,
                     subject, category, resource_type, source_file, file_url, original_file_name,
                     file_type, file_size, content, tags, metadata, published, visible,
                     created_by, created_date, updated_by, updated_date, version)
                 VALUES (:id, :title, :description, :content_type, :year_group, :week,
                     :subject, :category, :resource_type, :source_file, :file_url,
                     :original_file_name, :file_type, :file_size, :content, :tags, :metadata,
                     :published, :visible, :created_by, :created_date, :updated_by,
                     :updated_date, :version)",
                named_params! {
                    ":id": lesson.id,
                    ":title": lesson.title,
                    ":description": lesson.description,
                    ":content_type": lesson.content_type.as_str(),
                    ":year_group": lesson.year_group,
                    ":week": lesson.week,
                    ":subject": lesson.subject,
                    ":category": lesson.category,
                    ":resource_type": lesson.resource_type,
                    ":source_file": lesson.source_file,
                    ":file_url": lesson.file_url,
                    ":original_file_name": lesson.original_file_name,
                    ":file_type": lesson.file_type,
                    ":file_size": lesson.file_size,
                    ":content": to_json(&lesson.content)?,
                    ":tags": to_json(&lesson.tags)?,
                    ":metadata": to_json(&lesson.metadata)?,
                    ":published": lesson.published,
                    ":visible": lesson.visible,
                    ":created_by": lesson.created_by,
                    ":created_date": ts(&lesson.created_date),
                    ":updated_by": lesson.updated_by,
                    ":updated_date": opt_ts(&lesson.updated_date),
                    ":version": lesson.version,
                },
            )
            .map_err(duplicate(&lesson.id))?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_lesson(&self, id: &str) -> Result<Lesson> {
        self.conn()
            .query_row(
                &format!("SELECT {LESSON_COLUMNS} FROM lessons WHERE id = ?1"),
                params![id],
                row_to_lesson,
            )
            .map_err(not_found)
    }

    /// List content items matching `filter`, newest first.
    pub fn list_lessons(&self, filter: &LessonFilter) -> Result<Vec<Lesson>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<SqlValue> = Vec::new();

        if let Some(ty) = filter.content_type {
            clauses.push("content_type = ?");
            values.push(SqlValue::Text(ty.as_str().to_string()));
        }
        if let Some(year) = &filter.year_group {
            clauses.push("year_group = ?");
            values.push(SqlValue::Text(year.clone()));
        }
        if let Some(subject) = &filter.subject {
            clauses.push("subject = ?");
            values.push(SqlValue::Text(subject.clone()));
        }
        if let Some(category) = &filter.category {
            clauses.push("category = ?");
            values.push(SqlValue::Text(category.clone()));
        }
        if filter.published_only {
            clauses.push("published = 1");
        }
        if filter.visible_only {
            clauses.push("visible = 1");
        }

        let mut sql = format!("SELECT {LESSON_COLUMNS} FROM lessons");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY created_date DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(" LIMIT ?");
            values.push(SqlValue::Integer(limit as i64));
        }

        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), row_to_lesson)?;

        let mut lessons = Vec::new();
        for row in rows {
            lessons.push(row?);
        }
        Ok(lessons)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Versioned write-back; returns the record with its new version.
    pub fn update_lesson(&self, lesson: &Lesson) -> Result<Lesson> {
        let affected = self.conn().execute(
            "UPDATE lessons SET title = :title, description = :description,
                 content_type = :content_type, year_group = :year_group, week = :week,
                 subject = :subject, category = :category, resource_type = :resource_type,
                 source_file = :source_file, file_url = :file_url,
                 original_file_name = :original_file_name, file_type = :file_type,
                 file_size = :file_size, content = :content, tags = :tags,
                 metadata = :metadata, published = :published, visible = :visible,
                 updated_by = :updated_by, updated_date = :updated_date,
                 version = version + 1
             WHERE id = :id AND version = :version",
            named_params! {
                ":id": lesson.id,
                ":title": lesson.title,
                ":description": lesson.description,
                ":content_type": lesson.content_type.as_str(),
                ":year_group": lesson.year_group,
                ":week": lesson.week,
                ":subject": lesson.subject,
                ":category": lesson.category,
                ":resource_type": lesson.resource_type,
                ":source_file": lesson.source_file,
                ":file_url": lesson.file_url,
                ":original_file_name": lesson.original_file_name,
                ":file_type": lesson.file_type,
                ":file_size": lesson.file_size,
                ":content": to_json(&lesson.content)?,
                ":tags": to_json(&lesson.tags)?,
                ":metadata": to_json(&lesson.metadata)?,
                ":published": lesson.published,
                ":visible": lesson.visible,
                ":updated_by": lesson.updated_by,
                ":updated_date": opt_ts(&lesson.updated_date),
                ":version": lesson.version,
            },
        )?;
        Database::check_versioned(self.conn(), affected, "lessons", "id", &lesson.id)?;
        let mut updated = lesson.clone();
        updated.version += 1;
        Ok(updated)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a lesson by id.  Returns `true` if a row was deleted.
    pub fn delete_lesson(&self, id: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM lessons WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }
}

fn row_to_lesson(row: &rusqlite::Row<'_>) -> rusqlite::Result<Lesson> {
    Ok(Lesson {
        id: row.get("id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        content_type: get_enum(row, "content_type", ContentType::parse)?,
        year_group: row.get("year_group")?,
        week: row.get("week")?,
        subject: row.get("subject")?,
        category: row.get("category")?,
        resource_type: row.get("resource_type")?,
        source_file: row.get("source_file")?,
        file_url: row.get("file_url")?,
        original_file_name: row.get("original_file_name")?,
        file_type: row.get("file_type")?,
        file_size: row.get("file_size")?,
        content: get_json(row, "content")?,
        tags: get_json(row, "tags")?,
        metadata: get_json(row, "metadata")?,
        published: get_bool(row, "published")?,
        visible: get_bool(row, "visible")?,
        created_by: row.get("created_by")?,
        created_date: get_ts(row, "created_date")?,
        updated_by: row.get("updated_by")?,
        updated_date: get_opt_ts(row, "updated_date")?,
        version: row.get("version")?,
    })
}
