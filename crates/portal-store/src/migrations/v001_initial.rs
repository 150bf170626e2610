//! v001 -- Initial schema creation.
//!
//! Creates one table per entity collection: `users`, `tutors`, `lessons`,
//! `invitations`, `progress_records`, `homework`, `homework_assignments`, and
//! `subscriptions`.  Lists and nested objects are stored as JSON text.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    email                   TEXT PRIMARY KEY NOT NULL,
    name                    TEXT,
    phone                   TEXT,
    organization            TEXT,
    roles                   TEXT NOT NULL DEFAULT '[]',   -- JSON array
    is_admin                INTEGER NOT NULL DEFAULT 0,
    status                  TEXT NOT NULL DEFAULT 'pending',
    year_group              TEXT,
    assigned_tutor          TEXT,
    children                TEXT NOT NULL DEFAULT '[]',   -- JSON array of emails
    consent                 TEXT NOT NULL DEFAULT '{}',   -- JSON object
    profile                 TEXT NOT NULL DEFAULT '{}',   -- JSON object
    is_active               INTEGER NOT NULL DEFAULT 1,
    has_subscription        INTEGER NOT NULL DEFAULT 0,
    subscription_status     TEXT,
    stripe_customer_id      TEXT,
    stripe_subscription_id  TEXT,
    cancel_at_period_end    INTEGER NOT NULL DEFAULT 0,
    payment_status          TEXT,
    last_payment_date       TEXT,
    last_payment_failure    TEXT,
    subscription_start_date TEXT,
    subscription_end_date   TEXT,
    subscription_canceled_at TEXT,
    signup_date             TEXT,
    processed_date          TEXT,
    processed_by            TEXT,
    last_login_date         TEXT,
    enrollment_date         TEXT,
    deactivated_date        TEXT,
    deactivated_by          TEXT,
    migrated_date           TEXT,
    migrated_by             TEXT,
    created_date            TEXT NOT NULL,                -- RFC-3339
    updated_date            TEXT,
    version                 INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_users_status ON users(status);
CREATE INDEX IF NOT EXISTS idx_users_assigned_tutor ON users(assigned_tutor);
CREATE INDEX IF NOT EXISTS idx_users_customer ON users(stripe_customer_id);

-- ----------------------------------------------------------------
-- Tutors
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS tutors (
    email        TEXT PRIMARY KEY NOT NULL,
    name         TEXT NOT NULL,
    organization TEXT,
    students     TEXT NOT NULL DEFAULT '[]',   -- JSON array of emails
    permissions  TEXT NOT NULL DEFAULT '[]',   -- JSON array
    preferences  TEXT NOT NULL DEFAULT '{}',   -- JSON object
    is_active    INTEGER NOT NULL DEFAULT 1,
    created_date TEXT NOT NULL,
    updated_date TEXT,
    version      INTEGER NOT NULL DEFAULT 1
);

-- ----------------------------------------------------------------
-- Lessons / content items
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS lessons (
    id                 TEXT PRIMARY KEY NOT NULL,
    title              TEXT NOT NULL,
    description        TEXT,
    content_type       TEXT NOT NULL,          -- year-plan | lesson-material | extra-resource
    year_group         TEXT,
    week               INTEGER,
    subject            TEXT,
    category           TEXT,
    resource_type      TEXT,
    source_file        TEXT,                   -- blob path
    file_url           TEXT,
    original_file_name TEXT,
    file_type          TEXT,
    file_size          INTEGER,
    content            TEXT NOT NULL DEFAULT '{}',
    tags               TEXT NOT NULL DEFAULT '[]',
    metadata           TEXT NOT NULL DEFAULT '{}',
    published          INTEGER NOT NULL DEFAULT 1,
    visible            INTEGER NOT NULL DEFAULT 1,
    created_by         TEXT,
    created_date       TEXT NOT NULL,
    updated_by         TEXT,
    updated_date       TEXT,
    version            INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_lessons_type ON lessons(content_type, year_group);
CREATE INDEX IF NOT EXISTS idx_lessons_created ON lessons(created_date);

-- ----------------------------------------------------------------
-- Invitations
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS invitations (
    id             TEXT PRIMARY KEY NOT NULL,
    token          TEXT NOT NULL UNIQUE,
    tutor_email    TEXT NOT NULL,
    student_email  TEXT NOT NULL,
    parent_email   TEXT NOT NULL,
    student_info   TEXT NOT NULL DEFAULT '{}',
    status         TEXT NOT NULL DEFAULT 'pending',
    created_date   TEXT NOT NULL,
    sent_date      TEXT,
    expiry_date    TEXT NOT NULL,
    accepted_date  TEXT,
    email_sent     INTEGER NOT NULL DEFAULT 0,
    reminders_sent INTEGER NOT NULL DEFAULT 0,
    version        INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_invitations_tutor ON invitations(tutor_email, created_date);

-- ----------------------------------------------------------------
-- Student progress (append-only)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS progress_records (
    id                      TEXT PRIMARY KEY NOT NULL,
    student_id              TEXT NOT NULL,
    kind                    TEXT NOT NULL,
    title                   TEXT,
    score                   REAL,
    status                  TEXT,
    due_date                TEXT,
    submitted_date          TEXT,
    completed_date          TEXT,
    assignment_id           TEXT,
    details                 TEXT NOT NULL DEFAULT '{}',
    data_processing_consent INTEGER NOT NULL DEFAULT 0,
    created_by              TEXT,
    created_date            TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_progress_student ON progress_records(student_id, created_date);

-- ----------------------------------------------------------------
-- Homework catalog and assignments
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS homework (
    id           TEXT PRIMARY KEY NOT NULL,
    title        TEXT NOT NULL,
    subject      TEXT,
    week         INTEGER,
    description  TEXT,
    lesson_id    TEXT,
    created_by   TEXT,
    created_date TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS homework_assignments (
    id             TEXT PRIMARY KEY NOT NULL,
    homework_id    TEXT NOT NULL,
    student_email  TEXT NOT NULL,
    tutor_email    TEXT NOT NULL,
    assigned_date  TEXT NOT NULL,
    due_date       TEXT NOT NULL,
    status         TEXT NOT NULL DEFAULT 'assigned',
    notes          TEXT NOT NULL DEFAULT '',
    submitted_date TEXT,
    completed_date TEXT,
    grade          TEXT,
    feedback       TEXT,
    version        INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_assignments_student ON homework_assignments(student_email, assigned_date);

-- ----------------------------------------------------------------
-- Subscription mirror
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS subscriptions (
    id                   TEXT PRIMARY KEY NOT NULL,   -- payment-processor subscription id
    user_email           TEXT NOT NULL,
    customer_id          TEXT,
    price_id             TEXT,
    status               TEXT,
    cancel_at_period_end INTEGER NOT NULL DEFAULT 0,
    amount               INTEGER,
    currency             TEXT,
    created_date         TEXT NOT NULL,
    canceled_date        TEXT,
    ended_date           TEXT,
    last_event_at        TEXT,
    events               TEXT NOT NULL DEFAULT '[]',
    version              INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_subscriptions_user ON subscriptions(user_email);
"#;

/// Apply the initial schema.
pub fn up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(UP_SQL)
}
