//! CRUD operations for [`User`] records.

use chrono::{DateTime, Utc};
use rusqlite::{named_params, params, Connection};

use portal_shared::types::UserStatus;

use crate::codec::{get_bool, get_enum, get_json, get_opt_ts, get_ts, opt_ts, to_json, ts};
use crate::database::Database;
use crate::error::{duplicate, not_found, Result};
use crate::models::{MirrorPatch, SubscriptionMirror, User};

pub(crate) const USER_COLUMNS: &str = "email, name, phone, organization, roles, is_admin, status, \
     year_group, assigned_tutor, children, consent, profile, is_active, \
     has_subscription, subscription_status, stripe_customer_id, stripe_subscription_id, \
     cancel_at_period_end, payment_status, last_payment_date, last_payment_failure, \
     subscription_start_date, subscription_end_date, subscription_canceled_at, \
     signup_date, processed_date, processed_by, last_login_date, enrollment_date, \
     deactivated_date, deactivated_by, migrated_date, migrated_by, \
     created_date, updated_date, version";

pub(crate) const INSERT_USER: &str = "INSERT INTO users (
        email, name, phone, organization, roles, is_admin, status,
        year_group, assigned_tutor, children, consent, profile, is_active,
        has_subscription, subscription_status, stripe_customer_id, stripe_subscription_id,
        cancel_at_period_end, payment_status, last_payment_date, last_payment_failure,
        subscription_start_date, subscription_end_date, subscription_canceled_at,
        signup_date, processed_date, processed_by, last_login_date, enrollment_date,
        deactivated_date, deactivated_by, migrated_date, migrated_by,
        created_date, updated_date, version)
     VALUES (
        :email, :name, :phone, :organization, :roles, :is_admin, :status,
        :year_group, :assigned_tutor, :children, :consent, :profile, :is_active,
        :has_subscription, :subscription_status, :stripe_customer_id, :stripe_subscription_id,
        :cancel_at_period_end, :payment_status, :last_payment_date, :last_payment_failure,
        :subscription_start_date, :subscription_end_date, :subscription_canceled_at,
        :signup_date, :processed_date, :processed_by, :last_login_date, :enrollment_date,
        :deactivated_date, :deactivated_by, :migrated_date, :migrated_by,
        :created_date, :updated_date, :version)";

pub(crate) const UPDATE_USER: &str = "UPDATE users SET
        name = :name, phone = :phone, organization = :organization, roles = :roles,
        is_admin = :is_admin, status = :status, year_group = :year_group,
        assigned_tutor = :assigned_tutor, children = :children, consent = :consent,
        profile = :profile, is_active = :is_active,
        has_subscription = :has_subscription, subscription_status = :subscription_status,
        stripe_customer_id = :stripe_customer_id,
        stripe_subscription_id = :stripe_subscription_id,
        cancel_at_period_end = :cancel_at_period_end, payment_status = :payment_status,
        last_payment_date = :last_payment_date, last_payment_failure = :last_payment_failure,
        subscription_start_date = :subscription_start_date,
        subscription_end_date = :subscription_end_date,
        subscription_canceled_at = :subscription_canceled_at,
        signup_date = :signup_date, processed_date = :processed_date,
        processed_by = :processed_by, last_login_date = :last_login_date,
        enrollment_date = :enrollment_date, deactivated_date = :deactivated_date,
        deactivated_by = :deactivated_by, migrated_date = :migrated_date,
        migrated_by = :migrated_by, created_date = :created_date,
        updated_date = :updated_date, version = :version + 1
     WHERE email = :email AND version = :version";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new user.  Fails with `Duplicate` if the email is taken.
    pub fn insert_user(&self, user: &User) -> Result<()> {
        write_user(self.conn(), INSERT_USER, user).map_err(|e| match e {
            crate::StoreError::Sqlite(inner) => duplicate(&user.email)(inner),
            other => other,
        })?;
        Ok(())
    }

    /// Create a pending record for `email` unless one exists, then return
    /// the stored record.  Safe to call repeatedly.
    pub fn ensure_pending_user(
        &self,
        email: &str,
        name: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(User, bool)> {
        let mut user = User::new(email, now);
        user.name = name.map(str::to_string);
        user.signup_date = Some(now);

        let created = self.conn().execute(
            "INSERT OR IGNORE INTO users (email, name, status, signup_date, created_date, version)
             VALUES (?1, ?2, ?3, ?4, ?5, 1)",
            params![
                user.email,
                user.name,
                UserStatus::Pending.as_str(),
                opt_ts(&user.signup_date),
                ts(&user.created_date),
            ],
        )? > 0;

        if created {
            tracing::info!(email, "created pending user");
        }
        Ok((self.get_user(email)?, created))
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_user(&self, email: &str) -> Result<User> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                params![email],
                row_to_user,
            )
            .map_err(not_found)
    }

    /// Like [`get_user`](Self::get_user) but absent records are `Ok(None)`.
    pub fn find_user(&self, email: &str) -> Result<Option<User>> {
        match self.get_user(email) {
            Ok(user) => Ok(Some(user)),
            Err(crate::StoreError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn find_user_by_customer_id(&self, customer_id: &str) -> Result<Option<User>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE stripe_customer_id = ?1 LIMIT 1"
        ))?;
        let mut rows = stmt.query_map(params![customer_id], row_to_user)?;
        Ok(rows.next().transpose()?)
    }

    /// List users, optionally restricted to one approval status, newest first.
    pub fn list_users(&self, status: Option<UserStatus>) -> Result<Vec<User>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users
             WHERE (?1 IS NULL OR status = ?1)
             ORDER BY created_date DESC"
        ))?;
        let rows = stmt.query_map(params![status.map(|s| s.as_str())], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    /// Students whose `assigned_tutor` is `tutor_email`.
    pub fn list_users_assigned_to(&self, tutor_email: &str) -> Result<Vec<User>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE assigned_tutor = ?1 ORDER BY email ASC"
        ))?;
        let rows = stmt.query_map(params![tutor_email], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Write back a modified user.  `user.version` must be the version that
    /// was read; returns the record with its new version.
    pub fn update_user(&self, user: &User) -> Result<User> {
        let affected = write_user(self.conn(), UPDATE_USER, user)?;
        Database::check_versioned(self.conn(), affected, "users", "email", &user.email)?;
        let mut updated = user.clone();
        updated.version += 1;
        Ok(updated)
    }

    /// Patch subscription mirror columns in one statement, without a
    /// read-modify-write.  Returns `false` if the user does not exist.
    pub fn patch_subscription_mirror(
        &self,
        email: &str,
        patch: &MirrorPatch,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE users SET
                has_subscription = COALESCE(:has_subscription, has_subscription),
                subscription_status = COALESCE(:subscription_status, subscription_status),
                stripe_customer_id = COALESCE(:stripe_customer_id, stripe_customer_id),
                stripe_subscription_id = COALESCE(:stripe_subscription_id, stripe_subscription_id),
                cancel_at_period_end = COALESCE(:cancel_at_period_end, cancel_at_period_end),
                payment_status = COALESCE(:payment_status, payment_status),
                last_payment_date = COALESCE(:last_payment_date, last_payment_date),
                last_payment_failure = COALESCE(:last_payment_failure, last_payment_failure),
                subscription_start_date = COALESCE(:subscription_start_date, subscription_start_date),
                subscription_end_date = COALESCE(:subscription_end_date, subscription_end_date),
                subscription_canceled_at = COALESCE(:subscription_canceled_at, subscription_canceled_at),
                updated_date = :now,
                version = version + 1
             WHERE email = :email",
            named_params! {
                ":has_subscription": patch.has_subscription,
                ":subscription_status": patch.subscription_status,
                ":stripe_customer_id": patch.stripe_customer_id,
                ":stripe_subscription_id": patch.stripe_subscription_id,
                ":cancel_at_period_end": patch.cancel_at_period_end,
                ":payment_status": patch.payment_status,
                ":last_payment_date": opt_ts(&patch.last_payment_date),
                ":last_payment_failure": opt_ts(&patch.last_payment_failure),
                ":subscription_start_date": opt_ts(&patch.subscription_start_date),
                ":subscription_end_date": opt_ts(&patch.subscription_end_date),
                ":subscription_canceled_at": opt_ts(&patch.subscription_canceled_at),
                ":now": ts(&now),
                ":email": email,
            },
        )?;
        Ok(affected > 0)
    }

    /// Stamp the last login time.  Returns `false` if the user does not exist.
    pub fn touch_last_login(&self, email: &str, now: DateTime<Utc>) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE users SET last_login_date = ?2 WHERE email = ?1",
            params![email, ts(&now)],
        )?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Hard delete.  Returns `true` if a row was deleted.
    pub fn delete_user(&self, email: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM users WHERE email = ?1", params![email])?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn write_user(conn: &Connection, sql: &str, user: &User) -> Result<usize> {
    let sub = &user.subscription;
    let affected = conn.execute(
        sql,
        named_params! {
            ":email": user.email,
            ":name": user.name,
            ":phone": user.phone,
            ":organization": user.organization,
            ":roles": to_json(&user.roles)?,
            ":is_admin": user.is_admin,
            ":status": user.status.as_str(),
            ":year_group": user.year_group,
            ":assigned_tutor": user.assigned_tutor,
            ":children": to_json(&user.children)?,
            ":consent": to_json(&user.consent)?,
            ":profile": to_json(&user.profile)?,
            ":is_active": user.is_active,
            ":has_subscription": sub.has_subscription,
            ":subscription_status": sub.subscription_status,
            ":stripe_customer_id": sub.stripe_customer_id,
            ":stripe_subscription_id": sub.stripe_subscription_id,
            ":cancel_at_period_end": sub.cancel_at_period_end,
            ":payment_status": sub.payment_status,
            ":last_payment_date": opt_ts(&sub.last_payment_date),
            ":last_payment_failure": opt_ts(&sub.last_payment_failure),
            ":subscription_start_date": opt_ts(&sub.subscription_start_date),
            ":subscription_end_date": opt_ts(&sub.subscription_end_date),
            ":subscription_canceled_at": opt_ts(&sub.subscription_canceled_at),
            ":signup_date": opt_ts(&user.signup_date),
            ":processed_date": opt_ts(&user.processed_date),
            ":processed_by": user.processed_by,
            ":last_login_date": opt_ts(&user.last_login_date),
            ":enrollment_date": opt_ts(&user.enrollment_date),
            ":deactivated_date": opt_ts(&user.deactivated_date),
            ":deactivated_by": user.deactivated_by,
            ":migrated_date": opt_ts(&user.migrated_date),
            ":migrated_by": user.migrated_by,
            ":created_date": ts(&user.created_date),
            ":updated_date": opt_ts(&user.updated_date),
            ":version": user.version,
        },
    )?;
    Ok(affected)
}

/// Map a `rusqlite::Row` to a [`User`].
pub(crate) fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        email: row.get("email")?,
        name: row.get("name")?,
        phone: row.get("phone")?,
        organization: row.get("organization")?,
        roles: get_json(row, "roles")?,
        is_admin: get_bool(row, "is_admin")?,
        status: get_enum(row, "status", UserStatus::parse)?,
        year_group: row.get("year_group")?,
        assigned_tutor: row.get("assigned_tutor")?,
        children: get_json(row, "children")?,
        consent: get_json(row, "consent")?,
        profile: get_json(row, "profile")?,
        is_active: get_bool(row, "is_active")?,
        subscription: SubscriptionMirror {
            has_subscription: get_bool(row, "has_subscription")?,
            subscription_status: row.get("subscription_status")?,
            stripe_customer_id: row.get("stripe_customer_id")?,
            stripe_subscription_id: row.get("stripe_subscription_id")?,
            cancel_at_period_end: get_bool(row, "cancel_at_period_end")?,
            payment_status: row.get("payment_status")?,
            last_payment_date: get_opt_ts(row, "last_payment_date")?,
            last_payment_failure: get_opt_ts(row, "last_payment_failure")?,
            subscription_start_date: get_opt_ts(row, "subscription_start_date")?,
            subscription_end_date: get_opt_ts(row, "subscription_end_date")?,
            subscription_canceled_at: get_opt_ts(row, "subscription_canceled_at")?,
        },
        signup_date: get_opt_ts(row, "signup_date")?,
        processed_date: get_opt_ts(row, "processed_date")?,
        processed_by: row.get("processed_by")?,
        last_login_date: get_opt_ts(row, "last_login_date")?,
        enrollment_date: get_opt_ts(row, "enrollment_date")?,
        deactivated_date: get_opt_ts(row, "deactivated_date")?,
        deactivated_by: row.get("deactivated_by")?,
        migrated_date: get_opt_ts(row, "migrated_date")?,
        migrated_by: row.get("migrated_by")?,
        created_date: get_ts(row, "created_date")?,
        updated_date: get_opt_ts(row, "updated_date")?,
        version: row.get("version")?,
    })
}
