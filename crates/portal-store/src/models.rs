//! Domain model structs persisted in the portal database.
//!
//! Every struct derives `Serialize` and `Deserialize` with camelCase field
//! names so it can be handed straight to the HTTP layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use portal_shared::metrics::ProgressEntry;
use portal_shared::types::{
    AssignmentStatus, Consent, ContentType, InvitationStatus, Role, UserStatus,
};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// Contact details kept alongside a user.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_contact_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emergency_contact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// Local copy of the payment processor's view of a user's subscription.
/// The processor stays authoritative; this is a cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionMirror {
    pub has_subscription: bool,
    pub subscription_status: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub cancel_at_period_end: bool,
    pub payment_status: Option<String>,
    pub last_payment_date: Option<DateTime<Utc>>,
    pub last_payment_failure: Option<DateTime<Utc>>,
    pub subscription_start_date: Option<DateTime<Utc>>,
    pub subscription_end_date: Option<DateTime<Utc>>,
    pub subscription_canceled_at: Option<DateTime<Utc>>,
}

/// Partial update of [`SubscriptionMirror`] columns.  `None` leaves the
/// column untouched.
#[derive(Debug, Clone, Default)]
pub struct MirrorPatch {
    pub has_subscription: Option<bool>,
    pub subscription_status: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub cancel_at_period_end: Option<bool>,
    pub payment_status: Option<String>,
    pub last_payment_date: Option<DateTime<Utc>>,
    pub last_payment_failure: Option<DateTime<Utc>>,
    pub subscription_start_date: Option<DateTime<Utc>>,
    pub subscription_end_date: Option<DateTime<Utc>>,
    pub subscription_canceled_at: Option<DateTime<Utc>>,
}

/// A portal account.  The primary key is the email address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub email: String,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub organization: Option<String>,
    pub roles: Vec<Role>,
    /// Legacy admin flag predating `roles`.
    pub is_admin: bool,
    pub status: UserStatus,
    pub year_group: Option<String>,
    pub assigned_tutor: Option<String>,
    pub children: Vec<String>,
    #[serde(rename = "gdprConsent")]
    pub consent: Consent,
    pub profile: Profile,
    pub is_active: bool,
    #[serde(flatten)]
    pub subscription: SubscriptionMirror,
    pub signup_date: Option<DateTime<Utc>>,
    pub processed_date: Option<DateTime<Utc>>,
    pub processed_by: Option<String>,
    pub last_login_date: Option<DateTime<Utc>>,
    pub enrollment_date: Option<DateTime<Utc>>,
    pub deactivated_date: Option<DateTime<Utc>>,
    pub deactivated_by: Option<String>,
    pub migrated_date: Option<DateTime<Utc>>,
    pub migrated_by: Option<String>,
    pub created_date: DateTime<Utc>,
    pub updated_date: Option<DateTime<Utc>>,
    pub version: i64,
}

impl User {
    /// A blank account in `pending` state.
    pub fn new(email: &str, now: DateTime<Utc>) -> Self {
        Self {
            email: email.to_string(),
            name: None,
            phone: None,
            organization: None,
            roles: Vec::new(),
            is_admin: false,
            status: UserStatus::Pending,
            year_group: None,
            assigned_tutor: None,
            children: Vec::new(),
            consent: Consent::default(),
            profile: Profile::default(),
            is_active: true,
            subscription: SubscriptionMirror::default(),
            signup_date: None,
            processed_date: None,
            processed_by: None,
            last_login_date: None,
            enrollment_date: None,
            deactivated_date: None,
            deactivated_by: None,
            migrated_date: None,
            migrated_by: None,
            created_date: now,
            updated_date: None,
            version: 1,
        }
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// Add `role` unless already present.
    pub fn grant_role(&mut self, role: Role) {
        if !self.has_role(role) {
            self.roles.push(role);
        }
    }

    /// Stored admin indicator: the `admin` role or the legacy flag.
    pub fn is_admin_account(&self) -> bool {
        self.is_admin || self.has_role(Role::Admin)
    }
}

// ---------------------------------------------------------------------------
// Tutor
// ---------------------------------------------------------------------------

pub const DEFAULT_TUTOR_PERMISSIONS: [&str; 5] = [
    "manage_students",
    "assign_homework",
    "grade_assignments",
    "view_progress",
    "send_invitations",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tutor {
    pub email: String,
    pub name: String,
    pub organization: Option<String>,
    pub students: Vec<String>,
    pub permissions: Vec<String>,
    pub preferences: Value,
    pub is_active: bool,
    pub created_date: DateTime<Utc>,
    pub updated_date: Option<DateTime<Utc>>,
    pub version: i64,
}

impl Tutor {
    /// Record created lazily the first time a student is attached.
    pub fn new(email: &str, organization: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            email: email.to_string(),
            name: "Tutor".to_string(),
            organization,
            students: Vec::new(),
            permissions: DEFAULT_TUTOR_PERMISSIONS.iter().map(|p| p.to_string()).collect(),
            preferences: serde_json::json!({
                "emailNotifications": true,
                "dashboardView": "grid",
            }),
            is_active: true,
            created_date: now,
            updated_date: None,
            version: 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Lesson
// ---------------------------------------------------------------------------

/// A content item: year-plan week, lesson material, or extra resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub content_type: ContentType,
    pub year_group: Option<String>,
    pub week: Option<i64>,
    pub subject: Option<String>,
    pub category: Option<String>,
    pub resource_type: Option<String>,
    /// Blob path of the backing file, if any.
    pub source_file: Option<String>,
    pub file_url: Option<String>,
    pub original_file_name: Option<String>,
    pub file_type: Option<String>,
    pub file_size: Option<i64>,
    pub content: Value,
    pub tags: Vec<String>,
    pub metadata: Value,
    pub published: bool,
    pub visible: bool,
    pub created_by: Option<String>,
    pub created_date: DateTime<Utc>,
    pub updated_by: Option<String>,
    pub updated_date: Option<DateTime<Utc>>,
    pub version: i64,
}

/// Filters for [`Database::list_lessons`](crate::Database::list_lessons).
#[derive(Debug, Clone, Default)]
pub struct LessonFilter {
    pub content_type: Option<ContentType>,
    pub year_group: Option<String>,
    pub subject: Option<String>,
    pub category: Option<String>,
    pub published_only: bool,
    pub visible_only: bool,
    pub limit: Option<usize>,
}

// ---------------------------------------------------------------------------
// Invitation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StudentInfo {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub year_group: Option<String>,
    pub start_date: Option<String>,
}

/// Parent invitation.  `token` is the unguessable secondary key and must not
/// leave the server except in the invitation link.
#[derive(Debug, Clone, PartialEq)]
pub struct Invitation {
    pub id: String,
    pub token: String,
    pub tutor_email: String,
    pub student_email: String,
    pub parent_email: String,
    pub student_info: StudentInfo,
    pub status: InvitationStatus,
    pub created_date: DateTime<Utc>,
    pub sent_date: Option<DateTime<Utc>>,
    pub expiry_date: DateTime<Utc>,
    pub accepted_date: Option<DateTime<Utc>>,
    pub email_sent: bool,
    pub reminders_sent: i64,
    pub version: i64,
}

/// Details supplied by the parent when accepting an invitation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentDetails {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub emergency_contact: Option<String>,
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub id: String,
    pub student_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: Option<String>,
    pub score: Option<f64>,
    pub status: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub submitted_date: Option<DateTime<Utc>>,
    pub completed_date: Option<DateTime<Utc>>,
    pub assignment_id: Option<String>,
    pub details: Value,
    pub data_processing_consent: bool,
    pub created_by: Option<String>,
    pub created_date: DateTime<Utc>,
}

impl ProgressEntry for ProgressRecord {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    fn score(&self) -> Option<f64> {
        self.score
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_date
    }
}

// ---------------------------------------------------------------------------
// Homework
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Homework {
    pub id: String,
    pub title: String,
    pub subject: Option<String>,
    pub week: Option<i64>,
    pub description: Option<String>,
    pub lesson_id: Option<String>,
    pub created_by: Option<String>,
    pub created_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HomeworkAssignment {
    pub id: String,
    pub homework_id: String,
    pub student_email: String,
    pub tutor_email: String,
    pub assigned_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub status: AssignmentStatus,
    pub notes: String,
    pub submitted_date: Option<DateTime<Utc>>,
    pub completed_date: Option<DateTime<Utc>>,
    pub grade: Option<String>,
    pub feedback: Option<String>,
    pub version: i64,
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// One entry in a subscription's audit log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionEvent {
    /// Payment-processor event id, used to drop redeliveries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRecord {
    pub id: String,
    pub user_email: String,
    pub customer_id: Option<String>,
    pub price_id: Option<String>,
    pub status: Option<String>,
    pub cancel_at_period_end: bool,
    pub amount: Option<i64>,
    pub currency: Option<String>,
    pub created_date: DateTime<Utc>,
    pub canceled_date: Option<DateTime<Utc>>,
    pub ended_date: Option<DateTime<Utc>>,
    pub last_event_at: Option<DateTime<Utc>>,
    pub events: Vec<SubscriptionEvent>,
    pub version: i64,
}

/// Outcome of [`Database::record_subscription_event`](crate::Database::record_subscription_event).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Event appended and it is the newest seen for this subscription.
    Applied,
    /// Event appended to the log but older than one already applied.
    Stale,
    /// Event id already present; nothing written.
    Duplicate,
}

// ---------------------------------------------------------------------------
// Files and analytics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    pub path: String,
    pub container: String,
    pub original_name: String,
    pub content_type: Option<String>,
    pub size: i64,
    pub blake3_hash: String,
    pub uploaded_by: Option<String>,
    pub created_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ViewEvent {
    pub user_id: String,
    pub event_type: String,
    pub lesson_id: Option<String>,
    pub lesson_title: Option<String>,
    pub category: Option<String>,
    pub session_id: Option<String>,
    pub view_duration: Option<f64>,
    pub message: Option<String>,
    pub user_agent: Option<String>,
    pub client_ip: Option<String>,
    pub client_timestamp: String,
    pub created_date: DateTime<Utc>,
}
