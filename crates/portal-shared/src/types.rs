use serde::{Deserialize, Serialize};

/// Role a user account may hold.  A user can hold several at once (a tutor
/// who is also a parent, for instance).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Parent,
    Tutor,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Parent => "parent",
            Role::Tutor => "tutor",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "student" => Some(Role::Student),
            "parent" => Some(Role::Parent),
            "tutor" | "teacher" => Some(Role::Tutor),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// Approval state of a user account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Pending => "pending",
            UserStatus::Approved => "approved",
            UserStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(UserStatus::Pending),
            "approved" => Some(UserStatus::Approved),
            "rejected" => Some(UserStatus::Rejected),
            _ => None,
        }
    }
}

/// Kind of content item stored in the lessons collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ContentType {
    YearPlan,
    #[default]
    LessonMaterial,
    ExtraResource,
}

impl ContentType {
    pub const ALL: [ContentType; 3] = [
        ContentType::YearPlan,
        ContentType::LessonMaterial,
        ContentType::ExtraResource,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::YearPlan => "year-plan",
            ContentType::LessonMaterial => "lesson-material",
            ContentType::ExtraResource => "extra-resource",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "year-plan" => Some(ContentType::YearPlan),
            "lesson-material" => Some(ContentType::LessonMaterial),
            "extra-resource" => Some(ContentType::ExtraResource),
            _ => None,
        }
    }
}

/// Stored invitation state.  Expiry is derived at read time and never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    #[default]
    Pending,
    Accepted,
}

impl InvitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationStatus::Pending => "pending",
            InvitationStatus::Accepted => "accepted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(InvitationStatus::Pending),
            "accepted" => Some(InvitationStatus::Accepted),
            _ => None,
        }
    }
}

/// Homework assignment lifecycle: `assigned -> submitted -> completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentStatus {
    #[default]
    Assigned,
    Submitted,
    Completed,
}

impl AssignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Assigned => "assigned",
            AssignmentStatus::Submitted => "submitted",
            AssignmentStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "assigned" => Some(AssignmentStatus::Assigned),
            "submitted" => Some(AssignmentStatus::Submitted),
            "completed" => Some(AssignmentStatus::Completed),
            _ => None,
        }
    }

    /// Whether moving from `self` to `next` follows the lifecycle.  Staying in
    /// place is allowed so that re-grading a completed item works.
    pub fn can_advance_to(&self, next: AssignmentStatus) -> bool {
        matches!(
            (self, next),
            (AssignmentStatus::Assigned, AssignmentStatus::Submitted)
                | (AssignmentStatus::Assigned, AssignmentStatus::Completed)
                | (AssignmentStatus::Submitted, AssignmentStatus::Completed)
                | (AssignmentStatus::Completed, AssignmentStatus::Completed)
        )
    }
}

/// Data-protection consent flags recorded on every user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Consent {
    #[serde(default)]
    pub data_processing: bool,
    #[serde(default)]
    pub progress_tracking: bool,
    #[serde(default)]
    pub parent_access: bool,
}

impl Consent {
    pub fn granted() -> Self {
        Self {
            data_processing: true,
            progress_tracking: true,
            parent_access: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parse_accepts_teacher_alias() {
        assert_eq!(Role::parse("Teacher"), Some(Role::Tutor));
        assert_eq!(Role::parse("admin"), Some(Role::Admin));
        assert_eq!(Role::parse("janitor"), None);
    }

    #[test]
    fn content_type_serde_is_kebab_case() {
        let json = serde_json::to_string(&ContentType::YearPlan).unwrap();
        assert_eq!(json, "\"year-plan\"");
        for ty in ContentType::ALL {
            assert_eq!(ContentType::parse(ty.as_str()), Some(ty));
        }
    }

    #[test]
    fn assignment_lifecycle() {
        use AssignmentStatus::*;
        assert!(Assigned.can_advance_to(Submitted));
        assert!(Submitted.can_advance_to(Completed));
        assert!(!Completed.can_advance_to(Assigned));
        assert!(!Submitted.can_advance_to(Assigned));
    }

    #[test]
    fn consent_defaults_to_denied() {
        let c: Consent = serde_json::from_str("{}").unwrap();
        assert!(!c.data_processing);
        assert!(Consent::granted().parent_access);
    }
}
