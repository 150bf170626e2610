/// Application name used in notification emails
pub const APP_NAME: &str = "Tutor Portal";

/// Invitations stay redeemable for this many days (also the resend extension)
pub const INVITE_TTL_DAYS: i64 = 7;

/// Homework due date offset when the tutor does not provide one
pub const DEFAULT_DUE_DAYS: i64 = 7;

/// Blob container that holds uploaded lesson files
pub const LESSON_CONTAINER: &str = "lesson-files";

/// Lifetime of a signed download URL, in minutes
pub const DOWNLOAD_URL_TTL_MINUTES: i64 = 15;

/// Maximum accepted clock skew for payment webhook signatures (5 minutes)
pub const WEBHOOK_TOLERANCE_SECS: i64 = 300;

/// Maximum upload size in bytes (50 MiB)
pub const MAX_UPLOAD_SIZE: usize = 50 * 1024 * 1024;

/// Default page size for content listings
pub const DEFAULT_CONTENT_LIMIT: usize = 50;

/// Progress records shown per child on the parent dashboard
pub const PARENT_DASHBOARD_RECENT: usize = 10;

/// Window used for "recent logins" on the tutor dashboard
pub const RECENT_LOGIN_DAYS: i64 = 7;
