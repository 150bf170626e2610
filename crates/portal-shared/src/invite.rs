use chrono::{DateTime, Duration, Utc};
use rand::RngCore;

use crate::constants::INVITE_TTL_DAYS;
use crate::types::InvitationStatus;

const TOKEN_BYTES: usize = 32;

/// Mint a fresh invitation token: 32 bytes from the OS CSPRNG, hex-encoded.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Human-readable invitation id, e.g. `inv_1717171717171_a1b2c3d4e5f60718`.
pub fn generate_invitation_id(now: DateTime<Utc>) -> String {
    let mut suffix = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut suffix);
    format!("inv_{}_{}", now.timestamp_millis(), hex::encode(suffix))
}

/// Expiry for an invitation created (or resent) at `from`.
pub fn expiry_from(from: DateTime<Utc>) -> DateTime<Utc> {
    from + Duration::days(INVITE_TTL_DAYS)
}

pub fn is_expired(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now > expires_at
}

/// Decide whether an invitation in the given state can still be redeemed.
///
/// Expiry is checked before acceptance, so an accepted invitation that has
/// since lapsed reports `Expired`.
pub fn check_redeemable(
    status: InvitationStatus,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(), InviteError> {
    if is_expired(expires_at, now) {
        return Err(InviteError::Expired);
    }
    if status == InvitationStatus::Accepted {
        return Err(InviteError::AlreadyAccepted);
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InviteError {
    #[error("Invalid invitation token")]
    NotFound,

    #[error("Invitation has expired")]
    Expired,

    #[error("Invitation already accepted")]
    AlreadyAccepted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_64_hex_chars_and_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn invitation_id_format() {
        let now = Utc::now();
        let id = generate_invitation_id(now);
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "inv");
        assert_eq!(parts[1], now.timestamp_millis().to_string());
        assert_eq!(parts[2].len(), 16);
    }

    #[test]
    fn expired_token_rejected_regardless_of_status() {
        let now = Utc::now();
        let past = now - Duration::seconds(1);
        assert_eq!(
            check_redeemable(InvitationStatus::Pending, past, now),
            Err(InviteError::Expired)
        );
        assert_eq!(
            check_redeemable(InvitationStatus::Accepted, past, now),
            Err(InviteError::Expired)
        );
    }

    #[test]
    fn accepted_token_rejected() {
        let now = Utc::now();
        assert_eq!(
            check_redeemable(InvitationStatus::Accepted, expiry_from(now), now),
            Err(InviteError::AlreadyAccepted)
        );
        assert!(check_redeemable(InvitationStatus::Pending, expiry_from(now), now).is_ok());
    }

    #[test]
    fn expiry_is_seven_days_out() {
        let now = Utc::now();
        assert_eq!(expiry_from(now) - now, Duration::days(7));
    }
}
