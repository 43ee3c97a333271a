//! Domain model for codes, Teams, invite records and roster snapshots.

use crate::ids::{CodeId, GroupId, InviteId, TeamId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Normalization
// ============================================================================

/// Normalize a user-entered redemption code (`trim` + upper-case).
#[must_use]
pub fn normalize_code(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// The address failed basic format validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid email address: {0}")]
pub struct InvalidEmail(pub String);

/// A normalized (trimmed, lower-cased) and format-checked email address.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Email(String);

impl Email {
    /// Normalize and validate an email address.
    ///
    /// This performs basic validation:
    /// - Must contain exactly one `@`
    /// - Must have non-empty local and domain parts
    /// - Domain must contain a dot and no empty labels
    /// - Length must be between 3 and 255 characters
    ///
    /// # Errors
    ///
    /// Returns [`InvalidEmail`] if the normalized address fails validation.
    pub fn parse(raw: &str) -> Result<Self, InvalidEmail> {
        let email = raw.trim().to_lowercase();

        if email.len() < 3 || email.len() > 255 {
            return Err(InvalidEmail(email));
        }

        let Some((local, domain)) = email.split_once('@') else {
            return Err(InvalidEmail(email));
        };

        let valid_local =
            |c: char| c.is_alphanumeric() || c == '.' || c == '-' || c == '+' || c == '_';
        let valid_domain = |c: char| c.is_alphanumeric() || c == '.' || c == '-';

        let well_formed = !local.is_empty()
            && domain.contains('.')
            && local.chars().all(valid_local)
            && domain.chars().all(valid_domain)
            && domain.split('.').all(|label| !label.is_empty());

        if well_formed {
            Ok(Self(email))
        } else {
            Err(InvalidEmail(email))
        }
    }

    /// Borrow the normalized address.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Email {
    type Error = InvalidEmail;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Email> for String {
    fn from(email: Email) -> Self {
        email.0
    }
}

// ============================================================================
// Codes
// ============================================================================

/// How a code may be redeemed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeType {
    /// Redeemed through the signed-in flow
    Shared,
    /// Redeemed through a direct invite link, no sign-in required
    Direct,
}

impl CodeType {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Shared => "shared",
            Self::Direct => "direct",
        }
    }
}

/// An unknown enum value was read from storage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown {kind} value: {value}")]
pub struct UnknownVariant {
    /// Enum being parsed
    pub kind: &'static str,
    /// Offending value
    pub value: String,
}

impl FromStr for CodeType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shared" => Ok(Self::Shared),
            "direct" => Ok(Self::Direct),
            other => Err(UnknownVariant {
                kind: "code_type",
                value: other.to_string(),
            }),
        }
    }
}

/// A redemption code and its use counter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedeemCode {
    /// Identifier
    pub id: CodeId,
    /// Normalized code string (unique)
    pub code: String,
    /// Redemption channel
    pub code_type: CodeType,
    /// Total allowed uses
    pub max_uses: u32,
    /// Uses consumed so far (`<= max_uses`)
    pub used_count: u32,
    /// Optional expiry
    pub expires_at: Option<DateTime<Utc>>,
    /// Disabled codes cannot be claimed
    pub is_active: bool,
    /// Restricts allocation to Teams of this group
    pub group_id: Option<GroupId>,
    /// Operator note
    pub note: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl RedeemCode {
    /// Uses still available.
    #[must_use]
    pub const fn remaining(&self) -> u32 {
        self.max_uses.saturating_sub(self.used_count)
    }

    /// Whether the code has passed its expiry at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Whether every use has been consumed.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.used_count >= self.max_uses
    }
}

/// Insert payload for a new code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewCode {
    /// Normalized code string
    pub code: String,
    /// Redemption channel
    pub code_type: CodeType,
    /// Total allowed uses
    pub max_uses: u32,
    /// Optional expiry
    pub expires_at: Option<DateTime<Utc>>,
    /// Group binding
    pub group_id: Option<GroupId>,
    /// Operator note
    pub note: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Teams
// ============================================================================

/// Opaque credentials used by the roster client to act on a Team.
///
/// `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(String);

impl Credentials {
    /// Wrap a credential string.
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Expose the secret to the roster client.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credentials(<redacted>)")
    }
}

/// Cached occupancy of a Team.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamCounts {
    /// Accepted members
    pub member_count: u32,
    /// Sent but unaccepted invites, including local reservations
    pub pending_count: u32,
}

impl TeamCounts {
    /// Seats currently occupied.
    #[must_use]
    pub const fn occupied(self) -> u32 {
        self.member_count.saturating_add(self.pending_count)
    }
}

/// A Team whose seats are resold.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    /// Identifier
    pub id: TeamId,
    /// Display name returned to redeemers
    pub name: String,
    /// External account identifier
    pub account_id: String,
    /// Credentials for the roster client
    pub credentials: Credentials,
    /// Locally configured seat limit (authoritative for admission)
    pub max_seats: u32,
    /// Inactive Teams are never selected nor synced
    pub is_active: bool,
    /// Optional group membership
    pub group_id: Option<GroupId>,
    /// Cached counts
    pub counts: TeamCounts,
    /// Bumped on every counts mutation
    pub counts_version: u64,
    /// Last successful reconciliation
    pub synced_at: Option<DateTime<Utc>>,
}

impl Team {
    /// Seats still free according to the cached counts.
    #[must_use]
    pub const fn free_seats(&self) -> u32 {
        self.max_seats.saturating_sub(self.counts.occupied())
    }

    /// Whether one more seat fits.
    #[must_use]
    pub const fn has_free_seat(&self) -> bool {
        self.counts.occupied() < self.max_seats
    }
}

/// An optional partition over Teams and codes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Identifier
    pub id: GroupId,
    /// Display name
    pub name: String,
}

/// Aggregated seat statistics over active Teams.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatStats {
    /// Sum of `max_seats`
    pub total_seats: u64,
    /// Sum of member counts
    pub members: u64,
    /// Sum of pending counts
    pub pending: u64,
    /// `total - members - pending`, floored at zero
    pub available: u64,
}

// ============================================================================
// Invite records
// ============================================================================

/// Lifecycle of an invite record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InviteStatus {
    /// Dispatch in flight or outcome unknown
    Pending,
    /// External invite confirmed sent (or observed accepted)
    Success,
    /// Dispatch failed or the external side dropped the invite
    Failed,
}

impl InviteStatus {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for InviteStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(UnknownVariant {
                kind: "invite_status",
                value: other.to_string(),
            }),
        }
    }
}

/// Durable trace of one dispatch attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteRecord {
    /// Identifier
    pub id: InviteId,
    /// Team the seat was reserved on
    pub team_id: TeamId,
    /// Invited address
    pub email: Email,
    /// Code that paid for the seat, if any
    pub redeem_code_id: Option<CodeId>,
    /// Current status
    pub status: InviteStatus,
    /// Why the record failed
    pub failure_reason: Option<String>,
    /// When dispatch was attempted
    pub created_at: DateTime<Utc>,
    /// When reconciliation observed the member
    pub accepted_at: Option<DateTime<Utc>>,
}

impl InviteRecord {
    /// Whether this record still holds (or may hold) a seat.
    #[must_use]
    pub const fn holds_seat(&self) -> bool {
        !matches!(self.status, InviteStatus::Failed) && self.accepted_at.is_none()
    }
}

/// Insert payload for a new invite record (always `Pending`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewInvite {
    /// Team the seat was reserved on
    pub team_id: TeamId,
    /// Invited address
    pub email: Email,
    /// Code that paid for the seat
    pub redeem_code_id: Option<CodeId>,
    /// Attempt time
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Roster snapshot
// ============================================================================

/// One member of a Team as last observed by reconciliation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamMember {
    /// Team
    pub team_id: TeamId,
    /// Member address
    pub email: Email,
    /// External role (`owner`, `admin`, `member`, ...)
    pub role: String,
    /// External user id, used for removals
    pub external_user_id: String,
    /// When the member joined, if reported
    pub joined_at: Option<DateTime<Utc>>,
    /// Member was neither invited by the engine nor exempt
    pub is_unauthorized: bool,
    /// Snapshot time
    pub synced_at: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn email_is_trimmed_and_lowercased() {
        let email = Email::parse("  User.Name+tag@Example.COM ").unwrap();
        assert_eq!(email.as_str(), "user.name+tag@example.com");
    }

    #[test]
    fn invalid_emails_are_rejected() {
        for raw in ["", "invalid", "@example.com", "user@", "a@@b.com", "user@example..com", "u@nodot"] {
            assert!(Email::parse(raw).is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn email_deserialization_validates() {
        let ok: Result<Email, _> = serde_json::from_str("\"A@B.io\"");
        assert_eq!(ok.unwrap().as_str(), "a@b.io");
        let bad: Result<Email, _> = serde_json::from_str("\"nope\"");
        assert!(bad.is_err());
    }

    #[test]
    fn code_normalization() {
        assert_eq!(normalize_code("  abc123\n"), "ABC123");
    }

    #[test]
    fn code_expiry_and_exhaustion() {
        let now = Utc::now();
        let code = RedeemCode {
            id: CodeId::new(1),
            code: "ABC".into(),
            code_type: CodeType::Shared,
            max_uses: 2,
            used_count: 2,
            expires_at: Some(now - Duration::seconds(1)),
            is_active: true,
            group_id: None,
            note: None,
            created_at: now,
        };
        assert!(code.is_expired(now));
        assert!(code.is_exhausted());
        assert_eq!(code.remaining(), 0);
    }

    #[test]
    fn enum_round_trip_through_storage_strings() {
        for status in [InviteStatus::Pending, InviteStatus::Success, InviteStatus::Failed] {
            assert_eq!(status.as_str().parse::<InviteStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<CodeType>().is_err());
    }

    #[test]
    fn credentials_are_redacted_in_debug() {
        let creds = Credentials::new("super-secret");
        assert_eq!(format!("{creds:?}"), "Credentials(<redacted>)");
        assert_eq!(creds.expose(), "super-secret");
    }

    #[test]
    fn team_free_seats_saturate() {
        let counts = TeamCounts {
            member_count: 4,
            pending_count: 3,
        };
        assert_eq!(counts.occupied(), 7);
        let team = Team {
            id: TeamId::new(1),
            name: "t".into(),
            account_id: "acct".into(),
            credentials: Credentials::new("x"),
            max_seats: 5,
            is_active: true,
            group_id: None,
            counts,
            counts_version: 0,
            synced_at: None,
        };
        assert_eq!(team.free_seats(), 0);
        assert!(!team.has_free_seat());
    }

    proptest::proptest! {
        #[test]
        fn email_normalization_is_idempotent(local in "[a-zA-Z0-9._+-]{1,20}", domain in "[a-zA-Z0-9-]{1,12}\\.[a-zA-Z]{2,6}") {
            let raw = format!("  {local}@{domain} ");
            if let Ok(email) = Email::parse(&raw) {
                let again = Email::parse(email.as_str()).unwrap();
                proptest::prop_assert_eq!(again.as_str(), email.as_str());
                proptest::prop_assert_eq!(email.as_str(), email.as_str().to_lowercase());
            }
        }

        #[test]
        fn code_normalization_is_idempotent(raw in "\\s*[a-zA-Z0-9]{1,16}\\s*") {
            let once = normalize_code(&raw);
            proptest::prop_assert_eq!(normalize_code(&once), once.clone());
            proptest::prop_assert!(!once.starts_with(char::is_whitespace));
        }
    }
}
