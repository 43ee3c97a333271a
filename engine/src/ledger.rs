//! Redemption ledger.
//!
//! The ledger exclusively owns `RedeemCode::used_count`. A use is taken with one
//! atomic compare-and-increment and handed out as a [`ClaimToken`]; the token is
//! consumed by exactly one of [`RedemptionLedger::commit`] or
//! [`RedemptionLedger::release`], so a use can never be given back twice.

use crate::error::{ClaimError, IssueError};
use crate::metrics::RedemptionMetrics;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::Arc;
use teamseat_core::model::{
    CodeType, Email, InviteRecord, InviteStatus, NewCode, NewInvite, RedeemCode, normalize_code,
};
use teamseat_core::store::{CodeStore, InviteStore, StoreResult};
use teamseat_core::{CodeId, GroupId, TeamId};

/// Largest batch accepted by [`RedemptionLedger::issue_codes`].
pub const MAX_BATCH: u32 = 100;

/// Length of the random part of a generated code.
pub const CODE_LENGTH: usize = 8;

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Attempts per generated code before giving up on collisions.
const MAX_COLLISION_ATTEMPTS: u32 = 10;

/// Compare-and-increment retries when a failed claim races with a release.
const MAX_CLAIM_ATTEMPTS: u32 = 3;

/// One claimed use of a code.
///
/// Not `Clone`: the only ways to dispose of a token are `commit` and `release`.
#[must_use = "a claimed code use must be committed or released"]
#[derive(Debug)]
pub struct ClaimToken {
    code_id: CodeId,
    code: String,
    code_type: CodeType,
    group_id: Option<GroupId>,
}

impl ClaimToken {
    /// Claimed code.
    #[must_use]
    pub const fn code_id(&self) -> CodeId {
        self.code_id
    }

    /// Normalized code string.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Channel of the claimed code.
    #[must_use]
    pub const fn code_type(&self) -> CodeType {
        self.code_type
    }

    /// Group the code is bound to.
    #[must_use]
    pub const fn group_id(&self) -> Option<GroupId> {
        self.group_id
    }
}

/// How a dispatched invite ended, as far as the ledger is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The invite was confirmed sent
    Sent,
    /// The external outcome is unknown; the record stays `Pending`
    Unconfirmed,
}

/// Request for a batch of new codes.
#[derive(Debug, Clone)]
pub struct IssueCodes {
    /// Number of codes, `1..=MAX_BATCH`
    pub count: u32,
    /// Redemption channel
    pub code_type: CodeType,
    /// Uses per code
    pub max_uses: u32,
    /// Optional expiry
    pub expires_at: Option<DateTime<Utc>>,
    /// Optional group binding
    pub group_id: Option<GroupId>,
    /// Optional prefix, normalized like a code
    pub prefix: Option<String>,
    /// Operator note
    pub note: Option<String>,
}

/// Read-only view of a redeemable code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodePreview {
    /// Normalized code string
    pub code: String,
    /// Redemption channel
    pub code_type: CodeType,
    /// Uses still available
    pub remaining: u32,
    /// Optional expiry
    pub expires_at: Option<DateTime<Utc>>,
    /// Group binding
    pub group_id: Option<GroupId>,
}

/// Code-use ledger backed by a [`CodeStore`] and [`InviteStore`].
pub struct RedemptionLedger<S> {
    store: Arc<S>,
}

impl<S> Clone for RedemptionLedger<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S> RedemptionLedger<S>
where
    S: CodeStore + InviteStore,
{
    /// Create a ledger over `store`.
    #[must_use]
    pub const fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Claim one use of `code`.
    ///
    /// # Errors
    ///
    /// Returns [`ClaimError`] if the code is unknown, inactive, expired or exhausted.
    pub async fn claim(&self, code: &str, now: DateTime<Utc>) -> Result<ClaimToken, ClaimError> {
        let code = normalize_code(code);

        for _ in 0..MAX_CLAIM_ATTEMPTS {
            if let Some(claimed) = self.store.try_consume_use(&code, now).await? {
                tracing::debug!(
                    code = %claimed.code,
                    used_count = claimed.used_count,
                    max_uses = claimed.max_uses,
                    "Code use claimed"
                );
                RedemptionMetrics::record_claim("claimed");
                return Ok(ClaimToken {
                    code_id: claimed.id,
                    code: claimed.code,
                    code_type: claimed.code_type,
                    group_id: claimed.group_id,
                });
            }

            // The guard failed; find out why. A code that looks claimable again lost
            // a race with a concurrent release, so try once more.
            let current = self.store.find_code(&code).await?;
            if let Err(err) = eligibility(current.as_ref(), now) {
                RedemptionMetrics::record_claim("rejected");
                return Err(err);
            }
        }

        RedemptionMetrics::record_claim("rejected");
        Err(ClaimError::CodeExhausted)
    }

    /// Claim one use of `code`, which must be of type `kind`.
    ///
    /// A code of another type is reported as [`ClaimError::CodeNotFound`].
    ///
    /// # Errors
    ///
    /// Returns [`ClaimError`] as [`RedemptionLedger::claim`] does.
    pub async fn claim_kind(
        &self,
        code: &str,
        kind: CodeType,
        now: DateTime<Utc>,
    ) -> Result<ClaimToken, ClaimError> {
        let normalized = normalize_code(code);
        match self.store.find_code(&normalized).await? {
            Some(found) if found.code_type == kind => self.claim(&normalized, now).await,
            _ => Err(ClaimError::CodeNotFound),
        }
    }

    /// Write the `Pending` invite record for a claimed use, before dispatch.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`](teamseat_core::store::StoreError) if the insert fails.
    pub async fn open_attempt(
        &self,
        token: &ClaimToken,
        team_id: TeamId,
        email: &Email,
        now: DateTime<Utc>,
    ) -> StoreResult<InviteRecord> {
        self.store
            .insert_invite(NewInvite {
                team_id,
                email: email.clone(),
                redeem_code_id: Some(token.code_id),
                created_at: now,
            })
            .await
    }

    /// Make a claimed use permanent.
    ///
    /// `Sent` moves the record to `Success`; `Unconfirmed` leaves it `Pending` for
    /// reconciliation. Returns the record's resulting status.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`](teamseat_core::store::StoreError) if the status write fails.
    /// The use stays consumed either way.
    pub async fn commit(
        &self,
        token: ClaimToken,
        record: &InviteRecord,
        outcome: CommitOutcome,
    ) -> StoreResult<InviteStatus> {
        match outcome {
            CommitOutcome::Sent => {
                self.store
                    .resolve_invite(record.id, InviteStatus::Success, None)
                    .await?;
                tracing::debug!(code = %token.code, invite_id = %record.id, "Code use committed");
                Ok(InviteStatus::Success)
            }
            CommitOutcome::Unconfirmed => {
                tracing::debug!(
                    code = %token.code,
                    invite_id = %record.id,
                    "Code use committed with unconfirmed dispatch"
                );
                Ok(InviteStatus::Pending)
            }
        }
    }

    /// Give a claimed use back, failing `record` with `reason` if one was written.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`](teamseat_core::store::StoreError) if either write fails.
    pub async fn release(
        &self,
        token: ClaimToken,
        record: Option<&InviteRecord>,
        reason: &str,
    ) -> StoreResult<()> {
        if let Some(record) = record {
            self.store
                .resolve_invite(record.id, InviteStatus::Failed, Some(reason.to_string()))
                .await?;
        }

        if !self.store.restore_use(token.code_id).await? {
            tracing::warn!(code = %token.code, "Released a use of a code with no uses counted");
        }

        tracing::debug!(code = %token.code, reason, "Code use released");
        Ok(())
    }

    /// Generate and store a batch of random codes.
    ///
    /// # Errors
    ///
    /// Returns [`IssueError`] for an invalid request, repeated collisions or a
    /// storage failure. Codes inserted before the failure stay in place.
    pub async fn issue_codes(
        &self,
        request: IssueCodes,
        now: DateTime<Utc>,
    ) -> Result<Vec<RedeemCode>, IssueError> {
        if request.count == 0 || request.count > MAX_BATCH {
            return Err(IssueError::InvalidCount {
                requested: request.count,
                max: MAX_BATCH,
            });
        }
        if request.max_uses == 0 {
            return Err(IssueError::InvalidMaxUses);
        }

        let prefix = request.prefix.as_deref().map(normalize_code).unwrap_or_default();
        let mut issued = Vec::with_capacity(request.count as usize);

        for _ in 0..request.count {
            let mut inserted = None;
            for _ in 0..MAX_COLLISION_ATTEMPTS {
                let candidate = NewCode {
                    code: random_code(&prefix),
                    code_type: request.code_type,
                    max_uses: request.max_uses,
                    expires_at: request.expires_at,
                    group_id: request.group_id,
                    note: request.note.clone(),
                    created_at: now,
                };
                if let Some(code) = self.store.insert_code(candidate).await? {
                    inserted = Some(code);
                    break;
                }
            }
            issued.push(inserted.ok_or(IssueError::CollisionLimit(MAX_COLLISION_ATTEMPTS))?);
        }

        tracing::info!(count = issued.len(), code_type = request.code_type.as_str(), "Issued codes");
        Ok(issued)
    }

    /// Enable or disable a code. Returns `false` if the code does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`](teamseat_core::store::StoreError) if the write fails.
    pub async fn set_active(&self, id: CodeId, active: bool) -> StoreResult<bool> {
        let updated = self.store.set_code_active(id, active).await?;
        if updated {
            tracing::info!(code_id = %id, active, "Code activation changed");
        }
        Ok(updated)
    }

    /// Preview whether `code` could be claimed right now, without consuming it.
    ///
    /// # Errors
    ///
    /// Returns the [`ClaimError`] a claim would fail with.
    pub async fn inspect(
        &self,
        code: &str,
        kind: Option<CodeType>,
        now: DateTime<Utc>,
    ) -> Result<CodePreview, ClaimError> {
        let found = self
            .store
            .find_code(&normalize_code(code))
            .await?
            .filter(|c| kind.is_none_or(|k| c.code_type == k));

        let code = eligibility(found.as_ref(), now).map(|()| found)?;
        code.map(|c| CodePreview {
            remaining: c.remaining(),
            code: c.code,
            code_type: c.code_type,
            expires_at: c.expires_at,
            group_id: c.group_id,
        })
        .ok_or(ClaimError::CodeNotFound)
    }

    /// Invite records paid for by a code, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`](teamseat_core::store::StoreError) if the read fails.
    pub async fn records_for_code(&self, id: CodeId) -> StoreResult<Vec<InviteRecord>> {
        self.store.invites_for_code(id).await
    }
}

/// Why `code` cannot be claimed at `now`, if it cannot.
fn eligibility(code: Option<&RedeemCode>, now: DateTime<Utc>) -> Result<(), ClaimError> {
    match code {
        None => Err(ClaimError::CodeNotFound),
        Some(c) if !c.is_active => Err(ClaimError::CodeInactive),
        Some(c) if c.is_expired(now) => Err(ClaimError::CodeExpired),
        Some(c) if c.is_exhausted() => Err(ClaimError::CodeExhausted),
        Some(_) => Ok(()),
    }
}

/// `prefix` followed by [`CODE_LENGTH`] random characters from `A-Z0-9`.
fn random_code(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let mut code = String::with_capacity(prefix.len() + CODE_LENGTH);
    code.push_str(prefix);
    for _ in 0..CODE_LENGTH {
        code.push(char::from(CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())]));
    }
    code
}
