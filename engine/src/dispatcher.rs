//! External invite dispatch.
//!
//! Wraps [`RosterClient::send_invite`] with a deadline and classifies the result.
//! A request is retried once, and only when the client reports it was never
//! transmitted; anything that may have reached the external system is final.

use crate::config::DispatchConfig;
use crate::metrics::DispatchMetrics;
use std::sync::Arc;
use std::time::Instant;
use teamseat_core::model::{Email, Team};
use teamseat_core::roster::{RosterClient, RosterError};
use tokio::time::{sleep, timeout};

/// Retries allowed for a request that was provably not sent.
const MAX_UNSENT_RETRIES: u32 = 1;

/// Classified result of one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The invite was accepted by the external system
    Success,
    /// The invite was definitely not created; safe to roll back
    DefiniteFailure(String),
    /// The invite may or may not exist externally
    AmbiguousFailure(String),
}

impl DispatchOutcome {
    const fn label(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::DefiniteFailure(_) => "definite_failure",
            Self::AmbiguousFailure(_) => "ambiguous_failure",
        }
    }
}

/// Sort a roster error into a definite or ambiguous failure.
///
/// `NotSent` reaching this point has already used its retry, and the request
/// still never left the process, so it is definite.
#[must_use]
pub fn classify(err: &RosterError) -> DispatchOutcome {
    match err {
        RosterError::NotSent(_)
        | RosterError::Unauthorized
        | RosterError::AlreadyMember
        | RosterError::SeatLimitReached => DispatchOutcome::DefiniteFailure(err.to_string()),
        RosterError::Rejected { status, .. } if *status == 408 || *status >= 500 => {
            DispatchOutcome::AmbiguousFailure(err.to_string())
        }
        RosterError::Rejected { .. } => DispatchOutcome::DefiniteFailure(err.to_string()),
        RosterError::Timeout | RosterError::Transport(_) => {
            DispatchOutcome::AmbiguousFailure(err.to_string())
        }
    }
}

/// Sends invites through a [`RosterClient`].
pub struct InviteDispatcher<R> {
    client: Arc<R>,
    config: DispatchConfig,
}

impl<R: RosterClient> InviteDispatcher<R> {
    /// Create a dispatcher.
    #[must_use]
    pub const fn new(client: Arc<R>, config: DispatchConfig) -> Self {
        Self { client, config }
    }

    /// Send one invite and classify the result. Never returns an error: every
    /// failure is folded into the outcome.
    pub async fn invite(&self, team: &Team, email: &Email) -> DispatchOutcome {
        let started = Instant::now();
        let mut retries = 0;

        let outcome = loop {
            match timeout(self.config.invite_timeout, self.client.send_invite(team, email)).await {
                Err(_) => {
                    break DispatchOutcome::AmbiguousFailure(format!(
                        "No response within {:?}",
                        self.config.invite_timeout
                    ));
                }
                Ok(Ok(())) => {
                    if retries > 0 {
                        tracing::info!(team_id = %team.id, retries, "Invite sent after retry");
                    }
                    break DispatchOutcome::Success;
                }
                Ok(Err(RosterError::NotSent(reason))) if retries < MAX_UNSENT_RETRIES => {
                    tracing::warn!(
                        team_id = %team.id,
                        delay_ms = self.config.retry_delay.as_millis(),
                        error = %reason,
                        "Invite request not sent, retrying"
                    );
                    DispatchMetrics::record_retry();
                    retries += 1;
                    sleep(self.config.retry_delay).await;
                }
                Ok(Err(err)) => break classify(&err),
            }
        };

        DispatchMetrics::record(outcome.label(), started.elapsed());
        outcome
    }
}
