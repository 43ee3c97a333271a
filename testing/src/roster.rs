//! Scripted in-memory [`RosterClient`].

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use teamseat_core::model::{Email, Team};
use teamseat_core::roster::{
    RosterClient, RosterError, RosterInvite, RosterMember, RosterResult, Subscription,
};

/// How the fake answers one `send_invite` call.
#[derive(Debug, Clone)]
pub enum InviteScript {
    /// Create the invite and answer `Ok`
    Succeed,
    /// Answer with the error; no invite is created
    Fail(RosterError),
    /// Wait `delay` before answering `Ok`; with `delivered` the invite is created
    /// before the wait, as a request whose response got lost would be
    Hang {
        /// How long to wait
        delay: Duration,
        /// Whether the invite exists externally
        delivered: bool,
    },
}

#[derive(Debug, Default)]
struct Account {
    members: Vec<RosterMember>,
    pending: Vec<RosterInvite>,
    listing_error: Option<RosterError>,
    seats_entitled: Option<u32>,
}

#[derive(Debug)]
struct State {
    accounts: HashMap<String, Account>,
    scripts: HashMap<Email, VecDeque<InviteScript>>,
    default_script: InviteScript,
    send_calls: usize,
    next_user_id: u64,
}

/// In-memory external Team API.
///
/// Invites are scripted per address; unscripted addresses use the default
/// script ([`InviteScript::Succeed`] unless changed). Accounts are keyed by
/// `Team::account_id` and created on first use.
#[derive(Debug)]
pub struct FakeRoster {
    state: Mutex<State>,
}

impl Default for FakeRoster {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRoster {
    /// Create an empty roster where every invite succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                accounts: HashMap::new(),
                scripts: HashMap::new(),
                default_script: InviteScript::Succeed,
                send_calls: 0,
                next_user_id: 0,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue answers for `email`, consumed one per call.
    ///
    /// # Panics
    ///
    /// Panics if `email` is not a valid address.
    pub fn script(&self, email: &str, steps: impl IntoIterator<Item = InviteScript>) {
        let email = parse(email);
        self.state().scripts.entry(email).or_default().extend(steps);
    }

    /// Answer used once an address has no queued script left.
    pub fn set_default(&self, script: InviteScript) {
        self.state().default_script = script;
    }

    /// Number of `send_invite` calls so far.
    #[must_use]
    pub fn send_calls(&self) -> usize {
        self.state().send_calls
    }

    /// Add an accepted member.
    ///
    /// # Panics
    ///
    /// Panics if `email` is not a valid address.
    pub fn add_member(&self, account_id: &str, email: &str, role: &str) {
        let email = parse(email);
        let mut state = self.state();
        let external_user_id = state.next_user_id();
        state.accounts.entry(account_id.to_string()).or_default().members.push(RosterMember {
            email,
            role: role.to_string(),
            external_user_id,
            joined_at: None,
        });
    }

    /// Add a pending invite that did not come through `send_invite`.
    ///
    /// # Panics
    ///
    /// Panics if `email` is not a valid address.
    pub fn add_pending(&self, account_id: &str, email: &str) {
        let email = parse(email);
        self.state()
            .accounts
            .entry(account_id.to_string())
            .or_default()
            .pending
            .push(RosterInvite { email, created_at: None });
    }

    /// The invitee accepts: the pending invite becomes a member.
    /// Returns `false` if no such invite exists.
    pub fn accept(&self, account_id: &str, email: &Email) -> bool {
        let mut state = self.state();
        let external_user_id = state.next_user_id();
        let account = state.accounts.entry(account_id.to_string()).or_default();

        let before = account.pending.len();
        account.pending.retain(|invite| &invite.email != email);
        if account.pending.len() == before {
            return false;
        }

        account.members.push(RosterMember {
            email: email.clone(),
            role: "member".to_string(),
            external_user_id,
            joined_at: None,
        });
        true
    }

    /// The external side silently drops a pending invite.
    /// Returns `false` if no such invite exists.
    pub fn drop_invite(&self, account_id: &str, email: &Email) -> bool {
        let mut state = self.state();
        let account = state.accounts.entry(account_id.to_string()).or_default();
        let before = account.pending.len();
        account.pending.retain(|invite| &invite.email != email);
        account.pending.len() != before
    }

    /// Make listings of `account_id` fail with `error` (or succeed again with `None`).
    pub fn fail_listings(&self, account_id: &str, error: Option<RosterError>) {
        self.state()
            .accounts
            .entry(account_id.to_string())
            .or_default()
            .listing_error = error;
    }

    /// Set the seats the external plan entitles.
    pub fn set_entitlement(&self, account_id: &str, seats: u32) {
        self.state()
            .accounts
            .entry(account_id.to_string())
            .or_default()
            .seats_entitled = Some(seats);
    }

    /// Pending invites of `account_id`, in creation order.
    #[must_use]
    pub fn pending(&self, account_id: &str) -> Vec<Email> {
        self.state()
            .accounts
            .get(account_id)
            .map(|a| a.pending.iter().map(|i| i.email.clone()).collect())
            .unwrap_or_default()
    }

    /// Members of `account_id`.
    #[must_use]
    pub fn members(&self, account_id: &str) -> Vec<RosterMember> {
        self.state()
            .accounts
            .get(account_id)
            .map(|a| a.members.clone())
            .unwrap_or_default()
    }

    fn listing<T>(&self, team: &Team, f: impl FnOnce(&Account) -> T) -> RosterResult<T> {
        let state = self.state();
        match state.accounts.get(&team.account_id) {
            Some(account) => match &account.listing_error {
                Some(err) => Err(err.clone()),
                None => Ok(f(account)),
            },
            None => Ok(f(&Account::default())),
        }
    }

    /// Create a pending invite unless the address is already there.
    fn deliver(&self, team: &Team, email: &Email, at: DateTime<Utc>) -> RosterResult<()> {
        let mut state = self.state();
        let account = state.accounts.entry(team.account_id.clone()).or_default();
        if account.members.iter().any(|m| &m.email == email) {
            return Err(RosterError::AlreadyMember);
        }
        if !account.pending.iter().any(|i| &i.email == email) {
            account.pending.push(RosterInvite {
                email: email.clone(),
                created_at: Some(at),
            });
        }
        Ok(())
    }
}

impl State {
    fn next_user_id(&mut self) -> String {
        self.next_user_id += 1;
        format!("user-{}", self.next_user_id)
    }
}

#[allow(clippy::expect_used)]
fn parse(email: &str) -> Email {
    Email::parse(email).expect("fixture email should be valid")
}

fn not_found(what: &str) -> RosterError {
    RosterError::Rejected {
        status: 404,
        message: format!("{what} not found"),
    }
}

impl RosterClient for FakeRoster {
    async fn list_members(&self, team: &Team) -> RosterResult<Vec<RosterMember>> {
        self.listing(team, |a| a.members.clone())
    }

    async fn list_pending_invites(&self, team: &Team) -> RosterResult<Vec<RosterInvite>> {
        self.listing(team, |a| a.pending.clone())
    }

    async fn send_invite(&self, team: &Team, email: &Email) -> RosterResult<()> {
        let script = {
            let mut state = self.state();
            state.send_calls += 1;
            let queued = state.scripts.get_mut(email).and_then(VecDeque::pop_front);
            queued.unwrap_or_else(|| state.default_script.clone())
        };

        match script {
            InviteScript::Succeed => self.deliver(team, email, Utc::now()),
            InviteScript::Fail(err) => Err(err),
            InviteScript::Hang { delay, delivered } => {
                if delivered {
                    self.deliver(team, email, Utc::now())?;
                }
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }

    async fn cancel_invite(&self, team: &Team, email: &Email) -> RosterResult<()> {
        if self.drop_invite(&team.account_id, email) {
            Ok(())
        } else {
            Err(not_found("Invite"))
        }
    }

    async fn remove_member(&self, team: &Team, external_user_id: &str) -> RosterResult<()> {
        let mut state = self.state();
        let account = state.accounts.entry(team.account_id.clone()).or_default();
        let before = account.members.len();
        account.members.retain(|m| m.external_user_id != external_user_id);
        if account.members.len() == before {
            Err(not_found("Member"))
        } else {
            Ok(())
        }
    }

    async fn subscription(&self, team: &Team) -> RosterResult<Subscription> {
        self.listing(team, |a| {
            let in_use = a.members.len() + a.pending.len();
            let seats_in_use = u32::try_from(in_use).unwrap_or(u32::MAX);
            Subscription {
                seats_entitled: a.seats_entitled.unwrap_or(team.max_seats),
                seats_in_use,
                active_until: None,
            }
        })
    }
}
