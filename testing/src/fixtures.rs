//! Builders for Teams and codes.

use crate::mocks::test_clock;
use teamseat_core::environment::Clock;
use teamseat_core::model::{CodeType, Credentials, NewCode, Team, TeamCounts};
use teamseat_core::{GroupId, TeamId};

/// Builder for a [`Team`].
///
/// Defaults: active, 5 seats, no group, empty counts, account `acct-{id}`.
#[derive(Debug, Clone)]
pub struct TeamFixture {
    team: Team,
}

impl TeamFixture {
    /// Start a Team with the given id.
    #[must_use]
    pub fn new(id: i64) -> Self {
        Self {
            team: Team {
                id: TeamId::new(id),
                name: format!("Team {id}"),
                account_id: format!("acct-{id}"),
                credentials: Credentials::new(format!("token-{id}")),
                max_seats: 5,
                is_active: true,
                group_id: None,
                counts: TeamCounts::default(),
                counts_version: 0,
                synced_at: None,
            },
        }
    }

    /// Display name.
    #[must_use]
    pub fn name(mut self, name: &str) -> Self {
        self.team.name = name.to_string();
        self
    }

    /// Seat limit.
    #[must_use]
    pub fn max_seats(mut self, max_seats: u32) -> Self {
        self.team.max_seats = max_seats;
        self
    }

    /// Cached member and pending counts.
    #[must_use]
    pub fn counts(mut self, member_count: u32, pending_count: u32) -> Self {
        self.team.counts = TeamCounts {
            member_count,
            pending_count,
        };
        self
    }

    /// Group membership.
    #[must_use]
    pub fn group(mut self, group: GroupId) -> Self {
        self.team.group_id = Some(group);
        self
    }

    /// Disable the Team.
    #[must_use]
    pub fn inactive(mut self) -> Self {
        self.team.is_active = false;
        self
    }

    /// Finish.
    #[must_use]
    pub fn build(self) -> Team {
        self.team
    }
}

/// A shared, active, ungrouped code with `max_uses` uses.
#[must_use]
pub fn code_fixture(code: &str, max_uses: u32) -> NewCode {
    NewCode {
        code: code.to_string(),
        code_type: CodeType::Shared,
        max_uses,
        expires_at: None,
        group_id: None,
        note: None,
        created_at: test_clock().now(),
    }
}

/// A direct-link code with `max_uses` uses.
#[must_use]
pub fn direct_code_fixture(code: &str, max_uses: u32) -> NewCode {
    NewCode {
        code_type: CodeType::Direct,
        ..code_fixture(code, max_uses)
    }
}
