//! Shared harness for engine integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use teamseat_core::{CodeId, TeamId};
use teamseat_core::environment::Clock;
use teamseat_core::model::{NewCode, Team};
use teamseat_core::store::{CodeStore, TeamStore};
use teamseat_engine::memory::MemoryStore;
use teamseat_engine::{EngineConfig, SeatEngine};
use teamseat_testing::{FakeRoster, ManualClock};

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub roster: Arc<FakeRoster>,
    pub clock: Arc<ManualClock>,
    pub engine: Arc<SeatEngine<MemoryStore, FakeRoster>>,
}

/// Short dispatch deadline so ambiguous outcomes resolve quickly.
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.dispatch.invite_timeout = Duration::from_millis(100);
    config.dispatch.retry_delay = Duration::from_millis(1);
    config.sync.roster_timeout = Duration::from_secs(2);
    config
}

pub fn harness() -> Harness {
    harness_with(test_config())
}

pub fn harness_with(config: EngineConfig) -> Harness {
    teamseat_testing::init_tracing();

    let store = Arc::new(MemoryStore::new());
    let roster = Arc::new(FakeRoster::new());
    let clock = Arc::new(ManualClock::default());
    let engine = Arc::new(SeatEngine::new(
        Arc::clone(&store),
        Arc::clone(&roster),
        Arc::clone(&clock) as Arc<dyn Clock>,
        config,
    ));

    Harness {
        store,
        roster,
        clock,
        engine,
    }
}

impl Harness {
    pub fn add_team(&self, team: Team) {
        self.store.insert_team(team).unwrap();
    }

    pub async fn add_code(&self, code: NewCode) {
        self.store.insert_code(code).await.unwrap().expect("code should be new");
    }

    pub fn clock_now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn team(&self, id: i64) -> Team {
        self.store.get_team(TeamId::new(id)).await.unwrap().unwrap()
    }

    pub async fn code_id(&self, code: &str) -> CodeId {
        self.store.find_code(code).await.unwrap().unwrap().id
    }

    pub async fn used_count(&self, code: &str) -> u32 {
        self.store.find_code(code).await.unwrap().unwrap().used_count
    }
}
