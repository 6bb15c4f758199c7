//! Rebalance keeper.
//!
//! Calls the permissionless `rebalance` on a fixed interval and journals every
//! committed vault event plus a position snapshot after each tick.

use crate::market::Address;
use crate::persistence::PersistenceManager;
use crate::vault::{PositionChange, PositionManager, VaultError, VaultResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Rebalanced(PositionChange),
    Unchanged,
    Closed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeeperStats {
    pub ticks: u64,
    pub rebalances: u64,
    pub unchanged: u64,
    pub failures: u64,
    pub events_journaled: u64,
}

pub struct Keeper {
    manager: Arc<PositionManager>,
    caller: Address,
    journal: Option<PersistenceManager>,
    stats: KeeperStats,
}

impl Keeper {
    pub fn new(manager: Arc<PositionManager>, caller: Address) -> Self {
        Self {
            manager,
            caller,
            journal: None,
            stats: KeeperStats::default(),
        }
    }

    pub fn with_journal(mut self, journal: PersistenceManager) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn stats(&self) -> &KeeperStats {
        &self.stats
    }

    pub fn journal(&self) -> Option<&PersistenceManager> {
        self.journal.as_ref()
    }

    /// One rebalance attempt followed by a journal flush.
    pub fn tick(&mut self) -> VaultResult<TickOutcome> {
        self.stats.ticks += 1;

        let result = match self.manager.rebalance(self.caller) {
            Ok(change) => {
                self.stats.rebalances += 1;
                info!(
                    tick = self.stats.ticks,
                    debt_change_base = change.debt_change_base,
                    "Rebalanced"
                );
                Ok(TickOutcome::Rebalanced(change))
            }
            Err(VaultError::PositionUnchanged) => {
                self.stats.unchanged += 1;
                debug!(tick = self.stats.ticks, "Position within band");
                Ok(TickOutcome::Unchanged)
            }
            Err(VaultError::PositionClosed) => Ok(TickOutcome::Closed),
            Err(e) => {
                self.stats.failures += 1;
                error!(tick = self.stats.ticks, code = e.code(), error = %e, "Rebalance failed");
                Err(e)
            }
        };

        if let Err(e) = self.flush() {
            warn!(error = %e, "Failed to journal keeper state");
        }
        result
    }

    /// Journal pending vault events and the current position snapshot.
    pub fn flush(&mut self) -> anyhow::Result<()> {
        let events = self.manager.drain_events();
        let Some(journal) = &self.journal else {
            return Ok(());
        };

        let written = journal.record_events(&events)?;
        self.stats.events_journaled += written as u64;
        journal.record_snapshot(&self.manager.position_snapshot()?)?;
        Ok(())
    }

    /// Tick every `interval` until `shutdown` is raised, the position is closed
    /// or `before_tick` returns `false`.
    ///
    /// `before_tick` receives the zero-based tick index.
    pub async fn run<F>(
        &mut self,
        interval: Duration,
        shutdown: Arc<AtomicBool>,
        mut before_tick: F,
    ) -> anyhow::Result<()>
    where
        F: FnMut(u64) -> anyhow::Result<bool>,
    {
        let mut ticker = tokio::time::interval(interval);
        info!(interval_ms = interval.as_millis() as u64, "Keeper started");

        while !shutdown.load(Ordering::SeqCst) {
            ticker.tick().await;
            if !before_tick(self.stats.ticks)? {
                info!("Keeper input exhausted");
                break;
            }
            match self.tick() {
                Ok(TickOutcome::Closed) => {
                    warn!("Position closed, keeper stopping");
                    break;
                }
                Ok(_) => {}
                Err(e) => warn!(code = e.code(), "Tick failed, continuing"),
            }
        }

        self.flush()?;
        info!(stats = ?self.stats, "Keeper stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::simulation::{SimulatedVault, RESERVE_ADDRESS};

    const KEEPER: Address = Address::repeat_byte(0x0b);

    fn create_test_keeper() -> (SimulatedVault, Keeper) {
        let sim = SimulatedVault::from_config(&Config::default()).unwrap();
        let journal = PersistenceManager::new(":memory:").unwrap();
        let keeper = Keeper::new(sim.manager.clone(), KEEPER).with_journal(journal);
        (sim, keeper)
    }

    #[test]
    fn test_tick_outcomes() {
        let (sim, mut keeper) = create_test_keeper();

        assert_eq!(keeper.tick().unwrap(), TickOutcome::Unchanged);

        sim.market.set_price(RESERVE_ADDRESS, 1_860_00000000).unwrap();
        assert!(matches!(keeper.tick().unwrap(), TickOutcome::Rebalanced(c) if c.debt_change_base > 0));
        assert_eq!(keeper.tick().unwrap(), TickOutcome::Unchanged);

        let owner = sim.manager.owner();
        sim.manager.close_position(owner).unwrap();
        assert_eq!(keeper.tick().unwrap(), TickOutcome::Closed);

        let stats = keeper.stats();
        assert_eq!(stats.ticks, 4);
        assert_eq!(stats.rebalances, 1);
        assert_eq!(stats.unchanged, 2);
        assert_eq!(stats.failures, 0);
    }

    #[test]
    fn test_tick_journals_events_and_snapshot() {
        let (sim, mut keeper) = create_test_keeper();
        sim.market.set_price(RESERVE_ADDRESS, 1_860_00000000).unwrap();

        keeper.tick().unwrap();

        let journal = keeper.journal().unwrap();
        let counts = journal.event_counts().unwrap();
        assert_eq!(counts["PositionDeposit"], 1);
        assert_eq!(counts["PositionRebalance"], 1);
        assert_eq!(keeper.stats().events_journaled, 2);

        let latest = journal.latest_snapshot().unwrap().unwrap();
        assert_eq!(latest.snapshot, sim.manager.position_snapshot().unwrap());
    }

    #[tokio::test]
    async fn test_run_follows_price_path() {
        let (sim, mut keeper) = create_test_keeper();
        let shutdown = Arc::new(AtomicBool::new(false));

        keeper
            .run(Duration::from_millis(1), shutdown, |tick| sim.apply_tick(tick))
            .await
            .unwrap();

        let stats = keeper.stats();
        assert_eq!(stats.ticks, Config::default().simulation.price_path.len() as u64);
        assert!(stats.rebalances > 0);
        assert_eq!(stats.failures, 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (_sim, mut keeper) = create_test_keeper();
        let shutdown = Arc::new(AtomicBool::new(true));

        keeper
            .run(Duration::from_millis(1), shutdown, |_| Ok(true))
            .await
            .unwrap();

        assert_eq!(keeper.stats().ticks, 0);
    }
}
