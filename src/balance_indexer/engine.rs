use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use futures::try_join;
use pit_wall::Progress;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::{
    balances::{BalanceRecord, BalanceStore, IndexedSlotLedger},
    beacon_chain::{BeaconNode, Slot, ValidatorSelection, GENESIS_TIMESTAMP},
    env::EnvConfig,
    metrics::IndexerMetrics,
};

use super::planner::{self, TargetSlots};

#[derive(Clone, Debug)]
pub struct IndexerConfig {
    pub commit_batch_size: usize,
    pub genesis: DateTime<Utc>,
    pub start_date: NaiveDate,
    pub timezones: Vec<Tz>,
    pub validators: ValidatorSelection,
}

impl From<&EnvConfig> for IndexerConfig {
    fn from(env_config: &EnvConfig) -> Self {
        Self {
            commit_batch_size: env_config.commit_batch_size,
            genesis: *GENESIS_TIMESTAMP,
            start_date: env_config.start_date,
            timezones: env_config.timezones.clone(),
            validators: env_config.validator_indexes.clone().into(),
        }
    }
}

/// Why a cycle stopped before working through all of its slots.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("failed to plan target slots: {0:#}")]
    Plan(anyhow::Error),
    #[error("failed to store balances: {0:#}")]
    Storage(anyhow::Error),
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CycleSummary {
    /// Target slots not yet indexed when the cycle started.
    pub planned: usize,
    /// Slots committed this cycle.
    pub indexed: usize,
    /// Slots not finalized yet, or the beacon node had no balances for.
    pub deferred: usize,
    /// Slots whose balances we failed to fetch.
    pub failed: usize,
    pub interrupted: bool,
}

enum SlotOutcome {
    Fetched(Vec<BalanceRecord>),
    NoBalances,
    NotFinalized,
}

pub struct BalanceIndexer<N: BeaconNode, S: BalanceStore> {
    beacon_node: N,
    config: IndexerConfig,
    ledger: IndexedSlotLedger,
    metrics: IndexerMetrics,
    shutdown: Option<watch::Receiver<bool>>,
    store: S,
}

impl<N, S> BalanceIndexer<N, S>
where
    N: BeaconNode + Send + Sync,
    S: BalanceStore + Send,
{
    pub fn new(beacon_node: N, store: S, metrics: IndexerMetrics, config: IndexerConfig) -> Self {
        Self {
            beacon_node,
            config,
            ledger: IndexedSlotLedger::new(),
            metrics,
            shutdown: None,
            store,
        }
    }

    /// Stops cycles before their next slot once the receiver sees `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    #[cfg(test)]
    pub fn ledger(&self) -> &IndexedSlotLedger {
        &self.ledger
    }

    pub fn metrics(&self) -> &IndexerMetrics {
        &self.metrics
    }

    #[cfg(test)]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[cfg(test)]
    pub fn into_store(self) -> S {
        self.store
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .map_or(false, |shutdown| *shutdown.borrow())
    }

    /// Indexes every target slot missing from the ledger, oldest first. Balances are committed
    /// every `commit_batch_size` slots, slots enter the ledger only once their batch committed.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<CycleSummary, CycleError> {
        let result = self.index_target_slots(now).await;

        if result.is_err() {
            if let Err(err) = self.store.rollback().await {
                warn!("failed to roll back uncommitted balances: {err:#}");
            }
        }

        result
    }

    async fn plan(&self, now: DateTime<Utc>) -> Result<TargetSlots, CycleError> {
        let (head_slot, activations) = try_join!(
            self.beacon_node.get_head_slot(),
            self.beacon_node
                .get_activation_slots(&self.config.validators)
        )
        .map_err(CycleError::Plan)?;

        // Tomorrow's date, so the window runs up to now.
        let end_date = now.date_naive() + Duration::days(1);

        let day_slots = planner::plan_day_slots(
            self.config.start_date,
            end_date,
            &self.config.timezones,
            &self.config.genesis,
            &now,
            head_slot,
        );
        let window_start = planner::window_start_slot(
            self.config.start_date,
            &self.config.timezones,
            &self.config.genesis,
        );
        let activation_slots = planner::plan_activation_slots(&activations);
        debug!(
            %head_slot,
            day_slots = day_slots.len(),
            activation_slots = activation_slots.len(),
            "planned target slots"
        );

        Ok(planner::merge_target_slots(
            &day_slots,
            activation_slots,
            &self.config.validators,
            window_start,
            head_slot,
        ))
    }

    async fn index_target_slots(&mut self, now: DateTime<Utc>) -> Result<CycleSummary, CycleError> {
        let mut target_slots = self.plan(now).await?;

        self.ledger
            .ensure_loaded(&mut self.store)
            .await
            .map_err(CycleError::Storage)?;
        target_slots.retain(|slot, _| !self.ledger.contains(*slot));

        let mut summary = CycleSummary {
            planned: target_slots.len(),
            ..CycleSummary::default()
        };
        self.metrics
            .slots_with_missing_balances
            .set(summary.planned as i64);
        info!(
            count = summary.planned,
            indexed_slots = self.ledger.len(),
            "getting balances for slots"
        );

        let mut progress = Progress::new("index-balances", summary.planned as u64);
        let mut pending_slots = Vec::with_capacity(self.config.commit_batch_size);

        for (slot, validators) in target_slots {
            if self.is_shutdown_requested() {
                info!("shutdown requested, stopping before slot {slot}");
                summary.interrupted = true;
                break;
            }

            match self.fetch_slot(slot, &validators).await {
                Ok(SlotOutcome::Fetched(records)) => {
                    self.store
                        .write_balances(&records)
                        .await
                        .map_err(CycleError::Storage)?;
                    pending_slots.push(slot);

                    if pending_slots.len() >= self.config.commit_batch_size {
                        summary.indexed += self.commit_pending(&mut pending_slots).await?;
                    }
                }
                Ok(SlotOutcome::NotFinalized) => {
                    debug!(%slot, "slot not finalized yet, skipping");
                    summary.deferred += 1;
                }
                Ok(SlotOutcome::NoBalances) => {
                    warn!(%slot, "no balances retrieved for slot");
                    summary.deferred += 1;
                }
                Err(err) => {
                    warn!(%slot, "failed to get balances, retrying next cycle: {err:#}");
                    summary.failed += 1;
                }
            }

            progress.inc_work_done();
            debug!("{}", progress.get_progress_string());
        }

        summary.indexed += self.commit_pending(&mut pending_slots).await?;

        Ok(summary)
    }

    #[instrument(skip(self, validators))]
    async fn fetch_slot(&self, slot: Slot, validators: &ValidatorSelection) -> Result<SlotOutcome> {
        if !self.beacon_node.is_finalized(slot).await? {
            return Ok(SlotOutcome::NotFinalized);
        }

        let balances = self
            .beacon_node
            .get_validator_balances(slot, validators)
            .await?;

        if balances.is_empty() {
            return Ok(SlotOutcome::NoBalances);
        }

        let records = balances
            .iter()
            .map(|balance| BalanceRecord::from_validator_balance(slot, balance))
            .collect();

        Ok(SlotOutcome::Fetched(records))
    }

    async fn commit_pending(&mut self, pending_slots: &mut Vec<Slot>) -> Result<usize, CycleError> {
        if pending_slots.is_empty() {
            return Ok(0);
        }

        self.store.commit().await.map_err(CycleError::Storage)?;

        let committed = pending_slots.len();
        for slot in pending_slots.drain(..) {
            self.ledger.mark_indexed(slot);
            self.metrics.slots_with_missing_balances.dec();
        }
        info!(committed, "committed balances");

        Ok(committed)
    }
}
