use std::collections::{BTreeMap, BTreeSet};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::{
    beacon_chain::{Slot, ValidatorIndex},
    units::GweiNewtype,
};

use super::{BalanceRecord, BalanceStore};

/// Keeps balances in memory with the same transaction semantics as postgres: writes are staged
/// until commit, commits are insert-or-ignore on (validator_index, slot).
#[derive(Default)]
pub struct InMemoryBalanceStore {
    pub committed: BTreeMap<(ValidatorIndex, Slot), GweiNewtype>,
    pub commit_count: usize,
    pub fail_commits: bool,
    /// Writes for this slot fail, as a dropped connection would.
    pub fail_writes_at: Option<Slot>,
    pending: Vec<BalanceRecord>,
    indexed_slot_queries: usize,
    written_slots: Vec<Slot>,
}

impl InMemoryBalanceStore {
    pub fn with_committed(records: &[BalanceRecord]) -> Self {
        let mut store = Self::default();
        for record in records {
            store
                .committed
                .insert((record.validator_index, record.slot), record.balance);
        }
        store
    }

    pub fn committed_slots(&self) -> BTreeSet<Slot> {
        self.committed.keys().map(|(_, slot)| *slot).collect()
    }

    pub fn indexed_slot_queries(&self) -> usize {
        self.indexed_slot_queries
    }

    /// Every slot handed to `write_balances`, committed or not, in call order.
    pub fn written_slots(&self) -> &[Slot] {
        &self.written_slots
    }
}

#[async_trait]
impl BalanceStore for InMemoryBalanceStore {
    async fn get_indexed_slots(&mut self) -> Result<Vec<Slot>> {
        self.indexed_slot_queries += 1;
        Ok(self.committed_slots().into_iter().collect())
    }

    async fn write_balances(&mut self, records: &[BalanceRecord]) -> Result<()> {
        if let Some(record) = records.first() {
            if self.fail_writes_at == Some(record.slot) {
                return Err(anyhow!("connection reset while writing balances"));
            }
            self.written_slots.push(record.slot);
        }
        self.pending.extend_from_slice(records);
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        if self.fail_commits {
            self.pending.clear();
            return Err(anyhow!("connection reset while committing"));
        }

        for record in self.pending.drain(..) {
            self.committed
                .entry((record.validator_index, record.slot))
                .or_insert(record.balance);
        }
        self.commit_count += 1;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.pending.clear();
        Ok(())
    }
}
