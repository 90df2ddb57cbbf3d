use std::collections::BTreeSet;

use anyhow::Result;
use tracing::debug;

use crate::beacon_chain::Slot;

use super::BalanceStore;

/// Slots whose balances are durably stored. A cache of the balance table that only ever grows:
/// it may miss slots stored elsewhere but never claims a slot that is not stored, as long as
/// slots are marked only after their transaction committed.
#[derive(Debug, Default)]
pub struct IndexedSlotLedger {
    slots: BTreeSet<Slot>,
}

impl IndexedSlotLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fills the ledger from storage, but only while it is empty.
    pub async fn ensure_loaded(&mut self, store: &mut impl BalanceStore) -> Result<()> {
        if !self.is_empty() {
            return Ok(());
        }

        let slots = store.get_indexed_slots().await?;
        debug!(count = slots.len(), "loaded indexed slots from storage");
        self.slots.extend(slots);

        Ok(())
    }

    pub fn contains(&self, slot: Slot) -> bool {
        self.slots.contains(&slot)
    }

    pub fn mark_indexed(&mut self, slot: Slot) {
        self.slots.insert(slot);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
