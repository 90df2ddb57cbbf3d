//! Validator balances as we persist them: one row per validator per indexed slot.
mod ledger;
mod store;
#[cfg(test)]
pub mod test_utils;

pub use ledger::IndexedSlotLedger;
pub use store::BalanceStore;
pub use store::BalanceStorePostgres;

use crate::{
    beacon_chain::{Slot, ValidatorBalance, ValidatorIndex},
    units::GweiNewtype,
};

/// Identified by (validator_index, slot). Never updated once written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BalanceRecord {
    pub validator_index: ValidatorIndex,
    pub slot: Slot,
    pub balance: GweiNewtype,
}

impl BalanceRecord {
    pub fn from_validator_balance(slot: Slot, validator_balance: &ValidatorBalance) -> Self {
        Self {
            validator_index: validator_balance.index,
            slot,
            balance: validator_balance.balance,
        }
    }
}
