use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};

// Beacon chain slots are defined as 12 second periods starting from genesis. With i32 our program
// would overflow when the slot number passes 2_147_483_647. i32::MAX * 12 seconds = ~817 years.
// Postgres has no unsigned integers, i32 maps straight onto an INTEGER column.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialOrd, PartialEq, Serialize, sqlx::Type,
)]
#[sqlx(transparent)]
pub struct Slot(pub i32);

impl Slot {
    pub const GENESIS: Self = Self(0);
    pub const SECONDS_PER_SLOT: i32 = 12;
    pub const SLOTS_PER_EPOCH: i32 = 32;

    /// Returns the slot in progress at `date_time` on a chain that started at `genesis`.
    ///
    /// Instants before genesis floor to negative slots, callers clip to genesis first.
    pub fn from_date_time_since(genesis: &DateTime<Utc>, date_time: &DateTime<Utc>) -> Self {
        let seconds_since_genesis = (*date_time - *genesis).num_seconds();
        let slot = seconds_since_genesis.div_euclid(Self::SECONDS_PER_SLOT as i64);
        Self(slot as i32)
    }

    /// First slot of the given epoch, `None` when it does not fit a slot.
    pub fn from_epoch(epoch: u64) -> Option<Self> {
        epoch
            .checked_mul(Self::SLOTS_PER_EPOCH as u64)
            .and_then(|slot| i32::try_from(slot).ok())
            .map(Self)
    }
}

impl Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The beacon API encodes slots as decimal strings.
pub fn slot_from_string<'de, D>(deserializer: D) -> Result<Slot, D::Error>
where
    D: Deserializer<'de>,
{
    let slot_text = String::deserialize(deserializer)?;
    slot_text
        .parse::<i32>()
        .map(Slot)
        .map_err(|error| de::Error::custom(format!("invalid slot {slot_text}: {error}")))
}
