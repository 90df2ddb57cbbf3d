use std::collections::HashMap;

use super::Slot;

pub type ValidatorIndex = i32;

/// Which validators a beacon node request is about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValidatorSelection {
    All,
    Indexes(Vec<ValidatorIndex>),
}

impl ValidatorSelection {
    /// Value for the beacon API `id` query parameter, `None` asks for every validator.
    pub fn id_param(&self) -> Option<String> {
        match self {
            Self::All => None,
            Self::Indexes(indexes) => Some(
                indexes
                    .iter()
                    .map(|index| index.to_string())
                    .collect::<Vec<_>>()
                    .join(","),
            ),
        }
    }

    /// Splits an index list into selections of at most `size` indexes, keeping request URLs
    /// within what beacon nodes accept. `All` is never split.
    pub fn chunks(&self, size: usize) -> Vec<ValidatorSelection> {
        match self {
            Self::Indexes(indexes) if !indexes.is_empty() => indexes
                .chunks(size.max(1))
                .map(|chunk| Self::Indexes(chunk.to_vec()))
                .collect(),
            _ => vec![self.clone()],
        }
    }
}

impl From<Option<Vec<ValidatorIndex>>> for ValidatorSelection {
    fn from(indexes: Option<Vec<ValidatorIndex>>) -> Self {
        match indexes {
            None => Self::All,
            Some(indexes) => Self::Indexes(indexes),
        }
    }
}

/// When a validator entered active duty, as far as the beacon node knows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Activation {
    Activated(Slot),
    NotYetActivated,
    Unknown,
}

impl Activation {
    /// The beacon chain marks validators without a scheduled activation with this epoch.
    pub const FAR_FUTURE_EPOCH: u64 = u64::MAX;

    pub fn from_epoch(activation_epoch: u64) -> Self {
        if activation_epoch == Self::FAR_FUTURE_EPOCH {
            return Self::NotYetActivated;
        }

        match Slot::from_epoch(activation_epoch) {
            Some(slot) => Self::Activated(slot),
            None => Self::Unknown,
        }
    }
}

pub type ActivationMap = HashMap<ValidatorIndex, Activation>;
