use serde::Deserialize;

use crate::{
    beacon_chain::{slot_from_string, Slot, ValidatorIndex},
    json_codecs::{from_i32_string, from_u64_string},
    units::GweiNewtype,
};

#[derive(Debug, Deserialize, PartialEq, Eq)]
pub struct BeaconHeader {
    #[serde(deserialize_with = "slot_from_string")]
    pub slot: Slot,
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
pub struct BeaconHeaderEnvelope {
    pub message: BeaconHeader,
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
pub struct BeaconHeaderSignedEnvelope {
    pub header: BeaconHeaderEnvelope,
}

impl BeaconHeaderSignedEnvelope {
    pub fn slot(&self) -> Slot {
        self.header.message.slot
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct HeaderEnvelope {
    pub data: BeaconHeaderSignedEnvelope,
}

#[derive(Debug, Deserialize)]
pub struct FinalityCheckpoint {
    #[serde(deserialize_with = "from_u64_string")]
    pub epoch: u64,
}

#[derive(Debug, Deserialize)]
pub(super) struct FinalityCheckpoints {
    pub finalized: FinalityCheckpoint,
}

#[derive(Debug, Deserialize)]
pub(super) struct CheckpointEnvelope {
    pub data: FinalityCheckpoints,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ValidatorBalance {
    #[serde(deserialize_with = "from_i32_string")]
    pub index: ValidatorIndex,
    pub balance: GweiNewtype,
}

#[derive(Debug, Deserialize)]
pub(super) struct ValidatorBalancesEnvelope {
    pub data: Vec<ValidatorBalance>,
}

#[derive(Debug, Deserialize)]
pub struct Validator {
    #[serde(deserialize_with = "from_u64_string")]
    pub activation_epoch: u64,
}

#[derive(Debug, Deserialize)]
pub struct ValidatorEnvelope {
    #[serde(deserialize_with = "from_i32_string")]
    pub index: ValidatorIndex,
    pub validator: Validator,
}

#[derive(Debug, Deserialize)]
pub(super) struct ValidatorsEnvelope {
    pub data: Vec<ValidatorEnvelope>,
}
