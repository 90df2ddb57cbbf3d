mod node;
mod units;
mod validators;

pub use node::BeaconNode;
pub use node::BeaconNodeHttp;
#[cfg(test)]
pub use node::MockBeaconNode;
pub use node::ValidatorBalance;

pub use units::slot_from_string;
pub use units::Slot;

pub use validators::Activation;
pub use validators::ActivationMap;
pub use validators::ValidatorIndex;
pub use validators::ValidatorSelection;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;

lazy_static! {
    pub static ref GENESIS_TIMESTAMP: DateTime<Utc> = "2020-12-01T12:00:23Z"
        .parse()
        .expect("expect genesis timestamp to be a valid RFC 3339 date time");
}
