mod balance_indexer;
mod balances;
mod beacon_chain;
mod db;
mod env;
mod health;
mod json_codecs;
mod log;
mod metrics;
mod units;

pub use balance_indexer::index_balances;
