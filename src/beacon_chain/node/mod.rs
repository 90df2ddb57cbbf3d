//! Functions that know how to communicate with a BeaconChain node to get the pieces of data the
//! balance indexer needs: the head slot, finality, validator balances and activations.
mod types;

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoff;
use format_url::FormatUrl;
use mockall::automock;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::{Activation, ActivationMap, Slot, ValidatorSelection};

pub use types::{FinalityCheckpoint, ValidatorBalance};
use types::{CheckpointEnvelope, HeaderEnvelope, ValidatorBalancesEnvelope, ValidatorsEnvelope};

/// Most indexes sent in one `id` query parameter, larger selections are split over several
/// requests.
const MAX_IDS_PER_REQUEST: usize = 250;

#[automock]
#[async_trait]
pub trait BeaconNode {
    /// Activation of every selected validator according to the head state.
    async fn get_activation_slots(&self, selection: &ValidatorSelection) -> Result<ActivationMap>;
    async fn get_head_slot(&self) -> Result<Slot>;
    /// An empty list means the node has no balances for the slot (yet).
    async fn get_validator_balances(
        &self,
        slot: Slot,
        selection: &ValidatorSelection,
    ) -> Result<Vec<ValidatorBalance>>;
    async fn is_finalized(&self, slot: Slot) -> Result<bool>;
}

#[derive(Clone, Debug)]
pub struct BeaconNodeHttp {
    beacon_url: String,
    client: reqwest::Client,
    retry_max_elapsed: Duration,
}

impl BeaconNodeHttp {
    pub fn new(
        beacon_url: &str,
        request_timeout: Duration,
        retry_max_elapsed: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("failed to build beacon node http client")?;

        Ok(Self {
            beacon_url: beacon_url.trim_end_matches('/').to_string(),
            client,
            retry_max_elapsed,
        })
    }

    fn make_url(&self, path: &str, selection: Option<&ValidatorSelection>) -> String {
        let id_param = selection.and_then(ValidatorSelection::id_param);
        let url = FormatUrl::new(&self.beacon_url).with_path_template(path);
        match id_param {
            Some(ref ids) => url.with_query_params(vec![("id", ids.as_str())]).format_url(),
            None => url.format_url(),
        }
    }

    /// GETs `url`, retrying transport failures and server errors until the retry budget runs
    /// out. A 404 is the node telling us it does not have the data, which is `None`.
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>> {
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(self.retry_max_elapsed),
            ..ExponentialBackoff::default()
        };
        let client = &self.client;

        backoff::future::retry(backoff, || async move {
            let res = client.get(url).send().await.map_err(|err| {
                warn!(%err, url, "beacon node request failed, retrying");
                backoff::Error::transient(anyhow::Error::from(err))
            })?;

            match res.status() {
                StatusCode::NOT_FOUND => Ok(None),
                StatusCode::OK => res
                    .json::<T>()
                    .await
                    .map(Some)
                    .map_err(|err| backoff::Error::permanent(anyhow::Error::from(err))),
                status if status.is_server_error() => {
                    warn!(%status, url, "beacon node server error, retrying");
                    Err(backoff::Error::transient(anyhow!(
                        "beacon node server error. status = {} url = {}",
                        status,
                        url
                    )))
                }
                status => Err(backoff::Error::permanent(anyhow!(
                    "unexpected beacon node response. status = {} url = {}",
                    status,
                    url
                ))),
            }
        })
        .await
    }

    pub async fn get_last_finality_checkpoint(&self) -> Result<FinalityCheckpoint> {
        let url = self.make_url("/eth/v1/beacon/states/head/finality_checkpoints", None);
        self.get_json::<CheckpointEnvelope>(&url)
            .await?
            .map(|envelope| envelope.data.finalized)
            .ok_or_else(|| anyhow!("beacon node has no finality checkpoints for head"))
    }
}

#[async_trait]
impl BeaconNode for BeaconNodeHttp {
    async fn get_activation_slots(&self, selection: &ValidatorSelection) -> Result<ActivationMap> {
        // Validators we asked for but the node does not know of stay Unknown.
        let mut activations: ActivationMap = match selection {
            ValidatorSelection::All => ActivationMap::new(),
            ValidatorSelection::Indexes(indexes) => indexes
                .iter()
                .map(|index| (*index, Activation::Unknown))
                .collect(),
        };

        for chunk in selection.chunks(MAX_IDS_PER_REQUEST) {
            let url = self.make_url("/eth/v1/beacon/states/head/validators", Some(&chunk));
            let validators = self
                .get_json::<ValidatorsEnvelope>(&url)
                .await
                .context("failed to fetch validators")?
                .ok_or_else(|| anyhow!("beacon node has no validators for head state"))?
                .data;

            for validator in validators {
                activations.insert(
                    validator.index,
                    Activation::from_epoch(validator.validator.activation_epoch),
                );
            }
        }

        debug!(count = activations.len(), "fetched validator activations");

        Ok(activations)
    }

    async fn get_head_slot(&self) -> Result<Slot> {
        let url = self.make_url("/eth/v1/beacon/headers/head", None);
        self.get_json::<HeaderEnvelope>(&url)
            .await
            .context("failed to fetch head header")?
            .map(|envelope| envelope.data.slot())
            .ok_or_else(|| anyhow!("expect beacon chain head to always point to a block"))
    }

    async fn get_validator_balances(
        &self,
        slot: Slot,
        selection: &ValidatorSelection,
    ) -> Result<Vec<ValidatorBalance>> {
        let path = format!("/eth/v1/beacon/states/{slot}/validator_balances");
        let mut balances = Vec::new();

        for chunk in selection.chunks(MAX_IDS_PER_REQUEST) {
            let url = self.make_url(&path, Some(&chunk));
            let envelope = self
                .get_json::<ValidatorBalancesEnvelope>(&url)
                .await
                .with_context(|| format!("failed to fetch validator balances for slot {slot}"))?;

            match envelope {
                Some(envelope) => balances.extend(envelope.data),
                // A slot is stored whole or not at all.
                None => return Ok(vec![]),
            }
        }

        Ok(balances)
    }

    async fn is_finalized(&self, slot: Slot) -> Result<bool> {
        let checkpoint = self.get_last_finality_checkpoint().await?;
        // The checkpoint finalizes the state at the first slot of its epoch and all before it.
        let finalized = Slot::from_epoch(checkpoint.epoch)
            .map_or(false, |finalized_slot| slot <= finalized_slot);
        Ok(finalized)
    }
}

#[cfg(test)]
mod tests {
    use std::ops::Range;

    use mockito::Matcher;
    use serde_json::json;

    use super::*;
    use crate::units::GweiNewtype;

    fn id_list(indexes: Range<i32>) -> String {
        indexes
            .map(|index| index.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    fn make_beacon_node(server: &mockito::Server) -> BeaconNodeHttp {
        BeaconNodeHttp::new(&server.url(), Duration::from_secs(5), Duration::ZERO).unwrap()
    }

    #[tokio::test]
    async fn get_head_slot_test() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/eth/v1/beacon/headers/head")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "data": {
                        "root": "0xroot",
                        "canonical": true,
                        "header": {
                            "message": {
                                "slot": "8000000",
                                "proposer_index": "1",
                                "parent_root": "0xparent",
                                "state_root": "0xstate",
                                "body_root": "0xbody"
                            },
                            "signature": "0xsig"
                        }
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let beacon_node = make_beacon_node(&server);
        let head_slot = beacon_node.get_head_slot().await.unwrap();
        assert_eq!(head_slot, Slot(8_000_000));
    }

    async fn mock_finalized_epoch(server: &mut mockito::Server, epoch: u64) -> mockito::Mock {
        server
            .mock("GET", "/eth/v1/beacon/states/head/finality_checkpoints")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "data": {
                        "previous_justified": { "epoch": "9", "root": "0xa" },
                        "current_justified": { "epoch": "11", "root": "0xb" },
                        "finalized": { "epoch": epoch.to_string(), "root": "0xc" }
                    }
                })
                .to_string(),
            )
            .create_async()
            .await
    }

    #[tokio::test]
    async fn is_finalized_test() {
        let mut server = mockito::Server::new_async().await;
        let _mock = mock_finalized_epoch(&mut server, 10).await;

        let beacon_node = make_beacon_node(&server);
        assert!(beacon_node.is_finalized(Slot(319)).await.unwrap());
        assert!(beacon_node.is_finalized(Slot(320)).await.unwrap());
        assert!(!beacon_node.is_finalized(Slot(321)).await.unwrap());
    }

    #[tokio::test]
    async fn get_validator_balances_for_subset_test() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock(
                "GET",
                Matcher::Regex("^/eth/v1/beacon/states/500/validator_balances".to_string()),
            )
            .match_query(Matcher::UrlEncoded("id".to_string(), "7,9".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "execution_optimistic": false,
                    "finalized": true,
                    "data": [
                        { "index": "7", "balance": "32000000000" },
                        { "index": "9", "balance": "32000000001" }
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let beacon_node = make_beacon_node(&server);
        let balances = beacon_node
            .get_validator_balances(Slot(500), &ValidatorSelection::Indexes(vec![7, 9]))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(
            balances,
            vec![
                ValidatorBalance {
                    index: 7,
                    balance: GweiNewtype(32_000_000_000)
                },
                ValidatorBalance {
                    index: 9,
                    balance: GweiNewtype(32_000_000_001)
                },
            ]
        );
    }

    #[tokio::test]
    async fn get_validator_balances_not_found_test() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/eth/v1/beacon/states/900/validator_balances")
            .with_status(404)
            .with_body(json!({ "code": 404, "message": "NOT_FOUND: beacon state" }).to_string())
            .create_async()
            .await;

        let beacon_node = make_beacon_node(&server);
        let balances = beacon_node
            .get_validator_balances(Slot(900), &ValidatorSelection::All)
            .await
            .unwrap();

        assert!(balances.is_empty());
    }

    #[tokio::test]
    async fn get_validator_balances_server_error_test() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/eth/v1/beacon/states/900/validator_balances")
            .with_status(503)
            .create_async()
            .await;

        let beacon_node = make_beacon_node(&server);
        let result = beacon_node
            .get_validator_balances(Slot(900), &ValidatorSelection::All)
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn get_validator_balances_splits_long_id_lists_test() {
        let indexes: Vec<i32> = (0..300).collect();

        let mut server = mockito::Server::new_async().await;
        let first_mock = server
            .mock(
                "GET",
                Matcher::Regex("^/eth/v1/beacon/states/500/validator_balances".to_string()),
            )
            .match_query(Matcher::UrlEncoded("id".to_string(), id_list(0..250)))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({ "data": [{ "index": "0", "balance": "32000000000" }] }).to_string(),
            )
            .expect(1)
            .create_async()
            .await;
        let second_mock = server
            .mock(
                "GET",
                Matcher::Regex("^/eth/v1/beacon/states/500/validator_balances".to_string()),
            )
            .match_query(Matcher::UrlEncoded("id".to_string(), id_list(250..300)))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({ "data": [{ "index": "299", "balance": "31000000000" }] }).to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        let beacon_node = make_beacon_node(&server);
        let balances = beacon_node
            .get_validator_balances(Slot(500), &ValidatorSelection::Indexes(indexes))
            .await
            .unwrap();

        first_mock.assert_async().await;
        second_mock.assert_async().await;
        assert_eq!(
            balances,
            vec![
                ValidatorBalance {
                    index: 0,
                    balance: GweiNewtype(32_000_000_000)
                },
                ValidatorBalance {
                    index: 299,
                    balance: GweiNewtype(31_000_000_000)
                },
            ]
        );
    }

    #[tokio::test]
    async fn get_validator_balances_missing_chunk_test() {
        let indexes: Vec<i32> = (0..300).collect();

        let mut server = mockito::Server::new_async().await;
        let _first_mock = server
            .mock(
                "GET",
                Matcher::Regex("^/eth/v1/beacon/states/500/validator_balances".to_string()),
            )
            .match_query(Matcher::UrlEncoded("id".to_string(), id_list(0..250)))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({ "data": [{ "index": "0", "balance": "32000000000" }] }).to_string(),
            )
            .create_async()
            .await;
        let _second_mock = server
            .mock(
                "GET",
                Matcher::Regex("^/eth/v1/beacon/states/500/validator_balances".to_string()),
            )
            .match_query(Matcher::UrlEncoded("id".to_string(), id_list(250..300)))
            .with_status(404)
            .create_async()
            .await;

        let beacon_node = make_beacon_node(&server);
        let balances = beacon_node
            .get_validator_balances(Slot(500), &ValidatorSelection::Indexes(indexes))
            .await
            .unwrap();

        assert!(balances.is_empty());
    }

    #[tokio::test]
    async fn get_activation_slots_test() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock(
                "GET",
                Matcher::Regex("^/eth/v1/beacon/states/head/validators".to_string()),
            )
            .match_query(Matcher::UrlEncoded("id".to_string(), "3,7,9".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "data": [
                        {
                            "index": "3",
                            "balance": "32000000000",
                            "status": "active_ongoing",
                            "validator": { "activation_epoch": "28" }
                        },
                        {
                            "index": "7",
                            "balance": "32000000000",
                            "status": "pending_queued",
                            "validator": { "activation_epoch": "18446744073709551615" }
                        }
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let beacon_node = make_beacon_node(&server);
        let activations = beacon_node
            .get_activation_slots(&ValidatorSelection::Indexes(vec![3, 7, 9]))
            .await
            .unwrap();

        assert_eq!(activations.len(), 3);
        assert_eq!(activations[&3], Activation::Activated(Slot(896)));
        assert_eq!(activations[&7], Activation::NotYetActivated);
        assert_eq!(activations[&9], Activation::Unknown);
    }
}
