//! Beacon REST API client

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use tracing::debug;

use stakecraft_core::{
    AttestationInfo, BeaconBlock, BeaconConfig, BeaconHead, Committee, ValidatorPubkey,
    ValidatorStatus, B256,
};

use crate::{BeaconClient, BeaconError, Result};

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpBeaconConfig {
    /// Base URL of the beacon node, e.g. `http://localhost:5052`
    pub url: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for HttpBeaconConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:5052".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Beacon node client speaking the standard REST API
pub struct HttpBeaconClient {
    config: HttpBeaconConfig,
    http: reqwest::Client,
}

impl HttpBeaconClient {
    pub fn new(config: HttpBeaconConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { config, http })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.url.trim_end_matches('/'), path)
    }

    /// GET a `{"data": ...}` envelope. 404 maps to `None`.
    async fn get_data<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let url = self.url(path);
        debug!("GET {}", url);
        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BeaconError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let envelope: DataEnvelope<T> = response
            .json()
            .await
            .map_err(|e| BeaconError::InvalidResponse(format!("{}: {}", path, e)))?;
        Ok(Some(envelope.data))
    }

    async fn require_data<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.get_data(path)
            .await?
            .ok_or_else(|| BeaconError::Unavailable(path.to_string()))
    }

    async fn spec(&self) -> Result<SpecResponse> {
        let spec: SpecResponse = self.require_data("/eth/v1/config/spec").await?;
        spec.checked()
    }
}

#[async_trait]
impl BeaconClient for HttpBeaconClient {
    async fn eth2_config(&self) -> Result<BeaconConfig> {
        let genesis: GenesisResponse = self.require_data("/eth/v1/beacon/genesis").await?;
        let spec = self.spec().await?;
        Ok(BeaconConfig {
            genesis_time: genesis.genesis_time,
            seconds_per_slot: spec.seconds_per_slot,
            slots_per_epoch: spec.slots_per_epoch,
        })
    }

    async fn head(&self) -> Result<BeaconHead> {
        let header: HeaderResponse = self.require_data("/eth/v1/beacon/headers/head").await?;
        let finality: FinalityResponse = self
            .require_data("/eth/v1/beacon/states/head/finality_checkpoints")
            .await?;
        let spec = self.spec().await?;
        let slot = header.header.message.slot;
        Ok(BeaconHead {
            slot,
            epoch: slot / spec.slots_per_epoch,
            finalized_epoch: finality.finalized.epoch,
        })
    }

    async fn beacon_block(&self, slot: u64) -> Result<Option<BeaconBlock>> {
        let block: Option<SignedBlockResponse> =
            self.get_data(&format!("/eth/v2/beacon/blocks/{}", slot)).await?;
        Ok(block.map(|b| BeaconBlock {
            slot: b.message.slot,
            execution_block_number: b
                .message
                .body
                .execution_payload
                .map(|p| p.block_number)
                .unwrap_or(0),
        }))
    }

    async fn committees(&self, epoch: u64) -> Result<Vec<Committee>> {
        let spec = self.spec().await?;
        let state_slot = epoch * spec.slots_per_epoch;
        let raw: Vec<CommitteeResponse> = self
            .require_data(&format!(
                "/eth/v1/beacon/states/{}/committees?epoch={}",
                state_slot, epoch
            ))
            .await?;
        raw.into_iter()
            .map(|c| {
                let validators = c
                    .validators
                    .iter()
                    .map(|v| parse_u64(v))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Committee {
                    slot: c.slot,
                    index: c.index,
                    validators,
                })
            })
            .collect()
    }

    async fn attestations(&self, slot: u64) -> Result<Option<Vec<AttestationInfo>>> {
        let block: Option<SignedBlockResponse> =
            self.get_data(&format!("/eth/v2/beacon/blocks/{}", slot)).await?;
        let Some(block) = block else {
            return Ok(None);
        };
        block
            .message
            .body
            .attestations
            .into_iter()
            .map(|a| {
                let bits = hex::decode(a.aggregation_bits.trim_start_matches("0x"))
                    .map_err(|e| BeaconError::InvalidResponse(format!("aggregation bits: {}", e)))?;
                Ok(AttestationInfo {
                    slot: a.data.slot,
                    committee_index: a.data.index,
                    aggregation_bits: bits,
                })
            })
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }

    async fn validator_statuses(
        &self,
        slot: u64,
        pubkeys: &[ValidatorPubkey],
    ) -> Result<HashMap<ValidatorPubkey, ValidatorStatus>> {
        let mut statuses = HashMap::with_capacity(pubkeys.len());
        // Beacon nodes cap the id list length per request
        for chunk in pubkeys.chunks(500) {
            let ids: Vec<String> = chunk.iter().map(|p| p.to_string()).collect();
            let url = self.url(&format!("/eth/v1/beacon/states/{}/validators", slot));
            debug!("POST {} ({} ids)", url, ids.len());
            let response = self
                .http
                .post(&url)
                .json(&serde_json::json!({ "ids": ids }))
                .send()
                .await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(BeaconError::Status {
                    status: status.as_u16(),
                    body,
                });
            }
            let envelope: DataEnvelope<Vec<ValidatorResponse>> = response
                .json()
                .await
                .map_err(|e| BeaconError::InvalidResponse(format!("validators: {}", e)))?;
            for v in envelope.data {
                statuses.insert(
                    v.validator.pubkey,
                    ValidatorStatus {
                        index: v.index,
                        pubkey: v.validator.pubkey,
                        activation_epoch: v.validator.activation_epoch,
                        exit_epoch: v.validator.exit_epoch,
                        effective_balance: v.validator.effective_balance,
                        balance: v.balance,
                        withdrawal_credentials: v.validator.withdrawal_credentials,
                    },
                );
            }
        }
        Ok(statuses)
    }
}

// ===== Wire types =====

#[derive(Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct GenesisResponse {
    #[serde(deserialize_with = "de_u64")]
    genesis_time: u64,
}

#[derive(Deserialize)]
struct SpecResponse {
    #[serde(rename = "SECONDS_PER_SLOT", deserialize_with = "de_u64")]
    seconds_per_slot: u64,
    #[serde(rename = "SLOTS_PER_EPOCH", deserialize_with = "de_u64")]
    slots_per_epoch: u64,
}

impl SpecResponse {
    fn checked(self) -> Result<Self> {
        if self.slots_per_epoch == 0 || self.seconds_per_slot == 0 {
            return Err(BeaconError::InvalidResponse(format!(
                "/eth/v1/config/spec: zero timing constant (SLOTS_PER_EPOCH {}, SECONDS_PER_SLOT {})",
                self.slots_per_epoch, self.seconds_per_slot
            )));
        }
        Ok(self)
    }
}

#[derive(Deserialize)]
struct HeaderResponse {
    header: SignedHeader,
}

#[derive(Deserialize)]
struct SignedHeader {
    message: HeaderMessage,
}

#[derive(Deserialize)]
struct HeaderMessage {
    #[serde(deserialize_with = "de_u64")]
    slot: u64,
}

#[derive(Deserialize)]
struct FinalityResponse {
    finalized: Checkpoint,
}

#[derive(Deserialize)]
struct Checkpoint {
    #[serde(deserialize_with = "de_u64")]
    epoch: u64,
}

#[derive(Deserialize)]
struct SignedBlockResponse {
    message: BlockMessage,
}

#[derive(Deserialize)]
struct BlockMessage {
    #[serde(deserialize_with = "de_u64")]
    slot: u64,
    body: BlockBody,
}

#[derive(Deserialize)]
struct BlockBody {
    #[serde(default)]
    attestations: Vec<AttestationResponse>,
    #[serde(default)]
    execution_payload: Option<ExecutionPayload>,
}

#[derive(Deserialize)]
struct ExecutionPayload {
    #[serde(deserialize_with = "de_u64")]
    block_number: u64,
}

#[derive(Deserialize)]
struct AttestationResponse {
    aggregation_bits: String,
    data: AttestationData,
}

#[derive(Deserialize)]
struct AttestationData {
    #[serde(deserialize_with = "de_u64")]
    slot: u64,
    #[serde(deserialize_with = "de_u64")]
    index: u64,
}

#[derive(Deserialize)]
struct CommitteeResponse {
    #[serde(deserialize_with = "de_u64")]
    index: u64,
    #[serde(deserialize_with = "de_u64")]
    slot: u64,
    validators: Vec<String>,
}

#[derive(Deserialize)]
struct ValidatorResponse {
    #[serde(deserialize_with = "de_u64")]
    index: u64,
    #[serde(deserialize_with = "de_u64")]
    balance: u64,
    validator: ValidatorInner,
}

#[derive(Deserialize)]
struct ValidatorInner {
    pubkey: ValidatorPubkey,
    withdrawal_credentials: B256,
    #[serde(deserialize_with = "de_u64")]
    effective_balance: u64,
    #[serde(deserialize_with = "de_u64")]
    activation_epoch: u64,
    #[serde(deserialize_with = "de_u64")]
    exit_epoch: u64,
}

fn parse_u64(s: &str) -> Result<u64> {
    s.parse()
        .map_err(|_| BeaconError::InvalidResponse(format!("expected integer, got '{}'", s)))
}

/// The Beacon API quotes every integer
fn de_u64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u64, D::Error> {
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}
