//! Chain state queries needed by the sealing pipeline.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use cid::Cid;
use jsonrpsee::{
    core::{client::ClientT, ClientError},
    http_client::{HttpClient, HttpClientBuilder},
    rpc_params,
};
use primitives_proofs::{AddressError, ChainEpoch, DomainSeparationTag};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::types::{deserialize_string_to_cid, serialize_cid_to_string};

const CHAIN_HEAD: &str = "Filecoin.ChainHead";
const STATE_GET_RANDOMNESS_FROM_TICKETS: &str = "Filecoin.StateGetRandomnessFromTickets";

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error(transparent)]
    Rpc(#[from] ClientError),

    #[error("randomness is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("expected 32 bytes of randomness, got {0}")]
    InvalidRandomnessLength(usize),

    #[error(transparent)]
    Address(#[from] AddressError),
}

/// Block CID in the Lotus JSON format, `{"/": "bafy..."}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockCid {
    #[serde(
        rename = "/",
        serialize_with = "serialize_cid_to_string",
        deserialize_with = "deserialize_string_to_cid"
    )]
    cid: Cid,
}

impl From<Cid> for BlockCid {
    fn from(cid: Cid) -> Self {
        Self { cid }
    }
}

/// Set of blocks identifying a tipset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TipsetKey(Vec<BlockCid>);

impl TipsetKey {
    pub fn new(cids: impl IntoIterator<Item = Cid>) -> Self {
        Self(cids.into_iter().map(BlockCid::from).collect())
    }

    pub fn cids(&self) -> impl Iterator<Item = &Cid> {
        self.0.iter().map(|block| &block.cid)
    }
}

/// The parts of a tipset the pipeline cares about.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Tipset {
    #[serde(rename = "Cids")]
    pub key: TipsetKey,
    pub height: ChainEpoch,
}

#[async_trait]
pub trait ChainApi: Send + Sync {
    /// Returns the heaviest tipset known to the node.
    async fn chain_head(&self) -> Result<Tipset, ChainError>;

    /// Draws randomness from the tickets of the chain identified by
    /// `tipset_key`, at `epoch`.
    async fn randomness_from_tickets(
        &self,
        tag: DomainSeparationTag,
        epoch: ChainEpoch,
        entropy: &[u8],
        tipset_key: &TipsetKey,
    ) -> Result<Vec<u8>, ChainError>;
}

/// Client of a Lotus compatible full node JSON-RPC API.
pub struct LotusChainClient {
    client: HttpClient,
}

impl LotusChainClient {
    pub fn new(url: &Url) -> Result<Self, ChainError> {
        Ok(Self {
            client: HttpClientBuilder::default().build(url)?,
        })
    }
}

#[async_trait]
impl ChainApi for LotusChainClient {
    async fn chain_head(&self) -> Result<Tipset, ChainError> {
        let tipset: Tipset = self.client.request(CHAIN_HEAD, rpc_params![]).await?;
        tracing::debug!(height = tipset.height, "fetched chain head");
        Ok(tipset)
    }

    async fn randomness_from_tickets(
        &self,
        tag: DomainSeparationTag,
        epoch: ChainEpoch,
        entropy: &[u8],
        tipset_key: &TipsetKey,
    ) -> Result<Vec<u8>, ChainError> {
        let randomness: String = self
            .client
            .request(
                STATE_GET_RANDOMNESS_FROM_TICKETS,
                rpc_params![tag.value(), epoch, BASE64.encode(entropy), tipset_key],
            )
            .await?;

        Ok(BASE64.decode(randomness)?)
    }
}
