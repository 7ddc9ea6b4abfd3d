use cid::Cid;
use primitives_commitment::piece::PaddedPieceSize;
use primitives_proofs::{
    ActorId, ChainEpoch, RegisteredSealProof, SectorId, SectorNumber, SectorRef, Ticket,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::task::TaskId;

// The CID has some issues that require a workaround for strings.
// For more details, see: <https://github.com/multiformats/rust-cid/issues/162>

pub(crate) fn deserialize_string_to_cid<'de, D>(deserializer: D) -> Result<Cid, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    let cid = Cid::try_from(s.as_str()).map_err(|e| {
        serde::de::Error::custom(format!(
            "failed to parse CID, check that the input is a valid CID: {e:?}"
        ))
    })?;
    Ok(cid)
}

pub(crate) fn serialize_cid_to_string<S>(cid: &Cid, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(cid.to_string().as_str())
}

/// A piece declared for a sector, before any alignment padding is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PieceRecord {
    /// Position of the piece inside the sector, contiguous from 0.
    pub piece_index: u64,
    /// Piece commitment (CommP).
    #[serde(
        serialize_with = "serialize_cid_to_string",
        deserialize_with = "deserialize_string_to_cid"
    )]
    pub piece_cid: Cid,
    /// Padded piece size in bytes.
    pub piece_size: u64,
    /// Size of the data inside the piece, without any padding.
    pub data_raw_size: u64,
}

impl PieceRecord {
    /// Padded size of the piece, validated.
    pub fn padded_size(
        &self,
    ) -> Result<PaddedPieceSize, primitives_commitment::piece::PaddedPieceSizeError> {
        PaddedPieceSize::new(self.piece_size)
    }
}

/// Sealing state of a single sector, as tracked by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectorPipelineEntry {
    pub sp_id: ActorId,
    pub sector_number: SectorNumber,
    pub reg_seal_proof: RegisteredSealProof,

    /// Set once the SDR stage committed its results.
    pub after_sdr: bool,
    pub ticket_epoch: Option<ChainEpoch>,
    pub ticket_value: Option<Ticket>,

    /// Task currently working on the SDR stage of this sector, if any.
    pub task_id_sdr: Option<TaskId>,

    /// How many times the SDR stage was re-armed after a late failure.
    #[serde(default)]
    pub sdr_resets: u32,
}

impl SectorPipelineEntry {
    /// Creates an entry waiting for the SDR stage.
    pub fn new(
        sp_id: ActorId,
        sector_number: SectorNumber,
        reg_seal_proof: RegisteredSealProof,
    ) -> Self {
        Self {
            sp_id,
            sector_number,
            reg_seal_proof,
            after_sdr: false,
            ticket_epoch: None,
            ticket_value: None,
            task_id_sdr: None,
            sdr_resets: 0,
        }
    }

    pub fn sector_id(&self) -> SectorId {
        SectorId::new(self.sp_id, self.sector_number)
    }

    pub fn sector_ref(&self) -> SectorRef {
        SectorRef {
            id: self.sector_id(),
            proof_type: self.reg_seal_proof,
        }
    }

    /// Whether the SDR stage still has to run and nobody is working on it.
    pub fn needs_sdr(&self) -> bool {
        !self.after_sdr && self.task_id_sdr.is_none()
    }
}

/// Results of a successful SDR stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdrOutcome {
    pub ticket_epoch: ChainEpoch,
    pub ticket_value: Ticket,
}
