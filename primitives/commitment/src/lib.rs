pub mod commd;
pub mod padding;
pub mod piece;
mod zero;

use core::{fmt::Display, str::FromStr};

use cid::{multihash::Multihash, Cid};
use primitives_proofs::{RawCommitment, RegisteredSealProof};

use crate::piece::{PaddedPieceSize, PaddedPieceSizeError};

/// Merkle tree node size in bytes.
pub const NODE_SIZE: usize = 32;

/// Filecoin piece or sector data commitment merkle node/root (CommP & CommD)
///
/// https://github.com/multiformats/multicodec/blob/badcfe56bb7e0bbb06b60d57565186cd6be1f932/table.csv#L554
pub const FIL_COMMITMENT_UNSEALED: u64 = 0xf101;

/// Filecoin sector data commitment merkle node/root - sealed and replicated
/// (CommR)
///
/// https://github.com/multiformats/multicodec/blob/badcfe56bb7e0bbb06b60d57565186cd6be1f932/table.csv#L555
pub const FIL_COMMITMENT_SEALED: u64 = 0xf102;

/// SHA2-256 with the two most significant bits from the last byte zeroed (as
/// via a mask with 0b00111111) - used for proving trees as in Filecoin.
///
/// https://github.com/multiformats/multicodec/blob/badcfe56bb7e0bbb06b60d57565186cd6be1f932/table.csv#L153
pub const SHA2_256_TRUNC254_PADDED: u64 = 0x1012;

/// Poseidon using BLS12-381 and arity of 2 with Filecoin parameters
///
/// https://github.com/multiformats/multicodec/blob/badcfe56bb7e0bbb06b60d57565186cd6be1f932/table.csv#L537
pub const POSEIDON_BLS12_381_A1_FC1: u64 = 0xb401;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub enum CommitmentKind {
    // CommP - Piece commitment
    Piece,
    // CommD - Data commitment
    Data,
    // CommR - Replica commitment
    Replica,
}

impl CommitmentKind {
    /// Returns the [Multicodec](https://github.com/multiformats/multicodec/blob/master/table.csv) code for the commitment kind.
    fn multicodec(&self) -> u64 {
        match self {
            CommitmentKind::Piece | CommitmentKind::Data => FIL_COMMITMENT_UNSEALED,
            CommitmentKind::Replica => FIL_COMMITMENT_SEALED,
        }
    }

    /// Returns the [Multihash](https://github.com/multiformats/multicodec/blob/master/table.csv) code for the commitment kind.
    fn multihash(&self) -> u64 {
        match self {
            CommitmentKind::Piece | CommitmentKind::Data => SHA2_256_TRUNC254_PADDED,
            CommitmentKind::Replica => POSEIDON_BLS12_381_A1_FC1,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CommitmentError {
    #[error("bytes not a valid cid")]
    InvalidCid,
    #[error("invalid multicodec {0:#x} for {1:?} commitment")]
    InvalidMulticodec(u64, CommitmentKind),
    #[error("invalid multihash {0:#x} for {1:?} commitment")]
    InvalidMultihash(u64, CommitmentKind),
    #[error("commitment digest must be 32 bytes long, got {0}")]
    InvalidDigestLength(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub struct Commitment {
    commitment: RawCommitment,
    kind: CommitmentKind,
}

impl Commitment {
    pub fn new(commitment: RawCommitment, kind: CommitmentKind) -> Self {
        Self { commitment, kind }
    }

    /// Creates a new `Commitment` from bytes. Returns an error if the bytes
    /// passed do not represent a valid commitment.
    pub fn from_bytes(bytes: &[u8], kind: CommitmentKind) -> Result<Self, CommitmentError> {
        let cid = Cid::try_from(bytes).map_err(|_| CommitmentError::InvalidCid)?;
        Self::from_cid(&cid, kind)
    }

    /// Creates a new `Commitment` from a CID. Returns an error if the CID
    /// passed does not represent a commitment kind.
    pub fn from_cid(cid: &Cid, kind: CommitmentKind) -> Result<Self, CommitmentError> {
        let multicodec = cid.codec();
        let multihash = cid.hash().code();

        if multicodec != kind.multicodec() {
            return Err(CommitmentError::InvalidMulticodec(multicodec, kind));
        }

        if multihash != kind.multihash() {
            return Err(CommitmentError::InvalidMultihash(multihash, kind));
        }

        let digest = cid.hash().digest();
        let commitment = RawCommitment::try_from(digest)
            .map_err(|_| CommitmentError::InvalidDigestLength(digest.len()))?;

        Ok(Self { commitment, kind })
    }

    /// Parses a piece commitment from its string CID representation
    /// (e.g. `baga6ea4seaq...`).
    pub fn piece_from_str(s: &str) -> Result<Self, CommitmentError> {
        let cid = Cid::from_str(s).map_err(|_| CommitmentError::InvalidCid)?;
        Self::from_cid(&cid, CommitmentKind::Piece)
    }

    /// Returns the raw commitment bytes.
    pub fn raw(&self) -> RawCommitment {
        self.commitment
    }

    pub fn kind(&self) -> CommitmentKind {
        self.kind
    }

    /// Converts the commitment to a CID.
    pub fn cid(&self) -> Cid {
        let multihash = self.kind.multihash();
        let multicodec = self.kind.multicodec();
        let hash = Multihash::wrap(multihash, &self.commitment)
            .expect("multihash is large enough so it can wrap the commitment");
        Cid::new_v1(multicodec, hash)
    }
}

impl Display for Commitment {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.cid())
    }
}

/// Returns a zero-piece commitment for a given piece size.
pub fn zero_piece_commitment(size: PaddedPieceSize) -> Commitment {
    Commitment {
        commitment: zero::zero_piece_commitment(size),
        kind: CommitmentKind::Piece,
    }
}

/// Return a zero data commitment for specific seal proof.
pub fn zero_data_commitment(
    seal_proof: RegisteredSealProof,
) -> Result<Commitment, PaddedPieceSizeError> {
    let size = PaddedPieceSize::new(seal_proof.sector_size().bytes())?;

    Ok(Commitment {
        // The data commitment of an empty sector is the zero piece commitment
        // spanning the whole sector.
        commitment: zero::zero_piece_commitment(size),
        kind: CommitmentKind::Data,
    })
}
