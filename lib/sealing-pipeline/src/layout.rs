//! Placement of the declared pieces inside a sector and computation of the
//! resulting data commitment (CommD).
//!
//! Every piece is placed at an offset that is a multiple of its own padded
//! size. The gaps created by the alignment, and the space left after the last
//! piece, are filled with zero pieces. The resulting sequence always covers the
//! whole sector.

use primitives_commitment::{
    commd::{compute_unsealed_sector_commitment, CommDError},
    padding::{fillers_from_remainder, required_padding},
    piece::{PaddedPieceSize, PaddedPieceSizeError, PieceInfo},
    zero_data_commitment, zero_piece_commitment, Commitment, CommitmentError, CommitmentKind,
};
use primitives_proofs::{RegisteredSealProof, SectorSize};

use crate::types::PieceRecord;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("found piece index {found}, expected {expected}")]
    NonContiguousIndex { expected: u64, found: u64 },

    #[error("piece {index} has an invalid size: {source}")]
    InvalidPieceSize {
        index: u64,
        source: PaddedPieceSizeError,
    },

    #[error("piece {index} has an invalid commitment: {source}")]
    InvalidCommitment { index: u64, source: CommitmentError },

    #[error("piece {index} declares {raw_size} bytes of data, it can hold 1 to {capacity} bytes")]
    InvalidRawSize {
        index: u64,
        raw_size: u64,
        capacity: u64,
    },

    #[error("pieces take {used} bytes, more than the sector capacity of {capacity} bytes")]
    Overflow { used: u64, capacity: u64 },

    #[error(transparent)]
    Padding(#[from] PaddedPieceSizeError),

    #[error("remaining {0} bytes can't be filled with zero pieces")]
    Remainder(u64),

    #[error(transparent)]
    CommD(#[from] CommDError),
}

/// Lays out `pieces` in a sector of `sector_size`, returning the padded
/// sequence of pieces covering the whole sector.
///
/// The pieces must be sorted by their index, starting at 0. Each piece takes
/// its full padded size in the sector, regardless of how much data it holds.
pub fn layout_pieces(
    pieces: &[PieceRecord],
    sector_size: SectorSize,
) -> Result<Vec<PieceInfo>, LayoutError> {
    let capacity = PaddedPieceSize::new(sector_size.bytes())?;

    let mut piece_infos = Vec::with_capacity(pieces.len());
    // Padded bytes already taken in the sector
    let mut offset = 0u64;

    for (expected, piece) in (0u64..).zip(pieces) {
        if piece.piece_index != expected {
            return Err(LayoutError::NonContiguousIndex {
                expected,
                found: piece.piece_index,
            });
        }

        let size = piece
            .padded_size()
            .map_err(|source| LayoutError::InvalidPieceSize {
                index: piece.piece_index,
                source,
            })?;

        let unpadded_capacity = *size.unpadded();
        if piece.data_raw_size == 0 || piece.data_raw_size > unpadded_capacity {
            return Err(LayoutError::InvalidRawSize {
                index: piece.piece_index,
                raw_size: piece.data_raw_size,
                capacity: unpadded_capacity,
            });
        }

        let commitment = Commitment::from_cid(&piece.piece_cid, CommitmentKind::Piece).map_err(
            |source| LayoutError::InvalidCommitment {
                index: piece.piece_index,
                source,
            },
        )?;

        // A piece larger than the sector never fits, reject it before the
        // alignment math gets a chance to wrap
        if *size > *capacity {
            return Err(LayoutError::Overflow {
                used: offset.saturating_add(*size),
                capacity: *capacity,
            });
        }

        let (pads, pad_length) = required_padding(offset, size)?;
        let used = offset
            .checked_add(pad_length)
            .and_then(|aligned| aligned.checked_add(*size))
            .unwrap_or(u64::MAX);
        if used > *capacity {
            return Err(LayoutError::Overflow {
                used,
                capacity: *capacity,
            });
        }

        piece_infos.extend(pads.into_iter().map(|pad| PieceInfo {
            commitment: zero_piece_commitment(pad),
            size: pad,
        }));
        piece_infos.push(PieceInfo { commitment, size });
        offset = used;
    }

    // Offset is aligned to 128 bytes, so the remaining space always is a sum
    // of valid unpadded piece sizes.
    let remaining = (*capacity - offset) / 128 * 127;
    let fillers = fillers_from_remainder(remaining).map_err(|_| LayoutError::Remainder(remaining))?;
    piece_infos.extend(fillers.into_iter().map(|filler| {
        let size = filler.padded();
        PieceInfo {
            commitment: zero_piece_commitment(size),
            size,
        }
    }));

    Ok(piece_infos)
}

/// Computes the data commitment (CommD) of a sector holding `pieces`.
///
/// A sector without pieces has the well-known zero commitment.
pub fn compute_commitment(
    pieces: &[PieceRecord],
    seal_proof: RegisteredSealProof,
) -> Result<Commitment, LayoutError> {
    if pieces.is_empty() {
        return Ok(zero_data_commitment(seal_proof)?);
    }

    let piece_infos = layout_pieces(pieces, seal_proof.sector_size())?;
    tracing::debug!(pieces = pieces.len(), padded = piece_infos.len(), "sector laid out");

    Ok(compute_unsealed_sector_commitment(seal_proof, &piece_infos)?)
}
