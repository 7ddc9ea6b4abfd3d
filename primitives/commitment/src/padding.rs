//! Zero filler pieces used to align pieces inside a sector and to fill the
//! space left after the last piece.
//!
//! Both functions decompose the space to fill into its binary representation
//! and emit the blocks from the smallest to the largest. Placing the smallest
//! block first keeps every following block aligned to its own size, which is
//! what the merkle tree reduction of the data commitment expects.
//!
//! References:
//! * <https://github.com/filecoin-project/lotus/blob/471819bf1ef8a4d5c7c0476a38ce9f5e23c59bfc/lib/filler/filler.go#L9>
//! * <https://github.com/filecoin-project/rust-fil-proofs/blob/266acc39a3ebd6f3d28c6ee335d78e2b7cea06bc/filecoin-proofs/src/constants.rs#L164>
//! * <https://github.com/filecoin-project/go-commp-utils/blob/master/zerocomm/zerocomm.go>

use crate::piece::{PaddedPieceSize, PaddedPieceSizeError, UnpaddedPieceSize};

/// Returns the filler pieces needed to move a sector offset of `old_length`
/// padded bytes to the next multiple of `new_piece_length`, along with their
/// total padded length.
pub fn required_padding(
    old_length: u64,
    new_piece_length: PaddedPieceSize,
) -> Result<(Vec<PaddedPieceSize>, u64), PaddedPieceSizeError> {
    let mut to_fill = old_length.wrapping_neg() % *new_piece_length;

    let pieces = to_fill.count_ones() as usize;
    let mut pad_pieces = Vec::with_capacity(pieces);
    let mut sum = 0;
    for _ in 0..pieces {
        let next = to_fill.trailing_zeros();
        let psize = 1u64 << next;

        to_fill ^= psize;

        pad_pieces.push(PaddedPieceSize::new(psize)?);
        sum += psize;
    }

    Ok((pad_pieces, sum))
}

/// Splits the unpadded space remaining in a sector into filler pieces.
///
/// Fails when the remaining space can't be expressed exactly with valid piece
/// sizes, e.g. when it isn't a sum of `127 * 2^n` chunks.
pub fn fillers_from_remainder(
    remaining_space: u64,
) -> Result<Vec<UnpaddedPieceSize>, PaddedPieceSizeError> {
    // Convert to in-sector bytes for easier math
    let mut padded = remaining_space + remaining_space / 127;

    let pieces = padded.count_ones() as usize;
    let mut unpadded_piece_sizes = Vec::with_capacity(pieces);
    for _ in 0..pieces {
        let next = padded.trailing_zeros();
        let psize = 1u64 << next;

        padded ^= psize;

        unpadded_piece_sizes.push(PaddedPieceSize::new(psize)?.unpadded());
    }

    Ok(unpadded_piece_sizes)
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::*;

    fn unpadded(sizes: &[UnpaddedPieceSize]) -> Vec<u64> {
        sizes.iter().map(|size| **size).collect()
    }

    #[test]
    fn sanity() {
        let smallest_piece_size = 127;
        let biggest_unpadded_piece_size = 1016;
        assert_eq!(
            vec![127, 254, 508, 1016],
            unpadded(&fillers_from_remainder(2032 - smallest_piece_size).unwrap())
        );
        assert_eq!(
            vec![1016],
            unpadded(&fillers_from_remainder(2032 - biggest_unpadded_piece_size).unwrap())
        );
    }

    #[test]
    fn nothing_remaining() {
        assert!(fillers_from_remainder(0).unwrap().is_empty());
    }

    #[rstest]
    #[case(1)]
    #[case(126)]
    #[case(200)]
    fn unrepresentable_remainder(#[case] remaining: u64) {
        assert_eq!(
            fillers_from_remainder(remaining),
            Err(PaddedPieceSizeError::SizeTooSmall)
        );
    }

    #[rstest]
    // Already aligned
    #[case(0, 1024, vec![], 0)]
    #[case(1024, 1024, vec![], 0)]
    #[case(2048, 512, vec![], 0)]
    // Smallest pieces first
    #[case(128, 1024, vec![128, 256, 512], 896)]
    #[case(512, 1024, vec![512], 512)]
    #[case(1536, 2048, vec![512], 512)]
    fn alignment_padding(
        #[case] offset: u64,
        #[case] piece: u64,
        #[case] expected: Vec<u64>,
        #[case] expected_sum: u64,
    ) {
        let (pads, sum) = required_padding(offset, PaddedPieceSize::new(piece).unwrap()).unwrap();
        assert_eq!(pads.iter().map(|p| **p).collect::<Vec<_>>(), expected);
        assert_eq!(sum, expected_sum);
    }

    #[test]
    fn unaligned_offset_is_rejected() {
        // 64 bytes can't be expressed as a piece
        assert_eq!(
            required_padding(64, PaddedPieceSize::new(256).unwrap()),
            Err(PaddedPieceSizeError::SizeTooSmall)
        );
    }
}
