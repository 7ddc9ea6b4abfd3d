use primitives_proofs::RawCommitment;

use crate::{commd::piece_hash, piece::PaddedPieceSize, NODE_SIZE};

/// Computes the root of a binary merkle tree whose leaves are all zero nodes
/// and which spans `size` bytes.
///
/// Zero bytes are left untouched by Fr32 padding, so every level of the tree
/// is the hash of two copies of the level below, starting from an all-zero
/// leaf.
///
/// References:
/// * <https://github.com/filecoin-project/go-commp-utils/blob/master/zerocomm/zerocomm.go>
pub(crate) fn zero_piece_commitment(size: PaddedPieceSize) -> RawCommitment {
    let levels = size.trailing_zeros() - NODE_SIZE.trailing_zeros();

    let mut node = [0u8; NODE_SIZE];
    for _ in 0..levels {
        node = piece_hash(&node, &node);
    }
    node
}
