use crate::error::{LedgerError, Result};
use crate::utils::sha256_digest;

/// Merkle root over an ordered list of transaction ids.
///
/// Adjacent hashes are paired and hashed; a level with an odd count pairs its
/// last hash with itself. At least one pairing round always runs, so a single
/// id yields `SHA256(id ‖ id)` rather than the id itself.
pub fn merkle_root(hashes: &[Vec<u8>]) -> Result<Vec<u8>> {
    if hashes.is_empty() {
        return Err(LedgerError::InvalidBlock(
            "Cannot build Merkle root from empty hash list".to_string(),
        ));
    }

    let mut level = next_level(hashes);
    while level.len() > 1 {
        level = next_level(&level);
    }
    Ok(level.swap_remove(0))
}

fn next_level(level: &[Vec<u8>]) -> Vec<Vec<u8>> {
    level
        .chunks(2)
        .map(|pair| match pair {
            [left, right] => hash_pair(left, right),
            [single] => hash_pair(single, single),
            _ => unreachable!("chunks(2) yields one or two items"),
        })
        .collect()
}

fn hash_pair(left: &[u8], right: &[u8]) -> Vec<u8> {
    let mut combined = Vec::with_capacity(left.len() + right.len());
    combined.extend_from_slice(left);
    combined.extend_from_slice(right);
    sha256_digest(&combined)
}
