//! BSV Unified Merkle Path (BUMP) codec.
//!
//! Binary layout: block height (varint), tree height (u8), then for each
//! level a leaf count (varint) followed by leaves of
//! `offset (varint) | flags (u8) | hash (32 bytes, omitted when duplicate)`.
//! Hashes are kept in internal byte order; display order is reversed.

use crate::error::{Error, Result};
use crate::tx::{Reader, decode_txid, sha256d, write_varint};

const FLAG_DUPLICATE: u8 = 0x01;
const FLAG_TXID: u8 = 0x02;

/// Blocks deeper than this would need more transactions than can exist.
const MAX_TREE_HEIGHT: u8 = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathLeaf {
    pub offset: u64,
    /// Internal byte order; `None` for a duplicate of the working hash.
    pub hash: Option<[u8; 32]>,
    /// Marks the leaf as a transaction the path was built for.
    pub txid: bool,
}

impl PathLeaf {
    fn flags(&self) -> u8 {
        match (self.hash.is_none(), self.txid) {
            (true, _) => FLAG_DUPLICATE,
            (false, true) => FLAG_TXID,
            (false, false) => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerklePath {
    pub block_height: u64,
    /// `path[0]` is the leaf level; `path.len()` is the tree height.
    pub path: Vec<Vec<PathLeaf>>,
}

impl MerklePath {
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| Error::InvalidMerklePath(format!("bad hex: {e}")))?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Error::InvalidMerklePath("empty merkle path".into()));
        }
        let mut r = Reader::new(bytes);
        let block_height = r.varint().map_err(as_path_error)?;
        let tree_height = r.u8().map_err(as_path_error)?;
        if tree_height == 0 || tree_height > MAX_TREE_HEIGHT {
            return Err(Error::InvalidMerklePath(format!(
                "tree height {tree_height} out of range"
            )));
        }

        let mut path = Vec::with_capacity(tree_height as usize);
        for level in 0..tree_height {
            let count = r.varint().map_err(as_path_error)?;
            if count == 0 {
                return Err(Error::InvalidMerklePath(format!("level {level} is empty")));
            }
            let mut leaves = Vec::with_capacity(count.min(1024) as usize);
            for _ in 0..count {
                let offset = r.varint().map_err(as_path_error)?;
                let flags = r.u8().map_err(as_path_error)?;
                let hash = if flags & FLAG_DUPLICATE != 0 {
                    None
                } else {
                    let mut h = [0u8; 32];
                    h.copy_from_slice(r.take(32).map_err(as_path_error)?);
                    Some(h)
                };
                leaves.push(PathLeaf {
                    offset,
                    hash,
                    txid: flags & FLAG_TXID != 0,
                });
            }
            leaves.sort_by_key(|l| l.offset);
            path.push(leaves);
        }

        if r.remaining() != 0 {
            return Err(Error::InvalidMerklePath(format!(
                "{} trailing bytes",
                r.remaining()
            )));
        }
        Ok(Self { block_height, path })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_varint(&mut out, self.block_height);
        out.push(self.path.len() as u8);
        for level in &self.path {
            write_varint(&mut out, level.len() as u64);
            for leaf in level {
                write_varint(&mut out, leaf.offset);
                out.push(leaf.flags());
                if let Some(hash) = &leaf.hash {
                    out.extend_from_slice(hash);
                }
            }
        }
        out
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn contains(&self, txid: &str) -> bool {
        let Ok(hash) = internal_hash(txid) else {
            return false;
        };
        self.path
            .first()
            .is_some_and(|leaves| leaves.iter().any(|l| l.hash == Some(hash)))
    }

    /// Walk the path from `txid` up to the merkle root (display hex).
    pub fn compute_root(&self, txid: &str) -> Result<String> {
        let target = internal_hash(txid)?;
        let leaves = self
            .path
            .first()
            .ok_or_else(|| Error::InvalidMerklePath("no levels".into()))?;
        let start = leaves
            .iter()
            .find(|l| l.hash == Some(target))
            .ok_or_else(|| Error::InvalidMerklePath(format!("txid {txid} not in path")))?;

        let mut working = target;
        let mut offset = start.offset;
        for height in 0..self.path.len() {
            let sibling_offset = offset ^ 1;
            let sibling = match self.hash_at(height, sibling_offset)? {
                Some(hash) => hash,
                None => working,
            };
            working = if offset % 2 == 1 {
                hash_pair(&sibling, &working)
            } else {
                hash_pair(&working, &sibling)
            };
            offset >>= 1;
        }

        working.reverse();
        Ok(hex::encode(working))
    }

    /// Hash at `(height, offset)`; `Ok(None)` marks a duplicate. Nodes the
    /// path does not list directly are rebuilt from the level below.
    fn hash_at(&self, height: usize, offset: u64) -> Result<Option<[u8; 32]>> {
        if let Some(leaf) = self
            .path
            .get(height)
            .and_then(|leaves| leaves.iter().find(|l| l.offset == offset))
        {
            return Ok(leaf.hash);
        }
        if height == 0 {
            return Err(Error::InvalidMerklePath(format!(
                "missing leaf at offset {offset}"
            )));
        }
        let left_offset = offset
            .checked_mul(2)
            .ok_or_else(|| Error::InvalidMerklePath(format!("offset {offset} out of range")))?;
        let left = self.hash_at(height - 1, left_offset)?.ok_or_else(|| {
            Error::InvalidMerklePath(format!("duplicate left node at level {}", height - 1))
        })?;
        let right = self.hash_at(height - 1, left_offset | 1)?.unwrap_or(left);
        Ok(Some(hash_pair(&left, &right)))
    }
}

fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left);
    buf[32..].copy_from_slice(right);
    sha256d(&buf)
}

fn internal_hash(txid: &str) -> Result<[u8; 32]> {
    let mut hash = decode_txid(txid)?;
    hash.reverse();
    Ok(hash)
}

fn as_path_error(e: Error) -> Error {
    match e {
        Error::TxDecode(msg) => Error::InvalidMerklePath(msg),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn display(hash: [u8; 32]) -> String {
        let mut h = hash;
        h.reverse();
        hex::encode(h)
    }

    fn leaf(offset: u64, hash: [u8; 32], txid: bool) -> PathLeaf {
        PathLeaf {
            offset,
            hash: Some(hash),
            txid,
        }
    }

    #[test]
    fn two_leaf_root() {
        let a = [0x0a; 32];
        let b = [0x0b; 32];
        let bump = MerklePath {
            block_height: 812_345,
            path: vec![vec![leaf(0, a, true), leaf(1, b, false)]],
        };
        let root = bump.compute_root(&display(a)).unwrap();
        assert_eq!(root, display(hash_pair(&a, &b)));
        // proving b from the same path yields the same root
        assert_eq!(bump.compute_root(&display(b)).unwrap(), root);
    }

    #[test]
    fn odd_level_uses_duplicate() {
        let (a, b, c) = ([1u8; 32], [2u8; 32], [3u8; 32]);
        let ab = hash_pair(&a, &b);
        let cc = hash_pair(&c, &c);
        let expected = hash_pair(&ab, &cc);

        let bump = MerklePath {
            block_height: 10,
            path: vec![
                vec![
                    leaf(2, c, true),
                    PathLeaf {
                        offset: 3,
                        hash: None,
                        txid: false,
                    },
                ],
                vec![leaf(0, ab, false)],
            ],
        };
        assert_eq!(bump.compute_root(&display(c)).unwrap(), display(expected));

        let decoded = MerklePath::from_hex(&bump.to_hex()).unwrap();
        assert_eq!(decoded, bump);
    }

    #[test]
    fn oversized_offset_is_rejected() {
        let bump = MerklePath {
            block_height: 1,
            path: vec![vec![leaf(0, [1; 32], true)], vec![leaf(0, [2; 32], false)]],
        };
        assert!(matches!(
            bump.hash_at(1, u64::MAX),
            Err(Error::InvalidMerklePath(_))
        ));
    }

    #[test]
    fn contains_only_leaf_level_hashes() {
        let a = [0x0a; 32];
        let b = [0x0b; 32];
        let bump = MerklePath {
            block_height: 1,
            path: vec![vec![leaf(0, a, true), leaf(1, b, false)]],
        };
        assert!(bump.contains(&display(a)));
        assert!(!bump.contains(&display([0x0c; 32])));
        assert!(!bump.contains("not-hex"));
        assert!(bump.compute_root(&display([0x0c; 32])).is_err());
    }

    #[test]
    fn malformed_input_rejected() {
        assert!(MerklePath::from_hex("").is_err());
        assert!(MerklePath::from_hex("zz").is_err());
        // height 1, tree height 0
        assert!(MerklePath::from_hex("0100").is_err());
        // one level with zero leaves
        assert!(MerklePath::from_hex("010100").is_err());

        let good = MerklePath {
            block_height: 1,
            path: vec![vec![leaf(0, [9; 32], true)]],
        }
        .to_hex();
        assert!(MerklePath::from_hex(&format!("{good}00")).is_err());
        assert!(MerklePath::from_hex(&good[..good.len() - 2]).is_err());
    }
}
