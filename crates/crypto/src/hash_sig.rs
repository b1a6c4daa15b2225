//! Hash-Based One-Time Signatures
//!
//! A key pair is a Merkle tree of height `h` whose `2^h` leaves are Lamport
//! one-time public keys derived from a single 32-byte seed. The tree root is
//! the public key. Each signature consumes exactly one leaf:
//!
//! - The message digest binds the leaf index and the message
//! - For every digest bit the signer reveals one Lamport preimage and
//!   ships the public half of the other
//! - The authentication path lets the verifier climb from the rebuilt
//!   leaf to the root
//!
//! Verification only needs the public key. A tampered message, a foreign key,
//! or a signature replayed under a different leaf index fails to reproduce
//! the root.
//!
//! # Capacity
//!
//! The signer's index strictly increases. Once it reaches `2^h` the key is
//! exhausted and must be replaced.

use blake3::Hasher;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use zeroize::Zeroize;

/// A BLAKE3 output.
pub type HashBytes = [u8; 32];

/// Tree height used when none is configured.
pub const DEFAULT_TREE_HEIGHT: u32 = 10;

/// Largest supported tree height. Key generation is linear in `2^h`.
pub const MAX_TREE_HEIGHT: u32 = 20;

const DIGEST_BITS: usize = 256;

// Domain separation tags
const TAG_SECRET: &[u8] = b"voltmesh.ots.secret";
const TAG_PUBLIC_HALF: u8 = 0x01;
const TAG_LEAF: u8 = 0x02;
const TAG_NODE: u8 = 0x03;
const TAG_MESSAGE: u8 = 0x04;

/// Errors that can occur during key generation and signing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Signing key exhausted: all {capacity} one-time leaves used")]
    KeyExhausted { capacity: u64 },

    #[error("Invalid tree height {height} (must be 1..={max})")]
    InvalidTreeHeight { height: u32, max: u32 },
}

pub type Result<T> = std::result::Result<T, SignatureError>;

/// Public key: the Merkle root over all one-time leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey {
    pub root: HashBytes,
    pub tree_height: u32,
}

impl PublicKey {
    /// Number of signatures the matching private key can produce.
    ///
    /// Saturates for heights no scheme accepts.
    pub fn capacity(&self) -> u64 {
        1u64.checked_shl(self.tree_height).unwrap_or(u64::MAX)
    }

    /// Hex-encoded root.
    pub fn to_hex(&self) -> String {
        hex::encode(self.root)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/h{}", self.to_hex(), self.tree_height)
    }
}

/// Private signing state: the seed, the next unused leaf, and the cached tree.
pub struct PrivateKey {
    seed: HashBytes,
    index: u64,
    tree_height: u32,
    /// `levels[0]` are the leaves, the last level holds the root.
    levels: Vec<Vec<HashBytes>>,
}

impl PrivateKey {
    /// Next one-time index to be consumed.
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn tree_height(&self) -> u32 {
        self.tree_height
    }

    pub fn capacity(&self) -> u64 {
        1u64 << self.tree_height
    }

    /// Signatures still available before re-keying is required.
    pub fn remaining(&self) -> u64 {
        self.capacity().saturating_sub(self.index)
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    fn root(&self) -> HashBytes {
        self.levels
            .last()
            .and_then(|level| level.first())
            .copied()
            .unwrap_or([0u8; 32])
    }

    fn auth_path(&self, leaf_index: u64) -> Vec<HashBytes> {
        let mut idx = leaf_index as usize;
        let mut path = Vec::with_capacity(self.tree_height as usize);
        for level in &self.levels[..self.tree_height as usize] {
            path.push(level[idx ^ 1]);
            idx >>= 1;
        }
        path
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("seed", &"<redacted>")
            .field("index", &self.index)
            .field("tree_height", &self.tree_height)
            .finish()
    }
}

impl Drop for PrivateKey {
    fn drop(&mut self) {
        self.seed.zeroize();
    }
}

/// A freshly generated key pair.
#[derive(Debug)]
pub struct KeyPair {
    pub public_key: PublicKey,
    pub private_key: PrivateKey,
}

/// One-time signature over a single message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneTimeSignature {
    /// Leaf consumed by this signature
    pub leaf_index: u64,
    /// Lamport preimage revealed for each digest bit
    pub revealed: Vec<HashBytes>,
    /// Public half for the opposite value of each digest bit
    pub complements: Vec<HashBytes>,
    /// Sibling hashes from leaf to root
    pub auth_path: Vec<HashBytes>,
}

impl OneTimeSignature {
    /// Stable short identifier for logs and ledger references.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Hasher::new();
        hasher.update(&self.leaf_index.to_le_bytes());
        for chunk in self
            .revealed
            .iter()
            .chain(&self.complements)
            .chain(&self.auth_path)
        {
            hasher.update(chunk);
        }
        hex::encode(&hasher.finalize().as_bytes()[..16])
    }
}

/// Merkle/Lamport signature scheme with a fixed tree height.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureScheme {
    tree_height: u32,
}

impl Default for SignatureScheme {
    fn default() -> Self {
        Self {
            tree_height: DEFAULT_TREE_HEIGHT,
        }
    }
}

impl SignatureScheme {
    pub fn new(tree_height: u32) -> Result<Self> {
        if tree_height == 0 || tree_height > MAX_TREE_HEIGHT {
            return Err(SignatureError::InvalidTreeHeight {
                height: tree_height,
                max: MAX_TREE_HEIGHT,
            });
        }
        Ok(Self { tree_height })
    }

    pub fn tree_height(&self) -> u32 {
        self.tree_height
    }

    /// Generate a key pair from a random seed.
    pub fn key_gen(&self) -> KeyPair {
        use rand::RngCore;
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        let pair = self.key_gen_from_seed(&seed);
        seed.zeroize();
        pair
    }

    /// Deterministically derive a key pair from `seed`.
    pub fn key_gen_from_seed(&self, seed: &HashBytes) -> KeyPair {
        let leaf_count = 1usize << self.tree_height;
        let leaves: Vec<HashBytes> = (0..leaf_count as u64)
            .map(|index| leaf_from_secrets(&derive_secrets(seed, index)))
            .collect();

        let mut levels = vec![leaves];
        while levels.last().map_or(0, Vec::len) > 1 {
            let parents = levels[levels.len() - 1]
                .chunks(2)
                .map(|pair| node_hash(&pair[0], &pair[1]))
                .collect();
            levels.push(parents);
        }

        let private_key = PrivateKey {
            seed: *seed,
            index: 0,
            tree_height: self.tree_height,
            levels,
        };
        let public_key = PublicKey {
            root: private_key.root(),
            tree_height: self.tree_height,
        };

        KeyPair {
            public_key,
            private_key,
        }
    }

    /// Sign `message` with the next unused leaf and advance the index.
    pub fn sign(&self, message: &[u8], private_key: &mut PrivateKey) -> Result<OneTimeSignature> {
        if private_key.is_exhausted() {
            return Err(SignatureError::KeyExhausted {
                capacity: private_key.capacity(),
            });
        }

        let leaf_index = private_key.index;
        private_key.index += 1;

        let mut secrets = derive_secrets(&private_key.seed, leaf_index);
        let digest = message_digest(leaf_index, message);

        let mut revealed = Vec::with_capacity(DIGEST_BITS);
        let mut complements = Vec::with_capacity(DIGEST_BITS);
        for bit_pos in 0..DIGEST_BITS {
            let bit = digest_bit(&digest, bit_pos);
            let pair = &secrets[bit_pos];
            revealed.push(pair[bit]);
            complements.push(public_half(&pair[1 - bit]));
        }
        secrets.zeroize();

        Ok(OneTimeSignature {
            leaf_index,
            revealed,
            complements,
            auth_path: private_key.auth_path(leaf_index),
        })
    }

    /// Check that `signature` was produced over `message` by the holder of
    /// the key behind `public_key`.
    pub fn verify(
        &self,
        message: &[u8],
        signature: &OneTimeSignature,
        public_key: &PublicKey,
    ) -> bool {
        if public_key.tree_height > MAX_TREE_HEIGHT
            || signature.revealed.len() != DIGEST_BITS
            || signature.complements.len() != DIGEST_BITS
            || signature.auth_path.len() != public_key.tree_height as usize
            || signature.leaf_index >= public_key.capacity()
        {
            return false;
        }

        let digest = message_digest(signature.leaf_index, message);

        let mut leaf_hasher = Hasher::new();
        leaf_hasher.update(&[TAG_LEAF]);
        for bit_pos in 0..DIGEST_BITS {
            let shown = public_half(&signature.revealed[bit_pos]);
            let other = &signature.complements[bit_pos];
            if digest_bit(&digest, bit_pos) == 0 {
                leaf_hasher.update(&shown);
                leaf_hasher.update(other);
            } else {
                leaf_hasher.update(other);
                leaf_hasher.update(&shown);
            }
        }
        let mut node = *leaf_hasher.finalize().as_bytes();

        let mut idx = signature.leaf_index;
        for sibling in &signature.auth_path {
            node = if idx & 1 == 0 {
                node_hash(&node, sibling)
            } else {
                node_hash(sibling, &node)
            };
            idx >>= 1;
        }

        // blake3::Hash comparison is constant-time
        blake3::Hash::from(node) == blake3::Hash::from(public_key.root)
    }
}

fn hash_tagged(tag: u8, parts: &[&[u8]]) -> HashBytes {
    let mut hasher = Hasher::new();
    hasher.update(&[tag]);
    for part in parts {
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

fn public_half(secret: &HashBytes) -> HashBytes {
    hash_tagged(TAG_PUBLIC_HALF, &[secret])
}

fn node_hash(left: &HashBytes, right: &HashBytes) -> HashBytes {
    hash_tagged(TAG_NODE, &[left, right])
}

fn message_digest(leaf_index: u64, message: &[u8]) -> HashBytes {
    hash_tagged(TAG_MESSAGE, &[&leaf_index.to_le_bytes(), message])
}

fn digest_bit(digest: &HashBytes, bit_pos: usize) -> usize {
    ((digest[bit_pos / 8] >> (7 - bit_pos % 8)) & 1) as usize
}

/// Expand the seed into the 256 Lamport secret pairs of one leaf.
fn derive_secrets(seed: &HashBytes, leaf_index: u64) -> Vec<[HashBytes; 2]> {
    let mut hasher = Hasher::new_keyed(seed);
    hasher.update(TAG_SECRET);
    hasher.update(&leaf_index.to_le_bytes());
    let mut reader = hasher.finalize_xof();

    let mut secrets = vec![[[0u8; 32]; 2]; DIGEST_BITS];
    for pair in secrets.iter_mut() {
        reader.fill(&mut pair[0]);
        reader.fill(&mut pair[1]);
    }
    secrets
}

fn leaf_from_secrets(secrets: &[[HashBytes; 2]]) -> HashBytes {
    let mut hasher = Hasher::new();
    hasher.update(&[TAG_LEAF]);
    for pair in secrets {
        hasher.update(&public_half(&pair[0]));
        hasher.update(&public_half(&pair[1]));
    }
    *hasher.finalize().as_bytes()
}
