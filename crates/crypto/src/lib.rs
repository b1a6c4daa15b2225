//! Cryptographic primitives for the VoltMesh authentication stack.
//!
//! This crate provides the two primitives identity proofs are built on:
//!
//! - **Hash-based signatures**: a Merkle tree of Lamport one-time keys. Every
//!   signature consumes one leaf; the key is exhausted after `2^h` signatures.
//! - **PUF emulation**: a software stand-in for a hardware fingerprint with
//!   simulated read noise and tolerance-based verification.
//!
//! # Hashing
//!
//! BLAKE3 is used for every digest, key derivation, and bit expansion.
//!
//! # Security Principles
//!
//! - Seeds and PUF secrets are zeroized on drop and never logged
//! - Verification needs only public material
//! - A signing index is never reused

pub mod hash_sig;
pub mod puf;

pub use hash_sig::{
    HashBytes, KeyPair, OneTimeSignature, PrivateKey, PublicKey, SignatureError,
    SignatureScheme, DEFAULT_TREE_HEIGHT, MAX_TREE_HEIGHT,
};
pub use puf::{PufEmulator, PufError, DEFAULT_TOLERANCE};
