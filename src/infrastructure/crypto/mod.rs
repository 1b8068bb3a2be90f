//! Canonicalization, hashing, and approval signatures.

pub mod canonical;
pub mod signing;

pub use canonical::{canonical_json, content_hash, sha256_hex};
pub use signing::{
    approval_signing_bytes, decode_private_key, encode_private_key, encode_public_key,
    generate_keypair, sign_approval, verify_approval,
};
