//! distorage-crypto: primitives shared by storage nodes and clients
//!
//! Everything here is a pure function over byte slices or a small key type;
//! nothing holds state between calls.
//!
//! ```text
//! Identity
//!   P-256 signing key ── SPKI DER public key ── keccak256[12..32] = Address
//!
//! Session (one per connection)
//!   X25519 ephemeral ── shared secret (32 bytes) ── AES-256 single block (identity proof)
//!
//! Files
//!   File key (256-bit random) ── AES-256-GCM, random 96-bit nonce prepended
//! ```

pub mod cipher;
pub mod error;
pub mod exchange;
pub mod hashing;
pub mod keys;
pub mod signing;

pub use cipher::{decrypt, encrypt, encrypt_block, FileKey};
pub use error::CryptoError;
pub use exchange::{compute_shared_secret, generate_key_exchange_keypair, ExchangeKeyPair, SharedSecret};
pub use hashing::{derive_address, hash, Address, Digest};
pub use keys::ClientKeys;
pub use signing::{sign, verify, SigningIdentity};

/// Size of a symmetric key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// AES block size; also the length of the identity-proof nonce
pub const BLOCK_SIZE: usize = 16;

/// Length of a Keccak-256 digest
pub const DIGEST_SIZE: usize = 32;

/// Length of an address derived from a public key
pub const ADDRESS_SIZE: usize = 20;

/// Upper bound of a DER-encoded P-256 ECDSA signature
pub const MAX_SIGNATURE_SIZE: usize = 72;
