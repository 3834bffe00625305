//! distorage-session: the preamble every node connection opens with
//!
//! ```text
//! node (accept)                            client (initiate)
//!   ── ephemeral X25519 SPKI ─────────────▶
//!   ◀──────────────── long-term P-256 SPKI ──
//!   ◀────────────── ephemeral X25519 SPKI ──
//!   ◀── nonce(16) ‖ signature slot(72) ‖ body
//!   verify: sig over keccak(AES(shared, nonce))
//! ```
//!
//! A node may answer with a status code instead of its ephemeral key when the
//! request is rejected before the handshake (bad identifier, missing chunk).

pub mod channel;
pub mod payload;
pub mod preamble;

pub use channel::{Frame, FrameChannel, MemoryChannel};
pub use payload::RequestPayload;
pub use preamble::{accept, initiate, prove, verify_identity, Opening, VerifiedRequest};
