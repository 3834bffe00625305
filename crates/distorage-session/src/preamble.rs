//! Handshake for both roles
//!
//! [`accept`] is run by the node, [`initiate`] by the client. Neither retries:
//! any failure aborts the connection.

use rand::RngCore;
use tracing::debug;

use distorage_core::{DistorageError, DistorageResult, Status};
use distorage_crypto::{
    compute_shared_secret, derive_address, encrypt_block, generate_key_exchange_keypair, hash,
    sign, signing::decode_public_key, verify, Address, SharedSecret, SigningIdentity, BLOCK_SIZE,
};

use crate::channel::FrameChannel;
use crate::payload::RequestPayload;

/// Outcome of a successful [`accept`].
#[derive(Debug)]
pub struct VerifiedRequest {
    /// Address of the long-term key that signed the request
    pub address: Address,
    pub public_key: Vec<u8>,
    pub shared_secret: SharedSecret,
    pub payload: RequestPayload,
}

/// How the node opened the connection, from the client's side.
#[derive(Debug)]
pub enum Opening {
    /// Handshake sent; the node's response frame comes next.
    Established(SharedSecret),
    /// The node answered with a status code before any key exchange.
    Refused(Status),
}

/// Node side: send our ephemeral key, then read the remote's long-term key,
/// ephemeral key and signed request, and check the signature binds the two.
pub async fn accept<C>(channel: &mut C) -> DistorageResult<VerifiedRequest>
where
    C: FrameChannel + ?Sized,
{
    let ephemeral = generate_key_exchange_keypair()?;
    channel.send_binary(ephemeral.public_key_der()).await?;

    let public_key = channel.recv_binary().await?;
    let remote_ephemeral = channel.recv_binary().await?;
    let shared_secret = compute_shared_secret(&ephemeral, &remote_ephemeral)?;

    let raw = channel.recv_binary().await?;
    let payload = RequestPayload::decode(&raw)?;
    verify_identity(&shared_secret, &public_key, &payload.nonce, &payload.signature)?;

    let address = derive_address(&public_key);
    debug!(peer = %address, body_len = payload.body.len(), "preamble verified");
    Ok(VerifiedRequest {
        address,
        public_key,
        shared_secret,
        payload,
    })
}

/// Client side: answer the node's ephemeral key with ours and a signed request
/// carrying `body`.
pub async fn initiate<C>(
    channel: &mut C,
    identity: &SigningIdentity,
    body: Vec<u8>,
) -> DistorageResult<Opening>
where
    C: FrameChannel + ?Sized,
{
    let first = channel.recv_binary().await?;
    if let Some(status) = Status::from_bytes(&first) {
        debug!(?status, "node refused before handshake");
        return Ok(Opening::Refused(status));
    }

    let ephemeral = generate_key_exchange_keypair()?;
    let shared_secret = compute_shared_secret(&ephemeral, &first)?;

    channel.send_binary(identity.public_key_der()).await?;
    channel.send_binary(ephemeral.public_key_der()).await?;

    let (nonce, signature) = prove(&shared_secret, identity)?;
    let payload = RequestPayload {
        nonce,
        signature,
        body,
    };
    channel.send_binary(payload.encode()?).await?;

    Ok(Opening::Established(shared_secret))
}

/// Fresh nonce and a signature over `keccak(AES(shared_secret, nonce))`.
pub fn prove(
    shared_secret: &SharedSecret,
    identity: &SigningIdentity,
) -> DistorageResult<([u8; BLOCK_SIZE], Vec<u8>)> {
    let mut nonce = [0u8; BLOCK_SIZE];
    rand::rngs::OsRng
        .try_fill_bytes(&mut nonce)
        .map_err(|e| DistorageError::Other(anyhow::anyhow!("entropy source failure: {e}")))?;
    let digest = hash(&encrypt_block(shared_secret.as_bytes(), &nonce));
    let signature = sign(identity, &digest)?;
    Ok((nonce, signature))
}

/// Check that the holder of `public_key` also holds `shared_secret`.
pub fn verify_identity(
    shared_secret: &SharedSecret,
    public_key: &[u8],
    nonce: &[u8],
    signature: &[u8],
) -> DistorageResult<()> {
    let nonce: &[u8; BLOCK_SIZE] = nonce.try_into().map_err(|_| {
        DistorageError::AuthenticationFailed(format!(
            "nonce must be {BLOCK_SIZE} bytes, got {}",
            nonce.len()
        ))
    })?;
    decode_public_key(public_key).map_err(|e| {
        DistorageError::AuthenticationFailed(format!("undecodable identity key: {e}"))
    })?;

    let digest = hash(&encrypt_block(shared_secret.as_bytes(), nonce));
    if !verify(public_key, &digest, signature) {
        return Err(DistorageError::AuthenticationFailed(
            "signature does not match identity key".into(),
        ));
    }
    Ok(())
}
