//! The key-exchange handshake, server and client halves.
//!
//! ```text
//! server                                     client
//!   │ ── HANDSHAKE_INIT {version, pk, suite} ──→ │   plaintext
//!   │ ←── HANDSHAKE_RESPONSE seal_for(pk, key) ── │   sealed box
//!   │ ── HANDSHAKE_CONFIRM enc(seq 1, H(resp)) ─→ │   session key
//! ```
//!
//! A proposal that doesn't open gets `HANDSHAKE_REJECTED` and the
//! connection is dropped; there is no second try on the same connection.
//! The confirmation proves the server derived the same key before any
//! application data moves.

use wyvern_crypto::{
    CipherSuite, CryptoProvider, Digest, SessionCipher, SessionKey, digests_equal, hash,
    seal_for,
};
use wyvern_protocol::{
    Codec, HandshakeInit, HandshakeRejected, JsonCodec, PROTOCOL_VERSION, Packet, opcodes,
};

use crate::{SecureChannel, SessionError, SessionState};

// ---------------------------------------------------------------------------
// Server side
// ---------------------------------------------------------------------------

/// Builds the plaintext `HANDSHAKE_INIT` advertising the server's key.
pub(crate) fn init_packet(crypto: &CryptoProvider) -> Result<Packet, SessionError> {
    let init = HandshakeInit {
        version: PROTOCOL_VERSION,
        public_key: crypto.public_key(),
        cipher_suite: crypto.cipher_suite().to_string(),
    };
    Ok(Packet::new(opcodes::HANDSHAKE_INIT, JsonCodec.encode(&init)?))
}

/// Opens a client's key proposal.
///
/// Returns the session key and the digest the confirmation must carry.
pub(crate) fn accept_proposal(
    crypto: &CryptoProvider,
    proposal: &[u8],
) -> Result<(SessionKey, Digest), SessionError> {
    let opened = crypto
        .asymmetric_decrypt(proposal)
        .map_err(|e| SessionError::HandshakeFailure(e.to_string()))?;
    let key = SessionKey::from_slice(&opened)
        .map_err(|e| SessionError::HandshakeFailure(e.to_string()))?;
    Ok((key, hash(proposal)))
}

/// Plaintext `HANDSHAKE_REJECTED`. Never carries the underlying cause.
pub(crate) fn rejected_packet() -> Result<Packet, SessionError> {
    let body = HandshakeRejected {
        reason: "key proposal rejected".into(),
    };
    Ok(Packet::new(opcodes::HANDSHAKE_REJECTED, JsonCodec.encode(&body)?))
}

// ---------------------------------------------------------------------------
// Client side
// ---------------------------------------------------------------------------

/// Client half of the handshake, between sending the proposal and
/// receiving the confirmation.
pub struct ClientHandshake {
    key: SessionKey,
    suite: CipherSuite,
    proposal_digest: Digest,
}

impl ClientHandshake {
    /// Reads `HANDSHAKE_INIT`, invents a session key and seals it to the
    /// server. Send the returned packet, then wait for the confirmation.
    pub fn respond(init: &Packet) -> Result<(Self, Packet), SessionError> {
        if init.opcode != opcodes::HANDSHAKE_INIT {
            return Err(SessionError::UnexpectedOpcode {
                state: SessionState::AwaitingHandshake,
                opcode: init.opcode,
            });
        }
        let init: HandshakeInit = JsonCodec
            .decode(&init.body)
            .map_err(|_| SessionError::MalformedBody {
                opcode: opcodes::HANDSHAKE_INIT,
            })?;
        if init.version != PROTOCOL_VERSION {
            return Err(SessionError::HandshakeFailure(format!(
                "server speaks protocol {}, client speaks {PROTOCOL_VERSION}",
                init.version
            )));
        }
        let suite: CipherSuite = init
            .cipher_suite
            .parse()
            .map_err(|e: wyvern_crypto::CryptoError| SessionError::HandshakeFailure(e.to_string()))?;

        let key = SessionKey::generate();
        let proposal = seal_for(&init.public_key, key.as_bytes())
            .map_err(|e| SessionError::HandshakeFailure(e.to_string()))?;
        let proposal_digest = hash(&proposal);

        Ok((
            Self {
                key,
                suite,
                proposal_digest,
            },
            Packet::new(opcodes::HANDSHAKE_RESPONSE, proposal),
        ))
    }

    /// Checks `HANDSHAKE_CONFIRM` and returns the channel for everything
    /// that follows.
    pub fn confirm(self, packet: &Packet) -> Result<SecureChannel, SessionError> {
        match packet.opcode {
            opcodes::HANDSHAKE_CONFIRM => {}
            opcodes::HANDSHAKE_REJECTED => {
                let reason = JsonCodec
                    .decode::<HandshakeRejected>(&packet.body)
                    .map(|r| r.reason)
                    .unwrap_or_else(|_| "rejected".into());
                return Err(SessionError::HandshakeFailure(reason));
            }
            other => {
                return Err(SessionError::UnexpectedOpcode {
                    state: SessionState::AwaitingHandshake,
                    opcode: other,
                });
            }
        }

        let cipher = SessionCipher::new(self.suite, &self.key).map_err(SessionError::Cipher)?;
        let mut channel = SecureChannel::new(cipher);
        let digest = channel
            .open(packet)
            .map_err(|_| SessionError::HandshakeFailure("confirmation did not decrypt".into()))?;

        let matches = <&Digest>::try_from(&digest[..])
            .map(|d| digests_equal(d, &self.proposal_digest))
            .unwrap_or(false);
        if !matches {
            return Err(SessionError::HandshakeFailure("confirmation mismatch".into()));
        }
        Ok(channel)
    }

    /// SHA-256 of the proposed key, for comparing keys without exposing them.
    pub fn key_fingerprint(&self) -> Digest {
        hash(self.key.as_bytes())
    }
}
