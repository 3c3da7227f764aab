//! Client side of the protocol.
//!
//! [`WyvernClient`] performs the handshake, logs in and then exchanges
//! sealed application packets over any byte stream: a `TcpStream`, or the
//! client end of a [`MemoryTransport`](wyvern_transport::MemoryTransport).
//! Integration tests and bots use it; a real game client would
//! reimplement the same steps.

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use wyvern_crypto::Digest;
use wyvern_protocol::{
    AccountId, AuthFailed, AuthOk, AuthRequest, CloseNotice, CloseReason, Codec, ErrorResponse,
    FrameCodec, JsonCodec, Opcode, Packet, opcodes,
};
use wyvern_session::{ClientHandshake, SecureChannel};

use crate::WyvernError;

/// A decrypted packet from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// Application packet (handler response or broadcast), body decrypted.
    Packet(Packet),
    /// `ERROR_RESPONSE`. The session is still open.
    Error(ErrorResponse),
    /// `CLOSE`. Nothing follows.
    Closed(CloseNotice),
}

/// Result of [`WyvernClient::login`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Login {
    Accepted(AccountId),
    /// Wrong credentials; `attempts_left` more tries before the server
    /// hangs up.
    Rejected(AuthFailed),
}

/// An established, encrypted connection to a Wyvern server.
pub struct WyvernClient<S> {
    framed: Framed<S, FrameCodec>,
    channel: SecureChannel,
    key_fingerprint: Digest,
    account_id: Option<AccountId>,
}

impl<S> WyvernClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Runs the handshake over `stream`.
    ///
    /// `codec` must use the server's checksum algorithm. Fails with
    /// [`WyvernError::Closed`] if the server turns the connection away
    /// (e.g. `ServerFull`).
    pub async fn handshake(stream: S, codec: FrameCodec) -> Result<Self, WyvernError> {
        let mut framed = Framed::new(stream, codec);

        let init = next_frame(&mut framed).await?;
        reject_if_closed(&init)?;
        let (handshake, response) = ClientHandshake::respond(&init)?;
        framed.send(response).await?;

        let confirm = next_frame(&mut framed).await?;
        reject_if_closed(&confirm)?;
        let key_fingerprint = handshake.key_fingerprint();
        let channel = handshake
            .confirm(&confirm)?
            .with_max_frame_length(framed.codec().max_frame_length());
        tracing::debug!("handshake complete");

        Ok(Self {
            framed,
            channel,
            key_fingerprint,
            account_id: None,
        })
    }

    /// SHA-256 of the negotiated session key. Matches the server's
    /// `Session::key_fingerprint`.
    pub fn key_fingerprint(&self) -> Digest {
        self.key_fingerprint
    }

    /// The account bound by a successful [`login`](Self::login).
    pub fn account_id(&self) -> Option<AccountId> {
        self.account_id
    }

    /// Sends `AUTH_REQUEST` and waits for the verdict.
    pub async fn login(&mut self, user: &str, credential: &str) -> Result<Login, WyvernError> {
        let request = AuthRequest {
            user: user.to_string(),
            cred: credential.to_string(),
        };
        self.send(opcodes::AUTH_REQUEST, &JsonCodec.encode(&request)?)
            .await?;

        match self.recv().await? {
            Incoming::Packet(p) if p.opcode == opcodes::AUTH_OK => {
                let ok: AuthOk = JsonCodec.decode(&p.body)?;
                self.account_id = Some(ok.account_id);
                Ok(Login::Accepted(ok.account_id))
            }
            Incoming::Packet(p) if p.opcode == opcodes::AUTH_FAILED => {
                Ok(Login::Rejected(JsonCodec.decode(&p.body)?))
            }
            Incoming::Packet(p) => Err(WyvernError::UnexpectedPacket(p.opcode)),
            Incoming::Error(_) => Err(WyvernError::UnexpectedPacket(opcodes::ERROR_RESPONSE)),
            Incoming::Closed(notice) => Err(WyvernError::Closed(notice.reason)),
        }
    }

    /// Seals and sends one packet.
    pub async fn send(&mut self, opcode: Opcode, body: &[u8]) -> Result<(), WyvernError> {
        let packet = self.seal(opcode, body)?;
        self.send_packet(packet).await
    }

    /// Seals a packet without sending it. Advances the send counter,
    /// unless the body is too large for one frame.
    pub fn seal(&mut self, opcode: Opcode, body: &[u8]) -> Result<Packet, WyvernError> {
        Ok(self.channel.seal(opcode, body)?)
    }

    /// Writes an already-sealed packet as-is, without touching the sequence.
    pub async fn send_packet(&mut self, packet: Packet) -> Result<(), WyvernError> {
        self.framed.send(packet).await?;
        Ok(())
    }

    /// Reads and decrypts the next packet.
    pub async fn recv(&mut self) -> Result<Incoming, WyvernError> {
        let packet = next_frame(&mut self.framed).await?;
        let body = self.channel.open(&packet)?;
        match packet.opcode {
            opcodes::CLOSE => Ok(Incoming::Closed(JsonCodec.decode(&body)?)),
            opcodes::ERROR_RESPONSE => Ok(Incoming::Error(JsonCodec.decode(&body)?)),
            opcode => Ok(Incoming::Packet(Packet::new(opcode, body))),
        }
    }

    /// Sends a request and returns whatever arrives next.
    pub async fn request(&mut self, opcode: Opcode, body: &[u8]) -> Result<Incoming, WyvernError> {
        self.send(opcode, body).await?;
        self.recv().await
    }

    /// Says goodbye and waits for the server's close notice. Packets still
    /// in flight are discarded.
    pub async fn logout(mut self) -> Result<CloseReason, WyvernError> {
        let notice = JsonCodec.encode(&CloseNotice::new(CloseReason::ClientLogout))?;
        self.send(opcodes::CLOSE, &notice).await?;
        loop {
            match self.recv().await {
                Ok(Incoming::Closed(notice)) => return Ok(notice.reason),
                Ok(_) => continue,
                Err(WyvernError::ConnectionLost) => return Ok(CloseReason::ClientLogout),
                Err(e) => return Err(e),
            }
        }
    }
}

async fn next_frame<S>(framed: &mut Framed<S, FrameCodec>) -> Result<Packet, WyvernError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match framed.next().await {
        Some(frame) => Ok(frame?),
        None => Err(WyvernError::ConnectionLost),
    }
}

/// During the handshake the server's `CLOSE` is plaintext.
fn reject_if_closed(packet: &Packet) -> Result<(), WyvernError> {
    if packet.opcode == opcodes::CLOSE {
        let notice: CloseNotice = JsonCodec.decode(&packet.body)?;
        return Err(WyvernError::Closed(notice.reason));
    }
    Ok(())
}

impl<S> std::fmt::Debug for WyvernClient<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WyvernClient")
            .field("channel", &self.channel)
            .field("account_id", &self.account_id)
            .finish_non_exhaustive()
    }
}

