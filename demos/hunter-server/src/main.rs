use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use wyvern::prelude::*;
use wyvern::SessionCounts;

// ---------------------------------------------------------------------------
// Opcodes and messages
// ---------------------------------------------------------------------------

const ECHO: Opcode = Opcode(0x0100);
const SERVER_STATUS: Opcode = Opcode(0x0101);
const CHAT_SEND: Opcode = Opcode(0x0102);
/// Server → every player.
const CHAT_MESSAGE: Opcode = Opcode(0x0103);

const MAX_CHAT_LEN: usize = 200;

#[derive(Deserialize)]
struct ChatSend {
    text: String,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct ChatMessage {
    from: String,
    text: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ServerStatus {
    online: usize,
    sessions: SessionCounts,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn echo(_: &SessionContext, body: Bytes) -> HandlerResult {
    Ok(Some(body))
}

fn server_status(ctx: &SessionContext, _: Bytes) -> HandlerResult {
    let sessions = ctx.server_stats();
    let status = ServerStatus {
        online: sessions.active,
        sessions,
    };
    to_body(&status)
}

fn chat(ctx: &SessionContext, body: Bytes) -> HandlerResult {
    let msg: ChatSend = serde_json::from_slice(&body)
        .map_err(|e| HandlerError::new(format!("bad chat message: {e}")))?;
    let text = msg.text.trim();
    if text.is_empty() {
        return Err(HandlerError::new("empty message"));
    }
    if text.chars().count() > MAX_CHAT_LEN {
        return Err(HandlerError::new(format!("message longer than {MAX_CHAT_LEN} characters")));
    }

    let line = ChatMessage {
        from: ctx.account_name().to_string(),
        text: text.to_string(),
    };
    let Some(body) = to_body(&line)? else {
        return Ok(None);
    };
    if body.len() > ctx.max_body_len() {
        return Err(HandlerError::new("message too long for this server"));
    }
    let delivered = ctx.broadcast(CHAT_MESSAGE, body);
    tracing::debug!(session_id = %ctx.session_id(), delivered, "chat message");
    Ok(None)
}

fn to_body<T: Serialize>(value: &T) -> HandlerResult {
    serde_json::to_vec(value)
        .map(|v| Some(Bytes::from(v)))
        .map_err(|e| HandlerError::new(format!("could not encode reply: {e}")))
}

// ---------------------------------------------------------------------------
// Server bootstrap
// ---------------------------------------------------------------------------

fn dispatcher() -> Result<Dispatcher, WyvernError> {
    Ok(Dispatcher::new()
        .with(ECHO, echo)?
        .with(SERVER_STATUS, server_status)?
        .with(CHAT_SEND, chat)?)
}

/// Sample accounts. A real deployment plugs in its own `AccountStore`.
fn accounts() -> MemoryAccountStore {
    MemoryAccountStore::new()
        .with_account("hunter001", "password123", AccountId(1001))
        .with_account("alice", "secret", AccountId(42))
}

/// `hunter-server [config.toml]`
fn load_config() -> Result<ServerConfig, WyvernError> {
    match std::env::args().nth(1) {
        Some(path) => Ok(ServerConfig::from_file(path)?),
        None => Ok(ServerConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    wyvern::logging::init("info,hunter_server=debug");

    let config = load_config()?;
    tracing::info!(bind_addr = %config.bind_addr, "starting hunter server");

    let server = WyvernServer::builder()
        .config(config)
        .dispatcher(dispatcher()?)
        .build(accounts())
        .await?;
    tracing::info!(addr = %server.local_addr()?, "listening");

    let mut events = server.manager().subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SessionEvent::Authenticated { session_id, account_id }) => {
                    tracing::info!(%session_id, %account_id, "player joined");
                }
                Ok(SessionEvent::Closed { session_id, reason, account_id }) => {
                    tracing::info!(%session_id, %reason, ?account_id, "player left");
                }
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => tracing::debug!(missed, "event log lagging"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
