//! Duplex WebSocket session to the venue.
//!
//! One connection carries everything: market data, account events, and
//! order flow. The read half is consumed by the bot loop only; the write
//! half is shared by the trader and the account tracker, so sends go
//! through an async mutex. The session survives resets: `close` drops the
//! stream halves and `connect` re-establishes them.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use super::auth::{self, Credentials};
use super::protocol::{AuthReply, Frame};
use crate::error::FatalError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Outbound surface the trader and account tracker depend on. Kept narrow
/// so tests can substitute a recording implementation.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, frame: String) -> Result<()>;
}

pub struct ExchangeSession {
    url: String,
    credentials: Credentials,
    mfa_code: Option<String>,
    write: Mutex<Option<WsSink>>,
    read: Mutex<Option<WsSource>>,
}

impl ExchangeSession {
    pub fn new(url: String, credentials: Credentials, mfa_code: Option<String>) -> Self {
        Self {
            url,
            credentials,
            mfa_code,
            write: Mutex::new(None),
            read: Mutex::new(None),
        }
    }

    pub async fn connect(&self) -> Result<()> {
        info!(url = %self.url, "🔌 Connecting to exchange");
        let (stream, response) = connect_async(self.url.as_str())
            .await
            .context("websocket connect")?;
        debug!(status = %response.status(), "websocket upgrade complete");

        let (sink, source) = stream.split();
        *self.write.lock().await = Some(sink);
        *self.read.lock().await = Some(source);
        Ok(())
    }

    pub async fn send(&self, frame: &str) -> Result<()> {
        let mut write = self.write.lock().await;
        let sink = write.as_mut().context("session is not connected")?;
        sink.send(Message::Text(frame.to_string()))
            .await
            .context("websocket send")
    }

    /// Next text frame from the venue, or `None` once the stream ends.
    /// Pings are answered inline; other control frames are skipped.
    pub async fn recv(&self) -> Result<Option<String>> {
        loop {
            let message = {
                let mut read = self.read.lock().await;
                let source = read.as_mut().context("session is not connected")?;
                source.next().await
            };
            match message {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Ping(payload))) => {
                    let mut write = self.write.lock().await;
                    if let Some(sink) = write.as_mut() {
                        let _ = sink.send(Message::Pong(payload)).await;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "server closed the websocket");
                    return Ok(None);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(anyhow::Error::new(e).context("websocket recv")),
                None => return Ok(None),
            }
        }
    }

    pub async fn close(&self) {
        let mut write = self.write.lock().await;
        if let Some(mut sink) = write.take() {
            let _ = sink.send(Message::Close(None)).await;
        }
        *self.read.lock().await = None;
    }

    /// API-key authentication, with the optional 2FA follow-up when the
    /// venue demands it. Refusals are fatal; there is nothing to retry.
    pub async fn authenticate(&self) -> Result<()> {
        info!(user_id = %self.credentials.user_id, "Authenticating...");
        let request = auth::authenticate_user_request(&self.credentials);
        self.send(&request).await?;

        let reply = self.await_auth_reply("AuthenticateUser").await?;
        if !reply.authenticated {
            return Err(FatalError::AuthRefused(
                reply.error_message.unwrap_or_else(|| "no error message".into()),
            )
            .into());
        }

        if reply.requires_2fa {
            let Some(code) = self.mfa_code.as_deref() else {
                return Err(FatalError::MfaRequired.into());
            };
            self.send(&auth::authenticate_2fa_request(code)).await?;
            let reply = self.await_auth_reply("Authenticate2FA").await?;
            if !reply.authenticated {
                return Err(FatalError::MfaRejected(
                    reply.error_message.unwrap_or_else(|| "no error message".into()),
                )
                .into());
            }
        }

        info!("✅ Authenticated");
        Ok(())
    }

    async fn await_auth_reply(&self, operation: &str) -> Result<AuthReply> {
        loop {
            let Some(raw) = self.recv().await? else {
                bail!("connection closed during authentication");
            };
            let frame = Frame::parse(&raw)?;
            if frame.n == operation {
                return frame.payload();
            }
            debug!(operation = %frame.n, "skipping frame while awaiting auth reply");
        }
    }
}

#[async_trait]
impl Transport for ExchangeSession {
    async fn send(&self, frame: String) -> Result<()> {
        ExchangeSession::send(self, &frame).await
    }
}
