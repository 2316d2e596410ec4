// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Transport seam for the job-source connection, plus the WebSocket
// implementation.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, warn};

use printlink_core::error::{PrintlinkError, Result};

/// One established, message-oriented link to the job source.
#[async_trait]
pub trait Link: Send {
    /// Send one text frame.
    async fn send(&mut self, text: String) -> Result<()>;

    /// Next text frame. `None` once the link has closed.
    async fn recv(&mut self) -> Option<Result<String>>;

    /// Close the link. Safe to call on a link that is already closed.
    async fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// Opens links to the job source.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Link>>;

    /// Where links go, for logs.
    fn endpoint(&self) -> String;
}

/// Connects with `tokio-tungstenite` to a `ws://` or `wss://` URL.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn Link>> {
        let (stream, response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| PrintlinkError::Connect(format!("{}: {e}", self.url)))?;
        debug!(url = %self.url, status = %response.status(), "websocket handshake complete");
        Ok(Box::new(WsLink { stream, open: true }))
    }

    fn endpoint(&self) -> String {
        self.url.clone()
    }
}

/// A WebSocket link. Protocol-level ping/pong is answered by tungstenite.
pub struct WsLink {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    open: bool,
}

#[async_trait]
impl Link for WsLink {
    async fn send(&mut self, text: String) -> Result<()> {
        if !self.open {
            return Err(PrintlinkError::LinkClosed);
        }
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| {
                self.open = false;
                PrintlinkError::LinkSend(e.to_string())
            })
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        while self.open {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Some(Ok(text.to_string())),
                Some(Ok(Message::Binary(bytes))) => {
                    return Some(String::from_utf8(bytes.to_vec()).map_err(|e| {
                        PrintlinkError::MalformedFrame(format!("binary frame is not UTF-8: {e}"))
                    }));
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "job source closed the link");
                    self.open = false;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "websocket read failed");
                    self.open = false;
                    return Some(Err(PrintlinkError::LinkClosed));
                }
                None => self.open = false,
            }
        }
        None
    }

    async fn close(&mut self) {
        if self.open {
            self.open = false;
            if let Err(e) = self.stream.close(None).await {
                debug!(error = %e, "websocket close handshake failed");
            }
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
