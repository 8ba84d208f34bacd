use anyhow::{Context, Result};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// WebSocket endpoint the acquisition controller connects to.
///
/// Text messages from every connection are forwarded, in arrival order, into
/// one channel consumed by the session controller.
pub struct EventServer {
    listener: TcpListener,
}

impl EventServer {
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind event server on {}", addr))?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the receiving side of `tx` is dropped
    pub fn spawn(self, tx: mpsc::Sender<String>) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Ok(addr) = self.listener.local_addr() {
                info!("Listening for acquisition events on ws://{}", addr);
            }
            loop {
                tokio::select! {
                    _ = tx.closed() => {
                        debug!("Event consumer gone, closing listener");
                        break;
                    }
                    accepted = self.listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            tokio::spawn(forward_messages(stream, peer, tx.clone()));
                        }
                        Err(e) => error!("Failed to accept connection: {}", e),
                    },
                }
            }
        })
    }
}

async fn forward_messages(stream: TcpStream, peer: SocketAddr, tx: mpsc::Sender<String>) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake with {} failed: {}", peer, e);
            return;
        }
    };
    info!("Acquisition controller connected from {}", peer);

    let (_write, mut read) = ws_stream.split();
    while let Some(message) = read.next().await {
        match message {
            Ok(Message::Text(text)) => {
                debug!("Message from {}: {}", peer, text);
                if tx.send(text.to_string()).await.is_err() {
                    debug!("Event consumer gone, dropping connection from {}", peer);
                    return;
                }
            }
            Ok(Message::Binary(_)) => warn!("Ignoring binary message from {}", peer),
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {}
            Err(e) => {
                error!("WebSocket error from {}: {}", peer, e);
                break;
            }
        }
    }
    info!("Acquisition controller {} disconnected", peer);
}
