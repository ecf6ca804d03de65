//! In-process stand-in for the synthesis service.
//!
//! Accepts one WebSocket connection, reports every frame the client sends and sends
//! whatever the test scripts. Connections are served one after another, so a client can
//! reconnect to the same service.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use sirius_client::{ClientConfig, RetentionPolicy, TtsClient};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

pub enum Script {
    Send(Message),
    /// Send a Close frame and stop.
    Close,
    /// Drop the socket without a closing handshake.
    Drop,
}

pub struct MockService {
    pub addr: SocketAddr,
    received: mpsc::UnboundedReceiver<Message>,
    script: mpsc::UnboundedSender<Script>,
}

impl MockService {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (received_tx, received) = mpsc::unbounded_channel();
        let (script, mut script_rx) = mpsc::unbounded_channel::<Script>();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(ws_stream) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                let (mut ws_sender, mut ws_receiver) = ws_stream.split();

                loop {
                    tokio::select! {
                        msg = ws_receiver.next() => match msg {
                            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                            Some(Ok(msg @ (Message::Text(_) | Message::Binary(_)))) => {
                                let _ = received_tx.send(msg);
                            }
                            Some(Ok(_)) => {}
                        },
                        step = script_rx.recv() => match step {
                            Some(Script::Send(msg)) => {
                                if ws_sender.send(msg).await.is_err() {
                                    break;
                                }
                            }
                            Some(Script::Close) => {
                                let _ = ws_sender.send(Message::Close(None)).await;
                                break;
                            }
                            Some(Script::Drop) => break,
                            None => return,
                        },
                    }
                }
            }
        });

        Self {
            addr,
            received,
            script,
        }
    }

    pub fn config(&self) -> ClientConfig {
        ClientConfig {
            host: self.addr.ip().to_string(),
            port: self.addr.port(),
            retention: RetentionPolicy::SingleSlot,
            ..ClientConfig::default()
        }
    }

    pub fn send_text(&self, text: &str) {
        let _ = self.script.send(Script::Send(Message::Text(text.to_string())));
    }

    pub fn send_audio(&self, data: Vec<u8>) {
        let _ = self.script.send(Script::Send(Message::Binary(data)));
    }

    pub fn close(&self) {
        let _ = self.script.send(Script::Close);
    }

    pub fn drop_socket(&self) {
        let _ = self.script.send(Script::Drop);
    }

    /// Next frame the client sent.
    pub async fn next_frame(&mut self) -> Message {
        tokio::time::timeout(Duration::from_secs(5), self.received.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("mock service stopped")
    }

    /// Asserts that the client sends nothing for a short while.
    pub async fn expect_silence(&mut self) {
        let waited = tokio::time::timeout(Duration::from_millis(200), self.received.recv()).await;
        assert!(waited.is_err(), "unexpected client frame: {:?}", waited);
    }
}

/// A client connected to `service`.
pub async fn connected_client(config: ClientConfig) -> TtsClient {
    let mut client = TtsClient::new(config).unwrap();
    client.connect();
    tokio::time::timeout(Duration::from_secs(5), client.wait_until_connected())
        .await
        .expect("timed out connecting")
        .expect("connection failed");
    client
}
