//! One client socket: handshake, request handling and event forwarding

use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use sync_engine::{PushOutcome, Subscription, SubscriptionId, SyncCoordinator, UserId};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

use crate::protocol::{AckStatus, ClientMessage, Hello, LockAction, ServerMessage};

type Tx = mpsc::UnboundedSender<Message>;

/// Per-socket state once the user is connected
struct Session {
    coordinator: Arc<SyncCoordinator>,
    user_id: UserId,
    tx: Tx,
    inbox: JoinHandle<()>,
    paths: HashMap<String, (SubscriptionId, JoinHandle<()>)>,
}

pub async fn handle_connection(stream: TcpStream, addr: SocketAddr, coordinator: Arc<SyncCoordinator>) {
    let ws_stream = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("WebSocket handshake failed for {}: {}", addr, e);
            return;
        }
    };

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = ws_sender.send(msg).await {
                debug!("Failed to send message: {}", e);
                break;
            }
        }
    });

    let Some(user_id) = read_hello(&mut ws_receiver, &tx).await else {
        info!("Connection from {} closed before identifying", addr);
        send_task.abort();
        return;
    };

    let inbox = match coordinator.connect_user(user_id.clone()).await {
        Ok(subscription) => forward_events(subscription, tx.clone()),
        Err(e) => {
            warn!("Rejected {} from {}: {}", user_id, addr, e);
            let _ = send(&tx, &ServerMessage::Error {
                message: e.to_string(),
            });
            // Let the error frame go out before the socket is dropped
            drop(tx);
            let _ = send_task.await;
            return;
        }
    };

    info!("User {} connected from {}", user_id, addr);
    let _ = send(&tx, &ServerMessage::Connected {
        user_id: user_id.clone(),
    });

    let mut session = Session {
        coordinator,
        user_id,
        tx,
        inbox,
        paths: HashMap::new(),
    };

    while let Some(msg) = ws_receiver.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                error!("Error receiving message from {}: {}", session.user_id, e);
                break;
            }
        };

        match msg {
            Message::Text(text) => {
                if let Err(e) = session.handle_text(&text).await {
                    debug!("Request from {} failed: {}", session.user_id, e);
                    let _ = send(&session.tx, &ServerMessage::Error {
                        message: e.to_string(),
                    });
                }
            }
            Message::Ping(data) => {
                let _ = session.tx.send(Message::Pong(data));
            }
            Message::Close(_) => {
                info!("User {} requested close", session.user_id);
                break;
            }
            _ => {}
        }
    }

    session.close().await;
    send_task.abort();
    info!("Connection closed: {}", addr);
}

/// Wait for the identifying first frame
async fn read_hello(receiver: &mut SplitStream<WebSocketStream<TcpStream>>, tx: &Tx) -> Option<UserId> {
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<Hello>(&text) {
                Ok(hello) => return Some(hello.user_id),
                Err(e) => {
                    let _ = send(tx, &ServerMessage::Error {
                        message: format!("expected {{\"user_id\": ...}}: {}", e),
                    });
                }
            },
            Ok(Message::Ping(data)) => {
                let _ = tx.send(Message::Pong(data));
            }
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
    None
}

fn send(tx: &Tx, msg: &ServerMessage) -> anyhow::Result<()> {
    let json = serde_json::to_string(msg)?;
    tx.send(Message::Text(json))?;
    Ok(())
}

/// Relay a subscription's events to the socket verbatim
fn forward_events(mut subscription: Subscription, tx: Tx) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize {} event: {}", event.event_type(), e);
                    continue;
                }
            };
            if tx.send(Message::Text(json)).is_err() {
                break;
            }
        }
    })
}

impl Session {
    async fn handle_text(&mut self, text: &str) -> anyhow::Result<()> {
        let msg: ClientMessage = serde_json::from_str(text)?;

        let reply = match msg {
            ClientMessage::Operation(frame) => {
                let operation = frame.into_operation(&self.user_id)?;
                match self.coordinator.push_operation(operation).await? {
                    PushOutcome::Queued {
                        operation,
                        conflict,
                    } => ServerMessage::OperationAck {
                        status: AckStatus::Queued,
                        operation_id: Some(operation.id),
                        conflict_id: None,
                        resolved_conflict: conflict.is_some(),
                    },
                    PushOutcome::Blocked { conflict_id, .. } => ServerMessage::OperationAck {
                        status: AckStatus::Blocked,
                        operation_id: None,
                        conflict_id: Some(conflict_id),
                        resolved_conflict: false,
                    },
                }
            }

            ClientMessage::Subscribe { path } => {
                if !self.paths.contains_key(&path) {
                    let subscription = self.coordinator.subscribe(&self.user_id, &path);
                    let id = subscription.id();
                    let forwarder = forward_events(subscription, self.tx.clone());
                    self.paths.insert(path.clone(), (id, forwarder));
                }
                ServerMessage::Subscribed { path }
            }

            ClientMessage::Unsubscribe { path } => {
                let removed = match self.paths.remove(&path) {
                    Some((id, forwarder)) => {
                        forwarder.abort();
                        self.coordinator.unsubscribe(&path, id)
                    }
                    None => false,
                };
                ServerMessage::Unsubscribed { path, removed }
            }

            ClientMessage::Lock { path, action } => {
                let success = match action {
                    LockAction::Acquire => self.coordinator.acquire_lock(&path, &self.user_id).await,
                    LockAction::Release => self.coordinator.release_lock(&path, &self.user_id).await,
                };
                ServerMessage::LockResponse {
                    path,
                    action,
                    success,
                }
            }

            ClientMessage::Flush => {
                let commit_hash = self.coordinator.flush_user(&self.user_id).await?;
                ServerMessage::Flushed { commit_hash }
            }

            ClientMessage::Ping => ServerMessage::Pong,
        };

        send(&self.tx, &reply)
    }

    async fn close(self) {
        for (_, (_, forwarder)) in self.paths {
            forwarder.abort();
        }
        self.inbox.abort();

        if let Err(e) = self.coordinator.disconnect_user(&self.user_id).await {
            warn!("Failed to disconnect {}: {}", self.user_id, e);
        }
    }
}
