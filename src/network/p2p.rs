use crate::core::Blockchain;
use crate::network::protocol::{Message, Outbound, ProtocolHandler};
use crate::{HappeeError, Result};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch, RwLock};
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

/// Pause before asking a new peer for its pool, so a burst of connections
/// does not flood everyone at once.
const POOL_QUERY_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct PeerHandle {
    pub address: String,
    sender: mpsc::UnboundedSender<String>,
}

/// Live connections keyed by a per-connection id. Each entry is the
/// writer queue of one socket.
#[derive(Debug, Clone, Default)]
pub struct PeerRegistry {
    peers: Arc<RwLock<HashMap<Uuid, PeerHandle>>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, address: String, sender: mpsc::UnboundedSender<String>) -> Uuid {
        let id = Uuid::new_v4();
        self.peers.write().await.insert(id, PeerHandle { address, sender });
        id
    }

    pub async fn remove(&self, id: &Uuid) -> Option<PeerHandle> {
        self.peers.write().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }

    pub async fn addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self
            .peers
            .read()
            .await
            .values()
            .map(|peer| peer.address.clone())
            .collect();
        addresses.sort();
        addresses
    }

    /// Best effort: a closed queue is logged and skipped. Returns how many
    /// peers the text was queued for.
    pub async fn broadcast(&self, text: &str) -> usize {
        let snapshot: Vec<(Uuid, PeerHandle)> = self
            .peers
            .read()
            .await
            .iter()
            .map(|(id, peer)| (*id, peer.clone()))
            .collect();

        let mut delivered = 0;
        for (id, peer) in snapshot {
            if peer.sender.send(text.to_string()).is_ok() {
                delivered += 1;
            } else {
                log::debug!("📪 Peer {} ({}) is gone, skipping", id, peer.address);
            }
        }
        delivered
    }
}

/// WebSocket transport for the peer protocol.
#[derive(Clone)]
pub struct P2PNode {
    handler: ProtocolHandler,
    peers: PeerRegistry,
}

impl P2PNode {
    pub fn new(blockchain: Arc<RwLock<Blockchain>>) -> Self {
        Self {
            handler: ProtocolHandler::new(blockchain),
            peers: PeerRegistry::new(),
        }
    }

    pub fn peers(&self) -> &PeerRegistry {
        &self.peers
    }

    pub async fn bind(port: u16) -> Result<TcpListener> {
        TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|e| HappeeError::Network(format!("Failed to bind P2P port {}: {}", port, e)))
    }

    /// Accepts peers until `shutdown` flips to true.
    pub async fn serve(&self, listener: TcpListener, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        if let Ok(addr) = listener.local_addr() {
            log::info!("🌐 P2P listening on ws://{}", addr);
        }

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, remote) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            log::warn!("⚠️ Failed to accept connection: {}", e);
                            continue;
                        }
                    };

                    let node = self.clone();
                    tokio::spawn(async move {
                        match tokio_tungstenite::accept_async(stream).await {
                            Ok(ws) => node.handle_connection(ws, remote.to_string()).await,
                            Err(e) => log::warn!("⚠️ WebSocket handshake with {} failed: {}", remote, e),
                        }
                    });
                }
                _ = shutdown.changed() => {
                    log::info!("🛑 P2P listener stopped");
                    return Ok(());
                }
            }
        }
    }

    pub async fn listen(&self, port: u16, shutdown: watch::Receiver<bool>) -> Result<()> {
        let listener = Self::bind(port).await?;
        self.serve(listener, shutdown).await
    }

    /// Dials `address` and runs the connection in the background.
    pub async fn connect(&self, address: &str) -> Result<()> {
        let url = if address.contains("://") {
            address.to_string()
        } else {
            format!("ws://{}", address)
        };

        log::info!("🔗 Connecting to peer {}", url);
        let (ws, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| HappeeError::Network(format!("Failed to connect to {}: {}", url, e)))?;

        let node = self.clone();
        tokio::spawn(async move { node.handle_connection(ws, url).await });
        Ok(())
    }

    async fn handle_connection<S>(&self, ws: WebSocketStream<S>, address: String)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut sink, mut stream) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let id = self.peers.register(address.clone(), tx.clone()).await;
        log::info!("🤝 Connected to peer {} ({})", address, id);

        queue(&tx, &Message::QueryLatest);
        let delayed = tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(POOL_QUERY_DELAY).await;
            queue(&delayed, &Message::QueryTransactionPool);
        });

        let outgoing = async {
            while let Some(text) = rx.recv().await {
                if sink.send(WsMessage::Text(text)).await.is_err() {
                    break;
                }
            }
        };

        let incoming = async {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => self.on_text(&text, &tx, &address).await,
                    Ok(WsMessage::Close(_)) => break,
                    Err(e) => {
                        log::warn!("⚠️ Connection to {} failed: {}", address, e);
                        break;
                    }
                    _ => {}
                }
            }
        };

        tokio::select! {
            _ = outgoing => {}
            _ = incoming => {}
        }

        self.peers.remove(&id).await;
        log::info!("👋 Disconnected from peer {}", address);
    }

    async fn on_text(&self, text: &str, reply_to: &mpsc::UnboundedSender<String>, address: &str) {
        let message = match Message::decode(text) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("⚠️ Dropped message from {}: {}", address, e);
                return;
            }
        };

        for outbound in self.handler.handle_message(message, address).await {
            match outbound {
                Outbound::Reply(message) => queue(reply_to, &message),
                Outbound::Broadcast(message) => {
                    self.broadcast(&message).await;
                }
            }
        }
    }

    pub async fn broadcast(&self, message: &Message) -> usize {
        match message.encode() {
            Ok(text) => {
                let delivered = self.peers.broadcast(&text).await;
                log::debug!("📡 Broadcast {} to {} peer(s)", message.message_type_name(), delivered);
                delivered
            }
            Err(e) => {
                log::error!("❌ Failed to encode {}: {}", message.message_type_name(), e);
                0
            }
        }
    }

    pub async fn broadcast_latest(&self) -> usize {
        let message = self.handler.latest_message().await;
        self.broadcast(&message).await
    }

    pub async fn broadcast_pool(&self) -> usize {
        let message = self.handler.pool_message().await;
        self.broadcast(&message).await
    }

    pub async fn list_peers(&self) -> Vec<String> {
        self.peers.addresses().await
    }
}

fn queue(sender: &mpsc::UnboundedSender<String>, message: &Message) {
    match message.encode() {
        Ok(text) => {
            // The receiving half only goes away when the socket closes.
            let _ = sender.send(text);
        }
        Err(e) => log::error!("❌ Failed to encode {}: {}", message.message_type_name(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::blockchain::tests::chain_with;
    use crate::core::Block;
    use crate::crypto::keys::PrivateKey;

    #[tokio::test]
    async fn test_broadcast_skips_closed_peers() {
        let registry = PeerRegistry::new();
        let (alive_tx, mut alive_rx) = mpsc::unbounded_channel();
        let (dead_tx, dead_rx) = mpsc::unbounded_channel();
        registry.register("alive".to_string(), alive_tx).await;
        let dead = registry.register("dead".to_string(), dead_tx).await;
        drop(dead_rx);

        assert_eq!(registry.broadcast("hello").await, 1);
        assert_eq!(alive_rx.recv().await.unwrap(), "hello");

        assert!(registry.remove(&dead).await.is_some());
        assert_eq!(registry.addresses().await, vec!["alive".to_string()]);
    }

    #[tokio::test]
    async fn test_broadcast_latest_sends_tip() {
        let chain = Arc::new(RwLock::new(Blockchain::new(None).unwrap()));
        let node = P2PNode::new(chain);
        let (tx, mut rx) = mpsc::unbounded_channel();
        node.peers().register("peer".to_string(), tx).await;

        assert_eq!(node.broadcast_latest().await, 1);
        let message = Message::decode(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(message, Message::ResponseBlockchain(vec![Block::genesis()]));
    }

    #[tokio::test]
    async fn test_peers_sync_over_websocket() {
        let reward = PrivateKey::new().unwrap().address();
        let mut ahead = Blockchain::new(None).unwrap();
        ahead.replace_chain(chain_with(&[1, 1, 1], &reward)).unwrap();

        let server = P2PNode::new(Arc::new(RwLock::new(ahead)));
        let listener = P2PNode::bind(0).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (stop_tx, stop_rx) = watch::channel(false);
        let serving = server.clone();
        tokio::spawn(async move { serving.serve(listener, stop_rx).await });

        let behind = Arc::new(RwLock::new(Blockchain::new(None).unwrap()));
        let client = P2PNode::new(behind.clone());
        client.connect(&format!("127.0.0.1:{}", port)).await.unwrap();

        let mut synced = false;
        for _ in 0..100 {
            if behind.read().await.len() == 4 {
                synced = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(synced);
        assert_eq!(client.list_peers().await.len(), 1);

        stop_tx.send(true).unwrap();
    }
}
