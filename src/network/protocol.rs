use crate::core::{Block, Blockchain, Transaction};
use crate::{HappeeError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Wire codes carried in the envelope's `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    QueryLatest = 0,
    QueryAll = 1,
    ResponseBlockchain = 2,
    QueryTransactionPool = 3,
    ResponseTransactionPool = 4,
}

impl TryFrom<u8> for MessageType {
    type Error = HappeeError;

    fn try_from(code: u8) -> Result<Self> {
        match code {
            0 => Ok(MessageType::QueryLatest),
            1 => Ok(MessageType::QueryAll),
            2 => Ok(MessageType::ResponseBlockchain),
            3 => Ok(MessageType::QueryTransactionPool),
            4 => Ok(MessageType::ResponseTransactionPool),
            other => Err(HappeeError::Network(format!("Unknown message type {}", other))),
        }
    }
}

/// `data` holds the payload as a JSON string of its own, so responses are
/// encoded twice.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    message_type: u8,
    data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    QueryLatest,
    QueryAll,
    ResponseBlockchain(Vec<Block>),
    QueryTransactionPool,
    ResponseTransactionPool(Vec<Transaction>),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::QueryLatest => MessageType::QueryLatest,
            Message::QueryAll => MessageType::QueryAll,
            Message::ResponseBlockchain(_) => MessageType::ResponseBlockchain,
            Message::QueryTransactionPool => MessageType::QueryTransactionPool,
            Message::ResponseTransactionPool(_) => MessageType::ResponseTransactionPool,
        }
    }

    pub fn message_type_name(&self) -> &'static str {
        match self {
            Message::QueryLatest => "query_latest",
            Message::QueryAll => "query_all",
            Message::ResponseBlockchain(_) => "response_blockchain",
            Message::QueryTransactionPool => "query_transaction_pool",
            Message::ResponseTransactionPool(_) => "response_transaction_pool",
        }
    }

    pub fn encode(&self) -> Result<String> {
        let data = match self {
            Message::ResponseBlockchain(blocks) => Some(serde_json::to_string(blocks)?),
            Message::ResponseTransactionPool(txs) => Some(serde_json::to_string(txs)?),
            _ => None,
        };

        let envelope = Envelope {
            message_type: self.message_type() as u8,
            data,
        };
        Ok(serde_json::to_string(&envelope)?)
    }

    pub fn decode(text: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(text)
            .map_err(|e| HappeeError::Network(format!("Malformed envelope: {}", e)))?;

        let payload = |data: Option<String>| {
            data.ok_or_else(|| HappeeError::Network("Response carries no data".to_string()))
        };

        match MessageType::try_from(envelope.message_type)? {
            MessageType::QueryLatest => Ok(Message::QueryLatest),
            MessageType::QueryAll => Ok(Message::QueryAll),
            MessageType::QueryTransactionPool => Ok(Message::QueryTransactionPool),
            MessageType::ResponseBlockchain => {
                let blocks = serde_json::from_str(&payload(envelope.data)?)
                    .map_err(|e| HappeeError::Network(format!("Malformed block list: {}", e)))?;
                Ok(Message::ResponseBlockchain(blocks))
            }
            MessageType::ResponseTransactionPool => {
                let txs = serde_json::from_str(&payload(envelope.data)?)
                    .map_err(|e| HappeeError::Network(format!("Malformed transaction list: {}", e)))?;
                Ok(Message::ResponseTransactionPool(txs))
            }
        }
    }
}

/// What a received block list did to the local chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The last block extended our tip.
    Appended,
    /// The peer is ahead and we cannot link its tip; ask for everything.
    QueryAll,
    /// The received chain replaced ours.
    Replaced,
    /// The peer is not ahead of us.
    NotBehind,
    /// The received data was invalid or carried too little work.
    Rejected,
}

impl SyncOutcome {
    pub fn changed_tip(&self) -> bool {
        matches!(self, SyncOutcome::Appended | SyncOutcome::Replaced)
    }
}

pub fn handle_blockchain_response(chain: &mut Blockchain, received: Vec<Block>) -> SyncOutcome {
    let Some(last_received) = received.last() else {
        log::debug!("📭 Received an empty block list");
        return SyncOutcome::Rejected;
    };

    if let Err(e) = last_received.validate_structure() {
        log::warn!("❌ Received block is malformed: {}", e);
        return SyncOutcome::Rejected;
    }

    let tip = chain.latest_block();
    if last_received.index <= tip.index {
        log::debug!(
            "📦 Peer tip {} is not ahead of ours ({}), nothing to do",
            last_received.index,
            tip.index
        );
        return SyncOutcome::NotBehind;
    }

    log::info!(
        "📦 Peer is ahead: we have {}, peer has {}",
        tip.index,
        last_received.index
    );

    if last_received.previous_hash == tip.hash {
        let block = last_received.clone();
        return match chain.add_block(block) {
            Ok(()) => SyncOutcome::Appended,
            Err(e) => {
                log::warn!("❌ Could not append received block: {}", e);
                SyncOutcome::Rejected
            }
        };
    }

    if received.len() == 1 {
        log::info!("🔍 Cannot link received block, querying the full chain");
        return SyncOutcome::QueryAll;
    }

    match chain.replace_chain(received) {
        Ok(()) => SyncOutcome::Replaced,
        Err(e) => {
            log::warn!("❌ Received chain not adopted: {}", e);
            SyncOutcome::Rejected
        }
    }
}

/// Pools every acceptable transaction. A rejection does not stop the rest.
/// Returns how many were added.
pub fn handle_transaction_pool_response(chain: &mut Blockchain, received: Vec<Transaction>) -> usize {
    let mut added = 0;
    for tx in received {
        let id = tx.id.clone();
        match chain.add_to_pool(tx) {
            Ok(()) => added += 1,
            Err(e) => log::debug!("📭 Skipped pool transaction {}: {}", id, e),
        }
    }
    added
}

/// Where a message produced by the handler should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Reply(Message),
    Broadcast(Message),
}

/// Applies peer messages to the shared chain and says what to send back.
#[derive(Clone)]
pub struct ProtocolHandler {
    blockchain: Arc<RwLock<Blockchain>>,
}

impl ProtocolHandler {
    pub fn new(blockchain: Arc<RwLock<Blockchain>>) -> Self {
        Self { blockchain }
    }

    pub async fn latest_message(&self) -> Message {
        let chain = self.blockchain.read().await;
        Message::ResponseBlockchain(vec![chain.latest_block().clone()])
    }

    pub async fn chain_message(&self) -> Message {
        let blocks = self.blockchain.read().await.blocks();
        Message::ResponseBlockchain(blocks.as_ref().clone())
    }

    pub async fn pool_message(&self) -> Message {
        let chain = self.blockchain.read().await;
        Message::ResponseTransactionPool(chain.pool().snapshot())
    }

    pub async fn handle_message(&self, message: Message, peer: &str) -> Vec<Outbound> {
        log::debug!("📨 Handling {} message from peer {}", message.message_type_name(), peer);

        match message {
            Message::QueryLatest => vec![Outbound::Reply(self.latest_message().await)],
            Message::QueryAll => vec![Outbound::Reply(self.chain_message().await)],
            Message::QueryTransactionPool => vec![Outbound::Reply(self.pool_message().await)],
            Message::ResponseBlockchain(blocks) => {
                let outcome = {
                    let mut chain = self.blockchain.write().await;
                    handle_blockchain_response(&mut chain, blocks)
                };

                match outcome {
                    SyncOutcome::QueryAll => vec![Outbound::Reply(Message::QueryAll)],
                    outcome if outcome.changed_tip() => {
                        vec![Outbound::Broadcast(self.latest_message().await)]
                    }
                    _ => Vec::new(),
                }
            }
            Message::ResponseTransactionPool(txs) => {
                let added = {
                    let mut chain = self.blockchain.write().await;
                    handle_transaction_pool_response(&mut chain, txs)
                };

                if added > 0 {
                    vec![Outbound::Broadcast(self.pool_message().await)]
                } else {
                    Vec::new()
                }
            }
        }
    }
}
