pub mod p2p;
pub mod protocol;

pub use p2p::{P2PNode, PeerRegistry};
pub use protocol::{Message, MessageType, ProtocolHandler, SyncOutcome};
