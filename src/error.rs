use thiserror::Error;

pub type Result<T> = std::result::Result<T, HappeeError>;

#[derive(Error, Debug)]
pub enum HappeeError {
    #[error("Structural error: {0}")]
    Structural(String),

    #[error("Linkage error: {0}")]
    Linkage(String),

    #[error("Proof-of-work error: {0}")]
    ProofOfWork(String),

    #[error("Timestamp error: {0}")]
    Timestamp(String),

    #[error("Signature error: {0}")]
    Signature(String),

    #[error("Balance error: {0}")]
    Balance(String),

    #[error("Double spend detected: {0}")]
    DoubleSpend(String),

    #[error("Reference error: {0}")]
    Reference(String),

    #[error("Chain selection rejected: {0}")]
    ChainSelectionRejected(String),

    #[error("Pool rejected transaction: {0}")]
    PoolRejected(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Mining error: {0}")]
    Mining(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: u64, available: u64 },
}
