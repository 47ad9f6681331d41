//! Local signing wallet

pub mod wallet;

pub use wallet::Wallet;
