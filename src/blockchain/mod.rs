// Blockchain module
//
// This module contains the core ledger implementation:
// - Transaction structure and signing
// - Block structure and proof of work
// - Blockchain structure (chain, pending pool, balances, validation)
// - Key pair boundary

pub mod block;
pub mod chain;
pub mod crypto;
pub mod transaction;

// Re-export main components for easier access
pub use block::Block;
pub use chain::{Blockchain, BlockchainError};
pub use crypto::{Address, Wallet};
pub use transaction::{Transaction, TransactionError};
