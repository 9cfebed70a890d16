use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::blockchain::{Block, Transaction};

/// Response for the chain endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChainResponse {
    /// The length of the chain
    pub length: usize,

    /// The blocks in the chain
    pub chain: Vec<Block>,

    /// Whether the chain is valid
    pub is_valid: bool,

    /// Leading zero hex digits required of mined block hashes
    pub difficulty: usize,

    /// Amount credited to the miner of each block
    pub mining_reward: f64,
}

/// Request for the transaction endpoint; the server signs on the sender's behalf
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TransactionRequest {
    /// The sender's address
    pub sender: String,

    /// The recipient's address
    pub recipient: String,

    /// The amount to transfer
    pub amount: f64,

    /// The sender's private key (hex, for signing)
    pub private_key: String,
}

/// Response for the transaction endpoints
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TransactionResponse {
    /// The message
    pub message: String,

    /// Hash of the admitted transaction
    pub hash: String,

    /// The index of the block expected to include this transaction
    pub block_index: usize,

    /// The admitted transaction, signature included
    pub transaction: Transaction,
}

/// Request for the mine endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MineRequest {
    /// The miner's address
    pub miner_address: String,
}

/// Response for the mine endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MineResponse {
    /// The message
    pub message: String,

    /// The newly mined block
    pub block: Block,

    /// Length of the chain as read right after mining
    pub chain_length: usize,
}

/// Response for the validate endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ValidationResponse {
    pub is_valid: bool,

    /// First defect found, if any
    pub fault: Option<String>,
}

/// Response for the create wallet endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WalletResponse {
    /// The wallet's address
    pub address: String,

    /// The wallet's private key (hex encoded)
    pub private_key: String,
}

/// Response for the balance endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BalanceResponse {
    pub address: String,

    /// Balance derived from mined blocks only
    pub balance: f64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        ErrorResponse {
            error: error.into(),
        }
    }
}
