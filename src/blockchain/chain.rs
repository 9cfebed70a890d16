use chrono::Utc;
use log::{info, warn};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;

use super::block::Block;
use super::crypto::Address;
use super::transaction::{Transaction, TransactionError};
use crate::config::LedgerConfig;

/// Errors that can occur during blockchain operations
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("Transaction error: {0}")]
    TransactionError(#[from] TransactionError),

    #[error("Malformed transaction: {0}")]
    MalformedTransaction(String),

    #[error("Cannot add transaction with an invalid signature to the chain")]
    InvalidSignature,
}

/// First defect found while walking the chain
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainFault {
    #[error("block {index} contains an invalid transaction")]
    InvalidTransactions { index: usize },

    #[error("block {index} hash does not match its contents")]
    HashMismatch { index: usize },

    #[error("block {index} does not link to the hash of block {}", .index - 1)]
    BrokenLink { index: usize },
}

#[derive(Debug)]
struct ChainState {
    /// The chain of blocks; index 0 is always the genesis block
    chain: Vec<Block>,

    /// Transactions waiting to be included in the next block
    pending_transactions: Vec<Transaction>,

    /// Set while a mined block is being searched for but not yet appended
    mining_in_progress: bool,
}

impl ChainState {
    fn last_block(&self) -> &Block {
        // The genesis block is pushed on construction and blocks are never removed.
        &self.chain[self.chain.len() - 1]
    }
}

/// Represents the blockchain
#[derive(Debug)]
pub struct Blockchain {
    state: RwLock<ChainState>,

    /// Held for the whole of a mining round
    mining: Mutex<()>,

    /// Mining difficulty (number of leading zeros required in hash)
    difficulty: usize,

    /// Mining reward
    mining_reward: f64,
}

impl Default for Blockchain {
    fn default() -> Self {
        Self::new(LedgerConfig::default())
    }
}

impl Blockchain {
    /// Creates a new blockchain holding only the genesis block
    pub fn new(config: LedgerConfig) -> Self {
        Blockchain {
            state: RwLock::new(ChainState {
                chain: vec![Block::genesis()],
                pending_transactions: Vec::new(),
                mining_in_progress: false,
            }),
            mining: Mutex::new(()),
            difficulty: config.difficulty,
            mining_reward: config.mining_reward,
        }
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    pub fn mining_reward(&self) -> f64 {
        self.mining_reward
    }

    /// Number of blocks in the chain, genesis included
    pub fn len(&self) -> usize {
        self.state.read().chain.len()
    }

    /// Gets the last block in the chain
    pub fn get_last_block(&self) -> Block {
        self.state.read().last_block().clone()
    }

    pub fn get_chain(&self) -> Vec<Block> {
        self.state.read().chain.clone()
    }

    pub fn get_pending_transactions(&self) -> Vec<Transaction> {
        self.state.read().pending_transactions.clone()
    }

    /// Adds a signed transfer to the pending transactions
    ///
    /// Reward transactions cannot enter through here; they are only created
    /// by [`Blockchain::mine_pending`]. Sender balances are not checked, so a
    /// sender may overspend.
    ///
    /// # Returns
    ///
    /// The index of the block that will include this transaction, provided
    /// the next round is mined on this chain
    pub fn submit_transaction(&self, transaction: Transaction) -> Result<usize, BlockchainError> {
        if transaction.is_reward() {
            return Err(BlockchainError::MalformedTransaction(
                "Reward transactions are only created by mining".to_string(),
            ));
        }

        let sender = match &transaction.from_address {
            Some(from) if !from.is_empty() => from.clone(),
            _ => {
                return Err(BlockchainError::MalformedTransaction(
                    "Transaction must include from and to address".to_string(),
                ))
            }
        };

        if transaction.to_address.is_empty() {
            return Err(BlockchainError::MalformedTransaction(
                "Transaction must include from and to address".to_string(),
            ));
        }

        if !transaction.amount.is_finite() || transaction.amount < 0.0 {
            return Err(BlockchainError::MalformedTransaction(format!(
                "Amount must be a non-negative number: {}",
                transaction.amount
            )));
        }

        if !transaction.verify()? {
            warn!("Rejected transaction from {} with invalid signature", sender);
            return Err(BlockchainError::InvalidSignature);
        }

        let mut state = self.state.write();
        state.pending_transactions.push(transaction);
        info!(
            "Admitted transaction from {} ({} pending)",
            sender,
            state.pending_transactions.len()
        );

        // A round already under way mined a snapshot without this transaction.
        Ok(state.chain.len() + usize::from(state.mining_in_progress))
    }

    /// Mines the pending transactions into a new block and appends it
    ///
    /// The pool is snapshotted, mined without holding the state lock, and
    /// then, in one write, the block is appended and the mined transactions
    /// are replaced by a reward for `miner_address`. That reward only counts
    /// towards balances once a later round mines it.
    pub fn mine_pending(&self, miner_address: &Address) -> Result<Block, BlockchainError> {
        if miner_address.is_empty() {
            return Err(BlockchainError::MalformedTransaction(
                "Mining reward address must not be empty".to_string(),
            ));
        }

        let _round = self.mining.lock();

        // While `_round` is held nothing else appends blocks, and submissions
        // only push to the end of the pool, so the snapshot stays a prefix.
        let (mut block, mined_count) = {
            let mut state = self.state.write();
            state.mining_in_progress = true;
            let block = Block::new(
                Utc::now(),
                state.pending_transactions.clone(),
                state.last_block().hash.clone(),
            );
            (block, state.pending_transactions.len())
        };

        block.mine(self.difficulty);

        let mut state = self.state.write();
        let submitted_meanwhile = state.pending_transactions.split_off(mined_count);

        state.chain.push(block.clone());

        let mut pending = Vec::with_capacity(submitted_meanwhile.len() + 1);
        pending.push(Transaction::reward(miner_address.clone(), self.mining_reward));
        pending.extend(submitted_meanwhile);
        state.pending_transactions = pending;
        state.mining_in_progress = false;

        info!(
            "Mined block {} with {} transactions: {}",
            state.chain.len() - 1,
            block.transactions.len(),
            block.hash
        );

        Ok(block)
    }

    /// Sums every transfer touching `address` across the chain
    ///
    /// Pending transactions are not counted.
    pub fn balance_of(&self, address: &Address) -> f64 {
        let state = self.state.read();
        let mut balance = 0.0;

        for block in &state.chain {
            for transaction in &block.transactions {
                if transaction.from_address.as_ref() == Some(address) {
                    balance -= transaction.amount;
                }

                if &transaction.to_address == address {
                    balance += transaction.amount;
                }
            }
        }

        balance
    }

    /// Validates the blockchain
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Walks the chain from block 1 and reports the first defect
    ///
    /// The genesis block has no predecessor and is never checked.
    pub fn validate(&self) -> Result<(), ChainFault> {
        let state = self.state.read();

        for (index, pair) in state.chain.windows(2).enumerate() {
            let index = index + 1;
            let (previous_block, current_block) = (&pair[0], &pair[1]);

            let fault = if !current_block.has_valid_transactions() {
                ChainFault::InvalidTransactions { index }
            } else if current_block.hash != current_block.calculate_hash() {
                ChainFault::HashMismatch { index }
            } else if current_block.previous_hash != previous_block.hash {
                ChainFault::BrokenLink { index }
            } else {
                continue;
            };

            warn!("Chain validation failed: {}", fault);
            return Err(fault);
        }

        Ok(())
    }

    /// Mutates a stored block in place, bypassing every protocol rule
    ///
    /// This exists only to demonstrate that validation detects tampering.
    /// Returns false if there is no block at `index`.
    #[cfg(test)]
    pub fn tamper_with_block<F>(&self, index: usize, tamper: F) -> bool
    where
        F: FnOnce(&mut Block),
    {
        let mut state = self.state.write();

        match state.chain.get_mut(index) {
            Some(block) => {
                warn!("Tampering with block {}", index);
                tamper(block);
                true
            }
            None => false,
        }
    }
}
