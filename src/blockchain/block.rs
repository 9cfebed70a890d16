use chrono::{DateTime, SecondsFormat, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;

use super::transaction::Transaction;

/// Seconds since the epoch of the genesis block's timestamp (2019-01-01T00:00:00Z)
const GENESIS_TIMESTAMP: i64 = 1_546_300_800;

/// Previous hash recorded by the genesis block
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Represents a block in the blockchain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Block {
    /// Timestamp when the block was created
    #[schema(value_type = String, example = "2023-01-01T12:00:00Z")]
    pub timestamp: DateTime<Utc>,

    /// List of transactions included in this block
    pub transactions: Vec<Transaction>,

    /// Hash of the previous block
    pub previous_hash: String,

    /// Proof of work counter
    pub nonce: u64,

    /// Hash of the current block (cached)
    pub hash: String,
}

impl Block {
    /// Creates a new, not yet mined, block
    ///
    /// The hash is computed immediately at nonce 0 and only becomes an
    /// admissible proof of work after [`Block::mine`].
    pub fn new(
        timestamp: DateTime<Utc>,
        transactions: Vec<Transaction>,
        previous_hash: String,
    ) -> Self {
        let mut block = Block {
            timestamp,
            transactions,
            previous_hash,
            nonce: 0,
            hash: String::new(),
        };

        block.hash = block.calculate_hash();
        block
    }

    /// The fixed first block of every chain; it is never mined
    pub fn genesis() -> Self {
        let timestamp = DateTime::<Utc>::from_timestamp(GENESIS_TIMESTAMP, 0).unwrap_or_default();

        Block::new(timestamp, Vec::new(), GENESIS_PREVIOUS_HASH.to_string())
    }

    /// Calculates the SHA-256 hash of the block as a hexadecimal string
    ///
    /// Covers the previous hash, timestamp, every field of every transaction
    /// (in order) and the nonce. The cached `hash` field is not an input.
    pub fn calculate_hash(&self) -> String {
        let mut hasher = Sha256::new();

        hasher.update(self.previous_hash.as_bytes());
        hasher.update(
            self.timestamp
                .to_rfc3339_opts(SecondsFormat::Nanos, true)
                .as_bytes(),
        );

        hasher.update((self.transactions.len() as u64).to_be_bytes());
        for transaction in &self.transactions {
            transaction.digest_into(&mut hasher);
        }

        hasher.update(self.nonce.to_be_bytes());

        format!("{:x}", hasher.finalize())
    }

    /// Whether the cached hash starts with `difficulty` zero hex digits
    pub fn meets_difficulty(&self, difficulty: usize) -> bool {
        self.hash.len() >= difficulty && self.hash.bytes().take(difficulty).all(|b| b == b'0')
    }

    /// Searches nonces until the hash meets `difficulty`
    ///
    /// There is no iteration cap; callers pick a difficulty that bounds the
    /// expected work.
    pub fn mine(&mut self, difficulty: usize) {
        while !self.meets_difficulty(difficulty) {
            self.nonce += 1;
            self.hash = self.calculate_hash();
        }

        debug!("Block mined after {} attempts: {}", self.nonce + 1, self.hash);
    }

    /// Checks that every transaction in the block verifies
    pub fn has_valid_transactions(&self) -> bool {
        self.transactions
            .iter()
            .all(|transaction| matches!(transaction.verify(), Ok(true)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::crypto::{DigitalSignature, Wallet};
    use crate::blockchain::Address;

    fn signed_transfer(amount: f64) -> Transaction {
        let sender = Wallet::new();
        let recipient = Wallet::new();
        let mut transaction =
            Transaction::new(sender.address().clone(), recipient.address().clone(), amount);
        transaction.sign(&sender).unwrap();
        transaction
    }

    #[test]
    fn test_new_block() {
        let transactions = vec![
            Transaction::reward(Address("recipient1".to_string()), 10.0),
            Transaction::reward(Address("recipient2".to_string()), 20.0),
        ];

        let block = Block::new(Utc::now(), transactions, "previous_hash".to_string());

        assert_eq!(block.nonce, 0);
        assert_eq!(block.previous_hash, "previous_hash");
        assert_eq!(block.hash, block.calculate_hash());
        assert_eq!(block.hash.len(), 64); // SHA-256 hash is 64 characters in hex
    }

    #[test]
    fn test_genesis_block() {
        let genesis = Block::genesis();

        assert_eq!(genesis.previous_hash, GENESIS_PREVIOUS_HASH);
        assert!(genesis.transactions.is_empty());
        assert_eq!(genesis.timestamp.to_rfc3339(), "2019-01-01T00:00:00+00:00");
        assert_eq!(genesis, Block::genesis());
    }

    #[test]
    fn test_calculate_hash_is_idempotent() {
        let block = Block::new(Utc::now(), vec![signed_transfer(1.0)], "abc".to_string());

        assert_eq!(block.calculate_hash(), block.calculate_hash());
    }

    #[test]
    fn test_mine_meets_difficulty() {
        for difficulty in 0..=3 {
            let mut block = Block::new(Utc::now(), vec![signed_transfer(7.0)], "prev".to_string());
            block.mine(difficulty);

            assert!(block.hash.starts_with(&"0".repeat(difficulty)));
            assert_eq!(block.hash, block.calculate_hash());
        }
    }

    #[test]
    fn test_hash_sensitive_to_transaction_contents() {
        let mut block = Block::new(Utc::now(), vec![signed_transfer(5.0)], "prev".to_string());
        let original = block.calculate_hash();

        block.transactions[0].amount = 6.0;
        assert_ne!(block.calculate_hash(), original);

        block.transactions[0].amount = 5.0;
        assert_eq!(block.calculate_hash(), original);

        block.transactions[0].signature = Some(DigitalSignature("00".to_string()));
        assert_ne!(block.calculate_hash(), original);
    }

    #[test]
    fn test_hash_sensitive_to_transaction_order() {
        let first = signed_transfer(1.0);
        let second = signed_transfer(2.0);
        let timestamp = Utc::now();

        let a = Block::new(timestamp, vec![first.clone(), second.clone()], "prev".to_string());
        let b = Block::new(timestamp, vec![second, first], "prev".to_string());

        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn test_hash_sensitive_to_header_fields() {
        let timestamp = Utc::now();
        let block = Block::new(timestamp, Vec::new(), "prev".to_string());

        let other_prev = Block::new(timestamp, Vec::new(), "other".to_string());
        assert_ne!(block.hash, other_prev.hash);

        let mut other_nonce = block.clone();
        other_nonce.nonce += 1;
        assert_ne!(block.hash, other_nonce.calculate_hash());
    }

    #[test]
    fn test_has_valid_transactions() {
        let block = Block::new(
            Utc::now(),
            vec![
                signed_transfer(3.0),
                Transaction::reward(Address("miner".to_string()), 100.0),
            ],
            "prev".to_string(),
        );
        assert!(block.has_valid_transactions());

        let mut tampered = block.clone();
        tampered.transactions[0].amount = 300.0;
        assert!(!tampered.has_valid_transactions());

        let mut unsigned = block;
        unsigned.transactions[0].signature = None;
        assert!(!unsigned.has_valid_transactions());
    }
}
