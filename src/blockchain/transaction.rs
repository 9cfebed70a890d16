use log::warn;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use utoipa::ToSchema;

use super::crypto::{verify_signature, Address, CryptoError, DigitalSignature, KeyPair};

/// Errors that can occur during transaction operations
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Cannot sign transactions for other wallets")]
    Authorization,

    #[error("No signature in this transaction")]
    MissingSignature,

    #[error("Crypto error: {0}")]
    CryptoError(#[from] CryptoError),
}

/// A value transfer between two addresses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Transaction {
    /// Sender's address; `None` marks a mining reward
    pub from_address: Option<Address>,

    /// Recipient's address
    pub to_address: Address,

    /// Amount being transferred
    pub amount: f64,

    /// Signature over the transaction hash
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<DigitalSignature>,
}

impl Transaction {
    /// Creates a new unsigned transfer
    pub fn new(from_address: Address, to_address: Address, amount: f64) -> Self {
        Transaction {
            from_address: Some(from_address),
            to_address,
            amount,
            signature: None,
        }
    }

    /// Creates a reward (coinbase) transaction crediting `to_address`
    pub fn reward(to_address: Address, amount: f64) -> Self {
        Transaction {
            from_address: None,
            to_address,
            amount,
            signature: None,
        }
    }

    pub fn is_reward(&self) -> bool {
        self.from_address.is_none()
    }

    /// Hashes sender, recipient and amount, in that order
    ///
    /// The signature is not part of this digest: it is the payload that
    /// gets signed.
    pub fn calculate_hash(&self) -> String {
        let from = self.from_address.as_ref().map(Address::as_str).unwrap_or("");

        let mut hasher = Sha256::new();
        hasher.update(format!("{}{}{}", from, self.to_address, self.amount).as_bytes());

        format!("{:x}", hasher.finalize())
    }

    /// Signs the transaction with the sender's key pair
    ///
    /// Fails with [`TransactionError::Authorization`] if `key_pair` does not
    /// belong to the sender. Reward transactions have no sender and can never
    /// be signed.
    pub fn sign<K: KeyPair + ?Sized>(&mut self, key_pair: &K) -> Result<(), TransactionError> {
        let public_key = key_pair.public_key_hex();

        match &self.from_address {
            Some(from) if from.as_str() == public_key => {}
            _ => return Err(TransactionError::Authorization),
        }

        let signature = key_pair.sign_digest(self.calculate_hash().as_bytes())?;
        self.signature = Some(signature);

        Ok(())
    }

    /// Verifies the transaction's signature against its sender
    ///
    /// Reward transactions are always valid. Undecodable key or signature
    /// material counts as a failed verification rather than an error.
    pub fn verify(&self) -> Result<bool, TransactionError> {
        let from = match &self.from_address {
            Some(from) => from,
            None => return Ok(true),
        };

        let signature = match &self.signature {
            Some(signature) if !signature.0.is_empty() => signature,
            _ => return Err(TransactionError::MissingSignature),
        };

        match verify_signature(from.as_str(), self.calculate_hash().as_bytes(), signature) {
            Ok(valid) => Ok(valid),
            Err(err) => {
                warn!("Unverifiable transaction from {}: {}", from, err);
                Ok(false)
            }
        }
    }

    /// Feeds every field, signature included, into a block hasher
    ///
    /// Each field is length-prefixed so adjacent fields cannot run into one
    /// another.
    pub(crate) fn digest_into(&self, hasher: &mut Sha256) {
        match &self.from_address {
            Some(from) => {
                hasher.update([1u8]);
                update_field(hasher, from.as_str().as_bytes());
            }
            None => hasher.update([0u8]),
        }

        update_field(hasher, self.to_address.as_str().as_bytes());
        hasher.update(self.amount.to_be_bytes());

        match &self.signature {
            Some(signature) => {
                hasher.update([1u8]);
                update_field(hasher, signature.0.as_bytes());
            }
            None => hasher.update([0u8]),
        }
    }
}

fn update_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}
