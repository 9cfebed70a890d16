use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use std::fmt;
use std::str::FromStr;

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Decoding error: {0}")]
    DecodingError(String),
}

/// A wallet address: the hex-encoded public key of its owner
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct Address(pub String);

impl Address {
    /// Creates a new address from a public key
    pub fn from_public_key(public_key: &VerifyingKey) -> Self {
        Address(hex::encode(public_key.as_bytes()))
    }

    /// Converts the address back into the public key it encodes
    pub fn to_public_key(&self) -> Result<VerifyingKey, CryptoError> {
        let bytes = hex::decode(&self.0).map_err(|e| CryptoError::DecodingError(e.to_string()))?;

        let key_bytes: [u8; 32] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidPublicKey("Invalid public key length".to_string())
        })?;

        VerifyingKey::from_bytes(&key_bytes)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Address {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        hex::decode(s).map_err(|e| CryptoError::DecodingError(e.to_string()))?;

        Ok(Address(s.to_string()))
    }
}

/// A hex-encoded signature over a transaction hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DigitalSignature(pub String);

impl DigitalSignature {
    pub fn from_signature(signature: &Signature) -> Self {
        DigitalSignature(hex::encode(signature.to_bytes()))
    }

    pub fn to_signature(&self) -> Result<Signature, CryptoError> {
        let bytes = hex::decode(&self.0).map_err(|e| CryptoError::DecodingError(e.to_string()))?;

        let signature_bytes: [u8; 64] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidSignature("Invalid signature length".to_string())
        })?;

        Ok(Signature::from_bytes(&signature_bytes))
    }
}

/// Signing capability the ledger consumes.
///
/// The ledger never generates keys itself; anything able to expose a hex
/// public key and sign a digest with the matching secret can author
/// transactions.
pub trait KeyPair {
    /// The hex-encoded public key, which doubles as the owner's address
    fn public_key_hex(&self) -> String;

    /// Signs the given digest bytes
    fn sign_digest(&self, digest: &[u8]) -> Result<DigitalSignature, CryptoError>;
}

/// An ed25519 key pair
#[derive(Debug, Clone)]
pub struct Wallet {
    signing_key: SigningKey,
    address: Address,
}

impl Wallet {
    /// Creates a new wallet with a random keypair
    pub fn new() -> Self {
        let mut csprng = OsRng;
        let signing_key = SigningKey::generate(&mut csprng);
        let address = Address::from_public_key(&signing_key.verifying_key());

        Wallet {
            signing_key,
            address,
        }
    }

    /// Restores a wallet from raw secret key bytes
    pub fn from_secret_key(secret_key_bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes_array: [u8; 32] = secret_key_bytes.try_into().map_err(|_| {
            CryptoError::InvalidPrivateKey("Invalid private key length".to_string())
        })?;

        let signing_key = SigningKey::from_bytes(&bytes_array);
        let address = Address::from_public_key(&signing_key.verifying_key());

        Ok(Wallet {
            signing_key,
            address,
        })
    }

    /// Restores a wallet from a hex-encoded secret key
    pub fn from_secret_hex(secret_key_hex: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(secret_key_hex.trim())
            .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;

        Self::from_secret_key(&bytes)
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Exports the wallet's secret key as bytes
    pub fn export_secret_key(&self) -> Vec<u8> {
        self.signing_key.to_bytes().to_vec()
    }
}

impl Default for Wallet {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyPair for Wallet {
    fn public_key_hex(&self) -> String {
        self.address.0.clone()
    }

    fn sign_digest(&self, digest: &[u8]) -> Result<DigitalSignature, CryptoError> {
        let signature = self.signing_key.sign(digest);
        Ok(DigitalSignature::from_signature(&signature))
    }
}

/// Checks `signature` over `digest` against the public key encoded in `public_key_hex`
///
/// Malformed key or signature material is reported as an error; a well-formed
/// signature that simply does not match yields `Ok(false)`.
pub fn verify_signature(
    public_key_hex: &str,
    digest: &[u8],
    signature: &DigitalSignature,
) -> Result<bool, CryptoError> {
    let public_key = Address(public_key_hex.to_string()).to_public_key()?;
    let signature = signature.to_signature()?;

    Ok(public_key.verify(digest, &signature).is_ok())
}
