//! Author keys, signing and hashing.
//!
//! An author is an ed25519 keypair. Its public identity is an address of
//! the form `@suzy.<base58 public key>`, where `suzy` is a four character
//! shortname chosen by the author. Secrets and signatures are base58 text.

use std::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Length of an author shortname.
pub const SHORTNAME_LEN: usize = 4;

/// Errors produced while handling author keys.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid shortname '{0}': must be 4 characters, a lowercase letter followed by lowercase letters or digits")]
    InvalidShortname(String),
    #[error("invalid author address '{0}'")]
    InvalidAddress(String),
    #[error("invalid secret key")]
    InvalidSecret,
    #[error("secret key does not match author address {0}")]
    KeypairMismatch(String),
}

/// A parsed author address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorAddress {
    pub shortname: String,
    pub public_key: VerifyingKey,
}

impl AuthorAddress {
    /// Parse an address of the form `@abcd.<base58 public key>`.
    pub fn parse(address: &str) -> Result<Self, CryptoError> {
        let invalid = || CryptoError::InvalidAddress(address.to_string());

        let rest = address.strip_prefix('@').ok_or_else(invalid)?;
        let (shortname, encoded) = rest.split_once('.').ok_or_else(invalid)?;
        if !is_valid_shortname(shortname) {
            return Err(invalid());
        }

        let bytes = bs58::decode(encoded).into_vec().map_err(|_| invalid())?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| invalid())?;
        let public_key = VerifyingKey::from_bytes(&bytes).map_err(|_| invalid())?;

        // Reject non-canonical encodings so one key has exactly one address.
        if bs58::encode(public_key.as_bytes()).into_string() != encoded {
            return Err(invalid());
        }

        Ok(Self {
            shortname: shortname.to_string(),
            public_key,
        })
    }
}

impl fmt::Display for AuthorAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "@{}.{}",
            self.shortname,
            bs58::encode(self.public_key.as_bytes()).into_string()
        )
    }
}

/// An author's address together with its base58 encoded secret key.
///
/// This is the form stored in keypair files.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorKeypair {
    pub address: String,
    pub secret: String,
}

impl fmt::Debug for AuthorKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorKeypair")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl AuthorKeypair {
    /// Generate a new random keypair for the given shortname.
    pub fn generate(shortname: &str) -> Result<Self, CryptoError> {
        let seed: [u8; 32] = rand::random();
        Self::from_seed(shortname, &seed)
    }

    /// Build a keypair deterministically from a 32 byte seed.
    pub fn from_seed(shortname: &str, seed: &[u8; 32]) -> Result<Self, CryptoError> {
        if !is_valid_shortname(shortname) {
            return Err(CryptoError::InvalidShortname(shortname.to_string()));
        }
        let signing_key = SigningKey::from_bytes(seed);
        let address = AuthorAddress {
            shortname: shortname.to_string(),
            public_key: signing_key.verifying_key(),
        };
        Ok(Self {
            address: address.to_string(),
            secret: bs58::encode(signing_key.to_bytes()).into_string(),
        })
    }

    /// Decode the signing key, checking it belongs to this keypair's address.
    pub fn signing_key(&self) -> Result<SigningKey, CryptoError> {
        let address = AuthorAddress::parse(&self.address)?;
        let bytes = bs58::decode(&self.secret)
            .into_vec()
            .map_err(|_| CryptoError::InvalidSecret)?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidSecret)?;
        let signing_key = SigningKey::from_bytes(&bytes);
        if signing_key.verifying_key() != address.public_key {
            return Err(CryptoError::KeypairMismatch(self.address.clone()));
        }
        Ok(signing_key)
    }

    /// Sign `msg`, returning the base58 signature.
    pub fn sign(&self, msg: &[u8]) -> Result<String, CryptoError> {
        let signature = self.signing_key()?.sign(msg);
        Ok(bs58::encode(signature.to_bytes()).into_string())
    }
}

/// Verify a base58 `signature` over `msg` against an author address.
///
/// Returns false for malformed addresses or signatures rather than erroring.
pub fn verify(author: &str, signature: &str, msg: &[u8]) -> bool {
    let Ok(address) = AuthorAddress::parse(author) else {
        return false;
    };
    let Ok(bytes) = bs58::decode(signature).into_vec() else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&bytes) else {
        return false;
    };
    address.public_key.verify_strict(msg, &signature).is_ok()
}

/// sha256 digest of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// base58 encoding of the sha256 digest of `data`.
pub fn sha256_base58(data: &[u8]) -> String {
    bs58::encode(sha256(data)).into_string()
}

/// Shortnames are a lowercase ASCII letter followed by three lowercase
/// letters or digits.
pub fn is_valid_shortname(shortname: &str) -> bool {
    let bytes = shortname.as_bytes();
    bytes.len() == SHORTNAME_LEN
        && bytes[0].is_ascii_lowercase()
        && bytes[1..]
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}
