//! Document validation and signing.
//!
//! The storage engine only asks two things of a validator: whether a document
//! is acceptable, and how to sign a freshly authored one. [`KvValidator`] is
//! the implementation for the `kv.1` format.

use crate::crypto::{self, AuthorAddress, AuthorKeypair, CryptoError};
use crate::document::{Document, MAX_TIMESTAMP};

/// Maximum key length in bytes.
pub const MAX_KEY_LEN: usize = 512;

/// Validates and signs documents of one format.
pub trait Validator: Send + Sync {
    /// The schema version this validator understands and produces.
    fn format(&self) -> &'static str;

    /// Returns true if `doc` is well formed, correctly signed and its
    /// timestamp does not exceed `future_cutoff`.
    fn is_valid(&self, doc: &Document, future_cutoff: i64) -> bool;

    /// Sign `doc` as `keypair`, returning the document with `author` and
    /// `signature` filled in.
    fn sign(&self, doc: Document, keypair: &AuthorKeypair) -> Result<Document, CryptoError>;
}

/// Validator for `kv.1` documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct KvValidator;

impl KvValidator {
    pub const FORMAT: &'static str = "kv.1";

    /// The bytes an author signs: the sha256 of the document's canonical
    /// text form. The value is included by hash.
    pub fn content_to_sign(doc: &Document) -> [u8; 32] {
        let text = format!(
            "author\t{}\nkey\t{}\nschemaVersion\t{}\ntimestamp\t{}\nvalue\t{}\nworkspace\t{}\n",
            doc.author,
            doc.key,
            doc.schema_version,
            doc.timestamp,
            crypto::sha256_base58(doc.value.as_bytes()),
            doc.workspace,
        );
        crypto::sha256(text.as_bytes())
    }

    fn check_fields(&self, doc: &Document, future_cutoff: i64) -> Result<(), &'static str> {
        if doc.schema_version != Self::FORMAT {
            return Err("unknown schema version");
        }
        if !is_valid_workspace(&doc.workspace) {
            return Err("invalid workspace");
        }
        if !is_valid_key(&doc.key) {
            return Err("invalid key");
        }
        if AuthorAddress::parse(&doc.author).is_err() {
            return Err("invalid author");
        }
        if !author_can_write(&doc.author, &doc.key) {
            return Err("author may not write to this key");
        }
        if doc.timestamp <= 0 || doc.timestamp > MAX_TIMESTAMP {
            return Err("timestamp out of range");
        }
        if doc.timestamp > future_cutoff {
            return Err("timestamp is too far in the future");
        }
        Ok(())
    }
}

impl Validator for KvValidator {
    fn format(&self) -> &'static str {
        Self::FORMAT
    }

    fn is_valid(&self, doc: &Document, future_cutoff: i64) -> bool {
        if let Err(reason) = self.check_fields(doc, future_cutoff) {
            tracing::debug!(key = %doc.key, author = %doc.author, "invalid document: {}", reason);
            return false;
        }
        let content = Self::content_to_sign(doc);
        if !crypto::verify(&doc.author, &doc.signature, &content) {
            tracing::debug!(key = %doc.key, author = %doc.author, "invalid document: bad signature");
            return false;
        }
        true
    }

    fn sign(&self, mut doc: Document, keypair: &AuthorKeypair) -> Result<Document, CryptoError> {
        doc.author = keypair.address.clone();
        let content = Self::content_to_sign(&doc);
        doc.signature = keypair.sign(&content)?;
        Ok(doc)
    }
}

/// Workspace addresses look like `+gardening.a1b2`: a name of 1 to 15
/// characters starting with a lowercase letter, then a suffix of 1 to 53
/// lowercase letters or digits.
pub fn is_valid_workspace(workspace: &str) -> bool {
    let Some(rest) = workspace.strip_prefix('+') else {
        return false;
    };
    let Some((name, suffix)) = rest.split_once('.') else {
        return false;
    };
    let lower_alnum = |b: &u8| b.is_ascii_lowercase() || b.is_ascii_digit();

    let name = name.as_bytes();
    let suffix = suffix.as_bytes();
    (1..=15).contains(&name.len())
        && name[0].is_ascii_lowercase()
        && name.iter().all(lower_alnum)
        && (1..=53).contains(&suffix.len())
        && suffix.iter().all(lower_alnum)
}

/// Keys are non-empty, at most [`MAX_KEY_LEN`] bytes, and contain no
/// whitespace or control characters.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && !key.chars().any(|c| c.is_whitespace() || c.is_control())
}

/// A key containing `~` may only be written by an author named right after
/// one of its tildes. Keys without `~` are writable by anyone.
pub fn author_can_write(author: &str, key: &str) -> bool {
    if !key.contains('~') {
        return true;
    }
    key.split('~').skip(1).any(|part| {
        part.strip_prefix(author)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    })
}
