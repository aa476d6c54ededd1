//! Storage key codec.
//!
//! Key layout:
//! ```text
//! ┌──────────────────┬───┬──────────────┬───┬────────────────┐
//! │ subdoc guid      │ @ │ epoch millis │ - │ disambiguator  │
//! │ (absent on root) │   │              │   │ (smallest free)│
//! └──────────────────┴───┴──────────────┴───┴────────────────┘
//! ```
//!
//! Root keys start with `@`; sub-document keys start with `<guid>@`.
//! Keys carry no ordering meaning: the only operations the engine relies on
//! are prefix matching (scoping) and uniqueness among currently known keys.
//! Timestamps collide when writes follow each other within a millisecond,
//! which is what the disambiguator is for.

use std::fmt;
use std::time::SystemTime;

/// Separator between the scope prefix and the timestamp.
pub const SCOPE_SEPARATOR: char = '@';

/// Separator between the timestamp and the disambiguator.
pub const SUFFIX_SEPARATOR: char = '-';

/// Which slice of the shared key space a provider owns.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyScope {
    /// Keys of the root document: `@<ts>-<n>`.
    Root,
    /// Keys of the sub-document with this guid: `<guid>@<ts>-<n>`.
    Subdoc(String),
}

impl KeyScope {
    /// The literal prefix every key of this scope starts with.
    pub fn prefix(&self) -> String {
        match self {
            KeyScope::Root => SCOPE_SEPARATOR.to_string(),
            KeyScope::Subdoc(guid) => format!("{guid}{SCOPE_SEPARATOR}"),
        }
    }

    /// Whether `key` belongs to this scope.
    pub fn contains(&self, key: &str) -> bool {
        match self {
            KeyScope::Root => is_root_key(key),
            KeyScope::Subdoc(guid) => is_sub_key_for(key, guid),
        }
    }

    /// Keep only the keys of this scope, preserving their order.
    pub fn filter<I>(&self, keys: I) -> Vec<String>
    where
        I: IntoIterator<Item = String>,
    {
        keys.into_iter().filter(|key| self.contains(key)).collect()
    }

    /// The sub-document guid, `None` for the root scope.
    pub fn guid(&self) -> Option<&str> {
        match self {
            KeyScope::Root => None,
            KeyScope::Subdoc(guid) => Some(guid),
        }
    }
}

impl fmt::Display for KeyScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyScope::Root => write!(f, "root"),
            KeyScope::Subdoc(guid) => write!(f, "subdoc {guid}"),
        }
    }
}

/// Key parse errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("storage key {0:?} has no '@' separator")]
    MissingScopeSeparator(String),
    #[error("storage key {0:?} has no '-' separator")]
    MissingSuffixSeparator(String),
    #[error("storage key {key:?} has an invalid timestamp: {reason}")]
    InvalidTimestamp { key: String, reason: String },
    #[error("storage key {key:?} has an invalid disambiguator: {reason}")]
    InvalidDisambiguator { key: String, reason: String },
}

/// A decoded storage key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKey {
    pub scope: KeyScope,
    /// Milliseconds since the Unix epoch at the time the key was minted
    pub timestamp: u64,
    /// Smallest integer that made the key unique among known keys
    pub disambiguator: u32,
}

impl StorageKey {
    pub fn new(scope: KeyScope, timestamp: u64, disambiguator: u32) -> Self {
        Self {
            scope,
            timestamp,
            disambiguator,
        }
    }

    /// Decode `[<guid>]@<ts>-<n>`.
    ///
    /// The last `@` splits scope from suffix, so guids containing `@` still
    /// round-trip.
    pub fn parse(key: &str) -> Result<Self, KeyError> {
        let at = key
            .rfind(SCOPE_SEPARATOR)
            .ok_or_else(|| KeyError::MissingScopeSeparator(key.to_string()))?;
        let (guid, suffix) = (&key[..at], &key[at + 1..]);

        let (timestamp, disambiguator) = suffix
            .split_once(SUFFIX_SEPARATOR)
            .ok_or_else(|| KeyError::MissingSuffixSeparator(key.to_string()))?;

        let timestamp = timestamp
            .parse::<u64>()
            .map_err(|e| KeyError::InvalidTimestamp {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        let disambiguator =
            disambiguator
                .parse::<u32>()
                .map_err(|e| KeyError::InvalidDisambiguator {
                    key: key.to_string(),
                    reason: e.to_string(),
                })?;

        let scope = if guid.is_empty() {
            KeyScope::Root
        } else {
            KeyScope::Subdoc(guid.to_string())
        };

        Ok(Self::new(scope, timestamp, disambiguator))
    }

    /// Encode back to the persisted string form.
    pub fn format(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guid = self.scope.guid().unwrap_or("");
        write!(
            f,
            "{guid}{SCOPE_SEPARATOR}{}{SUFFIX_SEPARATOR}{}",
            self.timestamp, self.disambiguator
        )
    }
}

/// Root keys never carry a guid prefix.
pub fn is_root_key(key: &str) -> bool {
    key.starts_with(SCOPE_SEPARATOR)
}

/// Any well-formed key carrying a guid prefix.
pub fn is_sub_key(key: &str) -> bool {
    matches!(StorageKey::parse(key), Ok(StorageKey { scope: KeyScope::Subdoc(_), .. }))
}

/// Keys of the sub-document `guid`.
pub fn is_sub_key_for(key: &str, guid: &str) -> bool {
    key.len() > guid.len()
        && key.starts_with(guid)
        && key[guid.len()..].starts_with(SCOPE_SEPARATOR)
}

/// Mint a key for `scope` at `timestamp` that collides with none of `known`.
pub fn next_key_among(scope: &KeyScope, timestamp: u64, known: &[String]) -> String {
    let mut disambiguator = 0u32;
    loop {
        let key = StorageKey::new(scope.clone(), timestamp, disambiguator).format();
        if !known.iter().any(|existing| *existing == key) {
            return key;
        }
        disambiguator += 1;
    }
}

/// Current time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
