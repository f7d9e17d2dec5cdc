//! Scoped option storage and use-time value parsing.

use super::keys::{IngestMode, OptionKey, OptionScope};
use crate::error::OptionError;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

/// Default read-ahead depth of a result stream, in batches.
pub const DEFAULT_QUEUE_SIZE: usize = 5;

/// Default number of batches requested per fetch round trip.
pub const DEFAULT_FETCH_SIZE: usize = 1;

/// Default connect/authenticate deadline.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default deadline for cancel and close round trips.
pub const DEFAULT_CANCEL_TIMEOUT: Duration = Duration::from_secs(5);

/// Key/value option store for one scope.
///
/// Keys are validated when set; values stay strings until a consumer reads
/// them through one of the typed accessors.
#[derive(Clone)]
pub struct OptionRegistry {
    scope: OptionScope,
    values: BTreeMap<OptionKey, String>,
}

impl OptionRegistry {
    /// Create an empty registry for the given scope.
    pub fn new(scope: OptionScope) -> Self {
        Self {
            scope,
            values: BTreeMap::new(),
        }
    }

    /// Scope of this registry.
    pub fn scope(&self) -> OptionScope {
        self.scope
    }

    /// Set an option by name.
    ///
    /// # Errors
    ///
    /// Returns `OptionError::InvalidOption` if the name is unknown or the key
    /// is not allowed in this scope. The value is not inspected.
    pub fn set(&mut self, key: &str, value: impl Into<String>) -> Result<(), OptionError> {
        let parsed = OptionKey::parse(key)
            .filter(|k| k.allowed_in(self.scope))
            .ok_or_else(|| OptionError::InvalidOption {
                key: key.to_string(),
                scope: self.scope,
            })?;

        self.values.insert(parsed, value.into());
        Ok(())
    }

    /// Set an option by typed key.
    pub fn set_key(&mut self, key: OptionKey, value: impl Into<String>) -> Result<(), OptionError> {
        if !key.allowed_in(self.scope) {
            return Err(OptionError::InvalidOption {
                key: key.as_str().to_string(),
                scope: self.scope,
            });
        }

        self.values.insert(key, value.into());
        Ok(())
    }

    /// Set several options, stopping at the first invalid key.
    pub fn extend<I, K, V>(&mut self, options: I) -> Result<(), OptionError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (key, value) in options {
            self.set(key.as_ref(), value)?;
        }
        Ok(())
    }

    /// Raw value of an option.
    pub fn get(&self, key: OptionKey) -> Option<&str> {
        self.values.get(&key).map(String::as_str)
    }

    /// Remove an option, returning its previous value.
    pub fn remove(&mut self, key: OptionKey) -> Option<String> {
        self.values.remove(&key)
    }

    /// Whether the option has been set.
    pub fn contains(&self, key: OptionKey) -> bool {
        self.values.contains_key(&key)
    }

    /// Number of options set.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no option has been set.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over set options in key order.
    pub fn iter(&self) -> impl Iterator<Item = (OptionKey, &str)> {
        self.values.iter().map(|(k, v)| (*k, v.as_str()))
    }

    /// Merge this registry over a parent registry.
    ///
    /// Values in `self` win on collision. From the parent, only keys that are
    /// valid at this registry's scope are inherited, so connection secrets
    /// never reach a statement request.
    pub fn resolve(&self, parent: &OptionRegistry) -> ResolvedOptions {
        let mut values: BTreeMap<OptionKey, String> = parent
            .values
            .iter()
            .filter(|(key, _)| key.allowed_in(self.scope))
            .map(|(key, value)| (*key, value.clone()))
            .collect();

        for (key, value) in &self.values {
            values.insert(*key, value.clone());
        }

        ResolvedOptions { values }
    }

    /// Whether TLS certificate verification is disabled.
    pub fn tls_skip_verify(&self) -> Result<bool, OptionError> {
        match self.get(OptionKey::TlsSkipVerify) {
            Some(value) => parse_bool(OptionKey::TlsSkipVerify, value),
            None => Ok(false),
        }
    }

    /// Connect/authenticate deadline.
    pub fn timeout_connect(&self) -> Result<Duration, OptionError> {
        Ok(read_millis(&self.values, OptionKey::TimeoutConnect)?.unwrap_or(DEFAULT_CONNECT_TIMEOUT))
    }

    /// Cancel/close deadline.
    pub fn timeout_cancel(&self) -> Result<Duration, OptionError> {
        Ok(read_millis(&self.values, OptionKey::TimeoutCancel)?.unwrap_or(DEFAULT_CANCEL_TIMEOUT))
    }
}

// Secrets are redacted
impl fmt::Debug for OptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (key, value) in &self.values {
            if key.is_secret() {
                map.entry(&key.as_str(), &"<redacted>");
            } else {
                map.entry(&key.as_str(), value);
            }
        }
        map.finish()
    }
}

/// Effective statement options after merging statement over connection values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedOptions {
    values: BTreeMap<OptionKey, String>,
}

impl ResolvedOptions {
    /// Raw value of an option.
    pub fn get(&self, key: OptionKey) -> Option<&str> {
        self.values.get(&key).map(String::as_str)
    }

    /// Read-ahead depth in batches.
    pub fn queue_size(&self) -> Result<usize, OptionError> {
        Ok(read_positive(&self.values, OptionKey::QueueSize)?.unwrap_or(DEFAULT_QUEUE_SIZE))
    }

    /// Batches requested per round trip.
    pub fn fetch_size(&self) -> Result<usize, OptionError> {
        Ok(read_positive(&self.values, OptionKey::FetchSize)?.unwrap_or(DEFAULT_FETCH_SIZE))
    }

    /// Per-`next()` wait bound; `None` waits indefinitely.
    pub fn timeout_fetch(&self) -> Result<Option<Duration>, OptionError> {
        read_millis(&self.values, OptionKey::TimeoutFetch)
    }

    /// Query submission bound; `None` waits indefinitely.
    pub fn timeout_query(&self) -> Result<Option<Duration>, OptionError> {
        read_millis(&self.values, OptionKey::TimeoutQuery)
    }

    /// Bulk ingest mode, if set.
    pub fn ingest_mode(&self) -> Result<Option<IngestMode>, OptionError> {
        self.get(OptionKey::IngestMode)
            .map(|value| {
                value
                    .parse::<IngestMode>()
                    .map_err(|message| invalid_value(OptionKey::IngestMode, value, message))
            })
            .transpose()
    }

    /// Parse every typed value once so malformed input fails before any
    /// transport call.
    pub fn validate(&self) -> Result<(), OptionError> {
        self.queue_size()?;
        self.fetch_size()?;
        self.timeout_fetch()?;
        self.timeout_query()?;
        self.ingest_mode()?;
        Ok(())
    }

    /// Canonical `name -> value` map sent with each request.
    pub fn to_wire(&self) -> HashMap<String, String> {
        self.values
            .iter()
            .map(|(key, value)| (key.as_str().to_string(), value.clone()))
            .collect()
    }
}

fn invalid_value(key: OptionKey, value: &str, message: impl Into<String>) -> OptionError {
    OptionError::InvalidOptionValue {
        key: key.as_str().to_string(),
        value: value.to_string(),
        message: message.into(),
    }
}

fn read_positive(
    values: &BTreeMap<OptionKey, String>,
    key: OptionKey,
) -> Result<Option<usize>, OptionError> {
    let Some(raw) = values.get(&key) else {
        return Ok(None);
    };

    match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(Some(n)),
        _ => Err(invalid_value(key, raw, "expected a positive integer")),
    }
}

/// Milliseconds; `0` disables the bound.
fn read_millis(
    values: &BTreeMap<OptionKey, String>,
    key: OptionKey,
) -> Result<Option<Duration>, OptionError> {
    let Some(raw) = values.get(&key) else {
        return Ok(None);
    };

    let millis = raw
        .trim()
        .parse::<u64>()
        .map_err(|_| invalid_value(key, raw, "expected a non-negative integer of milliseconds"))?;

    Ok((millis > 0).then(|| Duration::from_millis(millis)))
}

fn parse_bool(key: OptionKey, s: &str) -> Result<bool, OptionError> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(invalid_value(key, s, "expected a boolean")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_unknown_key_fails_fast() {
        let mut registry = OptionRegistry::new(OptionScope::Statement);
        let err = registry.set("not_an_option", "1").unwrap_err();
        assert!(matches!(err, OptionError::InvalidOption { ref key, scope }
            if key == "not_an_option" && scope == OptionScope::Statement));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_set_key_outside_scope_fails() {
        let mut registry = OptionRegistry::new(OptionScope::Statement);
        assert!(registry.set("auth_token", "secret").is_err());
        assert!(registry.set_key(OptionKey::Endpoint, "grpc://x:1").is_err());

        let mut registry = OptionRegistry::new(OptionScope::Connection);
        assert!(registry.set("ingest_mode", "append").is_err());
    }

    #[test]
    fn test_last_write_wins() {
        let mut registry = OptionRegistry::new(OptionScope::Statement);
        registry.set("queue_size", "2").unwrap();
        registry.set("adbc.rpc.result_queue_size", "7").unwrap();
        registry.set("queue_size", "9").unwrap();

        assert_eq!(registry.len(), 1);
        let resolved = registry.resolve(&OptionRegistry::new(OptionScope::Connection));
        assert_eq!(resolved.queue_size().unwrap(), 9);
    }

    #[test]
    fn test_malformed_value_accepted_at_set_time() {
        let mut registry = OptionRegistry::new(OptionScope::Statement);
        registry.set("timeout_fetch", "soon").unwrap();

        let resolved = registry.resolve(&OptionRegistry::new(OptionScope::Connection));
        let err = resolved.timeout_fetch().unwrap_err();
        assert!(matches!(err, OptionError::InvalidOptionValue { ref key, .. } if key == "timeout_fetch"));
        assert!(resolved.validate().is_err());
    }

    #[test]
    fn test_statement_overrides_connection() {
        let mut connection = OptionRegistry::new(OptionScope::Connection);
        connection.set("queue_size", "3").unwrap();
        connection.set("fetch_size", "4").unwrap();
        connection.set("password", "hunter2").unwrap();

        let mut statement = OptionRegistry::new(OptionScope::Statement);
        statement.set("queue_size", "8").unwrap();

        let resolved = statement.resolve(&connection);
        assert_eq!(resolved.queue_size().unwrap(), 8);
        assert_eq!(resolved.fetch_size().unwrap(), 4);
        assert_eq!(resolved.get(OptionKey::Password), None);
        assert!(!resolved.to_wire().contains_key("password"));
    }

    #[test]
    fn test_defaults() {
        let resolved = OptionRegistry::new(OptionScope::Statement)
            .resolve(&OptionRegistry::new(OptionScope::Connection));
        assert_eq!(resolved.queue_size().unwrap(), DEFAULT_QUEUE_SIZE);
        assert_eq!(resolved.fetch_size().unwrap(), DEFAULT_FETCH_SIZE);
        assert_eq!(resolved.timeout_fetch().unwrap(), None);
        assert_eq!(resolved.ingest_mode().unwrap(), None);

        let connection = OptionRegistry::new(OptionScope::Connection);
        assert_eq!(connection.timeout_connect().unwrap(), DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(connection.timeout_cancel().unwrap(), DEFAULT_CANCEL_TIMEOUT);
        assert!(!connection.tls_skip_verify().unwrap());
    }

    #[test]
    fn test_zero_queue_size_rejected_at_use() {
        let mut registry = OptionRegistry::new(OptionScope::Statement);
        registry.set("queue_size", "0").unwrap();
        let resolved = registry.resolve(&OptionRegistry::new(OptionScope::Connection));
        assert!(resolved.queue_size().is_err());
    }

    #[test]
    fn test_zero_timeout_disables_bound() {
        let mut registry = OptionRegistry::new(OptionScope::Statement);
        registry.set("timeout_fetch", "0").unwrap();
        registry.set("timeout_query", "250").unwrap();
        let resolved = registry.resolve(&OptionRegistry::new(OptionScope::Connection));
        assert_eq!(resolved.timeout_fetch().unwrap(), None);
        assert_eq!(
            resolved.timeout_query().unwrap(),
            Some(Duration::from_millis(250))
        );
    }

    #[test]
    fn test_wire_map_uses_canonical_names() {
        let mut registry = OptionRegistry::new(OptionScope::Statement);
        registry.set("adbc.ingest.mode", "append").unwrap();
        registry.set("queue_size", "2").unwrap();
        let wire = registry
            .resolve(&OptionRegistry::new(OptionScope::Connection))
            .to_wire();
        assert_eq!(wire.get("ingest_mode").map(String::as_str), Some("append"));
        assert_eq!(wire.get("queue_size").map(String::as_str), Some("2"));
    }

    #[test]
    fn test_bool_parsing() {
        let mut registry = OptionRegistry::new(OptionScope::Connection);
        registry.set("tls_skip_verify", "yes").unwrap();
        assert!(registry.tls_skip_verify().unwrap());

        registry.set("tls_skip_verify", "maybe").unwrap();
        assert!(registry.tls_skip_verify().is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut registry = OptionRegistry::new(OptionScope::Connection);
        registry.set("auth_token", "Bearer abc123").unwrap();
        registry.set("username", "alice").unwrap();
        let debug = format!("{:?}", registry);
        assert!(!debug.contains("abc123"));
        assert!(debug.contains("alice"));
    }
}
