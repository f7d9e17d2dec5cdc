//! Option keys and scopes.

use std::fmt;
use std::str::FromStr;

/// Scope an option registry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionScope {
    /// Connection-level options (endpoint, credentials, TLS, statement defaults)
    Connection,
    /// Statement-level options (read-ahead, timeouts, ingest)
    Statement,
}

impl fmt::Display for OptionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionScope::Connection => write!(f, "connection"),
            OptionScope::Statement => write!(f, "statement"),
        }
    }
}

/// Closed enumeration of recognized option keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OptionKey {
    /// Endpoint URI
    Endpoint,
    /// Username for basic authentication
    Username,
    /// Password for basic authentication
    Password,
    /// Opaque bearer token
    AuthToken,
    /// Skip server certificate verification
    TlsSkipVerify,
    /// Milliseconds allowed for connect and authenticate
    TimeoutConnect,
    /// Milliseconds allowed for cancel and close round trips
    TimeoutCancel,
    /// Number of batches buffered ahead of the reader
    QueueSize,
    /// Number of batches requested per fetch round trip
    FetchSize,
    /// Milliseconds a single `next()` may wait for a batch
    TimeoutFetch,
    /// Milliseconds allowed for query submission
    TimeoutQuery,
    /// Bulk ingest mode
    IngestMode,
    /// Bulk ingest target table
    IngestTargetTable,
}

impl OptionKey {
    /// Every recognized key.
    pub const ALL: [OptionKey; 13] = [
        OptionKey::Endpoint,
        OptionKey::Username,
        OptionKey::Password,
        OptionKey::AuthToken,
        OptionKey::TlsSkipVerify,
        OptionKey::TimeoutConnect,
        OptionKey::TimeoutCancel,
        OptionKey::QueueSize,
        OptionKey::FetchSize,
        OptionKey::TimeoutFetch,
        OptionKey::TimeoutQuery,
        OptionKey::IngestMode,
        OptionKey::IngestTargetTable,
    ];

    /// Canonical key name.
    pub fn as_str(&self) -> &'static str {
        match self {
            OptionKey::Endpoint => "endpoint",
            OptionKey::Username => "username",
            OptionKey::Password => "password",
            OptionKey::AuthToken => "auth_token",
            OptionKey::TlsSkipVerify => "tls_skip_verify",
            OptionKey::TimeoutConnect => "timeout_connect",
            OptionKey::TimeoutCancel => "timeout_cancel",
            OptionKey::QueueSize => "queue_size",
            OptionKey::FetchSize => "fetch_size",
            OptionKey::TimeoutFetch => "timeout_fetch",
            OptionKey::TimeoutQuery => "timeout_query",
            OptionKey::IngestMode => "ingest_mode",
            OptionKey::IngestTargetTable => "ingest_target_table",
        }
    }

    /// ADBC-style names accepted for the same key.
    fn aliases(&self) -> &'static [&'static str] {
        match self {
            OptionKey::Endpoint => &["uri"],
            OptionKey::AuthToken => &["adbc.flight.sql.authorization_header"],
            OptionKey::TlsSkipVerify => &["adbc.flight.sql.client_option.tls_skip_verify"],
            OptionKey::QueueSize => &["adbc.rpc.result_queue_size"],
            OptionKey::IngestMode => &["adbc.ingest.mode"],
            OptionKey::IngestTargetTable => &["adbc.ingest.target_table"],
            _ => &[],
        }
    }

    /// Look up a key by canonical name or alias.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|key| key.as_str() == name || key.aliases().contains(&name))
    }

    /// Whether a registry of the given scope accepts this key.
    ///
    /// Statement tuning keys are also accepted at connection scope, where they
    /// act as defaults for every statement of the connection.
    pub fn allowed_in(&self, scope: OptionScope) -> bool {
        match self {
            OptionKey::QueueSize
            | OptionKey::FetchSize
            | OptionKey::TimeoutFetch
            | OptionKey::TimeoutQuery => true,
            OptionKey::IngestMode | OptionKey::IngestTargetTable => {
                scope == OptionScope::Statement
            }
            _ => scope == OptionScope::Connection,
        }
    }

    /// Values that must never be echoed back or logged.
    pub fn is_secret(&self) -> bool {
        matches!(self, OptionKey::Password | OptionKey::AuthToken)
    }

    /// Keys consumed while the connection is being established.
    pub fn is_init_only(&self) -> bool {
        matches!(
            self,
            OptionKey::Endpoint
                | OptionKey::Username
                | OptionKey::Password
                | OptionKey::AuthToken
                | OptionKey::TlsSkipVerify
                | OptionKey::TimeoutConnect
        )
    }
}

impl fmt::Display for OptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bulk ingest mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestMode {
    /// Create the table, fail if it exists
    Create,
    /// Append to an existing table
    Append,
    /// Drop and recreate the table
    Replace,
    /// Create the table if missing, then append
    CreateAppend,
}

impl IngestMode {
    /// Wire name of the mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestMode::Create => "create",
            IngestMode::Append => "append",
            IngestMode::Replace => "replace",
            IngestMode::CreateAppend => "create_append",
        }
    }
}

impl FromStr for IngestMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "create" | "adbc.ingest.mode.create" => Ok(IngestMode::Create),
            "append" | "adbc.ingest.mode.append" => Ok(IngestMode::Append),
            "replace" | "adbc.ingest.mode.replace" => Ok(IngestMode::Replace),
            "create_append" | "adbc.ingest.mode.create_append" => Ok(IngestMode::CreateAppend),
            other => Err(format!(
                "expected one of create, append, replace, create_append; got '{}'",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_canonical_and_alias() {
        assert_eq!(OptionKey::parse("queue_size"), Some(OptionKey::QueueSize));
        assert_eq!(
            OptionKey::parse("adbc.rpc.result_queue_size"),
            Some(OptionKey::QueueSize)
        );
        assert_eq!(OptionKey::parse("uri"), Some(OptionKey::Endpoint));
        assert_eq!(OptionKey::parse("no_such_key"), None);
    }

    #[test]
    fn test_canonical_names_round_trip() {
        for key in OptionKey::ALL {
            assert_eq!(OptionKey::parse(key.as_str()), Some(key));
        }
    }

    #[test]
    fn test_scope_allow_list() {
        assert!(OptionKey::QueueSize.allowed_in(OptionScope::Statement));
        assert!(OptionKey::QueueSize.allowed_in(OptionScope::Connection));
        assert!(OptionKey::Endpoint.allowed_in(OptionScope::Connection));
        assert!(!OptionKey::Endpoint.allowed_in(OptionScope::Statement));
        assert!(!OptionKey::AuthToken.allowed_in(OptionScope::Statement));
        assert!(OptionKey::IngestMode.allowed_in(OptionScope::Statement));
        assert!(!OptionKey::IngestMode.allowed_in(OptionScope::Connection));
    }

    #[test]
    fn test_ingest_mode_parse() {
        assert_eq!("append".parse::<IngestMode>(), Ok(IngestMode::Append));
        assert_eq!(
            "adbc.ingest.mode.create_append".parse::<IngestMode>(),
            Ok(IngestMode::CreateAppend)
        );
        assert!("upsert".parse::<IngestMode>().is_err());
    }
}
