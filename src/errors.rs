//! The error type shared by the node client, the connection pool, and the GTID counter.

use thiserror::Error;

/// All failures the arbitration loop needs to distinguish.
///
/// The loop only ever branches on the *kind* of failure (transient vs.
/// permanent), never on the specific variant, so the payload is a plain
/// message rather than a structured field.
#[derive(Error, Debug, Clone)]
pub enum ArbiterError {
    /// The handle was unreachable, or the driver returned an I/O-flavored error.
    /// The loop resets the seed and retries; it never aborts on this.
    #[error("transient error: {0}")]
    Transient(String),

    /// The seed responded but reported no `group_replication_group_name`,
    /// i.e. it isn't part of any Group Replication cluster. Handled the same
    /// way as `Transient` (the seed gets replaced) but kept distinct because
    /// it is a node-is-wrong condition, not an I/O failure.
    #[error("'{0}:{1}' is not a member of any Group Replication cluster")]
    NotAMember(String, u16),

    /// Invalid configuration discovered at startup: an empty endpoint, an
    /// unparseable credentials file, a missing required flag. Fatal only
    /// during process startup; never raised from inside the loop.
    #[error("configuration error: {0}")]
    PermanentConfig(String),

    /// A GTID set string did not match the expected grammar.
    #[error("malformed GTID set: {0}")]
    PermanentParse(String),
}

impl ArbiterError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ArbiterError::Transient(_) | ArbiterError::NotAMember(_, _))
    }
}

impl From<mysql_async::Error> for ArbiterError {
    fn from(e: mysql_async::Error) -> Self {
        ArbiterError::Transient(e.to_string())
    }
}
