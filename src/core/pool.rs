//! A process-wide, mutex-guarded map from connection-string to an open MySQL handle.
//!
//! Every iteration of the arbitration loop re-enters nodes from the last
//! view; repeatedly opening and closing connections would amplify TCP
//! overhead and trigger MySQL's thread-cache churn, so handles are opened
//! once and kept for the life of the process. `Node::reset` drops only the
//! `Node`'s reference to its handle, never the handle itself.

use std::sync::Arc;

use dashmap::DashMap;
use mysql_async::{Conn, Opts, OptsBuilder};
use parking_lot::Mutex;
use tokio::time::{Duration, timeout};

use crate::errors::ArbiterError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A pooled, reusable handle. Queries against it are serialized by the
/// caller (the arbitration loop only ever touches one node at a time), so
/// the mutex here exists to guard the handle's lifecycle, not each query.
pub type PooledHandle = Arc<Mutex<Conn>>;

#[derive(Debug, Default)]
pub struct ConnectionPool {
    handles: DashMap<String, PooledHandle>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self {
            handles: DashMap::new(),
        }
    }

    /// Returns the existing handle for `(host, port, user)` or opens and
    /// stores a new one. At most one handle per connection-string exists
    /// across the lifetime of the process.
    pub async fn get_or_connect(
        &self,
        host: &str,
        port: u16,
        user: &str,
        password: &str,
    ) -> Result<PooledHandle, ArbiterError> {
        let key = Self::connection_string(host, port, user);

        if let Some(existing) = self.handles.get(&key) {
            return Ok(existing.clone());
        }

        let opts: Opts = OptsBuilder::default()
            .ip_or_hostname(host)
            .tcp_port(port)
            .user(Some(user))
            .pass(Some(password))
            .db_name(Some("performance_schema"))
            .into();

        let conn = timeout(CONNECT_TIMEOUT, Conn::new(opts))
            .await
            .map_err(|_| ArbiterError::Transient(format!("connect to {host}:{port} timed out")))?
            .map_err(ArbiterError::from)?;

        let handle = Arc::new(Mutex::new(conn));
        // Another task may have raced us; `entry` keeps the invariant of at
        // most one handle per connection-string by preferring whichever
        // handle was inserted first.
        let handle = self
            .handles
            .entry(key)
            .or_insert(handle)
            .value()
            .clone();
        Ok(handle)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    fn connection_string(host: &str, port: u16, user: &str) -> String {
        format!("{user}@{host}:{port}")
    }
}
