//! The per-member remote-query surface and the `Node` value it operates on.

use std::fmt;
use std::sync::Arc;

use mysql_async::prelude::Queryable;
use serde::Serialize;
use tracing::{debug, warn};

use crate::core::gtid::count_gtids;
use crate::core::pool::{ConnectionPool, PooledHandle};
use crate::errors::ArbiterError;

/// The replication state of a Group Replication member, as reported by
/// `replication_group_members.member_state`, plus the arbitrator-internal
/// `ShootMe` marker.
///
/// `ShootMe` is never produced by MySQL and must never be written back to
/// it or serialized in the HTTP stats output — it only ever exists on the
/// scratch copy of a view the arbitration loop builds while picking which
/// members to force-shutdown during partition recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberState {
    Online,
    Recovering,
    Offline,
    Error,
    Unreachable,
    ShootMe,
}

impl MemberState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberState::Online => "ONLINE",
            MemberState::Recovering => "RECOVERING",
            MemberState::Offline => "OFFLINE",
            MemberState::Error => "ERROR",
            MemberState::Unreachable => "UNREACHABLE",
            MemberState::ShootMe => "SHOOT_ME",
        }
    }

    fn parse(s: &str) -> MemberState {
        match s {
            "ONLINE" => MemberState::Online,
            "RECOVERING" => MemberState::Recovering,
            "OFFLINE" => MemberState::Offline,
            "ERROR" => MemberState::Error,
            // Any state MySQL hasn't told us about yet, and any state we
            // don't recognize, is treated as unreachable: the arbitrator can
            // only act on the handful of states it knows how to react to.
            _ => MemberState::Unreachable,
        }
    }
}

impl fmt::Display for MemberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for MemberState {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        debug_assert_ne!(
            *self,
            MemberState::ShootMe,
            "SHOOT_ME must never reach a serialized view"
        );
        serializer.serialize_str(self.as_str())
    }
}

/// The arbitrator's handle on one MySQL Group Replication member.
///
/// Two `Node`s are equal iff `(host, port)` match; the cached status fields
/// are intentionally excluded since they change every tick.
#[derive(Clone)]
pub struct Node {
    pub host: String,
    pub port: u16,
    pub user: String,
    password: String,

    pub group_name: Option<String>,
    pub server_uuid: Option<String>,
    pub member_state: Option<MemberState>,
    pub online_participants: Option<u32>,
    pub has_quorum: Option<bool>,
    pub read_only: Option<bool>,

    pool: Arc<ConnectionPool>,
    handle: Option<PooledHandle>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("group_name", &self.group_name)
            .field("server_uuid", &self.server_uuid)
            .field("member_state", &self.member_state)
            .field("online_participants", &self.online_participants)
            .field("has_quorum", &self.has_quorum)
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port
    }
}

impl Eq for Node {}

impl Node {
    pub fn new(host: impl Into<String>, port: u16, user: impl Into<String>, password: impl Into<String>, pool: Arc<ConnectionPool>) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            password: password.into(),
            group_name: None,
            server_uuid: None,
            member_state: None,
            online_participants: None,
            has_quorum: None,
            read_only: None,
            pool,
            handle: None,
        }
    }

    /// A new, credential-bearing `Node` for a peer discovered via `GetMembers`,
    /// sharing this node's seed credentials and connection pool per the View
    /// invariant that every member carries the seed's credentials.
    fn blank_peer(&self, host: String, port: u16) -> Node {
        Node::new(host, port, self.user.clone(), self.password.clone(), self.pool.clone())
    }

    async fn handle(&mut self) -> Result<PooledHandle, ArbiterError> {
        if self.host.is_empty() || self.port == 0 {
            return Err(ArbiterError::PermanentConfig(
                "node has no MySQL endpoint".to_string(),
            ));
        }
        if let Some(h) = &self.handle {
            return Ok(h.clone());
        }
        let h = self
            .pool
            .get_or_connect(&self.host, self.port, &self.user, &self.password)
            .await?;
        self.handle = Some(h.clone());
        Ok(h)
    }

    async fn ping(&mut self) -> Result<(), ArbiterError> {
        let handle = self.handle().await?;
        let mut conn = handle.lock();
        conn.ping().await.map_err(ArbiterError::from)
    }

    /// Ensures a handle exists, pings, reads `GroupName`, then resolves this
    /// server's UUID and member state.
    pub async fn connect(&mut self) -> Result<(), ArbiterError> {
        debug!(host = %self.host, port = self.port, "connecting");
        self.ping().await?;

        let handle = self.handle.clone().expect("ping populated the handle");
        let mut conn = handle.lock();

        let group_name: Option<String> = conn
            .query_first(
                "SELECT variable_value FROM global_variables WHERE variable_name='group_replication_group_name'",
            )
            .await?;
        let group_name = group_name.unwrap_or_default();
        if group_name.is_empty() {
            return Err(ArbiterError::NotAMember(self.host.clone(), self.port));
        }
        self.group_name = Some(group_name);

        let row: Option<(String, String)> = conn
            .query_first(
                "SELECT variable_value, member_state FROM global_variables gv \
                 INNER JOIN replication_group_members rgm ON (gv.variable_value = rgm.member_id) \
                 WHERE gv.variable_name = 'server_uuid'",
            )
            .await?;
        if let Some((uuid, state)) = row {
            self.server_uuid = Some(uuid);
            self.member_state = Some(MemberState::parse(&state));
        }

        Ok(())
    }

    /// True iff this node is ONLINE and fewer than half of the group's
    /// members are non-ONLINE, scoped to this server's own row.
    pub async fn has_quorum(&mut self) -> Result<bool, ArbiterError> {
        self.ping().await?;
        let handle = self.handle.clone().expect("ping populated the handle");
        let mut conn = handle.lock();

        let quorum: Option<bool> = conn
            .query_first(
                "SELECT (MEMBER_STATE = 'ONLINE' AND \
                   (SELECT COUNT(*) FROM replication_group_members WHERE MEMBER_STATE != 'ONLINE') < \
                   (SELECT COUNT(*) FROM replication_group_members) / 2) \
                 FROM replication_group_members \
                 WHERE MEMBER_ID = @@server_uuid",
            )
            .await?;
        let quorum = quorum.unwrap_or(false);
        self.has_quorum = Some(quorum);
        Ok(quorum)
    }

    /// Rereads this node's own `MemberState` without refreshing anything else.
    pub async fn member_status(&mut self) -> Result<MemberState, ArbiterError> {
        self.ping().await?;
        let handle = self.handle.clone().expect("ping populated the handle");
        let mut conn = handle.lock();

        let row: Option<(String, String)> = conn
            .query_first(
                "SELECT variable_value, member_state FROM global_variables gv \
                 INNER JOIN replication_group_members rgm ON (gv.variable_value = rgm.member_id) \
                 WHERE gv.variable_name = 'server_uuid'",
            )
            .await?;
        let state = row.map(|(_, s)| MemberState::parse(&s)).unwrap_or(MemberState::Unreachable);
        self.member_state = Some(state);
        Ok(state)
    }

    pub async fn is_read_only(&mut self) -> Result<bool, ArbiterError> {
        self.ping().await?;
        let handle = self.handle.clone().expect("ping populated the handle");
        let mut conn = handle.lock();

        let value: Option<String> = conn
            .query_first(
                "SELECT variable_value FROM global_variables WHERE variable_name='super_read_only'",
            )
            .await?;
        let ro = value.as_deref() == Some("ON");
        self.read_only = Some(ro);
        Ok(ro)
    }

    /// Reads the full membership list as seen by this node, refreshing
    /// `online_participants`. Every returned peer carries this node's
    /// credentials and pool, per the View invariant. Malformed rows are
    /// skipped rather than aborting the whole read.
    pub async fn get_members(&mut self) -> Result<Vec<Node>, ArbiterError> {
        self.ping().await?;
        let handle = self.handle.clone().expect("ping populated the handle");
        let mut conn = handle.lock();

        let rows: Vec<(String, String, u16, String)> = conn
            .query(
                "SELECT member_id, member_host, member_port, member_state FROM replication_group_members",
            )
            .await?;
        drop(conn);

        let mut members = Vec::with_capacity(rows.len());
        let mut online = 0u32;
        for (uuid, host, port, state) in rows {
            if host.is_empty() {
                continue;
            }
            let state = MemberState::parse(&state);
            if state == MemberState::Online {
                online += 1;
            }
            let mut member = self.blank_peer(host, port);
            member.server_uuid = Some(uuid);
            member.member_state = Some(state);
            members.push(member);
        }
        self.online_participants = Some(online);
        Ok(members)
    }

    pub async fn shutdown(&mut self) -> Result<(), ArbiterError> {
        self.ping().await?;
        let handle = self.handle.clone().expect("ping populated the handle");
        let mut conn = handle.lock();
        // The connection is expected to drop as a side effect of a
        // successful SHUTDOWN; a resulting I/O error there is not
        // distinguishable from (and is handled the same as) any other
        // transient failure.
        conn.query_drop("SHUTDOWN").await.map_err(ArbiterError::from)
    }

    /// Not cached: this value changes too fast to be a meaningful cache entry.
    pub async fn transactions_executed(&mut self) -> Result<String, ArbiterError> {
        self.ping().await?;
        let handle = self.handle.clone().expect("ping populated the handle");
        let mut conn = handle.lock();
        let gtids: Option<String> = conn.query_first("SELECT @@global.GTID_EXECUTED").await?;
        Ok(gtids.unwrap_or_default())
    }

    pub async fn transactions_executed_count(&mut self) -> Result<u64, ArbiterError> {
        let gtids = self.transactions_executed().await?;
        count_gtids(&gtids)
    }

    pub async fn applier_queue_length(&mut self) -> Result<u64, ArbiterError> {
        self.ping().await?;
        let handle = self.handle.clone().expect("ping populated the handle");
        let mut conn = handle.lock();
        let subset: Option<String> = conn
            .query_first(
                "SELECT GTID_SUBTRACT( \
                   (SELECT Received_transaction_set FROM performance_schema.replication_connection_status \
                    WHERE Channel_name = 'group_replication_applier'), \
                   (SELECT @@global.GTID_EXECUTED) )",
            )
            .await?;
        drop(conn);
        count_gtids(&subset.unwrap_or_default())
    }

    /// The XCom/GCS endpoint, distinct from the SQL endpoint this `Node` connects to.
    pub async fn get_gcs_address(&mut self) -> Result<String, ArbiterError> {
        self.ping().await?;
        let handle = self.handle.clone().expect("ping populated the handle");
        let mut conn = handle.lock();
        let addr: Option<String> = conn
            .query_first(
                "SELECT variable_value FROM global_variables WHERE variable_name='group_replication_local_address'",
            )
            .await?;
        Ok(addr.unwrap_or_default())
    }

    /// Sets `group_replication_force_members` to `list`, then immediately
    /// clears it back to empty. The clear only runs if the set succeeded;
    /// leaving the variable set would block every future reconfiguration.
    ///
    /// A failure of the set is returned as an error and the membership was
    /// never forced. A failure of the clear is logged, not returned:
    /// membership was already forced, so the caller must still treat this
    /// as a success and proceed to shut down the losing members. The
    /// variable is left non-empty, which makes MySQL itself reject the next
    /// `SET` until an operator clears it by hand.
    pub async fn force_members(&mut self, list: &str) -> Result<(), ArbiterError> {
        self.ping().await?;
        let handle = self.handle.clone().expect("ping populated the handle");
        let mut conn = handle.lock();

        let escaped = list.replace('\'', "''");
        conn.query_drop(format!("SET GLOBAL group_replication_force_members='{escaped}'"))
            .await
            .map_err(ArbiterError::from)?;
        if let Err(e) = conn.query_drop("SET GLOBAL group_replication_force_members=''").await {
            warn!(error = %ArbiterError::from(e), "clearing group_replication_force_members failed");
        }
        Ok(())
    }

    pub async fn set_read_only(&mut self, read_only: bool) -> Result<(), ArbiterError> {
        self.ping().await?;
        let handle = self.handle.clone().expect("ping populated the handle");
        let mut conn = handle.lock();
        let value = if read_only { "ON" } else { "OFF" };
        conn.query_drop(format!("SET GLOBAL super_read_only={value}"))
            .await
            .map_err(ArbiterError::from)?;
        self.read_only = Some(read_only);
        Ok(())
    }

    pub async fn set_offline_mode(&mut self, offline: bool) -> Result<(), ArbiterError> {
        self.ping().await?;
        let handle = self.handle.clone().expect("ping populated the handle");
        let mut conn = handle.lock();
        let value = if offline { "ON" } else { "OFF" };
        conn.query_drop(format!("SET GLOBAL offline_mode={value}"))
            .await
            .map_err(ArbiterError::from)
    }

    /// Clears all cached fields and drops this `Node`'s reference to its
    /// pooled handle. The handle itself is retained by the pool.
    pub fn reset(&mut self) {
        self.group_name = None;
        self.server_uuid = None;
        self.member_state = None;
        self.online_participants = None;
        self.has_quorum = None;
        self.read_only = None;
        self.handle = None;
    }

    /// Marks this node with the arbitrator-internal `SHOOT_ME` sentinel.
    /// Only ever called on the scratch view built during partition
    /// recovery; must never reach `LastView`.
    pub fn mark_shoot_me(&mut self) {
        self.member_state = Some(MemberState::ShootMe);
    }
}

/// The subset of `Node`'s remote operations the arbitration loop drives.
///
/// Exists so the loop (`Arbitrator<N: NodeLike>`) can run against a plain
/// in-memory test double instead of a real MySQL server. Never used as a
/// trait object, so the native async-fn-in-trait methods below need no
/// boxing.
pub trait NodeLike: Clone + PartialEq + Eq + fmt::Debug + Serialize + Sized {
    fn host(&self) -> &str;
    fn port(&self) -> u16;
    fn member_state(&self) -> Option<MemberState>;
    fn online_participants(&self) -> Option<u32>;
    fn mark_shoot_me(&mut self);
    fn reset(&mut self);

    async fn connect(&mut self) -> Result<(), ArbiterError>;
    async fn has_quorum(&mut self) -> Result<bool, ArbiterError>;
    async fn member_status(&mut self) -> Result<MemberState, ArbiterError>;
    async fn get_members(&mut self) -> Result<Vec<Self>, ArbiterError>;
    async fn shutdown(&mut self) -> Result<(), ArbiterError>;
    async fn transactions_executed_count(&mut self) -> Result<u64, ArbiterError>;
    async fn get_gcs_address(&mut self) -> Result<String, ArbiterError>;
    async fn force_members(&mut self, list: &str) -> Result<(), ArbiterError>;
    async fn set_read_only(&mut self, read_only: bool) -> Result<(), ArbiterError>;
}

impl NodeLike for Node {
    fn host(&self) -> &str {
        &self.host
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn member_state(&self) -> Option<MemberState> {
        self.member_state
    }

    fn online_participants(&self) -> Option<u32> {
        self.online_participants
    }

    fn mark_shoot_me(&mut self) {
        Node::mark_shoot_me(self)
    }

    fn reset(&mut self) {
        Node::reset(self)
    }

    async fn connect(&mut self) -> Result<(), ArbiterError> {
        Node::connect(self).await
    }

    async fn has_quorum(&mut self) -> Result<bool, ArbiterError> {
        Node::has_quorum(self).await
    }

    async fn member_status(&mut self) -> Result<MemberState, ArbiterError> {
        Node::member_status(self).await
    }

    async fn get_members(&mut self) -> Result<Vec<Node>, ArbiterError> {
        Node::get_members(self).await
    }

    async fn shutdown(&mut self) -> Result<(), ArbiterError> {
        Node::shutdown(self).await
    }

    async fn transactions_executed_count(&mut self) -> Result<u64, ArbiterError> {
        Node::transactions_executed_count(self).await
    }

    async fn get_gcs_address(&mut self) -> Result<String, ArbiterError> {
        Node::get_gcs_address(self).await
    }

    async fn force_members(&mut self, list: &str) -> Result<(), ArbiterError> {
        Node::force_members(self, list).await
    }

    async fn set_read_only(&mut self, read_only: bool) -> Result<(), ArbiterError> {
        Node::set_read_only(self, read_only).await
    }
}

/// Serializes a `Node` the way the HTTP stats endpoint needs it: omitting
/// fields that have never been populated, and never emitting the password.
impl Serialize for Node {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("MySQL Host", &self.host)?;
        map.serialize_entry("MySQL Port", &self.port)?;
        if let Some(v) = &self.group_name {
            map.serialize_entry("Group Name", v)?;
        }
        if let Some(v) = &self.server_uuid {
            map.serialize_entry("Server UUID", v)?;
        }
        if let Some(v) = &self.member_state {
            map.serialize_entry("Member State", v)?;
        }
        if let Some(v) = &self.online_participants {
            map.serialize_entry("Online Members", v)?;
        }
        if let Some(v) = &self.has_quorum {
            map.serialize_entry("Has Quorum", v)?;
        }
        if let Some(v) = &self.read_only {
            map.serialize_entry("Read Only", v)?;
        }
        map.end()
    }
}
