//! An in-memory `NodeLike` double for driving the arbitration loop without
//! a real MySQL server.

use std::sync::{Arc, Mutex};

use quorumd::core::node::MemberState;
use quorumd::core::node::NodeLike;
use quorumd::errors::ArbiterError;
use serde::Serialize;

/// Scripted responses for one mock node. `connect_fails`/`shutdown_calls`
/// etc. let a test assert exactly which operations ran.
#[derive(Clone)]
pub struct MockNode {
    pub host: String,
    pub port: u16,
    state: Arc<Mutex<MockState>>,
}

struct MockState {
    member_state: MemberState,
    online_participants: u32,
    has_quorum: bool,
    gtid_count: u64,
    gcs_address: String,
    connect_fails: bool,
    members: Vec<MockNode>,
    shutdown_calls: u32,
    force_members_calls: Vec<String>,
    force_members_fails: bool,
    set_read_only_calls: Vec<bool>,
    // Mirrors `Node::reset`'s cache-clearing: once set, `member_state`/
    // `online_participants` read back as `None` until the next `connect`.
    was_reset: bool,
    reset_calls: u32,
}

impl MockNode {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            state: Arc::new(Mutex::new(MockState {
                member_state: MemberState::Online,
                online_participants: 0,
                has_quorum: false,
                gtid_count: 0,
                gcs_address: format!("{host}:{}", port + 10000),
                connect_fails: false,
                members: Vec::new(),
                shutdown_calls: 0,
                force_members_calls: Vec::new(),
                force_members_fails: false,
                set_read_only_calls: Vec::new(),
                was_reset: false,
                reset_calls: 0,
            })),
        }
    }

    pub fn with_state(self, state: MemberState) -> Self {
        self.state.lock().unwrap().member_state = state;
        self
    }

    pub fn with_quorum(self, q: bool) -> Self {
        self.state.lock().unwrap().has_quorum = q;
        self
    }

    pub fn with_online_participants(self, n: u32) -> Self {
        self.state.lock().unwrap().online_participants = n;
        self
    }

    pub fn with_gtid_count(self, n: u64) -> Self {
        self.state.lock().unwrap().gtid_count = n;
        self
    }

    pub fn with_connect_fails(self, fails: bool) -> Self {
        self.state.lock().unwrap().connect_fails = fails;
        self
    }

    pub fn with_members(self, members: Vec<MockNode>) -> Self {
        self.state.lock().unwrap().members = members;
        self
    }

    pub fn with_force_members_fails(self, fails: bool) -> Self {
        self.state.lock().unwrap().force_members_fails = fails;
        self
    }

    pub fn shutdown_calls(&self) -> u32 {
        self.state.lock().unwrap().shutdown_calls
    }

    pub fn force_members_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().force_members_calls.clone()
    }

    pub fn set_read_only_calls(&self) -> Vec<bool> {
        self.state.lock().unwrap().set_read_only_calls.clone()
    }

    pub fn reset_calls(&self) -> u32 {
        self.state.lock().unwrap().reset_calls
    }
}

impl PartialEq for MockNode {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port
    }
}
impl Eq for MockNode {}

impl std::fmt::Debug for MockNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.state.lock().unwrap();
        f.debug_struct("MockNode")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("member_state", &s.member_state)
            .finish()
    }
}

impl Serialize for MockNode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("MySQL Host", &self.host)?;
        map.serialize_entry("MySQL Port", &self.port)?;
        map.end()
    }
}

impl NodeLike for MockNode {
    fn host(&self) -> &str {
        &self.host
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn member_state(&self) -> Option<MemberState> {
        let s = self.state.lock().unwrap();
        if s.was_reset {
            None
        } else {
            Some(s.member_state)
        }
    }

    fn online_participants(&self) -> Option<u32> {
        let s = self.state.lock().unwrap();
        if s.was_reset {
            None
        } else {
            Some(s.online_participants)
        }
    }

    fn mark_shoot_me(&mut self) {
        self.state.lock().unwrap().member_state = MemberState::ShootMe;
    }

    fn reset(&mut self) {
        let mut s = self.state.lock().unwrap();
        s.was_reset = true;
        s.reset_calls += 1;
    }

    async fn connect(&mut self) -> Result<(), ArbiterError> {
        let mut s = self.state.lock().unwrap();
        if s.connect_fails {
            return Err(ArbiterError::Transient(format!("{}:{} unreachable", self.host, self.port)));
        }
        s.was_reset = false;
        Ok(())
    }

    async fn has_quorum(&mut self) -> Result<bool, ArbiterError> {
        Ok(self.state.lock().unwrap().has_quorum)
    }

    async fn member_status(&mut self) -> Result<MemberState, ArbiterError> {
        Ok(self.state.lock().unwrap().member_state)
    }

    async fn get_members(&mut self) -> Result<Vec<Self>, ArbiterError> {
        Ok(self.state.lock().unwrap().members.clone())
    }

    async fn shutdown(&mut self) -> Result<(), ArbiterError> {
        self.state.lock().unwrap().shutdown_calls += 1;
        Ok(())
    }

    async fn transactions_executed_count(&mut self) -> Result<u64, ArbiterError> {
        Ok(self.state.lock().unwrap().gtid_count)
    }

    async fn get_gcs_address(&mut self) -> Result<String, ArbiterError> {
        Ok(self.state.lock().unwrap().gcs_address.clone())
    }

    async fn force_members(&mut self, list: &str) -> Result<(), ArbiterError> {
        let mut s = self.state.lock().unwrap();
        s.force_members_calls.push(list.to_string());
        if s.force_members_fails {
            return Err(ArbiterError::Transient("force_members failed".to_string()));
        }
        Ok(())
    }

    async fn set_read_only(&mut self, read_only: bool) -> Result<(), ArbiterError> {
        self.state.lock().unwrap().set_read_only_calls.push(read_only);
        Ok(())
    }
}

impl MockNode {
    /// Scenario 6: simulates `force_members` reporting failure on the next
    /// call, as happens in production when a prior clear of
    /// `group_replication_force_members` failed and left it non-empty.
    pub fn set_force_members_fails(&self, fails: bool) {
        self.state.lock().unwrap().force_members_fails = fails;
    }
}
