//! Service registry - durable service descriptors and discovery.
//!
//! Features:
//!   - Idempotent registration (upsert by id) with full-file persistence
//!   - Bootstrap ("pinned") entries that always win over file content
//!   - Heartbeat state tracking
//!
//! The registry is a plain struct owned by exactly one dispatch loop; it has
//! no internal locking. Descriptors are never removed: there is no
//! deregistration or expiry, so a dead service stays listed until it
//! re-registers elsewhere.

mod store;

pub use store::{FileContents, RecordFile};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use crate::transport::Endpoint;
use crate::types::{Error, Result, ServiceId};
use crate::wire::tokens;

/// Transport-kind tag for services that answer strict request/reply.
pub const SOCKET_REP: &str = "REP";

// =============================================================================
// Heartbeat State
// =============================================================================

/// Outcome of the last liveness probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatState {
    /// Answered a probe at this instant.
    Alive(DateTime<Utc>),
    /// Last probe failed with this description.
    Failed(String),
}

impl HeartbeatState {
    pub fn alive_now() -> Self {
        HeartbeatState::Alive(Utc::now())
    }

    pub fn is_alive(&self) -> bool {
        matches!(self, HeartbeatState::Alive(_))
    }

    /// Timestamps are RFC 3339; anything else is an error description.
    pub fn to_wire(&self) -> String {
        match self {
            HeartbeatState::Alive(at) => at.to_rfc3339(),
            HeartbeatState::Failed(reason) => reason.clone(),
        }
    }

    pub fn from_wire(s: &str) -> Self {
        match DateTime::parse_from_rfc3339(s) {
            Ok(at) => HeartbeatState::Alive(at.with_timezone(&Utc)),
            Err(_) => HeartbeatState::Failed(s.to_string()),
        }
    }
}

// =============================================================================
// Service Descriptor
// =============================================================================

/// ServiceDescriptor describes one addressable service.
///
/// Field names on the wire match the registration payload record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    #[serde(rename = "SID")]
    pub id: ServiceId,

    #[serde(rename = "Name")]
    pub name: String,

    /// Transport endpoint URI, e.g. `tcp://localhost:5560`.
    #[serde(rename = "Address")]
    pub address: String,

    /// Token every reply from this service starts with.
    #[serde(rename = "Reply")]
    pub reply: String,

    #[serde(rename = "Socket_desc", default)]
    pub socket_desc: String,

    #[serde(rename = "Heartbeat_state", default)]
    pub heartbeat_state: String,
}

impl ServiceDescriptor {
    pub fn new(
        id: ServiceId,
        name: impl Into<String>,
        address: impl Into<String>,
        reply: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            address: address.into(),
            reply: reply.into(),
            socket_desc: SOCKET_REP.to_string(),
            heartbeat_state: HeartbeatState::alive_now().to_wire(),
        }
    }

    /// Decode a registration payload / record line.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let descriptor: ServiceDescriptor = serde_json::from_slice(bytes)
            .map_err(|e| Error::decode(format!("invalid service record: {}", e)))?;
        descriptor.endpoint().map_err(|e| Error::decode(e.to_string()))?;
        if descriptor.reply.is_empty() {
            return Err(Error::decode(format!(
                "service {} has an empty reply signature",
                descriptor.id
            )));
        }
        Ok(descriptor)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn endpoint(&self) -> Result<Endpoint> {
        self.address.parse()
    }

    pub fn heartbeat(&self) -> HeartbeatState {
        HeartbeatState::from_wire(&self.heartbeat_state)
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Counts from a [`Registry::load`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: usize,
    /// Lines that did not decode.
    pub skipped: usize,
    /// Records whose id was already known (pinned or seen earlier).
    pub shadowed: usize,
}

/// Registry manages service descriptors and mirrors them to a record file.
#[derive(Debug)]
pub struct Registry {
    services: HashMap<ServiceId, ServiceDescriptor>,
    pinned: HashSet<ServiceId>,
    store: Option<RecordFile>,
}

impl Registry {
    /// Registry without a backing file.
    pub fn in_memory() -> Self {
        Self {
            services: HashMap::new(),
            pinned: HashSet::new(),
            store: None,
        }
    }

    /// Registry mirrored to `path`. Call [`Registry::load`] to read it.
    pub fn with_store(path: impl Into<PathBuf>) -> Self {
        Self {
            store: Some(RecordFile::new(path)),
            ..Self::in_memory()
        }
    }

    pub fn store(&self) -> Option<&RecordFile> {
        self.store.as_ref()
    }

    // =========================================================================
    // Bootstrap & Load
    // =========================================================================

    /// Seed a bootstrap entry. Pinned entries may use reserved ids, are
    /// never overwritten by file content, and reject re-registration.
    pub fn pin(&mut self, descriptor: ServiceDescriptor) {
        self.pinned.insert(descriptor.id.clone());
        self.services.insert(descriptor.id.clone(), descriptor);
    }

    pub fn is_pinned(&self, id: &ServiceId) -> bool {
        self.pinned.contains(id)
    }

    /// Merge every record from the backing file into memory.
    ///
    /// Malformed lines are skipped with a warning. Ids already in memory
    /// keep their current descriptor.
    pub fn load(&mut self) -> Result<LoadReport> {
        let Some(store) = &self.store else {
            return Ok(LoadReport::default());
        };
        let contents = store.read_all()?;

        let mut report = LoadReport {
            skipped: contents.malformed.len(),
            ..LoadReport::default()
        };
        for (line, reason) in &contents.malformed {
            tracing::warn!(
                "Skipping malformed record at {}:{}: {}",
                store.path().display(),
                line,
                reason
            );
        }

        for descriptor in contents.records {
            if self.services.contains_key(&descriptor.id) {
                report.shadowed += 1;
                continue;
            }
            if tokens::is_reserved(descriptor.id.as_str()) {
                tracing::warn!("Skipping record with reserved id {}", descriptor.id);
                report.skipped += 1;
                continue;
            }
            self.services.insert(descriptor.id.clone(), descriptor);
            report.loaded += 1;
        }

        tracing::info!(
            "Loaded {} service(s) from {} ({} skipped, {} shadowed)",
            report.loaded,
            store.path().display(),
            report.skipped,
            report.shadowed
        );
        Ok(report)
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Upsert a descriptor and rewrite the backing file.
    ///
    /// `Err(Error::Persist)` means the in-memory entry was applied but the
    /// file may now be stale; a restart before the next successful write
    /// loses this record.
    pub fn register(&mut self, descriptor: ServiceDescriptor) -> Result<()> {
        if self.pinned.contains(&descriptor.id) || tokens::is_reserved(descriptor.id.as_str()) {
            return Err(Error::decode(format!(
                "service id {} is reserved",
                descriptor.id
            )));
        }
        descriptor.endpoint().map_err(|e| Error::decode(e.to_string()))?;

        tracing::debug!("Registering {} at {}", descriptor.id, descriptor.address);
        self.services.insert(descriptor.id.clone(), descriptor);
        self.persist()
    }

    /// Decode a registration payload, then [`Registry::register`] it.
    pub fn register_encoded(&mut self, payload: &[u8]) -> Result<ServiceDescriptor> {
        let descriptor = ServiceDescriptor::decode(payload)?;
        self.register(descriptor.clone())?;
        Ok(descriptor)
    }

    /// Replace only the heartbeat field. Not persisted on its own.
    pub fn update_heartbeat(&mut self, id: &ServiceId, state: &HeartbeatState) -> Result<()> {
        let descriptor = self
            .services
            .get_mut(id)
            .ok_or_else(|| Error::not_found(id.to_string()))?;
        descriptor.heartbeat_state = state.to_wire();
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let mut records: Vec<&ServiceDescriptor> = self.services.values().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        store.write_all(records)
    }

    // =========================================================================
    // Discovery
    // =========================================================================

    pub fn lookup(&self, id: &ServiceId) -> Result<&ServiceDescriptor> {
        self.services
            .get(id)
            .ok_or_else(|| Error::not_found(id.to_string()))
    }

    pub fn contains(&self, id: &ServiceId) -> bool {
        self.services.contains_key(id)
    }

    /// Snapshot of every descriptor, sorted by id.
    pub fn list(&self) -> Vec<ServiceDescriptor> {
        let mut all: Vec<ServiceDescriptor> = self.services.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Log the current table at info level.
    pub fn log_services(&self) {
        for descriptor in self.list() {
            tracing::info!(
                "Service {} ({}) at {} replies {}",
                descriptor.id,
                descriptor.name,
                descriptor.address,
                descriptor.reply
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn id(s: &str) -> ServiceId {
        ServiceId::from_string(s.to_string()).unwrap()
    }

    fn descriptor(sid: &str, address: &str) -> ServiceDescriptor {
        ServiceDescriptor::new(id(sid), format!("{} Service", sid), address, sid)
    }

    /// Writer handed to a test subscriber; collects formatted log lines.
    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_log_services_names_each_entry() {
        let mut registry = Registry::in_memory();
        registry.register(descriptor("hello", "tcp://localhost:5560")).unwrap();
        registry.register(descriptor("time", "tcp://localhost:5561")).unwrap();

        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, || registry.log_services());

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines
            .iter()
            .any(|l| l.contains("Service hello (hello Service) at tcp://localhost:5560 replies hello")));
        assert!(lines
            .iter()
            .any(|l| l.contains("Service time (time Service) at tcp://localhost:5561 replies time")));
    }

    fn file_lines(registry: &Registry) -> Vec<String> {
        let path = registry.store().unwrap().path();
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_register_twice_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = Registry::with_store(dir.path().join("services.json"));

        let hello = descriptor("hello", "tcp://localhost:5560");
        registry.register(hello.clone()).unwrap();
        let first = registry.lookup(&id("hello")).unwrap().clone();
        registry.register(hello).unwrap();
        let second = registry.lookup(&id("hello")).unwrap().clone();

        assert_eq!(first, second);
        assert_eq!(file_lines(&registry).len(), 1);
    }

    #[test]
    fn test_reregistration_replaces_address() {
        let mut registry = Registry::in_memory();
        registry.register(descriptor("hello", "tcp://localhost:1001")).unwrap();
        assert_eq!(registry.lookup(&id("hello")).unwrap().address, "tcp://localhost:1001");

        registry.register(descriptor("hello", "tcp://localhost:1002")).unwrap();
        assert_eq!(registry.lookup(&id("hello")).unwrap().address, "tcp://localhost:1002");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_lookup_unknown_is_not_found() {
        let registry = Registry::in_memory();
        assert!(matches!(registry.lookup(&id("nope")), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_reserved_and_pinned_ids_rejected() {
        let mut registry = Registry::in_memory();
        registry.pin(descriptor("bootstrap", "tcp://localhost:5569"));

        assert!(matches!(
            registry.register(descriptor("register", "tcp://localhost:1")),
            Err(Error::Decode(_))
        ));
        assert!(matches!(
            registry.register(descriptor("bootstrap", "tcp://localhost:1")),
            Err(Error::Decode(_))
        ));
        assert_eq!(
            registry.lookup(&id("bootstrap")).unwrap().address,
            "tcp://localhost:5569"
        );
    }

    #[test]
    fn test_bad_address_rejected() {
        let mut registry = Registry::in_memory();
        let err = registry.register(descriptor("hello", "localhost:5560")).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_pinned_entries_win_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dservices.json");
        {
            let mut writer = Registry::with_store(&path);
            writer.register(descriptor("hello", "tcp://localhost:5560")).unwrap();
            writer.register(descriptor("stale", "tcp://localhost:9999")).unwrap();
        }

        let mut registry = Registry::with_store(&path);
        registry.pin(descriptor("stale", "tcp://localhost:1111"));
        let report = registry.load().unwrap();

        assert_eq!(report.loaded, 1);
        assert_eq!(report.shadowed, 1);
        assert_eq!(registry.lookup(&id("stale")).unwrap().address, "tcp://localhost:1111");
        assert_eq!(registry.lookup(&id("hello")).unwrap().address, "tcp://localhost:5560");
    }

    #[test]
    fn test_persist_failure_keeps_memory_entry() {
        let mut registry = Registry::with_store("/nonexistent-dir/svcfabric/services.json");
        let err = registry.register(descriptor("hello", "tcp://localhost:5560")).unwrap_err();
        assert!(matches!(err, Error::Persist(_)));
        assert!(registry.contains(&id("hello")));
    }

    #[test]
    fn test_update_heartbeat_touches_only_state() {
        let mut registry = Registry::in_memory();
        let hello = descriptor("hello", "tcp://localhost:5560");
        registry.register(hello.clone()).unwrap();

        let failed = HeartbeatState::Failed("timeout: no reply".to_string());
        registry.update_heartbeat(&id("hello"), &failed).unwrap();

        let stored = registry.lookup(&id("hello")).unwrap();
        assert_eq!(stored.heartbeat(), failed);
        assert_eq!(stored.address, hello.address);
        assert_eq!(stored.reply, hello.reply);

        assert!(matches!(
            registry.update_heartbeat(&id("ghost"), &failed),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_decode_registration_payload() {
        let payload = br#"{"SID":"time","Name":"Time Service","Address":"tcp://localhost:5580","Reply":"time","Socket_desc":"REP","Heartbeat_state":"2024-01-01T00:00:00+00:00"}"#;
        let descriptor = ServiceDescriptor::decode(payload).unwrap();
        assert_eq!(descriptor.id.as_str(), "time");
        assert!(descriptor.heartbeat().is_alive());

        assert!(matches!(ServiceDescriptor::decode(b"{"), Err(Error::Decode(_))));
        assert!(matches!(
            ServiceDescriptor::decode(br#"{"SID":"","Name":"x","Address":"tcp://h:1","Reply":"x"}"#),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn test_register_encoded_rejects_garbage() {
        let mut registry = Registry::in_memory();
        assert!(matches!(
            registry.register_encoded(b"not a record"),
            Err(Error::Decode(_))
        ));
        let hello = descriptor("hello", "tcp://localhost:5560");
        let stored = registry.register_encoded(&hello.encode().unwrap()).unwrap();
        assert_eq!(stored, hello);
    }

    proptest::proptest! {
        #[test]
        fn prop_persisted_registry_reloads_identically(
            ids in proptest::collection::btree_set("[a-z][a-z0-9]{0,11}", 1..12),
            port in 1024u16..60000,
        ) {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("services.json");

            let mut written = Registry::with_store(&path);
            for (offset, sid) in ids.iter().enumerate() {
                if tokens::is_reserved(sid) {
                    continue;
                }
                let address = format!("tcp://localhost:{}", port.wrapping_add(offset as u16));
                written.register(descriptor(sid, &address)).unwrap();
            }

            let mut reloaded = Registry::with_store(&path);
            reloaded.load().unwrap();
            proptest::prop_assert_eq!(reloaded.list(), written.list());
        }
    }

    #[test]
    fn test_heartbeat_state_wire_form() {
        let failed = HeartbeatState::from_wire("timeout: no reply from tcp://localhost:1");
        assert!(!failed.is_alive());
        let alive = HeartbeatState::alive_now();
        assert_eq!(HeartbeatState::from_wire(&alive.to_wire()), alive);
    }
}
