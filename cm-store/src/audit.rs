//! Structured audit logging for credential, user, permission, and
//! rotation operations (§10.1).
//!
//! Four sinks implement one trait: a bare `tracing` forwarder, an
//! in-memory collector for tests and the protocol layer, an append-only
//! file logger, and a decorator that turns any of the other three into a
//! tamper-evident chain.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex as AsyncMutex;

use crate::types::{CrId, Uid};

/// What happened.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum AuditAction {
    CredentialCreated,
    CredentialReleased,
    CredentialDeleted,
    UserCreated,
    UserDeleted,
    PermissionGranted,
    PermissionRevoked,
    RotationStageEntered { stage: String },
    RotationUnverified { reason: String },
}

impl AuditAction {
    /// The one action every deployment must treat as a page rather than a
    /// log line: §4.5's rotation "unsafe window" alert.
    fn is_critical(&self) -> bool {
        matches!(self, AuditAction::RotationUnverified { .. })
    }
}

/// One entry in the audit trail.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    /// Which credential this concerns, if any.
    pub cr_id: Option<CrId>,
    /// The credential's label, for logs that never join back to the store.
    pub label: Option<String>,
    /// The acting user, if any — not necessarily the credential's owner.
    pub uid: Option<Uid>,
    pub action: AuditAction,
    /// A username, or "system" for rotation-pipeline-originated events.
    pub actor: String,
    pub success: bool,
    pub detail: Option<String>,
    /// Set only by [`IntegrityChainSink`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    /// Set only by [`IntegrityChainSink`]: the SHA-256 hex digest of the
    /// previous event in the chain, or of `"cm-audit-genesis"` for the
    /// first event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_hash: Option<String>,
}

impl AuditEvent {
    fn bare(action: AuditAction) -> Self {
        Self {
            timestamp: Utc::now(),
            cr_id: None,
            label: None,
            uid: None,
            action,
            actor: "system".into(),
            success: true,
            detail: None,
            sequence: None,
            prev_hash: None,
        }
    }

    /// An event tied to a specific credential.
    pub fn credential_event(cr_id: CrId, label: impl Into<String>, action: AuditAction) -> Self {
        let mut event = Self::bare(action);
        event.cr_id = Some(cr_id);
        event.label = Some(label.into());
        event
    }

    /// A system-level event with no specific credential (user/permission
    /// management).
    pub fn system_event(action: AuditAction) -> Self {
        Self::bare(action)
    }

    pub fn with_uid(mut self, uid: Uid) -> Self {
        self.uid = Some(uid);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn with_failure(mut self) -> Self {
        self.success = false;
        self
    }
}

/// Where audit events go.
///
/// Synchronous so recording an event never forces an `.await` onto the
/// release/rotation hot path. A sink that genuinely needs async I/O
/// should queue internally (a channel, a background flush task) instead
/// of blocking here.
pub trait AuditSinkSync: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Forwards every event to `tracing`, escalating [`AuditAction::RotationUnverified`]
/// to `error` so it reaches whatever the deployment pages on.
pub struct TracingAuditSink;

impl AuditSinkSync for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        if event.action.is_critical() {
            tracing::error!(
                cr_id = ?event.cr_id,
                label = ?event.label,
                action = ?event.action,
                actor = %event.actor,
                detail = ?event.detail,
                "ROTATION_UNVERIFIED"
            );
        } else {
            tracing::info!(
                cr_id = ?event.cr_id,
                label = ?event.label,
                action = ?event.action,
                actor = %event.actor,
                success = event.success,
                detail = ?event.detail,
                "audit"
            );
        }
    }
}

/// Collects events in memory: the fixture used by rotation and protocol
/// tests, and an option for deployments that ship audit events elsewhere
/// out-of-band.
pub struct InMemoryAuditSink {
    events: Arc<AsyncMutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self { events: Arc::new(AsyncMutex::new(Vec::new())) }
    }

    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().await.clone()
    }

    pub async fn events_for_credential(&self, cr_id: CrId) -> Vec<AuditEvent> {
        let events = self.events.lock().await;
        events.iter().filter(|e| e.cr_id == Some(cr_id)).cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.events.lock().await.len()
    }
}

impl Default for InMemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditSinkSync for InMemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        // try_lock rather than block: this sink only ever serves tests and
        // the (non-hot-path) protocol layer, never a latency-sensitive caller.
        if let Ok(mut events) = self.events.try_lock() {
            events.push(event);
        }
    }
}

/// Appends one JSON object per line to a file.
pub struct FileAuditSink {
    path: PathBuf,
}

impl FileAuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl AuditSinkSync for FileAuditSink {
    fn record(&self, event: AuditEvent) {
        use std::io::Write;

        let mut file = match std::fs::OpenOptions::new().create(true).append(true).open(&self.path) {
            Ok(file) => file,
            Err(e) => {
                eprintln!(
                    "[audit] cannot open {:?}: {} (cwd: {:?})",
                    self.path,
                    e,
                    std::env::current_dir().unwrap_or_default()
                );
                return;
            }
        };

        match serde_json::to_string(&event) {
            Ok(json) => {
                if let Err(e) = writeln!(file, "{}", json) {
                    eprintln!("[audit] write error: {}", e);
                }
            }
            Err(e) => eprintln!("[audit] serialize error: {}", e),
        }
    }
}

/// Decorates any [`AuditSinkSync`] with a SHA-256 hash chain so a replay
/// can detect insertion, deletion, or tampering anywhere in the log: each
/// event's `prev_hash` commits to the full JSON of the event before it,
/// starting from a fixed genesis digest.
pub struct IntegrityChainSink {
    inner: Arc<dyn AuditSinkSync>,
    state: std::sync::Mutex<ChainState>,
}

struct ChainState {
    next_sequence: u64,
    running_hash: String,
}

const GENESIS_PREIMAGE: &[u8] = b"cm-audit-genesis";

fn genesis_hash() -> String {
    format!("{:x}", Sha256::digest(GENESIS_PREIMAGE))
}

/// Stamps `event` with the chain's current position, then advances the
/// chain to the hash of the now-stamped event.
fn stamp_and_advance(state: &mut ChainState, event: &mut AuditEvent) {
    event.sequence = Some(state.next_sequence);
    event.prev_hash = Some(state.running_hash.clone());
    state.next_sequence += 1;
    if let Ok(json) = serde_json::to_string(event) {
        state.running_hash = format!("{:x}", Sha256::digest(json.as_bytes()));
    }
}

impl IntegrityChainSink {
    pub fn new(inner: Arc<dyn AuditSinkSync>) -> Self {
        Self { inner, state: std::sync::Mutex::new(ChainState { next_sequence: 0, running_hash: genesis_hash() }) }
    }
}

impl AuditSinkSync for IntegrityChainSink {
    fn record(&self, mut event: AuditEvent) {
        {
            let mut state = self.state.lock().unwrap();
            stamp_and_advance(&mut state, &mut event);
        }
        self.inner.record(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_sink_collects_events() {
        let sink = InMemoryAuditSink::new();
        sink.record(AuditEvent::credential_event(CrId(1), "db/prod", AuditAction::CredentialReleased).with_uid(Uid(7)));
        sink.record(AuditEvent::system_event(AuditAction::UserCreated));
        assert_eq!(sink.len().await, 2);
        assert_eq!(sink.events_for_credential(CrId(1)).await.len(), 1);
    }

    #[test]
    fn integrity_chain_links_sequential_events() {
        let inner = Arc::new(InMemoryAuditSink::new());
        let chain = IntegrityChainSink::new(inner.clone());
        chain.record(AuditEvent::system_event(AuditAction::UserCreated));
        chain.record(AuditEvent::system_event(AuditAction::UserDeleted));

        let events = inner.events.try_lock().unwrap();
        assert_eq!(events[0].sequence, Some(0));
        assert_eq!(events[1].sequence, Some(1));
        assert_eq!(events[0].prev_hash.as_deref(), Some(genesis_hash().as_str()));
        assert_ne!(events[0].prev_hash, events[1].prev_hash);
    }

    #[test]
    fn tracing_sink_does_not_panic_on_critical_action() {
        let sink = TracingAuditSink;
        sink.record(AuditEvent::credential_event(
            CrId(1),
            "db/prod",
            AuditAction::RotationUnverified { reason: "connection refused".into() },
        ));
    }
}
