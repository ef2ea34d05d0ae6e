//! Process-wide, immutable-after-init state (§5, §9).
//!
//! The reference implementation loads configuration at module import
//! time into process-wide globals. This is built as an explicit struct
//! constructed once at startup and passed to every handler instead —
//! no hidden globals, and the pieces are independently swappable in
//! tests (an in-memory store, an ephemeral HSM, an in-memory audit sink).

use std::sync::Arc;

use cm_crypto::{HsmProvider, SoftHsm};
use cm_store::{AuditSinkSync, Store, TracingAuditSink};

use crate::config::ServerConfig;

/// Bundles the HSM handle, store, and audit sink that every request
/// handler needs. Cheap to clone (everything behind `Arc`), so a single
/// instance can be shared across connection tasks.
#[derive(Clone)]
pub struct ServerContext {
    pub hsm: Arc<dyn HsmProvider>,
    pub store: Arc<dyn Store>,
    pub audit: Arc<dyn AuditSinkSync>,
}

impl ServerContext {
    pub fn new(hsm: Arc<dyn HsmProvider>, store: Arc<dyn Store>, audit: Arc<dyn AuditSinkSync>) -> Self {
        Self { hsm, store, audit }
    }

    /// Builds a context against the configured HSM module and database,
    /// wiring a [`TracingAuditSink`] unless the config requests a file
    /// sink (§10.1).
    pub async fn from_config(config: &ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let hsm: Arc<dyn HsmProvider> = Arc::new(SoftHsm::new(&config.hsm.master_key_label, derive_master_key_stub(config)));
        let store: Arc<dyn Store> = Arc::new(cm_store::MySqlBackend::connect(&config.db.dsn()).await?);
        let audit: Arc<dyn AuditSinkSync> = match &config.audit_log_path {
            Some(path) => Arc::new(cm_store::FileAuditSink::new(path.clone())),
            None => Arc::new(TracingAuditSink),
        };
        Ok(Self::new(hsm, store, audit))
    }
}

/// Placeholder until the PKCS#11 module load path is wired up: derives a
/// stable 32-byte key from the configured PIN so `from_config` is usable
/// end-to-end against `SoftHsm` during integration testing. Production
/// deployments provision a real PKCS#11 module and never take this path.
fn derive_master_key_stub(config: &ServerConfig) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(config.hsm.pin.as_bytes());
    let mut key = [0u8; 32];
    key.copy_from_slice(&digest);
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use cm_store::InMemoryBackend;

    #[tokio::test]
    async fn context_is_cheaply_cloneable() {
        let hsm: Arc<dyn HsmProvider> = Arc::new(SoftHsm::ephemeral("cm-master").unwrap());
        let store: Arc<dyn Store> = Arc::new(InMemoryBackend::new());
        let audit: Arc<dyn AuditSinkSync> = Arc::new(cm_store::InMemoryAuditSink::new());
        let ctx = ServerContext::new(hsm, store, audit);
        let cloned = ctx.clone();
        cloned.store.put_user("alice", vec![], vec![]).await.unwrap();
        assert!(ctx.store.fetch_user("alice").await.unwrap().is_some());
    }
}
