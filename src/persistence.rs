//! The persistence-adapter boundary: `save_state`/`load_state` under a
//! caller-supplied thread identifier. The runtime hands the adapter an
//! opaque [`StateDict`] and never interprets its shape itself.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::envelope::StateDict;
use crate::types::Result;

/// Capability consumed by the runtime to persist and recover envelope state.
///
/// `save_state` is best-effort and idempotent from the runtime's point of
/// view: a failure is logged by the caller (the runtime's executors do this)
/// and never fails the run. Implementations must be safe for concurrent
/// calls across runs sharing the same backing store; the runtime itself
/// serializes its own calls within a single run.
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    async fn save_state(&self, thread_id: &str, state: StateDict) -> Result<()>;
    async fn load_state(&self, thread_id: &str) -> Result<Option<StateDict>>;
}

/// Reference in-memory adapter used by tests and as a drop-in default when
/// the caller has no durable store of its own.
#[derive(Debug, Default)]
pub struct InMemoryPersistenceAdapter {
    store: Mutex<HashMap<String, StateDict>>,
}

impl InMemoryPersistenceAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistenceAdapter for InMemoryPersistenceAdapter {
    async fn save_state(&self, thread_id: &str, state: StateDict) -> Result<()> {
        self.store.lock().await.insert(thread_id.to_string(), state);
        Ok(())
    }

    async fn load_state(&self, thread_id: &str) -> Result<Option<StateDict>> {
        Ok(self.store.lock().await.get(thread_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Envelope;

    #[tokio::test]
    async fn round_trips_through_the_in_memory_adapter() {
        let adapter = InMemoryPersistenceAdapter::new();
        let envelope = Envelope::new();
        let dict = envelope.to_state_dict().unwrap();

        adapter.save_state("thread-1", dict).await.unwrap();
        let loaded = adapter.load_state("thread-1").await.unwrap().unwrap();
        let restored = Envelope::from_state_dict(loaded).unwrap();

        assert_eq!(restored.identity.envelope_id, envelope.identity.envelope_id);
    }

    #[tokio::test]
    async fn load_state_returns_none_for_unknown_thread() {
        let adapter = InMemoryPersistenceAdapter::new();
        assert!(adapter.load_state("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_state_is_idempotent() {
        let adapter = InMemoryPersistenceAdapter::new();
        let envelope = Envelope::new();

        adapter.save_state("t", envelope.to_state_dict().unwrap()).await.unwrap();
        adapter.save_state("t", envelope.to_state_dict().unwrap()).await.unwrap();

        let loaded = adapter.load_state("t").await.unwrap().unwrap();
        assert_eq!(
            Envelope::from_state_dict(loaded).unwrap().identity.envelope_id,
            envelope.identity.envelope_id
        );
    }
}
