use async_trait::async_trait;
use reverie_core::types::MemoryEntry;

/// Hook the memory store calls after inserting a new memory, when relation
/// detection is requested. Implemented by `reverie-relations`; kept as a
/// trait here so this crate doesn't depend on that one.
#[async_trait]
pub trait RelationDetector: Send + Sync {
    async fn detect_and_link(&self, memory: &MemoryEntry) -> Result<(), String>;
}
