use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;
use uuid::Uuid;

/// Per-conversation serialization boundary.
///
/// All mutations to one conversation (message appends, metadata updates,
/// status changes) must run while holding its guard so that offer recording,
/// selection capture, and booking enforcement observe a consistent metadata
/// view.
pub struct ConversationLocks {
    locks: Arc<RwLock<HashMap<Uuid, Arc<Mutex<()>>>>>,
}

impl ConversationLocks {
    pub fn new() -> Self {
        Self {
            locks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn acquire(&self, conversation_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.write().await;
            Arc::clone(
                locks
                    .entry(conversation_id)
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        debug!("Acquiring conversation lock for {}", conversation_id);
        lock.lock_owned().await
    }

    /// Drop the entry for a finished conversation. Outstanding guards keep
    /// their mutex alive through the Arc.
    pub async fn release(&self, conversation_id: Uuid) {
        let mut locks = self.locks.write().await;
        locks.remove(&conversation_id);
    }
}

impl Default for ConversationLocks {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for ConversationLocks {
    fn clone(&self) -> Self {
        Self {
            locks: Arc::clone(&self.locks),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serializes_same_conversation() {
        let locks = ConversationLocks::new();
        let id = Uuid::new_v4();

        let guard = locks.acquire(id).await;
        let locks2 = locks.clone();
        let contender = tokio::spawn(async move {
            let _guard = locks2.acquire(id).await;
        });

        // The second acquire cannot finish while the first guard is held.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn distinct_conversations_do_not_contend() {
        let locks = ConversationLocks::new();
        let _a = locks.acquire(Uuid::new_v4()).await;
        let _b = locks.acquire(Uuid::new_v4()).await;
    }
}
