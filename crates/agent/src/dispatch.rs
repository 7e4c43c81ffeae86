use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};

use cotiza_core::domain::session::SessionKey;
use cotiza_core::errors::ApplicationError;

/// Per-conversation turn locks. Messages for the same (user, chat) pair are
/// processed one at a time; different conversations proceed in parallel.
#[derive(Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits up to `wait` for the conversation's turn. A full queue shows up
    /// as `SessionBusy`, which callers surface as a "resend shortly" reply
    /// instead of blocking the worker.
    pub async fn acquire(
        &self,
        key: &SessionKey,
        wait: Duration,
    ) -> Result<OwnedMutexGuard<()>, ApplicationError> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(lock_key(key)).or_default())
        };

        tokio::time::timeout(wait, lock.lock_owned())
            .await
            .map_err(|_| ApplicationError::SessionBusy(lock_key(key)))
    }
}

fn lock_key(key: &SessionKey) -> String {
    format!("{}:{}", key.user_id, key.chat_id)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use cotiza_core::domain::session::SessionKey;
    use cotiza_core::errors::ApplicationError;

    use super::SessionLocks;

    fn key(user: &str, chat: &str) -> SessionKey {
        SessionKey { user_id: user.to_owned(), chat_id: chat.to_owned() }
    }

    #[tokio::test]
    async fn same_conversation_waits_for_the_running_turn() {
        let locks = SessionLocks::new();
        let conversation = key("u1", "c1");

        let guard = locks.acquire(&conversation, Duration::from_millis(50)).await.expect("first");

        let busy = locks.acquire(&conversation, Duration::from_millis(50)).await;
        assert!(matches!(busy, Err(ApplicationError::SessionBusy(_))));

        drop(guard);
        locks
            .acquire(&conversation, Duration::from_millis(50))
            .await
            .expect("lock is free again");
    }

    #[tokio::test]
    async fn different_conversations_do_not_contend() {
        let locks = SessionLocks::new();

        let _first = locks.acquire(&key("u1", "c1"), Duration::from_millis(50)).await.expect("a");
        locks.acquire(&key("u2", "c1"), Duration::from_millis(50)).await.expect("b");
        locks.acquire(&key("u1", "c2"), Duration::from_millis(50)).await.expect("c");
    }
}
