use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use summarybot_core::domain::subscription::Subscription;

struct PendingDeletion {
    snapshot: Vec<Subscription>,
    opened_at: Instant,
}

/// Per-user deletion dialogs awaiting a reply. Entries older than the TTL are dropped on access.
pub struct DialogStates {
    ttl: Duration,
    pending: Mutex<HashMap<String, PendingDeletion>>,
}

impl DialogStates {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, pending: Mutex::new(HashMap::new()) }
    }

    /// Remembers the list shown to the user so a numeric reply refers to the same rows.
    pub async fn begin(&self, user_id: &str, snapshot: Vec<Subscription>) {
        let mut pending = self.pending.lock().await;
        self.purge_expired(&mut pending);
        pending.insert(user_id.to_string(), PendingDeletion { snapshot, opened_at: Instant::now() });
    }

    /// Consumes the user's dialog, if one is still live.
    pub async fn take(&self, user_id: &str) -> Option<Vec<Subscription>> {
        let mut pending = self.pending.lock().await;
        self.purge_expired(&mut pending);
        pending.remove(user_id).map(|dialog| dialog.snapshot)
    }

    pub async fn len(&self) -> usize {
        let mut pending = self.pending.lock().await;
        self.purge_expired(&mut pending);
        pending.len()
    }

    fn purge_expired(&self, pending: &mut HashMap<String, PendingDeletion>) {
        pending.retain(|_, dialog| dialog.opened_at.elapsed() < self.ttl);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::DialogStates;

    #[tokio::test]
    async fn dialog_is_consumed_by_first_reply() {
        let dialogs = DialogStates::new(Duration::from_secs(300));
        dialogs.begin("u1", Vec::new()).await;

        assert_eq!(dialogs.len().await, 1);
        assert!(dialogs.take("u1").await.is_some());
        assert!(dialogs.take("u1").await.is_none());
        assert!(dialogs.take("u2").await.is_none());
    }

    #[tokio::test]
    async fn expired_dialogs_are_purged() {
        let dialogs = DialogStates::new(Duration::ZERO);
        dialogs.begin("u1", Vec::new()).await;

        assert_eq!(dialogs.len().await, 0);
        assert!(dialogs.take("u1").await.is_none());
    }
}
