use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

use super::perception::Perception;

/// Perceptions that arrived but have not been processed yet.
///
/// Cloning shares the same queue. The policy only reads it; the soul worker pops from it.
#[derive(Clone, Default)]
pub struct PendingPerceptions {
    queue: Arc<Mutex<VecDeque<Perception>>>,
    notify: Arc<Notify>,
}

impl PendingPerceptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, perception: Perception) {
        self.queue.lock().await.push_back(perception);
        self.notify.notify_one();
    }

    pub async fn pop_front(&self) -> Option<Perception> {
        self.queue.lock().await.pop_front()
    }

    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Whether any queued perception comes from `user_name`
    pub async fn has_from_user(&self, user_name: &str) -> bool {
        self.queue.lock().await.iter().any(|p| p.user_name() == user_name)
    }

    /// Wait until something is pushed
    pub async fn notified(&self) {
        self.notify.notified().await
    }
}
