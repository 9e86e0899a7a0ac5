//! Lookup of in-flight transactions by ID.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{Fingerprint, TransactionId};
use tokio::sync::RwLock;

use crate::notification::NotificationBus;

/// Everything known about a registered transaction outside its orchestrator.
#[derive(Clone)]
pub struct TransactionHandle {
    pub transaction_id: TransactionId,
    pub fingerprint: Option<Fingerprint>,
    /// Operation names in attach order.
    pub operation_names: Vec<String>,
    /// Subscriber list that saga transitions publish to.
    pub notifications: NotificationBus,
    pub registered_at: DateTime<Utc>,
}

impl TransactionHandle {
    pub fn new(
        transaction_id: TransactionId,
        fingerprint: Option<Fingerprint>,
        operation_names: Vec<String>,
        notifications: NotificationBus,
    ) -> Self {
        Self {
            transaction_id,
            fingerprint,
            operation_names,
            notifications,
            registered_at: Utc::now(),
        }
    }
}

/// Shared map of transaction handles keyed by transaction ID.
#[derive(Clone, Default)]
pub struct TransactionCache {
    handles: Arc<RwLock<HashMap<TransactionId, TransactionHandle>>>,
}

impl TransactionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handle, replacing any previous one for the same ID.
    pub async fn store(&self, handle: TransactionHandle) {
        self.handles
            .write()
            .await
            .insert(handle.transaction_id, handle);
    }

    pub async fn get(&self, transaction_id: TransactionId) -> Option<TransactionHandle> {
        self.handles.read().await.get(&transaction_id).cloned()
    }

    /// Removes and returns a handle.
    pub async fn evict(&self, transaction_id: TransactionId) -> Option<TransactionHandle> {
        self.handles.write().await.remove(&transaction_id)
    }

    /// Returns every registered handle, oldest first.
    pub async fn list(&self) -> Vec<TransactionHandle> {
        let mut handles: Vec<_> = self.handles.read().await.values().cloned().collect();
        handles.sort_by_key(|handle| handle.registered_at);
        handles
    }

    pub async fn len(&self) -> usize {
        self.handles.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.handles.read().await.is_empty()
    }
}
