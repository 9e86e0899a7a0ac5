//! Transaction and operation configuration.

use std::sync::Arc;

use saga::Observer;
use serde::{Deserialize, Serialize};

/// Retry behaviour for failed operations.
///
/// Only `None` has a runtime effect; the other policies are accepted and
/// recorded, and operations still run exactly once per attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RetryPolicy {
    #[default]
    None,
    Immediate,
    Interval,
    Exponential,
}

impl RetryPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryPolicy::None => "None",
            RetryPolicy::Immediate => "Immediate",
            RetryPolicy::Interval => "Interval",
            RetryPolicy::Exponential => "Exponential",
        }
    }
}

impl std::fmt::Display for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-operation options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OperationConfig {
    pub retry: RetryPolicy,
    /// Log this operation's progress at `info` instead of `debug`.
    pub logging: bool,
}

/// Per-transaction options produced by [`TransactionConfigurator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransactionConfig {
    pub retry: RetryPolicy,
    /// Log progress at `info` instead of `debug`.
    pub logging: bool,
}

/// Collects configuration inside `TransactionOrchestrator::configure`.
#[derive(Default)]
pub struct TransactionConfigurator {
    config: TransactionConfig,
    observers: Vec<Arc<dyn Observer>>,
}

impl TransactionConfigurator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises progress logging to `info`. Informational only.
    pub fn turn_on_logging(&mut self) -> &mut Self {
        self.config.logging = true;
        self
    }

    /// Selects a retry policy.
    pub fn retry(&mut self, policy: RetryPolicy) -> &mut Self {
        self.config.retry = policy;
        self
    }

    /// Registers an observer for the transaction's state changes.
    ///
    /// The observer stays subscribed until the transaction completes. Use
    /// [`TransactionOrchestrator::subscribe`](crate::TransactionOrchestrator::subscribe)
    /// to get a [`Subscription`](saga::Subscription) that can remove it earlier.
    pub fn subscribe(&mut self, observer: Arc<dyn Observer>) -> &mut Self {
        self.observers.push(observer);
        self
    }

    pub fn config(&self) -> TransactionConfig {
        self.config
    }

    pub(crate) fn into_parts(self) -> (TransactionConfig, Vec<Arc<dyn Observer>>) {
        (self.config, self.observers)
    }
}
