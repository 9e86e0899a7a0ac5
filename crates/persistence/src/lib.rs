//! Durable storage for saga transactions and their operations.
//!
//! The [`PersistenceGateway`] trait is the single seam between the orchestrator
//! and a store. Three implementations ship with the crate:
//!
//! - [`PostgresPersistence`] for production use
//! - [`InMemoryPersistence`] for tests and single-process hosts
//! - [`NullPersistence`] which accepts every write and serves canned reads

pub mod error;
pub mod gateway;
pub mod memory;
pub mod null;
pub mod postgres;
pub mod record;

pub use common::{Fingerprint, LifecycleState, OperationId, TransactionId};
pub use error::{PersistenceError, Result};
pub use gateway::{PersistenceGateway, PersistenceGatewayExt};
pub use memory::InMemoryPersistence;
pub use null::NullPersistence;
pub use postgres::PostgresPersistence;
pub use record::{OperationRecord, TransactionRecord, resume_index};
