//! Chronicle storage backends.
//!
//! In-memory implementations of the event, snapshot and saga persistence
//! contracts, a batching wrapper for asynchronous event writes, and the
//! PostgreSQL implementations built on `sqlx`.

pub mod batching;
pub mod memory_event_store;
pub mod memory_saga_repository;
pub mod memory_snapshot_store;
pub mod pg_error;
pub mod pg_event_store;
pub mod pg_saga_repository;
pub mod pg_snapshot_store;
pub mod schema;

pub use batching::BatchingEventStore;
pub use memory_event_store::InMemoryEventStore;
pub use memory_saga_repository::InMemorySagaRepository;
pub use memory_snapshot_store::InMemorySnapshotStore;
pub use pg_error::PgTransientErrorClassifier;
pub use pg_event_store::PgEventStore;
pub use pg_saga_repository::PgSagaRepository;
pub use pg_snapshot_store::PgSnapshotStore;
