//! Bitemporal event-sourcing primitives: facts, streams, and
//! projections over two time axes.
//!
//! A [`Fact`] is something that happened, carrying both when it was
//! recorded (the knowledge axis) and when it actually occurred (the
//! validity axis). A [`Stream`] aggregates the facts of one logical
//! entity and runs the append protocol: validation, actual-time
//! resolution, a consistency check, optimistic-concurrency persistence,
//! then projection dispatch. A [`Projection`] folds fact history into a
//! read state, virtually or materialized into a store.
//!
//! Storage, contextual metadata, and background scheduling are
//! collaborator traits ([`FactLog`], [`ContextSource`], [`Scheduler`]);
//! in-memory reference implementations back the tests and double as
//! executable contracts for host-provided backends.

mod context;
mod entry;
mod error;
mod errors;
mod fact;
mod log;
mod projection;
mod scheduler;
mod stream;
mod time;

pub use context::{ContextSource, NoContext, StaticContext};
pub use entry::{FactEntry, NewFactEntry};
pub use error::{AppendError, ConfigError, ProjectionError, StorageError};
pub use errors::{BASE, Errors, FieldError};
pub use fact::{Fact, FactKind, LED_TO_INVALID_STATE_PREFIX};
pub use log::{FactLog, InMemoryFactLog, InsertError};
pub use projection::{
    InMemoryMaterializationStore, Materialization, MaterializationStore, Projection, ReadState,
    Rejection, UnknownKind,
};
pub use scheduler::{
    ProjectionJob, RecordingScheduler, ScheduleOptions, Scheduler, TemporalContext,
};
pub use stream::{Stream, StreamConfig, StreamConfigBuilder};
pub use time::{ActualTimeField, TimeValue};
