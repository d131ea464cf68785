//! Batch migration of work items between two instances of the tracking service.
//!
//! Records flow through three phases (core fields, relations, post-move tagging). Each
//! phase splits its eligible records into fixed-size batches, processes a bounded
//! number of batches concurrently and waits for all of them before the next phase
//! starts. The only durable state is the sync token kept in the comment of the
//! cross-reference relation on each target record.

pub mod batch;
pub mod builder;
pub mod context;
pub mod diagnostics;
pub mod error;
pub mod executor;
pub mod migrator;
pub mod phases;
pub mod pipeline;
pub mod processors;
pub mod report;
pub mod resolver;
pub mod retry;
pub mod single_flight;

pub use context::{Endpoint, MigrationContext, SourceTargetMap};
pub use error::MigrationError;
pub use migrator::{MigrationRun, Migrator};
pub use processors::ProcessorRegistry;
pub use report::{MigrationReport, RecordOutcome, RecordReport};
pub use retry::{RetryPolicy, RetryVerifier, Verdict};
