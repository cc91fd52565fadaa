//! Storage plumbing for the Ariel dubbing UI.
//!
//! The UI and the processing backend talk only through a shared bucket:
//! the UI uploads trigger objects and then polls until the backend writes
//! its answer or removes the trigger. [`poll::PollingFetcher`] implements
//! that wait over any [`object_store::ObjectStore`], and
//! [`session::DubbingSession`] strings the steps together.

pub mod config;
pub mod object_store;
pub mod poll;
pub mod session;

pub use object_store::{IfMatch, ObjectStore, ObjectStoreError, PutRequest};
pub use poll::{FailureKind, PollError, PollPolicy, PollingFetcher};
