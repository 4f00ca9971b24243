//! Offline asset cache
//!
//! Precaches the tracker's static assets into a versioned generation, serves
//! fetches from the active generation with network fallback, and removes
//! superseded generations on activation.

mod handler;
mod registration;
mod store;
mod types;

pub use handler::{CacheHandler, LifecycleHandler};
pub use registration::{Registration, RegistrationState, RegistrationStatus, WorkerState};
pub use store::{CacheStorage, DiskStorage, MemoryStorage};
pub use types::{Manifest, RequestKey, VersionTag, DEFAULT_ASSETS};
