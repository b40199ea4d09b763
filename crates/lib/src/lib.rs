//! aggon-lib: declarative, content-addressed addon state
//!
//! The pieces, bottom-up:
//! - `Store`: immutable content keyed by SHA-256, with a descriptor index
//! - `GenerationManager`: numbered snapshots of realized state and the
//!   `current` pointer
//! - `Reconciler`: plans the difference between a config and the current
//!   generation, applies it, and rolls back
//! - `gc`: prunes old generations and the content only they referenced

pub mod config;
pub mod consts;
pub mod fetch;
pub mod gc;
pub mod generation;
pub mod init;
pub mod platform;
pub mod reconcile;
pub mod state_lock;
pub mod store;
pub mod util;
