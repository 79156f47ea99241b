#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! flynn-volume: the local cache of content-addressed filesystem layers, and
//! the writable per-job volumes bound into a job's root filesystem
//! (section 4.4).

pub mod layer;
pub mod volume;

pub use layer::{LayerError, LayerStore};
pub use volume::VolumeManager;
