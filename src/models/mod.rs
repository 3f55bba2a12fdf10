//! Core data models for the bucket reaper.
//!
//! These types are typed views over what the control plane and the storage
//! provider hand us. Nothing here performs I/O.

pub mod bucket;
pub mod guard;
pub mod object;
