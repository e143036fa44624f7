//! Headless murmur client: follows one conversation and logs what changes.

pub mod follow;
pub mod logging;
