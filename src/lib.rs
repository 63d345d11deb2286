//! Vttsource - WebVTT-in-MP4 box codec and Media Source Extensions buffering
//!
//! The binary is a thin CLI over the workspace crates; this library crate
//! exposes its configuration layer for integration testing.

pub mod config;

pub use vttsource_media as media;
pub use vttsource_mse as mse;
