//! glitters library crate.
//!
//! Camera session lifecycle, capture coordination, media analysis uploads,
//! audio recording, the photo library and permission checks. The `glitters`
//! binary is a thin CLI over these modules.

pub mod analysis;
pub mod audio;
pub mod camera;
pub mod config;
pub mod dispatch;
pub mod library;
pub mod permissions;
