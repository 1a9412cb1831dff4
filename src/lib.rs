//! Workspace facade crate.
//!
//! Host applications depend on `phonoreader` and get the wired-up
//! [`core_service::CoreService`] without naming every workspace crate. The
//! `desktop-shims` feature (on by default) pulls in the desktop bridge
//! implementations used as defaults for optional host capabilities.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
