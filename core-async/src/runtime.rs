//! Runtime utilities.
//!
//! Hosts that are not async themselves (FFI shims, one-shot command-line
//! readers) drive futures through [`block_on`].

pub use tokio::runtime::{Builder, Handle, Runtime};

/// Runs `future` to completion on a fresh current-thread runtime.
///
/// Returns an error when the runtime cannot be constructed.
pub fn block_on<F>(future: F) -> std::io::Result<F::Output>
where
    F: std::future::Future,
{
    let runtime = Builder::new_current_thread().enable_all().build()?;
    Ok(runtime.block_on(future))
}

/// Returns a handle to the runtime the caller is running on, if any.
pub fn current() -> Option<Handle> {
    Handle::try_current().ok()
}
