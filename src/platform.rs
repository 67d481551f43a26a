//! Platform-specific public types (external memory/semaphore handles, window handles).

#[cfg(windows)]
#[path = "platform/windows.rs"]
mod windows;
#[cfg(windows)]
pub use windows::*;
