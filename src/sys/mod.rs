//! Platform loader glue.
//!
//! Each backend exposes the same three things: [`ForeignLibrary`], an RAII
//! owner of the OS module handle; [`OsError`], the platform's failure
//! detail; and [`last_error`], the thread's last-error value right after a
//! foreign call.

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub(crate) use unix::{last_error, ForeignLibrary};
#[cfg(unix)]
pub use unix::OsError;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub(crate) use windows::{last_error, ForeignLibrary};
#[cfg(windows)]
pub use windows::OsError;
