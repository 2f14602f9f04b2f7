use std::ffi::{CStr, CString};
use std::fmt;
use std::ptr::NonNull;

use libc::{c_void, dlclose, dlerror, dlopen, dlsym, RTLD_LOCAL, RTLD_NOW};

use crate::{ProxyError, ProxyResult};

/// A dynamic-loader failure, carrying the `dlerror` text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsError {
    detail: String,
}

impl fmt::Display for OsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.detail)
    }
}

impl OsError {
    /// Consumes the pending `dlerror` message, if the loader left one.
    fn take(fallback: &'static str) -> Self {
        let message = unsafe { dlerror() };
        let detail = if message.is_null() {
            fallback.to_owned()
        } else {
            unsafe { CStr::from_ptr(message) }
                .to_string_lossy()
                .into_owned()
        };
        OsError { detail }
    }
}

/// Owner of a `dlopen` handle. The handle stays non-null until `close` or
/// drop releases it.
#[derive(Debug)]
pub(crate) struct ForeignLibrary {
    handle: NonNull<c_void>,
}

// The loaded object is a process-wide mapping, not tied to the thread that
// loaded it.
unsafe impl Send for ForeignLibrary {}
unsafe impl Sync for ForeignLibrary {}

impl ForeignLibrary {
    pub(crate) fn open(path: &str) -> ProxyResult<Self> {
        let c_path = CString::new(path).map_err(ProxyError::InvalidString)?;
        unsafe { dlerror() };
        let handle = unsafe { dlopen(c_path.as_ptr(), RTLD_NOW | RTLD_LOCAL) };
        match NonNull::new(handle) {
            Some(handle) => Ok(Self { handle }),
            None => Err(ProxyError::Load(
                path.to_owned(),
                OsError::take("dlopen failed"),
            )),
        }
    }

    /// A symbol whose value is genuinely NULL is indistinguishable from a
    /// missing one here; export tables for functions never contain NULL.
    pub(crate) fn proc_address(&self, name: &str) -> ProxyResult<NonNull<()>> {
        let c_name = CString::new(name).map_err(ProxyError::InvalidString)?;
        unsafe { dlerror() };
        let addr = unsafe { dlsym(self.handle.as_ptr(), c_name.as_ptr()) };
        match NonNull::new(addr.cast::<()>()) {
            Some(addr) => Ok(addr),
            None => Err(ProxyError::SymbolNotFound(
                name.to_owned(),
                OsError::take("dlsym failed"),
            )),
        }
    }

    /// Releases the handle exactly once; the consuming receiver keeps drop
    /// from freeing it a second time.
    pub(crate) fn close(self) -> ProxyResult<()> {
        let handle = self.handle;
        std::mem::forget(self);
        unsafe { dlerror() };
        if unsafe { dlclose(handle.as_ptr()) } != 0 {
            return Err(ProxyError::Unload(OsError::take("dlclose failed")));
        }
        Ok(())
    }
}

impl Drop for ForeignLibrary {
    fn drop(&mut self) {
        unsafe { dlclose(self.handle.as_ptr()) };
    }
}

pub(crate) fn last_error() -> u32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0) as u32
}
