use std::ffi::CString;
use std::fmt;
use std::ptr::NonNull;

use windows_sys::Win32::{
    Foundation::{GetLastError, HMODULE},
    System::LibraryLoader::{FreeLibrary, GetProcAddress, LoadLibraryA},
};

use crate::{ProxyError, ProxyResult};

/// A Win32 API failure: the function that failed and its `GetLastError` code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsError {
    api: &'static str,
    code: u32,
}

impl fmt::Display for OsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (os error {})", self.api, self.code)
    }
}

impl OsError {
    fn current(api: &'static str) -> Self {
        OsError {
            api,
            code: unsafe { GetLastError() },
        }
    }
}

/// Owner of an `HMODULE` obtained from `LoadLibraryA`. The handle stays
/// non-zero until `close` or drop releases it.
#[derive(Debug)]
pub(crate) struct ForeignLibrary {
    handle: HMODULE,
}

// The module handle is a process-wide mapping, not tied to the thread that
// loaded it.
unsafe impl Send for ForeignLibrary {}
unsafe impl Sync for ForeignLibrary {}

impl ForeignLibrary {
    pub(crate) fn open(path: &str) -> ProxyResult<Self> {
        let module_name = CString::new(path).map_err(ProxyError::InvalidString)?;
        let handle = unsafe { LoadLibraryA(module_name.as_ptr() as *const u8) };
        if handle == 0 {
            return Err(ProxyError::Load(
                path.to_owned(),
                OsError::current("LoadLibraryA"),
            ));
        }
        Ok(Self { handle })
    }

    pub(crate) fn proc_address(&self, name: &str) -> ProxyResult<NonNull<()>> {
        let proc_name = CString::new(name).map_err(ProxyError::InvalidString)?;
        let proc = unsafe { GetProcAddress(self.handle, proc_name.as_ptr() as *const u8) };
        proc.and_then(|f| NonNull::new(f as usize as *mut ()))
            .ok_or_else(|| {
                ProxyError::SymbolNotFound(name.to_owned(), OsError::current("GetProcAddress"))
            })
    }

    /// Releases the handle exactly once; the consuming receiver keeps drop
    /// from freeing it a second time.
    pub(crate) fn close(self) -> ProxyResult<()> {
        let handle = self.handle;
        std::mem::forget(self);
        if unsafe { FreeLibrary(handle) } == 0 {
            return Err(ProxyError::Unload(OsError::current("FreeLibrary")));
        }
        Ok(())
    }
}

impl Drop for ForeignLibrary {
    fn drop(&mut self) {
        if self.handle != 0 {
            unsafe { FreeLibrary(self.handle) };
        }
    }
}

pub(crate) fn last_error() -> u32 {
    unsafe { GetLastError() }
}
