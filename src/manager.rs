//! The original-library manager: one loaded library, one symbol cache,
//! and the forwarding path the proxy's export shims call into.

use std::collections::HashMap;
use std::ptr::NonNull;

use parking_lot::RwLock;

use crate::raw_call::{self, RawReturn, Word, MAX_FORWARD_ARGS};
use crate::sys::ForeignLibrary;
use crate::{ProxyError, ProxyResult};

/// A resolved entry point of one export in the original library.
///
/// Valid for as long as the [`OriginalLibrary`] it came from stays loaded;
/// it holds no ownership of the library itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcAddress(NonNull<()>);

impl ProcAddress {
    /// The raw entry address, for callers that build their own typed
    /// function pointer instead of going through [`OriginalLibrary::forward`].
    pub fn as_ptr(self) -> *const () {
        self.0.as_ptr()
    }
}

// A code address in a loaded module is valid from any thread.
unsafe impl Send for ProcAddress {}
unsafe impl Sync for ProcAddress {}

/// The loaded original library and its lazily-populated export cache.
///
/// One instance fronts one library. Share it by reference across threads;
/// resolution takes a read lock on the hit path and a write lock only to
/// insert a newly-resolved entry. [`unload`](Self::unload) consumes the
/// instance, so no call can race the teardown.
#[derive(Debug)]
pub struct OriginalLibrary {
    path: String,
    library: ForeignLibrary,
    procs: RwLock<HashMap<String, ProcAddress>>,
}

impl OriginalLibrary {
    /// Loads the library this proxy stands in for. No exports are resolved
    /// until they are first requested.
    pub fn load(path: &str) -> ProxyResult<Self> {
        let library = ForeignLibrary::open(path)?;
        Ok(Self {
            path: path.to_owned(),
            library,
            procs: RwLock::new(HashMap::new()),
        })
    }

    /// The path the library was loaded from.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Resolves an export by its exact, case-sensitive name, caching the
    /// entry point on first use.
    ///
    /// A missing export is reported as [`ProxyError::SymbolNotFound`]; use
    /// this directly to probe which exports exist without committing to a
    /// call.
    pub fn resolve(&self, name: &str) -> ProxyResult<ProcAddress> {
        if let Some(proc) = self.procs.read().get(name) {
            return Ok(*proc);
        }
        let resolved = ProcAddress(self.library.proc_address(name)?);
        // Two callers can miss on the same name at once; the first insert
        // wins and both return the same entry point.
        Ok(*self.procs.write().entry(name.to_owned()).or_insert(resolved))
    }

    /// Forwards a call to the named export with `args` in order, returning
    /// the callee's raw result registers and last-error value.
    ///
    /// A name the original library does not export means the proxy cannot
    /// keep its contract of transparent forwarding; that is not returned as
    /// an error but aborts the process with a diagnostic, as does an
    /// argument list longer than [`MAX_FORWARD_ARGS`].
    ///
    /// # Safety
    ///
    /// `args` must match the number and meaning of the words the export
    /// expects under the system calling convention; nothing is checked.
    pub unsafe fn forward(&self, name: &str, args: &[Word]) -> RawReturn {
        let proc = match self.resolve(name) {
            Ok(proc) => proc,
            Err(err) => unforwardable(&self.path, name, &err),
        };
        match unsafe { raw_call::invoke(proc.as_ptr(), args) } {
            Some(ret) => ret,
            None => argument_overflow(&self.path, name, args.len()),
        }
    }

    /// Releases the library. Afterwards the manager is gone, and with it
    /// every cached entry point.
    pub fn unload(self) -> ProxyResult<()> {
        self.library.close()
    }
}

#[cold]
fn unforwardable(path: &str, name: &str, err: &ProxyError) -> ! {
    eprintln!("proxy-dll: cannot forward `{}` to {}: {}", name, path, err);
    std::process::abort();
}

#[cold]
fn argument_overflow(path: &str, name: &str, count: usize) -> ! {
    eprintln!(
        "proxy-dll: cannot forward `{}` to {}: {} arguments exceeds the limit of {}",
        name, path, count, MAX_FORWARD_ARGS
    );
    std::process::abort();
}
