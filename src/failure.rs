//! Fatal contract violations and the die hook.
//!
//! Nothing in this crate returns a recoverable error for a broken caller
//! contract. An out-of-bounds index, a failed allocation or a re-entrant
//! lock acquisition is reported to a `FatalHandler`, which must not
//! return. The default handler logs the diagnostic and exits the process;
//! `Unwind` panics instead so tests can observe the violation.

use core::panic::Location;
use parking_lot::RwLock;
use std::sync::Arc;

/// A broken caller contract.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    #[error("{op}: index {index} out of bounds for length {len}")]
    OutOfBounds {
        op: &'static str,
        index: usize,
        len: usize,
    },
    #[error("{op}: failed to allocate room for {requested} elements")]
    OutOfMemory { op: &'static str, requested: usize },
    #[error("{op}: re-entered a container whose lock is held by the current thread")]
    Reentrant { op: &'static str },
}

/// Strategy invoked on a `Violation`. Implementations must diverge.
pub trait FatalHandler: Send + Sync {
    fn die(&self, violation: &Violation, site: &'static Location<'static>) -> !;
}

/// Default handler: log, print to stderr, exit with status 1.
#[derive(Copy, Clone, Debug, Default)]
pub struct Terminate;

impl FatalHandler for Terminate {
    fn die(&self, violation: &Violation, site: &'static Location<'static>) -> ! {
        log::error!("{}: {}", site, violation);
        eprintln!("{}: {}", site, violation);
        std::process::exit(1)
    }
}

/// Panics with the diagnostic. Lets tests catch violations with
/// `catch_unwind`.
#[derive(Copy, Clone, Debug, Default)]
pub struct Unwind;

impl FatalHandler for Unwind {
    fn die(&self, violation: &Violation, site: &'static Location<'static>) -> ! {
        panic!("{}: {}", site, violation)
    }
}

static DEFAULT_HANDLER: RwLock<Option<Arc<dyn FatalHandler>>> = parking_lot::const_rwlock(None);

/// Install the handler captured by containers created from now on.
pub fn set_default_handler(handler: Arc<dyn FatalHandler>) {
    *DEFAULT_HANDLER.write() = Some(handler);
}

/// Restore `Terminate` as the process-wide default.
pub fn reset_default_handler() {
    *DEFAULT_HANDLER.write() = None;
}

/// The handler a container captures when none is given explicitly.
pub fn default_handler() -> Arc<dyn FatalHandler> {
    match &*DEFAULT_HANDLER.read() {
        Some(h) => Arc::clone(h),
        None => Arc::new(Terminate),
    }
}

/// Report `violation` at the caller's location.
#[track_caller]
pub(crate) fn die(handler: &dyn FatalHandler, violation: Violation) -> ! {
    handler.die(&violation, Location::caller())
}
