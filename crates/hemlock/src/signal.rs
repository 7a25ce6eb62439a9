//! OS signal bridging for the `signal` and `raise` builtins.
//!
//! The OS handler only sets an atomic pending flag; the evaluator services
//! pending signals at statement boundaries on the main task, where it is
//! safe to run user handlers.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::exception::{ExcKind, Exception};

const MAX_SIGNAL: usize = 64;

static PENDING: [AtomicBool; MAX_SIGNAL] = [const { AtomicBool::new(false) }; MAX_SIGNAL];

extern "C" fn on_signal(sig: libc::c_int) {
    if let Ok(idx) = usize::try_from(sig)
        && idx < MAX_SIGNAL
    {
        PENDING[idx].store(true, Ordering::SeqCst);
    }
}

/// Installs the flag-setting OS handler for `sig`.
pub(crate) fn install(sig: i32) -> Result<(), Exception> {
    if !(0..MAX_SIGNAL as i32).contains(&sig) {
        return Err(Exception::new(ExcKind::TypeError, format!("invalid signal number {sig}")));
    }
    #[cfg(unix)]
    {
        let handler = on_signal as extern "C" fn(libc::c_int);
        // SAFETY: on_signal is async-signal-safe (a single atomic store).
        let previous = unsafe { libc::signal(sig, handler as libc::sighandler_t) };
        if previous == libc::SIG_ERR {
            return Err(Exception::new(
                ExcKind::IOError,
                format!("cannot install handler for signal {sig}"),
            ));
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        Err(Exception::new(
            ExcKind::FFIError,
            "signal handlers are not supported on this platform",
        ))
    }
}

/// Raises `sig` against the current process.
pub(crate) fn raise(sig: i32) -> Result<(), Exception> {
    #[cfg(unix)]
    {
        // SAFETY: raise with a checked signal number.
        if unsafe { libc::raise(sig) } != 0 {
            return Err(Exception::new(ExcKind::IOError, format!("raise({sig}) failed")));
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        let _ = sig;
        Err(Exception::new(
            ExcKind::FFIError,
            "signal raising is not supported on this platform",
        ))
    }
}

/// Takes one pending signal number, if any.
pub(crate) fn take_pending() -> Option<i32> {
    for (sig, flag) in PENDING.iter().enumerate() {
        if flag.swap(false, Ordering::SeqCst) {
            return Some(sig as i32);
        }
    }
    None
}
