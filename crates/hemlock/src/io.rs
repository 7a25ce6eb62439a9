use std::{
    io::{self, Write as _},
    sync::{Arc, Mutex},
};

use crate::sync;

/// Trait for handling output from the `print()` builtin.
///
/// Implement this to capture or redirect print output from Hemlock code. The
/// writer is shared by every task in the runtime, so implementations take
/// `&self` and synchronize internally.
pub trait PrintWriter: Send + Sync {
    /// Writes one formatted argument's text, without separators or a
    /// trailing newline.
    fn write_str(&self, output: &str);

    /// Writes a single separator or terminator character (space, newline).
    fn push_char(&self, end: char);
}

/// Default `PrintWriter` that writes to stdout, flushing on newline so task
/// output interleaves at line granularity.
#[derive(Debug, Default)]
pub struct StdPrint;

impl PrintWriter for StdPrint {
    fn write_str(&self, output: &str) {
        let mut stdout = io::stdout().lock();
        let _ = stdout.write_all(output.as_bytes());
    }

    fn push_char(&self, end: char) {
        let mut stdout = io::stdout().lock();
        let mut buf = [0u8; 4];
        let _ = stdout.write_all(end.encode_utf8(&mut buf).as_bytes());
        if end == '\n' {
            let _ = stdout.flush();
        }
    }
}

/// A `PrintWriter` that collects all output into a shared string.
///
/// Clones share the same buffer, so a test can keep one clone and hand the
/// other to the runtime.
#[derive(Debug, Clone, Default)]
pub struct CollectStringPrint(Arc<Mutex<String>>);

impl CollectStringPrint {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything collected so far.
    #[must_use]
    pub fn output(&self) -> String {
        sync::lock(&self.0).clone()
    }
}

impl PrintWriter for CollectStringPrint {
    fn write_str(&self, output: &str) {
        sync::lock(&self.0).push_str(output);
    }

    fn push_char(&self, end: char) {
        sync::lock(&self.0).push(end);
    }
}

/// `PrintWriter` that ignores all output. Useful for benchmarks and tests
/// that only care about results.
#[derive(Debug, Default)]
pub struct NoPrint;

impl PrintWriter for NoPrint {
    fn write_str(&self, _output: &str) {}

    fn push_char(&self, _end: char) {}
}
