use std::{
    io::{self, Write as _},
    sync::{Arc, Mutex},
};

/// Destination for program output (`print`, `out`, REPL echoes).
///
/// Implement this to capture or redirect output from interpreted code; the
/// default `StdPrint` writes straight to stdout. Writers are shared between
/// the parent machine and its pool/process children, so they must be `Send`.
pub trait PrintWriter: Send {
    /// Writes one chunk of program output. Line termination is the
    /// caller's business; `print` appends its own newline.
    fn write(&mut self, text: &str);
}

/// Shared handle to a print writer; workers clone it so their output
/// interleaves into the same destination as the parent's.
pub type SharedPrint = Arc<Mutex<dyn PrintWriter>>;

/// Wraps a writer for sharing across machines.
#[must_use]
pub fn shared(writer: impl PrintWriter + 'static) -> SharedPrint {
    Arc::new(Mutex::new(writer))
}

/// Default writer: straight to stdout, flushed per chunk so interleaved
/// worker output stays ordered with the host's own writes.
#[derive(Debug, Default)]
pub struct StdPrint;

impl PrintWriter for StdPrint {
    fn write(&mut self, text: &str) {
        let stdout = io::stdout();
        let mut lock = stdout.lock();
        let _ = lock.write_all(text.as_bytes());
        let _ = lock.flush();
    }
}

/// Collects all output into a shared string buffer.
///
/// The buffer handle survives the writer being moved into a machine, so
/// tests keep a clone and read the output afterwards.
#[derive(Debug, Default)]
pub struct CollectStringPrint {
    buffer: Arc<Mutex<String>>,
}

impl CollectStringPrint {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle onto the underlying buffer.
    #[must_use]
    pub fn buffer(&self) -> Arc<Mutex<String>> {
        Arc::clone(&self.buffer)
    }
}

impl PrintWriter for CollectStringPrint {
    fn write(&mut self, text: &str) {
        self.buffer.lock().expect("print buffer poisoned").push_str(text);
    }
}

/// Discards all output.
#[derive(Debug, Default)]
pub struct NoPrint;

impl PrintWriter for NoPrint {
    fn write(&mut self, _text: &str) {}
}
