//! Host output hand-off for the `print` command (§4.6, §6).
//!
//! Grounded on the teacher's `PrintWriter` trait (`io.rs`): the interpreter
//! does no I/O itself, it hands resolved strings to whatever the host plugs
//! in. `Script`/`Scene` are generic over `impl LogSink` the same way the
//! teacher's `Runner`/`ReplSession` are generic over `impl PrintWriter`.

use std::fmt;

/// Receives the fully-resolved text of every `print` command.
pub trait LogSink {
    fn log(&mut self, message: &str);
}

/// Default sink: writes each message as its own line to stdout.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl LogSink for StdoutSink {
    fn log(&mut self, message: &str) {
        println!("{message}");
    }
}

/// Test/embedding double that collects every logged line in order.
#[derive(Debug, Default, Clone)]
pub struct CollectingSink(pub Vec<String>);

impl CollectingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.0
    }
}

impl LogSink for CollectingSink {
    fn log(&mut self, message: &str) {
        self.0.push(message.to_owned());
    }
}

impl fmt::Display for CollectingSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("\n"))
    }
}

/// Sink that discards everything, for benches and callers that don't care
/// about `print` output.
#[derive(Debug, Default)]
pub struct NullSink;

impl LogSink for NullSink {
    fn log(&mut self, _message: &str) {}
}
