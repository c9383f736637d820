// ABOUTME: Destinations for the human-readable line emitted when a recorder closes.
// ABOUTME: TracingSink forwards to tracing; MemorySink captures lines for tests and tooling.

use parking_lot::Mutex;

/// Fire-and-forget line output. `error` is used for crashed entries.
pub trait LogSink: Send + Sync {
    fn print(&self, line: &str);
    fn error(&self, line: &str);
}

/// Default sink: info/error events under the `stagelog::journal` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn print(&self, line: &str) {
        tracing::info!(target: "stagelog::journal", "{}", line);
    }

    fn error(&self, line: &str) {
        tracing::error!(target: "stagelog::journal", "{}", line);
    }
}

/// Buffers printed lines and moves the buffer into the captured result each
/// time an error line arrives, so `result()` holds only the output of
/// crashed units of work (with the info lines that preceded them).
#[derive(Debug, Default)]
pub struct MemorySink {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    buffer: String,
    result: String,
    printed: usize,
    errors: usize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn result(&self) -> String {
        self.state.lock().result.clone()
    }

    pub fn pending(&self) -> String {
        self.state.lock().buffer.clone()
    }

    /// Number of lines written through `print` and `error` respectively.
    pub fn counts(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.printed, state.errors)
    }
}

impl LogSink for MemorySink {
    fn print(&self, line: &str) {
        let mut state = self.state.lock();
        state.buffer.push_str(line);
        state.buffer.push('\n');
        state.printed += 1;
    }

    fn error(&self, line: &str) {
        let mut state = self.state.lock();
        state.buffer.push_str(line);
        state.buffer.push('\n');
        let flushed = std::mem::take(&mut state.buffer);
        state.result.push_str(&flushed);
        state.errors += 1;
    }
}
