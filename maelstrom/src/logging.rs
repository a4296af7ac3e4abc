use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

// The per-run log file, installed by the runner for the duration of a test.
// Events always go to stderr; they are mirrored here when a run is active.
static RUN_LOG: Mutex<Option<File>> = parking_lot::const_mutex(None);

/// Installs the global subscriber: events to stderr, mirrored into the
/// active run's `harness.log`. Call once, from the binary.
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(|| TeeWriter)
        .init();
}

/// Mirrors subsequent events into `path`.
pub fn set_run_log(path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    *RUN_LOG.lock() = Some(file);
    Ok(())
}

/// Stops mirroring.
pub fn clear_run_log() {
    *RUN_LOG.lock() = None;
}

struct TeeWriter;

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(file) = RUN_LOG.lock().as_mut() {
            let _ = file.write_all(buf);
        }
        io::stderr().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(file) = RUN_LOG.lock().as_mut() {
            let _ = file.flush();
        }
        io::stderr().flush()
    }
}
