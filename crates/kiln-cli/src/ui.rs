//! Plain terminal output.

use std::io::Write;
use std::sync::Mutex;

use kiln_core::Reporter;

/// Line-oriented reporter for interactive runs.
#[derive(Debug, Default)]
pub struct ConsoleReporter {
    out: Mutex<()>,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self::default()
    }

    fn line(&self, text: &str) {
        let _guard = self.out.lock();
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "{text}");
    }
}

fn label(name: &str, version: &str) -> String {
    if version.is_empty() {
        name.to_string()
    } else {
        format!("{name}@{version}")
    }
}

impl Reporter for ConsoleReporter {
    fn section(&self, title: &str) {
        self.line(&format!("\n{title}"));
    }

    fn fetching(&self, name: &str, version: &str, current: u64, total: Option<u64>) {
        // Only the start of a download is worth a line.
        if current == 0 {
            let size = total.map_or_else(String::new, |t| format!(" ({t} bytes)"));
            self.line(&format!("  fetching  {}{size}", label(name, version)));
        }
    }

    fn extracting(&self, name: &str, version: &str) {
        self.line(&format!("  extracting {}", label(name, version)));
    }

    fn building(&self, name: &str, version: &str, phase: &str) {
        self.line(&format!("  {phase:<9} {}", label(name, version)));
    }

    fn linking(&self, name: &str, version: &str, count: usize) {
        self.line(&format!("  linking   {} ({count} entries)", label(name, version)));
    }

    fn removing(&self, name: &str) {
        self.line(&format!("  removing  {name}"));
    }

    fn done(&self, name: &str, version: &str, detail: &str) {
        self.line(&format!("✓ {} {detail}", label(name, version)));
    }

    fn failed(&self, name: &str, version: &str, reason: &str) {
        self.line(&format!("✗ {} {reason}", label(name, version)));
    }

    fn info(&self, msg: &str) {
        self.line(msg);
    }

    fn warning(&self, msg: &str) {
        let _guard = self.out.lock();
        let _ = writeln!(std::io::stderr().lock(), "warning: {msg}");
    }

    fn summary(&self, succeeded: usize, failed: usize, elapsed_secs: f64) {
        self.line(&format!(
            "\n{succeeded} installed, {failed} failed in {elapsed_secs:.1}s"
        ));
    }
}
