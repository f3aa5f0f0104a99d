//! Console presentation of run progress.

use fnpack_core::Reporter;

/// Prints indented status lines to stdout; warnings go to stderr.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ConsoleReporter;

impl Reporter for ConsoleReporter {
    fn section(&self, title: &str) {
        println!();
        println!("  {}", title.to_lowercase());
    }

    fn packaging(&self, entry: &str) {
        println!("    packaging {entry}");
    }

    fn packaged(&self, entry: &str, archive: &str, size: u64) {
        println!("    packaged {entry} -> {archive} ({})", format_size(size));
    }

    fn deploying(&self, entry: &str, function: &str) {
        println!("    deploying {entry} as {function}");
    }

    fn deployed(&self, entry: &str, function: &str, detail: &str) {
        println!("    deployed {entry} ({function}: {detail})");
    }

    fn failed(&self, entry: &str, reason: &str) {
        eprintln!("    error: {entry}: {reason}");
    }

    fn info(&self, msg: &str) {
        println!("  {msg}");
    }

    fn warning(&self, msg: &str) {
        eprintln!("  warning: {msg}");
    }

    fn summary(&self, count: usize, action: &str, elapsed_secs: f64) {
        println!();
        println!("  {count} {action} in {elapsed_secs:.1}s");
    }
}

/// Human-readable byte count (`512 B`, `3.4 KiB`, `51.0 MiB`).
pub(crate) fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }

    let mut whole = bytes;
    let mut unit = 0;
    while whole >= 1024 * 1024 && unit < UNITS.len() - 2 {
        whole /= 1024;
        unit += 1;
    }
    let tenths = whole * 10 / 1024;
    format!("{}.{} {}", tenths / 10, tenths % 10, UNITS[unit + 1])
}
