//! Terminal progress rendering.

use std::io::Write;
use std::path::Path;
use std::time::Instant;

use treeop_core::ProgressSink;

use crate::output::{abbreviate_path, format_rate_mb, format_size_f64};

/// Progress sink for the terminal.
///
/// When enabled it repaints a single status line at most once per second
/// (or appends one line per update in linefeed mode). Skip diagnostics and
/// scan announcements follow the verbosity level independently of the
/// progress display.
pub struct TermProgress {
    enabled: bool,
    linefeed: bool,
    verbose: u8,
    max_width: usize,
    start: Instant,
    last_print: Instant,
    dirs: u64,
    files: u64,
    bytes: u64,
    hashed_bytes: u64,
    current_dir: String,
    current_file: String,
    current_file_size: u64,
    current_file_done: u64,
    hashing: bool,
    last_line_len: usize,
}

impl TermProgress {
    /// `progress_count` is the number of `--progress` flags: 0 disables the
    /// display, 2 or more switches to linefeed mode.
    pub fn new(progress_count: u8, max_width: usize, verbose: u8) -> Self {
        let now = Instant::now();
        TermProgress {
            enabled: progress_count > 0,
            linefeed: progress_count > 1,
            verbose,
            max_width,
            start: now,
            last_print: now,
            dirs: 0,
            files: 0,
            bytes: 0,
            hashed_bytes: 0,
            current_dir: String::new(),
            current_file: String::new(),
            current_file_size: 0,
            current_file_done: 0,
            hashing: false,
            last_line_len: 0,
        }
    }

    fn tick(&mut self) {
        if !self.enabled || self.last_print.elapsed().as_secs_f64() < 1.0 {
            return;
        }
        self.last_print = Instant::now();
        self.print_line();
    }

    fn print_line(&mut self) {
        let elapsed = self.start.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 {
            self.hashed_bytes as f64 / elapsed
        } else {
            0.0
        };
        let prefix = format!(
            "F:{} D:{} B:{} H:{}",
            self.files,
            self.dirs,
            format_size_f64(self.bytes as f64, 1),
            format_rate_mb(rate)
        );

        let suffix = if self.hashing && !self.current_file.is_empty() {
            let percent = if self.current_file_size > 0 {
                (self.current_file_done * 100) / self.current_file_size
            } else {
                0
            };
            let percent_str = format!("{percent}%");
            let max_path = self.available_path_len(prefix.len(), percent_str.len());
            format!("{percent_str} {}", abbreviate_path(&self.current_file, max_path))
        } else if !self.current_dir.is_empty() {
            let max_path = self.available_path_len(prefix.len(), 0);
            abbreviate_path(&self.current_dir, max_path)
        } else {
            String::new()
        };

        let mut line = prefix;
        if !suffix.is_empty() {
            line.push(' ');
            line.push_str(&suffix);
        }
        line.truncate(self.max_width);

        let mut stdout = std::io::stdout();
        if self.linefeed {
            let _ = writeln!(stdout, "{line}");
        } else {
            let pad = self.last_line_len.saturating_sub(line.len());
            let _ = write!(stdout, "\r{line}{}\r", " ".repeat(pad));
            self.last_line_len = line.len();
        }
        let _ = stdout.flush();
    }

    fn available_path_len(&self, prefix_len: usize, extra_len: usize) -> usize {
        let mut used = prefix_len + 1;
        if extra_len > 0 {
            used += extra_len + 1;
        }
        self.max_width.saturating_sub(used)
    }
}

impl ProgressSink for TermProgress {
    fn dir_started(&mut self, dir: &Path) {
        if !self.hashing {
            self.current_dir = dir.display().to_string();
        }
        self.tick();
    }

    fn scan_started(&mut self, dir: &Path) {
        if self.verbose > 0 {
            println!("Scanning {}", dir.display());
        }
    }

    fn dir_finished(&mut self) {
        self.dirs += 1;
        self.tick();
    }

    fn dir_loaded(&mut self, file_count: u64, total_bytes: u64) {
        self.dirs += 1;
        self.files += file_count;
        self.bytes += total_bytes;
        self.tick();
    }

    fn file_seen(&mut self, size: u64) {
        self.files += 1;
        self.bytes += size;
        self.tick();
    }

    fn hash_started(&mut self, path: &Path, size: u64) {
        self.hashing = true;
        self.current_file = path.display().to_string();
        self.current_file_size = size;
        self.current_file_done = 0;
        self.tick();
    }

    fn hash_progress(&mut self, bytes: u64) {
        self.hashed_bytes += bytes;
        self.current_file_done += bytes;
        self.tick();
    }

    fn hash_finished(&mut self) {
        self.hashing = false;
        self.current_file.clear();
        self.current_file_size = 0;
        self.current_file_done = 0;
        self.tick();
    }

    fn entry_skipped(&mut self, path: &Path, reason: &str) {
        if self.verbose > 0 {
            eprintln!("Skipping {}: {reason}", path.display());
        }
    }

    fn finish(&mut self) {
        if self.last_line_len > 0 {
            let mut stdout = std::io::stdout();
            let _ = write!(stdout, "\r{}\r", " ".repeat(self.last_line_len));
            let _ = writeln!(stdout);
            let _ = stdout.flush();
            self.last_line_len = 0;
        }
    }
}
