//! Progress indicator for running scans
//!
//! Fed with the runner's output chunks. Shows a spinner, elapsed time, bytes
//! received and hosts reported so far on a single stderr line.

use std::io::{self, Write};
use std::time::Instant;

use crate::runner::OutputChunk;

/// Characters for the spinning animation
const SPINNER_CHARS: &[char] = &['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];

/// Marker counted as one reported host in the XML stream
const HOST_CLOSE_TAG: &str = "</host>";

pub struct ScanProgress {
    target: String,
    started: Instant,
    quiet_mode: bool,
    frame: usize,
    bytes_received: usize,
    hosts_reported: usize,
    /// Tail of the previous chunk so a tag split across chunks still counts
    carry: String,
    active: bool,
}

impl ScanProgress {
    pub fn new(target: &str, quiet_mode: bool) -> Self {
        Self {
            target: target.to_string(),
            started: Instant::now(),
            quiet_mode,
            frame: 0,
            bytes_received: 0,
            hosts_reported: 0,
            carry: String::new(),
            active: false,
        }
    }

    /// Account for a chunk of scanner output and redraw
    pub fn observe(&mut self, chunk: &OutputChunk) {
        if let OutputChunk::Stdout(text) = chunk {
            self.bytes_received += text.len();

            let joined = format!("{}{}", self.carry, text);
            self.hosts_reported += joined.matches(HOST_CLOSE_TAG).count();

            // Keep just enough to complete a split tag, without re-counting a whole one
            let keep = HOST_CLOSE_TAG.len() - 1;
            let mut cut = joined.len().saturating_sub(keep);
            while !joined.is_char_boundary(cut) {
                cut += 1;
            }
            self.carry = joined[cut..].to_string();
        }
        self.tick();
    }

    /// Redraw with the next spinner frame
    pub fn tick(&mut self) {
        if self.quiet_mode {
            return;
        }
        self.active = true;
        self.frame = (self.frame + 1) % SPINNER_CHARS.len();
        eprint!("\r{}", self.status_line());
        io::stderr().flush().unwrap_or(());
    }

    pub fn hosts_reported(&self) -> usize {
        self.hosts_reported
    }

    pub fn bytes_received(&self) -> usize {
        self.bytes_received
    }

    fn status_line(&self) -> String {
        format!(
            "{} Scanning {} - {:.0}s, {} host(s), {} KiB received",
            SPINNER_CHARS[self.frame],
            self.target,
            self.started.elapsed().as_secs_f64(),
            self.hosts_reported,
            self.bytes_received / 1024
        )
    }

    /// Replace the spinner line with a final status
    pub fn complete(&mut self, message: &str) {
        if self.quiet_mode {
            return;
        }
        self.clear_line();
        eprintln!("✓ {}", message);
        io::stderr().flush().unwrap_or(());
    }

    fn clear_line(&mut self) {
        if self.active {
            eprint!("\r\x1b[2K");
            self.active = false;
        }
    }
}

impl Drop for ScanProgress {
    fn drop(&mut self) {
        if !self.quiet_mode {
            self.clear_line();
            io::stderr().flush().unwrap_or(());
        }
    }
}
