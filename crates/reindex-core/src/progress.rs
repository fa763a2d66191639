//! Progress reporting for TTY and non-TTY environments.
//!
//! TTY mode: one indicatif page bar per reindex run plus spinner status lines.
//! Non-TTY mode: hidden bars, progress comes from per-page log lines.

use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

fn page_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{prefix:<12.dim} {bar:30.green/dim} {pos:>5}/{len:5} pages {eta:>4} {wide_msg:.dim}")
        .expect("invalid template")
        .progress_chars("--")
}

/// Central progress context managing multi-progress bars.
pub struct ProgressContext {
    multi: MultiProgress,
    is_tty: bool,
}

impl ProgressContext {
    /// Create new context, detecting TTY automatically.
    pub fn new() -> Self {
        let is_tty = std::io::stderr().is_terminal();
        Self {
            multi: MultiProgress::new(),
            is_tty,
        }
    }

    /// Page bar for one entity run. Length is set once the page count is known.
    ///
    /// Non-TTY: hidden (no-op).
    pub fn page_bar(&self, entity: &str) -> ProgressBar {
        if !self.is_tty {
            return ProgressBar::hidden();
        }
        let pb = self.multi.add(ProgressBar::new(0));
        pb.set_style(page_style());
        pb.set_prefix(entity.to_string());
        pb
    }

    /// Spinner line for a stage without a known length (queue watching, draining).
    pub fn stage_line(&self, name: &str) -> ProgressBar {
        if !self.is_tty {
            return ProgressBar::hidden();
        }
        let pb = self.multi.add(ProgressBar::new(0));
        pb.set_style(
            ProgressStyle::with_template("{spinner:.green} {prefix:<10.cyan.bold} {wide_msg}")
                .expect("invalid template"),
        );
        pb.set_prefix(name.to_string());
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    }

    /// Whether running in TTY mode.
    pub fn is_tty(&self) -> bool {
        self.is_tty
    }

    /// Get reference to `MultiProgress` for log bridge.
    pub fn multi(&self) -> &MultiProgress {
        &self.multi
    }
}

impl Default for ProgressContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe wrapper for `ProgressContext`.
pub type SharedProgress = Arc<ProgressContext>;

/// Format number with thousand separators.
pub fn fmt_num(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fmt_num_small() {
        assert_eq!(fmt_num(0), "0");
        assert_eq!(fmt_num(123), "123");
    }

    #[test]
    fn fmt_num_thousands() {
        assert_eq!(fmt_num(1_000), "1,000");
        assert_eq!(fmt_num(123_456), "123,456");
        assert_eq!(fmt_num(1_234_567), "1,234,567");
    }

    #[test]
    fn hidden_bars_accept_updates() {
        let ctx = ProgressContext {
            multi: MultiProgress::new(),
            is_tty: false,
        };
        let pb = ctx.page_bar("course");
        pb.set_length(3);
        pb.inc(1);
        assert!(pb.is_hidden());
    }
}
