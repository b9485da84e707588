//! TTY-aware progress reporting for `apply` and `vendor convert`: a progress
//! bar when stdout is a terminal, plain `eprintln!` lines otherwise.

use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};

pub fn is_tty() -> bool {
    atty::is(atty::Stream::Stdout)
}

pub struct ProgressReporter {
    is_tty: bool,
    total: usize,
    current: usize,
    bar: Option<ProgressBar>,
    start: Instant,
}

impl ProgressReporter {
    pub fn new(total: usize, show_progress: bool) -> Self {
        let is_tty = show_progress && is_tty();
        let bar = if is_tty {
            let pb = ProgressBar::new(total as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            Some(pb)
        } else {
            None
        };
        Self {
            is_tty,
            total,
            current: 0,
            bar,
            start: Instant::now(),
        }
    }

    pub fn set_component(&mut self, index: usize, name: &str) {
        self.current = index;
        let elapsed = self.start.elapsed();
        let msg = format!("[{}/{}] {name}... ({elapsed:?})", self.current, self.total);
        if self.is_tty {
            if let Some(pb) = &self.bar {
                pb.set_message(msg);
                pb.set_position((self.current.saturating_sub(1)) as u64);
            }
        } else {
            eprintln!("{msg}");
        }
    }

    pub fn finish(self) {
        let elapsed = self.start.elapsed();
        if self.is_tty {
            if let Some(pb) = self.bar {
                pb.set_message(format!("completed {} components in {elapsed:?}", self.total));
                pb.finish();
            }
        } else {
            eprintln!("completed {}/{} components in {elapsed:?}", self.total, self.total);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silent_reporter_never_builds_a_bar() {
        let reporter = ProgressReporter::new(3, false);
        assert!(reporter.bar.is_none());
    }

    #[test]
    fn set_component_advances_current_index() {
        let mut reporter = ProgressReporter::new(3, false);
        reporter.set_component(2, "widget");
        assert_eq!(reporter.current, 2);
    }
}
