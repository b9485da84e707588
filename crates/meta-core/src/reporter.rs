//! Dependency-injected progress sink, threaded through every engine instead
//! of a global logger.

/// Receives human-facing progress lines from engines.
///
/// Engines take `&mut dyn Reporter` (or a `Context` that carries one) rather
/// than writing to a global logger, so tests can run many invocations in the
/// same process against independent reporters.
pub trait Reporter {
    fn info(&mut self, msg: &str);
    fn warn(&mut self, msg: &str);
    fn error(&mut self, msg: &str);
}

/// Writes to stderr with the same `[level] message` shape across every
/// invocation of the CLI.
#[derive(Default)]
pub struct StderrReporter;

impl Reporter for StderrReporter {
    fn info(&mut self, msg: &str) {
        eprintln!("[info] {msg}");
    }

    fn warn(&mut self, msg: &str) {
        eprintln!("[warn] {msg}");
    }

    fn error(&mut self, msg: &str) {
        eprintln!("[error] {msg}");
    }
}

/// Records lines in memory; used by engine tests that need to assert on
/// reported progress without capturing stderr.
#[derive(Default)]
pub struct RecordingReporter {
    pub lines: Vec<(&'static str, String)>,
}

impl Reporter for RecordingReporter {
    fn info(&mut self, msg: &str) {
        self.lines.push(("info", msg.to_string()));
    }

    fn warn(&mut self, msg: &str) {
        self.lines.push(("warn", msg.to_string()));
    }

    fn error(&mut self, msg: &str) {
        self.lines.push(("error", msg.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_reporter_captures_all_levels() {
        let mut r = RecordingReporter::default();
        r.info("a");
        r.warn("b");
        r.error("c");
        assert_eq!(
            r.lines,
            vec![
                ("info", "a".to_string()),
                ("warn", "b".to_string()),
                ("error", "c".to_string()),
            ]
        );
    }
}
