//! Analysis progress reporting.
//!
//! Pairwise comparison is O(n²) over the corpus, so long runs report
//! observable progress after every batch. Progress is emitted on
//! **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event during analysis.
#[derive(Clone, Debug)]
pub enum AnalysisProgressEvent {
    /// Fetching missing embedding vectors before the comparison loop.
    Embedding { done: u64, total: u64 },
    /// Pairwise comparison: `done` of `total` pairs scored.
    Comparing { done: u64, total: u64 },
}

/// Reports analysis progress. Implementations write to stderr.
pub trait AnalysisProgressReporter: Send + Sync {
    fn report(&self, event: AnalysisProgressEvent);
}

/// Human-friendly progress: "analyze  comparing  12,000 / 4,950,000 pairs".
pub struct StderrProgress;

impl AnalysisProgressReporter for StderrProgress {
    fn report(&self, event: AnalysisProgressEvent) {
        let line = match &event {
            AnalysisProgressEvent::Embedding { done, total } => {
                format!(
                    "analyze  embedding  {} / {} items\n",
                    format_number(*done),
                    format_number(*total)
                )
            }
            AnalysisProgressEvent::Comparing { done, total } => {
                format!(
                    "analyze  comparing  {} / {} pairs\n",
                    format_number(*done),
                    format_number(*total)
                )
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl AnalysisProgressReporter for JsonProgress {
    fn report(&self, event: AnalysisProgressEvent) {
        let obj = match &event {
            AnalysisProgressEvent::Embedding { done, total } => serde_json::json!({
                "event": "progress",
                "phase": "embedding",
                "n": done,
                "total": total
            }),
            AnalysisProgressEvent::Comparing { done, total } => serde_json::json!({
                "event": "progress",
                "phase": "comparing",
                "n": done,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl AnalysisProgressReporter for NoProgress {
    fn report(&self, _event: AnalysisProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "off" => Some(ProgressMode::Off),
            "human" => Some(ProgressMode::Human),
            "json" => Some(ProgressMode::Json),
            _ => None,
        }
    }

    pub fn reporter(&self) -> Box<dyn AnalysisProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(1), "1");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(4950), "4,950");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn parse_modes() {
        assert_eq!(ProgressMode::parse("off"), Some(ProgressMode::Off));
        assert_eq!(ProgressMode::parse("human"), Some(ProgressMode::Human));
        assert_eq!(ProgressMode::parse("json"), Some(ProgressMode::Json));
        assert_eq!(ProgressMode::parse("loud"), None);
    }
}
