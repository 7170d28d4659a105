//! Line scanner that picks the model's answer out of `llama-cli` output.
//!
//! `llama-cli` echoes the prompt and prints loader diagnostics before the
//! model starts answering. The scanner drops banner lines, waits for the
//! answer marker that closes the prompt, then passes every line through until
//! the end marker. Marker lines inside the echoed prompt (earlier replies in
//! the history) are skipped.

use shared::settings::StreamSettings;
use std::io::BufRead;

/// Where the scanner is in the output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// Waiting for an answer marker
    Scanning,
    /// Inside the answer, every line is a fragment
    Streaming,
    /// End marker seen, nothing more is accepted
    Finished,
}

/// What happened to a single line fed to the scanner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    /// Loader or tokenizer diagnostic, discarded
    Banner,
    /// Prompt echo or other output before the answer starts
    Preamble,
    Fragment(String),
    /// Fragment carrying the end marker; the caller should stop reading
    Final(String),
    /// Arrived after the scanner finished
    Ignored,
}

#[derive(Debug, Clone)]
pub struct ResponseScanner {
    state: ScanState,
    answer_markers: Vec<String>,
    end_marker: String,
    banner_patterns: Vec<String>,
    /// Marker lines still expected from the prompt echo before the real one
    echoed_markers: usize,
}

impl ResponseScanner {
    pub fn new(settings: &StreamSettings) -> Self {
        Self {
            state: ScanState::Scanning,
            answer_markers: settings.answer_markers.clone(),
            end_marker: settings.end_marker.clone(),
            banner_patterns: settings.banner_patterns.clone(),
            echoed_markers: 0,
        }
    }

    /// Scanner for a run whose output starts with `prompt` echoed back.
    ///
    /// Every marker line of the prompt shows up again in the echo. Only the
    /// last one, the line the model continues, opens the answer.
    pub fn for_prompt(settings: &StreamSettings, prompt: &str) -> Self {
        let mut scanner = Self::new(settings);
        if settings.prompt_echo {
            let marker_lines = prompt
                .lines()
                .filter(|line| !scanner.is_banner(line) && scanner.has_answer_marker(line))
                .count();
            scanner.echoed_markers = marker_lines.saturating_sub(1);
        }
        scanner
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    fn is_banner(&self, line: &str) -> bool {
        self.banner_patterns
            .iter()
            .any(|p| !p.is_empty() && line.contains(p.as_str()))
    }

    fn has_answer_marker(&self, line: &str) -> bool {
        self.answer_markers
            .iter()
            .any(|m| !m.is_empty() && line.contains(m.as_str()))
    }

    /// Feed one decoded line (trailing newline included, if any).
    pub fn feed(&mut self, line: &str) -> LineOutcome {
        if self.state == ScanState::Finished {
            return LineOutcome::Ignored;
        }
        if self.is_banner(line) {
            return LineOutcome::Banner;
        }

        match self.state {
            ScanState::Scanning => {
                if self.has_answer_marker(line) && self.echoed_markers > 0 {
                    self.echoed_markers -= 1;
                    LineOutcome::Preamble
                } else if self.has_answer_marker(line) {
                    // The line that opens the answer is itself part of it
                    self.state = ScanState::Streaming;
                    LineOutcome::Fragment(line.to_string())
                } else {
                    LineOutcome::Preamble
                }
            }
            ScanState::Streaming => {
                if !self.end_marker.is_empty() && line.contains(self.end_marker.as_str()) {
                    self.state = ScanState::Finished;
                    LineOutcome::Final(line.to_string())
                } else {
                    LineOutcome::Fragment(line.to_string())
                }
            }
            ScanState::Finished => LineOutcome::Ignored,
        }
    }
}

/// The reply as it should be remembered: the streamed text minus the answer
/// marker that opened it and minus the end marker.
pub fn clean_reply(response: &str, settings: &StreamSettings) -> String {
    let text = if settings.end_marker.is_empty() {
        response.to_string()
    } else {
        response.replace(settings.end_marker.as_str(), "")
    };

    let (first, rest) = match text.split_once('\n') {
        Some((first, rest)) => (first, Some(rest)),
        None => (text.as_str(), None),
    };
    let cut = settings
        .answer_markers
        .iter()
        .filter(|m| !m.is_empty())
        .filter_map(|m| first.rfind(m.as_str()).map(|at| at + m.len()))
        .max();
    let first = cut.map_or(first, |at| &first[at..]);

    let joined = match rest {
        Some(rest) => format!("{}\n{}", first.trim(), rest),
        None => first.trim().to_string(),
    };
    joined
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Counts from a finished [`pump`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PumpSummary {
    pub lines_read: usize,
    pub banners: usize,
    pub fragments: usize,
    pub saw_end_marker: bool,
    /// The sink refused a fragment (receiver gone or run cancelled)
    pub stopped_by_sink: bool,
}

/// Read `reader` line by line, feeding the scanner and handing fragments to `emit`
/// as soon as each line arrives.
///
/// Malformed UTF-8 is replaced with U+FFFD. A read error is treated like the
/// stream closing. `emit` returns `false` to stop reading.
pub fn pump<R: BufRead>(
    mut reader: R,
    scanner: &mut ResponseScanner,
    mut emit: impl FnMut(String) -> bool,
) -> PumpSummary {
    let mut summary = PumpSummary::default();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("model output stream failed: {}", e);
                break;
            }
        }
        summary.lines_read += 1;
        let line = String::from_utf8_lossy(&buf).into_owned();

        match scanner.feed(&line) {
            LineOutcome::Banner => {
                summary.banners += 1;
                tracing::debug!("dropped banner: {}", line.trim_end());
            }
            LineOutcome::Preamble | LineOutcome::Ignored => {}
            LineOutcome::Fragment(fragment) => {
                summary.fragments += 1;
                if !emit(fragment) {
                    summary.stopped_by_sink = true;
                    break;
                }
            }
            LineOutcome::Final(fragment) => {
                summary.fragments += 1;
                summary.saw_end_marker = true;
                if !emit(fragment) {
                    summary.stopped_by_sink = true;
                }
                break;
            }
        }
    }

    summary
}
