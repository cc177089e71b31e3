//! Span-splitting collaborator.
//!
//! The change detector decides *which* lines need re-embedding; a
//! [`Chunker`] decides how those lines are cut into embeddable spans.

use serde::{Deserialize, Serialize};

/// A span of text cut by a chunker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSpan {
    /// Span text, lines joined with `\n`
    pub text: String,
    /// Zero-based line offset of the first line of the span
    pub position: usize,
}

/// Splits a run of lines into spans.
pub trait Chunker: Send + Sync {
    /// Split `lines`, the first of which sits at line `start_line` of the
    /// entity content.
    fn chunk(&self, lines: &[&str], start_line: usize) -> Vec<TextSpan>;
}

/// Chunker that packs whole lines up to a line and character budget.
///
/// A single line longer than `max_chars` becomes its own span rather than
/// being split mid-line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineChunker {
    /// Maximum lines per span
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,
    /// Soft maximum characters per span
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

fn default_max_lines() -> usize {
    40
}

fn default_max_chars() -> usize {
    2000
}

impl Default for LineChunker {
    fn default() -> Self {
        Self {
            max_lines: default_max_lines(),
            max_chars: default_max_chars(),
        }
    }
}

impl LineChunker {
    /// Create a chunker with explicit limits.
    pub fn new(max_lines: usize, max_chars: usize) -> Self {
        Self {
            max_lines: max_lines.max(1),
            max_chars: max_chars.max(1),
        }
    }
}

impl Chunker for LineChunker {
    fn chunk(&self, lines: &[&str], start_line: usize) -> Vec<TextSpan> {
        let mut spans = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut current_chars = 0usize;
        let mut span_start = start_line;

        for (offset, line) in lines.iter().enumerate() {
            let would_overflow = !current.is_empty()
                && (current.len() >= self.max_lines
                    || current_chars + line.len() > self.max_chars);
            if would_overflow {
                spans.push(TextSpan {
                    text: current.join("\n"),
                    position: span_start,
                });
                current.clear();
                current_chars = 0;
                span_start = start_line + offset;
            }
            current.push(line);
            current_chars += line.len();
        }

        if !current.is_empty() {
            spans.push(TextSpan {
                text: current.join("\n"),
                position: span_start,
            });
        }

        // Whitespace-only spans carry nothing worth embedding
        spans.retain(|s| !s.text.trim().is_empty());
        spans
    }
}
