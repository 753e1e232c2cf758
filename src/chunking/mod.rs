
use std::collections::BTreeMap;
use std::iter;
use std::sync::LazyLock;

use fancy_regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{RagError, Result};

static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n\s*").expect("paragraph pattern is valid"));
static LINE_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*").expect("line pattern is valid"));
static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[.!?]["')\]]*\s+"#).expect("sentence pattern is valid"));
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

/// Configuration for content chunking. Sizes are in characters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum segment length
    pub chunk_size: usize,
    /// Characters repeated from the end of one segment at the start of the next
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
        }
    }
}

impl ChunkingConfig {
    /// Split `text` using this configuration
    #[inline]
    pub fn split(&self, text: &str) -> Result<Vec<String>> {
        split(text, self.chunk_size, self.chunk_overlap)
    }
}

/// A contiguous slice of the source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
    /// Byte offset of the first byte, overlap included
    pub start: usize,
    /// Byte offset one past the last byte
    pub end: usize,
    /// Byte length of the prefix repeated from the previous segment
    pub overlap_len: usize,
}

impl Segment {
    /// The part of the segment not shared with its predecessor
    #[inline]
    pub fn fresh_text(&self) -> &str {
        self.text.get(self.overlap_len..).unwrap_or_default()
    }

    #[inline]
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Preferred cut points, weakest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum BoundaryKind {
    Word,
    Sentence,
    Line,
    Paragraph,
}

/// Split text into overlapping segments of at most `max_size` characters.
#[inline]
pub fn split(text: &str, max_size: usize, overlap: usize) -> Result<Vec<String>> {
    Ok(split_segments(text, max_size, overlap)?
        .into_iter()
        .map(|segment| segment.text)
        .collect())
}

/// Split text into segments, keeping the byte spans of each.
///
/// Joining the first segment with the [`Segment::fresh_text`] of every later
/// segment reproduces `text` exactly. A segment is longer than `max_size` only
/// when a single run of non-whitespace characters is longer than the budget.
#[inline]
pub fn split_segments(text: &str, max_size: usize, overlap: usize) -> Result<Vec<Segment>> {
    if max_size == 0 {
        return Err(RagError::InvalidInput(
            "chunk size must be greater than zero".to_string(),
        ));
    }
    if overlap >= max_size {
        return Err(RagError::InvalidInput(format!(
            "chunk overlap ({}) must be smaller than chunk size ({})",
            overlap, max_size
        )));
    }

    // offsets[i] is the byte offset of the i-th char; the extra entry marks the end
    let offsets: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(iter::once(text.len()))
        .collect();
    let total = offsets.len() - 1;

    if total == 0 {
        return Ok(Vec::new());
    }

    if total <= max_size {
        return Ok(vec![Segment {
            text: text.to_string(),
            start: 0,
            end: text.len(),
            overlap_len: 0,
        }]);
    }

    let boundaries = find_boundaries(text, &offsets);
    let mut segments = Vec::new();
    let mut seg_start = 0;
    let mut fresh_start = 0;

    loop {
        let end = match next_cut(&boundaries, seg_start, fresh_start, max_size, total) {
            Some(end) => end,
            None => {
                // The next unit does not fit behind the overlap; give it the whole budget
                seg_start = fresh_start;
                next_cut(&boundaries, seg_start, fresh_start, max_size, total)
                    .unwrap_or_else(|| first_boundary_after(&boundaries, fresh_start, total))
            }
        };

        segments.push(Segment {
            text: slice(text, &offsets, seg_start, end).to_string(),
            start: offsets[seg_start],
            end: offsets[end],
            overlap_len: offsets[fresh_start] - offsets[seg_start],
        });

        if end >= total {
            break;
        }

        seg_start = overlap_start(&boundaries, seg_start, end, overlap);
        fresh_start = end;
    }

    debug!(
        "Split {} chars into {} segments (max {}, overlap {})",
        total,
        segments.len(),
        max_size,
        overlap
    );

    Ok(segments)
}

/// Candidate cut points keyed by char index, keeping the strongest kind per position
fn find_boundaries(text: &str, offsets: &[usize]) -> BTreeMap<usize, BoundaryKind> {
    let mut boundaries = BTreeMap::new();
    let patterns = [
        (&*WHITESPACE, BoundaryKind::Word),
        (&*SENTENCE_END, BoundaryKind::Sentence),
        (&*LINE_BREAK, BoundaryKind::Line),
        (&*PARAGRAPH_BREAK, BoundaryKind::Paragraph),
    ];

    for (pattern, kind) in patterns {
        for found in pattern.find_iter(text).filter_map(std::result::Result::ok) {
            let Ok(position) = offsets.binary_search(&found.end()) else {
                continue;
            };
            if position == 0 || position >= offsets.len() - 1 {
                continue;
            }
            boundaries
                .entry(position)
                .and_modify(|existing: &mut BoundaryKind| *existing = (*existing).max(kind))
                .or_insert(kind);
        }
    }

    boundaries
}

/// End of the segment starting at `seg_start`, or `None` when nothing fits
fn next_cut(
    boundaries: &BTreeMap<usize, BoundaryKind>,
    seg_start: usize,
    fresh_start: usize,
    max_size: usize,
    total: usize,
) -> Option<usize> {
    let limit = seg_start + max_size;
    if limit >= total {
        return Some(total);
    }

    let window = boundaries.range(fresh_start + 1..=limit);
    let half = fresh_start + (limit - fresh_start) / 2;

    let preferred = window
        .clone()
        .filter(|&(&position, _)| position > half)
        .max_by_key(|&(&position, &kind)| (kind, position))
        .map(|(&position, _)| position);

    preferred.or_else(|| window.last().map(|(&position, _)| position))
}

/// Cut point used when a single unit is longer than the budget
fn first_boundary_after(
    boundaries: &BTreeMap<usize, BoundaryKind>,
    from: usize,
    total: usize,
) -> usize {
    boundaries
        .range(from + 1..)
        .next()
        .map_or(total, |(&position, _)| position)
}

/// Start of the next segment: the earliest word start within `overlap` chars of `end`,
/// never reaching back past the start of the current segment
fn overlap_start(
    boundaries: &BTreeMap<usize, BoundaryKind>,
    seg_start: usize,
    end: usize,
    overlap: usize,
) -> usize {
    if overlap == 0 {
        return end;
    }

    let floor = end.saturating_sub(overlap).max(seg_start);
    boundaries
        .range(floor..end)
        .next()
        .map_or(floor, |(&position, _)| position)
}

fn slice<'a>(text: &'a str, offsets: &[usize], from: usize, to: usize) -> &'a str {
    text.get(offsets[from]..offsets[to]).unwrap_or_default()
}
