//! Text comparison: a line-level pass refined token-wise inside changed lines.

use super::{calculate_difference, DiffChunk, Input, Output};
use xxhash_rust::xxh3::xxh3_64;

/// Changed line regions longer than this (in bytes, on either side) are
/// reported as a single chunk instead of being refined token by token.
pub const DEFAULT_FINE_DIFF_LIMIT: usize = 800;

/// Whether two texts are identical. Cheap rejections first, then a digest,
/// then the bytes themselves.
pub fn texts_identical(old: &str, new: &str) -> bool {
    old.len() == new.len() && xxh3_64(old.as_bytes()) == xxh3_64(new.as_bytes()) && old == new
}

/// Compare two texts and return byte-granular chunks.
pub fn compare_strings(old: &str, new: &str) -> Vec<DiffChunk> {
    compare_strings_with_limit(old, new, DEFAULT_FINE_DIFF_LIMIT)
}

/// Like [`compare_strings`] with an explicit token-refinement limit.
pub fn compare_strings_with_limit(old: &str, new: &str, fine_limit: usize) -> Vec<DiffChunk> {
    if texts_identical(old, new) {
        return Vec::new();
    }

    let input = SpanInput {
        old,
        new,
        old_spans: line_spans(old),
        new_spans: line_spans(new),
    };
    let mut output = TokenizingLineOutput {
        old,
        new,
        old_lines: &input.old_spans,
        new_lines: &input.new_spans,
        fine_limit,
        chunks: Vec::new(),
    };
    calculate_difference(&input, &mut output);
    output.chunks
}

/// Rebuild the new text from the old one, the new one and the chunks between
/// them. Mostly useful to check a chunk list.
pub fn apply_chunks(old: &str, new: &str, chunks: &[DiffChunk]) -> String {
    let mut out = String::with_capacity(new.len());
    let mut cursor = 0;
    let mut previous: Option<&DiffChunk> = None;
    for chunk in chunks {
        out.push_str(&old[cursor..chunk.old_start]);
        out.push_str(&new[chunk.new_start(previous)..chunk.new_end]);
        cursor = chunk.old_end;
        previous = Some(chunk);
    }
    out.push_str(&old[cursor..]);
    out
}

/// Byte spans of the lines of `text`, each including its terminator.
fn line_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0;
    for (idx, byte) in text.bytes().enumerate() {
        if byte == b'\n' {
            spans.push((start, idx + 1));
            start = idx + 1;
        }
    }
    if start < text.len() {
        spans.push((start, text.len()));
    }
    spans
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum TokenClass {
    Word,
    Space,
    Other,
}

fn classify(c: char) -> TokenClass {
    if c.is_alphanumeric() || c == '_' || c == '$' {
        TokenClass::Word
    } else if c.is_whitespace() {
        TokenClass::Space
    } else {
        TokenClass::Other
    }
}

/// Byte spans of the tokens of `text`: runs of word characters, runs of
/// whitespace, and every other character on its own.
fn token_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut current: Option<(usize, TokenClass)> = None;
    for (idx, c) in text.char_indices() {
        let class = classify(c);
        match current {
            Some((_, prev)) if prev == class && class != TokenClass::Other => {}
            Some((start, _)) => {
                spans.push((start, idx));
                current = Some((idx, class));
            }
            None => current = Some((idx, class)),
        }
    }
    if let Some((start, _)) = current {
        spans.push((start, text.len()));
    }
    spans
}

/// Compares two texts span by span (lines or tokens).
struct SpanInput<'a> {
    old: &'a str,
    new: &'a str,
    old_spans: Vec<(usize, usize)>,
    new_spans: Vec<(usize, usize)>,
}

impl Input for SpanInput<'_> {
    fn len1(&self) -> usize {
        self.old_spans.len()
    }

    fn len2(&self) -> usize {
        self.new_spans.len()
    }

    fn equals(&self, index1: usize, index2: usize) -> bool {
        let (s1, e1) = self.old_spans[index1];
        let (s2, e2) = self.new_spans[index2];
        self.old.as_bytes()[s1..e1] == self.new.as_bytes()[s2..e2]
    }
}

/// Offset of span `index`, or `end` when the index is one past the last span.
fn span_offset(spans: &[(usize, usize)], index: usize, end: usize) -> usize {
    spans.get(index).map_or(end, |span| span.0)
}

/// Receives line chunks and refines each one with a token-level comparison.
struct TokenizingLineOutput<'a> {
    old: &'a str,
    new: &'a str,
    old_lines: &'a [(usize, usize)],
    new_lines: &'a [(usize, usize)],
    fine_limit: usize,
    chunks: Vec<DiffChunk>,
}

impl Output for TokenizingLineOutput<'_> {
    fn add_chunk(&mut self, pos1: usize, pos2: usize, len1: usize, len2: usize) {
        let old_start = span_offset(self.old_lines, pos1, self.old.len());
        let old_end = span_offset(self.old_lines, pos1 + len1, self.old.len());
        let new_start = span_offset(self.new_lines, pos2, self.new.len());
        let new_end = span_offset(self.new_lines, pos2 + len2, self.new.len());

        if old_end - old_start > self.fine_limit || new_end - new_start > self.fine_limit {
            self.chunks.push(DiffChunk {
                old_start,
                old_end,
                new_end,
            });
            return;
        }

        let old_region = &self.old[old_start..old_end];
        let new_region = &self.new[new_start..new_end];
        let tokens = SpanInput {
            old: old_region,
            new: new_region,
            old_spans: token_spans(old_region),
            new_spans: token_spans(new_region),
        };
        let mut refined = TokenChunkOutput {
            input: &tokens,
            old_base: old_start,
            new_base: new_start,
            chunks: &mut self.chunks,
        };
        calculate_difference(&tokens, &mut refined);
    }
}

/// Maps token chunks back to byte offsets in the full texts.
struct TokenChunkOutput<'a, 'b> {
    input: &'a SpanInput<'a>,
    old_base: usize,
    new_base: usize,
    chunks: &'b mut Vec<DiffChunk>,
}

impl Output for TokenChunkOutput<'_, '_> {
    fn add_chunk(&mut self, pos1: usize, pos2: usize, len1: usize, len2: usize) {
        let old_len = self.input.old.len();
        let new_len = self.input.new.len();
        self.chunks.push(DiffChunk {
            old_start: self.old_base + span_offset(&self.input.old_spans, pos1, old_len),
            old_end: self.old_base + span_offset(&self.input.old_spans, pos1 + len1, old_len),
            new_end: self.new_base + span_offset(&self.input.new_spans, pos2 + len2, new_len),
        });
    }
}

/// Translates positions in the old text into positions in the new text.
#[derive(Debug, Clone)]
pub struct PositionTranslator {
    /// `(chunk, new_start)` pairs in old-position order.
    chunks: Vec<(DiffChunk, usize)>,
}

impl PositionTranslator {
    pub fn new(chunks: &[DiffChunk]) -> Self {
        let mut previous: Option<&DiffChunk> = None;
        let chunks = chunks
            .iter()
            .map(|chunk| {
                let new_start = chunk.new_start(previous);
                previous = Some(chunk);
                (*chunk, new_start)
            })
            .collect();
        Self { chunks }
    }

    /// The last chunk starting at or before `pos`.
    fn chunk_at(&self, pos: usize) -> Option<&(DiffChunk, usize)> {
        let idx = self.chunks.partition_point(|(chunk, _)| chunk.old_start <= pos);
        idx.checked_sub(1).map(|i| &self.chunks[i])
    }

    /// Translate `pos`, or `None` when it lies inside a changed region.
    pub fn translate_exact(&self, pos: usize) -> Option<usize> {
        match self.chunk_at(pos) {
            None => Some(pos),
            Some((chunk, _)) if pos >= chunk.old_end => Some(pos + chunk.new_end - chunk.old_end),
            Some(_) => None,
        }
    }

    /// Translate `pos`; positions inside a changed region keep their offset
    /// from the region start, clamped to the new region.
    pub fn translate(&self, pos: usize) -> usize {
        match self.chunk_at(pos) {
            None => pos,
            Some((chunk, _)) if pos >= chunk.old_end => pos + chunk.new_end - chunk.old_end,
            Some((chunk, new_start)) => (pos - chunk.old_start + new_start).min(chunk.new_end),
        }
    }

    /// Whether `[start, end)` overlaps or touches a changed region.
    pub fn range_changed(&self, start: usize, end: usize) -> bool {
        self.chunks
            .iter()
            .any(|(chunk, _)| chunk.old_start <= end && start <= chunk.old_end)
    }
}
