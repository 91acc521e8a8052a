//! Recursive separator-based text chunker.
//!
//! Splits one document into an ordered sequence of overlapping fragments
//! bounded by a target size. All sizes are counted in characters, never
//! bytes, so multi-byte UTF-8 text never splits inside a code point.
//!
//! # Algorithm
//!
//! 1. Split the text on the coarsest separator. The separator stays
//!    attached to the start of the piece that follows it, so the pieces
//!    concatenate back to the input exactly.
//! 2. Any piece too long to follow an overlap seed (longer than
//!    `chunk_size - chunk_overlap`) is split again with the next, finer
//!    separator. The empty separator splits into single characters and
//!    ends the recursion.
//! 3. Pieces are greedily accumulated into a buffer. When the next piece
//!    would push the buffer past `chunk_size`, the buffer is closed as a
//!    fragment and the next buffer is seeded with the last `chunk_overlap`
//!    characters of that fragment.
//! 4. Fragments whose trimmed length is below `min_chunk_size` are dropped
//!    only after segmentation, so overlap always comes from the true
//!    preceding fragment.
//!
//! # Guarantees
//!
//! - No fragment is longer than `chunk_size` characters.
//! - Fragment `i + 1` starts with the last `min(chunk_overlap, len(i))`
//!   characters of fragment `i`.
//! - Dropping each fragment's overlap prefix and concatenating reproduces
//!   the input exactly.
//! - Output is a pure function of the text and configuration.
//!
//! # Example
//!
//! ```rust
//! use ragsync::chunk::Chunker;
//!
//! let chunker = Chunker::new(12, 3, 1, vec!["\n\n".into(), "".into()]).unwrap();
//! let fragments = chunker.chunk("Alpha.\n\nBeta.\n\nGamma.");
//! assert_eq!(fragments, vec!["Alpha.", "ha.\n\nBeta.", "ta.\n\nGamma."]);
//! ```

use anyhow::{bail, Result};

use crate::config::{ProcessingConfig, ShortDocumentPolicy};

#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
    min_chunk_size: usize,
    separators: Vec<String>,
    short_documents: ShortDocumentPolicy,
}

impl Chunker {
    pub fn new(
        chunk_size: usize,
        chunk_overlap: usize,
        min_chunk_size: usize,
        separators: Vec<String>,
    ) -> Result<Self> {
        if chunk_size == 0 {
            bail!("chunk_size must be > 0");
        }
        if chunk_overlap >= chunk_size {
            bail!("chunk_overlap must be < chunk_size");
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
            min_chunk_size,
            separators,
            short_documents: ShortDocumentPolicy::Drop,
        })
    }

    pub fn from_config(config: &ProcessingConfig) -> Result<Self> {
        Ok(Self::new(
            config.chunk_size,
            config.chunk_overlap,
            config.min_chunk_size,
            config.separators.clone(),
        )?
        .with_short_documents(config.short_documents))
    }

    pub fn with_short_documents(mut self, policy: ShortDocumentPolicy) -> Self {
        self.short_documents = policy;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Segment and filter `text` into its final fragment list.
    ///
    /// Blank text yields no fragments.
    pub fn chunk(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let fragments = self.segment(text);
        let first = fragments.first().cloned();
        let kept: Vec<String> = fragments
            .into_iter()
            .filter(|f| f.trim().chars().count() >= self.min_chunk_size)
            .collect();

        match (kept.is_empty(), self.short_documents, first) {
            (true, ShortDocumentPolicy::Keep, Some(first)) => vec![first],
            _ => kept,
        }
    }

    /// Segment `text` without the minimum-size filter.
    pub fn segment(&self, text: &str) -> Vec<String> {
        if text.is_empty() {
            return Vec::new();
        }
        let max_piece = self.chunk_size - self.chunk_overlap;
        let pieces = split_recursive(text, &self.separators, max_piece);
        merge_pieces(&pieces, self.chunk_size, self.chunk_overlap)
    }
}

/// Split `text` into pieces of at most `max_chars` characters, trying
/// `separators` from coarsest to finest. Concatenating the result
/// reproduces `text`.
pub fn split_recursive<'a>(text: &'a str, separators: &[String], max_chars: usize) -> Vec<&'a str> {
    if char_len(text) <= max_chars {
        return vec![text];
    }

    let Some((separator, finer)) = separators.split_first() else {
        // Out of separators without reaching the empty one.
        return split_chars(text);
    };

    let pieces = split_keep_separator(text, separator);
    if pieces.len() <= 1 {
        return split_recursive(text, finer, max_chars);
    }

    let mut out = Vec::with_capacity(pieces.len());
    for piece in pieces {
        if char_len(piece) <= max_chars {
            out.push(piece);
        } else {
            out.extend(split_recursive(piece, finer, max_chars));
        }
    }
    out
}

/// Split on `separator`, keeping each occurrence at the start of the piece
/// that follows it. The empty separator splits into characters.
fn split_keep_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return split_chars(text);
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (idx, _) in text.match_indices(separator) {
        if idx > start {
            pieces.push(&text[start..idx]);
        }
        start = idx;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

fn split_chars(text: &str) -> Vec<&str> {
    text.char_indices()
        .map(|(i, c)| &text[i..i + c.len_utf8()])
        .collect()
}

/// Greedily pack pieces into fragments of at most `chunk_size` characters,
/// seeding each new fragment with the tail of the previous one.
fn merge_pieces(pieces: &[&str], chunk_size: usize, overlap: usize) -> Vec<String> {
    let mut fragments = Vec::new();
    let mut buf = String::new();
    let mut buf_len = 0usize;
    // Whether `buf` holds anything beyond the overlap seed.
    let mut has_new_text = false;

    for piece in pieces {
        let piece_len = char_len(piece);
        if has_new_text && buf_len + piece_len > chunk_size {
            let seed = tail_chars(&buf, overlap).to_string();
            fragments.push(std::mem::replace(&mut buf, seed));
            buf_len = char_len(&buf);
            has_new_text = false;
        }
        buf.push_str(piece);
        buf_len += piece_len;
        has_new_text = true;
    }

    if has_new_text {
        fragments.push(buf);
    }
    fragments
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// The last `n` characters of `s` (all of `s` if it is shorter).
fn tail_chars(s: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    match s.char_indices().rev().nth(n - 1) {
        Some((i, _)) => &s[i..],
        None => s,
    }
}
