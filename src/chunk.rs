//! Windowed text chunker with overlap and boundary backscan.
//!
//! Splitting is pure and deterministic: the same input and settings always
//! produce the same chunk list, which keeps content hashes (and therefore
//! the embedding cache) stable across re-ingestion.

/// Boundaries we prefer to cut at, in backscan order. A sentence end
/// followed by a space or newline, or a paragraph break.
const BREAK_PATTERNS: [&str; 5] = [". ", ".\n", "!\n", "?\n", "\n\n"];

/// Upper bound on chunks per document. Anything beyond this is dropped
/// and reported via [`ChunkOutcome::truncated`].
pub const MAX_CHUNKS_PER_DOCUMENT: usize = 1000;

/// Result of chunking one document.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkOutcome {
    pub chunks: Vec<String>,
    /// True when the document produced more than
    /// [`MAX_CHUNKS_PER_DOCUMENT`] chunks and the tail was dropped.
    pub truncated: bool,
}

/// Split `text` into chunks of roughly `target_size` bytes with
/// `overlap` bytes carried between consecutive chunks.
///
/// Each window is scanned backwards for the last sentence or paragraph
/// boundary; if none is found the cut is raw. Cut offsets are snapped to
/// UTF-8 character boundaries so multi-byte text never splits mid-char.
/// Whitespace-only pieces are skipped.
pub fn chunk_text(text: &str, target_size: usize, overlap: usize) -> ChunkOutcome {
    let mut chunks = Vec::new();
    if text.trim().is_empty() || target_size == 0 {
        return ChunkOutcome { chunks, truncated: false };
    }
    // A degenerate overlap would stall the scan below.
    let overlap = overlap.min(target_size.saturating_sub(1));

    let len = text.len();
    let mut start = 0usize;
    let mut truncated = false;

    while start < len {
        let mut end = snap_to_char_boundary(text, (start + target_size).min(len));

        if end < len {
            if let Some(boundary) = last_break_before(&text[start..end]) {
                let candidate = start + boundary;
                // Only honor the boundary if it leaves a non-empty piece.
                if candidate > start {
                    end = snap_to_char_boundary(text, candidate);
                }
            }
        }

        // Tiny windows over multi-byte text can snap back onto `start`;
        // step forward one character instead of stalling.
        if end <= start {
            end = match text[start..].char_indices().nth(1) {
                Some((off, _)) => start + off,
                None => len,
            };
        }

        let piece = text[start..end].trim();
        if !piece.is_empty() {
            if chunks.len() == MAX_CHUNKS_PER_DOCUMENT {
                truncated = true;
                break;
            }
            chunks.push(piece.to_string());
        }

        if end >= len {
            break;
        }
        // Rewind by the overlap, but always make forward progress; `end`
        // is already a char boundary and strictly past `start`.
        let next = snap_to_char_boundary(text, end.saturating_sub(overlap));
        start = if next > start { next } else { end };
    }

    ChunkOutcome { chunks, truncated }
}

/// Byte offset just past the last break pattern in `window`, or None.
fn last_break_before(window: &str) -> Option<usize> {
    BREAK_PATTERNS
        .iter()
        .filter_map(|pat| window.rfind(pat).map(|idx| idx + pat.len()))
        .max()
}

/// Walk `pos` down to the nearest UTF-8 character boundary.
fn snap_to_char_boundary(text: &str, mut pos: usize) -> usize {
    pos = pos.min(text.len());
    while pos > 0 && !text.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_yields_no_chunks() {
        let out = chunk_text("", 100, 10);
        assert!(out.chunks.is_empty());
        assert!(!out.truncated);

        let out = chunk_text("   \n\t  ", 100, 10);
        assert!(out.chunks.is_empty());
    }

    #[test]
    fn test_short_text_is_one_chunk() {
        let out = chunk_text("hello world", 100, 10);
        assert_eq!(out.chunks, vec!["hello world"]);
        assert!(!out.truncated);
    }

    #[test]
    fn test_prefers_sentence_boundary() {
        let text = "First sentence here. Second sentence continues well past the window size limit.";
        let out = chunk_text(text, 40, 5);
        assert!(out.chunks[0].ends_with("here."));
    }

    #[test]
    fn test_paragraph_break_wins_when_later() {
        let text = "Intro line.\n\nBody text that keeps going for quite a while afterwards without stopping.";
        let out = chunk_text(text, 30, 5);
        assert_eq!(out.chunks[0], "Intro line.");
    }

    #[test]
    fn test_overlap_repeats_tail_text() {
        let text = "abcdefghij klmnopqrst uvwxyz0123 4567890abc defghijklm";
        let out = chunk_text(text, 20, 8);
        assert!(out.chunks.len() > 1);
        // Consecutive chunks share text because the window rewinds.
        let first_tail: String = out.chunks[0].chars().rev().take(4).collect();
        let tail: String = first_tail.chars().rev().collect();
        assert!(out.chunks[1].contains(&tail) || out.chunks[0].len() < 20);
    }

    #[test]
    fn test_multibyte_text_never_panics() {
        let text = "日本語のテキストです。これは境界のテストです。さらに続きます。".repeat(8);
        let out = chunk_text(&text, 50, 10);
        assert!(!out.chunks.is_empty());
        for c in &out.chunks {
            // Each piece is valid UTF-8 by construction; make sure the
            // cuts landed on real characters.
            assert!(!c.is_empty());
        }
    }

    #[test]
    fn test_chunk_cap_sets_truncated() {
        // One chunk per "sentence", far more than the cap.
        let text = "word. ".repeat(MAX_CHUNKS_PER_DOCUMENT * 3);
        let out = chunk_text(&text, 6, 0);
        assert!(out.truncated);
        assert_eq!(out.chunks.len(), MAX_CHUNKS_PER_DOCUMENT);
    }

    #[test]
    fn test_deterministic() {
        let text = "Some repeated content. More content here! And a question?\nFinal paragraph.".repeat(20);
        let a = chunk_text(&text, 80, 15);
        let b = chunk_text(&text, 80, 15);
        assert_eq!(a, b);
    }

    #[test]
    fn test_snap_to_char_boundary() {
        let s = "aé"; // 'é' is two bytes starting at offset 1
        assert_eq!(snap_to_char_boundary(s, 2), 1);
        assert_eq!(snap_to_char_boundary(s, 3), 3);
        assert_eq!(snap_to_char_boundary(s, 99), 3);
    }
}
