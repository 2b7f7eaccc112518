//! Paragraph-boundary text chunker feeding the embedding interface.
//!
//! Splits normalized document content into chunks that respect a byte
//! budget, preferring paragraph boundaries (`\n\n`) so each chunk stays
//! semantically coherent. Every chunk records its byte span within the
//! normalized content so vectors can be traced back to source positions.

/// A chunk of normalized content with its byte span.
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub index: i64,
    /// Byte offset of the chunk's first byte in the normalized content.
    pub start_pos: i64,
    /// Byte offset one past the chunk's last byte.
    pub end_pos: i64,
    pub text: String,
}

/// Split `text` into chunks of at most `max_bytes`, overlapping hard splits
/// by `overlap` bytes. Returns at least one chunk; indices are contiguous
/// from 0.
pub fn chunk_text(text: &str, max_bytes: usize, overlap: usize) -> Vec<TextChunk> {
    let max_bytes = max_bytes.max(1);
    let overlap = overlap.min(max_bytes / 2);

    if text.trim().is_empty() {
        return vec![TextChunk {
            index: 0,
            start_pos: 0,
            end_pos: text.len() as i64,
            text: text.to_string(),
        }];
    }

    let mut chunks: Vec<TextChunk> = Vec::new();
    let mut buf_start: usize = 0;
    let mut buf_end: usize = 0;
    let mut has_buf = false;

    let flush =
        |chunks: &mut Vec<TextChunk>, start: usize, end: usize| {
            let piece = text[start..end].trim_end();
            if piece.is_empty() {
                return;
            }
            chunks.push(TextChunk {
                index: chunks.len() as i64,
                start_pos: start as i64,
                end_pos: (start + piece.len()) as i64,
                text: piece.to_string(),
            });
        };

    for (para_start, para) in split_paragraphs(text) {
        let para_end = para_start + para.len();

        // Would appending this paragraph overflow the buffer?
        if has_buf && para_end - buf_start > max_bytes {
            flush(&mut chunks, buf_start, buf_end);
            has_buf = false;
        }

        if para.len() > max_bytes {
            // A single oversized paragraph is hard-split with overlap.
            if has_buf {
                flush(&mut chunks, buf_start, buf_end);
                has_buf = false;
            }
            let mut pos = para_start;
            while pos < para_end {
                let limit = (pos + max_bytes).min(para_end);
                let split = if limit < para_end {
                    split_point(text, pos, limit)
                } else {
                    limit
                };
                flush(&mut chunks, pos, split);
                if split >= para_end {
                    break;
                }
                let back = floor_char_boundary(text, split.saturating_sub(overlap));
                pos = if back > pos { back } else { split };
            }
        } else if has_buf {
            buf_end = para_end;
        } else {
            buf_start = para_start;
            buf_end = para_end;
            has_buf = true;
        }
    }

    if has_buf {
        flush(&mut chunks, buf_start, buf_end);
    }

    if chunks.is_empty() {
        chunks.push(TextChunk {
            index: 0,
            start_pos: 0,
            end_pos: text.trim_end().len() as i64,
            text: text.trim_end().to_string(),
        });
    }

    chunks
}

/// Yield `(byte_offset, paragraph)` pairs split on blank lines.
fn split_paragraphs(text: &str) -> Vec<(usize, &str)> {
    let mut out = Vec::new();
    let mut offset = 0;
    for part in text.split("\n\n") {
        let trimmed = part.trim();
        if !trimmed.is_empty() {
            let lead = part.len() - part.trim_start().len();
            out.push((offset + lead, part.trim_end().trim_start()));
        }
        offset += part.len() + 2;
    }
    out
}

/// Find a split point at or before `limit`, preferring a newline then a
/// space, always landing on a char boundary.
fn split_point(text: &str, start: usize, limit: usize) -> usize {
    let limit = floor_char_boundary(text, limit);
    let window = &text[start..limit];
    if let Some(pos) = window.rfind('\n') {
        if pos > 0 {
            return start + pos + 1;
        }
    }
    if let Some(pos) = window.rfind(' ') {
        if pos > 0 {
            return start + pos + 1;
        }
    }
    limit
}

fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    idx = idx.min(text.len());
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("Hello, world!\n", 4000, 200);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].start_pos, 0);
    }

    #[test]
    fn test_empty_text() {
        let chunks = chunk_text("", 4000, 0);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
    }

    #[test]
    fn test_paragraphs_packed_under_limit() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.\n";
        let chunks = chunk_text(text, 4000, 0);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("First paragraph."));
        assert!(chunks[0].text.contains("Third paragraph."));
    }

    #[test]
    fn test_paragraphs_split_over_limit() {
        let text = "This is paragraph one.\n\nThis is paragraph two.\n\nThis is paragraph three.\n";
        let chunks = chunk_text(text, 30, 0);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i as i64);
        }
    }

    #[test]
    fn test_spans_point_into_source() {
        let text = "Alpha paragraph.\n\nBeta paragraph.\n\nGamma paragraph.\n";
        let chunks = chunk_text(text, 20, 0);
        for c in &chunks {
            let span = &text[c.start_pos as usize..c.end_pos as usize];
            assert_eq!(span, c.text, "span must reproduce the chunk text");
        }
    }

    #[test]
    fn test_oversized_paragraph_hard_split_with_overlap() {
        let word = "alpha ";
        let text = word.repeat(100);
        let chunks = chunk_text(&text, 60, 12);
        assert!(chunks.len() > 1);
        // With overlap, consecutive chunks share a region.
        for pair in chunks.windows(2) {
            assert!(pair[1].start_pos < pair[0].end_pos + 1);
        }
        for c in &chunks {
            assert!(c.text.len() <= 60);
        }
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta\n";
        let a = chunk_text(text, 14, 4);
        let b = chunk_text(text, 14, 4);
        assert_eq!(a, b);
    }

    #[test]
    fn test_multibyte_safe() {
        let text = "héllo wörld ".repeat(40);
        let chunks = chunk_text(&text, 50, 10);
        for c in &chunks {
            // Slicing would have panicked on a non-boundary; also verify spans.
            assert_eq!(&text[c.start_pos as usize..c.end_pos as usize], c.text);
        }
    }
}
