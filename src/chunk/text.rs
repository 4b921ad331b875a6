//! Paragraph-boundary text splitting.
//!
//! Plain text gets one piece per paragraph ([`split_paragraphs`]). The
//! fallback for every other strategy and oversized heading sections pack
//! neighbouring paragraphs up to the budget instead ([`pack_paragraphs`]).
//! Either way a single paragraph longer than the budget is hard split at the
//! nearest newline or space.

/// Approximate chars-per-token ratio.
pub const CHARS_PER_TOKEN: usize = 4;

/// A packed piece of text with its 1-based line span in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct Piece {
    pub text: String,
    pub start_line: usize,
    pub end_line: usize,
}

/// One piece per blank-line-delimited paragraph; only paragraphs longer than
/// `max_chars` are split further.
pub fn split_paragraphs(text: &str, max_chars: usize, first_line: usize) -> Vec<Piece> {
    let max_chars = max_chars.max(1);
    let mut pieces = Vec::new();
    for (para, start, end) in paragraphs(text, first_line) {
        if para.len() > max_chars {
            pieces.extend(hard_split(&para, max_chars, start, end));
        } else {
            pieces.push(Piece {
                text: para,
                start_line: start,
                end_line: end,
            });
        }
    }
    pieces
}

/// Pack blank-line-delimited paragraphs into pieces of at most `max_chars`.
///
/// Empty paragraphs are dropped. `first_line` is the source line number of
/// `text`'s first line, so callers splitting a sub-slice get absolute spans.
/// Returns no pieces when `text` has no non-blank content.
pub fn pack_paragraphs(text: &str, max_chars: usize, first_line: usize) -> Vec<Piece> {
    let max_chars = max_chars.max(1);
    let mut pieces = Vec::new();
    let mut buf = String::new();
    let mut buf_start = 0usize;
    let mut buf_end = 0usize;

    for (para, start, end) in paragraphs(text, first_line) {
        let would_be = if buf.is_empty() {
            para.len()
        } else {
            buf.len() + 2 + para.len()
        };

        if would_be > max_chars && !buf.is_empty() {
            pieces.push(Piece {
                text: std::mem::take(&mut buf),
                start_line: buf_start,
                end_line: buf_end,
            });
        }

        if para.len() > max_chars {
            pieces.extend(hard_split(&para, max_chars, start, end));
            continue;
        }

        if buf.is_empty() {
            buf_start = start;
        } else {
            buf.push_str("\n\n");
        }
        buf.push_str(&para);
        buf_end = end;
    }

    if !buf.is_empty() {
        pieces.push(Piece {
            text: buf,
            start_line: buf_start,
            end_line: buf_end,
        });
    }

    pieces
}

/// Blank-line-delimited paragraphs with their 1-based line spans, trimmed,
/// empty ones dropped.
pub fn paragraphs(text: &str, first_line: usize) -> Vec<(String, usize, usize)> {
    let mut out = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut start = first_line;

    for (i, line) in text.lines().enumerate() {
        let line_no = first_line + i;
        if line.trim().is_empty() {
            if !current.is_empty() {
                out.push((current.join("\n"), start, line_no - 1));
                current.clear();
            }
            continue;
        }
        if current.is_empty() {
            start = line_no;
        }
        current.push(line);
    }
    if !current.is_empty() {
        let end = start + current.len() - 1;
        out.push((current.join("\n"), start, end));
    }

    out.into_iter()
        .map(|(p, s, e)| (p.trim().to_string(), s, e))
        .filter(|(p, _, _)| !p.is_empty())
        .collect()
}

fn hard_split(para: &str, max_chars: usize, start: usize, end: usize) -> Vec<Piece> {
    let mut pieces = Vec::new();
    let mut remaining = para;
    let mut line = start;

    while !remaining.is_empty() {
        let mut split_at = remaining.len().min(max_chars);
        while !remaining.is_char_boundary(split_at) {
            split_at -= 1;
        }
        let actual = if split_at < remaining.len() {
            remaining[..split_at]
                .rfind('\n')
                .or_else(|| remaining[..split_at].rfind(' '))
                .map(|pos| pos + 1)
                .unwrap_or(split_at.max(next_boundary(remaining, 1)))
        } else {
            split_at
        };
        let piece = &remaining[..actual];
        let newlines = piece.matches('\n').count();
        let trimmed = piece.trim();
        if !trimmed.is_empty() {
            pieces.push(Piece {
                text: trimmed.to_string(),
                start_line: line,
                end_line: (line + newlines).min(end),
            });
        }
        line += newlines;
        remaining = &remaining[actual..];
    }

    pieces
}

fn next_boundary(s: &str, mut i: usize) -> usize {
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i.min(s.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_text_single_piece() {
        let pieces = pack_paragraphs("Hello, world!", 2800, 1);
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].text, "Hello, world!");
        assert_eq!((pieces[0].start_line, pieces[0].end_line), (1, 1));
    }

    #[test]
    fn empty_text_yields_nothing() {
        assert!(pack_paragraphs("", 100, 1).is_empty());
        assert!(pack_paragraphs("\n\n   \n", 100, 1).is_empty());
    }

    #[test]
    fn paragraphs_pack_under_limit() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let pieces = pack_paragraphs(text, 2800, 1);
        assert_eq!(pieces.len(), 1);
        assert!(pieces[0].text.contains("Third paragraph."));
        assert_eq!(pieces[0].end_line, 5);
    }

    #[test]
    fn paragraphs_split_over_limit() {
        let text = "This is paragraph one.\n\nThis is paragraph two.\n\nThis is paragraph three.";
        let pieces = pack_paragraphs(text, 30, 10);
        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces[1].text, "This is paragraph two.");
        assert_eq!(pieces[1].start_line, 12);
    }

    #[test]
    fn each_paragraph_is_its_own_piece() {
        let text = "First paragraph.\n\nSecond paragraph.\n\n\nThird.";
        let pieces = split_paragraphs(text, 2800, 1);
        let texts: Vec<&str> = pieces.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts, vec!["First paragraph.", "Second paragraph.", "Third."]);
        assert_eq!((pieces[2].start_line, pieces[2].end_line), (6, 6));
    }

    #[test]
    fn only_long_paragraphs_are_split() {
        let text = format!("short\n\n{}", "word ".repeat(20));
        let pieces = split_paragraphs(&text, 40, 1);
        assert_eq!(pieces[0].text, "short");
        assert!(pieces.len() > 2);
        assert!(pieces.iter().all(|p| p.text.len() <= 40));
        assert!(pieces[1..].iter().all(|p| p.start_line == 3));
    }

    #[test]
    fn oversized_paragraph_is_hard_split() {
        let text = "word ".repeat(100);
        let pieces = pack_paragraphs(&text, 40, 1);
        assert!(pieces.len() > 1);
        assert!(pieces.iter().all(|p| p.text.len() <= 40));
    }

    #[test]
    fn multibyte_text_does_not_panic() {
        let text = "é".repeat(100);
        let pieces = pack_paragraphs(&text, 7, 1);
        assert!(!pieces.is_empty());
        let rejoined: String = pieces.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(rejoined, text);
    }
}
