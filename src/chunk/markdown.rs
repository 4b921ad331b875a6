//! Heading-structured prose chunking.
//!
//! Each heading opens a section whose own body runs to the next heading of
//! any level; deeper headings become their own sections, so sub-headings are
//! the first subdivision. Every section chunk carries its heading ancestry.
//! A section body still larger than the section budget is split by
//! paragraph. Text before the first heading becomes a "Document header"
//! chunk.

use super::text::pack_paragraphs;
use super::ChunkDraft;
use crate::detect::heading_level;
use crate::models::{ChunkMetadata, ChunkType};

pub(crate) const DOCUMENT_HEADER_TITLE: &str = "Document header";

struct Section {
    level: usize,
    title: String,
    heading: String,
    heading_line: usize,
    /// 0-based line indices `[body_start, body_end)`.
    body_start: usize,
    body_end: usize,
    parents: Vec<String>,
}

pub(crate) fn chunk_markdown(source: &str, section_max_chars: usize) -> Vec<ChunkDraft> {
    let lines: Vec<&str> = source.lines().collect();
    let headings = find_headings(&lines);

    let mut drafts = Vec::new();

    let preamble_end = headings.first().map(|h| h.0).unwrap_or(lines.len());
    let preamble = lines[..preamble_end].join("\n");
    if !preamble.trim().is_empty() {
        for piece in pack_paragraphs(&preamble, section_max_chars, 1) {
            drafts.push(ChunkDraft {
                chunk_type: ChunkType::Section,
                text: piece.text,
                metadata: ChunkMetadata {
                    title: Some(DOCUMENT_HEADER_TITLE.to_string()),
                    start_line: Some(piece.start_line),
                    end_line: Some(piece.end_line),
                    ..Default::default()
                },
            });
        }
    }

    let mut stack: Vec<(usize, String)> = Vec::new();
    let mut sections = Vec::with_capacity(headings.len());
    for (i, (line_idx, consumed, level, title)) in headings.iter().enumerate() {
        while stack.last().is_some_and(|(l, _)| *l >= *level) {
            stack.pop();
        }
        let parents = stack.iter().map(|(_, t)| t.clone()).collect();
        stack.push((*level, title.clone()));

        let body_start = line_idx + consumed;
        let body_end = headings.get(i + 1).map(|h| h.0).unwrap_or(lines.len());
        sections.push(Section {
            level: *level,
            title: title.clone(),
            heading: lines[*line_idx..body_start].join("\n"),
            heading_line: line_idx + 1,
            body_start,
            body_end,
            parents,
        });
    }

    for (i, section) in sections.iter().enumerate() {
        let body = lines[section.body_start..section.body_end].join("\n");
        let has_children = sections
            .get(i + 1)
            .is_some_and(|next| next.level > section.level);

        if body.trim().is_empty() {
            // Parent-only headings live on in their children's ancestry.
            if has_children {
                continue;
            }
            drafts.push(section_draft(
                section,
                section.heading.clone(),
                section.heading_line,
                section.body_start.max(section.heading_line),
            ));
            continue;
        }

        let whole = format!("{}\n\n{}", section.heading, body.trim());
        if whole.len() <= section_max_chars {
            let end_line = last_content_line(&lines, section.body_start, section.body_end);
            drafts.push(section_draft(section, whole, section.heading_line, end_line));
            continue;
        }

        let budget = section_max_chars.saturating_sub(section.heading.len() + 2).max(1);
        for piece in pack_paragraphs(&body, budget, section.body_start + 1) {
            let text = format!("{}\n\n{}", section.heading, piece.text);
            drafts.push(section_draft(section, text, piece.start_line, piece.end_line));
        }
    }

    drafts
}

fn section_draft(section: &Section, text: String, start: usize, end: usize) -> ChunkDraft {
    ChunkDraft {
        chunk_type: ChunkType::Section,
        text,
        metadata: ChunkMetadata {
            title: Some(section.title.clone()),
            start_line: Some(start),
            end_line: Some(end),
            parents: section.parents.clone(),
            ..Default::default()
        },
    }
}

fn last_content_line(lines: &[&str], start: usize, end: usize) -> usize {
    (start..end)
        .rev()
        .find(|i| !lines[*i].trim().is_empty())
        .map(|i| i + 1)
        .unwrap_or(start)
}

/// `(line index, lines consumed, level, title)` for every heading outside
/// fenced code blocks. Handles ATX (`## Title`) and setext (underlined)
/// headings.
fn find_headings(lines: &[&str]) -> Vec<(usize, usize, usize, String)> {
    let mut out = Vec::new();
    let mut fence: Option<&str> = None;
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        let trimmed = line.trim_start();

        if let Some(marker) = fence {
            if trimmed.starts_with(marker) {
                fence = None;
            }
            i += 1;
            continue;
        }
        if trimmed.starts_with("```") {
            fence = Some("```");
            i += 1;
            continue;
        }
        if trimmed.starts_with("~~~") {
            fence = Some("~~~");
            i += 1;
            continue;
        }

        // Indented four spaces is a code block, not a heading.
        let indented = line.len() - trimmed.len() >= 4;
        if !indented {
            if let Some(level) = heading_level(trimmed) {
                let title = trimmed[level..]
                    .trim()
                    .trim_end_matches('#')
                    .trim()
                    .to_string();
                out.push((i, 1, level, title));
                i += 1;
                continue;
            }

            if let Some(next) = lines.get(i + 1) {
                let previous_blank = i == 0 || lines[i - 1].trim().is_empty();
                if !trimmed.is_empty() && previous_blank {
                    if let Some(level) = setext_level(next) {
                        out.push((i, 2, level, trimmed.trim().to_string()));
                        i += 2;
                        continue;
                    }
                }
            }
        }
        i += 1;
    }

    out
}

fn setext_level(line: &str) -> Option<usize> {
    let t = line.trim();
    if t.len() >= 3 && t.chars().all(|c| c == '=') {
        Some(1)
    } else if t.len() >= 3 && t.chars().all(|c| c == '-') {
        Some(2)
    } else {
        None
    }
}
