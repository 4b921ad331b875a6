//! Document kind and language detection.
//!
//! Extension decides when it is unambiguous. Files without an extension, or
//! with one that could hold several shapes (`.json`, `.txt`), are sniffed.

use std::path::Path;

use crate::models::DocumentKind;

/// Languages with a tree-sitter grammar in [`crate::chunk::code`].
const CODE_EXTENSIONS: &[(&str, &str)] = &[
    ("ts", "typescript"),
    ("mts", "typescript"),
    ("cts", "typescript"),
    ("tsx", "tsx"),
    ("js", "javascript"),
    ("mjs", "javascript"),
    ("cjs", "javascript"),
    ("jsx", "javascript"),
    ("java", "java"),
    ("go", "go"),
    ("rs", "rust"),
    // Curly-brace languages without a grammar; chunked by the text fallback.
    ("c", "c"),
    ("h", "c"),
    ("cc", "cpp"),
    ("cpp", "cpp"),
    ("hpp", "cpp"),
    ("cs", "csharp"),
    ("kt", "kotlin"),
    ("swift", "swift"),
    ("php", "php"),
    ("scala", "scala"),
];

/// Detect `(kind, language)` for a document.
pub fn detect(path: Option<&Path>, content: &str) -> (DocumentKind, Option<String>) {
    let ext = path
        .and_then(|p| p.extension())
        .map(|e| e.to_string_lossy().to_ascii_lowercase());

    match ext.as_deref() {
        Some("md") | Some("markdown") | Some("mdx") => {
            (DocumentKind::Markdown, Some("markdown".into()))
        }
        Some(e) => {
            if let Some((_, lang)) = CODE_EXTENSIONS.iter().find(|(x, _)| *x == e) {
                return (DocumentKind::Code, Some(lang.to_string()));
            }
            if e == "json" {
                if let Some(kind) = sniff_record(content) {
                    return (kind, Some("json".into()));
                }
                return (DocumentKind::PlainText, Some("json".into()));
            }
            sniff(content)
        }
        None => sniff(content),
    }
}

/// Guess kind and language from content alone.
pub fn sniff(content: &str) -> (DocumentKind, Option<String>) {
    if let Some(kind) = sniff_record(content) {
        return (kind, Some("json".into()));
    }
    if looks_like_markdown(content) {
        return (DocumentKind::Markdown, Some("markdown".into()));
    }
    if let Some(lang) = sniff_code_language(content) {
        return (DocumentKind::Code, Some(lang.to_string()));
    }
    (DocumentKind::PlainText, None)
}

/// Issue or pull-request record encoded as a JSON object.
fn sniff_record(content: &str) -> Option<DocumentKind> {
    let trimmed = content.trim_start();
    if !trimmed.starts_with('{') {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(trimmed).ok()?;
    let obj = value.as_object()?;
    let has_title = obj.get("title").is_some_and(|v| v.is_string());
    let has_body = obj.contains_key("body") || obj.contains_key("description");
    let has_record_marker = obj.contains_key("comments")
        || obj.contains_key("number")
        || obj.contains_key("labels")
        || obj.contains_key("state");
    if !(has_title && has_body && has_record_marker) {
        return None;
    }
    let is_pr = ["pull_request", "merged", "head", "base", "merged_at"]
        .iter()
        .any(|k| obj.contains_key(*k));
    Some(if is_pr {
        DocumentKind::PullRequest
    } else {
        DocumentKind::Issue
    })
}

fn looks_like_markdown(content: &str) -> bool {
    let mut headings = 0;
    let mut fences = 0;
    for line in content.lines().take(200) {
        let t = line.trim_start();
        if heading_level(t).is_some() {
            headings += 1;
        }
        if t.starts_with("```") {
            fences += 1;
        }
    }
    headings >= 1 && (headings >= 2 || fences == 0 || content.starts_with('#'))
}

/// ATX heading level (1..=6) of a line, if it is one.
pub(crate) fn heading_level(line: &str) -> Option<usize> {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    match line[hashes..].chars().next() {
        None => Some(hashes),
        Some(c) if c == ' ' || c == '\t' => Some(hashes),
        _ => None,
    }
}

fn sniff_code_language(content: &str) -> Option<&'static str> {
    let braces = content.matches('{').count();
    if braces == 0 {
        return None;
    }
    let has = |needle: &str| content.contains(needle);

    if has("package main") || (has("func ") && has("package ")) {
        return Some("go");
    }
    if has("fn ") && (has("let ") || has("impl ") || has("pub ") || has("use ")) {
        return Some("rust");
    }
    if has("public class ") || has("import java.") || has("private static ") {
        return Some("java");
    }
    if (has("interface ") && has(": ")) || has("export type ") {
        return Some("typescript");
    }
    if has("function ") || has("=> {") || has("const ") || has("export ") {
        return Some("javascript");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn extension_wins_for_code_and_markdown() {
        let (k, l) = detect(Some(&PathBuf::from("a/b.ts")), "");
        assert_eq!(k, DocumentKind::Code);
        assert_eq!(l.as_deref(), Some("typescript"));

        let (k, _) = detect(Some(&PathBuf::from("README.md")), "plain words");
        assert_eq!(k, DocumentKind::Markdown);
    }

    #[test]
    fn json_issue_and_pr_are_sniffed() {
        let issue = r#"{"title": "Crash", "body": "boom", "number": 4, "comments": []}"#;
        assert_eq!(
            detect(Some(&PathBuf::from("4.json")), issue).0,
            DocumentKind::Issue
        );

        let pr = r#"{"title": "Fix", "body": "patch", "state": "open", "merged": false}"#;
        assert_eq!(detect(None, pr).0, DocumentKind::PullRequest);

        let other = r#"{"name": "package"}"#;
        assert_eq!(
            detect(Some(&PathBuf::from("package.json")), other).0,
            DocumentKind::PlainText
        );
    }

    #[test]
    fn extensionless_content_is_sniffed() {
        assert_eq!(sniff("# Title\n\nbody").0, DocumentKind::Markdown);
        let (k, l) = sniff("export function add(a, b) { return a + b }");
        assert_eq!(k, DocumentKind::Code);
        assert_eq!(l.as_deref(), Some("javascript"));
        assert_eq!(sniff("just some words").0, DocumentKind::PlainText);
    }

    #[test]
    fn heading_levels() {
        assert_eq!(heading_level("# A"), Some(1));
        assert_eq!(heading_level("### C"), Some(3));
        assert_eq!(heading_level("#hashtag"), None);
        assert_eq!(heading_level("####### seven"), None);
    }
}
