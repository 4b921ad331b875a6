//! Issue and pull-request record chunking.
//!
//! The record always yields one body chunk. Comments are kept only when they
//! look like they carry signal: long enough, containing code, written by the
//! original poster, or mentioning a resolution.

use serde::Deserialize;

use super::ChunkDraft;
use crate::error::{IndexError, Result};
use crate::models::{ChunkMetadata, ChunkType, DocumentKind};

const RESOLUTION_KEYWORDS: &[&str] = &[
    "fixed",
    "fixes",
    "resolved",
    "solution",
    "workaround",
    "root cause",
    "the fix",
    "closing",
];

#[derive(Debug, Deserialize)]
struct Record {
    title: String,
    #[serde(default, alias = "description")]
    body: Option<String>,
    #[serde(default)]
    number: Option<u64>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    author: Option<Person>,
    #[serde(default)]
    user: Option<Person>,
    #[serde(default)]
    labels: Vec<Label>,
    #[serde(default)]
    comments: Vec<Comment>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Person {
    Name(String),
    Account { login: String },
}

impl Person {
    fn name(&self) -> &str {
        match self {
            Person::Name(n) => n,
            Person::Account { login } => login,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Label {
    Name(String),
    Object { name: String },
}

impl Label {
    fn into_name(self) -> String {
        match self {
            Label::Name(n) | Label::Object { name: n } => n,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Comment {
    #[serde(default)]
    author: Option<Person>,
    #[serde(default)]
    user: Option<Person>,
    #[serde(default)]
    body: String,
}

impl Comment {
    fn author(&self) -> Option<&str> {
        self.author.as_ref().or(self.user.as_ref()).map(Person::name)
    }
}

pub(crate) fn chunk_record(
    source: &str,
    kind: DocumentKind,
    min_comment_chars: usize,
) -> Result<Vec<ChunkDraft>> {
    let record: Record = serde_json::from_str(source).map_err(|e| IndexError::Parse {
        kind: kind.as_str().to_string(),
        message: format!("malformed record: {}", e),
    })?;

    let op = record
        .author
        .as_ref()
        .or(record.user.as_ref())
        .map(|p| p.name().to_string());
    let labels: Vec<String> = record.labels.into_iter().map(Label::into_name).collect();

    let noun = if kind == DocumentKind::PullRequest {
        "Pull request"
    } else {
        "Issue"
    };
    let mut heading = match record.number {
        Some(n) => format!("{} #{}: {}", noun, n, record.title),
        None => format!("{}: {}", noun, record.title),
    };
    if let Some(state) = &record.state {
        heading.push_str(&format!(" [{}]", state));
    }
    let mut text = heading;
    let description = record.body.as_deref().unwrap_or("").trim();
    if !description.is_empty() {
        text.push_str("\n\n");
        text.push_str(description);
    }
    if !labels.is_empty() {
        text.push_str("\n\nLabels: ");
        text.push_str(&labels.join(", "));
    }

    let mut drafts = vec![ChunkDraft {
        chunk_type: ChunkType::IssueBody,
        text,
        metadata: ChunkMetadata {
            title: Some(record.title.clone()),
            author: op.clone(),
            labels: labels.clone(),
            ..Default::default()
        },
    }];

    for comment in &record.comments {
        if !is_important(comment, op.as_deref(), min_comment_chars) {
            continue;
        }
        drafts.push(ChunkDraft {
            chunk_type: ChunkType::Comment,
            text: comment.body.trim().to_string(),
            metadata: ChunkMetadata {
                title: Some(record.title.clone()),
                author: comment.author().map(str::to_string),
                labels: labels.clone(),
                ..Default::default()
            },
        });
    }

    Ok(drafts)
}

fn is_important(comment: &Comment, op: Option<&str>, min_chars: usize) -> bool {
    let body = comment.body.trim();
    if body.is_empty() {
        return false;
    }
    if body.chars().count() >= min_chars || body.contains("```") {
        return true;
    }
    if op.is_some() && comment.author() == op {
        return true;
    }
    let lower = body.to_lowercase();
    RESOLUTION_KEYWORDS.iter().any(|k| lower.contains(k))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ISSUE: &str = r#"{
        "number": 12,
        "title": "Index crashes on empty file",
        "body": "Running index on an empty file panics.",
        "state": "open",
        "user": {"login": "alice"},
        "labels": [{"name": "bug"}, "indexer"],
        "comments": [
            {"user": {"login": "bob"}, "body": "+1"},
            {"user": {"login": "alice"}, "body": "Still happening on main."},
            {"author": "carol", "body": "Workaround: add a newline."},
            {"author": "dave", "body": "Repro:\n```\ntouch x && cidx index x\n```"},
            {"author": "erin", "body": "me too"}
        ]
    }"#;

    #[test]
    fn body_chunk_and_important_comments() {
        let drafts = chunk_record(ISSUE, DocumentKind::Issue, 200).unwrap();
        assert_eq!(drafts[0].chunk_type, ChunkType::IssueBody);
        assert!(drafts[0].text.starts_with("Issue #12: Index crashes on empty file [open]"));
        assert!(drafts[0].text.contains("Labels: bug, indexer"));
        assert_eq!(drafts[0].metadata.author.as_deref(), Some("alice"));

        let comment_authors: Vec<&str> = drafts[1..]
            .iter()
            .map(|d| d.metadata.author.as_deref().unwrap())
            .collect();
        assert_eq!(comment_authors, vec!["alice", "carol", "dave"]);
        assert!(drafts[1..].iter().all(|d| d.chunk_type == ChunkType::Comment));
    }

    #[test]
    fn long_comments_pass_the_length_threshold() {
        let json = format!(
            r#"{{"title": "t", "body": "b", "comments": [{{"author": "x", "body": "{}"}}]}}"#,
            "a".repeat(50)
        );
        assert_eq!(chunk_record(&json, DocumentKind::Issue, 40).unwrap().len(), 2);
        assert_eq!(chunk_record(&json, DocumentKind::Issue, 80).unwrap().len(), 1);
    }

    #[test]
    fn pull_request_with_description_alias() {
        let json = r#"{"title": "Add retries", "description": "Wraps calls.", "merged": true}"#;
        let drafts = chunk_record(json, DocumentKind::PullRequest, 200).unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].text, "Pull request: Add retries\n\nWraps calls.");
    }

    #[test]
    fn malformed_record_is_a_parse_error() {
        let err = chunk_record("{\"title\": ", DocumentKind::Issue, 200).unwrap_err();
        assert!(matches!(err, IndexError::Parse { .. }));
        let err = chunk_record("{\"body\": \"no title\"}", DocumentKind::Issue, 200).unwrap_err();
        assert!(matches!(err, IndexError::Parse { .. }));
    }
}
