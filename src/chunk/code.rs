//! Syntax-tree chunking for curly-brace-language source.
//!
//! One chunk per top-level function, one per class (the whole class body,
//! with its method names listed as symbols), and one per interface/type
//! declaration. Import statements are collected once and attached to every
//! chunk's metadata rather than duplicated into chunk text.

use tree_sitter::{Language, Node, Parser};

use super::ChunkDraft;
use crate::error::{IndexError, Result};
use crate::models::{ChunkMetadata, ChunkType};

/// Node kinds that matter for one grammar.
struct Grammar {
    language: Language,
    functions: &'static [&'static str],
    classes: &'static [&'static str],
    types: &'static [&'static str],
    imports: &'static [&'static str],
    methods: &'static [&'static str],
    /// Wrappers whose inner declaration should be chunked (e.g. `export`).
    wrappers: &'static [&'static str],
    /// `const f = () => {}` style bindings.
    bindings: &'static [&'static str],
}

const TS_FUNCTIONS: &[&str] = &["function_declaration", "generator_function_declaration"];
const TS_CLASSES: &[&str] = &["class_declaration", "abstract_class_declaration", "class"];
const TS_TYPES: &[&str] = &[
    "interface_declaration",
    "type_alias_declaration",
    "enum_declaration",
];
const TS_IMPORTS: &[&str] = &["import_statement"];
const TS_METHODS: &[&str] = &[
    "method_definition",
    "abstract_method_signature",
    "method_signature",
];
const TS_WRAPPERS: &[&str] = &["export_statement"];
const TS_BINDINGS: &[&str] = &["lexical_declaration", "variable_declaration"];

fn grammar_for(language: &str) -> Option<Grammar> {
    let g = match language {
        "typescript" => Grammar {
            language: tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            functions: TS_FUNCTIONS,
            classes: TS_CLASSES,
            types: TS_TYPES,
            imports: TS_IMPORTS,
            methods: TS_METHODS,
            wrappers: TS_WRAPPERS,
            bindings: TS_BINDINGS,
        },
        "tsx" => Grammar {
            language: tree_sitter_typescript::LANGUAGE_TSX.into(),
            functions: TS_FUNCTIONS,
            classes: TS_CLASSES,
            types: TS_TYPES,
            imports: TS_IMPORTS,
            methods: TS_METHODS,
            wrappers: TS_WRAPPERS,
            bindings: TS_BINDINGS,
        },
        "javascript" => Grammar {
            language: tree_sitter_javascript::LANGUAGE.into(),
            functions: TS_FUNCTIONS,
            classes: &["class_declaration", "class"],
            types: &[],
            imports: TS_IMPORTS,
            methods: &["method_definition"],
            wrappers: TS_WRAPPERS,
            bindings: TS_BINDINGS,
        },
        "java" => Grammar {
            language: tree_sitter_java::LANGUAGE.into(),
            functions: &[],
            classes: &["class_declaration", "enum_declaration", "record_declaration"],
            types: &["interface_declaration", "annotation_type_declaration"],
            imports: &["import_declaration", "package_declaration"],
            methods: &["method_declaration", "constructor_declaration"],
            wrappers: &[],
            bindings: &[],
        },
        "go" => Grammar {
            language: tree_sitter_go::LANGUAGE.into(),
            functions: &["function_declaration", "method_declaration"],
            classes: &[],
            types: &["type_declaration"],
            imports: &["import_declaration"],
            methods: &[],
            wrappers: &[],
            bindings: &[],
        },
        "rust" => Grammar {
            language: tree_sitter_rust::LANGUAGE.into(),
            functions: &["function_item"],
            classes: &["impl_item"],
            types: &[
                "struct_item",
                "enum_item",
                "trait_item",
                "type_item",
                "union_item",
            ],
            imports: &["use_declaration", "extern_crate_declaration"],
            methods: &["function_item", "function_signature_item"],
            wrappers: &[],
            bindings: &[],
        },
        _ => return None,
    };
    Some(g)
}

/// Chunk source code. Fails with [`IndexError::Parse`] when no grammar is
/// available or the tree contains syntax errors.
pub(crate) fn chunk_code(source: &str, language: Option<&str>) -> Result<Vec<ChunkDraft>> {
    let language = language.unwrap_or("unknown");
    let grammar = grammar_for(language).ok_or_else(|| IndexError::Parse {
        kind: "code".into(),
        message: format!("no syntax grammar for language '{}'", language),
    })?;

    let mut parser = Parser::new();
    parser
        .set_language(&grammar.language)
        .map_err(|e| IndexError::Parse {
            kind: "code".into(),
            message: format!("failed to load {} grammar: {}", language, e),
        })?;

    let tree = parser.parse(source, None).ok_or_else(|| IndexError::Parse {
        kind: "code".into(),
        message: format!("{} parser produced no tree", language),
    })?;
    let root = tree.root_node();
    if root.has_error() {
        return Err(IndexError::Parse {
            kind: "code".into(),
            message: format!(
                "syntax error in {} source near line {}",
                language,
                first_error_line(root)
            ),
        });
    }

    let mut imports = Vec::new();
    let mut drafts = Vec::new();
    let mut rest: Vec<Node> = Vec::new();
    let mut cursor = root.walk();
    for node in root.children(&mut cursor).filter(|n| n.is_named()) {
        if !visit_top_level(node, source, &grammar, &mut imports, &mut drafts)
            && !IGNORED_TOP_LEVEL.contains(&node.kind())
        {
            rest.push(node);
        }
    }
    if let Some(draft) = remainder_draft(&rest, source) {
        drafts.push(draft);
    }

    for d in &mut drafts {
        d.metadata.imports = imports.clone();
    }
    Ok(drafts)
}

/// Top-level nodes that never reach the trailing remainder chunk.
const IGNORED_TOP_LEVEL: &[&str] = &[
    "comment",
    "line_comment",
    "block_comment",
    "attribute_item",
    "inner_attribute_item",
    "package_clause",
    "package_declaration",
    "empty_statement",
    "hash_bang_line",
];

/// Returns false when `node` is neither an import nor a declaration.
fn visit_top_level(
    node: Node,
    source: &str,
    grammar: &Grammar,
    imports: &mut Vec<String>,
    drafts: &mut Vec<ChunkDraft>,
) -> bool {
    let kind = node.kind();

    if grammar.imports.contains(&kind) {
        imports.push(node_text(node, source).trim().to_string());
        return true;
    }

    if grammar.wrappers.contains(&kind) {
        // The chunk spans the wrapper so `export` stays in the text.
        let mut cursor = node.walk();
        let inner: Vec<Node> = node.children(&mut cursor).filter(|n| n.is_named()).collect();
        for child in inner {
            if let Some(draft) = declaration_draft(child, node, source, grammar) {
                drafts.push(draft);
                return true;
            }
        }
        return false;
    }

    match declaration_draft(node, node, source, grammar) {
        Some(draft) => {
            drafts.push(draft);
            true
        }
        None => false,
    }
}

/// Statements, constants, modules and macros outside any declaration, as
/// one paragraph spanning the first to the last of them.
fn remainder_draft(nodes: &[Node], source: &str) -> Option<ChunkDraft> {
    let first = nodes.first()?;
    let last = nodes.last()?;
    let text = nodes
        .iter()
        .map(|n| node_text(*n, source).trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    if text.is_empty() {
        return None;
    }
    Some(ChunkDraft {
        chunk_type: ChunkType::Paragraph,
        text,
        metadata: ChunkMetadata {
            start_line: Some(first.start_position().row + 1),
            end_line: Some(last.end_position().row + 1),
            ..Default::default()
        },
    })
}

/// Build a draft for `decl`, using `span` for the chunk text and lines.
fn declaration_draft(decl: Node, span: Node, source: &str, grammar: &Grammar) -> Option<ChunkDraft> {
    let kind = decl.kind();

    let (chunk_type, symbols) = if grammar.functions.contains(&kind) {
        (ChunkType::Function, vec![symbol_name(decl, source)?])
    } else if grammar.classes.contains(&kind) {
        let mut symbols = vec![symbol_name(decl, source)?];
        symbols.extend(method_names(decl, source, grammar));
        (ChunkType::Class, symbols)
    } else if grammar.types.contains(&kind) {
        (ChunkType::TypeDeclaration, vec![symbol_name(decl, source)?])
    } else if grammar.bindings.contains(&kind) {
        (ChunkType::Function, vec![bound_function_name(decl, source)?])
    } else {
        return None;
    };

    let text = node_text(span, source).to_string();
    Some(ChunkDraft {
        chunk_type,
        text,
        metadata: ChunkMetadata {
            title: symbols.first().cloned(),
            start_line: Some(span.start_position().row + 1),
            end_line: Some(span.end_position().row + 1),
            symbols,
            ..Default::default()
        },
    })
}

fn symbol_name(node: Node, source: &str) -> Option<String> {
    if let Some(name) = node.child_by_field_name("name") {
        return Some(node_text(name, source).to_string());
    }
    // Rust `impl Foo` / `impl Trait for Foo`.
    if let Some(ty) = node.child_by_field_name("type") {
        return Some(node_text(ty, source).to_string());
    }
    // Go `type ( A struct{}; B int )` keeps names on the type_spec children.
    let mut cursor = node.walk();
    let names: Vec<String> = node
        .children(&mut cursor)
        .filter(|c| c.kind() == "type_spec" || c.kind() == "type_alias")
        .filter_map(|c| c.child_by_field_name("name"))
        .map(|n| node_text(n, source).to_string())
        .collect();
    if names.is_empty() {
        None
    } else {
        Some(names.join(", "))
    }
}

/// Name of a `const f = () => ...` binding whose value is a function.
fn bound_function_name(node: Node, source: &str) -> Option<String> {
    let mut cursor = node.walk();
    let declarators: Vec<Node> = node
        .children(&mut cursor)
        .filter(|c| c.kind() == "variable_declarator")
        .collect();
    declarators.into_iter().find_map(|d| {
        let value = d.child_by_field_name("value")?;
        match value.kind() {
            "arrow_function" | "function_expression" | "function" | "generator_function" => d
                .child_by_field_name("name")
                .map(|n| node_text(n, source).to_string()),
            _ => None,
        }
    })
}

fn method_names(class: Node, source: &str, grammar: &Grammar) -> Vec<String> {
    let body = class
        .child_by_field_name("body")
        .or_else(|| {
            let mut cursor = class.walk();
            let found = class
                .children(&mut cursor)
                .find(|c| c.kind().ends_with("body") || c.kind() == "declaration_list");
            found
        });
    let Some(body) = body else {
        return Vec::new();
    };

    let mut cursor = body.walk();
    let members: Vec<Node> = body.children(&mut cursor).filter(|n| n.is_named()).collect();
    members
        .into_iter()
        .filter(|m| grammar.methods.contains(&m.kind()))
        .filter_map(|m| m.child_by_field_name("name"))
        .map(|n| node_text(n, source).to_string())
        .collect()
}

fn node_text<'a>(node: Node, source: &'a str) -> &'a str {
    source.get(node.byte_range()).unwrap_or("")
}

fn first_error_line(root: Node) -> usize {
    fn walk(node: Node) -> Option<usize> {
        if node.is_error() || node.is_missing() {
            return Some(node.start_position().row + 1);
        }
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        children
            .into_iter()
            .filter(|c| c.has_error())
            .find_map(walk)
    }
    walk(root).unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exported_function_is_one_chunk() {
        let drafts =
            chunk_code("export function add(a, b) { return a + b }", Some("typescript")).unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].chunk_type, ChunkType::Function);
        assert_eq!(drafts[0].metadata.symbols, vec!["add".to_string()]);
        assert!(drafts[0].text.starts_with("export function add"));
    }

    #[test]
    fn class_lists_methods_and_imports_are_shared() {
        let src = r#"import { Store } from "./store";
import fs from "fs";

export class Cache {
  get(key: string) { return 1; }
  set(key: string, v: number) {}
}

interface Options { ttl: number }

type Key = string;

const helper = (x: number) => x * 2;
"#;
        let drafts = chunk_code(src, Some("typescript")).unwrap();
        let kinds: Vec<ChunkType> = drafts.iter().map(|d| d.chunk_type).collect();
        assert_eq!(
            kinds,
            vec![
                ChunkType::Class,
                ChunkType::TypeDeclaration,
                ChunkType::TypeDeclaration,
                ChunkType::Function
            ]
        );
        assert_eq!(drafts[0].metadata.symbols, vec!["Cache", "get", "set"]);
        assert_eq!(drafts[3].metadata.symbols, vec!["helper"]);
        for d in &drafts {
            assert_eq!(d.metadata.imports.len(), 2);
            assert!(!d.text.contains("import fs"));
        }
        assert_eq!(drafts[0].metadata.start_line, Some(4));
        assert_eq!(drafts[0].metadata.end_line, Some(7));
    }

    #[test]
    fn syntax_error_is_a_parse_error() {
        let err = chunk_code("function broken( {", Some("javascript")).unwrap_err();
        assert!(matches!(err, IndexError::Parse { .. }));
    }

    #[test]
    fn unknown_grammar_is_a_parse_error() {
        let err = chunk_code("int main() { return 0; }", Some("c")).unwrap_err();
        assert!(err.to_string().contains("no syntax grammar"));
    }

    #[test]
    fn go_functions_and_types() {
        let src = r#"package main

import "fmt"

type Server struct { port int }

func (s *Server) Start() error { return nil }

func main() { fmt.Println("hi") }
"#;
        let drafts = chunk_code(src, Some("go")).unwrap();
        let symbols: Vec<&str> = drafts
            .iter()
            .map(|d| d.metadata.symbols[0].as_str())
            .collect();
        assert_eq!(symbols, vec!["Server", "Start", "main"]);
        assert_eq!(drafts[0].chunk_type, ChunkType::TypeDeclaration);
        assert_eq!(drafts[0].metadata.imports, vec!["import \"fmt\"".to_string()]);
    }

    #[test]
    fn rust_impl_blocks_are_classes() {
        let src = r#"use std::fmt;

pub struct Point { x: i32 }

impl Point {
    pub fn new(x: i32) -> Self { Self { x } }
    fn x(&self) -> i32 { self.x }
}

fn main() {}
"#;
        let drafts = chunk_code(src, Some("rust")).unwrap();
        assert_eq!(drafts.len(), 3);
        assert_eq!(drafts[1].chunk_type, ChunkType::Class);
        assert_eq!(drafts[1].metadata.symbols, vec!["Point", "new", "x"]);
        assert_eq!(drafts[2].metadata.symbols, vec!["main"]);
    }

    #[test]
    fn loose_top_level_code_becomes_a_trailing_paragraph() {
        let src = r#"const retries = 3;

export function add(a, b) { return a + b }

console.log(add(retries, 1));
"#;
        let drafts = chunk_code(src, Some("javascript")).unwrap();
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].chunk_type, ChunkType::Function);
        let rest = &drafts[1];
        assert_eq!(rest.chunk_type, ChunkType::Paragraph);
        assert!(rest.text.contains("const retries = 3;"));
        assert!(rest.text.contains("console.log"));
        assert!(!rest.text.contains("function add"));
        assert_eq!(rest.metadata.start_line, Some(1));
        assert_eq!(rest.metadata.end_line, Some(5));

        let src = r#"//! Crate docs.

mod config;

#[derive(Debug)]
pub struct Point { x: i32 }

pub const LIMIT: usize = 8;
static NAME: &str = "p";

macro_rules! square { ($x:expr) => { $x * $x }; }
"#;
        let drafts = chunk_code(src, Some("rust")).unwrap();
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].chunk_type, ChunkType::TypeDeclaration);
        let rest = &drafts[1].text;
        for expected in ["mod config;", "pub const LIMIT", "static NAME", "macro_rules! square"] {
            assert!(rest.contains(expected), "missing {expected} in {rest}");
        }
        assert!(!rest.contains("derive"));
        assert!(!rest.contains("Crate docs"));
    }

    #[test]
    fn java_class_with_methods() {
        let src = r#"import java.util.List;

public class Greeter {
    public Greeter() {}
    public String greet(String name) { return "hi " + name; }
}
"#;
        let drafts = chunk_code(src, Some("java")).unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].metadata.symbols, vec!["Greeter", "Greeter", "greet"]);
        assert_eq!(drafts[0].metadata.imports.len(), 1);
    }
}
