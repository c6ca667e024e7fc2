//! Line-oriented definition scan for languages without a loaded grammar.
//!
//! A unit runs from its opening line to whichever comes first: the line where
//! its block closes, or the line before the next detected definition.

use std::collections::{HashMap, HashSet};

use regex::Regex;

use super::languages::Family;
use super::{Chunk, ChunkKind, ChunkerError, SourceFile};

/// Upper bound on lines searched for a closing brace.
const BRACE_SEARCH_LINES: usize = 500;

const CONTROL_KEYWORDS: &[&str] = &[
    "if", "else", "elif", "for", "foreach", "while", "do", "switch", "case", "match", "when",
    "catch", "try", "finally", "return", "new", "throw", "await", "yield", "using", "lock",
    "sizeof", "typeof", "function", "with", "assert", "super", "this", "constructor",
];

#[derive(Clone, Copy, PartialEq, Eq)]
enum BlockStyle {
    Braces,
    Indent,
}

struct FamilyPatterns {
    class: Vec<Regex>,
    function: Vec<Regex>,
    block: BlockStyle,
}

struct Definition {
    kind: ChunkKind,
    name: String,
    /// 1-based.
    line: usize,
}

pub struct HeuristicScanner {
    families: HashMap<Family, FamilyPatterns>,
    call: Regex,
}

fn compile_all(patterns: &[&str]) -> Result<Vec<Regex>, ChunkerError> {
    patterns
        .iter()
        .map(|p| Regex::new(p).map_err(ChunkerError::from))
        .collect()
}

impl HeuristicScanner {
    pub fn new() -> Result<Self, ChunkerError> {
        let mut families = HashMap::new();

        families.insert(
            Family::CStyle,
            FamilyPatterns {
                class: compile_all(&[
                    r"^\s*(?:(?:public|private|protected|internal|static|final|abstract|sealed|partial|open|data|export|default|pub(?:\([^)]*\))?)\s+)*(?:class|interface|struct|enum|trait|object|record)\s+(\w+)",
                    r"^\s*type\s+(\w+)\s+(?:struct|interface)\b",
                ])?,
                function: compile_all(&[
                    r"^\s*(?:(?:pub(?:\([^)]*\))?|public|private|protected|internal|open|override|static|async|unsafe|const|extern|export|default|suspend|inline|final)\s+)*(?:fn|func|fun|function|def)\s+(?:\([^)]*\)\s*)?(\w+)",
                    r"^\s*(?:(?:public|private|protected|internal|static|final|synchronized|abstract|override|virtual|async|inline|extern|sealed|unsafe|native)\s+)*(?:[\w.:]+(?:<[^>]*>)?(?:\[\])*[*&]*\s+)+[*&]*(\w+)\s*\([^;]*\)\s*(?:const\s*)?(?:throws\s+[\w.,\s]+)?\{?\s*$",
                ])?,
                block: BlockStyle::Braces,
            },
        );

        families.insert(
            Family::JavaScript,
            FamilyPatterns {
                class: compile_all(&[
                    r"^\s*(?:export\s+)?(?:default\s+)?(?:abstract\s+)?class\s+(\w+)",
                ])?,
                function: compile_all(&[
                    r"^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*(\w+)",
                    r"^\s*(?:export\s+)?(?:const|let|var)\s+(\w+)\s*(?::[^=]+)?=\s*(?:async\s+)?(?:function\b|\([^)]*\)\s*(?::\s*[^=]+)?=>|\w+\s*=>)",
                    r"^\s*(\w+)\s*:\s*(?:async\s+)?function\b",
                    r"^\s*(?:(?:public|private|protected|static|async|readonly|override|get|set)\s+)*(\w+)\s*(?:<[^>]*>)?\([^)]*\)\s*(?::\s*[^{]+)?\{\s*$",
                ])?,
                block: BlockStyle::Braces,
            },
        );

        families.insert(
            Family::Python,
            FamilyPatterns {
                class: compile_all(&[r"^\s*class\s+(\w+)"])?,
                function: compile_all(&[r"^\s*(?:async\s+)?def\s+(\w+)"])?,
                block: BlockStyle::Indent,
            },
        );

        Ok(Self {
            families,
            call: Regex::new(r"\b([A-Za-z_]\w*)\s*\(")?,
        })
    }

    /// Scan `file` with `family` patterns; empty when nothing was detected.
    pub fn scan(&self, family: Family, file: &SourceFile) -> Vec<Chunk> {
        let Some(patterns) = self.families.get(&family) else {
            return Vec::new();
        };

        let definitions = detect(patterns, &file.lines);
        let total = file.lines.len();

        // class spans decide method ownership
        let class_spans: Vec<(usize, usize, &str)> = definitions
            .iter()
            .filter(|d| d.kind == ChunkKind::Class)
            .map(|d| {
                let end = block_end(patterns.block, &file.lines, d.line).unwrap_or(total);
                (d.line, end, d.name.as_str())
            })
            .collect();

        let mut chunks = Vec::new();
        for (i, def) in definitions.iter().enumerate() {
            let next_start = definitions
                .get(i + 1)
                .map(|n| n.line - 1)
                .unwrap_or(total);
            let end = match block_end(patterns.block, &file.lines, def.line) {
                Some(block) => next_start.min(block),
                None => next_start,
            }
            .max(def.line);

            let content = file.line_span(def.line, end);
            if content.trim().is_empty() {
                continue;
            }

            let parent = class_spans
                .iter()
                .filter(|(start, stop, _)| *start < def.line && def.line <= *stop)
                .last()
                .map(|(_, _, name)| name.to_string());

            let kind = match (def.kind, &parent) {
                (ChunkKind::Function, Some(_)) => ChunkKind::Method,
                (kind, _) => kind,
            };

            let mut chunk = file.new_chunk(kind, &def.name, def.line, end);
            chunk.parent_name = parent;
            chunk.signature = Some(
                file.lines[def.line - 1]
                    .trim()
                    .trim_end_matches(['{', ':'])
                    .trim_end()
                    .to_string(),
            );
            chunk.doc_comment = leading_comment(&file.lines, def.line);
            if kind != ChunkKind::Class {
                chunk.calls = self.calls(&file.lines, def.line + 1, end, &def.name);
            }
            chunks.push(chunk);
        }
        chunks
    }

    fn calls(&self, lines: &[&str], start: usize, end: usize, own_name: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut calls = Vec::new();
        for line in lines.iter().take(end).skip(start.saturating_sub(1)) {
            for cap in self.call.captures_iter(line) {
                let name = &cap[1];
                if name == own_name || CONTROL_KEYWORDS.contains(&name) {
                    continue;
                }
                if seen.insert(name.to_string()) {
                    calls.push(name.to_string());
                }
            }
        }
        calls
    }
}

fn detect(patterns: &FamilyPatterns, lines: &[&str]) -> Vec<Definition> {
    let mut definitions = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        let first_word = line.split_whitespace().next().unwrap_or_default();
        if CONTROL_KEYWORDS.contains(&first_word) {
            continue;
        }
        let found = first_capture(&patterns.class, line)
            .map(|name| (ChunkKind::Class, name))
            .or_else(|| first_capture(&patterns.function, line).map(|n| (ChunkKind::Function, n)));

        if let Some((kind, name)) = found {
            if CONTROL_KEYWORDS.contains(&name) {
                continue;
            }
            definitions.push(Definition {
                kind,
                name: name.to_string(),
                line: idx + 1,
            });
        }
    }
    definitions
}

fn first_capture<'l>(regexes: &[Regex], line: &'l str) -> Option<&'l str> {
    regexes.iter().find_map(|re| {
        let caps = re.captures(line)?;
        caps.iter().skip(1).flatten().next().map(|m| m.as_str())
    })
}

/// 1-based line where the block opened at `start` closes.
fn block_end(style: BlockStyle, lines: &[&str], start: usize) -> Option<usize> {
    match style {
        BlockStyle::Braces => matching_brace(lines, start),
        BlockStyle::Indent => indent_end(lines, start),
    }
}

fn matching_brace(lines: &[&str], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut opened = false;
    let stop = (start - 1 + BRACE_SEARCH_LINES).min(lines.len());
    for (idx, line) in lines.iter().enumerate().take(stop).skip(start - 1) {
        for ch in line.chars() {
            match ch {
                '{' => {
                    depth += 1;
                    opened = true;
                }
                '}' => {
                    depth = depth.saturating_sub(1);
                    if opened && depth == 0 {
                        return Some(idx + 1);
                    }
                }
                _ => {}
            }
        }
    }
    None
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

fn indent_end(lines: &[&str], start: usize) -> Option<usize> {
    let base = indent_of(lines.get(start - 1)?);
    let mut last_body = start;
    for (idx, line) in lines.iter().enumerate().skip(start) {
        let trimmed = line.trim_start();
        if trimmed.is_empty() {
            continue;
        }
        // closing bracket of a multi-line signature
        let closes = trimmed.starts_with([')', ']', '}']);
        if indent_of(line) <= base && !closes {
            return Some(last_body);
        }
        last_body = idx + 1;
    }
    Some(last_body)
}

fn leading_comment(lines: &[&str], line: usize) -> Option<String> {
    let mut collected = Vec::new();
    let mut idx = line.checked_sub(2)?;
    loop {
        let text = lines[idx].trim();
        let is_comment = text.starts_with("//")
            || text.starts_with("/*")
            || text.starts_with('*')
            || text.starts_with('#');
        if !is_comment || text.starts_with("#[") {
            break;
        }
        let stripped = text
            .trim_start_matches('/')
            .trim_start_matches('*')
            .trim_start_matches('#')
            .trim_end_matches("*/")
            .trim();
        if !stripped.is_empty() {
            collected.push(stripped.to_string());
        }
        if idx == 0 {
            break;
        }
        idx -= 1;
    }
    collected.reverse();
    if collected.is_empty() {
        None
    } else {
        Some(collected.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChunkerConfig;

    fn source_file<'a>(path: &str, language: &'static str, text: &'a str) -> SourceFile<'a> {
        SourceFile {
            path: path.to_string(),
            relative_path: path.to_string(),
            language,
            limits: ChunkerConfig::default().limits_for(Family::CStyle),
            text,
            lines: text.lines().collect(),
        }
    }

    const JAVA_SOURCE: &str = r#"package com.example;

public class TokenValidator extends Base {

    private final Store store;

    /** Validates a bearer token. */
    public boolean validateToken(String token) throws AuthException {
        if (token == null) {
            return false;
        }
        return store.contains(token);
    }

    private static int count() {
        return 1;
    }
}
"#;

    #[test]
    fn test_java_class_and_methods() {
        let scanner = HeuristicScanner::new().expect("scanner");
        let file = source_file("TokenValidator.java", "java", JAVA_SOURCE);
        let chunks = scanner.scan(Family::CStyle, &file);

        let class = chunks.iter().find(|c| c.name == "TokenValidator").expect("class");
        assert_eq!(class.kind, ChunkKind::Class);
        assert_eq!(class.start_line, 3);
        // ends before the first member definition
        assert_eq!(class.end_line, 7);

        let validate = chunks.iter().find(|c| c.name == "validateToken").expect("method");
        assert_eq!(validate.kind, ChunkKind::Method);
        assert_eq!(validate.parent_name.as_deref(), Some("TokenValidator"));
        assert_eq!(validate.start_line, 8);
        assert_eq!(validate.end_line, 13);
        assert!(validate.calls.contains(&"contains".to_string()));

        let count = chunks.iter().find(|c| c.name == "count").expect("method");
        assert_eq!(count.start_line, 15);
        assert_eq!(count.end_line, 17);

        assert!(chunks.iter().all(|c| c.name != "if"));
    }

    #[test]
    fn test_javascript_functions() {
        let scanner = HeuristicScanner::new().expect("scanner");
        let text = "export async function load(id) {\n  return fetch(id);\n}\n\nconst save = (x) => {\n  store(x);\n};\n";
        let file = source_file("a.js", "javascript", text);
        let chunks = scanner.scan(Family::JavaScript, &file);
        let names: Vec<_> = chunks.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["load", "save"]);
        assert_eq!(chunks[0].end_line, 3);
        assert_eq!(chunks[1].kind, ChunkKind::Function);
    }

    #[test]
    fn test_python_indent_blocks() {
        let scanner = HeuristicScanner::new().expect("scanner");
        let text = "class A:\n    def run(self):\n        go()\n\ndef helper(\n    x,\n):\n    return x\n";
        let file = source_file("a.py", "python", text);
        let chunks = scanner.scan(Family::Python, &file);
        let run = chunks.iter().find(|c| c.name == "run").expect("run");
        assert_eq!(run.kind, ChunkKind::Method);
        assert_eq!(run.parent_name.as_deref(), Some("A"));
        let helper = chunks.iter().find(|c| c.name == "helper").expect("helper");
        assert_eq!(helper.kind, ChunkKind::Function);
        assert_eq!(helper.end_line, 8);
    }

    #[test]
    fn test_nothing_detected() {
        let scanner = HeuristicScanner::new().expect("scanner");
        let file = source_file("a.c", "c", "int x = 1;\nint y = 2;\n");
        assert!(scanner.scan(Family::CStyle, &file).is_empty());
        assert!(scanner.scan(Family::Plain, &file).is_empty());
    }

    #[test]
    fn test_matching_brace_limit() {
        let mut lines = vec!["void f() {"];
        lines.extend(std::iter::repeat_n("  x();", 600));
        lines.push("}");
        assert_eq!(matching_brace(&lines, 1), None);
        assert_eq!(matching_brace(&["a {", "}"], 1), Some(2));
    }
}
