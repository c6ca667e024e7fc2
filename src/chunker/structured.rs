//! Grammar-backed chunking via tree-sitter.
//!
//! Emits a chunk per class-like node and per function or method, top level or
//! nested inside a class body. Function bodies are not descended into.

use std::collections::{HashMap, HashSet};

use tree_sitter::{Node, Parser, Query, QueryCursor, StreamingIterator};

use super::languages::{self, DocStyle, GrammarSpec};
use super::{Chunk, ChunkKind, ChunkerError, SourceFile};

/// Wrappers whose leading comments belong to the definition they wrap.
const ATTACHING_WRAPPERS: &[&str] = &["export_statement", "decorated_definition"];

/// Value kinds that turn a variable declaration into a function.
const FUNCTION_VALUES: &[&str] = &[
    "arrow_function",
    "function",
    "function_expression",
    "generator_function",
];

const BUILTIN_CALLS: &[&str] = &[
    "len", "make", "append", "delete", "print", "println", "panic", "recover", "range", "return",
    "break", "continue", "isinstance", "super", "str", "int", "list", "dict", "set", "Some", "Ok",
    "Err",
];

struct GrammarQueries {
    calls: Option<Query>,
    imports: Option<Query>,
    inherits: Option<Query>,
}

pub struct StructuredParser {
    queries: HashMap<&'static str, GrammarQueries>,
}

fn compile(grammar: &GrammarSpec, src: &str) -> Result<Option<Query>, ChunkerError> {
    if src.trim().is_empty() {
        return Ok(None);
    }
    Query::new(&(grammar.language)(), src)
        .map(Some)
        .map_err(|source| ChunkerError::Query {
            grammar: grammar.id,
            source,
        })
}

impl StructuredParser {
    pub fn new() -> Result<Self, ChunkerError> {
        let mut queries = HashMap::new();
        for grammar in languages::grammars() {
            queries.insert(
                grammar.id,
                GrammarQueries {
                    calls: compile(grammar, grammar.call_query)?,
                    imports: compile(grammar, grammar.import_query)?,
                    inherits: compile(grammar, grammar.inherit_query)?,
                },
            );
        }
        Ok(Self { queries })
    }

    /// Parse and chunk; any syntax error in the tree is reported as failure.
    pub fn chunk(
        &self,
        grammar: &'static GrammarSpec,
        file: &SourceFile,
    ) -> Result<Vec<Chunk>, ChunkerError> {
        let mut parser = Parser::new();
        parser
            .set_language(&(grammar.language)())
            .map_err(|e| ChunkerError::Grammar {
                grammar: grammar.id,
                message: e.to_string(),
            })?;

        let source = file.text.as_bytes();
        let syntax = ChunkerError::Syntax {
            language: file.language,
        };
        let tree = parser.parse(source, None).ok_or(syntax)?;
        let root = tree.root_node();
        if root.has_error() {
            return Err(ChunkerError::Syntax {
                language: file.language,
            });
        }

        let queries = self.queries.get(grammar.id);
        let imports = queries
            .and_then(|q| q.imports.as_ref())
            .map(|q| capture_texts(q, root, source, |_| true))
            .unwrap_or_default();

        let mut walker = Walker {
            grammar,
            queries,
            file,
            source,
            imports,
            out: Vec::new(),
        };
        walker.walk(root, None);

        let mut chunks = walker.out;
        if chunks.is_empty() {
            let mut chunk = file.new_chunk(ChunkKind::File, &file.file_name(), 1, file.lines.len());
            chunk.imports = walker.imports;
            chunks.push(chunk);
        }
        Ok(chunks)
    }
}

struct Walker<'a, 'f> {
    grammar: &'static GrammarSpec,
    queries: Option<&'a GrammarQueries>,
    file: &'a SourceFile<'f>,
    source: &'a [u8],
    imports: Vec<String>,
    out: Vec<Chunk>,
}

impl<'a, 'f> Walker<'a, 'f> {
    fn walk(&mut self, node: Node, parent: Option<&str>) {
        let mut cursor = node.walk();
        let children: Vec<Node> = node.named_children(&mut cursor).collect();
        for child in children {
            let kind = child.kind();
            if self.grammar.class_kinds.contains(&kind) {
                self.emit_class(child, parent);
            } else if self.grammar.function_kinds.contains(&kind) {
                if let Some(name) = self.unit_name(child) {
                    self.emit_function(child, child, name, parent);
                }
            } else if self.grammar.variable_kinds.contains(&kind) {
                self.emit_declared_functions(child, parent);
            } else if self.grammar.wrapper_kinds.contains(&kind) {
                self.walk(child, parent);
            }
        }
    }

    fn emit_class(&mut self, node: Node, parent: Option<&str>) {
        let Some(name) = self.unit_name(node) else {
            return;
        };
        let (start, end) = line_range(node);
        let mut chunk = self.file.new_chunk(ChunkKind::Class, &name, start, end);
        chunk.parent_name = parent.map(str::to_string);
        chunk.signature = self.signature(node, node);
        chunk.doc_comment = self.doc_comment(node, node);
        chunk.bases = self.bases(node);
        chunk.imports = self.imports.clone();
        self.out.push(chunk);

        self.walk(node, Some(&name));
    }

    /// `const handler = async (req) => { .. }` and friends.
    fn emit_declared_functions(&mut self, decl: Node, parent: Option<&str>) {
        let mut cursor = decl.walk();
        let declarators: Vec<Node> = decl.named_children(&mut cursor).collect();
        for declarator in declarators {
            let Some(value) = declarator.child_by_field_name("value") else {
                continue;
            };
            if !FUNCTION_VALUES.contains(&value.kind()) {
                continue;
            }
            if let Some(name) = self.unit_name(declarator) {
                self.emit_function(decl, value, name, parent);
            }
        }
    }

    fn emit_function(&mut self, span: Node, func: Node, name: String, parent: Option<&str>) {
        let (start, end) = line_range(span);
        if end + 1 - start < self.file.limits.min_function_lines {
            return;
        }

        let parent_name = self
            .receiver_type(func)
            .or_else(|| parent.map(str::to_string));
        let kind = if parent_name.is_some() {
            ChunkKind::Method
        } else {
            ChunkKind::Function
        };

        let mut chunk = self.file.new_chunk(kind, &name, start, end);
        chunk.parent_name = parent_name;
        chunk.signature = self.signature(span, func);
        chunk.doc_comment = self.doc_comment(span, func);
        chunk.calls = self.calls(func);
        chunk.imports = self.imports.clone();
        self.out.push(chunk);
    }

    fn text(&self, node: Node) -> &'a str {
        node.utf8_text(self.source).unwrap_or_default()
    }

    fn unit_name(&self, node: Node) -> Option<String> {
        for field in ["name", "type"] {
            if let Some(n) = node.child_by_field_name(field) {
                return clean_type_name(self.text(n));
            }
        }
        // Go: type_declaration -> type_spec(name)
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            if let Some(n) = child.child_by_field_name("name") {
                return clean_type_name(self.text(n));
            }
        }
        None
    }

    /// Go method receivers: `func (s *Server) Handle()` belongs to `Server`.
    fn receiver_type(&self, func: Node) -> Option<String> {
        let receiver = func.child_by_field_name("receiver")?;
        let mut cursor = receiver.walk();
        let param = receiver.named_children(&mut cursor).next()?;
        let ty = param.child_by_field_name("type")?;
        clean_type_name(self.text(ty))
    }

    /// Header text up to the body, whitespace-collapsed.
    fn signature(&self, span: Node, func: Node) -> Option<String> {
        let header = match func.child_by_field_name("body") {
            Some(body) if body.start_byte() > span.start_byte() => self
                .file
                .text
                .get(span.start_byte()..body.start_byte())
                .unwrap_or_default(),
            _ => self.text(span).lines().next().unwrap_or_default(),
        };
        let collapsed = header.split_whitespace().collect::<Vec<_>>().join(" ");
        let trimmed = collapsed
            .trim_end_matches("=>")
            .trim_end()
            .trim_end_matches(['{', ':'])
            .trim_end();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    fn doc_comment(&self, span: Node, func: Node) -> Option<String> {
        match self.grammar.doc_style {
            DocStyle::Docstring => self.docstring(func),
            DocStyle::LeadingComments => self.leading_comments(span),
        }
    }

    fn docstring(&self, func: Node) -> Option<String> {
        let body = func.child_by_field_name("body")?;
        let first = body.named_child(0)?;
        if first.kind() != "expression_statement" {
            return None;
        }
        let string = first.named_child(0)?;
        if string.kind() != "string" {
            return None;
        }
        let mut cursor = string.walk();
        let content = string
            .named_children(&mut cursor)
            .find(|c| c.kind() == "string_content")
            .map(|c| self.text(c))
            .unwrap_or_else(|| self.text(string).trim_matches(['"', '\'']));
        let doc = dedent(content);
        if doc.is_empty() { None } else { Some(doc) }
    }

    fn leading_comments(&self, span: Node) -> Option<String> {
        let mut anchor = span;
        if anchor.prev_named_sibling().is_none() {
            if let Some(p) = anchor.parent() {
                if ATTACHING_WRAPPERS.contains(&p.kind()) {
                    anchor = p;
                }
            }
        }

        let mut lines = Vec::new();
        let mut expected_row = anchor.start_position().row;
        let mut prev = anchor.prev_named_sibling();
        while let Some(node) = prev {
            let kind = node.kind();
            if kind == "attribute_item" || kind == "decorator" {
                expected_row = node.start_position().row;
                prev = node.prev_named_sibling();
                continue;
            }
            if !kind.contains("comment") || node.end_position().row + 1 < expected_row {
                break;
            }
            lines.push(strip_comment_markers(self.text(node)));
            expected_row = node.start_position().row;
            prev = node.prev_named_sibling();
        }

        lines.reverse();
        let doc = lines.join("\n").trim().to_string();
        if doc.is_empty() { None } else { Some(doc) }
    }

    fn calls(&self, func: Node) -> Vec<String> {
        match self.queries.and_then(|q| q.calls.as_ref()) {
            Some(query) => capture_texts(query, func, self.source, |name| {
                !BUILTIN_CALLS.contains(&name)
            }),
            None => Vec::new(),
        }
    }

    fn bases(&self, class: Node) -> Vec<String> {
        let Some(query) = self.queries.and_then(|q| q.inherits.as_ref()) else {
            return Vec::new();
        };
        let class_kinds = self.grammar.class_kinds;
        let mut cursor = QueryCursor::new();
        let mut seen = HashSet::new();
        let mut bases = Vec::new();
        let mut matches = cursor.matches(query, class, self.source);
        while let Some(m) = matches.next() {
            for cap in m.captures {
                if owning_class(cap.node, class_kinds).map(|n| n.id()) != Some(class.id()) {
                    continue;
                }
                let name = self.text(cap.node).trim().to_string();
                if !name.is_empty() && seen.insert(name.clone()) {
                    bases.push(name);
                }
            }
        }
        bases
    }
}

/// Nearest ancestor whose kind is class-like.
fn owning_class<'t>(node: Node<'t>, class_kinds: &[&str]) -> Option<Node<'t>> {
    let mut current = node.parent();
    while let Some(p) = current {
        if class_kinds.contains(&p.kind()) {
            return Some(p);
        }
        current = p.parent();
    }
    None
}

/// Unique, cleaned capture texts in first-seen order.
fn capture_texts(
    query: &Query,
    node: Node,
    source: &[u8],
    keep: impl Fn(&str) -> bool,
) -> Vec<String> {
    let mut cursor = QueryCursor::new();
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let mut matches = cursor.matches(query, node, source);
    while let Some(m) = matches.next() {
        for cap in m.captures {
            let Ok(raw) = cap.node.utf8_text(source) else {
                continue;
            };
            let name = raw.trim().trim_matches(['"', '\'', '`']);
            if name.is_empty() || !keep(name) {
                continue;
            }
            if seen.insert(name.to_string()) {
                out.push(name.to_string());
            }
        }
    }
    out
}

fn line_range(node: Node) -> (usize, usize) {
    let start = node.start_position().row + 1;
    let end_pos = node.end_position();
    let mut end = end_pos.row + 1;
    if end_pos.column == 0 && end > start {
        end -= 1;
    }
    (start, end)
}

/// `*Server`, `&'a Foo<T>` and `Foo<T>` all name `Foo`/`Server`.
fn clean_type_name(raw: &str) -> Option<String> {
    let base = raw.split('<').next().unwrap_or_default();
    let name = base
        .trim()
        .trim_start_matches(['*', '&'])
        .trim_start_matches("mut ")
        .trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

fn strip_comment_markers(raw: &str) -> String {
    raw.lines()
        .map(|line| {
            let line = line.trim();
            let line = line
                .strip_prefix("///")
                .or_else(|| line.strip_prefix("//!"))
                .or_else(|| line.strip_prefix("//"))
                .or_else(|| line.strip_prefix("/**"))
                .or_else(|| line.strip_prefix("/*"))
                .or_else(|| line.strip_prefix('*'))
                .unwrap_or(line);
            line.trim_end_matches("*/").trim()
        })
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn dedent(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
