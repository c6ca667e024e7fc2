//! Extension → language → chunking strategy lookup.
//!
//! Adding a language means adding a row to [`LANGUAGES`]; nothing else in the
//! chunker branches on language names.

use serde::{Deserialize, Serialize};
use tree_sitter::Language;

/// Language families share heuristic patterns and chunk-size limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Family {
    #[serde(rename = "python")]
    Python,
    #[serde(rename = "c_style")]
    CStyle,
    #[serde(rename = "javascript")]
    JavaScript,
    #[serde(rename = "plain")]
    Plain,
}

impl Family {
    pub const ALL: [Family; 4] = [
        Family::Python,
        Family::CStyle,
        Family::JavaScript,
        Family::Plain,
    ];
}

/// How one node kind set of a tree-sitter grammar maps onto chunks.
pub struct GrammarSpec {
    /// Unique per grammar; keys the compiled query cache.
    pub id: &'static str,
    pub language: fn() -> Language,
    /// Node kinds emitted as class chunks.
    pub class_kinds: &'static [&'static str],
    /// Node kinds emitted as function or method chunks.
    pub function_kinds: &'static [&'static str],
    /// Node kinds walked through transparently (bodies, exports, decorators).
    pub wrapper_kinds: &'static [&'static str],
    /// Declarations that become functions when their value is a function literal.
    pub variable_kinds: &'static [&'static str],
    pub doc_style: DocStyle,
    pub call_query: &'static str,
    pub import_query: &'static str,
    pub inherit_query: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocStyle {
    /// First string literal of the body.
    Docstring,
    /// Comment lines directly above the definition.
    LeadingComments,
}

pub struct LanguageSpec {
    pub name: &'static str,
    pub extensions: &'static [&'static str],
    pub family: Family,
    pub grammar: Option<&'static GrammarSpec>,
}

/// The closed set of chunking strategies.
#[derive(Clone, Copy)]
pub enum Strategy {
    Structured(&'static GrammarSpec),
    Heuristic(Family),
    FixedWindow,
}

impl LanguageSpec {
    #[must_use]
    pub fn strategy(&self) -> Strategy {
        match (self.grammar, self.family) {
            (Some(grammar), _) => Strategy::Structured(grammar),
            (None, Family::Plain) => Strategy::FixedWindow,
            (None, family) => Strategy::Heuristic(family),
        }
    }
}

pub static UNKNOWN: LanguageSpec = LanguageSpec {
    name: "unknown",
    extensions: &[],
    family: Family::Plain,
    grammar: None,
};

/// Look up a language by file extension (without the dot, case-insensitive).
#[must_use]
pub fn by_extension(ext: &str) -> &'static LanguageSpec {
    let ext = ext.to_ascii_lowercase();
    LANGUAGES
        .iter()
        .find(|l| l.extensions.contains(&ext.as_str()))
        .unwrap_or(&UNKNOWN)
}

#[must_use]
pub fn by_name(name: &str) -> Option<&'static LanguageSpec> {
    LANGUAGES.iter().find(|l| l.name == name)
}

/// Every extension the table knows about.
#[must_use]
pub fn all_extensions() -> Vec<&'static str> {
    LANGUAGES
        .iter()
        .flat_map(|l| l.extensions.iter().copied())
        .collect()
}

/// Distinct grammars in table order.
pub fn grammars() -> impl Iterator<Item = &'static GrammarSpec> {
    LANGUAGES.iter().filter_map(|l| l.grammar)
}

pub static LANGUAGES: &[LanguageSpec] = &[
    LanguageSpec {
        name: "python",
        extensions: &["py", "pyi"],
        family: Family::Python,
        grammar: Some(&PYTHON),
    },
    LanguageSpec {
        name: "rust",
        extensions: &["rs"],
        family: Family::CStyle,
        grammar: Some(&RUST),
    },
    LanguageSpec {
        name: "go",
        extensions: &["go"],
        family: Family::CStyle,
        grammar: Some(&GO),
    },
    LanguageSpec {
        name: "javascript",
        extensions: &["js", "jsx", "mjs", "cjs"],
        family: Family::JavaScript,
        grammar: Some(&JAVASCRIPT),
    },
    LanguageSpec {
        name: "typescript",
        extensions: &["ts"],
        family: Family::JavaScript,
        grammar: Some(&TYPESCRIPT),
    },
    LanguageSpec {
        name: "typescript",
        extensions: &["tsx"],
        family: Family::JavaScript,
        grammar: Some(&TSX),
    },
    LanguageSpec {
        name: "java",
        extensions: &["java"],
        family: Family::CStyle,
        grammar: None,
    },
    LanguageSpec {
        name: "kotlin",
        extensions: &["kt", "kts"],
        family: Family::CStyle,
        grammar: None,
    },
    LanguageSpec {
        name: "scala",
        extensions: &["scala"],
        family: Family::CStyle,
        grammar: None,
    },
    LanguageSpec {
        name: "csharp",
        extensions: &["cs"],
        family: Family::CStyle,
        grammar: None,
    },
    LanguageSpec {
        name: "swift",
        extensions: &["swift"],
        family: Family::CStyle,
        grammar: None,
    },
    LanguageSpec {
        name: "c",
        extensions: &["c", "h"],
        family: Family::CStyle,
        grammar: None,
    },
    LanguageSpec {
        name: "cpp",
        extensions: &["cpp", "cc", "cxx", "hpp", "hh"],
        family: Family::CStyle,
        grammar: None,
    },
    LanguageSpec {
        name: "php",
        extensions: &["php"],
        family: Family::CStyle,
        grammar: None,
    },
    LanguageSpec {
        name: "dart",
        extensions: &["dart"],
        family: Family::CStyle,
        grammar: None,
    },
    LanguageSpec {
        name: "ruby",
        extensions: &["rb"],
        family: Family::Plain,
        grammar: None,
    },
    LanguageSpec {
        name: "vue",
        extensions: &["vue"],
        family: Family::Plain,
        grammar: None,
    },
    LanguageSpec {
        name: "sql",
        extensions: &["sql"],
        family: Family::Plain,
        grammar: None,
    },
    LanguageSpec {
        name: "bash",
        extensions: &["sh", "bash"],
        family: Family::Plain,
        grammar: None,
    },
    LanguageSpec {
        name: "yaml",
        extensions: &["yaml", "yml"],
        family: Family::Plain,
        grammar: None,
    },
    LanguageSpec {
        name: "json",
        extensions: &["json"],
        family: Family::Plain,
        grammar: None,
    },
    LanguageSpec {
        name: "toml",
        extensions: &["toml"],
        family: Family::Plain,
        grammar: None,
    },
    LanguageSpec {
        name: "xml",
        extensions: &["xml"],
        family: Family::Plain,
        grammar: None,
    },
    LanguageSpec {
        name: "markdown",
        extensions: &["md"],
        family: Family::Plain,
        grammar: None,
    },
];

// ── Grammars ─────────────────────────────────────────────────────────

fn python_language() -> Language {
    tree_sitter_python::LANGUAGE.into()
}

fn rust_language() -> Language {
    tree_sitter_rust::LANGUAGE.into()
}

fn go_language() -> Language {
    tree_sitter_go::LANGUAGE.into()
}

fn javascript_language() -> Language {
    tree_sitter_javascript::LANGUAGE.into()
}

fn typescript_language() -> Language {
    tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()
}

fn tsx_language() -> Language {
    tree_sitter_typescript::LANGUAGE_TSX.into()
}

static PYTHON: GrammarSpec = GrammarSpec {
    id: "python",
    language: python_language,
    class_kinds: &["class_definition"],
    function_kinds: &["function_definition"],
    wrapper_kinds: &["decorated_definition", "block"],
    variable_kinds: &[],
    doc_style: DocStyle::Docstring,
    call_query: r#"
(call
  function: (identifier) @call)
(call
  function: (attribute
    attribute: (identifier) @call))
"#,
    import_query: r#"
(import_statement
  name: (dotted_name) @import)
(import_from_statement
  module_name: (dotted_name) @import)
"#,
    inherit_query: r#"
(class_definition
  superclasses: (argument_list
    (identifier) @inherit))
"#,
};

static RUST: GrammarSpec = GrammarSpec {
    id: "rust",
    language: rust_language,
    class_kinds: &["struct_item", "enum_item", "trait_item", "impl_item"],
    function_kinds: &["function_item"],
    wrapper_kinds: &["declaration_list", "mod_item"],
    variable_kinds: &[],
    doc_style: DocStyle::LeadingComments,
    call_query: r#"
(call_expression
  function: (identifier) @call)
(call_expression
  function: (field_expression
    field: (field_identifier) @call))
(call_expression
  function: (scoped_identifier
    name: (identifier) @call))
"#,
    import_query: r#"
(use_declaration
  argument: (scoped_identifier) @import)
(use_declaration
  argument: (identifier) @import)
(use_declaration
  argument: (use_wildcard) @import)
"#,
    inherit_query: r#"
(impl_item
  trait: (type_identifier) @inherit)
"#,
};

static GO: GrammarSpec = GrammarSpec {
    id: "go",
    language: go_language,
    class_kinds: &["type_declaration"],
    function_kinds: &["function_declaration", "method_declaration"],
    wrapper_kinds: &[],
    variable_kinds: &[],
    doc_style: DocStyle::LeadingComments,
    call_query: r#"
(call_expression
  function: (identifier) @call)
(call_expression
  function: (selector_expression
    field: (field_identifier) @call))
"#,
    import_query: r#"
(import_spec
  path: (interpreted_string_literal) @import)
"#,
    inherit_query: "",
};

const JS_CALL_QUERY: &str = r#"
(call_expression
  function: (identifier) @call)
(call_expression
  function: (member_expression
    property: (property_identifier) @call))
"#;

const JS_IMPORT_QUERY: &str = r#"
(import_statement
  source: (string) @import)
"#;

static JAVASCRIPT: GrammarSpec = GrammarSpec {
    id: "javascript",
    language: javascript_language,
    class_kinds: &["class_declaration"],
    function_kinds: &[
        "function_declaration",
        "generator_function_declaration",
        "method_definition",
    ],
    wrapper_kinds: &["export_statement", "class_body"],
    variable_kinds: &["lexical_declaration", "variable_declaration"],
    doc_style: DocStyle::LeadingComments,
    call_query: JS_CALL_QUERY,
    import_query: JS_IMPORT_QUERY,
    inherit_query: r#"
(class_declaration
  (class_heritage
    (identifier) @inherit))
"#,
};

const TS_CLASS_KINDS: &[&str] = &[
    "class_declaration",
    "abstract_class_declaration",
    "interface_declaration",
];

const TS_FUNCTION_KINDS: &[&str] = &[
    "function_declaration",
    "generator_function_declaration",
    "method_definition",
];

const TS_INHERIT_QUERY: &str = r#"
(class_declaration
  (class_heritage
    (extends_clause
      value: (identifier) @inherit)))
(class_declaration
  (class_heritage
    (implements_clause
      (type_identifier) @inherit)))
"#;

static TYPESCRIPT: GrammarSpec = GrammarSpec {
    id: "typescript",
    language: typescript_language,
    class_kinds: TS_CLASS_KINDS,
    function_kinds: TS_FUNCTION_KINDS,
    wrapper_kinds: &["export_statement", "class_body"],
    variable_kinds: &["lexical_declaration", "variable_declaration"],
    doc_style: DocStyle::LeadingComments,
    call_query: JS_CALL_QUERY,
    import_query: JS_IMPORT_QUERY,
    inherit_query: TS_INHERIT_QUERY,
};

static TSX: GrammarSpec = GrammarSpec {
    id: "tsx",
    language: tsx_language,
    class_kinds: TS_CLASS_KINDS,
    function_kinds: TS_FUNCTION_KINDS,
    wrapper_kinds: &["export_statement", "class_body"],
    variable_kinds: &["lexical_declaration", "variable_declaration"],
    doc_style: DocStyle::LeadingComments,
    call_query: JS_CALL_QUERY,
    import_query: JS_IMPORT_QUERY,
    inherit_query: TS_INHERIT_QUERY,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_by_extension() {
        assert_eq!(by_extension("py").name, "python");
        assert_eq!(by_extension("TSX").name, "typescript");
        assert_eq!(by_extension("java").name, "java");
        assert_eq!(by_extension("nope").name, "unknown");
    }

    #[test]
    fn test_strategies() {
        assert!(matches!(by_extension("rs").strategy(), Strategy::Structured(_)));
        assert!(matches!(
            by_extension("java").strategy(),
            Strategy::Heuristic(Family::CStyle)
        ));
        assert!(matches!(by_extension("yaml").strategy(), Strategy::FixedWindow));
        assert!(matches!(UNKNOWN.strategy(), Strategy::FixedWindow));
    }

    #[test]
    fn test_all_extensions_unique() {
        let exts = all_extensions();
        let unique: std::collections::HashSet<_> = exts.iter().collect();
        assert_eq!(exts.len(), unique.len());
        assert!(exts.contains(&"go"));
    }

    #[test]
    fn test_by_name() {
        assert_eq!(by_name("go").map(|l| l.family), Some(Family::CStyle));
        assert!(by_name("cobol").is_none());
    }
}
