use std::collections::BTreeSet;
use tree_sitter::{Language, Node, Parser, Tree};

use crate::error::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefKind {
    Function,
    Class,
}

/// A named, nestable declaration found in one parse pass.
#[derive(Debug, Clone)]
pub struct Definition {
    /// Dot-joined enclosing class/function names plus `name`.
    pub qualified_name: String,
    pub name: String,
    pub kind: DefKind,

    /// 1-based; lowered to the first decorator line when decorated.
    pub start_line: usize,

    /// 1-based, inclusive.
    pub end_line: usize,

    pub start_col: usize,

    /// Byte column where the node ends on `end_line`; `None` when it ends at a
    /// line break and the whole line belongs to it.
    pub end_col: Option<usize>,

    pub is_async: bool,

    /// Number of enclosing classes/functions.
    pub depth: usize,

}

impl Definition {
    pub fn span_len(&self) -> usize {
        self.end_line - self.start_line
    }

    pub fn contains_line(&self, line: usize) -> bool {
        self.start_line <= line && line <= self.end_line
    }

    /// Identifies one definition; same-name redefinitions differ here.
    pub fn span_key(&self) -> (usize, usize, usize, usize) {
        (
            self.start_line,
            self.start_col,
            self.end_line,
            self.end_col.unwrap_or(usize::MAX),
        )
    }
}

/// An import statement at module or class scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub start_line: usize,
    pub end_line: usize,

    /// Identifiers the statement binds; `"*"` for a wildcard import.
    pub provided: BTreeSet<String>,
}

impl Import {
    pub fn is_wildcard(&self) -> bool {
        self.provided.contains(WILDCARD)
    }
}

pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, Copy, Default)]
pub struct IndexOptions {
    /// Also emit definitions nested inside function bodies.
    pub nested: bool,
}

pub struct FileIndex {
    pub tree: Tree,
    pub definitions: Vec<Definition>,
    pub imports: Vec<Import>,
}

pub fn python_language() -> Language {
    tree_sitter_python::LANGUAGE.into()
}

/// Parse Python source. Any `ERROR`/`MISSING` node in the tree is reported as
/// a [`ParseError`] positioned at the first such node.
pub fn parse_python(source: &str) -> Result<Tree, ParseError> {
    let mut parser = Parser::new();
    parser
        .set_language(&python_language())
        .map_err(|e| ParseError {
            line: 1,
            column: 1,
            message: format!("failed to load Python grammar: {e}"),
        })?;

    let tree = parser.parse(source, None).ok_or_else(|| ParseError {
        line: 1,
        column: 1,
        message: "parser produced no tree".to_string(),
    })?;

    let root = tree.root_node();
    if root.has_error() {
        if let Some(bad) = first_error_node(root) {
            let pos = bad.start_position();
            let message = if bad.is_missing() {
                format!("missing `{}`", bad.kind())
            } else {
                "invalid syntax".to_string()
            };
            return Err(ParseError {
                line: pos.row + 1,
                column: pos.column + 1,
                message,
            });
        }
    }

    Ok(tree)
}

fn first_error_node(node: Node) -> Option<Node> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    if !node.has_error() {
        return None;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if let Some(found) = first_error_node(child) {
            return Some(found);
        }
    }
    None
}

/// Parse `source` and collect its definitions and module/class-scope imports.
pub fn index_source(source: &str, opts: IndexOptions) -> Result<FileIndex, ParseError> {
    let tree = parse_python(source)?;
    let (definitions, imports) = collect(&tree, source, opts);
    Ok(FileIndex {
        tree,
        definitions,
        imports,
    })
}

/// Definitions and imports from an already parsed tree.
pub fn collect(tree: &Tree, source: &str, opts: IndexOptions) -> (Vec<Definition>, Vec<Import>) {
    let mut walker = Walker {
        source: source.as_bytes(),
        opts,
        definitions: Vec::new(),
        imports: Vec::new(),
    };
    walker.walk(tree.root_node(), &Scope::default());

    let mut definitions = walker.definitions;
    definitions.sort_by_key(Definition::span_key);
    definitions.dedup_by(|a, b| a.span_key() == b.span_key());

    let mut imports = walker.imports;
    imports.sort_by_key(|i| (i.start_line, i.end_line));

    (definitions, imports)
}

/// Enclosing class and function names. Each descent builds a new value so
/// sibling subtrees never observe each other's names.
#[derive(Debug, Clone, Default)]
struct Scope {
    classes: Vec<String>,
    functions: Vec<String>,
    function_depth: usize,
}

impl Scope {
    fn qualify(&self, name: &str) -> String {
        let mut parts: Vec<&str> = self.classes.iter().map(String::as_str).collect();
        parts.extend(self.functions.iter().map(String::as_str));
        parts.push(name);
        parts.join(".")
    }

    fn depth(&self) -> usize {
        self.classes.len() + self.functions.len()
    }

    fn enter_class(&self, name: &str) -> Scope {
        let mut next = self.clone();
        next.classes.push(name.to_string());
        next
    }

    fn enter_function(&self, name: &str) -> Scope {
        let mut next = self.clone();
        next.functions.push(name.to_string());
        next.function_depth += 1;
        next
    }
}

struct Walker<'s> {
    source: &'s [u8],
    opts: IndexOptions,
    definitions: Vec<Definition>,
    imports: Vec<Import>,
}

impl<'s> Walker<'s> {
    fn walk(&mut self, node: Node, scope: &Scope) {
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            match child.kind() {
                "function_definition" | "class_definition" => self.visit_definition(child, None, scope),
                "decorated_definition" => {
                    if let Some(inner) = child.child_by_field_name("definition") {
                        self.visit_definition(inner, Some(child), scope);
                    }
                }
                "import_statement" | "import_from_statement" | "future_import_statement" => {
                    if scope.function_depth == 0 {
                        self.imports.push(self.import_of(child));
                    }
                }
                _ => self.walk(child, scope),
            }
        }
    }

    fn visit_definition(&mut self, node: Node, decorated: Option<Node>, scope: &Scope) {
        let Some(name) = node
            .child_by_field_name("name")
            .map(|n| node_text(self.source, n).to_string())
        else {
            return;
        };

        let outer = decorated.unwrap_or(node);
        let (start_line, end_line, end_col) = line_span(outer);
        let kind = if node.kind() == "class_definition" {
            DefKind::Class
        } else {
            DefKind::Function
        };

        self.definitions.push(Definition {
            qualified_name: scope.qualify(&name),
            name: name.clone(),
            kind,
            start_line,
            end_line,
            start_col: outer.start_position().column,
            end_col,
            is_async: kind == DefKind::Function && is_async_def(node),
            depth: scope.depth(),
        });

        let Some(body) = node.child_by_field_name("body") else {
            return;
        };
        match kind {
            DefKind::Class => self.walk(body, &scope.enter_class(&name)),
            DefKind::Function => {
                if self.opts.nested {
                    self.walk(body, &scope.enter_function(&name));
                }
            }
        }
    }

    fn import_of(&self, node: Node) -> Import {
        let (start_line, end_line, _) = line_span(node);
        let mut provided = BTreeSet::new();

        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            if child.kind() == "wildcard_import" {
                provided.insert(WILDCARD.to_string());
            }
        }

        let plain = node.kind() == "import_statement";
        let mut cursor = node.walk();
        for name in node.children_by_field_name("name", &mut cursor) {
            match name.kind() {
                "aliased_import" => {
                    if let Some(alias) = name.child_by_field_name("alias") {
                        provided.insert(node_text(self.source, alias).to_string());
                    }
                }
                _ => {
                    let text = node_text(self.source, name);
                    let bound = if plain {
                        text.split('.').next().unwrap_or(text)
                    } else {
                        text.rsplit('.').next().unwrap_or(text)
                    };
                    provided.insert(bound.trim().to_string());
                }
            }
        }

        Import {
            start_line,
            end_line,
            provided,
        }
    }
}

fn is_async_def(node: Node) -> bool {
    node.child(0).map(|c| c.kind() == "async").unwrap_or(false)
}

pub(crate) fn node_text<'a>(source: &'a [u8], node: Node) -> &'a str {
    std::str::from_utf8(&source[node.start_byte()..node.end_byte()]).unwrap_or("")
}

/// 1-based `(start_line, end_line, end_col)` of a node. A node whose end point
/// sits at column 0 of a later row ends on the previous line, in full.
pub(crate) fn line_span(node: Node) -> (usize, usize, Option<usize>) {
    let start = node.start_position();
    let end = node.end_position();
    if end.column == 0 && end.row > start.row {
        (start.row + 1, end.row, None)
    } else {
        (start.row + 1, end.row + 1, Some(end.column))
    }
}
