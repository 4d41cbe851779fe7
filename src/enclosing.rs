//! Smallest structural block around a line interval.
//!
//! The search is a pruned descent: a node that does not contain the interval
//! cannot have a descendant that does. For very large files this could become an
//! interval index without changing the result.

use tree_sitter::{Node, Tree};

use crate::inspector::{line_span, node_text};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Function,
    Class,
    If,
    For,
    While,
    Try,
    With,
    Match,
}

impl BlockKind {
    fn of(kind: &str) -> Option<Self> {
        Some(match kind {
            "function_definition" => Self::Function,
            "class_definition" => Self::Class,
            "if_statement" => Self::If,
            "for_statement" => Self::For,
            "while_statement" => Self::While,
            "try_statement" => Self::Try,
            "with_statement" => Self::With,
            "match_statement" => Self::Match,
            _ => return None,
        })
    }

    pub fn is_definition(self) -> bool {
        matches!(self, Self::Function | Self::Class)
    }

    fn keyword(self) -> &'static str {
        match self {
            Self::Function => "def",
            Self::Class => "class",
            Self::If => "if",
            Self::For => "for",
            Self::While => "while",
            Self::Try => "try",
            Self::With => "with",
            Self::Match => "match",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub kind: BlockKind,
    /// Qualified name for functions/classes, `"<keyword> block"` otherwise.
    pub label: String,
    pub start_line: usize,
    pub end_line: usize,
    pub end_col: Option<usize>,
}

struct Candidate<'t> {
    kind: BlockKind,
    node: Node<'t>,
    start_line: usize,
    end_line: usize,
    end_col: Option<usize>,
}

impl Candidate<'_> {
    fn rank(&self) -> (usize, u8, usize) {
        (
            self.end_line - self.start_line,
            if self.kind.is_definition() { 0 } else { 1 },
            self.start_line,
        )
    }
}

/// Smallest eligible block fully containing `[start, end]` (1-based, inclusive).
///
/// Ties on size prefer functions/classes over control blocks, then the smaller
/// start line. Decorated definitions use the span including their decorators.
pub fn best_enclosing(tree: &Tree, source: &str, start: usize, end: usize) -> Option<Block> {
    let mut candidates = Vec::new();
    gather(tree.root_node(), start, end, &mut candidates);

    let best = candidates.into_iter().min_by_key(Candidate::rank)?;
    let label = if best.kind.is_definition() {
        qualified_name(best.node, source.as_bytes())
    } else {
        format!("{} block", best.kind.keyword())
    };

    Some(Block {
        kind: best.kind,
        label,
        start_line: best.start_line,
        end_line: best.end_line,
        end_col: best.end_col,
    })
}

fn gather<'t>(node: Node<'t>, start: usize, end: usize, out: &mut Vec<Candidate<'t>>) {
    let (node_start, node_end, node_end_col) = line_span(node);
    if node_start > start || node_end < end {
        return;
    }

    if node.kind() == "decorated_definition" {
        if let Some(inner) = node.child_by_field_name("definition") {
            if let Some(kind) = BlockKind::of(inner.kind()) {
                out.push(Candidate {
                    kind,
                    node: inner,
                    start_line: node_start,
                    end_line: node_end,
                    end_col: node_end_col,
                });
            }
        }
    } else if let Some(kind) = BlockKind::of(node.kind()) {
        let wrapped = node
            .parent()
            .map(|p| p.kind() == "decorated_definition")
            .unwrap_or(false);
        if !wrapped {
            out.push(Candidate {
                kind,
                node,
                start_line: node_start,
                end_line: node_end,
                end_col: node_end_col,
            });
        }
    }

    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        gather(child, start, end, out);
    }
}

fn qualified_name(node: Node, source: &[u8]) -> String {
    let mut parts = Vec::new();
    let mut current = Some(node);
    while let Some(n) = current {
        if matches!(n.kind(), "function_definition" | "class_definition") {
            if let Some(name) = n.child_by_field_name("name") {
                parts.push(node_text(source, name).to_string());
            }
        }
        current = n.parent();
    }
    parts.reverse();
    parts.join(".")
}

/// `[start - context, end + context]` clamped to `[1, line_count]`.
///
/// `None` when the interval starts past the end of the file.
pub fn padded_range(start: usize, end: usize, context: usize, line_count: usize) -> Option<(usize, usize)> {
    if line_count == 0 || start > line_count {
        return None;
    }
    let lo = start.saturating_sub(context).max(1);
    let hi = end.saturating_add(context).min(line_count);
    Some((lo, hi.max(lo)))
}
