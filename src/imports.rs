use clap::ValueEnum;
use std::collections::BTreeSet;
use std::ops::Range;
use tree_sitter::Node;

use crate::inspector::{node_text, Import};

/// Which imports accompany extracted code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ImportMode {
    #[default]
    None,
    All,
    /// Best-effort: imports whose bound names appear in the selected code.
    Used,
}

/// Narrow `imports` for the code covering `selected` byte ranges.
///
/// `Used` is a heuristic. Dynamic attribute access is invisible to it and
/// wildcard imports are always kept, since their bindings are unknown.
pub fn filter_imports(
    mode: ImportMode,
    imports: &[Import],
    root: Node,
    source: &[u8],
    selected: &[Range<usize>],
) -> Vec<Import> {
    let mut out: Vec<Import> = match mode {
        ImportMode::None => Vec::new(),
        ImportMode::All => imports.to_vec(),
        ImportMode::Used => {
            let used = used_identifiers(root, source, selected);
            imports
                .iter()
                .filter(|i| i.is_wildcard() || i.provided.iter().any(|n| used.contains(n)))
                .cloned()
                .collect()
        }
    };
    out.sort_by_key(|i| (i.start_line, i.end_line));
    out
}

/// Root identifiers referenced inside `selected`. For `a.b.c` only `a` is
/// recorded; keyword-argument names are not references.
pub fn used_identifiers(root: Node, source: &[u8], selected: &[Range<usize>]) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    collect_roots(root, source, selected, &mut out);
    out
}

fn overlaps(node: &Node, ranges: &[Range<usize>]) -> bool {
    let r = node.byte_range();
    ranges.iter().any(|s| r.start < s.end && s.start < r.end)
}

fn inside(node: &Node, ranges: &[Range<usize>]) -> bool {
    let r = node.byte_range();
    ranges.iter().any(|s| s.start <= r.start && r.end <= s.end)
}

fn collect_roots(node: Node, source: &[u8], selected: &[Range<usize>], out: &mut BTreeSet<String>) {
    if !overlaps(&node, selected) {
        return;
    }

    match node.kind() {
        "identifier" => {
            if inside(&node, selected) {
                out.insert(node_text(source, node).to_string());
            }
        }
        "attribute" => {
            if let Some(object) = node.child_by_field_name("object") {
                collect_roots(object, source, selected, out);
            }
        }
        "keyword_argument" => {
            if let Some(value) = node.child_by_field_name("value") {
                collect_roots(value, source, selected, out);
            }
        }
        _ => {
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                collect_roots(child, source, selected, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspector::{index_source, IndexOptions};
    use crate::slicer::{MatchSpan, SourceText};

    fn run(src: &str, def: &str, mode: ImportMode) -> Vec<Vec<String>> {
        let idx = index_source(src, IndexOptions::default()).unwrap();
        let d = idx
            .definitions
            .iter()
            .find(|d| d.qualified_name == def)
            .unwrap();
        let kept = filter_imports(
            mode,
            &idx.imports,
            idx.tree.root_node(),
            src.as_bytes(),
            &[SourceText::new(src).byte_range(&MatchSpan::of_definition(d))],
        );
        kept.iter()
            .map(|i| i.provided.iter().cloned().collect())
            .collect()
    }

    const SRC: &str = "\
import os
from sys import path as p
from helpers import *
import json

def work():
    return os.getcwd()

def other(data):
    return json.dumps(data, indent=p)
";

    #[test]
    fn used_mode_keeps_referenced_roots_and_wildcards() {
        let kept = run(SRC, "work", ImportMode::Used);
        assert_eq!(kept, vec![vec!["os".to_string()], vec!["*".to_string()]]);
    }

    #[test]
    fn keyword_values_count_but_names_do_not() {
        let kept = run(SRC, "other", ImportMode::Used);
        assert_eq!(
            kept,
            vec![
                vec!["p".to_string()],
                vec!["*".to_string()],
                vec!["json".to_string()]
            ]
        );
    }

    #[test]
    fn attribute_segments_are_not_references() {
        let src = "import getcwd\nimport os\n\ndef f():\n    return os.getcwd()\n";
        let kept = run(src, "f", ImportMode::Used);
        assert_eq!(kept, vec![vec!["os".to_string()]]);
    }

    #[test]
    fn used_is_a_subset_of_all() {
        for def in ["work", "other"] {
            let all = run(SRC, def, ImportMode::All);
            let used = run(SRC, def, ImportMode::Used);
            assert!(used.iter().all(|u| all.contains(u)));
        }
        assert!(run(SRC, "work", ImportMode::None).is_empty());
    }
}
