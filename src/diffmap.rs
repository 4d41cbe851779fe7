//! Map changed lines from a diff onto the functions that contain them.
//!
//! Functions and methods are the definitions a change selects. Lines outside
//! every function fall into a `class <name>` bucket for their innermost class,
//! or into `module`; those buckets are shown as merged, padded line ranges.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

use crate::inspector::{DefKind, Definition};
use crate::slicer::MatchSpan;

pub const MODULE_BUCKET: &str = "module";

/// Label of the structure-agnostic view used for files without a parse.
pub const CHANGES_BUCKET: &str = "changes";

/// Changed line numbers clamped to `[1, line_count]` and deduplicated.
pub fn changed_line_set(lines: impl IntoIterator<Item = usize>, line_count: usize) -> BTreeSet<usize> {
    let upper = line_count.max(1);
    lines.into_iter().map(|l| l.clamp(1, upper)).collect()
}

/// Position of a definition: start line, start column, end line, end column.
pub type SpanKey = (usize, usize, usize, usize);

#[derive(Debug, Clone, Default)]
pub struct DiffMapping {
    /// Touched functions keyed by span, so same-name redefinitions stay apart.
    pub definitions: BTreeMap<SpanKey, Definition>,
    /// Bucket label -> changed lines not inside any function.
    pub buckets: BTreeMap<String, Vec<usize>>,
}

fn innermost<'d>(defs: impl Iterator<Item = &'d Definition>, line: usize) -> Option<&'d Definition> {
    defs.filter(|d| d.contains_line(line))
        .min_by_key(|d| (d.span_len(), d.start_line, Reverse(d.depth)))
}

/// Assign every changed line to exactly one definition or bucket.
pub fn map_changed_lines(changed: &BTreeSet<usize>, definitions: &[Definition]) -> DiffMapping {
    let mut mapping = DiffMapping::default();

    for &line in changed {
        let functions = definitions.iter().filter(|d| d.kind == DefKind::Function);
        if let Some(def) = innermost(functions, line) {
            mapping
                .definitions
                .entry(def.span_key())
                .or_insert_with(|| def.clone());
            continue;
        }

        let classes = definitions.iter().filter(|d| d.kind == DefKind::Class);
        let bucket = match innermost(classes, line) {
            Some(class) => format!("class {}", class.qualified_name),
            None => MODULE_BUCKET.to_string(),
        };
        mapping.buckets.entry(bucket).or_default().push(line);
    }

    mapping
}

/// Expand each line by `context` and merge intervals whose gap is at most one
/// line. Output is ascending.
pub fn merge_padded(lines: &BTreeSet<usize>, context: usize, line_count: usize) -> Vec<(usize, usize)> {
    let upper = line_count.max(1);
    let mut out: Vec<(usize, usize)> = Vec::new();
    for &line in lines {
        let lo = line.saturating_sub(context).max(1);
        let hi = line.saturating_add(context).min(upper);
        match out.last_mut() {
            Some(last) if lo <= last.1 + 2 => last.1 = last.1.max(hi),
            _ => out.push((lo, hi)),
        }
    }
    out
}

/// Remove the parts of `ranges` covered by `taken`.
fn subtract(ranges: Vec<(usize, usize)>, taken: &[(usize, usize)]) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    for (mut lo, hi) in ranges {
        let mut cut = taken
            .iter()
            .filter(|(s, e)| *s <= hi && *e >= lo)
            .copied()
            .collect::<Vec<_>>();
        cut.sort_unstable();
        for (s, e) in cut {
            if s > lo {
                out.push((lo, s - 1));
            }
            lo = lo.max(e + 1);
        }
        if lo <= hi {
            out.push((lo, hi));
        }
    }
    out
}

impl DiffMapping {
    /// Output spans: whole definitions, then padded bucket ranges that never
    /// overlap a selected definition.
    pub fn into_spans(self, context: usize, line_count: usize) -> Vec<MatchSpan> {
        let taken: Vec<(usize, usize)> = self
            .definitions
            .values()
            .map(|d| (d.start_line, d.end_line))
            .collect();

        let mut spans: Vec<MatchSpan> = self
            .definitions
            .values()
            .map(MatchSpan::of_definition)
            .collect();

        for (label, lines) in self.buckets {
            let set: BTreeSet<usize> = lines.into_iter().collect();
            for (lo, hi) in subtract(merge_padded(&set, context, line_count), &taken) {
                spans.push(MatchSpan::lines(format!("{label} (lines {lo}-{hi})"), lo, hi));
            }
        }

        spans.sort_by_key(|s| (s.start_line, s.end_line));
        spans
    }
}

/// Structure-agnostic view: padded, merged ranges straight from the lines.
pub fn fallback_spans(changed: &BTreeSet<usize>, context: usize, line_count: usize) -> Vec<MatchSpan> {
    merge_padded(changed, context, line_count)
        .into_iter()
        .map(|(lo, hi)| MatchSpan::lines(format!("{CHANGES_BUCKET} (lines {lo}-{hi})"), lo, hi))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspector::{index_source, IndexOptions};

    fn source() -> String {
        let mut lines: Vec<String> = (1..=9).map(|i| format!("x{i} = {i}")).collect();
        lines.push("def foo():".into()); // 10
        for i in 11..=16 {
            lines.push(format!("    y{i} = {i}"));
        }
        lines.push(String::new()); // 17
        lines.push("class C:".into()); // 18
        lines.push("    attr = 1".into()); // 19
        lines.push("    def m(self):".into()); // 20
        lines.push("        def inner():".into()); // 21
        lines.push("            return 1".into()); // 22
        lines.push("        return inner".into()); // 23
        lines.push(String::new()); // 24
        for i in 25..=35 {
            lines.push(format!("z{i} = {i}"));
        }
        lines.join("\n") + "\n"
    }

    fn defs() -> Vec<Definition> {
        index_source(&source(), IndexOptions { nested: true }).unwrap().definitions
    }

    fn names(mapping: &DiffMapping) -> Vec<&str> {
        mapping.definitions.values().map(|d| d.qualified_name.as_str()).collect()
    }

    #[test]
    fn function_and_module_scenario() {
        let changed = changed_line_set([11, 25], 35);
        let mapping = map_changed_lines(&changed, &defs());
        assert_eq!(names(&mapping), vec!["foo"]);
        assert_eq!(mapping.buckets.get(MODULE_BUCKET), Some(&vec![25]));

        let spans = mapping.into_spans(3, 35);
        let got: Vec<(String, usize, usize)> =
            spans.into_iter().map(|s| (s.label, s.start_line, s.end_line)).collect();
        assert_eq!(
            got,
            vec![
                ("foo".to_string(), 10, 16),
                ("module (lines 22-28)".to_string(), 22, 28),
            ]
        );
    }

    #[test]
    fn innermost_nested_function_wins_and_is_recorded_once() {
        let changed = changed_line_set([22, 22, 21], 35);
        let mapping = map_changed_lines(&changed, &defs());
        assert_eq!(names(&mapping), vec!["C.m.inner"]);
    }

    #[test]
    fn class_body_lines_use_the_class_bucket() {
        let changed = changed_line_set([19], 35);
        let mapping = map_changed_lines(&changed, &defs());
        assert!(mapping.definitions.is_empty());
        assert_eq!(mapping.buckets.get("class C"), Some(&vec![19]));
    }

    #[test]
    fn buckets_partition_the_changed_lines() {
        let changed = changed_line_set(1..=40, 35);
        let mapping = map_changed_lines(&changed, &defs());
        let functions: Vec<&Definition> = mapping.definitions.values().collect();

        let mut bucketed: Vec<usize> = mapping.buckets.values().flatten().copied().collect();
        bucketed.sort_unstable();
        let before = bucketed.len();
        bucketed.dedup();
        assert_eq!(bucketed.len(), before);

        for line in &changed {
            let in_function = functions.iter().any(|d| d.contains_line(*line));
            assert_ne!(in_function, bucketed.contains(line), "line {line}");
        }
    }

    #[test]
    fn redefinitions_are_mapped_separately() {
        let src = "if FAST:\n    def impl():\n        return 1\nelse:\n    def impl():\n        return 2\n";
        let defs = index_source(src, IndexOptions { nested: true }).unwrap().definitions;

        let mapping = map_changed_lines(&changed_line_set([3, 6], 6), &defs);
        assert_eq!(names(&mapping), vec!["impl", "impl"]);
        let got: Vec<(usize, usize)> = mapping
            .into_spans(0, 6)
            .iter()
            .map(|s| (s.start_line, s.end_line))
            .collect();
        assert_eq!(got, vec![(2, 3), (5, 6)]);

        let only_second = map_changed_lines(&changed_line_set([6], 6), &defs).into_spans(0, 6);
        assert_eq!(only_second.len(), 1);
        assert_eq!((only_second[0].start_line, only_second[0].end_line), (5, 6));
    }

    #[test]
    fn padding_merges_small_gaps_only() {
        let lines: BTreeSet<usize> = [5, 9, 20].into_iter().collect();
        assert_eq!(merge_padded(&lines, 1, 30), vec![(4, 10), (19, 21)]);
        let lines: BTreeSet<usize> = [1, 30].into_iter().collect();
        assert_eq!(merge_padded(&lines, 3, 30), vec![(1, 4), (27, 30)]);
    }

    #[test]
    fn context_ranges_never_overlap_selected_definitions() {
        let changed = changed_line_set([9, 12], 35);
        let spans = map_changed_lines(&changed, &defs()).into_spans(3, 35);
        let got: Vec<(usize, usize)> = spans.iter().map(|s| (s.start_line, s.end_line)).collect();
        assert_eq!(got, vec![(6, 9), (10, 16)]);
    }

    #[test]
    fn fallback_view_uses_only_line_numbers() {
        let changed = changed_line_set([0, 2, 50], 10);
        let spans = fallback_spans(&changed, 1, 10);
        let got: Vec<(usize, usize)> = spans.iter().map(|s| (s.start_line, s.end_line)).collect();
        assert_eq!(got, vec![(1, 3), (9, 10)]);
    }
}
