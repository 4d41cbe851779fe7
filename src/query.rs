use regex::Regex;
use std::sync::OnceLock;

use crate::enclosing::{best_enclosing, padded_range};
use crate::error::PfError;
use crate::inspector::{Definition, FileIndex};
use crate::slicer::{MatchSpan, SourceText};

/// What the user asked for, classified once per run.
#[derive(Debug, Clone)]
pub enum Query {
    /// Exact name; a dotted query compares qualified names.
    Name(String),
    /// Unanchored search over qualified names.
    Regex(Regex),
    /// Literal `start-end` interval.
    Lines { start: usize, end: usize },
    /// `~start-end`: smallest enclosing block, else a padded interval.
    SmartLines { start: usize, end: usize },
    /// First line whose content matches, resolved as a smart range.
    At(Regex),
    /// Definitions for display, optionally filtered.
    List(Option<NameFilter>),
}

#[derive(Debug, Clone)]
pub enum NameFilter {
    Exact(String),
    Pattern(Regex),
}

impl NameFilter {
    pub fn matches(&self, def: &Definition) -> bool {
        match self {
            Self::Exact(name) => name_matches(name, def),
            Self::Pattern(re) => re.is_match(&def.qualified_name),
        }
    }
}

fn range_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(~)?(\d+)(?:-(\d+))?$").unwrap())
}

/// True for `N-M`, `~N-M`, `N` and `~N`.
pub fn looks_like_range(s: &str) -> bool {
    range_re().is_match(s.trim())
}

/// Parse `N-M` / `~N-M` into `(start, end, smart)`.
pub fn parse_line_range(s: &str) -> Result<(usize, usize, bool), PfError> {
    let s = s.trim();
    let caps = range_re()
        .captures(s)
        .ok_or_else(|| PfError::usage(format!("invalid line range '{s}' (expected START-END or ~START-END)")))?;

    let number = |m: Option<regex::Match>| -> Result<Option<usize>, PfError> {
        m.map(|m| {
            m.as_str()
                .parse::<usize>()
                .map_err(|_| PfError::usage(format!("line number out of range in '{s}'")))
        })
        .transpose()
    };

    let start = number(caps.get(2))?.unwrap_or(0);
    let end = number(caps.get(3))?.unwrap_or(start);
    if start == 0 || end < start {
        return Err(PfError::usage(format!(
            "invalid line range '{s}': lines are 1-based and START must not exceed END"
        )));
    }
    Ok((start, end, caps.get(1).is_some()))
}

pub fn compile_pattern(pattern: &str) -> Result<Regex, PfError> {
    Regex::new(pattern).map_err(|e| PfError::usage(format!("invalid regex '{pattern}': {e}")))
}

/// Dotted names compare against the qualified name, plain names against the
/// simple name.
pub fn name_matches(query: &str, def: &Definition) -> bool {
    if query.contains('.') {
        def.qualified_name == query
    } else {
        def.name == query
    }
}

impl Query {
    pub fn range(text: &str) -> Result<Self, PfError> {
        let (start, end, smart) = parse_line_range(text)?;
        Ok(if smart {
            Self::SmartLines { start, end }
        } else {
            Self::Lines { start, end }
        })
    }

    /// Name, regex and list queries only make sense for parsed files.
    pub fn needs_structure(&self) -> bool {
        matches!(self, Self::Name(_) | Self::Regex(_) | Self::List(_))
    }

    /// Literal every matching file must contain, used to skip files early.
    pub fn needle(&self) -> Option<&str> {
        match self {
            Self::Name(name) => name.rsplit('.').next().filter(|s| !s.is_empty()),
            Self::List(Some(NameFilter::Exact(name))) => name.rsplit('.').next().filter(|s| !s.is_empty()),
            _ => None,
        }
    }
}

/// Matching definitions in ascending span order.
pub fn select_definitions<'d>(query: &Query, defs: &'d [Definition], first_only: bool) -> Vec<&'d Definition> {
    let mut hits: Vec<&Definition> = defs
        .iter()
        .filter(|d| match query {
            Query::Name(name) => name_matches(name, d),
            Query::Regex(re) => re.is_match(&d.qualified_name),
            Query::List(None) => true,
            Query::List(Some(filter)) => filter.matches(d),
            _ => false,
        })
        .collect();
    if first_only {
        hits.truncate(1);
    }
    hits
}

/// Per-file inputs for span resolution.
pub struct Resolver<'a> {
    pub text: &'a SourceText<'a>,
    pub source: &'a str,
    /// `None` for files without a structural parse.
    pub index: Option<&'a FileIndex>,
    pub context: usize,
    pub first_only: bool,
}

impl Resolver<'_> {
    pub fn resolve(&self, query: &Query) -> Vec<MatchSpan> {
        match query {
            Query::Name(_) | Query::Regex(_) => match self.index {
                Some(index) => select_definitions(query, &index.definitions, self.first_only)
                    .into_iter()
                    .map(MatchSpan::of_definition)
                    .collect(),
                None => Vec::new(),
            },
            Query::Lines { start, end } => self.raw_lines(*start, *end).into_iter().collect(),
            Query::SmartLines { start, end } => self.smart_lines(*start, *end).into_iter().collect(),
            Query::At(re) => {
                let Some(line) = self.text.lines().find(|(_, l)| re.is_match(l)).map(|(n, _)| n) else {
                    return Vec::new();
                };
                self.smart_lines(line, line)
                    .map(|s| s.with_note(format!("match line {line}")))
                    .into_iter()
                    .collect()
            }
            Query::List(_) => Vec::new(),
        }
    }

    fn raw_lines(&self, start: usize, end: usize) -> Option<MatchSpan> {
        let (lo, hi) = padded_range(start, end, self.context, self.text.line_count())?;
        Some(MatchSpan::lines(format!("lines {start}-{end}"), lo, hi))
    }

    fn smart_lines(&self, start: usize, end: usize) -> Option<MatchSpan> {
        let line_count = self.text.line_count();
        let block = self
            .index
            .and_then(|index| best_enclosing(&index.tree, self.source, start, end.min(line_count)));

        match block {
            Some(block) if self.context == 0 => Some(
                MatchSpan::lines(block.label, block.start_line, block.end_line).with_end_col(block.end_col),
            ),
            Some(block) => {
                let (lo, hi) = padded_range(block.start_line, block.end_line, self.context, line_count)?;
                Some(MatchSpan::lines(block.label, lo, hi))
            }
            None => {
                let (lo, hi) = padded_range(start, end, self.context.max(FALLBACK_CONTEXT), line_count)?;
                Some(MatchSpan::lines(format!("lines {start}-{end} (padded)"), lo, hi))
            }
        }
    }
}

/// Lines shown around a smart range that has no enclosing block.
pub const FALLBACK_CONTEXT: usize = 5;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspector::{index_source, IndexOptions};

    fn scenario_source() -> String {
        // foo at 10-16, C at 18-23 with C.foo at 20-23, module statement at 25.
        let mut lines: Vec<String> = (1..=9).map(|i| format!("x{i} = {i}")).collect();
        lines.push("def foo():".into()); // 10
        for i in 11..=16 {
            lines.push(format!("    y{i} = {i}"));
        }
        lines.push(String::new()); // 17
        lines.push("class C:".into()); // 18
        lines.push("    attr = 1".into()); // 19
        lines.push("    def foo(self):".into()); // 20
        lines.push("        a = 1".into());
        lines.push("        b = 2".into());
        lines.push("        return a + b".into()); // 23
        lines.push(String::new()); // 24
        lines.push("print('module level')".into()); // 25
        let mut out = lines.join("\n");
        out.push('\n');
        out
    }

    fn spans(src: &str, query: &Query, context: usize, first_only: bool) -> Vec<(String, usize, usize)> {
        let index = index_source(src, IndexOptions::default()).unwrap();
        let text = SourceText::new(src);
        let resolver = Resolver {
            text: &text,
            source: src,
            index: Some(&index),
            context,
            first_only,
        };
        resolver
            .resolve(query)
            .into_iter()
            .map(|s| (s.display_label(), s.start_line, s.end_line))
            .collect()
    }

    #[test]
    fn plain_name_matches_all_redefinitions_in_order() {
        let src = scenario_source();
        assert_eq!(
            spans(&src, &Query::Name("foo".into()), 0, false),
            vec![("foo".to_string(), 10, 16), ("C.foo".to_string(), 20, 23)]
        );
        assert_eq!(
            spans(&src, &Query::Name("foo".into()), 0, true),
            vec![("foo".to_string(), 10, 16)]
        );
    }

    #[test]
    fn dotted_name_compares_qualified_name() {
        let src = scenario_source();
        assert_eq!(
            spans(&src, &Query::Name("C.foo".into()), 0, false),
            vec![("C.foo".to_string(), 20, 23)]
        );
    }

    #[test]
    fn regex_searches_unanchored() {
        let src = scenario_source();
        let got = spans(&src, &Query::Regex(compile_pattern("^C").unwrap()), 0, false);
        assert_eq!(got, vec![("C".to_string(), 18, 23), ("C.foo".to_string(), 20, 23)]);
        assert!(compile_pattern("(unclosed").is_err());
    }

    #[test]
    fn smart_range_inside_function_returns_function() {
        let src = scenario_source();
        assert_eq!(
            spans(&src, &Query::range("~15-15").unwrap(), 0, false),
            vec![("foo".to_string(), 10, 16)]
        );
    }

    #[test]
    fn smart_range_repads_around_block_with_context() {
        let src = scenario_source();
        assert_eq!(
            spans(&src, &Query::range("~21-22").unwrap(), 1, false),
            vec![("C.foo".to_string(), 19, 24)]
        );
    }

    #[test]
    fn smart_range_falls_back_to_padded_lines() {
        let src = scenario_source();
        assert_eq!(
            spans(&src, &Query::range("~3-3").unwrap(), 0, false),
            vec![("lines 3-3 (padded)".to_string(), 1, 8)]
        );
    }

    #[test]
    fn raw_range_ignores_structure() {
        let src = scenario_source();
        assert_eq!(
            spans(&src, &Query::range("15-15").unwrap(), 0, false),
            vec![("lines 15-15".to_string(), 15, 15)]
        );
        assert_eq!(
            spans(&src, &Query::range("24-30").unwrap(), 2, false),
            vec![("lines 24-30".to_string(), 22, 25)]
        );
    }

    #[test]
    fn content_pattern_resolves_first_match() {
        let src = scenario_source();
        let re = compile_pattern(r"return a \+ b").unwrap();
        assert_eq!(
            spans(&src, &Query::At(re), 0, false),
            vec![("C.foo [match line 23]".to_string(), 20, 23)]
        );
        let missing = compile_pattern("no such text").unwrap();
        assert!(spans(&src, &Query::At(missing), 0, false).is_empty());
    }

    #[test]
    fn range_parsing() {
        assert_eq!(parse_line_range("3-7").unwrap(), (3, 7, false));
        assert_eq!(parse_line_range("~12").unwrap(), (12, 12, true));
        assert!(parse_line_range("7-3").is_err());
        assert!(parse_line_range("0-3").is_err());
        assert!(parse_line_range("a-b").is_err());
        assert!(looks_like_range("~1-2"));
        assert!(!looks_like_range("foo"));
    }

    #[test]
    fn needle_is_last_segment() {
        assert_eq!(Query::Name("C.method".into()).needle(), Some("method"));
        assert_eq!(Query::range("1-2").unwrap().needle(), None);
    }
}
