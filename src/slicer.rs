use serde::Serialize;
use std::io::{self, Write};
use std::ops::Range;

use crate::inspector::Definition;

/// Line separating attached imports from the code they belong to.
pub const IMPORT_DELIMITER: &str = "# ...";

/// One unit of output: a definition, a block, or a line range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchSpan {
    pub label: String,
    pub start_line: usize,
    pub end_line: usize,

    /// Byte column the text stops at on `end_line`; `None` takes the full line.
    pub end_col: Option<usize>,

    pub note: Option<String>,
}

impl MatchSpan {
    pub fn lines(label: impl Into<String>, start_line: usize, end_line: usize) -> Self {
        Self {
            label: label.into(),
            start_line,
            end_line,
            end_col: None,
            note: None,
        }
    }

    pub fn of_definition(def: &Definition) -> Self {
        Self {
            label: def.qualified_name.clone(),
            start_line: def.start_line,
            end_line: def.end_line,
            end_col: def.end_col,
            note: None,
        }
    }

    pub fn with_end_col(mut self, end_col: Option<usize>) -> Self {
        self.end_col = end_col;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Move the start down to `start_line`. A `... (lines a-b)` label is
    /// rewritten so it keeps naming the printed range.
    fn clip_start(&mut self, start_line: usize) {
        self.start_line = start_line;
        let Some((head, tail)) = self.label.rsplit_once(" (lines ") else {
            return;
        };
        if tail.ends_with(')') {
            self.label = format!("{head} (lines {}-{})", self.start_line, self.end_line);
        }
    }

    pub fn display_label(&self) -> String {
        match &self.note {
            Some(note) => format!("{} [{}]", self.label, note),
            None => self.label.clone(),
        }
    }
}

/// Line-addressable view over one file's text.
pub struct SourceText<'a> {
    text: &'a str,
    starts: Vec<usize>,
}

impl<'a> SourceText<'a> {
    pub fn new(text: &'a str) -> Self {
        let mut starts = Vec::new();
        if !text.is_empty() {
            starts.push(0);
            for (i, b) in text.bytes().enumerate() {
                if b == b'\n' && i + 1 < text.len() {
                    starts.push(i + 1);
                }
            }
        }
        Self { text, starts }
    }

    pub fn line_count(&self) -> usize {
        self.starts.len()
    }

    /// Byte range of line `n` (1-based) without its line break.
    fn line_range(&self, n: usize) -> Range<usize> {
        let start = self.starts[n - 1];
        let mut end = self.starts.get(n).map(|s| s - 1).unwrap_or(self.text.len());
        if end > start && self.text.as_bytes()[end - 1] == b'\r' {
            end -= 1;
        }
        start..end
    }

    pub fn line(&self, n: usize) -> &'a str {
        &self.text[self.line_range(n)]
    }

    pub fn lines(&self) -> impl Iterator<Item = (usize, &'a str)> + '_ {
        (1..=self.line_count()).map(move |n| (n, self.line(n)))
    }

    /// Byte range covered by a span, honouring its end column.
    pub fn byte_range(&self, span: &MatchSpan) -> Range<usize> {
        if self.starts.is_empty() {
            return 0..0;
        }
        let first = span.start_line.clamp(1, self.line_count());
        let last = span.end_line.clamp(first, self.line_count());
        let start = self.starts[first - 1];
        let line = self.line_range(last);
        let end = match span.end_col {
            Some(col) => (line.start + col).min(line.end),
            None => line.end,
        };
        start..end.max(start)
    }

    /// Verbatim text of `span`, newline-terminated.
    pub fn extract(&self, span: &MatchSpan) -> String {
        let range = self.byte_range(span);
        let mut out = self.text[range].to_string();
        out.push('\n');
        out
    }

    pub fn extract_lines(&self, start_line: usize, end_line: usize) -> String {
        self.extract(&MatchSpan::lines(String::new(), start_line, end_line))
    }
}

/// Sort spans by position and make them non-overlapping: exact duplicates and
/// spans contained in an earlier one are dropped, partial overlaps are clipped.
pub fn normalize_spans(mut spans: Vec<MatchSpan>) -> Vec<MatchSpan> {
    spans.sort_by(|a, b| {
        a.start_line
            .cmp(&b.start_line)
            .then_with(|| b.end_line.cmp(&a.end_line))
            .then_with(|| a.label.cmp(&b.label))
    });

    let mut out: Vec<MatchSpan> = Vec::with_capacity(spans.len());
    let mut last_end = 0usize;
    for mut span in spans {
        if !out.is_empty() {
            if span.end_line <= last_end {
                continue;
            }
            if span.start_line <= last_end {
                span.clip_start(last_end + 1);
            }
        }
        last_end = span.end_line;
        out.push(span);
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct RenderedSpan {
    pub span: MatchSpan,
    pub text: String,
}

/// Everything printed for one file in extraction mode.
#[derive(Debug, Clone)]
pub struct FileMatches {
    pub path: String,
    /// Import block attached to the first span only.
    pub imports: Option<String>,
    pub spans: Vec<RenderedSpan>,
}

#[derive(Serialize)]
struct JsonMatch<'a> {
    file: &'a str,
    label: &'a str,
    start_line: usize,
    end_line: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    note: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    imports: Option<&'a str>,
    text: &'a str,
}

#[derive(Serialize)]
struct JsonListing<'a> {
    file: &'a str,
    name: &'a str,
    line: usize,
    end_line: usize,
    is_async: bool,
}

/// Writes results in ascending order, one file after another.
pub struct Renderer<W: Write> {
    out: W,
    format: OutputFormat,
    wrote_any: bool,
}

impl<W: Write> Renderer<W> {
    pub fn new(out: W, format: OutputFormat) -> Self {
        Self {
            out,
            format,
            wrote_any: false,
        }
    }

    pub fn file_matches(&mut self, file: &FileMatches) -> io::Result<()> {
        for (i, rendered) in file.spans.iter().enumerate() {
            let imports = if i == 0 { file.imports.as_deref() } else { None };
            match self.format {
                OutputFormat::Text => {
                    if self.wrote_any {
                        writeln!(self.out)?;
                    }
                    writeln!(
                        self.out,
                        "==> {}:{} (line {}) <==",
                        file.path,
                        rendered.span.display_label(),
                        rendered.span.start_line
                    )?;
                    if let Some(block) = imports {
                        write!(self.out, "{block}")?;
                        writeln!(self.out, "{IMPORT_DELIMITER}")?;
                    }
                    write!(self.out, "{}", rendered.text)?;
                }
                OutputFormat::Json => {
                    let row = JsonMatch {
                        file: &file.path,
                        label: &rendered.span.label,
                        start_line: rendered.span.start_line,
                        end_line: rendered.span.end_line,
                        note: rendered.span.note.as_deref(),
                        imports,
                        text: &rendered.text,
                    };
                    writeln!(self.out, "{}", serde_json::to_string(&row)?)?;
                }
            }
            self.wrote_any = true;
        }
        Ok(())
    }

    /// One aligned row per definition: name column, then the start line.
    pub fn file_listing(&mut self, path: &str, defs: &[&Definition]) -> io::Result<()> {
        if defs.is_empty() {
            return Ok(());
        }
        match self.format {
            OutputFormat::Text => {
                let names: Vec<String> = defs
                    .iter()
                    .map(|d| {
                        if d.is_async {
                            format!("async {}", d.qualified_name)
                        } else {
                            d.qualified_name.clone()
                        }
                    })
                    .collect();
                let name_width = names.iter().map(|n| n.chars().count()).max().unwrap_or(0);
                let line_width = defs
                    .iter()
                    .map(|d| d.start_line.to_string().len())
                    .max()
                    .unwrap_or(1);

                if self.wrote_any {
                    writeln!(self.out)?;
                }
                writeln!(self.out, "==> {path} <==")?;
                for (name, def) in names.iter().zip(defs) {
                    writeln!(self.out, "{name:<name_width$}  {:>line_width$}", def.start_line)?;
                }
            }
            OutputFormat::Json => {
                for def in defs {
                    let row = JsonListing {
                        file: path,
                        name: &def.qualified_name,
                        line: def.start_line,
                        end_line: def.end_line,
                        is_async: def.is_async,
                    };
                    writeln!(self.out, "{}", serde_json::to_string(&row)?)?;
                }
            }
        }
        self.wrote_any = true;
        Ok(())
    }

    pub fn finish(mut self) -> io::Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspector::{index_source, parse_python, IndexOptions};

    #[test]
    fn extraction_trims_to_end_column() {
        let src = "class A: pass; x = 1\n";
        let text = SourceText::new(src);
        let span = MatchSpan::lines("A", 1, 1).with_end_col(Some(13));
        assert_eq!(text.extract(&span), "class A: pass\n");
    }

    #[test]
    fn crlf_and_missing_final_newline() {
        let text = SourceText::new("a\r\nb\r\nc");
        assert_eq!(text.line_count(), 3);
        assert_eq!(text.line(2), "b");
        assert_eq!(text.extract_lines(1, 3), "a\r\nb\r\nc\n");
        assert_eq!(SourceText::new("").line_count(), 0);
        assert_eq!(SourceText::new("x\n").line_count(), 1);
    }

    #[test]
    fn extracted_definitions_reparse_with_same_name() {
        let src = "import os\n\n@dec\ndef foo(a):\n    return os.sep\n\nclass C:\n    def bar(self):\n        if self:\n            return 1\n";
        let idx = index_source(src, IndexOptions { nested: true }).unwrap();
        let text = SourceText::new(src);
        for def in idx.definitions.iter().filter(|d| d.depth == 0) {
            let fragment = text.extract(&MatchSpan::of_definition(def));
            let reparsed = index_source(&fragment, IndexOptions::default()).unwrap();
            assert_eq!(reparsed.definitions[0].name, def.name);
        }
        // Nested members are indented; they still parse once dedented.
        let bar = idx.definitions.iter().find(|d| d.name == "bar").unwrap();
        let fragment = text.extract(&MatchSpan::of_definition(bar));
        let dedented: String = fragment
            .lines()
            .map(|l| l.strip_prefix("    ").unwrap_or(l))
            .collect::<Vec<_>>()
            .join("\n");
        assert!(parse_python(&dedented).is_ok());
    }

    #[test]
    fn normalize_drops_contained_and_clips_partial_overlaps() {
        let spans = vec![
            MatchSpan::lines("C.foo", 20, 23),
            MatchSpan::lines("C", 19, 30),
            MatchSpan::lines("foo", 10, 12),
            MatchSpan::lines("foo", 10, 12),
            MatchSpan::lines("tail", 28, 35),
        ];
        let got: Vec<(String, usize, usize)> = normalize_spans(spans)
            .into_iter()
            .map(|s| (s.label, s.start_line, s.end_line))
            .collect();
        assert_eq!(
            got,
            vec![
                ("foo".to_string(), 10, 12),
                ("C".to_string(), 19, 30),
                ("tail".to_string(), 31, 35),
            ]
        );
    }

    #[test]
    fn clipped_range_labels_name_the_printed_lines() {
        let spans = vec![
            MatchSpan::lines("C.m", 14, 20),
            MatchSpan::lines("class C (lines 16-22)", 16, 22),
        ];
        let got: Vec<(String, usize, usize)> = normalize_spans(spans)
            .into_iter()
            .map(|s| (s.label, s.start_line, s.end_line))
            .collect();
        assert_eq!(
            got,
            vec![
                ("C.m".to_string(), 14, 20),
                ("class C (lines 21-22)".to_string(), 21, 22),
            ]
        );
    }

    #[test]
    fn text_rendering_attaches_imports_once() {
        let file = FileMatches {
            path: "a.py".to_string(),
            imports: Some("import os\n".to_string()),
            spans: vec![
                RenderedSpan {
                    span: MatchSpan::lines("f", 3, 4),
                    text: "def f():\n    pass\n".to_string(),
                },
                RenderedSpan {
                    span: MatchSpan::lines("g", 6, 7).with_note("match line 7"),
                    text: "def g():\n    pass\n".to_string(),
                },
            ],
        };
        let mut r = Renderer::new(Vec::new(), OutputFormat::Text);
        r.file_matches(&file).unwrap();
        let out = String::from_utf8(r.finish().unwrap()).unwrap();
        assert_eq!(
            out,
            "==> a.py:f (line 3) <==\nimport os\n# ...\ndef f():\n    pass\n\n==> a.py:g [match line 7] (line 6) <==\ndef g():\n    pass\n"
        );
        assert_eq!(out.matches("import os").count(), 1);
    }

    #[test]
    fn listing_aligns_columns() {
        let src = "def a():\n    pass\n\nasync def longer_name():\n    pass\n";
        let idx = index_source(src, IndexOptions::default()).unwrap();
        let defs: Vec<&Definition> = idx.definitions.iter().collect();
        let mut r = Renderer::new(Vec::new(), OutputFormat::Text);
        r.file_listing("m.py", &defs).unwrap();
        let out = String::from_utf8(r.finish().unwrap()).unwrap();
        assert_eq!(out, "==> m.py <==\na                  1\nasync longer_name  4\n");
    }

    #[test]
    fn json_rows_are_one_per_line() {
        let file = FileMatches {
            path: "a.py".to_string(),
            imports: None,
            spans: vec![RenderedSpan {
                span: MatchSpan::lines("f", 1, 2),
                text: "def f():\n    pass\n".to_string(),
            }],
        };
        let mut r = Renderer::new(Vec::new(), OutputFormat::Json);
        r.file_matches(&file).unwrap();
        let out = String::from_utf8(r.finish().unwrap()).unwrap();
        let v: serde_json::Value = serde_json::from_str(out.trim()).unwrap();
        assert_eq!(v["label"], "f");
        assert_eq!(v["start_line"], 1);
        assert!(v.get("imports").is_none());
    }
}
