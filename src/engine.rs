use anyhow::{Context, Result};
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::diffmap::{changed_line_set, fallback_spans, map_changed_lines};
use crate::error::PfError;
use crate::hunks::{git_diff, parse_unified_diff, repo_toplevel};
use crate::imports::{filter_imports, ImportMode};
use crate::inspector::{index_source, FileIndex, Import, IndexOptions};
use crate::prefilter::{rg_candidates, Prefilter};
use crate::query::{select_definitions, Query, Resolver};
use crate::scanner::{display_path, FileType, ScanOptions};
use crate::slicer::{normalize_spans, FileMatches, MatchSpan, OutputFormat, RenderedSpan, Renderer, SourceText};

/// Everything a run needs besides the file list.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub first_only: bool,
    pub nested: bool,
    pub imports: ImportMode,
    pub context: usize,
    pub format: OutputFormat,
    pub scan: ScanOptions,
    pub use_rg: bool,
    /// Print `DEBUG: RG USED` when ripgrep produced the candidate list.
    pub report_rg: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Matched,
    NoMatch,
    /// Nothing matched and at least one file could not be read or parsed.
    Failed,
}

impl Outcome {
    fn from_flags(matched: bool, had_error: bool) -> Self {
        match (matched, had_error) {
            (true, _) => Self::Matched,
            (false, false) => Self::NoMatch,
            (false, true) => Self::Failed,
        }
    }

    pub fn exit_code(self) -> i32 {
        match self {
            Self::Matched => 0,
            Self::NoMatch => 1,
            Self::Failed => 2,
        }
    }
}

/// Print a per-file error and keep going; anything else ends the run.
fn report(err: PfError) -> Result<()> {
    if !err.is_recoverable() {
        return Err(err.into());
    }
    eprintln!("{err}");
    Ok(())
}

fn read_source(path: &Path) -> Result<String, PfError> {
    std::fs::read(path)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .map_err(|source| PfError::Read {
            path: PathBuf::from(display_path(path)),
            source,
        })
}

fn index_file(path: &Path, source: &str, nested: bool) -> Result<FileIndex, PfError> {
    index_source(source, IndexOptions { nested }).map_err(|source| PfError::Parse {
        path: PathBuf::from(display_path(path)),
        source,
    })
}

/// Candidate files from ripgrep, or `None` when every file must be scanned.
fn prefilter(query: &Query, files: &[PathBuf], opts: &RunOptions) -> Option<HashSet<PathBuf>> {
    let needle = query.needle()?;
    if !opts.use_rg || opts.scan.file_type != FileType::Py {
        return None;
    }
    let python: Vec<PathBuf> = files.iter().filter(|f| opts.scan.is_python(f)).cloned().collect();
    if python.is_empty() {
        return None;
    }

    match rg_candidates(needle, &python) {
        Prefilter::Candidates(found) => {
            if opts.report_rg {
                eprintln!("DEBUG: RG USED");
            }
            debug_log!("[printfunction] rg kept {}/{} files", found.len(), python.len());
            if found.is_empty() {
                None
            } else {
                Some(found.iter().map(|p| PathBuf::from(display_path(p))).collect())
            }
        }
        Prefilter::Unavailable => {
            debug_log!("[printfunction] rg not found; scanning every file");
            None
        }
        Prefilter::Failed(warning) => {
            eprintln!("{warning}");
            None
        }
    }
}

/// Whether resolving `query` on a Python file needs its parse tree.
fn wants_index(query: &Query, imports: ImportMode) -> bool {
    !matches!(query, Query::Lines { .. }) || imports != ImportMode::None
}

/// Imports to print ahead of `spans`, skipping any already shown inside them.
fn import_block(
    mode: ImportMode,
    index: Option<&FileIndex>,
    text: &SourceText,
    source: &str,
    spans: &[MatchSpan],
) -> Option<String> {
    let index = index?;
    if mode == ImportMode::None {
        return None;
    }
    let selected: Vec<_> = spans.iter().map(|s| text.byte_range(s)).collect();
    let kept: Vec<Import> = filter_imports(mode, &index.imports, index.tree.root_node(), source.as_bytes(), &selected)
        .into_iter()
        .filter(|i| !spans.iter().any(|s| s.start_line <= i.start_line && i.end_line <= s.end_line))
        .collect();
    if kept.is_empty() {
        return None;
    }
    Some(kept.iter().map(|i| text.extract_lines(i.start_line, i.end_line)).collect())
}

fn render_spans(
    path: &Path,
    text: &SourceText,
    source: &str,
    index: Option<&FileIndex>,
    spans: Vec<MatchSpan>,
    mode: ImportMode,
) -> FileMatches {
    let spans = normalize_spans(spans);
    let imports = import_block(mode, index, text, source, &spans);
    FileMatches {
        path: display_path(path),
        imports,
        spans: spans
            .into_iter()
            .map(|span| RenderedSpan {
                text: text.extract(&span),
                span,
            })
            .collect(),
    }
}

/// Resolve `query` in every file, in order, writing results to `out`.
///
/// Per-file read and parse errors are reported on stderr and do not stop the
/// run.
pub fn run_query<W: Write>(query: &Query, files: &[PathBuf], opts: &RunOptions, out: W) -> Result<Outcome> {
    let candidates = prefilter(query, files, opts);
    let mut renderer = Renderer::new(out, opts.format);
    let mut matched = false;
    let mut had_error = false;

    for path in files {
        if let Some(candidates) = &candidates {
            if opts.scan.is_python(path) && !candidates.contains(path) {
                continue;
            }
        }

        let source = match read_source(path) {
            Ok(s) => s,
            Err(e) => {
                report(e)?;
                had_error = true;
                continue;
            }
        };

        if query.needle().is_some_and(|needle| !source.contains(needle)) {
            continue;
        }

        let is_python = opts.scan.is_python(path);
        if !is_python && query.needs_structure() {
            continue;
        }

        let index = if is_python && wants_index(query, opts.imports) {
            match index_file(path, &source, opts.nested) {
                Ok(index) => Some(index),
                Err(e) => {
                    report(e)?;
                    had_error = true;
                    continue;
                }
            }
        } else {
            None
        };

        if let Query::List(_) = query {
            let Some(index) = &index else { continue };
            let defs = select_definitions(query, &index.definitions, opts.first_only);
            if !defs.is_empty() {
                renderer
                    .file_listing(&display_path(path), &defs)
                    .context("Failed to write listing")?;
                matched = true;
            }
            continue;
        }

        let text = SourceText::new(&source);
        let resolver = Resolver {
            text: &text,
            source: &source,
            index: index.as_ref(),
            context: opts.context,
            first_only: opts.first_only,
        };
        let spans = resolver.resolve(query);
        if spans.is_empty() {
            continue;
        }

        let file = render_spans(path, &text, &source, index.as_ref(), spans, opts.imports);
        renderer.file_matches(&file).context("Failed to write results")?;
        matched = true;
    }

    renderer.finish().context("Failed to flush output")?;
    Ok(Outcome::from_flags(matched, had_error))
}

/// Show the definitions and surrounding lines touched by `git diff`.
///
/// `rev` compares the working tree against a revision; `None` shows unstaged
/// changes. `paths` limit the diff the way they limit `git diff`.
pub fn run_diff<W: Write>(cwd: &Path, rev: Option<&str>, paths: &[String], opts: &RunOptions, out: W) -> Result<Outcome> {
    let toplevel = repo_toplevel(cwd)?;
    let diff = git_diff(cwd, rev, paths)?;
    let changes = parse_unified_diff(&diff);
    debug_log!("[printfunction] diff touches {} files", changes.len());

    let here = std::fs::canonicalize(cwd).unwrap_or_else(|_| cwd.to_path_buf());
    let mut renderer = Renderer::new(out, opts.format);
    let mut matched = false;
    let mut had_error = false;

    for change in changes {
        let abs = toplevel.join(&change.path);
        let shown = abs.strip_prefix(&here).map(Path::to_path_buf).unwrap_or_else(|_| abs.clone());
        let is_python = opts.scan.is_python(&abs);
        if opts.scan.file_type == FileType::Py && !is_python {
            continue;
        }
        if !abs.is_file() {
            continue;
        }

        let source = match read_source(&abs) {
            Ok(s) => s,
            Err(e) => {
                report(e)?;
                had_error = true;
                continue;
            }
        };
        let text = SourceText::new(&source);
        let line_count = text.line_count();
        if line_count == 0 {
            continue;
        }
        let changed = changed_line_set(change.lines.iter().copied(), line_count);

        let index = if is_python {
            match index_file(&shown, &source, true) {
                Ok(index) => Some(index),
                Err(e) => {
                    eprintln!("Warning: {e}; showing changed lines only");
                    None
                }
            }
        } else {
            None
        };

        let spans = match &index {
            Some(index) => map_changed_lines(&changed, &index.definitions).into_spans(opts.context, line_count),
            None => fallback_spans(&changed, opts.context, line_count),
        };
        if spans.is_empty() {
            continue;
        }

        let file = render_spans(&shown, &text, &source, index.as_ref(), spans, opts.imports);
        renderer.file_matches(&file).context("Failed to write results")?;
        matched = true;
    }

    renderer.finish().context("Failed to flush output")?;
    Ok(Outcome::from_flags(matched, had_error))
}
