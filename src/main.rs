use anyhow::{Context, Result};
use clap::Parser;
use printfunction::config::load_config;
use printfunction::engine::{run_diff, run_query, RunOptions};
use printfunction::error::PfError;
use printfunction::imports::ImportMode;
use printfunction::query::{compile_pattern, looks_like_range, NameFilter, Query};
use printfunction::scanner::{discover, FileType, ScanOptions};
use printfunction::slicer::OutputFormat;
use std::io::{self, BufWriter};

#[derive(Debug, Parser)]
#[command(name = "printfunction")]
#[command(version)]
#[command(about = "Print Python definitions, smart line ranges and diff-touched functions")]
#[command(after_help = "Examples:\n  printfunction hello src/\n  printfunction MyClass.method app.py\n  printfunction lines 10-20 app.py\n  printfunction ~15-18 app.py\n  printfunction --list --nested pkg/\n  printfunction --diff=HEAD~1 src/")]
struct Cli {
    /// Definition name (`hello`, `MyClass.method`), a line range (`10-20`,
    /// `~15-18`), or `lines` followed by a range. Treated as a path when
    /// --regex, --at, --list or --diff selects the mode.
    #[arg(value_name = "QUERY")]
    query: Option<String>,

    /// Files, directories or glob patterns to search (default: .)
    #[arg(value_name = "PATHS")]
    paths: Vec<String>,

    /// Match qualified definition names against a regular expression
    #[arg(long, value_name = "PATTERN", conflicts_with_all = ["at", "diff", "name"])]
    regex: Option<String>,

    /// Show the smallest block around the first line whose text matches PATTERN
    #[arg(long, value_name = "PATTERN", conflicts_with_all = ["list", "diff"])]
    at: Option<String>,

    /// List definitions with their start lines instead of printing code
    #[arg(long, conflicts_with = "diff")]
    list: bool,

    /// With --list, only show definitions with this name
    #[arg(long, value_name = "NAME", requires = "list")]
    name: Option<String>,

    /// Stop at the first matching definition in each file
    #[arg(long)]
    first: bool,

    /// Also index functions and classes defined inside function bodies
    #[arg(long)]
    nested: bool,

    /// Print imports ahead of the extracted code
    #[arg(long, value_enum, default_value_t = ImportMode::None)]
    imports: ImportMode,

    /// Lines of context around ranges (diff mode: around module/class changes)
    #[arg(short = 'C', long, value_name = "N")]
    context: Option<usize>,

    /// Which files to consider
    #[arg(long = "type", value_enum, default_value_t = FileType::Py)]
    file_type: FileType,

    /// Emit one JSON object per result
    #[arg(long)]
    json: bool,

    /// Show definitions touched by `git diff`; `--diff=REV` compares against REV
    #[arg(long, value_name = "REV", num_args = 0..=1, require_equals = true, default_missing_value = "")]
    diff: Option<String>,
}

impl Cli {
    /// Split positionals into the query and the roots to search.
    fn query_and_roots(&self) -> Result<(Query, Vec<String>), PfError> {
        let mut positionals: Vec<String> = self.query.iter().chain(&self.paths).cloned().collect();

        let query = if let Some(pattern) = &self.regex {
            let re = compile_pattern(pattern)?;
            if self.list {
                Query::List(Some(NameFilter::Pattern(re)))
            } else {
                Query::Regex(re)
            }
        } else if let Some(pattern) = &self.at {
            Query::At(compile_pattern(pattern)?)
        } else if self.list {
            Query::List(self.name.clone().map(NameFilter::Exact))
        } else {
            if positionals.is_empty() {
                return Err(PfError::usage("missing QUERY (a name, a line range, or `lines RANGE`)"));
            }
            let first = positionals.remove(0);
            if first == "lines" {
                if positionals.is_empty() {
                    return Err(PfError::usage("`lines` needs a range such as 10-20 or ~15-18"));
                }
                Query::range(&positionals.remove(0))?
            } else if looks_like_range(&first) {
                Query::range(&first)?
            } else if first.is_empty() {
                return Err(PfError::usage("QUERY must not be empty"));
            } else {
                Query::Name(first)
            }
        };

        if positionals.is_empty() {
            positionals.push(".".to_string());
        }
        Ok((query, positionals))
    }
}

fn run(cli: Cli) -> Result<i32> {
    let cwd = std::env::current_dir().context("Failed to get current dir")?;
    let cfg = load_config(&cwd).apply_env();

    let scan = ScanOptions {
        file_type: cli.file_type,
        extensions: cfg.normalized_extensions(),
        ignore_dirs: cfg.ignored_dir_names(),
    };
    let mut opts = RunOptions {
        first_only: cli.first,
        nested: cli.nested,
        imports: cli.imports,
        context: cli.context.unwrap_or(cfg.context_lines),
        format: if cli.json { OutputFormat::Json } else { OutputFormat::Text },
        scan,
        use_rg: cfg.use_rg,
        report_rg: std::env::var("PF_TEST_RG_USED").is_ok_and(|v| v == "1"),
    };

    let stdout = io::stdout();
    let out = BufWriter::new(stdout.lock());

    if let Some(rev) = cli.diff.as_deref() {
        opts.context = cli.context.unwrap_or(cfg.diff_context_lines);
        opts.nested = true;
        let roots: Vec<String> = cli.query.iter().chain(&cli.paths).cloned().collect();
        let rev = Some(rev).filter(|r| !r.is_empty());
        let outcome = run_diff(&cwd, rev, &roots, &opts, out)?;
        return Ok(outcome.exit_code());
    }

    let (query, roots) = cli.query_and_roots()?;
    let discovery = discover(&roots, &opts.scan);
    for warning in &discovery.warnings {
        eprintln!("{warning}");
    }

    let outcome = run_query(&query, &discovery.files, &opts, out)?;
    Ok(outcome.exit_code())
}

fn main() {
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            2
        }
    };
    std::process::exit(code);
}
