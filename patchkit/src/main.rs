//! DOM patch engine CLI.
//!
//! Applies payloads to HTML files, checks payloads, sanitizes markup,
//! generates selectors and validates drag-and-drop moves. Results go to
//! stdout; diagnostics go to stderr (see `RUST_LOG`).

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::json;

use patchkit::apply::{ApplyOptions, PatchEngine};
use patchkit::core::constraints::DropPosition;
use patchkit::core::containers::ElementRef;
use patchkit::core::css::select_first;
use patchkit::core::dom::{Document, NodeId};
use patchkit::core::dropzone::plan_drop;
use patchkit::core::geometry::StaticGeometry;
use patchkit::core::html::{parse_document, serialize_document};
use patchkit::core::sanitize::sanitize_report;
use patchkit::core::selector::generate_selector_with;
use patchkit::exit_codes;
use patchkit::io::config::{EngineConfig, load_config};
use patchkit::io::payload_store::load_payload;
use patchkit::logging;
use patchkit::runtime::page::Page;

const DEFAULT_URL: &str = "https://localhost/";

#[derive(Parser)]
#[command(name = "patchkit", version, about = "Declarative DOM patch engine")]
struct Cli {
    /// Engine configuration (TOML). Missing file means defaults.
    #[arg(long, global = true, default_value = "patchkit.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply a payload to an HTML document and print the patched HTML.
    Apply {
        html: PathBuf,
        payload: PathBuf,
        /// Write the JSON apply report here.
        #[arg(long)]
        report: Option<PathBuf>,
        /// Write patched HTML here instead of stdout.
        #[arg(short, long)]
        out: Option<PathBuf>,
        #[arg(long)]
        skip_mask: bool,
    },
    /// Validate a payload file (schema + invariants).
    Check { payload: PathBuf },
    /// Sanitize markup from a file (or stdin) and print the result.
    Sanitize {
        input: Option<PathBuf>,
        /// Print what was stripped to stderr.
        #[arg(long)]
        verbose: bool,
    },
    /// Generate a stable selector for the first element matching `css`.
    Selector { html: PathBuf, css: String },
    /// Validate moving one element relative to another.
    Drop {
        html: PathBuf,
        #[arg(long)]
        dragged: String,
        #[arg(long)]
        container: String,
        #[arg(long, value_enum, default_value_t = Position::Inside)]
        position: Position,
        /// Anchor child for `before`/`after`.
        #[arg(long)]
        sibling: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Position {
    Before,
    After,
    Inside,
}

impl From<Position> for DropPosition {
    fn from(position: Position) -> Self {
        match position {
            Position::Before => DropPosition::Before,
            Position::After => DropPosition::After,
            Position::Inside => DropPosition::Inside,
        }
    }
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    match cli.command {
        Command::Apply {
            html,
            payload,
            report,
            out,
            skip_mask,
        } => cmd_apply(&config, &html, &payload, report.as_deref(), out.as_deref(), skip_mask),
        Command::Check { payload } => cmd_check(&payload),
        Command::Sanitize { input, verbose } => cmd_sanitize(input.as_deref(), verbose),
        Command::Selector { html, css } => cmd_selector(&config, &html, &css),
        Command::Drop {
            html,
            dragged,
            container,
            position,
            sibling,
        } => cmd_drop(&html, &dragged, &container, position.into(), sibling.as_deref()),
    }
}

fn cmd_apply(
    config: &EngineConfig,
    html_path: &Path,
    payload_path: &Path,
    report_path: Option<&Path>,
    out_path: Option<&Path>,
    skip_mask: bool,
) -> Result<i32> {
    let html = fs::read_to_string(html_path)
        .with_context(|| format!("read html {}", html_path.display()))?;
    let payload = load_payload(payload_path)?;
    let mut page = Page::from_html(DEFAULT_URL, &html);
    let mut engine = PatchEngine::new(config.clone());
    let options = ApplyOptions {
        skip_mask,
        ..ApplyOptions::default()
    };
    let report = engine.apply_payload(&mut page, &payload, &options);
    // Let a dropped or timed-out mask settle before serializing.
    page.run_microtasks();

    if let Some(path) = report_path {
        write_json(path, &report)?;
    }
    for error in &report.errors {
        eprintln!("error: {error}");
    }
    let patched = serialize_document(page.document());
    match out_path {
        Some(path) => {
            fs::write(path, patched).with_context(|| format!("write {}", path.display()))?;
        }
        None => println!("{patched}"),
    }
    Ok(if report.success {
        exit_codes::OK
    } else {
        exit_codes::PARTIAL
    })
}

fn cmd_check(payload_path: &Path) -> Result<i32> {
    let payload = load_payload(payload_path)?;
    let non_idempotent = payload.ops.iter().filter(|op| !op.is_idempotent()).count();
    println!(
        "ok: {} operation(s), {} non-idempotent",
        payload.ops.len(),
        non_idempotent
    );
    Ok(exit_codes::OK)
}

fn cmd_sanitize(input: Option<&Path>, verbose: bool) -> Result<i32> {
    let markup = match input {
        Some(path) => {
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?
        }
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("read stdin")?;
            buf
        }
    };
    let report = sanitize_report(&markup);
    if verbose {
        for item in &report.stripped {
            eprintln!("stripped: {item}");
        }
    }
    println!("{}", report.html);
    Ok(exit_codes::OK)
}

fn cmd_selector(config: &EngineConfig, html_path: &Path, css: &str) -> Result<i32> {
    let doc = read_document(html_path)?;
    let node = find(&doc, css)?;
    let generated = generate_selector_with(&doc, node, &config.selector);
    print_json(&generated)?;
    Ok(exit_codes::OK)
}

fn cmd_drop(
    html_path: &Path,
    dragged: &str,
    container: &str,
    position: DropPosition,
    sibling: Option<&str>,
) -> Result<i32> {
    let doc = read_document(html_path)?;
    let dragged = find(&doc, dragged)?;
    let container = find(&doc, container)?;
    let sibling = sibling.map(|css| find(&doc, css)).transpose()?;
    // Display and flex direction come from inline styles.
    let geometry = StaticGeometry::new();
    let dragged_ref = ElementRef::capture(&doc, &geometry, dragged);
    let container_ref = ElementRef::capture(&doc, &geometry, container);
    match plan_drop(&doc, &geometry, dragged, container, position, sibling) {
        Ok(op) => {
            print_json(&json!({
                "allowed": true,
                "op": op,
                "dragged": dragged_ref,
                "container": container_ref,
            }))?;
            Ok(exit_codes::OK)
        }
        Err(violation) => {
            print_json(&json!({
                "allowed": false,
                "kind": violation.kind,
                "reason": violation.reason,
                "dragged": dragged_ref,
                "container": container_ref,
            }))?;
            Ok(exit_codes::REJECTED)
        }
    }
}

fn read_document(path: &Path) -> Result<Document> {
    let html =
        fs::read_to_string(path).with_context(|| format!("read html {}", path.display()))?;
    Ok(parse_document(&html))
}

fn find(doc: &Document, css: &str) -> Result<NodeId> {
    select_first(doc, css)
        .with_context(|| format!("invalid selector {css}"))?
        .ok_or_else(|| anyhow!("no element matches {css}"))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{out}");
    Ok(())
}

/// Serialize `value` to pretty-printed JSON with trailing newline.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value).context("serialize json")?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
