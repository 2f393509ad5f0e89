use anyhow::{Context, Result};
use clap::Parser;
use mimalloc::MiMalloc;
use std::io::{self, BufWriter, IsTerminal, Read, Write};
use std::time::Duration;

use nata::expr::eval::CancelToken;
use nata::output::{ColorScheme, OutputConfig, OutputMode};
use nata::{EvalOptions, Evaluator, Value};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(
    name = "nata",
    about = "nata - a JSONata query and transformation engine",
    version,
    after_help = "Example:\n\n\t$ echo '{\"a\":{\"b\":[1,2,3]}}' | nata 'a.b[-1]'\n\t3"
)]
struct Cli {
    /// JSONata expression
    expression: String,

    /// Input file(s); defaults to stdin
    files: Vec<String>,

    /// Compact output (no pretty-printing)
    #[arg(short = 'c', long = "compact-output")]
    compact: bool,

    /// Raw output (strings without quotes)
    #[arg(short = 'r', long = "raw-output")]
    raw: bool,

    /// Null input — don't read any input, evaluate against `null`
    #[arg(short = 'n', long = "null-input")]
    null_input: bool,

    /// Use tab for indentation
    #[arg(long)]
    tab: bool,

    /// Number of spaces for indentation (default: 2)
    #[arg(long, default_value_t = 2)]
    indent: u32,

    /// Sort object keys
    #[arg(short = 'S', long = "sort-keys")]
    sort_keys: bool,

    /// Force color output even when piped
    #[arg(short = 'C', long = "color-output")]
    color: bool,

    /// Monochrome output (no color)
    #[arg(short = 'M', long = "monochrome-output")]
    monochrome: bool,

    /// Bind $name to string value
    #[arg(long = "arg", num_args = 2, value_names = ["NAME", "VALUE"], action = clap::ArgAction::Append)]
    args: Vec<String>,

    /// Bind $name to parsed JSON value
    #[arg(long = "argjson", num_args = 2, value_names = ["NAME", "VALUE"], action = clap::ArgAction::Append)]
    argjson: Vec<String>,

    /// Abort evaluation after this many milliseconds
    #[arg(long = "timeout", value_name = "MS")]
    timeout: Option<u64>,

    /// Cap on expression nesting depth
    #[arg(long = "max-depth", value_name = "N")]
    max_depth: Option<usize>,

    /// Emit a per-node evaluation trace to stderr
    #[arg(long)]
    trace: bool,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("nata: {err:#}");
        std::process::exit(2);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let ast = nata::parse(&cli.expression).context("invalid expression")?;

    let mut inputs = Vec::new();
    if cli.null_input {
        inputs.push(Value::Null);
    } else {
        let mut buf = Vec::new();
        if cli.files.is_empty() {
            io::stdin()
                .read_to_end(&mut buf)
                .context("failed to read stdin")?;
        } else {
            for file in &cli.files {
                let mut chunk = std::fs::read(file)
                    .with_context(|| format!("failed to read {file}"))?;
                buf.append(&mut chunk);
                buf.push(b'\n');
            }
        }
        nata::input::strip_bom(&mut buf);
        nata::input::collect_values_from_buf(&buf, &mut inputs)?;
    }

    let mut bindings = Vec::new();
    for pair in cli.args.chunks(2) {
        bindings.push((pair[0].clone(), Value::String(pair[1].clone())));
    }
    for pair in cli.argjson.chunks(2) {
        let parsed: serde_json::Value = serde_json::from_str(&pair[1])
            .with_context(|| format!("--argjson {}: invalid JSON", pair[0]))?;
        bindings.push((pair[0].clone(), Value::from_json(&parsed)));
    }

    let evaluator = Evaluator::with_options(EvalOptions {
        max_depth: cli.max_depth.unwrap_or_else(|| EvalOptions::default().max_depth),
        debug: cli.trace,
    });

    let use_color = !cli.monochrome && (cli.color || io::stdout().is_terminal());
    let config = OutputConfig {
        mode: if cli.raw {
            OutputMode::Raw
        } else if cli.compact {
            OutputMode::Compact
        } else {
            OutputMode::Pretty
        },
        indent: if cli.tab {
            "\t".to_string()
        } else {
            " ".repeat(cli.indent as usize)
        },
        sort_keys: cli.sort_keys,
        color: if use_color {
            ColorScheme::default_colors()
        } else {
            ColorScheme::none()
        },
    };

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    for input in &inputs {
        let cancel = cli.timeout.map(|ms| CancelToken::with_timeout(Duration::from_millis(ms)));
        let result = evaluator
            .evaluate_with(&ast, input, &bindings, cancel.as_ref())
            .context("evaluation failed")?;
        // An absent result prints nothing, matching the "value absent"
        // output contract.
        if result.is_undefined() {
            continue;
        }
        nata::output::check_serializable(&result)?;
        nata::output::write_value(&mut out, &result, &config)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}
