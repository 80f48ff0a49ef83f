use std::io::{BufRead, IsTerminal, Read, Write};

use clap::{Parser, Subcommand};
use duso::context::ResumeDirective;
use duso::engine::{Duso, DusoOptions};
use duso::interpreter::error::BreakpointSnapshot;

#[derive(Parser)]
#[command(name = "duso")]
#[command(about = "An embeddable scripting language runtime")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Execute the script from command line argument
    #[arg(short = 'c')]
    script: Option<String>,

    /// Script file to execute (bare `duso <file>` form)
    #[arg()]
    script_file: Option<String>,

    /// Verbose logging (enables tracing output at info level)
    #[arg(long, global = true)]
    verbose: bool,

    /// Disable ANSI color in diagnostics
    #[arg(long = "no-color", global = true)]
    no_color: bool,

    /// Installs a breakpoint handler that prints a snapshot and reads a
    /// resume directive from stdin on every `breakpoint()` hit.
    #[arg(long, global = true)]
    debug: bool,

    /// Library search path recorded on the execution context. `require`/
    /// `include` resolution itself is out of scope.
    #[arg(short = 'L', long = "lib-path", global = true)]
    lib_path: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Run a script file
    Run { file: String },
    /// Start a line-buffered REPL
    Repl,
    /// Print builtin documentation
    Doc { module: Option<String> },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.no_color);

    let options = DusoOptions {
        max_depth: None,
        breakpoint_handler: if cli.debug { Some(debug_handler()) } else { None },
        lib_path: cli.lib_path,
    };

    let exit_code = match cli.command {
        Some(Command::Run { file }) => run_file(&file, options).await,
        Some(Command::Repl) => repl(options).await,
        Some(Command::Doc { module }) => {
            print_doc(module.as_deref());
            0
        }
        None => {
            if let Some(source) = cli.script {
                run_source("<-c>", &source, options).await
            } else if let Some(file) = cli.script_file {
                run_file(&file, options).await
            } else if std::io::stdin().is_terminal() {
                eprintln!("duso: no script provided. Use -c '<source>', a file argument, `duso repl`, or pipe via stdin.");
                1
            } else {
                let mut buf = String::new();
                std::io::stdin().read_to_string(&mut buf).unwrap_or_default();
                run_source("<stdin>", &buf, options).await
            }
        }
    };

    std::process::exit(exit_code);
}

fn init_tracing(verbose: bool, no_color: bool) {
    use tracing_subscriber::EnvFilter;
    let default_level = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_ansi(!no_color).try_init();
}

async fn run_file(path: &str, options: DusoOptions) -> i32 {
    let source = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("duso: cannot read script file: {}: {}", path, e);
            return 1;
        }
    };
    run_source(path, &source, options).await
}

/// Parses and runs `source` to completion, printing its output and
/// mapping the result to an exit code (`spec.md` §6 "Exit codes": 0
/// success, 1 parse/runtime error, 0 on top-level `exit(v)`).
async fn run_source(file_path: &str, source: &str, options: DusoOptions) -> i32 {
    let engine = Duso::new(options);
    let (output, error) = engine.exec(file_path, source).await;
    if !output.is_empty() {
        print!("{}", output);
        let _ = std::io::stdout().flush();
    }
    match error {
        Some(e) => {
            eprintln!("{}", e);
            1
        }
        None => 0,
    }
}

async fn repl(options: DusoOptions) -> i32 {
    let engine = Duso::new(options);
    let stdin = std::io::stdin();
    let mut line = String::new();
    loop {
        print!("duso> ");
        let _ = std::io::stdout().flush();
        line.clear();
        if stdin.lock().read_line(&mut line).unwrap_or(0) == 0 {
            break;
        }
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            continue;
        }
        let (output, error) = engine.exec("<repl>", trimmed).await;
        if !output.is_empty() {
            print!("{}", output);
        }
        if let Some(e) = error {
            eprintln!("{}", e);
        }
        let _ = std::io::stdout().flush();
    }
    0
}

/// Prints each builtin's one-line doc, or just one module's when named
/// (`spec.md` §6 "duso doc").
fn print_doc(module: Option<&str>) {
    const DOCS: &[(&str, &[(&str, &str)])] = &[
        ("coercion", &[
            ("type(v)", "returns v's type name as a string"),
            ("tostring(v)", "renders v as a display string"),
            ("tonumber(v)", "coerces v to a number, or nan"),
            ("tobool(v)", "coerces v to a boolean via truthiness"),
        ]),
        ("strings", &[
            ("upper/lower(s)", "case-folds a string"),
            ("substr(s, start, len)", "extracts a substring"),
            ("trim(s)", "strips leading/trailing whitespace"),
            ("split(s, sep)", "splits into an array"),
            ("join(arr, sep)", "joins an array into a string"),
            ("contains/find(s, needle)", "substring search"),
            ("replace(s, from, to)", "substring replacement"),
            ("len(v)", "length of a string, array, or object"),
        ]),
        ("collections", &[
            ("keys/values(obj)", "object keys or values as an array"),
            ("push/pop/shift/unshift(arr, v)", "array end mutation"),
            ("sort(arr, cmp?)", "stable sort, optional comparator"),
            ("map/filter/reduce(arr, fn)", "functional array ops"),
            ("range(start, end, step?)", "builds an array of numbers"),
        ]),
        ("math", &[
            ("abs/floor/ceil/round(n)", "numeric rounding"),
            ("min/max(...)", "variadic extrema"),
            ("sqrt/pow(n)", "power functions"),
            ("clamp(n, lo, hi)", "restricts n to a range"),
            ("random()/random(n)/random(min, max)", "a float in [0,1), or an integer in [0,n) / [min,max)"),
        ]),
        ("json", &[
            ("parse_json(s)", "parses a JSON string into a value"),
            ("format_json(v)", "renders a value as a JSON string"),
        ]),
        ("time", &[
            ("now()", "seconds since the Unix epoch"),
            ("format_time/parse_time(n, fmt?)", "strftime-style conversion"),
            ("sleep(seconds)", "suspends, honoring cancellation"),
        ]),
        ("control", &[
            ("exit(v)", "terminates the script with result v"),
            ("throw(v)", "raises a catchable error carrying v"),
            ("breakpoint()", "forces a debugger stop"),
            ("watch(name)", "adds a variable to the next breakpoint snapshot"),
        ]),
        ("concurrency", &[
            ("spawn(path, args?)", "launches a detached child script, returns its pid"),
            ("run(path, args?)", "runs a child script and blocks for its result"),
            ("kill(pid)", "cooperatively cancels a spawned child"),
            ("parallel(fn...)", "runs closures concurrently, joins their results"),
            ("context()", "this evaluator's spawn args or HTTP request"),
            ("datastore(name)", "a handle to a shared key/value namespace"),
            ("http_server(opts)", "constructs an HTTP server handle"),
        ]),
    ];

    for (name, entries) in DOCS {
        if let Some(wanted) = module {
            if *name != wanted {
                continue;
            }
        }
        println!("{}:", name);
        for (sig, desc) in *entries {
            println!("  {:<32} {}", sig, desc);
        }
    }
}

/// Prints a breakpoint snapshot and reads a resume directive from stdin
/// (`spec.md` §4.C "Stepping", `--debug` flag).
fn debug_handler() -> duso::interpreter::evaluator::BreakpointHandler {
    std::sync::Arc::new(|snapshot: &BreakpointSnapshot| {
        eprintln!("--- breakpoint: {}:{} ---", snapshot.file, snapshot.position);
        for frame in &snapshot.call_stack {
            eprintln!("  in {} at {}", frame.name, frame.position);
        }
        for (name, value) in &snapshot.locals {
            eprintln!("  {} = {:?}", name, value);
        }
        eprint!("(c)ontinue / (s)tep into / (o)ver / (u)p and out > ");
        let _ = std::io::stderr().flush();
        let mut line = String::new();
        if std::io::stdin().read_line(&mut line).unwrap_or(0) == 0 {
            return ResumeDirective::Continue;
        }
        match line.trim() {
            "s" => ResumeDirective::StepInto,
            "o" => ResumeDirective::StepOver,
            "u" => ResumeDirective::StepOut,
            _ => ResumeDirective::Continue,
        }
    })
}
