//! Whitesymex CLI
//!
//! Parses a Whitespace program, explores its feasible paths symbolically,
//! and prints an input that reaches the requested output.

use std::path::PathBuf;
use std::process;

use clap::{Parser as ClapParser, ValueEnum};
use z3::{Config, Context};

use whitesymex::parser;
use whitesymex::path_group::{ExploreOpts, PathGroup};
use whitesymex::state::{DEFAULT_BITLENGTH, State};
use whitesymex::strategies::{Bfs, Dfs, Random};

#[derive(ClapParser)]
#[command(name = "whitesymex")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Symbolic execution engine for Whitespace", long_about = None)]
struct Cli {
    /// Program to execute
    file: PathBuf,

    /// String to find
    #[arg(long)]
    find: Option<String>,

    /// String to avoid
    #[arg(long)]
    avoid: Option<String>,

    /// Path exploration strategy
    #[arg(long, value_enum, default_value_t = StrategyName::Bfs)]
    strategy: StrategyName,

    /// Maximum number of iterations for symbolic loops
    #[arg(long, value_name = "LIMIT")]
    loop_limit: Option<u32>,
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyName {
    Bfs,
    Dfs,
    Random,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let instructions = match parser::parse_file(&cli.file) {
        Ok(instructions) => instructions,
        Err(error) => {
            eprintln!("whitesymex: {}: {}", cli.file.display(), error);
            process::exit(1);
        }
    };

    let ctx = Context::new(&Config::new());
    let state = State::create_entry_state(&ctx, instructions, None, Some(DEFAULT_BITLENGTH));
    let mut group = PathGroup::new(state);

    let mut opts = ExploreOpts::new();
    if let Some(find) = &cli.find {
        opts = opts.with_find(find.as_str());
    }
    if let Some(avoid) = &cli.avoid {
        opts = opts.with_avoid(avoid.as_str());
    }
    if let Some(limit) = cli.loop_limit {
        opts = opts.with_loop_limit(limit);
    }
    opts = match cli.strategy {
        StrategyName::Bfs => opts.with_strategy(Bfs),
        StrategyName::Dfs => opts.with_strategy(Dfs),
        StrategyName::Random => opts.with_strategy(Random::new()),
    };

    group.explore(opts);

    // An empty --find matches every print but still reports from deadended.
    let find_requested = cli.find.as_deref().is_some_and(|find| !find.is_empty());
    let solution = if find_requested && !group.found.is_empty() {
        group.found.first().map(State::concretize)
    } else {
        group.deadended.first().map(State::concretize)
    };

    match solution {
        Some(Ok(bytes)) => println!("{}", String::from_utf8_lossy(&bytes)),
        Some(Err(error)) => {
            eprintln!("whitesymex: failed to concretize solution: {}", error);
            process::exit(1);
        }
        None => println!("No solution found."),
    }
}
