use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "memlens")]
#[command(about = "Inspect the runtime type table and object list of a captured target")]
#[command(version)]
struct Args {
    /// Memory snapshot to inspect (JSON)
    #[arg(short, long, global = true, default_value = "snapshot.json")]
    snapshot: PathBuf,

    /// Layout and singleton configuration (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List classes in the type table
    Classes {
        /// Only show classes whose full name starts with this
        #[arg(short, long)]
        prefix: Option<String>,
    },
    /// Show one class and its static field block
    Class {
        /// Full class name, e.g. "Game.Player"
        name: String,
    },
    /// Resolve a configured singleton
    Singleton {
        /// Singleton name from the config file
        name: String,

        /// Keep retrying until the target has loaded (Ctrl+C to stop)
        #[arg(short, long)]
        wait: bool,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Find a live object by name and list its components
    Object {
        name: String,

        /// Maximum nodes visited per direction
        #[arg(long)]
        max_depth: Option<usize>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("memlens_core={level}").parse()?)
                .add_directive(format!("memlens={level}").parse()?),
        )
        .with_target(false)
        .init();

    let context = commands::Context::open(&args.snapshot, args.config.as_deref())?;

    match args.command {
        Command::Classes { prefix } => commands::classes::run(&context, prefix.as_deref()),
        Command::Class { name } => commands::class::run(&context, &name),
        Command::Singleton { name, wait, json } => {
            commands::singleton::run(&context, &name, wait, json)
        }
        Command::Object { name, max_depth } => commands::object::run(&context, &name, max_depth),
    }
}
