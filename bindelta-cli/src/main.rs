// CLI application
use clap::Parser;
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "bindelta")]
#[command(about = "Graph-based binary diffing")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v: info, -vv: debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Diff two exported binaries and print the match table
    Diff {
        /// Path to the primary export
        primary: PathBuf,

        /// Path to the secondary export
        secondary: PathBuf,

        /// Matching configuration (JSON); built-in defaults when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Write the full match catalog as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Also list basic-block matches per function
        #[arg(long)]
        basic_blocks: bool,
    },
    /// Render the deterministic textual dump of an export
    Dump {
        /// Path to the export
        input: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match cli.command {
        Commands::Diff {
            primary,
            secondary,
            config,
            output,
            basic_blocks,
        } => commands::diff(&primary, &secondary, config.as_deref(), output.as_deref(), basic_blocks),
        Commands::Dump { input } => commands::dump(&input),
    }
}
