use clap::{Parser, Subcommand};
use miette::{miette, Result};
use std::path::PathBuf;

use trace_slicer::cli;

#[derive(Parser)]
#[command(name = "trace-slicer")]
#[command(about = "Backward dynamic slicer for recorded bytecode traces")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute the dynamic slice of a trace bundle
    Slice {
        /// Trace bundle (JSON)
        input: PathBuf,

        /// Slicing criteria, Class.method[:line][(occurrence)][:variables]
        #[arg(required = true)]
        criteria: Vec<String>,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Read the trace on a separate thread
        #[arg(long)]
        multithreaded: bool,

        /// Show a progress bar
        #[arg(long)]
        progress: bool,

        /// Log calls into methods that were not traced
        #[arg(long)]
        warn_untraced: bool,

        /// Seed for the control dependence worklist ordering
        #[arg(long)]
        seed: Option<u64>,

        /// Print every sliced instance with its distance
        #[arg(long)]
        instances: bool,
    },

    /// Build and inspect control flow graphs
    Cfg {
        /// Trace bundle (JSON)
        input: PathBuf,
        /// Method to analyze as Class.name (all methods if not specified)
        #[arg(short, long)]
        method: Option<String>,
        /// Output DOT file for visualization (optional)
        #[arg(short, long)]
        dot: Option<PathBuf>,
        /// List control dependences of every method
        #[arg(long)]
        control_dependences: bool,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Slice {
            input,
            criteria,
            output,
            multithreaded,
            progress,
            warn_untraced,
            seed,
            instances,
        } => {
            let args = cli::slice::SliceArgs {
                input_path: input,
                criteria,
                output_path: output,
                multithreaded,
                progress,
                warn_untraced,
                seed,
                show_instances: instances,
            };
            cli::slice::slice(&args).map_err(|e| miette!("{}", e))
        }
        Commands::Cfg {
            input,
            method,
            dot,
            control_dependences,
        } => {
            let args = cli::cfg::CfgArgs {
                input_path: input,
                method,
                dot_path: dot,
                control_dependences,
            };
            cli::cfg::cfg(&args).map_err(|e| miette!("{}", e))
        }
    }
}
