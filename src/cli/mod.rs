// src/cli/mod.rs — CLI definition (clap derive)

pub mod run;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "koi-rlm",
    about = "Explore oversized text or code with sandboxed scripts under a hard budget",
    version
)]
pub struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one session against a file
    Run(RunArgs),

    /// Worker process entry point (spawned by the sandbox)
    #[command(name = "sandbox-worker", hide = true)]
    SandboxWorker,
}

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// File to load as context
    #[arg(short, long)]
    pub file: String,

    /// Treat the file as source code and expose navigation tools
    #[arg(long)]
    pub code: bool,

    /// Source language (guessed when omitted)
    #[arg(long, requires = "code")]
    pub language: Option<String>,

    /// Question to answer (read from stdin when omitted)
    #[arg(short, long)]
    pub task: Option<String>,

    /// Turn limit
    #[arg(long, default_value = "10")]
    pub max_turns: u32,

    /// Session budget in USD (overrides config)
    #[arg(long)]
    pub budget: Option<f64>,

    /// Include the event trace in the result
    #[arg(long)]
    pub trace: bool,

    /// Print the full result as JSON
    #[arg(long)]
    pub json: bool,
}
