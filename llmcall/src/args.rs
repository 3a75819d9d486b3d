use std::path::PathBuf;

use clap::Parser;

/// Run one LLM completion
#[derive(Debug, Parser)]
#[command(name = "llmcall", about = "Run one Langfuse LLM completion from a JSON request file")]
pub struct Args {
    /// Path to configuration file; environment variables are used when absent
    #[arg(short, long, env = "LANGFUSE_LLM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Path to the JSON completion request
    #[arg(short, long)]
    pub request: PathBuf,

    /// Stream the completion to stdout as it arrives
    #[arg(long)]
    pub stream: bool,

    /// Log filter directive
    #[arg(long, default_value = "info", env = "LANGFUSE_LOG")]
    pub log_filter: String,
}
