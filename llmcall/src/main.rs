#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

mod args;
mod request;

use std::sync::Arc;

use args::Args;
use clap::Parser;
use futures_util::StreamExt;
use langfuse_config::Config;
use langfuse_core::{EventIngestor, HttpIngestor, LoggingIngestor};
use langfuse_llm::{Completion, LlmService};
use request::RequestFile;
use tokio::io::AsyncWriteExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::from_env()?,
    };

    // Initialize telemetry
    let _telemetry_guard = langfuse_telemetry::init(config.telemetry.as_ref(), &args.log_filter)?;

    let request = RequestFile::read(&args.request).await?;
    let params = request.into_params(args.stream);
    let traced = params.trace_params.is_some();

    tracing::info!(
        config_path = ?args.config.as_ref().map(|p| p.display().to_string()),
        adapter = %params.model_params.adapter,
        model = %params.model_params.model,
        streaming = params.streaming,
        traced,
        "starting completion"
    );

    let service = LlmService::from_config(&config, ingestor(&config))?;
    let result = service.fetch_llm_completion(params).await?;

    let mut stdout = tokio::io::stdout();
    match result.completion {
        Completion::Text(text) => stdout.write_all(text.as_bytes()).await?,
        Completion::Stream(mut stream) => {
            while let Some(chunk) = stream.next().await {
                stdout.write_all(&chunk?).await?;
                stdout.flush().await?;
            }
        }
        Completion::Structured(value) => stdout.write_all(serde_json::to_string_pretty(&value)?.as_bytes()).await?,
        Completion::ToolCall(response) => {
            stdout
                .write_all(serde_json::to_string_pretty(&response)?.as_bytes())
                .await?;
        }
    }
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;

    if traced {
        result.traced_events.process().await;
    }

    Ok(())
}

/// HTTP ingestor when ingestion is configured, otherwise a logging one
fn ingestor(config: &Config) -> Arc<dyn EventIngestor> {
    let ingestion = &config.ingestion;
    match (&ingestion.base_url, &ingestion.public_key, &ingestion.secret_key) {
        (Some(base_url), Some(public_key), Some(secret_key)) => {
            tracing::info!(base_url = %base_url, "forwarding traced events to Langfuse");
            Arc::new(HttpIngestor::new(
                reqwest::Client::new(),
                base_url,
                public_key.clone(),
                secret_key.clone(),
            ))
        }
        _ => {
            tracing::debug!("ingestion not configured, traced events are logged only");
            Arc::new(LoggingIngestor)
        }
    }
}
