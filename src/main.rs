use std::fs::{self, OpenOptions};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context};
use clap::Parser;
use inquire::error::InquireResult;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod content;
mod document;
mod errors;
mod extract;
mod invalidate;
mod pipeline;
mod providers;
mod reconcile;
mod retry;
mod semantic;
mod source;
mod storage;
mod tagging;
#[cfg(test)]
mod tests;

use cli::Command;
use config::Config;
use errors::PipelineError;
use pipeline::{Pipeline, RunSummary};
use providers::OpenAiClient;
use reconcile::Scope;
use source::{ContentSource, GhostClient};
use storage::{BackendLocal, StorageManager};
use tagging::TagGenerator;

fn init_logging(config: &Config) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match &config.log_file {
        Some(path) => {
            if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
                fs::create_dir_all(dir)
                    .with_context(|| format!("cannot create log directory {dir:?}"))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {path:?}"))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }

    Ok(())
}

fn openai(config: &Config) -> anyhow::Result<Arc<OpenAiClient>> {
    let client = OpenAiClient::new(
        config.require_openai().map_err(PipelineError::from)?,
        &config.openai_base_url,
        &config.embedding_model,
        &config.completion_model,
        config.completion.clone(),
        config.request_timeout(),
    )?;
    Ok(Arc::new(client))
}

fn print_summary(summary: &RunSummary) -> anyhow::Result<()> {
    tracing::info!(
        processed = summary.processed,
        succeeded = summary.succeeded,
        skipped = summary.skipped,
        failed = summary.failed,
        invalidated = summary.invalidated,
        "run finished"
    );
    println!("{}", serde_json::to_string_pretty(summary)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();

    let config = Arc::new(Config::load().map_err(PipelineError::from)?);
    init_logging(&config)?;

    let storage: Arc<dyn StorageManager> = Arc::new(
        BackendLocal::new(config.cache_dir())
            .with_context(|| format!("cannot open cache dir {:?}", config.cache_dir()))?,
    );

    let connect = || -> anyhow::Result<Pipeline> {
        let source: Arc<dyn ContentSource> = Arc::new(GhostClient::new(
            config.require_source().map_err(PipelineError::from)?,
            config.request_timeout(),
        )?);
        Ok(Pipeline::new(config.clone(), source, storage.clone()))
    };

    let summary = match args.command {
        Command::Status => {
            let status = pipeline::cache_status(storage.clone());
            println!("{}", serde_json::to_string_pretty(&status)?);
            return Ok(());
        }

        Command::Embed => {
            let embedder = openai(&config)?;
            connect()?.embed_all(embedder.as_ref())?
        }

        Command::Relate => connect()?.relate_all()?,

        Command::Sync => {
            let embedder = openai(&config)?;
            let pipeline = connect()?;
            let mut summary = pipeline.embed_all(embedder.as_ref())?;
            summary.absorb(pipeline.relate_all()?);
            summary
        }

        Command::Tag { reset } => {
            let generator = TagGenerator::new(openai(&config)?, &config);
            connect()?.tag_all(&generator, reset)?
        }

        Command::Cleanup {
            scope,
            purge_cache,
            yes,
        } => {
            let pipeline = connect()?;
            if scope == Scope::Both && !yes {
                match inquire::prompt_confirmation(
                    "You are about to strip every tag from every post. Are you really sure?",
                ) {
                    InquireResult::Ok(true) => {}
                    InquireResult::Ok(false) => return Ok(()),
                    InquireResult::Err(err) => bail!("An error occurred: {}", err),
                }
            }
            pipeline.cleanup(scope, purge_cache)?
        }
    };

    print_summary(&summary)
}
