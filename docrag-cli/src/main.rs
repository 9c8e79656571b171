mod cli;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use docrag::{
    AutoLoader, DocumentOutcome, IngestReport, SearchResult, Services, discover_documents,
};
use docrag_server::{ServerConfig, run_server};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Expand directories into the supported files beneath them.
fn expand_paths(paths: &[PathBuf], extensions: &[String]) -> Result<Vec<PathBuf>> {
    let extensions: Vec<&str> = if extensions.is_empty() {
        AutoLoader::default_extensions()
    } else {
        extensions.iter().map(|e| e.trim_start_matches('.')).collect()
    };

    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let found = discover_documents(path, &extensions)
                .with_context(|| format!("failed to scan {}", path.display()))?;
            info!(dir = %path.display(), files = found.len(), "discovered documents");
            files.extend(found);
        } else {
            files.push(path.clone());
        }
    }
    Ok(files)
}

fn print_report(report: &IngestReport) {
    for document in &report.documents {
        match &document.outcome {
            DocumentOutcome::Ingested { chunks, removed } => {
                let id = &document.document_id;
                println!("ok     {id} ({chunks} chunks, {removed} stale removed)")
            }
            DocumentOutcome::Failed { error } => {
                println!("failed {}: {error}", document.document_id)
            }
        }
    }
    println!(
        "{} of {} documents ingested, {} chunks written",
        report.succeeded(),
        report.documents.len(),
        report.total_chunks()
    );
}

fn print_results(results: &[SearchResult]) {
    if results.is_empty() {
        println!("No relevant documents were found.");
        return;
    }
    for (i, result) in results.iter().enumerate() {
        println!("[{}] {} (distance {:.4})", i + 1, result.chunk.source_label(), result.distance);
        println!("{}\n", result.chunk.text.trim());
    }
}

async fn ingest(services: &Services, paths: &[PathBuf], extensions: &[String]) -> Result<()> {
    let files = expand_paths(paths, extensions)?;
    if files.is_empty() {
        bail!("no supported documents found");
    }

    let pipeline = services.ingestion_pipeline()?;
    let report = pipeline.ingest(&services.settings().collection, &files).await?;
    print_report(&report);

    if report.succeeded() == 0 {
        bail!("no documents were ingested");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.json);

    let mut settings = cli.settings.to_settings().context("invalid settings")?;
    if let Command::Query { max_distance: Some(max), .. } = &cli.command {
        settings.rag.max_distance = Some(*max);
    }
    let services = Services::init(settings).await.context("failed to initialise services")?;

    match cli.command {
        Command::Ingest { paths, extensions } => {
            let outcome = ingest(&services, &paths, &extensions).await;
            services.shutdown().await.context("failed to flush the vector store")?;
            outcome
        }
        Command::Query { question, top_k, topic_weight, json_output, .. } => {
            let collection = services.settings().collection.clone();
            let k = top_k.unwrap_or(services.settings().rag.top_k);
            let mut results = services
                .retriever()
                .retrieve(&collection, &question, k, topic_weight.as_deref())
                .await?;
            if json_output {
                for result in &mut results {
                    result.chunk.embedding.clear();
                }
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                print_results(&results);
            }
            Ok(())
        }
        Command::Serve { host, port } => run_server(ServerConfig { host, port }, services).await,
    }
}
