use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use walkdir::WalkDir;

use finrag_core::chunker::{ChunkerConfig, TextChunker};
use finrag_core::config::{expand_path, Config};
use finrag_core::fallback::{try_in_order, Strategy};
use finrag_core::oracle::{use_hashed_embeddings, EmbeddingOracle, HashedEmbedder};
use finrag_core::types::{Meta, SourceDocument};
use finrag_engine::{RetrievalConfig, RetrieveOptions, Retriever};
use finrag_lexical::{LexicalConfig, LexicalIndex};
use finrag_vector::VectorIndex;

fn parse_args() -> (String, Vec<String>) {
    let mut args: Vec<String> = env::args().collect();
    let prog = args.remove(0);
    if args.is_empty() {
        eprintln!("Usage: {} <ingest|query|delete|stats> [args...]", prog);
        std::process::exit(1);
    }
    let cmd = args.remove(0);
    (cmd, args)
}

async fn build_retriever(config: &Config) -> anyhow::Result<Retriever> {
    let lexical_path = expand_path(
        config
            .get::<String>("data.lexical_index_path")
            .unwrap_or_else(|_| "./database/lexical_index.json".to_string()),
    );
    let lancedb_dir = expand_path(
        config
            .get::<String>("data.lancedb_dir")
            .unwrap_or_else(|_| "./database/lancedb".to_string()),
    );
    let table: String = config.get("data.table").unwrap_or_else(|_| "passages".to_string());

    let dim: usize = config.get("embedding.dim").unwrap_or(1024);
    if !use_hashed_embeddings() {
        println!("No external embedding oracle wired in; using deterministic hashed embeddings");
    }
    let embedder: Arc<dyn EmbeddingOracle> = Arc::new(HashedEmbedder::new(dim));

    let chunker = TextChunker::new(ChunkerConfig {
        chunk_size: config.get("chunking.chunk_size").unwrap_or(1000),
        chunk_overlap: config.get("chunking.chunk_overlap").unwrap_or(200),
        ..ChunkerConfig::default()
    })?;

    let lexical = Arc::new(LexicalIndex::open(LexicalConfig {
        persist_path: lexical_path,
        ..LexicalConfig::default()
    }));
    let vector = VectorIndex::open(&lancedb_dir, &table, embedder).await?;

    let retrieval: RetrievalConfig = config.get("retrieval").unwrap_or_default();
    // No rerank oracle ships with the CLI; queries return the fused ranking.
    Ok(Retriever::new(chunker, lexical, vector, None, retrieval))
}

fn list_txt_files(root: &Path) -> Vec<PathBuf> {
    let mut txt_files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("txt"))
        .map(|e| e.path().to_path_buf())
        .collect();
    txt_files.sort();
    txt_files
}

fn read_file_content(path: &Path) -> anyhow::Result<String> {
    try_in_order(vec![
        Strategy::new("utf-8", || Ok(fs::read_to_string(path)?)),
        Strategy::new("lossy", || Ok(String::from_utf8_lossy(&fs::read(path)?).to_string())),
    ])
}

async fn ingest(retriever: &Retriever, data_dir: &Path) -> anyhow::Result<()> {
    let files = list_txt_files(data_dir);
    if files.is_empty() {
        println!("No .txt files found under {}.", data_dir.display());
        return Ok(());
    }

    println!("Ingesting {} files from {}", files.len(), data_dir.display());
    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files ({percent}%) {msg}")?
            .progress_chars("#>-"),
    );

    let mut total_chunks = 0usize;
    for file_path in &files {
        let content = read_file_content(file_path)?;
        let source = file_path.display().to_string();
        let mut meta = Meta::new();
        meta.insert("doc_path".to_string(), source.clone());
        let outcome = retriever
            .index_document(&SourceDocument::from_text(source, content), &meta)
            .await;
        total_chunks += outcome.chunks_added;
        pb.inc(1);
        pb.set_message(format!("{}", file_path.display()));
    }
    pb.finish_with_message("indexing complete");

    // Flush whatever the debounce counter is still holding.
    retriever.lexical().save();
    println!("✅ Ingest complete ({} files, {} new chunks)", files.len(), total_chunks);
    Ok(())
}

async fn query(retriever: &Retriever, text: &str, k: Option<usize>) -> anyhow::Result<()> {
    let outcome = retriever
        .retrieve(text, RetrieveOptions { k, ..RetrieveOptions::default() })
        .await?;

    println!("{}", outcome.combined_context);
    println!();
    println!(
        "{} results (reranked: {})",
        outcome.results.len(),
        outcome.is_reranked
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::load().map_err(|e| {
        eprintln!("Error loading config: {}", e);
        e
    })?;
    let (cmd, args) = parse_args();

    let retriever = build_retriever(&config).await?;

    match cmd.as_str() {
        "ingest" => {
            let data_dir = args.first().map(PathBuf::from).unwrap_or_else(|| {
                let dir: String =
                    config.get("data.raw_txt_dir").unwrap_or_else(|_| "./data/txt".to_string());
                expand_path(dir)
            });
            ingest(&retriever, &data_dir).await?;
        }
        "query" => {
            let Some(text) = args.first() else {
                eprintln!("Usage: finrag query \"<query>\" [k]");
                std::process::exit(1);
            };
            let k = args.get(1).and_then(|v| v.parse().ok());
            query(&retriever, text, k).await?;
        }
        "delete" => {
            let Some(source) = args.first() else {
                eprintln!("Usage: finrag delete <source>");
                std::process::exit(1);
            };
            let removed = retriever.delete_document(source).await;
            println!("delete {}: {}", source, if removed { "removed" } else { "nothing matched" });
        }
        "stats" => {
            let stats = retriever.get_stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        _ => {
            eprintln!("Unknown command: {}", cmd);
            std::process::exit(1);
        }
    }
    Ok(())
}
