use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use hoopla_core::bm25::{Bm25Params, KeywordSearch};
use hoopla_core::chunking::{sentence_windows, word_windows, ChunkingConfig};
use hoopla_core::config::{SearchConfig, DEFAULT_SEARCH_LIMIT};
use hoopla_core::corpus::load_stop_words;
use hoopla_core::encoder::{Encoder, HashEncoder};
use hoopla_core::enhance::{enhance_query, rewrite_with_image, EnhanceMethod};
use hoopla_core::evaluation::{evaluate, GoldenDataset};
use hoopla_core::fusion::normalize;
use hoopla_core::generate::DEFAULT_RAG_LIMIT;
use hoopla_core::oracle::{ImageInput, Oracle};
use hoopla_core::persist::CachePaths;
use hoopla_core::rerank::{CrossEncoder, RerankMethod, RerankStrategy};
use hoopla_core::tokenizer::Analyzer;
use hoopla_core::vector::{Granularity, VectorSearch};
use hoopla_core::{Corpus, DocId, DocumentSource, HybridSearch, InvertedIndex, SearchHit};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

mod gemini;
#[cfg(feature = "fastembed")]
mod local_models;

use gemini::GeminiOracle;

#[derive(Parser)]
#[command(name = "hoopla")]
#[command(about = "Hybrid keyword and semantic movie search", long_about = None)]
struct Cli {
    /// Movie corpus: {"movies": [{"id", "title", "description"}]}
    #[arg(long, global = true, default_value = "data/movies.json")]
    movies: PathBuf,
    /// Stop-word list, one per line (built-in English list if omitted)
    #[arg(long, global = true)]
    stop_words: Option<PathBuf>,
    /// Cache directory for index and embedding snapshots
    #[arg(long, global = true, default_value = "cache")]
    cache: PathBuf,
    /// JSON file overriding search tunables
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true, value_enum, default_value_t = EncoderKind::Hash)]
    encoder: EncoderKind,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum EncoderKind {
    /// Feature hashing, no model download
    Hash,
    /// all-MiniLM-L6-v2 (needs the `fastembed` feature)
    Minilm,
    /// CLIP ViT-B/32 text tower, shares a space with image queries
    /// (needs the `fastembed` feature)
    Clip,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the inverted index and both embedding caches
    Build,
    /// Raw frequency of a term in a document
    Tf { doc_id: DocId, term: String },
    /// Smoothed inverse document frequency of a term
    Idf { term: String },
    /// TF-IDF of a term in a document
    Tfidf { doc_id: DocId, term: String },
    /// BM25 IDF of a term
    Bm25idf { term: String },
    /// BM25 saturated TF of a term in a document
    Bm25tf {
        doc_id: DocId,
        term: String,
        #[arg(long)]
        k1: Option<f64>,
        #[arg(long)]
        b: Option<f64>,
    },
    /// Keyword search with BM25
    Bm25search {
        query: String,
        #[arg(long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: usize,
    },
    /// Embedding similarity search
    SemanticSearch {
        query: String,
        #[arg(long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: usize,
        /// Score documents by their best sentence window
        #[arg(long, default_value_t = false)]
        chunked: bool,
    },
    /// Split text into fixed-size word windows
    Chunk {
        text: String,
        #[arg(long, default_value_t = 200)]
        chunk_size: usize,
        #[arg(long, default_value_t = 0)]
        overlap: usize,
    },
    /// Split text into sentence windows
    SemanticChunk {
        text: String,
        #[arg(long, default_value_t = 4)]
        max_chunk_size: usize,
        #[arg(long, default_value_t = 0)]
        overlap: usize,
    },
    /// Min-max normalize a list of scores
    Normalize {
        #[arg(required = true, allow_negative_numbers = true)]
        scores: Vec<f64>,
    },
    /// Hybrid search, weighted sum of normalized scores
    WeightedSearch {
        query: String,
        #[arg(long)]
        alpha: Option<f64>,
        #[arg(long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: usize,
    },
    /// Hybrid search with reciprocal rank fusion
    RrfSearch {
        query: String,
        #[arg(long)]
        k: Option<f64>,
        #[arg(long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: usize,
        /// Rewrite the query with the oracle first: spell, rewrite or expand
        #[arg(long)]
        enhance: Option<EnhanceMethod>,
        /// Rerank the fused shortlist: individual, batch or cross_encoder
        #[arg(long)]
        rerank_method: Option<RerankMethod>,
    },
    /// Answer a question from the top RRF results
    Rag {
        query: String,
        #[arg(long, default_value_t = DEFAULT_RAG_LIMIT)]
        limit: usize,
    },
    /// Rewrite a text query using an image
    DescribeImage {
        #[arg(long)]
        image: PathBuf,
        #[arg(long)]
        query: String,
    },
    /// Embed an image with CLIP and report its size
    VerifyImageEmbedding { image: PathBuf },
    /// Find movies whose descriptions sit closest to an image
    ImageSearch {
        image: PathBuf,
        #[arg(long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: usize,
    },
    /// Precision/recall of RRF search against a golden dataset
    Evaluate {
        #[arg(long, default_value = "data/golden_dataset.json")]
        golden: PathBuf,
        #[arg(long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();
    let app = App::new(&cli)?;

    match &cli.command {
        Commands::Build => build(&app),
        Commands::Tf { doc_id, term } => {
            println!("{}", app.keyword()?.tf(*doc_id, term)?);
            Ok(())
        }
        Commands::Idf { term } => {
            println!("Inverse document frequency of '{term}': {:.3}", app.keyword()?.idf(term)?);
            Ok(())
        }
        Commands::Tfidf { doc_id, term } => {
            let score = app.keyword()?.tf_idf(*doc_id, term)?;
            println!("TF-IDF score of '{term}' in document '{doc_id}': {score:.3}");
            Ok(())
        }
        Commands::Bm25idf { term } => {
            println!("BM25 IDF score of '{term}': {:.3}", app.keyword()?.bm25_idf(term)?);
            Ok(())
        }
        Commands::Bm25tf { doc_id, term, k1, b } => {
            let defaults = app.config.bm25;
            let params = Bm25Params { k1: k1.unwrap_or(defaults.k1), b: b.unwrap_or(defaults.b) };
            let score = app.keyword()?.bm25_tf(*doc_id, term, params)?;
            println!("BM25 TF score of '{term}' in document '{doc_id}': {score:.3}");
            Ok(())
        }
        Commands::Bm25search { query, limit } => {
            let ks = app.keyword()?;
            let index = ks.snapshot()?;
            println!("Searching for: {query}");
            for (i, r) in ks.search(query, *limit)?.iter().enumerate() {
                let name = title(&index, r.doc_id);
                println!("{}. ({}) {name} - Score: {:.3}", i + 1, r.doc_id, r.score);
            }
            Ok(())
        }
        Commands::SemanticSearch { query, limit, chunked } => {
            semantic_search(&app, query, *limit, *chunked)
        }
        Commands::Chunk { text, chunk_size, overlap } => {
            println!("Chunking {} characters", text.chars().count());
            for (i, chunk) in word_windows(text, *chunk_size, *overlap)?.iter().enumerate() {
                println!("{}. {chunk}", i + 1);
            }
            Ok(())
        }
        Commands::SemanticChunk { text, max_chunk_size, overlap } => {
            let cfg = ChunkingConfig { max_sentences: *max_chunk_size, overlap: *overlap };
            println!("Semantically chunking {} characters", text.chars().count());
            for (i, chunk) in sentence_windows(text, &cfg)?.iter().enumerate() {
                println!("{}. {chunk}", i + 1);
            }
            Ok(())
        }
        Commands::Normalize { scores } => {
            for s in normalize(scores) {
                println!("* {s:.3}");
            }
            Ok(())
        }
        Commands::WeightedSearch { query, alpha, limit } => {
            let hs = app.hybrid()?;
            let alpha = alpha.unwrap_or(app.config.alpha);
            let hits = hs.weighted_search(query, alpha, *limit)?;
            let index = hs.documents()?;
            print_hits(&index, &hits, "Hybrid Score");
            Ok(())
        }
        Commands::RrfSearch { query, k, limit, enhance, rerank_method } => {
            let k = k.unwrap_or(app.config.rrf_k);
            rrf_search(&app, query, k, *limit, *enhance, *rerank_method).await
        }
        Commands::Rag { query, limit } => {
            let oracle = GeminiOracle::from_env()?;
            let hs = app.hybrid()?;
            let out = hs.answer(&oracle, query, app.config.rrf_k, *limit).await?;
            let index = hs.documents()?;
            println!("Search Results:");
            for id in &out.sources {
                println!("  - {}", title(&index, *id));
            }
            println!("\nRAG Response:\n{}", out.answer);
            Ok(())
        }
        Commands::DescribeImage { image, query } => {
            let image = ImageInput::from_path(image)
                .with_context(|| format!("reading {}", image.display()))?;
            let oracle = GeminiOracle::from_env()?;
            println!("Rewritten query: {}", rewrite_with_image(&oracle, query, &image).await?);
            Ok(())
        }
        Commands::VerifyImageEmbedding { image } => {
            let v = image_encoder()?.embed_image(image)?;
            println!("Embedding shape: {} dimensions", v.len());
            Ok(())
        }
        Commands::ImageSearch { image, limit } => image_search(&app, image, *limit),
        Commands::Evaluate { golden, limit } => {
            let golden = GoldenDataset::from_json_file(golden)?;
            let hs = app.hybrid()?;
            println!("k={limit}\n");
            for r in evaluate(&hs, &golden, *limit)? {
                println!("- Query: {}", r.query);
                println!("  - Precision@{limit}: {:.3}", r.precision);
                println!("  - Recall@{limit}: {:.3}", r.recall);
                println!("  - F1 Score: {:.3}", r.f1);
                println!("  - Retrieved: {}", r.retrieved.join(", "));
                println!("  - Relevant: {}", r.relevant.join(", "));
            }
            Ok(())
        }
    }
}

/// Resolved global options.
struct App {
    movies: PathBuf,
    paths: CachePaths,
    analyzer: Analyzer,
    config: SearchConfig,
    encoder: EncoderKind,
}

impl App {
    fn new(cli: &Cli) -> Result<Self> {
        let analyzer = match &cli.stop_words {
            Some(path) => Analyzer::new(load_stop_words(path)?),
            None => Analyzer::default(),
        };
        let config = match &cli.config {
            Some(path) => SearchConfig::from_json_file(path)?,
            None => SearchConfig::default(),
        };
        Ok(Self {
            movies: cli.movies.clone(),
            paths: CachePaths::new(&cli.cache),
            analyzer,
            config,
            encoder: cli.encoder,
        })
    }

    fn corpus(&self) -> Result<Corpus> {
        Corpus::from_json_file(&self.movies)
            .with_context(|| format!("loading {}", self.movies.display()))
    }

    fn encoder(&self) -> Result<Arc<dyn Encoder>> {
        match self.encoder {
            EncoderKind::Hash => Ok(Arc::new(HashEncoder::default())),
            #[cfg(feature = "fastembed")]
            EncoderKind::Minilm => Ok(Arc::new(local_models::MiniLmEncoder::new()?)),
            #[cfg(feature = "fastembed")]
            EncoderKind::Clip => Ok(Arc::new(local_models::ClipEncoder::new()?)),
            #[cfg(not(feature = "fastembed"))]
            EncoderKind::Minilm | EncoderKind::Clip => {
                bail!("local model encoders need a build with `--features fastembed`")
            }
        }
    }

    /// Keyword search over the cached index; fails if `build` was never run.
    fn keyword(&self) -> Result<KeywordSearch> {
        let ks = KeywordSearch::new(self.analyzer.clone(), self.config.bm25);
        ks.load(&self.paths)?;
        Ok(ks)
    }

    fn hybrid(&self) -> Result<HybridSearch> {
        let hs = HybridSearch::new(self.analyzer.clone(), self.encoder()?, self.config.clone())?;
        hs.load_or_build(&self.corpus()?, &self.paths)?;
        Ok(hs)
    }
}

fn build(app: &App) -> Result<()> {
    let corpus = app.corpus()?;
    let encoder = app.encoder()?;
    println!("Building inverted index...");
    let ks = KeywordSearch::new(app.analyzer.clone(), app.config.bm25);
    let index = ks.rebuild(&corpus, &app.paths)?;
    println!("Indexed {} documents, {} terms", index.num_docs(), index.num_terms());
    for granularity in [Granularity::Document, Granularity::Chunk] {
        let vs = VectorSearch::new(granularity, app.config.chunking);
        let store = vs.rebuild(&corpus, encoder.as_ref(), &app.paths)?;
        println!("Generated {} {:?} embeddings", store.len(), granularity);
    }
    tracing::info!(cache = %app.paths.root.display(), "build complete");
    Ok(())
}

fn semantic_search(app: &App, query: &str, limit: usize, chunked: bool) -> Result<()> {
    let corpus = app.corpus()?;
    let encoder = app.encoder()?;
    let granularity = if chunked { Granularity::Chunk } else { Granularity::Document };
    let vs = VectorSearch::new(granularity, app.config.chunking);
    vs.load_or_build(&corpus, encoder.as_ref(), &app.paths)?;
    for (i, r) in vs.search(query, encoder.as_ref(), limit)?.iter().enumerate() {
        let Some(doc) = corpus.document(r.doc_id) else { continue };
        println!("{}. {} (score: {:.3})", i + 1, doc.title, r.score);
        println!("   {}", snippet(&doc.description));
    }
    Ok(())
}

async fn rrf_search(
    app: &App,
    query: &str,
    k: f64,
    limit: usize,
    enhance: Option<EnhanceMethod>,
    rerank_method: Option<RerankMethod>,
) -> Result<()> {
    let hs = app.hybrid()?;
    let mut oracle: Option<GeminiOracle> = None;
    let needs_oracle =
        matches!(rerank_method, Some(RerankMethod::Individual | RerankMethod::Batch));
    if enhance.is_some() || needs_oracle {
        oracle = Some(GeminiOracle::from_env()?);
    }

    let mut query = query.to_string();
    if let (Some(method), Some(oracle)) = (enhance, oracle.as_ref()) {
        let enhanced = enhance_query(oracle, &query, method).await?;
        println!("Enhanced query ({method}): '{query}' -> '{enhanced}'\n");
        query = enhanced;
    }

    let hits = match rerank_method {
        None => hs.rrf_search(&query, k, limit)?,
        Some(method) => {
            let cross_encoder = cross_encoder(method)?;
            let strategy = match (method, oracle.as_ref(), cross_encoder.as_deref()) {
                (RerankMethod::Individual, Some(o), _) => RerankStrategy::Individual {
                    oracle: o as &dyn Oracle,
                    pacing: app.config.rerank_pacing(),
                },
                (RerankMethod::Batch, Some(o), _) => {
                    RerankStrategy::Batch { oracle: o as &dyn Oracle }
                }
                (RerankMethod::CrossEncoder, _, Some(model)) => {
                    RerankStrategy::CrossEncoder { model }
                }
                _ => bail!("no collaborator available for {method} reranking"),
            };
            println!("Reranking top {limit} results using {method} method...\n");
            hs.rrf_search_reranked(&query, k, limit, &strategy).await?
        }
    };
    let index = hs.documents()?;
    print_hits(&index, &hits, "RRF Score");
    Ok(())
}

#[cfg(feature = "fastembed")]
fn image_encoder() -> Result<Arc<dyn Encoder>> {
    Ok(Arc::new(local_models::ClipEncoder::new()?))
}

#[cfg(not(feature = "fastembed"))]
fn image_encoder() -> Result<Arc<dyn Encoder>> {
    bail!("image embeddings need a build with `--features fastembed`")
}

/// Whole-document CLIP embeddings ranked against the image vector.
fn image_search(app: &App, image: &Path, limit: usize) -> Result<()> {
    let encoder = image_encoder()?;
    let query = encoder.embed_image(image)?;
    let corpus = app.corpus()?;
    let vs = VectorSearch::new(Granularity::Document, app.config.chunking);
    vs.load_or_build(&corpus, encoder.as_ref(), &app.paths)?;
    for (i, r) in vs.search_vector(encoder.as_ref(), &query, limit)?.iter().enumerate() {
        let Some(doc) = corpus.document(r.doc_id) else { continue };
        println!("{}. {} (similarity: {:.3})", i + 1, doc.title, r.score);
        println!("   {}", snippet(&doc.description));
    }
    Ok(())
}

#[cfg(feature = "fastembed")]
fn cross_encoder(method: RerankMethod) -> Result<Option<Box<dyn CrossEncoder>>> {
    if method != RerankMethod::CrossEncoder {
        return Ok(None);
    }
    Ok(Some(Box::new(local_models::FastEmbedCrossEncoder::new()?)))
}

#[cfg(not(feature = "fastembed"))]
fn cross_encoder(method: RerankMethod) -> Result<Option<Box<dyn CrossEncoder>>> {
    if method == RerankMethod::CrossEncoder {
        bail!("cross_encoder reranking needs a build with `--features fastembed`");
    }
    Ok(None)
}

fn title(index: &InvertedIndex, id: DocId) -> &str {
    index.document(id).map_or("<unknown>", |d| d.title.as_str())
}

fn snippet(text: &str) -> String {
    const MAX: usize = 100;
    if text.chars().count() <= MAX {
        return text.to_string();
    }
    let cut: String = text.chars().take(MAX).collect();
    format!("{cut}...")
}

fn rank(r: Option<usize>) -> String {
    r.map_or_else(|| "-".into(), |r| r.to_string())
}

fn print_hits(index: &InvertedIndex, hits: &[SearchHit], label: &str) {
    for (i, h) in hits.iter().enumerate() {
        println!("{}. {}", i + 1, title(index, h.doc_id));
        if let Some(score) = h.rerank_score {
            println!("   Rerank Score: {score:.3}");
        }
        println!("   {label}: {:.3}", h.score);
        println!(
            "   BM25: {} (rank {}), Semantic: {} (rank {})",
            h.bm25_score.map_or_else(|| "-".into(), |s| format!("{s:.3}")),
            rank(h.bm25_rank),
            h.semantic_score.map_or_else(|| "-".into(), |s| format!("{s:.3}")),
            rank(h.semantic_rank),
        );
        if let Some(doc) = index.document(h.doc_id) {
            println!("   {}", snippet(&doc.description));
        }
    }
}
