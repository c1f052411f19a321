//! On-disk cache for index and embedding snapshots.
//!
//! Each snapshot is a set of bincode artifacts plus a JSON metadata file.
//! Every artifact is wrapped in an [`Envelope`] recording the format version,
//! the artifact kind and the snapshot id; the metadata file is written last
//! and names the snapshot id its companions must carry. A missing file is
//! [`SearchError::MissingIndex`], anything unreadable or out of step is
//! [`SearchError::CacheCorruption`].

use crate::chunking::ChunkingConfig;
use crate::corpus::Corpus;
use crate::error::{Result, SearchError};
use crate::index::{DocLengths, InvertedIndex, Postings, TermFrequencies};
use crate::tokenizer::Analyzer;
use crate::vector::{ChunkMeta, EmbeddingMatrix, EmbeddingStore, Granularity};
use crate::DocId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::BTreeSet;
use std::fs::{create_dir_all, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactKind {
    Postings,
    TermFrequencies,
    DocLengths,
    DocMap,
    Embeddings,
    ChunkEmbeddings,
    ChunkMetadata,
}

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    format_version: u32,
    kind: ArtifactKind,
    snapshot_id: String,
    payload: T,
}

/// Settings besides the corpus that shape a snapshot's contents.
///
/// Fields a snapshot kind does not depend on stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildKey {
    /// [`Analyzer::fingerprint`] of the lexical index.
    #[serde(default)]
    pub analyzer: Option<String>,
    /// Encoder id of an embedding snapshot.
    #[serde(default)]
    pub encoder: Option<String>,
    /// Sentence windows of a chunk-granularity embedding snapshot.
    #[serde(default)]
    pub chunking: Option<ChunkingConfig>,
}

impl BuildKey {
    pub fn index(analyzer: &Analyzer) -> Self {
        Self { analyzer: Some(analyzer.fingerprint()), ..Self::default() }
    }

    pub fn embeddings(encoder: &str, granularity: Granularity, chunking: &ChunkingConfig) -> Self {
        Self {
            encoder: Some(encoder.to_string()),
            chunking: (granularity == Granularity::Chunk).then_some(*chunking),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaFile {
    pub version: u32,
    pub snapshot_id: String,
    pub num_docs: u32,
    pub corpus_fingerprint: String,
    #[serde(flatten)]
    pub key: BuildKey,
    pub created_at: String,
}

impl MetaFile {
    fn new(corpus: &Corpus, key: BuildKey) -> Self {
        let now = time::OffsetDateTime::now_utc();
        let fingerprint = corpus.fingerprint();
        let mut hasher = Sha1::new();
        hasher.update(fingerprint.as_bytes());
        hasher.update(now.unix_timestamp_nanos().to_le_bytes());
        hasher.update(key.encoder.as_deref().unwrap_or_default().as_bytes());
        Self {
            version: FORMAT_VERSION,
            snapshot_id: format!("{:x}", hasher.finalize()),
            num_docs: corpus.len() as u32,
            corpus_fingerprint: fingerprint,
            key,
            created_at: now
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_else(|_| "".into()),
        }
    }

    /// Whether this snapshot was built from `corpus` with the settings in `key`.
    pub fn is_current_for(&self, corpus: &Corpus, key: &BuildKey) -> bool {
        self.num_docs as usize == corpus.len()
            && self.corpus_fingerprint == corpus.fingerprint()
            && self.key == *key
    }
}

pub struct CachePaths {
    pub root: PathBuf,
}

impl CachePaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
    pub fn index_meta(&self) -> PathBuf { self.root.join("index_meta.json") }
    fn postings(&self) -> PathBuf { self.root.join("index.bin") }
    fn term_frequencies(&self) -> PathBuf { self.root.join("term_frequencies.bin") }
    fn doc_lengths(&self) -> PathBuf { self.root.join("doc_lengths.bin") }
    fn docmap(&self) -> PathBuf { self.root.join("docmap.bin") }
    pub fn embeddings_meta(&self, granularity: Granularity) -> PathBuf {
        match granularity {
            Granularity::Document => self.root.join("embeddings_meta.json"),
            Granularity::Chunk => self.root.join("chunk_embeddings_meta.json"),
        }
    }
    fn embeddings(&self) -> PathBuf { self.root.join("embeddings.bin") }
    fn chunk_embeddings(&self) -> PathBuf { self.root.join("chunk_embeddings.bin") }
    fn chunk_metadata(&self) -> PathBuf { self.root.join("chunk_metadata.bin") }
}

/// Write through a temp file in the same directory, then rename over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    let mut f = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(SearchError::MissingIndex { path: path.to_path_buf() })
        }
        Err(e) => return Err(e.into()),
    };
    let mut buf = Vec::new();
    f.read_to_end(&mut buf)?;
    Ok(buf)
}

fn save_artifact<T: Serialize>(
    path: &Path,
    kind: ArtifactKind,
    snapshot_id: &str,
    payload: &T,
) -> Result<()> {
    let envelope = Envelope {
        format_version: FORMAT_VERSION,
        kind,
        snapshot_id: snapshot_id.to_string(),
        payload,
    };
    let bytes = bincode::serialize(&envelope).map_err(|e| SearchError::corruption(path, e))?;
    write_atomic(path, &bytes)
}

fn load_artifact<T: DeserializeOwned>(
    path: &Path,
    kind: ArtifactKind,
    snapshot_id: &str,
) -> Result<T> {
    let buf = read_file(path)?;
    let envelope: Envelope<T> =
        bincode::deserialize(&buf).map_err(|e| SearchError::corruption(path, e))?;
    if envelope.format_version != FORMAT_VERSION {
        return Err(SearchError::corruption(
            path,
            format!("format version {} (expected {FORMAT_VERSION})", envelope.format_version),
        ));
    }
    if envelope.kind != kind {
        return Err(SearchError::corruption(
            path,
            format!("holds {:?}, expected {kind:?}", envelope.kind),
        ));
    }
    if envelope.snapshot_id != snapshot_id {
        return Err(SearchError::corruption(
            path,
            "belongs to a different snapshot than its metadata",
        ));
    }
    Ok(envelope.payload)
}

fn save_meta(path: &Path, meta: &MetaFile) -> Result<()> {
    let json = serde_json::to_string_pretty(meta).map_err(|e| SearchError::corruption(path, e))?;
    write_atomic(path, json.as_bytes())
}

pub fn load_meta(path: &Path) -> Result<MetaFile> {
    let buf = read_file(path)?;
    let meta: MetaFile =
        serde_json::from_slice(&buf).map_err(|e| SearchError::corruption(path, e))?;
    if meta.version != FORMAT_VERSION {
        return Err(SearchError::corruption(
            path,
            format!("format version {} (expected {FORMAT_VERSION})", meta.version),
        ));
    }
    Ok(meta)
}

/// Read a snapshot's metadata if present. Unreadable metadata is still an error.
pub fn existing_meta(path: &Path) -> Result<Option<MetaFile>> {
    match load_meta(path) {
        Ok(meta) => Ok(Some(meta)),
        Err(SearchError::MissingIndex { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

pub fn save_index(
    paths: &CachePaths,
    index: &InvertedIndex,
    corpus: &Corpus,
    analyzer: &Analyzer,
) -> Result<MetaFile> {
    let meta = MetaFile::new(corpus, BuildKey::index(analyzer));
    let id = meta.snapshot_id.as_str();
    save_artifact(&paths.postings(), ArtifactKind::Postings, id, &index.postings)?;
    save_artifact(
        &paths.term_frequencies(),
        ArtifactKind::TermFrequencies,
        id,
        &index.term_frequencies,
    )?;
    save_artifact(&paths.doc_lengths(), ArtifactKind::DocLengths, id, &index.doc_lengths)?;
    save_artifact(&paths.docmap(), ArtifactKind::DocMap, id, &index.docmap)?;
    save_meta(&paths.index_meta(), &meta)?;
    tracing::info!(
        cache = %paths.root.display(),
        snapshot = %meta.snapshot_id,
        "saved index snapshot"
    );
    Ok(meta)
}

/// Load all four index tables. Any missing part fails the whole load.
pub fn load_index(paths: &CachePaths) -> Result<(InvertedIndex, MetaFile)> {
    let meta = load_meta(&paths.index_meta())?;
    let id = meta.snapshot_id.as_str();
    let index = InvertedIndex {
        postings: load_artifact::<Postings>(&paths.postings(), ArtifactKind::Postings, id)?,
        term_frequencies: load_artifact::<TermFrequencies>(
            &paths.term_frequencies(),
            ArtifactKind::TermFrequencies,
            id,
        )?,
        doc_lengths: load_artifact::<DocLengths>(
            &paths.doc_lengths(),
            ArtifactKind::DocLengths,
            id,
        )?,
        docmap: load_artifact(&paths.docmap(), ArtifactKind::DocMap, id)?,
    };
    if index.num_docs() != meta.num_docs as usize {
        return Err(SearchError::corruption(
            paths.docmap(),
            format!("{} documents, metadata says {}", index.num_docs(), meta.num_docs),
        ));
    }
    if let Some(reason) = index.consistency_error() {
        return Err(SearchError::corruption(paths.root.clone(), reason));
    }
    Ok((index, meta))
}

/// Persist an embedding store. `chunking` is recorded only for chunk stores.
pub fn save_embeddings(
    paths: &CachePaths,
    store: &EmbeddingStore,
    corpus: &Corpus,
    encoder: &str,
    chunking: &ChunkingConfig,
) -> Result<MetaFile> {
    let meta = MetaFile::new(corpus, BuildKey::embeddings(encoder, store.granularity(), chunking));
    let id = meta.snapshot_id.as_str();
    match store.granularity() {
        Granularity::Document => {
            let doc_ids: Vec<DocId> = store.chunks().iter().map(|c| c.doc_id).collect();
            let rows = (doc_ids, store.matrix());
            save_artifact(&paths.embeddings(), ArtifactKind::Embeddings, id, &rows)?;
        }
        Granularity::Chunk => {
            let matrix = store.matrix();
            save_artifact(&paths.chunk_embeddings(), ArtifactKind::ChunkEmbeddings, id, matrix)?;
            let chunks = store.chunks();
            save_artifact(&paths.chunk_metadata(), ArtifactKind::ChunkMetadata, id, &chunks)?;
        }
    }
    save_meta(&paths.embeddings_meta(store.granularity()), &meta)?;
    tracing::info!(
        cache = %paths.root.display(),
        rows = store.len(),
        granularity = ?store.granularity(),
        "saved embedding snapshot"
    );
    Ok(meta)
}

pub fn load_embeddings(
    paths: &CachePaths,
    granularity: Granularity,
) -> Result<(EmbeddingStore, MetaFile)> {
    let meta = load_meta(&paths.embeddings_meta(granularity))?;
    let id = meta.snapshot_id.as_str();
    let (store, artifact) = match granularity {
        Granularity::Document => {
            let path = paths.embeddings();
            let (doc_ids, matrix): (Vec<DocId>, EmbeddingMatrix) =
                load_artifact(&path, ArtifactKind::Embeddings, id)?;
            let chunks = doc_ids.into_iter().map(ChunkMeta::whole).collect();
            (EmbeddingStore::from_parts(Granularity::Document, chunks, matrix), path)
        }
        Granularity::Chunk => {
            let matrix: EmbeddingMatrix =
                load_artifact(&paths.chunk_embeddings(), ArtifactKind::ChunkEmbeddings, id)?;
            let path = paths.chunk_metadata();
            let chunks: Vec<ChunkMeta> = load_artifact(&path, ArtifactKind::ChunkMetadata, id)?;
            (EmbeddingStore::from_parts(Granularity::Chunk, chunks, matrix), path)
        }
    };
    let store = store.map_err(|reason| SearchError::corruption(&artifact, reason))?;
    let distinct_docs = store.chunks().iter().map(|c| c.doc_id).collect::<BTreeSet<_>>().len();
    if distinct_docs != meta.num_docs as usize {
        return Err(SearchError::corruption(
            artifact,
            format!("{distinct_docs} embedded documents, metadata says {}", meta.num_docs),
        ));
    }
    Ok((store, meta))
}
