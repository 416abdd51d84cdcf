//! chemkb RAG - Knowledge base orchestrator
//!
//! This crate ties the pipeline together:
//! - Document loading and chunking (chemkb-parser)
//! - Embedding and exact L2 search (chemkb-vector)
//! - Persistent per-document cache and query embedding memo (`cache`)
//!
//! A `KnowledgeBase` starts empty and becomes ready after its first
//! successful `ingest`. Further documents are merged into the same corpus;
//! every retrieved chunk keeps its source path and page. Re-ingesting an
//! edited file replaces its previous version.

use chemkb_core::{AppConfig, Chunk, KbError, Result, RetrievedChunk};
use chrono::{DateTime, Utc};
use chemkb_parser::{fingerprint_file, ChunkConfig, Chunker, LoaderRegistry};
use chemkb_vector::{create_embedding_client, EmbeddingClient, FlatL2Index, HashingEmbedder};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub mod cache;

pub use cache::{
    CacheEntry, CacheError, CacheHeader, CacheManager, CacheStats, CacheStatsReport, CachedCorpus,
    DocumentInfo, DocumentKey, QueryEmbeddingCache,
};

/// Reference sources the assistant cites alongside ingested documents
pub const REFERENCE_SOURCES: [&str; 3] = ["NIST", "Perry's Handbook", "CRC Handbook"];

// ============================================================================
// Reports
// ============================================================================

/// Outcome of one `ingest` call
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub key: DocumentKey,
    pub path: PathBuf,

    /// Chunks contributed by this document
    pub chunk_count: usize,

    pub page_count: u32,

    /// When the document's text was extracted (kept across cache hits)
    pub extracted_at: DateTime<Utc>,

    /// Chunks and index were read from the disk cache
    pub from_cache: bool,

    /// The document was already part of the corpus; nothing changed
    pub already_loaded: bool,

    /// Key of the earlier version of this file that was dropped
    pub replaced: Option<DocumentKey>,

    /// Non-fatal extraction problems
    pub warnings: Vec<String>,
}

/// A document merged into the corpus
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub key: DocumentKey,
    pub path: PathBuf,

    /// Identity of the file across edits
    pub canonical_path: PathBuf,

    pub page_count: u32,
    pub extracted_at: DateTime<Utc>,

    /// Ordinals of this document's chunks in the corpus
    pub ordinals: Range<usize>,
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`KnowledgeBase`]
pub struct KnowledgeBaseBuilder {
    loaders: Option<LoaderRegistry>,
    chunk_config: ChunkConfig,
    embedder: Option<Arc<dyn EmbeddingClient>>,
    cache_dir: Option<PathBuf>,
    query_cache_capacity: u64,
    query_cache_ttl: Duration,
    default_top_k: usize,
}

impl KnowledgeBaseBuilder {
    fn new() -> Self {
        Self {
            loaders: None,
            chunk_config: ChunkConfig::default(),
            embedder: None,
            cache_dir: None,
            query_cache_capacity: 1_000,
            query_cache_ttl: Duration::from_secs(3600),
            default_top_k: 3,
        }
    }

    /// Use a custom loader registry
    pub fn loaders(mut self, loaders: LoaderRegistry) -> Self {
        self.loaders = Some(loaders);
        self
    }

    pub fn chunk_config(mut self, config: ChunkConfig) -> Self {
        self.chunk_config = config;
        self
    }

    /// Use an embedding client (defaults to the hashing embedder)
    pub fn embedder(mut self, embedder: Arc<dyn EmbeddingClient>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Persist chunks and indexes under a directory
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Query embedding memo bounds
    pub fn query_cache(mut self, capacity: u64, ttl: Duration) -> Self {
        self.query_cache_capacity = capacity;
        self.query_cache_ttl = ttl;
        self
    }

    pub fn default_top_k(mut self, k: usize) -> Self {
        self.default_top_k = k;
        self
    }

    pub fn build(self) -> Result<KnowledgeBase> {
        let chunker =
            Chunker::new(self.chunk_config).map_err(|e| KbError::Config(e.to_string()))?;
        let embedder = self
            .embedder
            .unwrap_or_else(|| Arc::new(HashingEmbedder::default()));
        let index = FlatL2Index::new(embedder.dimension());

        Ok(KnowledgeBase {
            loaders: self.loaders.unwrap_or_default(),
            chunker,
            cache: self.cache_dir.map(CacheManager::new),
            query_cache: QueryEmbeddingCache::new(self.query_cache_capacity, self.query_cache_ttl),
            default_top_k: self.default_top_k,
            embedder,
            documents: Vec::new(),
            chunks: Vec::new(),
            index,
        })
    }
}

// ============================================================================
// Knowledge Base
// ============================================================================

/// Searchable corpus of chunked, embedded documents
pub struct KnowledgeBase {
    loaders: LoaderRegistry,
    chunker: Chunker,
    embedder: Arc<dyn EmbeddingClient>,
    cache: Option<CacheManager>,
    query_cache: QueryEmbeddingCache,
    default_top_k: usize,

    documents: Vec<DocumentRecord>,
    /// Corpus chunks; position is the index ordinal
    chunks: Vec<Chunk>,
    index: FlatL2Index,
}

impl KnowledgeBase {
    pub fn builder() -> KnowledgeBaseBuilder {
        KnowledgeBaseBuilder::new()
    }

    /// Create a knowledge base from application config
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        config.validate()?;
        let kb = &config.knowledge_base;

        let embedder: Arc<dyn EmbeddingClient> =
            Arc::from(create_embedding_client(&config.embedding)?);

        let mut builder = Self::builder()
            .loaders(LoaderRegistry::with_defaults(kb.extract_tables))
            .chunk_config(
                ChunkConfig::new(kb.chunk_size, kb.chunk_overlap)
                    .with_boundaries(kb.respect_boundaries),
            )
            .embedder(embedder)
            .query_cache(
                kb.query_cache_capacity,
                Duration::from_secs(kb.query_cache_ttl_secs),
            )
            .default_top_k(kb.default_top_k);

        if kb.cache_enabled {
            builder = builder.cache_dir(kb.cache_dir.clone());
        }

        builder.build()
    }

    /// Whether at least one document has been ingested
    pub fn is_ready(&self) -> bool {
        !self.documents.is_empty()
    }

    /// Ingest a document, using the disk cache when possible
    ///
    /// A file already in the corpus with different content replaces its
    /// previous version. On failure the knowledge base is left unchanged.
    pub async fn ingest(&mut self, path: impl AsRef<Path>) -> Result<IngestReport> {
        let path = path.as_ref();
        let start = Instant::now();

        let fingerprint =
            fingerprint_file(path).map_err(|e| KbError::ingestion(path, e.to_string()))?;
        let key = DocumentKey::derive(path, &fingerprint);

        if let Some(record) = self.documents.iter().find(|d| d.key == key) {
            debug!(key = %key, path = %path.display(), "Document already loaded");
            return Ok(IngestReport {
                key,
                path: path.to_path_buf(),
                chunk_count: record.ordinals.len(),
                page_count: record.page_count,
                extracted_at: record.extracted_at,
                from_cache: false,
                already_loaded: true,
                replaced: None,
                warnings: Vec::new(),
            });
        }

        let model_id = self.embedder.model_id();
        let dimension = self.embedder.dimension();

        let cached = self
            .cache
            .as_ref()
            .and_then(|cache| cache.load(&key, &model_id, dimension));

        let report = match cached {
            Some(corpus) => {
                let document = corpus.document;
                let record = DocumentRecord {
                    key: key.clone(),
                    path: path.to_path_buf(),
                    canonical_path: canonical_path(path),
                    page_count: document.page_count,
                    extracted_at: document.extracted_at,
                    ordinals: 0..0,
                };
                let chunk_count = corpus.chunks.len();
                let replaced = self.adopt(record, corpus.chunks, &corpus.index)?;
                IngestReport {
                    key,
                    path: path.to_path_buf(),
                    chunk_count,
                    page_count: document.page_count,
                    extracted_at: document.extracted_at,
                    from_cache: true,
                    already_loaded: false,
                    replaced,
                    warnings: Vec::new(),
                }
            }
            None => self.ingest_fresh(key, path, &model_id).await?,
        };

        info!(
            path = %path.display(),
            chunks = report.chunk_count,
            from_cache = report.from_cache,
            replaced = report.replaced.is_some(),
            total_chunks = self.chunks.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Ingested document"
        );
        Ok(report)
    }

    /// Load → chunk → embed → index → save
    async fn ingest_fresh(
        &mut self,
        mut key: DocumentKey,
        path: &Path,
        model_id: &str,
    ) -> Result<IngestReport> {
        let doc = self
            .loaders
            .load(path)
            .map_err(|e| KbError::ingestion(path, e.to_string()))?;
        if doc.is_empty() {
            warn!(path = %path.display(), "Document has no extractable text");
        }

        // The file can change between fingerprinting and loading; key the
        // entry by the bytes that were actually loaded
        let loaded_key = DocumentKey::derive(path, &doc.fingerprint);
        if loaded_key != key {
            warn!(
                path = %path.display(),
                key = %loaded_key,
                "Document changed during ingestion; using the loaded content"
            );
            key = loaded_key;
        }

        let chunks: Vec<Chunk> = self.chunker.chunks(&doc).collect();
        debug!(path = %path.display(), chunks = chunks.len(), "Chunked document");

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        if vectors.len() != chunks.len() {
            return Err(KbError::Embedding(format!(
                "expected {} embeddings, got {}",
                chunks.len(),
                vectors.len()
            )));
        }
        let index = FlatL2Index::build(self.embedder.dimension(), &vectors)?;

        if let Some(cache) = &self.cache {
            let document = DocumentInfo {
                source: path.to_path_buf(),
                page_count: doc.page_count,
                extracted_at: doc.extracted_at,
            };
            if let Err(e) = cache.save(&key, &document, &chunks, &index, model_id) {
                warn!(key = %key, error = %e, "Failed to save document to cache");
            }
        }

        let chunk_count = chunks.len();
        let record = DocumentRecord {
            key: key.clone(),
            path: path.to_path_buf(),
            canonical_path: canonical_path(path),
            page_count: doc.page_count,
            extracted_at: doc.extracted_at,
            ordinals: 0..0,
        };
        let replaced = self.adopt(record, chunks, &index)?;

        Ok(IngestReport {
            key,
            path: path.to_path_buf(),
            chunk_count,
            page_count: doc.page_count,
            extracted_at: doc.extracted_at,
            from_cache: false,
            already_loaded: false,
            replaced,
            warnings: doc.warnings.iter().map(ToString::to_string).collect(),
        })
    }

    /// Append a document's chunks and vectors to the corpus
    ///
    /// An earlier version of the same file is dropped afterwards; its key is
    /// returned.
    fn adopt(
        &mut self,
        mut record: DocumentRecord,
        chunks: Vec<Chunk>,
        index: &FlatL2Index,
    ) -> Result<Option<DocumentKey>> {
        let start = self.chunks.len();
        self.index.append(index)?;
        self.chunks.extend(chunks);
        record.ordinals = start..self.chunks.len();

        let previous = self
            .documents
            .iter()
            .position(|d| d.canonical_path == record.canonical_path);
        self.documents.push(record);

        Ok(previous.map(|position| {
            let removed = self.remove_document(position);
            info!(key = %removed.key, path = %removed.path.display(), "Replaced previous version");
            removed.key
        }))
    }

    /// Drop a document's chunks and vectors and close the ordinal gap
    fn remove_document(&mut self, position: usize) -> DocumentRecord {
        let removed = self.documents.remove(position);
        let range = removed.ordinals.clone();
        let shift = range.len();

        self.index.remove_range(range.clone());
        self.chunks.drain(range);
        for doc in &mut self.documents[position..] {
            doc.ordinals = doc.ordinals.start - shift..doc.ordinals.end - shift;
        }
        removed
    }

    /// Retrieve the `k` chunks closest to a question
    ///
    /// Results are ordered by ascending distance. `k` larger than the corpus
    /// returns every chunk.
    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<RetrievedChunk>> {
        if !self.is_ready() {
            return Err(KbError::NotReady);
        }

        let embedding = self.query_embedding(text).await?;
        let neighbors = self.index.search(&embedding, k)?;

        let results: Vec<RetrievedChunk> = neighbors
            .into_iter()
            .filter_map(|n| {
                self.chunks.get(n.ordinal).map(|chunk| RetrievedChunk {
                    chunk_text: chunk.text.clone(),
                    distance: n.distance,
                    ordinal: n.ordinal,
                    source: chunk.source.clone(),
                    page: chunk.provenance.page,
                    kind: chunk.provenance.kind,
                })
            })
            .collect();

        debug!(query = %text, k, results = results.len(), "Query complete");
        Ok(results)
    }

    /// Query with the configured default `k`
    pub async fn query_default(&self, text: &str) -> Result<Vec<RetrievedChunk>> {
        self.query(text, self.default_top_k).await
    }

    async fn query_embedding(&self, text: &str) -> Result<Arc<Vec<f32>>> {
        if let Some(embedding) = self.query_cache.get(text).await {
            return Ok(embedding);
        }

        let embedding = self.embedder.embed(text).await?;
        if embedding.len() != self.embedder.dimension() {
            return Err(KbError::DimensionMismatch {
                expected: self.embedder.dimension(),
                actual: embedding.len(),
            });
        }

        let embedding = Arc::new(embedding);
        self.query_cache.put(text, Arc::clone(&embedding)).await;
        Ok(embedding)
    }

    /// Documents merged into the corpus, in ingestion order
    pub fn documents(&self) -> &[DocumentRecord] {
        &self.documents
    }

    /// Total chunks across all documents
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Chunk at a corpus ordinal
    pub fn chunk(&self, ordinal: usize) -> Option<&Chunk> {
        self.chunks.get(ordinal)
    }

    /// Reference sources plus every ingested document path
    pub fn data_sources(&self) -> Vec<String> {
        REFERENCE_SOURCES
            .iter()
            .map(|s| s.to_string())
            .chain(self.documents.iter().map(|d| d.path.display().to_string()))
            .collect()
    }

    /// Query embedding memo statistics
    pub fn cache_stats(&self) -> CacheStatsReport {
        self.query_cache.stats().report()
    }

    /// Disk cache, when enabled
    pub fn cache(&self) -> Option<&CacheManager> {
        self.cache.as_ref()
    }

    pub fn default_top_k(&self) -> usize {
        self.default_top_k
    }

    /// Identifier of the embedding model in use
    pub fn model_id(&self) -> String {
        self.embedder.model_id()
    }
}

fn canonical_path(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chemkb_parser::{
        fingerprint_bytes, DocumentLoader, FileType, LoadedDocument, PlainTextLoader,
    };
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Hashing embedder that counts calls and can be switched off
    struct CountingEmbedder {
        inner: HashingEmbedder,
        batches: AtomicUsize,
        fail: bool,
    }

    impl CountingEmbedder {
        fn new(fail: bool) -> Self {
            Self {
                inner: HashingEmbedder::new(64),
                batches: AtomicUsize::new(0),
                fail,
            }
        }
    }

    #[async_trait]
    impl EmbeddingClient for CountingEmbedder {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.batches.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(KbError::Embedding("model unavailable".to_string()));
            }
            self.inner.embed_batch(texts).await
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }

        fn model_id(&self) -> String {
            self.inner.model_id()
        }
    }

    /// Plain text loader that rewrites its file just before reading it
    struct RewritingLoader;

    impl DocumentLoader for RewritingLoader {
        fn load(&self, path: &Path) -> chemkb_parser::Result<LoadedDocument> {
            std::fs::write(path, "Omega. Delta.").unwrap();
            PlainTextLoader.load(path)
        }

        fn supported_types(&self) -> &[FileType] {
            &[FileType::PlainText]
        }
    }

    fn text_file(dir: &tempfile::TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    fn kb(embedder: Arc<dyn EmbeddingClient>) -> KnowledgeBase {
        KnowledgeBase::builder()
            .chunk_config(ChunkConfig::new(7, 0))
            .embedder(embedder)
            .build()
            .unwrap()
    }

    fn cached_kb(cache_dir: &Path) -> KnowledgeBase {
        KnowledgeBase::builder()
            .chunk_config(ChunkConfig::new(7, 0))
            .embedder(Arc::new(HashingEmbedder::new(64)))
            .cache_dir(cache_dir)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_query_before_ingest_is_not_ready() {
        let kb = KnowledgeBase::builder().build().unwrap();
        assert!(!kb.is_ready());
        assert!(matches!(kb.query("Beta", 3).await, Err(KbError::NotReady)));
    }

    #[tokio::test]
    async fn test_missing_document_is_ingestion_error() {
        let mut kb = KnowledgeBase::builder().build().unwrap();
        let err = kb.ingest("/nonexistent/perry.pdf").await.unwrap_err();
        assert!(matches!(err, KbError::Ingestion { .. }));
        assert!(!kb.is_ready());
    }

    #[tokio::test]
    async fn test_embedding_failure_leaves_state_unchanged() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = text_file(&dir, "notes.txt", "Alpha. Beta. Gamma.");

        let mut kb = kb(Arc::new(CountingEmbedder::new(true)));
        assert!(matches!(kb.ingest(&path).await, Err(KbError::Embedding(_))));
        assert!(!kb.is_ready());
        assert_eq!(kb.chunk_count(), 0);
    }

    #[tokio::test]
    async fn test_ingest_and_query_text_document() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = text_file(&dir, "notes.txt", "Alpha. Beta. Gamma.");

        let mut kb = kb(Arc::new(HashingEmbedder::new(64)));
        let report = kb.ingest(&path).await.unwrap();
        assert_eq!(report.chunk_count, 3);
        assert!(!report.from_cache);
        assert!(kb.is_ready());

        let results = kb.query("Beta", 3).await.unwrap();
        assert_eq!(results[0].chunk_text, "Beta. ");
        assert_eq!(results[0].distance, 0.0);
        assert!(results.windows(2).all(|w| w[0].distance <= w[1].distance));
        assert_eq!(results[0].page, Some(1));
    }

    #[tokio::test]
    async fn test_reingest_same_document_is_noop() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = text_file(&dir, "notes.txt", "Alpha. Beta. Gamma.");
        let embedder = Arc::new(CountingEmbedder::new(false));

        let mut kb = kb(embedder.clone());
        kb.ingest(&path).await.unwrap();
        let report = kb.ingest(&path).await.unwrap();

        assert!(report.already_loaded);
        assert_eq!(kb.chunk_count(), 3);
        assert_eq!(kb.documents().len(), 1);
        assert_eq!(embedder.batches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_second_document_is_merged() {
        let dir = tempfile::TempDir::new().unwrap();
        let first = text_file(&dir, "first.txt", "Alpha. Beta.");
        let second = text_file(&dir, "second.md", "Delta. Omega.");

        let mut kb = kb(Arc::new(HashingEmbedder::new(64)));
        kb.ingest(&first).await.unwrap();
        kb.ingest(&second).await.unwrap();

        assert_eq!(kb.documents().len(), 2);
        assert_eq!(kb.documents()[1].ordinals, 2..4);

        let results = kb.query("Omega", 1).await.unwrap();
        assert_eq!(results[0].source, second);
        assert_eq!(results[0].ordinal, 3);

        let sources = kb.data_sources();
        assert_eq!(&sources[..3], &["NIST", "Perry's Handbook", "CRC Handbook"]);
        assert_eq!(sources.len(), 5);
    }

    #[tokio::test]
    async fn test_edited_document_replaces_previous_version() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = text_file(&dir, "notes.txt", "Alpha. Beta.");
        let other = text_file(&dir, "other.txt", "Omega.");

        let mut kb = kb(Arc::new(HashingEmbedder::new(64)));
        let first = kb.ingest(&path).await.unwrap();
        kb.ingest(&other).await.unwrap();
        assert_eq!(kb.chunk_count(), 3);

        text_file(&dir, "notes.txt", "Gamma. Delta.");
        let second = kb.ingest(&path).await.unwrap();
        assert_ne!(second.key, first.key);
        assert_eq!(second.replaced, Some(first.key));

        // The untouched document shifts down to close the gap
        assert_eq!(kb.documents().len(), 2);
        assert_eq!(kb.chunk_count(), 3);
        assert_eq!(kb.documents()[0].path, other);
        assert_eq!(kb.documents()[0].ordinals, 0..1);
        assert_eq!(kb.documents()[1].ordinals, 1..3);

        let results = kb.query("Alpha", 3).await.unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| !r.chunk_text.contains("Alpha")));

        let results = kb.query("Delta", 1).await.unwrap();
        assert!(results[0].chunk_text.contains("Delta"));
        assert_eq!(results[0].ordinal, 2);
        assert_eq!(results[0].source, path);

        let results = kb.query("Omega", 1).await.unwrap();
        assert_eq!(results[0].ordinal, 0);
    }

    #[tokio::test]
    async fn test_cache_hit_reports_stored_document_metadata() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = text_file(&dir, "blank.txt", "");
        let cache_dir = dir.path().join("cache");

        let mut cold = cached_kb(&cache_dir);
        let cold_report = cold.ingest(&path).await.unwrap();
        assert!(!cold_report.from_cache);
        assert_eq!(cold_report.page_count, 1);

        let mut warm = cached_kb(&cache_dir);
        let warm_report = warm.ingest(&path).await.unwrap();
        assert!(warm_report.from_cache);
        assert_eq!(warm_report.page_count, cold_report.page_count);
        assert_eq!(warm_report.extracted_at, cold_report.extracted_at);
        assert_eq!(warm.documents()[0].page_count, 1);
        assert_eq!(
            warm.documents()[0].extracted_at,
            cold.documents()[0].extracted_at
        );
    }

    #[tokio::test]
    async fn test_document_changed_during_load_is_keyed_by_loaded_content() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = text_file(&dir, "notes.txt", "Alpha. Beta.");
        let cache_dir = dir.path().join("cache");

        let mut loaders = LoaderRegistry::new();
        loaders.register(RewritingLoader);
        let mut kb = KnowledgeBase::builder()
            .loaders(loaders)
            .chunk_config(ChunkConfig::new(7, 0))
            .embedder(Arc::new(HashingEmbedder::new(64)))
            .cache_dir(&cache_dir)
            .build()
            .unwrap();

        let report = kb.ingest(&path).await.unwrap();
        let expected = DocumentKey::derive(&path, &fingerprint_bytes(b"Omega. Delta."));
        assert_eq!(report.key, expected);
        assert_eq!(kb.documents()[0].key, expected);

        // The rewritten file now hashes to the key its cache entry was saved under
        let mut reloaded = cached_kb(&cache_dir);
        let report = reloaded.ingest(&path).await.unwrap();
        assert!(report.from_cache);
        let results = reloaded.query("Omega", 1).await.unwrap();
        assert!(results[0].chunk_text.contains("Omega"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_shared_knowledge_base_serves_concurrent_queries() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = text_file(&dir, "notes.txt", "Alpha. Beta. Gamma.");

        let mut kb = kb(Arc::new(HashingEmbedder::new(64)));
        kb.ingest(&path).await.unwrap();
        let kb = Arc::new(kb);

        let handles: Vec<_> = ["Alpha", "Beta", "Gamma", "Beta"]
            .into_iter()
            .map(|question| {
                let kb = Arc::clone(&kb);
                tokio::spawn(async move { (question, kb.query(question, 1).await) })
            })
            .collect();

        for handle in handles {
            let (question, results) = handle.await.unwrap();
            let results = results.unwrap();
            assert!(results[0].chunk_text.contains(question));
            assert_eq!(results[0].distance, 0.0);
        }
        assert_eq!(kb.cache_stats().total_requests, 4);
    }

    #[tokio::test]
    async fn test_query_embeddings_are_memoized() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = text_file(&dir, "notes.txt", "Alpha. Beta. Gamma.");

        let mut kb = kb(Arc::new(HashingEmbedder::new(64)));
        kb.ingest(&path).await.unwrap();

        let first = kb.query("Gamma", 2).await.unwrap();
        let second = kb.query("Gamma", 2).await.unwrap();
        assert_eq!(first, second);

        let stats = kb.cache_stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
    }

    #[test]
    fn test_from_config_rejects_invalid_chunking() {
        let mut config = AppConfig::default();
        config.knowledge_base.chunk_overlap = config.knowledge_base.chunk_size;
        assert!(matches!(
            KnowledgeBase::from_config(&config),
            Err(KbError::Config(_))
        ));
    }

    #[test]
    fn test_from_config_defaults() {
        let mut config = AppConfig::default();
        config.knowledge_base.cache_enabled = false;
        config.embedding.provider = chemkb_core::EmbeddingProvider::Hashing;
        config.embedding.model = chemkb_vector::HASHING_MODEL.to_string();

        let kb = KnowledgeBase::from_config(&config).unwrap();
        assert!(kb.cache().is_none());
        assert_eq!(kb.default_top_k(), 3);
        assert_eq!(kb.model_id(), "hashing:token-hash-v2:384");
    }
}
