//! Caching layer for the knowledge base
//!
//! Two caches live here:
//! - `CacheManager`: on-disk chunks and index per document, so a document is
//!   only extracted and embedded once per embedding model
//! - `QueryEmbeddingCache`: in-memory memo of query embeddings (moka)
//!
//! The disk cache never fails a caller. Anything unusable on disk is a miss,
//! logged at warn, and the caller rebuilds.

use chemkb_core::Chunk;
use chemkb_vector::FlatL2Index;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Bumped whenever the on-disk layout changes
pub const CACHE_FORMAT_VERSION: u32 = 2;

const CHUNKS_SUFFIX: &str = ".chunks.json";
const INDEX_SUFFIX: &str = ".index.json";

// ============================================================================
// Errors
// ============================================================================

/// Disk cache failures (logged, never surfaced by the knowledge base)
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Entry exists but cannot be used with the current model or is torn
    #[error("Stale cache entry: {0}")]
    Stale(String),
}

impl CacheError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

// ============================================================================
// Document Key
// ============================================================================

/// Cache identity of a document: SHA-256 of its canonical path and content
/// fingerprint (hex)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentKey(String);

impl DocumentKey {
    /// Derive the key for a document
    ///
    /// The path is canonicalized when it exists so that relative and
    /// absolute spellings of one file share a key.
    pub fn derive(path: &Path, fingerprint: &str) -> Self {
        let canonical = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());

        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(fingerprint.as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// On-disk Format
// ============================================================================

/// Self-describing header written into both cache files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheHeader {
    pub format_version: u32,
    pub model_id: String,
    pub dimension: usize,
    /// Number of chunks (and index rows)
    pub count: usize,
    /// Shared by the two files of one save
    pub generation: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Document metadata stored next to its chunks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub source: PathBuf,
    pub page_count: u32,
    /// When the document was originally extracted
    pub extracted_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChunkFile {
    header: CacheHeader,
    #[serde(flatten)]
    document: DocumentInfo,
    chunks: Vec<Chunk>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    header: CacheHeader,
    index: FlatL2Index,
}

/// Header and document only, for listing entries
#[derive(Debug, Deserialize)]
struct ChunkFileSummary {
    header: CacheHeader,
    #[serde(flatten)]
    document: DocumentInfo,
}

/// A validated cache hit
#[derive(Debug, Clone)]
pub struct CachedCorpus {
    pub header: CacheHeader,
    pub document: DocumentInfo,
    pub chunks: Vec<Chunk>,
    pub index: FlatL2Index,
}

/// One document in the cache directory
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntry {
    pub key: String,
    pub source: PathBuf,
    pub model_id: String,
    pub page_count: u32,
    pub chunk_count: usize,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Cache Manager
// ============================================================================

/// Persists per-document chunks and vector index as JSON
#[derive(Debug, Clone)]
pub struct CacheManager {
    dir: PathBuf,
}

impl CacheManager {
    /// Create a manager rooted at a directory (created lazily on save)
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn chunks_path(&self, key: &DocumentKey) -> PathBuf {
        self.dir.join(format!("{key}{CHUNKS_SUFFIX}"))
    }

    fn index_path(&self, key: &DocumentKey) -> PathBuf {
        self.dir.join(format!("{key}{INDEX_SUFFIX}"))
    }

    /// Load a cached corpus usable with the given model
    ///
    /// Returns `None` on any miss: absent files, unreadable or corrupt JSON,
    /// a different format, model or dimension, or a torn pair of files.
    pub fn load(&self, key: &DocumentKey, model_id: &str, dimension: usize) -> Option<CachedCorpus> {
        match self.try_load(key, model_id, dimension) {
            Ok(Some(corpus)) => {
                debug!(key = %key, chunks = corpus.chunks.len(), "Cache hit");
                Some(corpus)
            }
            Ok(None) => {
                debug!(key = %key, "Cache miss");
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Ignoring unusable cache entry");
                None
            }
        }
    }

    fn try_load(
        &self,
        key: &DocumentKey,
        model_id: &str,
        dimension: usize,
    ) -> Result<Option<CachedCorpus>, CacheError> {
        let Some(chunk_file) = read_json::<ChunkFile>(&self.chunks_path(key))? else {
            return Ok(None);
        };
        let Some(index_file) = read_json::<IndexFile>(&self.index_path(key))? else {
            return Err(CacheError::Stale("index file missing".to_string()));
        };

        let header = chunk_file.header;
        check_header(&header, model_id, dimension)?;
        check_header(&index_file.header, model_id, dimension)?;

        if header.generation != index_file.header.generation {
            return Err(CacheError::Stale(format!(
                "generation mismatch: chunks {} vs index {}",
                header.generation, index_file.header.generation
            )));
        }
        if chunk_file.chunks.len() != header.count || index_file.index.len() != header.count {
            return Err(CacheError::Stale(format!(
                "count mismatch: header {}, chunks {}, vectors {}",
                header.count,
                chunk_file.chunks.len(),
                index_file.index.len()
            )));
        }
        if index_file.index.dimension() != dimension {
            return Err(CacheError::Stale(format!(
                "index dimension {} does not match {dimension}",
                index_file.index.dimension()
            )));
        }

        Ok(Some(CachedCorpus {
            header,
            document: chunk_file.document,
            chunks: chunk_file.chunks,
            index: index_file.index,
        }))
    }

    /// Persist a document's chunks and index
    ///
    /// The index file is written first and the chunk file last; a crash in
    /// between leaves a generation mismatch that `load` treats as a miss.
    pub fn save(
        &self,
        key: &DocumentKey,
        document: &DocumentInfo,
        chunks: &[Chunk],
        index: &FlatL2Index,
        model_id: &str,
    ) -> Result<CacheHeader, CacheError> {
        if chunks.len() != index.len() {
            return Err(CacheError::Stale(format!(
                "refusing to save {} chunks with {} vectors",
                chunks.len(),
                index.len()
            )));
        }

        fs::create_dir_all(&self.dir).map_err(|e| CacheError::io(&self.dir, e))?;

        let header = CacheHeader {
            format_version: CACHE_FORMAT_VERSION,
            model_id: model_id.to_string(),
            dimension: index.dimension(),
            count: chunks.len(),
            generation: Uuid::new_v4(),
            created_at: Utc::now(),
        };

        self.write_atomic(
            &self.index_path(key),
            &IndexFile {
                header: header.clone(),
                index: index.clone(),
            },
        )?;
        self.write_atomic(
            &self.chunks_path(key),
            &ChunkFile {
                header: header.clone(),
                document: document.clone(),
                chunks: chunks.to_vec(),
            },
        )?;

        info!(key = %key, chunks = header.count, "Saved document to cache");
        Ok(header)
    }

    /// Write to a temp file in the cache directory, fsync, then rename
    fn write_atomic<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), CacheError> {
        let json = serde_json::to_vec(value)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)
            .map_err(|e| CacheError::io(&self.dir, e))?;
        tmp.write_all(&json).map_err(|e| CacheError::io(path, e))?;
        tmp.as_file().sync_all().map_err(|e| CacheError::io(path, e))?;
        tmp.persist(path).map_err(|e| CacheError::io(path, e.error))?;
        Ok(())
    }

    /// Remove one document's files; `true` if anything was removed
    pub fn remove(&self, key: &DocumentKey) -> Result<bool, CacheError> {
        let mut removed = false;
        for path in [self.chunks_path(key), self.index_path(key)] {
            match fs::remove_file(&path) {
                Ok(()) => removed = true,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(CacheError::io(&path, e)),
            }
        }
        Ok(removed)
    }

    /// Remove every cache file; returns the number of files removed
    pub fn clear(&self) -> Result<usize, CacheError> {
        let mut removed = 0;
        for path in self.cache_files()? {
            fs::remove_file(&path).map_err(|e| CacheError::io(&path, e))?;
            removed += 1;
        }
        info!(dir = %self.dir.display(), removed, "Cleared cache");
        Ok(removed)
    }

    /// List cached documents, skipping unreadable entries
    pub fn entries(&self) -> Result<Vec<CacheEntry>, CacheError> {
        let mut entries = Vec::new();
        for path in self.cache_files()? {
            let Some(key) = file_name(&path).and_then(|n| n.strip_suffix(CHUNKS_SUFFIX)) else {
                continue;
            };
            match read_json::<ChunkFileSummary>(&path) {
                Ok(Some(summary)) => entries.push(CacheEntry {
                    key: key.to_string(),
                    source: summary.document.source,
                    model_id: summary.header.model_id,
                    page_count: summary.document.page_count,
                    chunk_count: summary.header.count,
                    created_at: summary.header.created_at,
                }),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable cache entry"),
            }
        }
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(entries)
    }

    fn cache_files(&self) -> Result<Vec<PathBuf>, CacheError> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CacheError::io(&self.dir, e)),
        };

        let mut files = Vec::new();
        for entry in read_dir {
            let path = entry.map_err(|e| CacheError::io(&self.dir, e))?.path();
            if file_name(&path)
                .is_some_and(|n| n.ends_with(CHUNKS_SUFFIX) || n.ends_with(INDEX_SUFFIX))
            {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

/// Read and parse a JSON file; `Ok(None)` when it does not exist
fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, CacheError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(CacheError::io(path, e)),
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

fn check_header(header: &CacheHeader, model_id: &str, dimension: usize) -> Result<(), CacheError> {
    if header.format_version != CACHE_FORMAT_VERSION {
        return Err(CacheError::Stale(format!(
            "format version {} (expected {CACHE_FORMAT_VERSION})",
            header.format_version
        )));
    }
    if header.model_id != model_id {
        return Err(CacheError::Stale(format!(
            "built with model {} (current {model_id})",
            header.model_id
        )));
    }
    if header.dimension != dimension {
        return Err(CacheError::Stale(format!(
            "dimension {} (current {dimension})",
            header.dimension
        )));
    }
    Ok(())
}

// ============================================================================
// Query Embedding Cache
// ============================================================================

/// In-memory memo of query embeddings
///
/// Thread-safe and suitable for async contexts. Keys are the exact query
/// text; one cache serves one embedding model.
#[derive(Clone)]
pub struct QueryEmbeddingCache {
    cache: Cache<String, Arc<Vec<f32>>>,
    stats: Arc<CacheStats>,
}

impl QueryEmbeddingCache {
    /// Create a cache with a capacity and time-to-live
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();

        Self {
            cache,
            stats: Arc::new(CacheStats::new("query_embedding")),
        }
    }

    /// Get a cached query embedding
    pub async fn get(&self, query: &str) -> Option<Arc<Vec<f32>>> {
        let result = self.cache.get(query).await;

        if result.is_some() {
            self.stats.record_hit();
        } else {
            self.stats.record_miss();
        }

        result
    }

    /// Store a query embedding
    pub async fn put(&self, query: &str, embedding: Arc<Vec<f32>>) {
        self.cache.insert(query.to_string(), embedding).await;
        self.stats.record_write();
    }

    /// Clear all cached embeddings
    pub async fn clear(&self) {
        self.cache.invalidate_all();
        // Wait for all pending invalidations to complete
        self.cache.run_pending_tasks().await;
        self.stats.record_invalidation();
    }

    /// Get cache statistics
    pub fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }

    /// Get current cache size
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl Default for QueryEmbeddingCache {
    fn default() -> Self {
        Self::new(1_000, Duration::from_secs(3600))
    }
}

// ============================================================================
// Cache Statistics
// ============================================================================

/// Statistics for cache performance monitoring
#[derive(Debug)]
pub struct CacheStats {
    /// Cache name for identification
    name: String,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    invalidations: AtomicU64,
}

impl CacheStats {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    fn record_invalidation(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }

    /// Get total requests (hits + misses)
    pub fn total_requests(&self) -> u64 {
        self.hits() + self.misses()
    }

    /// Calculate hit rate (0.0 - 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }

    /// Get a summary report
    pub fn report(&self) -> CacheStatsReport {
        CacheStatsReport {
            name: self.name.clone(),
            hits: self.hits(),
            misses: self.misses(),
            writes: self.writes(),
            invalidations: self.invalidations(),
            total_requests: self.total_requests(),
            hit_rate: self.hit_rate(),
        }
    }
}

/// Serializable cache statistics report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatsReport {
    pub name: String,
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub invalidations: u64,
    pub total_requests: u64,
    /// Hit rate (0.0 - 1.0)
    pub hit_rate: f64,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chemkb_core::Provenance;
    use tempfile::TempDir;

    const MODEL: &str = "hashing:token-hash-v2:2";

    fn chunk(index: u32, text: &str) -> Chunk {
        Chunk {
            index,
            text: text.to_string(),
            source: PathBuf::from("perry.pdf"),
            provenance: Provenance::page(index + 1),
            start_offset: 0,
            end_offset: text.len(),
        }
    }

    fn corpus() -> (Vec<Chunk>, FlatL2Index) {
        let chunks = vec![chunk(0, "Alpha."), chunk(1, "Beta.")];
        let index = FlatL2Index::build(2, &[vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap();
        (chunks, index)
    }

    fn document() -> DocumentInfo {
        DocumentInfo {
            source: PathBuf::from("perry.pdf"),
            page_count: 2,
            extracted_at: Utc::now(),
        }
    }

    fn saved(dir: &TempDir) -> (CacheManager, DocumentKey) {
        let manager = CacheManager::new(dir.path().join("cache"));
        let key = DocumentKey::derive(Path::new("perry.pdf"), "fp-1");
        let (chunks, index) = corpus();
        manager
            .save(&key, &document(), &chunks, &index, MODEL)
            .unwrap();
        (manager, key)
    }

    #[test]
    fn test_document_key_derivation() {
        let a = DocumentKey::derive(Path::new("a.pdf"), "fp");
        assert_eq!(a, DocumentKey::derive(Path::new("a.pdf"), "fp"));
        assert_ne!(a, DocumentKey::derive(Path::new("a.pdf"), "fp2"));
        assert_ne!(a, DocumentKey::derive(Path::new("b.pdf"), "fp"));
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let (manager, key) = saved(&dir);

        let corpus = manager.load(&key, MODEL, 2).unwrap();
        let (chunks, index) = self::corpus();
        assert_eq!(corpus.chunks, chunks);
        assert_eq!(corpus.index, index);
        assert_eq!(corpus.header.count, 2);
        assert_eq!(corpus.header.format_version, CACHE_FORMAT_VERSION);
        assert_eq!(corpus.document.source, PathBuf::from("perry.pdf"));
        assert_eq!(corpus.document.page_count, 2);
    }

    #[test]
    fn test_missing_entry_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let manager = CacheManager::new(dir.path());
        let key = DocumentKey::derive(Path::new("x.pdf"), "fp");
        assert!(manager.load(&key, MODEL, 2).is_none());
    }

    #[test]
    fn test_model_or_dimension_change_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let (manager, key) = saved(&dir);
        assert!(manager.load(&key, "ollama:nomic-embed-text:768", 2).is_none());
        assert!(manager.load(&key, MODEL, 3).is_none());
    }

    #[test]
    fn test_corrupt_index_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let (manager, key) = saved(&dir);
        fs::write(manager.index_path(&key), b"{ not json").unwrap();
        assert!(manager.load(&key, MODEL, 2).is_none());
    }

    #[test]
    fn test_torn_save_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let (manager, key) = saved(&dir);

        // Keep the first generation's index, then save again
        let old_index = fs::read(manager.index_path(&key)).unwrap();
        let (chunks, index) = corpus();
        manager
            .save(&key, &document(), &chunks, &index, MODEL)
            .unwrap();
        assert!(manager.load(&key, MODEL, 2).is_some());

        fs::write(manager.index_path(&key), old_index).unwrap();
        assert!(manager.load(&key, MODEL, 2).is_none());
    }

    #[test]
    fn test_save_rejects_misaligned_corpus() {
        let dir = TempDir::new().unwrap();
        let manager = CacheManager::new(dir.path());
        let key = DocumentKey::derive(Path::new("x.pdf"), "fp");
        let index = FlatL2Index::build(2, &[vec![1.0, 0.0]]).unwrap();

        let result = manager.save(&key, &document(), &[], &index, MODEL);
        assert!(matches!(result, Err(CacheError::Stale(_))));
        assert!(manager.load(&key, MODEL, 2).is_none());
    }

    #[test]
    fn test_entries_remove_and_clear() {
        let dir = TempDir::new().unwrap();
        let (manager, key) = saved(&dir);

        let entries = manager.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, key.as_str());
        assert_eq!(entries[0].source, PathBuf::from("perry.pdf"));
        assert_eq!(entries[0].chunk_count, 2);
        assert_eq!(entries[0].page_count, 2);

        assert!(manager.remove(&key).unwrap());
        assert!(!manager.remove(&key).unwrap());
        assert!(manager.entries().unwrap().is_empty());

        let (manager, _) = saved(&dir);
        assert_eq!(manager.clear().unwrap(), 2);
        assert!(manager.entries().unwrap().is_empty());
    }

    #[test]
    fn test_clear_on_missing_directory() {
        let manager = CacheManager::new("/nonexistent/chemkb-cache");
        assert_eq!(manager.clear().unwrap(), 0);
        assert!(manager.entries().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_query_embedding_cache() {
        let cache = QueryEmbeddingCache::default();
        let stats = cache.stats();

        assert!(cache.get("reynolds number").await.is_none());
        cache
            .put("reynolds number", Arc::new(vec![0.5, 0.5]))
            .await;
        assert_eq!(
            cache.get("reynolds number").await.as_deref(),
            Some(&vec![0.5, 0.5])
        );

        assert_eq!(stats.hits(), 1);
        assert_eq!(stats.misses(), 1);
        assert_eq!(stats.writes(), 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);

        cache.clear().await;
        assert!(cache.get("reynolds number").await.is_none());
        assert_eq!(cache.stats().report().name, "query_embedding");
    }
}
