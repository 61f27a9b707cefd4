//! Building and inspecting the local embedding index.
//!
//! Ingestion reads a directory of documents, splits them into overlapping
//! chunks, embeds each chunk under the embedding rate limit, and replaces
//! the index contents in one transaction.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use newsagent_retrieval::{
    ChunkIndex, Embedder, EmbeddingIndex, RateLimiter, ServiceId,
};
use newsagent_shared::{DocumentChunk, IngestConfig, NewsAgentError, Result, ScoredChunk};
use newsagent_storage::{META_BUILT_AT, META_EMBEDDING_MODEL, Storage};

use crate::pipeline::SilentProgress;

/// Separators tried in order; the empty separator splits into characters.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

#[derive(Debug, Clone, Copy)]
pub struct ChunkOptions {
    /// Maximum chunk length in characters.
    pub chunk_size: usize,
    /// Characters shared between neighbouring chunks.
    pub chunk_overlap: usize,
}

impl From<&IngestConfig> for ChunkOptions {
    fn from(config: &IngestConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
        }
    }
}

/// A document read from disk, normalized to plain text or markdown.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub source_id: String,
    pub text: String,
}

#[derive(Debug)]
pub struct IngestReport {
    pub documents: usize,
    pub chunks: usize,
    pub duplicates_skipped: usize,
    pub index_path: PathBuf,
    pub elapsed: Duration,
}

/// Progress callback for the embedding loop.
pub trait IngestProgress: Send + Sync {
    fn chunk_embedded(&self, current: usize, total: usize);
}

impl IngestProgress for SilentProgress {
    fn chunk_embedded(&self, _current: usize, _total: usize) {}
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Extensions picked up by ingestion.
const DOCUMENT_EXTENSIONS: [&str; 6] = ["md", "markdown", "txt", "html", "htm", "pdf"];

/// Recursively load markdown, text, HTML and PDF files, sorted by path.
///
/// Symlinks are not followed. PDF and HTML files that fail to convert are
/// skipped with a warning; text with invalid UTF-8 is decoded lossily.
pub fn load_documents(dir: &Path) -> Result<Vec<SourceDocument>> {
    let mut docs = Vec::new();
    for path in collect_files(dir)? {
        let bytes = std::fs::read(&path).map_err(|e| NewsAgentError::io(&path, e))?;
        let text = match extension(&path).as_deref() {
            Some("pdf") => match pdf_extract::extract_text_from_mem(&bytes) {
                Ok(text) => text,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "PDF text extraction failed, skipping");
                    continue;
                }
            },
            Some("html" | "htm") => match html_to_markdown(&decode_text(&path, bytes)) {
                Ok(md) => md,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "HTML conversion failed, skipping");
                    continue;
                }
            },
            _ => decode_text(&path, bytes),
        };

        let text = normalize_whitespace(&text);
        if text.is_empty() {
            debug!(path = %path.display(), "empty document, skipping");
            continue;
        }
        docs.push(SourceDocument {
            source_id: path.to_string_lossy().into_owned(),
            text,
        });
    }
    Ok(docs)
}

fn collect_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(dir).to_path_buf();
            match e.into_io_error() {
                Some(source) => NewsAgentError::io(path, source),
                None => NewsAgentError::validation(format!(
                    "cannot walk {}: filesystem loop",
                    path.display()
                )),
            }
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.into_path();
        if extension(&path).is_some_and(|ext| DOCUMENT_EXTENSIONS.contains(&ext.as_str())) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// UTF-8 text, with invalid sequences replaced instead of failing.
fn decode_text(path: &Path, bytes: Vec<u8>) -> String {
    String::from_utf8(bytes).unwrap_or_else(|e| {
        warn!(path = %path.display(), "document is not valid UTF-8, replacing invalid bytes");
        String::from_utf8_lossy(e.as_bytes()).into_owned()
    })
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
}

fn html_to_markdown(html: &str) -> Result<String> {
    htmd::HtmlToMarkdown::builder()
        .skip_tags(vec!["script", "style", "nav", "iframe", "noscript", "svg"])
        .build()
        .convert(html)
        .map_err(|e| NewsAgentError::parse(format!("htmd conversion failed: {e}")))
}

/// Unify line endings, collapse runs of spaces, and cap blank lines at one.
pub fn normalize_whitespace(text: &str) -> String {
    static SPACES_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[ \t\u{a0}]+").expect("valid regex"));
    static TRAILING_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m) +$").expect("valid regex"));
    static BLANKS_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let text = SPACES_RE.replace_all(&text, " ");
    let text = TRAILING_RE.replace_all(&text, "");
    BLANKS_RE.replace_all(&text, "\n\n").trim().to_string()
}

// ---------------------------------------------------------------------------
// Splitting
// ---------------------------------------------------------------------------

/// Recursive character splitter.
///
/// Splits on the coarsest separator that occurs in the text, merges the
/// pieces back up to `chunk_size` characters with `chunk_overlap` characters
/// carried between neighbours, and recurses into any piece still too long.
pub fn split_text(text: &str, options: ChunkOptions) -> Vec<String> {
    let size = options.chunk_size.max(1);
    let overlap = options.chunk_overlap.min(size.saturating_sub(1));
    split_recursive(text, &SEPARATORS, size, overlap)
}

fn split_recursive(text: &str, separators: &[&str], size: usize, overlap: usize) -> Vec<String> {
    let position = separators
        .iter()
        .position(|s| s.is_empty() || text.contains(s))
        .unwrap_or(separators.len().saturating_sub(1));
    let separator = separators.get(position).copied().unwrap_or("");
    let finer = separators.get(position + 1..).unwrap_or(&[]);

    let pieces: Vec<String> = if separator.is_empty() {
        text.chars().map(String::from).collect()
    } else {
        text.split(separator)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    };

    let mut chunks = Vec::new();
    let mut fitting: Vec<String> = Vec::new();
    for piece in pieces {
        if char_len(&piece) < size {
            fitting.push(piece);
            continue;
        }
        if !fitting.is_empty() {
            chunks.extend(merge(&fitting, separator, size, overlap));
            fitting.clear();
        }
        if finer.is_empty() {
            chunks.push(piece);
        } else {
            chunks.extend(split_recursive(&piece, finer, size, overlap));
        }
    }
    if !fitting.is_empty() {
        chunks.extend(merge(&fitting, separator, size, overlap));
    }
    chunks
}

fn merge(pieces: &[String], separator: &str, size: usize, overlap: usize) -> Vec<String> {
    let sep_len = char_len(separator);
    let joint = |window: &VecDeque<&str>| if window.is_empty() { 0 } else { sep_len };
    let mut chunks = Vec::new();
    let mut window: VecDeque<&str> = VecDeque::new();
    let mut total = 0usize;

    for piece in pieces {
        let len = char_len(piece);

        if !window.is_empty() && total + joint(&window) + len > size {
            push_chunk(&mut chunks, &window, separator);
            // Drop from the front until only the overlap remains and the next piece fits.
            while total > overlap || (total > 0 && total + joint(&window) + len > size) {
                let Some(first) = window.pop_front() else {
                    break;
                };
                total -= char_len(first) + joint(&window);
            }
        }

        total += len + joint(&window);
        window.push_back(piece);
    }

    push_chunk(&mut chunks, &window, separator);
    chunks
}

fn push_chunk(chunks: &mut Vec<String>, window: &VecDeque<&str>, separator: &str) {
    let text = window.iter().copied().collect::<Vec<_>>().join(separator);
    let text = text.trim();
    if !text.is_empty() {
        chunks.push(text.to_string());
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// SHA-256 of `source_id` followed by `text`, hex-encoded.
pub fn chunk_id(source_id: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// Index build and query
// ---------------------------------------------------------------------------

/// Rebuild the index at `index_path` from the documents in `dir`.
#[instrument(skip_all, fields(dir = %dir.display(), index = %index_path.display()))]
pub async fn ingest_dir(
    dir: &Path,
    index_path: &Path,
    embedder: &dyn Embedder,
    limiter: &RateLimiter,
    options: ChunkOptions,
    progress: &dyn IngestProgress,
) -> Result<IngestReport> {
    let start = Instant::now();
    let documents = load_documents(dir)?;
    if documents.is_empty() {
        return Err(NewsAgentError::validation(format!(
            "no .md, .txt, .html or .pdf documents found in {}",
            dir.display()
        )));
    }
    info!(documents = documents.len(), "documents loaded");

    let mut seen = HashSet::new();
    let mut pending = Vec::new();
    let mut duplicates_skipped = 0;
    for doc in &documents {
        for text in split_text(&doc.text, options) {
            let id = chunk_id(&doc.source_id, &text);
            if seen.insert(id.clone()) {
                pending.push((id, doc.source_id.clone(), text));
            } else {
                duplicates_skipped += 1;
            }
        }
    }
    info!(chunks = pending.len(), duplicates_skipped, "documents split");

    let total = pending.len();
    let mut chunks = Vec::with_capacity(total);
    for (i, (id, source_id, text)) in pending.into_iter().enumerate() {
        limiter.wait_if_needed(ServiceId::Embedding).await;
        let embedding = embedder.embed(&text).await?;
        chunks.push(DocumentChunk {
            id,
            text,
            source_id,
            embedding,
        });
        progress.chunk_embedded(i + 1, total);
    }

    let storage = Storage::open(index_path).await?;
    let written = storage.replace_chunks(&chunks).await?;
    storage.set_meta(META_EMBEDDING_MODEL, embedder.model()).await?;
    storage
        .set_meta(META_BUILT_AT, &Utc::now().to_rfc3339())
        .await?;

    info!(written, "index rebuilt");
    Ok(IngestReport {
        documents: documents.len(),
        chunks: written,
        duplicates_skipped,
        index_path: index_path.to_path_buf(),
        elapsed: start.elapsed(),
    })
}

/// Top-`k` chunks for `text` with their scores.
pub async fn query_index(
    index_path: &Path,
    embedder: Arc<dyn Embedder>,
    text: &str,
    k: usize,
) -> Result<Vec<ScoredChunk>> {
    let index = EmbeddingIndex::open(index_path, embedder).await?;
    index.query(text, k).await
}
