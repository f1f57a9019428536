//! In-memory inverted index with BM25 ranking and binary segment flushing.
//!
//! Admission and search share one lock, so searches always see a consistent
//! snapshot and document ids are strictly monotonic. Segment flushes are
//! durability checkpoints: the in-memory index is written out but never
//! evicted, and queries run against memory only.

use parking_lot::Mutex;
use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

use crate::config::{IndexConfig, MemoryConfig};
use crate::parser::ParsedDocument;

#[derive(Error, Debug)]
pub enum SegmentError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// One entry in a term's posting list; unique per (term, document).
#[derive(Debug, Clone)]
pub struct Posting {
    pub doc_id: u64,
    pub positions: Vec<u32>,
    pub tf: u32,
}

/// Forward-index entry.
#[derive(Debug, Clone)]
pub struct Document {
    pub doc_id: u64,
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub length: u32,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub doc_id: u64,
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub score: f64,
}

#[derive(Default)]
struct IndexState {
    inverted: HashMap<String, Vec<Posting>>,
    forward: HashMap<u64, Document>,
    doc_lengths: HashMap<u64, u32>,
    doc_count: u64,
    avg_doc_length: f64,
    next_doc_id: u64,
    current_segment_size: u32,
    segment_count: u32,
    /// Rough bytes admitted since the last flush, for memory-pressure flushes
    bytes_since_flush: u64,
}

pub struct Indexer {
    state: Mutex<IndexState>,
    index_dir: PathBuf,
    max_docs_per_segment: u32,
    flush_pressure_bytes: u64,
    k1: f64,
    b: f64,
    total_documents: AtomicU64,
}

impl Indexer {
    pub fn new(config: &IndexConfig, memory: &MemoryConfig, index_dir: PathBuf) -> Self {
        Self {
            state: Mutex::new(IndexState {
                next_doc_id: 1,
                ..IndexState::default()
            }),
            index_dir,
            max_docs_per_segment: config.max_docs_per_segment,
            flush_pressure_bytes: memory.max_memory_mb * 1024 * 1024
                / 100
                * memory.flush_threshold_percent as u64,
            k1: config.bm25_k1,
            b: config.bm25_b,
            total_documents: AtomicU64::new(0),
        }
    }

    /// Admit one parsed document and return its id.
    pub fn index_document(
        &self,
        parsed: &ParsedDocument,
        metadata: HashMap<String, String>,
    ) -> u64 {
        let mut state = self.state.lock();

        let doc_id = state.next_doc_id;
        state.next_doc_id += 1;

        let mut doc_length: u32 = 0;
        for (term, positions) in &parsed.term_positions {
            if term.is_empty() {
                continue;
            }
            // doc_ids are allocated under this lock, so appending keeps every
            // posting list sorted by doc_id
            state.inverted.entry(term.clone()).or_default().push(Posting {
                doc_id,
                positions: positions.clone(),
                tf: positions.len() as u32,
            });
            doc_length += positions.len() as u32;
        }

        state.doc_lengths.insert(doc_id, doc_length);
        state.forward.insert(
            doc_id,
            Document {
                doc_id,
                url: parsed.url.clone(),
                title: parsed.title.clone(),
                snippet: make_snippet(&parsed.text),
                length: doc_length,
                metadata,
            },
        );

        state.avg_doc_length = (state.avg_doc_length * state.doc_count as f64
            + doc_length as f64)
            / (state.doc_count + 1) as f64;
        state.doc_count += 1;
        self.total_documents.store(state.doc_count, Ordering::Relaxed);

        state.current_segment_size += 1;
        // Rough posting-storage estimate: four bytes per recorded position,
        // plus the forward-entry text
        state.bytes_since_flush +=
            doc_length as u64 * 4 + parsed.url.len() as u64 + parsed.title.len() as u64;
        if state.current_segment_size >= self.max_docs_per_segment
            || state.bytes_since_flush >= self.flush_pressure_bytes
        {
            self.flush_locked(&mut state);
        }

        doc_id
    }

    /// BM25 search over the in-memory index.
    ///
    /// Query terms are split on whitespace and lowercased only; unlike
    /// document tokens they keep their punctuation, so a punctuated query
    /// term will not match the index.
    pub fn search(&self, query: &str, topk: usize) -> Vec<SearchResult> {
        let state = self.state.lock();

        let mut scores: HashMap<u64, f64> = HashMap::new();
        for term in query.split_whitespace().map(|t| t.to_lowercase()) {
            let Some(postings) = state.inverted.get(&term) else {
                continue;
            };
            if postings.is_empty() {
                continue;
            }

            let idf = (state.doc_count as f64 / postings.len() as f64).ln();

            for posting in postings {
                let tf = posting.tf as f64;
                let doc_length = state
                    .doc_lengths
                    .get(&posting.doc_id)
                    .copied()
                    .unwrap_or(0) as f64;
                let norm_length = doc_length / state.avg_doc_length;
                let score =
                    tf * (self.k1 + 1.0) / (tf + self.k1 * (1.0 - self.b + self.b * norm_length));
                *scores.entry(posting.doc_id).or_insert(0.0) += score * idf;
            }
        }

        let mut scored: Vec<(u64, f64)> = scores.into_iter().collect();
        // Descending score; ascending doc_id keeps ordering deterministic
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(topk);

        scored
            .into_iter()
            .filter_map(|(doc_id, score)| {
                state.forward.get(&doc_id).map(|doc| SearchResult {
                    doc_id,
                    url: doc.url.clone(),
                    title: doc.title.clone(),
                    snippet: doc.snippet.clone(),
                    score,
                })
            })
            .collect()
    }

    /// Write the current in-memory index to a segment file.
    pub fn flush_segment(&self) {
        let mut state = self.state.lock();
        self.flush_locked(&mut state);
    }

    /// Segment merging is reserved; flushing is all this revision does.
    pub fn merge_segments(&self) {
        self.flush_segment();
    }

    pub fn total_documents(&self) -> u64 {
        self.total_documents.load(Ordering::Relaxed)
    }

    pub fn total_terms(&self) -> usize {
        self.state.lock().inverted.len()
    }

    pub fn segment_count(&self) -> u32 {
        self.state.lock().segment_count
    }

    fn flush_locked(&self, state: &mut IndexState) {
        if state.current_segment_size == 0 {
            return;
        }

        let path = self
            .index_dir
            .join(format!("segment_{}.idx", state.segment_count));
        state.segment_count += 1;
        state.current_segment_size = 0;
        state.bytes_since_flush = 0;

        // Flush failures are logged, never surfaced: the in-memory index
        // remains authoritative
        match write_segment(&path, &state.inverted) {
            Ok(terms) => {
                tracing::info!(path = %path.display(), terms, "flushed index segment");
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "segment flush failed");
            }
        }
    }
}

#[derive(Debug, Archive, RkyvSerialize, RkyvDeserialize)]
struct SegmentPosting {
    doc_id: u64,
    tf: u32,
    positions: Vec<u32>,
}

#[derive(Debug, Archive, RkyvSerialize, RkyvDeserialize)]
struct SegmentRecord {
    term: String,
    postings: Vec<SegmentPosting>,
}

/// Length-prefixed rkyv records, one per term, sorted for stable output.
fn write_segment(path: &Path, inverted: &HashMap<String, Vec<Posting>>) -> Result<usize, SegmentError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    let mut terms: Vec<&String> = inverted.keys().collect();
    terms.sort();

    for term in &terms {
        let record = SegmentRecord {
            term: (*term).clone(),
            postings: inverted[*term]
                .iter()
                .map(|p| SegmentPosting {
                    doc_id: p.doc_id,
                    tf: p.tf,
                    positions: p.positions.clone(),
                })
                .collect(),
        };
        let bytes = rkyv::to_bytes::<_, 1024>(&record)
            .map_err(|e| SegmentError::Serialization(e.to_string()))?;
        writer.write_all(&(bytes.len() as u32).to_le_bytes())?;
        writer.write_all(&bytes)?;
    }
    writer.flush()?;

    Ok(terms.len())
}

#[cfg(test)]
fn read_segment(path: &Path) -> Result<Vec<SegmentRecord>, SegmentError> {
    use std::io::Read;

    let mut file = File::open(path)?;
    let mut records = Vec::new();

    loop {
        let mut len_bytes = [0u8; 4];
        match file.read_exact(&mut len_bytes) {
            Ok(()) => {
                let len = u32::from_le_bytes(len_bytes) as usize;
                let mut buf = vec![0u8; len];
                file.read_exact(&mut buf)?;
                // Re-align before deserializing
                let mut aligned = rkyv::AlignedVec::with_capacity(len);
                aligned.extend_from_slice(&buf);
                let record: SegmentRecord = unsafe { rkyv::from_bytes_unchecked(&aligned) }
                    .map_err(|e| SegmentError::Serialization(e.to_string()))?;
                records.push(record);
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
    }

    Ok(records)
}

fn make_snippet(text: &str) -> String {
    let mut chars = text.chars();
    let prefix: String = chars.by_ref().take(200).collect();
    if chars.next().is_some() {
        format!("{prefix}…")
    } else {
        prefix
    }
}
