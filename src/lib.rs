//! Paragraph-level PDF chunking using lopdf
//!
//! This crate provides:
//! - Line extraction with bounding boxes in page pixel space
//! - Paragraph merging of nearby lines into positioned chunks
//! - Interchangeable chunking strategies behind a name-keyed registry

pub mod blocks;
pub mod chunk;
pub mod chunker;
pub mod extractor;
pub mod fonts;
pub mod merger;
pub mod pipeline;

pub use blocks::BlockChunker;
pub use chunk::{BBox, Chunk, LineRecord};
pub use chunker::{
    ChunkReport, Chunker, ChunkerRegistry, ChunkerSettings, PageFailure, PagePolicy,
    DEFAULT_CHUNKER,
};
pub use extractor::{ExtractOptions, PdfDocument, TextItem};
pub use merger::{looks_like_continuation, merge_page, MergeConfig, MergedParagraphChunker};
pub use pipeline::PipelineChunker;

use std::path::{Path, PathBuf};

/// Chunk a PDF into merged paragraphs with the default settings
pub fn chunk_pdf<P: AsRef<Path>>(path: P) -> Result<Vec<Chunk>, PdfError> {
    MergedParagraphChunker::default().chunk(path.as_ref())
}

#[derive(Debug, thiserror::Error)]
pub enum PdfError {
    #[error("invalid input {0}: expected a .pdf file")]
    InvalidInput(PathBuf),
    #[error("cannot open {path}: {reason}")]
    Open { path: PathBuf, reason: String },
    #[error("PDF is encrypted")]
    Encrypted,
    #[error("page {pageno}: {reason}")]
    Page { pageno: u32, reason: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("PDF parsing error: {0}")]
    Parse(String),
    #[error("pipeline stage {stage} failed: {reason}")]
    Pipeline { stage: &'static str, reason: String },
    #[error("unknown chunker: {0}")]
    UnknownChunker(String),
}

impl From<lopdf::Error> for PdfError {
    fn from(e: lopdf::Error) -> Self {
        PdfError::Parse(e.to_string())
    }
}
