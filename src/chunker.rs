//! Chunking strategies and their registry
//!
//! Every strategy implements [`Chunker`]. Strategies are looked up by name in
//! a [`ChunkerRegistry`] populated from an explicit registration list.

use crate::blocks::BlockChunker;
use crate::chunk::{Chunk, LineRecord};
use crate::extractor::{file_name, ExtractOptions, PdfDocument};
use crate::merger::{MergeConfig, MergedParagraphChunker};
use crate::pipeline::PipelineChunker;
use crate::PdfError;
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A source of chunks for a PDF document
pub trait Chunker: Send + Sync {
    /// Registry name of the strategy
    fn name(&self) -> &'static str;

    /// Chunk a document, including the list of pages that could not be processed
    fn chunk_report(&self, path: &Path) -> Result<ChunkReport, PdfError>;

    /// Chunk a document into an ordered sequence of chunks
    fn chunk(&self, path: &Path) -> Result<Vec<Chunk>, PdfError> {
        let report = self.chunk_report(path)?;
        info!("{}", extraction_summary(report.chunks.len(), path));
        Ok(report.chunks)
    }
}

/// Log line reported after a document was chunked
pub fn extraction_summary(count: usize, path: &Path) -> String {
    format!("Extracted {} chunks from {}", count, file_name(path))
}

/// What to do when a single page cannot be processed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PagePolicy {
    /// Abort the whole document with the page's error
    #[default]
    FailDocument,
    /// Keep the other pages and report the failed ones
    SkipFailedPages,
}

/// A page that was skipped under [`PagePolicy::SkipFailedPages`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageFailure {
    pub pageno: u32,
    pub reason: String,
}

/// Chunks of a document plus any pages that failed
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChunkReport {
    pub chunks: Vec<Chunk>,
    pub failed_pages: Vec<PageFailure>,
}

/// Reject anything that is not named `*.pdf` (case-insensitive)
pub fn validate_pdf_path(path: &Path) -> Result<(), PdfError> {
    let name = path.to_string_lossy();
    let is_pdf = name.len() >= 4
        && name
            .get(name.len() - 4..)
            .is_some_and(|ext| ext.eq_ignore_ascii_case(".pdf"));
    if is_pdf {
        Ok(())
    } else {
        Err(PdfError::InvalidInput(path.to_path_buf()))
    }
}

/// Validate the path, then open the document
pub fn prepare(path: &Path) -> Result<PdfDocument, PdfError> {
    validate_pdf_path(path)?;
    PdfDocument::open(path)
}

/// Extract every page's lines and turn them into chunks
///
/// Extraction runs in page order; the per-page chunking runs in parallel and
/// is reassembled in ascending page order, so per-page `parano` sequences
/// stay intact.
pub fn chunk_pages<F>(
    doc: &PdfDocument,
    options: &ExtractOptions,
    policy: PagePolicy,
    per_page: F,
) -> Result<ChunkReport, PdfError>
where
    F: Fn(Vec<LineRecord>, &str, u32) -> Vec<Chunk> + Sync,
{
    let extracted = doc.page_numbers().into_iter().map(|pageno| {
        let lines = doc.page_lines(pageno, options);
        if let Ok(lines) = &lines {
            debug!("page {}: {} lines", pageno, lines.len());
        }
        (pageno, lines)
    });
    assemble_pages(doc.filename(), extracted, policy, per_page)
}

/// Apply the page policy to extraction results and chunk the surviving pages
pub fn assemble_pages<I, F>(
    filename: &str,
    extracted: I,
    policy: PagePolicy,
    per_page: F,
) -> Result<ChunkReport, PdfError>
where
    I: IntoIterator<Item = (u32, Result<Vec<LineRecord>, PdfError>)>,
    F: Fn(Vec<LineRecord>, &str, u32) -> Vec<Chunk> + Sync,
{
    let mut pages = Vec::new();
    let mut failed_pages = Vec::new();

    for (pageno, result) in extracted {
        match result {
            Ok(lines) => pages.push((pageno, lines)),
            Err(e) => match policy {
                PagePolicy::FailDocument => return Err(e),
                PagePolicy::SkipFailedPages => {
                    warn!("{}: skipping page {}: {}", filename, pageno, e);
                    failed_pages.push(PageFailure {
                        pageno,
                        reason: e.to_string(),
                    });
                }
            },
        }
    }

    pages.sort_by_key(|(pageno, _)| *pageno);
    let per_page_chunks: Vec<Vec<Chunk>> = pages
        .into_par_iter()
        .map(|(pageno, lines)| per_page(lines, filename, pageno))
        .collect();

    Ok(ChunkReport {
        chunks: per_page_chunks.into_iter().flatten().collect(),
        failed_pages,
    })
}

/// Settings shared by all registered strategies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerSettings {
    pub merge: MergeConfig,
    pub extract: ExtractOptions,
    pub page_policy: PagePolicy,
    /// Working directory of the pipeline strategy
    pub job_dir: PathBuf,
}

impl Default for ChunkerSettings {
    fn default() -> Self {
        Self {
            merge: MergeConfig::default(),
            extract: ExtractOptions::default(),
            page_policy: PagePolicy::default(),
            job_dir: PathBuf::from("job"),
        }
    }
}

impl ChunkerSettings {
    /// Load settings from a JSON file; missing fields keep their defaults
    pub fn from_json_file(path: &Path) -> Result<Self, PdfError> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }
}

/// Constructor of a registered strategy
pub type ChunkerFactory = fn(&ChunkerSettings) -> Box<dyn Chunker>;

/// Name-to-constructor table of chunking strategies
pub struct ChunkerRegistry {
    entries: Vec<(&'static str, &'static str, ChunkerFactory)>,
}

fn merged_chunker(settings: &ChunkerSettings) -> Box<dyn Chunker> {
    Box::new(MergedParagraphChunker {
        merge: settings.merge.clone(),
        extract: settings.extract.clone(),
        page_policy: settings.page_policy,
    })
}

fn block_chunker(settings: &ChunkerSettings) -> Box<dyn Chunker> {
    Box::new(BlockChunker {
        extract: settings.extract.clone(),
        page_policy: settings.page_policy,
    })
}

fn pipeline_chunker(settings: &ChunkerSettings) -> Box<dyn Chunker> {
    Box::new(
        PipelineChunker::new(&settings.job_dir)
            .with_merge(settings.merge.clone())
            .with_extract(settings.extract.clone()),
    )
}

/// Name of the strategy used when none is requested
pub const DEFAULT_CHUNKER: &str = "merged";

impl ChunkerRegistry {
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Registry with the built-in strategies
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(
            "merged",
            "merge nearby lines into paragraphs (default)",
            merged_chunker,
        );
        registry.register(
            "blocks",
            "one chunk per native text block, no merging",
            block_chunker,
        );
        registry.register(
            "pipeline",
            "convert, deduplicate and chunk through a working directory",
            pipeline_chunker,
        );
        registry
    }

    /// Add or replace a strategy
    pub fn register(&mut self, name: &'static str, description: &'static str, factory: ChunkerFactory) {
        self.entries.retain(|(n, _, _)| *n != name);
        self.entries.push((name, description, factory));
    }

    /// Registered names in registration order
    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|(n, _, _)| *n).collect()
    }

    /// Registered names with their descriptions
    pub fn describe(&self) -> Vec<(&'static str, &'static str)> {
        self.entries.iter().map(|(n, d, _)| (*n, *d)).collect()
    }

    pub fn create(&self, name: &str, settings: &ChunkerSettings) -> Result<Box<dyn Chunker>, PdfError> {
        self.entries
            .iter()
            .find(|(n, _, _)| *n == name)
            .map(|(_, _, factory)| factory(settings))
            .ok_or_else(|| PdfError::UnknownChunker(name.to_string()))
    }
}

impl Default for ChunkerRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
