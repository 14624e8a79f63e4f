//! Multi-stage pipeline chunker
//!
//! Runs a document through conversion, exact deduplication and structural
//! chunking, each stage reading the previous stage's JSON Lines output from a
//! working directory. The working directories are wiped and recreated on
//! every run; they are scratch space, not a store.
//!
//! Rows coming out of the last stage may lack geometry, so the resulting
//! chunks carry `bbox`/`parano` only when they can be recovered.

use crate::chunk::{BBox, Chunk};
use crate::chunker::{validate_pdf_path, ChunkReport, Chunker};
use crate::extractor::{file_name, ExtractOptions, PdfDocument};
use crate::merger::{merge_page, MergeConfig};
use crate::PdfError;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

const CONVERT_DIR: &str = "01_convert_out";
const DEDUPE_DIR: &str = "02_dedupe_out";
const CHUNK_DIR: &str = "03_chunk_out";

/// Output of the conversion stage, one per input document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRow {
    pub document_id: String,
    pub filename: String,
    pub num_pages: u32,
    /// Serialized [`LayoutDocument`]
    pub contents: String,
}

/// Structured form of a converted document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayoutDocument {
    pub name: String,
    pub texts: Vec<LayoutElement>,
}

/// A text element of a converted document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutElement {
    /// Structural path, e.g. `#/texts/12`
    pub path: String,
    pub page: u32,
    pub bbox: Option<BBox>,
    pub text: String,
}

/// Output of the chunking stage
///
/// Loosely typed interchange row, validated once in [`ChunkRow::into_chunk`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkRow {
    pub contents: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub pageno: Option<i64>,
    #[serde(default)]
    pub bbox: Vec<f32>,
    #[serde(default)]
    pub doc_jsonpath: Option<String>,
    #[serde(default)]
    pub document_id: Option<String>,
}

impl ChunkRow {
    /// Convert to a chunk; rows without a usable page number are rejected
    pub fn into_chunk(self, default_filename: &str) -> Option<Chunk> {
        let pageno = self.pageno.filter(|p| *p >= 1).and_then(|p| u32::try_from(p).ok())?;
        Some(Chunk {
            bbox: BBox::from_slice(&self.bbox),
            parano: self.doc_jsonpath.as_deref().and_then(parse_parano),
            filename: self
                .filename
                .filter(|f| !f.is_empty())
                .unwrap_or_else(|| default_filename.to_string()),
            pageno,
            text: self.contents,
        })
    }
}

/// Paragraph index from the last segment of a structural path (`#/texts/7` -> 7)
pub fn parse_parano(path: &str) -> Option<u32> {
    path.rsplit('/').next()?.trim().parse().ok()
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

fn read_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, PdfError> {
    let reader = BufReader::new(File::open(path)?);
    let mut rows = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        rows.push(serde_json::from_str(&line)?);
    }
    Ok(rows)
}

fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), PdfError> {
    let mut writer = BufWriter::new(File::create(path)?);
    for row in rows {
        serde_json::to_writer(&mut writer, row)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// `*.jsonl` files of a stage directory, sorted by name
fn jsonl_files(dir: &Path) -> Result<Vec<PathBuf>, PdfError> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "jsonl"))
        .collect();
    files.sort();
    Ok(files)
}

fn reset_dir(dir: &Path) -> Result<(), PdfError> {
    match fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    fs::create_dir_all(dir)?;
    Ok(())
}

fn stage_error(stage: &'static str) -> impl Fn(PdfError) -> PdfError {
    move |e| match e {
        PdfError::Pipeline { .. } => e,
        other => PdfError::Pipeline {
            stage,
            reason: other.to_string(),
        },
    }
}

/// Chunker that runs the convert / dedupe / chunk pipeline in a working directory
#[derive(Debug, Clone)]
pub struct PipelineChunker {
    job_dir: PathBuf,
    merge: MergeConfig,
    extract: ExtractOptions,
}

impl PipelineChunker {
    pub fn new<P: AsRef<Path>>(job_dir: P) -> Self {
        Self {
            job_dir: job_dir.as_ref().to_path_buf(),
            merge: MergeConfig::default(),
            extract: ExtractOptions::default(),
        }
    }

    pub fn with_merge(mut self, merge: MergeConfig) -> Self {
        self.merge = merge;
        self
    }

    pub fn with_extract(mut self, extract: ExtractOptions) -> Self {
        self.extract = extract;
        self
    }

    pub fn input_dir(&self) -> PathBuf {
        self.job_dir.join("input")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.job_dir.join("output")
    }

    /// Reset the working directories and copy the PDF into the input directory
    ///
    /// The source is read before anything is wiped, so a PDF that already
    /// sits in the input directory survives the reset.
    fn prepare_dirs(&self, pdf_path: &Path) -> Result<String, PdfError> {
        let open_error = |e: std::io::Error| PdfError::Open {
            path: pdf_path.to_path_buf(),
            reason: e.to_string(),
        };
        let bytes = fs::read(pdf_path).map_err(open_error)?;

        let input_dir = self.input_dir();
        reset_dir(&input_dir)?;
        reset_dir(&self.output_dir())?;

        let filename = file_name(pdf_path);
        fs::write(input_dir.join(&filename), bytes)?;
        Ok(filename)
    }

    /// Stage 1: every input PDF becomes one document row with its text elements
    fn convert(&self, input_dir: &Path, out_dir: &Path) -> Result<(), PdfError> {
        let mut inputs: Vec<PathBuf> = fs::read_dir(input_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| validate_pdf_path(p).is_ok())
            .collect();
        inputs.sort();

        for input in inputs {
            let bytes = fs::read(&input)?;
            let filename = file_name(&input);
            let doc = PdfDocument::load_mem(&bytes, filename.clone())?;

            let mut texts = Vec::new();
            for pageno in doc.page_numbers() {
                let lines = doc.page_lines(pageno, &self.extract)?;
                for chunk in merge_page(lines, &filename, pageno, &self.merge) {
                    texts.push(LayoutElement {
                        path: format!("#/texts/{}", texts.len()),
                        page: pageno,
                        bbox: chunk.bbox,
                        text: chunk.text,
                    });
                }
            }

            let layout = LayoutDocument {
                name: filename.clone(),
                texts,
            };
            let row = DocumentRow {
                document_id: sha256_hex(&bytes),
                filename: filename.clone(),
                num_pages: doc.page_count(),
                contents: serde_json::to_string(&layout)?,
            };

            let stem = input
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| filename.clone());
            write_rows(&out_dir.join(format!("{}.jsonl", stem)), &[row])?;
        }
        Ok(())
    }

    /// Stage 2: drop documents whose contents were already seen
    fn dedupe(&self, in_dir: &Path, out_dir: &Path) -> Result<(), PdfError> {
        let mut seen = HashSet::new();
        for file in jsonl_files(in_dir)? {
            let rows: Vec<DocumentRow> = read_rows(&file)?;
            let total = rows.len();
            let kept: Vec<DocumentRow> = rows
                .into_iter()
                .filter(|row| seen.insert(sha256_hex(row.contents.as_bytes())))
                .collect();
            if kept.len() < total {
                debug!("dedupe: dropped {} duplicate documents", total - kept.len());
            }
            if let Some(name) = file.file_name() {
                write_rows(&out_dir.join(name), &kept)?;
            }
        }
        Ok(())
    }

    /// Stage 3: one chunk row per structural text element
    fn chunk_documents(&self, in_dir: &Path, out_dir: &Path) -> Result<(), PdfError> {
        for file in jsonl_files(in_dir)? {
            let docs: Vec<DocumentRow> = read_rows(&file)?;
            let mut rows = Vec::new();
            for doc in docs {
                let layout: LayoutDocument = serde_json::from_str(&doc.contents)?;
                rows.extend(layout.texts.into_iter().map(|element| ChunkRow {
                    contents: element.text,
                    filename: Some(doc.filename.clone()),
                    pageno: Some(element.page as i64),
                    bbox: element.bbox.map(|b| <[f32; 4]>::from(b).to_vec()).unwrap_or_default(),
                    doc_jsonpath: Some(element.path),
                    document_id: Some(doc.document_id.clone()),
                }));
            }
            if let Some(name) = file.file_name() {
                write_rows(&out_dir.join(name), &rows)?;
            }
        }
        Ok(())
    }

    /// Stage 4: read the chunk rows back as chunks
    fn collect(&self, chunk_dir: &Path, default_filename: &str) -> Result<Vec<Chunk>, PdfError> {
        let mut chunks = Vec::new();
        for file in jsonl_files(chunk_dir)? {
            let rows: Vec<ChunkRow> = read_rows(&file)?;
            for row in rows {
                match row.into_chunk(default_filename) {
                    Some(chunk) => chunks.push(chunk),
                    None => warn!("{}: dropping chunk row without a page number", file.display()),
                }
            }
        }
        Ok(chunks)
    }
}

impl Chunker for PipelineChunker {
    fn name(&self) -> &'static str {
        "pipeline"
    }

    fn chunk_report(&self, path: &Path) -> Result<ChunkReport, PdfError> {
        validate_pdf_path(path)?;
        let filename = self.prepare_dirs(path)?;

        let output_dir = self.output_dir();
        let convert_dir = output_dir.join(CONVERT_DIR);
        let dedupe_dir = output_dir.join(DEDUPE_DIR);
        let chunk_dir = output_dir.join(CHUNK_DIR);
        for dir in [&convert_dir, &dedupe_dir, &chunk_dir] {
            fs::create_dir_all(dir)?;
        }

        self.convert(&self.input_dir(), &convert_dir)
            .map_err(|e| match e {
                PdfError::Open { .. } | PdfError::Encrypted | PdfError::Page { .. } => e,
                other => stage_error("convert")(other),
            })?;
        self.dedupe(&convert_dir, &dedupe_dir)
            .map_err(stage_error("dedupe"))?;
        self.chunk_documents(&dedupe_dir, &chunk_dir)
            .map_err(stage_error("chunk"))?;
        let chunks = self
            .collect(&chunk_dir, &filename)
            .map_err(stage_error("collect"))?;

        Ok(ChunkReport {
            chunks,
            failed_pages: Vec::new(),
        })
    }
}
