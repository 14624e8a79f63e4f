//! CLI tool for chunking a PDF into positioned paragraphs

use clap::Parser;
use pdf_chunker::{Chunk, ChunkReport, ChunkerRegistry, ChunkerSettings, PagePolicy, DEFAULT_CHUNKER};
use std::path::PathBuf;
use std::process;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "pdfchunk")]
#[command(about = "Extract paragraph chunks with bounding boxes from a PDF")]
#[command(version)]
struct Cli {
    /// PDF file to chunk
    #[arg(required_unless_present = "list_strategies")]
    pdf: Option<PathBuf>,

    /// Chunking strategy
    #[arg(short, long, default_value = DEFAULT_CHUNKER)]
    strategy: String,

    /// Print chunks as a JSON array
    #[arg(long)]
    json: bool,

    /// Only print chunks of this page
    #[arg(short, long)]
    page: Option<u32>,

    /// JSON settings file (merge thresholds, extraction options, page policy)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Paragraph length below which lines merge without textual evidence
    #[arg(long)]
    min_length: Option<usize>,

    /// Max vertical gap between merged lines
    #[arg(long)]
    max_line_gap: Option<f32>,

    /// Max line height difference between merged lines
    #[arg(long)]
    max_line_height_diff: Option<f32>,

    /// Gap under which lines merge without horizontal overlap
    #[arg(long)]
    near_touch_gap: Option<f32>,

    /// Pixels per PDF point in the reported coordinates
    #[arg(long)]
    scale: Option<f32>,

    /// Keep going when a page fails and report the failed pages
    #[arg(long)]
    skip_bad_pages: bool,

    /// Working directory for the pipeline strategy
    #[arg(long)]
    job_dir: Option<PathBuf>,

    /// List available strategies and exit
    #[arg(long)]
    list_strategies: bool,
}

impl Cli {
    fn settings(&self) -> Result<ChunkerSettings, pdf_chunker::PdfError> {
        let mut settings = match &self.config {
            Some(path) => ChunkerSettings::from_json_file(path)?,
            None => ChunkerSettings::default(),
        };
        if let Some(v) = self.min_length {
            settings.merge.min_length = v;
        }
        if let Some(v) = self.max_line_gap {
            settings.merge.max_line_gap = v;
        }
        if let Some(v) = self.max_line_height_diff {
            settings.merge.max_line_height_diff = v;
        }
        if let Some(v) = self.near_touch_gap {
            settings.merge.near_touch_gap = v;
        }
        if let Some(v) = self.scale {
            settings.extract.scale = v;
        }
        if self.skip_bad_pages {
            settings.page_policy = PagePolicy::SkipFailedPages;
        }
        if let Some(dir) = &self.job_dir {
            settings.job_dir = dir.clone();
        }
        Ok(settings)
    }
}

fn format_chunk(chunk: &Chunk) -> String {
    let parano = chunk
        .parano
        .map(|p| p.to_string())
        .unwrap_or_else(|| "?".to_string());
    let bbox = chunk
        .bbox
        .map(|b| format!("({:.1}, {:.1}, {:.1}, {:.1})", b.x0, b.y0, b.x1, b.y1))
        .unwrap_or_else(|| "(no bbox)".to_string());
    format!("[p{}#{}] {} {}", chunk.pageno, parano, bbox, chunk.text)
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();
    let registry = ChunkerRegistry::builtin();

    if cli.list_strategies {
        for (name, description) in registry.describe() {
            println!("{:10} {}", name, description);
        }
        return;
    }

    let Some(pdf_path) = cli.pdf.clone() else {
        eprintln!("Error: no PDF file given");
        process::exit(1);
    };

    let settings = match cli.settings() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let chunker = match registry.create(&cli.strategy, &settings) {
        Ok(chunker) => chunker,
        Err(e) => {
            eprintln!("Error: {} (available: {})", e, registry.names().join(", "));
            process::exit(1);
        }
    };

    let start = Instant::now();
    let ChunkReport {
        chunks,
        failed_pages,
    } = match chunker.chunk_report(&pdf_path) {
        Ok(report) => report,
        Err(e) => {
            if cli.json {
                println!("{}", serde_json::json!({ "error": e.to_string() }));
            } else {
                eprintln!("Error: {}", e);
            }
            process::exit(1);
        }
    };
    let elapsed = start.elapsed();

    let selected: Vec<&Chunk> = chunks
        .iter()
        .filter(|c| cli.page.map_or(true, |p| c.pageno == p))
        .collect();

    if cli.json {
        match serde_json::to_string_pretty(&selected) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error: {}", e);
                process::exit(1);
            }
        }
    } else {
        println!("PDF Chunking");
        println!("============");
        println!("File: {}", pdf_path.display());
        println!("Strategy: {}", chunker.name());
        println!("Chunks: {}", chunks.len());
        println!("Processing time: {}ms", elapsed.as_millis());
        println!();
        for chunk in &selected {
            println!("{}", format_chunk(chunk));
        }
    }

    for failure in &failed_pages {
        eprintln!("Warning: page {} skipped: {}", failure.pageno, failure.reason);
    }
}
