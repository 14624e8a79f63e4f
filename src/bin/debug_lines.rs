//! Debug tool: Print sorted lines with the merge metrics between neighbours
//!
//! Usage: debug_lines <pdf_file> [page_number]
//!
//! Shows each page's lines top to bottom with their vertical gap, height
//! difference and horizontal overlap to the previous line, and whether the
//! paragraph merger would join them.

use pdf_chunker::extractor::{ExtractOptions, PdfDocument};
use pdf_chunker::merger::{sort_lines, LineMetrics, MergeConfig};
use std::env;
use std::process;

fn main() {
    env_logger::init();
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <pdf_file> [page_number]", args[0]);
        eprintln!();
        eprintln!("Prints sorted text lines with gaps and merge decisions.");
        eprintln!("If page_number is given, only that page is shown.");
        process::exit(1);
    }

    let pdf_path = &args[1];
    let filter_page: Option<u32> = args.get(2).and_then(|s| s.parse().ok());

    let doc = match PdfDocument::open(pdf_path) {
        Ok(doc) => doc,
        Err(e) => {
            eprintln!("Error opening PDF: {}", e);
            process::exit(1);
        }
    };

    let config = MergeConfig::default();
    let options = ExtractOptions::default();
    eprintln!(
        "Thresholds: gap <= {:.1}, height diff <= {:.1}, near-touch < {:.1}, min length {}",
        config.max_line_gap, config.max_line_height_diff, config.near_touch_gap, config.min_length
    );
    eprintln!();

    for page in doc.page_numbers() {
        if filter_page.is_some_and(|fp| fp != page) {
            continue;
        }

        let lines = match doc.page_lines(page, &options) {
            Ok(lines) => sort_lines(lines),
            Err(e) => {
                eprintln!("Page {}: {}", page, e);
                continue;
            }
        };

        println!("===== PAGE {} ({} lines) =====", page, lines.len());
        println!(
            "{:>7} {:>7} {:>7} {:>6} {:>7} {:>5}  {}",
            "Y0", "Y1", "Gap", "HDiff", "Overlap", "Blk", "Text (first 70 chars)"
        );
        println!("{}", "-".repeat(110));

        let mut running = String::new();
        let mut gaps: Vec<f32> = Vec::new();

        for (i, line) in lines.iter().enumerate() {
            let display_text: String = line.text.chars().take(70).collect();

            let (metrics_str, marker) = match i.checked_sub(1).map(|p| &lines[p]) {
                Some(prev) => {
                    let m = LineMetrics::between(&prev.bbox, &line.bbox);
                    gaps.push(m.vertical_gap);
                    let merge = config.should_merge(prev, line, &running);
                    if merge {
                        running.push(' ');
                        running.push_str(&line.text);
                    } else {
                        running = line.text.clone();
                    }
                    (
                        format!(
                            "{:7.1} {:6.1} {:7.1}",
                            m.vertical_gap, m.height_diff, m.horizontal_overlap
                        ),
                        if merge { "" } else { " <<PARA>>" },
                    )
                }
                None => {
                    running = line.text.clone();
                    (format!("{:>7} {:>6} {:>7}", "---", "---", "---"), " <<PARA>>")
                }
            };

            println!(
                "{:7.1} {:7.1} {} {:5}  {}{}",
                line.bbox.y0, line.bbox.y1, metrics_str, line.block, display_text, marker
            );
        }

        if !gaps.is_empty() {
            gaps.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let median = gaps[gaps.len() / 2];
            let mean: f32 = gaps.iter().sum::<f32>() / gaps.len() as f32;
            println!();
            println!("  Gap statistics for page {}:", page);
            println!("    Count:  {}", gaps.len());
            println!("    Min:    {:6.1}", gaps[0]);
            println!("    Max:    {:6.1}", gaps[gaps.len() - 1]);
            println!("    Median: {:6.1}", median);
            println!("    Mean:   {:6.1}", mean);
        }
        println!();
    }
}
