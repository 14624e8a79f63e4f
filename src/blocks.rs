//! Block-grouping chunker
//!
//! Emits one chunk per native text block (a `BT ... ET` text object) without
//! any geometric merging. The chunk box is the union of all of the block's
//! line boxes.

use crate::chunk::{Chunk, LineRecord};
use crate::chunker::{chunk_pages, prepare, ChunkReport, Chunker, PagePolicy};
use crate::extractor::ExtractOptions;
use crate::PdfError;
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct BlockChunker {
    pub extract: ExtractOptions,
    pub page_policy: PagePolicy,
}

/// Group one page's lines by block, in the order blocks first appear
pub fn group_page_blocks(lines: Vec<LineRecord>, filename: &str, pageno: u32) -> Vec<Chunk> {
    let mut blocks: Vec<(u32, Vec<LineRecord>)> = Vec::new();
    for line in lines {
        match blocks.iter_mut().find(|(id, _)| *id == line.block) {
            Some((_, members)) => members.push(line),
            None => blocks.push((line.block, vec![line])),
        }
    }

    let mut chunks = Vec::new();
    for (_, members) in blocks {
        let text = members
            .iter()
            .map(|l| l.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if text.is_empty() {
            continue;
        }

        let bbox = members
            .iter()
            .map(|l| l.bbox)
            .reduce(|a, b| a.union(&b));

        chunks.push(Chunk {
            text,
            filename: filename.to_string(),
            pageno,
            bbox,
            parano: Some(chunks.len() as u32),
        });
    }
    chunks
}

impl Chunker for BlockChunker {
    fn name(&self) -> &'static str {
        "blocks"
    }

    fn chunk_report(&self, path: &Path) -> Result<ChunkReport, PdfError> {
        let doc = prepare(path)?;
        chunk_pages(&doc, &self.extract, self.page_policy, group_page_blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::BBox;

    fn line(text: &str, top: f32, block: u32) -> LineRecord {
        LineRecord::new(text, BBox::new(72.0, top, 72.0 + text.len() as f32 * 6.0, top + 12.0))
            .with_block(block)
    }

    #[test]
    fn test_one_chunk_per_block() {
        let lines = vec![
            line("First block line one", 100.0, 0),
            line("line two", 115.0, 0),
            line("Second block", 300.0, 1),
        ];
        let chunks = group_page_blocks(lines, "doc.pdf", 2);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "First block line one line two");
        assert_eq!(chunks[1].text, "Second block");
        assert_eq!(chunks[0].parano, Some(0));
        assert_eq!(chunks[1].parano, Some(1));
        assert!(chunks.iter().all(|c| c.pageno == 2));
    }

    #[test]
    fn test_block_bbox_is_union_of_lines() {
        let lines = vec![line("short", 100.0, 0), line("a much longer line", 115.0, 0)];
        let chunks = group_page_blocks(lines.clone(), "doc.pdf", 1);
        let bbox = chunks[0].bbox.unwrap();
        assert_eq!(bbox, lines[0].bbox.union(&lines[1].bbox));
        assert!(bbox.contains(&lines[0].bbox) && bbox.contains(&lines[1].bbox));
    }

    #[test]
    fn test_blocks_keep_extraction_order() {
        // Block 3 is drawn first even though it sits lower on the page
        let lines = vec![line("footer", 700.0, 3), line("header", 50.0, 0)];
        let chunks = group_page_blocks(lines, "doc.pdf", 1);
        assert_eq!(chunks[0].text, "footer");
        assert_eq!(chunks[1].text, "header");
    }

    #[test]
    fn test_interleaved_block_lines_are_regrouped() {
        let lines = vec![line("a1", 100.0, 0), line("b1", 100.0, 1), line("a2", 115.0, 0)];
        let chunks = group_page_blocks(lines, "doc.pdf", 1);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "a1 a2");
    }

    #[test]
    fn test_empty_page_has_no_blocks() {
        assert!(group_page_blocks(Vec::new(), "doc.pdf", 1).is_empty());
    }
}
