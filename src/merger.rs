//! Paragraph merging
//!
//! Lines of a page are sorted top to bottom and greedily merged into
//! paragraphs while consecutive lines stay geometrically close and, once a
//! paragraph is long, while the text keeps looking like a continuation.

use crate::chunk::{BBox, Chunk, LineRecord};
use crate::chunker::{chunk_pages, prepare, ChunkReport, Chunker, PagePolicy};
use crate::extractor::ExtractOptions;
use crate::PdfError;
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Thresholds for merging lines into paragraphs
///
/// Distances are in output pixel units; the defaults suit pages extracted at
/// 1 unit per PDF point and need recalibrating for other render scales.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Paragraphs shorter than this (in characters) merge without textual evidence
    pub min_length: usize,
    /// Max vertical gap between a line's bottom and the next line's top
    pub max_line_gap: f32,
    /// Max difference between the two line heights
    pub max_line_height_diff: f32,
    /// Lines closer than this merge even without horizontal overlap
    pub near_touch_gap: f32,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            min_length: 150,
            max_line_gap: 15.0,
            max_line_height_diff: 50.0,
            near_touch_gap: 5.0,
        }
    }
}

/// Geometric relation between two consecutive lines
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineMetrics {
    /// Top of `next` minus bottom of `current`; negative when they overlap
    pub vertical_gap: f32,
    pub height_diff: f32,
    pub horizontal_overlap: f32,
}

impl LineMetrics {
    pub fn between(current: &BBox, next: &BBox) -> Self {
        Self {
            vertical_gap: next.y0 - current.y1,
            height_diff: (current.height() - next.height()).abs(),
            horizontal_overlap: current.horizontal_overlap(next),
        }
    }
}

impl MergeConfig {
    /// Whether lines are close and aligned enough to belong to one paragraph
    pub fn geometry_allows(&self, metrics: &LineMetrics) -> bool {
        metrics.vertical_gap <= self.max_line_gap
            && metrics.height_diff <= self.max_line_height_diff
            && (metrics.horizontal_overlap > 0.0 || metrics.vertical_gap < self.near_touch_gap)
    }

    /// Merge predicate between the last absorbed line and the candidate line
    pub fn should_merge(&self, current: &LineRecord, next: &LineRecord, running_text: &str) -> bool {
        self.should_merge_counted(current, next, running_text, running_text.chars().count())
    }

    fn should_merge_counted(
        &self,
        current: &LineRecord,
        next: &LineRecord,
        running_text: &str,
        running_len: usize,
    ) -> bool {
        let metrics = LineMetrics::between(&current.bbox, &next.bbox);
        self.geometry_allows(&metrics)
            && (running_len < self.min_length || looks_like_continuation(running_text, &next.text))
    }
}

/// Heuristic to detect whether `next` continues the text in `current`
pub fn looks_like_continuation(current: &str, next: &str) -> bool {
    // Hard line break inside a word
    if current.ends_with('-') {
        return true;
    }

    if next.chars().next().is_some_and(char::is_lowercase) {
        return true;
    }

    !current.ends_with(&['.', '!', '?'][..])
}

/// Sort a page's lines top to bottom, dropping lines without text
pub fn sort_lines(lines: Vec<LineRecord>) -> Vec<LineRecord> {
    let mut lines: Vec<LineRecord> = lines
        .into_iter()
        .filter(|l| !l.text.trim().is_empty())
        .map(|mut l| {
            if l.text.len() != l.text.trim().len() {
                l.text = l.text.trim().to_string();
            }
            l
        })
        .collect();
    lines.sort_by(|a, b| {
        a.y_center()
            .partial_cmp(&b.y_center())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    lines
}

/// Merge one page's lines into paragraph chunks
///
/// `parano` runs from 0 in emission order, which is top-to-bottom order of
/// each paragraph's first line.
pub fn merge_page(lines: Vec<LineRecord>, filename: &str, pageno: u32, config: &MergeConfig) -> Vec<Chunk> {
    let lines = sort_lines(lines);
    let mut chunks = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let mut text = lines[i].text.clone();
        let mut text_len = text.chars().count();
        let mut bbox = lines[i].bbox;

        while let Some(next) = lines.get(i + 1) {
            if !config.should_merge_counted(&lines[i], next, &text, text_len) {
                break;
            }
            text.push(' ');
            text.push_str(&next.text);
            text_len += 1 + next.text.chars().count();
            bbox = bbox.union(&next.bbox);
            i += 1;
        }

        let text = text.trim();
        if !text.is_empty() {
            chunks.push(Chunk {
                text: text.to_string(),
                filename: filename.to_string(),
                pageno,
                bbox: Some(bbox),
                parano: Some(chunks.len() as u32),
            });
        }

        i += 1;
    }

    debug!("page {}: {} lines -> {} paragraphs", pageno, lines.len(), chunks.len());
    chunks
}

/// Chunker that merges nearby lines into paragraphs
#[derive(Debug, Clone, Default)]
pub struct MergedParagraphChunker {
    pub merge: MergeConfig,
    pub extract: ExtractOptions,
    pub page_policy: PagePolicy,
}

impl MergedParagraphChunker {
    pub fn new(merge: MergeConfig) -> Self {
        Self {
            merge,
            ..Self::default()
        }
    }
}

impl Chunker for MergedParagraphChunker {
    fn name(&self) -> &'static str {
        "merged"
    }

    fn chunk_report(&self, path: &Path) -> Result<ChunkReport, PdfError> {
        let doc = prepare(path)?;
        chunk_pages(&doc, &self.extract, self.page_policy, |lines, filename, pageno| {
            merge_page(lines, filename, pageno, &self.merge)
        })
    }
}
