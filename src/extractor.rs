//! Line extraction from PDF using lopdf
//!
//! This module walks page content streams, collects positioned text items and
//! groups them into line records with bounding boxes in page pixel space
//! (origin top-left, y increasing downward).

use crate::chunk::{BBox, LineRecord};
use crate::fonts::{decode_fallback, get_number, resolve, PageFonts};
use crate::PdfError;
use lopdf::content::Content;
use lopdf::{Document, Object, ObjectId};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Fraction of the font size drawn above the baseline
const ASCENT: f32 = 0.8;
/// Fraction of the font size drawn below the baseline
const DESCENT: f32 = 0.2;

/// US Letter, used when a page carries no MediaBox
const DEFAULT_MEDIA_BOX: [f32; 4] = [0.0, 0.0, 612.0, 792.0];

/// Options for line extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractOptions {
    /// Max baseline difference for two text items to share a line
    pub line_y_tolerance: f32,
    /// Horizontal gap, as a fraction of the font size, that separates words
    pub word_gap_ratio: f32,
    /// Pixels per PDF point in the output coordinates
    pub scale: f32,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            line_y_tolerance: 3.0,
            word_gap_ratio: 0.15,
            scale: 1.0,
        }
    }
}

/// A text item with position information (PDF user space, baseline origin)
#[derive(Debug, Clone)]
pub struct TextItem {
    /// The text content
    pub text: String,
    /// X position on page
    pub x: f32,
    /// Baseline Y position on page (PDF coordinates, origin at bottom-left)
    pub y: f32,
    /// Rendered advance width
    pub width: f32,
    /// Rendered font size
    pub font_size: f32,
    /// Text object (`BT ... ET`) the item was drawn in
    pub block: u32,
}

/// An opened PDF ready for per-page line extraction
pub struct PdfDocument {
    doc: Document,
    filename: String,
}

impl PdfDocument {
    /// Open a PDF file; any load failure is reported as an open error
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PdfError> {
        let path = path.as_ref();
        let doc = Document::load(path).map_err(|e| PdfError::Open {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_document(doc, file_name(path))
    }

    /// Open a PDF from a memory buffer
    pub fn load_mem(buffer: &[u8], filename: impl Into<String>) -> Result<Self, PdfError> {
        let filename = filename.into();
        let doc = Document::load_mem(buffer).map_err(|e| PdfError::Open {
            path: PathBuf::from(&filename),
            reason: e.to_string(),
        })?;
        Self::from_document(doc, filename)
    }

    fn from_document(doc: Document, filename: String) -> Result<Self, PdfError> {
        if doc.is_encrypted() {
            return Err(PdfError::Encrypted);
        }
        Ok(Self { doc, filename })
    }

    /// Source file name (no directories), shared by every chunk of the document
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// 1-based page numbers in ascending order
    pub fn page_numbers(&self) -> Vec<u32> {
        self.doc.get_pages().keys().copied().collect()
    }

    pub fn page_count(&self) -> u32 {
        self.doc.get_pages().len() as u32
    }

    fn page_id(&self, pageno: u32) -> Result<ObjectId, PdfError> {
        self.doc
            .get_pages()
            .get(&pageno)
            .copied()
            .ok_or_else(|| PdfError::Page {
                pageno,
                reason: "page not found".to_string(),
            })
    }

    /// Positioned text items of one page, in content stream order
    pub fn page_items(&self, pageno: u32) -> Result<Vec<TextItem>, PdfError> {
        let page_id = self.page_id(pageno)?;
        extract_page_text_items(&self.doc, page_id, pageno)
    }

    /// Line records of one page, in extraction order
    pub fn page_lines(&self, pageno: u32, options: &ExtractOptions) -> Result<Vec<LineRecord>, PdfError> {
        let page_id = self.page_id(pageno)?;
        let items = extract_page_text_items(&self.doc, page_id, pageno)?;
        let media_box = page_media_box(&self.doc, page_id);
        Ok(group_into_lines(items, media_box, options))
    }
}

/// Final path component as a string
pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Multiply two 2D transformation matrices
/// Matrix format: [a, b, c, d, e, f] representing:
/// | a  b  0 |
/// | c  d  0 |
/// | e  f  1 |
fn multiply_matrices(m1: &[f32; 6], m2: &[f32; 6]) -> [f32; 6] {
    [
        m1[0] * m2[0] + m1[1] * m2[2],
        m1[0] * m2[1] + m1[1] * m2[3],
        m1[2] * m2[0] + m1[3] * m2[2],
        m1[2] * m2[1] + m1[3] * m2[3],
        m1[4] * m2[0] + m1[5] * m2[2] + m2[4],
        m1[4] * m2[1] + m1[5] * m2[3] + m2[5],
    ]
}

fn translation(tx: f32, ty: f32) -> [f32; 6] {
    [1.0, 0.0, 0.0, 1.0, tx, ty]
}

/// Compute effective font size from base size and a text-to-device matrix
fn effective_font_size(base_size: f32, matrix: &[f32; 6]) -> f32 {
    let scale_x = (matrix[0].powi(2) + matrix[1].powi(2)).sqrt();
    let scale_y = (matrix[2].powi(2) + matrix[3].powi(2)).sqrt();
    base_size * scale_x.max(scale_y)
}

/// Graphics and text state while walking a content stream
struct TextState {
    ctm: [f32; 6],
    ctm_stack: Vec<[f32; 6]>,
    text_matrix: [f32; 6],
    line_matrix: [f32; 6],
    font: String,
    font_size: f32,
    char_spacing: f32,
    word_spacing: f32,
    horizontal_scale: f32,
    leading: f32,
    in_text_block: bool,
    block: u32,
    next_block: u32,
}

impl TextState {
    fn new() -> Self {
        Self {
            ctm: translation(0.0, 0.0),
            ctm_stack: Vec::new(),
            text_matrix: translation(0.0, 0.0),
            line_matrix: translation(0.0, 0.0),
            font: String::new(),
            font_size: 12.0,
            char_spacing: 0.0,
            word_spacing: 0.0,
            horizontal_scale: 1.0,
            leading: 0.0,
            in_text_block: false,
            block: 0,
            next_block: 0,
        }
    }

    fn move_line(&mut self, tx: f32, ty: f32) {
        self.line_matrix = multiply_matrices(&translation(tx, ty), &self.line_matrix);
        self.text_matrix = self.line_matrix;
    }

    fn next_line(&mut self) {
        let leading = if self.leading != 0.0 {
            self.leading
        } else {
            self.font_size * 1.2
        };
        self.move_line(0.0, -leading);
    }

    /// Show string operands (and TJ kerning numbers), advancing the text matrix
    fn show(
        &mut self,
        doc: &Document,
        fonts: &PageFonts,
        operands: &[Object],
    ) -> Option<TextItem> {
        let start = multiply_matrices(&self.text_matrix, &self.ctm);
        let font = fonts.get(&self.font);
        let mut text = String::new();
        let mut advance = 0.0f32;

        for operand in operands {
            match operand {
                Object::String(bytes, _) => {
                    let (decoded, (width, glyphs, spaces)) = match font {
                        Some(f) => (f.decode(doc, bytes), f.measure(bytes)),
                        None => (
                            decode_fallback(bytes),
                            (
                                bytes.len() as f32 * 500.0,
                                bytes.len(),
                                bytes.iter().filter(|&&b| b == b' ').count(),
                            ),
                        ),
                    };
                    text.push_str(&decoded);
                    advance += (width / 1000.0 * self.font_size
                        + self.char_spacing * glyphs as f32
                        + self.word_spacing * spaces as f32)
                        * self.horizontal_scale;
                }
                other => {
                    if let Some(adjust) = get_number(other) {
                        // Large negative kerning inside TJ stands in for a space
                        if adjust < -200.0 && !text.is_empty() && !text.ends_with(' ') {
                            text.push(' ');
                        }
                        advance -= adjust / 1000.0 * self.font_size * self.horizontal_scale;
                    }
                }
            }
        }

        self.text_matrix = multiply_matrices(&translation(advance, 0.0), &self.text_matrix);

        if text.trim().is_empty() {
            return None;
        }

        let end = multiply_matrices(&self.text_matrix, &self.ctm);
        let width = ((end[4] - start[4]).powi(2) + (end[5] - start[5]).powi(2)).sqrt();

        Some(TextItem {
            text,
            x: start[4],
            y: start[5],
            width,
            font_size: effective_font_size(self.font_size, &start),
            block: self.block,
        })
    }
}

/// Extract text items from a single page
fn extract_page_text_items(
    doc: &Document,
    page_id: ObjectId,
    page_num: u32,
) -> Result<Vec<TextItem>, PdfError> {
    let page_error = |e: lopdf::Error| PdfError::Page {
        pageno: page_num,
        reason: e.to_string(),
    };

    let fonts = PageFonts::new(doc, doc.get_page_fonts(page_id).unwrap_or_default());
    let content_data = doc.get_page_content(page_id).map_err(page_error)?;
    let content = Content::decode(&content_data).map_err(page_error)?;

    let mut items = Vec::new();
    let mut state = TextState::new();

    for op in &content.operations {
        let operands = &op.operands;
        let number = |i: usize, default: f32| operands.get(i).and_then(get_number).unwrap_or(default);

        match op.operator.as_str() {
            "q" => state.ctm_stack.push(state.ctm),
            "Q" => {
                if let Some(saved) = state.ctm_stack.pop() {
                    state.ctm = saved;
                }
            }
            "cm" if operands.len() >= 6 => {
                let m = [
                    number(0, 1.0),
                    number(1, 0.0),
                    number(2, 0.0),
                    number(3, 1.0),
                    number(4, 0.0),
                    number(5, 0.0),
                ];
                state.ctm = multiply_matrices(&m, &state.ctm);
            }
            "BT" => {
                state.in_text_block = true;
                state.block = state.next_block;
                state.next_block += 1;
                state.text_matrix = translation(0.0, 0.0);
                state.line_matrix = translation(0.0, 0.0);
            }
            "ET" => state.in_text_block = false,
            "Tf" if operands.len() >= 2 => {
                if let Ok(name) = operands[0].as_name() {
                    state.font = String::from_utf8_lossy(name).to_string();
                }
                state.font_size = number(1, state.font_size);
            }
            "Tc" => state.char_spacing = number(0, 0.0),
            "Tw" => state.word_spacing = number(0, 0.0),
            "Tz" => state.horizontal_scale = number(0, 100.0) / 100.0,
            "TL" => state.leading = number(0, 0.0),
            "Td" if operands.len() >= 2 => state.move_line(number(0, 0.0), number(1, 0.0)),
            "TD" if operands.len() >= 2 => {
                let ty = number(1, 0.0);
                state.leading = -ty;
                state.move_line(number(0, 0.0), ty);
            }
            "Tm" if operands.len() >= 6 => {
                for i in 0..6 {
                    state.text_matrix[i] = number(i, if i == 0 || i == 3 { 1.0 } else { 0.0 });
                }
                state.line_matrix = state.text_matrix;
            }
            "T*" => state.next_line(),
            "Tj" if state.in_text_block && !operands.is_empty() => {
                items.extend(state.show(doc, &fonts, &operands[..1]));
            }
            "TJ" if state.in_text_block && !operands.is_empty() => {
                if let Ok(array) = operands[0].as_array() {
                    items.extend(state.show(doc, &fonts, array));
                }
            }
            "'" if state.in_text_block && !operands.is_empty() => {
                state.next_line();
                items.extend(state.show(doc, &fonts, &operands[..1]));
            }
            "\"" if state.in_text_block && operands.len() >= 3 => {
                state.word_spacing = number(0, 0.0);
                state.char_spacing = number(1, 0.0);
                state.next_line();
                items.extend(state.show(doc, &fonts, &operands[2..3]));
            }
            _ => {}
        }
    }

    Ok(items)
}

/// Page MediaBox `[llx, lly, urx, ury]`, inherited through the page tree
pub fn page_media_box(doc: &Document, page_id: ObjectId) -> [f32; 4] {
    let mut current = doc.get_dictionary(page_id).ok();
    // Bounded walk up the page tree
    for _ in 0..32 {
        let Some(dict) = current else {
            break;
        };
        if let Ok(array) = dict
            .get(b"MediaBox")
            .map(|o| resolve(doc, o))
            .and_then(Object::as_array)
        {
            let values: Vec<f32> = array.iter().filter_map(|o| get_number(resolve(doc, o))).collect();
            if let [llx, lly, urx, ury] = values[..] {
                return [llx.min(urx), lly.min(ury), llx.max(urx), lly.max(ury)];
            }
        }
        current = dict
            .get(b"Parent")
            .and_then(Object::as_reference)
            .ok()
            .and_then(|id| doc.get_dictionary(id).ok());
    }
    DEFAULT_MEDIA_BOX
}

/// Group one page's text items into line records
///
/// Preserves content stream order and only merges consecutive items whose
/// baselines are within tolerance, so the result is in extraction order.
pub fn group_into_lines(
    items: Vec<TextItem>,
    media_box: [f32; 4],
    options: &ExtractOptions,
) -> Vec<LineRecord> {
    let mut groups: Vec<Vec<TextItem>> = Vec::new();

    for item in items {
        let same_line = groups.last().and_then(|g| g.last()).is_some_and(|last| {
            last.block == item.block && (last.y - item.y).abs() < options.line_y_tolerance
        });
        match groups.last_mut() {
            Some(group) if same_line => group.push(item),
            _ => groups.push(vec![item]),
        }
    }

    groups
        .into_iter()
        .filter_map(|group| build_line(group, media_box, options))
        .collect()
}

fn build_line(mut items: Vec<TextItem>, media_box: [f32; 4], options: &ExtractOptions) -> Option<LineRecord> {
    let block = items.first()?.block;
    items.sort_by(|a, b| a.x.partial_cmp(&b.x).unwrap_or(std::cmp::Ordering::Equal));

    let mut text = String::new();
    let mut prev_end: Option<f32> = None;
    for item in &items {
        if let Some(end) = prev_end {
            let gap = item.x - end;
            if gap > options.word_gap_ratio * item.font_size
                && !text.ends_with(char::is_whitespace)
                && !item.text.starts_with(char::is_whitespace)
            {
                text.push(' ');
            }
        }
        text.push_str(&item.text);
        prev_end = Some(item.x + item.width);
    }

    let text = WHITESPACE_RE.replace_all(text.trim(), " ").into_owned();
    if text.is_empty() {
        return None;
    }

    let x0 = items.iter().map(|i| i.x).fold(f32::INFINITY, f32::min);
    let x1 = items.iter().map(|i| i.x + i.width).fold(f32::NEG_INFINITY, f32::max);
    let top = items
        .iter()
        .map(|i| i.y + i.font_size * ASCENT)
        .fold(f32::NEG_INFINITY, f32::max);
    let bottom = items
        .iter()
        .map(|i| i.y - i.font_size * DESCENT)
        .fold(f32::INFINITY, f32::min);

    let [llx, _, _, ury] = media_box;
    let scale = options.scale;
    let bbox = BBox::new(
        (x0 - llx) * scale,
        (ury - top) * scale,
        (x1 - llx) * scale,
        (ury - bottom) * scale,
    );

    Some(LineRecord { text, bbox, block })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(text: &str, x: f32, y: f32, block: u32) -> TextItem {
        TextItem {
            text: text.into(),
            x,
            y,
            width: text.len() as f32 * 6.0,
            font_size: 10.0,
            block,
        }
    }

    #[test]
    fn test_group_into_lines() {
        let items = vec![
            item("Hello", 100.0, 700.0, 0),
            item("World", 140.0, 700.0, 0),
            item("Next line", 100.0, 680.0, 1),
        ];

        let lines = group_into_lines(items, DEFAULT_MEDIA_BOX, &ExtractOptions::default());
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "Hello World");
        assert_eq!(lines[1].text, "Next line");
        assert_eq!(lines[1].block, 1);
    }

    #[test]
    fn test_same_baseline_in_other_block_starts_new_line() {
        let items = vec![
            item("Label", 72.0, 700.0, 0),
            item("Right one", 300.0, 700.0, 1),
            item("Right two", 300.0, 686.0, 1),
        ];
        let lines = group_into_lines(items, DEFAULT_MEDIA_BOX, &ExtractOptions::default());
        let texts: Vec<(&str, u32)> = lines.iter().map(|l| (l.text.as_str(), l.block)).collect();
        assert_eq!(texts, vec![("Label", 0), ("Right one", 1), ("Right two", 1)]);
    }

    #[test]
    fn test_adjacent_fragments_join_without_space() {
        // "Hel" ends at x=118, "lo" starts right there
        let items = vec![item("Hel", 100.0, 700.0, 0), item("lo", 118.0, 700.0, 0)];
        let lines = group_into_lines(items, DEFAULT_MEDIA_BOX, &ExtractOptions::default());
        assert_eq!(lines[0].text, "Hello");
    }

    #[test]
    fn test_line_bbox_in_pixel_space() {
        let items = vec![item("Hello", 100.0, 700.0, 0)];
        let lines = group_into_lines(items, DEFAULT_MEDIA_BOX, &ExtractOptions::default());
        let bbox = lines[0].bbox;
        assert!((bbox.x0 - 100.0).abs() < 1e-3);
        assert!((bbox.x1 - 130.0).abs() < 1e-3);
        // Baseline at 700 on a 792pt page: top = 792 - 708, bottom = 792 - 698
        assert!((bbox.y0 - 84.0).abs() < 1e-3);
        assert!((bbox.y1 - 94.0).abs() < 1e-3);
    }

    #[test]
    fn test_scale_multiplies_coordinates() {
        let options = ExtractOptions {
            scale: 2.0,
            ..ExtractOptions::default()
        };
        let lines = group_into_lines(vec![item("Hello", 100.0, 700.0, 0)], DEFAULT_MEDIA_BOX, &options);
        assert!((lines[0].bbox.x0 - 200.0).abs() < 1e-3);
        assert!((lines[0].bbox.y0 - 168.0).abs() < 1e-3);
    }

    #[test]
    fn test_whitespace_only_lines_are_dropped() {
        let items = vec![item("   ", 100.0, 700.0, 0), item("Body", 100.0, 650.0, 0)];
        let lines = group_into_lines(items, DEFAULT_MEDIA_BOX, &ExtractOptions::default());
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "Body");
    }

    #[test]
    fn test_multiply_matrices_translation() {
        let m = multiply_matrices(&translation(10.0, 5.0), &[2.0, 0.0, 0.0, 2.0, 1.0, 1.0]);
        assert_eq!(m, [2.0, 0.0, 0.0, 2.0, 21.0, 11.0]);
    }
}
