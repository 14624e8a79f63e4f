//! Font handling for text extraction
//!
//! Decodes string operands into Unicode (ToUnicode CMaps first, then the
//! lopdf font encoding, then raw fallbacks) and measures glyph advances so the
//! extractor can compute line widths.

use flate2::read::ZlibDecoder;
use lopdf::{Dictionary, Document, Object, Stream};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::io::Read;

/// Hex strings and array brackets inside a CMap section
static CMAP_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<([0-9A-Fa-f\s]*)>|\[|\]").unwrap());

/// A parsed ToUnicode CMap mapping character codes to Unicode strings
#[derive(Debug, Default, Clone)]
pub struct ToUnicodeCMap {
    /// Direct mappings (code -> Unicode string)
    pub char_map: HashMap<u32, String>,
    /// Range mappings (start, end, UTF-16 destination of `start`)
    pub ranges: Vec<(u32, u32, Vec<u16>)>,
}

#[derive(Debug, PartialEq)]
enum CMapToken {
    Hex(String),
    Open,
    Close,
}

impl ToUnicodeCMap {
    /// Parse a ToUnicode CMap from its decompressed content
    pub fn parse(content: &[u8]) -> Option<Self> {
        let text = String::from_utf8_lossy(content);
        let mut cmap = ToUnicodeCMap::default();

        for section in sections(&text, "beginbfchar", "endbfchar") {
            cmap.parse_bfchar_section(section);
        }
        for section in sections(&text, "beginbfrange", "endbfrange") {
            cmap.parse_bfrange_section(section);
        }

        if cmap.char_map.is_empty() && cmap.ranges.is_empty() {
            None
        } else {
            Some(cmap)
        }
    }

    /// `<src> <dst>` pairs
    fn parse_bfchar_section(&mut self, section: &str) {
        let tokens = tokenize(section);
        for pair in tokens.chunks_exact(2) {
            if let (CMapToken::Hex(src), CMapToken::Hex(dst)) = (&pair[0], &pair[1]) {
                if let (Some(code), Some(s)) = (parse_hex_code(src), utf16_hex_to_string(dst)) {
                    self.char_map.insert(code, s);
                }
            }
        }
    }

    /// `<start> <end> <dst>` or `<start> <end> [<dst> ...]` triplets
    fn parse_bfrange_section(&mut self, section: &str) {
        let tokens = tokenize(section);
        let mut iter = tokens.into_iter();

        while let (Some(CMapToken::Hex(start)), Some(CMapToken::Hex(end))) =
            (iter.next(), iter.next())
        {
            let (Some(start), Some(end)) = (parse_hex_code(&start), parse_hex_code(&end)) else {
                break;
            };
            match iter.next() {
                Some(CMapToken::Hex(dst)) => {
                    let units = hex_to_utf16(&dst);
                    if !units.is_empty() && end >= start {
                        self.ranges.push((start, end, units));
                    }
                }
                Some(CMapToken::Open) => {
                    let mut code = start;
                    for token in iter.by_ref() {
                        match token {
                            CMapToken::Hex(dst) => {
                                if let Some(s) = utf16_hex_to_string(&dst) {
                                    self.char_map.insert(code, s);
                                }
                                code += 1;
                            }
                            CMapToken::Close => break,
                            CMapToken::Open => {}
                        }
                    }
                }
                _ => break,
            }
        }
    }

    /// Look up a character code
    pub fn lookup(&self, code: u32) -> Option<String> {
        if let Some(s) = self.char_map.get(&code) {
            return Some(s.clone());
        }

        for (start, end, base) in &self.ranges {
            if code >= *start && code <= *end {
                let mut units = base.clone();
                if let Some(last) = units.last_mut() {
                    *last = last.wrapping_add((code - start) as u16);
                }
                return Some(String::from_utf16_lossy(&units));
            }
        }

        None
    }
}

fn sections<'a>(text: &'a str, begin: &str, end: &str) -> Vec<&'a str> {
    let mut out = Vec::new();
    let mut pos = 0;
    while let Some(start) = text[pos..].find(begin) {
        let section_start = pos + start + begin.len();
        match text[section_start..].find(end) {
            Some(len) => {
                out.push(&text[section_start..section_start + len]);
                pos = section_start + len;
            }
            None => break,
        }
    }
    out
}

fn tokenize(section: &str) -> Vec<CMapToken> {
    CMAP_TOKEN_RE
        .captures_iter(section)
        .map(|cap| match cap.get(1) {
            Some(hex) => CMapToken::Hex(hex.as_str().split_whitespace().collect()),
            None if &cap[0] == "[" => CMapToken::Open,
            None => CMapToken::Close,
        })
        .collect()
}

fn parse_hex_code(hex: &str) -> Option<u32> {
    u32::from_str_radix(hex.trim(), 16).ok()
}

fn hex_to_utf16(hex: &str) -> Vec<u16> {
    let hex = hex.trim();
    (0..hex.len() / 4)
        .filter_map(|i| u16::from_str_radix(&hex[i * 4..i * 4 + 4], 16).ok())
        .collect()
}

/// Destination strings are UTF-16BE; single-byte destinations are taken as-is
fn utf16_hex_to_string(hex: &str) -> Option<String> {
    let hex = hex.trim();
    if hex.len() == 2 {
        return u8::from_str_radix(hex, 16)
            .ok()
            .map(|b| (b as char).to_string());
    }
    let units = hex_to_utf16(hex);
    if units.is_empty() {
        None
    } else {
        Some(String::from_utf16_lossy(&units))
    }
}

/// Resolve an indirect reference, returning the object itself otherwise
pub(crate) fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        _ => obj,
    }
}

/// Helper to get f32 from Object
pub(crate) fn get_number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r),
        _ => None,
    }
}

/// Decoded stream bytes, inflating with zlib directly when lopdf cannot
pub(crate) fn stream_bytes(stream: &Stream) -> Vec<u8> {
    if let Ok(data) = stream.decompressed_content() {
        return data;
    }

    let flate = match stream.dict.get(b"Filter") {
        Ok(Object::Name(name)) => name == b"FlateDecode",
        Ok(Object::Array(filters)) => filters
            .iter()
            .any(|f| matches!(f, Object::Name(n) if n == b"FlateDecode")),
        _ => false,
    };

    if flate {
        let mut decoder = ZlibDecoder::new(stream.content.as_slice());
        let mut inflated = Vec::new();
        if decoder.read_to_end(&mut inflated).is_ok() {
            return inflated;
        }
    }
    stream.content.clone()
}

/// Decoding and metrics for one font resource
#[derive(Debug)]
pub struct FontInfo<'a> {
    dict: &'a Dictionary,
    /// Type0 fonts use two-byte codes
    pub two_byte: bool,
    pub cmap: Option<ToUnicodeCMap>,
    /// Glyph advances in 1/1000 em, by character code
    widths: HashMap<u32, f32>,
    default_width: f32,
}

impl<'a> FontInfo<'a> {
    pub fn from_dict(doc: &'a Document, dict: &'a Dictionary) -> Self {
        let subtype = dict.get(b"Subtype").and_then(Object::as_name).unwrap_or(b"");
        let two_byte = subtype == b"Type0";

        let cmap = dict
            .get(b"ToUnicode")
            .ok()
            .map(|obj| resolve(doc, obj))
            .and_then(|obj| obj.as_stream().ok())
            .and_then(|stream| ToUnicodeCMap::parse(&stream_bytes(stream)));

        let base_font = dict
            .get(b"BaseFont")
            .and_then(Object::as_name)
            .map(|n| String::from_utf8_lossy(n).to_string())
            .unwrap_or_default();

        let (widths, default_width) = if two_byte {
            cid_widths(doc, dict)
        } else {
            simple_widths(doc, dict, &base_font)
        };

        Self {
            dict,
            two_byte,
            cmap,
            widths,
            default_width,
        }
    }

    fn codes(&self, bytes: &[u8]) -> Vec<u32> {
        if self.two_byte {
            bytes
                .chunks(2)
                .map(|c| match c {
                    [hi, lo] => u16::from_be_bytes([*hi, *lo]) as u32,
                    [b] => *b as u32,
                    _ => 0,
                })
                .collect()
        } else {
            bytes.iter().map(|&b| b as u32).collect()
        }
    }

    /// Decode a string operand to Unicode
    pub fn decode(&self, doc: &Document, bytes: &[u8]) -> String {
        if let Some(cmap) = &self.cmap {
            let mut out = String::new();
            for code in self.codes(bytes) {
                match cmap.lookup(code) {
                    Some(s) => out.push_str(&s),
                    None => {
                        if let Some(c) = char::from_u32(code) {
                            out.push(c);
                        }
                    }
                }
            }
            return out;
        }

        if !self.two_byte {
            if let Ok(encoding) = self.dict.get_font_encoding(doc) {
                if let Ok(text) = Document::decode_text(&encoding, bytes) {
                    return text;
                }
            }
        }

        decode_fallback(bytes)
    }

    /// Advance of the string in 1/1000 em, plus the number of glyphs and spaces
    pub fn measure(&self, bytes: &[u8]) -> (f32, usize, usize) {
        let codes = self.codes(bytes);
        let width = codes
            .iter()
            .map(|c| self.widths.get(c).copied().unwrap_or(self.default_width))
            .sum();
        let spaces = if self.two_byte {
            0
        } else {
            codes.iter().filter(|&&c| c == 32).count()
        };
        (width, codes.len(), spaces)
    }
}

/// Strings with no usable font: UTF-16BE when marked with a BOM, Latin-1 otherwise
pub fn decode_fallback(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let utf16: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
            .collect();
        return String::from_utf16_lossy(&utf16);
    }
    bytes.iter().map(|&b| b as char).collect()
}

fn simple_widths(doc: &Document, dict: &Dictionary, base_font: &str) -> (HashMap<u32, f32>, f32) {
    let mut widths = HashMap::new();
    let first_char = dict
        .get(b"FirstChar")
        .ok()
        .and_then(|o| get_number(resolve(doc, o)))
        .unwrap_or(0.0) as u32;

    if let Ok(array) = dict
        .get(b"Widths")
        .map(|o| resolve(doc, o))
        .and_then(Object::as_array)
    {
        for (i, w) in array.iter().enumerate() {
            if let Some(w) = get_number(resolve(doc, w)) {
                widths.insert(first_char + i as u32, w);
            }
        }
    }

    let missing = dict
        .get(b"FontDescriptor")
        .ok()
        .map(|o| resolve(doc, o))
        .and_then(|o| o.as_dict().ok())
        .and_then(|d| d.get(b"MissingWidth").ok())
        .and_then(get_number)
        .filter(|w| *w > 0.0);

    let default_width = missing.unwrap_or(if base_font.contains("Courier") {
        600.0
    } else {
        500.0
    });
    (widths, default_width)
}

fn cid_widths(doc: &Document, dict: &Dictionary) -> (HashMap<u32, f32>, f32) {
    let mut widths = HashMap::new();
    let descendant = dict
        .get(b"DescendantFonts")
        .ok()
        .map(|o| resolve(doc, o))
        .and_then(|o| o.as_array().ok())
        .and_then(|a| a.first())
        .map(|o| resolve(doc, o))
        .and_then(|o| o.as_dict().ok());

    let Some(descendant) = descendant else {
        return (widths, 1000.0);
    };

    let default_width = descendant
        .get(b"DW")
        .ok()
        .and_then(get_number)
        .unwrap_or(1000.0);

    if let Ok(w) = descendant
        .get(b"W")
        .map(|o| resolve(doc, o))
        .and_then(Object::as_array)
    {
        let mut i = 0;
        while i < w.len() {
            let Some(first) = get_number(&w[i]) else {
                break;
            };
            match w.get(i + 1).map(|o| resolve(doc, o)) {
                Some(Object::Array(list)) => {
                    for (k, v) in list.iter().enumerate() {
                        if let Some(v) = get_number(v) {
                            widths.insert(first as u32 + k as u32, v);
                        }
                    }
                    i += 2;
                }
                Some(last) => {
                    if let (Some(last), Some(v)) = (get_number(last), w.get(i + 2).and_then(get_number)) {
                        for code in first as u32..=last as u32 {
                            widths.insert(code, v);
                        }
                    }
                    i += 3;
                }
                None => break,
            }
        }
    }

    (widths, default_width)
}

/// Fonts of one page, keyed by resource name
pub struct PageFonts<'a> {
    fonts: HashMap<Vec<u8>, FontInfo<'a>>,
}

impl<'a> PageFonts<'a> {
    pub fn new(doc: &'a Document, resources: BTreeMap<Vec<u8>, &'a Dictionary>) -> Self {
        let fonts = resources
            .into_iter()
            .map(|(name, dict)| (name, FontInfo::from_dict(doc, dict)))
            .collect();
        Self { fonts }
    }

    pub fn get(&self, name: &str) -> Option<&FontInfo<'a>> {
        self.fonts.get(name.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;

    #[test]
    fn test_parse_bfchar() {
        let cmap_content = r#"
/CIDInit /ProcSet findresource begin
12 dict begin
begincmap
1 begincodespacerange
<0000><FFFF>
endcodespacerange
3 beginbfchar
<0003> <0020>
<0024> <0041>
<0025> <0042>
endbfchar
endcmap
"#;
        let cmap = ToUnicodeCMap::parse(cmap_content.as_bytes()).unwrap();

        assert_eq!(cmap.lookup(0x0003), Some(" ".to_string()));
        assert_eq!(cmap.lookup(0x0024), Some("A".to_string()));
        assert_eq!(cmap.lookup(0x0025), Some("B".to_string()));
        assert_eq!(cmap.lookup(0x0026), None);
    }

    #[test]
    fn test_parse_bfrange_base_and_array() {
        let cmap_content = r#"
2 beginbfrange
<0041> <0043> <0061>
<0050> <0051> [<0078> <00660069>]
endbfrange
"#;
        let cmap = ToUnicodeCMap::parse(cmap_content.as_bytes()).unwrap();

        assert_eq!(cmap.lookup(0x41), Some("a".to_string()));
        assert_eq!(cmap.lookup(0x43), Some("c".to_string()));
        assert_eq!(cmap.lookup(0x44), None);
        assert_eq!(cmap.lookup(0x50), Some("x".to_string()));
        assert_eq!(cmap.lookup(0x51), Some("fi".to_string()));
    }

    #[test]
    fn test_empty_cmap_is_none() {
        assert!(ToUnicodeCMap::parse(b"begincmap endcmap").is_none());
    }

    #[test]
    fn test_decode_fallback() {
        assert_eq!(decode_fallback(b"caf\xe9"), "café");
        assert_eq!(decode_fallback(&[0xFE, 0xFF, 0x00, 0x48, 0x00, 0x69]), "Hi");
    }

    #[test]
    fn test_simple_font_widths() {
        let doc = Document::with_version("1.5");
        let dict = dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "FirstChar" => 65,
            "Widths" => vec![Object::Integer(700), Object::Integer(650)],
        };
        let font = FontInfo::from_dict(&doc, &dict);
        assert!(!font.two_byte);

        let (width, glyphs, spaces) = font.measure(b"AB C");
        // A=700, B=650, space and C fall back to the default 500
        assert_eq!(width, 700.0 + 650.0 + 500.0 + 500.0);
        assert_eq!(glyphs, 4);
        assert_eq!(spaces, 1);
    }

    #[test]
    fn test_courier_default_width() {
        let doc = Document::with_version("1.5");
        let dict = dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        };
        let font = FontInfo::from_dict(&doc, &dict);
        assert_eq!(font.measure(b"abc").0, 1800.0);
    }
}
