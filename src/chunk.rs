//! Chunk data model
//!
//! Line records are what the extractor produces for one page; chunks are the
//! output unit handed to viewers, indexers and other consumers.

use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box in page pixel space (y grows downward)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BBox {
    /// Build a box, normalizing so that `x0 <= x1` and `y0 <= y1`
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
        }
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    pub fn y_center(&self) -> f32 {
        (self.y0 + self.y1) / 2.0
    }

    /// Coordinate-wise min/max of two boxes
    pub fn union(&self, other: &BBox) -> BBox {
        BBox {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    /// Length of the shared x-range, 0 when the boxes do not overlap horizontally
    pub fn horizontal_overlap(&self, other: &BBox) -> f32 {
        (self.x1.min(other.x1) - self.x0.max(other.x0)).max(0.0)
    }

    pub fn contains(&self, other: &BBox) -> bool {
        self.x0 <= other.x0 && self.y0 <= other.y0 && self.x1 >= other.x1 && self.y1 >= other.y1
    }

    /// Build from a loosely-typed coordinate list; anything but four finite values is rejected
    pub fn from_slice(values: &[f32]) -> Option<BBox> {
        match values {
            [x0, y0, x1, y1] if values.iter().all(|v| v.is_finite()) => {
                Some(BBox::new(*x0, *y0, *x1, *y1))
            }
            _ => None,
        }
    }
}

impl From<[f32; 4]> for BBox {
    fn from(v: [f32; 4]) -> Self {
        BBox::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BBox> for [f32; 4] {
    fn from(b: BBox) -> Self {
        [b.x0, b.y0, b.x1, b.y1]
    }
}

/// One line of text as reported by the extractor
#[derive(Debug, Clone, PartialEq)]
pub struct LineRecord {
    /// Trimmed line text
    pub text: String,
    /// Line box in pixel space
    pub bbox: BBox,
    /// Native block (text object) the line was started in, per page
    pub block: u32,
}

impl LineRecord {
    pub fn new(text: impl Into<String>, bbox: BBox) -> Self {
        Self {
            text: text.into(),
            bbox,
            block: 0,
        }
    }

    pub fn with_block(mut self, block: u32) -> Self {
        self.block = block;
        self
    }

    pub fn y_center(&self) -> f32 {
        self.bbox.y_center()
    }
}

/// A positionally-bounded unit of extracted text
///
/// `bbox` and `parano` are always present for the geometric strategies; the
/// pipeline strategy leaves them empty when upstream geometry is unknown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub filename: String,
    /// 1-based page number
    pub pageno: u32,
    pub bbox: Option<BBox>,
    /// 0-based paragraph index within the page
    pub parano: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_normalizes_corners() {
        let b = BBox::new(10.0, 20.0, 5.0, 2.0);
        assert_eq!(b, BBox::new(5.0, 2.0, 10.0, 20.0));
        assert_eq!(b.width(), 5.0);
        assert_eq!(b.height(), 18.0);
    }

    #[test]
    fn test_bbox_union_contains_both() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BBox::new(5.0, 8.0, 20.0, 30.0);
        let u = a.union(&b);
        assert_eq!(u, BBox::new(0.0, 0.0, 20.0, 30.0));
        assert!(u.contains(&a));
        assert!(u.contains(&b));
    }

    #[test]
    fn test_horizontal_overlap() {
        let a = BBox::new(0.0, 0.0, 100.0, 10.0);
        assert_eq!(a.horizontal_overlap(&BBox::new(50.0, 20.0, 150.0, 30.0)), 50.0);
        assert_eq!(a.horizontal_overlap(&BBox::new(200.0, 20.0, 250.0, 30.0)), 0.0);
    }

    #[test]
    fn test_from_slice() {
        assert!(BBox::from_slice(&[1.0, 2.0, 3.0, 4.0]).is_some());
        assert!(BBox::from_slice(&[]).is_none());
        assert!(BBox::from_slice(&[1.0, 2.0, 3.0]).is_none());
        assert!(BBox::from_slice(&[1.0, f32::NAN, 3.0, 4.0]).is_none());
    }

    #[test]
    fn test_chunk_serializes_bbox_as_array() {
        let chunk = Chunk {
            text: "Hello".into(),
            filename: "a.pdf".into(),
            pageno: 1,
            bbox: Some(BBox::new(1.0, 2.0, 3.0, 4.0)),
            parano: None,
        };
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["bbox"], serde_json::json!([1.0, 2.0, 3.0, 4.0]));
        assert!(json["parano"].is_null());
    }
}
