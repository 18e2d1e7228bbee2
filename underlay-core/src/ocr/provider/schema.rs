//! Parsed model of the provider response.
//!
//! The wire format is a flat list of typed blocks referencing their children
//! by id. Only the fields this pipeline consumes are modeled; unknown block
//! kinds and unknown fields are ignored.

use std::collections::HashMap;

use serde::Deserialize;

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BoundingBox {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolygonPoint {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Geometry {
    #[serde(default)]
    pub bounding_box: BoundingBox,
    #[serde(default)]
    pub polygon: Vec<PolygonPoint>,
}

impl Geometry {
    /// Orientation of the top edge in degrees, in (-180, 180]. Falls back
    /// to 0 for degenerate polygons.
    pub fn rotation_degrees(&self) -> f32 {
        match (self.polygon.first(), self.polygon.get(1)) {
            (Some(p0), Some(p1)) => (p1.y - p0.y).atan2(p1.x - p0.x).to_degrees(),
            _ => 0.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Relationship {
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(default)]
    pub ids: Vec<String>,
}

/// One record of the flat response; the `block_type` discriminates.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Block {
    pub id: String,
    pub block_type: String,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    #[serde(default)]
    pub geometry: Option<Geometry>,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub text: Option<String>,
}

impl Block {
    fn child_ids(&self) -> impl Iterator<Item = &str> {
        self.relationships
            .iter()
            .filter(|r| r.kind == "CHILD")
            .flat_map(|r| r.ids.iter().map(String::as_str))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawResponse {
    #[serde(default)]
    blocks: Vec<Block>,
}

#[derive(Debug, Clone, Default)]
pub struct OcrWord {
    pub text: String,
    pub confidence: f32,
    pub geometry: Geometry,
}

#[derive(Debug, Clone, Default)]
pub struct OcrLine {
    pub text: String,
    pub confidence: f32,
    pub geometry: Geometry,
    pub words: Vec<OcrWord>,
}

#[derive(Debug, Clone, Default)]
pub struct OcrPage {
    pub lines: Vec<OcrLine>,
    /// Dominant rotation of the words on the page, in degrees.
    pub orientation_degrees: f32,
}

#[derive(Debug, Clone, Default)]
pub struct OcrDocument {
    pub pages: Vec<OcrPage>,
}

impl OcrDocument {
    pub fn from_json(data: &[u8]) -> Result<Self, serde_json::Error> {
        let raw: RawResponse = serde_json::from_slice(data)?;
        Ok(Self::from_blocks(raw.blocks))
    }

    /// Dereferences the CHILD relationships into pages of lines of words.
    pub fn from_blocks(blocks: Vec<Block>) -> Self {
        let by_id: HashMap<&str, &Block> =
            blocks.iter().map(|b| (b.id.as_str(), b)).collect();

        let pages = blocks
            .iter()
            .filter(|b| b.block_type == "PAGE")
            .map(|page| {
                let lines: Vec<OcrLine> = page
                    .child_ids()
                    .filter_map(|id| by_id.get(id))
                    .filter(|b| b.block_type == "LINE")
                    .map(|line| OcrLine {
                        text: line.text.clone().unwrap_or_default(),
                        confidence: line.confidence.unwrap_or(0.0),
                        geometry: line.geometry.clone().unwrap_or_default(),
                        words: line
                            .child_ids()
                            .filter_map(|id| by_id.get(id))
                            .filter(|b| b.block_type == "WORD")
                            .map(|word| OcrWord {
                                text: word.text.clone().unwrap_or_default(),
                                confidence: word.confidence.unwrap_or(0.0),
                                geometry: word.geometry.clone().unwrap_or_default(),
                            })
                            .collect(),
                    })
                    .collect();
                let orientation_degrees = page_orientation(&lines);
                OcrPage {
                    lines,
                    orientation_degrees,
                }
            })
            .collect();

        OcrDocument { pages }
    }
}

/// Most frequent word rotation on the page, rounded to whole degrees;
/// 0 when the page has no words.
fn page_orientation(lines: &[OcrLine]) -> f32 {
    let mut counts: HashMap<i32, usize> = HashMap::new();
    let mut best: Option<(i32, usize)> = None;
    for word in lines.iter().flat_map(|l| l.words.iter()) {
        let angle = word.geometry.rotation_degrees().round() as i32;
        let count = counts.entry(angle).or_insert(0);
        *count += 1;
        let better = match best {
            Some((_, best_count)) => *count > best_count,
            None => true,
        };
        if better {
            best = Some((angle, *count));
        }
    }
    best.map(|(angle, _)| angle as f32).unwrap_or(0.0)
}
