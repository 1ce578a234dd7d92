use serde::{Deserialize, Deserializer, Serialize};

/// Axis-aligned box as `[x, y, w, h]`.
pub type BBox = [f64; 4];

/// Ground-truth file: COCO-shaped images, annotations and categories.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Dataset {
    #[serde(default)]
    pub images: Vec<Image>,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    #[serde(default)]
    pub categories: Vec<Category>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Image {
    pub id: u64,
    #[serde(default)]
    pub file_name: String,
    /// Image height in pixels, 0 when unknown.
    #[serde(default)]
    pub height: u32,
    /// Image width in pixels, 0 when unknown.
    #[serde(default)]
    pub width: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Category {
    pub id: u64,
    #[serde(default)]
    pub name: String,
}

/// A ground-truth box.
///
/// `iscrowd` and `ignore` are independent: `iscrowd` marks a crowd region whose overlap is
/// scored against the detection area, `ignore` is the flag set by dataset-specific filters
/// (height, visibility, label). [`crate::params::IgnoreMode`] decides which of the two the
/// box pathway treats as ignored.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Annotation {
    /// Non-zero id; 0 means "assign one on load".
    #[serde(default)]
    pub id: u64,
    pub image_id: u64,
    pub category_id: u64,
    pub bbox: BBox,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub iscrowd: bool,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub ignore: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vis_ratio: Option<f64>,
}

/// A scored detection.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Detection {
    /// Assigned `1..=N` in load order when absent.
    #[serde(default)]
    pub id: u64,
    pub image_id: u64,
    pub category_id: u64,
    pub bbox: BBox,
    pub score: f64,
}

/// Accepts `true`/`false` as well as the `0`/`1` integers most converters emit.
fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }
    match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => Ok(b),
        Flag::Int(i) => Ok(i != 0),
    }
}
