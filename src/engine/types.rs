use crate::format::DocFormat;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocDiag {
    pub python_exe: String,
    pub python_version: String,
    #[serde(default)]
    pub pymupdf_version: Option<String>,
    #[serde(default)]
    pub pillow_version: Option<String>,
    #[serde(default)]
    pub python_pptx_version: Option<String>,
    #[serde(default)]
    pub office: Option<OfficeDiag>,
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfficeDiag {
    pub exe: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Page/slide count and first-page size in points.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocInfo {
    pub format: DocFormat,
    pub page_count: u32,
    pub width_pt: f64,
    pub height_pt: f64,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RasterizeIn {
    pub input_pdf: String,
    pub out_pdf: String,
    pub dpi: u32,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackSlidesIn {
    pub raster_pdf: String,
    pub out_pptx: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderOut {
    pub ok: bool,
    #[serde(default)]
    pub pages: u32,
    #[serde(default)]
    pub skipped_pages: Vec<u32>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}
