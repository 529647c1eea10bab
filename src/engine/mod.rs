pub mod office;
pub mod process;
pub mod python;
pub mod types;

use crate::format::DocFormat;
use anyhow::Result;
use std::path::Path;

pub use types::{DocDiag, DocInfo, OfficeDiag, PackSlidesIn, RasterizeIn, RenderOut};

/// Rendering and conversion primitives backed by external tools.
pub trait Engine {
    fn doctor(&self) -> Result<DocDiag>;
    fn inspect(&self, input: &Path, format: DocFormat) -> Result<DocInfo>;
    /// Renders every page of `input_pdf` at `dpi` and writes the images as a PDF.
    fn rasterize(&self, input_pdf: &Path, dpi: u32, out_pdf: &Path) -> Result<RenderOut>;
    /// One picture slide per page of `raster_pdf`.
    fn pack_slides(&self, raster_pdf: &Path, out_pptx: &Path) -> Result<RenderOut>;
    fn office_to_pdf(&self, input: &Path, out_pdf: &Path) -> Result<()>;
}
