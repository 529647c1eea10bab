use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Document formats the tool reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocFormat {
    Pdf,
    Pptx,
}

impl DocFormat {
    pub const ALL: [DocFormat; 2] = [DocFormat::Pdf, DocFormat::Pptx];

    /// Detects the format from the file extension (case-insensitive).
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        Self::from_extension(ext)
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "pdf" => Some(DocFormat::Pdf),
            "pptx" => Some(DocFormat::Pptx),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            DocFormat::Pdf => "pdf",
            DocFormat::Pptx => "pptx",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            DocFormat::Pdf => "PDF document",
            DocFormat::Pptx => "PowerPoint presentation",
        }
    }

    /// The other format, used as the default conversion target.
    pub fn counterpart(self) -> Self {
        match self {
            DocFormat::Pdf => DocFormat::Pptx,
            DocFormat::Pptx => DocFormat::Pdf,
        }
    }

    pub fn supported_list() -> String {
        Self::ALL
            .iter()
            .map(|f| format!(".{}", f.extension()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for DocFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}
