use serde::{Deserialize, Serialize};

/// Input document families recognised from a filename extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    Pdf,
    Docx,
    Pptx,
    Xlsx,
    Html,
    Md,
    Csv,
    Image,
    Audio,
    Vtt,
    Xml,
    Asciidoc,
    Json,
    Text,
}

impl InputFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "pdf" => Some(InputFormat::Pdf),
            "docx" => Some(InputFormat::Docx),
            "pptx" => Some(InputFormat::Pptx),
            "xlsx" => Some(InputFormat::Xlsx),
            "html" | "htm" => Some(InputFormat::Html),
            "md" | "markdown" => Some(InputFormat::Md),
            "csv" => Some(InputFormat::Csv),
            "png" | "jpg" | "jpeg" | "tiff" | "tif" | "gif" | "webp" | "bmp" => {
                Some(InputFormat::Image)
            }
            "wav" | "mp3" => Some(InputFormat::Audio),
            "vtt" => Some(InputFormat::Vtt),
            "xml" => Some(InputFormat::Xml),
            "asciidoc" | "adoc" => Some(InputFormat::Asciidoc),
            "json" => Some(InputFormat::Json),
            "txt" | "text" => Some(InputFormat::Text),
            _ => None,
        }
    }

    pub fn from_filename(filename: &str) -> Option<Self> {
        extension_of(filename).and_then(|ext| Self::from_extension(&ext))
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            InputFormat::Pdf => "PDF Document",
            InputFormat::Docx => "Microsoft Word",
            InputFormat::Pptx => "PowerPoint",
            InputFormat::Xlsx => "Excel Spreadsheet",
            InputFormat::Html => "HTML",
            InputFormat::Md => "Markdown",
            InputFormat::Csv => "CSV",
            InputFormat::Image => "Image",
            InputFormat::Audio => "Audio",
            InputFormat::Vtt => "WebVTT Subtitles",
            InputFormat::Xml => "XML",
            InputFormat::Asciidoc => "AsciiDoc",
            InputFormat::Json => "JSON",
            InputFormat::Text => "Plain Text",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InputFormat::Pdf => "pdf",
            InputFormat::Docx => "docx",
            InputFormat::Pptx => "pptx",
            InputFormat::Xlsx => "xlsx",
            InputFormat::Html => "html",
            InputFormat::Md => "md",
            InputFormat::Csv => "csv",
            InputFormat::Image => "image",
            InputFormat::Audio => "audio",
            InputFormat::Vtt => "vtt",
            InputFormat::Xml => "xml",
            InputFormat::Asciidoc => "asciidoc",
            InputFormat::Json => "json",
            InputFormat::Text => "text",
        }
    }
}

impl std::fmt::Display for InputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Export representations a completed Job can offer for download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Markdown,
    Html,
    Json,
    Text,
    Doctags,
    DocumentTokens,
    Chunks,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 7] = [
        ExportFormat::Markdown,
        ExportFormat::Html,
        ExportFormat::Json,
        ExportFormat::Text,
        ExportFormat::Doctags,
        ExportFormat::DocumentTokens,
        ExportFormat::Chunks,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Markdown => "markdown",
            ExportFormat::Html => "html",
            ExportFormat::Json => "json",
            ExportFormat::Text => "text",
            ExportFormat::Doctags => "doctags",
            ExportFormat::DocumentTokens => "document_tokens",
            ExportFormat::Chunks => "chunks",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ExportFormat::Markdown => "Markdown",
            ExportFormat::Html => "HTML",
            ExportFormat::Json => "JSON",
            ExportFormat::Text => "Plain Text",
            ExportFormat::Doctags => "DocTags",
            ExportFormat::DocumentTokens => "Document Tokens",
            ExportFormat::Chunks => "Chunks",
        }
    }

    /// File suffix appended to the source stem, including the leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Markdown => ".md",
            ExportFormat::Html => ".html",
            ExportFormat::Json => ".json",
            ExportFormat::Text => ".txt",
            ExportFormat::Doctags => ".doctags",
            ExportFormat::DocumentTokens => ".tokens.json",
            ExportFormat::Chunks => ".chunks.json",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ExportFormat::Markdown => "text/markdown",
            ExportFormat::Html => "text/html",
            ExportFormat::Json | ExportFormat::DocumentTokens | ExportFormat::Chunks => {
                "application/json"
            }
            ExportFormat::Text | ExportFormat::Doctags => "text/plain",
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ExportFormat::ALL
            .iter()
            .copied()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| {
                let valid: Vec<&str> = ExportFormat::ALL.iter().map(|f| f.as_str()).collect();
                format!(
                    "Invalid format '{}'. Valid formats: {}",
                    s,
                    valid.join(", ")
                )
            })
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InputFormatInfo {
    pub id: InputFormat,
    pub name: &'static str,
    /// Allowed extensions mapping to this format, with leading dots.
    pub extensions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportFormatInfo {
    pub id: ExportFormat,
    pub name: &'static str,
    pub extension: &'static str,
    pub mime_type: &'static str,
}

/// What a service accepts and what it can produce.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedFormats {
    pub input_formats: Vec<InputFormatInfo>,
    pub output_formats: Vec<ExportFormatInfo>,
}

impl SupportedFormats {
    /// Groups `allowed_extensions` by input format, in first-seen order.
    /// Extensions with no known format are left out.
    pub fn new(allowed_extensions: &[String]) -> Self {
        let mut input_formats: Vec<InputFormatInfo> = Vec::new();
        for ext in allowed_extensions {
            let ext = ext.trim_start_matches('.').to_lowercase();
            let Some(format) = InputFormat::from_extension(&ext) else {
                continue;
            };
            let dotted = format!(".{}", ext);
            match input_formats.iter_mut().find(|info| info.id == format) {
                Some(info) if !info.extensions.contains(&dotted) => info.extensions.push(dotted),
                Some(_) => {}
                None => input_formats.push(InputFormatInfo {
                    id: format,
                    name: format.display_name(),
                    extensions: vec![dotted],
                }),
            }
        }

        let output_formats = ExportFormat::ALL
            .iter()
            .map(|format| ExportFormatInfo {
                id: *format,
                name: format.display_name(),
                extension: format.extension(),
                mime_type: format.mime_type(),
            })
            .collect();

        Self {
            input_formats,
            output_formats,
        }
    }
}

/// Lowercased extension of a filename, without the dot.
pub fn extension_of(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(ext.to_lowercase())
}
