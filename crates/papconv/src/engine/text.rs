//! Built-in engine for text-like inputs.
//!
//! Handles plain text, Markdown, AsciiDoc, CSV, HTML, JSON and WebVTT. Layout
//! and OCR inputs (PDF, images, office formats) are rejected with
//! [`EngineError::UnsupportedInput`].

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::config::{ChunkingSettings, ExportFormat, InputFormat};
use crate::engine::{
    ConversionEngine, ConversionOutput, ConvertRequest, DocumentPipeline, EngineChunk,
    EngineProgress, EngineStage, EngineTable,
};
use crate::error::EngineError;
use crate::pipeline::PipelineOptions;

const FORM_FEED: char = '\u{000C}';

static RE_TABLE_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\|?\s*:?-{3,}:?\s*(\|\s*:?-{3,}:?\s*)*\|?$").unwrap());
static RE_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]+>").unwrap());
static RE_HTML_SKIP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style|head)[^>]*>.*?</(script|style|head)>").unwrap()
});
static RE_HTML_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(h[1-6]|p|li|pre|table)[^>]*>(.*?)</(h[1-6]|p|li|pre|table)>").unwrap()
});
static RE_HTML_ROW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<tr[^>]*>(.*?)</tr>").unwrap());
static RE_HTML_CELL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<t[dh][^>]*>(.*?)</t[dh]>").unwrap());

pub struct TextEngine;

impl TextEngine {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TextEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversionEngine for TextEngine {
    fn name(&self) -> &str {
        "text"
    }

    fn construct(
        &self,
        options: &PipelineOptions,
    ) -> Result<Box<dyn DocumentPipeline>, EngineError> {
        Ok(Box::new(TextPipeline {
            extract_tables: options.tables_enabled,
        }))
    }
}

pub struct TextPipeline {
    extract_tables: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Block {
    Heading {
        level: usize,
        text: String,
        page: usize,
    },
    Paragraph { text: String, page: usize },
    Code { text: String, page: usize },
    Table { rows: Vec<Vec<String>>, page: usize },
}

impl Block {
    fn page(&self) -> usize {
        match self {
            Block::Heading { page, .. }
            | Block::Paragraph { page, .. }
            | Block::Code { page, .. }
            | Block::Table { page, .. } => *page,
        }
    }

    fn plain_text(&self) -> String {
        match self {
            Block::Heading { text, .. }
            | Block::Paragraph { text, .. }
            | Block::Code { text, .. } => text.clone(),
            Block::Table { rows, .. } => rows
                .iter()
                .map(|row| row.join("\t"))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Serialize)]
struct Document {
    schema_name: &'static str,
    name: String,
    source_format: InputFormat,
    page_count: usize,
    blocks: Vec<Block>,
}

impl DocumentPipeline for TextPipeline {
    fn convert(
        &self,
        request: &ConvertRequest,
        progress: &dyn EngineProgress,
    ) -> Result<ConversionOutput, EngineError> {
        let source = request.source();
        let format = InputFormat::from_filename(&source.to_string_lossy()).ok_or_else(|| {
            EngineError::UnsupportedInput(format!("unrecognised file type: {}", source.display()))
        })?;

        let mut warnings = Vec::new();
        let content = read_source(source, &mut warnings)?;
        progress.report(EngineStage::Analyzing, 0.5);

        let mut blocks = match format {
            InputFormat::Text => parse_plain(&content),
            InputFormat::Md => parse_markup(&content, '#'),
            InputFormat::Asciidoc => parse_markup(&content, '='),
            InputFormat::Csv => vec![Block::Table {
                rows: parse_csv(&content),
                page: 1,
            }],
            InputFormat::Html => parse_html(&content),
            InputFormat::Json => parse_json(&content)?,
            InputFormat::Vtt => parse_vtt(&content),
            other => {
                return Err(EngineError::UnsupportedInput(format!(
                    "the text engine cannot convert {} documents",
                    other
                )))
            }
        };
        progress.report(EngineStage::Analyzing, 1.0);

        if !self.extract_tables {
            blocks = blocks
                .into_iter()
                .map(|block| match block {
                    Block::Table { rows, page } => Block::Paragraph {
                        text: rows
                            .iter()
                            .map(|r| r.join(" "))
                            .collect::<Vec<_>>()
                            .join("\n"),
                        page,
                    },
                    other => other,
                })
                .collect();
        }

        if blocks.is_empty() {
            warnings.push("Document contains no text".to_string());
        }

        let page_count = content.matches(FORM_FEED).count() + 1;
        let name = source
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("document")
            .to_string();

        let tables: Vec<EngineTable> = blocks
            .iter()
            .filter_map(|b| match b {
                Block::Table { rows, .. } => Some(EngineTable {
                    rows: rows.clone(),
                    caption: None,
                    label: Some("table".to_string()),
                    image: None,
                }),
                _ => None,
            })
            .collect();
        progress.report(EngineStage::Extracting, 0.5);

        let chunks = match &request.chunking {
            Some(settings) => chunk_blocks(&blocks, settings),
            None => Vec::new(),
        };

        let document = Document {
            schema_name: "papconv_document",
            name,
            source_format: format,
            page_count,
            blocks,
        };

        let mut output = ConversionOutput {
            page_count,
            confidence: None,
            warnings,
            tables,
            chunks,
            ..Default::default()
        };

        for export in &request.formats {
            let bytes = match export {
                ExportFormat::Markdown => render_markdown(&document.blocks).into_bytes(),
                ExportFormat::Html => render_html(&document).into_bytes(),
                ExportFormat::Text => render_text(&document.blocks).into_bytes(),
                ExportFormat::Doctags => render_doctags(&document.blocks).into_bytes(),
                ExportFormat::Json => serde_json::to_vec_pretty(&document)
                    .map_err(|e| EngineError::Failed(e.to_string()))?,
                ExportFormat::DocumentTokens => render_tokens(&document.blocks)?,
                // Chunk export is written by the executor from `chunks`.
                ExportFormat::Chunks => continue,
            };
            output.exports.insert(*export, bytes);
        }
        progress.report(EngineStage::Extracting, 1.0);

        Ok(output)
    }
}

fn read_source(path: &Path, warnings: &mut Vec<String>) -> Result<String, EngineError> {
    let bytes = std::fs::read(path)
        .map_err(|e| EngineError::Failed(format!("cannot read {}: {}", path.display(), e)))?;
    match String::from_utf8(bytes) {
        Ok(text) => Ok(text),
        Err(e) => {
            warnings.push("Input is not valid UTF-8; invalid sequences were replaced".to_string());
            Ok(String::from_utf8_lossy(e.as_bytes()).into_owned())
        }
    }
}

/// Splits on blank lines; form feeds advance the page counter.
fn paragraphs(content: &str) -> Vec<(String, usize)> {
    let mut out = Vec::new();
    let mut page = 1;
    let mut current: Vec<&str> = Vec::new();

    for line in content.lines() {
        let mut line = line;
        while let Some(idx) = line.find(FORM_FEED) {
            let (before, after) = line.split_at(idx);
            if !before.trim().is_empty() {
                current.push(before);
            }
            if !current.is_empty() {
                out.push((current.join("\n"), page));
                current.clear();
            }
            page += 1;
            line = &after[FORM_FEED.len_utf8()..];
        }
        if line.trim().is_empty() {
            if !current.is_empty() {
                out.push((current.join("\n"), page));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        out.push((current.join("\n"), page));
    }
    out
}

fn parse_plain(content: &str) -> Vec<Block> {
    paragraphs(content)
        .into_iter()
        .map(|(text, page)| Block::Paragraph {
            text: text.trim().to_string(),
            page,
        })
        .collect()
}

/// Markdown and AsciiDoc share the same block grammar apart from the heading marker.
fn parse_markup(content: &str, heading_marker: char) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut in_code = false;
    let mut code: Vec<String> = Vec::new();

    for (para, page) in paragraphs(content) {
        let lines: Vec<&str> = para.lines().collect();

        if in_code || lines.first().is_some_and(|l| is_fence(l)) {
            for line in &lines {
                if is_fence(line) {
                    if in_code {
                        blocks.push(Block::Code {
                            text: code.join("\n").trim_end().to_string(),
                            page,
                        });
                        code.clear();
                    }
                    in_code = !in_code;
                } else if in_code {
                    code.push(line.to_string());
                }
            }
            if in_code {
                code.push(String::new());
            }
            continue;
        }

        if lines.iter().all(|l| l.trim_start().starts_with('|')) && lines.len() >= 2 {
            let rows = lines
                .iter()
                .filter(|l| !RE_TABLE_SEPARATOR.is_match(l.trim()))
                .map(|l| split_pipe_row(l))
                .collect();
            blocks.push(Block::Table { rows, page });
            continue;
        }

        let mut text_lines = Vec::new();
        for line in lines {
            let trimmed = line.trim_start();
            let level = trimmed.chars().take_while(|c| *c == heading_marker).count();
            if level > 0 && level <= 6 && trimmed[level..].starts_with(' ') {
                if !text_lines.is_empty() {
                    blocks.push(Block::Paragraph {
                        text: text_lines.join(" "),
                        page,
                    });
                    text_lines.clear();
                }
                blocks.push(Block::Heading {
                    level,
                    text: trimmed[level..].trim().to_string(),
                    page,
                });
            } else {
                text_lines.push(line.trim());
            }
        }
        if !text_lines.is_empty() {
            blocks.push(Block::Paragraph {
                text: text_lines.join(" "),
                page,
            });
        }
    }

    if in_code && !code.is_empty() {
        blocks.push(Block::Code {
            text: code.join("\n").trim_end().to_string(),
            page: blocks.last().map(Block::page).unwrap_or(1),
        });
    }
    blocks
}

fn is_fence(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("```") || t.starts_with("----")
}

fn split_pipe_row(line: &str) -> Vec<String> {
    let trimmed = line.trim().trim_start_matches('|').trim_end_matches('|');
    trimmed.split('|').map(|c| c.trim().to_string()).collect()
}

pub(crate) fn parse_csv(content: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        match (c, in_quotes) {
            ('"', true) if chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            ('"', true) => in_quotes = false,
            ('"', false) if field.is_empty() => in_quotes = true,
            (',', false) => row.push(std::mem::take(&mut field)),
            ('\r', false) => {}
            ('\n', false) => {
                row.push(std::mem::take(&mut field));
                if !(row.len() == 1 && row[0].is_empty()) {
                    rows.push(std::mem::take(&mut row));
                } else {
                    row.clear();
                }
            }
            (c, _) => field.push(c),
        }
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    rows
}

fn parse_html(content: &str) -> Vec<Block> {
    let body = RE_HTML_SKIP.replace_all(content, "");
    let mut blocks = Vec::new();

    for caps in RE_HTML_BLOCK.captures_iter(&body) {
        let tag = caps[1].to_lowercase();
        let inner = &caps[2];
        match tag.as_str() {
            "table" => {
                let rows: Vec<Vec<String>> = RE_HTML_ROW
                    .captures_iter(inner)
                    .map(|r| {
                        RE_HTML_CELL
                            .captures_iter(&r[1])
                            .map(|c| html_text(&c[1]))
                            .collect::<Vec<String>>()
                    })
                    .filter(|r| !r.is_empty())
                    .collect();
                if !rows.is_empty() {
                    blocks.push(Block::Table { rows, page: 1 });
                }
            }
            "pre" => blocks.push(Block::Code {
                text: decode_entities(&RE_TAG.replace_all(inner, "")),
                page: 1,
            }),
            t if t.starts_with('h') => blocks.push(Block::Heading {
                level: t[1..].parse().unwrap_or(1),
                text: html_text(inner),
                page: 1,
            }),
            _ => {
                let text = html_text(inner);
                if !text.is_empty() {
                    blocks.push(Block::Paragraph { text, page: 1 });
                }
            }
        }
    }

    if blocks.is_empty() {
        // Unstructured markup: fall back to the visible text.
        return parse_plain(&decode_entities(&RE_TAG.replace_all(&body, "\n")));
    }
    blocks
}

fn html_text(fragment: &str) -> String {
    let text = RE_TAG.replace_all(fragment, " ");
    decode_entities(&text)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn parse_json(content: &str) -> Result<Vec<Block>, EngineError> {
    let value: serde_json::Value = serde_json::from_str(content)
        .map_err(|e| EngineError::Corrupt(format!("invalid JSON: {}", e)))?;
    let pretty =
        serde_json::to_string_pretty(&value).map_err(|e| EngineError::Failed(e.to_string()))?;
    Ok(vec![Block::Code {
        text: pretty,
        page: 1,
    }])
}

fn parse_vtt(content: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    for (para, page) in paragraphs(content) {
        let text: Vec<&str> = para
            .lines()
            .map(str::trim)
            .filter(|l| {
                !l.starts_with("WEBVTT")
                    && !l.starts_with("NOTE")
                    && !l.contains("-->")
                    && !l.chars().all(|c| c.is_ascii_digit())
            })
            .collect();
        if !text.is_empty() {
            blocks.push(Block::Paragraph {
                text: text.join(" "),
                page,
            });
        }
    }
    blocks
}

fn render_markdown(blocks: &[Block]) -> String {
    let mut parts = Vec::with_capacity(blocks.len());
    for block in blocks {
        parts.push(match block {
            Block::Heading { level, text, .. } => format!("{} {}", "#".repeat(*level), text),
            Block::Paragraph { text, .. } => text.clone(),
            Block::Code { text, .. } => format!("```\n{}\n```", text),
            Block::Table { rows, .. } => markdown_table(rows),
        });
    }
    let mut out = parts.join("\n\n");
    out.push('\n');
    out
}

fn markdown_table(rows: &[Vec<String>]) -> String {
    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    let line = |row: &[String]| {
        let mut cells: Vec<String> = row.iter().map(|c| c.replace('|', "\\|")).collect();
        cells.resize(width, String::new());
        format!("| {} |", cells.join(" | "))
    };

    let mut lines = Vec::with_capacity(rows.len() + 1);
    if let Some((header, body)) = rows.split_first() {
        lines.push(line(header));
        lines.push(format!("|{}", " --- |".repeat(width)));
        lines.extend(body.iter().map(|r| line(r)));
    }
    lines.join("\n")
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn render_html(document: &Document) -> String {
    let mut out = format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n</head>\n<body>\n",
        escape_html(&document.name)
    );
    for block in &document.blocks {
        match block {
            Block::Heading { level, text, .. } => {
                let level = (*level).clamp(1, 6);
                out.push_str(&format!("<h{0}>{1}</h{0}>\n", level, escape_html(text)));
            }
            Block::Paragraph { text, .. } => {
                out.push_str(&format!("<p>{}</p>\n", escape_html(text)));
            }
            Block::Code { text, .. } => {
                out.push_str(&format!("<pre><code>{}</code></pre>\n", escape_html(text)));
            }
            Block::Table { rows, .. } => {
                out.push_str("<table>\n");
                for (i, row) in rows.iter().enumerate() {
                    let tag = if i == 0 { "th" } else { "td" };
                    out.push_str("<tr>");
                    for cell in row {
                        out.push_str(&format!("<{0}>{1}</{0}>", tag, escape_html(cell)));
                    }
                    out.push_str("</tr>\n");
                }
                out.push_str("</table>\n");
            }
        }
    }
    out.push_str("</body>\n</html>\n");
    out
}

fn render_text(blocks: &[Block]) -> String {
    let mut out = blocks
        .iter()
        .map(Block::plain_text)
        .collect::<Vec<_>>()
        .join("\n\n");
    out.push('\n');
    out
}

fn render_doctags(blocks: &[Block]) -> String {
    let mut out = String::from("<doctag>");
    for block in blocks {
        match block {
            Block::Heading { level: 1, text, .. } => {
                out.push_str(&format!("<title>{}</title>", text));
            }
            Block::Heading { level, text, .. } => {
                out.push_str(&format!(
                    "<section_header_level_{0}>{1}</section_header_level_{0}>",
                    level - 1,
                    text
                ));
            }
            Block::Paragraph { text, .. } => out.push_str(&format!("<text>{}</text>", text)),
            Block::Code { text, .. } => out.push_str(&format!("<code>{}</code>", text)),
            Block::Table { rows, .. } => {
                out.push_str("<otsl>");
                for row in rows {
                    for cell in row {
                        out.push_str("<fcel>");
                        out.push_str(cell);
                    }
                    out.push_str("<nl>");
                }
                out.push_str("</otsl>");
            }
        }
    }
    out.push_str("</doctag>");
    out
}

#[derive(Serialize)]
struct Token<'a> {
    index: usize,
    text: &'a str,
    page: usize,
}

fn render_tokens(blocks: &[Block]) -> Result<Vec<u8>, EngineError> {
    let texts: Vec<(String, usize)> = blocks.iter().map(|b| (b.plain_text(), b.page())).collect();
    let tokens: Vec<Token<'_>> = texts
        .iter()
        .flat_map(|(text, page)| text.split_whitespace().map(move |t| (t, *page)))
        .enumerate()
        .map(|(index, (text, page))| Token { index, text, page })
        .collect();
    serde_json::to_vec_pretty(&tokens).map_err(|e| EngineError::Failed(e.to_string()))
}

fn token_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Words waiting to become the next chunk.
#[derive(Default)]
struct ChunkBuffer {
    pieces: Vec<String>,
    tokens: usize,
    page: Option<usize>,
}

impl ChunkBuffer {
    fn flush(&mut self, headings: &[(usize, String)], chunks: &mut Vec<EngineChunk>) {
        if !self.pieces.is_empty() {
            chunks.push(EngineChunk {
                text: self.pieces.join("\n\n"),
                headings: headings.iter().map(|(_, h)| h.clone()).collect(),
                page: self.page,
            });
        }
        *self = Self::default();
    }
}

/// Groups blocks under their heading path, splitting at `max_tokens`.
fn chunk_blocks(blocks: &[Block], settings: &ChunkingSettings) -> Vec<EngineChunk> {
    let max_tokens = settings.max_tokens.max(1);
    let mut chunks = Vec::new();
    let mut headings: Vec<(usize, String)> = Vec::new();
    let mut buffer = ChunkBuffer::default();

    for block in blocks {
        if let Block::Heading { level, text, .. } = block {
            buffer.flush(&headings, &mut chunks);
            headings.retain(|(l, _)| l < level);
            headings.push((*level, text.clone()));
            continue;
        }

        let text = block.plain_text();
        let words: Vec<&str> = text.split_whitespace().collect();
        for piece in words.chunks(max_tokens) {
            let piece = piece.join(" ");
            let tokens = token_count(&piece);
            let would_overflow = buffer.tokens + tokens > max_tokens;
            if would_overflow || (!settings.merge_peers && !buffer.pieces.is_empty()) {
                buffer.flush(&headings, &mut chunks);
            }
            buffer.page.get_or_insert(block.page());
            buffer.tokens += tokens;
            buffer.pieces.push(piece);
        }
    }
    buffer.flush(&headings, &mut chunks);
    chunks
}
