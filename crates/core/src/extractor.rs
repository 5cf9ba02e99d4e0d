use crate::error::PipelineError;
use crate::models::FileType;
use lopdf::Document;
use regex::{Captures, Regex};
use std::io::{Cursor, Read};

const DOCX_BODY_PART: &str = "word/document.xml";

/// Turns raw uploaded bytes into plain text. Implementations must be pure.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8], file_type: FileType) -> Result<String, PipelineError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StandardExtractor;

impl TextExtractor for StandardExtractor {
    fn extract(&self, bytes: &[u8], file_type: FileType) -> Result<String, PipelineError> {
        match file_type {
            FileType::Txt => extract_plain(bytes),
            FileType::Pdf => extract_pdf(bytes),
            FileType::Docx => extract_docx(bytes),
        }
    }
}

pub fn extract_text(bytes: &[u8], file_type: FileType) -> Result<String, PipelineError> {
    StandardExtractor.extract(bytes, file_type)
}

/// Boundary check run before any bytes are handed to a parser.
pub fn ensure_supported(declared: &str, supported: &[FileType]) -> Result<FileType, PipelineError> {
    let file_type: FileType = declared.parse()?;
    if supported.contains(&file_type) {
        Ok(file_type)
    } else {
        Err(PipelineError::UnsupportedFormat(file_type.to_string()))
    }
}

fn extract_plain(bytes: &[u8]) -> Result<String, PipelineError> {
    String::from_utf8(bytes.to_vec())
        .map_err(|error| PipelineError::ExtractionFailure(format!("text is not utf-8: {error}")))
}

fn extract_pdf(bytes: &[u8]) -> Result<String, PipelineError> {
    let document = Document::load_mem(bytes)
        .map_err(|error| PipelineError::ExtractionFailure(format!("pdf parse error: {error}")))?;

    let mut pages = Vec::new();
    for page_no in document.get_pages().into_keys() {
        let text = document.extract_text(&[page_no]).map_err(|error| {
            PipelineError::ExtractionFailure(format!("pdf page {page_no}: {error}"))
        })?;
        pages.push(text.trim().to_string());
    }

    if pages.is_empty() {
        return Err(PipelineError::ExtractionFailure(
            "pdf has no pages".to_string(),
        ));
    }

    Ok(pages.join(" "))
}

fn extract_docx(bytes: &[u8]) -> Result<String, PipelineError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|error| PipelineError::ExtractionFailure(format!("docx archive: {error}")))?;

    let mut xml = String::new();
    archive
        .by_name(DOCX_BODY_PART)
        .map_err(|error| PipelineError::ExtractionFailure(format!("{DOCX_BODY_PART}: {error}")))?
        .read_to_string(&mut xml)
        .map_err(|error| PipelineError::ExtractionFailure(format!("{DOCX_BODY_PART}: {error}")))?;

    let paragraphs = docx_paragraphs(&xml)?;
    Ok(paragraphs.join(" "))
}

fn docx_paragraphs(xml: &str) -> Result<Vec<String>, PipelineError> {
    let properties_re = compile(r"(?s)<w:pPr\b.*?</w:pPr>")?;
    let paragraph_re = compile(r"(?s)<w:p(?:\s[^>]*)?/>|<w:p(?:\s[^>]*)?>(.*?)</w:p>")?;
    let run_re = compile(r"(?s)<w:t(?:\s[^>]*)?>(.*?)</w:t>|<w:(tab|br|cr)(?:\s[^>]*)?/>")?;

    let body = properties_re.replace_all(xml, "");
    let mut paragraphs = Vec::new();

    for paragraph in paragraph_re.captures_iter(&body) {
        let inner = paragraph.get(1).map(|m| m.as_str()).unwrap_or_default();
        let mut text = String::new();

        for run in run_re.captures_iter(inner) {
            if let Some(content) = run.get(1) {
                text.push_str(&decode_entities(content.as_str())?);
            } else {
                match run.get(2).map(|m| m.as_str()) {
                    Some("tab") => text.push('\t'),
                    Some(_) => text.push('\n'),
                    None => {}
                }
            }
        }

        paragraphs.push(text);
    }

    Ok(paragraphs)
}

fn decode_entities(text: &str) -> Result<String, PipelineError> {
    let entity_re = compile(r"&(#x[0-9a-fA-F]+|#[0-9]+|amp|lt|gt|quot|apos);")?;

    Ok(entity_re
        .replace_all(text, |captures: &Captures<'_>| {
            let entity = &captures[1];
            let decoded = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ if entity.starts_with("#x") => u32::from_str_radix(&entity[2..], 16)
                    .ok()
                    .and_then(char::from_u32),
                _ => entity[1..].parse::<u32>().ok().and_then(char::from_u32),
            };
            decoded
                .map(String::from)
                .unwrap_or_else(|| captures[0].to_string())
        })
        .into_owned())
}

fn compile(pattern: &str) -> Result<Regex, PipelineError> {
    Regex::new(pattern).map_err(|error| PipelineError::ExtractionFailure(error.to_string()))
}
