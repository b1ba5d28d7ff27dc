//! services/api/src/adapters/extract.rs
//!
//! Reads the plain text of stored course documents. Office formats are zip
//! archives; their text runs are collected paragraph by paragraph.

use async_trait::async_trait;
use regex::Regex;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info};
use tutor_core::domain::{Document, DocumentType};
use tutor_core::ports::{PortError, PortResult, TextExtractor};

static DOCX_PARAGRAPH_END: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"</w:p>").expect("valid regex"));
static DOCX_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<w:t(?:\s[^>]*)?>([^<]*)</w:t>").expect("valid regex"));
static PPTX_PARAGRAPH_END: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"</a:p>").expect("valid regex"));
static PPTX_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<a:t(?:\s[^>]*)?>([^<]*)</a:t>").expect("valid regex"));

fn unexpected(path: &Path, e: impl std::fmt::Display) -> PortError {
    PortError::Unexpected(format!("{}: {}", path.display(), e))
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// One line per paragraph holding at least one text run.
fn paragraphs_text(xml: &str, paragraph_end: &Regex, run: &Regex) -> String {
    paragraph_end
        .split(xml)
        .map(|paragraph| {
            run.captures_iter(paragraph)
                .filter_map(|c| c.get(1))
                .map(|m| decode_entities(m.as_str()))
                .collect::<String>()
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn docx_xml_text(xml: &str) -> String {
    paragraphs_text(xml, &DOCX_PARAGRAPH_END, &DOCX_RUN)
}

pub fn pptx_slide_text(xml: &str) -> String {
    paragraphs_text(xml, &PPTX_PARAGRAPH_END, &PPTX_RUN)
}

fn open_archive(path: &Path) -> PortResult<zip::ZipArchive<std::fs::File>> {
    let file = std::fs::File::open(path).map_err(|e| unexpected(path, e))?;
    zip::ZipArchive::new(file).map_err(|e| unexpected(path, e))
}

fn read_docx(path: &Path) -> PortResult<String> {
    let mut archive = open_archive(path)?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| unexpected(path, e))?
        .read_to_string(&mut xml)
        .map_err(|e| unexpected(path, e))?;
    Ok(docx_xml_text(&xml))
}

/// Slides come out in numeric order, separated by a blank line.
fn read_pptx(path: &Path) -> PortResult<String> {
    let mut archive = open_archive(path)?;
    let mut slides: Vec<(usize, String)> = Vec::new();

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| unexpected(path, e))?;
        let name = entry.name().to_string();
        let Some(number) = name
            .strip_prefix("ppt/slides/slide")
            .and_then(|rest| rest.strip_suffix(".xml"))
            .and_then(|n| n.parse::<usize>().ok())
        else {
            continue;
        };

        let mut xml = String::new();
        entry.read_to_string(&mut xml).map_err(|e| unexpected(path, e))?;
        slides.push((number, pptx_slide_text(&xml)));
    }

    slides.sort_by_key(|(number, _)| *number);
    Ok(slides
        .into_iter()
        .map(|(_, text)| text)
        .collect::<Vec<_>>()
        .join("\n\n"))
}

fn read_pdf(path: &Path) -> PortResult<String> {
    let bytes = std::fs::read(path).map_err(|e| unexpected(path, e))?;
    pdf_extract::extract_text_from_mem(&bytes).map_err(|e| unexpected(path, e))
}

fn read_plain(path: &Path) -> PortResult<String> {
    let bytes = std::fs::read(path).map_err(|e| unexpected(path, e))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

pub fn extract_file(path: &Path, document_type: DocumentType) -> PortResult<String> {
    match document_type {
        DocumentType::Pdf => read_pdf(path),
        DocumentType::Docx => read_docx(path),
        DocumentType::Pptx => read_pptx(path),
        DocumentType::Txt | DocumentType::Md => read_plain(path),
    }
}

/// Extracts from files under the upload directory. Relative document paths
/// are resolved against it.
#[derive(Clone)]
pub struct FileTextExtractor {
    upload_dir: PathBuf,
}

impl FileTextExtractor {
    pub fn new(upload_dir: PathBuf) -> Self {
        Self { upload_dir }
    }

    fn resolve(&self, document: &Document) -> PathBuf {
        if document.file_path.is_absolute() {
            document.file_path.clone()
        } else {
            self.upload_dir.join(&document.file_path)
        }
    }
}

#[async_trait]
impl TextExtractor for FileTextExtractor {
    async fn extract(&self, document: &Document) -> PortResult<String> {
        let path = self.resolve(document);
        let document_type = document.document_type;
        debug!("Extracting {} text from {}", document_type.as_str(), path.display());

        let text = tokio::task::spawn_blocking(move || extract_file(&path, document_type))
            .await
            .map_err(|e| PortError::Unexpected(format!("extraction task failed: {}", e)))??;

        info!("Extracted {} chars from document {}", text.len(), document.id);
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn write_zip(dir: &Path, name: &str, entries: &[(&str, &str)]) -> PathBuf {
        let path = dir.join(name);
        let mut writer = zip::ZipWriter::new(std::fs::File::create(&path).unwrap());
        for (entry, content) in entries {
            writer.start_file(*entry, SimpleFileOptions::default()).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
        path
    }

    #[test]
    fn docx_runs_are_joined_per_paragraph() {
        let xml = r#"<w:body><w:p><w:pPr/><w:r><w:t>Les </w:t></w:r><w:r><w:t xml:space="preserve">boucles</w:t></w:r></w:p><w:p><w:r><w:tab/><w:t>for &amp; while</w:t></w:r></w:p><w:p/></w:body>"#;
        assert_eq!(docx_xml_text(xml), "Les boucles\nfor & while");
    }

    #[test]
    fn pptx_slides_are_read_in_numeric_order() {
        let dir = tempfile::tempdir().unwrap();
        let slide = |text: &str| format!("<p:sld><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:sld>", text);
        let (first, second, tenth) = (slide("Première"), slide("Deuxième"), slide("Dixième"));
        let path = write_zip(
            dir.path(),
            "cours.pptx",
            &[
                ("ppt/slides/slide10.xml", tenth.as_str()),
                ("ppt/slides/slide2.xml", second.as_str()),
                ("ppt/slides/_rels/slide2.xml.rels", "<Relationships/>"),
                ("ppt/slides/slide1.xml", first.as_str()),
            ],
        );
        assert_eq!(
            extract_file(&path, DocumentType::Pptx).unwrap(),
            "Première\n\nDeuxième\n\nDixième"
        );
    }

    #[test]
    fn docx_file_is_read_from_the_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_zip(
            dir.path(),
            "notes.docx",
            &[("word/document.xml", "<w:p><w:r><w:t>Récursivité</w:t></w:r></w:p>")],
        );
        assert_eq!(extract_file(&path, DocumentType::Docx).unwrap(), "Récursivité");
    }

    #[test]
    fn plain_text_is_read_lossily() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.md");
        std::fs::write(&path, b"# Titre\n\xffsuite").unwrap();
        let text = extract_file(&path, DocumentType::Md).unwrap();
        assert!(text.starts_with("# Titre\n"));
        assert!(text.ends_with("suite"));
    }

    #[test]
    fn broken_archive_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faux.docx");
        std::fs::write(&path, "pas un zip").unwrap();
        assert!(matches!(
            extract_file(&path, DocumentType::Docx),
            Err(PortError::Unexpected(_))
        ));
    }
}
