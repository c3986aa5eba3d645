//! Document loaders: file on disk → text sections.
//!
//! The loader is chosen by file extension. `.txt` yields one section,
//! `.pdf` one section per page (form-feed separated), `.docx` one section
//! per non-empty paragraph. Parsing runs on the blocking pool.

use std::io::Read;
use std::path::Path;

use fusion_core::Error;

/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loader {
    Text,
    Pdf,
    Docx,
}

impl Loader {
    /// Resolve a loader from a lower-cased extension such as `".pdf"`.
    pub fn for_extension(ext: &str) -> Result<Self, Error> {
        match ext {
            ".txt" => Ok(Loader::Text),
            ".pdf" => Ok(Loader::Pdf),
            ".docx" => Ok(Loader::Docx),
            other if other.is_empty() => Err(Error::UnsupportedFormat("(none)".to_string())),
            other => Err(Error::UnsupportedFormat(other.to_string())),
        }
    }

    pub fn load_bytes(&self, bytes: &[u8]) -> Result<Vec<String>, Error> {
        match self {
            Loader::Text => load_text(bytes),
            Loader::Pdf => load_pdf(bytes),
            Loader::Docx => load_docx(bytes),
        }
    }
}

/// Read and parse `path` with `loader`.
pub async fn load_file(loader: Loader, path: &Path) -> Result<Vec<String>, Error> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let bytes = std::fs::read(&path)
            .map_err(|e| Error::Extraction(format!("{}: {}", path.display(), e)))?;
        loader.load_bytes(&bytes)
    })
    .await
    .map_err(|e| Error::Extraction(format!("loader task failed: {}", e)))?
}

fn load_text(bytes: &[u8]) -> Result<Vec<String>, Error> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| Error::Extraction(format!("text file is not valid UTF-8: {}", e)))?;
    Ok(vec![text.to_string()])
}

fn load_pdf(bytes: &[u8]) -> Result<Vec<String>, Error> {
    let text = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| Error::Extraction(format!("PDF: {}", e)))?;
    Ok(text
        .split('\u{c}')
        .filter(|page| !page.trim().is_empty())
        .map(str::to_string)
        .collect())
}

fn load_docx(bytes: &[u8]) -> Result<Vec<String>, Error> {
    let ooxml = |e: &dyn std::fmt::Display| Error::Extraction(format!("DOCX: {}", e));

    let mut archive =
        zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ooxml(&e))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ooxml(&"word/document.xml not found"))?;
    let mut xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .map_err(|e| ooxml(&e))?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ooxml(&"word/document.xml exceeds size limit"));
    }
    docx_paragraphs(&xml)
}

/// Collect `<w:t>` text per `<w:p>` paragraph. Tabs and breaks are kept.
fn docx_paragraphs(xml: &[u8]) -> Result<Vec<String>, Error> {
    use quick_xml::events::Event;

    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| Error::Extraction(format!("DOCX: {}", e)))?;
                current.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    if !current.trim().is_empty() {
                        paragraphs.push(std::mem::take(&mut current));
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => current.push('\t'),
                b"br" | b"cr" => current.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Extraction(format!("DOCX: {}", e))),
            _ => {}
        }
        buf.clear();
    }
    if !current.trim().is_empty() {
        paragraphs.push(current);
    }
    Ok(paragraphs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_extension() {
        assert!(matches!(
            Loader::for_extension(".csv"),
            Err(Error::UnsupportedFormat(ext)) if ext == ".csv"
        ));
        assert!(matches!(Loader::for_extension(""), Err(Error::UnsupportedFormat(_))));
        assert_eq!(Loader::for_extension(".docx").unwrap(), Loader::Docx);
    }

    #[test]
    fn test_text_is_one_section() {
        let sections = Loader::Text.load_bytes("Returns accepted within 30 days.".as_bytes()).unwrap();
        assert_eq!(sections, vec!["Returns accepted within 30 days.".to_string()]);
    }

    #[test]
    fn test_invalid_utf8_is_extraction_error() {
        assert!(matches!(
            Loader::Text.load_bytes(&[0xff, 0xfe, 0x00]),
            Err(Error::Extraction(_))
        ));
    }

    #[test]
    fn test_invalid_pdf_is_extraction_error() {
        assert!(matches!(Loader::Pdf.load_bytes(b"not a pdf"), Err(Error::Extraction(_))));
    }

    #[test]
    fn test_invalid_zip_is_extraction_error() {
        assert!(matches!(Loader::Docx.load_bytes(b"not a zip"), Err(Error::Extraction(_))));
    }

    #[test]
    fn test_docx_paragraphs() {
        let xml = br#"<?xml version="1.0"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t>Shipping</w:t></w:r><w:r><w:t xml:space="preserve"> policy</w:t></w:r></w:p>
    <w:p></w:p>
    <w:p><w:r><w:t>Free over $50 &amp; up.</w:t><w:tab/><w:t>Ends soon</w:t></w:r></w:p>
  </w:body>
</w:document>"#;
        let paragraphs = docx_paragraphs(xml).unwrap();
        assert_eq!(paragraphs, vec!["Shipping policy", "Free over $50 & up.\tEnds soon"]);
    }
}
