//! Plain-text extraction for PDF and DOCX documents.

use super::{Document, DocumentError, DocumentKind};
use quick_xml::Reader;
use quick_xml::events::Event;
use std::io::{Cursor, Read};

/// Maximum decompressed bytes read from the DOCX body part (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Extract the text of a document, consuming its buffered bytes.
///
/// Pages or paragraphs without text are skipped; a document with no text at all fails with
/// [`DocumentError::EmptyDocument`]. The downloaded bytes are released when this returns,
/// whichever way it returns.
pub fn parse_document(document: Document) -> Result<String, DocumentError> {
    let Document {
        url, kind, bytes, ..
    } = document;
    let parts = match kind {
        DocumentKind::Pdf => extract_pdf_pages(&bytes)?,
        DocumentKind::Docx => extract_docx_paragraphs(&bytes)?,
    };
    drop(bytes);

    let segments = parts.len();
    let text = join_non_empty(parts);
    if text.trim().is_empty() {
        tracing::warn!(url, %kind, segments, "Document yielded no text");
        return Err(DocumentError::EmptyDocument);
    }
    tracing::debug!(url, %kind, segments, chars = text.chars().count(), "Document parsed");
    Ok(text)
}

fn join_non_empty(parts: Vec<String>) -> String {
    parts
        .into_iter()
        .filter(|part| !part.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn extract_pdf_pages(bytes: &[u8]) -> Result<Vec<String>, DocumentError> {
    pdf_extract::extract_text_from_mem_by_pages(bytes).map_err(|error| DocumentError::Parse {
        kind: DocumentKind::Pdf,
        message: error.to_string(),
    })
}

fn docx_error(message: impl ToString) -> DocumentError {
    DocumentError::Parse {
        kind: DocumentKind::Docx,
        message: message.to_string(),
    }
}

fn extract_docx_paragraphs(bytes: &[u8]) -> Result<Vec<String>, DocumentError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(docx_error)?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|error| docx_error(format!("word/document.xml: {error}")))?;
    let mut xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .map_err(docx_error)?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(docx_error("word/document.xml exceeds size limit"));
    }
    paragraphs_from_document_xml(&xml)
}

/// Collect the text runs (`w:t`) of each paragraph (`w:p`) in document order.
///
/// Paragraphs nested inside another one (text boxes, shapes) are emitted when they close; the
/// enclosing paragraph keeps the text gathered on both sides of them.
fn paragraphs_from_document_xml(xml: &[u8]) -> Result<Vec<String>, DocumentError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut paragraphs = Vec::new();
    let mut enclosing: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"p" => enclosing.push(std::mem::take(&mut current)),
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => current.push('\t'),
                b"br" | b"cr" => current.push('\n'),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te.unescape().map_err(docx_error)?;
                current.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let outer = enclosing.pop().unwrap_or_default();
                    paragraphs.push(std::mem::replace(&mut current, outer));
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(error) => return Err(docx_error(error)),
            _ => {}
        }
        buf.clear();
    }

    Ok(paragraphs)
}

#[cfg(test)]
pub(crate) fn docx_fixture(paragraphs: &[&str]) -> Vec<u8> {
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    let mut body = String::new();
    for paragraph in paragraphs {
        body.push_str("<w:p><w:r><w:t xml:space=\"preserve\">");
        body.push_str(paragraph);
        body.push_str("</w:t></w:r></w:p>");
    }
    let xml = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
         <w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\">\
         <w:body>{body}</w:body></w:document>"
    );

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file("word/document.xml", SimpleFileOptions::default())
        .expect("start entry");
    writer.write_all(xml.as_bytes()).expect("write entry");
    writer.finish().expect("finish archive").into_inner()
}
