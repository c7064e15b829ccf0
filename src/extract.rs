//! Turning uploaded bytes into plain document text (PDF or UTF-8 text).

use thiserror::Error;
use tracing::{info, instrument};

/// Document formats we can read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentKind {
  Pdf,
  PlainText,
}

/// Extraction failures. `Display` is what the user gets to see.
#[derive(Debug, Error)]
pub enum ExtractError {
  #[error("Unsupported file type. Please upload PDF or TXT files.")]
  Unsupported { declared: String },
  #[error("Error extracting text: {0}")]
  Pdf(String),
  #[error("Error extracting text: file is not valid UTF-8")]
  Encoding(#[from] std::string::FromUtf8Error),
}

/// Decide the document kind from the declared MIME type, falling back to the file extension
/// when the type is missing or generic.
pub fn resolve_kind(mime: Option<&str>, file_name: Option<&str>) -> Result<DocumentKind, ExtractError> {
  let mime = mime
    .map(|m| m.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
    .filter(|m| !m.is_empty());

  match mime.as_deref() {
    Some("application/pdf") => return Ok(DocumentKind::Pdf),
    Some("text/plain") => return Ok(DocumentKind::PlainText),
    Some("application/octet-stream") | None => {}
    Some(other) => return Err(ExtractError::Unsupported { declared: other.to_string() }),
  }

  let ext = file_name
    .and_then(|n| n.rsplit_once('.'))
    .map(|(_, ext)| ext.to_ascii_lowercase());
  match ext.as_deref() {
    Some("pdf") => Ok(DocumentKind::Pdf),
    Some("txt") => Ok(DocumentKind::PlainText),
    _ => Err(ExtractError::Unsupported {
      declared: mime.or_else(|| file_name.map(str::to_string)).unwrap_or_default(),
    }),
  }
}

/// Extract text. PDF pages are joined with newlines; text files are decoded as UTF-8.
#[instrument(level = "info", skip(bytes), fields(bytes = bytes.len()))]
pub fn extract_text(kind: DocumentKind, bytes: Vec<u8>) -> Result<String, ExtractError> {
  let text = match kind {
    DocumentKind::Pdf => {
      let pages = pdf_extract::extract_text_from_mem_by_pages(&bytes)
        .map_err(|e| ExtractError::Pdf(e.to_string()))?;
      let mut text = String::new();
      for page in &pages {
        text.push_str(page);
        text.push('\n');
      }
      info!(target: "research_assistant", pages = pages.len(), "PDF text extracted");
      text.trim().to_string()
    }
    DocumentKind::PlainText => String::from_utf8(bytes)?,
  };
  Ok(text)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn declared_mime_wins() {
    assert_eq!(resolve_kind(Some("application/pdf"), Some("notes.txt")).unwrap(), DocumentKind::Pdf);
    assert_eq!(resolve_kind(Some("text/plain; charset=utf-8"), None).unwrap(), DocumentKind::PlainText);
  }

  #[test]
  fn generic_mime_falls_back_to_extension() {
    assert_eq!(resolve_kind(Some("application/octet-stream"), Some("Paper.PDF")).unwrap(), DocumentKind::Pdf);
    assert_eq!(resolve_kind(None, Some("notes.txt")).unwrap(), DocumentKind::PlainText);
  }

  #[test]
  fn other_types_are_unsupported_with_user_message() {
    let err = resolve_kind(Some("image/png"), Some("scan.png")).unwrap_err();
    assert_eq!(err.to_string(), "Unsupported file type. Please upload PDF or TXT files.");
    assert!(resolve_kind(None, Some("archive.zip")).is_err());
    assert!(resolve_kind(None, None).is_err());
  }

  #[test]
  fn plain_text_is_decoded_verbatim() {
    let text = extract_text(DocumentKind::PlainText, "Résumé\n\nLine two".as_bytes().to_vec()).unwrap();
    assert_eq!(text, "Résumé\n\nLine two");
  }

  #[test]
  fn invalid_utf8_is_reported() {
    let err = extract_text(DocumentKind::PlainText, vec![0xff, 0xfe, 0x00]).unwrap_err();
    assert!(err.to_string().starts_with("Error extracting text"));
  }

  #[test]
  fn garbage_pdf_is_an_error_not_a_panic() {
    let err = extract_text(DocumentKind::Pdf, b"not a pdf".to_vec()).unwrap_err();
    assert!(matches!(err, ExtractError::Pdf(_)));
  }
}
