//! Multi-format validator: layered extension/size/MIME/content/security
//! checks, closed over the QSR document corpus's supported file types.
//!
//! Checks run in a fixed pipeline order: detect type → size → MIME sniff →
//! content shape → security scan. Each
//! layer returns a specific [`ValidationOutcome`] variant rather than a
//! generic failure, so callers (and tests) can assert on *why* a file was
//! rejected.

use serde::{Deserialize, Serialize};

/// Closed set of file types the validator understands.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Pdf,
    Docx,
    Xlsx,
    Pptx,
    Docm,
    Xlsm,
    Txt,
    Jpg,
    Jpeg,
    Png,
    Gif,
    Webp,
    Mp4,
    Mov,
    Avi,
    Wav,
    Mp3,
    M4a,
    Md,
    Csv,
}

impl FileType {
    pub fn from_extension(ext: &str) -> Option<Self> {
        Some(match ext.to_ascii_lowercase().as_str() {
            "pdf" => FileType::Pdf,
            "docx" => FileType::Docx,
            "xlsx" => FileType::Xlsx,
            "pptx" => FileType::Pptx,
            "docm" => FileType::Docm,
            "xlsm" => FileType::Xlsm,
            "txt" => FileType::Txt,
            "jpg" => FileType::Jpg,
            "jpeg" => FileType::Jpeg,
            "png" => FileType::Png,
            "gif" => FileType::Gif,
            "webp" => FileType::Webp,
            "mp4" => FileType::Mp4,
            "mov" => FileType::Mov,
            "avi" => FileType::Avi,
            "wav" => FileType::Wav,
            "mp3" => FileType::Mp3,
            "m4a" => FileType::M4a,
            "md" => FileType::Md,
            "csv" => FileType::Csv,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Pdf => "pdf",
            FileType::Docx => "docx",
            FileType::Xlsx => "xlsx",
            FileType::Pptx => "pptx",
            FileType::Docm => "docm",
            FileType::Xlsm => "xlsm",
            FileType::Txt => "txt",
            FileType::Jpg => "jpg",
            FileType::Jpeg => "jpeg",
            FileType::Png => "png",
            FileType::Gif => "gif",
            FileType::Webp => "webp",
            FileType::Mp4 => "mp4",
            FileType::Mov => "mov",
            FileType::Avi => "avi",
            FileType::Wav => "wav",
            FileType::Mp3 => "mp3",
            FileType::M4a => "m4a",
            FileType::Md => "md",
            FileType::Csv => "csv",
        }
    }

    /// Per-type max size in bytes, from the original corpus's exact caps.
    pub fn max_size_bytes(&self) -> u64 {
        const MIB: u64 = 1024 * 1024;
        match self {
            FileType::Pdf | FileType::Docx | FileType::Xlsx | FileType::Docm | FileType::Xlsm => {
                10 * MIB
            }
            FileType::Pptx => 25 * MIB,
            FileType::Jpg | FileType::Jpeg | FileType::Png | FileType::Webp => 5 * MIB,
            FileType::Gif => 10 * MIB,
            FileType::Mp4 | FileType::Mov => 50 * MIB,
            FileType::Avi => 100 * MIB,
            FileType::Wav => 25 * MIB,
            FileType::Mp3 | FileType::M4a => 10 * MIB,
            FileType::Txt | FileType::Md => MIB,
            FileType::Csv => 5 * MIB,
        }
    }

    pub fn is_office(&self) -> bool {
        matches!(
            self,
            FileType::Docx | FileType::Xlsx | FileType::Pptx | FileType::Docm | FileType::Xlsm
        )
    }

    pub fn is_text(&self) -> bool {
        matches!(self, FileType::Txt | FileType::Md | FileType::Csv)
    }

    /// MIME used for [`crate::extract::extract_text`] dispatch. Docm/Xlsm
    /// share their unmacroed sibling's internal XML shape.
    pub fn extraction_mime(&self) -> Option<&'static str> {
        match self {
            FileType::Pdf => Some(crate::extract::MIME_PDF),
            FileType::Docx | FileType::Docm => Some(crate::extract::MIME_DOCX),
            FileType::Pptx => Some(crate::extract::MIME_PPTX),
            FileType::Xlsx | FileType::Xlsm => Some(crate::extract::MIME_XLSX),
            _ => None,
        }
    }
}

/// Outcome of [`validate`]. A closed set of acceptance/rejection
/// categories, one per validation layer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ValidationOutcome {
    Valid(ValidationMetadata),
    InvalidType,
    InvalidSize,
    InvalidContent(String),
    SecurityRisk(String),
    Corrupted(String),
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ValidationMetadata {
    pub file_type: Option<FileType>,
    pub mime_type: String,
    pub size_bytes: u64,
    pub page_count: Option<u32>,
    pub text_extractable: Option<bool>,
    pub line_count: Option<usize>,
}

const SECURITY_PATTERNS: &[&str] = &[
    "<script",
    "javascript:",
    "vbscript:",
    "onload=",
    "onerror=",
    "eval(",
    "exec(",
];

/// Runs the full layered validation pipeline over `filename` + `bytes`.
pub fn validate(filename: &str, bytes: &[u8]) -> ValidationOutcome {
    if let Err(reason) = validate_filename(filename) {
        return ValidationOutcome::SecurityRisk(reason);
    }

    let Some(ext) = filename.rsplit('.').next() else {
        return ValidationOutcome::InvalidType;
    };
    let Some(file_type) = FileType::from_extension(ext) else {
        return ValidationOutcome::InvalidType;
    };

    if bytes.is_empty() || bytes.len() as u64 > file_type.max_size_bytes() {
        return ValidationOutcome::InvalidSize;
    }

    let mime = detect_mime(bytes);
    if !mime_matches(file_type, &mime, bytes) {
        return ValidationOutcome::InvalidContent(format!(
            "sniffed MIME {} does not match extension {}",
            mime,
            file_type.as_str()
        ));
    }

    let content_meta = match validate_content(file_type, bytes) {
        Ok(meta) => meta,
        Err(ValidationOutcome::InvalidContent(m)) => return ValidationOutcome::InvalidContent(m),
        Err(ValidationOutcome::Corrupted(m)) => return ValidationOutcome::Corrupted(m),
        Err(other) => return other,
    };

    if let Some(pattern) = scan_security(bytes) {
        return ValidationOutcome::SecurityRisk(format!("suspicious content detected: {}", pattern));
    }

    ValidationOutcome::Valid(ValidationMetadata {
        file_type: Some(file_type),
        mime_type: mime,
        size_bytes: bytes.len() as u64,
        ..content_meta
    })
}

/// Reject names containing path separators, `..`, or characters outside
/// `[A-Za-z0-9._\-\s()]`. Decodes percent-encoding before checking.
pub fn validate_filename(filename: &str) -> Result<(), String> {
    let decoded = percent_decode(filename);
    if decoded.contains('/') || decoded.contains('\\') || decoded.contains("..") {
        return Err("filename contains a path traversal sequence".to_string());
    }
    if !decoded
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "._- ()".contains(c))
    {
        return Err("filename contains characters outside the allowed set".to_string());
    }
    Ok(())
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(hex) = std::str::from_utf8(&bytes[i + 1..i + 3]) {
                if let Ok(byte) = u8::from_str_radix(hex, 16) {
                    out.push(byte);
                    i += 3;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn detect_mime(bytes: &[u8]) -> String {
    if bytes.starts_with(b"%PDF") {
        "application/pdf".to_string()
    } else if bytes.starts_with(b"PK") {
        "application/zip".to_string()
    } else if bytes.starts_with(&[0xff, 0xd8, 0xff]) {
        "image/jpeg".to_string()
    } else if bytes.starts_with(b"\x89PNG") {
        "image/png".to_string()
    } else if bytes.starts_with(b"GIF") {
        "image/gif".to_string()
    } else if bytes.starts_with(b"RIFF") {
        "application/octet-stream".to_string()
    } else if std::str::from_utf8(bytes).is_ok() {
        "text/plain".to_string()
    } else {
        "application/octet-stream".to_string()
    }
}

fn mime_matches(file_type: FileType, mime: &str, bytes: &[u8]) -> bool {
    if file_type.is_office() {
        return mime == "application/zip" || bytes.starts_with(b"PK");
    }
    if file_type.is_text() {
        return mime == "text/plain" || std::str::from_utf8(bytes).is_ok();
    }
    match file_type {
        FileType::Pdf => mime == "application/pdf",
        FileType::Jpg | FileType::Jpeg => mime == "image/jpeg",
        FileType::Png => mime == "image/png",
        FileType::Gif => mime == "image/gif",
        // Video/audio/webp: the closed-set magic check in validate_content is
        // authoritative; MIME sniffing here only needs to not actively
        // contradict a detected image/text type.
        _ => true,
    }
}

fn validate_content(file_type: FileType, bytes: &[u8]) -> Result<ValidationMetadata, ValidationOutcome> {
    let mut meta = ValidationMetadata::default();
    match file_type {
        FileType::Pdf => {
            if !bytes.starts_with(b"%PDF") {
                return Err(ValidationOutcome::InvalidContent(
                    "invalid PDF file format".to_string(),
                ));
            }
            match crate::extract::extract_text(bytes, crate::extract::MIME_PDF) {
                Ok(text) if !text.trim().is_empty() => {
                    meta.text_extractable = Some(true);
                    meta.page_count = count_pdf_pages(bytes);
                }
                Ok(_) => {
                    return Err(ValidationOutcome::InvalidContent(
                        "no text could be extracted from PDF".to_string(),
                    ))
                }
                Err(e) => {
                    return Err(ValidationOutcome::InvalidContent(format!(
                        "PDF text extraction failed: {e}"
                    )))
                }
            }
        }
        FileType::Docx | FileType::Xlsx | FileType::Pptx | FileType::Docm | FileType::Xlsm => {
            if !bytes.starts_with(b"PK") {
                return Err(ValidationOutcome::InvalidContent(
                    "invalid Office document format".to_string(),
                ));
            }
        }
        FileType::Jpg | FileType::Jpeg => {
            if !bytes.starts_with(&[0xff, 0xd8, 0xff]) {
                return Err(ValidationOutcome::InvalidContent(
                    "invalid JPEG format".to_string(),
                ));
            }
        }
        FileType::Png => {
            if !bytes.starts_with(b"\x89PNG") {
                return Err(ValidationOutcome::InvalidContent(
                    "invalid PNG format".to_string(),
                ));
            }
        }
        FileType::Gif => {
            if !bytes.starts_with(b"GIF") {
                return Err(ValidationOutcome::InvalidContent(
                    "invalid GIF format".to_string(),
                ));
            }
        }
        FileType::Webp => {
            if !(bytes.starts_with(b"RIFF") && bytes.len() > 12 && &bytes[8..12] == b"WEBP") {
                return Err(ValidationOutcome::InvalidContent(
                    "invalid WEBP format".to_string(),
                ));
            }
        }
        FileType::Txt | FileType::Md | FileType::Csv => match std::str::from_utf8(bytes) {
            Ok(text) => {
                if text.trim().is_empty() {
                    return Err(ValidationOutcome::InvalidContent(
                        "text file is empty".to_string(),
                    ));
                }
                meta.line_count = Some(text.lines().count());
            }
            Err(_) => {
                return Err(ValidationOutcome::InvalidContent(
                    "text file contains invalid UTF-8 characters".to_string(),
                ))
            }
        },
        FileType::Mp4 => {
            let window = &bytes[..bytes.len().min(100)];
            if !contains_subslice(window, b"ftyp") {
                return Err(ValidationOutcome::InvalidContent(
                    "invalid MP4 format".to_string(),
                ));
            }
        }
        FileType::Mov => {
            let window = &bytes[..bytes.len().min(200)];
            if !(contains_subslice(window, b"ftyp") || contains_subslice(window, b"moov")) {
                return Err(ValidationOutcome::InvalidContent(
                    "invalid MOV format".to_string(),
                ));
            }
        }
        FileType::Avi => {
            if !(bytes.starts_with(b"RIFF") && bytes.len() > 12 && &bytes[8..12] == b"AVI ") {
                return Err(ValidationOutcome::InvalidContent(
                    "invalid AVI format".to_string(),
                ));
            }
        }
        FileType::Wav => {
            if !bytes.starts_with(b"RIFF") {
                return Err(ValidationOutcome::InvalidContent(
                    "invalid WAV format".to_string(),
                ));
            }
        }
        FileType::Mp3 => {
            if !(bytes.starts_with(b"ID3") || bytes.starts_with(&[0xff, 0xfb])) {
                return Err(ValidationOutcome::InvalidContent(
                    "invalid MP3 format".to_string(),
                ));
            }
        }
        FileType::M4a => {
            let window = &bytes[..bytes.len().min(100)];
            if !contains_subslice(window, b"ftyp") {
                return Err(ValidationOutcome::InvalidContent(
                    "invalid M4A format".to_string(),
                ));
            }
        }
    }
    Ok(meta)
}

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn count_pdf_pages(bytes: &[u8]) -> Option<u32> {
    // Cheap heuristic consistent with the text-extraction-only guarantee we
    // actually need: count `/Type /Page` object markers. Not a full parser;
    // good enough for validator metadata, not relied on for citation math.
    let needle = b"/Type/Page";
    let needle_spaced = b"/Type /Page";
    let count = bytes.windows(needle.len()).filter(|w| *w == needle).count()
        + bytes
            .windows(needle_spaced.len())
            .filter(|w| *w == needle_spaced)
            .count();
    if count == 0 {
        None
    } else {
        Some(count as u32)
    }
}

fn scan_security(bytes: &[u8]) -> Option<&'static str> {
    let lower: Vec<u8> = bytes.iter().map(|b| b.to_ascii_lowercase()).collect();
    for pattern in SECURITY_PATTERNS {
        if contains_subslice(&lower, pattern.as_bytes()) {
            return Some(pattern);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_extension() {
        let outcome = validate("manual.exe", b"MZ");
        assert_eq!(outcome, ValidationOutcome::InvalidType);
    }

    #[test]
    fn rejects_empty_file() {
        let outcome = validate("manual.txt", b"");
        assert_eq!(outcome, ValidationOutcome::InvalidSize);
    }

    #[test]
    fn rejects_oversize_file() {
        let big = vec![b'a'; 2 * 1024 * 1024];
        let outcome = validate("notes.txt", &big);
        assert_eq!(outcome, ValidationOutcome::InvalidSize);
    }

    #[test]
    fn accepts_valid_text_file() {
        let outcome = validate("notes.txt", b"hello world\nsecond line\n");
        match outcome {
            ValidationOutcome::Valid(meta) => {
                assert_eq!(meta.file_type, Some(FileType::Txt));
                assert_eq!(meta.line_count, Some(2));
            }
            other => panic!("expected Valid, got {other:?}"),
        }
    }

    #[test]
    fn rejects_non_utf8_text() {
        let outcome = validate("notes.txt", &[0xff, 0xfe, 0x00, 0x01]);
        assert!(matches!(outcome, ValidationOutcome::InvalidContent(_)));
    }

    #[test]
    fn rejects_path_traversal_filename() {
        let outcome = validate("../../etc/passwd.txt", b"hello");
        assert!(matches!(outcome, ValidationOutcome::SecurityRisk(_)));
    }

    #[test]
    fn rejects_script_injection_pattern() {
        let outcome = validate("notes.txt", b"hello <script>alert(1)</script> world");
        assert!(matches!(outcome, ValidationOutcome::SecurityRisk(_)));
    }

    #[test]
    fn rejects_png_with_wrong_magic() {
        let outcome = validate("photo.png", b"not a real png at all");
        assert!(matches!(
            outcome,
            ValidationOutcome::InvalidContent(_) | ValidationOutcome::SecurityRisk(_)
        ));
    }

    #[test]
    fn filename_url_decoded_before_check() {
        assert!(validate_filename("safe%2E%2Efile.txt").is_err());
    }
}
