//! Upload validation: size, type, and name constraints enforced before any I/O.
//!
//! Multi-layer checks:
//! 1. File name present
//! 2. Size limit
//! 3. Declared MIME type in the category's allow-list
//! 4. Magic byte sniffing (executables, declared/detected mismatch)
//!
//! Every rejection is a [`ValidationCode`] and is never retryable: the caller
//! must supply a different file.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::defaults;
use crate::models::{SourceCategory, ValidationCode, ValidationResult};

/// Magic byte signatures for executable files
pub const MAGIC_SIGNATURES: &[(&str, &[u8])] = &[
    ("Windows PE/MZ", &[0x4D, 0x5A]),
    ("ELF", &[0x7F, 0x45, 0x4C, 0x46]),
    ("Mach-O 32", &[0xFE, 0xED, 0xFA, 0xCE]),
    ("Mach-O 64", &[0xFE, 0xED, 0xFA, 0xCF]),
    ("Mach-O Fat / Java Class", &[0xCA, 0xFE, 0xBA, 0xBE]),
    ("WebAssembly", &[0x00, 0x61, 0x73, 0x6D]),
];

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const MIME_TXT: &str = "text/plain";
pub const MIME_ZIP: &str = "application/zip";

/// An accepted MIME type and the label shown to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllowedType {
    pub mime: &'static str,
    pub label: &'static str,
}

const PDF: AllowedType = AllowedType {
    mime: MIME_PDF,
    label: "PDF",
};
const DOCX: AllowedType = AllowedType {
    mime: MIME_DOCX,
    label: "DOCX",
};
const PPTX: AllowedType = AllowedType {
    mime: MIME_PPTX,
    label: "PPTX",
};
const TXT: AllowedType = AllowedType {
    mime: MIME_TXT,
    label: "TXT",
};
const ZIP: AllowedType = AllowedType {
    mime: MIME_ZIP,
    label: "ZIP",
};

/// Per-category allow-lists.
static DEFAULT_ALLOW_LISTS: Lazy<HashMap<SourceCategory, Vec<AllowedType>>> = Lazy::new(|| {
    HashMap::from([
        (SourceCategory::Resume, vec![PDF, DOCX]),
        (SourceCategory::CoverLetter, vec![PDF, DOCX, TXT]),
        (SourceCategory::CaseStudies, vec![PDF, DOCX, PPTX]),
        (SourceCategory::Linkedin, vec![PDF, ZIP]),
    ])
});

/// Container formats that `infer` may report for OOXML documents.
fn is_zip_container(mime: &str) -> bool {
    mime == MIME_ZIP || mime.starts_with("application/vnd.openxmlformats-officedocument")
}

/// "PDF or DOCX", "PDF, DOCX, or TXT".
fn join_labels(types: &[AllowedType]) -> String {
    let labels: Vec<&str> = types.iter().map(|t| t.label).collect();
    match labels.len() {
        0 => String::new(),
        1 => labels[0].to_string(),
        2 => format!("{} or {}", labels[0], labels[1]),
        n => format!("{}, or {}", labels[..n - 1].join(", "), labels[n - 1]),
    }
}

/// Human-readable megabytes for limit messages ("5MB").
fn format_limit(bytes: u64) -> String {
    let mb = bytes as f64 / (1024.0 * 1024.0);
    if mb.fract() == 0.0 {
        format!("{}MB", mb as u64)
    } else {
        format!("{:.1}MB", mb)
    }
}

/// Enforces size/type/name constraints on uploads.
#[derive(Debug, Clone)]
pub struct FileValidator {
    max_file_size: u64,
    allow_lists: HashMap<SourceCategory, Vec<AllowedType>>,
}

impl Default for FileValidator {
    fn default() -> Self {
        Self::new(defaults::MAX_FILE_SIZE)
    }
}

impl FileValidator {
    /// Create a validator with the default allow-lists.
    pub fn new(max_file_size: u64) -> Self {
        Self {
            max_file_size,
            allow_lists: DEFAULT_ALLOW_LISTS.clone(),
        }
    }

    /// Replace the allow-list for one category.
    pub fn with_allow_list(mut self, category: SourceCategory, types: Vec<AllowedType>) -> Self {
        self.allow_lists.insert(category, types);
        self
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Allowed types for a category (empty if none configured).
    pub fn allowed_types(&self, category: SourceCategory) -> &[AllowedType] {
        self.allow_lists
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// User-facing message listing what the category accepts.
    pub fn type_error_message(&self, category: SourceCategory) -> String {
        format!(
            "Please upload a {} file.",
            join_labels(self.allowed_types(category))
        )
    }

    /// User-facing message for an oversized file.
    pub fn size_error_message(&self) -> String {
        format!(
            "File is too large. Please upload a file smaller than {}.",
            format_limit(self.max_file_size)
        )
    }

    /// Validate a candidate upload.
    ///
    /// Checks run in order: size, declared type, file name, then content.
    pub fn validate(
        &self,
        file_name: &str,
        mime_type: &str,
        data: &[u8],
        category: SourceCategory,
    ) -> ValidationResult {
        let size = data.len() as u64;
        if size > self.max_file_size {
            return ValidationResult::invalid(
                ValidationCode::FileTooLarge,
                self.size_error_message(),
            );
        }

        let declared = mime_type.trim().to_lowercase();
        let allowed = self.allowed_types(category);
        if !allowed.iter().any(|t| t.mime == declared) {
            return ValidationResult::invalid(
                ValidationCode::InvalidType,
                self.type_error_message(category),
            );
        }

        if file_name.trim().is_empty() {
            return ValidationResult::invalid(
                ValidationCode::EmptyFileName,
                "Please provide a file name.",
            );
        }

        if data.is_empty() {
            return ValidationResult::invalid(ValidationCode::EmptyContent, "The file is empty.");
        }

        if let Some(name) = detect_executable(data) {
            return ValidationResult::invalid(
                ValidationCode::InvalidType,
                format!("Executable file detected: {}", name),
            );
        }

        if let Some(kind) = infer::get(data) {
            let detected = kind.mime_type();
            let consistent = detected == declared
                || (is_zip_container(detected) && is_zip_container(&declared));
            if !consistent {
                return ValidationResult::invalid(
                    ValidationCode::InvalidType,
                    self.type_error_message(category),
                );
            }
        } else if declared != MIME_TXT {
            // Binary formats in the allow-lists all carry magic bytes.
            return ValidationResult::invalid(
                ValidationCode::InvalidType,
                self.type_error_message(category),
            );
        }

        ValidationResult::valid(declared, size)
    }

    /// Validate manually entered text.
    pub fn validate_text(&self, text: &str) -> ValidationResult {
        if text.trim().is_empty() {
            return ValidationResult::invalid(
                ValidationCode::EmptyContent,
                "Please enter some text.",
            );
        }
        let size = text.len() as u64;
        if size > defaults::MAX_MANUAL_TEXT_BYTES {
            return ValidationResult::invalid(
                ValidationCode::FileTooLarge,
                format!(
                    "Text is too long. Please keep it under {}.",
                    format_limit(defaults::MAX_MANUAL_TEXT_BYTES)
                ),
            );
        }
        ValidationResult::valid(MIME_TXT, size)
    }

    /// Validate an identity profile URL (absolute http/https with a host).
    pub fn validate_profile_url(&self, url: &str) -> ValidationResult {
        let invalid = || {
            ValidationResult::invalid(
                ValidationCode::InvalidUrl,
                "Please enter a valid profile URL.",
            )
        };
        let parsed = match reqwest::Url::parse(url.trim()) {
            Ok(u) => u,
            Err(_) => return invalid(),
        };
        if !matches!(parsed.scheme(), "http" | "https") {
            return invalid();
        }
        if parsed.host_str().map(str::is_empty).unwrap_or(true) {
            return invalid();
        }
        ValidationResult::valid("text/uri-list", url.len() as u64)
    }
}

/// Name of the executable format if `data` starts with a known signature.
pub fn detect_executable(data: &[u8]) -> Option<&'static str> {
    MAGIC_SIGNATURES
        .iter()
        .find(|(_, magic)| data.starts_with(magic))
        .map(|(name, _)| *name)
}
