//! Utility functions and helpers for upload handling

use std::path::Path;

/// Validate that a file has an allowed extension
pub(crate) fn validate_file_extension<S: AsRef<str>>(
    filename: &str,
    allowed_extensions: &[S],
) -> bool {
    if let Some(ext) = Path::new(filename).extension() {
        if let Some(ext_str) = ext.to_str() {
            return allowed_extensions
                .iter()
                .any(|e| e.as_ref().eq_ignore_ascii_case(ext_str));
        }
    }
    false
}

/// Best-effort MIME type for a stored image, derived from its file name
#[cfg(feature = "web")]
pub(crate) fn guess_content_type(filename: &str) -> String {
    mime_guess::from_path(filename)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}
