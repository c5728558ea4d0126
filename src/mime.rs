//! MIME type detection for uploads

use std::fs::File;
use std::io::Read;
use std::path::Path;

const SNIFF_LEN: usize = 8192;

/// Detect the content type of a local file.
///
/// The extension decides when `mime_guess` knows it. Otherwise the first
/// bytes are inspected: valid UTF-8 without NULs is `text/plain`, anything
/// else (including unreadable files) is `application/octet-stream`.
pub fn detect(path: &Path) -> String {
    if let Some(mime) = mime_guess::from_path(path).first() {
        return mime.to_string();
    }

    if looks_like_text(path) {
        "text/plain".to_string()
    } else {
        mime_guess::mime::APPLICATION_OCTET_STREAM.to_string()
    }
}

fn looks_like_text(path: &Path) -> bool {
    let mut buffer = Vec::with_capacity(SNIFF_LEN);
    let read = File::open(path).and_then(|f| f.take(SNIFF_LEN as u64).read_to_end(&mut buffer));
    if read.is_err() || buffer.is_empty() {
        return false;
    }

    if buffer.contains(&0) {
        return false;
    }

    match std::str::from_utf8(&buffer) {
        Ok(_) => true,
        // A multi-byte sequence cut off at the sniff boundary is still text.
        Err(e) => e.error_len().is_none() && buffer.len() == SNIFF_LEN,
    }
}
