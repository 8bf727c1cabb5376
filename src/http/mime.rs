//! Extension-to-content-type lookup for file responses.
//!
//! [`Response::file`](crate::Response::file) and
//! [`Response::file_range`](crate::Response::file_range) stream bytes
//! straight off disk; they never guess a `content-type` for you. A handler
//! that wants one looks the served path's extension up in a [`MimeTable`]
//! and sets the header itself before calling `file()`.

use std::collections::HashMap;

/// Lowercased-extension lookup with a built-in default table.
///
/// The defaults cover the common web, image, audio, video, and archive
/// types; anything else falls back to `application/octet-stream`. A host
/// can add or override entries with [`MimeTable::insert`].
#[derive(Debug, Clone, Default)]
pub struct MimeTable {
    overrides: HashMap<String, &'static str>,
}

impl MimeTable {
    pub fn new() -> Self {
        MimeTable {
            overrides: HashMap::new(),
        }
    }

    /// Registers or replaces the content-type for `extension` (compared
    /// case-insensitively, without a leading dot).
    pub fn insert(&mut self, extension: impl Into<String>, content_type: &'static str) -> &mut Self {
        self.overrides
            .insert(extension.into().to_ascii_lowercase(), content_type);
        self
    }

    /// Looks up the content-type for a file `path`'s extension.
    ///
    /// Falls back to `application/octet-stream` when the path has no
    /// extension or the extension isn't known.
    ///
    /// # Examples
    /// ```
    /// use littleweb::mime::MimeTable;
    ///
    /// let table = MimeTable::new();
    /// assert_eq!(table.for_path("index.html"), "text/html; charset=utf-8");
    /// assert_eq!(table.for_path("archive.tar.gz"), "application/gzip");
    /// assert_eq!(table.for_path("no_extension"), "application/octet-stream");
    /// ```
    pub fn for_path(&self, path: &str) -> &'static str {
        let Some(extension) = path.rsplit('.').next().filter(|ext| *ext != path) else {
            return "application/octet-stream";
        };
        self.lookup(extension)
    }

    /// Looks up the content-type for a bare extension (no leading dot).
    pub fn lookup(&self, extension: &str) -> &'static str {
        let lower = extension.to_ascii_lowercase();
        if let Some(content_type) = self.overrides.get(lower.as_str()) {
            return content_type;
        }
        default_content_type(&lower)
    }
}

fn default_content_type(extension: &str) -> &'static str {
    match extension {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "json" => "application/json",
        "xml" => "application/xml",
        "txt" => "text/plain; charset=utf-8",
        "csv" => "text/csv; charset=utf-8",
        "md" => "text/markdown; charset=utf-8",

        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "bmp" => "image/bmp",

        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",

        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",

        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",

        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        "wasm" => "application/wasm",

        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_extension() {
        let table = MimeTable::new();
        assert_eq!(table.for_path("style.css"), "text/css; charset=utf-8");
    }

    #[test]
    fn unknown_extension_falls_back() {
        let table = MimeTable::new();
        assert_eq!(table.for_path("data.bogus"), "application/octet-stream");
    }

    #[test]
    fn no_extension_falls_back() {
        let table = MimeTable::new();
        assert_eq!(table.for_path("README"), "application/octet-stream");
    }

    #[test]
    fn override_replaces_default() {
        let mut table = MimeTable::new();
        table.insert("css", "text/x-custom-css");
        assert_eq!(table.lookup("CSS"), "text/x-custom-css");
    }

    #[test]
    fn compound_extension_uses_last_segment() {
        let table = MimeTable::new();
        assert_eq!(table.for_path("archive.tar.gz"), "application/gzip");
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let table = MimeTable::new();
        assert_eq!(table.for_path("PHOTO.JPG"), "image/jpeg");
    }
}
