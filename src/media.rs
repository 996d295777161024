//! Content-type and filename glue for the HTTP layer.
//!
//! Response metadata depends on the file path, not on the byte span
//! being served, so it lives out here rather than in the range core.

use std::path::Path;

/// Extensions the library lists and serves as media.
const MEDIA_EXTENSIONS: &[&str] = &["mp4", "webm", "ogg", "mov", "avi", "mkv", "flv", "ts"];

/// True when `path` looks like a media file the library should list.
pub fn is_media_file(path: &Path) -> bool {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => MEDIA_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()),
        None => false,
    }
}

/// MIME type for a file path, `application/octet-stream` when unknown.
///
/// `.ts` means MPEG transport stream here, not TypeScript, so it is
/// pinned before consulting the extension map.
pub fn content_type(path: &Path) -> String {
    if let Some(ext) = path.extension().and_then(|ext| ext.to_str()) {
        if ext.eq_ignore_ascii_case("ts") {
            return "video/mp2t".to_string();
        }
    }

    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Rewrites a client-supplied filename so it cannot name directories or
/// abuse special characters. The extension is kept, alphanumerics only.
pub fn safe_filename(filename: &str) -> String {
    let path = Path::new(filename);

    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .unwrap_or("upload");
    let ext: String = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect();

    let mut name: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    name.truncate(200);

    if ext.is_empty() {
        name
    } else {
        format!("{name}.{ext}")
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn test_is_media_file() {
        assert!(is_media_file(Path::new("movies/clip.mp4")));
        assert!(is_media_file(Path::new("clip.MKV")));
        assert!(is_media_file(Path::new("segment.ts")));
        assert!(!is_media_file(Path::new("notes.txt")));
        assert!(!is_media_file(Path::new("noext")));
    }

    #[test]
    fn test_content_type() {
        assert_eq!("video/mp4", content_type(Path::new("clip.mp4")));
        assert_eq!("video/mp2t", content_type(Path::new("segment.ts")));
        assert_eq!(
            "application/octet-stream",
            content_type(Path::new("mystery.bin"))
        );
    }

    #[test]
    fn test_safe_filename() {
        assert_eq!("clip.mp4", safe_filename("clip.mp4"));
        assert_eq!("my_movie.mp4", safe_filename("my movie.mp4"));
        assert_eq!("evil.mp4", safe_filename("../../evil.mp4"));
        assert_eq!("c.mp4", safe_filename("a/b/c.mp4"));
        assert_eq!("clip", safe_filename("clip"));
    }

    #[test]
    fn test_safe_filename_caps_length() {
        let long = "a".repeat(400) + ".mp4";
        let safe = safe_filename(&long);
        assert!(safe.len() <= 204);
        assert!(safe.ends_with(".mp4"));
    }
}
