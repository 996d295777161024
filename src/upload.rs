//! Multipart upload handling.
//!
//! Streams `multipart/form-data` bodies to disk: a `file` field with the
//! media itself and an optional `cover` image. Other fields are read and
//! dropped; nothing persists metadata here. Filenames are sanitized and
//! the whole stream is capped at a configured byte limit.

use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures::Stream;
use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::media;

/// Failure while receiving an upload.
#[derive(Debug, Error)]
pub enum UploadError {
    /// The request body is not `multipart/form-data`.
    #[error("request is not multipart/form-data")]
    NotMultipart,

    /// The form carried no `file` field.
    #[error("upload carries no file field")]
    MissingFile,

    /// The body exceeded the configured size limit.
    #[error("upload exceeds the size limit")]
    TooLarge,

    /// The multipart stream failed to decode.
    #[error("multipart decode failed: {0}")]
    Multipart(#[source] multer::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

fn classify(err: multer::Error) -> UploadError {
    match err {
        multer::Error::StreamSizeExceeded { .. } | multer::Error::FieldSizeExceeded { .. } => {
            UploadError::TooLarge
        }
        err => UploadError::Multipart(err),
    }
}

/// Filenames an accepted upload was stored under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadOutcome {
    /// Name of the stored media file within the media directory.
    pub file: String,
    /// Name of the stored cover image, when one was sent.
    pub cover: Option<String>,
}

/// Receives multipart uploads into the media and cover directories.
pub struct Uploader {
    media_dir: PathBuf,
    cover_dir: PathBuf,
    max_bytes: u64,
}

impl Uploader {
    pub fn new(media_dir: PathBuf, cover_dir: PathBuf, max_bytes: u64) -> Self {
        Uploader {
            media_dir,
            cover_dir,
            max_bytes,
        }
    }

    /// Drains one multipart body, writing the media file and any cover
    /// image to disk as it arrives.
    pub async fn receive<S, E>(
        &self,
        content_type: &str,
        body: S,
    ) -> Result<UploadOutcome, UploadError>
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + Send + 'static,
    {
        let boundary =
            multer::parse_boundary(content_type).map_err(|_| UploadError::NotMultipart)?;
        let constraints = multer::Constraints::new()
            .size_limit(multer::SizeLimit::new().whole_stream(self.max_bytes));
        let mut multipart = multer::Multipart::with_constraints(body, boundary, constraints);

        let mut file = None;
        let mut cover = None;

        while let Some(mut field) = multipart.next_field().await.map_err(classify)? {
            let name = field.name().map(str::to_owned);
            let filename = field.file_name().map(str::to_owned);

            match name.as_deref() {
                Some("file") => {
                    let filename = filename.ok_or(UploadError::MissingFile)?;
                    let stored = media::safe_filename(&filename);
                    write_field(&mut field, &self.media_dir.join(&stored)).await?;
                    debug!(file = %stored, "stored uploaded media");
                    file = Some(stored);
                }
                Some("cover") => {
                    let filename = filename.unwrap_or_else(|| "cover".to_owned());
                    let stored = format!("cover_{}", media::safe_filename(&filename));
                    write_field(&mut field, &self.cover_dir.join(&stored)).await?;
                    cover = Some(stored);
                }
                _ => {
                    // metadata fields are accepted and dropped
                    while field.chunk().await.map_err(classify)?.is_some() {}
                }
            }
        }

        match file {
            Some(file) => Ok(UploadOutcome { file, cover }),
            None => Err(UploadError::MissingFile),
        }
    }
}

async fn write_field(field: &mut multer::Field<'_>, dest: &Path) -> Result<(), UploadError> {
    let mut out = fs::File::create(dest).await?;
    while let Some(chunk) = field.chunk().await.map_err(classify)? {
        out.write_all(&chunk).await?;
    }
    out.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use assert_matches::assert_matches;
    use bytes::Bytes;
    use futures::stream;

    use super::{UploadError, Uploader};

    const BOUNDARY: &str = "test-boundary";

    fn multipart_body(parts: &[(&str, Option<&str>, &str)]) -> String {
        let mut body = String::new();
        for (name, filename, content) in parts {
            body.push_str(&format!("--{BOUNDARY}\r\n"));
            match filename {
                Some(filename) => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\r\n"
                )),
                None => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{name}\"\r\n\r\n"
                )),
            }
            body.push_str(content);
            body.push_str("\r\n");
        }
        body.push_str(&format!("--{BOUNDARY}--\r\n"));
        body
    }

    fn uploader(max_bytes: u64) -> (tempfile::TempDir, Uploader) {
        let dir = tempfile::tempdir().unwrap();
        let media = dir.path().join("media");
        let covers = dir.path().join("covers");
        std::fs::create_dir_all(&media).unwrap();
        std::fs::create_dir_all(&covers).unwrap();
        (dir, Uploader::new(media, covers, max_bytes))
    }

    async fn receive(
        uploader: &Uploader,
        body: String,
    ) -> Result<super::UploadOutcome, UploadError> {
        let content_type = format!("multipart/form-data; boundary={BOUNDARY}");
        let body = stream::iter([Ok::<_, Infallible>(Bytes::from(body))]);
        uploader.receive(&content_type, body).await
    }

    #[tokio::test]
    async fn test_receive_stores_media_and_cover() {
        let (dir, uploader) = uploader(1024);
        let body = multipart_body(&[
            ("title", None, "My Movie"),
            ("file", Some("my movie.mp4"), "FAKE MEDIA BYTES"),
            ("cover", Some("art.jpg"), "FAKE IMAGE"),
        ]);

        let outcome = receive(&uploader, body).await.unwrap();
        assert_eq!("my_movie.mp4", outcome.file);
        assert_eq!(Some("cover_art.jpg".to_owned()), outcome.cover);

        let stored = std::fs::read(dir.path().join("media/my_movie.mp4")).unwrap();
        assert_eq!(b"FAKE MEDIA BYTES", &stored[..]);
        let cover = std::fs::read(dir.path().join("covers/cover_art.jpg")).unwrap();
        assert_eq!(b"FAKE IMAGE", &cover[..]);
    }

    #[tokio::test]
    async fn test_receive_without_file_field_fails() {
        let (_dir, uploader) = uploader(1024);
        let body = multipart_body(&[("title", None, "No file here")]);

        let err = receive(&uploader, body).await.err().unwrap();
        assert_matches!(err, UploadError::MissingFile);
    }

    #[tokio::test]
    async fn test_receive_enforces_size_limit() {
        let (_dir, uploader) = uploader(64);
        let payload = "x".repeat(4096);
        let body = multipart_body(&[("file", Some("big.mp4"), &payload)]);

        let err = receive(&uploader, body).await.err().unwrap();
        assert_matches!(err, UploadError::TooLarge);
    }

    #[tokio::test]
    async fn test_receive_rejects_non_multipart() {
        let (_dir, uploader) = uploader(1024);
        let body = stream::iter([Ok::<_, Infallible>(Bytes::from_static(b"plain"))]);

        let err = uploader
            .receive("application/json", body)
            .await
            .err()
            .unwrap();
        assert_matches!(err, UploadError::NotMultipart);
    }
}
