use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

use crate::services::storage::{ObjectStore, StorageError};

/// Raw image bytes plus their MIME type.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageData {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl ImageData {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }
}

/// Resolves a photo or garment reference to image bytes.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn fetch(&self, reference: &str) -> Result<ImageData, FetchError>;
}

/// Fetches `http(s)://` references over HTTP and anything else from object storage.
pub struct ImageFetcher {
    http: Client,
    storage: Arc<dyn ObjectStore>,
}

impl ImageFetcher {
    pub fn new(storage: Arc<dyn ObjectStore>, timeout: Duration) -> Result<Self, FetchError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http, storage })
    }
}

#[async_trait]
impl ImageSource for ImageFetcher {
    async fn fetch(&self, reference: &str) -> Result<ImageData, FetchError> {
        let bytes = if reference.starts_with("http://") || reference.starts_with("https://") {
            let response = self.http.get(reference).send().await?.error_for_status()?;
            response.bytes().await?.to_vec()
        } else {
            self.storage.get(reference.trim_start_matches('/')).await?
        };

        if bytes.is_empty() {
            return Err(FetchError::Empty(reference.to_string()));
        }

        let mime_type = sniff_mime(&bytes, reference);
        tracing::debug!(
            reference = %truncate(reference, 100),
            size = bytes.len(),
            mime_type = %mime_type,
            "Image fetched"
        );

        Ok(ImageData { bytes, mime_type })
    }
}

/// MIME type from the image header, falling back to the reference's extension.
pub fn sniff_mime(bytes: &[u8], reference: &str) -> String {
    if let Ok(format) = image::guess_format(bytes) {
        return format.to_mime_type().to_string();
    }

    let lower = reference.to_ascii_lowercase();
    let mime = if lower.ends_with(".png") {
        "image/png"
    } else if lower.ends_with(".webp") {
        "image/webp"
    } else {
        "image/jpeg"
    };
    mime.to_string()
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Storage read failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Image at {0} was empty")]
    Empty(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::storage::InMemoryObjectStore;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];

    #[test]
    fn test_header_wins_over_extension() {
        assert_eq!(sniff_mime(PNG_MAGIC, "items/shirt.jpg"), "image/png");
    }

    #[test]
    fn test_extension_fallback() {
        assert_eq!(sniff_mime(b"????", "items/shirt.PNG"), "image/png");
        assert_eq!(sniff_mime(b"????", "items/shirt.webp"), "image/webp");
        assert_eq!(sniff_mime(b"????", "items/shirt"), "image/jpeg");
    }

    #[tokio::test]
    async fn test_storage_reference_strips_leading_slash() {
        let storage = Arc::new(InMemoryObjectStore::new());
        storage
            .put("uploads/me.png", PNG_MAGIC, "image/png")
            .await
            .unwrap();

        let fetcher = ImageFetcher::new(storage, Duration::from_secs(1)).unwrap();
        let image = fetcher.fetch("/uploads/me.png").await.unwrap();
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.bytes, PNG_MAGIC);
    }

    #[tokio::test]
    async fn test_missing_object_is_an_error() {
        let fetcher =
            ImageFetcher::new(Arc::new(InMemoryObjectStore::new()), Duration::from_secs(1))
                .unwrap();
        let err = fetcher.fetch("uploads/nothing.png").await.unwrap_err();
        assert!(matches!(err, FetchError::Storage(StorageError::NotFound(_))));
    }
}
