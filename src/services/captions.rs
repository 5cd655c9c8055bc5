use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::models::fitting::CaptionResult;
use crate::services::generation::Captioner;
use crate::services::images::{ImageData, ImageSource};

/// Runs `f` over every input with at most `max_concurrency` calls outstanding.
///
/// Output order matches input order. An error or panic in one call leaves
/// `None` in its slot and never cancels the siblings.
pub async fn bounded_map<T, R, E, F, Fut>(inputs: Vec<T>, max_concurrency: usize, f: F) -> Vec<Option<R>>
where
    T: Send + 'static,
    R: Send + 'static,
    E: std::fmt::Display + Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let mut results: Vec<Option<R>> = std::iter::repeat_with(|| None).take(inputs.len()).collect();
    let mut set = JoinSet::new();

    for (idx, input) in inputs.into_iter().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        let call = f(input);
        set.spawn(async move {
            // The semaphore is never closed.
            let _permit = semaphore.acquire_owned().await.ok();
            match call.await {
                Ok(value) => (idx, Some(value)),
                Err(e) => {
                    tracing::warn!(index = idx, error = %e, "Batch item failed");
                    (idx, None)
                }
            }
        });
    }

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((idx, value)) => results[idx] = value,
            Err(e) => tracing::error!(error = %e, "Batch item panicked"),
        }
    }

    results
}

/// Captions every image with bounded fan-out. Failed items yield `None`.
pub async fn caption_batch(
    captioner: Arc<dyn Captioner>,
    images: Vec<ImageData>,
    max_concurrency: usize,
) -> Vec<Option<String>> {
    let captions = bounded_map(images, max_concurrency, move |image| {
        let captioner = Arc::clone(&captioner);
        async move { captioner.caption(&image).await }
    })
    .await;

    let failures = captions.iter().filter(|c| c.is_none()).count();
    if failures > 0 {
        metrics::counter!("fitting_caption_failures").increment(failures as u64);
    }
    captions
}

/// Annotates stored images (e.g. a page of past fittings) with captions.
pub struct CaptionBatcher {
    images: Arc<dyn ImageSource>,
    captioner: Arc<dyn Captioner>,
    max_concurrency: usize,
}

#[derive(Debug, thiserror::Error)]
enum AnnotateError {
    #[error(transparent)]
    Fetch(#[from] crate::services::images::FetchError),

    #[error(transparent)]
    Generation(#[from] crate::services::generation::GenerationError),
}

impl CaptionBatcher {
    pub fn new(
        images: Arc<dyn ImageSource>,
        captioner: Arc<dyn Captioner>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            images,
            captioner,
            max_concurrency,
        }
    }

    /// Fetch and caption each reference. Fetching shares the caption permit.
    pub async fn annotate(&self, references: Vec<String>) -> Vec<CaptionResult> {
        let captions = bounded_map(references.clone(), self.max_concurrency, |reference| {
            let images = Arc::clone(&self.images);
            let captioner = Arc::clone(&self.captioner);
            async move {
                let image = images.fetch(&reference).await?;
                Ok::<_, AnnotateError>(captioner.caption(&image).await?)
            }
        })
        .await;

        let failures = captions.iter().filter(|c| c.is_none()).count();
        if failures > 0 {
            metrics::counter!("fitting_caption_failures").increment(failures as u64);
        }
        tracing::info!(
            requested = references.len(),
            failed = failures,
            "Caption batch finished"
        );

        references
            .into_iter()
            .zip(captions)
            .map(|(reference, caption)| CaptionResult { reference, caption })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::generation::GenerationError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Records peak concurrency; bytes `[0]` make the call fail, `[9]` panic.
    #[derive(Default)]
    struct CountingCaptioner {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Captioner for CountingCaptioner {
        async fn caption(&self, image: &ImageData) -> Result<String, GenerationError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match image.bytes.first() {
                Some(0) => Err(GenerationError::NoText),
                Some(9) => panic!("captioner blew up"),
                Some(b) => Ok(format!("look {}", b)),
                None => Err(GenerationError::NoText),
            }
        }
    }

    fn image(byte: u8) -> ImageData {
        ImageData::new(vec![byte], "image/png")
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_ceiling() {
        let captioner = Arc::new(CountingCaptioner::default());
        let images = (10..=21).map(image).collect();

        let out = caption_batch(captioner.clone(), images, 3).await;

        assert_eq!(out.len(), 12);
        assert!(out.iter().all(Option::is_some));
        assert!(captioner.peak.load(Ordering::SeqCst) <= 3);
        assert!(captioner.peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_failures_are_isolated_and_order_kept() {
        let captioner = Arc::new(CountingCaptioner::default());
        let images = vec![image(1), image(0), image(9), image(4)];

        let out = caption_batch(captioner, images, 2).await;

        assert_eq!(
            out,
            vec![Some("look 1".to_string()), None, None, Some("look 4".to_string())]
        );
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let captioner = Arc::new(CountingCaptioner::default());
        assert!(caption_batch(captioner, Vec::new(), 4).await.is_empty());
    }
}
