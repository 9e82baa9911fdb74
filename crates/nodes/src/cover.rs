//! Best-effort cover image acquisition.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use pipeline::{AssetError, ImageSource};

use crate::Gateway;

const COVER_STEM: &str = "cover";

pub struct CoverAssetResolver {
    gateway: Gateway,
    source: Arc<dyn ImageSource>,
    max_attempts: usize,
}

impl CoverAssetResolver {
    pub fn new(gateway: Gateway, source: Arc<dyn ImageSource>, max_attempts: usize) -> Self {
        Self {
            gateway,
            source,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Finds candidate images for `topic` and downloads the first one that
    /// can be fetched into `dest_dir/cover.<ext>`.
    pub async fn resolve(&self, topic: &str, dest_dir: &Path) -> Result<PathBuf, AssetError> {
        let candidates = self
            .gateway
            .call("image_search", self.source.find_candidates(topic))
            .await
            .map_err(AssetError::Search)?;
        if candidates.is_empty() {
            return Err(AssetError::NoCandidates);
        }

        let dest_stem = dest_dir.join(COVER_STEM);
        let mut last_error = None;
        let mut attempts = 0;
        for candidate in candidates.iter().take(self.max_attempts) {
            attempts += 1;
            match self
                .gateway
                .call("image_fetch", self.source.fetch(candidate, &dest_stem))
                .await
            {
                Ok(path) => {
                    tracing::info!(url = %candidate.url, path = %path.display(), "Cover image saved");
                    return Ok(path);
                }
                Err(e) => {
                    tracing::debug!(url = %candidate.url, error = %e, "Cover candidate failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(last) => Err(AssetError::Exhausted { attempts, last }),
            None => Err(AssetError::NoCandidates),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pipeline::{CollaboratorError, ImageCandidate};
    use std::num::NonZeroU32;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::tempdir;

    use crate::RateLimiter;

    struct FakeImages {
        candidates: Result<Vec<ImageCandidate>, CollaboratorError>,
        good_url: Option<String>,
        fetched: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ImageSource for FakeImages {
        async fn find_candidates(
            &self,
            _topic: &str,
        ) -> Result<Vec<ImageCandidate>, CollaboratorError> {
            self.candidates.clone()
        }

        async fn fetch(
            &self,
            candidate: &ImageCandidate,
            dest_stem: &Path,
        ) -> Result<PathBuf, CollaboratorError> {
            self.fetched.lock().unwrap().push(candidate.url.clone());
            if self.good_url.as_deref() == Some(candidate.url.as_str()) {
                let path = dest_stem.with_extension("png");
                std::fs::write(&path, b"png").map_err(|e| CollaboratorError::io("write", &e))?;
                Ok(path)
            } else {
                Err(CollaboratorError::Provider {
                    status: 404,
                    message: "gone".into(),
                    retry: pipeline::RetryPolicy::NonRetryable,
                })
            }
        }
    }

    fn candidates(n: usize) -> Vec<ImageCandidate> {
        (0..n)
            .map(|i| ImageCandidate {
                url: format!("https://img.example/{i}.png"),
                title: None,
            })
            .collect()
    }

    fn resolver(images: Arc<FakeImages>, limiter: Arc<RateLimiter>) -> CoverAssetResolver {
        CoverAssetResolver::new(Gateway::new(limiter, Duration::from_secs(5)), images, 5)
    }

    fn limiter() -> Arc<RateLimiter> {
        Arc::new(RateLimiter::per_minute(NonZeroU32::new(100).unwrap()))
    }

    #[tokio::test]
    async fn first_fetchable_candidate_wins() {
        let dir = tempdir().unwrap();
        let images = Arc::new(FakeImages {
            candidates: Ok(candidates(4)),
            good_url: Some("https://img.example/2.png".into()),
            fetched: Mutex::new(Vec::new()),
        });
        let limiter = limiter();
        let path = resolver(images.clone(), limiter.clone())
            .resolve("Topic", dir.path())
            .await
            .unwrap();
        assert_eq!(path, dir.path().join("cover.png"));
        assert_eq!(images.fetched.lock().unwrap().len(), 3);
        // One search plus three fetches.
        assert_eq!(limiter.in_window().await, 4);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let dir = tempdir().unwrap();
        let images = Arc::new(FakeImages {
            candidates: Ok(candidates(8)),
            good_url: None,
            fetched: Mutex::new(Vec::new()),
        });
        let err = resolver(images.clone(), limiter())
            .resolve("Topic", dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, AssetError::Exhausted { attempts: 5, .. }));
        assert_eq!(images.fetched.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn no_candidates_is_reported() {
        let dir = tempdir().unwrap();
        let images = Arc::new(FakeImages {
            candidates: Ok(Vec::new()),
            good_url: None,
            fetched: Mutex::new(Vec::new()),
        });
        let err = resolver(images, limiter()).resolve("Topic", dir.path()).await.unwrap_err();
        assert!(matches!(err, AssetError::NoCandidates));
    }

    #[tokio::test]
    async fn search_failure_is_reported() {
        let dir = tempdir().unwrap();
        let images = Arc::new(FakeImages {
            candidates: Err(CollaboratorError::Transport {
                message: "dns".into(),
            }),
            good_url: None,
            fetched: Mutex::new(Vec::new()),
        });
        let err = resolver(images, limiter()).resolve("Topic", dir.path()).await.unwrap_err();
        assert!(matches!(err, AssetError::Search(_)));
    }
}
