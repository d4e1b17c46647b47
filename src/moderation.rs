//! Content moderation
//!
//! A remote classifier scores text and images. The local word list always
//! runs on text and is the only check when the remote service is missing or
//! failing.

mod error;
mod huggingface;
mod wordlist;

pub use error::ModerationError;
pub use huggingface::HuggingFaceService;
pub use wordlist::WordList;

use crate::config::ModerationConfig;
use crate::export::ChatItem;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

/// Where a verdict came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictSource {
    Remote,
    WordList,
    /// Nothing to check (control tokens, images without a classifier)
    Skipped,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Scores {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub toxicity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nsfw: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub blocked: bool,
    pub scores: Scores,
    pub source: VerdictSource,
}

impl Verdict {
    pub fn allowed(source: VerdictSource) -> Self {
        Self {
            blocked: false,
            scores: Scores::default(),
            source,
        }
    }

    fn word_list(blocked: bool) -> Self {
        Self {
            blocked,
            scores: Scores::default(),
            source: VerdictSource::WordList,
        }
    }
}

/// Common interface for remote classifiers
#[async_trait]
pub trait ModerationService: Send + Sync {
    async fn moderate_text(&self, text: &str) -> Result<Verdict, ModerationError>;

    async fn moderate_image(&self, url: &str) -> Result<Verdict, ModerationError>;

    fn name(&self) -> &str;
}

#[async_trait]
impl<T: ModerationService + ?Sized> ModerationService for Arc<T> {
    async fn moderate_text(&self, text: &str) -> Result<Verdict, ModerationError> {
        self.as_ref().moderate_text(text).await
    }

    async fn moderate_image(&self, url: &str) -> Result<Verdict, ModerationError> {
        self.as_ref().moderate_image(url).await
    }

    fn name(&self) -> &str {
        self.as_ref().name()
    }
}

/// Word list plus optional remote classifier
#[derive(Clone)]
pub struct Moderator {
    remote: Option<Arc<dyn ModerationService>>,
    words: WordList,
}

impl Moderator {
    pub fn new(remote: Option<Arc<dyn ModerationService>>, words: WordList) -> Self {
        Self { remote, words }
    }

    pub fn from_config(config: &ModerationConfig) -> Self {
        let remote = config.api_token.as_ref().and_then(|token| {
            match HuggingFaceService::new(
                token.clone(),
                config.text_model.clone(),
                config.image_model.clone(),
            ) {
                Ok(service) => Some(Arc::new(service) as Arc<dyn ModerationService>),
                Err(e) => {
                    tracing::warn!(error = %e, "Remote moderation unavailable");
                    None
                }
            }
        });
        Self::new(remote, WordList::default())
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Moderate a message body the way it will be stored
    pub async fn moderate_message(&self, text: &str) -> Verdict {
        match ChatItem::parse(text) {
            ChatItem::Image { url, .. } => self.moderate_image(&url).await,
            item if item.export_control().is_some() => Verdict::allowed(VerdictSource::Skipped),
            _ => self.moderate_text(text).await,
        }
    }

    pub async fn moderate_text(&self, text: &str) -> Verdict {
        if self.words.is_profane(text) {
            return Verdict::word_list(true);
        }
        let Some(remote) = &self.remote else {
            return Verdict::word_list(false);
        };

        let start = std::time::Instant::now();
        match remote.moderate_text(text).await {
            Ok(verdict) => {
                tracing::debug!(
                    service = remote.name(),
                    duration_ms = %start.elapsed().as_millis(),
                    blocked = verdict.blocked,
                    "Text moderated"
                );
                verdict
            }
            Err(e) => {
                tracing::warn!(
                    service = remote.name(),
                    error = %e.message,
                    retryable = e.kind.is_retryable(),
                    "Text moderation failed, using word list"
                );
                Verdict::word_list(false)
            }
        }
    }

    pub async fn moderate_image(&self, url: &str) -> Verdict {
        let Some(remote) = &self.remote else {
            return Verdict::allowed(VerdictSource::Skipped);
        };
        match remote.moderate_image(url).await {
            Ok(verdict) => verdict,
            Err(e) => {
                tracing::warn!(
                    service = remote.name(),
                    error = %e.message,
                    "Image moderation failed, allowing"
                );
                Verdict::allowed(VerdictSource::Skipped)
            }
        }
    }
}
