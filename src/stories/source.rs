use async_trait::async_trait;
use thiserror::Error;

use crate::stories::types::{MediaRef, RawStory, Target};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("no account matches '{0}'")]
    NotFound(String),

    #[error("phone number is invalid")]
    InvalidPhone,

    #[error("flood wait required: {0} seconds")]
    FloodWait(u32),

    #[error("request timed out")]
    Timeout,

    #[error("file is larger than {0} bytes")]
    TooLarge(u64),

    #[error("not authorized")]
    Unauthorized,

    #[error("request failed: {0}")]
    Rpc(String),
}

/// User-level access to accounts and their stories.
#[async_trait]
pub trait StorySource: Send + Sync {
    /// Resolves a username, with or without a leading `@`.
    async fn resolve_username(&self, username: &str) -> Result<Target, SourceError>;

    async fn resolve_phone(&self, phone: &str) -> Result<Target, SourceError>;

    async fn active_stories(&self, target: &Target) -> Result<Vec<RawStory>, SourceError>;

    async fn pinned_stories(
        &self,
        target: &Target,
        limit: usize,
    ) -> Result<Vec<RawStory>, SourceError>;

    /// Downloads a file, failing with `TooLarge` once `max_bytes` is exceeded.
    async fn download(&self, media: &MediaRef, max_bytes: u64) -> Result<Vec<u8>, SourceError>;
}
