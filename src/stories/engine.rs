use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::stories::pagination::MAX_UPLOAD_BYTES;
use crate::stories::source::{SourceError, StorySource};
use crate::stories::types::{
    CategoryFilter, DownloadedStory, RawStory, StoryCategory, StoryItem, Target,
};

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_stories: usize,
    pub download_concurrency: usize,
    pub download_timeout: Duration,
}

/// Blocks every download of one batch until a flood wait has passed.
#[derive(Debug, Default)]
struct FloodGate {
    reopens_at: Mutex<Option<Instant>>,
}

impl FloodGate {
    async fn wait(&self) {
        loop {
            let deadline = *self.reopens_at.lock().await;
            match deadline {
                Some(deadline) if deadline > Instant::now() => {
                    tokio::time::sleep_until(deadline).await;
                }
                _ => return,
            }
        }
    }

    async fn close_for(&self, seconds: u32) {
        let deadline = Instant::now() + Duration::from_secs(u64::from(seconds));
        let mut reopens_at = self.reopens_at.lock().await;
        if (*reopens_at).map_or(true, |current| current < deadline) {
            *reopens_at = Some(deadline);
        }
    }
}

/// Fetches story lists and downloads their media.
///
/// The download limiter is shared by every caller of one engine, so the
/// total number of transfers in flight never exceeds the configured bound
/// no matter how many users are retrieving at once.
pub struct StoryEngine {
    source: Arc<dyn StorySource>,
    limiter: Arc<Semaphore>,
    settings: EngineSettings,
}

impl StoryEngine {
    pub fn new(source: Arc<dyn StorySource>, settings: EngineSettings) -> Self {
        let permits = settings.download_concurrency.max(1);
        StoryEngine {
            source,
            limiter: Arc::new(Semaphore::new(permits)),
            settings,
        }
    }

    pub fn source(&self) -> &dyn StorySource {
        self.source.as_ref()
    }

    pub fn max_stories(&self) -> usize {
        self.settings.max_stories
    }

    pub fn available_permits(&self) -> usize {
        self.limiter.available_permits()
    }

    /// Lists the media-bearing stories of `target`, capped at the
    /// configured maximum, active ones first.
    ///
    /// A failed collection fetch counts as empty. A flood wait pauses for
    /// the requested time and the fetch is tried once more.
    pub async fn collect(&self, target: &Target, filter: CategoryFilter) -> Vec<StoryItem> {
        let cap = self.settings.max_stories;
        let mut items = Vec::new();

        if filter.includes_active() {
            let stories = self
                .fetch_collection(StoryCategory::Active, target, || {
                    self.source.active_stories(target)
                })
                .await;
            items.extend(select(stories, StoryCategory::Active, cap));
        }

        let remaining = cap.saturating_sub(items.len());
        if filter.includes_pinned() && remaining > 0 {
            let stories = self
                .fetch_collection(StoryCategory::Pinned, target, || {
                    self.source.pinned_stories(target, remaining)
                })
                .await;
            items.extend(select(stories, StoryCategory::Pinned, remaining));
        }

        info!(
            "Collected {} {} stories for {}",
            items.len(),
            filter.as_str(),
            target.id
        );
        items
    }

    async fn fetch_collection<F, Fut>(
        &self,
        category: StoryCategory,
        target: &Target,
        fetch: F,
    ) -> Vec<RawStory>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Vec<RawStory>, SourceError>>,
    {
        for attempt in 0..2 {
            match fetch().await {
                Ok(stories) => return stories,
                Err(SourceError::FloodWait(seconds)) if attempt == 0 => {
                    warn!(
                        "FloodWait: {seconds}s while listing {} stories for {}",
                        category.label(),
                        target.id
                    );
                    tokio::time::sleep(Duration::from_secs(u64::from(seconds))).await;
                }
                Err(err) => {
                    warn!(
                        "Error getting {} stories for {}: {err}",
                        category.label(),
                        target.id
                    );
                    return Vec::new();
                }
            }
        }
        Vec::new()
    }

    /// Downloads every item, dropping the ones that fail.
    ///
    /// Results keep the input order. The call itself never fails.
    pub async fn download_batch(&self, items: &[StoryItem]) -> Vec<DownloadedStory> {
        let gate = FloodGate::default();
        let downloads = items
            .iter()
            .map(|item| self.download_one(item, &gate));
        let results = join_all(downloads).await;

        let downloaded: Vec<DownloadedStory> = results.into_iter().flatten().collect();
        if downloaded.len() < items.len() {
            warn!(
                "Downloaded {} of {} stories; the rest were dropped",
                downloaded.len(),
                items.len()
            );
        }
        downloaded
    }

    async fn download_one(&self, item: &StoryItem, gate: &FloodGate) -> Option<DownloadedStory> {
        if let Some(size) = item.media.declared_size {
            if size > MAX_UPLOAD_BYTES {
                warn!(
                    "Skipping story {}: {size} bytes exceeds the upload limit",
                    item.story_id
                );
                return None;
            }
        }

        for attempt in 0..2 {
            gate.wait().await;
            let permit = match self.limiter.acquire().await {
                Ok(permit) => permit,
                Err(_) => return None,
            };
            let result = tokio::time::timeout(
                self.settings.download_timeout,
                self.source.download(&item.media, MAX_UPLOAD_BYTES),
            )
            .await;
            drop(permit);

            match result {
                Ok(Ok(bytes)) => {
                    debug!(
                        "Downloaded {:?} story {} ({} bytes)",
                        item.kind,
                        item.story_id,
                        bytes.len()
                    );
                    return Some(DownloadedStory {
                        item: item.clone(),
                        bytes,
                    });
                }
                Ok(Err(SourceError::FloodWait(seconds))) if attempt == 0 => {
                    warn!("FloodWait: {seconds}s while downloading story {}", item.story_id);
                    gate.close_for(seconds).await;
                }
                Ok(Err(err)) => {
                    warn!("Error downloading story {}: {err}", item.story_id);
                    return None;
                }
                Err(_) => {
                    warn!(
                        "Download of story {} timed out after {:?}",
                        item.story_id, self.settings.download_timeout
                    );
                    return None;
                }
            }
        }

        None
    }
}

fn select(stories: Vec<RawStory>, category: StoryCategory, limit: usize) -> Vec<StoryItem> {
    stories
        .into_iter()
        .filter_map(|story| {
            story.media.map(|media| StoryItem {
                story_id: story.id,
                category,
                kind: media.kind,
                media: media.media,
            })
        })
        .take(limit)
        .collect()
}
