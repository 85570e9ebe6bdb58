use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::stories::pagination::{page_slice, total_pages};
use crate::stories::types::{CategoryFilter, StoryItem};

#[derive(Debug, Clone)]
struct Session {
    items: Arc<Vec<StoryItem>>,
    page: usize,
    filter: CategoryFilter,
    target_label: String,
    touched_at: Instant,
}

/// Everything needed to render one page, copied out of the store.
#[derive(Debug, Clone)]
pub struct PageView {
    pub items: Vec<StoryItem>,
    pub page: usize,
    pub total_pages: usize,
    pub total_items: usize,
    pub filter: CategoryFilter,
    pub target_label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageError {
    Expired,
    OutOfRange,
}

/// Per-user story lists, one per user, dropped after `ttl` of inactivity.
///
/// Each operation takes the lock once, so a page change or close is a
/// single atomic step even when handlers run on several worker threads.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Mutex<HashMap<i64, Session>>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        SessionStore {
            inner: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    /// Replaces whatever the user had before.
    pub fn insert(
        &self,
        user_id: i64,
        items: Vec<StoryItem>,
        filter: CategoryFilter,
        target_label: &str,
    ) {
        let session = Session {
            items: Arc::new(items),
            page: 0,
            filter,
            target_label: target_label.to_string(),
            touched_at: Instant::now(),
        };
        self.inner.lock().insert(user_id, session);
    }

    /// Moves the user's session to `page` and returns its contents.
    pub fn view_page(&self, user_id: i64, page: usize) -> Result<PageView, PageError> {
        let mut sessions = self.inner.lock();
        let now = Instant::now();

        let expired = match sessions.get(&user_id) {
            None => return Err(PageError::Expired),
            Some(session) => now.duration_since(session.touched_at) >= self.ttl,
        };
        if expired {
            sessions.remove(&user_id);
            return Err(PageError::Expired);
        }

        let session = sessions.get_mut(&user_id).ok_or(PageError::Expired)?;
        let pages = total_pages(session.items.len());
        if page >= pages {
            return Err(PageError::OutOfRange);
        }
        session.page = page;
        session.touched_at = now;

        Ok(PageView {
            items: page_slice(&session.items, page).to_vec(),
            page,
            total_pages: pages,
            total_items: session.items.len(),
            filter: session.filter,
            target_label: session.target_label.clone(),
        })
    }

    pub fn current_page(&self, user_id: i64) -> Option<usize> {
        self.inner.lock().get(&user_id).map(|session| session.page)
    }

    /// Returns whether a session was removed; closing twice is harmless.
    pub fn close(&self, user_id: i64) -> bool {
        self.inner.lock().remove(&user_id).is_some()
    }

    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.inner.lock();
        let before = sessions.len();
        sessions.retain(|_, session| now.duration_since(session.touched_at) < self.ttl);
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let removed = store.purge_expired();
                if removed > 0 {
                    debug!("Evicted {removed} expired story sessions");
                }
            }
        })
    }
}
