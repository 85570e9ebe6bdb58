use std::sync::Arc;

use crate::config::Config;
use crate::db::database::Database;
use crate::session::SessionStore;
use crate::stories::engine::StoryEngine;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Database,
    pub engine: Arc<StoryEngine>,
    pub sessions: SessionStore,
}

impl AppState {
    pub fn new(config: Arc<Config>, db: Database, engine: Arc<StoryEngine>) -> Self {
        let sessions = SessionStore::new(config.app.session_ttl);
        AppState {
            config,
            db,
            engine,
            sessions,
        }
    }
}
