use crate::stories::types::CategoryFilter;

/// Telegram rejects inline buttons whose callback data exceeds this.
pub const MAX_CALLBACK_DATA_BYTES: usize = 64;

const DOWNLOAD_PREFIX: &str = "dl_";
const PAGE_PREFIX: &str = "page_";
const CLOSE_PREFIX: &str = "close_";
const PAGE_INFO: &str = "page_info";
const HELP: &str = "help";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    Download {
        filter: CategoryFilter,
        target: String,
    },
    Page {
        user_id: i64,
        page: usize,
    },
    Close {
        user_id: i64,
    },
    PageInfo,
    Help,
}

impl CallbackAction {
    pub fn parse(data: &str) -> Option<Self> {
        if data == PAGE_INFO {
            return Some(CallbackAction::PageInfo);
        }
        if data == HELP {
            return Some(CallbackAction::Help);
        }

        if let Some(payload) = data.strip_prefix(DOWNLOAD_PREFIX) {
            let (category, target) = payload.split_once(':')?;
            let filter = CategoryFilter::parse(category)?;
            if target.trim().is_empty() {
                return None;
            }
            return Some(CallbackAction::Download {
                filter,
                target: target.to_string(),
            });
        }

        if let Some(payload) = data.strip_prefix(PAGE_PREFIX) {
            let (user_id, page) = payload.split_once('_')?;
            return Some(CallbackAction::Page {
                user_id: user_id.parse().ok()?,
                page: page.parse().ok()?,
            });
        }

        if let Some(payload) = data.strip_prefix(CLOSE_PREFIX) {
            return Some(CallbackAction::Close {
                user_id: payload.parse().ok()?,
            });
        }

        None
    }

    pub fn to_data(&self) -> String {
        match self {
            CallbackAction::Download { filter, target } => {
                format!("{DOWNLOAD_PREFIX}{}:{target}", filter.as_str())
            }
            CallbackAction::Page { user_id, page } => format!("{PAGE_PREFIX}{user_id}_{page}"),
            CallbackAction::Close { user_id } => format!("{CLOSE_PREFIX}{user_id}"),
            CallbackAction::PageInfo => PAGE_INFO.to_string(),
            CallbackAction::Help => HELP.to_string(),
        }
    }

    pub fn fits(&self) -> bool {
        self.to_data().len() <= MAX_CALLBACK_DATA_BYTES
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_action_it_renders() {
        let actions = [
            CallbackAction::Download {
                filter: CategoryFilter::Pinned,
                target: "t.me/durov/s/12".to_string(),
            },
            CallbackAction::Page {
                user_id: 123456789,
                page: 4,
            },
            CallbackAction::Close { user_id: 77 },
            CallbackAction::PageInfo,
            CallbackAction::Help,
        ];
        for action in actions {
            assert_eq!(CallbackAction::parse(&action.to_data()), Some(action));
        }
    }

    #[test]
    fn page_info_is_not_mistaken_for_navigation() {
        assert_eq!(CallbackAction::parse("page_info"), Some(CallbackAction::PageInfo));
    }

    #[test]
    fn download_target_keeps_colons() {
        assert_eq!(
            CallbackAction::parse("dl_all:https://t.me/x/s/1"),
            Some(CallbackAction::Download {
                filter: CategoryFilter::All,
                target: "https://t.me/x/s/1".to_string(),
            })
        );
    }

    #[test]
    fn rejects_malformed_payloads() {
        for data in ["dl_everything:x", "dl_all:", "dl_all", "page_x_1", "page_1", "close_me", "other"] {
            assert_eq!(CallbackAction::parse(data), None, "{data}");
        }
    }

    #[test]
    fn long_targets_do_not_fit() {
        let action = CallbackAction::Download {
            filter: CategoryFilter::Active,
            target: "x".repeat(60),
        };
        assert!(!action.fits());
        assert!(CallbackAction::Close { user_id: i64::MAX }.fits());
    }
}
