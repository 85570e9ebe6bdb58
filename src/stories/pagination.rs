use std::ops::Range;

use crate::handlers::callback_data::CallbackAction;

pub const PAGE_SIZE: usize = 5;

/// Largest file the Bot API accepts for upload.
pub const MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

pub fn total_pages(total_items: usize) -> usize {
    total_items.div_ceil(PAGE_SIZE)
}

/// Index range of `page`, or `None` when the page does not exist.
pub fn page_range(total_items: usize, page: usize) -> Option<Range<usize>> {
    if page >= total_pages(total_items) {
        return None;
    }
    let start = page * PAGE_SIZE;
    let end = ((page + 1) * PAGE_SIZE).min(total_items);
    Some(start..end)
}

pub fn page_slice<T>(items: &[T], page: usize) -> &[T] {
    match page_range(items.len(), page) {
        Some(range) => &items[range],
        None => &[],
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavButton {
    pub label: String,
    pub action: CallbackAction,
}

/// One row of navigation controls for `page` of `total_pages`.
pub fn navigation_row(user_id: i64, page: usize, total_pages: usize) -> Vec<NavButton> {
    let mut row = Vec::with_capacity(4);
    if page > 0 {
        row.push(NavButton {
            label: "⬅️ Previous".to_string(),
            action: CallbackAction::Page {
                user_id,
                page: page - 1,
            },
        });
    }
    row.push(NavButton {
        label: format!("{}/{}", page + 1, total_pages.max(1)),
        action: CallbackAction::PageInfo,
    });
    if page + 1 < total_pages {
        row.push(NavButton {
            label: "Next ➡️".to_string(),
            action: CallbackAction::Page {
                user_id,
                page: page + 1,
            },
        });
    }
    row.push(NavButton {
        label: "❌ Close".to_string(),
        action: CallbackAction::Close { user_id },
    });
    row
}
