use std::fmt;

/// How the user identified the account they want stories from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputKind {
    DirectLink,
    Username,
    Phone,
}

impl InputKind {
    pub fn as_str(self) -> &'static str {
        match self {
            InputKind::DirectLink => "direct_link",
            InputKind::Username => "username",
            InputKind::Phone => "phone",
        }
    }
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Collection a story was fetched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoryCategory {
    Active,
    Pinned,
}

impl StoryCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            StoryCategory::Active => "active",
            StoryCategory::Pinned => "pinned",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            StoryCategory::Active => "Active",
            StoryCategory::Pinned => "Pinned",
        }
    }
}

/// Which collections the user asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CategoryFilter {
    Active,
    Pinned,
    All,
}

impl CategoryFilter {
    pub const ALL: [CategoryFilter; 3] = [
        CategoryFilter::Active,
        CategoryFilter::Pinned,
        CategoryFilter::All,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CategoryFilter::Active => "active",
            CategoryFilter::Pinned => "pinned",
            CategoryFilter::All => "all",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(CategoryFilter::Active),
            "pinned" => Some(CategoryFilter::Pinned),
            "all" => Some(CategoryFilter::All),
            _ => None,
        }
    }

    pub fn includes_active(self) -> bool {
        matches!(self, CategoryFilter::Active | CategoryFilter::All)
    }

    pub fn includes_pinned(self) -> bool {
        matches!(self, CategoryFilter::Pinned | CategoryFilter::All)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Photo,
    Video,
}

impl MediaKind {
    /// Picks the media kind from what upstream tells us about a payload.
    ///
    /// Photos are always photos. Documents are videos when they carry a
    /// video attribute or a `video/*` MIME type; any other document is
    /// reported as a video too, with `guessed` set so the caller can log it.
    pub fn infer(is_photo: bool, has_video_attribute: bool, mime_type: Option<&str>) -> InferredKind {
        if is_photo {
            return InferredKind {
                kind: MediaKind::Photo,
                guessed: false,
            };
        }
        let video_mime = mime_type
            .map(|mime| mime.trim().to_ascii_lowercase().starts_with("video/"))
            .unwrap_or(false);
        InferredKind {
            kind: MediaKind::Video,
            guessed: !(has_video_attribute || video_mime),
        }
    }

    pub fn file_extension(self) -> &'static str {
        match self {
            MediaKind::Photo => "jpg",
            MediaKind::Video => "mp4",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InferredKind {
    pub kind: MediaKind,
    pub guessed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerKind {
    User,
    Channel,
}

/// Opaque handle to a resolved account, usable for later story calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub id: i64,
    pub access_hash: i64,
    pub kind: PeerKind,
    pub display_name: String,
}

/// Where an upstream file lives, enough to download it later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileLocation {
    Photo {
        id: i64,
        access_hash: i64,
        file_reference: Vec<u8>,
        thumb_size: String,
    },
    Document {
        id: i64,
        access_hash: i64,
        file_reference: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    pub dc_id: i32,
    pub location: FileLocation,
    pub declared_size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryMedia {
    pub kind: MediaKind,
    pub media: MediaRef,
}

/// A story as listed by upstream, before filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawStory {
    pub id: i32,
    pub media: Option<StoryMedia>,
}

/// A media-bearing story selected for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryItem {
    pub story_id: i32,
    pub category: StoryCategory,
    pub kind: MediaKind,
    pub media: MediaRef,
}

#[derive(Debug, Clone)]
pub struct DownloadedStory {
    pub item: StoryItem,
    pub bytes: Vec<u8>,
}

impl DownloadedStory {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn file_name(&self) -> String {
        format!(
            "story_{}.{}",
            self.item.story_id,
            self.item.kind.file_extension()
        )
    }
}
