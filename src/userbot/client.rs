//! grammers-backed story source.

use std::sync::Arc;

use async_trait::async_trait;
use grammers_client::client::{LoginToken, PasswordToken};
use grammers_client::{sender, Client, InvocationError, SenderPool, SignInError};
use grammers_session::storages::SqliteSession;
use grammers_tl_types as tl;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::UserbotConfig;
use crate::stories::source::{SourceError, StorySource};
use crate::stories::types::{
    FileLocation, MediaKind, MediaRef, PeerKind, RawStory, StoryMedia, Target,
};

const DOWNLOAD_CHUNK_BYTES: i32 = 512 * 1024;

/// Errors raised while bringing the userbot online.
#[derive(Debug, Error)]
pub enum UserbotError {
    #[error("Sign in failed: {0}")]
    SignInFailed(String),

    #[error("Password required for 2FA")]
    PasswordRequired(PasswordToken),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Session error: {0}")]
    Session(String),
}

/// Maps an RPC failure onto the story source taxonomy.
fn map_invocation_error(err: InvocationError, subject: &str) -> SourceError {
    if let InvocationError::Rpc(rpc) = &err {
        match rpc.name.as_str() {
            "FLOOD_WAIT" | "FLOOD_PREMIUM_WAIT" => {
                return SourceError::FloodWait(rpc.value.unwrap_or(1));
            }
            "USERNAME_NOT_OCCUPIED" | "USERNAME_INVALID" | "PHONE_NOT_OCCUPIED" => {
                return SourceError::NotFound(subject.to_string());
            }
            "PHONE_NUMBER_INVALID" => return SourceError::InvalidPhone,
            "AUTH_KEY_UNREGISTERED" | "SESSION_REVOKED" | "USER_DEACTIVATED" => {
                return SourceError::Unauthorized;
            }
            _ => {}
        }
    }

    let text = err.to_string();
    match extract_flood_wait_seconds(&text) {
        Some(seconds) => SourceError::FloodWait(seconds),
        None => SourceError::Rpc(text),
    }
}

/// Pulls the wait out of messages such as `FLOOD_WAIT_120`.
fn extract_flood_wait_seconds(err_msg: &str) -> Option<u32> {
    let lowered = err_msg.to_lowercase();
    for pattern in ["flood_wait_", "flood wait "] {
        if let Some(idx) = lowered.find(pattern) {
            let start = idx + pattern.len();
            let digits: String = lowered[start..]
                .chars()
                .take_while(char::is_ascii_digit)
                .collect();
            if let Ok(seconds) = digits.parse() {
                return Some(seconds);
            }
        }
    }
    None
}

fn input_peer(target: &Target) -> tl::enums::InputPeer {
    match target.kind {
        PeerKind::User => tl::types::InputPeerUser {
            user_id: target.id,
            access_hash: target.access_hash,
        }
        .into(),
        PeerKind::Channel => tl::types::InputPeerChannel {
            channel_id: target.id,
            access_hash: target.access_hash,
        }
        .into(),
    }
}

fn input_location(location: &FileLocation) -> tl::enums::InputFileLocation {
    match location {
        FileLocation::Photo {
            id,
            access_hash,
            file_reference,
            thumb_size,
        } => tl::types::InputPhotoFileLocation {
            id: *id,
            access_hash: *access_hash,
            file_reference: file_reference.clone(),
            thumb_size: thumb_size.clone(),
        }
        .into(),
        FileLocation::Document {
            id,
            access_hash,
            file_reference,
        } => tl::types::InputDocumentFileLocation {
            id: *id,
            access_hash: *access_hash,
            file_reference: file_reference.clone(),
            thumb_size: String::new(),
        }
        .into(),
    }
}

fn user_display_name(user: &tl::types::User) -> String {
    let full_name = [user.first_name.as_deref(), user.last_name.as_deref()]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");
    if !full_name.trim().is_empty() {
        return full_name;
    }
    match &user.username {
        Some(username) => format!("@{username}"),
        None => user.id.to_string(),
    }
}

fn target_from_resolved(
    resolved: tl::enums::contacts::ResolvedPeer,
    subject: &str,
) -> Result<Target, SourceError> {
    let tl::enums::contacts::ResolvedPeer::Peer(resolved) = resolved;
    match resolved.peer {
        tl::enums::Peer::User(peer) => {
            for user in resolved.users {
                if let tl::enums::User::User(user) = user {
                    if user.id == peer.user_id {
                        return Ok(Target {
                            id: user.id,
                            access_hash: user.access_hash.unwrap_or_default(),
                            kind: PeerKind::User,
                            display_name: user_display_name(&user),
                        });
                    }
                }
            }
        }
        tl::enums::Peer::Channel(peer) => {
            for chat in resolved.chats {
                if let tl::enums::Chat::Channel(channel) = chat {
                    if channel.id == peer.channel_id {
                        return Ok(Target {
                            id: channel.id,
                            access_hash: channel.access_hash.unwrap_or_default(),
                            kind: PeerKind::Channel,
                            display_name: channel.title,
                        });
                    }
                }
            }
        }
        _ => {}
    }
    Err(SourceError::NotFound(subject.to_string()))
}

/// Thumb type and byte size of the largest rendition of a photo.
fn largest_photo_size(sizes: &[tl::enums::PhotoSize]) -> Option<(String, Option<u64>)> {
    sizes
        .iter()
        .filter_map(|size| match size {
            tl::enums::PhotoSize::Size(size) => Some((
                size.r#type.clone(),
                i64::from(size.w) * i64::from(size.h),
                u64::try_from(size.size).ok(),
            )),
            tl::enums::PhotoSize::Progressive(size) => Some((
                size.r#type.clone(),
                i64::from(size.w) * i64::from(size.h),
                size.sizes.iter().max().and_then(|bytes| u64::try_from(*bytes).ok()),
            )),
            _ => None,
        })
        .max_by_key(|(_, area, _)| *area)
        .map(|(thumb, _, bytes)| (thumb, bytes))
}

fn story_media(media: tl::enums::MessageMedia) -> Option<StoryMedia> {
    match media {
        tl::enums::MessageMedia::Photo(photo) => {
            let tl::enums::Photo::Photo(photo) = photo.photo? else {
                return None;
            };
            let (thumb_size, declared_size) = largest_photo_size(&photo.sizes)?;
            Some(StoryMedia {
                kind: MediaKind::infer(true, false, None).kind,
                media: MediaRef {
                    dc_id: photo.dc_id,
                    location: FileLocation::Photo {
                        id: photo.id,
                        access_hash: photo.access_hash,
                        file_reference: photo.file_reference,
                        thumb_size,
                    },
                    declared_size,
                },
            })
        }
        tl::enums::MessageMedia::Document(document) => {
            let tl::enums::Document::Document(document) = document.document? else {
                return None;
            };
            let has_video_attribute = document
                .attributes
                .iter()
                .any(|attribute| matches!(attribute, tl::enums::DocumentAttribute::Video(_)));
            let inferred = MediaKind::infer(false, has_video_attribute, Some(&document.mime_type));
            if inferred.guessed {
                debug!(
                    "Document {} ({}) has no video marker; sending it as video",
                    document.id, document.mime_type
                );
            }
            Some(StoryMedia {
                kind: inferred.kind,
                media: MediaRef {
                    dc_id: document.dc_id,
                    location: FileLocation::Document {
                        id: document.id,
                        access_hash: document.access_hash,
                        file_reference: document.file_reference,
                    },
                    declared_size: u64::try_from(document.size).ok(),
                },
            })
        }
        _ => None,
    }
}

fn raw_story(item: tl::enums::StoryItem) -> Option<RawStory> {
    match item {
        tl::enums::StoryItem::Item(story) => Some(RawStory {
            id: story.id,
            media: story_media(story.media),
        }),
        _ => None,
    }
}

/// MTProto client authenticated as a regular user account.
pub struct Userbot {
    client: Client,
    handle: sender::SenderPoolHandle,
    _pool_task: JoinHandle<()>,
}

impl Userbot {
    pub async fn connect(config: &UserbotConfig) -> Result<Self, UserbotError> {
        info!("Connecting userbot...");

        let session = Arc::new(
            SqliteSession::open(&config.session_path())
                .await
                .map_err(|e| UserbotError::Session(e.to_string()))?,
        );

        let SenderPool {
            runner,
            updates: _updates,
            handle,
        } = SenderPool::new(Arc::clone(&session), config.api_id);

        let client = Client::new(handle.clone());
        let pool_task = tokio::spawn(async move {
            runner.run().await;
        });

        Ok(Self {
            client,
            handle: handle.thin,
            _pool_task: pool_task,
        })
    }

    pub async fn is_authorized(&self) -> Result<bool, UserbotError> {
        self.client
            .is_authorized()
            .await
            .map_err(|e| UserbotError::Connection(e.to_string()))
    }

    pub async fn request_login_code(
        &self,
        phone: &str,
        api_hash: &str,
    ) -> Result<LoginToken, UserbotError> {
        info!("Requesting login code for phone: {}...", mask_phone(phone));
        self.client
            .request_login_code(phone, api_hash)
            .await
            .map_err(|e| UserbotError::SignInFailed(e.to_string()))
    }

    pub async fn sign_in(&self, token: &LoginToken, code: &str) -> Result<(), UserbotError> {
        match self.client.sign_in(token, code).await {
            Ok(_user) => Ok(()),
            Err(SignInError::PasswordRequired(password_token)) => {
                Err(UserbotError::PasswordRequired(password_token))
            }
            Err(SignInError::InvalidCode) => {
                Err(UserbotError::SignInFailed("Invalid code".to_owned()))
            }
            Err(e) => Err(UserbotError::SignInFailed(e.to_string())),
        }
    }

    pub async fn check_password(
        &self,
        password_token: PasswordToken,
        password: &str,
    ) -> Result<(), UserbotError> {
        self.client
            .check_password(password_token, password)
            .await
            .map(|_user| ())
            .map_err(|e| UserbotError::SignInFailed(e.to_string()))
    }

    pub fn disconnect(&self) {
        info!("Disconnecting userbot...");
        self.handle.quit();
    }

    async fn resolve(
        &self,
        request: tl::functions::contacts::ResolveUsername,
        subject: &str,
    ) -> Result<Target, SourceError> {
        let resolved = self
            .client
            .invoke(&request)
            .await
            .map_err(|err| map_invocation_error(err, subject))?;
        target_from_resolved(resolved, subject)
    }
}

#[async_trait]
impl StorySource for Userbot {
    async fn resolve_username(&self, username: &str) -> Result<Target, SourceError> {
        let bare = username.trim().trim_start_matches('@');
        if bare.is_empty() {
            return Err(SourceError::NotFound(username.to_string()));
        }
        let request = tl::functions::contacts::ResolveUsername {
            username: bare.to_string(),
            referer: None,
        };
        self.resolve(request, username).await
    }

    async fn resolve_phone(&self, phone: &str) -> Result<Target, SourceError> {
        let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
        let request = tl::functions::contacts::ResolvePhone { phone: digits };
        let resolved = self
            .client
            .invoke(&request)
            .await
            .map_err(|err| map_invocation_error(err, phone))?;
        target_from_resolved(resolved, phone)
    }

    async fn active_stories(&self, target: &Target) -> Result<Vec<RawStory>, SourceError> {
        let request = tl::functions::stories::GetPeerStories {
            peer: input_peer(target),
        };
        let tl::enums::stories::PeerStories::Stories(result) = self
            .client
            .invoke(&request)
            .await
            .map_err(|err| map_invocation_error(err, &target.display_name))?;
        let tl::enums::PeerStories::Stories(peer_stories) = result.stories;
        Ok(peer_stories.stories.into_iter().filter_map(raw_story).collect())
    }

    async fn pinned_stories(
        &self,
        target: &Target,
        limit: usize,
    ) -> Result<Vec<RawStory>, SourceError> {
        let request = tl::functions::stories::GetPinnedStories {
            peer: input_peer(target),
            offset_id: 0,
            limit: i32::try_from(limit).unwrap_or(i32::MAX),
        };
        let tl::enums::stories::Stories::Stories(result) = self
            .client
            .invoke(&request)
            .await
            .map_err(|err| map_invocation_error(err, &target.display_name))?;
        Ok(result.stories.into_iter().filter_map(raw_story).collect())
    }

    async fn download(&self, media: &MediaRef, max_bytes: u64) -> Result<Vec<u8>, SourceError> {
        let location = input_location(&media.location);
        let mut bytes = Vec::new();
        let mut offset: i64 = 0;

        loop {
            let request = tl::functions::upload::GetFile {
                precise: false,
                cdn_supported: false,
                location: location.clone(),
                offset,
                limit: DOWNLOAD_CHUNK_BYTES,
            };
            let file = self
                .client
                .invoke_in_dc(media.dc_id, &request)
                .await
                .map_err(|err| map_invocation_error(err, "file"))?;
            let chunk = match file {
                tl::enums::upload::File::File(file) => file.bytes,
                tl::enums::upload::File::CdnRedirect(_) => {
                    return Err(SourceError::Rpc("CDN redirects are not supported".to_string()));
                }
            };

            let last_chunk = chunk.len() < DOWNLOAD_CHUNK_BYTES as usize;
            bytes.extend_from_slice(&chunk);
            if bytes.len() as u64 > max_bytes {
                return Err(SourceError::TooLarge(max_bytes));
            }
            if last_chunk {
                break;
            }
            offset += i64::from(DOWNLOAD_CHUNK_BYTES);
        }

        Ok(bytes)
    }
}

/// Masks a phone number for logging (shows last 4 digits).
pub fn mask_phone(phone: &str) -> String {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    if digits.len() > 4 {
        format!("***{}", &digits[digits.len() - 4..])
    } else {
        "****".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_phone() {
        assert_eq!(mask_phone("+998901234567"), "***4567");
        assert_eq!(mask_phone("123"), "****");
    }

    #[test]
    fn test_extract_flood_wait() {
        assert_eq!(extract_flood_wait_seconds("rpc error 420: FLOOD_WAIT_120"), Some(120));
        assert_eq!(extract_flood_wait_seconds("flood wait 60 seconds"), Some(60));
        assert_eq!(extract_flood_wait_seconds("USERNAME_NOT_OCCUPIED"), None);
    }

    #[test]
    fn picks_the_largest_photo_rendition() {
        let sizes = vec![
            tl::enums::PhotoSize::Size(tl::types::PhotoSize {
                r#type: "m".to_string(),
                w: 320,
                h: 568,
                size: 20_000,
            }),
            tl::enums::PhotoSize::Progressive(tl::types::PhotoSizeProgressive {
                r#type: "y".to_string(),
                w: 1080,
                h: 1920,
                sizes: vec![10_000, 90_000, 240_000],
            }),
        ];
        assert_eq!(
            largest_photo_size(&sizes),
            Some(("y".to_string(), Some(240_000)))
        );
        assert_eq!(largest_photo_size(&[]), None);
    }

    #[test]
    fn user_targets_map_to_user_peers() {
        let target = Target {
            id: 5,
            access_hash: 9,
            kind: PeerKind::User,
            display_name: "x".into(),
        };
        match input_peer(&target) {
            tl::enums::InputPeer::User(peer) => {
                assert_eq!(peer.user_id, 5);
                assert_eq!(peer.access_hash, 9);
            }
            other => panic!("unexpected peer {other:?}"),
        }
    }
}
