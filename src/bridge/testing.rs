//! In-memory collaborators for bridge tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::common::error::{RelayError, RelayResult, SinkError, SinkResult, UploadError};
use crate::common::{Buffer, MessageKind, SinkFile};
use crate::config::types::{
    BridgeTuning, ChannelMapping, Config, PrefixMappingConfig, RelayConfig, SlackConfig,
    UploadConfig,
};
use crate::relay::{BufferRegistry, SourceRelay};
use crate::sink::{SinkChannelRecord, SinkDirectory, SinkMessaging};
use crate::upload::Uploader;

/// Two static channels and one DM prefix (`irc.server.` -> `dm-`).
pub fn test_config() -> Config {
    Config {
        relay: RelayConfig {
            host: "localhost".to_string(),
            port: 9001,
            password: "secret".to_string(),
            use_tls: false,
        },
        slack: SlackConfig {
            bot_token: "xoxb-test".to_string(),
            user_token: "xoxp-test".to_string(),
            app_token: "xapp-test".to_string(),
        },
        channels: vec![
            ChannelMapping {
                source: "irc.libera.#general".to_string(),
                sink: "general".to_string(),
            },
            ChannelMapping {
                source: "irc.libera.#rust".to_string(),
                sink: "rust".to_string(),
            },
        ],
        direct_messages: vec![PrefixMappingConfig {
            source_prefix: "irc.server.".to_string(),
            sink_prefix: "dm-".to_string(),
        }],
        filters: Vec::new(),
        upload: UploadConfig::default(),
        bridge: BridgeTuning::default(),
    }
}

/// Slack channel directory kept in a vector.
pub struct FakeDirectory {
    user_id: String,
    channels: Mutex<Vec<SinkChannelRecord>>,
    failing: Mutex<HashSet<String>>,
    fail_listing: AtomicBool,
    mutations: Mutex<Vec<String>>,
}

impl FakeDirectory {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            channels: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            fail_listing: AtomicBool::new(false),
            mutations: Mutex::new(Vec::new()),
        }
    }

    pub fn add(&self, name: &str, is_general: bool, is_archived: bool, members: &[&str]) {
        let mut channels = self.channels.lock().unwrap();
        let id = format!("C{}", channels.len() + 1);
        channels.push(SinkChannelRecord {
            id,
            name: name.to_string(),
            is_archived,
            is_general,
            member_ids: members.iter().map(|m| m.to_string()).collect(),
        });
    }

    pub fn channel(&self, name: &str) -> Option<SinkChannelRecord> {
        self.channels
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.name == name)
            .cloned()
    }

    /// Make every mutation touching `name` fail.
    pub fn fail_on(&self, name: &str) {
        self.failing.lock().unwrap().insert(name.to_string());
    }

    pub fn clear_failures(&self) {
        self.failing.lock().unwrap().clear();
    }

    pub fn fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    /// Log of successful mutations, e.g. `create dm-bob`.
    pub fn mutations(&self) -> Vec<String> {
        self.mutations.lock().unwrap().clone()
    }

    fn mutate(
        &self,
        op: &str,
        id: &str,
        apply: impl FnOnce(&mut SinkChannelRecord),
    ) -> SinkResult<()> {
        let mut channels = self.channels.lock().unwrap();
        let channel = channels
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| SinkError::api(op, Some("channel_not_found".to_string())))?;

        if self.failing.lock().unwrap().contains(&channel.name) {
            return Err(SinkError::api(op, Some("ratelimited".to_string())));
        }

        apply(channel);
        self.mutations
            .lock()
            .unwrap()
            .push(format!("{} {}", op, channel.name));
        Ok(())
    }
}

#[async_trait]
impl SinkDirectory for FakeDirectory {
    async fn list_channels(&self) -> SinkResult<Vec<SinkChannelRecord>> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(SinkError::api("conversations.list", Some("fatal_error".to_string())));
        }
        Ok(self.channels.lock().unwrap().clone())
    }

    async fn create_channel(&self, name: &str) -> SinkResult<String> {
        if self.failing.lock().unwrap().contains(name) {
            return Err(SinkError::api("create", Some("ratelimited".to_string())));
        }
        self.add(name, false, false, &[]);
        self.mutations.lock().unwrap().push(format!("create {}", name));
        self.channel(name)
            .map(|c| c.id)
            .ok_or_else(|| SinkError::ChannelNotFound {
                channel: name.to_string(),
            })
    }

    async fn archive_channel(&self, channel_id: &str) -> SinkResult<()> {
        self.mutate("archive", channel_id, |c| c.is_archived = true)
    }

    async fn unarchive_channel(&self, channel_id: &str) -> SinkResult<()> {
        self.mutate("unarchive", channel_id, |c| c.is_archived = false)
    }

    async fn invite_member(&self, channel_id: &str, user_id: &str) -> SinkResult<()> {
        let user_id = user_id.to_string();
        self.mutate("invite", channel_id, |c| c.member_ids.push(user_id))
    }

    async fn current_user_id(&self) -> SinkResult<String> {
        Ok(self.user_id.clone())
    }
}

/// A message posted through [`FakeMessaging`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub channel: String,
    pub author: Option<String>,
    pub text: String,
    pub kind: MessageKind,
}

/// Records posts and deletions; serves channel names and file contents.
#[derive(Default)]
pub struct FakeMessaging {
    names: HashMap<String, String>,
    files: HashMap<String, Vec<u8>>,
    posts: Mutex<Vec<Post>>,
    deletes: Mutex<Vec<(String, String)>>,
}

impl FakeMessaging {
    pub fn new(names: &[(&str, &str)]) -> Self {
        Self {
            names: names
                .iter()
                .map(|(id, name)| (id.to_string(), name.to_string()))
                .collect(),
            ..Self::default()
        }
    }

    pub fn with_file(mut self, url: &str, content: &[u8]) -> Self {
        self.files.insert(url.to_string(), content.to_vec());
        self
    }

    pub fn posts(&self) -> Vec<Post> {
        self.posts.lock().unwrap().clone()
    }

    pub fn deletes(&self) -> Vec<(String, String)> {
        self.deletes.lock().unwrap().clone()
    }
}

#[async_trait]
impl SinkMessaging for FakeMessaging {
    async fn post_message(
        &self,
        channel: &str,
        author: Option<&str>,
        text: &str,
        kind: MessageKind,
    ) -> SinkResult<()> {
        self.posts.lock().unwrap().push(Post {
            channel: channel.to_string(),
            author: author.map(str::to_string),
            text: text.to_string(),
            kind,
        });
        Ok(())
    }

    async fn delete_message(&self, channel_id: &str, timestamp: &str) -> SinkResult<()> {
        self.deletes
            .lock()
            .unwrap()
            .push((channel_id.to_string(), timestamp.to_string()));
        Ok(())
    }

    async fn channel_name(&self, channel_id: &str) -> SinkResult<String> {
        self.names
            .get(channel_id)
            .cloned()
            .ok_or_else(|| SinkError::ChannelNotFound {
                channel: channel_id.to_string(),
            })
    }

    async fn download_file(&self, file: &SinkFile) -> SinkResult<Vec<u8>> {
        self.files
            .get(&file.url)
            .cloned()
            .ok_or_else(|| SinkError::api("files.download", Some("file_not_found".to_string())))
    }
}

/// Relay backed by a real [`BufferRegistry`]; records every input.
pub struct FakeRelay {
    pub registry: BufferRegistry,
    inputs: Mutex<Vec<(String, String)>>,
    offline: AtomicBool,
    /// Cancelled as soon as an input is accepted.
    cancel_on_input: Mutex<Option<CancellationToken>>,
}

impl FakeRelay {
    pub fn new(buffers: &[(&str, &str)]) -> Self {
        let registry = BufferRegistry::new();
        registry.replace_all(
            buffers
                .iter()
                .map(|(pointer, full_name)| Buffer {
                    pointer: pointer.to_string(),
                    full_name: full_name.to_string(),
                })
                .collect(),
        );
        Self {
            registry,
            inputs: Mutex::new(Vec::new()),
            offline: AtomicBool::new(false),
            cancel_on_input: Mutex::new(None),
        }
    }

    pub fn inputs(&self) -> Vec<(String, String)> {
        self.inputs.lock().unwrap().clone()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn cancel_on_input(&self, token: CancellationToken) {
        *self.cancel_on_input.lock().unwrap() = Some(token);
    }
}

#[async_trait]
impl SourceRelay for FakeRelay {
    fn list_buffers(&self) -> Vec<Buffer> {
        self.registry.list()
    }

    fn buffer_by_pointer(&self, pointer: &str) -> Option<Buffer> {
        self.registry.get(pointer)
    }

    async fn wait_for_buffer(&self, pointer: &str, timeout: Duration) -> Option<Buffer> {
        self.registry.wait_for(pointer, timeout).await
    }

    async fn send_input(&self, full_name: &str, text: &str) -> RelayResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RelayError::NotConnected);
        }
        self.inputs
            .lock()
            .unwrap()
            .push((full_name.to_string(), text.to_string()));
        if let Some(token) = self.cancel_on_input.lock().unwrap().as_ref() {
            token.cancel();
        }
        Ok(())
    }
}

/// Uploader returning a fixed host URL, or `Disabled` when none is set.
pub struct FakeUploader {
    base_url: Option<String>,
}

impl FakeUploader {
    pub fn new(base_url: Option<&str>) -> Self {
        Self {
            base_url: base_url.map(str::to_string),
        }
    }
}

#[async_trait]
impl Uploader for FakeUploader {
    async fn upload(
        &self,
        filename: &str,
        _content: Vec<u8>,
        _mime: &str,
    ) -> Result<String, UploadError> {
        match &self.base_url {
            Some(base) => Ok(format!("{}/{}", base, filename)),
            None => Err(UploadError::Disabled),
        }
    }
}
