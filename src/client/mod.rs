//! Channel client abstraction.
//!
//! A [`ChannelClient`] owns a session with the messaging platform. The
//! [`crate::scraper::Scraper`] authenticates it once per run, reads messages
//! through a [`MessageIter`], downloads photos, and always disconnects it.
//!
//! # Available Clients
//!
//! - [`WebPreviewClient`] - Reads public channel preview pages over HTTP

mod web;

pub use web::{parse_count, parse_preview_page, WebClientSettings, WebPreviewClient};

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::ClientError;
use crate::models::PlatformMessage;

/// A session with a messaging platform.
///
/// Implementations signal platform backpressure with
/// [`ClientError::FloodWait`]; callers decide how to honour it.
#[async_trait]
pub trait ChannelClient: Send + Sync {
    /// Human-readable name for this client (used in logs).
    fn name(&self) -> &'static str;

    /// Establish the session. Must be called before any other operation.
    async fn authenticate(&mut self) -> Result<(), ClientError>;

    /// Fetch one page of messages, newest first.
    ///
    /// With `before = Some(id)` only messages older than `id` are returned.
    /// An empty page means the channel history is exhausted.
    async fn fetch_page(&self, channel: &str, before: Option<i64>) -> Result<Vec<PlatformMessage>, ClientError>;

    /// Download a message's photo to `destination`, returning the written path.
    async fn download_media(&self, message: &PlatformMessage, destination: &Path) -> Result<PathBuf, ClientError>;

    /// Tear the session down. Safe to call more than once.
    async fn disconnect(&mut self);
}

/// Lazy, finite, newest-first sequence of a channel's messages.
///
/// Pages are fetched on demand until `limit` messages were yielded or the
/// history runs out. The iterator cannot be restarted; build a new one.
pub struct MessageIter<'a, C: ChannelClient + ?Sized> {
    client: &'a C,
    channel: String,
    remaining: usize,
    cursor: Option<i64>,
    buffer: VecDeque<PlatformMessage>,
    exhausted: bool,
}

impl<'a, C: ChannelClient + ?Sized> MessageIter<'a, C> {
    /// Iterate the most recent `limit` messages of `channel`
    pub fn new(client: &'a C, channel: &str, limit: usize) -> Self {
        Self {
            client,
            channel: channel.to_string(),
            remaining: limit,
            cursor: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Next message, or `None` once the limit or the history is reached
    pub async fn next(&mut self) -> Result<Option<PlatformMessage>, ClientError> {
        if self.remaining == 0 {
            return Ok(None);
        }

        if self.buffer.is_empty() && !self.exhausted {
            self.fill().await?;
        }

        match self.buffer.pop_front() {
            Some(message) => {
                self.remaining -= 1;
                Ok(Some(message))
            }
            None => Ok(None),
        }
    }

    async fn fill(&mut self) -> Result<(), ClientError> {
        let mut page = self.client.fetch_page(&self.channel, self.cursor).await?;

        // Guard against a platform that ignores the cursor and repeats a page
        if let Some(cursor) = self.cursor {
            page.retain(|m| m.id.map_or(true, |id| id < cursor));
        }

        if page.is_empty() {
            self.exhausted = true;
            return Ok(());
        }

        match page.iter().filter_map(|m| m.id).min() {
            Some(oldest) => self.cursor = Some(oldest),
            None => self.exhausted = true,
        }

        self.buffer.extend(page);
        Ok(())
    }
}
