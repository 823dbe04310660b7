//! Public channel preview client.
//!
//! Reads `<base_url>/s/<channel>` pages, which list a public channel's recent
//! posts without requiring an account. Older posts are reached with
//! `?before=<id>`. HTTP 429 is surfaced as a flood wait using `Retry-After`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Proxy, Response, StatusCode};
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, warn};

use super::ChannelClient;
use crate::error::ClientError;
use crate::models::{MediaKind, PlatformMessage};

/// Fallback wait when the platform rate limits without `Retry-After`
const DEFAULT_FLOOD_WAIT_SECS: u64 = 30;

/// Connection settings for [`WebPreviewClient`]
#[derive(Debug, Clone)]
pub struct WebClientSettings {
    /// Site root, e.g. `https://t.me`
    pub base_url: String,
    /// User-Agent header sent with every request
    pub user_agent: String,
    /// Optional HTTP or SOCKS proxy
    pub proxy_url: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
}

/// [`ChannelClient`] backed by the platform's public web preview
pub struct WebPreviewClient {
    settings: WebClientSettings,
    http: Option<Client>,
}

impl WebPreviewClient {
    /// Unconnected client; `authenticate` opens the session
    pub fn new(settings: WebClientSettings) -> Self {
        Self { settings, http: None }
    }

    fn http(&self) -> Result<&Client, ClientError> {
        self.http.as_ref().ok_or(ClientError::NotConnected)
    }

    fn page_url(&self, channel: &str, before: Option<i64>) -> String {
        let base = self.settings.base_url.trim_end_matches('/');
        match before {
            Some(id) => format!("{base}/s/{channel}?before={id}"),
            None => format!("{base}/s/{channel}"),
        }
    }

    /// Map rate limiting and error statuses onto client errors
    fn check_status(response: Response, url: &str) -> Result<Response, ClientError> {
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let seconds = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(DEFAULT_FLOOD_WAIT_SECS);
            return Err(ClientError::FloodWait { seconds });
        }
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ChannelClient for WebPreviewClient {
    fn name(&self) -> &'static str {
        "web-preview"
    }

    async fn authenticate(&mut self) -> Result<(), ClientError> {
        let mut builder = Client::builder()
            .user_agent(self.settings.user_agent.clone())
            .timeout(self.settings.timeout)
            .gzip(true);

        if let Some(proxy_url) = &self.settings.proxy_url {
            let proxy = Proxy::all(proxy_url)
                .map_err(|e| ClientError::Authentication(format!("invalid proxy {proxy_url}: {e}")))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| ClientError::Authentication(e.to_string()))?;

        // Connection problems surface here rather than mid-scrape
        let reply = client
            .head(&self.settings.base_url)
            .send()
            .await
            .map_err(|e| ClientError::Authentication(format!("{} unreachable: {e}", self.settings.base_url)))?;
        debug!(status = reply.status().as_u16(), "Platform reachable");

        self.http = Some(client);
        info!(base_url = %self.settings.base_url, "Session active");
        Ok(())
    }

    async fn fetch_page(&self, channel: &str, before: Option<i64>) -> Result<Vec<PlatformMessage>, ClientError> {
        let url = self.page_url(channel, before);
        let response = self.http()?.get(&url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(ClientError::ChannelNotFound(channel.to_string()));
        }

        let body = Self::check_status(response, &url)?.text().await?;
        let page = parse_preview_page(&body)?;
        debug!(channel, ?before, count = page.len(), "Fetched page");
        Ok(page)
    }

    async fn download_media(&self, message: &PlatformMessage, destination: &Path) -> Result<PathBuf, ClientError> {
        let id = message.id.unwrap_or_default();
        let Some(MediaKind::Photo { url }) = &message.media else {
            return Err(ClientError::NoMedia(id));
        };

        let response = self.http()?.get(url).send().await?;
        let bytes = Self::check_status(response, url)?.bytes().await?;

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(destination, &bytes).await?;

        Ok(destination.to_path_buf())
    }

    async fn disconnect(&mut self) {
        if self.http.take().is_some() {
            info!("Session closed");
        }
    }
}

fn selector(css: &str) -> Result<Selector, ClientError> {
    Selector::parse(css).map_err(|e| ClientError::Parse(format!("bad selector {css}: {e}")))
}

/// Parse a channel preview page into platform messages, newest first.
///
/// Posts that lack an id or timestamp are still returned with those fields
/// empty; normalization decides whether to keep them.
pub fn parse_preview_page(html: &str) -> Result<Vec<PlatformMessage>, ClientError> {
    let document = Html::parse_document(html);

    let message_sel = selector("div.tgme_widget_message[data-post]")?;
    let time_sel = selector(".tgme_widget_message_date time")?;
    let text_sel = selector(".tgme_widget_message_text")?;
    let photo_sel = selector("a.tgme_widget_message_photo_wrap")?;
    let other_media_sel = selector(
        ".tgme_widget_message_video_player, .tgme_widget_message_document, \
         .tgme_widget_message_voice, .tgme_widget_message_roundvideo, .tgme_widget_message_sticker",
    )?;
    let views_sel = selector(".tgme_widget_message_views")?;
    let background_url =
        Regex::new(r#"url\(['"]?([^'")]+)['"]?\)"#).map_err(|e| ClientError::Parse(e.to_string()))?;

    let mut messages = Vec::new();
    for element in document.select(&message_sel) {
        let id = element
            .value()
            .attr("data-post")
            .and_then(|post| post.rsplit('/').next())
            .and_then(|id| id.parse::<i64>().ok());

        let posted_at = element
            .select(&time_sel)
            .next()
            .and_then(|t| t.value().attr("datetime"))
            .and_then(|dt| DateTime::parse_from_rfc3339(dt).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let text = element.select(&text_sel).next().map(text_with_breaks);

        let photo_url = element
            .select(&photo_sel)
            .next()
            .and_then(|photo| photo.value().attr("style"))
            .and_then(|style| background_url.captures(style))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string());

        let media = match photo_url {
            Some(url) => Some(MediaKind::Photo { url }),
            None if element.select(&other_media_sel).next().is_some() => Some(MediaKind::Other),
            None => None,
        };

        let views = element
            .select(&views_sel)
            .next()
            .and_then(|v| parse_count(&v.text().collect::<String>()));

        if id.is_none() {
            warn!("Preview post without a parsable id");
        }

        messages.push(PlatformMessage {
            id,
            posted_at,
            text,
            media,
            views,
            // The preview does not expose forward counters
            forwards: None,
        });
    }

    // Pages list posts oldest first
    messages.reverse();
    Ok(messages)
}

/// Collect an element's text, turning `<br>` into newlines
fn text_with_breaks(element: ElementRef<'_>) -> String {
    let mut text = String::new();
    for node in element.descendants() {
        match node.value() {
            Node::Text(t) => text.push_str(t),
            Node::Element(e) if e.name() == "br" => text.push('\n'),
            _ => {}
        }
    }
    text.trim().to_string()
}

/// Parse an abbreviated counter such as `523`, `1.2K` or `3M`
pub fn parse_count(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let (number, multiplier) = match raw.chars().last()? {
        'K' | 'k' => (&raw[..raw.len() - 1], 1_000.0),
        'M' | 'm' => (&raw[..raw.len() - 1], 1_000_000.0),
        'B' | 'b' => (&raw[..raw.len() - 1], 1_000_000_000.0),
        _ => (raw, 1.0),
    };

    let number = number.trim().replace(',', "");
    if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }

    let value = number.parse::<f64>().ok()? * multiplier;
    if !value.is_finite() || value >= i64::MAX as f64 {
        return None;
    }
    #[allow(clippy::cast_possible_truncation)]
    Some(value.round() as i64)
}
