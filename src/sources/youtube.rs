use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use regex::Regex;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, info};
use url::Url;

use super::{SearchError, SearchProvider};
use crate::music::item::QueueItem;

const API_BASE: &str = "https://www.googleapis.com/youtube/v3";
const PLAYLIST_PAGE_SIZE: &str = "50";
const MULTI_SEARCH_RESULTS: &str = "50";

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    id: SearchResultId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResultId {
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaylistEntry {
    snippet: PlaylistSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistSnippet {
    resource_id: SearchResultId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Video {
    id: String,
    snippet: VideoSnippet,
    status: VideoStatus,
    content_details: ContentDetails,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoSnippet {
    title: String,
    channel_title: String,
    #[serde(default)]
    thumbnails: Thumbnails,
}

#[derive(Debug, Default, Deserialize)]
struct Thumbnails {
    default: Option<Thumbnail>,
    medium: Option<Thumbnail>,
    high: Option<Thumbnail>,
}

#[derive(Debug, Clone, Deserialize)]
struct Thumbnail {
    url: String,
}

#[derive(Debug, Deserialize)]
struct VideoStatus {
    #[serde(default)]
    embeddable: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContentDetails {
    duration: String,
    #[serde(default)]
    content_rating: ContentRating,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContentRating {
    yt_rating: Option<String>,
}

impl Video {
    fn is_playable(&self) -> bool {
        self.status.embeddable
            && self.content_details.content_rating.yt_rating.as_deref() != Some("ytAgeRestricted")
    }
}

/// Qué pide una consulta de búsqueda.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryKind {
    Video(String),
    Playlist(String),
    Text,
}

/// Reconoce URLs de video y de playlist de YouTube.
pub fn classify(query: &str) -> QueryKind {
    let Ok(url) = Url::parse(query) else {
        return QueryKind::Text;
    };

    if !url.host_str().is_some_and(|host| host.contains("youtube")) {
        return QueryKind::Text;
    }

    let param = |name: &str| {
        url.query_pairs()
            .find(|(key, value)| key == name && !value.is_empty())
            .map(|(_, value)| value.into_owned())
    };

    let kind = match url.path() {
        "/watch" => param("v").map(QueryKind::Video),
        "/playlist" => param("list").map(QueryKind::Playlist),
        _ => None,
    };

    kind.unwrap_or(QueryKind::Text)
}

/// Rotación de API keys: cada key se usa una vez por ronda, en orden aleatorio.
pub struct KeyPool {
    keys: Vec<String>,
    remaining: Mutex<Vec<String>>,
}

impl KeyPool {
    pub fn new(keys: Vec<String>) -> Self {
        Self {
            remaining: Mutex::new(keys.clone()),
            keys,
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn next_key(&self) -> Option<String> {
        let mut remaining = self.remaining.lock();
        if remaining.is_empty() {
            remaining.extend(self.keys.iter().cloned());
        }
        if remaining.is_empty() {
            return None;
        }

        let index = rand::thread_rng().gen_range(0..remaining.len());
        Some(remaining.swap_remove(index))
    }
}

/// Búsqueda sobre YouTube Data API v3.
pub struct YouTubeSearcher {
    client: reqwest::Client,
    keys: KeyPool,
    max_results: usize,
    duration_pattern: Regex,
}

impl YouTubeSearcher {
    pub fn new(keys: Vec<String>, max_results: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        let duration_pattern = Regex::new(
            r"^P(?:(\d+)W)?(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?)?$",
        )?;

        Ok(Self {
            client,
            keys: KeyPool::new(keys),
            max_results,
            duration_pattern,
        })
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Convierte una duración ISO 8601 (`PT1H2M3S`) a segundos.
    pub fn parse_duration(&self, duration: &str) -> u64 {
        let Some(captures) = self.duration_pattern.captures(duration) else {
            return 0;
        };

        let field = |index: usize| {
            captures
                .get(index)
                .and_then(|m| m.as_str().parse::<u64>().ok())
                .unwrap_or(0)
        };

        field(1) * 604_800 + field(2) * 86_400 + field(3) * 3_600 + field(4) * 60 + field(5)
    }

    async fn get<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        key: &str,
        params: &[(&str, &str)],
    ) -> Result<ListResponse<T>, SearchError> {
        let response = self
            .client
            .get(format!("{}/{}", API_BASE, endpoint))
            .query(params)
            .query(&[("key", key)])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            error!("❌ YouTube API error en {}: {} - {}", endpoint, status, message);
            return Err(SearchError::Api { status, message });
        }

        Ok(response.json().await?)
    }

    async fn query_videos(&self, ids: Vec<String>, key: &str) -> Result<Vec<QueueItem>, SearchError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let ids = ids.join(",");
        let response: ListResponse<Video> = self
            .get(
                "videos",
                key,
                &[("part", "id,snippet,status,contentDetails"), ("id", ids.as_str())],
            )
            .await?;

        let items = response
            .items
            .into_iter()
            .filter(Video::is_playable)
            .take(self.max_results)
            .map(|video| {
                let duration = self.parse_duration(&video.content_details.duration);
                let thumbnails = video.snippet.thumbnails;
                let thumbnail = thumbnails.high.or(thumbnails.medium).or(thumbnails.default);

                let mut item = QueueItem::new(video.id, video.snippet.title)
                    .with_channel_name(video.snippet.channel_title)
                    .with_duration(duration);
                if let Some(thumbnail) = thumbnail {
                    item = item.with_thumbnail(thumbnail.url);
                }
                item
            })
            .collect();

        Ok(items)
    }
}

#[async_trait]
impl SearchProvider for YouTubeSearcher {
    async fn search(&self, query: &str, multi: bool) -> Result<Vec<QueueItem>, SearchError> {
        let key = self.keys.next_key().ok_or(SearchError::NoKeys)?;
        let kind = if multi { QueryKind::Text } else { classify(query) };
        debug!("🔍 Búsqueda YouTube API v3 ({:?}): {}", kind, query);

        let ids = match kind {
            QueryKind::Video(id) => vec![id],
            QueryKind::Playlist(list) => {
                let response: ListResponse<PlaylistEntry> = self
                    .get(
                        "playlistItems",
                        &key,
                        &[
                            ("part", "snippet"),
                            ("playlistId", list.as_str()),
                            ("maxResults", PLAYLIST_PAGE_SIZE),
                        ],
                    )
                    .await?;

                response
                    .items
                    .into_iter()
                    .filter_map(|entry| entry.snippet.resource_id.video_id)
                    .collect()
            }
            QueryKind::Text => {
                let response: ListResponse<SearchResult> = self
                    .get(
                        "search",
                        &key,
                        &[
                            ("part", "id"),
                            ("q", query),
                            ("type", "video"),
                            ("videoEmbeddable", "true"),
                            ("safeSearch", "strict"),
                            ("maxResults", if multi { MULTI_SEARCH_RESULTS } else { "1" }),
                        ],
                    )
                    .await?;

                response
                    .items
                    .into_iter()
                    .filter_map(|result| result.id.video_id)
                    .collect()
            }
        };

        let items = self.query_videos(ids, &key).await?;
        info!("✅ YouTube API v3: {} resultados para '{}'", items.len(), query);
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    #[test]
    fn classify_recognizes_watch_and_playlist_urls() {
        assert_eq!(
            classify("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=10"),
            QueryKind::Video("dQw4w9WgXcQ".to_string())
        );
        assert_eq!(
            classify("https://music.youtube.com/playlist?list=PL123"),
            QueryKind::Playlist("PL123".to_string())
        );
        assert_eq!(classify("https://www.youtube.com/watch"), QueryKind::Text);
        assert_eq!(classify("https://example.com/watch?v=abc"), QueryKind::Text);
        assert_eq!(classify("never gonna give you up"), QueryKind::Text);
    }

    #[test]
    fn parses_iso8601_durations() {
        let searcher = YouTubeSearcher::new(vec![], 10).unwrap();

        assert_eq!(searcher.parse_duration("PT3M20S"), 200);
        assert_eq!(searcher.parse_duration("PT1H2M3S"), 3723);
        assert_eq!(searcher.parse_duration("P1DT1S"), 86_401);
        assert_eq!(searcher.parse_duration("PT45S"), 45);
        assert_eq!(searcher.parse_duration("P0D"), 0);
        assert_eq!(searcher.parse_duration("garbage"), 0);
    }

    #[test]
    fn key_pool_uses_every_key_once_per_round() {
        let keys: Vec<String> = (0..4).map(|i| format!("key-{}", i)).collect();
        let pool = KeyPool::new(keys.clone());

        let round: HashSet<String> = (0..4).filter_map(|_| pool.next_key()).collect();
        assert_eq!(round.len(), 4);

        // Tras agotarse, la ronda se rellena
        assert!(pool.next_key().is_some_and(|key| keys.contains(&key)));
    }

    #[test]
    fn empty_key_pool_yields_nothing() {
        let pool = KeyPool::new(vec![]);
        assert_eq!(pool.len(), 0);
        assert_eq!(pool.next_key(), None);
    }

    #[test]
    fn filters_unembeddable_and_age_restricted_videos() {
        let raw = r#"{"items": [
            {"id": "a", "snippet": {"title": "A", "channelTitle": "C"},
             "status": {"embeddable": true},
             "contentDetails": {"duration": "PT1M", "contentRating": {}}},
            {"id": "b", "snippet": {"title": "B", "channelTitle": "C"},
             "status": {"embeddable": false},
             "contentDetails": {"duration": "PT1M"}},
            {"id": "c", "snippet": {"title": "C", "channelTitle": "C"},
             "status": {"embeddable": true},
             "contentDetails": {"duration": "PT1M", "contentRating": {"ytRating": "ytAgeRestricted"}}}
        ]}"#;

        let response: ListResponse<Video> = serde_json::from_str(raw).unwrap();
        let playable: Vec<String> = response
            .items
            .into_iter()
            .filter(Video::is_playable)
            .map(|video| video.id)
            .collect();

        assert_eq!(playable, vec!["a".to_string()]);
    }
}
