//! Content search: Brave web search plus the streaming-service registry
//! that turns result URLs into Roku deep-link parameters.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

const BRAVE_SEARCH_URL: &str = "https://api.search.brave.com/res/v1/web/search";

const SEARCH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// A single web search result.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub description: String,
}

/// Brave Search API failure.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("search request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("search API returned {status}")]
    Api { status: u16 },
}

/// Async client for the Brave Web Search API.
#[derive(Debug, Clone)]
pub struct BraveSearchClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl BraveSearchClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: BRAVE_SEARCH_URL.to_string(),
        }
    }

    /// Override the API endpoint (tests).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Execute a web search and return parsed results.
    pub async fn search(&self, query: &str, count: u8) -> Result<Vec<SearchResult>, SearchError> {
        let count = count.clamp(1, 20);
        let response = self
            .http
            .get(&self.base_url)
            .query(&[("q", query), ("count", &count.to_string())])
            .header("Accept", "application/json")
            .header("X-Subscription-Token", &self.api_key)
            .timeout(SEARCH_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "Brave Search error response");
            return Err(SearchError::Api {
                status: status.as_u16(),
            });
        }

        let body: serde_json::Value = response.json().await?;
        let results = body["web"]["results"]
            .as_array()
            .map(|raw| {
                raw.iter()
                    .map(|r| SearchResult {
                        title: r["title"].as_str().unwrap_or_default().to_string(),
                        url: r["url"].as_str().unwrap_or_default().to_string(),
                        description: r["description"].as_str().unwrap_or_default().to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(results)
    }
}

/// A streaming service with Roku deep-link support.
pub struct StreamingService {
    pub name: &'static str,
    pub channel_id: u32,
    pub domains: &'static [&'static str],
    pub default_media_type: &'static str,
    url_patterns: Vec<Regex>,
}

impl StreamingService {
    /// Extract a content id from a URL belonging to this service.
    pub fn extract_content_id(&self, url: &str) -> Option<String> {
        self.url_patterns
            .iter()
            .find_map(|pattern| pattern.captures(url))
            .map(|captures| captures[1].to_string())
    }
}

static SERVICES: LazyLock<Vec<StreamingService>> = LazyLock::new(|| {
    vec![
        StreamingService {
            name: "netflix",
            channel_id: 12,
            domains: &["netflix.com"],
            default_media_type: "movie",
            url_patterns: vec![
                Regex::new(r"netflix\.com/(?:\w{2}(?:-\w{2})?/)?title/(\d+)").unwrap(),
                Regex::new(r"netflix\.com/(?:\w{2}(?:-\w{2})?/)?watch/(\d+)").unwrap(),
            ],
        },
        StreamingService {
            name: "hulu",
            channel_id: 2285,
            domains: &["hulu.com"],
            default_media_type: "movie",
            url_patterns: vec![
                Regex::new(
                    r"hulu\.com/(?:series|watch|movie)/(?:[a-z0-9-]+-)?([0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12})",
                )
                .unwrap(),
            ],
        },
        StreamingService {
            name: "disney_plus",
            channel_id: 291_097,
            domains: &["disneyplus.com"],
            default_media_type: "movie",
            url_patterns: vec![
                Regex::new(
                    r"disneyplus\.com/(?:\w{2}(?:-\w{2})?/)?(?:movies|series|video)/[^/]+/([0-9A-Za-z]{12})",
                )
                .unwrap(),
            ],
        },
        StreamingService {
            name: "max",
            channel_id: 61_322,
            domains: &["max.com", "play.max.com"],
            default_media_type: "movie",
            url_patterns: vec![
                Regex::new(
                    r"(?:play\.)?max\.com/(?:movie|show|episode|season|video)/([0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12})",
                )
                .unwrap(),
            ],
        },
        StreamingService {
            name: "apple_tv_plus",
            channel_id: 551_012,
            domains: &["tv.apple.com"],
            default_media_type: "movie",
            url_patterns: vec![
                Regex::new(
                    r"tv\.apple\.com/(?:\w{2}/)?(?:show|movie|episode)/[^/]+/(umc\.cmc\.[a-z0-9]+)",
                )
                .unwrap(),
            ],
        },
        StreamingService {
            name: "amazon_prime",
            channel_id: 13,
            domains: &["amazon.com", "primevideo.com"],
            default_media_type: "movie",
            url_patterns: vec![
                Regex::new(r"amazon\.com/gp/video/detail/([A-Z0-9]{10,})").unwrap(),
                Regex::new(r"amazon\.com/(?:[^/]+/)?dp/([A-Z0-9]{10,})").unwrap(),
                Regex::new(r"primevideo\.com/(?:[a-z-]+/)*detail/(?:[^/]+/)?([A-Z0-9]{10,})")
                    .unwrap(),
            ],
        },
    ]
});

/// Resolve the configured priority list to services, in order.
///
/// Unknown names are skipped with a warning; an empty result falls back to
/// every known service in default order.
pub fn active_services(priority: &[String]) -> Vec<&'static StreamingService> {
    if priority.is_empty() {
        return SERVICES.iter().collect();
    }
    let mut services = Vec::new();
    for name in priority {
        match SERVICES.iter().find(|s| s.name == name) {
            Some(service) => services.push(service),
            None => tracing::warn!(service = %name, "unknown streaming service in config"),
        }
    }
    if services.is_empty() {
        SERVICES.iter().collect()
    } else {
        services
    }
}

/// Build a `site:` filter clause covering the given services.
pub fn site_filters(services: &[&StreamingService]) -> String {
    services
        .iter()
        .flat_map(|service| service.domains.iter())
        .map(|domain| format!("site:{domain}"))
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Match a URL to a service and extract its content id, trying services in
/// priority order.
pub fn match_url<'a>(
    url: &str,
    services: &[&'a StreamingService],
) -> Option<(&'a StreamingService, String)> {
    services
        .iter()
        .find_map(|service| service.extract_content_id(url).map(|id| (*service, id)))
}

/// Build a search query from structured content fields.
pub fn build_search_query(
    title: &str,
    season: Option<u32>,
    episode: Option<u32>,
    episode_title: Option<&str>,
) -> String {
    let mut parts = vec![title.to_string()];
    if let Some(season) = season {
        parts.push(format!("Season {season}"));
    }
    if let Some(episode) = episode {
        parts.push(format!("Episode {episode}"));
    }
    if let Some(episode_title) = episode_title {
        parts.push(episode_title.to_string());
    }
    parts.join(" ")
}

/// A single streaming-service match with Roku launch details.
#[derive(Debug, Serialize)]
pub struct ContentMatch {
    pub service_name: String,
    pub channel_id: u32,
    pub content_id: String,
    pub source_url: String,
    pub title: String,
    pub media_type: String,
}

/// Result of searching for content across streaming services.
#[derive(Debug, Serialize)]
pub struct ContentSearchResult {
    pub success: bool,
    pub message: String,
    pub query: String,
    pub matches: Vec<ContentMatch>,
}

impl ContentSearchResult {
    fn failure(message: String, query: String) -> Self {
        Self {
            success: false,
            message,
            query,
            matches: Vec::new(),
        }
    }

    /// Serialize to the JSON string returned as the LLM tool result.
    pub fn to_tool_result(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Walk search results in order and keep the first URL that matches each
/// service; the returned matches stay in result order.
fn collect_matches(
    results: &[SearchResult],
    services: &[&StreamingService],
    media_type: Option<&str>,
) -> Vec<ContentMatch> {
    let mut matches: Vec<ContentMatch> = Vec::new();
    for result in results {
        let Some((service, content_id)) = match_url(&result.url, services) else {
            continue;
        };
        if matches.iter().any(|m| m.service_name == service.name) {
            continue;
        }
        tracing::info!(service = service.name, %content_id, url = %result.url, "matched");
        matches.push(ContentMatch {
            service_name: service.name.to_string(),
            channel_id: service.channel_id,
            content_id,
            source_url: result.url.clone(),
            title: result.title.clone(),
            media_type: media_type
                .map(str::to_string)
                .unwrap_or_else(|| service.default_media_type.to_string()),
        });
    }
    matches
}

/// Parameters for a content search.
#[derive(Debug, Default)]
pub struct ContentQuery {
    pub title: String,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub episode_title: Option<String>,
    pub media_type: Option<String>,
}

/// Search streaming services for content and return all matches.
///
/// Builds the query with `site:` filters, searches, matches every result
/// URL against the service registry, and keeps the first URL per service,
/// in result order.
pub async fn search_content(
    client: &BraveSearchClient,
    services: &[&StreamingService],
    query: &ContentQuery,
) -> ContentSearchResult {
    let base_query = build_search_query(
        &query.title,
        query.season,
        query.episode,
        query.episode_title.as_deref(),
    );
    let full_query = format!("{base_query} {}", site_filters(services));
    tracing::info!(query = %full_query, "searching for content");

    let results = match client.search(&full_query, 10).await {
        Ok(results) => results,
        Err(e) => {
            return ContentSearchResult::failure(format!("Search failed: {e}"), base_query);
        }
    };

    if results.is_empty() {
        return ContentSearchResult::failure(
            format!("No search results found for: {base_query}"),
            base_query,
        );
    }

    let matches = collect_matches(&results, services, query.media_type.as_deref());

    if matches.is_empty() {
        let urls: Vec<&str> = results.iter().take(5).map(|r| r.url.as_str()).collect();
        return ContentSearchResult::failure(
            format!(
                "Found {} results but no streaming service URLs matched. Top URLs: {urls:?}",
                results.len()
            ),
            base_query,
        );
    }

    let service_names: Vec<&str> = matches.iter().map(|m| m.service_name.as_str()).collect();
    ContentSearchResult {
        success: true,
        message: format!(
            "Found content on {} service(s): {}",
            matches.len(),
            service_names.join(", ")
        ),
        query: base_query,
        matches,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_services() -> Vec<&'static StreamingService> {
        active_services(&[])
    }

    #[test]
    fn netflix_title_url_matches() {
        let (service, id) =
            match_url("https://www.netflix.com/title/70153404", &all_services()).unwrap();
        assert_eq!(service.name, "netflix");
        assert_eq!(service.channel_id, 12);
        assert_eq!(id, "70153404");
    }

    #[test]
    fn netflix_locale_watch_url_matches() {
        let (service, id) =
            match_url("https://www.netflix.com/us/watch/81040344", &all_services()).unwrap();
        assert_eq!(service.name, "netflix");
        assert_eq!(id, "81040344");
    }

    #[test]
    fn hulu_series_url_matches() {
        let url = "https://www.hulu.com/series/seinfeld-9c67bf63-31bd-460d-9b23-1c38b9faa698";
        let (service, id) = match_url(url, &all_services()).unwrap();
        assert_eq!(service.name, "hulu");
        assert_eq!(id, "9c67bf63-31bd-460d-9b23-1c38b9faa698");
    }

    #[test]
    fn apple_tv_show_url_matches() {
        let url = "https://tv.apple.com/us/show/severance/umc.cmc.1srk2goyh2q2zdxcx605w8vtx";
        let (service, id) = match_url(url, &all_services()).unwrap();
        assert_eq!(service.name, "apple_tv_plus");
        assert_eq!(id, "umc.cmc.1srk2goyh2q2zdxcx605w8vtx");
    }

    #[test]
    fn prime_detail_url_matches() {
        let url = "https://www.amazon.com/gp/video/detail/B09PQ9F444";
        let (service, id) = match_url(url, &all_services()).unwrap();
        assert_eq!(service.name, "amazon_prime");
        assert_eq!(id, "B09PQ9F444");
    }

    #[test]
    fn unmatched_url_returns_none() {
        assert!(match_url("https://en.wikipedia.org/wiki/Seinfeld", &all_services()).is_none());
    }

    #[test]
    fn priority_order_is_respected() {
        let services = active_services(&["hulu".to_string(), "netflix".to_string()]);
        assert_eq!(services.len(), 2);
        assert_eq!(services[0].name, "hulu");
        assert_eq!(services[1].name, "netflix");
    }

    #[test]
    fn unknown_service_names_fall_back_to_all() {
        let services = active_services(&["plex".to_string()]);
        assert_eq!(services.len(), SERVICES.len());
    }

    #[test]
    fn site_filters_cover_all_domains() {
        let filters = site_filters(&active_services(&[
            "netflix".to_string(),
            "max".to_string(),
        ]));
        assert_eq!(filters, "site:netflix.com OR site:max.com OR site:play.max.com");
    }

    #[test]
    fn build_query_includes_episode_fields() {
        let query = build_search_query("Severance", Some(1), Some(3), Some("In Perpetuity"));
        assert_eq!(query, "Severance Season 1 Episode 3 In Perpetuity");
    }

    #[test]
    fn build_query_title_only() {
        assert_eq!(build_search_query("Seinfeld", None, None, None), "Seinfeld");
    }

    #[test]
    fn collect_matches_dedupes_per_service_in_result_order() {
        let results = vec![
            SearchResult {
                title: "Seinfeld | Hulu".to_string(),
                url: "https://www.hulu.com/series/seinfeld-9c67bf63-31bd-460d-9b23-1c38b9faa698"
                    .to_string(),
                description: String::new(),
            },
            SearchResult {
                title: "Seinfeld - Wikipedia".to_string(),
                url: "https://en.wikipedia.org/wiki/Seinfeld".to_string(),
                description: String::new(),
            },
            SearchResult {
                title: "Watch Seinfeld | Netflix".to_string(),
                url: "https://www.netflix.com/title/70153404".to_string(),
                description: String::new(),
            },
            SearchResult {
                title: "Seinfeld on Netflix".to_string(),
                url: "https://www.netflix.com/watch/80107103".to_string(),
                description: String::new(),
            },
        ];

        // Netflix outranks Hulu in service priority, but matches keep the
        // search-result order and only the first Netflix URL survives.
        let matches = collect_matches(&results, &all_services(), None);
        let names: Vec<&str> = matches.iter().map(|m| m.service_name.as_str()).collect();
        assert_eq!(names, vec!["hulu", "netflix"]);
        assert_eq!(matches[1].content_id, "70153404");
    }

    #[test]
    fn collect_matches_applies_media_type_override() {
        let results = vec![SearchResult {
            title: "Watch Seinfeld | Netflix".to_string(),
            url: "https://www.netflix.com/title/70153404".to_string(),
            description: String::new(),
        }];
        let matches = collect_matches(&results, &all_services(), Some("series"));
        assert_eq!(matches[0].media_type, "series");
    }

    #[test]
    fn content_search_result_serializes_matches() {
        let result = ContentSearchResult {
            success: true,
            message: "Found content on 1 service(s): netflix".to_string(),
            query: "Seinfeld".to_string(),
            matches: vec![ContentMatch {
                service_name: "netflix".to_string(),
                channel_id: 12,
                content_id: "70153404".to_string(),
                source_url: "https://www.netflix.com/title/70153404".to_string(),
                title: "Seinfeld".to_string(),
                media_type: "series".to_string(),
            }],
        };
        let json = result.to_tool_result();
        assert!(json.contains("\"channel_id\": 12"));
        assert!(json.contains("\"success\": true"));
    }
}
