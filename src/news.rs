use std::time::Duration;

use chrono::DateTime;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::NewsConfig;

/// Results requested per page from the search API
pub const PAGE_SIZE: u64 = 10;

pub const USER_AGENT: &str = "Newsdesk/1.0";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Source {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub source: Option<Source>,
    pub author: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub url_to_image: Option<String>,
    pub published_at: Option<String>,
}

impl Article {
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("Untitled")
    }

    pub fn link(&self) -> &str {
        self.url.as_deref().unwrap_or("#")
    }

    pub fn summary(&self) -> &str {
        self.description.as_deref().unwrap_or("")
    }

    pub fn source_name(&self) -> &str {
        self.source
            .as_ref()
            .and_then(|s| s.name.as_deref())
            .unwrap_or("")
    }

    pub fn image(&self) -> &str {
        self.url_to_image.as_deref().unwrap_or("")
    }

    /// Publication date for display, e.g. "Mar 04, 2024"
    pub fn published_date(&self) -> String {
        match self.published_at.as_deref() {
            Some(raw) => DateTime::parse_from_rfc3339(raw)
                .map(|dt| dt.format("%b %d, %Y").to_string())
                .unwrap_or_else(|_| raw.to_string()),
            None => String::new(),
        }
    }

    /// Text read aloud by the audio endpoint
    pub fn speech_text(&self) -> &str {
        match self.description.as_deref() {
            Some(d) if !d.trim().is_empty() => d,
            _ => "No description available",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewsPage {
    pub articles: Vec<Article>,
    pub total_results: u64,
}

impl NewsPage {
    pub fn total_pages(&self) -> u64 {
        page_count(self.total_results)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    articles: Vec<Article>,
    #[serde(default)]
    total_results: u64,
}

/// Number of pages needed to show `total_results` at [`PAGE_SIZE`] per page.
pub fn page_count(total_results: u64) -> u64 {
    total_results.div_ceil(PAGE_SIZE)
}

/// Prev/next navigation state for a 1-based page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u64,
    pub total_pages: u64,
}

impl Pagination {
    pub fn new(page: u64, total_results: u64) -> Self {
        Self {
            page: page.max(1),
            total_pages: page_count(total_results),
        }
    }

    pub fn has_prev(&self) -> bool {
        self.page > 1
    }

    pub fn has_next(&self) -> bool {
        self.page < self.total_pages
    }

    pub fn prev(&self) -> u64 {
        self.page.saturating_sub(1).max(1)
    }

    pub fn next(&self) -> u64 {
        self.page + 1
    }
}

pub struct NewsClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl NewsClient {
    pub fn new(config: &NewsConfig, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    /// Search articles matching `query`. A non-200 answer from the API is
    /// treated as "no results"; transport and decode failures are errors.
    pub async fn search(&self, query: &str, page: u64) -> anyhow::Result<NewsPage> {
        let page = page.max(1);
        info!("Searching news for '{}' (page {})", query, page);

        let response = self
            .client
            .get(format!("{}/v2/everything", self.base_url))
            .header("X-Api-Key", &self.api_key)
            .query(&[
                ("q", query.to_string()),
                ("page", page.to_string()),
                ("pageSize", PAGE_SIZE.to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            warn!("News API error: {} - {}", status, body);
            return Ok(NewsPage::default());
        }

        let data: SearchResponse = response.json().await?;
        Ok(NewsPage {
            articles: data.articles,
            total_results: data.total_results,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> NewsClient {
        let config = NewsConfig {
            api_key: "test-key".to_string(),
            base_url: server.uri(),
        };
        NewsClient::new(&config, Duration::from_secs(5)).unwrap()
    }

    mod page_count_tests {
        use super::*;

        #[test]
        fn test_zero_results_has_no_pages() {
            assert_eq!(page_count(0), 0);
        }

        #[test]
        fn test_exact_multiple() {
            assert_eq!(page_count(10), 1);
            assert_eq!(page_count(100), 10);
        }

        #[test]
        fn test_partial_page_rounds_up() {
            assert_eq!(page_count(1), 1);
            assert_eq!(page_count(11), 2);
            assert_eq!(page_count(99), 10);
        }

        #[test]
        fn test_matches_ceiling_division() {
            for total in 0..250u64 {
                let expected = (total / PAGE_SIZE) + u64::from(total % PAGE_SIZE != 0);
                assert_eq!(page_count(total), expected, "total = {}", total);
            }
        }
    }

    mod pagination_tests {
        use super::*;

        #[test]
        fn test_first_page() {
            let p = Pagination::new(1, 35);
            assert_eq!(p.total_pages, 4);
            assert!(!p.has_prev());
            assert!(p.has_next());
            assert_eq!(p.next(), 2);
        }

        #[test]
        fn test_last_page() {
            let p = Pagination::new(4, 35);
            assert!(p.has_prev());
            assert!(!p.has_next());
            assert_eq!(p.prev(), 3);
        }

        #[test]
        fn test_page_zero_clamped() {
            let p = Pagination::new(0, 5);
            assert_eq!(p.page, 1);
            assert_eq!(p.prev(), 1);
        }

        #[test]
        fn test_no_results() {
            let p = Pagination::new(1, 0);
            assert!(!p.has_prev());
            assert!(!p.has_next());
        }
    }

    mod article_tests {
        use super::*;

        #[test]
        fn test_missing_fields_fall_back() {
            let article = Article::default();
            assert_eq!(article.display_title(), "Untitled");
            assert_eq!(article.link(), "#");
            assert_eq!(article.source_name(), "");
            assert_eq!(article.published_date(), "");
            assert_eq!(article.speech_text(), "No description available");
        }

        #[test]
        fn test_blank_description_uses_default_speech() {
            let article = Article {
                description: Some("   ".to_string()),
                ..Default::default()
            };
            assert_eq!(article.speech_text(), "No description available");
        }

        #[test]
        fn test_published_date_formatting() {
            let article = Article {
                published_at: Some("2024-03-04T10:15:00Z".to_string()),
                ..Default::default()
            };
            assert_eq!(article.published_date(), "Mar 04, 2024");

            let odd = Article {
                published_at: Some("yesterday".to_string()),
                ..Default::default()
            };
            assert_eq!(odd.published_date(), "yesterday");
        }

        #[test]
        fn test_deserialize_api_article() {
            let article: Article = serde_json::from_value(json!({
                "source": {"id": null, "name": "The Wire"},
                "author": "Someone",
                "title": "Headline",
                "description": "Body",
                "url": "https://example.com/a",
                "urlToImage": "https://example.com/a.jpg",
                "publishedAt": "2024-03-04T10:15:00Z",
                "content": "ignored"
            }))
            .unwrap();

            assert_eq!(article.source_name(), "The Wire");
            assert_eq!(article.image(), "https://example.com/a.jpg");
            assert_eq!(article.link(), "https://example.com/a");
        }
    }

    mod search_tests {
        use super::*;

        #[tokio::test]
        async fn test_search_returns_articles_and_total() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/v2/everything"))
                .and(query_param("q", "rust"))
                .and(query_param("page", "2"))
                .and(query_param("pageSize", "10"))
                .and(header("X-Api-Key", "test-key"))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "status": "ok",
                    "totalResults": 21,
                    "articles": [
                        {"title": "One", "description": "First", "url": "https://one.example.com"},
                        {"title": "Two", "url": "https://two.example.com"}
                    ]
                })))
                .expect(1)
                .mount(&server)
                .await;

            let page = client_for(&server).search("rust", 2).await.unwrap();

            assert_eq!(page.total_results, 21);
            assert_eq!(page.total_pages(), 3);
            assert_eq!(page.articles.len(), 2);
            assert_eq!(page.articles[0].display_title(), "One");
            assert!(page.articles[1].description.is_none());
        }

        #[tokio::test]
        async fn test_non_200_is_empty_page() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/v2/everything"))
                .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                    "status": "error",
                    "code": "rateLimited"
                })))
                .mount(&server)
                .await;

            let page = client_for(&server).search("rust", 1).await.unwrap();

            assert!(page.articles.is_empty());
            assert_eq!(page.total_results, 0);
        }

        #[tokio::test]
        async fn test_malformed_body_is_error() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/v2/everything"))
                .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
                .mount(&server)
                .await;

            let result = client_for(&server).search("rust", 1).await;
            assert!(result.is_err());
        }

        #[tokio::test]
        async fn test_page_zero_requests_first_page() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/v2/everything"))
                .and(query_param("page", "1"))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "totalResults": 0,
                    "articles": []
                })))
                .expect(1)
                .mount(&server)
                .await;

            let page = client_for(&server).search("rust", 0).await.unwrap();
            assert!(page.articles.is_empty());
        }
    }
}
