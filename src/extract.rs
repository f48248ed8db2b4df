//! HTTP fetch plus a lightweight readability-style extraction.
//!
//! - title: `og:title`, else `<title>`
//! - site name: `og:site_name`
//! - content: `<article>` inner html, else `<body>`, else the whole document

use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::trace;

use crate::contract::{Article, Extractor};
use crate::error::ExtractError;

#[derive(Debug, Clone, Default)]
pub struct HttpExtractor {
    http: reqwest::Client,
}

impl HttpExtractor {
    pub fn new() -> Self {
        Self::default()
    }
}

fn meta_property(doc: &Html, property: &str) -> Option<String> {
    let sel = Selector::parse(&format!(r#"meta[property="{property}"]"#)).ok()?;
    doc.select(&sel)
        .filter_map(|node| node.value().attr("content"))
        .map(|c| c.trim().to_string())
        .find(|c| !c.is_empty())
}

fn first_text(doc: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    doc.select(&sel)
        .next()
        .map(|node| node.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

fn first_inner_html(doc: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    doc.select(&sel).next().map(|node| node.inner_html())
}

/// Pull an [`Article`] out of an html page.
pub fn extract_article(html: &str) -> Article {
    let doc = Html::parse_document(html);
    let title = meta_property(&doc, "og:title")
        .or_else(|| first_text(&doc, "title"))
        .unwrap_or_default();
    let site_name = meta_property(&doc, "og:site_name").unwrap_or_default();
    let content = first_inner_html(&doc, "article")
        .or_else(|| first_inner_html(&doc, "body"))
        .unwrap_or_else(|| doc.root_element().html());

    Article {
        title,
        site_name,
        content,
        format: "html".to_string(),
    }
}

fn transport_error(e: reqwest::Error, url: &str, timeout: Duration) -> ExtractError {
    if e.is_timeout() {
        ExtractError::Timeout {
            url: url.to_string(),
            timeout,
        }
    } else {
        ExtractError::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
        }
    }
}

#[async_trait]
impl Extractor for HttpExtractor {
    async fn extract(&self, url: &str, timeout: Duration) -> Result<Article, ExtractError> {
        trace!(url, ?timeout, "fetching page");
        let resp = self
            .http
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| transport_error(e, url, timeout))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ExtractError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = resp
            .text()
            .await
            .map_err(|e| transport_error(e, url, timeout))?;
        Ok(extract_article(&body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn prefers_open_graph_and_article() {
        let html = r#"<html><head>
            <title>Fallback title</title>
            <meta property="og:title" content="Real title">
            <meta property="og:site_name" content="Example Site">
            </head><body><nav>menu</nav><article><p>Hello</p></article></body></html>"#;
        let article = extract_article(html);
        assert_eq!(article.title, "Real title");
        assert_eq!(article.site_name, "Example Site");
        assert_eq!(article.content.trim(), "<p>Hello</p>");
        assert_eq!(article.format, "html");
    }

    #[test]
    fn falls_back_to_title_tag_and_body() {
        let html = "<html><head><title> Plain </title></head><body><p>Text</p></body></html>";
        let article = extract_article(html);
        assert_eq!(article.title, "Plain");
        assert_eq!(article.site_name, "");
        assert!(article.content.contains("<p>Text</p>"));
    }

    #[tokio::test]
    async fn fetches_and_extracts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/post"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<html><head><title>Post</title></head><body>x</body></html>"),
            )
            .mount(&server)
            .await;

        let article = HttpExtractor::new()
            .extract(&format!("{}/post", server.uri()), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(article.title, "Post");
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = HttpExtractor::new()
            .extract(&format!("{}/gone", server.uri()), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn slow_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let err = HttpExtractor::new()
            .extract(&format!("{}/slow", server.uri()), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Timeout { .. }));
    }
}
