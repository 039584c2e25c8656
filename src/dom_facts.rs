use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

use crate::cmd::{HttpMethod, HttpResponseType};
use crate::http::{HttpRequest, HttpTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash, Default)]
pub enum DomFactsKind {
    #[default]
    XComGallery,
}

/// Point-in-time snapshot of the page conditions the gallery overlay cares
/// about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomFacts {
    pub kind: DomFactsKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub has_xeg_overlay: bool,
    #[serde(rename = "hasXComMediaViewer")]
    pub has_xcom_media_viewer: bool,
    pub media_elements_count: usize,
}

pub trait DomFactsProvider: Send + Sync {
    fn take(&self, kind: DomFactsKind) -> Result<DomFacts>;
}

/// Supplies the markup a snapshot is computed from.
pub trait PageSource: Send + Sync {
    fn url(&self) -> Option<String>;
    fn html(&self) -> Result<String>;
}

static OVERLAY: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(
        r#"[data-xeg-gallery], .xeg-gallery-container, [data-xeg-role="gallery"]"#,
    )
    .expect("valid overlay selector")
});

static MEDIA_VIEWER: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"[aria-modal="true"][role="dialog"]"#).expect("valid viewer selector")
});

static MEDIA_ELEMENTS: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(
        r#"[data-testid="tweetPhoto"] img, [data-testid="videoPlayer"] video, img[src*="pbs.twimg.com/media"]"#,
    )
    .expect("valid media selector")
});

static MEDIA_PAGE_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/status/\d+/(photo|video)/\d+").expect("valid media path regex"));

/// Computes facts from raw page markup.
pub fn extract_facts(kind: DomFactsKind, url: Option<&str>, html: &str) -> DomFacts {
    let document = Html::parse_document(html);

    let has_xeg_overlay = document.select(&OVERLAY).next().is_some();
    let on_media_page = url.is_some_and(|u| MEDIA_PAGE_PATH.is_match(u));
    let has_xcom_media_viewer = on_media_page || document.select(&MEDIA_VIEWER).next().is_some();

    let mut seen = HashSet::new();
    for element in document.select(&MEDIA_ELEMENTS) {
        seen.insert(element.id());
    }

    DomFacts {
        kind,
        url: url.map(str::to_string),
        has_xeg_overlay,
        has_xcom_media_viewer,
        media_elements_count: seen.len(),
    }
}

pub struct SnapshotFacts<S> {
    source: S,
}

impl<S: PageSource> SnapshotFacts<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }
}

impl<S: PageSource> DomFactsProvider for SnapshotFacts<S> {
    fn take(&self, kind: DomFactsKind) -> Result<DomFacts> {
        let html = self.source.html().context("dom facts: read page")?;
        let url = self.source.url();
        Ok(extract_facts(kind, url.as_deref(), &html))
    }
}

#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    url: Option<String>,
}

impl FileSource {
    pub fn new(path: PathBuf, url: Option<String>) -> Self {
        Self { path, url }
    }
}

impl PageSource for FileSource {
    fn url(&self) -> Option<String> {
        self.url.clone()
    }

    fn html(&self) -> Result<String> {
        fs::read_to_string(&self.path)
            .with_context(|| format!("dom facts: read snapshot {}", self.path.display()))
    }
}

pub struct HttpPageSource {
    http: Arc<dyn HttpTransport>,
    url: String,
}

impl HttpPageSource {
    pub fn new(http: Arc<dyn HttpTransport>, url: String) -> Self {
        Self { http, url }
    }
}

impl PageSource for HttpPageSource {
    fn url(&self) -> Option<String> {
        Some(self.url.clone())
    }

    fn html(&self) -> Result<String> {
        let response = self.http.request(&HttpRequest {
            url: self.url.clone(),
            method: HttpMethod::Get,
            headers: None,
            body: None,
            response_type: HttpResponseType::Text,
        })?;
        if !(200..300).contains(&response.status) {
            bail!("dom facts: page returned status {}", response.status);
        }
        Ok(response.body.as_str().unwrap_or_default().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const TIMELINE: &str = r#"
<html><body>
  <article data-testid="tweet">
    <div data-testid="tweetPhoto"><img src="https://pbs.twimg.com/media/AAA?format=jpg&name=small"></div>
    <div data-testid="tweetPhoto"><img src="https://pbs.twimg.com/media/BBB?format=png"></div>
    <div data-testid="videoPlayer"><video src="blob:https://x.com/1"></video></div>
  </article>
  <img src="https://abs.twimg.com/emoji/v2/1f600.svg">
</body></html>
"#;

    #[test]
    fn counts_media_once() {
        let facts = extract_facts(
            DomFactsKind::XComGallery,
            Some("https://x.com/home"),
            TIMELINE,
        );
        assert_eq!(facts.media_elements_count, 3);
        assert!(!facts.has_xeg_overlay);
        assert!(!facts.has_xcom_media_viewer);
    }

    #[test]
    fn detects_overlay_and_viewer() {
        let html = r#"<div data-xeg-role="gallery"></div><div role="dialog" aria-modal="true"></div>"#;
        let facts = extract_facts(DomFactsKind::XComGallery, None, html);
        assert!(facts.has_xeg_overlay);
        assert!(facts.has_xcom_media_viewer);
        assert_eq!(facts.url, None);
    }

    #[test]
    fn media_page_url_implies_viewer() {
        let facts = extract_facts(
            DomFactsKind::XComGallery,
            Some("https://x.com/alice/status/1234567890/photo/2"),
            "<html></html>",
        );
        assert!(facts.has_xcom_media_viewer);
    }

    #[test]
    fn file_source_feeds_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("page.html");
        fs::write(&path, TIMELINE).unwrap();
        let provider = SnapshotFacts::new(FileSource::new(path, Some("https://x.com/home".into())));
        let facts = provider.take(DomFactsKind::XComGallery).unwrap();
        assert_eq!(facts.media_elements_count, 3);
        assert_eq!(facts.url.as_deref(), Some("https://x.com/home"));
    }

    #[test]
    fn missing_snapshot_is_an_error() {
        let provider = SnapshotFacts::new(FileSource::new(PathBuf::from("/nonexistent/page.html"), None));
        assert!(provider.take(DomFactsKind::XComGallery).is_err());
    }

    #[test]
    fn serializes_viewer_flag_name() {
        let facts = extract_facts(DomFactsKind::XComGallery, None, "");
        let value = serde_json::to_value(&facts).unwrap();
        assert_eq!(value["kind"], "XComGallery");
        assert!(value.get("hasXComMediaViewer").is_some());
        assert!(value.get("mediaElementsCount").is_some());
    }
}
