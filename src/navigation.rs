use anyhow::Result;
use url::Url;

use crate::cmd::{NavigateMode, NavigateTarget};

#[derive(Debug, thiserror::Error)]
pub enum NavigationError {
    #[error("PopupBlocked")]
    PopupBlocked,
    #[error("navigation: unsupported url {0}")]
    InvalidUrl(String),
    #[error("navigation: browser unavailable: {0}")]
    Unavailable(#[source] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigateRequest {
    pub url: String,
    pub mode: NavigateMode,
    pub target: Option<NavigateTarget>,
}

pub trait Navigator: Send + Sync {
    fn navigate(&self, request: &NavigateRequest) -> Result<()>;
}

/// Hands URLs to the system browser.
#[derive(Debug, Clone, Copy, Default)]
pub struct BrowserNavigator;

pub fn validate_url(raw: &str) -> Result<Url, NavigationError> {
    match Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(url),
        _ => Err(NavigationError::InvalidUrl(raw.to_string())),
    }
}

impl Navigator for BrowserNavigator {
    fn navigate(&self, request: &NavigateRequest) -> Result<()> {
        let url = validate_url(&request.url)?;
        match request.mode {
            NavigateMode::Assign => {
                webbrowser::open(url.as_str()).map_err(NavigationError::Unavailable)?;
            }
            NavigateMode::Open => {
                let target = request.target.unwrap_or(NavigateTarget::NewTab);
                tracing::debug!(url = %url, ?target, "navigation: opening");
                webbrowser::open(url.as_str()).map_err(|_| NavigationError::PopupBlocked)?;
            }
        }
        Ok(())
    }
}
