//! Deterministic names for downloaded media and bundles.
//!
//! Media: `{username}_{tweetId}_{index}.{extension}`, ZIP bundles:
//! `{username}_{tweetId}.zip`. When the tweet cannot be identified the names
//! fall back to `{prefix}_{timestamp}...`.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;
use url::Url;

use crate::media::{MediaInfo, SourceLocation};

static MEDIA_FILENAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^_\s]+_\d+_\d+\.\w+$").expect("valid media filename regex"));

static ZIP_FILENAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^_\s]+_\d+\.zip$").expect("valid zip filename regex"));

static SUPPORTED_EXTENSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(jpg|jpeg|png|gif|webp|mp4|mov|avi)$").expect("valid extension regex")
});

static USERNAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_]{1,15}$").expect("valid username regex"));

static MEDIA_ID_INDEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_media_(\d+)$").expect("valid media id regex"));

static TRAILING_INDEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_(\d+)$").expect("valid trailing index regex"));

static STATUS_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^/([A-Za-z0-9_]{1,15})/status/(\d+)").expect("valid status path regex")
});

const DEFAULT_EXTENSION: &str = "jpg";
const DEFAULT_MEDIA_PREFIX: &str = "media";
const DEFAULT_ZIP_PREFIX: &str = "xcom_gallery";
const MAX_FILENAME_CHARS: usize = 255;

const TWIMG_ROOT_DOMAIN: &str = "twimg.com";

const PROFILE_HOSTS: &[&str] = &[
    "x.com",
    "www.x.com",
    "twitter.com",
    "www.twitter.com",
    "mobile.twitter.com",
    "m.twitter.com",
];

const RESERVED_ROUTES: &[&str] = &[
    "i",
    "home",
    "explore",
    "notifications",
    "messages",
    "bookmarks",
    "lists",
    "profile",
    "more",
    "compose",
    "search",
    "settings",
    "help",
    "display",
    "moments",
    "topics",
    "login",
    "logout",
    "signup",
    "account",
    "privacy",
    "tos",
];

const RESERVED_DEVICE_NAMES: &[&str] = &[
    "con", "prn", "aux", "nul", "com1", "com2", "com3", "com4", "com5", "com6", "com7", "com8",
    "com9", "lpt1", "lpt2", "lpt3", "lpt4", "lpt5", "lpt6", "lpt7", "lpt8", "lpt9",
];

/// Index supplied by the caller, either numeric or as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexHint {
    Number(i64),
    Text(String),
}

impl From<i64> for IndexHint {
    fn from(value: i64) -> Self {
        IndexHint::Number(value)
    }
}

impl From<usize> for IndexHint {
    fn from(value: usize) -> Self {
        IndexHint::Number(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<&str> for IndexHint {
    fn from(value: &str) -> Self {
        IndexHint::Text(value.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilenameOptions {
    pub index: Option<IndexHint>,
    pub extension: Option<String>,
    pub fallback_prefix: Option<String>,
    pub fallback_username: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZipFilenameOptions {
    pub fallback_prefix: Option<String>,
}

pub fn is_valid_media_filename(filename: &str) -> bool {
    MEDIA_FILENAME.is_match(filename)
}

pub fn is_valid_zip_filename(filename: &str) -> bool {
    ZIP_FILENAME.is_match(filename)
}

pub fn generate_media_filename(media: &MediaInfo, options: &FilenameOptions) -> String {
    if let Some(existing) = media.filename.as_deref() {
        if is_valid_media_filename(existing) {
            return sanitize_for_windows(existing);
        }
    }

    let extension = options
        .extension
        .clone()
        .unwrap_or_else(|| extension_from_url(&media.url));
    let index =
        index_from_media_id(&media.id).unwrap_or_else(|| normalize_index(options.index.as_ref()));

    let (username, tweet_id) = resolve_tweet_metadata(media, options.fallback_username.as_deref());
    if let (Some(username), Some(tweet_id)) = (username, tweet_id) {
        return sanitize_for_windows(&format!("{username}_{tweet_id}_{index}.{extension}"));
    }

    let prefix = options
        .fallback_prefix
        .as_deref()
        .unwrap_or(DEFAULT_MEDIA_PREFIX);
    let timestamp = Utc::now().timestamp_millis();
    sanitize_for_windows(&format!("{prefix}_{timestamp}_{index}.{extension}"))
}

pub fn generate_zip_filename(items: &[MediaInfo], options: &ZipFilenameOptions) -> String {
    if let Some(first) = items.first() {
        if let (Some(username), Some(tweet_id)) = resolve_tweet_metadata(first, None) {
            return sanitize_for_windows(&format!("{username}_{tweet_id}.zip"));
        }
    }

    let prefix = options
        .fallback_prefix
        .as_deref()
        .unwrap_or(DEFAULT_ZIP_PREFIX);
    let timestamp = Utc::now().timestamp_millis();
    sanitize_for_windows(&format!("{prefix}_{timestamp}.zip"))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn resolve_tweet_metadata(
    media: &MediaInfo,
    fallback_username: Option<&str>,
) -> (Option<String>, Option<String>) {
    if media.source_location == SourceLocation::Quoted {
        if let (Some(username), Some(tweet_id)) = (
            non_empty(media.quoted_username.as_deref()),
            non_empty(media.quoted_tweet_id.as_deref()),
        ) {
            return (Some(username.to_string()), Some(tweet_id.to_string()));
        }
    }

    let tweet_id = non_empty(media.tweet_id.as_deref()).map(str::to_string);

    let username = match non_empty(media.tweet_username.as_deref()) {
        Some(name) if name != "unknown" => Some(name.to_string()),
        _ => {
            let candidate = media.original_url.as_deref().unwrap_or(&media.url);
            username_from_url(candidate)
        }
    }
    .or_else(|| non_empty(fallback_username).map(str::to_string));

    (username, tweet_id)
}

/// Pulls a profile handle out of an x.com / twitter.com URL.
pub fn username_from_url(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    let host = url.host_str()?.to_ascii_lowercase();

    if host == TWIMG_ROOT_DOMAIN || host.ends_with(".twimg.com") {
        return None;
    }
    if !PROFILE_HOSTS.contains(&host.as_str()) {
        return None;
    }

    let candidate = url.path().split('/').find(|s| !s.is_empty())?.trim();
    if candidate.is_empty() || RESERVED_ROUTES.contains(&candidate.to_ascii_lowercase().as_str()) {
        return None;
    }

    USERNAME
        .is_match(candidate)
        .then(|| candidate.to_string())
}

/// Extracts `(username, tweet_id)` from a status URL such as
/// `https://x.com/alice/status/123/photo/1`.
pub fn parse_status_url(raw: &str) -> Option<(String, String)> {
    let url = Url::parse(raw).ok()?;
    let host = url.host_str()?.to_ascii_lowercase();
    if !PROFILE_HOSTS.contains(&host.as_str()) {
        return None;
    }
    let captures = STATUS_PATH.captures(url.path())?;
    let username = captures.get(1)?.as_str();
    if RESERVED_ROUTES.contains(&username.to_ascii_lowercase().as_str()) {
        return None;
    }
    Some((username.to_string(), captures.get(2)?.as_str().to_string()))
}

fn index_from_media_id(media_id: &str) -> Option<String> {
    if media_id.is_empty() {
        return None;
    }
    // A `_media_N` suffix is zero-based; one that does not fit is ignored
    // rather than reused verbatim.
    if let Some(captures) = MEDIA_ID_INDEX.captures(media_id) {
        return captures[1]
            .parse::<u64>()
            .ok()
            .and_then(|zero_based| zero_based.checked_add(1))
            .map(|index| index.to_string());
    }
    TRAILING_INDEX
        .captures(media_id)
        .map(|captures| captures[1].to_string())
}

fn normalize_index(index: Option<&IndexHint>) -> String {
    let value = match index {
        None => return "1".to_string(),
        Some(IndexHint::Number(n)) => *n,
        Some(IndexHint::Text(text)) => match parse_leading_int(text) {
            Some(n) => n,
            None => return "1".to_string(),
        },
    };

    if value >= 1 {
        return value.to_string();
    }
    value.saturating_add(1).max(1).to_string()
}

/// Parses an optionally signed run of leading digits, ignoring surrounding
/// whitespace and any trailing text ("3rd" -> 3).
fn parse_leading_int(text: &str) -> Option<i64> {
    let trimmed = text.trim();
    let (sign, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse::<i64>().ok().map(|n| n * sign)
}

fn extension_from_url(raw: &str) -> String {
    let path = match Url::parse(raw) {
        Ok(url) => url.path().to_string(),
        Err(_) => {
            let without_query = raw.split(['?', '#']).next().unwrap_or(raw);
            match without_query.rfind('/') {
                Some(slash) => without_query[slash..].to_string(),
                None => without_query.to_string(),
            }
        }
    };

    if let Some(dot) = path.rfind('.') {
        if dot > 0 {
            let extension = &path[dot + 1..];
            if SUPPORTED_EXTENSION.is_match(extension) {
                return extension.to_ascii_lowercase();
            }
        }
    }
    DEFAULT_EXTENSION.to_string()
}

fn is_stripped_char(ch: char) -> bool {
    let cp = ch as u32;
    cp <= 0x1f
        || (0x7f..=0x9f).contains(&cp)
        || (0x200b..=0x200f).contains(&cp)
        || (0x202a..=0x202e).contains(&cp)
        || cp == 0x2060
        || (0x2066..=0x2069).contains(&cp)
}

/// Makes a name safe to write on Windows filesystems.
pub fn sanitize_for_windows(name: &str) -> String {
    if name.is_empty() {
        return DEFAULT_MEDIA_PREFIX.to_string();
    }

    let base: String = name.nfkc().filter(|ch| !is_stripped_char(*ch)).collect();

    let (stem, extension) = match base.rfind('.') {
        Some(dot) if dot > 0 && dot < base.len() - 1 => (&base[..dot], &base[dot..]),
        _ => (base.as_str(), ""),
    };

    let replaced: String = stem
        .chars()
        .map(|ch| match ch {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            other => other,
        })
        .collect();
    let trimmed = replaced.trim_matches(|ch: char| ch.is_whitespace() || ch == '.');

    let mut safe = if RESERVED_DEVICE_NAMES.contains(&trimmed.to_ascii_lowercase().as_str()) {
        format!("_{trimmed}")
    } else {
        trimmed.to_string()
    };
    if safe.is_empty() {
        safe = DEFAULT_MEDIA_PREFIX.to_string();
    }

    format!("{safe}{extension}")
        .chars()
        .take(MAX_FILENAME_CHARS)
        .collect()
}
