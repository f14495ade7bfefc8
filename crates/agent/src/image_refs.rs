//! Image reference extraction and validation (§4.3 step 3): scan the
//! first user turn's raw text for `http(s)://` URLs ending in a recognized
//! image extension and inline `data:image/...;base64,...` URIs, validating
//! each before it is turned into a `ContentPart::Image`.

use std::sync::OnceLock;
use std::time::Duration;

use ca_domain::tool::ContentPart;
use regex::Regex;

const MAX_DATA_URI_BYTES: usize = 10 * 1024 * 1024;
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "bmp"];

fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"https?://[^\s<>\)\]]+").expect("static url regex"))
}

fn data_uri_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"data:(image/[a-zA-Z0-9.+-]+);base64,([A-Za-z0-9+/=]+)").expect("static data uri regex")
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Candidate {
    Url(String),
    DataUri { mime: String, data: String },
}

fn extract_candidates(text: &str) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    for m in data_uri_re().captures_iter(text) {
        candidates.push(Candidate::DataUri {
            mime: m[1].to_string(),
            data: m[2].to_string(),
        });
    }
    for m in url_re().find_iter(text) {
        let url = m.as_str();
        if looks_like_image_url(url) {
            candidates.push(Candidate::Url(url.to_string()));
        }
    }
    candidates
}

fn looks_like_image_url(url: &str) -> bool {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    without_query
        .rsplit('.')
        .next()
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn validate_data_uri(mime: &str, data: &str) -> Option<(String, String)> {
    // Base64 expands ~4/3; cap on encoded length to avoid a full decode.
    if data.len() > (MAX_DATA_URI_BYTES * 4 / 3) {
        return None;
    }
    Some((mime.to_string(), format!("data:{mime};base64,{data}")))
}

async fn validate_url(client: &reqwest::Client, url: &str) -> Option<(String, Option<String>)> {
    let resp = tokio::time::timeout(PROBE_TIMEOUT, client.head(url).send())
        .await
        .ok()?
        .ok()?;
    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    match &content_type {
        Some(ct) if ct.starts_with("image/") => Some((url.to_string(), content_type)),
        _ => None,
    }
}

/// Scan `text` for image references and return the validated ones as
/// `ContentPart::Image`s, in the order they were found. Invalid or
/// unreachable references are silently dropped.
pub async fn extract_and_validate(text: &str) -> Vec<ContentPart> {
    let candidates = extract_candidates(text);
    if candidates.is_empty() {
        return Vec::new();
    }

    let client = match reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::limited(1))
        .build()
    {
        Ok(c) => c,
        Err(_) => return Vec::new(),
    };

    let mut parts = Vec::new();
    for candidate in candidates {
        match candidate {
            Candidate::DataUri { mime, data } => {
                if let Some((mime, uri)) = validate_data_uri(&mime, &data) {
                    parts.push(ContentPart::Image {
                        url: uri,
                        media_type: Some(mime),
                    });
                }
            }
            Candidate::Url(url) => {
                if let Some((url, content_type)) = validate_url(&client, &url).await {
                    parts.push(ContentPart::Image {
                        url,
                        media_type: content_type,
                    });
                }
            }
        }
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_image_urls_and_ignores_other_links() {
        let text = "see https://example.com/cat.png and https://example.com/readme.md";
        let candidates = extract_candidates(text);
        assert_eq!(candidates, vec![Candidate::Url("https://example.com/cat.png".to_string())]);
    }

    #[test]
    fn extracts_data_uri() {
        let text = "here: data:image/png;base64,QUJD and more text";
        let candidates = extract_candidates(text);
        assert_eq!(
            candidates,
            vec![Candidate::DataUri {
                mime: "image/png".to_string(),
                data: "QUJD".to_string(),
            }]
        );
    }

    #[test]
    fn validate_data_uri_rejects_oversized_payload() {
        let huge = "A".repeat(MAX_DATA_URI_BYTES * 2);
        assert!(validate_data_uri("image/png", &huge).is_none());
    }

    #[test]
    fn validate_data_uri_preserves_mime_without_double_prefix() {
        let (mime, uri) = validate_data_uri("image/png", "QUJD").unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(uri, "data:image/png;base64,QUJD");
    }

    #[tokio::test]
    async fn extract_and_validate_on_plain_text_returns_empty() {
        let parts = extract_and_validate("just some text, no images here").await;
        assert!(parts.is_empty());
    }
}
