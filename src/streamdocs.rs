//! StreamDocs viewer client: URL parsing, session warm-up, metadata, the
//! direct-download shortcut, and the HTTP [`PageSource`].
//!
//! ## Endpoints
//!
//! ```text
//! GET {base}/view/sd;streamdocsId={id}          session cookies
//! GET {base}/v4/documents/{id}/document         multipart metadata
//! GET {base}/v4/documents/{id}/source           original file, if allowed
//! GET {base}/v4/documents/{id}/renderings/{i}   page raster
//! GET {base}/v4/documents/{id}/texts/{i}        page text blocks
//! ```
//!
//! The metadata response is several JSON documents concatenated into one
//! body. Header `sd-body-heads` names the parts and `sd-body-sizes` gives
//! their byte lengths, in the same order.

use crate::config::DownloadConfig;
use crate::error::StreamDocError;
use crate::model::{DocumentId, DocumentInfo, DocumentMetadata, PageLayout, PageText};
use crate::pipeline::fetch::{repair_image_bytes, PageSource};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Header carrying the real content type of a rendering.
pub const CONTENT_TYPE_HEADER: &str = "x-streamdocs-content-type";
const BODY_HEADS_HEADER: &str = "sd-body-heads";
const BODY_SIZES_HEADER: &str = "sd-body-sizes";

static VIEWER_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<base>https?://\S+?)/view/\S*;streamdocsId=(?P<id>[^/?#;\s]+)/*$")
        .expect("viewer URL pattern is valid")
});

/// Split a viewer link into `(base_url, document id)`.
///
/// ```rust
/// use streamdoc_dl::streamdocs::parse_viewer_url;
///
/// let (base, id) =
///     parse_viewer_url("https://www.standard.go.kr/streamdocs/view/sd;streamdocsId=72059197").unwrap();
/// assert_eq!(base, "https://www.standard.go.kr/streamdocs");
/// assert_eq!(id.as_str(), "72059197");
/// ```
pub fn parse_viewer_url(url: &str) -> Result<(String, DocumentId), StreamDocError> {
    let caps = VIEWER_URL
        .captures(url.trim())
        .ok_or_else(|| StreamDocError::InvalidUrl {
            url: url.to_string(),
        })?;
    let doc = DocumentId::new(&caps["id"]);
    if !doc.is_path_safe() {
        return Err(StreamDocError::InvalidUrl {
            url: url.to_string(),
        });
    }
    Ok((caps["base"].to_string(), doc))
}

// ── Metadata parsing ─────────────────────────────────────────────────────

#[derive(Deserialize)]
struct DocumentPart {
    #[serde(default)]
    layout: Vec<PageLayout>,
    #[serde(default)]
    info: DocumentInfo,
}

#[derive(Deserialize)]
struct AuthorizePart {
    #[serde(default)]
    download: bool,
}

/// Decode the multipart metadata body.
///
/// Unknown parts are ignored. A missing `authorize` part means no direct
/// download; a missing `document` part is an error.
pub fn parse_document_response(
    heads: &str,
    sizes: &str,
    body: &[u8],
) -> Result<DocumentMetadata, StreamDocError> {
    let metadata_err = |detail: String| StreamDocError::Metadata { detail };

    let names: Vec<&str> = heads.split(',').map(str::trim).collect();
    let lengths = sizes
        .split(',')
        .map(|s| {
            s.trim()
                .parse::<usize>()
                .map_err(|e| metadata_err(format!("bad part size '{s}': {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut document = None;
    let mut downloadable = false;
    let mut offset = 0usize;
    for (name, len) in names.into_iter().zip(lengths) {
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= body.len())
            .ok_or_else(|| {
                metadata_err(format!(
                    "part '{name}' ({len} bytes at {offset}) overruns a {}-byte body",
                    body.len()
                ))
            })?;
        let chunk = &body[offset..end];
        offset = end;

        match name {
            "document" => {
                let part: DocumentPart = serde_json::from_slice(chunk)
                    .map_err(|e| metadata_err(format!("document part: {e}")))?;
                document = Some(part);
            }
            "authorize" => match serde_json::from_slice::<AuthorizePart>(chunk) {
                Ok(auth) => downloadable = auth.download,
                Err(e) => warn!("Ignoring unreadable authorize part: {}", e),
            },
            other => debug!("Skipping metadata part '{}'", other),
        }
    }

    let document =
        document.ok_or_else(|| metadata_err("response has no document part".to_string()))?;
    Ok(DocumentMetadata {
        layouts: document.layout,
        info: document.info,
        downloadable,
    })
}

/// Content type of a rendering: the StreamDocs header, else `Content-Type`.
pub fn rendering_content_type(headers: &HeaderMap) -> String {
    headers
        .get(CONTENT_TYPE_HEADER)
        .or_else(|| headers.get(CONTENT_TYPE))
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

// ── HTTP client ──────────────────────────────────────────────────────────

/// Cookie-backed HTTP session against one StreamDocs host.
#[derive(Debug, Clone)]
pub struct StreamDocsClient {
    http: reqwest::Client,
    base_url: String,
    timeout_secs: u64,
}

impl StreamDocsClient {
    /// Build a client with a cookie store, the configured per-request
    /// timeout and, optionally, a proxy.
    pub fn new(base_url: impl Into<String>, config: &DownloadConfig) -> Result<Self, StreamDocError> {
        let mut builder = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("streamdoc-dl/", env!("CARGO_PKG_VERSION")));

        if let Some(ref proxy) = config.proxy {
            let proxy = reqwest::Proxy::all(proxy).map_err(|e| {
                StreamDocError::InvalidConfig(format!("invalid proxy '{proxy}': {e}"))
            })?;
            builder = builder.proxy(proxy);
        }

        let http = builder
            .build()
            .map_err(|e| StreamDocError::Internal(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout_secs: config.request_timeout_secs,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn document_url(&self, doc: &DocumentId, tail: &str) -> String {
        format!("{}/v4/documents/{}/{}", self.base_url, doc, tail)
    }

    /// GET `url`, failing on any non-success status.
    async fn get(&self, url: &str) -> Result<reqwest::Response, StreamDocError> {
        self.http
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| StreamDocError::from_reqwest(url, self.timeout_secs, e))
    }

    async fn body(&self, url: &str, resp: reqwest::Response) -> Result<Vec<u8>, StreamDocError> {
        resp.bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| StreamDocError::from_reqwest(url, self.timeout_secs, e))
    }

    /// Load the viewer page so the service sets its session cookies.
    pub async fn open_session(&self, doc: &DocumentId) -> Result<(), StreamDocError> {
        let url = format!("{}/view/sd;streamdocsId={}", self.base_url, doc);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| StreamDocError::from_reqwest(&url, self.timeout_secs, e))?;
        if !resp.status().is_success() {
            warn!("Viewer page returned HTTP {}; continuing", resp.status());
        }
        Ok(())
    }

    /// Page layouts, document info and the direct-download permission.
    pub async fn document_metadata(
        &self,
        doc: &DocumentId,
    ) -> Result<DocumentMetadata, StreamDocError> {
        let url = self.document_url(doc, "document");
        let resp = self.get(&url).await?;
        let header = |name: &str| {
            resp.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };
        let heads = header(BODY_HEADS_HEADER);
        let sizes = header(BODY_SIZES_HEADER);
        let body = self.body(&url, resp).await?;

        let metadata = parse_document_response(&heads, &sizes, &body)?;
        info!(
            "Document {}: {} pages, direct download {}",
            doc,
            metadata.page_count(),
            if metadata.downloadable { "allowed" } else { "not allowed" }
        );
        Ok(metadata)
    }

    /// The original file, when the service hands out a real PDF.
    ///
    /// Any answer other than `200` with a `%PDF` payload is `Ok(None)`.
    pub async fn try_direct_download(
        &self,
        doc: &DocumentId,
    ) -> Result<Option<Vec<u8>>, StreamDocError> {
        let url = self.document_url(doc, "source");
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| StreamDocError::from_reqwest(&url, self.timeout_secs, e))?;
        if resp.status() != reqwest::StatusCode::OK {
            debug!("Direct download refused: HTTP {}", resp.status());
            return Ok(None);
        }
        let bytes = self.body(&url, resp).await?;
        if bytes.starts_with(b"%PDF") {
            Ok(Some(bytes))
        } else {
            debug!("Direct download returned {} bytes that are not a PDF", bytes.len());
            Ok(None)
        }
    }
}

impl PageSource for StreamDocsClient {
    async fn fetch_image(
        &self,
        doc: &DocumentId,
        page_index: usize,
        zoom: u32,
    ) -> Result<Vec<u8>, StreamDocError> {
        let url = self.document_url(
            doc,
            &format!(
                "renderings/{page_index}?zoom={zoom}&jpegQuality=h&renderAnnots=false&increasePrint=false"
            ),
        );
        let resp = self.get(&url).await?;
        let content_type = rendering_content_type(resp.headers());
        let bytes = self.body(&url, resp).await?;
        Ok(repair_image_bytes(bytes, &content_type))
    }

    async fn fetch_text(
        &self,
        doc: &DocumentId,
        page_index: usize,
    ) -> Result<PageText, StreamDocError> {
        let url = self.document_url(doc, &format!("texts/{page_index}"));
        let resp = self.get(&url).await?;
        let bytes = self.body(&url, resp).await?;
        let value: serde_json::Value =
            serde_json::from_slice(&bytes).map_err(|e| StreamDocError::InvalidTextPayload {
                page: page_index + 1,
                detail: e.to_string(),
            })?;
        Ok(PageText::from_json(page_index, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn parses_viewer_urls() {
        let (base, id) =
            parse_viewer_url("https://host.example/sd/view/sd;streamdocsId=ABC123").unwrap();
        assert_eq!(base, "https://host.example/sd");
        assert_eq!(id.as_str(), "ABC123");

        let (_, id) =
            parse_viewer_url("http://h/view/viewer.html;streamdocsId=XYZ/").unwrap();
        assert_eq!(id.as_str(), "XYZ");
    }

    #[test]
    fn rejects_non_viewer_urls() {
        for url in [
            "https://host/view/sd",
            "https://host/documents;streamdocsId=1",
            "ftp://host/view/sd;streamdocsId=1",
            "not a url",
            "https://host/view/sd;streamdocsId=..",
            "https://host/view/sd;streamdocsId=.",
            "https://host/view/sd;streamdocsId=..\\..\\x",
        ] {
            let err = parse_viewer_url(url).unwrap_err();
            assert!(matches!(err, StreamDocError::InvalidUrl { .. }), "{url}");
        }
    }

    #[test]
    fn splits_multipart_metadata() {
        let document = br#"{"layout":[{"bbox":{"w":595,"h":842}},{"bbox":{"w":842,"h":595}}],"info":{"Title":"T","FileName":"a.pdf"}}"#;
        let authorize = br#"{"download":true,"print":false}"#;
        let mut body = document.to_vec();
        body.extend_from_slice(authorize);
        let sizes = format!("{},{}", document.len(), authorize.len());

        let meta = parse_document_response("document,authorize", &sizes, &body).unwrap();
        assert_eq!(meta.page_count(), 2);
        assert_eq!(meta.layouts[1], PageLayout::new(842.0, 595.0));
        assert_eq!(meta.info.file_name(), Some("a.pdf"));
        assert!(meta.downloadable);
    }

    #[test]
    fn missing_authorize_means_no_direct_download() {
        let document = br#"{"layout":[]}"#;
        let meta =
            parse_document_response("document", &document.len().to_string(), document).unwrap();
        assert!(!meta.downloadable);
        assert_eq!(meta.page_count(), 0);
    }

    #[test]
    fn missing_document_part_is_an_error() {
        let authorize = br#"{"download":false}"#;
        let err =
            parse_document_response("authorize", &authorize.len().to_string(), authorize)
                .unwrap_err();
        assert!(matches!(err, StreamDocError::Metadata { .. }));
    }

    #[test]
    fn truncated_body_is_an_error() {
        let err = parse_document_response("document", "100", b"{}").unwrap_err();
        assert!(err.to_string().contains("overruns"));
        assert!(parse_document_response("document", "x", b"{}").is_err());
    }

    #[test]
    fn content_type_prefers_streamdocs_header() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
        assert_eq!(rendering_content_type(&headers), "application/octet-stream");
        headers.insert(CONTENT_TYPE_HEADER, HeaderValue::from_static("image/png"));
        assert_eq!(rendering_content_type(&headers), "image/png");
        assert_eq!(rendering_content_type(&HeaderMap::new()), "");
    }

    #[test]
    fn client_rejects_bad_proxy_and_trims_base() {
        let config = DownloadConfig::builder().proxy("::not a proxy::").build().unwrap();
        assert!(matches!(
            StreamDocsClient::new("https://h", &config),
            Err(StreamDocError::InvalidConfig(_))
        ));

        let client = StreamDocsClient::new("https://h/sd/", &DownloadConfig::default()).unwrap();
        assert_eq!(client.base_url(), "https://h/sd");
        assert_eq!(
            client.document_url(&DocumentId::new("d"), "texts/0"),
            "https://h/sd/v4/documents/d/texts/0"
        );
    }
}
