//! Remote playlist download with HTTPS support

use std::io::Read;
use std::time::Duration;

use flate2::read::GzDecoder;
use tracing::{debug, info};
use ureq::http::Uri;

use crate::config::FetchConfig;
use crate::error::FetchError;

/// True for absolute http(s) URLs with a host
pub fn is_http_url(url: &str) -> bool {
    match url.trim().parse::<Uri>() {
        Ok(uri) => {
            matches!(uri.scheme_str(), Some("http") | Some("https"))
                && uri.host().is_some_and(|h| !h.is_empty())
        }
        Err(_) => false,
    }
}

/// Downloads playlist text from upstream providers. One attempt per call,
/// bounded by a global timeout and a body size cap.
#[derive(Clone)]
pub struct PlaylistFetcher {
    agent: ureq::Agent,
    config: FetchConfig,
}

impl PlaylistFetcher {
    pub fn new(config: FetchConfig) -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_secs)))
            .http_status_as_error(false)
            .max_idle_connections(4)
            .max_idle_connections_per_host(2)
            .build()
            .new_agent();
        Self { agent, config }
    }

    /// GET `url` and return the body as trimmed text
    pub fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        if !is_http_url(url) {
            return Err(FetchError::InvalidUrl);
        }

        debug!("Fetching playlist {}", url);
        let response = self
            .agent
            .get(url)
            .header("User-Agent", &self.config.user_agent)
            .call()
            .map_err(|e| FetchError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let reader = response.into_body().into_reader();
        let text = decode_body(reader, self.config.max_bytes)?;
        info!("Fetched {} bytes from {}", text.len(), url);
        Ok(text)
    }
}

/// Read at most `max_bytes`, inflating gzip payloads (magic 1f 8b).
/// Invalid UTF-8 is replaced rather than rejected.
pub(crate) fn decode_body<R: Read>(reader: R, max_bytes: u64) -> Result<String, FetchError> {
    let raw = read_capped(reader, max_bytes)?;

    let bytes = if raw.len() >= 2 && raw[0] == 0x1f && raw[1] == 0x8b {
        debug!("Playlist body is gzip compressed");
        read_capped(GzDecoder::new(raw.as_slice()), max_bytes)?
    } else {
        raw
    };

    Ok(String::from_utf8_lossy(&bytes).trim().to_string())
}

fn read_capped<R: Read>(reader: R, max_bytes: u64) -> Result<Vec<u8>, FetchError> {
    let mut buf = Vec::new();
    reader.take(max_bytes + 1).read_to_end(&mut buf)?;
    if buf.len() as u64 > max_bytes {
        return Err(FetchError::TooLarge(max_bytes));
    }
    Ok(buf)
}
