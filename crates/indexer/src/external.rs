use std::time::Duration;

use library::{ArtistImageSource, ConnectivityProbe, EnrichmentError};
use reqwest::Client;
use serde::Deserialize;
use tokio::runtime::Handle;
use tracing::debug;

/// Reachability check: a GET to `url` that returns any response in time.
pub struct HttpProbe {
    client: Client,
    url: String,
    timeout: Duration,
    handle: Handle,
}

impl HttpProbe {
    pub fn new(client: Client, url: String, timeout: Duration, handle: Handle) -> Self {
        Self {
            client,
            url,
            timeout,
            handle,
        }
    }
}

impl ConnectivityProbe for HttpProbe {
    fn reachable(&self) -> bool {
        let request = self.client.get(&self.url).timeout(self.timeout).send();
        match self.handle.block_on(request) {
            Ok(_) => true,
            Err(err) => {
                debug!("Connectivity check against {} failed: {}", self.url, err);
                false
            }
        }
    }
}

/// Artist pictures from the public Deezer search API.
pub struct DeezerArtistImages {
    client: Client,
    timeout: Duration,
    handle: Handle,
}

impl DeezerArtistImages {
    pub fn new(client: Client, timeout: Duration, handle: Handle) -> Self {
        Self {
            client,
            timeout,
            handle,
        }
    }

    async fn fetch(&self, artist_name: &str) -> Result<Option<Vec<u8>>, EnrichmentError> {
        let url = format!(
            "https://api.deezer.com/search/artist?q={}",
            url_escape(artist_name)
        );
        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(map_error)?;
        if !response.status().is_success() {
            return Err(EnrichmentError::Other(format!("http {}", response.status())));
        }
        let payload = response
            .json::<DeezerSearchResponse>()
            .await
            .map_err(map_error)?;
        let picture = match pick_picture(artist_name, payload) {
            Some(picture) => picture,
            None => return Ok(None),
        };

        let response = self
            .client
            .get(&picture)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(map_error)?;
        if !response.status().is_success() {
            return Err(EnrichmentError::Other(format!("http {}", response.status())));
        }
        let bytes = response.bytes().await.map_err(map_error)?;
        Ok(Some(bytes.to_vec()))
    }
}

impl ArtistImageSource for DeezerArtistImages {
    fn fetch_artist_image(&self, artist_name: &str) -> Result<Option<Vec<u8>>, EnrichmentError> {
        self.handle.block_on(self.fetch(artist_name))
    }
}

#[derive(Deserialize)]
struct DeezerSearchResponse {
    data: Option<Vec<DeezerArtist>>,
}

#[derive(Deserialize)]
struct DeezerArtist {
    name: String,
    picture_xl: Option<String>,
    picture_big: Option<String>,
}

fn pick_picture(artist_name: &str, payload: DeezerSearchResponse) -> Option<String> {
    let wanted = normalize_name(artist_name);
    payload
        .data?
        .into_iter()
        .find(|artist| normalize_name(&artist.name) == wanted)
        .and_then(|artist| clean_url(artist.picture_xl).or_else(|| clean_url(artist.picture_big)))
}

fn normalize_name(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn map_error(err: reqwest::Error) -> EnrichmentError {
    if err.is_timeout() {
        EnrichmentError::Timeout(err.to_string())
    } else if err.is_connect() {
        EnrichmentError::Connection(err.to_string())
    } else {
        EnrichmentError::Other(err.to_string())
    }
}

fn clean_url(value: Option<String>) -> Option<String> {
    let value = value?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn url_escape(input: &str) -> String {
    let mut out = String::new();
    for byte in input.as_bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(*byte as char)
            }
            b' ' => out.push_str("%20"),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
