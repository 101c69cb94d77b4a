//! Tile-fetch transport
//!
//! Talks to the map server's biome endpoint. One request per tile; the JSON
//! response may carry an image reference which is resolved here into a
//! [`TileImage`]. Missing or malformed image fields mean "no visual content",
//! never an error.

use std::future::Future;

use base64::Engine;
use serde::Deserialize;

use crate::viewport::Coord;

/// Everything needed to build one tile's fetch target
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TileRequest {
    pub coord: Coord,
    pub seed: i64,
    pub world_type: String,
    pub version: String,
}

impl TileRequest {
    /// Query string parameters, in the order the server documents them
    pub fn query_pairs(&self) -> [(&'static str, String); 5] {
        [
            ("seed", self.seed.to_string()),
            ("wtype", self.world_type.clone()),
            ("version", self.version.clone()),
            ("x", self.coord.x.to_string()),
            ("z", self.coord.z.to_string()),
        ]
    }
}

/// Image reference carried by a tile payload
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TileImage {
    /// Absolute URL of an image the UI can load itself
    Url(String),
    /// Inline image decoded from a `data:` URI
    Data { mime: String, bytes: Vec<u8> },
}

impl TileImage {
    /// Resolve a raw `image` field against the server base URL
    pub fn parse(raw: &str, base_url: &str) -> Option<TileImage> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        if let Some(rest) = raw.strip_prefix("data:") {
            return parse_data_uri(rest);
        }

        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Some(TileImage::Url(raw.to_string()));
        }

        let base = base_url.trim_end_matches('/');
        if raw.starts_with('/') {
            Some(TileImage::Url(format!("{}{}", base, raw)))
        } else {
            Some(TileImage::Url(format!("{}/{}", base, raw)))
        }
    }
}

fn parse_data_uri(rest: &str) -> Option<TileImage> {
    let (header, data) = rest.split_once(',')?;
    let (mime, is_base64) = match header.strip_suffix(";base64") {
        Some(mime) => (mime, true),
        None => (header, false),
    };
    let mime = if mime.is_empty() { "text/plain" } else { mime };

    let bytes = if is_base64 {
        match base64::engine::general_purpose::STANDARD.decode(data) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("Discarding undecodable tile image: {}", e);
                return None;
            }
        }
    } else {
        data.as_bytes().to_vec()
    };

    if bytes.is_empty() {
        return None;
    }

    Some(TileImage::Data {
        mime: mime.to_string(),
        bytes,
    })
}

/// Raw biome endpoint response; every field is optional for the client
#[derive(Deserialize, Debug, Default)]
pub struct TilePayload {
    #[serde(default)]
    pub x: Option<i64>,
    #[serde(default)]
    pub z: Option<i64>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub biomes: Vec<i64>,
    /// Biome id of every block column in the tile, row by row
    #[serde(default)]
    pub values: Vec<i64>,
    /// Kept loose so a non-string image field degrades to "no image"
    #[serde(default)]
    pub image: Option<serde_json::Value>,
}

impl TilePayload {
    pub fn into_tile(self, base_url: &str) -> Tile {
        let image = match &self.image {
            Some(serde_json::Value::String(raw)) => TileImage::parse(raw, base_url),
            Some(serde_json::Value::Null) | None => None,
            Some(other) => {
                log::warn!("Ignoring non-string tile image field: {}", other);
                None
            }
        };

        Tile {
            image,
            hash: self.hash,
            biomes: self.biomes,
            values: self.values,
        }
    }
}

/// A fetched tile as the rest of the viewer sees it
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tile {
    pub image: Option<TileImage>,
    pub hash: Option<String>,
    /// Distinct biome ids, sorted
    pub biomes: Vec<i64>,
    pub values: Vec<i64>,
}

/// Errors that can occur while fetching a single tile
#[derive(Debug, Clone, PartialEq)]
pub enum FetchError {
    NetworkError(String),
    StatusError(u16),
    ParseError(String),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::NetworkError(e) => write!(f, "Network error: {}", e),
            FetchError::StatusError(code) => write!(f, "Server returned status {}", code),
            FetchError::ParseError(e) => write!(f, "Parse error: {}", e),
        }
    }
}

impl std::error::Error for FetchError {}

/// Anything that can produce a tile for a request.
///
/// Implementations must be cancel-safe: dropping the returned future aborts
/// the fetch.
pub trait TileTransport: Send + Sync + 'static {
    fn fetch(&self, request: TileRequest) -> impl Future<Output = Result<Tile, FetchError>> + Send;
}

/// HTTP transport against the map server
pub struct HttpTransport {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTransport {
    /// No request timeout is set; a stalled fetch holds its slot until the
    /// connection fails or the request is cancelled.
    pub fn new(base_url: &str) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("chunk_viewer/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::NetworkError(e.to_string()))?;

        Ok(Self::with_client(base_url, client))
    }

    pub fn with_client(base_url: &str, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn tile_url(&self) -> String {
        format!("{}/api/biomes", self.base_url)
    }
}

impl TileTransport for HttpTransport {
    fn fetch(&self, request: TileRequest) -> impl Future<Output = Result<Tile, FetchError>> + Send {
        let client = self.client.clone();
        let url = self.tile_url();
        let base_url = self.base_url.clone();

        async move {
            let response = client
                .get(&url)
                .query(&request.query_pairs())
                .send()
                .await
                .map_err(|e| FetchError::NetworkError(e.to_string()))?;

            if !response.status().is_success() {
                return Err(FetchError::StatusError(response.status().as_u16()));
            }

            let payload: TilePayload = response
                .json()
                .await
                .map_err(|e| FetchError::ParseError(e.to_string()))?;

            Ok(payload.into_tile(&base_url))
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    const BASE: &str = "http://localhost:3001/";

    #[test]
    fn test_query_pairs() {
        let request = TileRequest {
            coord: Coord::new(-3, 7),
            seed: -42,
            world_type: "default".to_string(),
            version: "1.16".to_string(),
        };
        let pairs = request.query_pairs();
        assert_eq!(pairs[0], ("seed", "-42".to_string()));
        assert_eq!(pairs[1], ("wtype", "default".to_string()));
        assert_eq!(pairs[3], ("x", "-3".to_string()));
        assert_eq!(pairs[4], ("z", "7".to_string()));
    }

    #[test]
    fn test_server_relative_image_resolves_against_base() {
        let image = TileImage::parse("/cache/1.16/default/1/DIM0/biomes/img/0001.png", BASE);
        assert_eq!(
            image,
            Some(TileImage::Url(
                "http://localhost:3001/cache/1.16/default/1/DIM0/biomes/img/0001.png".to_string()
            ))
        );
    }

    #[test]
    fn test_absolute_url_is_kept() {
        let image = TileImage::parse("https://tiles.example/a.png", BASE);
        assert_eq!(image, Some(TileImage::Url("https://tiles.example/a.png".to_string())));
    }

    #[test]
    fn test_data_uri_is_decoded() {
        let image = TileImage::parse("data:image/png;base64,aGVsbG8=", BASE);
        assert_eq!(
            image,
            Some(TileImage::Data {
                mime: "image/png".to_string(),
                bytes: b"hello".to_vec(),
            })
        );
    }

    #[test]
    fn test_bad_images_mean_no_content() {
        assert_eq!(TileImage::parse("", BASE), None);
        assert_eq!(TileImage::parse("   ", BASE), None);
        assert_eq!(TileImage::parse("data:image/png;base64,!!!", BASE), None);
        assert_eq!(TileImage::parse("data:no-comma", BASE), None);
    }

    #[test]
    fn test_payload_parsing() {
        let json = r#"{"x": 3, "z": 4, "hash": "00000000000000000042",
                       "biomes": [1, 4], "values": [1, 1, 4],
                       "image": "/cache/a.png"}"#;
        let payload: TilePayload = serde_json::from_str(json).unwrap();
        let tile = payload.into_tile(BASE);
        assert_eq!(tile.biomes, vec![1, 4]);
        assert_eq!(tile.values, vec![1, 1, 4]);
        assert_eq!(tile.hash.as_deref(), Some("00000000000000000042"));
        assert_eq!(tile.image, Some(TileImage::Url("http://localhost:3001/cache/a.png".to_string())));
    }

    #[test]
    fn test_null_or_malformed_image_field() {
        let payload: TilePayload = serde_json::from_str(r#"{"image": null}"#).unwrap();
        assert_eq!(payload.into_tile(BASE).image, None);

        let payload: TilePayload = serde_json::from_str(r#"{"image": 17}"#).unwrap();
        assert_eq!(payload.into_tile(BASE).image, None);

        let payload: TilePayload = serde_json::from_str("{}").unwrap();
        assert_eq!(payload.into_tile(BASE), Tile::default());
    }

    /// Answer a single HTTP request with `status` and `body`. Yields the base
    /// URL to connect to and a task resolving to the request line received.
    pub(crate) async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            let mut buf = [0u8; 1024];
            while !received.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&buf[..n]);
            }

            let response = format!(
                "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;

            let received = String::from_utf8_lossy(&received).into_owned();
            received.lines().next().unwrap_or_default().to_string()
        });

        (base_url, server)
    }

    /// Client that ignores proxy settings, for talking to `serve_once`
    pub(crate) fn local_client() -> reqwest::Client {
        reqwest::Client::builder().no_proxy().build().unwrap()
    }

    fn request() -> TileRequest {
        TileRequest {
            coord: Coord::new(-3, 7),
            seed: -42,
            world_type: "large_biome".to_string(),
            version: "1.16".to_string(),
        }
    }

    #[tokio::test]
    async fn test_fetch_decodes_tile() {
        let body = r#"{"x": -3, "z": 7, "hash": "abc", "biomes": [1, 7],
                       "values": [1, 7, 7, 1], "image": "/cache/1.16/a.png"}"#;
        let (base_url, server) = serve_once("200 OK", body).await;
        let transport = HttpTransport::with_client(&format!("{}/", base_url), local_client());

        let tile = transport.fetch(request()).await.unwrap();
        assert_eq!(
            server.await.unwrap(),
            "GET /api/biomes?seed=-42&wtype=large_biome&version=1.16&x=-3&z=7 HTTP/1.1"
        );
        assert_eq!(tile.image, Some(TileImage::Url(format!("{}/cache/1.16/a.png", base_url))));
        assert_eq!(tile.biomes, vec![1, 7]);
        assert_eq!(tile.values, vec![1, 7, 7, 1]);
    }

    #[tokio::test]
    async fn test_fetch_error_status() {
        let (base_url, _server) = serve_once("500 Internal Server Error", "oops").await;
        let transport = HttpTransport::with_client(&base_url, local_client());
        assert_eq!(transport.fetch(request()).await, Err(FetchError::StatusError(500)));
    }

    #[tokio::test]
    async fn test_fetch_malformed_body() {
        let (base_url, _server) = serve_once("200 OK", "not json at all").await;
        let transport = HttpTransport::with_client(&base_url, local_client());
        assert!(matches!(transport.fetch(request()).await, Err(FetchError::ParseError(_))));
    }

    #[tokio::test]
    async fn test_fetch_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let transport = HttpTransport::with_client(&base_url, local_client());
        assert!(matches!(transport.fetch(request()).await, Err(FetchError::NetworkError(_))));
    }

    #[test]
    fn test_tile_url() {
        let transport = HttpTransport::new("http://localhost:3001/").unwrap();
        assert_eq!(transport.tile_url(), "http://localhost:3001/api/biomes");
    }
}
