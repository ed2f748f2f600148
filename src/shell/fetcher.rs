use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Method, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An asset request as seen by the shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRequest {
    pub method: Method,
    pub url: Url,
}

impl AssetRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self { method, url }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn is_get(&self) -> bool {
        self.method == Method::GET
    }

    pub fn key(&self) -> RequestKey {
        RequestKey {
            method: self.method.as_str().to_string(),
            url: self.url.to_string(),
        }
    }
}

/// Request identity used as the cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestKey {
    pub method: String,
    pub url: String,
}

/// Captured response snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(with = "body_base64")]
    pub body: Bytes,
}

impl AssetResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::new(200, body)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },
    #[error("request to {url} was aborted")]
    Aborted { url: String },
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &AssetRequest) -> Result<AssetResponse, FetchError>;
}

#[derive(Clone, Default)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &AssetRequest) -> Result<AssetResponse, FetchError> {
        let transport = |e: reqwest::Error| FetchError::Transport {
            url: request.url.to_string(),
            reason: e.to_string(),
        };

        let response = self
            .client
            .request(request.method.clone(), request.url.clone())
            .send()
            .await
            .map_err(transport)?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(transport)?;

        Ok(AssetResponse {
            status,
            headers,
            body,
        })
    }
}

mod body_base64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_request_key_uses_method_and_url() {
        let url = Url::parse("http://localhost:8000/app.js").unwrap();
        let get = AssetRequest::get(url.clone()).key();
        let post = AssetRequest::new(Method::POST, url).key();
        assert_eq!(get.method, "GET");
        assert_eq!(get.url, "http://localhost:8000/app.js");
        assert_ne!(get, post);
    }

    #[test]
    fn test_body_is_stored_as_base64() {
        let response = AssetResponse::ok(vec![0u8, 159, 146, 150]);
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains(r#""body":"AJ+Slg==""#));
        let back: AssetResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back, response);
    }

    #[test]
    fn test_success_range() {
        assert!(AssetResponse::new(204, "").is_success());
        assert!(!AssetResponse::new(304, "").is_success());
        assert!(!AssetResponse::new(404, "").is_success());
    }

    #[tokio::test]
    async fn test_http_fetcher_captures_response() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 2048];
            let mut seen = Vec::new();
            while !String::from_utf8_lossy(&seen).contains("\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                seen.extend_from_slice(&buf[..n]);
            }
            let body = "body{color:red}";
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/css\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });

        let url = Url::parse(&format!("http://{}/styles.css", addr)).unwrap();
        let response = HttpFetcher::new().fetch(&AssetRequest::get(url)).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.header("content-type"), Some("text/css"));
        assert_eq!(&response.body[..], b"body{color:red}");
    }

    #[tokio::test]
    async fn test_http_fetcher_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = Url::parse(&format!("http://{}/", addr)).unwrap();
        let err = HttpFetcher::new().fetch(&AssetRequest::get(url)).await.unwrap_err();
        assert!(matches!(err, FetchError::Transport { .. }));
    }
}
