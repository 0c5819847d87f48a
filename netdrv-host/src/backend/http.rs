//! HTTP request/response backend
//!
//! `open` issues the request and waits for the response head. Any status
//! code counts as a usable response; only transport failures fail `open`.
//! The status and headers stay available for the handle's lifetime.
//! Reads stream the body and report end of body as a zero-byte read,
//! repeatedly. Writes are not supported.

use super::{Backend, BackendKind, Connection};
use crate::config::DriverConfig;
use crate::error::DriverError;
use crate::target::Target;
use async_trait::async_trait;
use bytes::{Buf, Bytes};
use netdrv_api::HttpOptions;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Response, StatusCode, Url};
use std::collections::BTreeMap;
use std::time::Duration;

/// Backend for `http://` and `https://` targets
#[derive(Debug, Default)]
pub struct HttpBackend;

impl HttpBackend {
    pub fn new() -> Self {
        Self
    }

    fn parse_options(options: &str) -> Result<HttpOptions, DriverError> {
        let opts: HttpOptions = serde_json::from_str(options)
            .map_err(|e| DriverError::bad_params(format!("invalid http options: {}", e)))?;
        if opts.method.trim().is_empty() {
            return Err(DriverError::bad_params("http method must not be empty"));
        }
        Ok(opts)
    }

    fn parse_method(method: &str) -> Result<Method, DriverError> {
        Method::from_bytes(method.trim().to_ascii_uppercase().as_bytes())
            .map_err(|_| DriverError::bad_params(format!("invalid http method '{}'", method)))
    }

    fn build_headers(headers: &BTreeMap<String, String>) -> Result<HeaderMap, DriverError> {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            let header = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| DriverError::bad_params(format!("invalid header name '{}'", name)))?;
            let value = HeaderValue::from_str(value).map_err(|_| {
                DriverError::bad_params(format!("invalid value for header '{}'", name))
            })?;
            map.insert(header, value);
        }
        Ok(map)
    }
}

#[async_trait]
impl Backend for HttpBackend {
    fn name(&self) -> &str {
        "http"
    }

    fn schemes(&self) -> &[&'static str] {
        &["http", "https"]
    }

    async fn open(
        &self,
        target: &Target,
        options: &str,
        config: &DriverConfig,
    ) -> Result<Box<dyn Connection>, DriverError> {
        // everything the guest supplied is validated before touching the network
        let opts = Self::parse_options(options)?;
        let method = Self::parse_method(&opts.method)?;
        let headers = Self::build_headers(&opts.headers)?;
        let url = Url::parse(target.address()).map_err(|e| {
            DriverError::bad_params(format!("invalid url '{}': {}", target.address(), e))
        })?;

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.connect_timeout(opts.connect_timeout) {
            builder = builder.connect_timeout(timeout);
        }
        if let Some(secs) = opts.read_timeout {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder.build().map_err(|source| DriverError::Request {
            target: target.as_str().to_string(),
            source,
        })?;

        let mut request = client.request(method, url).headers(headers);
        if let Some(body) = opts.body {
            request = request.body(body);
        }

        let response = request
            .send()
            .await
            .map_err(|source| DriverError::Request {
                target: target.as_str().to_string(),
                source,
            })?;

        tracing::debug!(
            url = %target.address(),
            status = response.status().as_u16(),
            "HTTP response received"
        );
        Ok(Box::new(HttpConnection::new(response)))
    }
}

/// Response whose body is streamed to the guest
#[derive(Debug)]
pub struct HttpConnection {
    status: StatusCode,
    headers: HeaderMap,
    /// `None` once the body has ended
    response: Option<Response>,
    pending: Bytes,
}

impl HttpConnection {
    pub fn new(response: Response) -> Self {
        Self {
            status: response.status(),
            headers: response.headers().clone(),
            response: Some(response),
            pending: Bytes::new(),
        }
    }

    fn lookup_header(headers: &HeaderMap, name: &str) -> Result<Vec<u8>, DriverError> {
        let key = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| DriverError::bad_params(format!("invalid header name '{}'", name)))?;
        headers
            .get(&key)
            .map(|value| value.as_bytes().to_vec())
            .ok_or_else(|| DriverError::HeaderNotFound(name.to_string()))
    }

    /// Copy as much buffered body as fits into `buf`
    fn drain_pending(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.pending.remaining());
        self.pending.copy_to_slice(&mut buf[..n]);
        n
    }
}

#[async_trait]
impl Connection for HttpConnection {
    fn kind(&self) -> BackendKind {
        BackendKind::Http
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, DriverError> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.pending.has_remaining() {
            return Ok(self.drain_pending(buf));
        }
        // end of body already seen
        let Some(response) = self.response.as_mut() else {
            return Ok(0);
        };
        loop {
            match response.chunk().await.map_err(DriverError::Transfer)? {
                Some(chunk) if chunk.is_empty() => continue,
                Some(chunk) => {
                    self.pending = chunk;
                    return Ok(self.drain_pending(buf));
                }
                None => {
                    self.response = None;
                    return Ok(0);
                }
            }
        }
    }

    async fn write(&mut self, _buf: &[u8]) -> Result<usize, DriverError> {
        Err(DriverError::Unsupported("write"))
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        self.response = None;
        self.pending = Bytes::new();
        Ok(())
    }

    fn status(&self) -> Result<u16, DriverError> {
        Ok(self.status.as_u16())
    }

    fn header(&self, name: &str) -> Result<Vec<u8>, DriverError> {
        Self::lookup_header(&self.headers, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_options() {
        let opts = HttpBackend::parse_options(r#"{"method":"get","readTimeout":3}"#).unwrap();
        assert_eq!(opts.method, "get");
        assert_eq!(opts.read_timeout, Some(3));

        assert!(matches!(
            HttpBackend::parse_options(r#"{"readTimeout":3}"#),
            Err(DriverError::BadParams(_))
        ));
        assert!(HttpBackend::parse_options("").is_err());
        assert!(HttpBackend::parse_options(r#"{"method":"  "}"#).is_err());
    }

    #[test]
    fn test_parse_method() {
        assert_eq!(HttpBackend::parse_method("get").unwrap(), Method::GET);
        assert_eq!(HttpBackend::parse_method("Post").unwrap(), Method::POST);
        assert!(HttpBackend::parse_method("not a method").is_err());
    }

    #[test]
    fn test_build_headers() {
        let mut headers = BTreeMap::new();
        headers.insert("x-trace".to_string(), "abc".to_string());
        let map = HttpBackend::build_headers(&headers).unwrap();
        assert_eq!(map.get("x-trace").unwrap(), "abc");

        headers.insert("bad header".to_string(), "v".to_string());
        assert!(HttpBackend::build_headers(&headers).is_err());
    }

    #[test]
    fn test_lookup_header() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("text/plain"));

        let value = HttpConnection::lookup_header(&headers, "Content-Type").unwrap();
        assert_eq!(value, b"text/plain");
        assert!(matches!(
            HttpConnection::lookup_header(&headers, "etag"),
            Err(DriverError::HeaderNotFound(name)) if name == "etag"
        ));
        assert!(matches!(
            HttpConnection::lookup_header(&headers, "bad name"),
            Err(DriverError::BadParams(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_url_is_bad_params() {
        let target = Target::parse("http://").unwrap_err();
        assert!(matches!(target, DriverError::BadParams(_)));

        let target = Target::parse("http://[::1").unwrap();
        let result = HttpBackend::new()
            .open(&target, r#"{"method":"get"}"#, &DriverConfig::default())
            .await;
        assert!(matches!(result, Err(DriverError::BadParams(_))));
    }
}
