//! Exchange request snapshot.

use std::net::IpAddr;

use crate::error::Error;

/// A caller-supplied request, snapshotted at submission.
///
/// All strings are owned copies; the engine never borrows caller memory
/// past the `submit` call. Headers keep submission order and may repeat
/// keys.
#[derive(Debug, Clone)]
pub struct Request {
    url: String,
    method: String,
    headers: Vec<(String, String)>,
    content_length: Option<u64>,
    resolve: Option<IpAddr>,
}

impl Default for Request {
    fn default() -> Self {
        Request {
            url: String::new(),
            method: "GET".to_string(),
            headers: Vec::new(),
            content_length: None,
            resolve: None,
        }
    }
}

impl Request {
    /// Start a request for `url`. Method defaults to GET.
    pub fn new(url: impl Into<String>) -> Self {
        Request {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the request method.
    pub fn method(mut self, method: &str) -> Self {
        self.method = method.to_string();
        self
    }

    /// Append a header. Order is preserved and keys may repeat.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Declare the upload body length.
    pub fn content_length(mut self, len: u64) -> Self {
        self.content_length = Some(len);
        self
    }

    /// Override DNS resolution with a fixed address.
    pub fn resolve(mut self, addr: IpAddr) -> Self {
        self.resolve = Some(addr);
        self
    }

    /// Target URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Request method.
    pub fn method_name(&self) -> &str {
        &self.method
    }

    /// Caller headers in submission order.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Declared upload body length, if any.
    pub fn declared_length(&self) -> Option<u64> {
        self.content_length
    }

    /// Resolved-IP override, if any.
    pub fn resolve_addr(&self) -> Option<IpAddr> {
        self.resolve
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.url.is_empty() {
            return Err(Error::Setup("request url is empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_preserves_header_order_and_duplicates() {
        let req = Request::new("https://example.com/a")
            .method("PUT")
            .header("accept", "text/plain")
            .header("x-tag", "1")
            .header("x-tag", "2")
            .content_length(12);

        assert_eq!(req.url(), "https://example.com/a");
        assert_eq!(req.method_name(), "PUT");
        assert_eq!(req.declared_length(), Some(12));
        assert_eq!(
            req.headers(),
            &[
                ("accept".to_string(), "text/plain".to_string()),
                ("x-tag".to_string(), "1".to_string()),
                ("x-tag".to_string(), "2".to_string()),
            ]
        );
    }

    #[test]
    fn empty_url_fails_validation() {
        assert!(Request::new("").validate().is_err());
        assert!(Request::new("http://localhost/").validate().is_ok());
    }
}
