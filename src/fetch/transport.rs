//! The HTTP collaborator.
//!
//! The pipeline never talks to `reqwest` directly; it goes through
//! [`Transport`], so tests can substitute a scripted implementation. The
//! transport performs no timeout handling of its own, [`BoundedFetcher`]
//! owns that.
//!
//! [`BoundedFetcher`]: super::BoundedFetcher

use crate::error::{FetchError, FetchOutcome};
use reqwest::Client;
use tracing::{debug, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// One outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// URL-encoded form body, only sent for `POST`.
    pub form: Vec<(String, String)>,
    pub basic_auth: Option<(String, String)>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            form: Vec::new(),
            basic_auth: None,
        }
    }

    pub fn post_form(url: impl Into<String>, form: Vec<(String, String)>) -> Self {
        Self {
            method: Method::Post,
            form,
            ..Self::get(url)
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn basic_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.basic_auth = Some((user.into(), password.into()));
        self
    }
}

/// Status and fully read body of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Send a request and read its whole body.
///
/// Implementations report connection-level problems as
/// [`FetchError::Connection`]; status codes are returned, not judged.
pub trait Transport {
    async fn send(&self, request: &HttpRequest) -> FetchOutcome<HttpResponse>;
}

/// [`Transport`] backed by one shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(user_agent: &str) -> Result<Self, reqwest::Error> {
        let client = Client::builder().user_agent(user_agent).build()?;
        Ok(Self { client })
    }
}

impl Transport for ReqwestTransport {
    #[instrument(level = "debug", skip_all, fields(url = %request.url))]
    async fn send(&self, request: &HttpRequest) -> FetchOutcome<HttpResponse> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url).form(&request.form),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some((user, password)) = &request.basic_auth {
            builder = builder.basic_auth(user, Some(password));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| FetchError::Connection(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Connection(e.to_string()))?;
        debug!(status, bytes = body.len(), "Response received");

        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builders() {
        let req = HttpRequest::post_form(
            "https://www.reddit.com/api/v1/access_token",
            vec![("grant_type".into(), "client_credentials".into())],
        )
        .header("Accept", "application/json")
        .basic_auth("id", "secret");

        assert_eq!(req.method, Method::Post);
        assert_eq!(req.form.len(), 1);
        assert_eq!(req.headers, vec![("Accept".to_string(), "application/json".to_string())]);
        assert_eq!(req.basic_auth, Some(("id".to_string(), "secret".to_string())));
        assert_eq!(HttpRequest::get("u").method, Method::Get);
    }
}
