//! Scripted transport for tests.

use crate::error::{FetchError, FetchOutcome};
use crate::fetch::{HttpRequest, HttpResponse, Transport};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone)]
enum Reply {
    Respond(u16, Vec<u8>),
    Hang,
    Fail(String),
}

/// Canned replies keyed by exact URL. Unknown URLs answer 404.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    replies: HashMap<String, Reply>,
    sent: Mutex<Vec<(HttpRequest, Instant)>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ok(self, url: &str, body: &str) -> Self {
        self.status(url, 200, body)
    }

    pub fn status(self, url: &str, status: u16, body: &str) -> Self {
        self.bytes(url, status, body.as_bytes().to_vec())
    }

    pub fn bytes(mut self, url: &str, status: u16, body: Vec<u8>) -> Self {
        self.replies.insert(url.to_string(), Reply::Respond(status, body));
        self
    }

    pub fn hang(mut self, url: &str) -> Self {
        self.replies.insert(url.to_string(), Reply::Hang);
        self
    }

    pub fn fail(mut self, url: &str, message: &str) -> Self {
        self.replies.insert(url.to_string(), Reply::Fail(message.to_string()));
        self
    }

    /// URLs requested so far, in order.
    pub fn requested(&self) -> Vec<String> {
        self.sent
            .lock()
            .map(|sent| sent.iter().map(|(r, _)| r.url.clone()).collect())
            .unwrap_or_default()
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.sent
            .lock()
            .map(|sent| sent.iter().map(|(r, _)| r.clone()).collect())
            .unwrap_or_default()
    }

    /// Issue times of requests whose URL contains `needle`.
    pub fn times_for(&self, needle: &str) -> Vec<Instant> {
        self.sent
            .lock()
            .map(|sent| {
                sent.iter()
                    .filter(|(r, _)| r.url.contains(needle))
                    .map(|(_, t)| *t)
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Transport for ScriptedTransport {
    async fn send(&self, request: &HttpRequest) -> FetchOutcome<HttpResponse> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((request.clone(), Instant::now()));
        }
        match self.replies.get(&request.url).cloned() {
            Some(Reply::Respond(status, body)) => Ok(HttpResponse { status, body }),
            Some(Reply::Hang) => std::future::pending().await,
            Some(Reply::Fail(message)) => Err(FetchError::Connection(message)),
            None => Ok(HttpResponse {
                status: 404,
                body: Vec::new(),
            }),
        }
    }
}
