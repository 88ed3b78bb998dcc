use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::transport::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, TransportError};

#[derive(Debug, Clone)]
enum MockReply {
    Respond(HttpResponse),
    Fail(TransportError),
}

/// In-memory [HttpTransport] that answers from canned replies and records every request.
///
/// Routes match on method and a substring of the URL, checked in the order they were added.
/// Unmatched requests get an empty 404.
#[derive(Debug, Default)]
pub struct MockTransport {
    routes: Vec<(HttpMethod, String, MockReply)>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(
        self,
        method: HttpMethod,
        path: &str,
        status: u16,
        body: impl Into<Bytes>,
    ) -> Self {
        self.with_slow_response(method, path, status, body, Duration::from_millis(5))
    }

    pub fn with_slow_response(
        mut self,
        method: HttpMethod,
        path: &str,
        status: u16,
        body: impl Into<Bytes>,
        duration: Duration,
    ) -> Self {
        self.routes.push((
            method,
            path.to_string(),
            MockReply::Respond(HttpResponse {
                status,
                body: body.into(),
                duration,
            }),
        ));
        self
    }

    pub fn with_failure(mut self, method: HttpMethod, path: &str, error: TransportError) -> Self {
        self.routes
            .push((method, path.to_string(), MockReply::Fail(error)));
        self
    }

    /// Every request sent so far, oldest first.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub fn count(&self, method: HttpMethod, path: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.method == method && r.url.contains(path))
            .count()
    }
}

#[async_trait::async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let reply = self
            .routes
            .iter()
            .find(|(method, path, _)| {
                *method == request.method && request.url.contains(path.as_str())
            })
            .map(|(_, _, reply)| reply.clone());
        self.requests.lock().push(request);

        match reply {
            Some(MockReply::Respond(response)) => Ok(response),
            Some(MockReply::Fail(error)) => Err(error),
            None => Ok(HttpResponse {
                status: 404,
                body: Bytes::new(),
                duration: Duration::from_millis(1),
            }),
        }
    }
}
