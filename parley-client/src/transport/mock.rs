//! Mock transport for testing.
//!
//! Answers requests from per-route response queues and captures everything
//! that was sent for verification.

use super::{Method, Request, Response, Transport, TransportError, Upload};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Mock transport for testing.
///
/// Routes are matched against the end of the request URL; the longest
/// matching route wins. Queued responses are consumed first, then the
/// route's fixed response if one is set, otherwise a 404 is returned.
#[derive(Debug)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
    gate: Arc<watch::Sender<bool>>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    offline: bool,
    requests: Vec<Request>,
    uploads: Vec<Upload>,
    queued: HashMap<(Method, String), VecDeque<Response>>,
    fixed: HashMap<(Method, String), Response>,
    fail_next_request: Option<TransportError>,
    fail_next_upload: Option<TransportError>,
}

impl MockTransportInner {
    fn answer(&mut self, method: Method, url: &str) -> Response {
        let route = self
            .queued
            .iter()
            .filter(|((m, route), queue)| *m == method && url.ends_with(route.as_str()) && !queue.is_empty())
            .map(|((_, route), _)| route.clone())
            .max_by_key(|route| route.len());
        if let Some(route) = route {
            if let Some(response) = self
                .queued
                .get_mut(&(method, route))
                .and_then(VecDeque::pop_front)
            {
                return response;
            }
        }

        self.fixed
            .iter()
            .filter(|((m, route), _)| *m == method && url.ends_with(route.as_str()))
            .max_by_key(|((_, route), _)| route.len())
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| {
                Response::with_status(
                    404,
                    br#"{"status":"ERROR","notifications":[{"type":"error","message":"not found"}]}"#
                        .to_vec(),
                )
            })
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        let (gate, _) = watch::channel(false);
        Self {
            inner: Arc::default(),
            gate: Arc::new(gate),
        }
    }
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for the next matching call.
    pub fn queue_response(&self, method: Method, route: &str, response: Response) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .queued
            .entry((method, route.to_string()))
            .or_default()
            .push_back(response);
    }

    /// Answer every matching call with `response` once the queue is empty.
    pub fn set_response(&self, method: Method, route: &str, response: Response) {
        let mut inner = self.inner.lock().unwrap();
        inner.fixed.insert((method, route.to_string()), response);
    }

    /// Fail every call with the offline error while set.
    pub fn set_offline(&self, offline: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.offline = offline;
    }

    /// Cause the next request() to fail with the given error.
    pub fn fail_next_request(&self, error: TransportError) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_request = Some(error);
    }

    /// Cause the next upload() to fail with the given error.
    pub fn fail_next_upload(&self, error: TransportError) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_upload = Some(error);
    }

    /// Hold every call until [`MockTransport::resume`].
    pub fn pause(&self) {
        self.gate.send_replace(true);
    }

    /// Release held calls.
    pub fn resume(&self) {
        self.gate.send_replace(false);
    }

    /// All requests performed so far.
    pub fn requests(&self) -> Vec<Request> {
        let inner = self.inner.lock().unwrap();
        inner.requests.clone()
    }

    /// All uploads performed so far.
    pub fn uploads(&self) -> Vec<Upload> {
        let inner = self.inner.lock().unwrap();
        inner.uploads.clone()
    }

    /// Number of requests whose URL ends with `route`.
    pub fn request_count(&self, method: Method, route: &str) -> usize {
        let inner = self.inner.lock().unwrap();
        inner
            .requests
            .iter()
            .filter(|r| r.method == method && r.url.ends_with(route))
            .count()
    }

    /// Number of calls of any kind.
    pub fn total_calls(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.requests.len() + inner.uploads.len()
    }

    /// The last request performed.
    pub fn last_request(&self) -> Option<Request> {
        let inner = self.inner.lock().unwrap();
        inner.requests.last().cloned()
    }

    /// Clear all state (captures, queues, failures).
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        *inner = MockTransportInner::default();
    }

    async fn wait_for_gate(&self) {
        let mut gate = self.gate.subscribe();
        // The sender lives as long as self
        let _ = gate.wait_for(|paused| !*paused).await;
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            gate: Arc::clone(&self.gate),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn request(&self, request: Request) -> Result<Response, TransportError> {
        self.wait_for_gate().await;
        let mut inner = self.inner.lock().unwrap();

        if inner.offline {
            return Err(TransportError::offline());
        }

        // Check for forced failure
        if let Some(error) = inner.fail_next_request.take() {
            return Err(error);
        }

        let response = inner.answer(request.method, &request.url);
        inner.requests.push(request);
        Ok(response)
    }

    async fn upload(&self, upload: Upload) -> Result<Response, TransportError> {
        self.wait_for_gate().await;
        let mut inner = self.inner.lock().unwrap();

        if inner.offline {
            return Err(TransportError::offline());
        }

        // Check for forced failure
        if let Some(error) = inner.fail_next_upload.take() {
            return Err(error);
        }

        let response = inner.answer(upload.method, &upload.url);
        inner.uploads.push(upload);
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn upload() -> Upload {
        Upload {
            method: Method::Post,
            url: "https://api.test/v1/media".into(),
            headers: Default::default(),
            bytes: vec![1, 2, 3],
            mime_type: "image/png".into(),
            file_name: "a.png".into(),
        }
    }

    // ===========================================
    // MockTransport Basic Tests
    // ===========================================

    #[tokio::test]
    async fn answers_from_queue_then_fixed_response() {
        let transport = MockTransport::new();
        transport.queue_response(Method::Get, "messages", Response::ok(b"first".to_vec()));
        transport.set_response(Method::Get, "messages", Response::ok(b"fixed".to_vec()));

        let r1 = transport
            .request(Request::get("https://api.test/v1/messages"))
            .await
            .unwrap();
        let r2 = transport
            .request(Request::get("https://api.test/v1/messages"))
            .await
            .unwrap();

        assert_eq!(r1.body, b"first");
        assert_eq!(r2.body, b"fixed");
    }

    #[tokio::test]
    async fn longest_route_wins() {
        let transport = MockTransport::new();
        transport.set_response(Method::Get, "messages", Response::ok(b"all".to_vec()));
        transport.set_response(Method::Get, "messages/after:5", Response::ok(b"after".to_vec()));

        let response = transport
            .request(Request::get("https://api.test/v1/messages/after:5"))
            .await
            .unwrap();
        assert_eq!(response.body, b"after");
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let transport = MockTransport::new();
        let response = transport
            .request(Request::get("https://api.test/v1/nowhere"))
            .await
            .unwrap();
        assert_eq!(response.status, 404);
    }

    #[tokio::test]
    async fn records_requests_and_uploads() {
        let transport = MockTransport::new();
        transport
            .request(Request::post("https://api.test/v1/messages", b"{}".to_vec()))
            .await
            .unwrap();
        transport.upload(upload()).await.unwrap();

        assert_eq!(transport.request_count(Method::Post, "messages"), 1);
        assert_eq!(transport.uploads().len(), 1);
        assert_eq!(transport.total_calls(), 2);
        assert_eq!(
            transport.last_request().unwrap().url,
            "https://api.test/v1/messages"
        );
    }

    // ===========================================
    // Error Condition Tests
    // ===========================================

    #[tokio::test]
    async fn offline_mode_fails_everything() {
        let transport = MockTransport::new();
        transport.set_offline(true);

        let result = transport.request(Request::get("https://api.test/v1/messages")).await;
        assert!(result.unwrap_err().is_offline());
        assert!(transport.upload(upload()).await.unwrap_err().is_offline());
        assert_eq!(transport.total_calls(), 0);

        transport.set_offline(false);
        assert!(transport
            .request(Request::get("https://api.test/v1/messages"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn forced_request_failure_is_one_shot() {
        let transport = MockTransport::new();
        transport.fail_next_request(TransportError::new(500, "boom"));

        let result = transport.request(Request::get("https://api.test/v1/x")).await;
        assert_eq!(result.unwrap_err().code, 500);

        // Next request should work
        assert!(transport.request(Request::get("https://api.test/v1/x")).await.is_ok());
    }

    #[tokio::test]
    async fn forced_upload_failure_is_one_shot() {
        let transport = MockTransport::new();
        transport.fail_next_upload(TransportError::new(413, "too large"));

        assert_eq!(transport.upload(upload()).await.unwrap_err().code, 413);
        assert!(transport.upload(upload()).await.is_ok());
    }

    #[tokio::test]
    async fn pause_holds_calls_until_resume() {
        let transport = MockTransport::new();
        transport.pause();

        let held = transport.clone();
        let call = tokio::spawn(async move {
            held.request(Request::get("https://api.test/v1/messages")).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!call.is_finished());

        transport.resume();
        assert!(call.await.unwrap().is_ok());
    }

    // ===========================================
    // Clone and Shared State Tests
    // ===========================================

    #[tokio::test]
    async fn clone_shares_state() {
        let transport1 = MockTransport::new();
        let transport2 = transport1.clone();

        transport1.request(Request::get("https://a/1")).await.unwrap();
        transport2.request(Request::get("https://a/2")).await.unwrap();

        assert_eq!(transport1.requests().len(), 2);
    }

    #[tokio::test]
    async fn reset_clears_all() {
        let transport = MockTransport::new();
        transport.set_offline(true);
        transport.queue_response(Method::Get, "x", Response::ok(Vec::new()));

        transport.reset();

        assert!(transport.request(Request::get("https://a/x")).await.is_ok());
        assert_eq!(transport.requests().len(), 1);
    }
}
