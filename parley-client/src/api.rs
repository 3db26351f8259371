//! Remote API facade.
//!
//! Builds requests for each endpoint, sends them through the [`Transport`]
//! and decodes the response envelope.

use std::collections::BTreeMap;
use std::sync::Arc;

use parley_types::{
    ApiResponse, DeviceId, LocalMedia, Message, MessageCollection, RemoteId, TypesError,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::NetworkConfig;
use crate::error::ApiError;
use crate::transport::{Method, Request, Response, Transport, Upload};

/// Header identifying the account and device.
pub const IDENTIFICATION_HEADER: &str = "x-iris-identification";

/// SDK version reported at device registration.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Body of the device registration call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRegistration {
    /// Push token, if the host registered one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_token: Option<String>,
    /// Push provider, e.g. `fcm` or `apns`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_type: Option<String>,
    /// Whether push delivery is enabled
    pub push_enabled: bool,
    /// Free-form user details
    pub user_additional_information: BTreeMap<String, String>,
    /// Client version
    pub version: String,
}

/// Event the local user reports to the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserEvent {
    /// The user started typing
    StartTyping,
    /// The user stopped typing
    StopTyping,
}

impl UserEvent {
    fn endpoint(self) -> &'static str {
        match self {
            UserEvent::StartTyping => "services/event/userStartTyping",
            UserEvent::StopTyping => "services/event/userStopTyping",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredMessage {
    message_id: RemoteId,
}

#[derive(Debug, Deserialize)]
struct UploadedMedia {
    media: String,
}

/// Client for the remote API.
#[derive(Clone)]
pub struct ParleyApi {
    transport: Arc<dyn Transport>,
    base_url: String,
    headers: BTreeMap<String, String>,
}

impl std::fmt::Debug for ParleyApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Headers carry the secret and authorization
        f.debug_struct("ParleyApi")
            .field("base_url", &self.base_url)
            .field("headers", &format!("[{} headers]", self.headers.len()))
            .finish()
    }
}

impl ParleyApi {
    /// Create an API client without session headers.
    pub fn new(transport: Arc<dyn Transport>, network: &NetworkConfig) -> Self {
        let mut headers = network.headers.clone();
        headers.insert("Content-Type".into(), "application/json".into());
        Self {
            transport,
            base_url: network.base_url(),
            headers,
        }
    }

    /// Add the identification and authorization headers.
    pub fn with_session(
        mut self,
        secret: &str,
        device_id: &DeviceId,
        authorization: Option<&str>,
    ) -> Self {
        self.headers.insert(
            IDENTIFICATION_HEADER.into(),
            format!("parley:{}:{}", secret, device_id),
        );
        match authorization {
            Some(token) => {
                self.headers.insert("Authorization".into(), token.to_string());
            }
            None => {
                self.headers.remove("Authorization");
            }
        }
        self
    }

    /// Headers sent with every call.
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    async fn call<T: DeserializeOwned>(&self, request: Request) -> Result<ApiResponse<T>, ApiError> {
        debug!(method = ?request.method, url = %request.url, "API request");
        let response = self
            .transport
            .request(request.with_headers(self.headers.clone()))
            .await?;
        decode(response)
    }

    /// Register this device.
    pub async fn register_device(&self, registration: &DeviceRegistration) -> Result<(), ApiError> {
        let body = serde_json::to_vec(registration).map_err(TypesError::JsonEncode)?;
        self.call::<serde_json::Value>(Request::post(self.url("devices"), body))
            .await
            .map(|_| ())
    }

    /// Fetch the full conversation.
    pub async fn get_messages(&self) -> Result<MessageCollection, ApiError> {
        self.messages_at("messages").await
    }

    /// Fetch messages newer than `id`.
    pub async fn get_messages_after(&self, id: RemoteId) -> Result<MessageCollection, ApiError> {
        self.messages_at(&format!("messages/after:{}", id.value())).await
    }

    /// Fetch the older page the paging cursor points at.
    pub async fn get_messages_before(&self, cursor: &str) -> Result<MessageCollection, ApiError> {
        self.messages_at(cursor).await
    }

    async fn messages_at(&self, endpoint: &str) -> Result<MessageCollection, ApiError> {
        let response = self
            .call::<Vec<Message>>(Request::get(self.url(endpoint)))
            .await?;
        Ok(MessageCollection::from(response))
    }

    /// Fetch one message.
    pub async fn get_message(&self, id: RemoteId) -> Result<Message, ApiError> {
        let response = self
            .call::<Message>(Request::get(self.url(&format!("messages/{}", id.value()))))
            .await?;
        Ok(response.into_data()?)
    }

    /// Store a message remotely, returning its remote id.
    pub async fn store_message(&self, message: &Message) -> Result<RemoteId, ApiError> {
        let body = message.outgoing().to_json()?;
        let response = self
            .call::<StoredMessage>(Request::post(self.url("messages"), body))
            .await?;
        Ok(response.into_data()?.message_id)
    }

    /// Upload media, returning the remote media id.
    pub async fn upload_media(&self, media: &LocalMedia) -> Result<String, ApiError> {
        let mut headers = self.headers.clone();
        headers.remove("Content-Type");
        let upload = Upload {
            method: Method::Post,
            url: self.url("media"),
            headers,
            bytes: media.bytes.clone(),
            mime_type: media.mime_type.clone(),
            file_name: media.file_name.clone(),
        };
        debug!(url = %upload.url, size = media.bytes.len(), "API upload");
        let response = self.transport.upload(upload).await?;
        Ok(decode::<UploadedMedia>(response)?.into_data()?.media)
    }

    /// Report a user event.
    pub async fn send_event(&self, event: UserEvent) -> Result<(), ApiError> {
        self.call::<serde_json::Value>(Request::post(self.url(event.endpoint()), b"{}".to_vec()))
            .await
            .map(|_| ())
    }
}

fn decode<T: DeserializeOwned>(response: Response) -> Result<ApiResponse<T>, ApiError> {
    if !response.is_success() {
        let message = ApiResponse::<serde_json::Value>::from_json(&response.body)
            .ok()
            .and_then(|r| r.error_message().map(str::to_string))
            .unwrap_or_default();
        return Err(ApiError::Status {
            code: response.status,
            message,
        });
    }
    Ok(ApiResponse::<T>::from_json(&response.body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockTransport, TransportError};

    fn api(transport: &MockTransport) -> ParleyApi {
        let network = NetworkConfig {
            url: "https://api.test".into(),
            path: "v1".into(),
            headers: BTreeMap::new(),
        };
        ParleyApi::new(Arc::new(transport.clone()), &network).with_session(
            "secret",
            &DeviceId::from_bytes(&[7u8; 32]).unwrap(),
            Some("Bearer token"),
        )
    }

    #[tokio::test]
    async fn session_headers_are_sent() {
        let transport = MockTransport::new();
        transport.set_response(Method::Get, "messages", Response::ok(br#"{"data":[]}"#.to_vec()));

        api(&transport).get_messages().await.unwrap();

        let request = transport.last_request().unwrap();
        assert_eq!(request.url, "https://api.test/v1/messages");
        let identification = &request.headers[IDENTIFICATION_HEADER];
        assert!(identification.starts_with("parley:secret:"));
        assert_eq!(request.headers["Authorization"], "Bearer token");
    }

    #[tokio::test]
    async fn after_and_before_urls() {
        let transport = MockTransport::new();
        transport.set_response(Method::Get, "messages/after:5", Response::ok(br#"{"data":[]}"#.to_vec()));
        transport.set_response(Method::Get, "messages/before:2", Response::ok(br#"{"data":[]}"#.to_vec()));

        let api = api(&transport);
        api.get_messages_after(RemoteId::new(5)).await.unwrap();
        api.get_messages_before("/messages/before:2").await.unwrap();

        let urls: Vec<String> = transport.requests().into_iter().map(|r| r.url).collect();
        assert_eq!(
            urls,
            vec![
                "https://api.test/v1/messages/after:5".to_string(),
                "https://api.test/v1/messages/before:2".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn store_message_returns_remote_id() {
        let transport = MockTransport::new();
        transport.set_response(
            Method::Post,
            "messages",
            Response::ok(br#"{"status":"SUCCESS","data":{"messageId":42}}"#.to_vec()),
        );

        let id = api(&transport)
            .store_message(&Message::user_text("hi"))
            .await
            .unwrap();

        assert_eq!(id, RemoteId::new(42));
        let body: serde_json::Value =
            serde_json::from_slice(&transport.last_request().unwrap().body.unwrap()).unwrap();
        assert_eq!(body["message"], "hi");
    }

    #[tokio::test]
    async fn status_error_carries_notification_text() {
        let transport = MockTransport::new();
        transport.set_response(
            Method::Post,
            "messages",
            Response::with_status(
                400,
                br#"{"status":"ERROR","notifications":[{"type":"error","message":"too long"}]}"#.to_vec(),
            ),
        );

        let error = api(&transport)
            .store_message(&Message::user_text("hi"))
            .await
            .unwrap_err();

        assert_eq!(error.server_message(), Some("too long"));
        assert_eq!(error.code(), 400);
    }

    #[tokio::test]
    async fn upload_returns_media_id() {
        let transport = MockTransport::new();
        transport.set_response(
            Method::Post,
            "media",
            Response::ok(br#"{"data":{"media":"/media/abc.png"}}"#.to_vec()),
        );
        let media = LocalMedia {
            bytes: vec![1, 2],
            mime_type: "image/png".into(),
            file_name: "abc.png".into(),
        };

        let id = api(&transport).upload_media(&media).await.unwrap();

        assert_eq!(id, "/media/abc.png");
        let upload = &transport.uploads()[0];
        assert!(!upload.headers.contains_key("Content-Type"));
    }

    #[tokio::test]
    async fn offline_is_classified() {
        let transport = MockTransport::new();
        transport.fail_next_request(TransportError::offline());

        let error = api(&transport).get_messages().await.unwrap_err();
        assert!(error.is_offline());
    }

    #[tokio::test]
    async fn garbage_body_is_decode_error() {
        let transport = MockTransport::new();
        transport.set_response(Method::Get, "messages", Response::ok(b"<html>".to_vec()));

        let error = api(&transport).get_messages().await.unwrap_err();
        assert!(matches!(error, ApiError::Decode(_)));
    }

    #[tokio::test]
    async fn registration_body_shape() {
        let transport = MockTransport::new();
        transport.set_response(Method::Post, "devices", Response::ok(b"{}".to_vec()));

        let mut registration = DeviceRegistration {
            push_token: Some("tok".into()),
            push_type: Some("fcm".into()),
            push_enabled: true,
            version: SDK_VERSION.into(),
            ..Default::default()
        };
        registration
            .user_additional_information
            .insert("referrer".into(), "https://shop.test".into());
        api(&transport).register_device(&registration).await.unwrap();

        let body: serde_json::Value =
            serde_json::from_slice(&transport.last_request().unwrap().body.unwrap()).unwrap();
        assert_eq!(body["pushToken"], "tok");
        assert_eq!(body["pushEnabled"], true);
        assert_eq!(body["userAdditionalInformation"]["referrer"], "https://shop.test");
    }
}
