//! Hosted coordinator client.
//!
//! Lock transitions go through two edge functions; the record itself is
//! read and heartbeat-stamped through the REST interface of the table that
//! stores it.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::json;
use url::Url;

use super::{CoordinatorError, LockCoordinator};
use crate::config::CoordinatorConfig;
use crate::identity::{DeviceId, Session};
use crate::lock::LockRecord;

const REQUEST_FUNCTION: &str = "functions/v1/request-stream-lock";
const RELEASE_FUNCTION: &str = "functions/v1/release-stream-lock";
const LOCK_TABLE: &str = "rest/v1/stream_lock";

/// Coordinator reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpCoordinator {
    client: Client,
    base_url: Url,
    api_key: String,
}

impl HttpCoordinator {
    /// Builds a client from configuration.
    ///
    /// # Errors
    ///
    /// - `CoordinatorError::Transport` - No base URL configured
    /// - `CoordinatorError::Http` - HTTP client could not be built
    pub fn new(config: &CoordinatorConfig) -> Result<Self, CoordinatorError> {
        let mut base_url = config
            .base_url
            .clone()
            .ok_or_else(|| CoordinatorError::Transport {
                reason: "no coordinator base URL configured".to_string(),
            })?;

        // Url::join drops the last path segment unless it ends with a slash.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent)
            .build()?;

        Ok(Self {
            client,
            base_url,
            api_key: config.api_key.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, CoordinatorError> {
        Ok(self.base_url.join(path)?)
    }

    fn record_url(&self, session: &Session) -> Result<Url, CoordinatorError> {
        let mut url = self.endpoint(LOCK_TABLE)?;
        url.query_pairs_mut()
            .append_pair("user_id", &format!("eq.{}", session.user_id));
        Ok(url)
    }

    fn authorized(&self, builder: RequestBuilder, session: &Session) -> RequestBuilder {
        builder
            .header("apikey", &self.api_key)
            .bearer_auth(&session.access_token)
    }

    async fn invoke(
        &self,
        session: &Session,
        function: &str,
        body: serde_json::Value,
    ) -> Result<(), CoordinatorError> {
        let url = self.endpoint(function)?;
        tracing::debug!("Invoking {}", url);
        let response = self
            .authorized(self.client.post(url), session)
            .json(&body)
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }
}

async fn ensure_success(response: Response) -> Result<Response, CoordinatorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(CoordinatorError::Rejected {
        reason: format!("{status}: {body}"),
    })
}

#[async_trait]
impl LockCoordinator for HttpCoordinator {
    async fn request_lock(
        &self,
        session: &Session,
        device_id: &DeviceId,
    ) -> Result<(), CoordinatorError> {
        self.invoke(
            session,
            REQUEST_FUNCTION,
            json!({ "requestingDeviceId": device_id }),
        )
        .await
    }

    async fn release_lock(
        &self,
        session: &Session,
        device_id: &DeviceId,
    ) -> Result<(), CoordinatorError> {
        self.invoke(
            session,
            RELEASE_FUNCTION,
            json!({ "releasingDeviceId": device_id }),
        )
        .await
    }

    async fn heartbeat(
        &self,
        session: &Session,
        device_id: &DeviceId,
    ) -> Result<(), CoordinatorError> {
        let mut url = self.record_url(session)?;
        url.query_pairs_mut()
            .append_pair("locked_by_device_id", &format!("eq.{device_id}"));

        let response = self
            .authorized(self.client.patch(url), session)
            .header("Prefer", "return=minimal")
            .json(&json!({ "last_heartbeat_at": Utc::now() }))
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn fetch_record(&self, session: &Session) -> Result<Option<LockRecord>, CoordinatorError> {
        let mut url = self.record_url(session)?;
        url.query_pairs_mut().append_pair("select", "*");

        let response = self
            .authorized(self.client.get(url), session)
            .send()
            .await?;
        let rows: Vec<LockRecord> = ensure_success(response).await?.json().await?;

        match rows.into_iter().next() {
            Some(record) => {
                record
                    .validate()
                    .map_err(|e| CoordinatorError::InvalidRecord {
                        reason: e.to_string(),
                    })?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::UserId;

    fn coordinator(base: &str) -> HttpCoordinator {
        let config = CoordinatorConfig {
            base_url: Some(Url::parse(base).unwrap()),
            api_key: "anon-key".to_string(),
            ..Default::default()
        };
        HttpCoordinator::new(&config).unwrap()
    }

    #[test]
    fn test_missing_base_url_is_rejected() {
        let result = HttpCoordinator::new(&CoordinatorConfig::default());
        assert!(matches!(result, Err(CoordinatorError::Transport { .. })));
    }

    #[test]
    fn test_function_endpoint_keeps_base_path() {
        let coordinator = coordinator("https://example.test/project");
        let url = coordinator.endpoint(REQUEST_FUNCTION).unwrap();
        assert_eq!(
            url.as_str(),
            "https://example.test/project/functions/v1/request-stream-lock"
        );
    }

    #[test]
    fn test_record_url_filters_by_user() {
        let coordinator = coordinator("https://example.test");
        let session = Session::new(UserId::new("user-1"), "token");
        let url = coordinator.record_url(&session).unwrap();
        assert_eq!(
            url.as_str(),
            "https://example.test/rest/v1/stream_lock?user_id=eq.user-1"
        );
    }
}
