//! HTTP driver: talks to the automation sidecar.
//!
//! The sidecar owns the actual browser (tabs, navigation, upload widgets)
//! and exposes one endpoint per capability:
//!
//! - `POST /session/{slot}/open`
//! - `POST /session/{slot}/message` with `{text, attachments}`
//! - `POST /session/{slot}/reset`
//! - `GET  /system`
//!
//! Failures come back as `{error, kind}` where kind is one of `timeout`,
//! `dead`, `login_expired`, `failed`; unreachable sidecar counts as dead.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::DriverConfig;
use crate::slot::SlotId;

use super::{Attachment, BrowserDriver, DriverError, SystemInfo};

pub struct HttpDriver {
    base_url: String,
    client: reqwest::Client,
    request_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct MessageReply {
    reply: String,
}

#[derive(Debug, Default, Deserialize)]
struct SidecarError {
    #[serde(default)]
    error: String,
    #[serde(default)]
    kind: Option<String>,
}

impl HttpDriver {
    pub fn new(config: &DriverConfig) -> Result<Self, DriverError> {
        let mut headers = reqwest::header::HeaderMap::new();
        let user_agent = format!("tabpool/{}", env!("CARGO_PKG_VERSION"));
        if let Ok(value) = reqwest::header::HeaderValue::from_str(&user_agent) {
            headers.insert(reqwest::header::USER_AGENT, value);
        }

        // No client-wide timeout: message round trips run under the pool's
        // send deadline, which may be far longer than control calls.
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| DriverError::Failed(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
            request_timeout: config.request_timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, DriverError> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body: SidecarError = response.json().await.unwrap_or_default();

        Err(match body.kind.as_deref() {
            Some("timeout") => DriverError::Timeout,
            Some("dead") => DriverError::Dead(body.error),
            Some("login_expired") => DriverError::LoginExpired,
            _ => DriverError::Failed(format!("sidecar returned {status}: {}", body.error)),
        })
    }

    fn transport_error(e: reqwest::Error) -> DriverError {
        if e.is_timeout() {
            DriverError::Timeout
        } else if e.is_connect() {
            DriverError::Dead(format!("sidecar unreachable: {e}"))
        } else {
            DriverError::Failed(e.to_string())
        }
    }
}

#[async_trait]
impl BrowserDriver for HttpDriver {
    async fn open_session(&self, slot: SlotId) -> Result<(), DriverError> {
        let response = self
            .client
            .post(self.url(&format!("/session/{slot}/open")))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(Self::transport_error)?;
        Self::check(response).await?;
        Ok(())
    }

    async fn send_message(
        &self,
        slot: SlotId,
        text: &str,
        attachments: &[Attachment],
    ) -> Result<String, DriverError> {
        let paths: Vec<&str> = attachments
            .iter()
            .filter_map(|a| a.path.to_str())
            .collect();

        let response = self
            .client
            .post(self.url(&format!("/session/{slot}/message")))
            .json(&serde_json::json!({
                "text": text,
                "attachments": paths,
            }))
            .send()
            .await
            .map_err(Self::transport_error)?;

        let reply: MessageReply = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| DriverError::Failed(format!("malformed sidecar reply: {e}")))?;
        Ok(reply.reply)
    }

    async fn reset_session(&self, slot: SlotId) -> Result<(), DriverError> {
        let response = self
            .client
            .post(self.url(&format!("/session/{slot}/reset")))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(Self::transport_error)?;
        Self::check(response).await?;
        Ok(())
    }

    async fn system_info(&self) -> SystemInfo {
        let result = self
            .client
            .get(self.url("/system"))
            .timeout(self.request_timeout)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                response.json().await.unwrap_or(SystemInfo {
                    driver_alive: false,
                    login_ok: false,
                })
            }
            Ok(response) => {
                tracing::warn!(status = %response.status(), "Sidecar system probe failed");
                SystemInfo {
                    driver_alive: false,
                    login_ok: false,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Sidecar unreachable");
                SystemInfo {
                    driver_alive: false,
                    login_ok: false,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn driver_for(server: &MockServer) -> HttpDriver {
        HttpDriver::new(&DriverConfig {
            base_url: server.uri(),
            request_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn send_message_posts_text_and_returns_reply() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/session/2/message"))
            .and(body_partial_json(serde_json::json!({"text": "hello"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"reply": "hi back"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let driver = driver_for(&server);
        let reply = driver.send_message(SlotId(2), "hello", &[]).await.unwrap();
        assert_eq!(reply, "hi back");
    }

    #[tokio::test]
    async fn error_kinds_map_to_driver_errors() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/session/0/message"))
            .respond_with(ResponseTemplate::new(409).set_body_json(
                serde_json::json!({"error": "auth gone", "kind": "login_expired"}),
            ))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/session/0/message"))
            .respond_with(ResponseTemplate::new(502).set_body_json(
                serde_json::json!({"error": "browser crashed", "kind": "dead"}),
            ))
            .mount(&server)
            .await;

        let driver = driver_for(&server);

        let err = driver.send_message(SlotId(0), "x", &[]).await.unwrap_err();
        assert!(matches!(err, DriverError::LoginExpired));

        let err = driver.send_message(SlotId(0), "x", &[]).await.unwrap_err();
        assert!(matches!(err, DriverError::Dead(detail) if detail.contains("crashed")));
    }

    #[tokio::test]
    async fn unparseable_error_body_falls_back_to_failed() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/session/1/open"))
            .respond_with(ResponseTemplate::new(500).set_body_string("not json"))
            .mount(&server)
            .await;

        let driver = driver_for(&server);
        let err = driver.open_session(SlotId(1)).await.unwrap_err();
        assert!(matches!(err, DriverError::Failed(detail) if detail.contains("500")));
    }

    #[tokio::test]
    async fn reset_hits_the_session_reset_endpoint() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/session/3/reset"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let driver = driver_for(&server);
        driver.reset_session(SlotId(3)).await.unwrap();
    }

    #[tokio::test]
    async fn system_info_deserializes() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/system"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"driver_alive": true, "login_ok": false}),
            ))
            .mount(&server)
            .await;

        let driver = driver_for(&server);
        let info = driver.system_info().await;
        assert!(info.driver_alive);
        assert!(!info.login_ok);
    }

    #[tokio::test]
    async fn unreachable_sidecar_reports_dead() {
        // A dropped wiremock server keeps its port bound (pooled listener),
        // so use a bound-then-dropped listener to get a refused connection.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let driver = HttpDriver::new(&DriverConfig {
            base_url: format!("http://{addr}"),
            request_timeout: Duration::from_secs(5),
        })
        .unwrap();

        let info = driver.system_info().await;
        assert!(!info.driver_alive);

        let err = driver.open_session(SlotId(0)).await.unwrap_err();
        assert!(matches!(err, DriverError::Dead(_)));
    }
}
