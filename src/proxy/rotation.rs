//! Proxy rotation client
//!
//! Rotation endpoints are plain HTTP GET URLs that move the proxy to a fresh
//! IP and answer `{"success": 1}`. They are external and flaky, so the client
//! retries a small fixed number of times and then gives up; the bound
//! account is skipped for the run instead of retrying forever.

use std::time::Duration;
use async_trait::async_trait;
use tracing::{info, warn, debug};

use super::{ProxyDescriptor, ProxyError};
use crate::pacing::calculate_backoff_with_jitter;

/// Default attempt cap for one rotation
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

/// Rotation seam: the worker only needs "give this proxy a fresh IP".
/// Tests substitute a recording fake to assert ordering and retry caps.
#[async_trait]
pub trait ProxyRotator: Send + Sync {
    async fn rotate(&self, proxy: &ProxyDescriptor) -> Result<(), ProxyError>;
}

/// HTTP rotation client with a bounded retry policy
pub struct HttpRotator {
    client: reqwest::Client,
    max_attempts: u32,
    backoff_base_ms: u64,
}

impl HttpRotator {
    /// Create a rotation client.
    ///
    /// Built with `no_proxy`: the rotation endpoint must be reached
    /// directly, never through the egress that is being rotated.
    pub fn new() -> Result<Self, ProxyError> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ProxyError::Client(format!("failed to build rotation client: {}", e)))?;

        Ok(Self {
            client,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base_ms: 500,
        })
    }

    /// Set the attempt cap
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the base backoff between attempts
    pub fn with_backoff_base(mut self, base_ms: u64) -> Self {
        self.backoff_base_ms = base_ms;
        self
    }

    async fn try_rotate(&self, proxy: &ProxyDescriptor) -> Result<(), String> {
        let response = self
            .client
            .get(&proxy.rotation_url)
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;

        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| format!("invalid rotation response: {}", e))?;

        if data.get("success").and_then(|v| v.as_i64()) == Some(1) {
            Ok(())
        } else {
            let message = data
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error");
            Err(message.to_string())
        }
    }
}

#[async_trait]
impl ProxyRotator for HttpRotator {
    async fn rotate(&self, proxy: &ProxyDescriptor) -> Result<(), ProxyError> {
        if !proxy.has_rotation_endpoint() {
            return Err(ProxyError::RotationFailed {
                server: proxy.server.clone(),
                attempts: 0,
                reason: "no rotation endpoint configured".to_string(),
            });
        }

        let mut last_error = String::new();
        for attempt in 1..=self.max_attempts {
            debug!(
                "Rotating {} via {} (attempt {}/{})",
                proxy.server, proxy.rotation_url, attempt, self.max_attempts
            );

            match self.try_rotate(proxy).await {
                Ok(()) => {
                    info!("Rotated proxy {} on attempt {}", proxy.server, attempt);
                    return Ok(());
                }
                Err(reason) => {
                    warn!(
                        "Rotation attempt {}/{} for {} failed: {}",
                        attempt, self.max_attempts, proxy.server, reason
                    );
                    last_error = reason;
                    if attempt < self.max_attempts {
                        let backoff =
                            calculate_backoff_with_jitter(attempt, self.backoff_base_ms, 5000);
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }

        Err(ProxyError::RotationFailed {
            server: proxy.server.clone(),
            attempts: self.max_attempts,
            reason: last_error,
        })
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    /// Minimal HTTP endpoint that answers every request with `body`
    /// and counts hits.
    async fn spawn_endpoint(body: &'static str, hits: Arc<AtomicUsize>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                hits.fetch_add(1, Ordering::SeqCst);

                // Drain the request head before answering
                let mut buf = [0u8; 2048];
                let mut seen = Vec::new();
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) => break,
                        Ok(n) => {
                            seen.extend_from_slice(&buf[..n]);
                            if seen.windows(4).any(|w| w == b"\r\n\r\n") {
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }

                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        format!("http://{}/rotate", addr)
    }

    fn descriptor_with_rotation(rotation_url: String) -> ProxyDescriptor {
        ProxyDescriptor {
            server: "http://10.0.0.1:8080".to_string(),
            username: "user".to_string(),
            password: "pass".to_string(),
            rotation_url,
        }
    }

    #[tokio::test]
    async fn test_rotation_succeeds_on_success_response() {
        let hits = Arc::new(AtomicUsize::new(0));
        let url = spawn_endpoint(r#"{"success": 1, "message": "IP changed"}"#, hits.clone()).await;

        let rotator = HttpRotator::new().unwrap().with_backoff_base(10);
        rotator
            .rotate(&descriptor_with_rotation(url))
            .await
            .unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rotation_retries_up_to_cap_then_fails() {
        let hits = Arc::new(AtomicUsize::new(0));
        let url = spawn_endpoint(
            r#"{"success": 0, "error": "please rotate IP every 1 minutes"}"#,
            hits.clone(),
        )
        .await;

        let rotator = HttpRotator::new()
            .unwrap()
            .with_max_attempts(2)
            .with_backoff_base(10);

        let err = rotator
            .rotate(&descriptor_with_rotation(url))
            .await
            .unwrap_err();

        match err {
            ProxyError::RotationFailed { attempts, reason, .. } => {
                assert_eq!(attempts, 2);
                assert!(reason.contains("rotate IP"));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_rotation_endpoint_fails_without_request() {
        let rotator = HttpRotator::new().unwrap();
        let err = rotator
            .rotate(&descriptor_with_rotation(String::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::RotationFailed { attempts: 0, .. }));
    }
}
