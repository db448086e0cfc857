//! HTTP transport for the remote path store.
//!
//! [`RemoteApi`] is the seam between the sync coordinator and the network.
//! [`HttpRemoteApi`] implements it with reqwest:
//! - Connection pooling, one shared client
//! - Basic-auth header derived once from the session credentials
//! - Non-2xx statuses mapped to `ServerError`, transport failures to
//!   `NetworkUnreachable`, unreadable bodies to `DecodeError`
//!
//! No retries: a failed request is reported to the caller as-is.

use futures::future::BoxFuture;

use crate::session::Credentials;
use crate::wire::{RemotePath, UploadPayload, UploadResponse};
use crate::{Result, ViewportQuad};

/// Remote path store operations used by the sync coordinator.
///
/// Implementations return owned DTOs; nothing they hand back aliases local
/// state.
pub trait RemoteApi: Send + Sync + 'static {
    /// Create a path on the server.
    fn upload_path<'a>(&'a self, payload: &'a UploadPayload) -> BoxFuture<'a, Result<UploadResponse>>;

    /// Fetch one path, optionally with its points.
    fn fetch_path<'a>(
        &'a self,
        remote_id: &'a str,
        include_points: bool,
    ) -> BoxFuture<'a, Result<RemotePath>>;

    /// Fetch point-less summaries of every path intersecting the viewport.
    fn fetch_paths_in_bounds<'a>(
        &'a self,
        quad: &'a ViewportQuad,
    ) -> BoxFuture<'a, Result<Vec<RemotePath>>>;

    /// Authenticate later requests as `credentials`. Requests already sent
    /// keep the identity they were sent with.
    fn set_credentials(&self, _credentials: &Credentials) {}
}

#[cfg(feature = "http")]
pub use client::HttpRemoteApi;

#[cfg(feature = "http")]
mod client {
    use std::sync::RwLock;

    use base64::Engine;
    use futures::future::{BoxFuture, FutureExt};
    use log::{debug, warn};
    use reqwest::header::AUTHORIZATION;
    use reqwest::{Client, RequestBuilder};

    use super::RemoteApi;
    use crate::session::Credentials;
    use crate::wire::{
        bounds_query, decode_bounds_response, decode_path, decode_upload_response, RemotePath,
        UploadPayload, UploadResponse,
    };
    use crate::{Result, SyncConfig, SyncError, ViewportQuad};

    fn basic_auth_header(credentials: &Credentials) -> String {
        let token = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", credentials.username, credentials.password));
        format!("Basic {}", token)
    }

    /// reqwest-backed [`RemoteApi`].
    pub struct HttpRemoteApi {
        client: Client,
        config: SyncConfig,
        auth_header: RwLock<String>,
    }

    impl HttpRemoteApi {
        /// Create a client for the configured API root.
        pub fn new(config: SyncConfig, credentials: &Credentials) -> Result<Self> {
            config.validate()?;

            let client = Client::builder()
                .pool_max_idle_per_host(config.max_idle_connections)
                .timeout(config.request_timeout)
                .build()
                .map_err(|e| SyncError::ConfigError {
                    message: format!("Failed to create HTTP client: {}", e),
                })?;

            Ok(Self {
                client,
                config,
                auth_header: RwLock::new(basic_auth_header(credentials)),
            })
        }

        fn auth_header(&self) -> String {
            match self.auth_header.read() {
                Ok(header) => header.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            }
        }

        /// Send with auth, require a 2xx status and return the raw body.
        async fn send(&self, request: RequestBuilder, what: &str) -> Result<Vec<u8>> {
            let response = request
                .header(AUTHORIZATION, self.auth_header())
                .send()
                .await
                .map_err(|e| {
                    warn!("[HttpRemoteApi] {} failed: {}", what, e);
                    SyncError::from(e)
                })?;

            let status = response.status();
            if !status.is_success() {
                warn!("[HttpRemoteApi] {} returned HTTP {}", what, status);
                return Err(SyncError::ServerError {
                    status: status.as_u16(),
                    message: status
                        .canonical_reason()
                        .unwrap_or("unexpected status")
                        .to_string(),
                });
            }

            let body = response.bytes().await.map_err(|e| SyncError::DecodeError {
                message: format!("could not read body: {}", e),
            })?;
            debug!("[HttpRemoteApi] {} -> {} bytes", what, body.len());
            Ok(body.to_vec())
        }
    }

    impl RemoteApi for HttpRemoteApi {
        fn upload_path<'a>(
            &'a self,
            payload: &'a UploadPayload,
        ) -> BoxFuture<'a, Result<UploadResponse>> {
            async move {
                let url = self.config.endpoint("paths/");
                let body = self
                    .send(self.client.post(&url).json(payload), "upload")
                    .await?;
                decode_upload_response(&body)
            }
            .boxed()
        }

        fn fetch_path<'a>(
            &'a self,
            remote_id: &'a str,
            include_points: bool,
        ) -> BoxFuture<'a, Result<RemotePath>> {
            async move {
                let url = self.config.endpoint(&format!("paths/{}", remote_id));
                let request = self
                    .client
                    .get(&url)
                    .query(&[("points", include_points.to_string())]);
                let body = self.send(request, "fetch path").await?;
                decode_path(&body)
            }
            .boxed()
        }

        fn fetch_paths_in_bounds<'a>(
            &'a self,
            quad: &'a ViewportQuad,
        ) -> BoxFuture<'a, Result<Vec<RemotePath>>> {
            async move {
                let url = self.config.endpoint("paths/");
                let request = self.client.get(&url).query(&[("bounds", bounds_query(quad))]);
                let body = self.send(request, "fetch in bounds").await?;
                Ok(decode_bounds_response(&body)?.paths)
            }
            .boxed()
        }

        fn set_credentials(&self, credentials: &Credentials) {
            debug!("[HttpRemoteApi] Authenticating as '{}'", credentials.username);
            match self.auth_header.write() {
                Ok(mut header) => *header = basic_auth_header(credentials),
                Err(poisoned) => *poisoned.into_inner() = basic_auth_header(credentials),
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_basic_auth_header() {
            let header = basic_auth_header(&Credentials::new("Aladdin", "open sesame"));
            assert_eq!(header, "Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ==");
        }

        #[test]
        fn test_new_rejects_invalid_config() {
            let config = SyncConfig::default().with_api_base("not a url");
            assert!(matches!(
                HttpRemoteApi::new(config, &Credentials::anonymous()),
                Err(SyncError::ConfigError { .. })
            ));
        }

        #[test]
        fn test_set_credentials_replaces_header() {
            let api = HttpRemoteApi::new(SyncConfig::default(), &Credentials::anonymous()).unwrap();
            api.set_credentials(&Credentials::new("Aladdin", "open sesame"));
            assert_eq!(api.auth_header(), "Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ==");
        }
    }
}
