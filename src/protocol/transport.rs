//! HTTP transport for the Smart-HTTP v2 endpoints: `info/refs` discovery,
//! `git-upload-pack` for fetch, and `git-receive-pack` for push. Every call
//! advertises protocol v2, attaches the configured credentials, runs under
//! the retry policy, and honors the cancellation token.
//!
//! Connection pooling and TLS are delegated to the injected `reqwest`
//! client.

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue};
use tokio_util::sync::CancellationToken;

use crate::{errors::GitError, retry::RetryPolicy};

const UPLOAD_PACK_REQUEST: &str = "application/x-git-upload-pack-request";
const RECEIVE_PACK_REQUEST: &str = "application/x-git-receive-pack-request";

/// Credentials attached to every request. Token is the full `Authorization`
/// header value, so callers control the `Bearer `/`token ` prefix.
#[derive(Clone, Debug, Default)]
pub enum Auth {
    #[default]
    None,
    Basic {
        username: String,
        password: Option<String>,
    },
    Token(String),
}

/// One repository's Smart-HTTP endpoints.
#[derive(Clone)]
pub struct HttpTransport {
    /// Repository base URL without a trailing slash.
    base: String,
    http: reqwest::Client,
    auth: Auth,
    user_agent: String,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl HttpTransport {
    pub fn new(
        base: String,
        http: reqwest::Client,
        auth: Auth,
        user_agent: String,
        retry: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            http,
            auth,
            user_agent,
            retry,
            cancel,
        }
    }

    /// The normalized repository base URL.
    pub fn base(&self) -> &str {
        &self.base
    }

    /// The configured user agent, also advertised as `agent=` capability.
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// The configured credentials.
    pub fn auth(&self) -> &Auth {
        &self.auth
    }

    /// GET `{base}/info/refs?service=<service>`: the service advertisement.
    /// Returns the raw pkt-line body.
    pub async fn smart_info(&self, service: &str) -> Result<Bytes, GitError> {
        let url = format!("{}/info/refs?service={service}", self.base);
        self.retry
            .run(|| self.execute(self.http.get(&url), &url))
            .await
    }

    /// POST a pkt-line request body to `{base}/git-upload-pack`.
    pub async fn upload_pack(&self, body: Bytes) -> Result<Bytes, GitError> {
        let url = format!("{}/git-upload-pack", self.base);
        self.retry
            .run(|| {
                let request = self
                    .http
                    .post(&url)
                    .header(reqwest::header::CONTENT_TYPE, UPLOAD_PACK_REQUEST)
                    .body(body.clone());
                self.execute(request, &url)
            })
            .await
    }

    /// POST a receive-pack request (commands + pack) to
    /// `{base}/git-receive-pack`.
    pub async fn receive_pack(&self, body: Bytes) -> Result<Bytes, GitError> {
        let url = format!("{}/git-receive-pack", self.base);
        self.retry
            .run(|| {
                let request = self
                    .http
                    .post(&url)
                    .header(reqwest::header::CONTENT_TYPE, RECEIVE_PACK_REQUEST)
                    .body(body.clone());
                self.execute(request, &url)
            })
            .await
    }

    async fn execute(
        &self,
        request: reqwest::RequestBuilder,
        url: &str,
    ) -> Result<Bytes, GitError> {
        let request = self.apply_auth(request.headers(self.common_headers()));

        tracing::debug!(url, "sending smart-http request");
        let send = async {
            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                let code = status.as_u16();
                if code == 401 || code == 403 {
                    return Err(GitError::Auth {
                        status: code,
                        message,
                    });
                }
                return Err(GitError::Transport {
                    status: code,
                    message,
                });
            }
            Ok(response.bytes().await?)
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(GitError::Cancelled),
            result = send => result,
        }
    }

    fn common_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("Git-Protocol", HeaderValue::from_static("version=2"));
        if let Ok(ua) = HeaderValue::from_str(&self.user_agent) {
            headers.insert(reqwest::header::USER_AGENT, ua);
        }
        headers
    }

    fn apply_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            Auth::None => request,
            Auth::Basic { username, password } => {
                request.basic_auth(username, password.as_deref())
            }
            Auth::Token(value) => request.header(reqwest::header::AUTHORIZATION, value),
        }
    }
}
