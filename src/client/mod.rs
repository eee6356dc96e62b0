//! The high-level client: construction options, reference operations, and
//! the shared fetch path that populates the object store from pack streams.

pub mod clone;
pub mod compare;
pub mod read;
pub mod writer;

use std::io::Cursor;
use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::{
    errors::GitError,
    hash::ObjectHash,
    internal::pack::decode::PackDecoder,
    protocol::{
        fetch::FetchRequest,
        pkt_line,
        refs::{self, GitRef},
        transport::{Auth, HttpTransport},
    },
    retry::RetryPolicy,
    storage::{MemoryStorage, SharedStorage},
};

/// Default user agent, also sent as the v2 `agent` capability.
fn default_user_agent() -> String {
    format!("nanogit/{}", env!("CARGO_PKG_VERSION"))
}

/// Builder for [`GitClient`]. Only the base URL is required.
pub struct GitClientBuilder {
    base_url: String,
    basic: Option<(String, Option<String>)>,
    token: Option<String>,
    user_agent: Option<String>,
    http: Option<reqwest::Client>,
    storage: Option<SharedStorage>,
    retry: RetryPolicy,
    cancel: CancellationToken,
    github_flavor: bool,
}

impl GitClientBuilder {
    fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            basic: None,
            token: None,
            user_agent: None,
            http: None,
            storage: None,
            retry: RetryPolicy::default(),
            cancel: CancellationToken::new(),
            github_flavor: false,
        }
    }

    /// HTTP basic authentication. Ignored when a token is also supplied.
    pub fn basic_auth(mut self, username: impl Into<String>, password: Option<String>) -> Self {
        self.basic = Some((username.into(), password));
        self
    }

    /// A raw `Authorization` header value; the caller supplies any
    /// `Bearer `/`token ` prefix (or lets the GitHub flavor add one).
    /// Takes precedence over basic auth.
    pub fn token_auth(mut self, value: impl Into<String>) -> Self {
        self.token = Some(value.into());
        self
    }

    /// Override the default `nanogit/<version>` user agent.
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Inject a preconfigured HTTP client (timeouts, proxies, TLS).
    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    /// Inject a custom object store; the default is in-memory.
    pub fn storage(mut self, storage: SharedStorage) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Override the transport retry policy.
    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Attach a cancellation token observed by every HTTP call.
    pub fn cancellation_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// GitHub-style host: strips `.git` and trailing slashes from the URL
    /// and normalizes a raw token to `token <value>`.
    pub fn github(mut self) -> Self {
        self.github_flavor = true;
        self
    }

    pub fn build(self) -> Result<GitClient, GitError> {
        let mut base = self.base_url;
        let mut auth = match (self.token, self.basic) {
            (Some(value), _) => Auth::Token(value),
            (None, Some((username, password))) => Auth::Basic { username, password },
            (None, None) => Auth::None,
        };
        if self.github_flavor {
            base = base.trim_end_matches('/').to_string();
            if let Some(stripped) = base.strip_suffix(".git") {
                base = stripped.to_string();
            }
            if let Auth::Token(value) = &auth {
                if !value.contains(' ') {
                    auth = Auth::Token(format!("token {value}"));
                }
            }
        }

        let parsed = url::Url::parse(&base)
            .map_err(|e| GitError::parse(format!("invalid repository url: {e}"), base.as_bytes()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(GitError::parse(
                format!("unsupported url scheme: {}", parsed.scheme()),
                base.as_bytes(),
            ));
        }

        let user_agent = self.user_agent.unwrap_or_else(default_user_agent);
        let transport = HttpTransport::new(
            base,
            self.http.unwrap_or_default(),
            auth,
            user_agent.clone(),
            self.retry,
            self.cancel,
        );
        Ok(GitClient {
            transport,
            storage: self
                .storage
                .unwrap_or_else(|| Arc::new(MemoryStorage::new())),
            user_agent,
        })
    }
}

/// An HTTPS-only Git client bound to one remote repository.
///
/// Cloning the client is cheap and shares the HTTP connection pool and the
/// object store, which is how the clone pipeline fans out.
#[derive(Clone)]
pub struct GitClient {
    pub(crate) transport: HttpTransport,
    pub(crate) storage: SharedStorage,
    pub(crate) user_agent: String,
}

impl GitClient {
    /// Start building a client for the repository at `base_url`.
    pub fn builder(base_url: impl Into<String>) -> GitClientBuilder {
        GitClientBuilder::new(base_url)
    }

    /// The shared object store.
    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    /// Whether the remote repository exists and is reachable with the
    /// configured credentials. 404 maps to `false`; authentication failures
    /// surface as errors.
    pub async fn repo_exists(&self) -> Result<bool, GitError> {
        match self.transport.smart_info("git-upload-pack").await {
            Ok(_) => Ok(true),
            Err(GitError::Transport { status: 404, .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// List every advertised reference, in server order.
    pub async fn list_refs(&self) -> Result<Vec<GitRef>, GitError> {
        let advertisement = self.transport.smart_info("git-upload-pack").await?;
        // The advertisement is only checked for in-band errors; the ref
        // listing itself comes from the v2 ls-refs command.
        pkt_line::decode(advertisement)?;

        let body = self.transport.upload_pack(refs::build_ls_refs_request()?).await?;
        refs::parse_ls_refs_response(body)
    }

    /// Resolve one reference by its full name.
    pub async fn get_ref(&self, name: &str) -> Result<GitRef, GitError> {
        self.list_refs()
            .await?
            .into_iter()
            .find(|r| r.name == name)
            .ok_or_else(|| GitError::RefNotFound(name.to_string()))
    }

    /// Create a ref that must not already exist.
    pub async fn create_ref(&self, name: &str, hash: ObjectHash) -> Result<(), GitError> {
        self.push_ref_update(ObjectHash::ZERO, hash, name).await
    }

    /// Point an existing ref at a new hash. The current hash is fetched and
    /// sent as the expected old value so concurrent updates are rejected by
    /// the server.
    pub async fn update_ref(&self, name: &str, new: ObjectHash) -> Result<(), GitError> {
        let current = self.get_ref(name).await?;
        self.push_ref_update(current.hash, new, name).await
    }

    /// Delete an existing ref.
    pub async fn delete_ref(&self, name: &str) -> Result<(), GitError> {
        let current = self.get_ref(name).await?;
        self.push_ref_update(current.hash, ObjectHash::ZERO, name)
            .await
    }

    async fn push_ref_update(
        &self,
        old: ObjectHash,
        new: ObjectHash,
        name: &str,
    ) -> Result<(), GitError> {
        let body = refs::build_ref_update_request(old, new, name, &self.user_agent)?;
        let response = self.transport.receive_pack(body).await?;
        refs::parse_receive_pack_response(response, name)
    }

    /// Issue one fetch and decode the returned pack into the store.
    /// Returns the hashes of all objects the pack resolved.
    pub(crate) async fn fetch_into_store(
        &self,
        request: FetchRequest,
    ) -> Result<Vec<ObjectHash>, GitError> {
        let body = request.format(&self.user_agent)?;
        let response = self.transport.upload_pack(body).await?;
        let fetched = crate::protocol::fetch::parse_fetch_response(response)?;
        if fetched.pack.is_empty() {
            return Ok(Vec::new());
        }
        self.index_pack(fetched.pack)
    }

    /// Decode a raw pack stream into the store, resolving thin-pack bases
    /// against whatever the store already holds.
    pub(crate) fn index_pack(&self, pack: Bytes) -> Result<Vec<ObjectHash>, GitError> {
        let storage = self.storage.clone();
        let mut seen = Vec::new();
        let mut batch = Vec::new();
        let store_for_bases = storage.clone();
        PackDecoder::new(move |hash| store_for_bases.get(hash)).decode(
            &mut Cursor::new(pack.as_ref()),
            |entry| {
                seen.push(entry.hash);
                batch.push(entry);
            },
        )?;
        storage.add(batch);
        Ok(seen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// GitHub flavor strips `.git`/trailing slash and prefixes raw tokens.
    #[test]
    fn test_github_flavor_normalization() {
        let client = GitClient::builder("https://github.com/owner/repo.git/")
            .token_auth("abc123")
            .github()
            .build()
            .unwrap();
        assert_eq!(client.transport.base(), "https://github.com/owner/repo");
        // prefixed tokens are left alone
        let client2 = GitClient::builder("https://github.com/o/r")
            .token_auth("Bearer xyz")
            .github()
            .build()
            .unwrap();
        assert_eq!(client2.transport.base(), "https://github.com/o/r");
    }

    /// When both credentials are supplied, the token wins regardless of
    /// call order.
    #[test]
    fn test_token_preferred_over_basic() {
        let client = GitClient::builder("https://host/o/r")
            .token_auth("Bearer t")
            .basic_auth("user", Some("pass".into()))
            .build()
            .unwrap();
        assert!(matches!(client.transport.auth(), Auth::Token(v) if v.as_str() == "Bearer t"));

        let client = GitClient::builder("https://host/o/r")
            .basic_auth("user", None)
            .build()
            .unwrap();
        assert!(matches!(client.transport.auth(), Auth::Basic { .. }));
    }

    /// Only http(s) URLs are accepted.
    #[test]
    fn test_url_validation() {
        assert!(GitClient::builder("ssh://git@host/repo").build().is_err());
        assert!(GitClient::builder("not a url").build().is_err());
        assert!(GitClient::builder("https://host/owner/repo").build().is_ok());
    }

    /// The default user agent carries the crate version.
    #[test]
    fn test_default_user_agent() {
        let client = GitClient::builder("https://host/o/r").build().unwrap();
        assert_eq!(
            client.user_agent,
            format!("nanogit/{}", env!("CARGO_PKG_VERSION"))
        );
        let custom = GitClient::builder("https://host/o/r")
            .user_agent("custom/1.0")
            .build()
            .unwrap();
        assert_eq!(custom.user_agent, "custom/1.0");
    }

    /// Thin packs resolve bases from the injected store during indexing.
    #[test]
    fn test_index_pack_uses_store_bases() {
        use crate::internal::object::blob::Blob;
        use crate::internal::pack::entry::Entry;

        let client = GitClient::builder("https://host/o/r").build().unwrap();
        let base = Blob::from_content("base blob");
        client.storage.add(vec![Entry::from(base.clone())]);

        // hand-build a thin pack with one ref-delta against the stored base
        use flate2::{Compression, write::ZlibEncoder};
        use sha1::{Digest, Sha1};
        use std::io::Write;

        let target = b"rebuilt from store".to_vec();
        let mut delta = Vec::new();
        for mut v in [base.data.len(), target.len()] {
            loop {
                let b = (v & 0x7f) as u8;
                v >>= 7;
                if v == 0 {
                    delta.push(b);
                    break;
                }
                delta.push(b | 0x80);
            }
        }
        delta.push(target.len() as u8);
        delta.extend_from_slice(&target);

        let mut body = Vec::new();
        // ref-delta entry header: type 7 plus the size varint
        let mut size = delta.len();
        let mut byte = 0x70u8 | (size & 0x0f) as u8;
        size >>= 4;
        while size > 0 {
            body.push(byte | 0x80);
            byte = (size & 0x7f) as u8;
            size >>= 7;
        }
        body.push(byte);
        body.extend(base.id.as_ref());
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&delta).unwrap();
        body.extend(enc.finish().unwrap());

        let mut pack = Vec::new();
        pack.extend_from_slice(b"PACK");
        pack.extend_from_slice(&2u32.to_be_bytes());
        pack.extend_from_slice(&1u32.to_be_bytes());
        pack.extend_from_slice(&body);
        let digest: [u8; 20] = Sha1::digest(&pack).into();
        pack.extend_from_slice(&digest);

        let seen = client.index_pack(Bytes::from(pack)).unwrap();
        assert_eq!(seen.len(), 1);
        let rebuilt = client.storage.get(&seen[0]).unwrap();
        assert_eq!(rebuilt.data, target);
    }
}
