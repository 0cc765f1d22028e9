//! Traversal of Kai-like paginated APIs.
//!
//! Every page is an envelope `{"items": [...], "links": {"next": string | null}}`.
//! Kai itself serves the underscore-prefixed `_items`/`_links._next` spelling,
//! which is accepted too. Items are yielded one at a time; the next page is only requested once the
//! previous one is drained.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::app::ports::{HttpClientPort, KaiAuth, TokenStore};
use crate::common::error::ImportFatalError;
use crate::config::KaiServiceConfig;
use crate::domain::{Game, ImportContext, ImportType, Playtype, UserId};
use crate::observability::metrics::KaiMetrics;

/// Obtains a fresh access token after the API rejected the current one.
#[async_trait]
pub trait Reauthenticator: Send + Sync {
    async fn reauthenticate(&self) -> Result<String, ImportFatalError>;
}

/// `path` appended to `base_url`, keeping any path the base already has.
fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[derive(Debug, Clone, PartialEq)]
enum TraversalState {
    Fetching { url: String },
    Reauthenticating { url: String },
    Exhausted,
}

pub struct KaiTraversal {
    http: Arc<dyn HttpClientPort>,
    service: String,
    base: Url,
    token: String,
    reauth: Option<Arc<dyn Reauthenticator>>,
    reauth_used: bool,
    page_cap: u32,
    pages: u32,
    visited: HashSet<String>,
    state: TraversalState,
    buffer: VecDeque<Value>,
}

impl KaiTraversal {
    pub fn new(
        http: Arc<dyn HttpClientPort>,
        service: &str,
        base_url: &str,
        resource: &str,
        token: String,
        page_cap: u32,
    ) -> Result<Self, ImportFatalError> {
        let base = Url::parse(base_url)
            .map_err(|e| ImportFatalError::InvalidInput(format!("invalid base url {}: {}", base_url, e)))?;
        let start = Url::parse(&endpoint(base_url, resource))
            .map_err(|e| ImportFatalError::InvalidInput(format!("invalid resource {}: {}", resource, e)))?;

        Ok(Self {
            http,
            service: service.to_string(),
            base,
            token,
            reauth: None,
            reauth_used: false,
            page_cap,
            pages: 0,
            visited: HashSet::new(),
            state: TraversalState::Fetching {
                url: start.to_string(),
            },
            buffer: VecDeque::new(),
        })
    }

    pub fn with_reauthenticator(mut self, reauth: Arc<dyn Reauthenticator>) -> Self {
        self.reauth = Some(reauth);
        self
    }

    /// Traversal for a user's stored credentials, refreshing them through the
    /// service's token endpoint when they expire.
    pub async fn for_user(
        http: Arc<dyn HttpClientPort>,
        tokens: Arc<dyn TokenStore>,
        service: &str,
        config: &KaiServiceConfig,
        user_id: UserId,
    ) -> Result<Self, ImportFatalError> {
        let auth = tokens
            .load_kai_auth(user_id, service)
            .await?
            .ok_or_else(|| ImportFatalError::MissingCredentials {
                service: service.to_string(),
            })?;

        let traversal = Self::new(
            http.clone(),
            service,
            &config.base_url,
            &config.resource,
            auth.access_token.clone(),
            config.page_cap,
        )?;

        let reauth = match &config.client_secret {
            Some(secret) => {
                Some(Arc::new(KaiOAuthReauthenticator {
                    http,
                    tokens,
                    token_url: endpoint(&config.base_url, "/oauth/token"),
                    client_id: config.client_id.clone(),
                    client_secret: secret.clone(),
                    user_id,
                    service: service.to_string(),
                    refresh_token: Mutex::new(auth.refresh_token),
                }))
            }
            None => {
                warn!(%service, "no client secret configured, expired tokens cannot be refreshed");
                None
            }
        };

        Ok(match reauth {
            Some(r) => traversal.with_reauthenticator(r),
            None => traversal,
        })
    }

    pub fn pages_fetched(&self) -> u32 {
        self.pages
    }

    /// The next item, fetching pages as needed. After an error the traversal is
    /// exhausted.
    pub async fn next_item(&mut self) -> Result<Option<Value>, ImportFatalError> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Ok(Some(item));
            }

            match std::mem::replace(&mut self.state, TraversalState::Exhausted) {
                TraversalState::Exhausted => return Ok(None),
                TraversalState::Fetching { url } => self.fetch_page(url).await?,
                TraversalState::Reauthenticating { url } => {
                    self.reauthenticate().await?;
                    self.state = TraversalState::Fetching { url };
                }
            }
        }
    }

    pub fn into_stream(self) -> BoxStream<'static, Result<Value, ImportFatalError>> {
        stream::unfold(self, |mut traversal| async move {
            match traversal.next_item().await {
                Ok(Some(item)) => Some((Ok(item), traversal)),
                Ok(None) => None,
                Err(e) => Some((Err(e), traversal)),
            }
        })
        .boxed()
    }

    #[instrument(skip(self), fields(service = %self.service, page = self.pages + 1))]
    async fn fetch_page(&mut self, url: String) -> Result<(), ImportFatalError> {
        if self.pages >= self.page_cap {
            return Err(ImportFatalError::PageLimitExceeded(self.page_cap));
        }
        if !self.visited.insert(url.clone()) {
            return Err(ImportFatalError::MalformedEnvelope {
                url,
                reason: "pagination loops back to an already fetched page".into(),
            });
        }

        let resp = self
            .http
            .get(&url, Some(&self.token))
            .await
            .map_err(|reason| ImportFatalError::Transport {
                url: url.clone(),
                reason,
            })?;

        if resp.status == 401 || resp.status == 403 {
            if self.reauth_used {
                warn!("authentication rejected again after reauthenticating");
                return Err(ImportFatalError::ReauthExhausted);
            }
            info!("🔑 {} rejected the access token, reauthenticating", self.service);
            // The page has not been consumed, it is fetched again afterwards.
            self.visited.remove(&url);
            self.state = TraversalState::Reauthenticating { url };
            return Ok(());
        }

        if !resp.is_success() {
            return Err(ImportFatalError::UpstreamStatus {
                url,
                status: resp.status,
            });
        }
        self.pages += 1;

        let body: Value = serde_json::from_slice(&resp.bytes).map_err(|e| {
            ImportFatalError::MalformedEnvelope {
                url: url.clone(),
                reason: format!("body is not JSON: {}", e),
            }
        })?;
        let (items, next) = parse_envelope(&url, body)?;

        if let Some(next) = &next {
            self.check_origin(next)?;
        }

        debug!(items = items.len(), has_next = next.is_some(), "fetched page");
        KaiMetrics::record_page(&self.service, items.len());

        self.buffer.extend(items);
        self.state = match next {
            Some(url) => TraversalState::Fetching { url },
            None => TraversalState::Exhausted,
        };
        Ok(())
    }

    /// Server-supplied links must stay on the configured origin.
    fn check_origin(&self, next: &str) -> Result<(), ImportFatalError> {
        let expected = self.base.origin();
        let same_origin = Url::parse(next)
            .map(|u| u.origin() == expected)
            .unwrap_or(false);
        if same_origin {
            Ok(())
        } else {
            warn!(%next, "refusing to follow pagination link to a foreign origin");
            Err(ImportFatalError::OriginMismatch {
                expected: expected.ascii_serialization(),
                got: next.to_string(),
            })
        }
    }

    async fn reauthenticate(&mut self) -> Result<(), ImportFatalError> {
        self.reauth_used = true;
        let reauth = match &self.reauth {
            Some(r) => r.clone(),
            None => {
                return Err(ImportFatalError::ReauthFailed(
                    "no reauthentication available for this service".into(),
                ))
            }
        };

        match reauth.reauthenticate().await {
            Ok(token) => {
                KaiMetrics::record_reauth(true);
                self.token = token;
                Ok(())
            }
            Err(e) => {
                KaiMetrics::record_reauth(false);
                Err(e)
            }
        }
    }
}

fn parse_envelope(url: &str, body: Value) -> Result<(Vec<Value>, Option<String>), ImportFatalError> {
    let malformed = |reason: &str| ImportFatalError::MalformedEnvelope {
        url: url.to_string(),
        reason: reason.to_string(),
    };

    let mut obj = match body {
        Value::Object(obj) => obj,
        _ => return Err(malformed("body is not an object")),
    };

    let links = obj.get("links").or_else(|| obj.get("_links"));
    let next = match links {
        Some(Value::Object(links)) => match links.get("next").or_else(|| links.get("_next")) {
            Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => return Err(malformed("links.next is neither null nor a string")),
            None => return Err(malformed("links.next is missing")),
        },
        _ => return Err(malformed("links is not an object")),
    };

    let items = match obj.remove("items").or_else(|| obj.remove("_items")) {
        Some(Value::Array(items)) => items,
        _ => return Err(malformed("items is not a list")),
    };

    Ok((items, next))
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// OAuth refresh-token grant against `<base>/oauth/token`. Rotated tokens are
/// persisted before the new access token is handed back.
pub struct KaiOAuthReauthenticator {
    http: Arc<dyn HttpClientPort>,
    tokens: Arc<dyn TokenStore>,
    token_url: String,
    client_id: String,
    client_secret: String,
    user_id: UserId,
    service: String,
    refresh_token: Mutex<String>,
}

impl KaiOAuthReauthenticator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        http: Arc<dyn HttpClientPort>,
        tokens: Arc<dyn TokenStore>,
        token_url: &str,
        client_id: &str,
        client_secret: &str,
        user_id: UserId,
        service: &str,
        refresh_token: String,
    ) -> Self {
        Self {
            http,
            tokens,
            token_url: token_url.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            user_id,
            service: service.to_string(),
            refresh_token: Mutex::new(refresh_token),
        }
    }
}

#[async_trait]
impl Reauthenticator for KaiOAuthReauthenticator {
    async fn reauthenticate(&self) -> Result<String, ImportFatalError> {
        let mut refresh_token = self.refresh_token.lock().await;

        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        let resp = self
            .http
            .post_form(&self.token_url, &form)
            .await
            .map_err(ImportFatalError::ReauthFailed)?;

        if !resp.is_success() {
            return Err(ImportFatalError::ReauthFailed(format!(
                "token endpoint returned {}",
                resp.status
            )));
        }

        let token: TokenResponse = serde_json::from_slice(&resp.bytes)
            .map_err(|e| ImportFatalError::ReauthFailed(format!("invalid token response: {}", e)))?;

        let auth = KaiAuth {
            access_token: token.access_token,
            refresh_token: token.refresh_token.unwrap_or_else(|| refresh_token.clone()),
        };
        self.tokens
            .save_kai_auth(self.user_id, &self.service, &auth)
            .await?;
        *refresh_token = auth.refresh_token.clone();

        info!("🔑 Refreshed {} credentials for user {}", self.service, self.user_id);
        Ok(auth.access_token)
    }
}

/// Import context for a Kai-backed import type. Without a playtype, items of
/// both play styles are imported.
pub fn kai_import_context(
    import_type: ImportType,
    playtype: Option<Playtype>,
) -> Result<ImportContext, ImportFatalError> {
    let service = import_type.kai_service().ok_or_else(|| {
        ImportFatalError::InvalidInput(format!("{} is not a Kai import type", import_type))
    })?;
    Ok(ImportContext {
        game: Game::Iidx,
        playtype,
        service: service.to_uppercase(),
        version: None,
        import_type,
        time_received: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_shapes() {
        let ok = parse_envelope("u", json!({"links": {"next": null}, "items": [1, 2]})).unwrap();
        assert_eq!(ok, (vec![json!(1), json!(2)], None));

        let kai = parse_envelope("u", json!({"_links": {"_next": null}, "_items": [3]})).unwrap();
        assert_eq!(kai, (vec![json!(3)], None));

        let next = parse_envelope("u", json!({"_links": {"_next": "http://a/b"}, "_items": []})).unwrap();
        assert_eq!(next.1.as_deref(), Some("http://a/b"));

        for bad in [
            json!({"_links": null, "_items": []}),
            json!({"_links": "foo", "_items": []}),
            json!({"_links": {}, "_items": []}),
            json!({"_links": {"_next": {}}, "_items": []}),
            json!({"_links": {"_next": null}, "_items": {}}),
            json!({"_links": {"_next": null}}),
            json!({"links": {"next": 5}, "items": []}),
            json!([1, 2]),
        ] {
            assert!(matches!(
                parse_envelope("u", bad),
                Err(ImportFatalError::MalformedEnvelope { .. })
            ));
        }
    }

    #[test]
    fn endpoints_keep_the_base_path() {
        assert_eq!(endpoint("https://kai.example", "/oauth/token"), "https://kai.example/oauth/token");
        assert_eq!(endpoint("https://kai.example/api/", "/oauth/token"), "https://kai.example/api/oauth/token");
        assert_eq!(
            endpoint("https://kai.example/api", "api/iidx/v2/play_history"),
            "https://kai.example/api/api/iidx/v2/play_history"
        );
    }
}
