//! HTTP adapter for the hosted identity service and row store

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use url::Url;

use academia_core::{
    AuthChangeEvent, AuthResponse, BackendError, IdentityUser, Profile, Session,
    SignOutScope, UserMetadata,
};

use super::{AuthStateHandler, IdentityProvider, Listeners, Subscription};
use crate::auth::profile::ProfileStore;
use crate::auth::storage::ClientStorage;

const AUTH_PATH: &str = "auth/v1";
const REST_PATH: &str = "rest/v1";
/// Makes the row store answer a single-row select with an object, or a
/// not-found error when there is no row
const PGRST_OBJECT: &str = "application/vnd.pgrst.object+json";

/// Key under which the session is persisted, `sb-<project-ref>-auth-token`
pub fn storage_key(url: &Url) -> String {
    let project_ref = url
        .host_str()
        .and_then(|host| host.split('.').next())
        .filter(|label| !label.is_empty())
        .unwrap_or("local");
    format!("sb-{project_ref}-auth-token")
}

/// Decode an error response body
pub(crate) fn backend_error(status: u16, body: &str) -> BackendError {
    let value: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let text = |key: &str| value.get(key).and_then(Value::as_str);

    let message = ["msg", "message", "error_description", "error"]
        .into_iter()
        .find_map(text)
        .map(str::to_string)
        .unwrap_or_else(|| {
            let body = body.trim();
            if body.is_empty() {
                format!("HTTP {status}")
            } else {
                body.to_string()
            }
        });
    let code = ["error_code", "code", "error"].into_iter().find_map(text);
    BackendError::rejected(Some(status), code, message)
}

fn transport_error(err: reqwest::Error) -> BackendError {
    BackendError::transport(err.to_string())
}

async fn read_body(builder: RequestBuilder) -> Result<String, BackendError> {
    let resp = builder.send().await.map_err(transport_error)?;
    let status = resp.status();
    let body = resp.text().await.map_err(transport_error)?;
    if !status.is_success() {
        return Err(backend_error(status.as_u16(), &body));
    }
    Ok(body)
}

async fn send_json<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T, BackendError> {
    let body = read_body(builder).await?;
    serde_json::from_str(&body)
        .map_err(|e| BackendError::transport(format!("Failed to decode response: {e}")))
}

async fn send_empty(builder: RequestBuilder) -> Result<(), BackendError> {
    read_body(builder).await.map(|_| ())
}

/// Identity client for the hosted service.
///
/// The current session lives in memory and in persistent client storage so
/// it survives restarts.
pub struct HostedAuthClient {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
    storage: Arc<dyn ClientStorage>,
    storage_key: String,
    session: RwLock<Option<Session>>,
    listeners: Arc<Listeners>,
}

impl HostedAuthClient {
    pub fn new(
        url: &Url,
        anon_key: impl Into<String>,
        timeout: Duration,
        storage: Arc<dyn ClientStorage>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: url.as_str().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            storage,
            storage_key: storage_key(url),
            session: RwLock::new(None),
            listeners: Arc::new(Listeners::default()),
        })
    }

    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }

    /// Access token of the in-memory session
    pub fn access_token(&self) -> Option<String> {
        self.session.read().as_ref().map(|s| s.access_token.clone())
    }

    fn request(&self, method: Method, path: &str, bearer: Option<&str>) -> RequestBuilder {
        self.http
            .request(method, format!("{}/{}/{}", self.base_url, AUTH_PATH, path))
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer.unwrap_or(&self.anon_key))
    }

    fn load_stored(&self) -> Option<Session> {
        let raw = self.storage.get(&self.storage_key)?;
        match serde_json::from_str::<Session>(&raw) {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::warn!("Discarding unreadable stored session: {}", e);
                if let Err(e) = self.storage.remove(&self.storage_key) {
                    tracing::warn!("Failed to remove stored session: {:?}", e);
                }
                None
            }
        }
    }

    fn store_session(&self, session: &Session) {
        *self.session.write() = Some(session.clone());
        match serde_json::to_string(session) {
            Ok(raw) => {
                if let Err(e) = self.storage.set(&self.storage_key, &raw) {
                    tracing::warn!("Failed to persist session: {:?}", e);
                }
            }
            Err(e) => tracing::warn!("Failed to encode session: {}", e),
        }
    }

    fn clear_session(&self) {
        *self.session.write() = None;
        if let Err(e) = self.storage.remove(&self.storage_key) {
            tracing::warn!("Failed to remove stored session: {:?}", e);
        }
    }

    fn current(&self) -> Option<Session> {
        let cached = self.session.read().clone();
        cached.or_else(|| self.load_stored())
    }

    async fn refresh(&self, session: &Session) -> Result<Session, BackendError> {
        let body = json!({ "refresh_token": session.refresh_token });
        let fresh: Session = send_json(
            self.request(Method::POST, "token?grant_type=refresh_token", None)
                .json(&body),
        )
        .await?;
        let fresh = fresh.stamp_expiry();
        self.store_session(&fresh);
        tracing::debug!("Refreshed session for {}", fresh.user.id);
        self.listeners.emit(AuthChangeEvent::TokenRefreshed, Some(&fresh));
        Ok(fresh)
    }
}

#[async_trait]
impl IdentityProvider for HostedAuthClient {
    async fn get_session(&self) -> Result<Option<Session>, BackendError> {
        let Some(session) = self.current() else {
            return Ok(None);
        };
        if !session.is_expired() {
            *self.session.write() = Some(session.clone());
            return Ok(Some(session));
        }

        if session.can_refresh() {
            match self.refresh(&session).await {
                Ok(fresh) => return Ok(Some(fresh)),
                Err(e) if e.is_unavailable() => return Err(e),
                Err(e) => tracing::warn!("Session refresh rejected: {}", e),
            }
        }
        self.clear_session();
        self.listeners.emit(AuthChangeEvent::SignedOut, None);
        Ok(None)
    }

    async fn get_user(&self) -> Result<Option<IdentityUser>, BackendError> {
        let Some(session) = self.get_session().await? else {
            return Ok(None);
        };
        let user = send_json(self.request(Method::GET, "user", Some(&session.access_token))).await?;
        Ok(Some(user))
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthResponse, BackendError> {
        let body = json!({ "email": email, "password": password });
        let session: Session = send_json(
            self.request(Method::POST, "token?grant_type=password", None)
                .json(&body),
        )
        .await?;
        let session = session.stamp_expiry();
        self.store_session(&session);
        self.listeners.emit(AuthChangeEvent::SignedIn, Some(&session));
        Ok(AuthResponse {
            user: Some(session.user.clone()),
            session: Some(session),
        })
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &UserMetadata,
    ) -> Result<AuthResponse, BackendError> {
        let body = json!({ "email": email, "password": password, "data": metadata });
        let value: Value =
            send_json(self.request(Method::POST, "signup", None).json(&body)).await?;

        // With email confirmation on, the service answers with the bare user
        if value.get("access_token").is_some() {
            let session: Session = serde_json::from_value(value)
                .map_err(|e| BackendError::transport(format!("Failed to decode session: {e}")))?;
            let session = session.stamp_expiry();
            self.store_session(&session);
            self.listeners.emit(AuthChangeEvent::SignedIn, Some(&session));
            Ok(AuthResponse {
                user: Some(session.user.clone()),
                session: Some(session),
            })
        } else {
            let user: IdentityUser = serde_json::from_value(value)
                .map_err(|e| BackendError::transport(format!("Failed to decode user: {e}")))?;
            Ok(AuthResponse {
                user: Some(user),
                session: None,
            })
        }
    }

    async fn sign_out(&self, scope: SignOutScope) -> Result<(), BackendError> {
        let Some(session) = self.current() else {
            return Ok(());
        };
        let result = send_empty(self.request(
            Method::POST,
            &format!("logout?scope={scope}"),
            Some(&session.access_token),
        ))
        .await;

        self.clear_session();
        self.listeners.emit(AuthChangeEvent::SignedOut, None);
        match result {
            // token already revoked or unknown to the service
            Err(e) if matches!(e.status, Some(401 | 404)) => Ok(()),
            other => other,
        }
    }

    fn on_auth_state_change(&self, handler: AuthStateHandler) -> Subscription {
        self.listeners.subscribe(handler)
    }
}

/// Profile table on the hosted row store
pub struct HostedProfileStore {
    auth: Arc<HostedAuthClient>,
    table: String,
}

impl HostedProfileStore {
    pub fn new(auth: Arc<HostedAuthClient>, table: impl Into<String>) -> Self {
        Self {
            auth,
            table: table.into(),
        }
    }

    fn request(&self, method: Method) -> RequestBuilder {
        let token = self
            .auth
            .access_token()
            .unwrap_or_else(|| self.auth.anon_key.clone());
        self.auth
            .http
            .request(
                method,
                format!("{}/{}/{}", self.auth.base_url, REST_PATH, self.table),
            )
            .header("apikey", &self.auth.anon_key)
            .bearer_auth(token)
    }
}

#[async_trait]
impl ProfileStore for HostedProfileStore {
    async fn select_by_id(&self, id: &str) -> Result<Profile, BackendError> {
        send_json(
            self.request(Method::GET)
                .query(&[("id", format!("eq.{id}")), ("select", "*".to_string())])
                .header(reqwest::header::ACCEPT, PGRST_OBJECT),
        )
        .await
    }

    async fn insert(&self, profile: &Profile) -> Result<(), BackendError> {
        send_empty(
            self.request(Method::POST)
                .header("Prefer", "return=minimal")
                .json(profile),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::auth::profile::PROFILE_NOT_FOUND_CODE;
    use crate::auth::storage::MemoryStorage;
    use crate::provider::testing::session_for;

    fn client(storage: Arc<MemoryStorage>) -> HostedAuthClient {
        let url = Url::parse("https://abcdefgh.supabase.co").unwrap();
        HostedAuthClient::new(&url, "anon", Duration::from_secs(5), storage).unwrap()
    }

    #[test]
    fn test_storage_key() {
        let url = Url::parse("https://abcdefgh.supabase.co/").unwrap();
        assert_eq!(storage_key(&url), "sb-abcdefgh-auth-token");
        let url = Url::parse("http://localhost:54321").unwrap();
        assert_eq!(storage_key(&url), "sb-localhost-auth-token");
    }

    #[test]
    fn test_backend_error_bodies() {
        let err = backend_error(
            400,
            r#"{"code":400,"error_code":"invalid_credentials","msg":"Invalid login credentials"}"#,
        );
        assert_eq!(err.status, Some(400));
        assert!(err.has_code("invalid_credentials"));
        assert_eq!(err.message, "Invalid login credentials");
        assert!(!err.transport);

        let err = backend_error(
            400,
            r#"{"error":"invalid_grant","error_description":"Email not confirmed"}"#,
        );
        assert!(err.has_code("invalid_grant"));
        assert_eq!(err.message, "Email not confirmed");

        let err = backend_error(
            406,
            r#"{"code":"PGRST116","details":"The result contains 0 rows","message":"JSON object requested, multiple (or no) rows returned"}"#,
        );
        assert!(err.has_code(PROFILE_NOT_FOUND_CODE));

        let err = backend_error(502, "<html>Bad Gateway</html>");
        assert_eq!(err.message, "<html>Bad Gateway</html>");
        assert!(err.is_unavailable());

        assert_eq!(backend_error(500, "").message, "HTTP 500");
    }

    #[tokio::test]
    async fn test_restores_stored_session() {
        let storage = Arc::new(MemoryStorage::default());
        let session = session_for(IdentityUser::new("u1", Some("ana@example.com")));
        storage
            .set("sb-abcdefgh-auth-token", &serde_json::to_string(&session).unwrap())
            .unwrap();

        let client = client(storage);
        assert!(client.access_token().is_none());
        assert_eq!(client.get_session().await.unwrap(), Some(session.clone()));
        assert_eq!(client.access_token(), Some(session.access_token));
    }

    #[tokio::test]
    async fn test_discards_corrupt_stored_session() {
        let storage = Arc::new(MemoryStorage::default());
        storage.set("sb-abcdefgh-auth-token", "{not json").unwrap();

        let client = client(storage.clone());
        assert_eq!(client.get_session().await.unwrap(), None);
        assert!(storage.keys().is_empty());
    }

    #[tokio::test]
    async fn test_expired_session_without_refresh_token_signs_out() {
        let storage = Arc::new(MemoryStorage::default());
        let mut session = session_for(IdentityUser::new("u1", None));
        session.expires_at = Some(chrono::Utc::now().timestamp() - 60);
        session.refresh_token = None;
        storage
            .set("sb-abcdefgh-auth-token", &serde_json::to_string(&session).unwrap())
            .unwrap();

        let client = client(storage.clone());
        let signed_out = Arc::new(AtomicUsize::new(0));
        let counter = signed_out.clone();
        let _subscription = client.on_auth_state_change(Box::new(move |event, _| {
            if event == AuthChangeEvent::SignedOut {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));

        assert_eq!(client.get_session().await.unwrap(), None);
        assert_eq!(signed_out.load(Ordering::SeqCst), 1);
        assert!(storage.keys().is_empty());
    }

    #[tokio::test]
    async fn test_sign_out_without_session_is_noop() {
        let storage = Arc::new(MemoryStorage::default());
        let client = client(storage);
        let events = Arc::new(AtomicUsize::new(0));
        let counter = events.clone();
        let _subscription = client.on_auth_state_change(Box::new(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        client.sign_out(SignOutScope::Global).await.unwrap();
        assert_eq!(events.load(Ordering::SeqCst), 0);
    }
}
