//! Supabase-backed gateway (PostgREST, GoTrue, Storage) over `reqwest`.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{RemoteError, RemoteGateway, RemoteResult, SignUpOutcome, UserUpdate, ENTRIES_TABLE};
use crate::auth::{AuthSession, AuthUser, UserMetadata};
use crate::models::{Entry, EntryId};
use crate::util::{compact_text, is_http_url, unix_timestamp_now};
use crate::{Error, Result};

/// Which Supabase service a response came from; decides how a 400 is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Service {
    Rest,
    Auth,
    Storage,
}

#[derive(Clone)]
pub struct SupabaseGateway {
    project_url: String,
    anon_key: String,
    client: Client,
}

impl std::fmt::Debug for SupabaseGateway {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SupabaseGateway")
            .field("project_url", &self.project_url)
            .field("anon_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl SupabaseGateway {
    pub fn new(
        url: impl AsRef<str>,
        anon_key: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let project_url = normalize_project_url(url.as_ref())?;
        let anon_key = anon_key.into().trim().to_string();
        if anon_key.is_empty() {
            return Err(Error::Config(
                "Supabase anon key must not be empty".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|error| Error::Config(format!("failed to build HTTP client: {error}")))?;

        Ok(Self {
            project_url,
            anon_key,
            client,
        })
    }

    fn rest_url(&self) -> String {
        format!("{}/rest/v1/{ENTRIES_TABLE}", self.project_url)
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{path}", self.project_url)
    }

    fn storage_object_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/object/{bucket}/{}",
            self.project_url,
            encode_object_path(path)
        )
    }

    fn public_object_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{bucket}/{}",
            self.project_url,
            encode_object_path(path)
        )
    }

    fn public_request(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key)
    }

    fn user_request(&self, request: RequestBuilder, access_token: &str) -> RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
    }

    async fn send(request: RequestBuilder, service: Service) -> RemoteResult<Response> {
        let response = request.send().await.map_err(map_transport_error)?;
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(classify_failure(status, &body, service))
    }

    async fn send_json<T: DeserializeOwned>(
        request: RequestBuilder,
        service: Service,
    ) -> RemoteResult<T> {
        let response = Self::send(request, service).await?;
        let body = response.text().await.map_err(map_transport_error)?;
        serde_json::from_str(&body).map_err(|error| {
            RemoteError::Api(format!(
                "unexpected response payload ({error}): {}",
                compact_text(&body)
            ))
        })
    }

    async fn send_entry_rows(request: RequestBuilder, id: &EntryId) -> RemoteResult<Entry> {
        let rows = Self::send_json::<Vec<serde_json::Value>>(request, Service::Rest).await?;
        parse_single_entry_row(rows, id)
    }
}

impl RemoteGateway for SupabaseGateway {
    async fn query_entries(&self, access_token: &str, user_id: &str) -> RemoteResult<Vec<Entry>> {
        let request = self.user_request(
            self.client.get(self.rest_url()).query(&[
                ("select", "*".to_string()),
                ("user_id", format!("eq.{user_id}")),
                ("order", "date.desc".to_string()),
            ]),
            access_token,
        );
        let rows = Self::send_json::<Vec<serde_json::Value>>(request, Service::Rest).await?;
        Ok(parse_entry_rows(rows))
    }

    async fn get_entry(&self, access_token: &str, id: &EntryId) -> RemoteResult<Entry> {
        let request = self.user_request(
            self.client.get(self.rest_url()).query(&[
                ("select", "*".to_string()),
                ("id", format!("eq.{id}")),
            ]),
            access_token,
        );
        Self::send_entry_rows(request, id).await
    }

    async fn insert_entry(&self, access_token: &str, entry: &Entry) -> RemoteResult<Entry> {
        let request = self.user_request(
            self.client
                .post(self.rest_url())
                .header("Prefer", "return=representation")
                .json(entry),
            access_token,
        );
        Self::send_entry_rows(request, &entry.id).await
    }

    async fn update_entry(&self, access_token: &str, entry: &Entry) -> RemoteResult<Entry> {
        let request = self.user_request(
            self.client
                .patch(self.rest_url())
                .query(&[("id", format!("eq.{}", entry.id))])
                .header("Prefer", "return=representation")
                .json(entry),
            access_token,
        );
        Self::send_entry_rows(request, &entry.id).await
    }

    async fn delete_entry(&self, access_token: &str, id: &EntryId) -> RemoteResult<()> {
        let request = self.user_request(
            self.client
                .delete(self.rest_url())
                .query(&[("id", format!("eq.{id}"))]),
            access_token,
        );
        Self::send(request, Service::Rest).await?;
        Ok(())
    }

    async fn upload_blob(
        &self,
        access_token: &str,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> RemoteResult<String> {
        let request = self.user_request(
            self.client
                .post(self.storage_object_url(bucket, path))
                .header("Content-Type", content_type)
                .header("x-upsert", "true")
                .body(bytes),
            access_token,
        );
        Self::send(request, Service::Storage).await?;
        Ok(self.public_object_url(bucket, path))
    }

    async fn sign_in(&self, email: &str, password: &str) -> RemoteResult<AuthSession> {
        let payload = serde_json::json!({
            "email": email,
            "password": password,
        });
        let request = self.public_request(
            self.client
                .post(self.auth_url("token"))
                .query(&[("grant_type", "password")])
                .json(&payload),
        );
        let response = Self::send_json::<AuthResponse>(request, Service::Auth).await?;
        response.into_session()?.ok_or_else(|| {
            RemoteError::Auth("Sign-in response did not include an active session".to_string())
        })
    }

    async fn sign_up(&self, email: &str, password: &str) -> RemoteResult<SignUpOutcome> {
        let payload = serde_json::json!({
            "email": email,
            "password": password,
        });
        let request =
            self.public_request(self.client.post(self.auth_url("signup")).json(&payload));
        let response = Self::send_json::<AuthResponse>(request, Service::Auth).await?;
        Ok(match response.into_session()? {
            Some(session) => SignUpOutcome::SignedIn(session),
            None => SignUpOutcome::ConfirmationRequired,
        })
    }

    async fn sign_out(&self, access_token: &str) -> RemoteResult<()> {
        let request = self.user_request(self.client.post(self.auth_url("logout")), access_token);
        match Self::send(request, Service::Auth).await {
            // The token is already dead server-side, which is what we wanted.
            Ok(_) | Err(RemoteError::Auth(_)) => Ok(()),
            Err(error) => Err(error),
        }
    }

    async fn update_user(&self, access_token: &str, update: &UserUpdate) -> RemoteResult<AuthUser> {
        let mut payload = serde_json::Map::new();
        if let Some(email) = &update.email {
            payload.insert("email".to_string(), email.clone().into());
        }
        if let Some(password) = &update.password {
            payload.insert("password".to_string(), password.clone().into());
        }
        if let Some(avatar_url) = &update.avatar_url {
            payload.insert(
                "data".to_string(),
                serde_json::json!({ "avatar_url": avatar_url }),
            );
        }

        let request = self.user_request(
            self.client.put(self.auth_url("user")).json(&payload),
            access_token,
        );
        let user = Self::send_json::<SupabaseUser>(request, Service::Auth).await?;
        Ok(user.into())
    }

    async fn refresh_token(&self, refresh_token: &str) -> RemoteResult<AuthSession> {
        if refresh_token.trim().is_empty() {
            return Err(RemoteError::Auth(
                "Refresh token must not be empty".to_string(),
            ));
        }

        let payload = serde_json::json!({
            "refresh_token": refresh_token,
        });
        let request = self.public_request(
            self.client
                .post(self.auth_url("token"))
                .query(&[("grant_type", "refresh_token")])
                .json(&payload),
        );
        let response = Self::send_json::<AuthResponse>(request, Service::Auth).await?;
        response.into_session()?.ok_or_else(|| {
            RemoteError::Auth("Refresh response did not include an active session".to_string())
        })
    }
}

/// Validate and normalize a Supabase project URL (no trailing slash, no
/// service suffix).
pub fn normalize_project_url(url: &str) -> Result<String> {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(Error::Config("Supabase URL must not be empty".to_string()));
    }
    if !is_http_url(trimmed) {
        return Err(Error::Config(
            "Supabase URL must include http:// or https://".to_string(),
        ));
    }
    let base = ["/auth/v1", "/rest/v1", "/storage/v1"]
        .iter()
        .find_map(|suffix| trimmed.strip_suffix(suffix))
        .unwrap_or(trimmed);
    Ok(base.trim_end_matches('/').to_string())
}

fn encode_object_path(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Rows that fail to decode are skipped so one bad row cannot hide the rest.
fn parse_entry_rows(rows: Vec<serde_json::Value>) -> Vec<Entry> {
    rows.into_iter()
        .filter_map(|row| match serde_json::from_value::<Entry>(row) {
            Ok(entry) => Some(entry),
            Err(error) => {
                tracing::warn!("Skipping malformed entry row: {}", error);
                None
            }
        })
        .collect()
}

/// An empty result means the row is gone; a row that does not decode is an
/// API failure, never a missing row.
fn parse_single_entry_row(rows: Vec<serde_json::Value>, id: &EntryId) -> RemoteResult<Entry> {
    let Some(row) = rows.into_iter().next() else {
        return Err(RemoteError::NotFound(format!("entry {id}")));
    };
    serde_json::from_value::<Entry>(row)
        .map_err(|error| RemoteError::Api(format!("malformed entry {id} in response: {error}")))
}

fn map_transport_error(error: reqwest::Error) -> RemoteError {
    RemoteError::Network(error.to_string())
}

fn classify_failure(status: StatusCode, body: &str, service: Service) -> RemoteError {
    let message = parse_api_error(status, body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Auth(message),
        StatusCode::NOT_FOUND => RemoteError::NotFound(message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY if service == Service::Auth => {
            RemoteError::Auth(message)
        }
        StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
            RemoteError::Validation(message)
        }
        StatusCode::PAYLOAD_TOO_LARGE if service == Service::Storage => {
            RemoteError::Validation(message)
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            RemoteError::Network(message)
        }
        status if status.is_server_error() => RemoteError::Network(message),
        _ => RemoteError::Api(message),
    }
}

#[derive(Debug, Deserialize)]
struct SupabaseErrorResponse {
    error: Option<String>,
    error_description: Option<String>,
    message: Option<String>,
    msg: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<SupabaseErrorResponse>(body) {
        if let Some(message) = payload
            .message
            .or(payload.msg)
            .or(payload.error_description)
            .or(payload.error)
        {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_at: Option<i64>,
    expires_in: Option<i64>,
    user: Option<SupabaseUser>,
    session: Option<Box<AuthResponse>>,
}

impl AuthResponse {
    /// `Ok(None)` means the account exists but awaits e-mail confirmation.
    fn into_session(self) -> RemoteResult<Option<AuthSession>> {
        let nested = self.session.map(|session| *session);
        let expires_in = self
            .expires_in
            .or_else(|| nested.as_ref().and_then(|session| session.expires_in));
        let access_token = self
            .access_token
            .or_else(|| nested.as_ref().and_then(|session| session.access_token.clone()));
        let refresh_token = self
            .refresh_token
            .or_else(|| nested.as_ref().and_then(|session| session.refresh_token.clone()));
        let expires_at = self
            .expires_at
            .or_else(|| nested.as_ref().and_then(|session| session.expires_at))
            .or_else(|| expires_in.map(|secs| unix_timestamp_now().saturating_add(secs)));
        let user = self
            .user
            .or_else(|| nested.and_then(|session| session.user))
            .map(AuthUser::from);

        match (access_token, refresh_token, expires_at, user) {
            (Some(access_token), Some(refresh_token), Some(expires_at), Some(user)) => {
                Ok(Some(AuthSession {
                    access_token,
                    refresh_token,
                    expires_at,
                    user,
                }))
            }
            (None, None, None, Some(_)) => Ok(None),
            _ => Err(RemoteError::Api(
                "Auth response did not include enough session fields".to_string(),
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SupabaseUser {
    id: String,
    email: Option<String>,
    #[serde(default)]
    user_metadata: Option<SupabaseUserMetadata>,
}

#[derive(Debug, Default, Deserialize)]
struct SupabaseUserMetadata {
    avatar_url: Option<String>,
}

impl From<SupabaseUser> for AuthUser {
    fn from(value: SupabaseUser) -> Self {
        let metadata = value.user_metadata.unwrap_or_default();
        Self {
            id: value.id,
            email: value.email,
            metadata: UserMetadata {
                avatar_url: metadata.avatar_url,
            },
        }
    }
}
