use super::{wire, EditedMessage, MessageBatch, SearchPage, Transport};
use crate::config::ClientConfig;
use crate::error::{ChatError, Result};
use crate::models::input::{OutgoingAttachment, SearchQuery};
use crate::models::{MessageId, Scope};
use async_trait::async_trait;
use reqwest::header::{COOKIE, USER_AGENT};
use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};
use url::Url;

const CLIENT_USER_AGENT: &str = concat!("murmur/", env!("CARGO_PKG_VERSION"));
const MAX_ERROR_BODY_CHARS: usize = 200;

/// [`Transport`] over the chat server's REST API
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
    session_cookie: Option<String>,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: normalize_base(&config.server_url)?,
            session_cookie: config.session_cookie.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| ChatError::Config(format!("invalid endpoint {}: {}", path, e)))
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let builder = self
            .client
            .request(method, self.endpoint(path)?)
            .header(USER_AGENT, CLIENT_USER_AGENT);

        Ok(match &self.session_cookie {
            Some(cookie) => builder.header(COOKIE, cookie),
            None => builder,
        })
    }

    /// Send and return the body of a 2xx response
    async fn execute(&self, builder: RequestBuilder) -> Result<String> {
        let response = builder.send().await?;
        let status = response.status();
        let url = response.url().path().to_string();
        let body = response.text().await?;
        debug!(%status, path = %url, "Server response");
        check_status(status, &body)?;
        Ok(body)
    }

    async fn check_group_access(&self, group_id: u64) -> Result<()> {
        let request = self
            .request(Method::GET, "check_group_access")?
            .query(&[("group_id", group_id)]);
        self.execute(request).await.map(|_| ())
    }
}

/// Make `join` append to the base path instead of replacing its last segment
fn normalize_base(server_url: &str) -> Result<Url> {
    let mut url = Url::parse(server_url)
        .map_err(|e| ChatError::Config(format!("invalid server URL {}: {}", server_url, e)))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

fn error_detail(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed.error,
        Err(_) => body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
    }
}

/// 401/403 are authorization failures; every other non-2xx is a transport failure
fn check_status(status: StatusCode, body: &str) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }
    let detail = error_detail(body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(ChatError::Authorization(format!("{}: {}", status, detail)))
        }
        _ => Err(ChatError::Transport(format!("HTTP error: {} {}", status, detail))),
    }
}

/// `type` and optional `chat_id` query pairs shared by several endpoints
fn scope_params(scope: &Scope) -> Vec<(&'static str, String)> {
    let mut params = vec![("type", scope.kind().to_string())];
    if let Some(chat_id) = scope.chat_id() {
        params.push(("chat_id", chat_id));
    }
    params
}

fn join_ids(ids: &[MessageId]) -> String {
    ids.iter()
        .map(MessageId::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

fn send_form(scope: &Scope, body: &str, attachments: &[OutgoingAttachment]) -> Result<Form> {
    let mut form = Form::new();
    if !body.is_empty() {
        form = form.text("message", body.to_string());
    }
    form = match scope {
        Scope::General => form,
        Scope::Group(id) => form.text("group_id", id.to_string()),
        Scope::Private(peer) => form.text("receiver", peer.clone()),
    };
    for attachment in attachments {
        let part = Part::bytes(attachment.bytes.clone())
            .file_name(attachment.filename.clone())
            .mime_str(&attachment.mime_type)
            .map_err(|e| ChatError::Validation(format!("invalid attachment type: {}", e)))?;
        form = form.part("files", part);
    }
    Ok(form)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch_server_public_key(&self) -> Result<String> {
        self.execute(self.request(Method::GET, "public_key.pem")?).await
    }

    async fn register_session_key(&self, wrapped_key_b64: &str) -> Result<()> {
        let request = self
            .request(Method::POST, "set_session_key")?
            .json(&json!({ "key": wrapped_key_b64 }));
        self.execute(request).await.map(|_| ())
    }

    async fn fetch_messages(&self, scope: &Scope, cursor: i64) -> Result<MessageBatch> {
        let request = match scope {
            Scope::General => self
                .request(Method::GET, "get_messages")?
                .query(&[("timestamp", cursor)]),
            Scope::Group(id) => {
                self.check_group_access(*id).await?;
                self.request(Method::GET, "get_group_messages")?
                    .query(&[("group_id", id.to_string()), ("timestamp", cursor.to_string())])
            }
            Scope::Private(peer) => self
                .request(Method::GET, "get_private_messages")?
                .query(&[("user", peer.clone()), ("timestamp", cursor.to_string())]),
        };

        let body = self.execute(request).await?;
        let batch = wire::parse_batch(&body, scope, cursor)?;
        if batch.skipped > 0 {
            warn!(scope = %scope, skipped = batch.skipped, "Dropped malformed messages");
        }
        Ok(batch)
    }

    async fn check_existence(&self, scope: &Scope, ids: &[MessageId]) -> Result<Vec<MessageId>> {
        let mut params = scope_params(scope);
        params.push(("ids", join_ids(ids)));
        let request = self.request(Method::GET, "check_messages")?.query(&params);
        wire::parse_existence(&self.execute(request).await?)
    }

    async fn check_edits(&self, scope: &Scope, since: i64) -> Result<Vec<EditedMessage>> {
        let mut params = scope_params(scope);
        params.push(("last_timestamp", since.to_string()));
        let request = self
            .request(Method::GET, "check_edited_messages")?
            .query(&params);
        wire::parse_edits(&self.execute(request).await?)
    }

    async fn send_message(
        &self,
        scope: &Scope,
        body: &str,
        attachments: &[OutgoingAttachment],
    ) -> Result<Option<MessageId>> {
        let request = self
            .request(Method::POST, "send_message")?
            .multipart(send_form(scope, body, attachments)?);
        let response = self.execute(request).await?;
        Ok(wire::parse_send(&response))
    }

    async fn edit_message(&self, scope: &Scope, id: &MessageId, body: &str) -> Result<()> {
        let request = self
            .request(Method::PATCH, &format!("edit_message/{}", id))?
            .query(&[("type", scope.kind())])
            .json(&json!({
                "message": body,
                "timestamp": chrono::Utc::now().timestamp(),
            }));
        self.execute(request).await.map(|_| ())
    }

    async fn delete_message(&self, scope: &Scope, id: &MessageId) -> Result<()> {
        let request = self
            .request(Method::DELETE, &format!("delete_message/{}", id))?
            .query(&[("type", scope.kind())]);
        self.execute(request).await.map(|_| ())
    }

    async fn search_messages(&self, scope: &Scope, query: &SearchQuery) -> Result<SearchPage> {
        let mut params = vec![("q", query.query.clone())];
        params.extend(scope_params(scope));
        params.push(("page", query.page.to_string()));
        params.push(("per_page", query.per_page.to_string()));
        params.push(("sort", query.sort.as_str().to_string()));

        let request = self.request(Method::GET, "search_messages")?.query(&params);
        wire::parse_search(&self.execute(request).await?)
    }
}
