use std::time::Duration;

use async_trait::async_trait;
use courier_core::{
    CacheValidators, ChatBackend, FetchOutcome, ListQuery, MessagePage, SendMessageResponse,
    SendRequest, TransportError, TransportErrorCategory, classify_http_status,
};
use reqwest::{
    Client, RequestBuilder, Response, StatusCode,
    header::{ETAG, HeaderMap, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED, RETRY_AFTER},
};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

const USER_AGENT: &str = concat!("courier/", env!("CARGO_PKG_VERSION"));
const ERROR_BODY_PREVIEW_CHARS: usize = 256;

#[derive(Debug, Serialize)]
struct SendBody<'a> {
    client_id: Option<&'a str>,
    session_id: &'a str,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<&'a Value>,
}

/// [`ChatBackend`] speaking JSON over HTTP.
///
/// Both operations live under `{base_url}/sessions/{session_id}/messages`:
/// `POST` submits a message, `GET` lists messages newer than `since_id`.
#[derive(Debug, Clone)]
pub struct HttpChatBackend {
    client: Client,
    base_url: Url,
}

impl HttpChatBackend {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, TransportError> {
        let base_url = Url::parse(base_url).map_err(|err| {
            TransportError::new(
                TransportErrorCategory::Client,
                "invalid_base_url",
                format!("invalid backend url '{base_url}': {err}"),
            )
        })?;
        if base_url.cannot_be_a_base() {
            return Err(TransportError::new(
                TransportErrorCategory::Client,
                "invalid_base_url",
                format!("backend url '{base_url}' cannot carry a path"),
            ));
        }

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(request_timeout)
            .build()
            .map_err(|err| {
                TransportError::new(
                    TransportErrorCategory::Internal,
                    "http_client_build_failed",
                    err.to_string(),
                )
            })?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn messages_url(&self, session_id: &str) -> Result<Url, TransportError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                TransportError::new(
                    TransportErrorCategory::Client,
                    "invalid_base_url",
                    "backend url cannot carry a path",
                )
            })?
            .pop_if_empty()
            .extend(["sessions", session_id, "messages"]);
        Ok(url)
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn send_message(
        &self,
        request: &SendRequest,
        bearer: Option<&str>,
    ) -> Result<SendMessageResponse, TransportError> {
        let url = self.messages_url(&request.session_id)?;
        let body = SendBody {
            client_id: request.client_id.as_deref(),
            session_id: &request.session_id,
            content: &request.body,
            context: request.context.as_ref(),
        };

        let response = with_bearer(self.client.post(url), bearer)
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        response
            .json::<SendMessageResponse>()
            .await
            .map_err(map_reqwest_error)
    }

    async fn list_messages_since(
        &self,
        query: &ListQuery,
        bearer: Option<&str>,
        validators: Option<&CacheValidators>,
    ) -> Result<FetchOutcome, TransportError> {
        let mut url = self.messages_url(&query.session_id)?;
        {
            let mut pairs = url.query_pairs_mut();
            if let Some(since_id) = query.since_id.as_deref() {
                pairs.append_pair("since_id", since_id);
            }
            pairs.append_pair("limit", &query.limit.to_string());
            if let Some(offset) = query.offset {
                pairs.append_pair("offset", &offset.to_string());
            }
        }

        let mut builder = with_bearer(self.client.get(url), bearer);
        if let Some(validators) = validators {
            if let Some(etag) = validators.etag.as_deref() {
                builder = builder.header(IF_NONE_MATCH, etag);
            }
            if let Some(last_modified) = validators.last_modified.as_deref() {
                builder = builder.header(IF_MODIFIED_SINCE, last_modified);
            }
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            debug!(session_id = %query.session_id, "list-since not modified");
            return Ok(FetchOutcome::NotModified);
        }
        if !status.is_success() {
            return Err(error_from_response(response).await);
        }

        let validators = validators_from_headers(response.headers());
        let page = response
            .json::<MessagePage>()
            .await
            .map_err(map_reqwest_error)?;
        Ok(FetchOutcome::Modified { page, validators })
    }
}

fn with_bearer(builder: RequestBuilder, bearer: Option<&str>) -> RequestBuilder {
    match bearer {
        Some(token) => builder.bearer_auth(token),
        None => builder,
    }
}

fn header_string(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}

fn validators_from_headers(headers: &HeaderMap) -> CacheValidators {
    CacheValidators {
        etag: header_string(headers, ETAG),
        last_modified: header_string(headers, LAST_MODIFIED),
    }
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
fn retry_after_hint(headers: &HeaderMap) -> Option<Duration> {
    header_string(headers, RETRY_AFTER)
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn status_error_code(category: TransportErrorCategory) -> &'static str {
    match category {
        TransportErrorCategory::Auth => "unauthorized",
        TransportErrorCategory::Timeout => "request_timeout",
        TransportErrorCategory::RateLimited => "rate_limited",
        TransportErrorCategory::Client => "bad_request",
        TransportErrorCategory::Server => "server_error",
        _ => "unexpected_status",
    }
}

async fn error_from_response(response: Response) -> TransportError {
    let status = response.status().as_u16();
    let retry_after = retry_after_hint(response.headers());
    let category = classify_http_status(status);
    let body = response.text().await.unwrap_or_default();
    let preview: String = body.trim().chars().take(ERROR_BODY_PREVIEW_CHARS).collect();

    let message = if preview.is_empty() {
        format!("backend returned HTTP {status}")
    } else {
        format!("backend returned HTTP {status}: {preview}")
    };

    let mut mapped = TransportError::new(category, status_error_code(category), message);
    if let Some(delay) = retry_after {
        mapped = mapped.with_retry_after(delay);
    }
    mapped
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::new(
            TransportErrorCategory::Timeout,
            "request_timeout",
            err.to_string(),
        )
    } else if err.is_connect() {
        TransportError::new(
            TransportErrorCategory::Network,
            "network_unreachable",
            err.to_string(),
        )
    } else if err.is_decode() {
        TransportError::new(
            TransportErrorCategory::Serialization,
            "invalid_response_body",
            err.to_string(),
        )
    } else if err.is_request() || err.is_body() {
        TransportError::new(
            TransportErrorCategory::Network,
            "network_error",
            err.to_string(),
        )
    } else {
        TransportError::new(
            TransportErrorCategory::Internal,
            "http_error",
            err.to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
        task::JoinHandle,
    };

    use super::*;
    use courier_core::MessageRole;

    fn request_complete(buf: &[u8]) -> bool {
        let text = String::from_utf8_lossy(buf);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let content_length = text[..header_end]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                if name.trim().eq_ignore_ascii_case("content-length") {
                    value.trim().parse::<usize>().ok()
                } else {
                    None
                }
            })
            .unwrap_or(0);
        buf.len() >= header_end + 4 + content_length
    }

    /// Serve exactly one canned response and hand back the raw request,
    /// lowercased.
    async fn serve_once(response: String) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut buf = Vec::new();
            let mut chunk = [0_u8; 4096];
            loop {
                let read = socket.read(&mut chunk).await.expect("read");
                if read == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..read]);
                if request_complete(&buf) {
                    break;
                }
            }
            socket
                .write_all(response.as_bytes())
                .await
                .expect("write response");
            let _ = socket.shutdown().await;
            String::from_utf8_lossy(&buf).to_lowercase()
        });
        (format!("http://{addr}/api/"), handle)
    }

    fn http_response(status_line: &str, headers: &[(&str, &str)], body: &str) -> String {
        let mut response = format!("HTTP/1.1 {status_line}\r\n");
        for (name, value) in headers {
            response.push_str(&format!("{name}: {value}\r\n"));
        }
        response.push_str(&format!(
            "content-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        ));
        response
    }

    fn query(since_id: Option<&str>) -> ListQuery {
        ListQuery {
            session_id: "s1".into(),
            since_id: since_id.map(str::to_owned),
            limit: 50,
            offset: None,
        }
    }

    #[test]
    fn rejects_unusable_base_urls() {
        let err = HttpChatBackend::new("not a url", Duration::from_secs(1))
            .expect_err("garbage url should be rejected");
        assert_eq!(err.code, "invalid_base_url");

        let err = HttpChatBackend::new("mailto:ops@example.org", Duration::from_secs(1))
            .expect_err("non-hierarchical url should be rejected");
        assert_eq!(err.category, TransportErrorCategory::Client);
    }

    #[test]
    fn builds_session_message_urls_under_base_path() {
        let backend =
            HttpChatBackend::new("https://chat.example.org/api/", Duration::from_secs(1))
                .expect("valid url");
        let url = backend.messages_url("s 1").expect("url");
        assert_eq!(
            url.as_str(),
            "https://chat.example.org/api/sessions/s%201/messages"
        );
    }

    #[tokio::test]
    async fn list_returns_page_and_validators() {
        let body = r#"{"messages":[{"id":"m-1","role":"assistant","content":"hi","timestamp_ms":5}],"has_more":true}"#;
        let (base, server) = serve_once(http_response(
            "200 OK",
            &[
                ("content-type", "application/json"),
                ("etag", "\"v1\""),
                ("last-modified", "Wed, 21 Oct 2026 07:28:00 GMT"),
            ],
            body,
        ))
        .await;

        let backend = HttpChatBackend::new(&base, Duration::from_secs(5)).expect("backend");
        let outcome = backend
            .list_messages_since(&query(Some("m-0")), Some("tok-1"), None)
            .await
            .expect("list should succeed");

        match outcome {
            FetchOutcome::Modified { page, validators } => {
                assert!(page.has_more);
                assert_eq!(page.messages.len(), 1);
                assert_eq!(page.messages[0].role, MessageRole::Assistant);
                assert_eq!(validators.etag.as_deref(), Some("\"v1\""));
                assert!(validators.last_modified.is_some());
            }
            FetchOutcome::NotModified => panic!("expected a fresh page"),
        }

        let request = server.await.expect("server task");
        assert!(request.starts_with("get /api/sessions/s1/messages?since_id=m-0&limit=50"));
        assert!(request.contains("authorization: bearer tok-1"));
    }

    #[tokio::test]
    async fn conditional_list_maps_304_to_not_modified() {
        let (base, server) = serve_once(http_response("304 Not Modified", &[], "")).await;
        let backend = HttpChatBackend::new(&base, Duration::from_secs(5)).expect("backend");
        let validators = CacheValidators {
            etag: Some("\"v1\"".into()),
            last_modified: None,
        };

        let outcome = backend
            .list_messages_since(&query(None), None, Some(&validators))
            .await
            .expect("304 is not an error");
        assert_eq!(outcome, FetchOutcome::NotModified);

        let request = server.await.expect("server task");
        assert!(request.contains("if-none-match: \"v1\""));
        assert!(!request.contains("authorization:"));
    }

    #[tokio::test]
    async fn maps_unauthorized_to_auth_category() {
        let (base, _server) =
            serve_once(http_response("401 Unauthorized", &[], "token expired")).await;
        let backend = HttpChatBackend::new(&base, Duration::from_secs(5)).expect("backend");

        let err = backend
            .list_messages_since(&query(None), Some("stale"), None)
            .await
            .expect_err("401 should fail");
        assert_eq!(err.category, TransportErrorCategory::Auth);
        assert!(err.is_auth_rejection());
        assert!(err.message.contains("token expired"));
    }

    #[tokio::test]
    async fn carries_retry_after_on_rate_limit() {
        let (base, _server) =
            serve_once(http_response("429 Too Many Requests", &[("retry-after", "7")], "")).await;
        let backend = HttpChatBackend::new(&base, Duration::from_secs(5)).expect("backend");

        let err = backend
            .send_message(&SendRequest::new("s1", "hi").with_client_id("c1"), None)
            .await
            .expect_err("429 should fail");
        assert_eq!(err.category, TransportErrorCategory::RateLimited);
        assert_eq!(err.retry_after_ms, Some(7_000));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn send_posts_json_body_and_decodes_reply() {
        let body = r#"{"success":true,"message_id":"m-9","reply":{"content":"hello back"}}"#;
        let (base, server) = serve_once(http_response(
            "200 OK",
            &[("content-type", "application/json")],
            body,
        ))
        .await;
        let backend = HttpChatBackend::new(&base, Duration::from_secs(5)).expect("backend");

        let response = backend
            .send_message(
                &SendRequest::new("s1", "Hi There").with_client_id("c1"),
                Some("tok-1"),
            )
            .await
            .expect("send should succeed");
        assert!(response.success);
        assert_eq!(response.message_id.as_deref(), Some("m-9"));
        let reply = response.reply.expect("reply");
        assert_eq!(reply.role, MessageRole::Assistant);

        let request = server.await.expect("server task");
        assert!(request.starts_with("post /api/sessions/s1/messages"));
        assert!(request.contains("\"client_id\":\"c1\""));
        assert!(request.contains("\"content\":\"hi there\""));
    }

    #[tokio::test]
    async fn malformed_body_is_a_serialization_error() {
        let (base, _server) = serve_once(http_response(
            "200 OK",
            &[("content-type", "application/json")],
            "{not json",
        ))
        .await;
        let backend = HttpChatBackend::new(&base, Duration::from_secs(5)).expect("backend");

        let err = backend
            .list_messages_since(&query(None), None, None)
            .await
            .expect_err("invalid json should fail");
        assert_eq!(err.category, TransportErrorCategory::Serialization);
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    #[ignore = "requires COURIER_BASE_URL pointing at a live backend"]
    async fn live_list_messages() {
        let base = std::env::var("COURIER_BASE_URL").expect("COURIER_BASE_URL");
        let session = std::env::var("COURIER_SESSION").unwrap_or_else(|_| "courier-smoke".into());
        let token = std::env::var("COURIER_TOKEN").ok();
        let backend = HttpChatBackend::new(&base, Duration::from_secs(10)).expect("backend");

        let outcome = backend
            .list_messages_since(
                &ListQuery {
                    session_id: session,
                    since_id: None,
                    limit: 10,
                    offset: None,
                },
                token.as_deref(),
                None,
            )
            .await
            .expect("live list should succeed");
        assert!(matches!(outcome, FetchOutcome::Modified { .. }));
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_retryable_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let backend = HttpChatBackend::new(&format!("http://{addr}/"), Duration::from_secs(5))
            .expect("backend");
        let err = backend
            .list_messages_since(&query(None), None, None)
            .await
            .expect_err("closed port should fail");
        assert_eq!(err.category, TransportErrorCategory::Network);
        assert!(err.is_retryable());
    }
}
