//! HTTP adapter for request/response remotes.
//!
//! The HTTP client itself is abstracted behind [`HttpClient`] so any library
//! (reqwest, ureq, hyper) can be plugged in. [`HttpCall`] turns one JSON
//! request into a [`RemoteCall`] the [`crate::RestSyncManager`] can drive.

use driftsync_protocol::{RemoteCall, RemoteError, RemoteResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        })
    }
}

/// A request handed to an [`HttpClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Method.
    pub method: HttpMethod,
    /// Absolute URL.
    pub url: String,
    /// Header name/value pairs.
    pub headers: Vec<(String, String)>,
    /// Body, empty for GET and DELETE.
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Creates a request without headers or body.
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets a JSON body and its content type.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Decode`] if `body` cannot be serialized.
    pub fn with_json<B: Serialize + ?Sized>(mut self, body: &B) -> RemoteResult<Self> {
        self.body = serde_json::to_vec(body)?;
        Ok(self.with_header("content-type", "application/json"))
    }
}

/// A response returned by an [`HttpClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Body bytes.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client abstraction.
///
/// `send` returns an error only when no response was received. Non-2xx
/// responses are returned as responses.
pub trait HttpClient: Send + Sync {
    /// Sends a request and waits for the response.
    fn send(&self, request: HttpRequest) -> RemoteResult<HttpResponse>;
}

impl<C: HttpClient + ?Sized> HttpClient for Arc<C> {
    fn send(&self, request: HttpRequest) -> RemoteResult<HttpResponse> {
        (**self).send(request)
    }
}

/// One JSON request whose response deserializes into `T`.
pub struct HttpCall<C, T> {
    client: C,
    request: HttpRequest,
    _response: PhantomData<fn() -> T>,
}

impl<C: HttpClient, T: DeserializeOwned> HttpCall<C, T> {
    /// Wraps a prepared request.
    pub fn new(client: C, request: HttpRequest) -> Self {
        Self {
            client,
            request,
            _response: PhantomData,
        }
    }

    /// A GET of `url`.
    pub fn get(client: C, url: impl Into<String>) -> Self {
        Self::new(client, HttpRequest::new(HttpMethod::Get, url))
    }

    /// A POST of `body` as JSON to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Decode`] if `body` cannot be serialized.
    pub fn post_json<B: Serialize + ?Sized>(
        client: C,
        url: impl Into<String>,
        body: &B,
    ) -> RemoteResult<Self> {
        Ok(Self::new(
            client,
            HttpRequest::new(HttpMethod::Post, url).with_json(body)?,
        ))
    }

    /// A PUT of `body` as JSON to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Decode`] if `body` cannot be serialized.
    pub fn put_json<B: Serialize + ?Sized>(
        client: C,
        url: impl Into<String>,
        body: &B,
    ) -> RemoteResult<Self> {
        Ok(Self::new(
            client,
            HttpRequest::new(HttpMethod::Put, url).with_json(body)?,
        ))
    }

    /// A DELETE of `url`.
    pub fn delete(client: C, url: impl Into<String>) -> Self {
        Self::new(client, HttpRequest::new(HttpMethod::Delete, url))
    }

    /// Returns the request that will be sent.
    pub fn request(&self) -> &HttpRequest {
        &self.request
    }
}

impl<C, T> RemoteCall for HttpCall<C, T>
where
    C: HttpClient + 'static,
    T: DeserializeOwned + Send + 'static,
{
    type Response = T;

    fn execute(self) -> RemoteResult<T> {
        let method = self.request.method;
        let url = self.request.url.clone();
        let response = self.client.send(self.request)?;
        tracing::debug!(%method, url = %url, status = response.status, "http response");

        if !response.is_success() {
            return Err(RemoteError::Status {
                code: response.status,
                body: String::from_utf8_lossy(&response.body).into_owned(),
            });
        }

        // An empty body (e.g. 204) decodes as JSON null.
        let body: &[u8] = if response.body.is_empty() {
            b"null"
        } else {
            &response.body
        };
        Ok(serde_json::from_slice(body)?)
    }
}

impl<C, T> fmt::Debug for HttpCall<C, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpCall")
            .field("method", &self.request.method)
            .field("url", &self.request.url)
            .finish_non_exhaustive()
    }
}

/// Trait for servers that can answer loopback requests in-process.
pub trait LoopbackServer {
    /// Handles a request addressed to `path`.
    fn handle(&self, method: HttpMethod, path: &str, body: &[u8]) -> HttpResponse;
}

/// An HTTP client that routes requests directly to an in-process server.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    base_url: String,
    server: S,
}

impl<S: LoopbackServer + Send + Sync> LoopbackClient<S> {
    /// Creates a client that serves URLs under `base_url` from `server`.
    pub fn new(base_url: impl Into<String>, server: S) -> Self {
        Self {
            base_url: base_url.into(),
            server,
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the server.
    pub fn server(&self) -> &S {
        &self.server
    }
}

impl<S: LoopbackServer + Send + Sync> HttpClient for LoopbackClient<S> {
    fn send(&self, request: HttpRequest) -> RemoteResult<HttpResponse> {
        let path = request
            .url
            .strip_prefix(&self.base_url)
            .ok_or_else(|| RemoteError::transport(format!("unknown host for {}", request.url)))?;
        Ok(self.server.handle(request.method, path, &request.body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde::Deserialize;
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: String,
        request_time: i64,
    }

    /// A JSON resource at `/notes/{id}`.
    #[derive(Default)]
    struct NotesServer {
        notes: Mutex<BTreeMap<String, Vec<u8>>>,
    }

    impl LoopbackServer for NotesServer {
        fn handle(&self, method: HttpMethod, path: &str, body: &[u8]) -> HttpResponse {
            let mut notes = self.notes.lock();
            match (method, path.strip_prefix("/notes/")) {
                (HttpMethod::Get, Some("")) => {
                    let all: Vec<serde_json::Value> = notes
                        .values()
                        .map(|b| serde_json::from_slice(b).unwrap())
                        .collect();
                    HttpResponse::new(200, serde_json::to_vec(&all).unwrap())
                }
                (HttpMethod::Post | HttpMethod::Put, Some(id)) => {
                    notes.insert(id.to_string(), body.to_vec());
                    HttpResponse::new(200, body.to_vec())
                }
                (HttpMethod::Delete, Some(id)) => match notes.remove(id) {
                    Some(old) => HttpResponse::new(200, old),
                    None => HttpResponse::new(404, "not found"),
                },
                _ => HttpResponse::new(400, "bad request"),
            }
        }
    }

    fn client() -> Arc<LoopbackClient<NotesServer>> {
        Arc::new(LoopbackClient::new(
            "http://loopback",
            NotesServer::default(),
        ))
    }

    #[test]
    fn post_then_get_roundtrip() {
        let client = client();
        let note = Note {
            id: "a1".into(),
            request_time: 1000,
        };

        let created: Note = HttpCall::post_json(Arc::clone(&client), "http://loopback/notes/a1", &note)
            .unwrap()
            .execute()
            .unwrap();
        assert_eq!(created, note);

        let all: Vec<Note> = HttpCall::get(client, "http://loopback/notes/")
            .execute()
            .unwrap();
        assert_eq!(all, vec![note]);
    }

    #[test]
    fn non_success_maps_to_status() {
        let err = HttpCall::<_, Note>::delete(client(), "http://loopback/notes/missing")
            .execute()
            .unwrap_err();
        assert_eq!(
            err,
            RemoteError::Status {
                code: 404,
                body: "not found".into()
            }
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn malformed_body_is_protocol_error() {
        struct Garbage;
        impl HttpClient for Garbage {
            fn send(&self, _request: HttpRequest) -> RemoteResult<HttpResponse> {
                Ok(HttpResponse::new(200, "{not json"))
            }
        }

        let err = HttpCall::<_, Note>::get(Garbage, "http://x/notes/")
            .execute()
            .unwrap_err();
        assert!(err.is_protocol());
    }

    #[test]
    fn empty_body_decodes_as_null() {
        struct NoContent;
        impl HttpClient for NoContent {
            fn send(&self, _request: HttpRequest) -> RemoteResult<HttpResponse> {
                Ok(HttpResponse::new(204, Vec::new()))
            }
        }

        let unit: Option<Note> = HttpCall::get(NoContent, "http://x/notes/a1")
            .execute()
            .unwrap();
        assert_eq!(unit, None);
    }

    #[test]
    fn unknown_host_is_transport_error() {
        let err = HttpCall::<_, Note>::get(client(), "http://elsewhere/notes/")
            .execute()
            .unwrap_err();
        assert!(matches!(err, RemoteError::Transport(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn json_request_sets_content_type() {
        let call = HttpCall::<_, Note>::put_json(client(), "http://loopback/notes/a1", &[1, 2])
            .unwrap();
        assert_eq!(call.request().method, HttpMethod::Put);
        assert_eq!(call.request().body, b"[1,2]".to_vec());
        assert!(call
            .request()
            .headers
            .contains(&("content-type".to_string(), "application/json".to_string())));
    }
}
