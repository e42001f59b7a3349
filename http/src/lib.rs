//! # Cancelable Requests HTTP
//!
//! [`Transport`] implementation backed by `reqwest`.
//!
//! ## Example
//!
//! ```ignore
//! use cancelable_requests_http::ReqwestTransport;
//! use cancelable_requests_runtime::{CancelableClient, RequestOptions};
//!
//! let client = CancelableClient::new(ReqwestTransport::new(), Arc::clone(&registry));
//! let request = reqwest::Request::new(reqwest::Method::GET, "https://example.com/api/users".parse()?);
//! let response = client
//!     .send(request, RequestTag::for_component(component).into())
//!     .await?;
//! assert!(response.body().status().is_success());
//! ```

use cancelable_requests_runtime::{Transport, TransportFuture};
use reqwest::{Client, Request, StatusCode, Url};

/// A fully read HTTP response.
///
/// The body is read inside the transport so cancelling a request also stops
/// a body download in progress.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    status: StatusCode,
    url: Url,
    body: Vec<u8>,
}

impl HttpResponse {
    /// Status code returned by the server
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Final URL after redirects
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// Raw body bytes
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.body
    }

    /// Body decoded as UTF-8, replacing invalid sequences
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// `reqwest` transport.
///
/// The logical request identity defaults to the URL without its query string
/// and fragment, so successive pages of the same endpoint supersede each other.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Transport with a default `reqwest` client
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport over a preconfigured client (timeouts, proxies, TLS)
    #[must_use]
    pub const fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// The underlying client
    #[must_use]
    pub const fn client(&self) -> &Client {
        &self.client
    }
}

impl Transport for ReqwestTransport {
    type Request = Request;
    type Response = HttpResponse;
    type Error = reqwest::Error;

    fn target(&self, request: &Request) -> String {
        let mut url = request.url().clone();
        url.set_query(None);
        url.set_fragment(None);
        url.to_string()
    }

    fn execute(&self, request: Request) -> TransportFuture<HttpResponse, reqwest::Error> {
        let client = self.client.clone();
        Box::pin(async move {
            tracing::debug!(method = %request.method(), url = %request.url(), "Dispatching request");
            let response = client.execute(request).await?;
            let status = response.status();
            let url = response.url().clone();
            let body = response.bytes().await?.to_vec();
            Ok(HttpResponse { status, url, body })
        })
    }
}
