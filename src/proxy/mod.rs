//! Reverse proxy engine — forwards one request to one upstream
//!
//! Each `ReverseProxy` is bound to a single upstream URL. It rewrites the
//! outbound request (URL join, query normalization, hop-by-hop hygiene,
//! `X-Forwarded-For`), round-trips it over a tuned shared HTTP client and
//! relays the response back, streaming chunked/event-stream bodies and
//! buffering everything else.

use crate::cache::CachedResponse;
use bytes::Bytes;
use futures_util::TryStreamExt;
use http::{header, HeaderMap, HeaderName, HeaderValue, Method, Response, StatusCode, Uri};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use std::net::{IpAddr, SocketAddr};
use std::sync::OnceLock;
use std::time::Duration;
use url::Url;

/// Response body handed back to hyper: either a buffered chunk or a live
/// passthrough stream from the upstream.
pub type ProxyBody = UnsyncBoxBody<Bytes, std::io::Error>;

/// Headers scoped to a single transport hop, never forwarded
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Shared outbound client — one connection pool for every backend.
///
/// Pool knobs follow the proxy's transport contract: 5s connect timeout,
/// 30s TCP keepalive, at most 10 idle connections per host, 90s idle
/// timeout. Redirects are passed through to the client, never followed.
static PROXY_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

fn proxy_client() -> &'static reqwest::Client {
    PROXY_CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .tcp_keepalive(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_default()
    })
}

/// An inbound request with its body already collected, plus the client
/// address for `X-Forwarded-For`.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub client_addr: SocketAddr,
}

/// Reverse proxy bound to one upstream URL
#[derive(Debug, Clone)]
pub struct ReverseProxy {
    upstream: Url,
    client: reqwest::Client,
}

impl ReverseProxy {
    /// Create a proxy engine for `upstream`, sharing the process-wide
    /// connection pool.
    pub fn new(upstream: Url) -> Self {
        Self {
            upstream,
            client: proxy_client().clone(),
        }
    }

    /// The upstream URL this engine forwards to
    pub fn upstream(&self) -> &Url {
        &self.upstream
    }

    /// Forward `req` to the upstream and relay the response.
    ///
    /// Returns the client-facing response plus, for buffered bodies, the
    /// replayable metadata the caller may cache. Streamed responses and
    /// upstream failures return `None`. Dropping the returned future (the
    /// client went away) cancels the upstream round-trip.
    pub async fn serve_request(
        &self,
        req: &InboundRequest,
    ) -> (Response<ProxyBody>, Option<CachedResponse>) {
        let target = self.rewrite_target(&req.uri);

        let mut headers = req.headers.clone();
        strip_hop_by_hop(&mut headers);
        append_forwarded_for(&mut headers, req.client_addr.ip());
        // An absent User-Agent must stay empty, not become a library default
        if !headers.contains_key(header::USER_AGENT) {
            headers.insert(header::USER_AGENT, HeaderValue::from_static(""));
        }

        let mut outbound = self
            .client
            .request(req.method.clone(), &target)
            .headers(headers);
        // A zero-length body is dropped entirely so the transport may
        // safely retry bodyless requests on a broken pooled connection
        if !req.body.is_empty() {
            outbound = outbound.body(req.body.clone());
        }

        let upstream_response = match outbound.send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(upstream = %self.upstream, error = %e, "Proxy error");
                return (status_response(StatusCode::BAD_GATEWAY), None);
            }
        };

        let status = upstream_response.status();
        let mut resp_headers = upstream_response.headers().clone();
        strip_hop_by_hop(&mut resp_headers);

        if is_streaming(&resp_headers, upstream_response.content_length()) {
            // Relay each upstream chunk as its own frame; hyper writes
            // frames out as they arrive, so event streams stay live
            let upstream = self.upstream.clone();
            let stream = upstream_response
                .bytes_stream()
                .map_err(move |e| {
                    tracing::error!(upstream = %upstream, error = %e, "Error reading response body");
                    std::io::Error::other(e)
                })
                .map_ok(hyper::body::Frame::data);
            let mut response = Response::new(StreamBody::new(stream).boxed_unsync());
            *response.status_mut() = status;
            *response.headers_mut() = resp_headers;
            return (response, None);
        }

        match upstream_response.bytes().await {
            Ok(body) => {
                let served = CachedResponse {
                    status,
                    headers: resp_headers.clone(),
                    body: body.clone(),
                };
                let mut response = Response::new(full_body(body));
                *response.status_mut() = status;
                *response.headers_mut() = resp_headers;
                (response, Some(served))
            }
            Err(e) => {
                tracing::error!(upstream = %self.upstream, error = %e, "Error reading response body");
                (status_response(StatusCode::BAD_GATEWAY), None)
            }
        }
    }

    /// Rebase the request URI onto the upstream: scheme and authority come
    /// from the upstream, paths are slash-joined, queries concatenated.
    fn rewrite_target(&self, uri: &Uri) -> String {
        let upstream_path = match self.upstream.path() {
            "/" => "",
            p => p,
        };
        let path = join_url_path(upstream_path, uri.path());

        let upstream_query = self.upstream.query().unwrap_or("");
        let request_query = uri.query().unwrap_or("");
        let query = match (upstream_query.is_empty(), request_query.is_empty()) {
            (true, true) => String::new(),
            (false, true) => upstream_query.to_string(),
            (true, false) => request_query.to_string(),
            (false, false) => format!("{}&{}", upstream_query, request_query),
        };
        let query = normalize_query(&query);

        if query.is_empty() {
            format!(
                "{}://{}{}",
                self.upstream.scheme(),
                self.upstream.authority(),
                path
            )
        } else {
            format!(
                "{}://{}{}?{}",
                self.upstream.scheme(),
                self.upstream.authority(),
                path,
                query
            )
        }
    }
}

/// Join an upstream base path and a request path with exactly one slash at
/// the seam.
pub fn join_url_path(upstream: &str, request: &str) -> String {
    let upstream_slash = upstream.ends_with('/');
    let request_slash = request.starts_with('/');
    match (upstream_slash, request_slash) {
        (true, true) => format!("{}{}", upstream, &request[1..]),
        (false, false) => format!("{}/{}", upstream, request),
        _ => format!("{}{}", upstream, request),
    }
}

/// Re-encode a query string when it contains `;` or malformed `%` escapes.
/// Re-encoded pairs come out sorted by key; values for a key keep their
/// order.
pub fn normalize_query(query: &str) -> String {
    if !needs_reencode(query) {
        return query.to_string();
    }
    let mut pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();
    pairs.sort_by(|(a, _), (b, _)| a.cmp(b));
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        serializer.append_pair(&key, &value);
    }
    serializer.finish()
}

fn needs_reencode(query: &str) -> bool {
    let bytes = query.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b';' => return true,
            b'%' => {
                if i + 2 >= bytes.len()
                    || !bytes[i + 1].is_ascii_hexdigit()
                    || !bytes[i + 2].is_ascii_hexdigit()
                {
                    return true;
                }
                i += 3;
            }
            _ => i += 1,
        }
    }
    false
}

/// Remove hop-by-hop headers: every name listed in `Connection` plus the
/// fixed RFC set.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let connection_named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| {
            let name = name.trim();
            if name.is_empty() {
                None
            } else {
                name.parse::<HeaderName>().ok()
            }
        })
        .collect();
    for name in connection_named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}

/// Append the client IP to the `X-Forwarded-For` chain. A header that is
/// explicitly present with no value suppresses the append entirely.
pub fn append_forwarded_for(headers: &mut HeaderMap, client_ip: IpAddr) {
    let name = HeaderName::from_static("x-forwarded-for");
    if headers.contains_key(&name) {
        let values: Vec<&str> = headers
            .get_all(&name)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect();
        if values.iter().all(|value| value.trim().is_empty()) {
            return;
        }
        let chain = format!("{}, {}", values.join(", "), client_ip);
        if let Ok(value) = HeaderValue::from_str(&chain) {
            headers.insert(&name, value);
        }
    } else if let Ok(value) = HeaderValue::from_str(&client_ip.to_string()) {
        headers.insert(&name, value);
    }
}

/// A response is streamed when its base Content-Type is `text/event-stream`
/// or its length is unknown (chunked transfer).
fn is_streaming(headers: &HeaderMap, content_length: Option<u64>) -> bool {
    let event_stream = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<mime::Mime>().ok())
        .map(|m| m.essence_str() == mime::TEXT_EVENT_STREAM.essence_str())
        .unwrap_or(false);
    event_stream || content_length.is_none()
}

/// Wrap buffered bytes as a client-facing body
pub fn full_body(bytes: Bytes) -> ProxyBody {
    Full::new(bytes)
        .map_err(|never: std::convert::Infallible| match never {})
        .boxed_unsync()
}

/// A bodyless response with the given status
pub fn status_response(status: StatusCode) -> Response<ProxyBody> {
    let mut response = Response::new(full_body(Bytes::new()));
    *response.status_mut() = status;
    response
}

/// A plain-text response with the given status and body
pub fn text_response(status: StatusCode, body: &'static str) -> Response<ProxyBody> {
    let mut response = Response::new(full_body(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
