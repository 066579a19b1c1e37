//! Local HTTP proxy: listen on localhost, parse requests, hand them to the RLDP transport.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{bail, Context};
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use http::{StatusCode, Uri};
use rldp_http_core::{Error, ReasonPhrase, ResponseBody, Transport};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Largest request head accepted from a client.
const MAX_HEAD_LEN: usize = 64 * 1024;
const MAX_HEADERS: usize = 64;

/// Bind `bind` and serve until the listener fails.
pub async fn run_proxy(bind: SocketAddr, transport: Arc<Transport>) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    tracing::info!(addr = %bind, "rldp http proxy listening");
    serve(listener, transport).await
}

/// Accept connections on `listener`, one task per client.
pub async fn serve(listener: TcpListener, transport: Arc<Transport>) -> std::io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let transport = transport.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_client(stream, transport).await {
                tracing::debug!(peer = %peer, error = %err, "proxy connection failed");
            }
        });
    }
}

/// Why a client request is refused before it reaches the transport.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
enum Rejection {
    #[error("request has no host")]
    MissingHost,
    #[error("{0} is not supported")]
    Unsupported(String),
    #[error("invalid request target {0}")]
    BadTarget(String),
    #[error("request body exceeds {0} bytes")]
    TooLarge(u64),
    #[error("invalid Content-Length {0:?}")]
    BadLength(String),
}

impl Rejection {
    fn status(&self) -> StatusCode {
        match self {
            Rejection::MissingHost | Rejection::BadTarget(_) | Rejection::BadLength(_) => {
                StatusCode::BAD_REQUEST
            }
            Rejection::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
            Rejection::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }
}

/// Parsed request line and headers.
#[derive(Debug)]
struct RequestHead {
    method: String,
    target: String,
    headers: Vec<(String, Vec<u8>)>,
    /// Bytes taken by the head, including the blank line.
    len: usize,
}

impl RequestHead {
    fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }

    fn content_length(&self) -> Result<usize, Rejection> {
        match self.header("Content-Length") {
            None => Ok(0),
            Some(v) => std::str::from_utf8(v)
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .ok_or_else(|| Rejection::BadLength(String::from_utf8_lossy(v).into_owned())),
        }
    }
}

/// `Ok(None)` while the head is incomplete.
fn parse_head(buf: &[u8]) -> Result<Option<RequestHead>, httparse::Error> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);
    let len = match req.parse(buf)? {
        httparse::Status::Complete(len) => len,
        httparse::Status::Partial => return Ok(None),
    };
    Ok(Some(RequestHead {
        method: req.method.unwrap_or_default().to_string(),
        target: req.path.unwrap_or_default().to_string(),
        headers: req
            .headers
            .iter()
            .map(|h| (h.name.to_string(), h.value.to_vec()))
            .collect(),
        len,
    }))
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection" | "proxy-connection" | "keep-alive" | "te" | "transfer-encoding" | "upgrade"
    )
}

/// Absolute-form targets are used as is; origin-form targets need a `Host` header.
fn build_request(head: &RequestHead, body: Bytes) -> Result<http::Request<Bytes>, Rejection> {
    if head.method.eq_ignore_ascii_case("CONNECT") {
        return Err(Rejection::Unsupported("CONNECT".into()));
    }
    if head.header("Transfer-Encoding").is_some() {
        return Err(Rejection::Unsupported("Transfer-Encoding".into()));
    }
    let uri: Uri = if head.target.starts_with('/') {
        let host = head
            .header("Host")
            .and_then(|v| std::str::from_utf8(v).ok())
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or(Rejection::MissingHost)?;
        format!("http://{}{}", host, head.target).parse::<Uri>()
    } else {
        head.target.parse::<Uri>()
    }
    .map_err(|_| Rejection::BadTarget(head.target.clone()))?;
    if uri.host().is_none() {
        return Err(Rejection::MissingHost);
    }

    let mut builder = http::Request::builder().method(head.method.as_str()).uri(uri);
    for (name, value) in &head.headers {
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_bytes(value),
        ) else {
            continue;
        };
        if is_hop_by_hop(&name) || name == CONTENT_LENGTH || name == HOST {
            continue;
        }
        builder = builder.header(name, value);
    }
    builder
        .body(body)
        .map_err(|_| Rejection::BadTarget(head.target.clone()))
}

/// Serialize with `Content-Length` and `Connection: close`; trailers are dropped.
fn encode_response(res: &http::Response<ResponseBody>) -> Vec<u8> {
    let status = res.status();
    let reason = res
        .extensions()
        .get::<ReasonPhrase>()
        .map(|r| r.0.as_str())
        .filter(|r| !r.is_empty() && !r.contains(['\r', '\n']))
        .or(status.canonical_reason())
        .unwrap_or("");
    let body = res.body().data();

    let mut out = Vec::with_capacity(body.len() + 512);
    out.extend_from_slice(format!("HTTP/1.1 {} {}\r\n", status.as_u16(), reason).as_bytes());
    for (name, value) in res.headers() {
        if is_hop_by_hop(name) || name == CONTENT_LENGTH || name == TRANSFER_ENCODING {
            continue;
        }
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(
        format!("Content-Length: {}\r\nConnection: close\r\n\r\n", body.len()).as_bytes(),
    );
    out.extend_from_slice(body);
    out
}

fn error_response(status: StatusCode, message: &str) -> Vec<u8> {
    let body = format!("{}\n", message);
    format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/plain; charset=utf-8\r\n\
         Content-Length: {}\r\nConnection: close\r\n\r\n{}",
        status.as_u16(),
        status.canonical_reason().unwrap_or(""),
        body.len(),
        body
    )
    .into_bytes()
}

async fn handle_client(mut client: TcpStream, transport: Arc<Transport>) -> anyhow::Result<()> {
    let mut buf = Vec::with_capacity(8192);
    let mut chunk = [0u8; 8192];
    let head = loop {
        if let Some(head) = parse_head(&buf).context("malformed request head")? {
            break head;
        }
        if buf.len() > MAX_HEAD_LEN {
            bail!("request head exceeds {} bytes", MAX_HEAD_LEN);
        }
        let n = client.read(&mut chunk).await?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(());
            }
            bail!("connection closed inside request head");
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let limit = transport.config().max_body_size;
    let declared = match head.content_length() {
        Ok(n) if n as u64 > limit => {
            return reject(&mut client, &head, Rejection::TooLarge(limit)).await;
        }
        Ok(n) => n,
        Err(rejection) => return reject(&mut client, &head, rejection).await,
    };
    let mut body = buf.split_off(head.len);
    while body.len() < declared {
        let n = client.read(&mut chunk).await?;
        if n == 0 {
            bail!("connection closed after {} of {} body bytes", body.len(), declared);
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(declared);

    let req = match build_request(&head, Bytes::from(body)) {
        Ok(req) => req,
        Err(rejection) => return reject(&mut client, &head, rejection).await,
    };

    tracing::debug!(method = %req.method(), uri = %req.uri(), "proxying request");
    let out = match transport.round_trip(req).await {
        Ok(res) => encode_response(&res),
        Err(err @ Error::MissingHost) => {
            error_response(StatusCode::BAD_REQUEST, &err.to_string())
        }
        Err(err) => error_response(StatusCode::BAD_GATEWAY, &err.to_string()),
    };
    client.write_all(&out).await?;
    client.flush().await?;
    Ok(())
}

async fn reject(
    client: &mut TcpStream,
    head: &RequestHead,
    rejection: Rejection,
) -> anyhow::Result<()> {
    tracing::debug!(
        request_target = %head.target,
        error = %rejection,
        "rejecting proxy request"
    );
    client
        .write_all(&error_response(rejection.status(), &rejection.to_string()))
        .await?;
    client.flush().await?;
    Ok(())
}
