//! Conversion between `http` types and the RLDP message set.

use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, HOST};
use http::{StatusCode, Version};

use crate::error::Error;
use crate::protocol::{self, Header, RequestId, HTTP_VERSION};
use crate::stream::PulledBody;

/// Reason phrase sent by the peer, attached to the response's extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReasonPhrase(pub String);

/// Body of a response received over RLDP, fully buffered.
#[derive(Debug, Clone, Default)]
pub struct ResponseBody {
    data: Bytes,
    trailers: HeaderMap,
    content_length: Option<u64>,
}

impl ResponseBody {
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn into_data(self) -> Bytes {
        self.data
    }

    pub fn trailers(&self) -> &HeaderMap {
        &self.trailers
    }

    /// Length announced by the response's `Content-Length`; `None` when unknown.
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }
}

/// Build the RLDP request for `req`. `Host` comes first, carrying `authority` as given,
/// then `Content-Length` for a non-empty body, then the caller's headers with one entry
/// per value.
pub fn build_request(
    req: &http::Request<Bytes>,
    authority: &str,
    id: RequestId,
) -> protocol::Request {
    let mut headers = Vec::with_capacity(req.headers().len() + 2);
    headers.push(Header::new("Host", authority));
    if !req.body().is_empty() {
        headers.push(Header::new("Content-Length", req.body().len().to_string()));
    }
    for (name, value) in req.headers() {
        if name == HOST || name == CONTENT_LENGTH {
            continue;
        }
        headers.push(Header::new(
            name.as_str(),
            String::from_utf8_lossy(value.as_bytes()),
        ));
    }
    protocol::Request {
        id,
        method: req.method().as_str().to_string(),
        url: req.uri().to_string(),
        version: HTTP_VERSION.to_string(),
        headers,
    }
}

/// Build the caller-facing response from the peer's answer and the pulled body.
pub fn build_response(
    res: protocol::Response,
    body: PulledBody,
) -> Result<http::Response<ResponseBody>, Error> {
    let status = StatusCode::from_u16(res.status_code)
        .map_err(|_| Error::QueryFailed(format!("invalid status code {}", res.status_code)))?;
    let headers = header_map(&res.headers);
    let content_length = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    let body = ResponseBody {
        data: body.data,
        trailers: header_map(&body.trailer),
        content_length,
    };
    let mut response = http::Response::new(body);
    *response.status_mut() = status;
    *response.version_mut() = Version::HTTP_11;
    *response.headers_mut() = headers;
    response.extensions_mut().insert(ReasonPhrase(res.reason));
    Ok(response)
}

/// Every value is kept; invalid names or values are skipped.
fn header_map(headers: &[Header]) -> HeaderMap {
    let mut map = HeaderMap::with_capacity(headers.len());
    for h in headers {
        let name = match HeaderName::from_bytes(h.name.as_bytes()) {
            Ok(name) => name,
            Err(_) => {
                tracing::warn!(name = %h.name, "dropping header with invalid name");
                continue;
            }
        };
        match HeaderValue::from_str(&h.value) {
            Ok(value) => {
                map.append(name, value);
            }
            Err(_) => tracing::warn!(name = %h.name, "dropping header with invalid value"),
        }
    }
    map
}
