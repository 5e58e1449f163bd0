//! HTTP response abstraction produced by the assembler.

use bytes::Bytes;
use http::header::{self, HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};

/// Pre-allocated static header values.
mod content_types {
    use super::*;
    pub static TEXT_PLAIN: HeaderValue = HeaderValue::from_static("text/plain; charset=utf-8");
}

/// Pre-allocated static bodies for common responses.
mod static_bodies {
    use super::*;
    pub static NOT_FOUND: Bytes = Bytes::from_static(b"Not Found");
    pub static SERVICE_UNAVAILABLE: Bytes = Bytes::from_static(b"Service Unavailable");
    pub static GATEWAY_TIMEOUT: Bytes = Bytes::from_static(b"Gateway Timeout");
}

/// HTTP response.
///
/// Note: Clone is intentionally not derived to prevent expensive copies.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Response {
    /// Create a 200 OK response with body.
    #[inline]
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Create a 404 Not Found response (uses static body).
    pub fn not_found() -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            headers: plain_text_headers(),
            body: static_bodies::NOT_FOUND.clone(),
        }
    }

    /// Create a 500 Internal Server Error response.
    pub fn internal_error(msg: &str) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            headers: plain_text_headers(),
            body: Bytes::copy_from_slice(msg.as_bytes()),
        }
    }

    /// Create a 503 Service Unavailable response (uses static body).
    pub fn service_unavailable() -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            headers: plain_text_headers(),
            body: static_bodies::SERVICE_UNAVAILABLE.clone(),
        }
    }

    /// Create a 504 Gateway Timeout response (uses static body).
    pub fn gateway_timeout() -> Self {
        Self {
            status: StatusCode::GATEWAY_TIMEOUT,
            headers: plain_text_headers(),
            body: static_bodies::GATEWAY_TIMEOUT.clone(),
        }
    }

    #[inline]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[inline]
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    #[inline]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Get a header value by string name (case-insensitive).
    #[inline]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    #[inline]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Add a header by string name and value; silently skipped when the
    /// pair cannot form valid header syntax.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_ref()),
            HeaderValue::try_from(value.as_ref()),
        ) {
            self.headers.append(name, value);
        }
        self
    }
}

fn plain_text_headers() -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(1);
    headers.insert(header::CONTENT_TYPE, content_types::TEXT_PLAIN.clone());
    headers
}

impl From<Response> for http::Response<Bytes> {
    fn from(res: Response) -> Self {
        let mut builder = http::Response::builder().status(res.status);
        if let Some(headers) = builder.headers_mut() {
            *headers = res.headers;
        }
        // Infallible: status and headers were validated on the way in.
        builder.body(res.body).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_response() {
        let res = Response::ok("hello");
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.body().as_ref(), b"hello");
    }

    #[test]
    fn canned_responses_carry_plain_text_type() {
        for res in [
            Response::not_found(),
            Response::service_unavailable(),
            Response::gateway_timeout(),
        ] {
            assert_eq!(res.header("content-type"), Some("text/plain; charset=utf-8"));
        }
    }

    #[test]
    fn with_header_appends_duplicates() {
        let res = Response::ok("")
            .with_header("set-cookie", "a=1")
            .with_header("set-cookie", "b=2");
        assert_eq!(res.headers().get_all("set-cookie").iter().count(), 2);
    }

    #[test]
    fn into_http_response() {
        let res = Response::ok("x")
            .with_status(StatusCode::FOUND)
            .with_header("location", "/y");
        let http_res: http::Response<Bytes> = res.into();
        assert_eq!(http_res.status(), StatusCode::FOUND);
        assert_eq!(http_res.headers().get("location").unwrap(), "/y");
    }
}
