//! Response assembly.
//!
//! Renders a parsed [`ResponseModel`] onto the outbound HTTP response.
//! A file payload wins over the text body. Header and cookie values are
//! stripped of CR/LF before hitting the wire.

use http::header::{HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, SET_COOKIE};
use http::StatusCode;
use tracing::warn;

use crate::core::Response;
use crate::engine::output::ResponseModel;

/// Render the model. Consumes it; a model is sent exactly once.
pub fn assemble(model: ResponseModel) -> Response {
    if let Some(file) = model.file {
        let mut response = Response::ok(file.content).with_status(StatusCode::OK);
        append_header(&mut response, CONTENT_TYPE.as_str(), &file.kind);
        append_header(&mut response, CONTENT_LENGTH.as_str(), &file.size.to_string());
        return response;
    }

    let status = StatusCode::from_u16(model.status).unwrap_or_else(|_| {
        warn!(status = model.status, "procedure emitted an invalid status");
        StatusCode::OK
    });

    let mut response = Response::ok(model.body).with_status(status);
    for (name, value) in &model.headers {
        append_header(&mut response, name, value);
    }
    for cookie in &model.cookies {
        append_header(&mut response, SET_COOKIE.as_str(), cookie);
    }
    response
}

/// Append a header, sanitized against CRLF injection. Headers whose name
/// cannot form a valid token are dropped rather than mangled.
fn append_header(response: &mut Response, name: &str, value: &str) {
    let clean: String = value
        .chars()
        .filter(|c| !matches!(c, '\r' | '\n' | '\0'))
        .collect();
    match (
        HeaderName::try_from(name),
        HeaderValue::try_from(clean.as_str()),
    ) {
        (Ok(name), Ok(value)) => {
            response.headers_mut().append(name, value);
        }
        _ => warn!(header = %name, "dropping unrepresentable response header"),
    }
}
