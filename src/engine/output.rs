//! Output-buffer parsing.
//!
//! The procedure's accumulated print buffer becomes the HTTP response: a
//! leading run of `Name: value` directive lines defines status, headers,
//! and cookies; the first line that is not directive-shaped starts the
//! body. Directive names the parser does not special-case pass through
//! as opaque headers so that newer gateway directives keep working.

use tracing::warn;

use crate::engine::invoke::{FileDownload, RawOutput};

/// Status used when the procedure emits no `Status:` directive.
pub const DEFAULT_STATUS: u16 = 200;

/// Fixed body for soft-denied requests.
pub const ACCESS_DENIED_BODY: &str = "access denied";

/// Header identifying the gateway on every parsed response.
pub const GATEWAY_HEADER: &str = "X-Gateway";

/// Structured response. Consumed exactly once by the assembler; the file
/// payload, when present, takes precedence over the text body.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseModel {
    pub status: u16,
    /// Order-preserving; duplicate names permitted.
    pub headers: Vec<(String, String)>,
    pub cookies: Vec<String>,
    pub body: String,
    pub file: Option<FileDownload>,
}

impl ResponseModel {
    /// The soft-deny response: a normal success, fixed body, no
    /// procedure output behind it.
    pub fn denied() -> Self {
        Self {
            status: DEFAULT_STATUS,
            headers: vec![gateway_header()],
            cookies: Vec::new(),
            body: ACCESS_DENIED_BODY.to_string(),
            file: None,
        }
    }
}

fn gateway_header() -> (String, String) {
    (
        GATEWAY_HEADER.to_string(),
        format!("plsgate/{}", crate::PKG_VERSION),
    )
}

/// Parse a raw invocation result. Buffer rows are reassembled into
/// logical lines first; the row boundaries themselves carry no meaning.
pub fn parse(raw: RawOutput) -> ResponseModel {
    let lines = reassemble(&raw.chunks);
    parse_lines(&lines, raw.download)
}

/// Rebuild logical lines from output-buffer rows. Rows are concatenated
/// verbatim and split after each newline, so every line except possibly
/// the last keeps its terminator.
pub fn reassemble(chunks: &[String]) -> Vec<String> {
    let joined: String = chunks.concat();
    joined
        .split_inclusive('\n')
        .map(|s| s.to_string())
        .collect()
}

/// Parse logical lines plus the download resolved by the invocation.
pub fn parse_lines(lines: &[String], download: Option<FileDownload>) -> ResponseModel {
    let mut status = DEFAULT_STATUS;
    let mut headers = vec![gateway_header()];
    let mut cookies = Vec::new();

    let mut body_start = lines.len();
    for (idx, line) in lines.iter().enumerate() {
        let trimmed = line.trim_end_matches('\n').trim_end_matches('\r');

        if trimmed.is_empty() {
            // Blank line closes the header section; it is not body.
            body_start = idx + 1;
            break;
        }

        let Some((name, value)) = directive(trimmed) else {
            body_start = idx;
            break;
        };

        if name.eq_ignore_ascii_case("Status") {
            match value.split_whitespace().next().and_then(|s| s.parse().ok()) {
                Some(code) => status = code,
                None => warn!(line = %trimmed, "unparsable Status directive, keeping default"),
            }
        } else if name.eq_ignore_ascii_case("Set-Cookie") {
            cookies.push(value.to_string());
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let body: String = lines[body_start.min(lines.len())..].concat();

    ResponseModel {
        status,
        headers,
        cookies,
        body,
        file: download,
    }
}

/// Split a directive-shaped line into name and value. A line qualifies
/// only when everything before the colon is a plain header token.
fn directive(line: &str) -> Option<(&str, &str)> {
    let (name, value) = line.split_once(':')?;
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
    {
        return None;
    }
    Some((name, value.trim_start()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn status_and_header_directives() {
        let model = parse_lines(&lines(&["Status: 302", "Location: /x", "", "body"]), None);
        assert_eq!(model.status, 302);
        assert!(model
            .headers
            .contains(&("Location".to_string(), "/x".to_string())));
        assert_eq!(model.body, "body");
    }

    #[test]
    fn no_directives_means_default_status_and_full_body() {
        let model = parse_lines(&lines(&["<html>", "</html>"]), None);
        assert_eq!(model.status, DEFAULT_STATUS);
        assert_eq!(model.body, "<html></html>");
        // Only the gateway's own header is present.
        assert_eq!(model.headers.len(), 1);
        assert_eq!(model.headers[0].0, GATEWAY_HEADER);
    }

    #[test]
    fn cookies_accumulate() {
        let model = parse_lines(
            &lines(&[
                "Set-Cookie: a=1",
                "Set-Cookie: b=2; Path=/",
                "",
                "done",
            ]),
            None,
        );
        assert_eq!(model.cookies, vec!["a=1", "b=2; Path=/"]);
    }

    #[test]
    fn unknown_directives_pass_through_as_headers() {
        let model = parse_lines(
            &lines(&["X-DB-Content-Length: 42", "", "payload"]),
            None,
        );
        assert!(model
            .headers
            .contains(&("X-DB-Content-Length".to_string(), "42".to_string())));
        assert_eq!(model.body, "payload");
    }

    #[test]
    fn first_non_directive_line_starts_the_body() {
        let model = parse_lines(
            &lines(&["Content-type: text/plain", "hello: not a header? yes it is", "plain text, no colon gate", "second"]),
            None,
        );
        // "hello" is directive-shaped and passes through; the next line
        // has no colon, so the body starts there.
        assert_eq!(model.body, "plain text, no colon gatesecond");
    }

    #[test]
    fn body_lines_keep_their_own_endings() {
        let chunks = vec![
            "Content-type: text/html\n".to_string(),
            "\n<p>one".to_string(),
            "</p>\n<p>two</p>\n".to_string(),
        ];
        let model = parse(RawOutput {
            chunks,
            row_count: 3,
            download: None,
        });
        assert_eq!(model.body, "<p>one</p>\n<p>two</p>\n");
        assert!(model
            .headers
            .contains(&("Content-type".to_string(), "text/html".to_string())));
    }

    #[test]
    fn reassemble_splits_after_newlines() {
        let out = reassemble(&[
            "Status: 30".to_string(),
            "2\nLocation".to_string(),
            ": /x\n\nbody".to_string(),
        ]);
        assert_eq!(out, vec!["Status: 302\n", "Location: /x\n", "\n", "body"]);
    }

    #[test]
    fn download_metadata_is_attached() {
        let dl = FileDownload {
            kind: "B".into(),
            size: 3,
            content: Bytes::from_static(b"abc"),
        };
        let model = parse_lines(&lines(&["ignored body"]), Some(dl.clone()));
        assert_eq!(model.file, Some(dl));
    }

    #[test]
    fn no_download_leaves_file_empty() {
        let model = parse_lines(&lines(&["x"]), None);
        assert!(model.file.is_none());
    }

    #[test]
    fn unparsable_status_keeps_default() {
        let model = parse_lines(&lines(&["Status: teapot", "", "b"]), None);
        assert_eq!(model.status, DEFAULT_STATUS);
    }

    #[test]
    fn denied_model_is_a_normal_response() {
        let model = ResponseModel::denied();
        assert_eq!(model.status, DEFAULT_STATUS);
        assert_eq!(model.body, ACCESS_DENIED_BODY);
        assert!(model.file.is_none());
    }
}
