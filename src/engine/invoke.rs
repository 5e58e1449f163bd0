//! Stateless invocation protocol.
//!
//! Executes a call plan inside the fixed envelope and extracts the raw
//! page output and any file download from the out-binds.

use bytes::Bytes;
use tracing::{debug, warn};

use crate::db::{BindValue, Connection};
use crate::engine::cgi::CgiEnv;
use crate::engine::envelope::{self, binds, BINARY_DOWNLOAD_TAG, MAX_PAGE_ROWS};
use crate::engine::error::GatewayError;
use crate::engine::plan::CallPlan;

/// A file download signaled by the procedure. Only binary-tagged
/// downloads carry a size and payload.
#[derive(Debug, Clone, PartialEq)]
pub struct FileDownload {
    /// Type tag reported by the download layer.
    pub kind: String,
    pub size: u64,
    pub content: Bytes,
}

/// Raw result of one invocation: the buffered output rows exactly as the
/// procedure emitted them, plus the optional download.
#[derive(Debug, Default)]
pub struct RawOutput {
    pub chunks: Vec<String>,
    pub row_count: usize,
    pub download: Option<FileDownload>,
}

/// Run the plan on an acquired connection. Execution faults and
/// row-count overflow both surface as procedure errors carrying the CGI
/// environment, invocation text, and bindings in effect.
pub async fn invoke(
    plan: &CallPlan,
    cgi: &CgiEnv,
    conn: &mut dyn Connection,
) -> Result<RawOutput, GatewayError> {
    let (text, merged) = envelope::wrap(plan, cgi)?;

    debug!(target = %plan.target, binds = merged.len(), "invoking procedure");

    let mut outcome = match conn.execute(&text, &merged).await {
        Ok(outcome) => outcome,
        Err(e) => {
            crate::engine::discard_if_fatal(&e, conn);
            return Err(GatewayError::procedure(
                e.to_string(),
                cgi.to_vec(),
                text,
                merged,
            ));
        }
    };

    let row_count = outcome.int_out(binds::PAGE_COUNT).unwrap_or(0).max(0) as usize;
    if row_count > MAX_PAGE_ROWS {
        return Err(GatewayError::procedure(
            format!(
                "output row count {} exceeds the ceiling of {}",
                row_count, MAX_PAGE_ROWS
            ),
            cgi.to_vec(),
            text,
            merged,
        ));
    }

    let chunks = match outcome.take(binds::PAGE_LINES) {
        Some(BindValue::StrArray(rows)) => rows,
        _ => Vec::new(),
    };

    let download = extract_download(&mut outcome, &plan.target);

    Ok(RawOutput {
        chunks,
        row_count,
        download,
    })
}

fn extract_download(
    outcome: &mut crate::db::Outcome,
    target: &str,
) -> Option<FileDownload> {
    let kind = match outcome.str_out(binds::DOC_INFO) {
        Some(tag) if !tag.is_empty() => tag.to_string(),
        _ => return None,
    };
    if kind != BINARY_DOWNLOAD_TAG {
        // BFILE and friends are not reproduced; serve the page instead.
        warn!(%target, tag = %kind, "unsupported file download type, ignoring");
        return None;
    }
    let content = match outcome.take(binds::DOC_BLOB) {
        Some(BindValue::Blob(bytes)) => bytes,
        _ => Bytes::new(),
    };
    let size = outcome
        .int_out(binds::DOC_SIZE)
        .map(|n| n.max(0) as u64)
        .unwrap_or(content.len() as u64);
    Some(FileDownload {
        kind,
        size,
        content,
    })
}
