//! The fixed invocation envelope.
//!
//! Every user procedure runs inside the same anonymous block: package
//! state reset, CGI environment injection, output buffer initialization,
//! an inner exception barrier, file-download detection, and page
//! retrieval. The block shape and its constants are wire protocol;
//! existing stored procedures depend on them.

use crate::db::{Bind, BindSet, BindValue, OutSpec};
use crate::engine::cgi::CgiEnv;
use crate::engine::error::GatewayError;
use crate::engine::plan::CallPlan;

/// Output buffer line width. Fixed by the legacy protocol; changing it
/// alters how procedures' output reassembles.
pub const OUTPUT_LINE_LEN: usize = 63;

/// Ceiling on retrieved output rows. Exactly this many is fine; one more
/// is a fatal resolution fault, not a retryable condition.
pub const MAX_PAGE_ROWS: usize = 100_000;

/// Diagnostic trace cap inside the exception barrier.
pub const ERROR_TRACE_LEN: usize = 2000;

/// Per-row receive buffer width for page retrieval.
const PAGE_ROW_MAX_LEN: usize = 256;

/// Receive buffer for the download type tag.
const DOC_INFO_MAX_LEN: usize = 512;

/// Download type tag marking a binary payload.
pub const BINARY_DOWNLOAD_TAG: &str = "B";

/// Reserved envelope placeholder names. All end in `__`; plan
/// placeholders never do, which keeps the merged key set collision-free
/// by construction.
pub mod binds {
    pub const CGI_COUNT: &str = "cgi_count__";
    pub const CGI_NAMES: &str = "cgi_names__";
    pub const CGI_VALUES: &str = "cgi_values__";
    pub const DOC_INFO: &str = "doc_info__";
    pub const DOC_SIZE: &str = "doc_size__";
    pub const DOC_BLOB: &str = "doc_blob__";
    pub const PAGE_LINES: &str = "page_lines__";
    pub const PAGE_COUNT: &str = "page_count__";
}

/// Wrap a call plan in the envelope: returns the full block text and the
/// merged bind set.
pub fn wrap(plan: &CallPlan, cgi: &CgiEnv) -> Result<(String, BindSet), GatewayError> {
    let text = format!(
        "\
begin
  dbms_session.modify_package_state(dbms_session.reinitialize);
  owa.init_cgi_env(:{cgi_count}, :{cgi_names}, :{cgi_values});
  htp.init;
  htp.htbuf_len := {line_len};
  begin
    {invocation}
  exception
    when others then
      raise_application_error(-20000,
        '{target}: ' || substr(sqlerrm || chr(10) ||
          dbms_utility.format_error_backtrace, 1, {trace_len}));
  end;
  if wpg_docload.is_file_download then
    wpg_docload.get_download_file(:{doc_info});
    if :{doc_info} = '{binary_tag}' then
      wpg_docload.get_download_blob(:{doc_blob});
      :{doc_size} := dbms_lob.getlength(:{doc_blob});
    end if;
  end if;
  owa.get_page(:{page_lines}, :{page_count});
end;",
        cgi_count = binds::CGI_COUNT,
        cgi_names = binds::CGI_NAMES,
        cgi_values = binds::CGI_VALUES,
        line_len = OUTPUT_LINE_LEN,
        invocation = plan.invocation,
        target = plan.target,
        trace_len = ERROR_TRACE_LEN,
        doc_info = binds::DOC_INFO,
        doc_size = binds::DOC_SIZE,
        doc_blob = binds::DOC_BLOB,
        binary_tag = BINARY_DOWNLOAD_TAG,
        page_lines = binds::PAGE_LINES,
        page_count = binds::PAGE_COUNT,
    );

    let mut merged = BindSet::new();
    for (name, bind) in plan.binds.iter() {
        if !merged.insert(name, bind.clone()) {
            return Err(GatewayError::request(format!(
                "duplicate plan placeholder :{}",
                name
            )));
        }
    }

    let envelope: [(&str, Bind); 8] = [
        (
            binds::CGI_COUNT,
            Bind::In(BindValue::Int(cgi.len() as i64)),
        ),
        (binds::CGI_NAMES, Bind::In(BindValue::StrArray(cgi.names()))),
        (
            binds::CGI_VALUES,
            Bind::In(BindValue::StrArray(cgi.values())),
        ),
        (
            binds::DOC_INFO,
            Bind::Out(OutSpec::Str {
                max_len: DOC_INFO_MAX_LEN,
            }),
        ),
        (binds::DOC_SIZE, Bind::Out(OutSpec::Int)),
        (binds::DOC_BLOB, Bind::Out(OutSpec::Blob)),
        (
            binds::PAGE_LINES,
            Bind::Out(OutSpec::StrArray {
                max_entries: MAX_PAGE_ROWS,
                max_len: PAGE_ROW_MAX_LEN,
            }),
        ),
        (
            binds::PAGE_COUNT,
            Bind::InOut {
                value: BindValue::Int(MAX_PAGE_ROWS as i64),
                spec: OutSpec::Int,
            },
        ),
    ];
    for (name, bind) in envelope {
        if !merged.insert(name, bind) {
            return Err(GatewayError::request(format!(
                "plan placeholder :{} collides with the invocation envelope",
                name
            )));
        }
    }

    Ok((text, merged))
}
