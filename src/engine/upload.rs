//! Multipart upload bridging.
//!
//! Uploaded file parts become rows in the configured document table
//! before the procedure runs, so the procedure can reach them by name.
//! No configured table means uploads are silently skipped; that is the
//! correct behavior for deployments without one.

use bytes::Bytes;
use tracing::debug;
use uuid::Uuid;

use crate::db::{Bind, BindSet, BindValue, Connection};
use crate::engine::cgi::CgiEnv;
use crate::engine::error::GatewayError;

/// One file part from a multipart request body.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Form field the part arrived under.
    pub field_name: String,
    /// Client-supplied file name.
    pub file_name: String,
    /// Declared content type of the part.
    pub mime_type: String,
    pub content: Bytes,
}

impl UploadedFile {
    /// Stored document name: a unique prefix keeps concurrent uploads of
    /// the same file name from colliding in the table.
    pub fn stored_name(&self) -> String {
        format!("F{}/{}", Uuid::new_v4().simple(), self.file_name)
    }
}

fn valid_table_name(name: &str) -> bool {
    !name.is_empty()
        && name.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '#' | '.'))
}

/// Insert one row per uploaded file into `table`. Fatal for the request
/// on any failure; otherwise silent.
pub async fn upload_files(
    files: &[UploadedFile],
    table: &str,
    cgi: &CgiEnv,
    conn: &mut dyn Connection,
) -> Result<(), GatewayError> {
    if !valid_table_name(table) {
        return Err(GatewayError::request(format!(
            "invalid document table name: {}",
            table
        )));
    }

    let insert = format!(
        "insert into {} (name, mime_type, doc_size, blob_content) \
         values (:name, :mime_type, :doc_size, :blob_content)",
        table
    );

    for file in files {
        let stored = file.stored_name();
        let mut binds = BindSet::new();
        binds.insert("name", Bind::In(BindValue::Str(stored.clone())));
        binds.insert(
            "mime_type",
            Bind::In(BindValue::Str(file.mime_type.clone())),
        );
        binds.insert(
            "doc_size",
            Bind::In(BindValue::Int(file.content.len() as i64)),
        );
        binds.insert(
            "blob_content",
            Bind::In(BindValue::Blob(file.content.clone())),
        );

        debug!(
            field = %file.field_name,
            name = %stored,
            size = file.content.len(),
            table = %table,
            "storing uploaded file"
        );

        if let Err(e) = conn.execute(&insert, &binds).await {
            crate::engine::discard_if_fatal(&e, conn);
            return Err(GatewayError::procedure(
                format!("upload of {} failed: {}", file.file_name, e),
                cgi.to_vec(),
                insert,
                binds,
            ));
        }
    }
    Ok(())
}
