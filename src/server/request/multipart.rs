//! Multipart form data parsing.

use bytes::Bytes;
use futures_util::stream;
use multer::Multipart;

use crate::engine::UploadedFile;

/// Maximum upload size (10 MB)
const MAX_UPLOAD_SIZE: usize = 10 * 1024 * 1024;

/// Parse multipart form data.
///
/// Returns a tuple of (form fields, uploaded files). File parts stay in
/// memory as `Bytes`; they go to the document table, never to disk.
pub async fn parse_multipart(
    content_type: &str,
    body: Bytes,
) -> Result<(Vec<(String, String)>, Vec<UploadedFile>), String> {
    tracing::debug!(
        content_type = content_type,
        body_len = body.len(),
        "parse_multipart: starting"
    );

    let boundary = content_type
        .split(';')
        .find_map(|part| {
            let trimmed = part.trim();
            // Case-insensitive boundary search
            if trimmed.to_lowercase().starts_with("boundary=") {
                Some(trimmed[9..].trim_matches('"').to_string())
            } else {
                None
            }
        })
        .ok_or("Missing boundary in multipart content-type")?;

    let mut multipart = Multipart::new(
        stream::once(async { Ok::<_, std::io::Error>(body) }),
        boundary,
    );

    let mut params = Vec::new();
    let mut files: Vec<UploadedFile> = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(|e| e.to_string())? {
        let field_name = field.name().unwrap_or("").to_string();
        let file_name = field.file_name().map(|s| s.to_string());
        let field_content_type = field
            .content_type()
            .map(|m| m.to_string())
            .unwrap_or_default();

        if let Some(original_name) = file_name {
            if original_name.is_empty() {
                continue;
            }

            let data = field.bytes().await.map_err(|e| e.to_string())?;
            if data.len() > MAX_UPLOAD_SIZE {
                return Err(format!(
                    "uploaded file '{}' exceeds the {} byte limit",
                    original_name, MAX_UPLOAD_SIZE
                ));
            }

            tracing::debug!(
                field_name = %field_name,
                file_name = %original_name,
                size = data.len(),
                "parse_multipart: parsed uploaded file"
            );

            files.push(UploadedFile {
                field_name,
                file_name: original_name,
                mime_type: field_content_type,
                content: data,
            });
        } else {
            let value = field.text().await.map_err(|e| e.to_string())?;
            tracing::debug!(
                field_name = %field_name,
                value_len = value.len(),
                "parse_multipart: parsed form field"
            );
            params.push((field_name, value));
        }
    }

    tracing::debug!(
        params_count = params.len(),
        files_count = files.len(),
        "parse_multipart: completed"
    );

    Ok((params, files))
}
