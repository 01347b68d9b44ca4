use std::collections::HashMap;

use axum::extract::Multipart;

/// Result type used by the multipart intake helpers.
pub type UploadResult<T> = Result<T, UploadError>;

/// Error returned when the multipart body itself cannot be read.
#[derive(Debug)]
pub struct UploadError {
    message: String,
}

impl UploadError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for UploadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for UploadError {}

/// A file part held in memory. Bytes past the buffer cap are counted but
/// not kept.
#[derive(Debug, Clone)]
pub struct ReceivedFile {
    pub field_name: String,
    pub original_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
    pub size_bytes: u64,
}

impl ReceivedFile {
    pub fn is_truncated(&self) -> bool {
        self.size_bytes > self.bytes.len() as u64
    }
}

#[derive(Debug, Default)]
pub struct UploadForm {
    pub files: Vec<ReceivedFile>,
    pub text_fields: HashMap<String, Vec<String>>,
}

impl UploadForm {
    pub fn first_file_for(&self, field_name: &str) -> Option<&ReceivedFile> {
        self.files.iter().find(|file| file.field_name == field_name)
    }

    pub fn take_file(&mut self, field_name: &str) -> Option<ReceivedFile> {
        let index = self
            .files
            .iter()
            .position(|file| file.field_name == field_name)?;
        Some(self.files.swap_remove(index))
    }

    /// First non-blank value for `field_name`, trimmed.
    pub fn first_text(&self, field_name: &str) -> Option<&str> {
        self.text_fields
            .get(field_name)
            .and_then(|values| values.first())
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }
}

/// Reads every part of a multipart body. At most one file per field name is
/// accepted and file parts are buffered up to `max_file_bytes + 1` bytes.
pub async fn read_upload_form(
    mut multipart: Multipart,
    file_fields: &[&str],
    max_file_bytes: u64,
) -> UploadResult<UploadForm> {
    let mut form = UploadForm::default();
    let buffer_cap = max_file_bytes.saturating_add(1);

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|err| UploadError::new(format!("failed to parse upload form: {err}")))?
    {
        let field_name = field.name().unwrap_or("").to_string();

        if field.file_name().is_none() {
            let value = field.text().await.map_err(|err| {
                UploadError::new(format!("failed to read field `{field_name}`: {err}"))
            })?;
            form.text_fields.entry(field_name).or_default().push(value);
            continue;
        }

        if !file_fields.contains(&field_name.as_str()) {
            return Err(UploadError::new(format!(
                "unsupported file field `{field_name}`"
            )));
        }
        if form.first_file_for(&field_name).is_some() {
            return Err(UploadError::new(format!(
                "only one file may be sent in `{field_name}`"
            )));
        }

        let original_name = field.file_name().unwrap_or("upload").to_string();
        let content_type = field
            .content_type()
            .map(str::to_string)
            .unwrap_or_else(|| mime::APPLICATION_OCTET_STREAM.to_string());

        let mut bytes = Vec::new();
        let mut size_bytes: u64 = 0;
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|err| UploadError::new(format!("failed to read upload data: {err}")))?
        {
            size_bytes += chunk.len() as u64;
            let room = buffer_cap.saturating_sub(bytes.len() as u64) as usize;
            bytes.extend_from_slice(&chunk[..chunk.len().min(room)]);
        }

        form.files.push(ReceivedFile {
            field_name,
            original_name,
            content_type,
            bytes,
            size_bytes,
        });
    }

    Ok(form)
}
