use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

use super::ValidationError;

/// Largest accepted artifact, inclusive.
pub const MAX_ARTIFACT_BYTES: u64 = 10 * 1024 * 1024;

/// A file exactly as the user picked it.
#[derive(Debug, Clone)]
pub struct ArtifactInput {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl ArtifactInput {
    pub fn new(file_name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }
}

/// An input that passed type and size checks but has no preview yet.
#[derive(Debug, Clone)]
pub(crate) struct CheckedArtifact {
    file_name: String,
    mime_type: String,
    bytes: Arc<[u8]>,
}

/// A validated artifact together with its preview. Only validated input can
/// reach this type, so a preview never exists for a rejected file.
#[derive(Debug, Clone)]
pub struct UploadArtifact {
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub preview_data_uri: String,
}

/// Case-sensitive prefix match on the declared type.
fn is_image(mime_type: &str) -> bool {
    mime_type
        .strip_prefix(mime::IMAGE.as_str())
        .is_some_and(|rest| rest.starts_with('/'))
}

pub(crate) fn check(input: ArtifactInput, max_bytes: u64) -> Result<CheckedArtifact, ValidationError> {
    if !is_image(&input.mime_type) {
        return Err(ValidationError::InvalidFileType {
            mime_type: input.mime_type,
        });
    }

    let size_bytes = input.bytes.len() as u64;
    if size_bytes > max_bytes {
        return Err(ValidationError::FileTooLarge {
            size_bytes,
            max_bytes,
        });
    }

    let mut file_name = sanitize_filename::sanitize(&input.file_name);
    if file_name.is_empty() {
        file_name = "upload".to_string();
    }

    Ok(CheckedArtifact {
        file_name,
        mime_type: input.mime_type,
        bytes: Arc::from(input.bytes),
    })
}

/// Encodes the preview off the async executor; large images take a while.
pub(crate) async fn materialize(checked: CheckedArtifact) -> UploadArtifact {
    let bytes = checked.bytes.clone();
    let mime_type = checked.mime_type.clone();
    let encode = move || format!("data:{mime_type};base64,{}", BASE64.encode(&bytes));

    let preview_data_uri = match tokio::task::spawn_blocking(encode.clone()).await {
        Ok(uri) => uri,
        Err(_) => encode(),
    };

    UploadArtifact {
        file_name: checked.file_name,
        mime_type: checked.mime_type,
        size_bytes: checked.bytes.len() as u64,
        preview_data_uri,
    }
}
