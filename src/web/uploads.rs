use std::collections::HashMap;

use axum::extract::Multipart;

use crate::attachment::AttachmentFile;

/// Result type used by the multipart helpers.
pub type FormResult<T> = Result<T, FormError>;

/// Error returned when a multipart form cannot be read or breaks a field limit.
#[derive(Debug)]
pub struct FormError {
    field: Option<String>,
    message: String,
}

impl FormError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            field: None,
            message: message.into(),
        }
    }

    pub fn for_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            message: message.into(),
        }
    }

    pub fn field(&self) -> Option<&str> {
        self.field.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for FormError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{field}: {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for FormError {}

/// Expectations for a single multipart file field. Each field takes at most one file.
#[derive(Debug, Clone, Copy)]
pub struct FileFieldConfig<'a> {
    pub field_name: &'a str,
    pub max_bytes: u64,
}

impl<'a> FileFieldConfig<'a> {
    pub fn new(field_name: &'a str, max_bytes: u64) -> Self {
        Self {
            field_name,
            max_bytes,
        }
    }
}

/// Parsed multipart form held in memory.
#[derive(Debug, Default)]
pub struct FormData {
    files: HashMap<String, AttachmentFile>,
    text_fields: HashMap<String, Vec<String>>,
}

impl FormData {
    pub fn first_text(&self, field_name: &str) -> Option<&str> {
        self.text_fields
            .get(field_name)
            .and_then(|values| values.first().map(|s| s.as_str()))
    }

    /// Trimmed text value, `None` when missing or blank.
    pub fn text(&self, field_name: &str) -> Option<String> {
        self.first_text(field_name)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }

    /// Checkbox-style flag. Missing or blank reads as `None`.
    pub fn flag(&self, field_name: &str) -> FormResult<Option<bool>> {
        let Some(raw) = self.text(field_name) else {
            return Ok(None);
        };
        match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "on" | "yes" => Ok(Some(true)),
            "false" | "0" | "off" | "no" => Ok(Some(false)),
            _ => Err(FormError::for_field(field_name, format!("`{raw}` is not a boolean"))),
        }
    }

    pub fn take_file(&mut self, field_name: &str) -> Option<AttachmentFile> {
        self.files.remove(field_name)
    }

    #[cfg(test)]
    pub fn with_text(mut self, field_name: &str, value: &str) -> Self {
        self.text_fields
            .entry(field_name.to_string())
            .or_default()
            .push(value.to_string());
        self
    }
}

/// Read a multipart form into memory, enforcing the per-field byte limits while streaming.
///
/// File parts with an empty file name are treated as "no file chosen" and skipped.
pub async fn read_multipart(
    mut multipart: Multipart,
    file_fields: &[FileFieldConfig<'_>],
) -> FormResult<FormData> {
    let mut form = FormData::default();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|err| FormError::new(format!("failed to parse form: {err}")))?
    {
        let field_name = field.name().unwrap_or("").to_string();

        let Some(file_name) = field.file_name().map(str::to_string) else {
            let value = field
                .text()
                .await
                .map_err(|err| FormError::for_field(&field_name, format!("failed to read: {err}")))?;
            form.text_fields.entry(field_name).or_default().push(value);
            continue;
        };

        let Some(config) = file_fields
            .iter()
            .find(|config| config.field_name == field_name)
        else {
            return Err(FormError::for_field(&field_name, "unexpected file field"));
        };

        if form.files.contains_key(&field_name) {
            return Err(FormError::for_field(&field_name, "only one file is accepted"));
        }

        let content_type = field.content_type().map(str::to_string);
        let mut bytes = Vec::new();
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|err| FormError::for_field(&field_name, format!("failed to read upload: {err}")))?
        {
            bytes.extend_from_slice(&chunk);
            if bytes.len() as u64 > config.max_bytes {
                return Err(FormError::for_field(
                    &field_name,
                    format!("file exceeds the {} KiB limit", config.max_bytes / 1024),
                ));
            }
        }

        if file_name.is_empty() && bytes.is_empty() {
            continue;
        }

        let file = match content_type {
            Some(content_type) if content_type != mime::APPLICATION_OCTET_STREAM.as_ref() => {
                AttachmentFile::new(file_name, content_type, bytes)
            }
            _ => AttachmentFile::from_name(file_name, bytes),
        };
        form.files.insert(field_name, file);
    }

    Ok(form)
}
