use std::path::Path;

const FALLBACK_NAME: &str = "upload.bin";
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

/// Binary file submitted alongside a moderation action or content form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl AttachmentFile {
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes,
        }
    }

    /// Build an attachment whose content type is inferred from the file extension.
    pub fn from_name(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let content_type = content_type_for(&file_name);
        Self::new(file_name, content_type, bytes)
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Lower-cased extension of the original file name, if any.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
    }

    pub fn is_image(&self) -> bool {
        if self.content_type.starts_with("image/") {
            return true;
        }
        self.extension()
            .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
    }
}

/// Sanitise an uploaded file name so it can be embedded in an object-store path.
pub fn storage_file_name(original: &str) -> String {
    let sanitized = sanitize_filename::sanitize(original);
    let collapsed: String = sanitized
        .chars()
        .map(|ch| if ch.is_whitespace() || ch == '/' { '_' } else { ch })
        .collect();
    if collapsed.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        collapsed
    }
}

pub fn content_type_for(file_name: &str) -> String {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "pdf" => mime::APPLICATION_PDF.to_string(),
        "jpg" | "jpeg" => mime::IMAGE_JPEG.to_string(),
        "png" => mime::IMAGE_PNG.to_string(),
        "webp" => "image/webp".to_string(),
        _ => mime::APPLICATION_OCTET_STREAM.to_string(),
    }
}

/// Replace the extension of `file_name`, keeping its stem.
pub fn with_extension(file_name: &str, extension: &str) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .unwrap_or("upload");
    format!("{stem}.{extension}")
}
