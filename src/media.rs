use std::path::Path;

use uuid::Uuid;

use crate::error::Result;
use crate::types::{MessageType, Upload};

fn extension_from_filename(name: &str) -> Option<String> {
    let (_, ext) = name.rsplit_once('.')?;
    let ext = ext.trim().to_ascii_lowercase();
    if ext.is_empty() || ext.len() > 10 {
        return None;
    }
    if ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        Some(ext)
    } else {
        None
    }
}

/// Extension and content type pairs, searched in order in both directions:
/// the first row for an extension gives its content type and the first row
/// for a content type gives its extension.
const MEDIA_TYPES: &[(&str, &str)] = &[
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("jpg", "image/jpg"),
    ("png", "image/png"),
    ("webp", "image/webp"),
    ("gif", "image/gif"),
    ("mp3", "audio/mpeg"),
    ("mp3", "audio/mp3"),
    ("ogg", "audio/ogg"),
    ("opus", "audio/ogg"),
    ("opus", "audio/opus"),
    ("m4a", "audio/mp4"),
    ("wav", "audio/wav"),
    ("wav", "audio/x-wav"),
    ("webm", "audio/webm"),
    ("mp4", "video/mp4"),
    ("mov", "video/quicktime"),
    ("pdf", "application/pdf"),
    ("txt", "text/plain"),
    ("json", "application/json"),
];

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// `audio/ogg; codecs=opus` and `AUDIO/OGG` both look up as `audio/ogg`.
fn extension_from_mime(mime: &str) -> &'static str {
    let essence = mime.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    MEDIA_TYPES
        .iter()
        .find(|(_, content_type)| *content_type == essence)
        .map_or("bin", |(ext, _)| *ext)
}

pub fn content_type_from_extension(ext: &str) -> &'static str {
    let ext = ext.to_ascii_lowercase();
    MEDIA_TYPES
        .iter()
        .find(|(known, _)| *known == ext)
        .map_or(FALLBACK_CONTENT_TYPE, |(_, content_type)| *content_type)
}

pub fn message_type_from_mime(mime: &str) -> MessageType {
    let mt = mime.to_ascii_lowercase();
    if mt.starts_with("image/") {
        MessageType::Image
    } else if mt.starts_with("audio/") {
        MessageType::Audio
    } else if mt.starts_with("video/") {
        MessageType::Video
    } else {
        MessageType::Document
    }
}

/// Builds an upload from raw bytes, naming unnamed recordings after their type.
pub fn upload_from_bytes(file_name: Option<&str>, content_type: Option<&str>, bytes: Vec<u8>) -> Upload {
    let ext = file_name.and_then(extension_from_filename);
    let content_type = content_type
        .map(str::to_string)
        .unwrap_or_else(|| content_type_from_extension(ext.as_deref().unwrap_or("")).to_string());
    let file_name = match file_name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => name.to_string(),
        None => {
            let kind = message_type_from_mime(&content_type);
            let ext = ext
                .as_deref()
                .unwrap_or_else(|| extension_from_mime(&content_type));
            format!("{}-{}.{}", kind.label(), Uuid::new_v4(), ext)
        }
    };
    Upload {
        file_name,
        content_type,
        bytes,
    }
}

pub async fn upload_from_path(path: &Path) -> Result<Upload> {
    let bytes = tokio::fs::read(path).await?;
    let name = path.file_name().and_then(|n| n.to_str());
    Ok(upload_from_bytes(name, None, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voice_note_is_audio() {
        let upload = upload_from_bytes(Some("note.ogg"), None, vec![1, 2, 3]);
        assert_eq!(upload.content_type, "audio/ogg");
        assert_eq!(message_type_from_mime(&upload.content_type), MessageType::Audio);
    }

    #[test]
    fn unknown_extension_is_document() {
        let upload = upload_from_bytes(Some("contract.docx"), None, vec![]);
        assert_eq!(upload.content_type, "application/octet-stream");
        assert_eq!(message_type_from_mime(&upload.content_type), MessageType::Document);
    }

    #[test]
    fn unnamed_recording_gets_generated_name() {
        let upload = upload_from_bytes(None, Some("audio/ogg"), vec![0]);
        assert!(upload.file_name.starts_with("audio-"));
        assert!(upload.file_name.ends_with(".ogg"));
    }

    #[test]
    fn aliases_resolve_to_one_canonical_pair() {
        assert_eq!(content_type_from_extension("JPEG"), "image/jpeg");
        assert_eq!(content_type_from_extension("opus"), "audio/ogg");
        assert_eq!(extension_from_mime("image/jpeg"), "jpg");
        assert_eq!(extension_from_mime("audio/ogg; codecs=opus"), "ogg");
        assert_eq!(extension_from_mime("audio/x-wav"), "wav");
        assert_eq!(extension_from_mime("application/zip"), "bin");
    }

    #[test]
    fn browser_recording_named_from_content_type() {
        let upload = upload_from_bytes(Some(" "), Some("audio/webm;codecs=opus"), vec![0]);
        assert!(upload.file_name.starts_with("audio-"));
        assert!(upload.file_name.ends_with(".webm"));
    }
}
