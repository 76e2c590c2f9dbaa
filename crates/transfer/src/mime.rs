use mediavault_protocol::MediaKind;

/// MIME type used when the extension is unknown.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Infers `(mime_type, kind)` from the filename extension.
pub fn classify(filename: &str) -> (&'static str, MediaKind) {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "jpg" | "jpeg" => ("image/jpeg", MediaKind::Image),
        "png" => ("image/png", MediaKind::Image),
        "gif" => ("image/gif", MediaKind::Image),
        "bmp" => ("image/bmp", MediaKind::Image),
        "webp" => ("image/webp", MediaKind::Image),

        "mp4" => ("video/mp4", MediaKind::Video),
        "avi" => ("video/x-msvideo", MediaKind::Video),
        "mov" => ("video/quicktime", MediaKind::Video),
        "wmv" => ("video/x-ms-wmv", MediaKind::Video),

        "mp3" => ("audio/mpeg", MediaKind::Audio),
        "wav" => ("audio/wav", MediaKind::Audio),
        "flac" => ("audio/flac", MediaKind::Audio),
        "m4a" => ("audio/mp4", MediaKind::Audio),

        "pdf" => ("application/pdf", MediaKind::Document),
        "doc" => ("application/msword", MediaKind::Document),
        "docx" => (
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            MediaKind::Document,
        ),
        "txt" => ("text/plain", MediaKind::Document),

        _ => (OCTET_STREAM, MediaKind::Other),
    }
}
