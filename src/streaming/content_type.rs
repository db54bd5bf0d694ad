/// Extensions treated as playable video when picking a default file
const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "avi", "mov", "wmv", "flv", "webm", "m4v", "mpg", "mpeg", "m2v", "3gp", "3g2",
    "mxf",
];

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Lowercase extension of a file name, without the dot
pub fn extension(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

pub fn is_video_file(name: &str) -> bool {
    extension(name).is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
}

/// MIME type for a file name; unknown extensions map to a generic binary type
pub fn content_type_for(name: &str) -> &'static str {
    let Some(ext) = extension(name) else {
        return DEFAULT_CONTENT_TYPE;
    };

    match ext.as_str() {
        "mp4" => "video/mp4",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "mov" => "video/quicktime",
        "wmv" => "video/x-ms-wmv",
        "flv" => "video/x-flv",
        "webm" => "video/webm",
        "m4v" => "video/x-m4v",
        "mpg" | "mpeg" | "m2v" => "video/mpeg",
        "3gp" => "video/3gpp",
        "3g2" => "video/3gpp2",
        "mxf" => "application/mxf",
        "srt" => "application/x-subrip",
        "vtt" => "text/vtt",
        _ => DEFAULT_CONTENT_TYPE,
    }
}
