use crate::app::error::SessionError;
use crate::models::torrent::{FileEntry, TorrentMetadata};
use crate::streaming::content_type::is_video_file;

/// Pick a file to stream.
///
/// An explicit index must exist. Without one, the largest video file wins and
/// ties go to the lowest index.
pub fn choose_file(metadata: &TorrentMetadata, file_index: Option<usize>) -> Result<FileEntry, SessionError> {
    if let Some(index) = file_index {
        return metadata
            .files
            .get(index)
            .cloned()
            .ok_or(SessionError::FileIndexOutOfRange {
                index,
                count: metadata.files.len(),
            });
    }

    metadata
        .files
        .iter()
        .filter(|file| is_video_file(&file.name))
        .fold(None::<&FileEntry>, |best, file| match best {
            Some(best) if best.length >= file.length => Some(best),
            _ => Some(file),
        })
        .cloned()
        .ok_or(SessionError::NoPlayableFile)
}
