use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::checksum::Checksum;
use crate::id::BlobId;

/// Name of the file, at the root of every storage folder, holding the
/// folder's persisted [`FolderMetadata`].
pub const METADATA_FILE_NAME: &str = "metadata.json";

/// Persisted state of a storage folder.
///
/// ```json
/// {
///   "files": [
///     { "id": "…", "checksum": "…", "size": 10000,
///       "compressedSize": 93, "isReady": true }
///   ]
/// }
/// ```
///
/// Reference counts are deliberately absent: owners of blobs restore them
/// after loading.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderMetadata {
    pub files: Vec<BlobEntry>,
}

/// One blob as recorded in [`FolderMetadata`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobEntry {
    pub id: BlobId,
    pub checksum: Checksum,
    /// Uncompressed size in bytes.
    pub size: u64,
    /// Size of the compressed file on disk.
    pub compressed_size: u64,
    /// `false` for a blob whose ingestion had not concluded when the
    /// metadata was written.
    pub is_ready: bool,
}

/// Location of the content file of blob `id` inside `folder`.
///
/// Files are spread over two levels of sub-directories named after the
/// first four characters of the identifier:
///
/// ```text
/// <folder>/01/23/01234567-89ab-cdef-0123-456789abcdef
/// ```
#[must_use]
pub fn blob_path(folder: &Path, id: &BlobId) -> PathBuf {
    let name = id.to_string();
    folder.join(&name[0..2]).join(&name[2..4]).join(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn blob_path_uses_two_levels() {
        let id = BlobId::from_uuid(Uuid::from_u128(0x0123_4567_89AB_CDEF_0123_4567_89AB_CDEF));
        let path = blob_path(Path::new("/store"), &id);
        assert_eq!(
            path,
            Path::new("/store/01/23/01234567-89ab-cdef-0123-456789abcdef")
        );
    }

    #[test]
    fn entry_uses_camel_case() {
        let entry = BlobEntry {
            id: BlobId::new(),
            checksum: Checksum::from_bytes([0; 16]),
            size: 10,
            compressed_size: 7,
            is_ready: true,
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"compressedSize\":7"));
        assert!(json.contains("\"isReady\":true"));
        let back: BlobEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn missing_files_is_an_error() {
        assert!(serde_json::from_str::<FolderMetadata>("{}").is_err());
    }
}
