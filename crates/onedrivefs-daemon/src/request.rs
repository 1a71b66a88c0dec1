//! Host requests and their replies
//!
//! One options struct per request kind. Paths arrive exactly as the host
//! sent them and are normalised by the dispatcher.

use bytes::Bytes;

use onedrivefs_core::{EntryMetadata, OpenMode, RequestId};

#[derive(Clone, Debug)]
pub struct ListDirectoryOptions {
    pub directory_path: String,
}

#[derive(Clone, Debug)]
pub struct GetMetadataOptions {
    pub entry_path: String,
    /// Include the entry's thumbnail in the reply
    pub thumbnail: bool,
}

#[derive(Clone, Debug)]
pub struct OpenFileOptions {
    /// Id of this open request; later requests refer to it as `open_request_id`
    pub request_id: RequestId,
    pub file_path: String,
    pub mode: OpenMode,
}

#[derive(Clone, Debug)]
pub struct ReadFileOptions {
    pub open_request_id: RequestId,
    pub offset: u64,
    pub length: u64,
}

#[derive(Clone, Debug)]
pub struct CloseFileOptions {
    pub open_request_id: RequestId,
}

#[derive(Clone, Debug)]
pub struct CreateDirectoryOptions {
    pub directory_path: String,
}

#[derive(Clone, Debug)]
pub struct DeleteEntryOptions {
    pub entry_path: String,
}

#[derive(Clone, Debug)]
pub struct MoveEntryOptions {
    pub source_path: String,
    pub target_path: String,
}

#[derive(Clone, Debug)]
pub struct CopyEntryOptions {
    pub source_path: String,
    pub target_path: String,
}

#[derive(Clone, Debug)]
pub struct WriteFileOptions {
    pub open_request_id: RequestId,
    pub offset: u64,
    pub data: Bytes,
}

#[derive(Clone, Debug)]
pub struct TruncateOptions {
    pub file_path: String,
    pub length: u64,
}

#[derive(Clone, Debug)]
pub struct CreateFileOptions {
    pub file_path: String,
}

#[derive(Clone, Debug)]
pub struct UnmountOptions {
    pub file_system_id: String,
}

/// A file system operation delivered by the host
#[derive(Clone, Debug)]
pub enum HostRequest {
    ListDirectory(ListDirectoryOptions),
    GetMetadata(GetMetadataOptions),
    OpenFile(OpenFileOptions),
    ReadFile(ReadFileOptions),
    CloseFile(CloseFileOptions),
    CreateDirectory(CreateDirectoryOptions),
    DeleteEntry(DeleteEntryOptions),
    MoveEntry(MoveEntryOptions),
    CopyEntry(CopyEntryOptions),
    WriteFile(WriteFileOptions),
    Truncate(TruncateOptions),
    CreateFile(CreateFileOptions),
    Unmount(UnmountOptions),
}

impl HostRequest {
    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            HostRequest::ListDirectory(_) => "list-directory",
            HostRequest::GetMetadata(_) => "get-metadata",
            HostRequest::OpenFile(_) => "open-file",
            HostRequest::ReadFile(_) => "read-file",
            HostRequest::CloseFile(_) => "close-file",
            HostRequest::CreateDirectory(_) => "create-directory",
            HostRequest::DeleteEntry(_) => "delete-entry",
            HostRequest::MoveEntry(_) => "move-entry",
            HostRequest::CopyEntry(_) => "copy-entry",
            HostRequest::WriteFile(_) => "write-file",
            HostRequest::Truncate(_) => "truncate",
            HostRequest::CreateFile(_) => "create-file",
            HostRequest::Unmount(_) => "unmount",
        }
    }
}

/// Successful outcome of a host request
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    /// Operation completed with no payload
    Done,
    /// Directory listing; `has_more` is always false (single-shot listing)
    Entries {
        entries: Vec<EntryMetadata>,
        has_more: bool,
    },
    Metadata(EntryMetadata),
    Chunk { data: Bytes, has_more: bool },
    /// Truncate completed; never enumerates further results
    Truncated { has_more: bool },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_kind_names() {
        let request = HostRequest::ReadFile(ReadFileOptions {
            open_request_id: RequestId(3),
            offset: 0,
            length: 10,
        });
        assert_eq!(request.kind(), "read-file");

        let request = HostRequest::Unmount(UnmountOptions {
            file_system_id: "onedrivefs".into(),
        });
        assert_eq!(request.kind(), "unmount");
    }
}
