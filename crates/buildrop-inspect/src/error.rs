//! Internal introspection errors. These never leave the crate: the public
//! entry point logs them and degrades to empty metadata.

use crate::plist::PlistError;

#[derive(Debug, thiserror::Error)]
pub enum InspectError {
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("entry {entry} is too large ({size} bytes)")]
    TooLarge { entry: String, size: u64 },

    #[error("property list: {0}")]
    Plist(#[from] PlistError),
}
