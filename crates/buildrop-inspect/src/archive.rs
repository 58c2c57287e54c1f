//! Bounded zip entry access shared by the iOS and Android paths.

use std::io::{Cursor, Read};

use zip::ZipArchive;

use crate::error::InspectError;

/// Largest single entry we are willing to inflate.
pub const MAX_ENTRY_BYTES: u64 = 8 * 1024 * 1024;

pub type Archive<'a> = ZipArchive<Cursor<&'a [u8]>>;

pub fn open(bytes: &[u8]) -> Result<Archive<'_>, InspectError> {
    Ok(ZipArchive::new(Cursor::new(bytes))?)
}

/// First entry whose name satisfies `predicate`.
pub fn find_entry(archive: &Archive<'_>, predicate: impl Fn(&str) -> bool) -> Option<String> {
    archive.file_names().find(|name| predicate(name)).map(str::to_string)
}

/// Inflate `name`, refusing entries that claim or turn out to exceed
/// [`MAX_ENTRY_BYTES`].
pub fn read_entry(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, InspectError> {
    let entry = archive.by_name(name)?;
    if entry.size() > MAX_ENTRY_BYTES {
        return Err(InspectError::TooLarge {
            entry: name.to_string(),
            size: entry.size(),
        });
    }

    let mut buf = Vec::new();
    entry.take(MAX_ENTRY_BYTES + 1).read_to_end(&mut buf)?;
    if buf.len() as u64 > MAX_ENTRY_BYTES {
        return Err(InspectError::TooLarge {
            entry: name.to_string(),
            size: buf.len() as u64,
        });
    }
    Ok(buf)
}
