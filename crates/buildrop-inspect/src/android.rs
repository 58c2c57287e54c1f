//! `.apk` introspection.
//!
//! `AndroidManifest.xml` inside an APK is compiled binary XML. Rather than
//! decode the chunk format we scan the string pool for identifiers: the
//! package name is the first dotted name that is not a framework or
//! permission reference. Results carry `android_heuristic = true` so callers
//! know the bundle id was inferred. Version fields are left unset.

use crate::archive;
use crate::error::InspectError;
use crate::metadata::ArtifactMetadata;

const MANIFEST: &str = "AndroidManifest.xml";
const PERMISSION_PREFIX: &str = "android.permission.";

pub fn inspect(bytes: &[u8]) -> Result<ArtifactMetadata, InspectError> {
    let mut archive = archive::open(bytes)?;
    if archive::find_entry(&archive, |n| n == MANIFEST).is_none() {
        tracing::debug!("no root AndroidManifest.xml in archive");
        return Ok(ArtifactMetadata::default());
    }
    let manifest = archive::read_entry(&mut archive, MANIFEST)?;
    Ok(scan_manifest(&manifest))
}

fn scan_manifest(manifest: &[u8]) -> ArtifactMetadata {
    let mut metadata = ArtifactMetadata::default();
    // The string pool is usually UTF-16LE; some toolchains emit UTF-8.
    for text in [decode_utf16le(manifest), decode_single_byte(manifest)] {
        let tokens = tokens(&text);
        if metadata.bundle_id.is_none() {
            metadata.bundle_id = tokens.iter().find_map(package_candidate);
        }
        for token in &tokens {
            if token.text.starts_with(PERMISSION_PREFIX)
                && token.text.len() > PERMISSION_PREFIX.len()
                && !metadata.permissions.iter().any(|p| p == token.text)
            {
                metadata.permissions.push(token.text.to_string());
            }
        }
    }
    metadata.android_heuristic = metadata.bundle_id.is_some();
    metadata
}

/// Decode every 16-bit little-endian unit, mapping non-identifier code
/// units to a separator.
fn decode_utf16le(bytes: &[u8]) -> String {
    bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .map(|unit| char::from_u32(u32::from(unit)).unwrap_or('\0'))
        .collect()
}

fn decode_single_byte(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

#[derive(Debug)]
struct Token<'a> {
    text: &'a str,
    /// The run was immediately preceded by `/`, i.e. it is a URL path
    /// or host fragment.
    after_slash: bool,
}

const fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '.' || c == '_'
}

fn tokens(text: &str) -> Vec<Token<'_>> {
    let mut out = Vec::new();
    let mut start: Option<usize> = None;
    let mut prev: Option<char> = None;
    let mut before_start: Option<char> = None;
    for (i, c) in text.char_indices() {
        if is_ident_char(c) {
            if start.is_none() {
                start = Some(i);
                before_start = prev;
            }
        } else if let Some(s) = start.take() {
            out.push(Token {
                text: &text[s..i],
                after_slash: before_start == Some('/'),
            });
        }
        prev = Some(c);
    }
    if let Some(s) = start {
        out.push(Token {
            text: &text[s..],
            after_slash: before_start == Some('/'),
        });
    }
    out
}

/// A plausible application id: at least three dot-separated segments, each
/// starting with a letter, not a framework class or permission name.
fn package_candidate(token: &Token<'_>) -> Option<String> {
    let text = token.text;
    if token.after_slash
        || text.starts_with("android.")
        || text.starts_with("androidx.")
        || text.contains(".permission.")
    {
        return None;
    }
    let segments: Vec<&str> = text.split('.').collect();
    let well_formed = segments.len() >= 3
        && segments
            .iter()
            .all(|seg| seg.chars().next().is_some_and(|c| c.is_ascii_alphabetic()));
    well_formed.then(|| text.to_string())
}
