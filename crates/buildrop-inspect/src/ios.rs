//! `.ipa` introspection.

use crate::archive::{self, Archive};
use crate::error::InspectError;
use crate::metadata::{ArtifactMetadata, device_family_name};
use crate::plist::{self, PlistError, Value};
use crate::provisioning;

/// `Payload/<name>.app/<file>` at the top level of the bundle.
fn is_bundle_file(entry: &str, file: &str) -> bool {
    let mut parts = entry.split('/');
    matches!(
        (parts.next(), parts.next(), parts.next(), parts.next()),
        (Some("Payload"), Some(app), Some(name), None)
            if app.len() > ".app".len() && app.ends_with(".app") && name == file
    )
}

pub fn inspect(bytes: &[u8]) -> Result<ArtifactMetadata, InspectError> {
    let mut archive = archive::open(bytes)?;

    let Some(info_name) = archive::find_entry(&archive, |n| is_bundle_file(n, "Info.plist"))
    else {
        tracing::debug!("no Payload/*.app/Info.plist in archive");
        return Ok(ArtifactMetadata::default());
    };

    let info = match plist::parse(&archive::read_entry(&mut archive, &info_name)?) {
        Ok(value) => value,
        Err(PlistError::Binary) => {
            tracing::info!(entry = %info_name, "binary Info.plist is not supported; metadata left empty");
            return Ok(ArtifactMetadata::default());
        }
        Err(e) => return Err(e.into()),
    };

    let mut metadata = ArtifactMetadata {
        bundle_id: info.string_at("CFBundleIdentifier"),
        version: info.string_at("CFBundleShortVersionString"),
        build_number: info.string_at("CFBundleVersion"),
        display_name: info
            .string_at("CFBundleDisplayName")
            .or_else(|| info.string_at("CFBundleName")),
        min_os_version: info.string_at("MinimumOSVersion"),
        device_families: device_families(&info),
        ..ArtifactMetadata::default()
    };

    apply_profile(&mut archive, &mut metadata);
    Ok(metadata)
}

fn device_families(info: &Value) -> Vec<String> {
    info.get("UIDeviceFamily")
        .and_then(Value::as_array)
        .map(|codes| {
            codes
                .iter()
                .filter_map(|code| match code {
                    Value::Integer(i) => Some(*i),
                    Value::String(s) => s.trim().parse().ok(),
                    _ => None,
                })
                .filter_map(device_family_name)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Fill signing fields from `embedded.mobileprovision`. Any problem leaves
/// the signing type as `Unknown` without failing the whole inspection.
fn apply_profile(archive: &mut Archive<'_>, metadata: &mut ArtifactMetadata) {
    let Some(name) =
        archive::find_entry(archive, |n| is_bundle_file(n, "embedded.mobileprovision"))
    else {
        return;
    };
    let bytes = match archive::read_entry(archive, &name) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, "could not read provisioning profile");
            return;
        }
    };
    if let Some(profile) = provisioning::read_profile(&bytes) {
        metadata.signing_type = profile.signing_type;
        metadata.provisioning_profile_name = profile.name;
        metadata.team_name = profile.team_name;
        metadata.provisioning_expires_at = profile.expires_at;
    }
}
