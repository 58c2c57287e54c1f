//! Best-effort metadata extraction from uploaded `.ipa` and `.apk` archives.
//!
//! [`introspect`] never fails: a corrupt archive, an unsupported format or
//! even a bug in a reader degrades to an empty [`ArtifactMetadata`] plus a
//! log line. Callers merge what was found into the upload-time record.

mod android;
mod archive;
mod error;
mod ios;
pub mod metadata;
pub mod plist;
pub mod provisioning;

use std::panic::{self, AssertUnwindSafe};

use buildrop_core::Platform;

pub use error::InspectError;
pub use metadata::ArtifactMetadata;
pub use provisioning::ProvisioningProfile;

/// Extract whatever install-relevant metadata `bytes` yields for `platform`.
pub fn introspect(bytes: &[u8], platform: Platform) -> ArtifactMetadata {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| match platform {
        Platform::Ios => ios::inspect(bytes),
        Platform::Android => android::inspect(bytes),
    }));

    match outcome {
        Ok(Ok(metadata)) => {
            tracing::debug!(
                %platform,
                bundle_id = metadata.bundle_id.as_deref().unwrap_or("-"),
                signing_type = %metadata.signing_type,
                "artifact introspected"
            );
            metadata
        }
        Ok(Err(e)) => {
            tracing::warn!(%platform, error = %e, size = bytes.len(), "artifact introspection failed");
            ArtifactMetadata::default()
        }
        Err(_) => {
            tracing::error!(%platform, size = bytes.len(), "artifact introspection panicked");
            ArtifactMetadata::default()
        }
    }
}
