//! Image reference validation
//!
//! Names are checked against the distribution reference grammar through
//! `oci_client::Reference`, but are returned in the form the caller wrote them.
//! A registry-less name is not expanded to `docker.io/`; only a missing tag is
//! filled in with `latest`.

use crate::error::{Error, Result};
use oci_client::Reference;

pub const DEFAULT_TAG: &str = "latest";

/// Validate `image` and return it with an explicit tag.
///
/// `registry/foo/bar` becomes `registry/foo/bar:latest`; tagged and digested
/// references keep what they carry.
pub fn normalize(image: &str) -> Result<String> {
    let reference = Reference::try_from(image).map_err(|e| Error::InvalidImageReference {
        reference: image.to_string(),
        reason: e.to_string(),
    })?;

    let mut normalized = repository_part(image).to_string();
    match (reference.tag(), reference.digest()) {
        (None, None) => {
            normalized.push(':');
            normalized.push_str(DEFAULT_TAG);
        }
        (tag, digest) => {
            if let Some(tag) = tag {
                normalized.push(':');
                normalized.push_str(tag);
            }
            if let Some(digest) = digest {
                normalized.push('@');
                normalized.push_str(digest);
            }
        }
    }
    Ok(normalized)
}

/// `image` without its tag or digest. A colon before the last `/` is a registry port.
fn repository_part(image: &str) -> &str {
    let name = image.split_once('@').map_or(image, |(name, _)| name);
    let last_slash = name.rfind('/').map_or(0, |i| i + 1);
    match name[last_slash..].rfind(':') {
        Some(i) => &name[..last_slash + i],
        None => name,
    }
}
