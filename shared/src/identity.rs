use sha2::{Sha256, Digest};
use crate::protocol::{APPLICATION_ID_PREFIX, ENDPOINT_ID_PREFIX, MODULE_ID_SEPARATOR};
use crate::types::{ApplicationType, CredentialType, SecurityMode};

/// Number of digest bytes kept in a derived id
const ID_DIGEST_BYTES: usize = 20;

/// Normalize a URI or URL for comparison: trimmed, no trailing slash,
/// lower-cased.
pub fn normalize_uri(uri: &str) -> String {
    uri.trim().trim_end_matches('/').to_lowercase()
}

fn derive(prefix: &str, parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        // NUL keeps ("ab", "c") and ("a", "bc") apart
        hasher.update([0u8]);
    }
    let digest = hasher.finalize();
    format!("{}{}", prefix, hex::encode(&digest[..ID_DIGEST_BYTES]))
}

/// Derive the application id from its identity fields.
/// `scope` is the site or gateway the application is registered under.
pub fn application_id(
    application_uri: &str,
    product_uri: Option<&str>,
    application_type: ApplicationType,
    scope: Option<&str>,
) -> String {
    let uri = normalize_uri(application_uri);
    let product = normalize_uri(product_uri.unwrap_or_default());
    let scope = scope.unwrap_or_default().trim().to_lowercase();
    derive(
        APPLICATION_ID_PREFIX,
        &[&uri, &product, application_type.as_str(), &scope],
    )
}

/// Derive the endpoint id from the owning application and endpoint shape.
pub fn endpoint_id(
    application_id: &str,
    endpoint_url: &str,
    security_policy: &str,
    security_mode: SecurityMode,
    credential: CredentialType,
) -> String {
    let url = normalize_uri(endpoint_url);
    let policy = security_policy.trim();
    derive(
        ENDPOINT_ID_PREFIX,
        &[
            application_id,
            &url,
            policy,
            security_mode.as_str(),
            credential.as_str(),
        ],
    )
}

/// Compose the id of a module twin, e.g. `gw1_module_discoverer`.
pub fn module_id(device_id: &str, module_id: Option<&str>) -> String {
    match module_id {
        Some(module) => format!("{device_id}{MODULE_ID_SEPARATOR}{module}"),
        None => device_id.to_string(),
    }
}

/// Split a module twin id into device and module part.
pub fn parse_module_id(id: &str) -> (&str, Option<&str>) {
    match id.split_once(MODULE_ID_SEPARATOR) {
        Some((device, module)) if !module.is_empty() => (device, Some(module)),
        _ => (id, None),
    }
}
