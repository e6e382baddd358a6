/// Upstream namespaces the gateway will relay to. Anything else is rejected
/// before a single byte goes over the network.
pub const ALLOWED_PATH_PREFIXES: &[&str] = &[
    "ccarusermgnt/api/v1",
    "ccaraccessmgmt/api/v1",
    "modelmgmt/api/v2",
];

/// Namespaces whose requests must carry `X-HASH`/`X-HASH-2`/`X-TIMESTAMP`.
pub const SIGNED_PATH_PREFIXES: &[&str] = &["ccaraccessmgmt/api/v1", "modelmgmt/api/v2"];

fn normalized(path: &str) -> &str {
    path.trim_start_matches('/')
}

/// Whether the gateway may relay this path at all.
pub fn is_allowed(path: &str) -> bool {
    let path = normalized(path);
    ALLOWED_PATH_PREFIXES
        .iter()
        .any(|prefix| path.starts_with(prefix))
}

/// Whether this path requires the dual request hashes.
pub fn requires_signing(path: &str) -> bool {
    let path = normalized(path);
    SIGNED_PATH_PREFIXES
        .iter()
        .any(|prefix| path.starts_with(prefix))
}
