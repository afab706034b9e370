use std::sync::LazyLock;

use regex::Regex;

static DNS_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9-]*[a-z0-9]$").expect("valid regex"));

static LABEL_PART: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9._/-]*[a-zA-Z0-9]$").expect("valid regex")
});

const MAX_DNS_LABEL: usize = 63;
const MAX_LABEL_PART: usize = 255;

/// Lowercase alphanumerics and hyphens, at most 63 characters
pub fn is_valid_cluster_name(name: &str) -> bool {
    name.len() <= MAX_DNS_LABEL && DNS_LABEL.is_match(name)
}

/// Kubernetes namespace names follow RFC 1123 labels
pub fn is_valid_namespace(name: &str) -> bool {
    name.len() <= MAX_DNS_LABEL && DNS_LABEL.is_match(name)
}

/// PCE label key or value
pub fn is_valid_label_part(part: &str) -> bool {
    part.len() <= MAX_LABEL_PART && LABEL_PART.is_match(part)
}
