use sha2::{Digest, Sha256};

/// Stable fingerprint of an authorization scope.
///
/// Order and duplicates do not matter: the paths are sorted and de-duplicated
/// before hashing, so two lookups returning the same set compare equal.
pub fn scope_fingerprint(paths: &[String]) -> String {
    let mut sorted: Vec<&str> = paths.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();

    let mut hasher = Sha256::new();
    for path in sorted {
        hasher.update(path.as_bytes());
        // Separator keeps ["ab", "c"] and ["a", "bc"] apart.
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}
