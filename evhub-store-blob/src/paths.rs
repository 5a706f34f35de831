//! Object-key layout for ownership and checkpoint records.

use object_store::path::Path;

pub fn ownership_prefix(namespace: &str, hub: &str, group: &str) -> Path {
    Path::from(format!("{namespace}/{hub}/{group}/ownership"))
}

pub fn ownership_path(namespace: &str, hub: &str, group: &str, partition: &str) -> Path {
    Path::from(format!("{namespace}/{hub}/{group}/ownership/{partition}"))
}

pub fn checkpoint_prefix(namespace: &str, hub: &str, group: &str) -> Path {
    Path::from(format!("{namespace}/{hub}/{group}/checkpoint"))
}

pub fn checkpoint_path(namespace: &str, hub: &str, group: &str, partition: &str) -> Path {
    Path::from(format!("{namespace}/{hub}/{group}/checkpoint/{partition}"))
}

/// The partition id is the last path segment.
pub fn partition_id_of(path: &Path) -> Option<String> {
    path.filename().map(std::string::ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_id_is_the_final_segment() {
        let path = ownership_path("ns", "hub", "grp", "3");
        assert_eq!(partition_id_of(&path).as_deref(), Some("3"));
    }
}
