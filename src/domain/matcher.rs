//! Advertisement name matching.

/// Returns true when either name field contains `target`, ignoring case.
///
/// Missing names never match.
pub fn matches_target(
    device_name: Option<&str>,
    advertised_name: Option<&str>,
    target: &str,
) -> bool {
    let needle = target.to_lowercase();
    [device_name, advertised_name]
        .into_iter()
        .flatten()
        .any(|name| name.to_lowercase().contains(&needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_name_match() {
        assert!(matches_target(Some("ZoboCar-01"), None, "Zobo"));
    }

    #[test]
    fn test_advertised_name_match_ignores_case() {
        assert!(matches_target(None, Some("my-zobo"), "Zobo"));
        assert!(matches_target(Some("other"), Some("ZOBO"), "zobo"));
    }

    #[test]
    fn test_no_names_never_match() {
        assert!(!matches_target(None, None, "Zobo"));
        assert!(!matches_target(None, None, ""));
    }

    #[test]
    fn test_neither_contains_target() {
        assert!(!matches_target(Some("Thingy"), Some("Nordic_UART"), "Zobo"));
        assert!(!matches_target(Some("Zob"), None, "Zobo"));
    }

    #[test]
    fn test_empty_target_matches_any_present_name() {
        assert!(matches_target(Some(""), None, ""));
        assert!(matches_target(None, Some("x"), ""));
    }
}
