use std::sync::LazyLock;

use regex::Regex;

// 📐 `<anything>/<8 digits>-<8 digits>/<no slash>-Manifest.json`, or the same at the bucket root.
static MANIFEST_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|/)\d{8}-\d{8}/[^/]*-Manifest\.json$").expect("manifest key regex compiles")
});

/// 🔍 Does this key look like a billing manifest?
///
/// False positives are fine, the fetcher rejects bodies that do not parse.
/// False negatives are not: a missed manifest is a missed month of bills.
pub fn is_manifest_key(key: &str) -> bool {
    MANIFEST_KEY.is_match(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_the_billing_period_folder_makes_it_a_manifest() {
        assert!(is_manifest_key("a/20230101-20230201/x-Manifest.json"));
        assert!(is_manifest_key("reports/cur/20231201-20240101/cur-Manifest.json"));
        assert!(is_manifest_key("20230101-20230201/cur-Manifest.json"));
    }

    #[test]
    fn the_one_where_lookalikes_are_turned_away() {
        assert!(!is_manifest_key("a/2023/x-Manifest.json"));
        // 🧩 the per-assembly copy one level down is not the period manifest
        assert!(!is_manifest_key("a/20230101-20230201/abc-123/x-Manifest.json"));
        assert!(!is_manifest_key("a/20230101-20230201/x-1.csv.gz"));
        assert!(!is_manifest_key("a/20230101-20230201/x-Manifest.json.bak"));
        assert!(!is_manifest_key("a/2023010-20230201/x-Manifest.json"));
    }
}
