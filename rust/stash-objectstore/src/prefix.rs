use std::collections::BTreeSet;

/// Groups `keys` below `prefix` by the first `delimiter` after it.
///
/// Each result is `prefix` followed by everything up to and including that
/// delimiter. Keys with no delimiter after `prefix` name objects, not
/// groups, and are skipped. The result is sorted and free of duplicates.
pub(crate) fn common_prefixes<I>(keys: I, prefix: &str, delimiter: &str) -> Vec<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    if delimiter.is_empty() {
        return Vec::new();
    }

    let mut groups = BTreeSet::new();
    for key in keys {
        let Some(rest) = key.as_ref().strip_prefix(prefix) else {
            continue;
        };
        if let Some(index) = rest.find(delimiter) {
            groups.insert(format!("{prefix}{}", &rest[..index + delimiter.len()]));
        }
    }
    groups.into_iter().collect()
}
