//! Semantic-versioning helpers shared by the registry and rollout controller.
//!
//! Wraps the `semver` crate with the handful of operations the update
//! pipeline needs: parsing with a descriptive error, descending ordering
//! with a deterministic tie-break, and caret-range compatibility checks.

use semver::{Version, VersionReq};

/// Parse a version string, stripping a single leading `v` if present (the
/// shape GitHub release tags commonly use).
pub fn parse_lenient(raw: &str) -> Result<Version, semver::Error> {
    let trimmed = raw.strip_prefix('v').unwrap_or(raw);
    Version::parse(trimmed)
}

/// Returns `true` if `candidate` satisfies a caret range anchored at `base`
/// (`^base`), or is exactly equal to `base`.
///
/// `findCompatibleBuilds` in the registry uses this to find every build
/// whose bundled runtime version is compatible with a freshly discovered
/// one.
pub fn caret_compatible(candidate: &Version, base: &Version) -> bool {
    if candidate == base {
        return true;
    }
    let Ok(req) = VersionReq::parse(&format!("^{base}")) else {
        return false;
    };
    req.matches(candidate)
}

/// Sort version strings in descending semver order.
///
/// Per the open design note on `getLatestStableVersion`'s double sort, this
/// crate applies exactly one ordering pass. Entries that fail to parse as
/// semver sort last, ordered lexicographically among themselves, so the
/// function never panics or drops data on malformed input.
///
/// Ties (equal parsed version) break on the original string, descending,
/// for a fully deterministic order as required by the registry's trimming
/// logic (Design Notes §9).
pub fn sort_versions_desc<'a, T, F>(items: &mut [T], version_of: F)
where
    F: Fn(&T) -> &'a str,
{
    items.sort_by(|a, b| {
        let (sa, sb) = (version_of(a), version_of(b));
        match (parse_lenient(sa), parse_lenient(sb)) {
            (Ok(va), Ok(vb)) => vb.cmp(&va).then_with(|| sb.cmp(sa)),
            (Ok(_), Err(_)) => std::cmp::Ordering::Less,
            (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
            (Err(_), Err(_)) => sb.cmp(sa),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_lenient_strips_leading_v() {
        assert_eq!(parse_lenient("v1.2.3").unwrap(), Version::new(1, 2, 3));
        assert_eq!(parse_lenient("1.2.3").unwrap(), Version::new(1, 2, 3));
    }

    #[test]
    fn caret_compatible_matches_minor_and_patch_bumps() {
        let base = Version::parse("1.2.0").unwrap();
        assert!(caret_compatible(&Version::parse("1.2.0").unwrap(), &base));
        assert!(caret_compatible(&Version::parse("1.9.9").unwrap(), &base));
        assert!(!caret_compatible(&Version::parse("2.0.0").unwrap(), &base));
        assert!(!caret_compatible(&Version::parse("1.1.9").unwrap(), &base));
    }

    #[test]
    fn sort_versions_desc_orders_newest_first() {
        let mut v = vec!["1.0.0".to_string(), "2.1.0".to_string(), "1.9.0".to_string()];
        sort_versions_desc(&mut v, |s| s.as_str());
        assert_eq!(v, vec!["2.1.0", "1.9.0", "1.0.0"]);
    }

    #[test]
    fn sort_versions_desc_pushes_unparseable_last() {
        let mut v = vec!["not-semver".to_string(), "1.0.0".to_string()];
        sort_versions_desc(&mut v, |s| s.as_str());
        assert_eq!(v, vec!["1.0.0", "not-semver"]);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    /// The semver-ordering invariant from spec §8: `sort_versions_desc` must
    /// leave its output non-ascending under semver comparison, for any input
    /// of well-formed `major.minor.patch` strings (resolves the Design Notes
    /// §9 open question on `getLatestStableVersion`'s double sort by
    /// checking the single deterministic pass this crate applies instead).
    proptest! {
        #[test]
        fn sort_versions_desc_is_never_ascending(
            triples in prop::collection::vec((0u64..6, 0u64..6, 0u64..6), 0..12)
        ) {
            let mut versions: Vec<String> = triples.iter().map(|(ma, mi, pa)| format!("{ma}.{mi}.{pa}")).collect();
            sort_versions_desc(&mut versions, |s| s.as_str());

            for window in versions.windows(2) {
                let a = parse_lenient(&window[0]).expect("input is always well-formed semver");
                let b = parse_lenient(&window[1]).expect("input is always well-formed semver");
                prop_assert!(a >= b, "{} should sort before {}", window[0], window[1]);
            }
        }

        #[test]
        fn sort_versions_desc_is_a_permutation_of_the_input(
            triples in prop::collection::vec((0u64..6, 0u64..6, 0u64..6), 0..12)
        ) {
            let versions: Vec<String> = triples.iter().map(|(ma, mi, pa)| format!("{ma}.{mi}.{pa}")).collect();
            let mut sorted = versions.clone();
            sort_versions_desc(&mut sorted, |s| s.as_str());

            let mut a = versions;
            let mut b = sorted;
            a.sort();
            b.sort();
            prop_assert_eq!(a, b);
        }
    }
}
