//! Fixed-point inliner
//!
//! A reference may be inlined when its target contains no remaining
//! (non-inlined) reference, counting every site below the target up to the
//! nearest `$defs`/`definitions` entry. Inlining a site can free the targets
//! that contain it, so the scan repeats until nothing changes. Sites that sit
//! on a cycle never become free and stay as calls.

use tracing::debug;

use super::session::Location;

/// A reference site with its resolved static target
#[derive(Debug, Clone)]
pub struct PlannedSite {
    pub site: Location,
    pub boundary: String,
    pub target: Location,
    /// Dynamic references bound to a `$dynamicAnchor` depend on the runtime scope
    pub dynamic: bool,
}

/// Whether `location` lies at or above a remaining site within that site's boundary
fn covers(location: &Location, site: &PlannedSite) -> bool {
    location.doc == site.site.doc
        && location.contains(&site.site)
        && crate::pointer::is_within(&site.boundary, &location.pointer)
}

/// Decide, per site, whether it is inlined. Returns one flag per input site.
pub fn plan(sites: &[PlannedSite], enabled: bool) -> Vec<bool> {
    let mut inlined = vec![false; sites.len()];
    if !enabled {
        return inlined;
    }
    loop {
        let mut changed = false;
        for i in 0..sites.len() {
            if inlined[i] || sites[i].dynamic {
                continue;
            }
            let target = &sites[i].target;
            let contains_refs = sites
                .iter()
                .zip(&inlined)
                .any(|(other, done)| !*done && covers(target, other));
            if !contains_refs {
                debug!(
                    site = %sites[i].site.pointer,
                    target = %target.pointer,
                    "Inlined reference"
                );
                inlined[i] = true;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    inlined
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(at: &str, boundary: &str, target: &str) -> PlannedSite {
        PlannedSite {
            site: Location::new(0, at),
            boundary: boundary.to_string(),
            target: Location::new(0, target),
            dynamic: false,
        }
    }

    #[test]
    fn test_chain_is_inlined_to_fixed_point() {
        // a -> b -> c, c has no refs
        let sites = vec![
            site("/properties/x", "", "/$defs/a"),
            site("/$defs/a/items", "/$defs/a", "/$defs/b"),
            site("/$defs/b/not", "/$defs/b", "/$defs/c"),
        ];
        assert_eq!(plan(&sites, true), vec![true, true, true]);
    }

    #[test]
    fn test_cycles_stay_calls() {
        let sites = vec![
            site("/$defs/a/items", "/$defs/a", "/$defs/b"),
            site("/$defs/b/items", "/$defs/b", "/$defs/a"),
            site("/properties/x", "", "/$defs/a"),
        ];
        assert_eq!(plan(&sites, true), vec![false, false, false]);
    }

    #[test]
    fn test_self_reference_stays_call() {
        let sites = vec![site("/properties/next", "", "")];
        assert_eq!(plan(&sites, true), vec![false]);
    }

    #[test]
    fn test_disabled_inlines_nothing() {
        let sites = vec![site("/properties/x", "", "/$defs/a")];
        assert_eq!(plan(&sites, false), vec![false]);
    }

    #[test]
    fn test_dynamic_sites_never_inlined() {
        let mut dynamic = site("/$defs/a/items", "/$defs/a", "/$defs/b");
        dynamic.dynamic = true;
        let sites = vec![dynamic, site("/properties/x", "", "/$defs/a")];
        assert_eq!(plan(&sites, true), vec![false, false]);
    }
}
