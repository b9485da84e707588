//! Dependency resolver: topological order, cycle detection, semver range
//! resolution, and declarative conflict strategies.

use std::collections::{BTreeMap, BTreeSet};

use semver::{Version, VersionReq};

use crate::error::{Error, Result};
use crate::manifest::{Component, Manifest};

/// `topoOrder(components) -> ordered list or CycleError`.
///
/// Kahn's algorithm over a `BTreeSet<(name, id)>` ready-set so the walk order
/// — and therefore the output order within a topological level — is always
/// alphabetical by component name, giving two resolutions of the same
/// manifest byte-identical plans.
pub fn topo_order(components: &BTreeMap<String, Component>) -> Result<Vec<String>> {
    let mut indegree: BTreeMap<&str, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

    for name in components.keys() {
        indegree.entry(name.as_str()).or_insert(0);
    }
    for (name, component) in components {
        for dep in &component.depends_on {
            *indegree.entry(name.as_str()).or_insert(0) += 1;
            dependents.entry(dep.as_str()).or_default().push(name.as_str());
        }
    }

    let mut ready: BTreeSet<&str> = indegree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&name, _)| name)
        .collect();

    let mut order = Vec::with_capacity(components.len());
    let mut remaining = indegree.clone();

    while let Some(&name) = ready.iter().next() {
        ready.remove(name);
        order.push(name.to_string());
        if let Some(dependents_of) = dependents.get(name) {
            let mut dependents_of = dependents_of.clone();
            dependents_of.sort();
            for dep_name in dependents_of {
                if let Some(deg) = remaining.get_mut(dep_name) {
                    *deg -= 1;
                    if *deg == 0 {
                        ready.insert(dep_name);
                    }
                }
            }
        }
    }

    if order.len() != components.len() {
        let cycle = components
            .keys()
            .filter(|name| !order.contains(name))
            .cloned()
            .collect();
        return Err(Error::Cycle { cycle });
    }

    Ok(order)
}

/// Groups a topological order into levels: components within a level have no
/// dependency relationship to each other and may run in parallel.
pub fn levels(components: &BTreeMap<String, Component>) -> Result<Vec<Vec<String>>> {
    let order = topo_order(components)?;
    let mut depth: BTreeMap<String, usize> = BTreeMap::new();
    for name in &order {
        let component = &components[name];
        let d = component
            .depends_on
            .iter()
            .map(|dep| depth.get(dep).copied().unwrap_or(0) + 1)
            .max()
            .unwrap_or(0);
        depth.insert(name.clone(), d);
    }

    let max_depth = depth.values().copied().max().unwrap_or(0);
    let mut out = vec![Vec::new(); max_depth + 1];
    for name in order {
        let d = depth[&name];
        out[d].push(name);
    }
    for level in &mut out {
        level.sort();
    }
    Ok(out)
}

pub fn reverse_deps(components: &BTreeMap<String, Component>, name: &str) -> BTreeSet<String> {
    components
        .values()
        .filter(|c| c.depends_on.iter().any(|d| d == name))
        .map(|c| c.name.clone())
        .collect()
}

pub fn transitive_closure(components: &BTreeMap<String, Component>, name: &str) -> BTreeSet<String> {
    let mut seen = BTreeSet::new();
    let mut stack = vec![name.to_string()];
    while let Some(current) = stack.pop() {
        if let Some(component) = components.get(&current) {
            for dep in &component.depends_on {
                if seen.insert(dep.clone()) {
                    stack.push(dep.clone());
                }
            }
        }
    }
    seen
}

/// Declarative strategy for picking a single version out of candidates that
/// each satisfy (or violate) a set of ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictStrategy {
    /// Highest version that satisfies every range.
    Latest,
    /// Lowest version that satisfies every range.
    Conservative,
    /// The first requirement in declaration order wins, regardless of others.
    First,
    /// Absolute maximum among candidates, ignoring whether ranges are met.
    Highest,
}

/// One `vMAJOR.MINOR.PATCH`-pinned requirement, in caret/tilde/exact/`>=`
/// form, as a parsed semver constraint plus its original text for
/// diagnostics.
#[derive(Debug, Clone)]
pub struct Requirement {
    pub raw: String,
    pub req: VersionReq,
}

fn strip_v_prefix(s: &str) -> &str {
    s.strip_prefix('v').unwrap_or(s)
}

/// Parses caret (`^1.2.3`), tilde (`~1.2.3`), exact (`1.2.3` / `=1.2.3`), and
/// `>=1.2.3` ranges over `vMAJOR.MINOR.PATCH`.
pub fn parse_requirement(raw: &str) -> Result<Requirement> {
    let trimmed = raw.trim();
    let normalized = if let Some(rest) = trimmed.strip_prefix(">=") {
        format!(">={}", strip_v_prefix(rest.trim()))
    } else if let Some(rest) = trimmed.strip_prefix('^') {
        format!("^{}", strip_v_prefix(rest.trim()))
    } else if let Some(rest) = trimmed.strip_prefix('~') {
        format!("~{}", strip_v_prefix(rest.trim()))
    } else if let Some(rest) = trimmed.strip_prefix('=') {
        format!("={}", strip_v_prefix(rest.trim()))
    } else {
        format!("={}", strip_v_prefix(trimmed))
    };

    let req = VersionReq::parse(&normalized)
        .map_err(|e| Error::manifest(format!("invalid version range {raw:?}: {e}")))?;
    Ok(Requirement {
        raw: raw.to_string(),
        req,
    })
}

fn parse_version(pin: &str) -> Option<Version> {
    Version::parse(strip_v_prefix(pin)).ok()
}

/// Resolves a single component's conflicting constraints against a candidate
/// set of known versions, using the given strategy. Returns the winning
/// version, or a `ConflictError` enumerating the constraints that could not
/// be jointly satisfied.
pub fn resolve_conflict(
    name: &str,
    candidates: &[String],
    requirements: &[Requirement],
    strategy: ConflictStrategy,
) -> Result<String> {
    if requirements.is_empty() {
        return candidates
            .iter()
            .filter_map(|c| parse_version(c).map(|v| (v, c)))
            .max_by(|a, b| a.0.cmp(&b.0))
            .map(|(_, c)| c.clone())
            .ok_or_else(|| Error::manifest(format!("no candidates for {name}")));
    }

    if strategy == ConflictStrategy::First {
        return Ok(requirements[0].raw.clone());
    }

    let mut parsed: Vec<(Version, &String)> = candidates
        .iter()
        .filter_map(|c| parse_version(c).map(|v| (v, c)))
        .collect();
    parsed.sort_by(|a, b| a.0.cmp(&b.0));

    if strategy == ConflictStrategy::Highest {
        return parsed
            .last()
            .map(|(_, c)| (*c).clone())
            .ok_or_else(|| Error::manifest(format!("no candidates for {name}")));
    }

    let satisfying: Vec<&(Version, &String)> = parsed
        .iter()
        .filter(|(v, _)| requirements.iter().all(|r| r.req.matches(v)))
        .collect();

    if satisfying.is_empty() {
        return Err(Error::Conflict {
            name: name.to_string(),
            conflicting_ranges: requirements.iter().map(|r| r.raw.clone()).collect(),
        });
    }

    let winner = match strategy {
        ConflictStrategy::Latest => satisfying.last(),
        ConflictStrategy::Conservative => satisfying.first(),
        ConflictStrategy::First | ConflictStrategy::Highest => unreachable!(),
    };

    Ok(winner.unwrap().1.clone())
}

/// `conflicts(constraints) -> list of {name, conflicting_ranges}` — checks
/// every component's declared version against the requirements imposed on it
/// by the manifest's `environments` pin sets, reporting any that cannot be
/// jointly satisfied under `Latest` semantics (the default strategy).
pub fn find_conflicts(manifest: &Manifest) -> Vec<(String, Vec<String>)> {
    let mut per_component: BTreeMap<String, Vec<Requirement>> = BTreeMap::new();
    for pins in manifest.environments.values() {
        for (component, pin) in pins {
            if let Ok(req) = parse_requirement(pin) {
                per_component.entry(component.clone()).or_default().push(req);
            }
        }
    }

    let mut conflicts = Vec::new();
    for (name, reqs) in per_component {
        let Some(component) = manifest.components.get(&name) else {
            continue;
        };
        let candidates = vec![component.version.clone()];
        if resolve_conflict(&name, &candidates, &reqs, ConflictStrategy::Latest).is_err() {
            conflicts.push((name, reqs.into_iter().map(|r| r.raw).collect()));
        }
    }
    conflicts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{BuildKind, Isolation};
    use proptest::prelude::*;

    fn component(name: &str, deps: &[&str]) -> Component {
        Component {
            name: name.to_string(),
            repo: "r".into(),
            version: "v1.0.0".into(),
            build_kind: BuildKind::Generic,
            build_target: None,
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
            isolation: Isolation::None,
        }
    }

    #[test]
    fn topo_order_respects_dependencies_and_breaks_ties_alphabetically() {
        let mut components = BTreeMap::new();
        components.insert("b".into(), component("b", &["a"]));
        components.insert("a".into(), component("a", &[]));
        components.insert("c".into(), component("c", &["a"]));

        let order = topo_order(&components).unwrap();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn topo_order_detects_cycles() {
        let mut components = BTreeMap::new();
        components.insert("a".into(), component("a", &["b"]));
        components.insert("b".into(), component("b", &["a"]));

        let err = topo_order(&components).unwrap_err();
        assert_eq!(err.kind_tag(), "CycleError");
    }

    #[test]
    fn levels_groups_independent_components_together() {
        let mut components = BTreeMap::new();
        components.insert("a".into(), component("a", &[]));
        components.insert("b".into(), component("b", &[]));
        components.insert("c".into(), component("c", &["a", "b"]));

        let levels = levels(&components).unwrap();
        assert_eq!(levels[0], vec!["a".to_string(), "b".to_string()]);
        assert_eq!(levels[1], vec!["c".to_string()]);
    }

    #[test]
    fn caret_range_matches_same_major() {
        let req = parse_requirement("^1.2.0").unwrap();
        assert!(req.req.matches(&Version::parse("1.9.0").unwrap()));
        assert!(!req.req.matches(&Version::parse("2.0.0").unwrap()));
    }

    #[test]
    fn tilde_range_matches_same_minor() {
        let req = parse_requirement("~1.2.0").unwrap();
        assert!(req.req.matches(&Version::parse("1.2.9").unwrap()));
        assert!(!req.req.matches(&Version::parse("1.3.0").unwrap()));
    }

    #[test]
    fn gte_range_matches_anything_higher() {
        let req = parse_requirement(">=v1.2.0").unwrap();
        assert!(req.req.matches(&Version::parse("5.0.0").unwrap()));
        assert!(!req.req.matches(&Version::parse("1.1.0").unwrap()));
    }

    #[test]
    fn resolve_conflict_latest_picks_highest_satisfying() {
        let candidates = vec!["v1.0.0".into(), "v1.2.0".into(), "v1.5.0".into()];
        let reqs = vec![parse_requirement("^1.0.0").unwrap()];
        let winner =
            resolve_conflict("x", &candidates, &reqs, ConflictStrategy::Latest).unwrap();
        assert_eq!(winner, "v1.5.0");
    }

    #[test]
    fn resolve_conflict_conservative_picks_lowest_satisfying() {
        let candidates = vec!["v1.0.0".into(), "v1.2.0".into(), "v1.5.0".into()];
        let reqs = vec![parse_requirement("^1.0.0").unwrap()];
        let winner =
            resolve_conflict("x", &candidates, &reqs, ConflictStrategy::Conservative).unwrap();
        assert_eq!(winner, "v1.0.0");
    }

    #[test]
    fn resolve_conflict_unsatisfiable_returns_conflict_error() {
        let candidates = vec!["v2.0.0".into()];
        let reqs = vec![parse_requirement("^1.0.0").unwrap()];
        let err = resolve_conflict("x", &candidates, &reqs, ConflictStrategy::Latest).unwrap_err();
        assert_eq!(err.kind_tag(), "ConflictError");
    }

    proptest! {
        #[test]
        fn topo_order_is_a_permutation_of_inputs(names in proptest::collection::vec("[a-z]{1,6}", 1..8)) {
            let mut components = BTreeMap::new();
            let mut unique: Vec<String> = names.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
            unique.sort();
            for (i, name) in unique.iter().enumerate() {
                let deps: Vec<&str> = unique[..i].iter().map(|s| s.as_str()).collect();
                components.insert(name.clone(), component(name, &deps[..deps.len().min(1)]));
            }
            let order = topo_order(&components).unwrap();
            let mut sorted_order = order.clone();
            sorted_order.sort();
            let mut sorted_names = unique.clone();
            sorted_names.sort();
            prop_assert_eq!(sorted_order, sorted_names);
        }
    }
}
