//! Dependency resolution for module startup order.
//!
//! Generalizes the teacher's `toka-orchestration::dependency::DependencyResolver`
//! (agent spawn-wave resolution, priority-weighted DFS) down to the
//! spec's simpler requirement: a single Kahn-style topological order over
//! required dependencies, with no priority weighting and no wave grouping.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::manifest::Manifest;

/// Errors raised while resolving a startup order.
#[derive(Debug, thiserror::Error)]
pub enum DependencyError {
    /// A module declared a dependency on an id that was never registered.
    #[error("module '{module}' depends on unregistered module '{dependency}'")]
    UnknownDependency {
        /// The dependent module's id.
        module: String,
        /// The missing dependency's id.
        dependency: String,
    },
    /// The dependency graph contains a cycle.
    #[error("circular dependency detected among modules: {0:?}")]
    CycleDetected(Vec<String>),
}

/// Resolves a dependency-respecting initialization order over a set of
/// manifests via Kahn's algorithm.
///
/// Returns module ids in the order they should be `initialize`d/`start`ed.
/// The reverse of this order is the correct `stop`/`destroy` order (§4.2).
pub fn resolve_order(manifests: &[Manifest]) -> Result<Vec<String>, DependencyError> {
    let ids: HashSet<&str> = manifests.iter().map(|m| m.id.as_str()).collect();

    for manifest in manifests {
        for dep in &manifest.dependencies {
            if !ids.contains(dep.as_str()) {
                return Err(DependencyError::UnknownDependency { module: manifest.id.clone(), dependency: dep.clone() });
            }
        }
    }

    // Kahn's algorithm: in_degree[m] = number of modules m depends on.
    // dependents[d] = modules that depend on d, so removing d can free them.
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for manifest in manifests {
        in_degree.entry(&manifest.id).or_insert(0);
        dependents.entry(&manifest.id).or_default();
    }
    for manifest in manifests {
        *in_degree.get_mut(manifest.id.as_str()).unwrap() += manifest.dependencies.len();
        for dep in &manifest.dependencies {
            dependents.entry(dep.as_str()).or_default().push(&manifest.id);
        }
    }

    // Deterministic ordering: process ready modules in declaration order
    // rather than hash-map iteration order, matching the teacher's
    // "sort agents for deterministic ordering" discipline.
    let declared_order: Vec<&str> = manifests.iter().map(|m| m.id.as_str()).collect();
    let mut queue: VecDeque<&str> = declared_order.iter().filter(|id| in_degree[*id] == 0).copied().collect();

    let mut order = Vec::with_capacity(manifests.len());
    while let Some(id) = queue.pop_front() {
        order.push(id.to_string());
        if let Some(deps) = dependents.get(id) {
            for &dependent in deps {
                let degree = in_degree.get_mut(dependent).unwrap();
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(dependent);
                }
            }
        }
    }

    if order.len() != manifests.len() {
        let resolved: HashSet<&str> = order.iter().map(String::as_str).collect();
        let unresolved = declared_order.into_iter().filter(|id| !resolved.contains(id)).map(String::from).collect();
        return Err(DependencyError::CycleDetected(unresolved));
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ModuleType;

    fn manifest(id: &str, deps: &[&str]) -> Manifest {
        Manifest::new(id, id, "1.0.0", ModuleType::Detector).with_dependencies(deps.iter().copied())
    }

    #[test]
    fn linear_chain_resolves_in_dependency_order() {
        let manifests = vec![manifest("a", &[]), manifest("b", &["a"]), manifest("c", &["b"])];
        let order = resolve_order(&manifests).unwrap();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn independent_modules_resolve_without_error() {
        let manifests = vec![manifest("a", &[]), manifest("b", &[])];
        let order = resolve_order(&manifests).unwrap();
        assert_eq!(order.len(), 2);
    }

    #[test]
    fn cycle_is_detected() {
        let manifests = vec![manifest("a", &["b"]), manifest("b", &["a"])];
        assert!(matches!(resolve_order(&manifests), Err(DependencyError::CycleDetected(_))));
    }

    #[test]
    fn unknown_dependency_is_reported() {
        let manifests = vec![manifest("a", &["missing"])];
        assert!(matches!(resolve_order(&manifests), Err(DependencyError::UnknownDependency { .. })));
    }

    #[test]
    fn diamond_dependency_resolves_with_shared_ancestor_first() {
        let manifests = vec![manifest("a", &[]), manifest("b", &["a"]), manifest("c", &["a"]), manifest("d", &["b", "c"])];
        let order = resolve_order(&manifests).unwrap();
        let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("a") < pos("c"));
        assert!(pos("b") < pos("d"));
        assert!(pos("c") < pos("d"));
    }
}
