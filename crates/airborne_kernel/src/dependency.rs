//! Load-order resolution for plugin dependencies (Kahn's algorithm).
//!
//! A dependency string is satisfied by a plugin whose instance id, metadata
//! name or one of its `provides` entries equals it, or by something already
//! loaded. Plugins become ready in declaration order, so the result is
//! deterministic for a given input.

use crate::error::DependencyError;
use std::collections::{HashMap, HashSet, VecDeque};

/// One plugin as seen by the resolver
#[derive(Debug, Clone, Copy)]
pub struct DependencyNode<'a> {
    pub instance_id: &'a str,
    pub name: &'a str,
    pub provides: &'a [String],
    pub dependencies: &'a [String],
}

/// Return indices into `nodes` in an order where every plugin follows the
/// plugins it depends on.
///
/// `available` answers whether a dependency is already satisfied outside
/// `nodes` (for example a plugin loaded earlier).
pub fn resolve_load_order(
    nodes: &[DependencyNode<'_>],
    available: impl Fn(&str) -> bool,
) -> Result<Vec<usize>, DependencyError> {
    if nodes.is_empty() {
        return Ok(Vec::new());
    }

    let mut providers: HashMap<&str, Vec<usize>> = HashMap::new();
    for (index, node) in nodes.iter().enumerate() {
        let keys = [node.instance_id, node.name]
            .into_iter()
            .chain(node.provides.iter().map(String::as_str));
        for key in keys {
            let entry = providers.entry(key).or_default();
            if !entry.contains(&index) {
                entry.push(index);
            }
        }
    }

    // 1. Build edges provider -> dependent and in-degree counts.
    let mut edges: HashSet<(usize, usize)> = HashSet::new();
    for (index, node) in nodes.iter().enumerate() {
        for dependency in node.dependencies {
            let internal: Vec<usize> = providers
                .get(dependency.as_str())
                .map(|list| list.iter().copied().filter(|&p| p != index).collect())
                .unwrap_or_default();

            if internal.is_empty() {
                let self_provided = providers
                    .get(dependency.as_str())
                    .is_some_and(|list| list.contains(&index));
                if !self_provided && !available(dependency) {
                    return Err(DependencyError::Missing {
                        plugin: node.instance_id.to_string(),
                        dependency: dependency.clone(),
                    });
                }
            }

            for provider in internal {
                edges.insert((provider, index));
            }
        }
    }

    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    let mut in_degree = vec![0usize; nodes.len()];
    let mut sorted_edges: Vec<(usize, usize)> = edges.into_iter().collect();
    sorted_edges.sort_unstable();
    for (parent, child) in sorted_edges {
        adjacency[parent].push(child);
        in_degree[child] += 1;
    }

    // 2. Seed with roots in declaration order.
    let mut queue: VecDeque<usize> = (0..nodes.len()).filter(|&i| in_degree[i] == 0).collect();

    // 3. Process the queue.
    let mut order = Vec::with_capacity(nodes.len());
    while let Some(parent) = queue.pop_front() {
        order.push(parent);
        for &child in &adjacency[parent] {
            in_degree[child] -= 1;
            if in_degree[child] == 0 {
                queue.push_back(child);
            }
        }
    }

    // 4. Anything left sits on or behind a cycle.
    if order.len() != nodes.len() {
        return Err(DependencyError::Cycle(cycle_members(nodes, &adjacency, &order)));
    }
    Ok(order)
}

/// Strip plugins that merely depend on a cycle, leaving its members
fn cycle_members(nodes: &[DependencyNode<'_>], adjacency: &[Vec<usize>], sorted: &[usize]) -> Vec<String> {
    let mut remaining: HashSet<usize> = (0..nodes.len()).collect();
    for index in sorted {
        remaining.remove(index);
    }

    loop {
        let leaves: Vec<usize> = remaining
            .iter()
            .copied()
            .filter(|&node| !adjacency[node].iter().any(|child| remaining.contains(child)))
            .collect();
        if leaves.is_empty() {
            break;
        }
        for leaf in leaves {
            remaining.remove(&leaf);
        }
    }

    let mut members: Vec<usize> = remaining.into_iter().collect();
    members.sort_unstable();
    members
        .into_iter()
        .map(|index| nodes[index].instance_id.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Spec {
        id: &'static str,
        provides: Vec<String>,
        deps: Vec<String>,
    }

    fn spec(id: &'static str, deps: &[&str]) -> Spec {
        Spec {
            id,
            provides: Vec::new(),
            deps: deps.iter().map(|d| d.to_string()).collect(),
        }
    }

    fn nodes(specs: &[Spec]) -> Vec<DependencyNode<'_>> {
        specs
            .iter()
            .map(|s| DependencyNode {
                instance_id: s.id,
                name: s.id,
                provides: &s.provides,
                dependencies: &s.deps,
            })
            .collect()
    }

    fn ids(specs: &[Spec], order: &[usize]) -> Vec<&'static str> {
        order.iter().map(|&i| specs[i].id).collect()
    }

    #[test]
    fn test_dependencies_load_first() {
        let specs = vec![
            spec("autopilot", &["flight_model", "electrical"]),
            spec("flight_model", &[]),
            spec("electrical", &["flight_model"]),
        ];
        let order = resolve_load_order(&nodes(&specs), |_| false).unwrap();
        assert_eq!(ids(&specs, &order), vec!["flight_model", "electrical", "autopilot"]);
    }

    #[test]
    fn test_independent_plugins_keep_declaration_order() {
        let specs = vec![spec("cabin", &[]), spec("audio", &[]), spec("weather", &[])];
        let order = resolve_load_order(&nodes(&specs), |_| false).unwrap();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_provides_satisfies_dependency() {
        let mut terrain = spec("srtm_terrain", &[]);
        terrain.provides.push("terrain".to_string());
        let specs = vec![spec("gpws", &["terrain"]), terrain];

        let order = resolve_load_order(&nodes(&specs), |_| false).unwrap();
        assert_eq!(ids(&specs, &order), vec!["srtm_terrain", "gpws"]);
    }

    #[test]
    fn test_missing_dependency_names_plugin() {
        let specs = vec![spec("gpws", &["terrain"])];
        let err = resolve_load_order(&nodes(&specs), |_| false).unwrap_err();
        assert_eq!(
            err,
            DependencyError::Missing {
                plugin: "gpws".into(),
                dependency: "terrain".into()
            }
        );
    }

    #[test]
    fn test_externally_available_dependency() {
        let specs = vec![spec("gpws", &["terrain"])];
        let order = resolve_load_order(&nodes(&specs), |dep| dep == "terrain").unwrap();
        assert_eq!(order, vec![0]);
    }

    #[test]
    fn test_cycle_reports_members_only() {
        let specs = vec![
            spec("a", &["c"]),
            spec("b", &["a"]),
            spec("c", &["b"]),
            spec("downstream", &["a"]),
            spec("free", &[]),
        ];
        let err = resolve_load_order(&nodes(&specs), |_| false).unwrap_err();
        assert_eq!(err, DependencyError::Cycle(vec!["a".into(), "b".into(), "c".into()]));
        assert!(err.to_string().contains("a, b, c"));
    }

    #[test]
    fn test_self_dependency_is_ignored() {
        let specs = vec![spec("loopback", &["loopback"])];
        let order = resolve_load_order(&nodes(&specs), |_| false).unwrap();
        assert_eq!(order, vec![0]);
    }
}
