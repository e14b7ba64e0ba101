//! Dependency ordering of importer steps.

use std::collections::{BTreeSet, HashMap};

use super::{create_step, ImporterStep, IMPORTER_STEPS};
use crate::error::{Error, Result};

/// Order nodes so every node comes after the nodes it depends on.
///
/// Nodes are `(name, depends_on)`. Among nodes whose dependencies are met,
/// input order is kept. Returns indices into `nodes`.
pub fn topological_order(nodes: &[(&str, &[&str])]) -> Result<Vec<usize>> {
    let mut index = HashMap::with_capacity(nodes.len());
    for (i, (name, _)) in nodes.iter().enumerate() {
        if index.insert(*name, i).is_some() {
            return Err(Error::Config(format!("importer step '{}' listed twice", name)));
        }
    }

    let mut pending = vec![0usize; nodes.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (i, (name, depends_on)) in nodes.iter().enumerate() {
        for dependency in depends_on.iter() {
            let Some(&j) = index.get(dependency) else {
                return Err(Error::UnknownDependency {
                    step: name.to_string(),
                    dependency: dependency.to_string(),
                });
            };
            pending[i] += 1;
            dependents[j].push(i);
        }
    }

    let mut ready: BTreeSet<usize> = (0..nodes.len()).filter(|&i| pending[i] == 0).collect();
    let mut order = Vec::with_capacity(nodes.len());
    while let Some(i) = ready.pop_first() {
        order.push(i);
        for &k in &dependents[i] {
            pending[k] -= 1;
            if pending[k] == 0 {
                ready.insert(k);
            }
        }
    }

    if order.len() < nodes.len() {
        let stuck: Vec<&str> = (0..nodes.len())
            .filter(|&i| pending[i] > 0)
            .map(|i| nodes[i].0)
            .collect();
        return Err(Error::DependencyCycle(stuck.join(", ")));
    }
    Ok(order)
}

/// Sort steps by their declared dependencies.
pub fn sort_steps(steps: Vec<Box<dyn ImporterStep>>) -> Result<Vec<Box<dyn ImporterStep>>> {
    let descriptors: Vec<_> = steps.iter().map(|s| s.descriptor()).collect();
    let nodes: Vec<(&str, &[&str])> = descriptors
        .iter()
        .map(|d| (d.name, d.depends_on))
        .collect();
    let order = topological_order(&nodes)?;

    let mut slots: Vec<Option<Box<dyn ImporterStep>>> = steps.into_iter().map(Some).collect();
    Ok(order
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect())
}

/// Build the named registered steps plus everything they depend on, sorted.
///
/// An empty selection means every registered step.
pub fn select_steps(names: &[String]) -> Result<Vec<Box<dyn ImporterStep>>> {
    let mut wanted: Vec<String> = if names.is_empty() {
        IMPORTER_STEPS.iter().map(|s| s.to_string()).collect()
    } else {
        names.to_vec()
    };

    let mut steps: Vec<Box<dyn ImporterStep>> = Vec::new();
    let mut seen = std::collections::HashSet::new();
    while let Some(name) = wanted.pop() {
        if !seen.insert(name.clone()) {
            continue;
        }
        let step = create_step(&name)?;
        for dependency in step.descriptor().depends_on {
            if !IMPORTER_STEPS.contains(dependency) {
                return Err(Error::UnknownDependency {
                    step: name.clone(),
                    dependency: dependency.to_string(),
                });
            }
            wanted.push(dependency.to_string());
        }
        steps.push(step);
    }

    // Registry order first, so independent steps run in a predictable order.
    steps.sort_by_key(|s| {
        IMPORTER_STEPS
            .iter()
            .position(|n| *n == s.descriptor().name)
            .unwrap_or(usize::MAX)
    });
    sort_steps(steps)
}
