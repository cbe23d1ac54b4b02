use std::collections::{BTreeSet, HashMap, HashSet};

use crate::error::{ApiError, Result};
use crate::model::Entity;

/// Hard ceiling on ancestor fetch rounds. A chain deeper than this means
/// corrupt parent pointers, not a real hierarchy.
pub const MAX_ANCESTOR_DEPTH: usize = 100;

/// Rebuilds the forest above a flat page of tree nodes.
///
/// Parents missing from the page are loaded in batches, one `fetch` call
/// per ancestry level, so a page of nodes whose parents sit one level up
/// costs a single round. A parent the fetch does not return makes its
/// children roots. Nodes participating in a parent cycle are corrupt
/// data and fail the whole call.
pub fn assemble_forest(
    nodes: Vec<Entity>,
    mut fetch: impl FnMut(&[String]) -> Result<Vec<Entity>>,
) -> Result<Vec<Entity>> {
    let mut order: Vec<String> = Vec::new();
    let mut known: HashMap<String, Entity> = HashMap::new();
    let mut unavailable: HashSet<String> = HashSet::new();

    for entity in nodes {
        let id = node_id(&entity)?;
        if !known.contains_key(&id) {
            order.push(id.clone());
            known.insert(id, entity);
        }
    }

    let mut depth = 0;
    loop {
        let missing: Vec<String> = known
            .values()
            .filter_map(|entity| entity.parent_id())
            .filter(|parent| !known.contains_key(parent) && !unavailable.contains(parent))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if missing.is_empty() {
            break;
        }

        depth += 1;
        if depth > MAX_ANCESTOR_DEPTH {
            return Err(ApiError::Integrity(format!(
                "ancestor chain exceeds {} levels",
                MAX_ANCESTOR_DEPTH
            )));
        }

        for entity in fetch(&missing)? {
            let id = node_id(&entity)?;
            if !known.contains_key(&id) {
                order.push(id.clone());
                known.insert(id, entity);
            }
        }
        for id in missing {
            if !known.contains_key(&id) {
                unavailable.insert(id);
            }
        }
    }

    let mut children_of: HashMap<String, Vec<String>> = HashMap::new();
    let mut roots: Vec<String> = Vec::new();
    for id in &order {
        let parent = known[id].parent_id().filter(|p| known.contains_key(p));
        match parent {
            Some(parent) => children_of.entry(parent).or_default().push(id.clone()),
            None => roots.push(id.clone()),
        }
    }

    let forest: Vec<Entity> = roots
        .iter()
        .filter_map(|id| attach(id, &mut known, &mut children_of))
        .collect();

    if !known.is_empty() {
        let mut stuck: Vec<String> = known.keys().cloned().collect();
        stuck.sort();
        return Err(ApiError::Integrity(format!(
            "parent cycle among tree nodes {}",
            stuck.join(", ")
        )));
    }

    Ok(forest)
}

// Removing placed nodes from `known` is what lets the caller detect
// cycles: nodes stuck in a loop are never reachable from a root.
fn attach(
    id: &str,
    known: &mut HashMap<String, Entity>,
    children_of: &mut HashMap<String, Vec<String>>,
) -> Option<Entity> {
    let mut node = known.remove(id)?;
    for child in children_of.remove(id).unwrap_or_default() {
        if let Some(child) = attach(&child, known, children_of) {
            node.children.push(child);
        }
    }
    Some(node)
}

/// Chain from the root down to the given node, both included.
pub fn assemble_path(
    leaf: Entity,
    fetch: impl FnMut(&[String]) -> Result<Vec<Entity>>,
) -> Result<Vec<Entity>> {
    let forest = assemble_forest(vec![leaf], fetch)?;

    let mut chain = Vec::new();
    let mut current = forest.into_iter().next();
    while let Some(mut node) = current {
        current = node.children.drain(..).next();
        chain.push(node);
    }
    Ok(chain)
}

/// Loads descendants below a node. Level 1 keeps the node alone, level 2
/// adds its direct children, level 3 and up loads the whole subtree.
pub fn expand_children(
    node: &mut Entity,
    level: usize,
    mut fetch_children: impl FnMut(&str) -> Result<Vec<Entity>>,
) -> Result<()> {
    let remaining = if level >= 3 {
        None
    } else {
        Some(level.saturating_sub(1))
    };
    let mut seen = HashSet::new();
    expand(node, remaining, &mut fetch_children, &mut seen)
}

fn expand(
    node: &mut Entity,
    remaining: Option<usize>,
    fetch_children: &mut dyn FnMut(&str) -> Result<Vec<Entity>>,
    seen: &mut HashSet<String>,
) -> Result<()> {
    if remaining == Some(0) {
        return Ok(());
    }
    let id = node_id(node)?;
    if !seen.insert(id.clone()) {
        return Err(ApiError::Integrity(format!(
            "parent cycle at tree node {}",
            id
        )));
    }

    node.children = fetch_children(&id)?;
    let next = remaining.map(|r| r.saturating_sub(1));
    for child in &mut node.children {
        expand(child, next, fetch_children, seen)?;
    }
    Ok(())
}

fn node_id(entity: &Entity) -> Result<String> {
    entity.id().ok_or_else(|| {
        ApiError::Integrity(format!("tree node of \"{}\" without an id", entity.path()))
    })
}
