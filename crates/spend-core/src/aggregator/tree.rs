use std::collections::{BTreeMap, HashMap};

/// Prefix-indexed category tree for one user's bucket.
///
/// Only nodes that received an increment carry an amount. Ancestors exist as
/// structure and read as 0; they are never the sum of their children.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CategoryTree {
    root: Node,
}

#[derive(Clone, Debug, Default, PartialEq)]
struct Node {
    amount: Option<f64>,
    children: BTreeMap<String, Node>,
}

impl CategoryTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a tree from a flat `path -> amount` map of directly written paths.
    pub fn from_leaves<I>(leaves: I) -> Self
    where
        I: IntoIterator<Item = (String, f64)>,
    {
        let mut tree = Self::new();
        for (path, amount) in leaves {
            tree.increment(&path, amount);
        }
        tree
    }

    /// Add `amount` to the node at `path`, creating it (at 0) if needed.
    pub fn increment(&mut self, path: &str, amount: f64) {
        let mut node = &mut self.root;
        for segment in path.split('.') {
            node = node.children.entry(segment.to_string()).or_default();
        }
        *node.amount.get_or_insert(0.0) += amount;
    }

    /// Amount written directly at `path`, if any.
    pub fn get(&self, path: &str) -> Option<f64> {
        let mut node = &self.root;
        for segment in path.split('.') {
            node = node.children.get(segment)?;
        }
        node.amount
    }

    /// Only the paths that were written directly.
    pub fn leaves(&self) -> HashMap<String, f64> {
        let mut out = HashMap::new();
        self.walk(|path, node| {
            if let Some(amount) = node.amount {
                out.insert(path.to_string(), amount);
            }
        });
        out
    }

    /// Every node in the tree; ancestor-only nodes read as exactly 0.
    pub fn flatten(&self) -> HashMap<String, f64> {
        let mut out = HashMap::new();
        self.walk(|path, node| {
            out.insert(path.to_string(), node.amount.unwrap_or(0.0));
        });
        out
    }

    fn walk(&self, mut visit: impl FnMut(&str, &Node)) {
        let mut stack: Vec<(String, &Node)> = self
            .root
            .children
            .iter()
            .map(|(name, node)| (name.clone(), node))
            .collect();

        while let Some((path, node)) = stack.pop() {
            visit(&path, node);
            for (name, child) in &node.children {
                stack.push((format!("{path}.{name}"), child));
            }
        }
    }
}
