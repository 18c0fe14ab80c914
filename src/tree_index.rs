//src/tree_index.rs

use std::collections::{BTreeMap, BTreeSet};

use crate::error::TreeSappError;

/// What a placement edge hangs from: a reference leaf, or an internal node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EdgeTarget {
    Leaf(u32),
    Internal(u32),
}

/// Index over an annotated (jplace-style) Newick tree:
///  - internal-node label -> sorted leaf ids beneath it
///  - edge number -> the node directly below that edge
///
/// Every node carries `{n}` after its branch length, `n` being the number of the
/// edge above it. Internal nodes are labelled by an explicit integer name written
/// right after `)`, or failing that by their edge number.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeIndex {
    subtree_of_node: BTreeMap<u32, Vec<u32>>,
    edge_map: BTreeMap<u32, EdgeTarget>,
    root_label: Option<u32>,
    root_leaves: Vec<u32>,
}

impl TreeIndex {
    /// Single left-to-right scan of the tree string. Clades are tracked on an
    /// explicit stack, so arbitrarily deep trees never recurse.
    pub fn build(tree: &str, code: &str) -> Result<Self, TreeSappError> {
        let mut scanner = Scanner {
            bytes: tree.as_bytes(),
            pos: 0,
            code,
        };

        let mut subtree_of_node: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
        let mut edge_map: BTreeMap<u32, EdgeTarget> = BTreeMap::new();
        let mut seen_leaves: BTreeSet<u32> = BTreeSet::new();

        // One frame per open '(' holding the leaf sets of its finished children
        let mut frames: Vec<Vec<Vec<u32>>> = Vec::new();
        let mut root: Option<(Vec<u32>, Option<u32>)> = None;

        loop {
            scanner.skip_whitespace();
            let (set, label) = match scanner.peek() {
                None => return Err(scanner.error("unexpected end of tree, missing ';'")),
                Some(b'(') => {
                    scanner.pos += 1;
                    frames.push(Vec::new());
                    continue;
                }
                Some(b',') => {
                    if frames.is_empty() {
                        return Err(scanner.error("',' outside of any clade"));
                    }
                    scanner.pos += 1;
                    continue;
                }
                Some(b';') => {
                    scanner.pos += 1;
                    break;
                }
                Some(b')') => {
                    scanner.pos += 1;
                    let children = frames
                        .pop()
                        .ok_or_else(|| scanner.error("unbalanced ')'"))?;
                    if children.is_empty() {
                        return Err(scanner.error("empty clade '()'"));
                    }
                    let mut leaves: Vec<u32> = children.into_iter().flatten().collect();
                    leaves.sort_unstable();

                    let name = scanner.read_token();
                    let explicit = if name.is_empty() {
                        None
                    } else {
                        Some(name.parse::<u32>().map_err(|_| {
                            scanner.error(&format!("internal node name '{}' is not an integer", name))
                        })?)
                    };
                    scanner.read_length()?;
                    let edge = scanner.read_edge_number()?;

                    let label = explicit.or(edge);
                    if let Some(label) = label {
                        if subtree_of_node.insert(label, leaves.clone()).is_some() {
                            return Err(scanner.error(&format!("internal node label {} is not unique", label)));
                        }
                    } else if !frames.is_empty() {
                        return Err(scanner.error("internal node carries neither a label nor an edge number"));
                    }
                    if let (Some(edge), Some(label)) = (edge, label) {
                        if edge_map.insert(edge, EdgeTarget::Internal(label)).is_some() {
                            return Err(scanner.error(&format!("edge number {} is not unique", edge)));
                        }
                    }
                    (leaves, label)
                }
                Some(_) => {
                    let name = scanner.read_token();
                    if name.is_empty() {
                        return Err(scanner.error("unexpected character"));
                    }
                    let leaf_id = match name.parse::<u32>() {
                        Ok(id) if id >= 1 => id,
                        _ => {
                            return Err(scanner.error(&format!("leaf label '{}' is not a leaf id", name)))
                        }
                    };
                    if !seen_leaves.insert(leaf_id) {
                        return Err(scanner.error(&format!("leaf {} appears more than once", leaf_id)));
                    }
                    scanner.read_length()?;
                    let edge = scanner
                        .read_edge_number()?
                        .ok_or_else(|| scanner.error(&format!("leaf {} has no edge number", leaf_id)))?;
                    if edge_map.insert(edge, EdgeTarget::Leaf(leaf_id)).is_some() {
                        return Err(scanner.error(&format!("edge number {} is not unique", edge)));
                    }
                    (vec![leaf_id], None)
                }
            };

            match frames.last_mut() {
                Some(frame) => frame.push(set),
                None => {
                    if root.is_some() {
                        return Err(scanner.error("more than one root clade"));
                    }
                    root = Some((set, label));
                }
            }
        }

        if !frames.is_empty() {
            return Err(scanner.error("unbalanced '('"));
        }
        scanner.skip_whitespace();
        if scanner.peek().is_some() {
            return Err(scanner.error("trailing characters after ';'"));
        }
        let (root_leaves, root_label) = root.ok_or_else(|| scanner.error("empty tree"))?;

        Ok(TreeIndex {
            subtree_of_node,
            edge_map,
            root_label,
            root_leaves,
        })
    }

    pub fn resolve_edge(&self, edge: u32) -> Option<EdgeTarget> {
        self.edge_map.get(&edge).copied()
    }

    /// Leaf ids subtended by an edge, sorted ascending.
    pub fn leaves_below_edge(&self, edge: u32) -> Option<&[u32]> {
        match self.edge_map.get(&edge)? {
            EdgeTarget::Leaf(id) => Some(std::slice::from_ref(id)),
            EdgeTarget::Internal(label) => self.subtree_of_node.get(label).map(Vec::as_slice),
        }
    }

    pub fn subtree_of_node(&self, label: u32) -> Option<&[u32]> {
        self.subtree_of_node.get(&label).map(Vec::as_slice)
    }

    pub fn root_label(&self) -> Option<u32> {
        self.root_label
    }

    pub fn root_leaves(&self) -> &[u32] {
        &self.root_leaves
    }

    pub fn leaf_count(&self) -> usize {
        self.root_leaves.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_map.len()
    }

    pub fn edges(&self) -> impl Iterator<Item = u32> + '_ {
        self.edge_map.keys().copied()
    }

    pub fn internal_labels(&self) -> impl Iterator<Item = u32> + '_ {
        self.subtree_of_node.keys().copied()
    }

    /// The tree's leaves must be exactly the package's reference leaves.
    pub fn verify_leaf_universe(&self, leaf_ids: &[u32], code: &str) -> Result<(), TreeSappError> {
        if self.root_leaves == leaf_ids {
            return Ok(());
        }
        let tree: BTreeSet<u32> = self.root_leaves.iter().copied().collect();
        let taxonomy: BTreeSet<u32> = leaf_ids.iter().copied().collect();
        let missing: Vec<String> = taxonomy.difference(&tree).take(5).map(u32::to_string).collect();
        let extra: Vec<String> = tree.difference(&taxonomy).take(5).map(u32::to_string).collect();
        Err(TreeSappError::LeafSetMismatch {
            code: code.to_string(),
            reason: format!(
                "tree has {} leaves, taxonomy has {}; absent from tree: [{}]; absent from taxonomy: [{}]",
                tree.len(),
                taxonomy.len(),
                missing.join(", "),
                extra.join(", ")
            ),
        })
    }

    pub fn same_topology(&self, other: &TreeIndex) -> bool {
        self.edge_map == other.edge_map && self.subtree_of_node == other.subtree_of_node
    }
}

struct Scanner<'a> {
    bytes: &'a [u8],
    pos: usize,
    code: &'a str,
}

impl<'a> Scanner<'a> {
    fn error(&self, reason: &str) -> TreeSappError {
        TreeSappError::MalformedTree {
            code: self.code.to_string(),
            offset: self.pos,
            reason: reason.to_string(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b) if b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    /// Characters up to the next structural delimiter.
    fn read_token(&mut self) -> &'a str {
        let bytes = self.bytes;
        let start = self.pos;
        while let Some(b) = self.peek() {
            if matches!(b, b'(' | b')' | b',' | b':' | b';' | b'{' | b'}' | b'[') || b.is_ascii_whitespace() {
                break;
            }
            self.pos += 1;
        }
        // Delimiters are ASCII, so the slice stays on char boundaries
        std::str::from_utf8(&bytes[start..self.pos]).unwrap_or("")
    }

    fn read_length(&mut self) -> Result<(), TreeSappError> {
        self.skip_whitespace();
        if self.peek() != Some(b':') {
            return Ok(());
        }
        self.pos += 1;
        let token = self.read_token();
        token
            .parse::<f64>()
            .map(|_| ())
            .map_err(|_| self.error(&format!("branch length '{}' is not a number", token)))
    }

    fn read_edge_number(&mut self) -> Result<Option<u32>, TreeSappError> {
        self.skip_whitespace();
        if self.peek() != Some(b'{') {
            return Ok(None);
        }
        self.pos += 1;
        let token = self.read_token();
        let edge = token
            .parse::<u32>()
            .map_err(|_| self.error(&format!("edge number '{}' is not an integer", token)))?;
        if self.peek() != Some(b'}') {
            return Err(self.error("unterminated '{'"));
        }
        self.pos += 1;
        Ok(Some(edge))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const FOUR_LEAVES: &str = "((1:0.1{0},2:0.2{1}):0.3{2},(3:0.1{3},4:0.4{4}):0.2{5}):0.0{6};";

    #[test]
    fn test_two_leaf_tree() {
        let index = TreeIndex::build("(1:0.1{0},2:0.2{1}):0.0{2};", "T").unwrap();
        assert_eq!(index.resolve_edge(0), Some(EdgeTarget::Leaf(1)));
        assert_eq!(index.resolve_edge(1), Some(EdgeTarget::Leaf(2)));
        assert_eq!(index.resolve_edge(2), Some(EdgeTarget::Internal(2)));
        assert_eq!(index.leaves_below_edge(0), Some(&[1][..]));
        assert_eq!(index.leaves_below_edge(2), Some(&[1, 2][..]));
        assert_eq!(index.root_leaves(), &[1, 2]);
        assert_eq!(index.root_label(), Some(2));
        assert_eq!(index.leaves_below_edge(9), None);
    }

    #[test]
    fn test_nested_subtrees() {
        let index = TreeIndex::build(FOUR_LEAVES, "T").unwrap();
        assert_eq!(index.subtree_of_node(2), Some(&[1, 2][..]));
        assert_eq!(index.subtree_of_node(5), Some(&[3, 4][..]));
        assert_eq!(index.subtree_of_node(6), Some(&[1, 2, 3, 4][..]));
        assert_eq!(index.edge_count(), 7);
        assert_eq!(index.leaf_count(), 4);
        assert!(index.verify_leaf_universe(&[1, 2, 3, 4], "T").is_ok());
    }

    #[test]
    fn test_unrooted_polytomy_without_root_edge() {
        let index = TreeIndex::build("(1:0.1{0},(2:0.1{1},3:0.1{2}):0.2{3},4:0.3{4});", "T").unwrap();
        assert_eq!(index.root_label(), None);
        assert_eq!(index.root_leaves(), &[1, 2, 3, 4]);
        assert_eq!(index.leaves_below_edge(3), Some(&[2, 3][..]));
    }

    #[test]
    fn test_explicit_internal_labels() {
        let index = TreeIndex::build("((1:1{0},2:1{1})7:1{2},3:1{3})8;", "T").unwrap();
        assert_eq!(index.resolve_edge(2), Some(EdgeTarget::Internal(7)));
        assert_eq!(index.subtree_of_node(7), Some(&[1, 2][..]));
        assert_eq!(index.subtree_of_node(8), Some(&[1, 2, 3][..]));
    }

    #[test]
    fn test_whitespace_and_exponent_lengths() {
        let index = TreeIndex::build(" ( 1:1e-5{0} , 2:2.5E-1{1} ):0{2} ;\n", "T").unwrap();
        assert_eq!(index.leaves_below_edge(2), Some(&[1, 2][..]));
    }

    #[test]
    fn test_malformed_trees() {
        let bad = [
            "(1:0.1{0},2:0.2{1}):0.0{2}",   // missing ';'
            "((1:0.1{0},2:0.2{1}):0.0{2};", // unbalanced
            "(1:0.1{0},2:0.2{0}):0.0{2};",  // duplicate edge
            "(1:0.1{0},1:0.2{1}):0.0{2};",  // duplicate leaf
            "(A:0.1{0},2:0.2{1}):0.0{2};",  // non-numeric leaf
            "(1:0.1,2:0.2{1}):0.0{2};",     // leaf without edge
            "((1:1{0},2:1{1}):1,3:1{3});",  // unlabelled internal node
            "(1:x{0},2:0.2{1}):0.0{2};",    // bad length
            "(1:0.1{0},2:0.2{1}):0.0{2};x", // trailing garbage
            "();",
        ];
        for tree in bad {
            let err = TreeIndex::build(tree, "T").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MalformedTree, "accepted {}", tree);
        }
    }

    #[test]
    fn test_leaf_universe_mismatch() {
        let index = TreeIndex::build(FOUR_LEAVES, "M0701").unwrap();
        let err = index.verify_leaf_universe(&[1, 2, 3], "M0701").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LeafSetMismatch);
        assert!(err.to_string().contains("M0701"));
    }

    #[test]
    fn test_same_topology_ignores_branch_lengths() {
        let a = TreeIndex::build(FOUR_LEAVES, "T").unwrap();
        let b = TreeIndex::build(&FOUR_LEAVES.replace("0.1", "0.9"), "T").unwrap();
        assert!(a.same_topology(&b));
        let c = TreeIndex::build("((1:0.1{0},3:0.2{1}):0.3{2},(2:0.1{3},4:0.4{4}):0.2{5}):0.0{6};", "T").unwrap();
        assert!(!a.same_topology(&c));
    }
}
