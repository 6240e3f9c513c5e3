/// One `DEF_LOCALS ... END_DEF_LOCALS` region
#[derive(Debug, Clone, PartialEq, Eq)]
struct ScopeNode {
    start_ip: u32,
    parent: Option<usize>,
    /// rightmost descendant, known once the region is closed
    last_sub_child: Option<usize>,
}

/// The steps that move the local variables on the stack from one scope to another
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ScopeWalk {
    /// number of regions to leave
    pub(crate) pops: u32,
    /// ips of the DEF_LOCALS commands of the regions to enter, outermost first
    pub(crate) enter: Vec<u32>,
}

/// The nesting of the DEF_LOCALS regions of one procedure.
///
/// Nodes are stored in the order of their DEF_LOCALS commands, so all descendants of a node
/// follow it directly in the arena.
#[derive(Debug, Default)]
pub(crate) struct ScopeTree {
    nodes: Vec<ScopeNode>,
    open: Option<usize>,
}

impl ScopeTree {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// The innermost open region
    pub(crate) fn current(&self) -> Option<usize> {
        self.open
    }

    pub(crate) fn add_def_locals(&mut self, ip: u32) -> usize {
        let idx = self.nodes.len();
        self.nodes.push(ScopeNode {
            start_ip: ip,
            parent: self.open,
            last_sub_child: None,
        });
        self.open = Some(idx);
        idx
    }

    // end_def_locals()
    // Close the innermost region and pass its rightmost descendant on to the parent
    pub(crate) fn end_def_locals(&mut self) -> Option<usize> {
        let idx = self.open?;
        let node = &self.nodes[idx];
        let rightmost = node.last_sub_child.unwrap_or(idx);
        let parent = node.parent;
        if let Some(parent) = parent {
            self.nodes[parent].last_sub_child = Some(rightmost);
        }
        self.open = parent;
        Some(idx)
    }

    // contains()
    // True if `node` is `ancestor` or lies inside of it
    fn contains(&self, ancestor: usize, node: usize) -> bool {
        let last = self.nodes[ancestor].last_sub_child.unwrap_or(ancestor);
        node >= ancestor && node <= last
    }

    fn contains_opt(&self, ancestor: usize, node: Option<usize>) -> bool {
        node.is_some_and(|node| self.contains(ancestor, node))
    }

    // goto_from_to()
    // Leave regions upwards until the target lies inside, then enter the regions on the way down
    pub(crate) fn goto_from_to(&self, from: Option<usize>, to: Option<usize>) -> ScopeWalk {
        let mut walk = ScopeWalk::default();
        let mut common = from;
        while let Some(scope) = common {
            if self.contains_opt(scope, to) {
                break;
            }
            walk.pops += 1;
            common = self.nodes[scope].parent;
        }

        let mut path = Vec::new();
        let mut scope = to;
        while scope != common {
            let Some(idx) = scope else { break };
            path.push(self.nodes[idx].start_ip);
            scope = self.nodes[idx].parent;
        }
        path.reverse();
        walk.enter = path;
        walk
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A(10) { B(11) { C(12) } D(14) } E(20)
    fn build() -> ScopeTree {
        let mut tree = ScopeTree::new();
        assert_eq!(tree.add_def_locals(10), 0);
        tree.add_def_locals(11);
        tree.add_def_locals(12);
        assert_eq!(tree.current(), Some(2));
        assert_eq!(tree.end_def_locals(), Some(2));
        tree.end_def_locals();
        tree.add_def_locals(14);
        tree.end_def_locals();
        tree.end_def_locals();
        tree.add_def_locals(20);
        tree.end_def_locals();
        tree
    }

    #[test]
    fn structure() {
        let tree = build();
        assert!(tree.contains(0, 2));
        assert!(tree.contains(0, 3));
        assert!(!tree.contains(1, 3));
        assert!(!tree.contains(0, 4));
        assert_eq!(tree.current(), None);
    }

    #[test]
    fn walks() {
        let tree = build();
        // from C out to A
        let walk = tree.goto_from_to(Some(2), Some(0));
        assert_eq!(walk, ScopeWalk { pops: 2, enter: vec![] });
        // from C over to D
        let walk = tree.goto_from_to(Some(2), Some(3));
        assert_eq!(walk, ScopeWalk { pops: 2, enter: vec![14] });
        // from the top level into C
        let walk = tree.goto_from_to(None, Some(2));
        assert_eq!(walk, ScopeWalk { pops: 0, enter: vec![10, 11, 12] });
        // from D to E
        let walk = tree.goto_from_to(Some(3), Some(4));
        assert_eq!(walk, ScopeWalk { pops: 2, enter: vec![20] });
        // out of everything
        let walk = tree.goto_from_to(Some(1), None);
        assert_eq!(walk, ScopeWalk { pops: 2, enter: vec![] });
        // same region
        let walk = tree.goto_from_to(Some(1), Some(1));
        assert_eq!(walk, ScopeWalk::default());
    }
}
