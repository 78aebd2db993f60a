//! Immediate dominators of a directed graph, and the retained sizes they
//! induce on a heap graph.
//!
//! The dominator computation is the Lengauer-Tarjan algorithm with simple
//! path compression. Heap graphs have reference chains far deeper than the
//! native stack allows, so both the depth first search and the path
//! compression use explicit stacks.

mod retained;

pub(crate) use retained::compute_retained_sizes;

use fixedbitset::FixedBitSet;

const NONE: usize = usize::MAX;

/// Compute the immediate dominator of every node reachable from `root`.
///
/// Nodes are `0..num_nodes`. `successors` is called once for every
/// reachable node. The result is indexed by node; the root and unreachable
/// nodes have no dominator.
pub fn compute_dominators<F, I>(num_nodes: usize, root: usize, mut successors: F) -> Vec<Option<usize>>
where
    F: FnMut(usize) -> I,
    I: IntoIterator<Item = usize>,
{
    let mut result = vec![None; num_nodes];
    if root >= num_nodes {
        return result;
    }

    // Depth first numbering. Everything below works on dfs numbers rather
    // than node ids; `vertex` maps them back.
    let mut dfnum = vec![NONE; num_nodes];
    let mut vertex: Vec<usize> = vec![];
    let mut parent: Vec<usize> = vec![];
    let mut edges: Vec<(usize, usize)> = vec![];
    let mut visited = FixedBitSet::with_capacity(num_nodes);
    let mut stack = vec![(root, NONE)];
    while let Some((node, from)) = stack.pop() {
        if visited.put(node) {
            continue;
        }
        let n = vertex.len();
        dfnum[node] = n;
        vertex.push(node);
        parent.push(from);
        let mut succs: Vec<usize> = successors(node).into_iter().collect();
        for s in &succs {
            edges.push((n, *s));
        }
        // Reverse so the first successor is explored first
        succs.reverse();
        for s in succs {
            if !visited.contains(s) {
                stack.push((s, n));
            }
        }
    }

    let n = vertex.len();
    let mut preds: Vec<Vec<usize>> = vec![vec![]; n];
    for (from, to) in edges {
        preds[dfnum[to]].push(from);
    }

    let mut semi: Vec<usize> = (0..n).collect();
    let mut idom = vec![NONE; n];
    let mut ancestor = vec![NONE; n];
    let mut label: Vec<usize> = (0..n).collect();
    let mut bucket: Vec<Vec<usize>> = vec![vec![]; n];
    let mut compress_stack = vec![];

    for w in (1..n).rev() {
        for &v in &preds[w] {
            let u = eval(v, &mut ancestor, &mut label, &semi, &mut compress_stack);
            if semi[u] < semi[w] {
                semi[w] = semi[u];
            }
        }
        bucket[semi[w]].push(w);
        let p = parent[w];
        ancestor[w] = p;
        for v in std::mem::take(&mut bucket[p]) {
            let u = eval(v, &mut ancestor, &mut label, &semi, &mut compress_stack);
            idom[v] = if semi[u] < semi[v] { u } else { p };
        }
    }
    for w in 1..n {
        if idom[w] != semi[w] {
            idom[w] = idom[idom[w]];
        }
    }

    for w in 1..n {
        result[vertex[w]] = Some(vertex[idom[w]]);
    }
    result
}

fn eval(
    v: usize,
    ancestor: &mut [usize],
    label: &mut [usize],
    semi: &[usize],
    stack: &mut Vec<usize>,
) -> usize {
    if ancestor[v] == NONE {
        return v;
    }
    compress(v, ancestor, label, semi, stack);
    label[v]
}

fn compress(
    v: usize,
    ancestor: &mut [usize],
    label: &mut [usize],
    semi: &[usize],
    stack: &mut Vec<usize>,
) {
    // Collect the chain of nodes to compress, then update it from the top
    // of the forest downwards
    debug_assert!(stack.is_empty());
    let mut x = v;
    while ancestor[ancestor[x]] != NONE {
        stack.push(x);
        x = ancestor[x];
    }
    while let Some(x) = stack.pop() {
        let a = ancestor[x];
        if semi[label[a]] < semi[label[x]] {
            label[x] = label[a];
        }
        ancestor[x] = ancestor[a];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dominators(num_nodes: usize, edges: &[(usize, usize)]) -> Vec<Option<usize>> {
        let mut succs = vec![vec![]; num_nodes];
        for (a, b) in edges {
            succs[*a].push(*b);
        }
        compute_dominators(num_nodes, 0, |n| succs[n].clone())
    }

    #[test]
    fn test_chain() {
        let idom = dominators(4, &[(0, 1), (1, 2), (2, 3)]);
        assert_eq!(idom, vec![None, Some(0), Some(1), Some(2)]);
    }

    #[test]
    fn test_diamond() {
        //   0
        //  / \
        // 1   2
        //  \ /
        //   3
        let idom = dominators(4, &[(0, 1), (0, 2), (1, 3), (2, 3)]);
        assert_eq!(idom, vec![None, Some(0), Some(0), Some(0)]);
    }

    #[test]
    fn test_unreachable_nodes() {
        let idom = dominators(4, &[(0, 1), (2, 3), (3, 1)]);
        assert_eq!(idom, vec![None, Some(0), None, None]);
    }

    #[test]
    fn test_cycle() {
        // 0 -> 1 -> 2 -> 3 -> 1, 2 -> 4, 0 -> 4
        let idom = dominators(5, &[(0, 1), (1, 2), (2, 3), (3, 1), (2, 4), (0, 4)]);
        assert_eq!(idom, vec![None, Some(0), Some(1), Some(2), Some(0)]);
    }

    #[test]
    fn test_classic_lengauer_tarjan_graph() {
        // The example graph from the Lengauer-Tarjan paper, with
        // R=0 A=1 B=2 C=3 D=4 E=5 F=6 G=7 H=8 I=9 J=10 K=11 L=12
        let edges = [
            (0, 1),
            (0, 2),
            (0, 3),
            (1, 4),
            (2, 1),
            (2, 4),
            (2, 5),
            (3, 6),
            (3, 7),
            (4, 12),
            (5, 8),
            (6, 9),
            (7, 9),
            (7, 10),
            (8, 5),
            (8, 11),
            (9, 11),
            (10, 9),
            (11, 9),
            (11, 0),
            (12, 8),
        ];
        let idom = dominators(13, &edges);
        let expected = [
            None,
            Some(0),
            Some(0),
            Some(0),
            Some(0),
            Some(0),
            Some(3),
            Some(3),
            Some(0),
            Some(0),
            Some(7),
            Some(0),
            Some(4),
        ];
        assert_eq!(idom, expected.to_vec());
    }

    #[test]
    fn test_deep_chain_does_not_overflow() {
        let n = 1_000_000;
        let idom = compute_dominators(n, 0, |i| if i + 1 < n { vec![i + 1] } else { vec![] });
        assert_eq!(idom[n - 1], Some(n - 2));
        assert_eq!(idom[1], Some(0));
    }
}
