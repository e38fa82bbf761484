//! Compact radix trie mapping tag value bytes to value ids.
//!
//! Wire form: `nodeCount:varint`, then nodes in breadth-first order, each
//! `labelLen:varint, label, flags:u8 (bit0 = has value), [valueId:u32le], childCount:varint`.
//! Children of a node are contiguous and sorted by their first label byte.

use std::collections::{BTreeMap, VecDeque};

use crate::encoding::{read_bytes, read_var_u32, read_var_u64, write_u32, write_var_u64};
use crate::error::DbError;
use crate::types::TagValueId;

const FLAG_HAS_VALUE: u8 = 0b0000_0001;

#[derive(Debug, Clone, Copy)]
struct Node {
    label_start: usize,
    label_len: usize,
    value: Option<TagValueId>,
    first_child: usize,
    child_count: usize,
}

/// Decoded, immutable trie. Nodes live in one arena, labels in one byte buffer.
#[derive(Debug, Clone)]
pub struct Trie {
    nodes: Vec<Node>,
    labels: Vec<u8>,
    values: usize,
}

impl Trie {
    /// Decodes a trie occupying exactly `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self, DbError> {
        let mut pos = 0usize;
        let node_count = read_var_u64(buf, &mut pos)? as usize;
        if node_count == 0 {
            return Err(DbError::corruption("Trie has no root node"));
        }
        // every node takes at least three bytes
        if node_count > buf.len() / 3 + 1 {
            return Err(DbError::corruption(format!(
                "Trie declares {} nodes in {} bytes",
                node_count,
                buf.len()
            )));
        }

        let mut nodes = Vec::with_capacity(node_count);
        let mut labels = Vec::new();
        let mut next_child = 1usize;
        let mut values = 0usize;

        for i in 0..node_count {
            if i > 0 && next_child <= i {
                return Err(DbError::corruption(format!("Trie node {} has no parent", i)));
            }
            let label_len = read_var_u64(buf, &mut pos)? as usize;
            if (i == 0) != (label_len == 0) {
                return Err(DbError::corruption(format!(
                    "Trie node {} has invalid label length {}",
                    i, label_len
                )));
            }
            let label = read_bytes(buf, &mut pos, label_len)?;
            let label_start = labels.len();
            labels.extend_from_slice(label);

            let flags = read_bytes(buf, &mut pos, 1)?[0];
            if flags & !FLAG_HAS_VALUE != 0 {
                return Err(DbError::corruption(format!(
                    "Trie node {} has unknown flags {:#04x}",
                    i, flags
                )));
            }
            let value = if flags & FLAG_HAS_VALUE != 0 {
                let b = read_bytes(buf, &mut pos, 4)?;
                values += 1;
                Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            } else {
                None
            };

            let child_count = read_var_u32(buf, &mut pos)? as usize;
            let first_child = next_child;
            next_child = next_child
                .checked_add(child_count)
                .filter(|&n| n <= node_count)
                .ok_or_else(|| {
                    DbError::corruption(format!("Trie node {} children exceed node count", i))
                })?;

            nodes.push(Node {
                label_start,
                label_len,
                value,
                first_child,
                child_count,
            });
        }

        if next_child != node_count {
            return Err(DbError::corruption("Trie child counts do not cover all nodes"));
        }
        if pos != buf.len() {
            return Err(DbError::corruption(format!(
                "Trie has {} trailing bytes",
                buf.len() - pos
            )));
        }

        let trie = Trie {
            nodes,
            labels,
            values,
        };
        for (i, node) in trie.nodes.iter().enumerate() {
            let firsts = trie.children(node).map(|c| trie.label(c)[0]);
            let mut prev: Option<u8> = None;
            for b in firsts {
                if prev.map_or(false, |p| p >= b) {
                    return Err(DbError::corruption(format!(
                        "Trie node {} children are not sorted",
                        i
                    )));
                }
                prev = Some(b);
            }
        }
        Ok(trie)
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.values
    }

    pub fn is_empty(&self) -> bool {
        self.values == 0
    }

    /// Exact lookup.
    pub fn get(&self, key: &[u8]) -> Option<TagValueId> {
        let mut node = &self.nodes[0];
        let mut rest = key;
        while !rest.is_empty() {
            let child = self.child_by_first(node, rest[0])?;
            let label = self.label(child);
            rest = rest.strip_prefix(label)?;
            node = child;
        }
        node.value
    }

    /// Lexicographic iteration over every entry whose key starts with `prefix`.
    pub fn iter_prefix(&self, prefix: &[u8]) -> TrieIter<'_> {
        let mut iter = TrieIter {
            trie: self,
            stack: Vec::new(),
            key: Vec::new(),
        };
        if let Some((idx, key)) = self.seek(prefix) {
            let label_len = self.nodes[idx].label_len;
            iter.stack.push((idx, key.len() - label_len));
            iter.key = key;
        }
        iter
    }

    pub fn iter(&self) -> TrieIter<'_> {
        self.iter_prefix(&[])
    }

    /// Visits entries under `prefix` in order until `visit` returns `false`.
    /// Returns `false` if the walk was stopped early.
    pub fn walk_prefix<F>(&self, prefix: &[u8], mut visit: F) -> bool
    where
        F: FnMut(&[u8], TagValueId) -> bool,
    {
        let mut iter = self.iter_prefix(prefix);
        while let Some(id) = iter.advance() {
            if !visit(&iter.key, id) {
                return false;
            }
        }
        true
    }

    /// Finds the shallowest node whose full key starts with `prefix`, with that key.
    fn seek(&self, prefix: &[u8]) -> Option<(usize, Vec<u8>)> {
        let mut idx = 0usize;
        let mut key = Vec::with_capacity(prefix.len());
        let mut rest = prefix;
        while !rest.is_empty() {
            let child = self.child_index_by_first(&self.nodes[idx], rest[0])?;
            let label = self.label(&self.nodes[child]);
            if rest.len() >= label.len() {
                rest = rest.strip_prefix(label)?;
            } else if label.starts_with(rest) {
                rest = &[];
            } else {
                return None;
            }
            key.extend_from_slice(label);
            idx = child;
        }
        Some((idx, key))
    }

    #[inline]
    fn label(&self, node: &Node) -> &[u8] {
        &self.labels[node.label_start..node.label_start + node.label_len]
    }

    fn children<'t>(&'t self, node: &Node) -> impl DoubleEndedIterator<Item = &'t Node> + 't {
        self.nodes[node.first_child..node.first_child + node.child_count].iter()
    }

    fn child_index_by_first(&self, node: &Node, first: u8) -> Option<usize> {
        let siblings = &self.nodes[node.first_child..node.first_child + node.child_count];
        siblings
            .binary_search_by_key(&first, |c| self.label(c)[0])
            .ok()
            .map(|i| node.first_child + i)
    }

    fn child_by_first(&self, node: &Node, first: u8) -> Option<&Node> {
        self.child_index_by_first(node, first)
            .map(|i| &self.nodes[i])
    }
}

/// Depth-first, lexicographic iterator yielding `(key, value id)`.
#[derive(Debug, Clone)]
pub struct TrieIter<'t> {
    trie: &'t Trie,
    // (node index, key length before the node's label)
    stack: Vec<(usize, usize)>,
    key: Vec<u8>,
}

impl<'t> TrieIter<'t> {
    /// Advances to the next entry; the key is then readable via [`TrieIter::key`].
    fn advance(&mut self) -> Option<TagValueId> {
        while let Some((idx, parent_len)) = self.stack.pop() {
            let node = &self.trie.nodes[idx];
            self.key.truncate(parent_len);
            self.key.extend_from_slice(self.trie.label(node));
            let key_len = self.key.len();
            for child in (node.first_child..node.first_child + node.child_count).rev() {
                self.stack.push((child, key_len));
            }
            if let Some(v) = node.value {
                return Some(v);
            }
        }
        None
    }

    /// Key of the most recently yielded entry.
    pub fn key(&self) -> &[u8] {
        &self.key
    }
}

impl<'t> Iterator for TrieIter<'t> {
    type Item = (Vec<u8>, TagValueId);

    fn next(&mut self) -> Option<Self::Item> {
        self.advance().map(|id| (self.key.clone(), id))
    }
}

#[derive(Debug, Default)]
struct BuildNode {
    value: Option<TagValueId>,
    children: BTreeMap<u8, BuildNode>,
}

/// Accumulates `(key, id)` pairs and encodes them as a compressed trie.
#[derive(Debug, Default)]
pub struct TrieBuilder {
    root: BuildNode,
    len: usize,
}

impl TrieBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the id for `key`.
    pub fn insert(&mut self, key: &[u8], id: TagValueId) {
        let mut node = &mut self.root;
        for &b in key {
            node = node.children.entry(b).or_default();
        }
        if node.value.replace(id).is_none() {
            self.len += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        let mut flat: Vec<(Vec<u8>, &BuildNode)> = Vec::new();
        let mut queue: VecDeque<(Vec<u8>, &BuildNode)> = VecDeque::new();
        queue.push_back((Vec::new(), &self.root));
        while let Some((label, node)) = queue.pop_front() {
            for (&b, child) in &node.children {
                queue.push_back(compress_edge(b, child));
            }
            flat.push((label, node));
        }

        write_var_u64(out, flat.len() as u64);
        for (label, node) in flat {
            write_var_u64(out, label.len() as u64);
            out.extend_from_slice(&label);
            match node.value {
                Some(id) => {
                    out.push(FLAG_HAS_VALUE);
                    write_u32(out, id);
                }
                None => out.push(0),
            }
            write_var_u64(out, node.children.len() as u64);
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }
}

/// Folds a chain of valueless single-child nodes into one label.
fn compress_edge(first: u8, child: &BuildNode) -> (Vec<u8>, &BuildNode) {
    let mut label = vec![first];
    let mut node = child;
    while node.value.is_none() && node.children.len() == 1 {
        match node.children.iter().next() {
            Some((&b, next)) => {
                label.push(b);
                node = next;
            }
            None => break,
        }
    }
    (label, node)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(entries: &[(&str, u32)]) -> Trie {
        let mut b = TrieBuilder::new();
        for (k, v) in entries {
            b.insert(k.as_bytes(), *v);
        }
        Trie::decode(&b.encode()).unwrap()
    }

    fn keys(iter: TrieIter<'_>) -> Vec<String> {
        iter.map(|(k, _)| String::from_utf8(k).unwrap()).collect()
    }

    #[test]
    fn exact_lookup() {
        let t = build(&[("nj", 1), ("sh", 2), ("shanghai", 3), ("", 9)]);
        assert_eq!(t.len(), 4);
        assert_eq!(t.get(b"sh"), Some(2));
        assert_eq!(t.get(b"shanghai"), Some(3));
        assert_eq!(t.get(b""), Some(9));
        assert_eq!(t.get(b"shang"), None);
        assert_eq!(t.get(b"bj"), None);
        assert_eq!(t.get(b"shanghai2"), None);
    }

    #[test]
    fn iteration_is_lexicographic() {
        let t = build(&[("b", 1), ("abc", 2), ("ab", 3), ("a", 4), ("abd", 5), ("ba", 6)]);
        assert_eq!(keys(t.iter()), vec!["a", "ab", "abc", "abd", "b", "ba"]);
    }

    #[test]
    fn prefix_can_end_inside_a_label() {
        let t = build(&[("eleme-dev-sh-4", 4), ("eleme-dev-sh-5", 5), ("eleme-dev-nj-1", 1)]);
        assert_eq!(
            keys(t.iter_prefix(b"eleme-dev-s")),
            vec!["eleme-dev-sh-4", "eleme-dev-sh-5"]
        );
        assert_eq!(keys(t.iter_prefix(b"ele")).len(), 3);
        assert!(keys(t.iter_prefix(b"eleme-prod")).is_empty());
    }

    #[test]
    fn walk_stops_when_visitor_declines() {
        let t = build(&[("a", 1), ("b", 2), ("c", 3), ("d", 4)]);
        let mut seen = Vec::new();
        let finished = t.walk_prefix(b"", |k, id| {
            seen.push((k.to_vec(), id));
            seen.len() < 2
        });
        assert!(!finished);
        assert_eq!(seen, vec![(b"a".to_vec(), 1), (b"b".to_vec(), 2)]);
    }

    #[test]
    fn empty_builder_encodes_root_only() {
        let t = Trie::decode(&TrieBuilder::new().encode()).unwrap();
        assert!(t.is_empty());
        assert_eq!(t.iter().count(), 0);
    }

    #[test]
    fn self_parenting_node_is_rejected() {
        // root without children followed by a node claiming itself as child
        let mut buf = Vec::new();
        write_var_u64(&mut buf, 2);
        buf.extend_from_slice(&[0, 0, 0]);
        buf.extend_from_slice(&[1, b'a', 0, 1]);
        assert!(Trie::decode(&buf).unwrap_err().is_corruption());
    }

    #[test]
    fn unsorted_siblings_are_rejected() {
        let mut buf = Vec::new();
        write_var_u64(&mut buf, 3);
        buf.extend_from_slice(&[0, 0, 2]);
        buf.extend_from_slice(&[1, b'b', 0, 0]);
        buf.extend_from_slice(&[1, b'a', 0, 0]);
        assert!(Trie::decode(&buf).unwrap_err().is_corruption());
    }

    #[test]
    fn truncation_is_corruption() {
        let mut b = TrieBuilder::new();
        b.insert(b"host-1", 1);
        b.insert(b"host-2", 2);
        let buf = b.encode();
        for cut in 0..buf.len() {
            assert!(Trie::decode(&buf[..cut]).is_err(), "cut at {cut}");
        }
    }
}
