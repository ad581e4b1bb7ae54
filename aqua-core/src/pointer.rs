//! Memory pointer tree.
//!
//! Walks a compiled [`Layout`] over the absolute byte range of the region and
//! produces one [`FieldNode`] per field element. Repeated fields become
//! sibling nodes that share a [`PackCode`] but own distinct byte ranges.

use crate::error::{AquaError, Result};
use crate::layout::{CompiledField, Layout, PackCode, ScalarValue};
use serde::Serialize;
use std::ops::Range;

/// Ordered `name -> elements` children of a node.
pub type Children = Vec<(String, Vec<FieldNode>)>;

/// One element of a field, addressed by absolute byte range.
#[derive(Debug, Clone)]
pub struct FieldNode {
    /// Pack code of this element.
    pub pack: PackCode,
    /// Absolute byte range within the region.
    pub range: Range<usize>,
    children: Children,
}

impl FieldNode {
    /// Elements of a child field.
    pub fn children(&self, name: &str) -> Option<&[FieldNode]> {
        lookup(&self.children, name)
    }

    /// Element `index` of a child field.
    pub fn child(&self, name: &str, index: usize) -> Option<&FieldNode> {
        self.children(name).and_then(|nodes| nodes.get(index))
    }

    /// Like [`child`](Self::child) but reports a missing field as an error.
    pub fn require(&self, name: &str, index: usize) -> Result<&FieldNode> {
        self.child(name, index).ok_or_else(|| AquaError::LayoutRole {
            field: format!("{}[{}]", name, index),
            cause: "field not present".to_string(),
        })
    }

    /// Child fields in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &[FieldNode])> {
        self.children.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Whether this element is a scalar.
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.range.len()
    }

    /// Whether the node covers no bytes.
    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    /// Range relative to `base`, e.g. the start of the enclosing frame slot.
    pub fn relative_to(&self, base: usize) -> Range<usize> {
        (self.range.start - base)..(self.range.end - base)
    }

    /// Decode this element from its bytes.
    pub fn unpack(&self, bytes: &[u8]) -> Result<Vec<ScalarValue>> {
        self.pack.unpack(bytes)
    }

    /// Encode values for this element.
    pub fn pack(&self, values: &[ScalarValue]) -> Result<Vec<u8>> {
        self.pack.pack(values)
    }

    fn collect_leaves(&self, out: &mut Vec<Range<usize>>) {
        if self.is_leaf() {
            out.push(self.range.clone());
            return;
        }
        for (_, nodes) in &self.children {
            for node in nodes {
                node.collect_leaves(out);
            }
        }
    }
}

/// Addressable tree over the whole region.
#[derive(Debug, Clone)]
pub struct PointerTree {
    base: usize,
    end: usize,
    fields: Children,
}

/// One line of [`PointerTree::summary`].
#[derive(Debug, Clone, Serialize)]
pub struct FieldSummary {
    /// Root field name.
    pub name: String,
    /// Number of elements.
    pub count: usize,
    /// Pack code of one element.
    pub pack: String,
    /// Size of one element in bytes.
    pub elem_size: usize,
    /// Absolute byte range of each element.
    pub ranges: Vec<[usize; 2]>,
}

impl PointerTree {
    /// Build the tree for a layout, starting at `SHM_OFFSET`.
    ///
    /// Offsets cannot overflow: the compiler only produces layouts whose
    /// element counts and byte ranges fit inside `SHM_SIZE`.
    pub fn build(layout: &Layout) -> Self {
        let base = layout.base_offset();
        Self {
            base,
            end: layout.end_offset(),
            fields: build_children(layout, layout.root_fields(), base),
        }
    }

    /// Absolute offset of the first root field.
    pub fn base(&self) -> usize {
        self.base
    }

    /// Absolute offset one past the last root field.
    pub fn end(&self) -> usize {
        self.end
    }

    /// Elements of a root field.
    pub fn field(&self, name: &str) -> Option<&[FieldNode]> {
        lookup(&self.fields, name)
    }

    /// Element `index` of a root field.
    pub fn node(&self, name: &str, index: usize) -> Option<&FieldNode> {
        self.field(name).and_then(|nodes| nodes.get(index))
    }

    /// Elements of a root field, or an error naming the field.
    pub fn require(&self, name: &str) -> Result<&[FieldNode]> {
        self.field(name).ok_or_else(|| AquaError::LayoutRole {
            field: name.to_string(),
            cause: "not a root layout field".to_string(),
        })
    }

    /// Root fields in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &[FieldNode])> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Byte ranges of every scalar leaf, in pre-order.
    pub fn ranges(&self) -> Vec<Range<usize>> {
        let mut out = Vec::new();
        for (_, nodes) in &self.fields {
            for node in nodes {
                node.collect_leaves(&mut out);
            }
        }
        out
    }

    /// Per-root-field summary for inspection.
    pub fn summary(&self) -> Vec<FieldSummary> {
        self.fields
            .iter()
            .map(|(name, nodes)| FieldSummary {
                name: name.clone(),
                count: nodes.len(),
                pack: nodes.first().map(|n| n.pack.to_string()).unwrap_or_default(),
                elem_size: nodes.first().map(FieldNode::len).unwrap_or(0),
                ranges: nodes.iter().map(|n| [n.range.start, n.range.end]).collect(),
            })
            .collect()
    }
}

fn lookup<'a>(children: &'a Children, name: &str) -> Option<&'a [FieldNode]> {
    children
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_slice())
}

fn build_children(layout: &Layout, fields: &[CompiledField], start: usize) -> Children {
    fields
        .iter()
        .map(|field| {
            let nodes = (0..field.count)
                .map(|i| {
                    let elem_start = start + field.element_offset(i);
                    let children = match layout.struct_of(field) {
                        Some(s) => build_children(layout, &s.fields, elem_start),
                        None => Vec::new(),
                    };
                    FieldNode {
                        pack: field.pack.clone(),
                        range: elem_start..elem_start + field.elem_size,
                        children,
                    }
                })
                .collect();
            (field.name.clone(), nodes)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaDocument;
    use serde_json::json;

    fn layout() -> Layout {
        let doc: SchemaDocument = serde_json::from_value(json!({
            "global": {
                "SHM_SIZE": 64, "SHM_OFFSET": 4, "SHM_N_FRAME": 2, "SHM_FRAME_MASK": 1,
                "SHM_N_BIN": 2, "RESERVOIR_N_BIN": 2
            },
            "map": {
                "pack_codes": {"u8": "B", "u32": "I", "f32": "f"},
                "byte_sizes": {"u8": 1, "u32": 4, "f32": 4}
            },
            "vpp": {"struct": {
                "pair": [["f32", "t", 1, "", 0.0], ["u32", "v", 1, "", 0]]
            }},
            "layout": [
                ["u8", "n", 1, "", 0],
                ["pair", "pairs", "SHM_N_BIN", "", 0],
                ["u32", "tail", 3, "", 0]
            ]
        }))
        .unwrap();
        Layout::compile(&doc).unwrap()
    }

    #[test]
    fn repeated_fields_become_siblings() {
        let tree = PointerTree::build(&layout());
        let pairs = tree.field("pairs").unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].range, 5..13);
        assert_eq!(pairs[1].range, 13..21);
        assert_eq!(pairs[0].pack, pairs[1].pack);
        assert_eq!(pairs[1].child("v", 0).unwrap().range, 17..21);
        assert_eq!(pairs[1].child("v", 0).unwrap().relative_to(13), 4..8);
        assert!(tree.node("pairs", 2).is_none());
        assert!(tree.require("missing").is_err());
    }

    #[test]
    fn leaves_tile_layout_without_gaps() {
        let layout = layout();
        let tree = PointerTree::build(&layout);
        let ranges = tree.ranges();
        assert_eq!(ranges.first().unwrap().start, layout.base_offset());
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        assert_eq!(ranges.last().unwrap().end, layout.end_offset());
    }

    #[test]
    fn node_pack_roundtrip() {
        let tree = PointerTree::build(&layout());
        let node = tree.node("pairs", 0).unwrap();
        let bytes = node.pack(&[ScalarValue::F32(0.5), ScalarValue::U32(9)]).unwrap();
        assert_eq!(bytes.len(), node.len());
        let values = node.unpack(&bytes).unwrap();
        assert_eq!(values, vec![ScalarValue::F32(0.5), ScalarValue::U32(9)]);
    }

    #[test]
    fn summary_lists_root_fields() {
        let summary = PointerTree::build(&layout()).summary();
        let names: Vec<_> = summary.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["n", "pairs", "tail"]);
        assert_eq!(summary[1].pack, "fI");
        assert_eq!(summary[2].ranges, vec![[21, 25], [25, 29], [29, 33]]);
    }
}
