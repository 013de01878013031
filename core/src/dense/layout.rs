//! The shape of a dense Merkle tree.
//!
//! Leaves are never padded. When a layer holds an odd number of nodes, its last node is carried
//! up unhashed and later paired with the last node of the next odd-sized layer above. The layer
//! sizes follow from repeatedly halving the leaf count, rounding down while no carried node is
//! pending and up while one is.
//!
//! Layer 0 holds the leaves and layer `height - 1` holds the root alone.

use core::fmt;

use alloc::vec::Vec;

/// The location of a node: its layer and its position within the layer, left-to-right.
///
/// Locations order by layer first, so the lowest location of a set is the deepest leftmost one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(
    feature = "borsh",
    derive(borsh::BorshDeserialize, borsh::BorshSerialize)
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeLocation {
    /// The layer. Zero for leaves.
    pub layer_index: u8,
    /// The position within the layer.
    pub node_index: u32,
}

impl NodeLocation {
    /// Create a new location.
    pub const fn new(layer_index: u8, node_index: u32) -> Self {
        NodeLocation {
            layer_index,
            node_index,
        }
    }

    /// The location of the leaf at `index`.
    pub const fn leaf(index: u32) -> Self {
        NodeLocation::new(0, index)
    }
}

impl fmt::Display for NodeLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.layer_index, self.node_index)
    }
}

/// The side a node takes relative to the node it is paired with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeSide {
    /// The left child of the common parent.
    Left,
    /// The right child of the common parent.
    Right,
}

impl NodeSide {
    /// The side of `pair` when combined with `node`.
    ///
    /// A pair in the same layer sits on the side of its index. A pair in a lower layer is a
    /// carried node and always sits on the right, a pair in a higher layer on the left.
    pub fn of_pair(node: NodeLocation, pair: NodeLocation) -> Self {
        if pair.layer_index == node.layer_index {
            if pair.node_index > node.node_index {
                NodeSide::Right
            } else {
                NodeSide::Left
            }
        } else if pair.layer_index < node.layer_index {
            NodeSide::Right
        } else {
            NodeSide::Left
        }
    }
}

/// The height of a tree with `size` leaves: `ceil(log2(size)) + 1`, or zero for an empty tree.
pub fn height(size: u32) -> u8 {
    if size == 0 {
        return 0;
    }
    let ceil_log2 = u32::BITS - (size - 1).leading_zeros();
    ceil_log2 as u8 + 1
}

/// The number of nodes living in `layer` of a tree with `size` leaves.
pub fn layer_size(layer: u8, size: u32) -> u32 {
    let (mut max, mut carried) = (size, 0u32);
    for _ in 0..layer {
        let next = if carried % 2 == 0 {
            max / 2
        } else {
            max / 2 + max % 2
        };
        carried += max % 2;
        max = next;
    }
    max
}

/// The sizes of every layer of a tree with `size` leaves, from the leaves up to the root.
pub fn layer_structure(size: u32) -> Vec<u32> {
    (0..height(size)).map(|layer| layer_size(layer, size)).collect()
}

/// The location of the root of a non-empty tree.
pub fn root_location(size: u32) -> NodeLocation {
    NodeLocation::new(height(size).saturating_sub(1), 0)
}

/// Whether `location` exists in a tree with `size` leaves.
pub fn contains(location: NodeLocation, size: u32) -> bool {
    location.layer_index < height(size)
        && location.node_index < layer_size(location.layer_index, size)
}

/// Find the node which `location` is combined with to form its parent.
///
/// The root is its own pair. Returns `None` when the location lies outside the tree.
pub fn pair_location(location: NodeLocation, size: u32) -> Option<NodeLocation> {
    pair_within(&layer_structure(size), location)
}

/// [`pair_location`] against a precomputed [`layer_structure`].
pub(crate) fn pair_within(structure: &[u32], location: NodeLocation) -> Option<NodeLocation> {
    let layer = location.layer_index as usize;
    let index = location.node_index;
    let height = structure.len();
    let count = *structure.get(layer)?;
    if index >= count {
        return None;
    }

    if layer + 1 == height {
        return Some(NodeLocation::new(location.layer_index, 0));
    }

    let is_left = index % 2 == 0;
    if is_left && index < count - 1 {
        return Some(NodeLocation::new(location.layer_index, index + 1));
    }
    if !is_left && ((count % 2 == 0 && index == count - 1) || index < count - 1) {
        return Some(NodeLocation::new(location.layer_index, index - 1));
    }

    // the last node of an odd layer. every odd layer below either carries a node up or consumes
    // the one carried to it, so the parity of their number tells which way the partner lies.
    let odd_layers_below = structure[..layer].iter().filter(|&&n| n % 2 == 1).count();
    let is_odd = |l: &usize| structure[*l] % 2 == 1;
    let pair_layer = if odd_layers_below % 2 == 0 {
        (layer + 1..height).find(is_odd)
    } else {
        (0..layer).rev().find(is_odd)
    }?;

    Some(NodeLocation::new(
        pair_layer as u8,
        structure[pair_layer] - 1,
    ))
}

/// The location of the parent of two paired nodes.
pub fn parent_location(a: NodeLocation, b: NodeLocation) -> NodeLocation {
    NodeLocation::new(
        core::cmp::max(a.layer_index, b.layer_index) + 1,
        core::cmp::min(a.node_index / 2, b.node_index / 2),
    )
}
