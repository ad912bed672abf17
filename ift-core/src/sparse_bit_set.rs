//! Compact serialization of integer sets as a breadth first bit tree.
//!
//! A sparse bit set stores a set of small non negative integers as a tree of
//! fixed branching factor written breadth first. Bit `k` of a node is set iff
//! the subtree rooted at child `k` contains at least one element; leaf bits
//! correspond to individual elements. Sets are encoded with branching factor
//! 8 (one byte per node); the decoder additionally accepts branching factors
//! 2, 4 and 32 as well as the all-zero "filled subtree" node command.
//!
//! The decoder reports how many bytes of the input it consumed so callers can
//! resume reading a larger structure immediately after the set.

use std::collections::{BTreeMap, VecDeque};

use read_fonts::collections::IntSet;

use crate::error::IftError;
use crate::input_bit_stream::InputBitStream;
use crate::output_bit_stream::OutputBitStream;

const BRANCH_FACTOR: u32 = 8;

/// Encodes the set as sparse bit set bytes.
///
/// Deterministic: the same set always produces the same bytes. The empty set
/// encodes to the empty byte string.
pub fn encode_sparse_bit_set(set: &IntSet<u32>) -> Vec<u8> {
    let Some(max_value) = set.last() else {
        return Vec::new();
    };
    let height = tree_height_for(max_value);

    // Build the tree one level at a time, leaves first. Each level maps a
    // node's index within that level to its child bits; the node indices of
    // one level are the values grouped at the level above.
    let mut levels: Vec<BTreeMap<u32, u8>> = Vec::with_capacity(height as usize);
    let mut values: Vec<u32> = set.iter().collect();
    for _ in 0..height {
        let mut nodes: BTreeMap<u32, u8> = BTreeMap::new();
        for v in &values {
            *nodes.entry(v / BRANCH_FACTOR).or_insert(0) |= 1u8 << (v % BRANCH_FACTOR);
        }
        values = nodes.keys().copied().collect();
        levels.push(nodes);
    }

    // The wire order is root first; within a level nodes appear in ascending
    // index order, which is exactly the map order.
    let mut os = OutputBitStream::new(height);
    for level in levels.iter().rev() {
        for bits in level.values() {
            os.write_node(*bits);
        }
    }
    os.into_bytes()
}

/// Decodes a sparse bit set from the front of `data`.
///
/// Returns the decoded set and the number of bytes consumed; `data` may
/// contain trailing bytes which are ignored. An empty input decodes to the
/// empty set. Truncated input is an error.
pub fn decode_sparse_bit_set(data: &[u8]) -> Result<(IntSet<u32>, usize), IftError> {
    let mut out = IntSet::<u32>::empty();
    if data.is_empty() {
        return Ok((out, 0));
    }

    let mut bits = InputBitStream::from(data);

    let branch_factor = bits
        .read_branch_factor()
        .ok_or(IftError::NotEnoughInput("sparse bit set header"))?;
    let height = bits
        .read_bits(5)
        .ok_or(IftError::NotEnoughInput("sparse bit set header"))?;

    if height == 0 {
        return Ok((out, bits.bytes_consumed()));
    }

    // Bit 8 of the header byte is padding.
    let _ = bits.read_bits(1);

    let mut queue = VecDeque::<NextNode>::new();
    queue.push_back(NextNode { start: 0, depth: 1 });

    while let Some(next) = queue.pop_front() {
        let child_width = subtree_width(branch_factor as u64, height - next.depth);
        let node = bits
            .read_bits(branch_factor)
            .ok_or(IftError::NotEnoughInput("sparse bit set nodes"))?;

        if node == 0 {
            // An all zero node is a command to completely fill in all
            // integers covered by this node.
            let end = next
                .start
                .saturating_add(child_width.saturating_mul(branch_factor as u64))
                - 1;
            if end > u32::MAX as u64 {
                return Err(IftError::InvalidFormat(
                    "sparse bit set value exceeds the u32 range",
                ));
            }
            out.insert_range(next.start as u32..=end as u32);
            continue;
        }

        // Walk the set bits of the node, lowest first.
        let mut remaining = node;
        while remaining != 0 {
            let index = remaining.trailing_zeros() as u64;
            remaining &= remaining - 1;

            let start = next.start + index * child_width;
            if start > u32::MAX as u64 {
                return Err(IftError::InvalidFormat(
                    "sparse bit set value exceeds the u32 range",
                ));
            }

            if next.depth == height {
                out.insert(start as u32);
            } else {
                queue.push_back(NextNode {
                    start,
                    depth: next.depth + 1,
                });
            }
        }
    }

    Ok((out, bits.bytes_consumed()))
}

/// Width of a subtree whose root sits `levels_below` levels above the leaves.
///
/// Saturates past the u32 range; the decode loop errors on any set bit that
/// would land there, so the exact magnitude doesn't matter.
fn subtree_width(branch_factor: u64, levels_below: u32) -> u64 {
    let mut width = 1u64;
    for _ in 0..levels_below {
        width = width.saturating_mul(branch_factor);
    }
    width
}

fn tree_height_for(max_value: u32) -> u8 {
    // A tree of height H can represent up to 8^H - 1.
    let mut height: u8 = 0;
    let mut max_value = max_value;
    loop {
        height += 1;
        max_value >>= 3;
        if max_value == 0 {
            break height;
        }
    }
}

struct NextNode {
    start: u64,
    depth: u32,
}
