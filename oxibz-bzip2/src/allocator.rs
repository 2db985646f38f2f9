//! Length-restricted canonical Huffman code length allocation.
//!
//! Code lengths are computed in O(n) from an ascending frequency array using
//! the in-place method of Milidiú, Pessoa and Laber ("In-place
//! Length-Restricted Prefix Coding"). The implicit Huffman tree is built with
//! extended parent pointers, the number of internal nodes that break the
//! length bound is found by a search over those pointers, and the lengths
//! are then assigned either directly or with the excess nodes relocated to a
//! shallower insertion depth.
//!
//! Each slot of the working buffer passes through three meanings (merge
//! weight, parent pointer, final length); they are kept apart with [`Slot`]
//! rather than by overloading a single integer.

/// One entry of the allocator's working buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    /// A leaf frequency or the accumulated weight of an internal node.
    Weight(u32),
    /// The internal node this node was merged into; `second` is set when
    /// it was the second child taken for that merge.
    Parent { node: usize, second: bool },
    /// An allocated code length.
    Length(u32),
}

impl Slot {
    /// Integer encoding of the slot; a second-child parent pointer is
    /// offset by the buffer length so `% len` recovers the node index.
    #[inline]
    fn raw(self, len: usize) -> usize {
        match self {
            Slot::Weight(weight) => weight as usize,
            Slot::Parent { node, second } => node + if second { len } else { 0 },
            Slot::Length(length) => length as usize,
        }
    }

    #[inline]
    fn weight(self) -> u32 {
        match self {
            Slot::Weight(weight) => weight,
            other => unreachable!("expected a node weight, found {:?}", other),
        }
    }
}

struct Allocator {
    slots: Vec<Slot>,
}

impl Allocator {
    #[inline]
    fn len(&self) -> isize {
        self.slots.len() as isize
    }

    #[inline]
    fn weight(&self, index: usize) -> u32 {
        self.slots[index].weight()
    }

    /// Parent node index stored at `index`.
    #[inline]
    fn parent(&self, index: isize) -> isize {
        let len = self.slots.len();
        (self.slots[index as usize].raw(len) % len) as isize
    }

    /// The smallest `k` in `nodes_to_move..=i` whose parent lies beyond `i`.
    fn first(&self, mut i: isize, nodes_to_move: isize) -> isize {
        let limit = i;
        let mut k = self.len() - 2;

        while i >= nodes_to_move && self.parent(i) > limit {
            k = i;
            i -= limit - i + 1;
        }
        i = i.max(nodes_to_move - 1);

        while k > i + 1 {
            let mid = (i + k) >> 1;
            if self.parent(mid) > limit {
                k = mid;
            } else {
                i = mid;
            }
        }

        k
    }

    /// Pass 1: merge nodes bottom-up, leaving parent pointers behind.
    fn set_extended_parent_pointers(&mut self) {
        let len = self.slots.len();

        self.slots[0] = Slot::Weight(self.weight(0) + self.weight(1));

        let mut head = 0;
        let mut top = 2;
        for tail in 1..len - 1 {
            let mut merged;
            if top >= len || self.weight(head) < self.weight(top) {
                merged = self.weight(head);
                self.slots[head] = Slot::Parent {
                    node: tail,
                    second: false,
                };
                head += 1;
            } else {
                merged = self.weight(top);
                top += 1;
            }

            if top >= len || (head < tail && self.weight(head) < self.weight(top)) {
                merged += self.weight(head);
                self.slots[head] = Slot::Parent {
                    node: tail,
                    second: true,
                };
                head += 1;
            } else {
                merged += self.weight(top);
                top += 1;
            }

            self.slots[tail] = Slot::Weight(merged);
        }
    }

    /// Pass 2: number of internal nodes to relocate to honour `max_length`.
    fn find_nodes_to_relocate(&self, max_length: isize) -> isize {
        let mut current = self.len() - 2;
        let mut depth = 1;
        while depth < max_length - 1 && current > 1 {
            current = self.first(current - 1, 0);
            depth += 1;
        }
        current
    }

    /// Pass 3, unrestricted: assign each leaf the depth of its level.
    fn allocate_node_lengths(&mut self) {
        let mut first_node = self.len() - 2;
        let mut next_node = self.len() - 1;

        let mut depth = 1;
        let mut available = 2;
        while available > 0 {
            let last_node = first_node;
            first_node = self.first(last_node - 1, 0);

            for _ in 0..available - (last_node - first_node) {
                self.slots[next_node as usize] = Slot::Length(depth as u32);
                next_node -= 1;
            }

            available = (last_node - first_node) << 1;
            depth += 1;
        }
    }

    /// Pass 3, restricted: as above, moving `nodes_to_move` internal nodes
    /// up to `insert_depth`.
    fn allocate_node_lengths_with_relocation(&mut self, nodes_to_move: isize, insert_depth: isize) {
        let len = self.slots.len();
        let mut first_node = self.len() - 2;
        let mut next_node = self.len() - 1;
        let mut depth: isize = if insert_depth == 1 { 2 } else { 1 };
        let mut left_to_move = if insert_depth == 1 {
            nodes_to_move - 2
        } else {
            nodes_to_move
        };

        let mut available = depth << 1;
        while available > 0 {
            let last_node = first_node;
            if first_node > nodes_to_move {
                first_node = self.first(last_node - 1, nodes_to_move);
            }

            let mut offset = 0;
            if depth >= insert_depth {
                offset = left_to_move.min(1 << (depth - insert_depth));
            } else if depth == insert_depth - 1 {
                offset = 1;
                if self.slots[first_node as usize].raw(len) as isize == last_node {
                    first_node += 1;
                }
            }

            for _ in 0..available - (last_node - first_node + offset) {
                self.slots[next_node as usize] = Slot::Length(depth as u32);
                next_node -= 1;
            }

            left_to_move -= offset;
            available = (last_node - first_node + offset) << 1;
            depth += 1;
        }
    }
}

/// Replace an ascending array of symbol frequencies with canonical Huffman
/// code lengths, none longer than `max_length`.
///
/// `max_length` must be at least `ceil(log2(frequencies.len()))`. The
/// in-place passes need one further bit of slack; at the exact bound the
/// lengths come from a run with one spare bit, or from the complete
/// near-flat code when that run is too deep.
///
/// # Example
///
/// ```
/// use oxibz_bzip2::allocator::allocate_code_lengths;
///
/// let mut lengths = [1, 1, 2, 4, 8];
/// allocate_code_lengths(&mut lengths, 20);
/// assert_eq!(lengths, [4, 4, 3, 2, 1]);
/// ```
pub fn allocate_code_lengths(frequencies: &mut [u32], max_length: u32) {
    debug_assert!(
        frequencies.windows(2).all(|w| w[0] <= w[1]),
        "frequencies must be sorted ascending"
    );
    debug_assert!(
        frequencies.len() as u64 <= 1u64 << max_length.min(63),
        "length bound too small for alphabet"
    );

    match frequencies.len() {
        0 => return,
        1 | 2 => {
            frequencies.fill(1);
            return;
        }
        _ => {}
    }

    if !has_slack(frequencies.len(), max_length) {
        allocate_at_bound(frequencies, max_length);
        return;
    }

    let mut allocator = Allocator {
        slots: frequencies.iter().map(|&f| Slot::Weight(f)).collect(),
    };

    allocator.set_extended_parent_pointers();

    let nodes_to_relocate = allocator.find_nodes_to_relocate(max_length as isize);

    if allocator.parent(0) >= nodes_to_relocate {
        allocator.allocate_node_lengths();
    } else {
        let span = 32 - ((nodes_to_relocate - 1) as u32).leading_zeros();
        let insert_depth = max_length as isize - span as isize;
        allocator.allocate_node_lengths_with_relocation(nodes_to_relocate, insert_depth);
    }

    for (out, slot) in frequencies.iter_mut().zip(&allocator.slots) {
        *out = match *slot {
            Slot::Length(length) => length,
            other => unreachable!("slot left unallocated: {:?}", other),
        };
    }
}

/// Whether `n` symbols fit in half the code space of `max_length` bits.
fn has_slack(n: usize, max_length: u32) -> bool {
    match max_length.checked_sub(1) {
        Some(bits) if bits < usize::BITS => n <= 1 << bits,
        Some(_) => true,
        None => false,
    }
}

/// Lengths for `max_length == ceil(log2 n)`.
fn allocate_at_bound(frequencies: &mut [u32], max_length: u32) {
    let mut lengths = frequencies.to_vec();
    allocate_code_lengths(&mut lengths, max_length + 1);
    if lengths.iter().all(|&length| length <= max_length) {
        frequencies.copy_from_slice(&lengths);
        return;
    }

    // 2^L - n symbols at L - 1 bits and the rest at L fill the code space
    let n = frequencies.len();
    let short = (1usize << max_length.min(usize::BITS - 1))
        .saturating_sub(n)
        .min(n);
    let (long, short) = frequencies.split_at_mut(n - short);
    long.fill(max_length);
    short.fill(max_length.saturating_sub(1));
}
