//! Suffix sorting engine producing the BZip2 Burrows-Wheeler Transform.
//!
//! This is a block-sorting variant of Yuta Mori's divsufsort. Suffixes are
//! compared cyclically, so the result is the sorted order of the rotations
//! of the input rather than of its suffixes, which is exactly what BZip2
//! needs.
//!
//! The work happens in three phases:
//!
//! 1. **B\* bucketing** - every position is classified as type A or type B
//!    by comparing it with its successor, and the B\* positions (type B
//!    followed by type A) are seeded into 2-character buckets.
//! 2. **Substring sort** - each bucket of B\* substrings is refined with a
//!    multi-key introsort, and sorted runs are merged in place. Remaining
//!    ties are resolved by rank doubling (`tr_sort`), falling back to a
//!    plain Larsson-Sadakane sort if the adaptive sort exhausts its budget.
//! 3. **Induction** - the order of all other positions is induced from the
//!    sorted B\* positions while the BWT bytes are emitted in place.
//!
//! # Slot encoding
//!
//! Suffix array slots are `i32`. A slot holding the bitwise complement of an
//! index ([`mark`]) is "resolved": it belongs to an equal-key group or has
//! already reached its final position. Readers must [`unmark`] a negative slot
//! before using it as an index. Negative values are also used as group skip
//! lengths by the rank-doubling passes.
//!
//! # Workspace
//!
//! `text` must hold at least `n + 1` bytes with `text[n] == text[0]`. The
//! suffix array must hold at least [`workspace_len`]`(n)` slots: `n + 1` for
//! the result plus a scratch merge buffer at the end.

/// Explicit stack depth for the introsort loops.
const STACK_SIZE: usize = 64;

/// Number of 1-character buckets.
const BUCKET_A_SIZE: usize = 256;

/// Number of 2-character buckets.
const BUCKET_B_SIZE: usize = 65536;

/// Substring sort block size before merging.
const SS_BLOCKSIZE: i32 = 1024;

/// Spans at or below this size are insertion sorted.
const INSERTIONSORT_THRESHOLD: i32 = 8;

/// Size of the scratch merge buffer at the end of the suffix array.
pub const SCRATCH_LEN: usize = 256;

/// Numerator of the rank-doubling retry budget (`log2(n) * NUM / DEN + 1`).
const TR_CHANCE_NUM: i32 = 2;

/// Denominator of the rank-doubling retry budget.
const TR_CHANCE_DEN: i32 = 3;

/// `floor(log2(i))` for a byte, with `-1` for zero.
const LOG2_TABLE: [i32; 256] = {
    let mut table = [0i32; 256];
    table[0] = -1;
    let mut i = 1usize;
    while i < 256 {
        let mut v = i;
        let mut log = 0;
        while v > 1 {
            v >>= 1;
            log += 1;
        }
        table[i] = log;
        i += 1;
    }
    table
};

/// Number of suffix array slots needed to transform `n` bytes.
pub const fn workspace_len(n: usize) -> usize {
    n + 1 + SCRATCH_LEN
}

/// Mark a slot as resolved.
#[inline(always)]
const fn mark(v: i32) -> i32 {
    !v
}

/// Recover the index stored in a resolved slot.
#[inline(always)]
const fn unmark(v: i32) -> i32 {
    !v
}

/// Whether a slot carries the resolved marker.
#[inline(always)]
const fn is_marked(v: i32) -> bool {
    v < 0
}

/// Index stored in a slot, marked or not.
#[inline(always)]
const fn slot_index(v: i32) -> i32 {
    if is_marked(v) { unmark(v) } else { v }
}

#[inline(always)]
const fn bucket_b_index(c0: i32, c1: i32) -> usize {
    ((c1 << 8) | c0) as usize
}

#[inline(always)]
const fn bucket_bstar(c0: i32, c1: i32) -> usize {
    ((c0 << 8) | c1) as usize
}

#[inline]
fn ss_log(n: i32) -> i32 {
    if n & 0xff00 != 0 {
        8 + LOG2_TABLE[((n >> 8) & 0xff) as usize]
    } else {
        LOG2_TABLE[(n & 0xff) as usize]
    }
}

#[inline]
fn tr_log(n: i32) -> i32 {
    if n as u32 & 0xffff_0000 != 0 {
        if n as u32 & 0xff00_0000 != 0 {
            24 + LOG2_TABLE[((n >> 24) & 0xff) as usize]
        } else {
            16 + LOG2_TABLE[((n >> 16) & 0xff) as usize]
        }
    } else if n & 0x0000_ff00 != 0 {
        8 + LOG2_TABLE[((n >> 8) & 0xff) as usize]
    } else {
        LOG2_TABLE[(n & 0xff) as usize]
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct StackEntry {
    a: i32,
    b: i32,
    c: i32,
    d: i32,
}

/// Fixed-capacity stack replacing recursion in the sort loops.
struct Stack {
    entries: [StackEntry; STACK_SIZE],
    len: usize,
}

impl Stack {
    fn new() -> Self {
        Self {
            entries: [StackEntry::default(); STACK_SIZE],
            len: 0,
        }
    }

    #[inline]
    fn push(&mut self, a: i32, b: i32, c: i32, d: i32) {
        self.entries[self.len] = StackEntry { a, b, c, d };
        self.len += 1;
    }

    #[inline]
    fn pop(&mut self) -> Option<StackEntry> {
        if self.len == 0 {
            return None;
        }
        self.len -= 1;
        Some(self.entries[self.len])
    }

    fn remaining(&self) -> &[StackEntry] {
        &self.entries[..self.len]
    }
}

/// Work budget for the adaptive rank-doubling sort.
///
/// Every sorted span is charged against `budget`; when it runs dry the sort
/// gets another `size` worth of work until `chance` reaches zero, after which
/// the caller switches to Larsson-Sadakane.
struct TrBudget {
    budget: i32,
    chance: i32,
}

impl TrBudget {
    fn new(budget: i32, chance: i32) -> Self {
        Self { budget, chance }
    }

    fn update(&mut self, size: i32, n: i32) -> bool {
        self.budget -= n;
        if self.budget <= 0 {
            self.chance -= 1;
            if self.chance == 0 {
                return false;
            }
            self.budget += size;
        }
        true
    }
}

/// BWT construction over a caller-provided text and suffix array.
///
/// # Example
///
/// ```
/// use oxibz_bzip2::divsufsort::{DivSufSort, workspace_len};
///
/// let data = b"banana";
/// let mut text = data.to_vec();
/// text.push(data[0]);
/// let mut sa = vec![0i32; workspace_len(data.len())];
///
/// let origin = DivSufSort::new(&text, &mut sa, data.len()).bwt();
/// let bwt: Vec<u8> = sa[..data.len()].iter().map(|&b| b as u8).collect();
/// assert_eq!(bwt, b"nnbaaa");
/// assert_eq!(origin, 3);
/// ```
pub struct DivSufSort<'a> {
    text: &'a [u8],
    sa: &'a mut [i32],
    n: i32,
    scratch: i32,
}

impl<'a> DivSufSort<'a> {
    /// Prepare a transform of `text[..n]`.
    ///
    /// # Panics
    ///
    /// Panics if `text` is shorter than `n + 1`, if `sa` is shorter than
    /// [`workspace_len`]`(n)`, or if `n` does not fit in an `i32`.
    pub fn new(text: &'a [u8], sa: &'a mut [i32], n: usize) -> Self {
        assert!(n < i32::MAX as usize - SCRATCH_LEN, "block too large");
        assert!(n == 0 || text.len() > n, "text needs a wrap byte");
        assert!(n < 2 || sa.len() >= workspace_len(n), "suffix array too small");
        Self {
            text,
            sa,
            n: n as i32,
            scratch: n as i32 + 1,
        }
    }

    /// Run the transform.
    ///
    /// On return `sa[i]` (for `i < n`) holds the byte preceding the `i`-th
    /// smallest rotation. The returned value is the row at which the
    /// unrotated input appears.
    pub fn bwt(&mut self) -> u32 {
        let n = self.n;
        if n == 0 {
            return 0;
        }
        if n == 1 {
            self.sa[0] = self.text[0] as i32;
            return 0;
        }

        let mut bucket_a = vec![0i32; BUCKET_A_SIZE];
        let mut bucket_b = vec![0i32; BUCKET_B_SIZE];

        let m = self.sort_type_bstar(&mut bucket_a, &mut bucket_b);
        if m > 0 {
            self.construct_bwt(&mut bucket_a, &mut bucket_b) as u32
        } else {
            // Only a constant block has no type B* suffix; every rotation is equal
            for i in 0..n {
                self.sa[i as usize] = self.text(i);
            }
            0
        }
    }

    #[inline(always)]
    fn text(&self, i: i32) -> i32 {
        self.text[i as usize] as i32
    }

    #[inline(always)]
    fn get(&self, i: i32) -> i32 {
        self.sa[i as usize]
    }

    #[inline(always)]
    fn set(&mut self, i: i32, v: i32) {
        self.sa[i as usize] = v;
    }

    #[inline(always)]
    fn swap(&mut self, i: i32, j: i32) {
        self.sa.swap(i as usize, j as usize);
    }

    #[inline(always)]
    fn toggle(&mut self, i: i32) {
        let v = self.get(i);
        self.set(i, mark(v));
    }

    fn block_swap(&mut self, a: i32, b: i32, size: i32) {
        for k in 0..size {
            self.swap(a + k, b + k);
        }
    }

    // ---------------------------------------------------------------------
    // Substring sort
    // ---------------------------------------------------------------------

    /// Key of a B* substring at depth `td`.
    #[inline(always)]
    fn ss_key(&self, td: i32, pa: i32, i: i32) -> i32 {
        self.text(td + self.get(pa + self.get(i)))
    }

    fn ss_compare(&self, p1: i32, p2: i32, depth: i32) -> i32 {
        let mut u1 = depth + self.get(p1);
        let mut u2 = depth + self.get(p2);
        let u1n = self.get(p1 + 1) + 2;
        let u2n = self.get(p2 + 1) + 2;

        while u1 < u1n && u2 < u2n && self.text(u1) == self.text(u2) {
            u1 += 1;
            u2 += 1;
        }

        if u1 < u1n {
            if u2 < u2n { self.text(u1) - self.text(u2) } else { 1 }
        } else if u2 < u2n {
            -1
        } else {
            0
        }
    }

    /// Compare the last B* substring, which wraps around the end of the text.
    fn ss_compare_last(&self, pa: i32, p1: i32, p2: i32, depth: i32, size: i32) -> i32 {
        let mut u1 = depth + self.get(p1);
        let mut u2 = depth + self.get(p2);
        let mut u1n = size;
        let u2n = self.get(p2 + 1) + 2;

        while u1 < u1n && u2 < u2n && self.text(u1) == self.text(u2) {
            u1 += 1;
            u2 += 1;
        }

        if u1 < u1n {
            return if u2 < u2n { self.text(u1) - self.text(u2) } else { 1 };
        } else if u2 == u2n {
            return 1;
        }

        u1 %= size;
        u1n = self.get(pa) + 2;
        while u1 < u1n && u2 < u2n && self.text(u1) == self.text(u2) {
            u1 += 1;
            u2 += 1;
        }

        if u1 < u1n {
            if u2 < u2n { self.text(u1) - self.text(u2) } else { 1 }
        } else if u2 < u2n {
            -1
        } else {
            0
        }
    }

    fn ss_insertion_sort(&mut self, pa: i32, first: i32, last: i32, depth: i32) {
        let mut i = last - 2;
        while first <= i {
            let t = self.get(i);
            let mut j = i + 1;
            let mut r;
            loop {
                r = self.ss_compare(pa + t, pa + self.get(j), depth);
                if r <= 0 {
                    break;
                }
                loop {
                    let v = self.get(j);
                    self.set(j - 1, v);
                    j += 1;
                    if !(j < last && is_marked(self.get(j))) {
                        break;
                    }
                }
                if last <= j {
                    break;
                }
            }
            if r == 0 {
                self.toggle(j);
            }
            self.set(j - 1, t);
            i -= 1;
        }
    }

    fn ss_fixdown(&mut self, td: i32, pa: i32, base: i32, mut i: i32, size: i32) {
        let v = self.get(base + i);
        let c = self.text(td + self.get(pa + v));

        loop {
            let mut j = 2 * i + 1;
            if j >= size {
                break;
            }
            let mut k = j;
            j += 1;
            let mut d = self.ss_key(td, pa, base + k);
            if j < size {
                let e = self.ss_key(td, pa, base + j);
                if d < e {
                    k = j;
                    d = e;
                }
            }
            if d <= c {
                break;
            }
            let moved = self.get(base + k);
            self.set(base + i, moved);
            i = k;
        }
        self.set(base + i, v);
    }

    fn ss_heap_sort(&mut self, td: i32, pa: i32, base: i32, size: i32) {
        let mut m = size;
        if size % 2 == 0 {
            m -= 1;
            if self.ss_key(td, pa, base + m / 2) < self.ss_key(td, pa, base + m) {
                self.swap(base + m, base + m / 2);
            }
        }

        let mut i = m / 2 - 1;
        while 0 <= i {
            self.ss_fixdown(td, pa, base, i, m);
            i -= 1;
        }

        if size % 2 == 0 {
            self.swap(base, base + m);
            self.ss_fixdown(td, pa, base, 0, m);
        }

        let mut i = m - 1;
        while 0 < i {
            let t = self.get(base);
            let last = self.get(base + i);
            self.set(base, last);
            self.ss_fixdown(td, pa, base, 0, i);
            self.set(base + i, t);
            i -= 1;
        }
    }

    fn ss_median3(&self, td: i32, pa: i32, mut v1: i32, mut v2: i32, v3: i32) -> i32 {
        let mut t1 = self.ss_key(td, pa, v1);
        let mut t2 = self.ss_key(td, pa, v2);
        let t3 = self.ss_key(td, pa, v3);
        if t1 > t2 {
            std::mem::swap(&mut v1, &mut v2);
            std::mem::swap(&mut t1, &mut t2);
        }
        if t2 > t3 {
            if t1 > t3 { v1 } else { v3 }
        } else {
            v2
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn ss_median5(&self, td: i32, pa: i32, v1: i32, v2: i32, v3: i32, v4: i32, v5: i32) -> i32 {
        let v = [v1, v2, v3, v4, v5];
        median5(v, v.map(|i| self.ss_key(td, pa, i)))
    }

    fn ss_pivot(&self, td: i32, pa: i32, first: i32, last: i32) -> i32 {
        let mut t = last - first;
        let middle = first + t / 2;

        if t <= 512 {
            if t <= 32 {
                return self.ss_median3(td, pa, first, middle, last - 1);
            }
            t >>= 2;
            return self.ss_median5(td, pa, first, first + t, middle, last - 1 - t, last - 1);
        }

        t >>= 3;
        let a = self.ss_median3(td, pa, first, first + t, first + (t << 1));
        let b = self.ss_median3(td, pa, middle - t, middle, middle + t);
        let c = self.ss_median3(td, pa, last - 1 - (t << 1), last - 1 - t, last - 1);
        self.ss_median3(td, pa, a, b, c)
    }

    /// Move substrings that end before `depth` to the front, marked.
    fn ss_substring_partition(&mut self, pa: i32, first: i32, last: i32, depth: i32) -> i32 {
        let mut a = first - 1;
        let mut b = last;

        loop {
            loop {
                a += 1;
                if !(a < b && self.get(pa + self.get(a)) + depth >= self.get(pa + self.get(a) + 1) + 1)
                {
                    break;
                }
                self.toggle(a);
            }
            loop {
                b -= 1;
                if !(a < b && self.get(pa + self.get(b)) + depth < self.get(pa + self.get(b) + 1) + 1)
                {
                    break;
                }
            }
            if b <= a {
                break;
            }
            let t = mark(self.get(b));
            let va = self.get(a);
            self.set(b, va);
            self.set(a, t);
        }

        if first < a {
            self.toggle(first);
        }
        a
    }

    fn ss_mintro_sort(&mut self, pa: i32, mut first: i32, mut last: i32, mut depth: i32) {
        let mut stack = Stack::new();
        let mut limit = ss_log(last - first);

        loop {
            if last - first <= INSERTIONSORT_THRESHOLD {
                if 1 < last - first {
                    self.ss_insertion_sort(pa, first, last, depth);
                }
                match stack.pop() {
                    Some(e) => {
                        first = e.a;
                        last = e.b;
                        depth = e.c;
                        limit = e.d;
                    }
                    None => return,
                }
                continue;
            }

            let td = depth;
            let exhausted = limit == 0;
            limit -= 1;
            if exhausted {
                self.ss_heap_sort(td, pa, first, last - first);
            }

            if limit < 0 {
                let mut a = first + 1;
                let mut v = self.ss_key(td, pa, first);
                while a < last {
                    let x = self.ss_key(td, pa, a);
                    if x != v {
                        if 1 < a - first {
                            break;
                        }
                        v = x;
                        first = a;
                    }
                    a += 1;
                }

                if self.text(td + self.get(pa + self.get(first)) - 1) < v {
                    first = self.ss_substring_partition(pa, first, a, depth);
                }

                if a - first <= last - a {
                    if 1 < a - first {
                        stack.push(a, last, depth, -1);
                        last = a;
                        depth += 1;
                        limit = ss_log(a - first);
                    } else {
                        first = a;
                        limit = -1;
                    }
                } else if 1 < last - a {
                    stack.push(first, a, depth + 1, ss_log(a - first));
                    first = a;
                    limit = -1;
                } else {
                    last = a;
                    depth += 1;
                    limit = ss_log(a - first);
                }
                continue;
            }

            // Three-way partition around the pivot key
            let pivot = self.ss_pivot(td, pa, first, last);
            let v = self.ss_key(td, pa, pivot);
            self.swap(first, pivot);

            let mut x = 0;
            let mut b = first;
            loop {
                b += 1;
                if b >= last {
                    break;
                }
                x = self.ss_key(td, pa, b);
                if x != v {
                    break;
                }
            }
            let mut a = b;
            if a < last && x < v {
                loop {
                    b += 1;
                    if b >= last {
                        break;
                    }
                    x = self.ss_key(td, pa, b);
                    if x > v {
                        break;
                    }
                    if x == v {
                        self.swap(b, a);
                        a += 1;
                    }
                }
            }

            let mut c = last;
            loop {
                c -= 1;
                if b >= c {
                    break;
                }
                x = self.ss_key(td, pa, c);
                if x != v {
                    break;
                }
            }
            let mut d = c;
            if b < d && x > v {
                loop {
                    c -= 1;
                    if b >= c {
                        break;
                    }
                    x = self.ss_key(td, pa, c);
                    if x < v {
                        break;
                    }
                    if x == v {
                        self.swap(c, d);
                        d -= 1;
                    }
                }
            }

            while b < c {
                self.swap(b, c);
                loop {
                    b += 1;
                    if b >= c {
                        break;
                    }
                    x = self.ss_key(td, pa, b);
                    if x > v {
                        break;
                    }
                    if x == v {
                        self.swap(b, a);
                        a += 1;
                    }
                }
                loop {
                    c -= 1;
                    if b >= c {
                        break;
                    }
                    x = self.ss_key(td, pa, c);
                    if x < v {
                        break;
                    }
                    if x == v {
                        self.swap(c, d);
                        d -= 1;
                    }
                }
            }

            if a <= d {
                c = b - 1;

                let s = (a - first).min(b - a);
                self.block_swap(first, b - s, s);
                let s = (d - c).min(last - d - 1);
                self.block_swap(b, last - s, s);

                a = first + (b - a);
                c = last - (d - c);
                b = if v <= self.text(td + self.get(pa + self.get(a)) - 1) {
                    a
                } else {
                    self.ss_substring_partition(pa, a, c, depth)
                };

                if a - first <= last - c {
                    if last - c <= c - b {
                        stack.push(b, c, depth + 1, ss_log(c - b));
                        stack.push(c, last, depth, limit);
                        last = a;
                    } else if a - first <= c - b {
                        stack.push(c, last, depth, limit);
                        stack.push(b, c, depth + 1, ss_log(c - b));
                        last = a;
                    } else {
                        stack.push(c, last, depth, limit);
                        stack.push(first, a, depth, limit);
                        first = b;
                        last = c;
                        depth += 1;
                        limit = ss_log(c - b);
                    }
                } else if a - first <= c - b {
                    stack.push(b, c, depth + 1, ss_log(c - b));
                    stack.push(first, a, depth, limit);
                    first = c;
                } else if last - c <= c - b {
                    stack.push(first, a, depth, limit);
                    stack.push(b, c, depth + 1, ss_log(c - b));
                    first = c;
                } else {
                    stack.push(first, a, depth, limit);
                    stack.push(c, last, depth, limit);
                    first = b;
                    last = c;
                    depth += 1;
                    limit = ss_log(c - b);
                }
            } else {
                limit += 1;
                if self.text(td + self.get(pa + self.get(first)) - 1) < v {
                    first = self.ss_substring_partition(pa, first, last, depth);
                    limit = ss_log(last - first);
                }
                depth += 1;
            }
        }
    }

    /// Merge `[first, middle)` and `[middle, last)` using a buffer that holds
    /// the left run.
    #[allow(clippy::too_many_arguments)]
    fn ss_merge_forward(&mut self, pa: i32, buf: i32, first: i32, middle: i32, last: i32, depth: i32) {
        let bufend = buf + (middle - first) - 1;
        self.block_swap(buf, first, middle - first);

        let t = self.get(first);
        let mut i = first;
        let mut j = buf;
        let mut k = middle;

        loop {
            let r = self.ss_compare(pa + self.get(j), pa + self.get(k), depth);
            if r < 0 {
                loop {
                    let v = self.get(j);
                    self.set(i, v);
                    i += 1;
                    if bufend <= j {
                        self.set(j, t);
                        return;
                    }
                    let v = self.get(i);
                    self.set(j, v);
                    j += 1;
                    if !is_marked(self.get(j)) {
                        break;
                    }
                }
            } else if r > 0 {
                loop {
                    let v = self.get(k);
                    self.set(i, v);
                    i += 1;
                    let v = self.get(i);
                    self.set(k, v);
                    k += 1;
                    if last <= k {
                        while j < bufend {
                            let v = self.get(j);
                            self.set(i, v);
                            i += 1;
                            let v = self.get(i);
                            self.set(j, v);
                            j += 1;
                        }
                        let v = self.get(j);
                        self.set(i, v);
                        self.set(j, t);
                        return;
                    }
                    if !is_marked(self.get(k)) {
                        break;
                    }
                }
            } else {
                self.toggle(k);
                loop {
                    let v = self.get(j);
                    self.set(i, v);
                    i += 1;
                    if bufend <= j {
                        self.set(j, t);
                        return;
                    }
                    let v = self.get(i);
                    self.set(j, v);
                    j += 1;
                    if !is_marked(self.get(j)) {
                        break;
                    }
                }
                loop {
                    let v = self.get(k);
                    self.set(i, v);
                    i += 1;
                    let v = self.get(i);
                    self.set(k, v);
                    k += 1;
                    if last <= k {
                        while j < bufend {
                            let v = self.get(j);
                            self.set(i, v);
                            i += 1;
                            let v = self.get(i);
                            self.set(j, v);
                            j += 1;
                        }
                        let v = self.get(j);
                        self.set(i, v);
                        self.set(j, t);
                        return;
                    }
                    if !is_marked(self.get(k)) {
                        break;
                    }
                }
            }
        }
    }

    /// Merge `[first, middle)` and `[middle, last)` using a buffer that holds
    /// the right run, filling from the back.
    #[allow(clippy::too_many_arguments)]
    fn ss_merge_backward(&mut self, pa: i32, buf: i32, first: i32, middle: i32, last: i32, depth: i32) {
        let bufend = buf + (last - middle);
        self.block_swap(buf, middle, last - middle);

        let mut x = 0;
        let tail = self.get(bufend - 1);
        let mut p1 = if is_marked(tail) {
            x |= 1;
            pa + unmark(tail)
        } else {
            pa + tail
        };
        let left = self.get(middle - 1);
        let mut p2 = if is_marked(left) {
            x |= 2;
            pa + unmark(left)
        } else {
            pa + left
        };

        let t = self.get(last - 1);
        let mut i = last - 1;
        let mut j = bufend - 1;
        let mut k = middle - 1;

        loop {
            let r = self.ss_compare(p1, p2, depth);
            if r > 0 {
                if x & 1 != 0 {
                    loop {
                        let v = self.get(j);
                        self.set(i, v);
                        i -= 1;
                        let v = self.get(i);
                        self.set(j, v);
                        j -= 1;
                        if !is_marked(self.get(j)) {
                            break;
                        }
                    }
                    x ^= 1;
                }
                let v = self.get(j);
                self.set(i, v);
                i -= 1;
                if j <= buf {
                    self.set(j, t);
                    return;
                }
                let v = self.get(i);
                self.set(j, v);
                j -= 1;

                let next = self.get(j);
                p1 = if is_marked(next) {
                    x |= 1;
                    pa + unmark(next)
                } else {
                    pa + next
                };
            } else if r < 0 {
                if x & 2 != 0 {
                    loop {
                        let v = self.get(k);
                        self.set(i, v);
                        i -= 1;
                        let v = self.get(i);
                        self.set(k, v);
                        k -= 1;
                        if !is_marked(self.get(k)) {
                            break;
                        }
                    }
                    x ^= 2;
                }
                let v = self.get(k);
                self.set(i, v);
                i -= 1;
                let v = self.get(i);
                self.set(k, v);
                k -= 1;
                if k < first {
                    while buf < j {
                        let v = self.get(j);
                        self.set(i, v);
                        i -= 1;
                        let v = self.get(i);
                        self.set(j, v);
                        j -= 1;
                    }
                    let v = self.get(j);
                    self.set(i, v);
                    self.set(j, t);
                    return;
                }

                let next = self.get(k);
                p2 = if is_marked(next) {
                    x |= 2;
                    pa + unmark(next)
                } else {
                    pa + next
                };
            } else {
                if x & 1 != 0 {
                    loop {
                        let v = self.get(j);
                        self.set(i, v);
                        i -= 1;
                        let v = self.get(i);
                        self.set(j, v);
                        j -= 1;
                        if !is_marked(self.get(j)) {
                            break;
                        }
                    }
                    x ^= 1;
                }
                let v = mark(self.get(j));
                self.set(i, v);
                i -= 1;
                if j <= buf {
                    self.set(j, t);
                    return;
                }
                let v = self.get(i);
                self.set(j, v);
                j -= 1;

                if x & 2 != 0 {
                    loop {
                        let v = self.get(k);
                        self.set(i, v);
                        i -= 1;
                        let v = self.get(i);
                        self.set(k, v);
                        k -= 1;
                        if !is_marked(self.get(k)) {
                            break;
                        }
                    }
                    x ^= 2;
                }
                let v = self.get(k);
                self.set(i, v);
                i -= 1;
                let v = self.get(i);
                self.set(k, v);
                k -= 1;
                if k < first {
                    while buf < j {
                        let v = self.get(j);
                        self.set(i, v);
                        i -= 1;
                        let v = self.get(i);
                        self.set(j, v);
                        j -= 1;
                    }
                    let v = self.get(j);
                    self.set(i, v);
                    self.set(j, t);
                    return;
                }

                let next = self.get(j);
                p1 = if is_marked(next) {
                    x |= 1;
                    pa + unmark(next)
                } else {
                    pa + next
                };
                let next = self.get(k);
                p2 = if is_marked(next) {
                    x |= 2;
                    pa + unmark(next)
                } else {
                    pa + next
                };
            }
        }
    }

    fn ss_merge_check_equal(&mut self, pa: i32, depth: i32, a: i32) {
        if !is_marked(self.get(a))
            && self.ss_compare(pa + slot_index(self.get(a - 1)), pa + self.get(a), depth) == 0
        {
            self.toggle(a);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn ss_merge(
        &mut self,
        pa: i32,
        mut first: i32,
        mut middle: i32,
        mut last: i32,
        buf: i32,
        bufsize: i32,
        depth: i32,
    ) {
        let mut stack = Stack::new();
        let mut check = 0;

        loop {
            if last - middle <= bufsize {
                if first < middle && middle < last {
                    self.ss_merge_backward(pa, buf, first, middle, last, depth);
                }
                if check & 1 != 0 {
                    self.ss_merge_check_equal(pa, depth, first);
                }
                if check & 2 != 0 {
                    self.ss_merge_check_equal(pa, depth, last);
                }
                match stack.pop() {
                    Some(e) => {
                        first = e.a;
                        middle = e.b;
                        last = e.c;
                        check = e.d;
                    }
                    None => return,
                }
                continue;
            }

            if middle - first <= bufsize {
                if first < middle {
                    self.ss_merge_forward(pa, buf, first, middle, last, depth);
                }
                if check & 1 != 0 {
                    self.ss_merge_check_equal(pa, depth, first);
                }
                if check & 2 != 0 {
                    self.ss_merge_check_equal(pa, depth, last);
                }
                match stack.pop() {
                    Some(e) => {
                        first = e.a;
                        middle = e.b;
                        last = e.c;
                        check = e.d;
                    }
                    None => return,
                }
                continue;
            }

            // Binary search for the rotation point
            let mut m = 0;
            let mut len = (middle - first).min(last - middle);
            let mut half = len >> 1;
            while 0 < len {
                let right = slot_index(self.get(middle + m + half));
                let left = slot_index(self.get(middle - m - half - 1));
                if self.ss_compare(pa + right, pa + left, depth) < 0 {
                    m += half + 1;
                    half -= (len & 1) ^ 1;
                }
                len = half;
                half >>= 1;
            }

            if 0 < m {
                self.block_swap(middle - m, middle, m);
                let mut i = middle;
                let mut j = middle;
                let mut next = 0;
                if middle + m < last {
                    if is_marked(self.get(middle + m)) {
                        while is_marked(self.get(i - 1)) {
                            i -= 1;
                        }
                        self.toggle(middle + m);
                    }
                    j = middle;
                    while is_marked(self.get(j)) {
                        j += 1;
                    }
                    next = 1;
                }
                if i - first <= last - j {
                    stack.push(j, middle + m, last, (check & 2) | (next & 1));
                    middle -= m;
                    last = i;
                    check &= 1;
                } else {
                    if i == middle && middle == j {
                        next <<= 1;
                    }
                    stack.push(first, middle - m, i, (check & 1) | (next & 2));
                    first = j;
                    middle += m;
                    check = (check & 2) | (next & 1);
                }
            } else {
                if check & 1 != 0 {
                    self.ss_merge_check_equal(pa, depth, first);
                }
                self.ss_merge_check_equal(pa, depth, middle);
                if check & 2 != 0 {
                    self.ss_merge_check_equal(pa, depth, last);
                }
                match stack.pop() {
                    Some(e) => {
                        first = e.a;
                        middle = e.b;
                        last = e.c;
                        check = e.d;
                    }
                    None => return,
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn sub_string_sort(
        &mut self,
        pa: i32,
        mut first: i32,
        last: i32,
        buf: i32,
        bufsize: i32,
        depth: i32,
        last_suffix: bool,
        size: i32,
    ) {
        if last_suffix {
            first += 1;
        }

        let mut a = first;
        let mut i = 0;
        while a + SS_BLOCKSIZE < last {
            self.ss_mintro_sort(pa, a, a + SS_BLOCKSIZE, depth);

            let mut curbuf = a + SS_BLOCKSIZE;
            let mut curbufsize = last - (a + SS_BLOCKSIZE);
            if curbufsize <= bufsize {
                curbufsize = bufsize;
                curbuf = buf;
            }

            let mut b = a;
            let mut k = SS_BLOCKSIZE;
            let mut j = i;
            while j & 1 != 0 {
                self.ss_merge(pa, b - k, b, b + k, curbuf, curbufsize, depth);
                b -= k;
                k <<= 1;
                j >>= 1;
            }

            a += SS_BLOCKSIZE;
            i += 1;
        }

        self.ss_mintro_sort(pa, a, last, depth);

        let mut k = SS_BLOCKSIZE;
        while i != 0 {
            if i & 1 != 0 {
                self.ss_merge(pa, a - k, a, last, buf, bufsize, depth);
                a -= k;
            }
            k <<= 1;
            i >>= 1;
        }

        if last_suffix {
            // Insert the wrapping substring into its place
            let i = self.get(first - 1);
            let mut r = 1;
            a = first;
            while a < last {
                if !is_marked(self.get(a)) {
                    r = self.ss_compare_last(pa, pa + i, pa + self.get(a), depth, size);
                    if r <= 0 {
                        break;
                    }
                }
                let v = self.get(a);
                self.set(a - 1, v);
                a += 1;
            }
            if r == 0 {
                self.toggle(a);
            }
            self.set(a - 1, i);
        }
    }

    // ---------------------------------------------------------------------
    // Rank doubling sort
    // ---------------------------------------------------------------------

    /// Rank of the suffix `depth` positions after `p`, wrapping cyclically.
    #[inline(always)]
    fn tr_get_c(&self, isa: i32, isad: i32, isan: i32, p: i32) -> i32 {
        if isad + p < isan {
            self.get(isad + p)
        } else {
            self.get(isa + ((isad - isa + p) % (isan - isa)))
        }
    }

    #[inline(always)]
    fn tr_key(&self, isa: i32, isad: i32, isan: i32, i: i32) -> i32 {
        self.tr_get_c(isa, isad, isan, self.get(i))
    }

    #[allow(clippy::too_many_arguments)]
    fn tr_fixdown(&mut self, isa: i32, isad: i32, isan: i32, base: i32, mut i: i32, size: i32) {
        let v = self.get(base + i);
        let c = self.tr_get_c(isa, isad, isan, v);

        loop {
            let mut j = 2 * i + 1;
            if j >= size {
                break;
            }
            let mut k = j;
            j += 1;
            let mut d = self.tr_key(isa, isad, isan, base + k);
            if j < size {
                let e = self.tr_key(isa, isad, isan, base + j);
                if d < e {
                    k = j;
                    d = e;
                }
            }
            if d <= c {
                break;
            }
            let moved = self.get(base + k);
            self.set(base + i, moved);
            i = k;
        }
        self.set(base + i, v);
    }

    fn tr_heap_sort(&mut self, isa: i32, isad: i32, isan: i32, base: i32, size: i32) {
        let mut m = size;
        if size % 2 == 0 {
            m -= 1;
            if self.tr_key(isa, isad, isan, base + m / 2) < self.tr_key(isa, isad, isan, base + m) {
                self.swap(base + m, base + m / 2);
            }
        }

        let mut i = m / 2 - 1;
        while 0 <= i {
            self.tr_fixdown(isa, isad, isan, base, i, m);
            i -= 1;
        }

        if size % 2 == 0 {
            self.swap(base, base + m);
            self.tr_fixdown(isa, isad, isan, base, 0, m);
        }

        let mut i = m - 1;
        while 0 < i {
            let t = self.get(base);
            let last = self.get(base + i);
            self.set(base, last);
            self.tr_fixdown(isa, isad, isan, base, 0, i);
            self.set(base + i, t);
            i -= 1;
        }
    }

    fn tr_insertion_sort(&mut self, isa: i32, isad: i32, isan: i32, first: i32, last: i32) {
        let mut a = first + 1;
        while a < last {
            let t = self.get(a);
            let mut b = a - 1;
            let mut r;
            loop {
                r = self.tr_get_c(isa, isad, isan, t) - self.tr_key(isa, isad, isan, b);
                if r >= 0 {
                    break;
                }
                loop {
                    let v = self.get(b);
                    self.set(b + 1, v);
                    b -= 1;
                    if !(first <= b && is_marked(self.get(b))) {
                        break;
                    }
                }
                if b < first {
                    break;
                }
            }
            if r == 0 {
                self.toggle(b);
            }
            self.set(b + 1, t);
            a += 1;
        }
    }

    /// Mark runs of equal keys after a heap sort, leaving each run's last
    /// element unmarked.
    fn tr_mark_equal_runs(&mut self, isa: i32, isad: i32, isan: i32, first: i32, last: i32) {
        let mut a = last - 1;
        while first < a {
            let x = self.tr_key(isa, isad, isan, a);
            let mut b = a - 1;
            while first <= b && self.tr_key(isa, isad, isan, b) == x {
                self.toggle(b);
                b -= 1;
            }
            a = b;
        }
    }

    fn tr_median3(&self, isa: i32, isad: i32, isan: i32, mut v1: i32, mut v2: i32, v3: i32) -> i32 {
        let mut t1 = self.tr_key(isa, isad, isan, v1);
        let mut t2 = self.tr_key(isa, isad, isan, v2);
        let t3 = self.tr_key(isa, isad, isan, v3);
        if t1 > t2 {
            std::mem::swap(&mut v1, &mut v2);
            std::mem::swap(&mut t1, &mut t2);
        }
        if t2 > t3 {
            if t1 > t3 { v1 } else { v3 }
        } else {
            v2
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn tr_median5(
        &self,
        isa: i32,
        isad: i32,
        isan: i32,
        v1: i32,
        v2: i32,
        v3: i32,
        v4: i32,
        v5: i32,
    ) -> i32 {
        let v = [v1, v2, v3, v4, v5];
        median5(v, v.map(|i| self.tr_key(isa, isad, isan, i)))
    }

    fn tr_pivot(&self, isa: i32, isad: i32, isan: i32, first: i32, last: i32) -> i32 {
        let mut t = last - first;
        let middle = first + t / 2;

        if t <= 512 {
            if t <= 32 {
                return self.tr_median3(isa, isad, isan, first, middle, last - 1);
            }
            t >>= 2;
            return self.tr_median5(
                isa,
                isad,
                isan,
                first,
                first + t,
                middle,
                last - 1 - t,
                last - 1,
            );
        }

        t >>= 3;
        let a = self.tr_median3(isa, isad, isan, first, first + t, first + (t << 1));
        let b = self.tr_median3(isa, isad, isan, middle - t, middle, middle + t);
        let c = self.tr_median3(isa, isad, isan, last - 1 - (t << 1), last - 1 - t, last - 1);
        self.tr_median3(isa, isad, isan, a, b, c)
    }

    /// Three-way partition of `[first, last)` around key `v`.
    ///
    /// Returns the bounds of the equal-key range; `(first, last)` comes back
    /// unchanged when every key equals `v`.
    #[allow(clippy::too_many_arguments)]
    fn tr_partition(
        &mut self,
        isa: i32,
        isad: i32,
        isan: i32,
        first: i32,
        last: i32,
        v: i32,
    ) -> (i32, i32) {
        let mut x = 0;
        let mut b = first - 1;
        loop {
            b += 1;
            if b >= last {
                break;
            }
            x = self.tr_key(isa, isad, isan, b);
            if x != v {
                break;
            }
        }
        let mut a = b;
        if a < last && x < v {
            loop {
                b += 1;
                if b >= last {
                    break;
                }
                x = self.tr_key(isa, isad, isan, b);
                if x > v {
                    break;
                }
                if x == v {
                    self.swap(b, a);
                    a += 1;
                }
            }
        }

        let mut c = last;
        loop {
            c -= 1;
            if b >= c {
                break;
            }
            x = self.tr_key(isa, isad, isan, c);
            if x != v {
                break;
            }
        }
        let mut d = c;
        if b < d && x > v {
            loop {
                c -= 1;
                if b >= c {
                    break;
                }
                x = self.tr_key(isa, isad, isan, c);
                if x < v {
                    break;
                }
                if x == v {
                    self.swap(c, d);
                    d -= 1;
                }
            }
        }

        while b < c {
            self.swap(b, c);
            loop {
                b += 1;
                if b >= c {
                    break;
                }
                x = self.tr_key(isa, isad, isan, b);
                if x > v {
                    break;
                }
                if x == v {
                    self.swap(b, a);
                    a += 1;
                }
            }
            loop {
                c -= 1;
                if b >= c {
                    break;
                }
                x = self.tr_key(isa, isad, isan, c);
                if x < v {
                    break;
                }
                if x == v {
                    self.swap(c, d);
                    d -= 1;
                }
            }
        }

        if a <= d {
            c = b - 1;
            let s = (a - first).min(b - a);
            self.block_swap(first, b - s, s);
            let s = (d - c).min(last - d - 1);
            self.block_swap(b, last - s, s);
            (first + (b - a), last - (d - c))
        } else {
            (first, last)
        }
    }

    /// Set the rank of every suffix in `[from, to)` to `rank`.
    #[inline]
    fn assign_rank(&mut self, isa: i32, from: i32, to: i32, rank: i32) {
        for c in from..to {
            let s = self.get(c);
            self.set(isa + s, rank);
        }
    }

    fn ls_update_group(&mut self, isa: i32, first: i32, last: i32) {
        let mut a = first;
        while a < last {
            if !is_marked(self.get(a)) {
                let b = a;
                loop {
                    let s = self.get(a);
                    self.set(isa + s, a);
                    a += 1;
                    if !(a < last && !is_marked(self.get(a))) {
                        break;
                    }
                }
                // Sorted run, stored as a negative skip length
                self.set(b, b - a);
                if last <= a {
                    break;
                }
            }

            let mut b = a;
            loop {
                self.toggle(a);
                a += 1;
                if !is_marked(self.get(a)) {
                    break;
                }
            }
            let t = a;
            loop {
                let s = self.get(b);
                self.set(isa + s, t);
                b += 1;
                if b > a {
                    break;
                }
            }
            a += 1;
        }
    }

    fn ls_intro_sort(&mut self, isa: i32, isad: i32, isan: i32, mut first: i32, mut last: i32) {
        let mut stack = Stack::new();
        let mut limit = tr_log(last - first);

        loop {
            if last - first <= INSERTIONSORT_THRESHOLD {
                if 1 < last - first {
                    self.tr_insertion_sort(isa, isad, isan, first, last);
                    self.ls_update_group(isa, first, last);
                } else if last - first == 1 {
                    self.set(first, -1);
                }
                match stack.pop() {
                    Some(e) => {
                        first = e.a;
                        last = e.b;
                        limit = e.c;
                    }
                    None => return,
                }
                continue;
            }

            let exhausted = limit == 0;
            limit -= 1;
            if exhausted {
                self.tr_heap_sort(isa, isad, isan, first, last - first);
                self.tr_mark_equal_runs(isa, isad, isan, first, last);
                self.ls_update_group(isa, first, last);
                match stack.pop() {
                    Some(e) => {
                        first = e.a;
                        last = e.b;
                        limit = e.c;
                    }
                    None => return,
                }
                continue;
            }

            let pivot = self.tr_pivot(isa, isad, isan, first, last);
            self.swap(first, pivot);
            let v = self.tr_key(isa, isad, isan, first);
            let (a, b) = self.tr_partition(isa, isad, isan, first, last, v);

            if first < a || b < last {
                self.assign_rank(isa, first, a, a - 1);
                if b < last {
                    self.assign_rank(isa, a, b, b - 1);
                }
                if b - a == 1 {
                    self.set(a, -1);
                }

                if a - first <= last - b {
                    if first < a {
                        stack.push(b, last, limit, 0);
                        last = a;
                    } else {
                        first = b;
                    }
                } else if b < last {
                    stack.push(first, a, limit, 0);
                    first = b;
                } else {
                    last = a;
                }
            } else {
                match stack.pop() {
                    Some(e) => {
                        first = e.a;
                        last = e.b;
                        limit = e.c;
                    }
                    None => return,
                }
            }
        }
    }

    /// Larsson-Sadakane rank doubling over the whole B* rank array.
    fn ls_sort(&mut self, isa: i32, n: i32, depth: i32) {
        let mut isad = isa + depth;
        while -n < self.get(0) {
            let mut first = 0;
            let mut skip = 0;
            loop {
                let t = self.get(first);
                if t < 0 {
                    first -= t;
                    skip += t;
                } else {
                    if skip != 0 {
                        self.set(first + skip, skip);
                        skip = 0;
                    }
                    let last = self.get(isa + t) + 1;
                    self.ls_intro_sort(isa, isad, isa + n, first, last);
                    first = last;
                }
                if first >= n {
                    break;
                }
            }
            if skip != 0 {
                self.set(first + skip, skip);
            }

            if n < isad - isa {
                first = 0;
                loop {
                    let t = self.get(first);
                    if t < 0 {
                        first -= t;
                    } else {
                        let last = self.get(isa + t) + 1;
                        for i in first..last {
                            let s = self.get(i);
                            self.set(isa + s, i);
                        }
                        first = last;
                    }
                    if first >= n {
                        break;
                    }
                }
                break;
            }

            isad += isad - isa;
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn tr_copy(&mut self, isa: i32, isan: i32, first: i32, a: i32, b: i32, last: i32, depth: i32) {
        let v = b - 1;

        let mut c = first;
        let mut d = a - 1;
        while c <= d {
            let mut s = self.get(c) - depth;
            if s < 0 {
                s += isan - isa;
            }
            if self.get(isa + s) == v {
                d += 1;
                self.set(d, s);
                self.set(isa + s, d);
            }
            c += 1;
        }

        c = last - 1;
        let e = d + 1;
        d = b;
        while e < d {
            let mut s = self.get(c) - depth;
            if s < 0 {
                s += isan - isa;
            }
            if self.get(isa + s) == v {
                d -= 1;
                self.set(d, s);
                self.set(isa + s, d);
            }
            c -= 1;
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn tr_intro_sort(
        &mut self,
        isa: i32,
        mut isad: i32,
        isan: i32,
        mut first: i32,
        mut last: i32,
        budget: &mut TrBudget,
        size: i32,
    ) {
        let mut stack = Stack::new();
        let mut limit = tr_log(last - first);

        macro_rules! pop_or_return {
            () => {
                match stack.pop() {
                    Some(e) => {
                        isad = e.a;
                        first = e.b;
                        last = e.c;
                        limit = e.d;
                    }
                    None => return,
                }
            };
        }

        'sort: loop {
            if limit < 0 {
                if limit == -1 {
                    // Tandem repeat partition
                    if !budget.update(size, last - first) {
                        break 'sort;
                    }
                    let (a, b) = self.tr_partition(isa, isad - 1, isan, first, last, last - 1);
                    if first < a || b < last {
                        if a < last {
                            self.assign_rank(isa, first, a, a - 1);
                        }
                        if b < last {
                            self.assign_rank(isa, a, b, b - 1);
                        }

                        stack.push(0, a, b, 0);
                        stack.push(isad - 1, first, last, -2);
                        if a - first <= last - b {
                            if 1 < a - first {
                                stack.push(isad, b, last, tr_log(last - b));
                                last = a;
                                limit = tr_log(a - first);
                            } else if 1 < last - b {
                                first = b;
                                limit = tr_log(last - b);
                            } else {
                                pop_or_return!();
                            }
                        } else if 1 < last - b {
                            stack.push(isad, first, a, tr_log(a - first));
                            first = b;
                            limit = tr_log(last - b);
                        } else if 1 < a - first {
                            last = a;
                            limit = tr_log(a - first);
                        } else {
                            pop_or_return!();
                        }
                    } else {
                        for c in first..last {
                            let s = self.get(c);
                            self.set(isa + s, c);
                        }
                        pop_or_return!();
                    }
                } else if limit == -2 {
                    // Tandem repeat copy
                    let Some(range) = stack.pop() else {
                        return;
                    };
                    self.tr_copy(isa, isan, first, range.b, range.c, last, isad - isa);
                    pop_or_return!();
                } else {
                    // Sorted partition
                    if !is_marked(self.get(first)) {
                        let mut a = first;
                        loop {
                            let s = self.get(a);
                            self.set(isa + s, a);
                            a += 1;
                            if !(a < last && !is_marked(self.get(a))) {
                                break;
                            }
                        }
                        first = a;
                    }
                    if first < last {
                        let mut a = first;
                        loop {
                            self.toggle(a);
                            a += 1;
                            if !is_marked(self.get(a)) {
                                break;
                            }
                        }
                        let s = self.get(a);
                        let next = if self.get(isa + s) != self.get(isad + s) {
                            tr_log(a - first + 1)
                        } else {
                            -1
                        };
                        a += 1;
                        if a < last {
                            self.assign_rank(isa, first, a, a - 1);
                        }

                        if a - first <= last - a {
                            stack.push(isad, a, last, -3);
                            isad += 1;
                            last = a;
                            limit = next;
                        } else if 1 < last - a {
                            stack.push(isad + 1, first, a, next);
                            first = a;
                            limit = -3;
                        } else {
                            isad += 1;
                            last = a;
                            limit = next;
                        }
                    } else {
                        pop_or_return!();
                    }
                }
                continue;
            }

            if last - first <= INSERTIONSORT_THRESHOLD {
                if !budget.update(size, last - first) {
                    break 'sort;
                }
                self.tr_insertion_sort(isa, isad, isan, first, last);
                limit = -3;
                continue;
            }

            let exhausted = limit == 0;
            limit -= 1;
            if exhausted {
                if !budget.update(size, last - first) {
                    break 'sort;
                }
                self.tr_heap_sort(isa, isad, isan, first, last - first);
                self.tr_mark_equal_runs(isa, isad, isan, first, last);
                limit = -3;
                continue;
            }

            let pivot = self.tr_pivot(isa, isad, isan, first, last);
            self.swap(first, pivot);
            let v = self.tr_key(isa, isad, isan, first);
            let (a, b) = self.tr_partition(isa, isad, isan, first, last, v);

            if first < a || b < last {
                let s = self.get(a);
                let next = if self.get(isa + s) != v { tr_log(b - a) } else { -1 };

                self.assign_rank(isa, first, a, a - 1);
                if b < last {
                    self.assign_rank(isa, a, b, b - 1);
                }

                if a - first <= last - b {
                    if last - b <= b - a {
                        if 1 < a - first {
                            stack.push(isad + 1, a, b, next);
                            stack.push(isad, b, last, limit);
                            last = a;
                        } else if 1 < last - b {
                            stack.push(isad + 1, a, b, next);
                            first = b;
                        } else if 1 < b - a {
                            isad += 1;
                            first = a;
                            last = b;
                            limit = next;
                        } else {
                            pop_or_return!();
                        }
                    } else if a - first <= b - a {
                        if 1 < a - first {
                            stack.push(isad, b, last, limit);
                            stack.push(isad + 1, a, b, next);
                            last = a;
                        } else if 1 < b - a {
                            stack.push(isad, b, last, limit);
                            isad += 1;
                            first = a;
                            last = b;
                            limit = next;
                        } else {
                            first = b;
                        }
                    } else if 1 < b - a {
                        stack.push(isad, b, last, limit);
                        stack.push(isad, first, a, limit);
                        isad += 1;
                        first = a;
                        last = b;
                        limit = next;
                    } else {
                        stack.push(isad, b, last, limit);
                        last = a;
                    }
                } else if a - first <= b - a {
                    if 1 < last - b {
                        stack.push(isad + 1, a, b, next);
                        stack.push(isad, first, a, limit);
                        first = b;
                    } else if 1 < a - first {
                        stack.push(isad + 1, a, b, next);
                        last = a;
                    } else if 1 < b - a {
                        isad += 1;
                        first = a;
                        last = b;
                        limit = next;
                    } else {
                        stack.push(isad, first, last, limit);
                    }
                } else if last - b <= b - a {
                    if 1 < last - b {
                        stack.push(isad, first, a, limit);
                        stack.push(isad + 1, a, b, next);
                        first = b;
                    } else if 1 < b - a {
                        stack.push(isad, first, a, limit);
                        isad += 1;
                        first = a;
                        last = b;
                        limit = next;
                    } else {
                        last = a;
                    }
                } else if 1 < b - a {
                    stack.push(isad, first, a, limit);
                    stack.push(isad, b, last, limit);
                    isad += 1;
                    first = a;
                    last = b;
                    limit = next;
                } else {
                    stack.push(isad, first, a, limit);
                    first = b;
                }
            } else {
                // All keys equal at this depth: look one deeper
                if !budget.update(size, last - first) {
                    break 'sort;
                }
                limit += 1;
                isad += 1;
            }
        }

        // Budget exhausted: settle the groups already known to be sorted
        let pending: Vec<(i32, i32)> = stack
            .remaining()
            .iter()
            .filter(|e| e.d == -3)
            .map(|e| (e.b, e.c))
            .collect();
        for (from, to) in pending {
            self.ls_update_group(isa, from, to);
        }
    }

    fn tr_sort(&mut self, isa: i32, n: i32, depth: i32) {
        if -n >= self.get(0) {
            return;
        }

        let mut budget = TrBudget::new(n, tr_log(n) * TR_CHANCE_NUM / TR_CHANCE_DEN + 1);
        let mut first = 0;
        loop {
            let t = self.get(first);
            if t < 0 {
                first -= t;
            } else {
                let last = self.get(isa + t) + 1;
                if 1 < last - first {
                    self.tr_intro_sort(isa, isa + depth, isa + n, first, last, &mut budget, n);
                    if budget.chance == 0 {
                        log::trace!("divsufsort: rank sort budget exhausted, switching to doubling");
                        if 0 < first {
                            self.set(0, -first);
                        }
                        self.ls_sort(isa, n, depth);
                        break;
                    }
                }
                first = last;
            }
            if first >= n {
                break;
            }
        }
    }

    // ---------------------------------------------------------------------
    // B* bucketing and BWT induction
    // ---------------------------------------------------------------------

    /// Sort the B* suffixes; returns how many there are.
    fn sort_type_bstar(&mut self, bucket_a: &mut [i32], bucket_b: &mut [i32]) -> i32 {
        let n = self.n;

        // Whether the text starts with an ascending step
        let mut flag = 1;
        for i in 1..n {
            if self.text(i - 1) != self.text(i) {
                if self.text(i - 1) > self.text(i) {
                    flag = 0;
                }
                break;
            }
        }

        let mut i = n - 1;
        let mut m = n;

        let ti = self.text(i);
        let t0 = self.text(0);
        if ti < t0 || (ti == t0 && flag != 0) {
            if flag == 0 {
                bucket_b[bucket_bstar(ti, t0)] += 1;
                m -= 1;
                self.set(m, i);
            } else {
                bucket_b[bucket_b_index(ti, t0)] += 1;
            }
            i -= 1;
            while 0 <= i && self.text(i) <= self.text(i + 1) {
                bucket_b[bucket_b_index(self.text(i), self.text(i + 1))] += 1;
                i -= 1;
            }
        }

        while 0 <= i {
            loop {
                bucket_a[self.text(i) as usize] += 1;
                i -= 1;
                if !(0 <= i && self.text(i) >= self.text(i + 1)) {
                    break;
                }
            }
            if 0 <= i {
                bucket_b[bucket_bstar(self.text(i), self.text(i + 1))] += 1;
                m -= 1;
                self.set(m, i);
                i -= 1;
                while 0 <= i && self.text(i) <= self.text(i + 1) {
                    bucket_b[bucket_b_index(self.text(i), self.text(i + 1))] += 1;
                    i -= 1;
                }
            }
        }

        let m = n - m;
        if m == 0 {
            return 0;
        }

        // Bucket start and end offsets
        let mut i = -1;
        let mut j = 0;
        for c0 in 0..256 {
            let t = i + bucket_a[c0 as usize];
            bucket_a[c0 as usize] = i + j;
            i = t + bucket_b[bucket_b_index(c0, c0)];
            for c1 in (c0 + 1)..256 {
                j += bucket_b[bucket_bstar(c0, c1)];
                bucket_b[bucket_bstar(c0, c1)] = j;
                i += bucket_b[bucket_b_index(c0, c1)];
            }
        }

        // Seed the B* suffixes into their 2-character buckets
        let pab = n - m;
        let isab = m;
        let mut i = m - 2;
        while 0 <= i {
            let t = self.get(pab + i);
            let slot = bucket_bstar(self.text(t), self.text(t + 1));
            bucket_b[slot] -= 1;
            self.set(bucket_b[slot], i);
            i -= 1;
        }
        let t = self.get(pab + m - 1);
        let slot = bucket_bstar(self.text(t), self.text(t + 1));
        bucket_b[slot] -= 1;
        self.set(bucket_b[slot], m - 1);

        let (buf, bufsize) = if n - 2 * m <= SCRATCH_LEN as i32 {
            (self.scratch, SCRATCH_LEN as i32)
        } else {
            (m, n - 2 * m)
        };

        let mut c0 = 255;
        let mut j = m;
        while 0 < j {
            let mut c1 = 255;
            while c0 < c1 {
                let i = bucket_b[bucket_bstar(c0, c1)];
                if 1 < j - i {
                    let last_suffix = self.get(i) == m - 1;
                    self.sub_string_sort(pab, i, j, buf, bufsize, 2, last_suffix, n);
                }
                j = i;
                c1 -= 1;
            }
            c0 -= 1;
        }

        // Rank the B* substrings
        let mut i = m - 1;
        while 0 <= i {
            if !is_marked(self.get(i)) {
                let j = i;
                loop {
                    let s = self.get(i);
                    self.set(isab + s, i);
                    i -= 1;
                    if !(0 <= i && !is_marked(self.get(i))) {
                        break;
                    }
                }
                self.set(i + 1, i - j);
                if i <= 0 {
                    break;
                }
            }
            let j = i;
            loop {
                let s = unmark(self.get(i));
                self.set(i, s);
                self.set(isab + s, j);
                i -= 1;
                if !is_marked(self.get(i)) {
                    break;
                }
            }
            let s = self.get(i);
            self.set(isab + s, j);
            i -= 1;
        }

        self.tr_sort(isab, m, 1);

        // Put the sorted B* suffixes back at their text positions
        let mut i = n - 1;
        let mut j = m;
        if self.text(i) < self.text(0) || (self.text(i) == self.text(0) && flag != 0) {
            if flag == 0 {
                j -= 1;
                let slot = self.get(isab + j);
                self.set(slot, i);
            }
            i -= 1;
            while 0 <= i && self.text(i) <= self.text(i + 1) {
                i -= 1;
            }
        }
        while 0 <= i {
            i -= 1;
            while 0 <= i && self.text(i) >= self.text(i + 1) {
                i -= 1;
            }
            if 0 <= i {
                j -= 1;
                let slot = self.get(isab + j);
                self.set(slot, i);
                i -= 1;
                while 0 <= i && self.text(i) <= self.text(i + 1) {
                    i -= 1;
                }
            }
        }

        // Move them to the ends of their buckets
        let mut c0 = 255;
        let mut i = n - 1;
        let mut k = m - 1;
        while 0 <= c0 {
            let mut c1 = 255;
            while c0 < c1 {
                let t = i - bucket_b[bucket_b_index(c0, c1)];
                bucket_b[bucket_b_index(c0, c1)] = i + 1;
                i = t;
                let j = bucket_b[bucket_bstar(c0, c1)];
                while j <= k {
                    let v = self.get(k);
                    self.set(i, v);
                    i -= 1;
                    k -= 1;
                }
                c1 -= 1;
            }
            let t = i - bucket_b[bucket_b_index(c0, c0)];
            bucket_b[bucket_b_index(c0, c0)] = i + 1;
            if c0 < 255 {
                bucket_b[bucket_bstar(c0, c0 + 1)] = t + 1;
            }
            i = bucket_a[c0 as usize];
            c0 -= 1;
        }

        m
    }

    /// Induce the remaining order and emit the BWT; returns the origin row.
    fn construct_bwt(&mut self, bucket_a: &mut [i32], bucket_b: &mut [i32]) -> i32 {
        let n = self.n;
        let mut t = 0;
        let mut c2 = 0;
        let mut origin = -1;

        // Type B suffixes, right to left within each bucket
        let mut c1 = 254;
        while 0 <= c1 {
            let i = bucket_b[bucket_bstar(c1, c1 + 1)];
            let mut j = bucket_a[(c1 + 1) as usize];
            t = 0;
            c2 = -1;
            while i <= j {
                let s1 = self.get(j);
                let mut s = s1;
                if 0 <= s {
                    s -= 1;
                    if s < 0 {
                        s = n - 1;
                    }
                    let c0 = self.text(s);
                    if c0 <= c1 {
                        self.set(j, mark(s1));
                        if 0 < s && self.text(s - 1) > c0 {
                            s = mark(s);
                        }
                        if c2 == c0 {
                            t -= 1;
                            self.set(t, s);
                        } else {
                            if 0 <= c2 {
                                bucket_b[bucket_b_index(c2, c1)] = t;
                            }
                            c2 = c0;
                            t = bucket_b[bucket_b_index(c2, c1)] - 1;
                            self.set(t, s);
                        }
                    }
                } else {
                    self.set(j, unmark(s));
                }
                j -= 1;
            }
            c1 -= 1;
        }

        // Type A suffixes left to right, emitting BWT bytes as we go
        for i in 0..n {
            let mut s1 = self.get(i);
            let mut s = s1;
            if 0 <= s {
                s -= 1;
                if s < 0 {
                    s = n - 1;
                }
                let c0 = self.text(s);
                if c0 >= self.text(s + 1) {
                    if 0 < s && self.text(s - 1) < c0 {
                        s = mark(s);
                    }
                    if c0 == c2 {
                        t += 1;
                        self.set(t, s);
                    } else {
                        if c2 != -1 {
                            bucket_a[c2 as usize] = t;
                        }
                        c2 = c0;
                        t = bucket_a[c2 as usize] + 1;
                        self.set(t, s);
                    }
                }
            } else {
                s1 = unmark(s1);
            }

            if s1 == 0 {
                let last = self.text(n - 1);
                self.set(i, last);
                origin = i;
            } else {
                let prev = self.text(s1 - 1);
                self.set(i, prev);
            }
        }

        origin
    }
}

/// Median of five keys, returning the matching position.
fn median5(mut v: [i32; 5], mut t: [i32; 5]) -> i32 {
    fn swap(v: &mut [i32; 5], t: &mut [i32; 5], i: usize, j: usize) {
        v.swap(i, j);
        t.swap(i, j);
    }

    if t[1] > t[2] {
        swap(&mut v, &mut t, 1, 2);
    }
    if t[3] > t[4] {
        swap(&mut v, &mut t, 3, 4);
    }
    if t[1] > t[3] {
        swap(&mut v, &mut t, 1, 3);
        swap(&mut v, &mut t, 2, 4);
    }
    if t[0] > t[2] {
        swap(&mut v, &mut t, 0, 2);
    }
    if t[0] > t[3] {
        swap(&mut v, &mut t, 0, 3);
        swap(&mut v, &mut t, 2, 4);
    }
    if t[2] > t[3] { v[3] } else { v[2] }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Naive BWT over sorted rotations.
    fn reference_bwt(data: &[u8]) -> (Vec<u8>, u32) {
        let n = data.len();
        let mut rotations: Vec<usize> = (0..n).collect();
        rotations.sort_by(|&a, &b| {
            (0..n)
                .map(|k| data[(a + k) % n].cmp(&data[(b + k) % n]))
                .find(|o| o.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let bwt = rotations.iter().map(|&r| data[(r + n - 1) % n]).collect();
        let origin = rotations.iter().position(|&r| r == 0).unwrap() as u32;
        (bwt, origin)
    }

    fn run(data: &[u8]) -> (Vec<u8>, u32) {
        let n = data.len();
        let mut text = data.to_vec();
        text.push(data.first().copied().unwrap_or(0));
        let mut sa = vec![0i32; workspace_len(n)];
        let origin = DivSufSort::new(&text, &mut sa, n).bwt();
        (sa[..n].iter().map(|&b| b as u8).collect(), origin)
    }

    /// Rotations that compare equal make the origin row ambiguous, so check
    /// the output column and that the origin row is the input's rotation.
    fn assert_matches_reference(data: &[u8]) {
        let (bwt, origin) = run(data);
        let (expected, _) = reference_bwt(data);
        assert_eq!(bwt, expected, "BWT mismatch for {:?}", data);
        if !data.is_empty() {
            assert_eq!(bwt[origin as usize], data[data.len() - 1]);
        }
    }

    fn lcg_bytes(len: usize, seed: u64, alphabet: u8) -> Vec<u8> {
        let mut state = seed;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                ((state >> 33) % alphabet as u64) as u8
            })
            .collect()
    }

    #[test]
    fn test_log_tables() {
        assert_eq!(LOG2_TABLE[0], -1);
        assert_eq!(LOG2_TABLE[1], 0);
        assert_eq!(LOG2_TABLE[255], 7);
        assert_eq!(ss_log(1024), 10);
        assert_eq!(tr_log(1 << 20), 20);
        assert_eq!(tr_log(900_000), 19);
    }

    #[test]
    fn test_trivial_lengths() {
        assert_eq!(run(b""), (vec![], 0));
        assert_eq!(run(b"x"), (b"x".to_vec(), 0));
    }

    #[test]
    fn test_banana() {
        let (bwt, origin) = run(b"banana");
        assert_eq!(bwt, b"nnbaaa");
        assert_eq!(origin, 3);
    }

    #[test]
    fn test_abc() {
        // Sorted rotations: abc, bca, cab
        assert_eq!(run(b"abc"), (b"cab".to_vec(), 0));
    }

    #[test]
    fn test_single_repeated_byte() {
        let (bwt, origin) = run(&[0x41; 100]);
        assert_eq!(bwt, vec![0x41; 100]);
        assert_eq!(origin, 0);
    }

    #[test]
    fn test_small_strings_match_reference() {
        for data in [
            b"ab".as_slice(),
            b"ba",
            b"aab",
            b"abab",
            b"mississippi",
            b"abracadabra",
            b"zyxwvutsrqponmlkjihgfedcba",
            b"the quick brown fox jumps over the lazy dog",
            &[0, 255, 0, 255, 128, 0],
        ] {
            assert_matches_reference(data);
        }
    }

    #[test]
    fn test_random_matches_reference() {
        for (len, alphabet) in [(50, 2), (300, 4), (1000, 26), (2000, 255), (3000, 3)] {
            let data = lcg_bytes(len, len as u64, alphabet);
            assert_matches_reference(&data);
        }
    }

    #[test]
    fn test_repetitive_matches_reference() {
        // Long periodic input drives the rank-doubling sort
        let data: Vec<u8> = b"abcabcabd".iter().copied().cycle().take(4000).collect();
        assert_matches_reference(&data);

        let mut runs = vec![b'a'; 1500];
        runs.extend_from_slice(b"b");
        runs.extend(vec![b'a'; 1500]);
        assert_matches_reference(&runs);
    }

    #[test]
    fn test_bucket_indices() {
        assert_eq!(bucket_b_index(1, 2), 0x0201);
        assert_eq!(bucket_bstar(1, 2), 0x0102);
        assert_eq!(bucket_b_index(255, 255), BUCKET_B_SIZE - 1);
    }

    #[test]
    fn test_decreasing_text_matches_reference() {
        assert_matches_reference(b"cba");
        let descending: Vec<u8> = (0..=255u8).rev().collect();
        assert_matches_reference(&descending);
        let cycles: Vec<u8> = descending.iter().copied().cycle().take(1000).collect();
        assert_matches_reference(&cycles);
    }

    #[test]
    fn test_many_short_inputs_match_reference() {
        for seed in 0..400u64 {
            let len = 2 + (seed as usize * 7) % 120;
            let alphabet = [2u8, 3, 4, 16, 255][seed as usize % 5];
            assert_matches_reference(&lcg_bytes(len, seed, alphabet));

            let period = lcg_bytes(1 + seed as usize % 5, seed + 1000, alphabet);
            let periodic: Vec<u8> = period.iter().copied().cycle().take(len).collect();
            assert_matches_reference(&periodic);
        }
    }
}
