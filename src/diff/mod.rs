//! General-purpose sequence comparison.
//!
//! The comparator works on any pair of indexable sequences through the
//! [`Input`] capability and reports the result through an [`Output`] sink,
//! so the same engine diffs source lines, tokens inside a changed line range,
//! or anything else a caller can index and compare.
//!
//! The core is Myers' greedy O(ND) algorithm run over the region left after
//! trimming the common prefix and suffix. Typical live edits touch a handful
//! of lines in an otherwise identical file, so `D` stays small and the cost is
//! dominated by the linear trim.

pub mod text;

pub use text::{
    apply_chunks, compare_strings, compare_strings_with_limit, texts_identical,
    PositionTranslator, DEFAULT_FINE_DIFF_LIMIT,
};

use serde::Serialize;

/// Two sequences that can be compared element by element.
pub trait Input {
    /// Number of elements in the first (old) sequence.
    fn len1(&self) -> usize;
    /// Number of elements in the second (new) sequence.
    fn len2(&self) -> usize;
    /// Whether element `index1` of the old sequence equals element `index2`
    /// of the new one.
    fn equals(&self, index1: usize, index2: usize) -> bool;
}

/// Receives the comparison result one chunk at a time, in increasing order.
pub trait Output {
    /// Region `[pos1, pos1 + len1)` of the old sequence was replaced by
    /// `[pos2, pos2 + len2)` of the new sequence.
    fn add_chunk(&mut self, pos1: usize, pos2: usize, len1: usize, len2: usize);
}

/// One replaced region: `[old_start, old_end)` in the old sequence became the
/// region ending at `new_end` in the new sequence.
///
/// The start of the new region is not stored; it is the old start shifted by
/// the size delta accumulated over the preceding chunks (see
/// [`DiffChunk::new_start`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DiffChunk {
    pub old_start: usize,
    pub old_end: usize,
    pub new_end: usize,
}

impl DiffChunk {
    pub fn old_len(&self) -> usize {
        self.old_end - self.old_start
    }

    /// Start of this chunk's region in the new sequence, given the chunk
    /// immediately before it (if any).
    pub fn new_start(&self, previous: Option<&DiffChunk>) -> usize {
        match previous {
            Some(prev) => self.old_start + prev.new_end - prev.old_end,
            None => self.old_start,
        }
    }

    /// Whether this chunk is a pure insertion (nothing removed from the old side).
    pub fn is_insertion(&self) -> bool {
        self.old_start == self.old_end
    }
}

/// [`Input`] over two slices of comparable elements.
pub struct SliceInput<'a, T> {
    pub old: &'a [T],
    pub new: &'a [T],
}

impl<'a, T: PartialEq> SliceInput<'a, T> {
    pub fn new(old: &'a [T], new: &'a [T]) -> Self {
        Self { old, new }
    }
}

impl<T: PartialEq> Input for SliceInput<'_, T> {
    fn len1(&self) -> usize {
        self.old.len()
    }

    fn len2(&self) -> usize {
        self.new.len()
    }

    fn equals(&self, index1: usize, index2: usize) -> bool {
        self.old[index1] == self.new[index2]
    }
}

/// [`Input`] backed by a closure, for sequences that are not materialized.
pub struct FnInput<F> {
    len1: usize,
    len2: usize,
    equals: F,
}

impl<F: Fn(usize, usize) -> bool> FnInput<F> {
    pub fn new(len1: usize, len2: usize, equals: F) -> Self {
        Self { len1, len2, equals }
    }
}

impl<F: Fn(usize, usize) -> bool> Input for FnInput<F> {
    fn len1(&self) -> usize {
        self.len1
    }

    fn len2(&self) -> usize {
        self.len2
    }

    fn equals(&self, index1: usize, index2: usize) -> bool {
        (self.equals)(index1, index2)
    }
}

/// [`Output`] that collects plain [`DiffChunk`]s.
#[derive(Debug, Default)]
pub struct ChunkCollector {
    chunks: Vec<DiffChunk>,
}

impl ChunkCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_chunks(self) -> Vec<DiffChunk> {
        self.chunks
    }
}

impl Output for ChunkCollector {
    fn add_chunk(&mut self, pos1: usize, pos2: usize, len1: usize, len2: usize) {
        self.chunks.push(DiffChunk {
            old_start: pos1,
            old_end: pos1 + len1,
            new_end: pos2 + len2,
        });
    }
}

/// [`Output`] that forwards every chunk to a closure.
pub struct FnOutput<F> {
    sink: F,
}

impl<F: FnMut(usize, usize, usize, usize)> FnOutput<F> {
    pub fn new(sink: F) -> Self {
        Self { sink }
    }
}

impl<F: FnMut(usize, usize, usize, usize)> Output for FnOutput<F> {
    fn add_chunk(&mut self, pos1: usize, pos2: usize, len1: usize, len2: usize) {
        (self.sink)(pos1, pos2, len1, len2)
    }
}

/// Compare the two sequences of `input` and stream the differing regions
/// into `output`.
///
/// Chunks arrive ordered by position, never overlap, and never touch: a run
/// of deletions next to a run of insertions is reported as one chunk.
pub fn calculate_difference<I, O>(input: &I, output: &mut O)
where
    I: Input + ?Sized,
    O: Output + ?Sized,
{
    let len1 = input.len1();
    let len2 = input.len2();

    let mut prefix = 0;
    while prefix < len1 && prefix < len2 && input.equals(prefix, prefix) {
        prefix += 1;
    }

    let mut suffix = 0;
    while suffix < len1 - prefix
        && suffix < len2 - prefix
        && input.equals(len1 - 1 - suffix, len2 - 1 - suffix)
    {
        suffix += 1;
    }

    compare_region(
        input,
        output,
        prefix,
        prefix,
        len1 - prefix - suffix,
        len2 - prefix - suffix,
    );
}

/// Convenience wrapper returning the chunks as a vector.
pub fn diff<I: Input + ?Sized>(input: &I) -> Vec<DiffChunk> {
    let mut collector = ChunkCollector::new();
    calculate_difference(input, &mut collector);
    collector.into_chunks()
}

const UNSET: isize = isize::MIN;

/// Which move reaches diagonal `k` at edit distance `d`, and the x coordinate
/// right after that move (before following the diagonal).
///
/// `v` reads the furthest x reached on a diagonal after step `d - 1`.
/// Moves that would leave the `n` x `m` grid are rejected.
fn choose_move(
    v: impl Fn(isize) -> isize,
    k: isize,
    d: isize,
    n: isize,
    m: isize,
) -> Option<(isize, isize)> {
    let down = if k < d || d == 0 {
        let x = v(k + 1);
        (x != UNSET && x - k <= m).then_some((k + 1, x))
    } else {
        None
    };
    let right = if k > -d {
        let x = v(k - 1);
        (x != UNSET && x + 1 <= n).then(|| (k - 1, x + 1))
    } else {
        None
    };

    match (down, right) {
        (Some(down), Some(right)) => {
            if right.1 <= down.1 {
                Some(down)
            } else {
                Some(right)
            }
        }
        (down, right) => down.or(right),
    }
}

fn compare_region<I, O>(input: &I, output: &mut O, base1: usize, base2: usize, n: usize, m: usize)
where
    I: Input + ?Sized,
    O: Output + ?Sized,
{
    if n == 0 && m == 0 {
        return;
    }
    if n == 0 || m == 0 {
        output.add_chunk(base1, base2, n, m);
        return;
    }

    let (n, m) = (n as isize, m as isize);
    let max = n + m;
    let offset = max + 1;
    let mut v = vec![UNSET; (2 * max + 3) as usize];
    v[(offset + 1) as usize] = 0;

    // trace[d] holds v[-d-1 ..= d+1] as it was before step d.
    let mut trace: Vec<Vec<isize>> = Vec::new();
    let equals = |x: isize, y: isize| input.equals(base1 + x as usize, base2 + y as usize);

    let mut found = None;
    'search: for d in 0..=max {
        let lo = (offset - d - 1) as usize;
        let hi = (offset + d + 1) as usize;
        trace.push(v[lo..=hi].to_vec());

        let mut k = -d;
        while k <= d {
            let idx = (offset + k) as usize;
            let snapshot = |diag: isize| v[(offset + diag) as usize];
            if let Some((_, start_x)) = choose_move(snapshot, k, d, n, m) {
                let mut x = start_x;
                let mut y = x - k;
                while x < n && y < m && equals(x, y) {
                    x += 1;
                    y += 1;
                }
                v[idx] = x;
                if x == n && y == m {
                    found = Some(d);
                    break 'search;
                }
            } else {
                v[idx] = UNSET;
            }
            k += 2;
        }
    }

    let Some(distance) = found else {
        // Unreachable for finite inputs; report the whole region as replaced.
        output.add_chunk(base1, base2, n as usize, m as usize);
        return;
    };

    // Walk back through the trace collecting matched pairs, last to first.
    let mut matches: Vec<(usize, usize)> = Vec::new();
    let (mut x, mut y) = (n, m);
    for d in (0..=distance).rev() {
        let snapshot = &trace[d as usize];
        let read = |diag: isize| {
            let index = diag + d + 1;
            if index < 0 || index as usize >= snapshot.len() {
                UNSET
            } else {
                snapshot[index as usize]
            }
        };
        let k = x - y;
        let Some((prev_k, start_x)) = choose_move(read, k, d, n, m) else {
            break;
        };
        let start_y = start_x - k;
        while x > start_x && y > start_y {
            x -= 1;
            y -= 1;
            matches.push((x as usize, y as usize));
        }
        if d > 0 {
            x = read(prev_k);
            y = x - prev_k;
        }
    }
    matches.reverse();

    let (mut i, mut j) = (0usize, 0usize);
    for (mx, my) in matches {
        if mx > i || my > j {
            output.add_chunk(base1 + i, base2 + j, mx - i, my - j);
        }
        i = mx + 1;
        j = my + 1;
    }
    let (n, m) = (n as usize, m as usize);
    if i < n || j < m {
        output.add_chunk(base1 + i, base2 + j, n - i, m - j);
    }
}
