//! Incremental list edits.
//!
//! An [`IncrementalList`] stream describes a list by its edits instead of by
//! full snapshots. Every edit also carries `after`, the whole list once the
//! edit is applied, so a consumer can always fall back to the snapshot.
//!
//! [`FlatMapIncremental`] turns edits against a list into edits against the
//! flattened projection of that list. An element may project to any number
//! of elements (including none), so positions are remapped through the
//! projected sizes of the elements in front of the edit. Edits that do not
//! change the flattened list are dropped.
//!
//! The keyed variants live in [`map`].

pub mod map;

pub use map::{
    filter_entries_incremental, filter_latest_incremental, flatten_incremental, for_key,
    group_by_incremental, map_values_incremental, map_values_uncached, merge_incremental,
    to_incremental_list, IncrementalMap, ValueSource,
};

use std::ops::Range;
use std::sync::Arc;

use futures::stream::{self, Stream, StreamExt};
use tracing::warn;

/// One edit against an ordered list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncrementalList<T> {
    /// Full replacement
    Begin { after: Arc<Vec<T>> },
    /// `count` elements inserted at `pos`
    Insert {
        pos: usize,
        count: usize,
        after: Arc<Vec<T>>,
    },
    /// `count` elements removed from `pos`
    Remove {
        pos: usize,
        count: usize,
        after: Arc<Vec<T>>,
    },
    /// `count` elements taken from `pos` and reinserted at `out_pos` of the
    /// resulting list
    Move {
        pos: usize,
        count: usize,
        out_pos: usize,
        after: Arc<Vec<T>>,
    },
    /// `count` elements at `pos` replaced in place
    Update {
        pos: usize,
        count: usize,
        after: Arc<Vec<T>>,
    },
}

impl<T> IncrementalList<T> {
    pub fn after(&self) -> &Arc<Vec<T>> {
        match self {
            IncrementalList::Begin { after }
            | IncrementalList::Insert { after, .. }
            | IncrementalList::Remove { after, .. }
            | IncrementalList::Move { after, .. }
            | IncrementalList::Update { after, .. } => after,
        }
    }

    pub fn is_begin(&self) -> bool {
        matches!(self, IncrementalList::Begin { .. })
    }
}

impl<T: Clone> IncrementalList<T> {
    /// Applies this edit to `previous`, taking new elements from `after`.
    ///
    /// Returns `None` when the edit does not fit `previous`.
    pub fn apply_to(&self, previous: &[T]) -> Option<Vec<T>> {
        let mut list = previous.to_vec();
        match self {
            IncrementalList::Begin { after } => return Some(after.to_vec()),
            IncrementalList::Insert { pos, count, after } => {
                let inserted = after.get(span(*pos, *count, after.len())?)?;
                if *pos > list.len() {
                    return None;
                }
                list.splice(*pos..*pos, inserted.iter().cloned());
            }
            IncrementalList::Remove { pos, count, .. } => {
                list.drain(span(*pos, *count, list.len())?);
            }
            IncrementalList::Move {
                pos,
                count,
                out_pos,
                ..
            } => {
                let moved: Vec<T> = list.drain(span(*pos, *count, list.len())?).collect();
                if *out_pos > list.len() {
                    return None;
                }
                list.splice(*out_pos..*out_pos, moved);
            }
            IncrementalList::Update { pos, count, after } => {
                let range = span(*pos, *count, list.len())?;
                let replacement = after.get(range.clone())?;
                list.splice(range, replacement.iter().cloned());
            }
        }
        Some(list)
    }
}

/// `pos..pos + count` if it fits in `len`.
fn span(pos: usize, count: usize, len: usize) -> Option<Range<usize>> {
    let end = pos.checked_add(count)?;
    (end <= len).then_some(pos..end)
}

// =============================================================================
// Flat map
// =============================================================================

/// Remaps edits through a projection `T -> Vec<R>`.
///
/// Keeps the projected groups of the last input list and the flattened
/// output, so every input edit is handled without re-projecting untouched
/// elements.
pub struct FlatMapIncremental<T, R, F> {
    projection: F,
    groups: Option<Vec<Vec<R>>>,
    flat: Arc<Vec<R>>,
    _input: std::marker::PhantomData<fn(&T)>,
}

impl<T, R, F> FlatMapIncremental<T, R, F>
where
    R: Clone,
    F: FnMut(&T) -> Vec<R>,
{
    pub fn new(projection: F) -> Self {
        Self {
            projection,
            groups: None,
            flat: Arc::new(Vec::new()),
            _input: std::marker::PhantomData,
        }
    }

    /// Flattened list after the last applied edit.
    pub fn current(&self) -> &Arc<Vec<R>> {
        &self.flat
    }

    /// Applies one input edit, returning the output edits (possibly none).
    pub fn apply(&mut self, command: &IncrementalList<T>) -> Vec<IncrementalList<R>> {
        if command.is_begin() || self.groups.is_none() {
            return vec![self.begin(command.after())];
        }
        match self.apply_edit(command) {
            Some(edits) => edits,
            None => {
                warn!("Incremental edit does not fit the previous list; resynchronizing");
                vec![self.begin(command.after())]
            }
        }
    }

    fn begin(&mut self, after: &[T]) -> IncrementalList<R> {
        let groups: Vec<Vec<R>> = after.iter().map(&mut self.projection).collect();
        self.flat = Arc::new(groups.concat());
        self.groups = Some(groups);
        IncrementalList::Begin {
            after: self.flat.clone(),
        }
    }

    fn apply_edit(&mut self, command: &IncrementalList<T>) -> Option<Vec<IncrementalList<R>>> {
        let projection = &mut self.projection;
        let groups = self.groups.as_mut()?;
        let mut flat: Vec<R> = self.flat.to_vec();
        let mut edits = Vec::new();

        match command {
            IncrementalList::Begin { .. } => return None,
            IncrementalList::Insert { pos, count, after } => {
                let inputs = after.get(span(*pos, *count, after.len())?)?;
                if *pos > groups.len() {
                    return None;
                }
                let projected: Vec<Vec<R>> = inputs.iter().map(&mut *projection).collect();
                let size: usize = projected.iter().map(Vec::len).sum();
                let start = flat_len(&groups[..*pos]);
                groups.splice(*pos..*pos, projected.iter().cloned());
                if size > 0 {
                    flat.splice(start..start, projected.into_iter().flatten());
                    edits.push(IncrementalList::Insert {
                        pos: start,
                        count: size,
                        after: Arc::new(flat.clone()),
                    });
                }
            }
            IncrementalList::Remove { pos, count, .. } => {
                let range = span(*pos, *count, groups.len())?;
                let start = flat_len(&groups[..*pos]);
                let size = flat_len(&groups[range.clone()]);
                groups.drain(range);
                if size > 0 {
                    flat.drain(start..start + size);
                    edits.push(IncrementalList::Remove {
                        pos: start,
                        count: size,
                        after: Arc::new(flat.clone()),
                    });
                }
            }
            IncrementalList::Move {
                pos,
                count,
                out_pos,
                ..
            } => {
                let range = span(*pos, *count, groups.len())?;
                let start = flat_len(&groups[..*pos]);
                let moved: Vec<Vec<R>> = groups.drain(range).collect();
                if *out_pos > groups.len() {
                    return None;
                }
                let size: usize = moved.iter().map(Vec::len).sum();
                groups.splice(*out_pos..*out_pos, moved);
                if size > 0 {
                    let out_start = flat_len(&groups[..*out_pos]);
                    let items: Vec<R> = flat.drain(start..start + size).collect();
                    flat.splice(out_start..out_start, items);
                    edits.push(IncrementalList::Move {
                        pos: start,
                        count: size,
                        out_pos: out_start,
                        after: Arc::new(flat.clone()),
                    });
                }
            }
            IncrementalList::Update { pos, count, after } => {
                let range = span(*pos, *count, groups.len())?;
                let inputs = after.get(range.clone())?;
                let start = flat_len(&groups[..*pos]);
                let removed = flat_len(&groups[range.clone()]);
                let projected: Vec<Vec<R>> = inputs.iter().map(&mut *projection).collect();
                let block: Vec<R> = projected.concat();
                let added = block.len();
                groups.splice(range, projected);

                // Size changes go first, then the overlapping part is
                // updated in place.
                let shared = removed.min(added);
                if removed > added {
                    flat.drain(start + shared..start + removed);
                    edits.push(IncrementalList::Remove {
                        pos: start + shared,
                        count: removed - added,
                        after: Arc::new(flat.clone()),
                    });
                } else if added > removed {
                    flat.splice(
                        start + shared..start + shared,
                        block[shared..].iter().cloned(),
                    );
                    edits.push(IncrementalList::Insert {
                        pos: start + shared,
                        count: added - removed,
                        after: Arc::new(flat.clone()),
                    });
                }
                if shared > 0 {
                    flat.splice(start..start + shared, block[..shared].iter().cloned());
                    edits.push(IncrementalList::Update {
                        pos: start,
                        count: shared,
                        after: Arc::new(flat.clone()),
                    });
                }
            }
        }

        self.flat = Arc::new(flat);
        Some(edits)
    }
}

fn flat_len<R>(groups: &[Vec<R>]) -> usize {
    groups.iter().map(Vec::len).sum()
}

// =============================================================================
// Stream adapters
// =============================================================================

pub fn flat_map_incremental<S, T, R, F>(upstream: S, projection: F) -> impl Stream<Item = IncrementalList<R>>
where
    S: Stream<Item = IncrementalList<T>>,
    R: Clone,
    F: FnMut(&T) -> Vec<R>,
{
    let mut state = FlatMapIncremental::new(projection);
    upstream
        .map(move |command| stream::iter(state.apply(&command)))
        .flatten()
}

pub fn map_incremental<S, T, R, F>(upstream: S, mut map: F) -> impl Stream<Item = IncrementalList<R>>
where
    S: Stream<Item = IncrementalList<T>>,
    R: Clone,
    F: FnMut(&T) -> R,
{
    flat_map_incremental(upstream, move |item| vec![map(item)])
}

pub fn filter_incremental<S, T, F>(upstream: S, mut keep: F) -> impl Stream<Item = IncrementalList<T>>
where
    S: Stream<Item = IncrementalList<T>>,
    T: Clone,
    F: FnMut(&T) -> bool,
{
    flat_map_incremental(upstream, move |item: &T| {
        if keep(item) {
            vec![item.clone()]
        } else {
            Vec::new()
        }
    })
}

// =============================================================================
// Snapshot diffing
// =============================================================================

/// Edits turning `previous` into `next`.
///
/// The differing middle (after the common prefix and suffix) becomes one
/// `Update` when both sides have the same length, one `Insert` or `Remove`
/// when one side is empty, and a `Remove` followed by an `Insert` otherwise.
/// Without a previous list the result is a single `Begin`.
pub fn diff_snapshots<T>(previous: Option<&[T]>, next: &Arc<Vec<T>>) -> Vec<IncrementalList<T>>
where
    T: Clone + PartialEq,
{
    let Some(previous) = previous else {
        return vec![IncrementalList::Begin {
            after: next.clone(),
        }];
    };

    let prefix = previous
        .iter()
        .zip(next.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let suffix = previous[prefix..]
        .iter()
        .rev()
        .zip(next[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();
    let removed = previous.len() - prefix - suffix;
    let added = next.len() - prefix - suffix;

    match (removed, added) {
        (0, 0) => Vec::new(),
        (0, count) => vec![IncrementalList::Insert {
            pos: prefix,
            count,
            after: next.clone(),
        }],
        (count, 0) => vec![IncrementalList::Remove {
            pos: prefix,
            count,
            after: next.clone(),
        }],
        (removed, added) if removed == added => vec![IncrementalList::Update {
            pos: prefix,
            count: added,
            after: next.clone(),
        }],
        (removed, added) => {
            let mut intermediate = previous.to_vec();
            intermediate.drain(prefix..prefix + removed);
            vec![
                IncrementalList::Remove {
                    pos: prefix,
                    count: removed,
                    after: Arc::new(intermediate),
                },
                IncrementalList::Insert {
                    pos: prefix,
                    count: added,
                    after: next.clone(),
                },
            ]
        }
    }
}

/// Turns a stream of snapshots into edits between consecutive snapshots.
/// Unchanged snapshots produce nothing.
pub fn snapshots_to_incremental<S, T>(upstream: S) -> impl Stream<Item = IncrementalList<T>>
where
    S: Stream<Item = Arc<Vec<T>>>,
    T: Clone + PartialEq,
{
    let mut previous: Option<Arc<Vec<T>>> = None;
    upstream
        .map(move |next| {
            let edits = diff_snapshots(previous.as_ref().map(|list| list.as_slice()), &next);
            previous = Some(next);
            stream::iter(edits)
        })
        .flatten()
}
