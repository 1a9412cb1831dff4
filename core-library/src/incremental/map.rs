//! Incremental map edits.
//!
//! The keyed counterpart of [`IncrementalList`]. An [`IncrementalMap`]
//! stream describes a map by per-key edits, each carrying the whole map once
//! the edit is applied.
//!
//! Grouping a list stream by key ([`group_by_incremental`]) gives a map whose
//! values are the latest edit against each group, so a consumer following one
//! key ([`for_key`]) sees the songs of one album as list edits without the
//! rest of the library being relisted.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::{self, AbortHandle, Abortable};
use futures::stream::{self, BoxStream, SelectAll, Stream, StreamExt};
use tracing::warn;

use super::{span, IncrementalList};

/// One edit against a keyed map.
#[derive(Debug, Clone)]
pub enum IncrementalMap<K, V> {
    /// Full replacement
    Begin { after: Arc<HashMap<K, V>> },
    /// `key` added
    Insert { key: K, after: Arc<HashMap<K, V>> },
    /// `key` removed
    Remove { key: K, after: Arc<HashMap<K, V>> },
    /// The value under `key` now lives under `out_key`
    Move {
        key: K,
        out_key: K,
        after: Arc<HashMap<K, V>>,
    },
    /// The value under `key` replaced
    Update { key: K, after: Arc<HashMap<K, V>> },
}

impl<K, V> IncrementalMap<K, V> {
    pub fn after(&self) -> &Arc<HashMap<K, V>> {
        match self {
            IncrementalMap::Begin { after }
            | IncrementalMap::Insert { after, .. }
            | IncrementalMap::Remove { after, .. }
            | IncrementalMap::Move { after, .. }
            | IncrementalMap::Update { after, .. } => after,
        }
    }

    pub fn is_begin(&self) -> bool {
        matches!(self, IncrementalMap::Begin { .. })
    }

    /// Whether this edit can change the value under `key`. `Begin` touches
    /// every key.
    pub fn touches(&self, key: &K) -> bool
    where
        K: PartialEq,
    {
        match self {
            IncrementalMap::Begin { .. } => true,
            IncrementalMap::Insert { key: k, .. }
            | IncrementalMap::Remove { key: k, .. }
            | IncrementalMap::Update { key: k, .. } => k == key,
            IncrementalMap::Move { key: k, out_key, .. } => k == key || out_key == key,
        }
    }

    /// The same edit against a different map.
    fn with_after<S>(&self, after: Arc<HashMap<K, S>>) -> IncrementalMap<K, S>
    where
        K: Clone,
    {
        match self {
            IncrementalMap::Begin { .. } => IncrementalMap::Begin { after },
            IncrementalMap::Insert { key, .. } => IncrementalMap::Insert {
                key: key.clone(),
                after,
            },
            IncrementalMap::Remove { key, .. } => IncrementalMap::Remove {
                key: key.clone(),
                after,
            },
            IncrementalMap::Move { key, out_key, .. } => IncrementalMap::Move {
                key: key.clone(),
                out_key: out_key.clone(),
                after,
            },
            IncrementalMap::Update { key, .. } => IncrementalMap::Update {
                key: key.clone(),
                after,
            },
        }
    }
}

impl<K, V> IncrementalMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Applies this edit to `previous`, taking new values from `after`.
    ///
    /// Returns `None` when the edit does not fit `previous`.
    pub fn apply_to(&self, previous: &HashMap<K, V>) -> Option<HashMap<K, V>> {
        let mut map = previous.clone();
        match self {
            IncrementalMap::Begin { after } => return Some((**after).clone()),
            IncrementalMap::Insert { key, after } => {
                if map.contains_key(key) {
                    return None;
                }
                map.insert(key.clone(), after.get(key)?.clone());
            }
            IncrementalMap::Remove { key, .. } => {
                map.remove(key)?;
            }
            IncrementalMap::Move { key, out_key, .. } => {
                if map.contains_key(out_key) {
                    return None;
                }
                let value = map.remove(key)?;
                map.insert(out_key.clone(), value);
            }
            IncrementalMap::Update { key, after } => {
                *map.get_mut(key)? = after.get(key)?.clone();
            }
        }
        Some(map)
    }
}

// =============================================================================
// Group by
// =============================================================================

/// Splits list edits into per-group list edits.
///
/// Groups keep the relative order of their members in the input list. Each
/// value of the output map is the last edit applied to that group, so a group
/// that just appeared holds a `Begin`. Moves that keep a group's order are
/// not reported for that group.
pub struct GroupByIncremental<T, K, F> {
    key_of: F,
    /// Key of every element of the input list
    keys: Option<Vec<K>>,
    groups: HashMap<K, IncrementalList<T>>,
}

type Grouped<K, T> = IncrementalMap<K, IncrementalList<T>>;

impl<T, K, F> GroupByIncremental<T, K, F>
where
    T: Clone,
    K: Eq + Hash + Clone,
    F: FnMut(&T) -> K,
{
    pub fn new(key_of: F) -> Self {
        Self {
            key_of,
            keys: None,
            groups: HashMap::new(),
        }
    }

    pub fn current(&self) -> &HashMap<K, IncrementalList<T>> {
        &self.groups
    }

    /// Applies one input edit, returning one output edit per touched element.
    pub fn apply(&mut self, command: &IncrementalList<T>) -> Vec<Grouped<K, T>> {
        if command.is_begin() || self.keys.is_none() {
            return vec![self.begin(command.after())];
        }
        let Some(mut keys) = self.keys.take() else {
            return vec![self.begin(command.after())];
        };
        let mut out = Vec::new();
        let applied = self.apply_edit(&mut keys, command, &mut out);
        self.keys = Some(keys);
        match applied {
            Some(()) => out,
            None => {
                warn!("Incremental edit does not fit the grouped list; resynchronizing");
                vec![self.begin(command.after())]
            }
        }
    }

    fn begin(&mut self, after: &[T]) -> Grouped<K, T> {
        let keys: Vec<K> = after.iter().map(&mut self.key_of).collect();
        let mut members: HashMap<K, Vec<T>> = HashMap::new();
        for (key, item) in keys.iter().zip(after) {
            members.entry(key.clone()).or_default().push(item.clone());
        }
        self.groups = members
            .into_iter()
            .map(|(key, items)| {
                (
                    key,
                    IncrementalList::Begin {
                        after: Arc::new(items),
                    },
                )
            })
            .collect();
        self.keys = Some(keys);
        IncrementalMap::Begin {
            after: self.snapshot(),
        }
    }

    fn apply_edit(
        &mut self,
        keys: &mut Vec<K>,
        command: &IncrementalList<T>,
        out: &mut Vec<Grouped<K, T>>,
    ) -> Option<()> {
        match command {
            IncrementalList::Begin { .. } => return None,
            IncrementalList::Insert { pos, count, after } => {
                let items = after.get(span(*pos, *count, after.len())?)?;
                if *pos > keys.len() {
                    return None;
                }
                for (offset, item) in items.iter().enumerate() {
                    let index = pos + offset;
                    let key = (self.key_of)(item);
                    let inner = inner_position(keys, index, &key);
                    keys.insert(index, key.clone());
                    self.add(key, inner, item.clone(), out)?;
                }
            }
            IncrementalList::Remove { pos, count, .. } => {
                span(*pos, *count, keys.len())?;
                for _ in 0..*count {
                    let key = keys.remove(*pos);
                    let inner = inner_position(keys, *pos, &key);
                    self.take(&key, inner, out)?;
                }
            }
            IncrementalList::Move {
                pos,
                count,
                out_pos,
                ..
            } => {
                span(*pos, *count, keys.len())?;
                span(*out_pos, *count, keys.len())?;
                // One element at a time; `to` indexes the list after removal.
                for step in 0..*count {
                    let (from, to) = if out_pos <= pos {
                        (pos + step, out_pos + step)
                    } else {
                        (*pos, out_pos + count - 1)
                    };
                    let key = keys.remove(from);
                    let old_inner = inner_position(keys, from, &key);
                    keys.insert(to, key.clone());
                    let new_inner = inner_position(keys, to, &key);
                    self.reorder(&key, old_inner, new_inner, out)?;
                }
            }
            IncrementalList::Update { pos, count, after } => {
                let range = span(*pos, *count, keys.len())?;
                let items = after.get(range.clone())?;
                for (index, item) in range.zip(items) {
                    let key = (self.key_of)(item);
                    let old = keys[index].clone();
                    let old_inner = inner_position(keys, index, &old);
                    if key == old {
                        self.replace(&key, old_inner, item.clone(), out)?;
                        continue;
                    }
                    self.take(&old, old_inner, out)?;
                    keys[index] = key.clone();
                    let inner = inner_position(keys, index, &key);
                    self.add(key, inner, item.clone(), out)?;
                }
            }
        }
        Some(())
    }

    fn snapshot(&self) -> Arc<HashMap<K, IncrementalList<T>>> {
        Arc::new(self.groups.clone())
    }

    fn members(&self, key: &K) -> Option<Arc<Vec<T>>> {
        self.groups.get(key).map(|group| Arc::clone(group.after()))
    }

    fn add(&mut self, key: K, inner: usize, item: T, out: &mut Vec<Grouped<K, T>>) -> Option<()> {
        match self.members(&key) {
            Some(members) => {
                if inner > members.len() {
                    return None;
                }
                let mut items = members.to_vec();
                items.insert(inner, item);
                self.groups.insert(
                    key.clone(),
                    IncrementalList::Insert {
                        pos: inner,
                        count: 1,
                        after: Arc::new(items),
                    },
                );
                out.push(IncrementalMap::Update {
                    key,
                    after: self.snapshot(),
                });
            }
            None => {
                self.groups.insert(
                    key.clone(),
                    IncrementalList::Begin {
                        after: Arc::new(vec![item]),
                    },
                );
                out.push(IncrementalMap::Insert {
                    key,
                    after: self.snapshot(),
                });
            }
        }
        Some(())
    }

    fn take(&mut self, key: &K, inner: usize, out: &mut Vec<Grouped<K, T>>) -> Option<()> {
        let members = self.members(key)?;
        if inner >= members.len() {
            return None;
        }
        if members.len() == 1 {
            self.groups.remove(key);
            out.push(IncrementalMap::Remove {
                key: key.clone(),
                after: self.snapshot(),
            });
            return Some(());
        }
        let mut items = members.to_vec();
        items.remove(inner);
        self.groups.insert(
            key.clone(),
            IncrementalList::Remove {
                pos: inner,
                count: 1,
                after: Arc::new(items),
            },
        );
        out.push(IncrementalMap::Update {
            key: key.clone(),
            after: self.snapshot(),
        });
        Some(())
    }

    fn replace(&mut self, key: &K, inner: usize, item: T, out: &mut Vec<Grouped<K, T>>) -> Option<()> {
        let mut items = self.members(key)?.to_vec();
        *items.get_mut(inner)? = item;
        self.groups.insert(
            key.clone(),
            IncrementalList::Update {
                pos: inner,
                count: 1,
                after: Arc::new(items),
            },
        );
        out.push(IncrementalMap::Update {
            key: key.clone(),
            after: self.snapshot(),
        });
        Some(())
    }

    fn reorder(&mut self, key: &K, from: usize, to: usize, out: &mut Vec<Grouped<K, T>>) -> Option<()> {
        let mut items = self.members(key)?.to_vec();
        if from >= items.len() || to >= items.len() {
            return None;
        }
        if from == to {
            return Some(());
        }
        let item = items.remove(from);
        items.insert(to, item);
        self.groups.insert(
            key.clone(),
            IncrementalList::Move {
                pos: from,
                count: 1,
                out_pos: to,
                after: Arc::new(items),
            },
        );
        out.push(IncrementalMap::Update {
            key: key.clone(),
            after: self.snapshot(),
        });
        Some(())
    }
}

/// Members of `key` in `keys[..before]`, i.e. the position inside its group
/// of the element at `before`.
fn inner_position<K: PartialEq>(keys: &[K], before: usize, key: &K) -> usize {
    keys[..before].iter().filter(|k| *k == key).count()
}

pub fn group_by_incremental<S, T, K, F>(upstream: S, key_of: F) -> impl Stream<Item = Grouped<K, T>>
where
    S: Stream<Item = IncrementalList<T>>,
    T: Clone,
    K: Eq + Hash + Clone,
    F: FnMut(&T) -> K,
{
    let mut state = GroupByIncremental::new(key_of);
    upstream
        .map(move |command| stream::iter(state.apply(&command)))
        .flatten()
}

// =============================================================================
// Per-value combinators
// =============================================================================

/// Maps every value, recomputing only values whose key was touched.
pub struct MapValuesIncremental<K, V, S, F> {
    map: F,
    cache: Option<HashMap<K, S>>,
    _input: PhantomData<fn(&V)>,
}

impl<K, V, S, F> MapValuesIncremental<K, V, S, F>
where
    K: Eq + Hash + Clone,
    S: Clone,
    F: FnMut(&K, &V) -> S,
{
    pub fn new(map: F) -> Self {
        Self {
            map,
            cache: None,
            _input: PhantomData,
        }
    }

    pub fn apply(&mut self, command: &IncrementalMap<K, V>) -> IncrementalMap<K, S> {
        if command.is_begin() || self.cache.is_none() {
            return self.begin(command.after());
        }
        match self.apply_edit(command) {
            Some(edit) => edit,
            None => {
                warn!("Incremental edit does not fit the mapped values; resynchronizing");
                self.begin(command.after())
            }
        }
    }

    fn begin(&mut self, after: &HashMap<K, V>) -> IncrementalMap<K, S> {
        let map = &mut self.map;
        let cache: HashMap<K, S> = after
            .iter()
            .map(|(key, value)| (key.clone(), map(key, value)))
            .collect();
        let after = Arc::new(cache.clone());
        self.cache = Some(cache);
        IncrementalMap::Begin { after }
    }

    fn apply_edit(&mut self, command: &IncrementalMap<K, V>) -> Option<IncrementalMap<K, S>> {
        let map = &mut self.map;
        let cache = self.cache.as_mut()?;
        match command {
            IncrementalMap::Begin { .. } => return None,
            IncrementalMap::Insert { key, after } | IncrementalMap::Update { key, after } => {
                let value = map(key, after.get(key)?);
                cache.insert(key.clone(), value);
            }
            IncrementalMap::Move { key, out_key, .. } => {
                let value = cache.remove(key)?;
                cache.insert(out_key.clone(), value);
            }
            IncrementalMap::Remove { key, .. } => {
                cache.remove(key)?;
            }
        }
        Some(command.with_after(Arc::new(cache.clone())))
    }
}

pub fn map_values_incremental<St, K, V, S, F>(upstream: St, map: F) -> impl Stream<Item = IncrementalMap<K, S>>
where
    St: Stream<Item = IncrementalMap<K, V>>,
    K: Eq + Hash + Clone,
    S: Clone,
    F: FnMut(&K, &V) -> S,
{
    let mut state = MapValuesIncremental::new(map);
    upstream.map(move |command| state.apply(&command))
}

/// Maps every value of every edit. For maps that are cheap to rebuild.
pub fn map_values_uncached<St, K, V, S, F>(upstream: St, mut map: F) -> impl Stream<Item = IncrementalMap<K, S>>
where
    St: Stream<Item = IncrementalMap<K, V>>,
    K: Eq + Hash + Clone,
    F: FnMut(&K, &V) -> S,
{
    upstream.map(move |command| {
        let after: HashMap<K, S> = command
            .after()
            .iter()
            .map(|(key, value)| (key.clone(), map(key, value)))
            .collect();
        command.with_after(Arc::new(after))
    })
}

/// Keeps the entries `keep` accepts. An entry whose value changes can move
/// in or out of the output, which turns its `Update` into an `Insert` or a
/// `Remove`.
pub struct FilterEntriesIncremental<K, V, P> {
    keep: P,
    kept: Option<HashMap<K, bool>>,
    _input: PhantomData<fn(&V)>,
}

impl<K, V, P> FilterEntriesIncremental<K, V, P>
where
    K: Eq + Hash + Clone,
    V: Clone,
    P: FnMut(&K, &V) -> bool,
{
    pub fn new(keep: P) -> Self {
        Self {
            keep,
            kept: None,
            _input: PhantomData,
        }
    }

    pub fn apply(&mut self, command: &IncrementalMap<K, V>) -> Vec<IncrementalMap<K, V>> {
        if command.is_begin() || self.kept.is_none() {
            return vec![self.begin(command.after())];
        }
        match self.apply_edit(command) {
            Some(edit) => edit.into_iter().collect(),
            None => {
                warn!("Incremental edit does not fit the filtered map; resynchronizing");
                vec![self.begin(command.after())]
            }
        }
    }

    fn begin(&mut self, after: &HashMap<K, V>) -> IncrementalMap<K, V> {
        let keep = &mut self.keep;
        let kept: HashMap<K, bool> = after
            .iter()
            .map(|(key, value)| (key.clone(), keep(key, value)))
            .collect();
        let after = filtered(after, &kept);
        self.kept = Some(kept);
        IncrementalMap::Begin { after }
    }

    fn apply_edit(&mut self, command: &IncrementalMap<K, V>) -> Option<Option<IncrementalMap<K, V>>> {
        let keep = &mut self.keep;
        let kept = self.kept.as_mut()?;
        let visible = match command {
            IncrementalMap::Begin { .. } => return None,
            IncrementalMap::Insert { key, after } => {
                let accepted = keep(key, after.get(key)?);
                kept.insert(key.clone(), accepted);
                accepted.then(|| command.with_after(filtered(after, kept)))
            }
            IncrementalMap::Move {
                key,
                out_key,
                after,
            } => {
                let accepted = kept.remove(key)?;
                kept.insert(out_key.clone(), accepted);
                accepted.then(|| command.with_after(filtered(after, kept)))
            }
            IncrementalMap::Remove { key, after } => {
                let accepted = kept.remove(key)?;
                accepted.then(|| command.with_after(filtered(after, kept)))
            }
            IncrementalMap::Update { key, after } => {
                let was = *kept.get(key)?;
                let now = keep(key, after.get(key)?);
                kept.insert(key.clone(), now);
                let key = key.clone();
                match (was, now) {
                    (true, true) => Some(IncrementalMap::Update {
                        key,
                        after: filtered(after, kept),
                    }),
                    (false, true) => Some(IncrementalMap::Insert {
                        key,
                        after: filtered(after, kept),
                    }),
                    (true, false) => Some(IncrementalMap::Remove {
                        key,
                        after: filtered(after, kept),
                    }),
                    (false, false) => None,
                }
            }
        };
        Some(visible)
    }
}

fn filtered<K, V>(after: &HashMap<K, V>, kept: &HashMap<K, bool>) -> Arc<HashMap<K, V>>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    Arc::new(
        after
            .iter()
            .filter(|(key, _)| kept.get(*key).copied().unwrap_or(false))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect(),
    )
}

pub fn filter_entries_incremental<St, K, V, P>(upstream: St, keep: P) -> impl Stream<Item = IncrementalMap<K, V>>
where
    St: Stream<Item = IncrementalMap<K, V>>,
    K: Eq + Hash + Clone,
    V: Clone,
    P: FnMut(&K, &V) -> bool,
{
    let mut state = FilterEntriesIncremental::new(keep);
    upstream
        .map(move |command| stream::iter(state.apply(&command)))
        .flatten()
}

// =============================================================================
// Merge
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

/// Union of two incremental maps. On a shared key the winning side's value
/// is visible. Nothing is emitted until both sides have produced a map.
struct MergeIncremental<K, V> {
    left: Option<HashMap<K, V>>,
    right: Option<HashMap<K, V>>,
    right_wins: bool,
    visible: HashMap<K, V>,
    out: Vec<IncrementalMap<K, V>>,
}

impl<K, V> MergeIncremental<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn new(right_wins: bool) -> Self {
        Self {
            left: None,
            right: None,
            right_wins,
            visible: HashMap::new(),
            out: Vec::new(),
        }
    }

    fn apply(&mut self, side: Side, command: IncrementalMap<K, V>) -> Vec<IncrementalMap<K, V>> {
        let started = match side {
            Side::Left => self.left.is_some(),
            Side::Right => self.right.is_some(),
        };
        if command.is_begin() || !started || !self.both_started() {
            self.reset(side, &command);
        } else if self.apply_edit(side, &command).is_none() {
            warn!("Incremental edit does not fit the merged map; resynchronizing");
            self.reset(side, &command);
        }
        std::mem::take(&mut self.out)
    }

    fn both_started(&self) -> bool {
        self.left.is_some() && self.right.is_some()
    }

    fn reset(&mut self, side: Side, command: &IncrementalMap<K, V>) {
        let state = Some((**command.after()).clone());
        match side {
            Side::Left => self.left = state,
            Side::Right => self.right = state,
        }
        let (Some(left), Some(right)) = (&self.left, &self.right) else {
            return;
        };
        let (loser, winner) = if self.right_wins {
            (left, right)
        } else {
            (right, left)
        };
        let mut union = loser.clone();
        union.extend(winner.iter().map(|(key, value)| (key.clone(), value.clone())));
        self.visible = union;
        self.out.clear();
        self.out.push(IncrementalMap::Begin {
            after: Arc::new(self.visible.clone()),
        });
    }

    fn apply_edit(&mut self, side: Side, command: &IncrementalMap<K, V>) -> Option<()> {
        let wins = (side == Side::Right) == self.right_wins;
        let (mine, other) = match side {
            Side::Left => (self.left.as_mut()?, self.right.as_ref()?),
            Side::Right => (self.right.as_mut()?, self.left.as_ref()?),
        };
        let mut edits: Vec<VisibleEdit<K, V>> = Vec::new();

        match command {
            IncrementalMap::Begin { .. } => return None,
            IncrementalMap::Insert { key, after } => {
                let value = after.get(key)?.clone();
                mine.insert(key.clone(), value.clone());
                if !other.contains_key(key) {
                    edits.push(VisibleEdit::Insert(key.clone(), value));
                } else if wins {
                    edits.push(VisibleEdit::Update(key.clone(), value));
                }
            }
            IncrementalMap::Remove { key, .. } => {
                mine.remove(key)?;
                match other.get(key) {
                    None => edits.push(VisibleEdit::Remove(key.clone())),
                    Some(value) if wins => edits.push(VisibleEdit::Update(key.clone(), value.clone())),
                    Some(_) => {}
                }
            }
            IncrementalMap::Update { key, after } => {
                let value = after.get(key)?.clone();
                mine.insert(key.clone(), value.clone());
                if wins || !other.contains_key(key) {
                    edits.push(VisibleEdit::Update(key.clone(), value));
                }
            }
            IncrementalMap::Move { key, out_key, .. } => {
                let value = mine.remove(key)?;
                mine.insert(out_key.clone(), value.clone());
                let was_mine = wins || !other.contains_key(key);
                let now_mine = wins || !other.contains_key(out_key);
                match (was_mine, now_mine) {
                    (true, true) => {
                        if other.contains_key(out_key) {
                            edits.push(VisibleEdit::Remove(out_key.clone()));
                        }
                        edits.push(VisibleEdit::Move(key.clone(), out_key.clone()));
                        if let Some(shadowed) = other.get(key) {
                            edits.push(VisibleEdit::Insert(key.clone(), shadowed.clone()));
                        }
                    }
                    (true, false) => edits.push(VisibleEdit::Remove(key.clone())),
                    (false, true) => edits.push(VisibleEdit::Insert(out_key.clone(), value)),
                    (false, false) => {}
                }
            }
        }

        for edit in edits {
            self.emit(edit)?;
        }
        Some(())
    }

    fn emit(&mut self, edit: VisibleEdit<K, V>) -> Option<()> {
        let command = match edit {
            VisibleEdit::Insert(key, value) => {
                self.visible.insert(key.clone(), value);
                IncrementalMap::Insert {
                    key,
                    after: Arc::new(self.visible.clone()),
                }
            }
            VisibleEdit::Update(key, value) => {
                self.visible.insert(key.clone(), value);
                IncrementalMap::Update {
                    key,
                    after: Arc::new(self.visible.clone()),
                }
            }
            VisibleEdit::Remove(key) => {
                self.visible.remove(&key)?;
                IncrementalMap::Remove {
                    key,
                    after: Arc::new(self.visible.clone()),
                }
            }
            VisibleEdit::Move(key, out_key) => {
                let value = self.visible.remove(&key)?;
                self.visible.insert(out_key.clone(), value);
                IncrementalMap::Move {
                    key,
                    out_key,
                    after: Arc::new(self.visible.clone()),
                }
            }
        };
        self.out.push(command);
        Some(())
    }
}

enum VisibleEdit<K, V> {
    Insert(K, V),
    Update(K, V),
    Remove(K),
    Move(K, K),
}

/// Merges two incremental maps into one. `right_wins` picks the side whose
/// value is visible for keys present on both sides.
pub fn merge_incremental<L, R, K, V>(left: L, right: R, right_wins: bool) -> impl Stream<Item = IncrementalMap<K, V>>
where
    L: Stream<Item = IncrementalMap<K, V>>,
    R: Stream<Item = IncrementalMap<K, V>>,
    K: Eq + Hash + Clone,
    V: Clone,
{
    let mut state = MergeIncremental::new(right_wins);
    stream::select(
        left.map(|command| (Side::Left, command)),
        right.map(|command| (Side::Right, command)),
    )
    .map(move |(side, command)| stream::iter(state.apply(side, command)))
    .flatten()
}

// =============================================================================
// Flatten
// =============================================================================

/// Produces a fresh subscription to a value stream.
pub type ValueSource<R> = Arc<dyn Fn() -> BoxStream<'static, R> + Send + Sync>;

/// Waiting for the first value of newly subscribed sources. The input is not
/// read meanwhile.
enum Pending {
    Begin(HashSet<u64>),
    Insert(u64),
    Update(u64),
}

/// Follows the latest value of every source in the map.
///
/// A key shows up in the output once its source produced a value. Later
/// values become `Update`s. A replaced source keeps the previous value
/// visible until it produces one itself. A source that ends without a value
/// leaves its key out.
struct FlattenIncremental<K, R> {
    upstream: BoxStream<'static, IncrementalMap<K, ValueSource<R>>>,
    upstream_done: bool,
    sources: SelectAll<BoxStream<'static, (u64, Option<R>)>>,
    slots: HashMap<K, (u64, AbortHandle)>,
    keys_by_slot: HashMap<u64, K>,
    next_slot: u64,
    output: HashMap<K, R>,
    pending: Option<Pending>,
    ready: VecDeque<IncrementalMap<K, R>>,
}

impl<K, R> FlattenIncremental<K, R>
where
    K: Eq + Hash + Clone + Send + 'static,
    R: Clone + Send + 'static,
{
    fn new(upstream: BoxStream<'static, IncrementalMap<K, ValueSource<R>>>) -> Self {
        Self {
            upstream,
            upstream_done: false,
            sources: SelectAll::new(),
            slots: HashMap::new(),
            keys_by_slot: HashMap::new(),
            next_slot: 0,
            output: HashMap::new(),
            pending: None,
            ready: VecDeque::new(),
        }
    }

    fn poll_next(&mut self, cx: &mut Context<'_>) -> Poll<Option<IncrementalMap<K, R>>> {
        loop {
            if let Some(edit) = self.ready.pop_front() {
                return Poll::Ready(Some(edit));
            }

            match self.sources.poll_next_unpin(cx) {
                Poll::Ready(Some((slot, value))) => {
                    self.on_value(slot, value);
                    continue;
                }
                Poll::Ready(None) => {
                    if let Some(pending) = self.pending.take() {
                        if matches!(pending, Pending::Begin(_)) {
                            self.emit_begin();
                        }
                        continue;
                    }
                    if self.upstream_done {
                        return Poll::Ready(None);
                    }
                }
                Poll::Pending => {}
            }

            if self.pending.is_some() || self.upstream_done {
                return Poll::Pending;
            }
            match self.upstream.poll_next_unpin(cx) {
                Poll::Ready(Some(command)) => self.on_command(&command),
                Poll::Ready(None) => self.upstream_done = true,
                Poll::Pending => return Poll::Pending,
            }
        }
    }

    fn on_command(&mut self, command: &IncrementalMap<K, ValueSource<R>>) {
        match command {
            IncrementalMap::Begin { after } => self.begin(after),
            IncrementalMap::Insert { key, after } => match after.get(key) {
                Some(source) => {
                    let slot = self.subscribe(key.clone(), source);
                    self.pending = Some(Pending::Insert(slot));
                }
                None => self.resync(command),
            },
            IncrementalMap::Update { key, after } => match after.get(key) {
                Some(source) => {
                    let slot = self.subscribe(key.clone(), source);
                    self.pending = Some(Pending::Update(slot));
                }
                None => self.resync(command),
            },
            IncrementalMap::Move { key, out_key, .. } => {
                let moved = self.slots.remove(key);
                self.unsubscribe(out_key);
                if let Some((slot, handle)) = moved {
                    self.keys_by_slot.insert(slot, out_key.clone());
                    self.slots.insert(out_key.clone(), (slot, handle));
                }
                if let Some(value) = self.output.remove(key) {
                    self.output.insert(out_key.clone(), value);
                    self.push(IncrementalMap::Move {
                        key: key.clone(),
                        out_key: out_key.clone(),
                        after: self.snapshot(),
                    });
                }
            }
            IncrementalMap::Remove { key, .. } => {
                self.unsubscribe(key);
                if self.output.remove(key).is_some() {
                    self.push(IncrementalMap::Remove {
                        key: key.clone(),
                        after: self.snapshot(),
                    });
                }
            }
        }
    }

    fn begin(&mut self, after: &HashMap<K, ValueSource<R>>) {
        for (_, (_, handle)) in self.slots.drain() {
            handle.abort();
        }
        self.keys_by_slot.clear();
        self.output.clear();
        let slots: HashSet<u64> = after
            .iter()
            .map(|(key, source)| self.subscribe(key.clone(), source))
            .collect();
        if slots.is_empty() {
            self.emit_begin();
        } else {
            self.pending = Some(Pending::Begin(slots));
        }
    }

    fn resync(&mut self, command: &IncrementalMap<K, ValueSource<R>>) {
        warn!("Incremental edit does not fit the flattened map; resynchronizing");
        self.begin(command.after());
    }

    fn subscribe(&mut self, key: K, source: &ValueSource<R>) -> u64 {
        self.unsubscribe(&key);
        let slot = self.next_slot;
        self.next_slot += 1;

        let values = source()
            .map(Some)
            .chain(stream::once(future::ready(None)))
            .map(move |value| (slot, value));
        let (handle, registration) = AbortHandle::new_pair();
        self.sources.push(Abortable::new(values, registration).boxed());
        self.slots.insert(key.clone(), (slot, handle));
        self.keys_by_slot.insert(slot, key);
        slot
    }

    fn unsubscribe(&mut self, key: &K) {
        if let Some((slot, handle)) = self.slots.remove(key) {
            handle.abort();
            self.keys_by_slot.remove(&slot);
        }
    }

    /// `None` marks the end of a source.
    fn on_value(&mut self, slot: u64, value: Option<R>) {
        let Some(key) = self.keys_by_slot.get(&slot).cloned() else {
            return;
        };
        let has_value = value.is_some();
        if let Some(value) = value {
            self.output.insert(key.clone(), value);
        }

        match self.pending.take() {
            Some(Pending::Begin(mut waiting)) => {
                waiting.remove(&slot);
                if waiting.is_empty() {
                    self.emit_begin();
                } else {
                    self.pending = Some(Pending::Begin(waiting));
                }
            }
            Some(Pending::Insert(waiting)) if waiting == slot => {
                if has_value {
                    self.push(IncrementalMap::Insert {
                        key,
                        after: self.snapshot(),
                    });
                }
            }
            Some(Pending::Update(waiting)) if waiting == slot => {
                if has_value {
                    self.push(IncrementalMap::Update {
                        key,
                        after: self.snapshot(),
                    });
                }
            }
            other => {
                self.pending = other;
                if has_value {
                    self.push(IncrementalMap::Update {
                        key,
                        after: self.snapshot(),
                    });
                }
            }
        }
    }

    fn emit_begin(&mut self) {
        self.push(IncrementalMap::Begin {
            after: self.snapshot(),
        });
    }

    fn snapshot(&self) -> Arc<HashMap<K, R>> {
        Arc::new(self.output.clone())
    }

    fn push(&mut self, edit: IncrementalMap<K, R>) {
        self.ready.push_back(edit);
    }
}

/// Subscribes to every source of the map and follows its latest value.
///
/// The input is read one edit at a time: after a `Begin`, `Insert` or
/// `Update`, the next input edit waits until the new sources have produced
/// their first value. Ends once the input and every source have ended.
pub fn flatten_incremental<St, K, R>(upstream: St) -> impl Stream<Item = IncrementalMap<K, R>>
where
    St: Stream<Item = IncrementalMap<K, ValueSource<R>>> + Send + 'static,
    K: Eq + Hash + Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    let mut state = FlattenIncremental::new(upstream.boxed());
    stream::poll_fn(move |cx| state.poll_next(cx))
}

/// Keeps the entries whose `predicate` stream last reported `true`.
///
/// Entries stay out until their predicate produced a value.
pub fn filter_latest_incremental<St, K, V, P>(upstream: St, predicate: P) -> impl Stream<Item = IncrementalMap<K, V>>
where
    St: Stream<Item = IncrementalMap<K, V>> + Send + 'static,
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    P: Fn(&K, &V) -> BoxStream<'static, bool> + Send + Sync + 'static,
{
    let predicate = Arc::new(predicate);
    let sources = map_values_incremental(upstream, move |key: &K, value: &V| -> ValueSource<(V, bool)> {
        let predicate = Arc::clone(&predicate);
        let key = key.clone();
        let value = value.clone();
        Arc::new(move || {
            let value = value.clone();
            let keeps = predicate(&key, &value);
            keeps.map(move |keep| (value.clone(), keep)).boxed()
        })
    });
    let kept = filter_entries_incremental(flatten_incremental(sources), |_: &K, entry: &(V, bool)| entry.1);
    map_values_uncached(kept, |_: &K, entry: &(V, bool)| entry.0.clone())
}

// =============================================================================
// Back to lists
// =============================================================================

/// Orders the values of an incremental map by key.
pub struct ToIncrementalList<K, V, C> {
    compare: C,
    entries: Option<(Vec<K>, Vec<V>)>,
}

impl<K, V, C> ToIncrementalList<K, V, C>
where
    K: Eq + Hash + Clone,
    V: Clone,
    C: FnMut(&K, &K) -> Ordering,
{
    pub fn new(compare: C) -> Self {
        Self {
            compare,
            entries: None,
        }
    }

    pub fn apply(&mut self, command: &IncrementalMap<K, V>) -> IncrementalList<V> {
        if command.is_begin() || self.entries.is_none() {
            return self.begin(command.after());
        }
        match self.apply_edit(command) {
            Some(edit) => edit,
            None => {
                warn!("Incremental edit does not fit the sorted list; resynchronizing");
                self.begin(command.after())
            }
        }
    }

    fn begin(&mut self, after: &HashMap<K, V>) -> IncrementalList<V> {
        let compare = &mut self.compare;
        let mut keys: Vec<K> = after.keys().cloned().collect();
        keys.sort_by(|a, b| compare(a, b));
        let values: Vec<V> = keys.iter().filter_map(|key| after.get(key).cloned()).collect();
        let list = Arc::new(values.clone());
        self.entries = Some((keys, values));
        IncrementalList::Begin { after: list }
    }

    fn apply_edit(&mut self, command: &IncrementalMap<K, V>) -> Option<IncrementalList<V>> {
        let compare = &mut self.compare;
        let (keys, values) = self.entries.as_mut()?;
        let edit = match command {
            IncrementalMap::Begin { .. } => return None,
            IncrementalMap::Insert { key, after } => {
                let value = after.get(key)?.clone();
                let pos = keys
                    .binary_search_by(|k| compare(k, key))
                    .unwrap_or_else(|pos| pos);
                keys.insert(pos, key.clone());
                values.insert(pos, value);
                IncrementalList::Insert {
                    pos,
                    count: 1,
                    after: Arc::new(values.clone()),
                }
            }
            IncrementalMap::Update { key, after } => {
                let pos = keys.iter().position(|k| k == key)?;
                values[pos] = after.get(key)?.clone();
                IncrementalList::Update {
                    pos,
                    count: 1,
                    after: Arc::new(values.clone()),
                }
            }
            IncrementalMap::Move { key, out_key, .. } => {
                let pos = keys.iter().position(|k| k == key)?;
                keys.remove(pos);
                let value = values.remove(pos);
                let out_pos = keys
                    .binary_search_by(|k| compare(k, out_key))
                    .unwrap_or_else(|pos| pos);
                keys.insert(out_pos, out_key.clone());
                values.insert(out_pos, value);
                IncrementalList::Move {
                    pos,
                    count: 1,
                    out_pos,
                    after: Arc::new(values.clone()),
                }
            }
            IncrementalMap::Remove { key, .. } => {
                let pos = keys.iter().position(|k| k == key)?;
                keys.remove(pos);
                values.remove(pos);
                IncrementalList::Remove {
                    pos,
                    count: 1,
                    after: Arc::new(values.clone()),
                }
            }
        };
        Some(edit)
    }
}

pub fn to_incremental_list<St, K, V, C>(upstream: St, compare: C) -> impl Stream<Item = IncrementalList<V>>
where
    St: Stream<Item = IncrementalMap<K, V>>,
    K: Eq + Hash + Clone,
    V: Clone,
    C: FnMut(&K, &K) -> Ordering,
{
    let mut state = ToIncrementalList::new(compare);
    upstream.map(move |command| state.apply(&command))
}

/// The value under `key` after every edit that can change it, `None` while
/// the key is absent.
pub fn for_key<St, K, V>(upstream: St, key: K) -> impl Stream<Item = Option<V>>
where
    St: Stream<Item = IncrementalMap<K, V>>,
    K: Eq + Hash,
    V: Clone,
{
    upstream.filter_map(move |command| {
        let value = command
            .touches(&key)
            .then(|| command.after().get(&key).cloned());
        future::ready(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incremental::{filter_incremental, map_incremental};

    fn map_of(entries: &[(u32, &'static str)]) -> Arc<HashMap<u32, &'static str>> {
        Arc::new(entries.iter().copied().collect())
    }

    fn list(values: &[i32]) -> Arc<Vec<i32>> {
        Arc::new(values.to_vec())
    }

    /// The edit sequence shared with the list combinator tests.
    fn shuffled_source() -> Vec<IncrementalList<i32>> {
        vec![
            IncrementalList::Begin { after: list(&[1, 2, 3]) },
            IncrementalList::Insert { pos: 1, count: 2, after: list(&[1, 15, 10, 2, 3]) },
            IncrementalList::Insert { pos: 1, count: 1, after: list(&[1, 999, 15, 10, 2, 3]) },
            IncrementalList::Move { pos: 1, count: 1, out_pos: 2, after: list(&[1, 15, 999, 10, 2, 3]) },
            IncrementalList::Move { pos: 1, count: 1, out_pos: 5, after: list(&[1, 999, 10, 2, 3, 15]) },
            IncrementalList::Move { pos: 2, count: 3, out_pos: 0, after: list(&[10, 2, 3, 1, 999, 15]) },
            IncrementalList::Remove { pos: 1, count: 1, after: list(&[10, 3, 1, 999, 15]) },
            IncrementalList::Update { pos: 1, count: 1, after: list(&[10, 5, 1, 999, 15]) },
        ]
    }

    /// Every edit applied to the previous map must give its own `after`.
    fn assert_map_contract<K, V>(edits: &[IncrementalMap<K, V>])
    where
        K: Eq + Hash + Clone + std::fmt::Debug,
        V: Clone + PartialEq + std::fmt::Debug,
    {
        let mut current: Option<HashMap<K, V>> = None;
        for edit in edits {
            if let (Some(previous), false) = (&current, edit.is_begin()) {
                let applied = edit.apply_to(previous).expect("edit fits the previous map");
                assert_eq!(&applied, edit.after().as_ref());
            }
            current = Some((**edit.after()).clone());
        }
    }

    fn assert_list_contract<T: Clone + PartialEq + std::fmt::Debug>(edits: &[IncrementalList<T>]) {
        let mut current: Option<Vec<T>> = None;
        for edit in edits {
            if let (Some(previous), false) = (&current, edit.is_begin()) {
                let applied = edit.apply_to(previous).expect("edit fits the previous list");
                assert_eq!(applied.as_slice(), edit.after().as_slice());
            }
            current = Some(edit.after().to_vec());
        }
    }

    fn once_source<R: Clone + Send + Sync + 'static>(value: R) -> ValueSource<R> {
        Arc::new(move || stream::once(future::ready(value.clone())).boxed())
    }

    #[tokio::test]
    async fn test_group_by_tracks_parity_groups() {
        let filtered = filter_incremental(
            map_incremental(stream::iter(shuffled_source()), |v| v + 1),
            |v| *v < 100,
        );
        let grouped: Vec<_> = group_by_incremental(filtered, |v: &i32| v % 2).collect().await;

        assert_map_contract(&grouped);
        assert!(grouped[0].is_begin());
        assert_eq!(grouped.len(), 7);

        let last = grouped.last().unwrap().after();
        assert_eq!(last[&0].after().as_slice(), &[6, 2, 16]);
        assert_eq!(last[&1].after().as_slice(), &[11]);

        // Each group on its own follows the list contract.
        for key in [0, 1] {
            let group: Vec<_> = grouped
                .iter()
                .filter(|edit| edit.touches(&key))
                .filter_map(|edit| edit.after().get(&key).cloned())
                .collect();
            assert_list_contract(&group);
        }
    }

    #[tokio::test]
    async fn test_grouped_sources_flatten_and_follow_one_key() {
        let filtered = filter_incremental(
            map_incremental(stream::iter(shuffled_source()), |v| v + 1),
            |v| *v < 100,
        );
        let sources = map_values_incremental(
            group_by_incremental(filtered, |v: &i32| v % 2),
            |_: &i32, group: &IncrementalList<i32>| once_source(group.clone()),
        );
        let flattened: Vec<_> = flatten_incremental(sources).collect().await;
        assert_map_contract(&flattened);

        let odd: Vec<IncrementalList<i32>> = for_key(stream::iter(flattened), 1)
            .map(|group| group.expect("odd group present"))
            .collect()
            .await;
        assert_list_contract(&odd);
        assert_eq!(odd.len(), 3);
        assert_eq!(odd.last().unwrap().after().as_slice(), &[11]);
    }

    #[test]
    fn test_group_by_moves_element_between_groups() {
        let mut state = GroupByIncremental::new(|v: &i32| v % 2);
        state.apply(&IncrementalList::Begin { after: list(&[1, 2, 3]) });
        let out = state.apply(&IncrementalList::Update {
            pos: 0,
            count: 1,
            after: list(&[4, 2, 3]),
        });
        assert_map_contract(&out);
        assert!(matches!(out[0], IncrementalMap::Update { key: 1, .. }));
        assert!(matches!(out[1], IncrementalMap::Update { key: 0, .. }));
        assert_eq!(state.current()[&0].after().as_slice(), &[4, 2]);

        let out = state.apply(&IncrementalList::Remove {
            pos: 2,
            count: 1,
            after: list(&[4, 2]),
        });
        assert!(matches!(out[..], [IncrementalMap::Remove { key: 1, .. }]));
    }

    #[test]
    fn test_filter_entries_turns_updates_into_membership_changes() {
        let mut state = FilterEntriesIncremental::new(|_: &u32, v: &&str| v.len() > 1);
        let mut out = state.apply(&IncrementalMap::Begin {
            after: map_of(&[(1, "aa"), (2, "b")]),
        });
        for edit in [
            IncrementalMap::Update { key: 2, after: map_of(&[(1, "aa"), (2, "bb")]) },
            IncrementalMap::Insert { key: 3, after: map_of(&[(1, "aa"), (2, "bb"), (3, "c")]) },
            IncrementalMap::Move { key: 1, out_key: 4, after: map_of(&[(4, "aa"), (2, "bb"), (3, "c")]) },
            IncrementalMap::Remove { key: 3, after: map_of(&[(4, "aa"), (2, "bb")]) },
            IncrementalMap::Update { key: 2, after: map_of(&[(4, "aa"), (2, "b")]) },
        ] {
            out.extend(state.apply(&edit));
        }

        assert_map_contract(&out);
        assert_eq!(out.len(), 4);
        assert!(matches!(out[1], IncrementalMap::Insert { key: 2, .. }));
        assert!(matches!(out[2], IncrementalMap::Move { key: 1, out_key: 4, .. }));
        assert!(matches!(out[3], IncrementalMap::Remove { key: 2, .. }));
        assert_eq!(out[3].after().as_ref(), map_of(&[(4, "aa")]).as_ref());
    }

    #[test]
    fn test_merge_prefers_winning_side() {
        let mut merge = MergeIncremental::new(false);
        assert!(merge
            .apply(Side::Left, IncrementalMap::Begin { after: map_of(&[(1, "l1"), (2, "l2")]) })
            .is_empty());

        let mut out = merge.apply(
            Side::Right,
            IncrementalMap::Begin { after: map_of(&[(2, "r2"), (3, "r3")]) },
        );
        assert_eq!(
            out[0].after().as_ref(),
            map_of(&[(1, "l1"), (2, "l2"), (3, "r3")]).as_ref()
        );

        // Shadowed by the left side.
        assert!(merge
            .apply(Side::Right, IncrementalMap::Update { key: 2, after: map_of(&[(2, "r2b"), (3, "r3")]) })
            .is_empty());
        out.extend(merge.apply(
            Side::Right,
            IncrementalMap::Update { key: 3, after: map_of(&[(2, "r2b"), (3, "r3b")]) },
        ));
        out.extend(merge.apply(Side::Left, IncrementalMap::Remove { key: 2, after: map_of(&[(1, "l1")]) }));
        out.extend(merge.apply(
            Side::Left,
            IncrementalMap::Move { key: 1, out_key: 3, after: map_of(&[(3, "l1")]) },
        ));

        assert_map_contract(&out);
        assert!(matches!(out[2], IncrementalMap::Update { key: 2, .. }));
        assert!(matches!(out[3], IncrementalMap::Remove { key: 3, .. }));
        assert!(matches!(out[4], IncrementalMap::Move { key: 1, out_key: 3, .. }));
        assert_eq!(
            out.last().unwrap().after().as_ref(),
            map_of(&[(2, "r2b"), (3, "l1")]).as_ref()
        );
    }

    #[tokio::test]
    async fn test_merge_waits_for_both_sides() {
        let left = stream::iter(vec![IncrementalMap::Begin { after: map_of(&[(1, "a")]) }]);
        let right = stream::iter(vec![
            IncrementalMap::Begin { after: map_of(&[(2, "b")]) },
            IncrementalMap::Insert { key: 3, after: map_of(&[(2, "b"), (3, "c")]) },
        ]);
        let merged: Vec<_> = merge_incremental(left, right, true).collect().await;
        assert_map_contract(&merged);
        assert!(merged[0].is_begin());
        assert_eq!(
            merged.last().unwrap().after().as_ref(),
            map_of(&[(1, "a"), (2, "b"), (3, "c")]).as_ref()
        );
    }

    #[tokio::test]
    async fn test_flatten_follows_replaced_and_moved_sources() {
        let first = Arc::new(HashMap::from([(1u32, once_source(10)), (2, once_source(20))]));
        let replaced = Arc::new(HashMap::from([(1u32, once_source(11)), (2, once_source(20))]));
        let moved = Arc::new(HashMap::from([(1u32, once_source(11)), (5, once_source(20))]));
        let removed = Arc::new(HashMap::from([(5u32, once_source(20))]));
        let upstream = stream::iter(vec![
            IncrementalMap::Begin { after: first },
            IncrementalMap::Update { key: 1, after: replaced },
            IncrementalMap::Move { key: 2, out_key: 5, after: moved },
            IncrementalMap::Remove { key: 1, after: removed },
        ]);

        let out: Vec<_> = flatten_incremental(upstream).collect().await;
        assert_map_contract(&out);
        assert_eq!(out.len(), 4);
        assert_eq!(out[0].after()[&1], 10);
        assert_eq!(out[1].after()[&1], 11);
        assert_eq!(out.last().unwrap().after().as_ref(), &HashMap::from([(5, 20)]));
    }

    #[tokio::test]
    async fn test_filter_latest_follows_predicate_streams() {
        let upstream = stream::iter(vec![IncrementalMap::Begin {
            after: map_of(&[(1, "one"), (2, "two")]),
        }]);
        let out: Vec<_> = filter_latest_incremental(upstream, |key: &u32, _: &&'static str| {
            let verdicts = if *key == 1 { vec![true] } else { vec![false, true] };
            stream::iter(verdicts).boxed()
        })
        .collect()
        .await;

        assert_map_contract(&out);
        assert_eq!(
            out.last().unwrap().after().as_ref(),
            map_of(&[(1, "one"), (2, "two")]).as_ref()
        );
    }

    #[test]
    fn test_to_incremental_list_keeps_key_order() {
        let mut state = ToIncrementalList::new(|a: &u32, b: &u32| a.cmp(b));
        let out = vec![
            state.apply(&IncrementalMap::Begin { after: map_of(&[(3, "c"), (1, "a")]) }),
            state.apply(&IncrementalMap::Insert { key: 2, after: map_of(&[(1, "a"), (2, "b"), (3, "c")]) }),
            state.apply(&IncrementalMap::Move { key: 1, out_key: 4, after: map_of(&[(4, "a"), (2, "b"), (3, "c")]) }),
            state.apply(&IncrementalMap::Update { key: 3, after: map_of(&[(4, "a"), (2, "b"), (3, "C")]) }),
            state.apply(&IncrementalMap::Remove { key: 2, after: map_of(&[(4, "a"), (3, "C")]) }),
        ];

        assert_list_contract(&out);
        assert_eq!(out[0].after().as_slice(), &["a", "c"]);
        assert!(matches!(out[1], IncrementalList::Insert { pos: 1, count: 1, .. }));
        assert!(matches!(out[2], IncrementalList::Move { pos: 0, count: 1, out_pos: 2, .. }));
        assert_eq!(out[4].after().as_slice(), &["C", "a"]);
    }

    #[tokio::test]
    async fn test_for_key_skips_unrelated_edits() {
        let upstream = stream::iter(vec![
            IncrementalMap::Begin { after: map_of(&[(1, "a")]) },
            IncrementalMap::Insert { key: 2, after: map_of(&[(1, "a"), (2, "b")]) },
            IncrementalMap::Move { key: 1, out_key: 3, after: map_of(&[(3, "a"), (2, "b")]) },
            IncrementalMap::Insert { key: 1, after: map_of(&[(3, "a"), (2, "b"), (1, "z")]) },
        ]);
        let values: Vec<_> = for_key(upstream, 1).collect().await;
        assert_eq!(values, vec![Some("a"), None, Some("z")]);
    }
}
