//! In-memory media index.
//!
//! A mutable table standing in for the platform media index. Every mutation
//! fires change notifications the same way the platform does, so the reader
//! pipeline can be exercised end to end on a desktop host.
//!
//! Selections support the subset the reader issues: clauses of the form
//! `column = literal` or `column != literal` joined by `or`. Sort orders
//! support comma-separated `column [COLLATE name] [ASC|DESC]` terms; collated
//! text compares case-insensitively.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    media_index::{
        columns, ChangeNotification, ChangeObserver, MediaCollection, MediaIndex, MediaQuery,
        ObserverId, QueryRow, QueryValue,
    },
};
use tracing::{debug, trace};

#[derive(Default)]
struct Tables {
    audio: Vec<QueryRow>,
    playlists: Vec<QueryRow>,
    members: HashMap<i64, Vec<QueryRow>>,
}

struct Registration {
    collection: MediaCollection,
    descendants: bool,
    observer: Arc<dyn ChangeObserver>,
}

impl Registration {
    fn wants(&self, changed: &MediaCollection) -> bool {
        self.collection == *changed || (self.descendants && self.collection.contains(changed))
    }
}

/// In-memory [`MediaIndex`].
pub struct InMemoryMediaIndex {
    tables: RwLock<Tables>,
    observers: Mutex<HashMap<ObserverId, Registration>>,
    next_observer: AtomicU64,
    queries: AtomicU64,
    extended_columns: bool,
}

impl InMemoryMediaIndex {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            observers: Mutex::new(HashMap::new()),
            next_observer: AtomicU64::new(1),
            queries: AtomicU64::new(0),
            extended_columns: true,
        }
    }

    /// Behaves like an older platform without the extended columns.
    pub fn without_extended_columns(mut self) -> Self {
        self.extended_columns = false;
        self
    }

    fn write_tables(&self) -> std::sync::RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Inserts or replaces (by `_id`) one audio row.
    pub fn insert_audio(&self, row: QueryRow) {
        self.insert_audio_batch(vec![row]);
    }

    /// Inserts or replaces several audio rows with a single notification.
    pub fn insert_audio_batch(&self, rows: Vec<QueryRow>) {
        {
            let mut tables = self.write_tables();
            for row in rows {
                let id = row_id(&row);
                match tables.audio.iter_mut().find(|existing| row_id(existing) == id) {
                    Some(existing) => *existing = row,
                    None => tables.audio.push(row),
                }
            }
        }
        self.notify_change(MediaCollection::Audio);
    }

    /// Removes an audio row. Returns whether it existed.
    pub fn remove_audio(&self, id: i64) -> bool {
        let removed = {
            let mut tables = self.write_tables();
            let before = tables.audio.len();
            tables.audio.retain(|row| row_id(row) != Some(id));
            before != tables.audio.len()
        };
        if removed {
            self.notify_change(MediaCollection::Audio);
        }
        removed
    }

    /// Inserts or replaces a playlist and its members.
    pub fn insert_playlist(&self, (row, members): (QueryRow, Vec<QueryRow>)) {
        let Some(id) = row_id(&row) else {
            debug!("Ignoring playlist row without id");
            return;
        };
        {
            let mut tables = self.write_tables();
            tables.playlists.retain(|existing| row_id(existing) != Some(id));
            tables.playlists.push(row);
            tables.members.insert(id, members);
        }
        self.notify_change(MediaCollection::PlaylistMembers(id));
        self.notify_change(MediaCollection::Playlists);
    }

    pub fn remove_playlist(&self, id: i64) -> bool {
        let removed = {
            let mut tables = self.write_tables();
            tables.members.remove(&id);
            let before = tables.playlists.len();
            tables.playlists.retain(|row| row_id(row) != Some(id));
            before != tables.playlists.len()
        };
        if removed {
            self.notify_change(MediaCollection::Playlists);
        }
        removed
    }

    /// Delivers a change ping for `collection` to every matching observer.
    pub fn notify_change(&self, collection: MediaCollection) {
        let targets: Vec<Arc<dyn ChangeObserver>> = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|registration| registration.wants(&collection))
            .map(|registration| Arc::clone(&registration.observer))
            .collect();

        trace!(%collection, observers = targets.len(), "Dispatching change notification");
        let notification = ChangeNotification {
            self_change: false,
            uris: vec![collection.content_uri()],
            flags: 0,
        };
        for observer in targets {
            observer.on_change(&notification);
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Number of queries served so far.
    pub fn query_count(&self) -> u64 {
        self.queries.load(AtomicOrdering::SeqCst)
    }
}

impl Default for InMemoryMediaIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaIndex for InMemoryMediaIndex {
    async fn query(&self, collection: MediaCollection, query: &MediaQuery) -> Result<Vec<QueryRow>> {
        self.queries.fetch_add(1, AtomicOrdering::SeqCst);

        let selection = Selection::parse(query.selection.as_deref())?;
        let sort = match query.sort_order.as_deref() {
            Some(order) => SortOrder::parse(order)?,
            None => SortOrder::default(),
        };

        let mut rows: Vec<QueryRow> = {
            let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
            let source = match collection {
                MediaCollection::Audio => tables.audio.as_slice(),
                MediaCollection::Playlists => tables.playlists.as_slice(),
                MediaCollection::PlaylistMembers(id) => tables
                    .members
                    .get(&id)
                    .map(Vec::as_slice)
                    .unwrap_or_default(),
            };
            source
                .iter()
                .filter(|row| selection.matches(row))
                .cloned()
                .collect()
        };
        sort.apply(&mut rows);

        if !query.projection.is_empty() {
            for row in &mut rows {
                row.retain(|column, _| query.projection.iter().any(|p| p == column));
            }
        }

        debug!(%collection, rows = rows.len(), "Served media index query");
        Ok(rows)
    }

    fn register_observer(
        &self,
        collection: MediaCollection,
        notify_for_descendants: bool,
        observer: Arc<dyn ChangeObserver>,
    ) -> Result<ObserverId> {
        let id = ObserverId(self.next_observer.fetch_add(1, AtomicOrdering::SeqCst));
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id,
                Registration {
                    collection,
                    descendants: notify_for_descendants,
                    observer,
                },
            );
        debug!(%collection, observer = id.0, "Registered change observer");
        Ok(id)
    }

    fn unregister_observer(&self, id: ObserverId) {
        let removed = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        if removed.is_some() {
            debug!(observer = id.0, "Unregistered change observer");
        }
    }

    fn has_extended_columns(&self) -> bool {
        self.extended_columns
    }
}

fn row_id(row: &QueryRow) -> Option<i64> {
    row.get(columns::ID).and_then(QueryValue::as_i64)
}

// =============================================================================
// Selection
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Integer(i64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
struct Clause {
    column: String,
    negated: bool,
    literal: Literal,
}

impl Clause {
    fn parse(text: &str) -> Result<Self> {
        let (column, negated, literal) = if let Some((column, literal)) = text.split_once("!=") {
            (column, true, literal)
        } else if let Some((column, literal)) = text.split_once('=') {
            (column, false, literal)
        } else {
            return Err(unsupported(text));
        };

        let column = column.trim();
        let literal = literal.trim();
        if column.is_empty() || literal.is_empty() {
            return Err(unsupported(text));
        }

        let literal = match literal
            .strip_prefix('\'')
            .and_then(|rest| rest.strip_suffix('\''))
        {
            Some(text) => Literal::Text(text.to_string()),
            None => Literal::Integer(literal.parse().map_err(|_| unsupported(text))?),
        };

        Ok(Self {
            column: column.to_string(),
            negated,
            literal,
        })
    }

    fn matches(&self, row: &QueryRow) -> bool {
        let Some(value) = row.get(&self.column).filter(|value| !value.is_null()) else {
            return false;
        };
        let equal = match &self.literal {
            Literal::Integer(expected) => value.as_i64() == Some(*expected),
            Literal::Text(expected) => value.to_text().as_deref() == Some(expected.as_str()),
        };
        equal != self.negated
    }
}

#[derive(Debug, Default)]
struct Selection {
    any_of: Vec<Clause>,
}

impl Selection {
    fn parse(selection: Option<&str>) -> Result<Self> {
        let Some(selection) = selection.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(Self::default());
        };
        let any_of = split_keyword(selection, " or ")
            .into_iter()
            .map(Clause::parse)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { any_of })
    }

    fn matches(&self, row: &QueryRow) -> bool {
        self.any_of.is_empty() || self.any_of.iter().any(|clause| clause.matches(row))
    }
}

/// Splits on `keyword` case-insensitively, ignoring occurrences inside quotes.
fn split_keyword<'a>(text: &'a str, keyword: &str) -> Vec<&'a str> {
    let lower = text.to_ascii_lowercase();
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut i = 0;
    while i < text.len() {
        if text.as_bytes()[i] == b'\'' {
            in_quotes = !in_quotes;
        } else if !in_quotes && lower.as_bytes()[i..].starts_with(keyword.as_bytes()) {
            parts.push(&text[start..i]);
            i += keyword.len();
            start = i;
            continue;
        }
        i += 1;
    }
    parts.push(&text[start..]);
    parts
}

fn unsupported(text: &str) -> BridgeError {
    BridgeError::OperationFailed(format!("Unsupported selection clause: {text}"))
}

// =============================================================================
// Sort order
// =============================================================================

#[derive(Debug, Clone)]
struct SortTerm {
    column: String,
    collated: bool,
    descending: bool,
}

#[derive(Debug, Default)]
struct SortOrder {
    terms: Vec<SortTerm>,
}

impl SortOrder {
    fn parse(order: &str) -> Result<Self> {
        let mut terms = Vec::new();
        for term in order.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let words: Vec<&str> = term.split_whitespace().collect();
            let mut term = SortTerm {
                column: words[0].to_string(),
                collated: false,
                descending: false,
            };
            let mut rest = words[1..].iter();
            while let Some(word) = rest.next() {
                match word.to_ascii_uppercase().as_str() {
                    "COLLATE" => {
                        rest.next();
                        term.collated = true;
                    }
                    "ASC" => term.descending = false,
                    "DESC" => term.descending = true,
                    other => {
                        return Err(BridgeError::OperationFailed(format!(
                            "Unsupported sort keyword: {other}"
                        )))
                    }
                }
            }
            terms.push(term);
        }
        Ok(Self { terms })
    }

    fn apply(&self, rows: &mut [QueryRow]) {
        if self.terms.is_empty() {
            return;
        }
        rows.sort_by(|a, b| {
            self.terms
                .iter()
                .map(|term| {
                    let ordering = compare_cells(
                        a.get(&term.column),
                        b.get(&term.column),
                        term.collated,
                    );
                    if term.descending {
                        ordering.reverse()
                    } else {
                        ordering
                    }
                })
                .find(|ordering| *ordering != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
    }
}

fn compare_cells(a: Option<&QueryValue>, b: Option<&QueryValue>, collated: bool) -> Ordering {
    let a = a.filter(|value| !value.is_null());
    let b = b.filter(|value| !value.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(QueryValue::Integer(x)), Some(QueryValue::Integer(y))) => x.cmp(y),
        (Some(a), Some(b)) => {
            let a = a.to_text().unwrap_or_default();
            let b = b.to_text().unwrap_or_default();
            if collated {
                a.to_lowercase()
                    .cmp(&b.to_lowercase())
                    .then_with(|| a.cmp(&b))
            } else {
                a.cmp(&b)
            }
        }
    }
}
