use std::sync::{Arc, Mutex};

// keepers use HashSet or HashMap with a fast hasher
use core::hash::{BuildHasher, BuildHasherDefault};
use std::collections::hash_map::RandomState;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use seahash::SeaHasher;

// record-id result sets when grouping graph traversals
use roaring::RoaringTreemap;

// used to print out readable forms of a construct
use std::fmt;

use std::fs;
use std::path::Path;

use tracing::{debug, info};

// our own stuff that we need
use crate::codec;
use crate::schema::{Catalog, DefaultValue};
use crate::{EpmError, Result};

// ------------- RecordId -------------
/// Opaque record identity. Records are identified by id, never by name; names
/// are mutable field values resolved late on every graph query.
pub type RecordId = u64;

pub type IdHasher = BuildHasherDefault<SeaHasher>;
pub type OtherHasher = BuildHasherDefault<SeaHasher>;

pub const GENESIS: RecordId = 0;

/// Ids are never reused: a stale handle to a deleted record must keep
/// failing with not-found instead of resolving to a later record.
#[derive(Debug)]
pub struct RecordIdGenerator {
    lower_bound: RecordId,
}

impl RecordIdGenerator {
    pub fn new() -> Self {
        Self {
            lower_bound: GENESIS,
        }
    }
    pub fn generate(&mut self) -> RecordId {
        self.lower_bound += 1;
        self.lower_bound
    }
}

impl Default for RecordIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

// ------------- FieldValue -------------
/// A stored field value: a literal scalar or a late-bound reference kept as
/// the referenced record's name at assignment time.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Empty,
    Str(String),
    Num(f64),
    Ref(String),
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) | FieldValue::Ref(s) => Some(s),
            _ => None,
        }
    }
    pub fn as_num(&self) -> Option<f64> {
        match self {
            FieldValue::Num(n) => Some(*n),
            _ => None,
        }
    }
    pub fn is_empty(&self) -> bool {
        matches!(self, FieldValue::Empty)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FieldValue::Empty => Ok(()),
            FieldValue::Str(s) | FieldValue::Ref(s) => write!(f, "{}", s),
            FieldValue::Num(n) => write!(f, "{}", fmt_number(*n)),
        }
    }
}

impl PartialEq<&str> for FieldValue {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == Some(*other)
    }
}

impl PartialEq<f64> for FieldValue {
    fn eq(&self, other: &f64) -> bool {
        self.as_num() == Some(*other)
    }
}

/// Stable textual form for numeric fields; whole numbers print without a
/// trailing fraction so a serialized document reparses to equal values.
pub(crate) fn fmt_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

// ------------- FieldInput -------------
/// Caller-supplied field value, before case normalization and reference
/// tagging are applied by the owning model.
#[derive(Debug, Clone)]
pub enum FieldInput {
    Empty,
    Str(String),
    Num(f64),
}

impl From<&str> for FieldInput {
    fn from(s: &str) -> Self {
        FieldInput::Str(s.to_string())
    }
}
impl From<String> for FieldInput {
    fn from(s: String) -> Self {
        FieldInput::Str(s)
    }
}
impl From<f64> for FieldInput {
    fn from(n: f64) -> Self {
        FieldInput::Num(n)
    }
}
impl From<i64> for FieldInput {
    fn from(n: i64) -> Self {
        FieldInput::Num(n as f64)
    }
}
impl From<i32> for FieldInput {
    fn from(n: i32) -> Self {
        FieldInput::Num(n as f64)
    }
}

// ------------- RecordData / RecordKeeper -------------
#[derive(Debug)]
pub(crate) struct RecordData {
    pub(crate) id: RecordId,
    pub(crate) table: usize,
    pub(crate) fields: Vec<FieldValue>,
}

/// Owns every record of the model, preserving per-table insertion order.
#[derive(Debug)]
pub(crate) struct RecordKeeper {
    kept: HashMap<RecordId, RecordData, IdHasher>,
    order: Vec<Vec<RecordId>>,
}

impl RecordKeeper {
    pub fn new(table_count: usize) -> Self {
        Self {
            kept: HashMap::default(),
            order: vec![Vec::new(); table_count],
        }
    }
    pub fn keep(&mut self, data: RecordData) {
        self.order[data.table].push(data.id);
        self.kept.insert(data.id, data);
    }
    pub fn get(&self, id: RecordId) -> Option<&RecordData> {
        self.kept.get(&id)
    }
    pub fn get_mut(&mut self, id: RecordId) -> Option<&mut RecordData> {
        self.kept.get_mut(&id)
    }
    pub fn remove(&mut self, id: RecordId) -> Option<RecordData> {
        let data = self.kept.remove(&id)?;
        self.order[data.table].retain(|kept| *kept != id);
        Some(data)
    }
    pub fn order(&self, table: usize) -> &[RecordId] {
        &self.order[table]
    }
    pub fn table_len(&self, table: usize) -> usize {
        self.order[table].len()
    }
    pub fn len(&self) -> usize {
        self.kept.len()
    }
}

// ------------- Lookups -------------
/// Multimap index between constructs, similar to a database index.
#[derive(Debug)]
pub struct Lookup<K, V, H = RandomState> {
    index: HashMap<K, HashSet<V>, H>,
}
impl<K: Eq + Hash, V: Eq + Hash, H: BuildHasher + Default> Lookup<K, V, H> {
    pub fn new() -> Self {
        Self {
            index: HashMap::<K, HashSet<V>, H>::default(),
        }
    }
    pub fn insert(&mut self, key: K, value: V) {
        let set = self.index.entry(key).or_insert(HashSet::<V>::new());
        set.insert(value);
    }
    pub fn remove(&mut self, key: &K, value: &V) {
        if let Some(set) = self.index.get_mut(key) {
            set.remove(value);
            if set.is_empty() {
                self.index.remove(key);
            }
        }
    }
    pub fn lookup(&self, key: &K) -> Option<&HashSet<V>> {
        self.index.get(key)
    }
}

impl<K: Eq + Hash, V: Eq + Hash, H: BuildHasher + Default> Default for Lookup<K, V, H> {
    fn default() -> Self {
        Self::new()
    }
}

/// Reference-graph key: a record type paired with a lowercased name, so that
/// resolution is case-insensitive and late-bound.
type GraphKey = (usize, String);

// ------------- Epm -------------
/// The model container: owns the catalog, every record, and the incrementally
/// maintained reference-graph lookups.
///
/// `name_lookup` maps `(table, lowercased name)` to the records currently
/// bearing that name; `reference_lookup` maps `(target table, lowercased
/// referenced name)` to the records whose reference fields store that name.
/// Both are pure functions of current field state, diffed on every mutation,
/// so "pointing" and "pointed" traversals resolve by current name at query
/// time. Renaming a record therefore silently detaches records that stored
/// its old name, and attaches any forward references to the new one.
#[derive(Debug)]
pub struct Epm {
    catalog: Arc<Catalog>,
    // owns a record id generator
    id_generator: Arc<Mutex<RecordIdGenerator>>,
    // owns the keeper for record data
    record_keeper: Arc<Mutex<RecordKeeper>>,
    // owns lookups between constructs (similar to database indexes)
    name_lookup: Arc<Mutex<Lookup<GraphKey, RecordId, OtherHasher>>>,
    reference_lookup: Arc<Mutex<Lookup<GraphKey, RecordId, OtherHasher>>>,
}

impl Epm {
    /// An empty model over the embedded catalog.
    pub fn new() -> Self {
        Self::with_catalog(Arc::new(Catalog::builtin()))
    }

    /// An empty model over a caller-supplied catalog.
    pub fn with_catalog(catalog: Arc<Catalog>) -> Self {
        let record_keeper = RecordKeeper::new(catalog.table_count());
        Self {
            catalog,
            id_generator: Arc::new(Mutex::new(RecordIdGenerator::new())),
            record_keeper: Arc::new(Mutex::new(record_keeper)),
            name_lookup: Arc::new(Mutex::new(Lookup::new())),
            reference_lookup: Arc::new(Mutex::new(Lookup::new())),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Loads a model from a document on disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Epm> {
        let text = fs::read_to_string(&path)?;
        let epm = Self::from_text(&text)?;
        info!(path = %path.as_ref().display(), records = epm.len(), "loaded model");
        Ok(epm)
    }

    /// Parses a model from document text, using the embedded catalog.
    pub fn from_text(text: &str) -> Result<Epm> {
        Self::from_text_with_catalog(text, Arc::new(Catalog::builtin()))
    }

    pub fn from_text_with_catalog(text: &str, catalog: Arc<Catalog>) -> Result<Epm> {
        let epm = Self::with_catalog(catalog);
        codec::parse_document(&epm, text)?;
        Ok(epm)
    }

    /// Serializes every table back to the textual record format.
    pub fn to_text(&self) -> String {
        codec::serialize_document(self)
    }

    /// Serializes the model to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(&path, self.to_text())?;
        info!(path = %path.as_ref().display(), records = self.len(), "saved model");
        Ok(())
    }

    /// Total number of records across all tables.
    pub fn len(&self) -> usize {
        self.record_keeper.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Walks every reference field and reports the first one that does not
    /// currently resolve to a record. The core mutation paths permit dangling
    /// references by design; this validator is for callers that want to
    /// enforce referential integrity at chosen moments.
    pub fn check_references(&self) -> Result<()> {
        let keeper = self.record_keeper.lock().unwrap();
        let names = self.name_lookup.lock().unwrap();
        for table in 0..self.catalog.table_count() {
            for id in keeper.order(table) {
                let data = keeper.get(*id).unwrap();
                for (position, value) in data.fields.iter().enumerate() {
                    let (FieldValue::Ref(reference), Some(target)) =
                        (value, self.catalog.reference_target(table, position))
                    else {
                        continue;
                    };
                    let resolved = names
                        .lookup(&(target, reference.to_lowercase()))
                        .map(|set| !set.is_empty())
                        .unwrap_or(false);
                    if !resolved {
                        let name = self
                            .catalog
                            .name_position(table)
                            .and_then(|p| data.fields[p].as_str())
                            .unwrap_or("")
                            .to_string();
                        return Err(EpmError::DanglingReference {
                            table: self.catalog.table_name(table).to_string(),
                            name,
                            target: self.catalog.table_name(target).to_string(),
                            reference: reference.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    // ------------- internal mutation and query paths -------------

    /// Applies the case policy and reference tagging for one position.
    pub(crate) fn normalize(&self, table: usize, position: usize, input: FieldInput) -> FieldValue {
        let target = self.catalog.reference_target(table, position);
        match input {
            FieldInput::Empty => FieldValue::Empty,
            FieldInput::Num(n) => match target {
                Some(_) => FieldValue::Ref(fmt_number(n)),
                None => FieldValue::Num(n),
            },
            FieldInput::Str(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return FieldValue::Empty;
                }
                let stored = if self.catalog.retains_case(table, position) {
                    trimmed.to_string()
                } else {
                    trimmed.to_lowercase()
                };
                match target {
                    Some(_) => FieldValue::Ref(stored),
                    None => FieldValue::Str(stored),
                }
            }
        }
    }

    /// Validates named values against the schema and lays out a full row:
    /// defaults for unset fixed fields, extensible region padded to whole
    /// repeat groups. Fails without touching the model.
    pub(crate) fn build_row(
        &self,
        table: usize,
        values: Vec<(String, FieldInput)>,
    ) -> Result<Vec<FieldValue>> {
        let fixed = self.catalog.fixed_len(table);
        let mut positioned = Vec::with_capacity(values.len());
        let mut len = fixed;
        for (name, input) in values {
            let position = self.catalog.field_index(table, &name)?;
            len = len.max(position + 1);
            positioned.push((position, input));
        }
        if let Some(cycle) = self.catalog.cycle(table) {
            if len > fixed {
                len = fixed + (len - fixed).div_ceil(cycle) * cycle;
            }
        }
        let mut row = vec![FieldValue::Empty; len];
        for position in 0..fixed {
            if let Some(default) = self.catalog.default_value(table, position) {
                let input = match default {
                    DefaultValue::Num(n) => FieldInput::Num(*n),
                    DefaultValue::Str(s) => FieldInput::Str(s.clone()),
                };
                row[position] = self.normalize(table, position, input);
            }
        }
        for (position, input) in positioned {
            row[position] = self.normalize(table, position, input);
        }
        Ok(row)
    }

    /// Inserts an already-normalized row, indexing its name and references.
    pub(crate) fn insert_row(&self, table: usize, row: Vec<FieldValue>) -> RecordId {
        let id = self.id_generator.lock().unwrap().generate();
        let data = RecordData {
            id,
            table,
            fields: row,
        };
        let mut keeper = self.record_keeper.lock().unwrap();
        let mut names = self.name_lookup.lock().unwrap();
        let mut references = self.reference_lookup.lock().unwrap();
        if let Some(name) = self.record_name(&data) {
            names.insert((table, name), id);
        }
        for (position, value) in data.fields.iter().enumerate() {
            if let (FieldValue::Ref(reference), Some(target)) =
                (value, self.catalog.reference_target(table, position))
            {
                references.insert((target, reference.to_lowercase()), id);
            }
        }
        keeper.keep(data);
        debug!(table = self.catalog.table_name(table), id, "added record");
        id
    }

    pub(crate) fn add_record(
        &self,
        table: usize,
        values: Vec<(String, FieldInput)>,
    ) -> Result<RecordId> {
        let row = self.build_row(table, values)?;
        Ok(self.insert_row(table, row))
    }

    /// Batch insert: every row is validated before any is inserted, so an
    /// invalid entry leaves the table untouched.
    pub(crate) fn add_records(
        &self,
        table: usize,
        entries: Vec<Vec<(String, FieldInput)>>,
    ) -> Result<Vec<RecordId>> {
        let mut rows = Vec::with_capacity(entries.len());
        for values in entries {
            rows.push(self.build_row(table, values)?);
        }
        Ok(rows
            .into_iter()
            .map(|row| self.insert_row(table, row))
            .collect())
    }

    pub(crate) fn field_value(&self, id: RecordId, position: usize) -> Result<FieldValue> {
        let keeper = self.record_keeper.lock().unwrap();
        let data = keeper.get(id).ok_or_else(|| gone(id))?;
        data.fields
            .get(position)
            .cloned()
            .ok_or(EpmError::IndexOutOfRange {
                index: position,
                length: data.fields.len(),
            })
    }

    pub(crate) fn field_count(&self, id: RecordId) -> Result<usize> {
        let keeper = self.record_keeper.lock().unwrap();
        Ok(keeper.get(id).ok_or_else(|| gone(id))?.fields.len())
    }

    pub(crate) fn record_fields(&self, id: RecordId) -> Result<Vec<FieldValue>> {
        let keeper = self.record_keeper.lock().unwrap();
        Ok(keeper.get(id).ok_or_else(|| gone(id))?.fields.clone())
    }

    pub(crate) fn set_field(
        &self,
        id: RecordId,
        position: usize,
        input: FieldInput,
    ) -> Result<()> {
        let mut keeper = self.record_keeper.lock().unwrap();
        let data = keeper.get_mut(id).ok_or_else(|| gone(id))?;
        let table = data.table;
        if position >= data.fields.len() {
            return Err(EpmError::IndexOutOfRange {
                index: position,
                length: data.fields.len(),
            });
        }
        let new_value = self.normalize(table, position, input);
        let old_value = std::mem::replace(&mut data.fields[position], new_value.clone());
        if self.catalog.name_position(table) == Some(position) {
            let mut names = self.name_lookup.lock().unwrap();
            if let Some(old) = graph_name(&old_value) {
                names.remove(&(table, old), &id);
            }
            if let Some(new) = graph_name(&new_value) {
                names.insert((table, new), id);
            }
        }
        if let Some(target) = self.catalog.reference_target(table, position) {
            let mut references = self.reference_lookup.lock().unwrap();
            if let FieldValue::Ref(old) = &old_value {
                references.remove(&(target, old.to_lowercase()), &id);
            }
            if let FieldValue::Ref(new) = &new_value {
                references.insert((target, new.to_lowercase()), id);
            }
        }
        debug!(
            table = self.catalog.table_name(table),
            id, position, "set field"
        );
        Ok(())
    }

    /// Appends whole repeat groups to an extensible record.
    pub(crate) fn append_fields(&self, id: RecordId, inputs: Vec<FieldInput>) -> Result<()> {
        let mut keeper = self.record_keeper.lock().unwrap();
        let data = keeper.get_mut(id).ok_or_else(|| gone(id))?;
        let table = data.table;
        let cycle = self
            .catalog
            .cycle(table)
            .ok_or_else(|| EpmError::NotExtensible(self.catalog.table_name(table).to_string()))?;
        if inputs.is_empty() || inputs.len() % cycle != 0 {
            return Err(EpmError::ArityMismatch {
                given: inputs.len(),
                cycle,
            });
        }
        let start = data.fields.len();
        let mut references = self.reference_lookup.lock().unwrap();
        for (offset, input) in inputs.into_iter().enumerate() {
            let position = start + offset;
            let value = self.normalize(table, position, input);
            if let (FieldValue::Ref(reference), Some(target)) =
                (&value, self.catalog.reference_target(table, position))
            {
                references.insert((target, reference.to_lowercase()), id);
            }
            data.fields.push(value);
        }
        debug!(
            table = self.catalog.table_name(table),
            id, "appended extensible fields"
        );
        Ok(())
    }

    /// Removes the record from its owning table. Other records' stored
    /// reference strings are left untouched; a reference to the removed name
    /// simply stops resolving.
    pub(crate) fn delete_record(&self, id: RecordId) -> Result<()> {
        let mut keeper = self.record_keeper.lock().unwrap();
        let data = keeper.remove(id).ok_or_else(|| gone(id))?;
        let table = data.table;
        if let Some(name) = self.record_name(&data) {
            self.name_lookup.lock().unwrap().remove(&(table, name), &id);
        }
        let mut references = self.reference_lookup.lock().unwrap();
        for (position, value) in data.fields.iter().enumerate() {
            if let (FieldValue::Ref(reference), Some(target)) =
                (value, self.catalog.reference_target(table, position))
            {
                references.remove(&(target, reference.to_lowercase()), &id);
            }
        }
        debug!(table = self.catalog.table_name(table), id, "deleted record");
        Ok(())
    }

    /// Records this record's reference fields currently resolve to, grouped
    /// by record type in table order.
    pub(crate) fn pointing_ids(&self, id: RecordId) -> Result<Vec<(usize, Vec<RecordId>)>> {
        let keeper = self.record_keeper.lock().unwrap();
        let data = keeper.get(id).ok_or_else(|| gone(id))?;
        let names = self.name_lookup.lock().unwrap();
        let mut grouped: HashMap<usize, RoaringTreemap, OtherHasher> = HashMap::default();
        for (position, value) in data.fields.iter().enumerate() {
            let (FieldValue::Ref(reference), Some(target)) =
                (value, self.catalog.reference_target(data.table, position))
            else {
                continue;
            };
            if let Some(resolved) = names.lookup(&(target, reference.to_lowercase())) {
                let set = grouped.entry(target).or_default();
                for resolved_id in resolved {
                    set.insert(*resolved_id);
                }
            }
        }
        Ok(in_table_order(&keeper, grouped))
    }

    /// Records across the whole model whose reference fields currently
    /// resolve to this record's name, grouped by record type in table order.
    pub(crate) fn pointed_ids(&self, id: RecordId) -> Result<Vec<(usize, Vec<RecordId>)>> {
        let keeper = self.record_keeper.lock().unwrap();
        let data = keeper.get(id).ok_or_else(|| gone(id))?;
        let Some(name) = self.record_name(data) else {
            return Ok(Vec::new());
        };
        let references = self.reference_lookup.lock().unwrap();
        let mut grouped: HashMap<usize, RoaringTreemap, OtherHasher> = HashMap::default();
        if let Some(pointers) = references.lookup(&(data.table, name)) {
            for pointer in pointers {
                // pointers are unindexed on delete, so they are always live
                let pointer_table = keeper.get(*pointer).unwrap().table;
                grouped.entry(pointer_table).or_default().insert(*pointer);
            }
        }
        Ok(in_table_order(&keeper, grouped))
    }

    pub(crate) fn table_order(&self, table: usize) -> Vec<RecordId> {
        self.record_keeper.lock().unwrap().order(table).to_vec()
    }

    pub(crate) fn table_len(&self, table: usize) -> usize {
        self.record_keeper.lock().unwrap().table_len(table)
    }

    /// Lowercased value of the conventional name field, used as graph key.
    fn record_name(&self, data: &RecordData) -> Option<String> {
        let position = self.catalog.name_position(data.table)?;
        data.fields.get(position).and_then(graph_name)
    }
}

/// Graph key form of a field value; numeric names still take part in
/// resolution through their textual form.
fn graph_name(value: &FieldValue) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string().to_lowercase())
    }
}

impl Default for Epm {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Epm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Epm ({} records)", self.len())?;
        let keeper = self.record_keeper.lock().unwrap();
        for table in 0..self.catalog.table_count() {
            let count = keeper.table_len(table);
            if count > 0 {
                writeln!(f, "  {}: {}", self.catalog.table_name(table), count)?;
            }
        }
        Ok(())
    }
}

fn gone(id: RecordId) -> EpmError {
    EpmError::NotFound(format!("record {} no longer exists in its table", id))
}

/// Orders grouped id sets by each table's insertion order.
fn in_table_order(
    keeper: &RecordKeeper,
    grouped: HashMap<usize, RoaringTreemap, OtherHasher>,
) -> Vec<(usize, Vec<RecordId>)> {
    let mut tables: Vec<usize> = grouped.keys().copied().collect();
    tables.sort_unstable();
    tables
        .into_iter()
        .map(|table| {
            let set = &grouped[&table];
            let ordered = keeper
                .order(table)
                .iter()
                .copied()
                .filter(|id| set.contains(*id))
                .collect();
            (table, ordered)
        })
        .collect()
}
