//! Tables, records and querysets: the user-facing surface of the store.
//!
//! All three are lightweight handles borrowing the owning [`Epm`]; record
//! data itself stays inside the model's keeper. A [`Queryset`] snapshots its
//! record ids at construction, so chained `select` calls refine the snapshot
//! without re-touching the source table, while field access through the
//! contained [`Record`] handles always reads current state.

use std::fmt;

use roaring::RoaringTreemap;

use crate::codec;
use crate::construct::{Epm, FieldInput, FieldValue, RecordId};
use crate::{EpmError, Result};

impl Epm {
    /// Case-insensitive table lookup by record type name.
    pub fn table(&self, type_name: &str) -> Result<Table<'_>> {
        let index = self.catalog().table_index(type_name)?;
        Ok(Table { epm: self, index })
    }
}

// ------------- Table -------------
/// The set of all records of one record type, in insertion order.
#[derive(Clone, Copy)]
pub struct Table<'a> {
    epm: &'a Epm,
    index: usize,
}

impl<'a> Table<'a> {
    pub fn name(&self) -> &'a str {
        self.epm.catalog().table_name(self.index)
    }
    pub fn len(&self) -> usize {
        self.epm.table_len(self.index)
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Adds one record from named field values, validating every name against
    /// the schema and applying the case policy per field.
    pub fn add(&self, values: Vec<(&str, FieldInput)>) -> Result<Record<'a>> {
        let id = self.epm.add_record(self.index, own(values))?;
        Ok(Record {
            epm: self.epm,
            table: self.index,
            id,
        })
    }

    /// Adds many records at once. All entries are validated before any record
    /// is inserted, so one invalid entry leaves the table untouched. Returns
    /// a queryset over exactly the new records, in input order.
    pub fn batch_add(&self, entries: Vec<Vec<(&str, FieldInput)>>) -> Result<Queryset<'a>> {
        let ids = self
            .epm
            .add_records(self.index, entries.into_iter().map(own).collect())?;
        Ok(Queryset::from_ids(
            self.epm,
            ids.into_iter().map(|id| (self.index, id)).collect(),
        ))
    }

    /// Snapshot of the whole table as a queryset.
    pub fn queryset(&self) -> Queryset<'a> {
        Queryset::from_ids(
            self.epm,
            self.epm
                .table_order(self.index)
                .into_iter()
                .map(|id| (self.index, id))
                .collect(),
        )
    }

    pub fn select<P: Fn(&Record) -> bool>(&self, predicate: P) -> Queryset<'a> {
        self.queryset().select(predicate)
    }

    /// The unique record matching the predicate.
    pub fn one<P: Fn(&Record) -> bool>(&self, predicate: P) -> Result<Record<'a>> {
        self.select(predicate).one()
    }

    pub fn get(&self, index: usize) -> Result<Record<'a>> {
        self.queryset().get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = Record<'a>> + 'a {
        let epm = self.epm;
        let table = self.index;
        self.epm
            .table_order(self.index)
            .into_iter()
            .map(move |id| Record { epm, table, id })
    }
}

impl fmt::Display for Table<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Table {} ({} records)", self.name(), self.len())
    }
}

// ------------- Record -------------
/// Handle to one record. Identity is the record id, not the name; two handles
/// are equal iff they designate the same record of the same model.
#[derive(Clone, Copy)]
pub struct Record<'a> {
    epm: &'a Epm,
    table: usize,
    id: RecordId,
}

impl<'a> Record<'a> {
    pub fn id(&self) -> RecordId {
        self.id
    }
    pub fn table_name(&self) -> &'a str {
        self.epm.catalog().table_name(self.table)
    }

    /// Value of the conventional name field, when the type has one and the
    /// record still exists. Numeric names yield their textual form, the same
    /// form the reference graph resolves them by.
    pub fn name(&self) -> Option<String> {
        let position = self.epm.catalog().name_position(self.table)?;
        let value = self.epm.field_value(self.id, position).ok()?;
        if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        }
    }

    /// Case-insensitive named field access.
    pub fn get(&self, field_name: &str) -> Result<FieldValue> {
        let position = self.epm.catalog().field_index(self.table, field_name)?;
        self.epm.field_value(self.id, position)
    }

    /// Positional field access; extensible positions beyond the current
    /// length are out of range.
    pub fn get_at(&self, position: usize) -> Result<FieldValue> {
        self.epm.field_value(self.id, position)
    }

    /// Sets a field by name. A [`Record`] value stores that record's current
    /// name; a plain string is stored directly, so forward and dangling
    /// references are permitted.
    pub fn set<V: Into<FieldInput>>(&self, field_name: &str, value: V) -> Result<()> {
        let position = self.epm.catalog().field_index(self.table, field_name)?;
        self.epm.set_field(self.id, position, value.into())
    }

    pub fn set_at<V: Into<FieldInput>>(&self, position: usize, value: V) -> Result<()> {
        self.epm.set_field(self.id, position, value.into())
    }

    /// Appends one or more whole repeat groups to an extensible record.
    pub fn add_fields(&self, values: Vec<FieldInput>) -> Result<()> {
        self.epm.append_fields(self.id, values)
    }

    pub fn field_count(&self) -> Result<usize> {
        self.epm.field_count(self.id)
    }

    /// Records this record's reference fields currently resolve to, grouped
    /// by record type.
    pub fn pointing_records(&self) -> Result<MultiQueryset<'a>> {
        Ok(MultiQueryset {
            epm: self.epm,
            groups: self.epm.pointing_ids(self.id)?,
        })
    }

    /// Records whose reference fields currently resolve to this record,
    /// grouped by record type.
    pub fn pointed_records(&self) -> Result<MultiQueryset<'a>> {
        Ok(MultiQueryset {
            epm: self.epm,
            groups: self.epm.pointed_ids(self.id)?,
        })
    }

    /// Removes the record from its owning table. No cascade: records that
    /// referenced it keep their stored name strings.
    pub fn delete(self) -> Result<()> {
        self.epm.delete_record(self.id)
    }
}

impl fmt::Debug for Record<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Record")
            .field("table", &self.table_name())
            .field("id", &self.id)
            .finish()
    }
}

impl PartialEq for Record<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.epm, other.epm) && self.id == other.id
    }
}
impl Eq for Record<'_> {}

impl From<&Record<'_>> for FieldInput {
    fn from(record: &Record<'_>) -> Self {
        match record.name() {
            Some(name) => FieldInput::Str(name),
            None => FieldInput::Empty,
        }
    }
}

impl fmt::Display for Record<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.epm.record_fields(self.id) {
            Ok(fields) => write!(
                f,
                "{}",
                codec::serialize_record(self.epm.catalog(), self.table, &fields)
            ),
            Err(_) => write!(f, "<deleted record {}>", self.id),
        }
    }
}

// ------------- Queryset -------------
/// An ordered, de-duplicated snapshot of records, filterable by chained
/// `select` calls. Order is source order, preserved through filtering.
#[derive(Debug, Clone)]
pub struct Queryset<'a> {
    epm: &'a Epm,
    entries: Vec<(usize, RecordId)>,
}

impl<'a> Queryset<'a> {
    pub(crate) fn from_ids(epm: &'a Epm, entries: Vec<(usize, RecordId)>) -> Self {
        let mut seen = RoaringTreemap::new();
        let entries = entries
            .into_iter()
            .filter(|(_, id)| seen.insert(*id))
            .collect();
        Self { epm, entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Filters the current records with a pure predicate, producing a new
    /// queryset without mutating this one.
    pub fn select<P: Fn(&Record) -> bool>(&self, predicate: P) -> Queryset<'a> {
        let entries = self
            .entries
            .iter()
            .copied()
            .filter(|(table, id)| {
                predicate(&Record {
                    epm: self.epm,
                    table: *table,
                    id: *id,
                })
            })
            .collect();
        Queryset {
            epm: self.epm,
            entries,
        }
    }

    /// The single contained record; zero matches and multiple matches are
    /// both cardinality violations.
    pub fn one(&self) -> Result<Record<'a>> {
        match self.entries.len() {
            1 => self.get(0),
            0 => Err(EpmError::NotFound("no record matched".to_string())),
            n => Err(EpmError::MultipleFound(format!("{} records matched", n))),
        }
    }

    pub fn get(&self, index: usize) -> Result<Record<'a>> {
        let (table, id) = *self
            .entries
            .get(index)
            .ok_or(EpmError::IndexOutOfRange {
                index,
                length: self.entries.len(),
            })?;
        Ok(Record {
            epm: self.epm,
            table,
            id,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = Record<'a>> + '_ {
        let epm = self.epm;
        self.entries
            .iter()
            .map(move |(table, id)| Record {
                epm,
                table: *table,
                id: *id,
            })
    }

    pub fn contains(&self, record: &Record) -> bool {
        self.entries.iter().any(|(_, id)| *id == record.id)
    }

    /// Deletes every contained record from its owning table.
    pub fn delete(self) -> Result<()> {
        for (_, id) in self.entries {
            self.epm.delete_record(id)?;
        }
        Ok(())
    }
}

impl fmt::Display for Queryset<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Queryset of {} record(s)", self.len())?;
        for record in self.iter() {
            write!(
                f,
                "\n  <{} '{}'>",
                record.table_name(),
                record.name().unwrap_or_default()
            )?;
        }
        Ok(())
    }
}

// ------------- MultiQueryset -------------
/// Grouped-by-type result of a graph traversal: one sub-queryset per record
/// type, in catalog table order.
pub struct MultiQueryset<'a> {
    epm: &'a Epm,
    groups: Vec<(usize, Vec<RecordId>)>,
}

impl<'a> MultiQueryset<'a> {
    /// Sub-queryset for one record type; empty when no contained record has
    /// that type.
    pub fn table(&self, type_name: &str) -> Result<Queryset<'a>> {
        let index = self.epm.catalog().table_index(type_name)?;
        let entries = self
            .groups
            .iter()
            .find(|(table, _)| *table == index)
            .map(|(table, ids)| ids.iter().map(|id| (*table, *id)).collect())
            .unwrap_or_default();
        Ok(Queryset::from_ids(self.epm, entries))
    }

    /// All contained records flattened into one queryset, group by group.
    pub fn records(&self) -> Queryset<'a> {
        let entries = self
            .groups
            .iter()
            .flat_map(|(table, ids)| ids.iter().map(move |id| (*table, *id)))
            .collect();
        Queryset::from_ids(self.epm, entries)
    }

    /// Declared names of the record types present in the result.
    pub fn tables(&self) -> Vec<&'a str> {
        self.groups
            .iter()
            .map(|(table, _)| self.epm.catalog().table_name(*table))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.groups.iter().map(|(_, ids)| ids.len()).sum()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, record: &Record) -> bool {
        self.groups
            .iter()
            .any(|(_, ids)| ids.contains(&record.id))
    }
}

impl fmt::Display for MultiQueryset<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "MultiQueryset of {} record(s)", self.len())?;
        for (table, ids) in &self.groups {
            write!(
                f,
                "\n  {}: {}",
                self.epm.catalog().table_name(*table),
                ids.len()
            )?;
        }
        Ok(())
    }
}

fn own(values: Vec<(&str, FieldInput)>) -> Vec<(String, FieldInput)> {
    values
        .into_iter()
        .map(|(name, input)| (name.to_string(), input))
        .collect()
}
