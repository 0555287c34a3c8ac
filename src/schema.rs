//! The field schema catalog: a static, read-only description of every record
//! type the store understands.
//!
//! Each record type declares an ordered list of fields (name, default value,
//! case-sensitivity flag, reference target type) and, for extensible types, a
//! trailing repeat group whose slot names are templates containing `{i}`.
//! The catalog ships as embedded JSON and is deserialized once at model
//! construction; it is never mutated afterwards.
//!
//! All name lookups (record types as well as fields) are case-insensitive and
//! go through [`canonical_ident`], which maps any declared spelling to a
//! snake-case canonical form.

use bimap::BiMap;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;

use crate::{EpmError, Result};

lazy_static! {
    static ref NON_IDENT: Regex = Regex::new(r"[^0-9a-z]+").unwrap();
}

/// Sentinel substituted for `{i}` in slot name templates while building the
/// matching regex; digits so it survives canonicalization untouched.
const GROUP_SENTINEL: &str = "000987000";

/// Maps any declared spelling to its canonical snake-case form, e.g.
/// `"Schedule:Compact"` -> `"schedule_compact"` and
/// `"Vertex 1 X-coordinate"` -> `"vertex_1_x_coordinate"`.
pub fn canonical_ident(raw: &str) -> String {
    NON_IDENT
        .replace_all(raw.trim().to_lowercase().as_str(), "_")
        .trim_matches('_')
        .to_string()
}

/// A declared field default, either numeric or textual.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DefaultValue {
    Num(f64),
    Str(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldDescriptor {
    /// Declared field name, e.g. `"Direction of Relative North"`. For
    /// extensible slots this is a template containing `{i}`.
    pub name: String,
    #[serde(default)]
    pub default: Option<DefaultValue>,
    /// When false the stored value is lowercased on every write path.
    #[serde(default)]
    pub retains_case: bool,
    /// Declared name of the record type this field references, if any.
    #[serde(default)]
    pub reference: Option<String>,
}

/// Trailing repeat group of an extensible record type. The group arity is the
/// number of slots; `add_fields` appends whole groups at a time.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtensibleDescriptor {
    pub slots: Vec<FieldDescriptor>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableDescriptor {
    /// Declared record type name, e.g. `"BuildingSurface:Detailed"`.
    pub name: String,
    pub fields: Vec<FieldDescriptor>,
    #[serde(default)]
    pub extensible: Option<ExtensibleDescriptor>,
}

/// One record type's resolved schema: descriptor plus the derived indexes the
/// catalog answers lookups from.
#[derive(Debug)]
pub struct TableSchema {
    descriptor: TableDescriptor,
    field_index: HashMap<String, usize>,
    fixed_targets: Vec<Option<usize>>,
    slot_targets: Vec<Option<usize>>,
    slot_patterns: Vec<Regex>,
    name_position: Option<usize>,
}

impl TableSchema {
    pub fn descriptor(&self) -> &TableDescriptor {
        &self.descriptor
    }
}

#[derive(Debug)]
pub struct Catalog {
    tables: Vec<TableSchema>,
    // canonical type name <-> table index, so lookups can go both ways
    index: BiMap<String, usize>,
}

impl Catalog {
    /// Builds a catalog from a JSON array of table descriptors.
    pub fn from_json(json: &str) -> Result<Catalog> {
        let descriptors: Vec<TableDescriptor> =
            serde_json::from_str(json).map_err(|e| EpmError::Parse {
                message: format!("invalid catalog JSON: {}", e),
                line: Some(e.line()),
            })?;
        let mut index = BiMap::new();
        for (i, descriptor) in descriptors.iter().enumerate() {
            let canonical = canonical_ident(&descriptor.name);
            if index.insert(canonical, i).did_overwrite() {
                return Err(EpmError::Parse {
                    message: format!("duplicate record type '{}' in catalog", descriptor.name),
                    line: None,
                });
            }
        }
        let mut tables = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            tables.push(Self::resolve_table(descriptor, &index)?);
        }
        Ok(Catalog { tables, index })
    }

    /// The catalog embedded in the crate, covering the record types exercised
    /// by the bundled documents.
    pub fn builtin() -> Catalog {
        Catalog::from_json(include_str!("catalog.json")).expect("embedded catalog is valid")
    }

    fn resolve_table(descriptor: TableDescriptor, index: &BiMap<String, usize>) -> Result<TableSchema> {
        let mut field_index = HashMap::new();
        let mut fixed_targets = Vec::with_capacity(descriptor.fields.len());
        for (position, field) in descriptor.fields.iter().enumerate() {
            let canonical = canonical_ident(&field.name);
            if field_index.insert(canonical, position).is_some() {
                return Err(EpmError::Parse {
                    message: format!(
                        "duplicate field '{}' in record type {}",
                        field.name, descriptor.name
                    ),
                    line: None,
                });
            }
            fixed_targets.push(Self::resolve_target(field, index)?);
        }
        let mut slot_targets = Vec::new();
        let mut slot_patterns = Vec::new();
        if let Some(extensible) = &descriptor.extensible {
            for slot in &extensible.slots {
                slot_targets.push(Self::resolve_target(slot, index)?);
                slot_patterns.push(Self::slot_pattern(&slot.name)?);
            }
        }
        let name_position = descriptor
            .fields
            .iter()
            .position(|f| canonical_ident(&f.name) == "name");
        Ok(TableSchema {
            descriptor,
            field_index,
            fixed_targets,
            slot_targets,
            slot_patterns,
            name_position,
        })
    }

    fn resolve_target(field: &FieldDescriptor, index: &BiMap<String, usize>) -> Result<Option<usize>> {
        match &field.reference {
            None => Ok(None),
            Some(target) => match index.get_by_left(&canonical_ident(target)) {
                Some(i) => Ok(Some(*i)),
                None => Err(EpmError::UnknownType(target.clone())),
            },
        }
    }

    // "Vertex {i} X-coordinate" -> ^vertex_([0-9]+)_x_coordinate$
    fn slot_pattern(template: &str) -> Result<Regex> {
        if !template.contains("{i}") {
            return Err(EpmError::Parse {
                message: format!("extensible slot '{}' lacks an {{i}} placeholder", template),
                line: None,
            });
        }
        let canonical = canonical_ident(&template.replace("{i}", GROUP_SENTINEL));
        let pattern = format!(
            "^{}$",
            regex::escape(&canonical).replace(GROUP_SENTINEL, "([0-9]+)")
        );
        Regex::new(&pattern).map_err(|e| EpmError::Parse {
            message: format!("bad extensible slot template '{}': {}", template, e),
            line: None,
        })
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Case-insensitive record-type lookup.
    pub fn table_index(&self, type_name: &str) -> Result<usize> {
        self.index
            .get_by_left(&canonical_ident(type_name))
            .copied()
            .ok_or_else(|| EpmError::UnknownType(type_name.trim().to_string()))
    }

    pub fn table_schema(&self, type_name: &str) -> Result<&TableSchema> {
        Ok(&self.tables[self.table_index(type_name)?])
    }

    /// Declared record type name for a table index.
    pub fn table_name(&self, table: usize) -> &str {
        &self.tables[table].descriptor.name
    }

    pub fn canonical_name(&self, table: usize) -> &str {
        self.index.get_by_right(&table).unwrap()
    }

    /// Number of fixed (non-extensible) fields of a record type.
    pub fn fixed_len(&self, table: usize) -> usize {
        self.tables[table].descriptor.fields.len()
    }

    /// Repeat-group arity, if the record type is extensible.
    pub fn cycle(&self, table: usize) -> Option<usize> {
        self.tables[table]
            .descriptor
            .extensible
            .as_ref()
            .map(|e| e.slots.len())
    }

    /// Position of the conventional `name` field, if the type has one.
    pub fn name_position(&self, table: usize) -> Option<usize> {
        self.tables[table].name_position
    }

    /// Case-insensitive field lookup, covering extensible positions such as
    /// `field_3` or `vertex_2_y_coordinate`.
    pub fn field_index(&self, table: usize, field_name: &str) -> Result<usize> {
        let schema = &self.tables[table];
        let canonical = canonical_ident(field_name);
        if let Some(position) = schema.field_index.get(&canonical) {
            return Ok(*position);
        }
        if let Some(cycle) = self.cycle(table) {
            for (slot, pattern) in schema.slot_patterns.iter().enumerate() {
                if let Some(captures) = pattern.captures(&canonical) {
                    if let Ok(group) = captures[1].parse::<usize>() {
                        if group >= 1 {
                            let fixed = schema.descriptor.fields.len();
                            return Ok(fixed + (group - 1) * cycle + slot);
                        }
                    }
                }
            }
        }
        Err(EpmError::UnknownField {
            table: schema.descriptor.name.clone(),
            field: field_name.trim().to_string(),
        })
    }

    /// Declared name of the field at a position, substituting the group number
    /// into the slot template for extensible positions.
    pub fn field_name(&self, table: usize, position: usize) -> String {
        let schema = &self.tables[table];
        if let Some(field) = schema.descriptor.fields.get(position) {
            return field.name.clone();
        }
        match &schema.descriptor.extensible {
            Some(extensible) => {
                let fixed = schema.descriptor.fields.len();
                let cycle = extensible.slots.len();
                let group = (position - fixed) / cycle + 1;
                let slot = (position - fixed) % cycle;
                extensible.slots[slot].name.replace("{i}", &group.to_string())
            }
            None => format!("Field {}", position + 1),
        }
    }

    /// Whether the value at a position is stored exactly as written; when
    /// false it is lowercased on every write path.
    pub fn retains_case(&self, table: usize, position: usize) -> bool {
        self.slot_descriptor(table, position)
            .map(|f| f.retains_case)
            .unwrap_or(false)
    }

    /// Table index of the record type referenced from a position, if the
    /// field there is a reference field.
    pub fn reference_target(&self, table: usize, position: usize) -> Option<usize> {
        let schema = &self.tables[table];
        if position < schema.fixed_targets.len() {
            return schema.fixed_targets[position];
        }
        if !schema.slot_targets.is_empty() {
            let slot = (position - schema.fixed_targets.len()) % schema.slot_targets.len();
            return schema.slot_targets[slot];
        }
        None
    }

    /// Declared default for a fixed position, if any.
    pub fn default_value(&self, table: usize, position: usize) -> Option<&DefaultValue> {
        self.tables[table]
            .descriptor
            .fields
            .get(position)
            .and_then(|f| f.default.as_ref())
    }

    fn slot_descriptor(&self, table: usize, position: usize) -> Option<&FieldDescriptor> {
        let schema = &self.tables[table];
        if let Some(field) = schema.descriptor.fields.get(position) {
            return Some(field);
        }
        let extensible = schema.descriptor.extensible.as_ref()?;
        let slot = (position - schema.descriptor.fields.len()) % extensible.slots.len();
        Some(&extensible.slots[slot])
    }
}
