//! Parser and serializer for the IDF textual record format.
//!
//! A document is a sequence of records, each a record-type header followed by
//! comma-delimited positional field values and a terminating semicolon, with
//! `!` comments. Parsing applies the same normalization as the mutation
//! paths: case policy per field, reference tagging per schema, and
//! numeric-looking literals stored as numbers. Serialization writes one
//! record per block in schema field order followed by the extensible groups,
//! so a serialized document reloads into an identical model.

use pest::error::LineColLocation;
use pest::Parser;
use pest_derive::Parser;
use tracing::debug;

use crate::construct::{Epm, FieldInput, FieldValue};
use crate::schema::{Catalog, DefaultValue};
use crate::{EpmError, Result};

#[derive(Parser)]
#[grammar = "idf.pest"]
struct IdfParser;

/// Parses document text into the given (empty) model, in document order.
pub(crate) fn parse_document(epm: &Epm, text: &str) -> Result<()> {
    let mut parsed = IdfParser::parse(Rule::document, text).map_err(|e| {
        let line = match e.line_col {
            LineColLocation::Pos((line, _)) => line,
            LineColLocation::Span((line, _), _) => line,
        };
        EpmError::Parse {
            message: e.variant.message().to_string(),
            line: Some(line),
        }
    })?;
    let document = parsed.next().unwrap();
    let mut records = 0usize;
    for pair in document.into_inner() {
        if pair.as_rule() != Rule::record {
            continue;
        }
        let (line, _) = pair.as_span().start_pos().line_col();
        let mut values = pair.into_inner().map(|value| value.as_str().trim());
        let type_name = values.next().unwrap_or_default();
        if type_name.is_empty() {
            return Err(EpmError::Parse {
                message: "record with empty type name".to_string(),
                line: Some(line),
            });
        }
        let fields: Vec<&str> = values.collect();
        parse_record(epm, type_name, &fields, line)?;
        records += 1;
    }
    debug!(records, "parsed document");
    Ok(())
}

fn parse_record(epm: &Epm, type_name: &str, fields: &[&str], line: usize) -> Result<()> {
    let catalog = epm.catalog();
    let table = catalog.table_index(type_name).map_err(|_| EpmError::Parse {
        message: format!("unknown record type '{}'", type_name),
        line: Some(line),
    })?;
    let fixed = catalog.fixed_len(table);
    let mut len = fields.len().max(fixed);
    match catalog.cycle(table) {
        Some(cycle) => {
            if len > fixed {
                len = fixed + (len - fixed).div_ceil(cycle) * cycle;
            }
        }
        None => {
            if fields.len() > fixed {
                return Err(EpmError::Parse {
                    message: format!(
                        "too many fields for {}: got {}, schema declares {}",
                        catalog.table_name(table),
                        fields.len(),
                        fixed
                    ),
                    line: Some(line),
                });
            }
        }
    }
    let mut row = Vec::with_capacity(len);
    for position in 0..len {
        let raw = fields.get(position).copied().unwrap_or("");
        let input = if raw.is_empty() {
            // an empty field means "use the declared default", if any
            match catalog.default_value(table, position) {
                Some(DefaultValue::Num(n)) => FieldInput::Num(*n),
                Some(DefaultValue::Str(s)) => FieldInput::Str(s.clone()),
                None => FieldInput::Empty,
            }
        } else {
            match raw.parse::<f64>() {
                Ok(n) => FieldInput::Num(n),
                Err(_) => FieldInput::Str(raw.to_string()),
            }
        };
        row.push(epm.normalize(table, position, input));
    }
    epm.insert_row(table, row);
    Ok(())
}

/// Serializes every table's records, tables in catalog order, records in
/// insertion order.
pub(crate) fn serialize_document(epm: &Epm) -> String {
    let catalog = epm.catalog();
    let mut out = String::new();
    for table in 0..catalog.table_count() {
        for id in epm.table_order(table) {
            // ids come from the order index, so the record is live
            let fields = epm.record_fields(id).unwrap();
            out.push_str(&serialize_record(catalog, table, &fields));
            out.push('\n');
        }
    }
    out
}

/// One record as a text block: header line, then one field per line with the
/// declared field name as a trailing comment.
pub(crate) fn serialize_record(catalog: &Catalog, table: usize, fields: &[FieldValue]) -> String {
    let mut out = String::from(catalog.table_name(table));
    if fields.is_empty() {
        out.push_str(";\n");
        return out;
    }
    out.push_str(",\n");
    for (position, value) in fields.iter().enumerate() {
        let separator = if position + 1 == fields.len() { ';' } else { ',' };
        let cell = format!("{}{}", value, separator);
        out.push_str(&format!(
            "    {:<27} ! {}\n",
            cell,
            catalog.field_name(table, position)
        ));
    }
    out
}
