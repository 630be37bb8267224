//! Record encoder: resolved fields in, uncompressed variable block out.
//!
//! Every block leads with the `templateName` variable. Fields follow in
//! [`field_order`]; a field whose text does not parse under its declared
//! kind is dropped whole and encoding carries on with the next one.

use std::cmp::Ordering;

use crate::codec;
use crate::error::{ArzError, Result};
use crate::record::TEMPLATE_KEY;
use crate::source::{Field, FieldClass, FieldKind, ResolvedRecord};
use crate::strings::StringTable;
use crate::variable::{write_variables, Values, Variable, MAX_VALUES};

#[derive(Debug, Clone)]
pub struct EncodedRecord {
    /// Id of the record's own name in the string table.
    pub name_id: u32,
    pub class:   String,
    /// Uncompressed variable block.
    pub raw:     Vec<u8>,
}

/// Encode `record`, stored under `name`, interning into `table`.
pub fn encode_record(record: &ResolvedRecord, name: &str, table: &StringTable) -> Result<EncodedRecord> {
    let name_id = table.intern_exact(name);

    let mut vars = Vec::with_capacity(record.fields.len() + 1);
    vars.push(Variable {
        name_id: table.intern_exact(TEMPLATE_KEY),
        values:  Values::String(vec![table.intern_exact(&record.template)]),
    });

    let mut fields: Vec<&Field> = record
        .fields
        .iter()
        .filter(|f| !f.kind.is_internal() && !f.value.is_empty())
        .collect();
    fields.sort_by(|a, b| field_order(&a.name, &b.name));

    for field in fields {
        match encode_field(field, table) {
            Ok(var) => vars.push(var),
            Err(e) => tracing::warn!(record = name, error = %e, "dropping field"),
        }
    }

    Ok(EncodedRecord {
        name_id,
        class: record.class().to_owned(),
        raw:   write_variables(&vars)?,
    })
}

/// Compress an encoded block for the data blob.
pub fn compress_record(raw: &[u8], level: u32) -> Result<Vec<u8>> {
    Ok(codec::compress(raw, level)?)
}

/// Order fields by first character, then by full name compared without case
/// (falling back to a byte compare so the order is total).
pub fn field_order(a: &str, b: &str) -> Ordering {
    a.chars()
        .next()
        .cmp(&b.chars().next())
        .then_with(|| {
            a.chars()
                .flat_map(char::to_lowercase)
                .cmp(b.chars().flat_map(char::to_lowercase))
        })
        .then_with(|| a.cmp(b))
}

fn encode_field(field: &Field, table: &StringTable) -> Result<Variable> {
    let elements: Vec<&str> = if field.class == FieldClass::Array {
        field.value.split(';').collect()
    } else {
        vec![field.value.as_str()]
    };
    if elements.len() > MAX_VALUES {
        return Err(field_error(field, format!("{} values exceed the limit of {MAX_VALUES}", elements.len())));
    }

    let values = match field.kind {
        FieldKind::Int  => Values::Int(parse_all(field, &elements)?),
        FieldKind::Bool => Values::Bool(parse_all(field, &elements)?),
        FieldKind::Real => Values::Real(parse_all(field, &elements)?),
        FieldKind::String | FieldKind::Equation => {
            Values::String(elements.iter().map(|e| table.intern(e)).collect())
        }
        FieldKind::File => Values::String(elements.iter().map(|e| table.intern_exact(e)).collect()),
        FieldKind::EquationVariable | FieldKind::Include => {
            return Err(field_error(field, "internal field kind".into()));
        }
    };

    Ok(Variable { name_id: table.intern(&field.name), values })
}

fn parse_all<T>(field: &Field, elements: &[&str]) -> Result<Vec<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    elements
        .iter()
        .map(|e| e.trim().parse::<T>().map_err(|err| field_error(field, format!("'{e}': {err}"))))
        .collect()
}

fn field_error(field: &Field, reason: String) -> ArzError {
    ArzError::FieldEncode {
        field: field.name.clone(),
        value: field.value.clone(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variable::read_variables;

    fn record(fields: Vec<Field>) -> ResolvedRecord {
        ResolvedRecord { path: "records/x.dbr".into(), template: "Templates/Item.tpl".into(), fields }
    }

    #[test]
    fn int_array_and_string_field() {
        let table = StringTable::new();
        let rec = record(vec![
            Field::new("Y", FieldKind::String, FieldClass::Variable, "hello"),
            Field::new("X", FieldKind::Int, FieldClass::Array, "5;7;9"),
        ]);
        let enc = encode_record(&rec, "records/x.dbr", &table).unwrap();
        let vars = read_variables(&enc.raw).unwrap();
        assert_eq!(vars.len(), 3);

        assert_eq!(table.get(vars[0].name_id).as_deref(), Some("templateName"));
        let Values::String(t) = &vars[0].values else { panic!("template is not a string") };
        assert_eq!(table.get(t[0]).as_deref(), Some("Templates/Item.tpl"));

        assert_eq!(table.get(vars[1].name_id).as_deref(), Some("X"));
        assert_eq!(vars[1].values, Values::Int(vec![5, 7, 9]));

        assert_eq!(table.get(vars[2].name_id).as_deref(), Some("Y"));
        let Values::String(s) = &vars[2].values else { panic!("Y is not a string") };
        assert_eq!(s.len(), 1);
        assert_eq!(table.get(s[0]).as_deref(), Some("hello"));
        assert_eq!(table.get(enc.name_id).as_deref(), Some("records/x.dbr"));
    }

    #[test]
    fn bad_and_internal_fields_are_dropped() {
        let table = StringTable::new();
        let rec = record(vec![
            Field::new("count", FieldKind::Int, FieldClass::Array, "1;x;3"),
            Field::new("scale", FieldKind::Real, FieldClass::Variable, "1.5"),
            Field::new("empty", FieldKind::String, FieldClass::Variable, ""),
            Field::new("tmp", FieldKind::EquationVariable, FieldClass::Variable, "a+b"),
            Field::new("hdr", FieldKind::Include, FieldClass::Static, "x.tpl"),
        ]);
        let enc = encode_record(&rec, "records/x.dbr", &table).unwrap();
        let vars = read_variables(&enc.raw).unwrap();
        assert_eq!(vars.len(), 2);
        assert_eq!(table.get(vars[1].name_id).as_deref(), Some("scale"));
        assert_eq!(vars[1].values, Values::Real(vec![1.5]));
        assert!(!table.snapshot().iter().any(|s| s == "count" || s == "tmp"));
    }

    #[test]
    fn scalar_string_keeps_semicolons() {
        let table = StringTable::new();
        let rec = record(vec![Field::new("desc", FieldKind::String, FieldClass::Variable, "a;b")]);
        let vars = read_variables(&encode_record(&rec, "n", &table).unwrap().raw).unwrap();
        let Values::String(s) = &vars[1].values else { panic!() };
        assert_eq!(table.get(s[0]).as_deref(), Some("a;b"));
    }

    #[test]
    fn file_references_preserve_case() {
        let table = StringTable::new();
        table.intern("records/sword.dbr");
        let rec = record(vec![
            Field::new("loot", FieldKind::File, FieldClass::Variable, "Records/Sword.dbr"),
            Field::new("label", FieldKind::String, FieldClass::Variable, "RECORDS/SWORD.DBR"),
        ]);
        let vars = read_variables(&encode_record(&rec, "n", &table).unwrap().raw).unwrap();
        let Values::String(label) = &vars[1].values else { panic!() };
        let Values::String(loot) = &vars[2].values else { panic!() };
        assert_eq!(label[0], 0);
        assert_eq!(table.get(loot[0]).as_deref(), Some("Records/Sword.dbr"));
    }

    #[test]
    fn ordering_is_first_char_then_name() {
        let mut names = vec!["beta", "Alpha", "alpha2", "Beta", "apple", "B"];
        names.sort_by(|a, b| field_order(a, b));
        assert_eq!(names, vec!["Alpha", "B", "Beta", "alpha2", "apple", "beta"]);
    }

    #[test]
    fn class_is_taken_from_class_field() {
        let table = StringTable::new();
        let rec = record(vec![Field::new("Class", FieldKind::String, FieldClass::Static, "WeaponMelee_Sword")]);
        assert_eq!(encode_record(&rec, "n", &table).unwrap().class, "WeaponMelee_Sword");
    }
}
