use serde::Serialize;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::error::{ArzError, Result};
use crate::variable::{read_variables, Values};

/// Name of the bookkeeping variable every record leads with.
pub const TEMPLATE_KEY: &str = "templateName";

/// A decoded record: every stored field rendered to text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawRecord {
    pub name:     String,
    pub template: String,
    pub fields:   BTreeMap<String, String>,
}

impl RawRecord {
    /// Decode a decompressed payload. `resolve` maps string ids to strings and
    /// must return one string per id, in order; it is called once per record.
    pub fn decode<F>(name: &str, raw: &[u8], resolve: F) -> Result<Self>
    where
        F: FnOnce(&[u32]) -> Result<Vec<String>>,
    {
        let vars = read_variables(raw)?;

        let mut ids = Vec::with_capacity(vars.len() * 2);
        for var in &vars {
            ids.push(var.name_id);
            if let Values::String(refs) = &var.values {
                ids.extend_from_slice(refs);
            }
        }
        let resolved = resolve(&ids)?;
        if resolved.len() != ids.len() {
            return Err(ArzError::Format(format!(
                "resolved {} of {} strings for '{name}'", resolved.len(), ids.len()
            )));
        }
        let mut strings = resolved.into_iter();

        let mut template = None;
        let mut fields = BTreeMap::new();
        for var in vars {
            // Lengths were checked above.
            let var_name = strings.next().unwrap_or_default();
            let text = match &var.values {
                Values::Int(v) | Values::Bool(v) => join(v.iter()),
                Values::Real(v)   => join(v.iter()),
                Values::String(v) => {
                    let parts: Vec<String> = strings.by_ref().take(v.len()).collect();
                    parts.join(";")
                }
            };

            if template.is_none() && var_name == TEMPLATE_KEY {
                template = Some(text);
                continue;
            }
            match fields.entry(var_name) {
                Entry::Vacant(slot) => {
                    slot.insert(text);
                }
                Entry::Occupied(slot) => {
                    tracing::warn!(record = name, field = %slot.key(), "duplicate variable, keeping first");
                }
            }
        }

        let template = template.ok_or_else(|| ArzError::MissingSchemaReference(name.to_owned()))?;
        Ok(Self { name: name.to_owned(), template, fields })
    }

    /// Render in the loose-file text form, one `key,value,` line per field.
    pub fn to_dbr_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{TEMPLATE_KEY},{},", self.template);
        for (key, value) in &self.fields {
            let _ = writeln!(out, "{key},{value},");
        }
        out
    }
}

/// Canonical text of numeric values: shortest round-trip form, `;`-joined.
fn join<T: ToString>(values: impl Iterator<Item = T>) -> String {
    values.map(|v| v.to_string()).collect::<Vec<_>>().join(";")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variable::{write_variables, Variable};

    fn pool() -> Vec<String> {
        ["templateName", "t/item.tpl", "level", "speed", "tags", "a", "b"]
            .map(String::from)
            .to_vec()
    }

    fn lookup(ids: &[u32]) -> Result<Vec<String>> {
        let pool = pool();
        Ok(ids.iter().map(|&i| pool[i as usize].clone()).collect())
    }

    #[test]
    fn renders_fields_and_splits_out_template() {
        let raw = write_variables(&[
            Variable { name_id: 0, values: Values::String(vec![1]) },
            Variable { name_id: 2, values: Values::Int(vec![3, 4]) },
            Variable { name_id: 3, values: Values::Real(vec![0.5, -2.25]) },
            Variable { name_id: 4, values: Values::String(vec![6, 5]) },
        ])
        .unwrap();
        let rec = RawRecord::decode("records/a.dbr", &raw, lookup).unwrap();
        assert_eq!(rec.template, "t/item.tpl");
        assert_eq!(rec.fields.len(), 3);
        assert_eq!(rec.fields["level"], "3;4");
        assert_eq!(rec.fields["speed"], "0.5;-2.25");
        assert_eq!(rec.fields["tags"], "b;a");
        assert!(!rec.fields.contains_key(TEMPLATE_KEY));
    }

    #[test]
    fn missing_template_is_reported() {
        let raw = write_variables(&[Variable { name_id: 2, values: Values::Bool(vec![1]) }]).unwrap();
        assert!(matches!(
            RawRecord::decode("records/a.dbr", &raw, lookup),
            Err(ArzError::MissingSchemaReference(n)) if n == "records/a.dbr"
        ));
    }

    #[test]
    fn template_key_matches_exactly() {
        let pool = ["TemplateName", "t/item.tpl"].map(String::from);
        let raw = write_variables(&[Variable { name_id: 0, values: Values::String(vec![1]) }]).unwrap();
        let decoded = RawRecord::decode("records/a.dbr", &raw, |ids| {
            Ok(ids.iter().map(|&i| pool[i as usize].clone()).collect())
        });
        assert!(matches!(decoded, Err(ArzError::MissingSchemaReference(_))));
    }

    #[test]
    fn text_export() {
        let mut fields = BTreeMap::new();
        fields.insert("Class".to_string(), "Monster".to_string());
        let rec = RawRecord { name: "x.dbr".into(), template: "m.tpl".into(), fields };
        assert_eq!(rec.to_dbr_text(), "templateName,m.tpl,\nClass,Monster,\n");
    }
}
