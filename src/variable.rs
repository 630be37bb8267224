use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};

use crate::error::{ArzError, Result};

/// On-disk type code of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableType {
    Int    = 0,
    Real   = 1,
    /// String, file reference or equation: values are string ids.
    String = 2,
    Bool   = 3,
}

impl VariableType {
    pub fn code(self) -> i16 {
        self as i16
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(VariableType::Int),
            1 => Some(VariableType::Real),
            2 => Some(VariableType::String),
            3 => Some(VariableType::Bool),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Values {
    Int(Vec<i32>),
    Real(Vec<f32>),
    String(Vec<u32>),
    Bool(Vec<i32>),
}

impl Values {
    pub fn var_type(&self) -> VariableType {
        match self {
            Values::Int(_)    => VariableType::Int,
            Values::Real(_)   => VariableType::Real,
            Values::String(_) => VariableType::String,
            Values::Bool(_)   => VariableType::Bool,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Values::Int(v) | Values::Bool(v) => v.len(),
            Values::Real(v)   => v.len(),
            Values::String(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One typed field inside a decompressed record payload.
///
/// Wire form: `i16 type, i16 count, i32 name_id, count × (i32 | f32)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name_id: u32,
    pub values:  Values,
}

/// Largest value count the `i16` count field can carry.
pub const MAX_VALUES: usize = i16::MAX as usize;

impl Variable {
    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        let count = i16::try_from(self.values.len()).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "variable has more than i16::MAX values")
        })?;
        writer.write_i16::<LittleEndian>(self.values.var_type().code())?;
        writer.write_i16::<LittleEndian>(count)?;
        writer.write_u32::<LittleEndian>(self.name_id)?;
        match &self.values {
            Values::Int(v) | Values::Bool(v) => {
                for x in v {
                    writer.write_i32::<LittleEndian>(*x)?;
                }
            }
            Values::Real(v) => {
                for x in v {
                    writer.write_f32::<LittleEndian>(*x)?;
                }
            }
            Values::String(v) => {
                for x in v {
                    writer.write_u32::<LittleEndian>(*x)?;
                }
            }
        }
        Ok(())
    }

    /// Read one variable. `Ok(None)` means a zero-count variable was skipped.
    pub fn read<R: Read>(mut reader: R) -> Result<Option<Self>> {
        let eof = |e| ArzError::truncated(e, "variable");
        let code = reader.read_i16::<LittleEndian>().map_err(eof)?;
        let count = reader.read_i16::<LittleEndian>().map_err(eof)?;
        let name_id = reader.read_u32::<LittleEndian>().map_err(eof)?;

        if count < 1 {
            tracing::warn!(name_id, count, "variable with no values, skipping");
            return Ok(None);
        }
        let count = count as usize;
        let var_type = VariableType::from_code(code)
            .ok_or_else(|| ArzError::Format(format!("unknown variable type {code} (name id {name_id})")))?;

        let values = match var_type {
            VariableType::Int | VariableType::Bool => {
                let mut v = vec![0i32; count];
                reader.read_i32_into::<LittleEndian>(&mut v).map_err(eof)?;
                if var_type == VariableType::Int { Values::Int(v) } else { Values::Bool(v) }
            }
            VariableType::Real => {
                let mut v = vec![0f32; count];
                reader.read_f32_into::<LittleEndian>(&mut v).map_err(eof)?;
                Values::Real(v)
            }
            VariableType::String => {
                let mut v = vec![0u32; count];
                reader.read_u32_into::<LittleEndian>(&mut v).map_err(eof)?;
                Values::String(v)
            }
        };
        Ok(Some(Self { name_id, values }))
    }
}

pub fn write_variables(vars: &[Variable]) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    for var in vars {
        var.write(&mut out)?;
    }
    Ok(out)
}

/// Decode a whole decompressed record payload.
pub fn read_variables(raw: &[u8]) -> Result<Vec<Variable>> {
    let mut cursor = Cursor::new(raw);
    let mut vars = Vec::new();
    while (cursor.position() as usize) < raw.len() {
        if let Some(var) = Variable::read(&mut cursor)? {
            vars.push(var);
        }
    }
    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_variable_layout() {
        let var = Variable { name_id: 9, values: Values::Int(vec![5, 7, 9]) };
        let raw = write_variables(std::slice::from_ref(&var)).unwrap();
        assert_eq!(raw.len(), 8 + 12);
        assert_eq!(&raw[..2], &0i16.to_le_bytes());
        assert_eq!(&raw[2..4], &3i16.to_le_bytes());
        assert_eq!(&raw[4..8], &9u32.to_le_bytes());
        assert_eq!(&raw[8..12], &5i32.to_le_bytes());
        assert_eq!(read_variables(&raw).unwrap(), vec![var]);
    }

    #[test]
    fn all_four_type_codes() {
        let vars = vec![
            Variable { name_id: 1, values: Values::Int(vec![-3]) },
            Variable { name_id: 2, values: Values::Real(vec![0.25, 1.5]) },
            Variable { name_id: 3, values: Values::String(vec![4, 4, 0]) },
            Variable { name_id: 5, values: Values::Bool(vec![1]) },
        ];
        let raw = write_variables(&vars).unwrap();
        assert_eq!(read_variables(&raw).unwrap(), vars);
    }

    #[test]
    fn unknown_type_code_is_corruption() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&4i16.to_le_bytes());
        raw.extend_from_slice(&1i16.to_le_bytes());
        raw.extend_from_slice(&0u32.to_le_bytes());
        raw.extend_from_slice(&0i32.to_le_bytes());
        assert!(matches!(read_variables(&raw), Err(ArzError::Format(_))));
    }

    #[test]
    fn zero_count_is_skipped() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&0i16.to_le_bytes());
        raw.extend_from_slice(&0i16.to_le_bytes());
        raw.extend_from_slice(&3u32.to_le_bytes());
        Variable { name_id: 4, values: Values::Bool(vec![0]) }.write(&mut raw).unwrap();
        let vars = read_variables(&raw).unwrap();
        assert_eq!(vars.len(), 1);
        assert_eq!(vars[0].name_id, 4);
    }

    #[test]
    fn truncated_values_are_format_error() {
        let var = Variable { name_id: 0, values: Values::Real(vec![1.0, 2.0]) };
        let mut raw = write_variables(&[var]).unwrap();
        raw.truncate(raw.len() - 2);
        assert!(matches!(read_variables(&raw), Err(ArzError::Format(_))));
    }
}
