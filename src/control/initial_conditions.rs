//! Initial-condition sources and their application to fields.

use crate::atm_error::AtmError;
use crate::config::IcValue;
use crate::field::repository::{FieldHandle, FieldRepository};
use std::collections::BTreeMap;
use std::path::Path;

/// Result of looking a field up in an initial-condition source.
#[derive(Clone, Debug, PartialEq)]
pub enum IcLookup {
    Missing,
    Scalar(f64),
    Array(Vec<f64>),
}

/// Anything that can provide initial values by field name.
pub trait IcSource {
    fn lookup(&self, name: &str) -> IcLookup;
}

impl IcSource for BTreeMap<String, IcValue> {
    fn lookup(&self, name: &str) -> IcLookup {
        match self.get(name) {
            None => IcLookup::Missing,
            Some(IcValue::Scalar(v)) => IcLookup::Scalar(*v),
            Some(IcValue::Vector(v)) => IcLookup::Array(v.clone()),
        }
    }
}

/// Initial conditions stored as a JSON object `name -> number | [numbers]`.
#[derive(Clone, Debug, Default)]
pub struct JsonIcSource {
    values: BTreeMap<String, IcValue>,
}

impl JsonIcSource {
    pub fn from_json_str(s: &str) -> Result<Self, AtmError> {
        Ok(Self {
            values: serde_json::from_str(s)?,
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, AtmError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let src = Self::from_json_str(&text)?;
        log::debug!(
            "read {} initial-condition entries from {}",
            src.values.len(),
            path.as_ref().display()
        );
        Ok(src)
    }
}

impl IcSource for JsonIcSource {
    fn lookup(&self, name: &str) -> IcLookup {
        self.values.lookup(name)
    }
}

/// Apply a found value to field `h`.
///
/// A scalar, or a one-element array, fills the whole field. For a vector
/// field an array gives one value per component. Returns `false` for
/// [`IcLookup::Missing`].
pub fn apply_initial_condition(
    repo: &mut FieldRepository,
    h: FieldHandle,
    value: &IcLookup,
) -> Result<bool, AtmError> {
    let id = repo.identifier(h)?.clone();
    match value {
        IcLookup::Missing => Ok(false),
        IcLookup::Scalar(v) => {
            repo.set_value(h, *v)?;
            Ok(true)
        }
        IcLookup::Array(values) => {
            let layout = id.layout();
            let ncmp = layout.vector_dim().map(|d| layout.dim(d));
            match ncmp {
                Some(n) if n == values.len() => {
                    for (i, &v) in values.iter().enumerate() {
                        let comp = repo.get_component(h, i)?;
                        repo.set_value(comp, v)?;
                    }
                    Ok(true)
                }
                None if values.len() == 1 => {
                    repo.set_value(h, values[0])?;
                    Ok(true)
                }
                _ => Err(AtmError::InitialConditionShape {
                    field: id.name().to_string(),
                    expected: ncmp.unwrap_or(1),
                    got: values.len(),
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::identifier::FieldIdentifier;
    use crate::field::layout::{FieldLayout, FieldTag};

    #[test]
    fn json_source_distinguishes_missing_values() {
        let src = JsonIcSource::from_json_str(r#"{"ps": 1.0e5, "qv": [0.1, 0.2]}"#).unwrap();
        assert_eq!(src.lookup("ps"), IcLookup::Scalar(1.0e5));
        assert_eq!(src.lookup("qv"), IcLookup::Array(vec![0.1, 0.2]));
        assert_eq!(src.lookup("T_mid"), IcLookup::Missing);
    }

    #[test]
    fn component_count_must_match() {
        let l = FieldLayout::new(
            vec![FieldTag::Column, FieldTag::Component, FieldTag::Level],
            vec![2, 3, 1],
        )
        .unwrap();
        let mut repo = FieldRepository::new();
        repo.registration_begins().unwrap();
        let h = repo
            .register_field(FieldIdentifier::new("qv", l, "kg/kg", "g"), &[] as &[&str])
            .unwrap();
        repo.registration_ends().unwrap();
        let err = apply_initial_condition(&mut repo, h, &IcLookup::Array(vec![1.0, 2.0])).unwrap_err();
        assert!(matches!(
            err,
            AtmError::InitialConditionShape { expected: 3, got: 2, .. }
        ));
        assert!(!apply_initial_condition(&mut repo, h, &IcLookup::Missing).unwrap());
    }

    #[test]
    fn arrays_never_fill_scalar_fields_point_by_point() {
        for ncol in [3, 2] {
            let l = FieldLayout::new(vec![FieldTag::Column], vec![ncol]).unwrap();
            let mut repo = FieldRepository::new();
            repo.registration_begins().unwrap();
            let h = repo
                .register_field(FieldIdentifier::new("T_surf", l, "K", "g"), &[] as &[&str])
                .unwrap();
            repo.registration_ends().unwrap();
            let err = apply_initial_condition(&mut repo, h, &IcLookup::Array(vec![280.0, 281.0, 282.0]))
                .unwrap_err();
            assert!(matches!(
                err,
                AtmError::InitialConditionShape { expected: 1, got: 3, .. }
            ));
            assert!(apply_initial_condition(&mut repo, h, &IcLookup::Array(vec![280.0])).unwrap());
            assert_eq!(repo.read(h).unwrap(), vec![280.0; ncol]);
        }
    }
}
