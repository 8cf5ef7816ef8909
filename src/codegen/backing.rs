//! Backing Field Location
//!
//! Structural match over accessor bodies. A getter is automatic when its
//! instructions (ignoring `nop`) are exactly `load_self, load_field(f),
//! return` and `f` is an instance field of the declaring type. A getter that
//! returns a field from several places is ambiguous. A setter, if present,
//! must be exactly `load_self, load_value, store_field(f), return` on the
//! same field.

use std::fmt;

use crate::module::{Instruction, MethodBody, PropertyDef, TypeDef};

/// Why a property could not be matched to a backing field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocateFailure {
    /// Get-less property
    NoGetter,
    /// Getter is not exactly the automatic shape
    NotAutomatic,
    /// Getter returns a field from more than one place
    Ambiguous { matches: usize },
    /// Matched field is missing or static
    NotInstanceField { field: String },
    /// Setter is not the automatic store into the matched field
    ManualSetter,
}

impl LocateFailure {
    /// Fatal failures are errors; the rest mean "leave the property alone"
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Ambiguous { .. })
    }
}

impl fmt::Display for LocateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoGetter => write!(f, "property has no getter"),
            Self::NotAutomatic => write!(f, "getter does not return a field"),
            Self::Ambiguous { matches } => write!(f, "getter returns a field in {} places", matches),
            Self::NotInstanceField { field } => write!(f, "'{}' is not an instance field", field),
            Self::ManualSetter => write!(f, "setter does not store the backing field"),
        }
    }
}

pub struct BackingFieldLocator;

impl BackingFieldLocator {
    /// Locate the field read by an automatic getter
    pub fn locate(owner: &TypeDef, prop: &PropertyDef) -> Result<String, LocateFailure> {
        let getter = prop.getter.as_ref().ok_or(LocateFailure::NoGetter)?;
        let field = Self::getter_field(&getter.body)?;

        match owner.field(&field) {
            Some(def) if !def.is_static => {}
            _ => return Err(LocateFailure::NotInstanceField { field }),
        }

        if let Some(setter) = &prop.setter {
            if Self::setter_field(&setter.body) != Some(field.as_str()) {
                return Err(LocateFailure::ManualSetter);
            }
        }

        Ok(field)
    }

    /// The field of a getter whose whole body is `return this.field`
    pub fn getter_field(body: &MethodBody) -> Result<String, LocateFailure> {
        let code = significant(body);
        if let [Instruction::LoadSelf, Instruction::LoadField(f), Instruction::Return] = code.as_slice() {
            return Ok(f.to_string());
        }

        let returns = code
            .windows(3)
            .filter(|w| matches!(w, [Instruction::LoadSelf, Instruction::LoadField(_), Instruction::Return]))
            .count();
        if returns > 1 {
            Err(LocateFailure::Ambiguous { matches: returns })
        } else {
            Err(LocateFailure::NotAutomatic)
        }
    }

    /// The field an automatic setter stores into
    pub fn setter_field(body: &MethodBody) -> Option<&str> {
        match significant(body).as_slice() {
            [Instruction::LoadSelf, Instruction::LoadValue, Instruction::StoreField(f), Instruction::Return] => {
                Some(f.as_str())
            }
            _ => None,
        }
    }
}

fn significant(body: &MethodBody) -> Vec<&Instruction> {
    body.instructions.iter().filter(|i| !matches!(i, Instruction::Nop)).collect()
}
