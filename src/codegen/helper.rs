//! Helper emission
//!
//! Each woven type gets a companion `<Type>+Helper` class so the runtime can
//! build instances and accessors without reflection. The type and every
//! rewritten property are marked so repeat runs skip them.

use super::schema::SchemaDescriptor;
use super::TypePlan;
use crate::module::{Annotation, Constant, Instruction, MethodBody, MethodDef, MethodRef, TypeDef};
use crate::wellknown;

pub const CREATE_INSTANCE: &str = "CreateInstance";
pub const CREATE_ACCESSOR: &str = "CreateAccessor";
pub const TRY_GET_PRIMARY_KEY: &str = "TryGetPrimaryKey";

pub struct HelperEmitter;

impl HelperEmitter {
    pub fn helper_name(type_name: &str) -> String {
        format!("{}+Helper", type_name)
    }

    /// Build the helper class for a planned type
    pub fn emit(plan: &TypePlan, schema: &SchemaDescriptor) -> TypeDef {
        let mut helper = TypeDef::class(Self::helper_name(&plan.type_name));

        helper.methods.push(static_method(
            CREATE_INSTANCE,
            vec![Instruction::NewObject(plan.type_ref.clone()), Instruction::Return],
        ));

        helper.methods.push(static_method(
            CREATE_ACCESSOR,
            vec![
                Instruction::LoadConst(Constant::String(schema.mapped_name.clone())),
                Instruction::Call(wellknown::create_for_schema()),
                Instruction::Return,
            ],
        ));

        // Takes the instance as its argument.
        let key = match plan.properties.iter().find(|p| p.is_primary_key) {
            Some(pk) => vec![
                Instruction::LoadValue,
                Instruction::Call(MethodRef::new(plan.type_ref.clone(), format!("get_{}", pk.name))),
                Instruction::Return,
            ],
            None => vec![Instruction::LoadConst(Constant::Null), Instruction::Return],
        };
        helper.methods.push(static_method(TRY_GET_PRIMARY_KEY, key));

        helper
    }

    /// Record the weave on the type and its rewritten properties
    pub fn mark(target: &mut TypeDef, plan: &TypePlan) {
        target.annotations.push(Annotation::Woven { helper: Self::helper_name(&plan.type_name) });
        for p in &plan.properties {
            target.properties[p.index]
                .annotations
                .push(Annotation::WovenProperty { backing_field: p.backing_field.clone() });
        }
    }
}

fn static_method(name: &str, instructions: Vec<Instruction>) -> MethodDef {
    MethodDef {
        name: name.to_string(),
        is_static: true,
        body: MethodBody::new(instructions),
    }
}
