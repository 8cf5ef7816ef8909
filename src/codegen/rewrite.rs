//! Accessor Rewriting
//!
//! Prepends a managed branch to woven accessors. For a getter:
//!
//! ```text
//! load_self; call get_IsManaged; branch_if_false L
//! load_self; call get_Accessor; accessor(op, column); return
//! label L
//! <original body>
//! ```
//!
//! Setters are the same with `load_value` before the accessor call. The
//! original body is kept verbatim behind the label, so unmanaged instances
//! behave exactly as before. Rewrites are pure: they return new bodies.

use std::collections::HashSet;

use super::PropertyPlan;
use crate::graph::{CollectionKind, StorageCategory, Variant};
use crate::module::{AccessorCall, AccessorOp, Instruction, Label, MethodBody, PropertyDef, SequencePoint};
use crate::wellknown;

pub struct AccessorRewriter;

impl AccessorRewriter {
    /// Accessor operation a getter of `category` performs
    pub fn getter_op(category: &StorageCategory) -> AccessorOp {
        match category.collection_kind() {
            Some(CollectionKind::List) => AccessorOp::GetList,
            Some(CollectionKind::Set) => AccessorOp::GetSet,
            Some(CollectionKind::Dictionary) => AccessorOp::GetDictionary,
            None if matches!(category, StorageCategory::Backlink { .. }) => AccessorOp::GetBacklinks,
            None => AccessorOp::Get,
        }
    }

    /// Accessor operation a setter performs; `None` when setters stay as-is
    pub fn setter_op(category: &StorageCategory, is_primary_key: bool) -> Option<AccessorOp> {
        if category.is_collection() || matches!(category, StorageCategory::Backlink { .. }) {
            None
        } else if is_primary_key {
            Some(AccessorOp::SetUnique)
        } else {
            Some(AccessorOp::Set)
        }
    }

    /// Rewrite the accessors of a planned property in place
    pub fn rewrite_property(prop: &mut PropertyDef, plan: &PropertyPlan, variant: Variant) {
        if let Some(getter) = prop.getter.as_mut() {
            let op = Self::getter_op(&plan.category);
            getter.body = Self::rewrite_getter(&getter.body, variant, op, &plan.column);
        }
        let setter_op = Self::setter_op(&plan.category, plan.is_primary_key);
        if let (Some(setter), Some(op)) = (prop.setter.as_mut(), setter_op) {
            setter.body = Self::rewrite_setter(&setter.body, variant, op, &plan.column);
        }
    }

    pub fn rewrite_getter(body: &MethodBody, variant: Variant, op: AccessorOp, column: &str) -> MethodBody {
        Self::prepend(body, variant, op, column, false)
    }

    pub fn rewrite_setter(body: &MethodBody, variant: Variant, op: AccessorOp, column: &str) -> MethodBody {
        Self::prepend(body, variant, op, column, true)
    }

    fn prepend(body: &MethodBody, variant: Variant, op: AccessorOp, column: &str, with_value: bool) -> MethodBody {
        let unmanaged = fresh_label(body);

        let mut instructions = vec![
            Instruction::LoadSelf,
            Instruction::Call(wellknown::is_managed(variant)),
            Instruction::BranchIfFalse(unmanaged),
            Instruction::LoadSelf,
            Instruction::Call(wellknown::get_accessor(variant)),
        ];
        if with_value {
            instructions.push(Instruction::LoadValue);
        }
        instructions.push(Instruction::Accessor(AccessorCall { op, property: column.to_string() }));
        instructions.push(Instruction::Return);
        instructions.push(Instruction::Label(unmanaged));

        let shift = instructions.len();
        instructions.extend(body.instructions.iter().cloned());

        MethodBody {
            instructions,
            sequence_points: shift_sequence_points(&body.sequence_points, shift),
        }
    }
}

/// Move points past the inserted prefix, mapping the prefix to the first point
fn shift_sequence_points(points: &[SequencePoint], shift: usize) -> Vec<SequencePoint> {
    let Some(first) = points.first() else {
        return Vec::new();
    };
    std::iter::once(SequencePoint { offset: 0, ..first.clone() })
        .chain(points.iter().map(|p| SequencePoint { offset: p.offset + shift, ..p.clone() }))
        .collect()
}

/// One past the highest label, or the lowest unused one when that overflows
fn fresh_label(body: &MethodBody) -> Label {
    match body.max_label() {
        None => 0,
        Some(max) => max.checked_add(1).unwrap_or_else(|| {
            let used: HashSet<Label> = body.labels().collect();
            (0..=Label::MAX).find(|l| !used.contains(l)).unwrap_or(Label::MAX)
        }),
    }
}
