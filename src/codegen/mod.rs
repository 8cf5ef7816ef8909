//! Weaving
//!
//! Turns analysis results into the rewritten module.
//!
//! Architecture:
//! - WeaveContext: runs classification, validation and backing-field
//!   location for one type and freezes the outcome into a TypePlan
//! - TypePlan: pure projection of that analysis for a single type
//! - Emitters (schema, rewrite, helper): consume TypePlans only
//!
//! The key constraint: emitters never re-run analysis or read annotations,
//! so a property is either fully woven (schema field, rewritten accessors,
//! woven marker) or left entirely alone.

pub mod backing;
pub mod helper;
pub mod rewrite;
pub mod schema;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub use backing::{BackingFieldLocator, LocateFailure};
pub use helper::HelperEmitter;
pub use rewrite::AccessorRewriter;
pub use schema::{SchemaBuilder, SchemaDescriptor, SchemaField};

use crate::graph::classify::getter_source;
use crate::graph::{
    DiagnosticCode, DiagnosticItem, Diagnostics, Location, ModuleResolver, PropertyClassifier,
    ResolvedType, StorageCategory, TypeGraphAnalyzer, Variant,
};
use crate::lint::{ConstraintValidator, ValidatedProperty};
use crate::module::{Module, TypeRef};

// =============================================================================
// Plans
// =============================================================================

/// A property that will be woven
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyPlan {
    /// Index into the owner's `properties`
    pub index: usize,
    pub name: String,
    pub column: String,
    pub category: StorageCategory,
    pub nullable: bool,
    pub is_primary_key: bool,
    pub is_indexed: bool,
    pub backing_field: String,
}

impl PropertyPlan {
    fn new(validated: ValidatedProperty, backing_field: String) -> Self {
        Self {
            index: validated.index,
            name: validated.name,
            column: validated.column,
            category: validated.category,
            nullable: validated.nullable,
            is_primary_key: validated.is_primary_key,
            is_indexed: validated.is_indexed,
            backing_field,
        }
    }
}

/// Everything the emitters need for one persistable type
#[derive(Debug, Clone, PartialEq)]
pub struct TypePlan {
    pub type_ref: TypeRef,
    pub type_name: String,
    /// Table name
    pub mapped_name: String,
    pub variant: Variant,
    pub explicit: bool,
    /// Woven properties in declaration order
    pub properties: Vec<PropertyPlan>,
}

// =============================================================================
// WeaveContext
// =============================================================================

/// Per-run analysis front end
pub struct WeaveContext<'a, 'r> {
    classifier: &'a PropertyClassifier<'a, 'r>,
    validator: ConstraintValidator<'a, 'r>,
}

impl<'a, 'r> WeaveContext<'a, 'r> {
    pub fn new(classifier: &'a PropertyClassifier<'a, 'r>) -> Self {
        Self {
            classifier,
            validator: ConstraintValidator::new(classifier),
        }
    }

    /// Analyze a type that has not been woven yet
    pub fn plan(&self, ty: &ResolvedType, variant: Variant, diags: &mut Diagnostics) -> TypePlan {
        let def = ty.def();
        let classified = self.classifier.classify_all(ty, diags);
        let validated = self.validator.validate(ty, variant, classified, diags);

        let mut properties = Vec::new();
        for property in validated.properties.into_iter().filter(|p| p.in_schema) {
            let prop = &def.properties[property.index];
            match BackingFieldLocator::locate(def, prop) {
                Ok(field) => properties.push(PropertyPlan::new(property, field)),
                Err(failure) => {
                    debug!(type_name = %def.name, property = %prop.name, reason = %failure, "not weaving property");
                    let item = if failure.is_fatal() {
                        DiagnosticItem::new(
                            DiagnosticCode::AmbiguousBackingField,
                            format!("{}.{} has an ambiguous backing field: {}", def.name, prop.name, failure),
                        )
                    } else {
                        DiagnosticItem::new(
                            DiagnosticCode::NotAutomatic,
                            format!("{}.{}: property not in automatic form, skipping", def.name, prop.name),
                        )
                        .with_context(failure.to_string())
                    };
                    diags.push(item.at(Location::of_property(&def.name, &prop.name).with_source(getter_source(prop))));
                }
            }
        }

        self.finish(ty, variant, properties)
    }

    /// Rebuild the plan of a woven type from its markers, silently
    pub fn plan_woven(&self, ty: &ResolvedType, variant: Variant) -> TypePlan {
        let def = ty.def();
        let mut scratch = Diagnostics::new();
        let classified = self.classifier.classify_all(ty, &mut scratch);
        let validated = self.validator.validate(ty, variant, classified, &mut scratch);

        let properties = validated
            .properties
            .into_iter()
            .filter(|p| p.in_schema)
            .filter_map(|p| {
                let field = def.properties[p.index].woven_backing_field()?.to_string();
                Some(PropertyPlan::new(p, field))
            })
            .collect();

        self.finish(ty, variant, properties)
    }

    fn finish(&self, ty: &ResolvedType, variant: Variant, properties: Vec<PropertyPlan>) -> TypePlan {
        let def = ty.def();
        TypePlan {
            type_ref: ty.type_ref(),
            type_name: def.name.clone(),
            mapped_name: def.mapped_name().unwrap_or(&def.name).to_string(),
            variant,
            explicit: def.is_explicit(),
            properties,
        }
    }
}

// =============================================================================
// weave
// =============================================================================

/// Knobs for one weave
#[derive(Debug, Clone, Default)]
pub struct WeaveSettings {
    pub warnings_as_errors: bool,
}

/// Counters for the weave report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeaveStats {
    pub types_woven: usize,
    pub types_already_woven: usize,
    pub properties_woven: usize,
}

/// Output of a weave
#[derive(Debug, Clone)]
pub struct WeaveResult {
    /// The rewritten module
    pub module: Module,
    /// One descriptor per persistable type, in declaration order
    pub schemas: Vec<SchemaDescriptor>,
    pub diagnostics: Diagnostics,
    pub stats: WeaveStats,
}

impl WeaveResult {
    pub fn schema(&self, type_name: &str) -> Option<&SchemaDescriptor> {
        self.schemas.iter().find(|s| s.type_name == type_name)
    }
}

/// Weave the resolver's target module.
///
/// Pure with respect to the input: the target is cloned and the copy
/// rewritten. Whether the result may be written is the caller's decision,
/// based on `diagnostics`.
pub fn weave(resolver: &ModuleResolver, settings: &WeaveSettings) -> WeaveResult {
    let analyzer = TypeGraphAnalyzer::new(resolver);
    let classifier = PropertyClassifier::new(&analyzer);
    let context = WeaveContext::new(&classifier);

    let mut module = resolver.target().clone();
    let mut diagnostics = Diagnostics::new();
    let mut schemas = Vec::new();
    let mut helpers = Vec::new();
    let mut stats = WeaveStats::default();

    for (ty, variant) in analyzer.target_types() {
        let type_name = ty.def().name.clone();
        if !variant.is_persistable() {
            debug!(type_name = %type_name, "not persistable, skipping");
            continue;
        }

        if ty.def().woven_helper().is_some() {
            debug!(type_name = %type_name, "already woven, rebuilding schema only");
            schemas.push(SchemaBuilder::build(&context.plan_woven(&ty, variant)));
            stats.types_already_woven += 1;
            continue;
        }

        let plan = context.plan(&ty, variant, &mut diagnostics);
        let schema = SchemaBuilder::build(&plan);

        let target = &mut module.types[ty.index];
        for property in &plan.properties {
            AccessorRewriter::rewrite_property(&mut target.properties[property.index], property, variant);
        }
        HelperEmitter::mark(target, &plan);
        helpers.push(HelperEmitter::emit(&plan, &schema));

        info!(type_name = %type_name, variant = %variant, properties = plan.properties.len(), "woven");
        stats.types_woven += 1;
        stats.properties_woven += plan.properties.len();
        schemas.push(schema);
    }

    module.types.extend(helpers);
    diagnostics.merge(analyzer.take_diagnostics());
    if settings.warnings_as_errors {
        diagnostics.escalate_warnings();
    }

    WeaveResult { module, schemas, diagnostics, stats }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::LoadConfig;
    use crate::module::{AccessorDef, Annotation, Builtin, FieldDef, MethodBody, PropertyDef, TypeDef, TypeSig};
    use crate::wellknown;
    use semver::Version;

    fn auto_property(owner: &mut TypeDef, name: &str, ty: TypeSig, annotations: Vec<Annotation>) {
        let field = format!("<{}>k__BackingField", name);
        owner.fields.push(FieldDef { name: field.clone(), ty: ty.clone(), is_static: false });
        owner.properties.push(PropertyDef {
            name: name.to_string(),
            ty,
            is_static: false,
            getter: Some(AccessorDef::public(MethodBody::auto_getter(&field))),
            setter: Some(AccessorDef::public(MethodBody::auto_setter(&field))),
            annotations,
        });
    }

    fn resolver_for(types: Vec<TypeDef>) -> ModuleResolver {
        let mut module = Module::new("Zoo", Version::new(1, 0, 0));
        module.types = types;
        ModuleResolver::new(module, &LoadConfig::default())
    }

    fn dog() -> TypeDef {
        let mut dog = TypeDef::class("Zoo.Dog");
        dog.base = Some(wellknown::runtime_type(wellknown::PERSISTENT_OBJECT));
        auto_property(&mut dog, "Name", TypeSig::Builtin(Builtin::String), vec![]);
        dog
    }

    #[test]
    fn test_weave_dog() {
        let resolver = resolver_for(vec![dog(), TypeDef::class("Zoo.Plain")]);
        let result = weave(&resolver, &WeaveSettings::default());

        assert!(result.diagnostics.is_empty(), "{}", result.diagnostics);
        assert_eq!(result.schemas.len(), 1);
        assert_eq!(result.stats.properties_woven, 1);
        assert!(result.module.find_type("Zoo.Dog+Helper").is_some());
        assert!(result.module.find_type("Zoo.Plain").unwrap().annotations.is_empty());
        // Input untouched
        assert!(resolver.target().find_type("Zoo.Dog").unwrap().woven_helper().is_none());
    }

    #[test]
    fn test_manual_getter_is_skipped_with_warning() {
        let mut dog = dog();
        let mut manual = dog.properties[0].clone();
        manual.name = "Nickname".into();
        manual.getter = Some(AccessorDef::public(MethodBody::new(vec![
            crate::module::Instruction::LoadConst(crate::module::Constant::String("Rex".into())),
            crate::module::Instruction::Return,
        ])));
        manual.setter = None;
        dog.properties.push(manual.clone());

        let resolver = resolver_for(vec![dog]);
        let result = weave(&resolver, &WeaveSettings::default());

        let warning = result.diagnostics.with_code(DiagnosticCode::NotAutomatic).next().unwrap();
        assert!(warning.message.contains("property not in automatic form, skipping"));
        let woven = result.module.find_type("Zoo.Dog").unwrap();
        assert_eq!(woven.property("Nickname").unwrap(), &manual);
        assert!(result.schemas[0].field("Nickname").is_none());
    }

    #[test]
    fn test_getter_with_side_effect_is_not_woven() {
        use crate::module::{Constant, Instruction};

        let mut dog = dog();
        dog.fields.push(FieldDef {
            name: "reads".into(),
            ty: TypeSig::Builtin(Builtin::Int64),
            is_static: false,
        });
        let counted = &mut dog.properties[0];
        counted.setter = None;
        counted.getter = Some(AccessorDef::public(MethodBody::new(vec![
            Instruction::LoadSelf,
            Instruction::LoadConst(Constant::Int(1)),
            Instruction::StoreField("reads".into()),
            Instruction::LoadSelf,
            Instruction::LoadField("<Name>k__BackingField".into()),
            Instruction::Return,
        ])));
        let expected = counted.clone();

        let resolver = resolver_for(vec![dog]);
        let result = weave(&resolver, &WeaveSettings::default());

        assert_eq!(result.diagnostics.with_code(DiagnosticCode::NotAutomatic).count(), 1);
        assert!(!result.diagnostics.has_errors());
        assert_eq!(result.module.find_type("Zoo.Dog").unwrap().property("Name").unwrap(), &expected);
        assert!(result.schemas[0].fields.is_empty());
        assert_eq!(result.stats.properties_woven, 0);
    }

    #[test]
    fn test_warnings_as_errors() {
        let mut dog = dog();
        auto_property(&mut dog, "Age", TypeSig::Builtin(Builtin::Int32), vec![Annotation::Required]);
        let resolver = resolver_for(vec![dog]);

        let lenient = weave(&resolver, &WeaveSettings::default());
        assert!(!lenient.diagnostics.has_errors());
        let strict = weave(&resolver, &WeaveSettings { warnings_as_errors: true });
        assert!(strict.diagnostics.has_errors());
    }
}
