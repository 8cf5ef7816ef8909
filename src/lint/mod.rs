//! Model Constraint Linting
//!
//! Enforces the declared-model rules on classified properties. One pass,
//! per property then per type; every violation is collected so a single run
//! reports all of them.
//!
//! ## Rules
//! 1. **Primary key**: at most one per type, integral or string only, never on embedded objects
//! 2. **Index**: integral/bool, string or date only
//! 3. **Required**: warn when the category is never null (no-op)
//! 4. **Mapped names**: valid and unique within a type
//! 5. **Collections**: no public setter; no sets of embedded objects
//! 6. **Backlinks**: get-only, inverse exists and points back at the owner
//! 7. **Asymmetric**: only asymmetric objects may link to asymmetric objects

use regex::Regex;
use std::collections::HashSet;

use crate::graph::classify::getter_source;
use crate::graph::{
    Classified, CollectionKind, DiagnosticCode, DiagnosticItem, Diagnostics, Location,
    PropertyClassifier, ResolvedType, StorageCategory, Variant,
};
use crate::module::{Annotation, PropertyDef};

/// Longest name the storage engine accepts for a column
pub const MAX_NAME_LENGTH: usize = 63;

/// A property that passed (or partially passed) validation
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedProperty {
    /// Index into the owner's `properties`
    pub index: usize,
    pub name: String,
    /// Name persisted in the schema (mapped name or property name)
    pub column: String,
    pub category: StorageCategory,
    /// Effective nullability, `required` applied
    pub nullable: bool,
    pub is_primary_key: bool,
    pub is_indexed: bool,
    /// False when a rule excluded the property from schema and weaving
    pub in_schema: bool,
}

/// Validation result for one type
#[derive(Debug, Clone, Default)]
pub struct ValidatedType {
    pub properties: Vec<ValidatedProperty>,
}

impl ValidatedType {
    pub fn primary_key(&self) -> Option<&ValidatedProperty> {
        self.properties.iter().find(|p| p.is_primary_key)
    }

    pub fn schema_properties(&self) -> impl Iterator<Item = &ValidatedProperty> {
        self.properties.iter().filter(|p| p.in_schema)
    }
}

/// The model constraint validator
pub struct ConstraintValidator<'a, 'r> {
    classifier: &'a PropertyClassifier<'a, 'r>,
    /// Names the storage engine reserves for its own columns
    reserved_name: Regex,
}

impl<'a, 'r> ConstraintValidator<'a, 'r> {
    pub fn new(classifier: &'a PropertyClassifier<'a, 'r>) -> Self {
        Self {
            classifier,
            reserved_name: Regex::new(r"^__").unwrap(),
        }
    }

    /// Validate the classified properties of `owner`
    pub fn validate(
        &self,
        owner: &ResolvedType,
        variant: Variant,
        classified: Vec<(usize, Classified)>,
        diags: &mut Diagnostics,
    ) -> ValidatedType {
        let def = owner.def();
        let mut result = ValidatedType::default();
        let mut key_candidates: Vec<usize> = Vec::new();

        for (index, classified) in classified {
            let prop = &def.properties[index];
            if !classified.category.is_supported() {
                continue;
            }

            let mut validated = ValidatedProperty {
                index,
                name: prop.name.clone(),
                column: prop.mapped_name().unwrap_or(&prop.name).to_string(),
                category: classified.category,
                nullable: classified.nullable,
                is_primary_key: false,
                is_indexed: false,
                in_schema: true,
            };
            let report = |diags: &mut Diagnostics, code: DiagnosticCode, message: String| {
                diags.push(
                    DiagnosticItem::new(code, message)
                        .at(Location::of_property(&def.name, &prop.name).with_source(getter_source(prop))),
                );
            };

            if let Some(mapped) = prop.mapped_name() {
                if let Some(problem) = self.mapped_name_problem(mapped) {
                    report(
                        diags,
                        DiagnosticCode::InvalidMappedName,
                        format!("{}.{} has an invalid mapped name '{}': {}", def.name, prop.name, mapped, problem),
                    );
                    validated.in_schema = false;
                }
            }

            if prop.has(&Annotation::PrimaryKey) {
                key_candidates.push(result.properties.len());
            }

            if prop.has(&Annotation::Indexed) {
                if is_indexable(&validated.category) {
                    validated.is_indexed = true;
                } else {
                    report(
                        diags,
                        DiagnosticCode::UnsupportedIndexType,
                        format!(
                            "{}.{} is marked as indexed but its type '{}' cannot be indexed",
                            def.name, prop.name, validated.category
                        ),
                    );
                }
            }

            if prop.has(&Annotation::Required) {
                self.apply_required(&mut validated, |message| {
                    report(diags, DiagnosticCode::RequiredNoOp, format!("{}.{} {}", def.name, prop.name, message))
                });
            }

            if validated.category.is_collection() && prop.has_public_setter() {
                report(
                    diags,
                    DiagnosticCode::CollectionWithSetter,
                    format!(
                        "{}.{} is a collection with a public setter; collections can only be modified in place",
                        def.name, prop.name
                    ),
                );
            }

            let backlink_conflict = prop.backlink_inverse().is_some()
                && !matches!(validated.category, StorageCategory::Backlink { .. });
            if backlink_conflict {
                report(
                    diags,
                    DiagnosticCode::ConflictingAnnotations,
                    format!(
                        "{}.{} carries a backlink annotation but is declared as '{}'; backlinks must be query properties",
                        def.name, prop.name, validated.category
                    ),
                );
                validated.in_schema = false;
            }

            match &validated.category {
                StorageCategory::Backlink { .. } => {
                    if let Some(problem) = self.backlink_problem(owner, prop, &validated.category) {
                        report(diags, problem.0, problem.1);
                        validated.in_schema = false;
                    }
                }
                StorageCategory::ObjectRef { target } | StorageCategory::ObjectCollection { element: target, .. } => {
                    if target.variant == Variant::Asymmetric && variant != Variant::Asymmetric {
                        report(
                            diags,
                            DiagnosticCode::AsymmetricLink,
                            format!(
                                "{}.{} links to asymmetric object '{}'; only asymmetric objects may do so",
                                def.name, prop.name, target.type_ref.name
                            ),
                        );
                    }
                    if target.variant == Variant::Embedded
                        && validated.category.collection_kind() == Some(CollectionKind::Set)
                    {
                        report(
                            diags,
                            DiagnosticCode::EmbeddedSet,
                            format!("{}.{} is a set of embedded objects, which is not supported", def.name, prop.name),
                        );
                    }
                }
                _ => {}
            }

            result.properties.push(validated);
        }

        self.resolve_primary_key(owner, variant, &key_candidates, &mut result, diags);
        self.check_unique_columns(owner, &mut result, diags);
        result
    }

    fn mapped_name_problem(&self, mapped: &str) -> Option<&'static str> {
        if mapped.trim().is_empty() {
            Some("names must not be empty")
        } else if self.reserved_name.is_match(mapped) {
            Some("names starting with '__' are reserved")
        } else if mapped.chars().count() > MAX_NAME_LENGTH {
            Some("names are limited to 63 characters")
        } else {
            None
        }
    }

    fn apply_required(&self, validated: &mut ValidatedProperty, mut warn: impl FnMut(String)) {
        match &mut validated.category {
            StorageCategory::ScalarCollection { element_nullable, .. } if *element_nullable => {
                *element_nullable = false;
            }
            _ if validated.nullable => validated.nullable = false,
            category => warn(format!(
                "is marked as required but '{}' can never be null; the annotation has no effect",
                category
            )),
        }
    }

    fn backlink_problem(
        &self,
        owner: &ResolvedType,
        prop: &PropertyDef,
        category: &StorageCategory,
    ) -> Option<(DiagnosticCode, String)> {
        let StorageCategory::Backlink { target, inverse } = category else {
            return None;
        };
        let def = owner.def();

        if prop.setter.is_some() {
            return Some((
                DiagnosticCode::BacklinkWithSetter,
                format!("{}.{} is a backlink and must not have a setter", def.name, prop.name),
            ));
        }

        let resolver = self.classifier.resolver();
        let Some(target_type) = resolver.resolve_type(&target.type_ref, &owner.module) else {
            return Some((
                DiagnosticCode::BacklinkInverseMissing,
                format!("{}.{} points at '{}' which could not be resolved", def.name, prop.name, target.type_ref.name),
            ));
        };
        let Some(inverse_prop) = target_type.def().property(inverse) else {
            return Some((
                DiagnosticCode::BacklinkInverseMissing,
                format!(
                    "{}.{} names inverse property '{}.{}' which does not exist",
                    def.name, prop.name, target.type_ref.name, inverse
                ),
            ));
        };

        // The inverse belongs to another type; its own problems are reported there.
        let mut scratch = Diagnostics::new();
        let points_back = self
            .classifier
            .classify(&target_type, inverse_prop, &mut scratch)
            .map(|c| match c.category {
                StorageCategory::ObjectRef { target } => target.is(owner),
                StorageCategory::ObjectCollection { element, .. } => element.is(owner),
                _ => false,
            })
            .unwrap_or(false);

        if points_back {
            None
        } else {
            Some((
                DiagnosticCode::BacklinkInverseMismatch,
                format!(
                    "{}.{} names inverse '{}.{}' which does not link back to '{}'",
                    def.name, prop.name, target.type_ref.name, inverse, def.name
                ),
            ))
        }
    }

    fn resolve_primary_key(
        &self,
        owner: &ResolvedType,
        variant: Variant,
        candidates: &[usize],
        result: &mut ValidatedType,
        diags: &mut Diagnostics,
    ) {
        let def = owner.def();
        match candidates {
            [] => {}
            [single] => {
                let candidate = &mut result.properties[*single];
                if variant == Variant::Embedded {
                    diags.on_property(
                        &def.name,
                        &candidate.name,
                        DiagnosticCode::EmbeddedPrimaryKey,
                        format!("{} is an embedded object and cannot have a primary key", def.name),
                    );
                } else if !is_key_type(&candidate.category) {
                    diags.on_property(
                        &def.name,
                        &candidate.name,
                        DiagnosticCode::UnsupportedPrimaryKeyType,
                        format!(
                            "unsupported primary key type: {}.{} is '{}'",
                            def.name, candidate.name, candidate.category
                        ),
                    );
                } else {
                    candidate.is_primary_key = true;
                }
            }
            many => {
                let names: Vec<&str> = many.iter().map(|i| result.properties[*i].name.as_str()).collect();
                diags.on_type(
                    &def.name,
                    DiagnosticCode::DuplicatePrimaryKey,
                    format!("{} declares more than one primary key: {}", def.name, names.join(", ")),
                );
            }
        }
    }

    fn check_unique_columns(&self, owner: &ResolvedType, result: &mut ValidatedType, diags: &mut Diagnostics) {
        let def = owner.def();
        let mut seen: HashSet<String> = HashSet::new();
        for property in result.properties.iter_mut().filter(|p| p.in_schema) {
            if !seen.insert(property.column.clone()) {
                diags.on_property(
                    &def.name,
                    &property.name,
                    DiagnosticCode::DuplicateMappedName,
                    format!(
                        "{}.{} persists as '{}', which is already used by another property",
                        def.name, property.name, property.column
                    ),
                );
                property.in_schema = false;
                property.is_primary_key = false;
            }
        }
    }
}

/// Categories that may carry an index
pub fn is_indexable(category: &StorageCategory) -> bool {
    match category {
        StorageCategory::ScalarPrimitive { kind } => !kind.is_float(),
        StorageCategory::ScalarString | StorageCategory::ScalarDate => true,
        _ => false,
    }
}

/// Categories that may serve as a primary key
pub fn is_key_type(category: &StorageCategory) -> bool {
    match category {
        StorageCategory::ScalarPrimitive { kind } => kind.is_integral(),
        StorageCategory::ScalarString => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{LoadConfig, ModuleResolver, PrimitiveKind, TypeGraphAnalyzer};
    use crate::module::{AccessorDef, Builtin, MethodBody, Module, TypeDef, TypeSig, Visibility};
    use crate::wellknown;
    use semver::Version;

    fn prop(name: &str, ty: TypeSig, annotations: Vec<Annotation>) -> PropertyDef {
        PropertyDef {
            name: name.to_string(),
            ty,
            is_static: false,
            getter: Some(AccessorDef::public(MethodBody::auto_getter(name))),
            setter: Some(AccessorDef::public(MethodBody::auto_setter(name))),
            annotations,
        }
    }

    fn model(name: &str, root: &str, properties: Vec<PropertyDef>) -> TypeDef {
        let mut t = TypeDef::class(name);
        t.base = Some(wellknown::runtime_type(root));
        t.properties = properties;
        t
    }

    /// Validate the first type of a module built from `types`
    fn validate(types: Vec<TypeDef>) -> (ValidatedType, Diagnostics) {
        let mut module = Module::new("Zoo", Version::new(1, 0, 0));
        module.types = types;
        let resolver = ModuleResolver::new(module, &LoadConfig::default());
        let analyzer = TypeGraphAnalyzer::new(&resolver);
        let classifier = PropertyClassifier::new(&analyzer);
        let validator = ConstraintValidator::new(&classifier);

        let owner = resolver.resolve_local(&resolver.target().types[0].name).unwrap();
        let variant = analyzer.classify(&owner);
        let mut diags = Diagnostics::new();
        let classified = classifier.classify_all(&owner, &mut diags);
        let validated = validator.validate(&owner, variant, classified, &mut diags);
        (validated, diags)
    }

    fn int() -> TypeSig {
        TypeSig::Builtin(Builtin::Int32)
    }

    #[test]
    fn test_two_primary_keys_yield_one_error_and_no_key() {
        let (validated, diags) = validate(vec![model(
            "Zoo.Twin",
            wellknown::PERSISTENT_OBJECT,
            vec![
                prop("A", int(), vec![Annotation::PrimaryKey]),
                prop("B", TypeSig::Builtin(Builtin::Float32), vec![Annotation::PrimaryKey]),
            ],
        )]);
        assert_eq!(diags.error_count(), 1);
        assert_eq!(diags.with_code(DiagnosticCode::DuplicatePrimaryKey).count(), 1);
        assert!(validated.primary_key().is_none());
    }

    #[test]
    fn test_float_primary_key_is_rejected() {
        let (validated, diags) = validate(vec![model(
            "Zoo.IllegalKey",
            wellknown::PERSISTENT_OBJECT,
            vec![prop("Value", TypeSig::Builtin(Builtin::Float32), vec![Annotation::PrimaryKey])],
        )]);
        assert_eq!(diags.error_count(), 1);
        assert!(diags.errors().next().unwrap().message.contains("unsupported primary key type"));
        assert!(validated.primary_key().is_none());
        assert!(validated.properties[0].in_schema);
        assert_eq!(
            validated.properties[0].category,
            StorageCategory::ScalarPrimitive { kind: PrimitiveKind::Float32 }
        );
    }

    #[test]
    fn test_embedded_cannot_have_primary_key() {
        let (validated, diags) = validate(vec![model(
            "Zoo.Collar",
            wellknown::EMBEDDED_OBJECT,
            vec![prop("Id", int(), vec![Annotation::PrimaryKey])],
        )]);
        assert_eq!(diags.with_code(DiagnosticCode::EmbeddedPrimaryKey).count(), 1);
        assert!(validated.primary_key().is_none());
    }

    #[test]
    fn test_index_on_decimal_is_rejected_but_property_kept() {
        let (validated, diags) = validate(vec![model(
            "Zoo.Price",
            wellknown::PERSISTENT_OBJECT,
            vec![prop("Amount", TypeSig::Builtin(Builtin::Decimal), vec![Annotation::Indexed])],
        )]);
        assert_eq!(diags.error_count(), 1);
        assert_eq!(diags.with_code(DiagnosticCode::UnsupportedIndexType).count(), 1);
        assert!(validated.properties[0].in_schema);
        assert!(!validated.properties[0].is_indexed);
    }

    #[test]
    fn test_required_semantics() {
        let (validated, diags) = validate(vec![model(
            "Zoo.Dog",
            wellknown::PERSISTENT_OBJECT,
            vec![
                prop("Name", TypeSig::Builtin(Builtin::String), vec![Annotation::Required]),
                prop("Age", int(), vec![Annotation::Required]),
            ],
        )]);
        assert!(!validated.properties[0].nullable);
        assert_eq!(diags.warning_count(), 1);
        assert_eq!(diags.with_code(DiagnosticCode::RequiredNoOp).count(), 1);
        assert!(!diags.has_errors());
    }

    #[test]
    fn test_duplicate_and_invalid_mapped_names() {
        let (validated, diags) = validate(vec![model(
            "Zoo.Dog",
            wellknown::PERSISTENT_OBJECT,
            vec![
                prop("Name", TypeSig::Builtin(Builtin::String), vec![]),
                prop("Title", TypeSig::Builtin(Builtin::String), vec![Annotation::MapTo("Name".into())]),
                prop("Secret", TypeSig::Builtin(Builtin::String), vec![Annotation::MapTo("__hidden".into())]),
            ],
        )]);
        assert_eq!(diags.with_code(DiagnosticCode::DuplicateMappedName).count(), 1);
        assert_eq!(diags.with_code(DiagnosticCode::InvalidMappedName).count(), 1);
        let in_schema: Vec<&str> = validated.schema_properties().map(|p| p.name.as_str()).collect();
        assert_eq!(in_schema, vec!["Name"]);
    }

    #[test]
    fn test_collection_with_public_setter() {
        let list = TypeSig::generic(wellknown::runtime_type(wellknown::LIST), vec![int()]);
        let mut private_setter = prop("Scores", list.clone(), vec![]);
        private_setter.setter.as_mut().unwrap().visibility = Visibility::Private;
        let (_, diags) = validate(vec![model(
            "Zoo.Dog",
            wellknown::PERSISTENT_OBJECT,
            vec![prop("Tags", list, vec![]), private_setter],
        )]);
        assert_eq!(diags.with_code(DiagnosticCode::CollectionWithSetter).count(), 1);
    }

    #[test]
    fn test_backlink_rules() {
        let query = |t: &str| TypeSig::generic(wellknown::runtime_type(wellknown::QUERY), vec![TypeSig::named(t)]);
        let mut owners = prop("Owners", query("Zoo.Person"), vec![Annotation::Backlink("Dogs".into())]);
        owners.setter = None;
        let mut missing = prop("Fans", query("Zoo.Person"), vec![Annotation::Backlink("Nope".into())]);
        missing.setter = None;
        let mut wrong = prop("Walkers", query("Zoo.Person"), vec![Annotation::Backlink("Name".into())]);
        wrong.setter = None;
        let with_setter = prop("Sitters", query("Zoo.Person"), vec![Annotation::Backlink("Dogs".into())]);
        let conflicting = prop(
            "Pals",
            TypeSig::generic(wellknown::runtime_type(wellknown::LIST), vec![TypeSig::named("Zoo.Person")]),
            vec![Annotation::Backlink("Dogs".into())],
        );

        let person = model(
            "Zoo.Person",
            wellknown::PERSISTENT_OBJECT,
            vec![
                prop("Name", TypeSig::Builtin(Builtin::String), vec![]),
                prop(
                    "Dogs",
                    TypeSig::generic(wellknown::runtime_type(wellknown::LIST), vec![TypeSig::named("Zoo.Dog")]),
                    vec![],
                ),
            ],
        );
        let dog = model(
            "Zoo.Dog",
            wellknown::PERSISTENT_OBJECT,
            vec![owners, missing, wrong, with_setter, conflicting],
        );

        let (validated, diags) = validate(vec![dog, person]);
        assert_eq!(diags.with_code(DiagnosticCode::BacklinkInverseMissing).count(), 1);
        assert_eq!(diags.with_code(DiagnosticCode::BacklinkInverseMismatch).count(), 1);
        assert_eq!(diags.with_code(DiagnosticCode::BacklinkWithSetter).count(), 1);
        assert_eq!(diags.with_code(DiagnosticCode::ConflictingAnnotations).count(), 1);
        let in_schema: Vec<&str> = validated.schema_properties().map(|p| p.name.as_str()).collect();
        assert_eq!(in_schema, vec!["Owners"]);
    }

    #[test]
    fn test_links_to_asymmetric_and_embedded_sets() {
        let visit = model("Zoo.Visit", wellknown::ASYMMETRIC_OBJECT, vec![]);
        let collar = model("Zoo.Collar", wellknown::EMBEDDED_OBJECT, vec![]);
        let dog = model(
            "Zoo.Dog",
            wellknown::PERSISTENT_OBJECT,
            vec![
                prop("LastVisit", TypeSig::named("Zoo.Visit"), vec![]),
                prop(
                    "Collars",
                    TypeSig::generic(wellknown::runtime_type(wellknown::SET), vec![TypeSig::named("Zoo.Collar")]),
                    vec![],
                ),
            ],
        );
        let (_, diags) = validate(vec![dog, visit, collar]);
        assert_eq!(diags.with_code(DiagnosticCode::AsymmetricLink).count(), 1);
        assert_eq!(diags.with_code(DiagnosticCode::EmbeddedSet).count(), 1);
    }
}
