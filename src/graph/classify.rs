//! Property Classification
//!
//! Determines HOW each property of a persistable type is stored, consuming:
//! - the declared `TypeSig`
//! - the annotations on the property
//! - the TypeGraphAnalyzer (to recognise persistable targets)
//!
//! Decision order, first match wins:
//! 1. `ignore` annotation or static property: excluded
//! 2. builtin scalar: Scalar*
//! 3. persistable named type: ObjectRef
//! 4. List/Set/Map of persistable: ObjectCollection
//! 5. List/Set/Map of scalar: ScalarCollection
//! 6. Query<T> + `backlink`: Backlink
//! 7. anything else: Unsupported (error diagnostic)
//!
//! A nullable wrapper is peeled exactly once and the order re-applied to the
//! inner type.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::diagnostics::{DiagnosticCode, DiagnosticItem, Diagnostics, Location};
use super::{ModuleResolver, ResolvedType, TypeGraphAnalyzer, Variant};
use crate::module::{Annotation, Builtin, Module, PropertyDef, TypeRef, TypeSig};
use crate::wellknown;

// =============================================================================
// Storage categories
// =============================================================================

/// Primitive scalar kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveKind {
    Bool,
    Char,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Float32,
    Float64,
}

impl PrimitiveKind {
    pub fn is_float(&self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    /// Integer-valued kinds (char included), which may serve as keys
    pub fn is_integral(&self) -> bool {
        matches!(
            self,
            Self::Char | Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64 | Self::Uint8
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    List,
    Set,
    Dictionary,
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::List => write!(f, "list"),
            Self::Set => write!(f, "set"),
            Self::Dictionary => write!(f, "dictionary"),
        }
    }
}

/// Persistable type a relationship points at
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetType {
    /// Absolute reference (module always set)
    pub type_ref: TypeRef,
    pub variant: Variant,
}

impl TargetType {
    fn from_resolved(resolved: &ResolvedType, variant: Variant) -> Self {
        Self { type_ref: resolved.type_ref(), variant }
    }

    /// True if this target is the given resolved type
    pub fn is(&self, ty: &ResolvedType) -> bool {
        self.type_ref == ty.type_ref()
    }
}

/// How a property is stored
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum StorageCategory {
    ScalarPrimitive { kind: PrimitiveKind },
    ScalarString,
    ScalarBinary,
    ScalarDate,
    ScalarDecimal,
    ObjectRef { target: TargetType },
    ObjectCollection { kind: CollectionKind, element: TargetType },
    ScalarCollection {
        kind: CollectionKind,
        element: Box<StorageCategory>,
        element_nullable: bool,
    },
    Backlink { target: TargetType, inverse: String },
    Unsupported { reason: String },
}

impl StorageCategory {
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Self::ScalarPrimitive { .. }
                | Self::ScalarString
                | Self::ScalarBinary
                | Self::ScalarDate
                | Self::ScalarDecimal
        )
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, Self::ObjectCollection { .. } | Self::ScalarCollection { .. })
    }

    pub fn collection_kind(&self) -> Option<CollectionKind> {
        match self {
            Self::ObjectCollection { kind, .. } | Self::ScalarCollection { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unsupported { .. })
    }
}

impl fmt::Display for StorageCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ScalarPrimitive { kind } => write!(f, "{:?}", kind),
            Self::ScalarString => write!(f, "string"),
            Self::ScalarBinary => write!(f, "binary"),
            Self::ScalarDate => write!(f, "date"),
            Self::ScalarDecimal => write!(f, "decimal"),
            Self::ObjectRef { target } => write!(f, "object<{}>", target.type_ref.name),
            Self::ObjectCollection { kind, element } => write!(f, "{}<{}>", kind, element.type_ref.name),
            Self::ScalarCollection { kind, element, element_nullable } => {
                write!(f, "{}<{}{}>", kind, element, if *element_nullable { "?" } else { "" })
            }
            Self::Backlink { target, inverse } => write!(f, "backlink<{}.{}>", target.type_ref.name, inverse),
            Self::Unsupported { reason } => write!(f, "unsupported ({})", reason),
        }
    }
}

/// Classification result for one property
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classified {
    pub category: StorageCategory,
    /// Nullability as declared, before `required` is applied
    pub nullable: bool,
}

impl Classified {
    fn new(category: StorageCategory, nullable: bool) -> Self {
        Self { category, nullable }
    }

    fn unsupported(reason: impl Into<String>) -> Self {
        Self::new(StorageCategory::Unsupported { reason: reason.into() }, false)
    }
}

// =============================================================================
// Classifier
// =============================================================================

/// Classifies properties of persistable types
pub struct PropertyClassifier<'a, 'r> {
    analyzer: &'a TypeGraphAnalyzer<'r>,
}

impl<'a, 'r> PropertyClassifier<'a, 'r> {
    pub fn new(analyzer: &'a TypeGraphAnalyzer<'r>) -> Self {
        Self { analyzer }
    }

    pub fn analyzer(&self) -> &'a TypeGraphAnalyzer<'r> {
        self.analyzer
    }

    pub fn resolver(&self) -> &'r ModuleResolver {
        self.analyzer.resolver()
    }

    /// Classify every property of `owner`, in declaration order.
    ///
    /// Excluded properties are omitted; unsupported ones are kept (with an
    /// error pushed to `diags`) so later passes can see them.
    pub fn classify_all(&self, owner: &ResolvedType, diags: &mut Diagnostics) -> Vec<(usize, Classified)> {
        owner
            .def()
            .properties
            .iter()
            .enumerate()
            .filter_map(|(idx, prop)| self.classify(owner, prop, diags).map(|c| (idx, c)))
            .collect()
    }

    /// Classify a single property; `None` means excluded from weaving.
    pub fn classify(&self, owner: &ResolvedType, prop: &PropertyDef, diags: &mut Diagnostics) -> Option<Classified> {
        if prop.has(&Annotation::Ignore) || prop.is_static {
            return None;
        }

        let classified = match &prop.ty {
            TypeSig::Generic { definition, args } if wellknown::is_runtime(definition, wellknown::QUERY) => {
                self.classify_query(owner, prop, args)
            }
            sig => self.classify_sig(sig, &owner.module),
        };

        if let StorageCategory::Unsupported { reason } = &classified.category {
            diags.push(
                DiagnosticItem::new(
                    DiagnosticCode::UnsupportedPropertyType,
                    format!(
                        "{}.{} is of type '{}' which is not supported: {}",
                        owner.def().name,
                        prop.name,
                        prop.ty,
                        reason
                    ),
                )
                .at(
                    Location::of_property(&owner.def().name, &prop.name)
                        .with_source(getter_source(prop)),
                ),
            );
        }

        Some(classified)
    }

    fn classify_sig(&self, sig: &TypeSig, from: &Module) -> Classified {
        match sig {
            TypeSig::Builtin(builtin) => classify_builtin(*builtin),

            TypeSig::Array(inner) => match inner.as_ref() {
                TypeSig::Builtin(Builtin::Uint8) => Classified::new(StorageCategory::ScalarBinary, true),
                _ => Classified::unsupported("arrays are not supported, use a list"),
            },

            TypeSig::Named(type_ref) => match self.persistable(type_ref, from) {
                Some(target) => Classified::new(StorageCategory::ObjectRef { target }, true),
                None => Classified::unsupported(format!("'{}' is not a persistable type", type_ref.name)),
            },

            TypeSig::Nullable(inner) => {
                if matches!(inner.as_ref(), TypeSig::Nullable(_)) {
                    return Classified::unsupported("nullable may only be applied once");
                }
                let mut classified = self.classify_sig(inner, from);
                // Collections are never null themselves; everything else now admits null.
                if classified.category.is_supported() && !classified.category.is_collection() {
                    classified.nullable = true;
                }
                classified
            }

            TypeSig::Generic { definition, args } => match collection_kind(definition) {
                Some(kind) => self.classify_collection(kind, args, from),
                None if wellknown::is_runtime(definition, wellknown::QUERY) => {
                    Classified::unsupported("query properties must carry a backlink annotation")
                }
                None => Classified::unsupported(format!("'{}' is not a supported collection", definition.name)),
            },
        }
    }

    fn classify_collection(&self, kind: CollectionKind, args: &[TypeSig], from: &Module) -> Classified {
        let element = match (kind, args) {
            (CollectionKind::Dictionary, [key, value]) => {
                if *key != TypeSig::Builtin(Builtin::String) {
                    return Classified::unsupported("dictionary keys must be strings");
                }
                value
            }
            (CollectionKind::List | CollectionKind::Set, [element]) => element,
            _ => return Classified::unsupported(format!("{} has the wrong number of type arguments", kind)),
        };

        let (element_sig, wrapped) = match element {
            TypeSig::Nullable(inner) => {
                if matches!(inner.as_ref(), TypeSig::Nullable(_)) {
                    return Classified::unsupported("nullable may only be applied once");
                }
                (inner.as_ref(), true)
            }
            other => (other, false),
        };

        if let TypeSig::Generic { .. } = element_sig {
            return Classified::unsupported("collections of collections are not supported");
        }

        if let TypeSig::Named(type_ref) = element_sig {
            return match self.persistable(type_ref, from) {
                Some(_) if wrapped && kind != CollectionKind::Dictionary => {
                    Classified::unsupported(format!("{}s of nullable objects are not supported", kind))
                }
                Some(element) => Classified::new(StorageCategory::ObjectCollection { kind, element }, false),
                None => Classified::unsupported(format!(
                    "element type '{}' is not a persistable type",
                    type_ref.name
                )),
            };
        }

        let scalar = self.classify_sig(element_sig, from);
        if !scalar.category.is_scalar() {
            return match scalar.category {
                StorageCategory::Unsupported { reason } => {
                    Classified::unsupported(format!("unsupported element type: {}", reason))
                }
                other => Classified::unsupported(format!("unsupported element type: {}", other)),
            };
        }

        Classified::new(
            StorageCategory::ScalarCollection {
                kind,
                element: Box::new(scalar.category),
                element_nullable: wrapped || scalar.nullable,
            },
            false,
        )
    }

    fn classify_query(&self, owner: &ResolvedType, prop: &PropertyDef, args: &[TypeSig]) -> Classified {
        let Some(inverse) = prop.backlink_inverse() else {
            return Classified::unsupported("query properties must carry a backlink annotation");
        };
        let [TypeSig::Named(type_ref)] = args else {
            return Classified::unsupported("backlink element must be a persistable type");
        };
        match self.persistable(type_ref, &owner.module) {
            Some(target) => Classified::new(
                StorageCategory::Backlink { target, inverse: inverse.to_string() },
                false,
            ),
            None => Classified::unsupported(format!("'{}' is not a persistable type", type_ref.name)),
        }
    }

    /// Resolve `type_ref` and return it as a target if persistable
    fn persistable(&self, type_ref: &TypeRef, from: &Module) -> Option<TargetType> {
        let (resolved, variant) = self.analyzer.classify_ref(type_ref, from)?;
        variant
            .is_persistable()
            .then(|| TargetType::from_resolved(&resolved, variant))
    }
}

fn classify_builtin(builtin: Builtin) -> Classified {
    let primitive = |kind| Classified::new(StorageCategory::ScalarPrimitive { kind }, false);
    match builtin {
        Builtin::Bool => primitive(PrimitiveKind::Bool),
        Builtin::Char => primitive(PrimitiveKind::Char),
        Builtin::Int8 => primitive(PrimitiveKind::Int8),
        Builtin::Int16 => primitive(PrimitiveKind::Int16),
        Builtin::Int32 => primitive(PrimitiveKind::Int32),
        Builtin::Int64 => primitive(PrimitiveKind::Int64),
        Builtin::Uint8 => primitive(PrimitiveKind::Uint8),
        Builtin::Float32 => primitive(PrimitiveKind::Float32),
        Builtin::Float64 => primitive(PrimitiveKind::Float64),
        Builtin::String => Classified::new(StorageCategory::ScalarString, true),
        Builtin::Binary => Classified::new(StorageCategory::ScalarBinary, true),
        Builtin::DateTimeOffset => Classified::new(StorageCategory::ScalarDate, false),
        Builtin::Decimal | Builtin::Decimal128 => Classified::new(StorageCategory::ScalarDecimal, false),
        Builtin::DateTime => Classified::unsupported("date_time has no offset, use date_time_offset"),
        Builtin::Object => Classified::unsupported("untyped object properties are not supported"),
    }
}

fn collection_kind(definition: &TypeRef) -> Option<CollectionKind> {
    if wellknown::is_runtime(definition, wellknown::LIST) {
        Some(CollectionKind::List)
    } else if wellknown::is_runtime(definition, wellknown::SET) {
        Some(CollectionKind::Set)
    } else if wellknown::is_runtime(definition, wellknown::MAP) {
        Some(CollectionKind::Dictionary)
    } else {
        None
    }
}

/// First sequence point of the getter, for diagnostics
pub(crate) fn getter_source(prop: &PropertyDef) -> Option<&crate::module::SequencePoint> {
    prop.getter.as_ref().and_then(|g| g.body.sequence_points.first())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{LoadConfig, ModuleResolver};
    use crate::module::{AccessorDef, MethodBody, TypeDef};
    use semver::Version;

    fn list_of(sig: TypeSig) -> TypeSig {
        TypeSig::generic(wellknown::runtime_type(wellknown::LIST), vec![sig])
    }

    fn prop(name: &str, ty: TypeSig) -> PropertyDef {
        PropertyDef {
            name: name.to_string(),
            ty,
            is_static: false,
            getter: Some(AccessorDef::public(MethodBody::auto_getter(name))),
            setter: None,
            annotations: Vec::new(),
        }
    }

    fn zoo(properties: Vec<PropertyDef>) -> ModuleResolver {
        let mut dog = TypeDef::class("Zoo.Dog");
        dog.base = Some(wellknown::runtime_type(wellknown::PERSISTENT_OBJECT));
        dog.properties = properties;
        let mut plain = TypeDef::class("Zoo.Plain");
        plain.base = None;
        let mut module = Module::new("Zoo", Version::new(1, 0, 0));
        module.types = vec![dog, plain];
        ModuleResolver::new(module, &LoadConfig::default())
    }

    fn classify_one(ty: TypeSig) -> (Option<Classified>, Diagnostics) {
        let resolver = zoo(vec![prop("P", ty)]);
        let analyzer = TypeGraphAnalyzer::new(&resolver);
        let classifier = PropertyClassifier::new(&analyzer);
        let owner = resolver.resolve_local("Zoo.Dog").unwrap();
        let mut diags = Diagnostics::new();
        let result = classifier.classify(&owner, &owner.def().properties[0], &mut diags);
        (result, diags)
    }

    #[test]
    fn test_scalar_coverage() {
        let cases = [
            (Builtin::Int32, StorageCategory::ScalarPrimitive { kind: PrimitiveKind::Int32 }, false),
            (Builtin::Int64, StorageCategory::ScalarPrimitive { kind: PrimitiveKind::Int64 }, false),
            (Builtin::Float32, StorageCategory::ScalarPrimitive { kind: PrimitiveKind::Float32 }, false),
            (Builtin::Float64, StorageCategory::ScalarPrimitive { kind: PrimitiveKind::Float64 }, false),
            (Builtin::Bool, StorageCategory::ScalarPrimitive { kind: PrimitiveKind::Bool }, false),
            (Builtin::Char, StorageCategory::ScalarPrimitive { kind: PrimitiveKind::Char }, false),
            (Builtin::String, StorageCategory::ScalarString, true),
            (Builtin::Binary, StorageCategory::ScalarBinary, true),
            (Builtin::DateTimeOffset, StorageCategory::ScalarDate, false),
            (Builtin::Decimal, StorageCategory::ScalarDecimal, false),
        ];
        for (builtin, expected, nullable) in cases {
            let (result, diags) = classify_one(TypeSig::Builtin(builtin));
            let classified = result.unwrap();
            assert_eq!(classified.category, expected, "{:?}", builtin);
            assert_eq!(classified.nullable, nullable, "{:?}", builtin);
            assert!(diags.is_empty());
        }
    }

    #[test]
    fn test_object_ref_and_list_of_objects() {
        let (result, _) = classify_one(TypeSig::named("Zoo.Dog"));
        assert!(matches!(result.unwrap().category, StorageCategory::ObjectRef { .. }));

        let (result, _) = classify_one(list_of(TypeSig::named("Zoo.Dog")));
        match result.unwrap().category {
            StorageCategory::ObjectCollection { kind, element } => {
                assert_eq!(kind, CollectionKind::List);
                assert_eq!(element.type_ref, TypeRef::external("Zoo", "Zoo.Dog"));
                assert_eq!(element.variant, Variant::Standard);
            }
            other => panic!("expected ObjectCollection, got {:?}", other),
        }
    }

    #[test]
    fn test_list_of_nullable_scalar() {
        let (result, diags) = classify_one(list_of(TypeSig::nullable(TypeSig::Builtin(Builtin::Int32))));
        assert_eq!(
            result.unwrap().category,
            StorageCategory::ScalarCollection {
                kind: CollectionKind::List,
                element: Box::new(StorageCategory::ScalarPrimitive { kind: PrimitiveKind::Int32 }),
                element_nullable: true,
            }
        );
        assert!(diags.is_empty());
    }

    #[test]
    fn test_nullable_unwraps_exactly_once() {
        let (result, _) = classify_one(TypeSig::nullable(TypeSig::Builtin(Builtin::Int64)));
        let classified = result.unwrap();
        assert_eq!(classified.category, StorageCategory::ScalarPrimitive { kind: PrimitiveKind::Int64 });
        assert!(classified.nullable);

        let (result, diags) = classify_one(TypeSig::nullable(TypeSig::nullable(TypeSig::Builtin(Builtin::Int64))));
        assert!(!result.unwrap().category.is_supported());
        assert_eq!(diags.error_count(), 1);

        let (result, diags) =
            classify_one(TypeSig::nullable(list_of(TypeSig::nullable(TypeSig::nullable(TypeSig::Builtin(Builtin::Int32))))));
        assert!(!result.unwrap().category.is_supported());
        assert_eq!(diags.error_count(), 1);
    }

    #[test]
    fn test_unsupported_types_report_owner_and_property() {
        let (result, diags) = classify_one(TypeSig::named("Zoo.Plain"));
        assert!(!result.unwrap().category.is_supported());
        let item = diags.errors().next().unwrap();
        assert_eq!(item.code, DiagnosticCode::UnsupportedPropertyType);
        assert!(item.message.contains("Zoo.Dog.P"));

        let (result, _) = classify_one(TypeSig::Builtin(Builtin::DateTime));
        assert!(!result.unwrap().category.is_supported());
    }

    #[test]
    fn test_dictionary_requires_string_keys() {
        let map = |key| {
            TypeSig::generic(
                wellknown::runtime_type(wellknown::MAP),
                vec![key, TypeSig::Builtin(Builtin::Int32)],
            )
        };
        let (ok, _) = classify_one(map(TypeSig::Builtin(Builtin::String)));
        assert!(ok.unwrap().category.is_collection());
        let (bad, diags) = classify_one(map(TypeSig::Builtin(Builtin::Int32)));
        assert!(!bad.unwrap().category.is_supported());
        assert!(diags.has_errors());
    }

    #[test]
    fn test_ignored_and_static_are_excluded() {
        let mut ignored = prop("Cache", TypeSig::Builtin(Builtin::Object));
        ignored.annotations.push(Annotation::Ignore);
        let mut stat = prop("Count", TypeSig::Builtin(Builtin::Int32));
        stat.is_static = true;
        let resolver = zoo(vec![ignored, stat, prop("Name", TypeSig::Builtin(Builtin::String))]);
        let analyzer = TypeGraphAnalyzer::new(&resolver);
        let owner = resolver.resolve_local("Zoo.Dog").unwrap();
        let mut diags = Diagnostics::new();

        let classified = PropertyClassifier::new(&analyzer).classify_all(&owner, &mut diags);
        assert_eq!(classified.len(), 1);
        assert_eq!(classified[0].0, 2);
        assert!(diags.is_empty());
    }

    #[test]
    fn test_query_with_backlink() {
        let mut owners = prop(
            "Owners",
            TypeSig::generic(wellknown::runtime_type(wellknown::QUERY), vec![TypeSig::named("Zoo.Dog")]),
        );
        owners.annotations.push(Annotation::Backlink("Friend".into()));
        let resolver = zoo(vec![owners]);
        let analyzer = TypeGraphAnalyzer::new(&resolver);
        let owner = resolver.resolve_local("Zoo.Dog").unwrap();
        let mut diags = Diagnostics::new();

        let classified = PropertyClassifier::new(&analyzer)
            .classify(&owner, &owner.def().properties[0], &mut diags)
            .unwrap();
        match classified.category {
            StorageCategory::Backlink { inverse, .. } => assert_eq!(inverse, "Friend"),
            other => panic!("expected Backlink, got {:?}", other),
        }
    }
}
