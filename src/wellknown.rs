//! Names the weaver recognizes in the runtime module.

use crate::graph::Variant;
use crate::module::{MethodRef, TypeRef};

/// Name of the runtime module that declares the root markers
pub const RUNTIME_MODULE: &str = "model-weaver-runtime";

pub const PERSISTENT_OBJECT: &str = "Weaver.Runtime.PersistentObject";
pub const EMBEDDED_OBJECT: &str = "Weaver.Runtime.EmbeddedObject";
pub const ASYMMETRIC_OBJECT: &str = "Weaver.Runtime.AsymmetricObject";

pub const IPERSISTENT_OBJECT: &str = "Weaver.Runtime.IPersistentObject";
pub const IEMBEDDED_OBJECT: &str = "Weaver.Runtime.IEmbeddedObject";
pub const IASYMMETRIC_OBJECT: &str = "Weaver.Runtime.IAsymmetricObject";

pub const LIST: &str = "Weaver.Runtime.List`1";
pub const SET: &str = "Weaver.Runtime.Set`1";
pub const MAP: &str = "Weaver.Runtime.Map`2";
pub const QUERY: &str = "Weaver.Runtime.Query`1";

pub const ACCESSORS: &str = "Weaver.Runtime.Accessors";

pub const IS_MANAGED: &str = "get_IsManaged";
pub const GET_ACCESSOR: &str = "get_Accessor";
pub const CREATE_FOR_SCHEMA: &str = "CreateForSchema";

/// Base classes that mark a type as persistable
pub const ROOT_CLASSES: [(&str, Variant); 3] = [
    (PERSISTENT_OBJECT, Variant::Standard),
    (EMBEDDED_OBJECT, Variant::Embedded),
    (ASYMMETRIC_OBJECT, Variant::Asymmetric),
];

/// Capability interfaces with the same meaning as the root classes
pub const ROOT_INTERFACES: [(&str, Variant); 3] = [
    (IPERSISTENT_OBJECT, Variant::Standard),
    (IEMBEDDED_OBJECT, Variant::Embedded),
    (IASYMMETRIC_OBJECT, Variant::Asymmetric),
];

/// Variant a root marker name stands for, if it is one
pub fn root_variant(name: &str) -> Option<Variant> {
    ROOT_CLASSES
        .iter()
        .chain(ROOT_INTERFACES.iter())
        .find(|(marker, _)| *marker == name)
        .map(|(_, variant)| *variant)
}

/// Variant of a reference to a root marker declared by the runtime module.
/// `current` is the module the reference appears in.
pub fn root_variant_of(type_ref: &TypeRef, current: &str) -> Option<Variant> {
    if type_ref.module_or(current) != RUNTIME_MODULE {
        return None;
    }
    root_variant(&type_ref.name)
}

pub fn runtime_type(name: &str) -> TypeRef {
    TypeRef::external(RUNTIME_MODULE, name)
}

/// Root class whose members the rewritten accessors call
pub fn root_class(variant: Variant) -> TypeRef {
    let name = match variant {
        Variant::Embedded => EMBEDDED_OBJECT,
        Variant::Asymmetric => ASYMMETRIC_OBJECT,
        Variant::Standard | Variant::None => PERSISTENT_OBJECT,
    };
    runtime_type(name)
}

pub fn is_managed(variant: Variant) -> MethodRef {
    MethodRef::new(root_class(variant), IS_MANAGED)
}

pub fn get_accessor(variant: Variant) -> MethodRef {
    MethodRef::new(root_class(variant), GET_ACCESSOR)
}

pub fn create_for_schema() -> MethodRef {
    MethodRef::new(runtime_type(ACCESSORS), CREATE_FOR_SCHEMA)
}

/// True if `type_ref` names the runtime definition `name`
pub fn is_runtime(type_ref: &TypeRef, name: &str) -> bool {
    type_ref.name == name
        && type_ref
            .module
            .as_deref()
            .map(|m| m == RUNTIME_MODULE)
            .unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_variant_lookup() {
        assert_eq!(root_variant(EMBEDDED_OBJECT), Some(Variant::Embedded));
        assert_eq!(root_variant(IASYMMETRIC_OBJECT), Some(Variant::Asymmetric));
        assert_eq!(root_variant("Zoo.Dog"), None);
    }

    #[test]
    fn test_root_marker_must_come_from_runtime() {
        assert_eq!(root_variant_of(&runtime_type(PERSISTENT_OBJECT), "Zoo"), Some(Variant::Standard));
        assert_eq!(root_variant_of(&TypeRef::local(PERSISTENT_OBJECT), RUNTIME_MODULE), Some(Variant::Standard));
        assert_eq!(root_variant_of(&TypeRef::local(PERSISTENT_OBJECT), "Zoo"), None);
        assert_eq!(root_variant_of(&TypeRef::external("Zoo.Fakes", EMBEDDED_OBJECT), "Zoo"), None);
    }

    #[test]
    fn test_is_runtime_accepts_local_and_runtime_refs() {
        assert!(is_runtime(&runtime_type(LIST), LIST));
        assert!(is_runtime(&TypeRef::local(LIST), LIST));
        assert!(!is_runtime(&TypeRef::external("Other", LIST), LIST));
    }
}
