//! Module IR
//!
//! The compiled form the weaver reads and writes. A module is a set of type
//! declarations whose accessor bodies are flat sequences of stack-machine
//! instructions; it round-trips through JSON (`*.module.json`).
//!
//! ```text
//! Module
//! ├── references  (dependency modules, optional version requirement)
//! └── types
//!     ├── base / interfaces   (TypeRef, possibly into a dependency)
//!     ├── fields              (backing storage)
//!     ├── properties          (getter/setter bodies + annotations)
//!     └── methods             (helpers emitted by the weaver)
//! ```

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::{Result, WeaveError};

// =============================================================================
// Module
// =============================================================================

/// A compiled module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    /// Module name, used as the resolution key by dependents
    pub name: String,
    /// Module version, matched against `ModuleReference::version`
    pub version: Version,
    /// Modules this one depends on
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<ModuleReference>,
    /// Declared types, in declaration order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<TypeDef>,
}

impl Module {
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
            references: Vec::new(),
            types: Vec::new(),
        }
    }

    /// Load a module from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| WeaveError::ModuleRead {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| WeaveError::ModuleFormat {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Serialize to JSON
    pub fn to_json(&self, pretty: bool) -> Result<String> {
        let json = if pretty {
            serde_json::to_string_pretty(self)?
        } else {
            serde_json::to_string(self)?
        };
        Ok(json)
    }

    /// Find a type declared in this module
    pub fn find_type(&self, name: &str) -> Option<&TypeDef> {
        self.types.iter().find(|t| t.name == name)
    }

    /// Index of a type declared in this module
    pub fn type_index(&self, name: &str) -> Option<usize> {
        self.types.iter().position(|t| t.name == name)
    }

    /// Reference entry for a dependency, if declared
    pub fn reference(&self, name: &str) -> Option<&ModuleReference> {
        self.references.iter().find(|r| r.name == name)
    }
}

/// Dependency declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleReference {
    pub name: String,
    /// Acceptable versions; any version when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<VersionReq>,
}

// =============================================================================
// Type references and signatures
// =============================================================================

/// Reference to a type, possibly declared in another module
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeRef {
    /// Declaring module; `None` means the referencing module
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    /// Qualified type name, e.g. `Zoo.Dog`
    pub name: String,
}

impl TypeRef {
    pub fn local(name: impl Into<String>) -> Self {
        Self { module: None, name: name.into() }
    }

    pub fn external(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self { module: Some(module.into()), name: name.into() }
    }

    /// Declaring module name, given the module the reference appears in
    pub fn module_or<'a>(&'a self, current: &'a str) -> &'a str {
        self.module.as_deref().unwrap_or(current)
    }

    /// Identity key (`module::name`) used by caches
    pub fn identity(&self, current: &str) -> String {
        format!("{}::{}", self.module_or(current), self.name)
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.module {
            Some(module) => write!(f, "[{}]{}", module, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Built-in types understood without resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Builtin {
    Bool,
    Char,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Float32,
    Float64,
    String,
    Binary,
    DateTimeOffset,
    DateTime,
    Decimal,
    Decimal128,
    Object,
}

/// Declared type of a field or property
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeSig {
    Builtin(Builtin),
    Named(TypeRef),
    Nullable(Box<TypeSig>),
    Generic { definition: TypeRef, args: Vec<TypeSig> },
    Array(Box<TypeSig>),
}

impl TypeSig {
    pub fn nullable(inner: TypeSig) -> Self {
        TypeSig::Nullable(Box::new(inner))
    }

    pub fn named(name: impl Into<String>) -> Self {
        TypeSig::Named(TypeRef::local(name))
    }

    pub fn generic(definition: TypeRef, args: Vec<TypeSig>) -> Self {
        TypeSig::Generic { definition, args }
    }
}

impl fmt::Display for TypeSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSig::Builtin(b) => write!(f, "{:?}", b),
            TypeSig::Named(r) => write!(f, "{}", r),
            TypeSig::Nullable(inner) => write!(f, "{}?", inner),
            TypeSig::Generic { definition, args } => {
                write!(f, "{}<", definition.name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ">")
            }
            TypeSig::Array(inner) => write!(f, "{}[]", inner),
        }
    }
}

// =============================================================================
// Declarations
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    #[default]
    Class,
    Interface,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Public,
    Protected,
    Internal,
    Private,
}

/// Declarative annotations recognized by the weaver
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Annotation {
    /// Exclude the property from weaving entirely
    Ignore,
    PrimaryKey,
    Indexed,
    Required,
    /// Persist under a different column (property) or table (type) name
    MapTo(String),
    /// Inverse property name on the target type
    Backlink(String),
    /// Type is excluded from the default schema set
    Explicit,
    /// Type has been woven; names its helper
    Woven { helper: String },
    /// Property has been woven; names its backing field
    WovenProperty { backing_field: String },
}

/// A type declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDef {
    pub name: String,
    #[serde(default)]
    pub kind: TypeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<TypeRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<TypeRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<PropertyDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<MethodDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
}

impl TypeDef {
    pub fn class(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: TypeKind::Class,
            base: None,
            interfaces: Vec::new(),
            fields: Vec::new(),
            properties: Vec::new(),
            methods: Vec::new(),
            annotations: Vec::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDef> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn method(&self, name: &str) -> Option<&MethodDef> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// Helper recorded by a previous weave
    pub fn woven_helper(&self) -> Option<&str> {
        self.annotations.iter().find_map(|a| match a {
            Annotation::Woven { helper } => Some(helper.as_str()),
            _ => None,
        })
    }

    /// Table name override
    pub fn mapped_name(&self) -> Option<&str> {
        self.annotations.iter().find_map(|a| match a {
            Annotation::MapTo(name) => Some(name.as_str()),
            _ => None,
        })
    }

    pub fn is_explicit(&self) -> bool {
        self.annotations.contains(&Annotation::Explicit)
    }
}

/// A field declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub ty: TypeSig,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_static: bool,
}

/// A property declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDef {
    pub name: String,
    pub ty: TypeSig,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_static: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub getter: Option<AccessorDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setter: Option<AccessorDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
}

impl PropertyDef {
    pub fn has(&self, annotation: &Annotation) -> bool {
        self.annotations.contains(annotation)
    }

    pub fn mapped_name(&self) -> Option<&str> {
        self.annotations.iter().find_map(|a| match a {
            Annotation::MapTo(name) => Some(name.as_str()),
            _ => None,
        })
    }

    pub fn backlink_inverse(&self) -> Option<&str> {
        self.annotations.iter().find_map(|a| match a {
            Annotation::Backlink(inverse) => Some(inverse.as_str()),
            _ => None,
        })
    }

    /// Backing field recorded by a previous weave
    pub fn woven_backing_field(&self) -> Option<&str> {
        self.annotations.iter().find_map(|a| match a {
            Annotation::WovenProperty { backing_field } => Some(backing_field.as_str()),
            _ => None,
        })
    }

    pub fn has_public_setter(&self) -> bool {
        self.setter
            .as_ref()
            .map(|s| s.visibility == Visibility::Public)
            .unwrap_or(false)
    }

    /// Runtime name of the getter method
    pub fn getter_name(&self) -> String {
        format!("get_{}", self.name)
    }

    /// Runtime name of the setter method
    pub fn setter_name(&self) -> String {
        format!("set_{}", self.name)
    }
}

/// Getter or setter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessorDef {
    #[serde(default)]
    pub visibility: Visibility,
    pub body: MethodBody,
}

impl AccessorDef {
    pub fn public(body: MethodBody) -> Self {
        Self { visibility: Visibility::Public, body }
    }
}

/// A plain method (helpers)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_static: bool,
    pub body: MethodBody,
}

// =============================================================================
// Method bodies
// =============================================================================

/// Branch target identifier, local to one body
pub type Label = u32;

/// Instruction sequence plus debug line mapping
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MethodBody {
    pub instructions: Vec<Instruction>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sequence_points: Vec<SequencePoint>,
}

impl MethodBody {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self { instructions, sequence_points: Vec::new() }
    }

    /// `return this.field`
    pub fn auto_getter(field: &str) -> Self {
        Self::new(vec![
            Instruction::LoadSelf,
            Instruction::LoadField(field.to_string()),
            Instruction::Return,
        ])
    }

    /// `this.field = value`
    pub fn auto_setter(field: &str) -> Self {
        Self::new(vec![
            Instruction::LoadSelf,
            Instruction::LoadValue,
            Instruction::StoreField(field.to_string()),
            Instruction::Return,
        ])
    }

    pub fn with_sequence_point(mut self, point: SequencePoint) -> Self {
        self.sequence_points.push(point);
        self
    }

    /// Largest label used, so rewrites can allocate fresh ones
    pub fn max_label(&self) -> Option<Label> {
        self.labels().max()
    }

    /// Every label defined or targeted in the body
    pub fn labels(&self) -> impl Iterator<Item = Label> + '_ {
        self.instructions.iter().filter_map(|i| match i {
            Instruction::Label(l) | Instruction::Branch(l) | Instruction::BranchIfFalse(l) => Some(*l),
            _ => None,
        })
    }
}

/// Source position attached to an instruction offset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencePoint {
    pub offset: usize,
    pub document: String,
    pub line: u32,
    #[serde(default)]
    pub column: u32,
}

/// Constant operand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Constant {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

/// Method reference for `call`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodRef {
    pub declaring_type: TypeRef,
    pub name: String,
}

impl MethodRef {
    pub fn new(declaring_type: TypeRef, name: impl Into<String>) -> Self {
        Self { declaring_type, name: name.into() }
    }
}

/// Operation on the runtime object accessor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessorOp {
    Get,
    Set,
    SetUnique,
    GetList,
    GetSet,
    GetDictionary,
    GetBacklinks,
}

/// `accessor` operand: the operation and the schema field it targets
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessorCall {
    pub op: AccessorOp,
    pub property: String,
}

/// Stack-machine instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Instruction {
    Nop,
    /// Push the receiver
    LoadSelf,
    /// Push the setter's incoming value
    LoadValue,
    /// Pop receiver, push its field
    LoadField(String),
    /// Pop value and receiver, store the field
    StoreField(String),
    LoadConst(Constant),
    Call(MethodRef),
    /// Pop (value, for set ops) and accessor, push result for get ops
    Accessor(AccessorCall),
    NewObject(TypeRef),
    Branch(Label),
    /// Pop a bool, jump when false
    BranchIfFalse(Label),
    Label(Label),
    Pop,
    Dup,
    Return,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_wire_format() {
        let body = MethodBody::auto_getter("<Name>k__BackingField");
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "instructions": ["load_self", {"load_field": "<Name>k__BackingField"}, "return"]
            })
        );
    }

    #[test]
    fn test_annotation_wire_format() {
        let json = serde_json::to_value(vec![
            Annotation::PrimaryKey,
            Annotation::MapTo("name".into()),
        ])
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!([{"kind": "primary_key"}, {"kind": "map_to", "value": "name"}])
        );
    }

    #[test]
    fn test_type_sig_parses_nested_generic() {
        let sig: TypeSig = serde_json::from_value(serde_json::json!({
            "generic": {
                "definition": {"module": "model-weaver-runtime", "name": "Weaver.Runtime.List`1"},
                "args": [{"nullable": {"builtin": "int32"}}]
            }
        }))
        .unwrap();
        assert_eq!(sig.to_string(), "Weaver.Runtime.List`1<Int32?>");
    }

    #[test]
    fn test_type_ref_identity() {
        assert_eq!(TypeRef::local("Zoo.Dog").identity("Zoo"), "Zoo::Zoo.Dog");
        assert_eq!(TypeRef::external("Core", "Core.Base").identity("Zoo"), "Core::Core.Base");
    }

    #[test]
    fn test_max_label() {
        let body = MethodBody::new(vec![
            Instruction::BranchIfFalse(3),
            Instruction::Label(3),
            Instruction::Branch(7),
        ]);
        assert_eq!(body.max_label(), Some(7));
        assert_eq!(MethodBody::auto_getter("f").max_label(), None);
    }
}
