//! Reference executor
//!
//! A small interpreter for module IR bodies. It exists to check what a
//! woven module *does*: that unmanaged instances keep field semantics, that
//! managed instances go through their accessor, and that primary keys are
//! written with `set_unique`.
//!
//! Instances live on a heap addressed by `ObjectId`. An instance is managed
//! once an `ObjectAccessor` is attached to it.

use chrono::{DateTime, FixedOffset};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

use crate::graph::CollectionKind;
use crate::module::{
    AccessorOp, Constant, Instruction, Label, MethodBody, MethodDef, Module, PropertyDef, TypeDef,
};
use crate::wellknown;

/// Upper bound on executed instructions per call
const STEP_LIMIT: usize = 10_000;

pub type ObjectId = usize;
pub type AccessorId = usize;

/// Runtime value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Char(char),
    String(String),
    Bytes(Vec<u8>),
    Date(DateTime<FixedOffset>),
    Decimal { mantissa: i128, scale: u32 },
    Object(ObjectId),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// Handle to an attached or free-standing accessor
    Accessor(AccessorId),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Char(_) => "char",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Date(_) => "date",
            Value::Decimal { .. } => "decimal",
            Value::Object(_) => "object",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Accessor(_) => "accessor",
        }
    }
}

impl From<&Constant> for Value {
    fn from(constant: &Constant) -> Self {
        match constant {
            Constant::Null => Value::Null,
            Constant::Bool(b) => Value::Bool(*b),
            Constant::Int(i) => Value::Int(*i),
            Constant::Float(f) => Value::Float(*f),
            Constant::String(s) => Value::String(s.clone()),
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Failures reported by an accessor
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AccessError {
    #[error("Primary key '{property}' cannot be changed once set")]
    PrimaryKeyChanged { property: String },
}

/// Failures while interpreting a body
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecError {
    #[error("Stack underflow")]
    StackUnderflow,

    #[error("Expected {expected}, found {found}")]
    TypeMismatch { expected: &'static str, found: &'static str },

    #[error("Unknown label {0}")]
    UnknownLabel(Label),

    #[error("Unknown type: {0}")]
    UnknownType(String),

    #[error("Type '{type_name}' has no member '{member}'")]
    UnknownMember { type_name: String, member: String },

    #[error("No receiver in a static context")]
    NoReceiver,

    #[error("No incoming value outside a setter")]
    NoValue,

    #[error("Object {0} is not managed")]
    NotManaged(ObjectId),

    #[error("No accessor factory configured")]
    NoAccessorFactory,

    #[error("Accessor for '{found}' cannot manage an instance stored in '{expected}'")]
    SchemaMismatch { expected: String, found: String },

    #[error("Step limit exceeded")]
    StepLimit,

    #[error(transparent)]
    Access(#[from] AccessError),
}

pub type ExecResult<T> = std::result::Result<T, ExecError>;

// =============================================================================
// Accessors
// =============================================================================

/// Storage-side view of one managed object, keyed by column name
pub trait ObjectAccessor {
    /// Table the accessor reads and writes
    fn schema(&self) -> &str;
    fn get(&self, name: &str) -> Result<Value, AccessError>;
    fn set(&mut self, name: &str, value: Value) -> Result<(), AccessError>;
    /// Set a primary key; changing an existing key is rejected
    fn set_unique(&mut self, name: &str, value: Value) -> Result<(), AccessError>;
    fn get_collection(&self, name: &str, kind: CollectionKind) -> Result<Value, AccessError>;
    fn get_backlinks(&self, name: &str) -> Result<Value, AccessError>;
}

/// Creates accessors for a schema, the runtime side of `CreateForSchema`
pub trait AccessorFactory {
    fn create(&self, schema: &str) -> Box<dyn ObjectAccessor>;
}

/// In-memory accessor
#[derive(Debug, Clone, Default)]
pub struct MemoryAccessor {
    schema: String,
    values: HashMap<String, Value>,
}

impl MemoryAccessor {
    pub fn new(schema: impl Into<String>) -> Self {
        Self { schema: schema.into(), values: HashMap::new() }
    }

    /// Seed a stored value, as if loaded from storage
    pub fn with_value(mut self, name: impl Into<String>, value: Value) -> Self {
        self.values.insert(name.into(), value);
        self
    }
}

impl ObjectAccessor for MemoryAccessor {
    fn schema(&self) -> &str {
        &self.schema
    }

    fn get(&self, name: &str) -> Result<Value, AccessError> {
        Ok(self.values.get(name).cloned().unwrap_or(Value::Null))
    }

    fn set(&mut self, name: &str, value: Value) -> Result<(), AccessError> {
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    fn set_unique(&mut self, name: &str, value: Value) -> Result<(), AccessError> {
        match self.values.get(name) {
            Some(existing) if *existing != Value::Null && *existing != value => {
                Err(AccessError::PrimaryKeyChanged { property: name.to_string() })
            }
            _ => {
                self.values.insert(name.to_string(), value);
                Ok(())
            }
        }
    }

    fn get_collection(&self, name: &str, kind: CollectionKind) -> Result<Value, AccessError> {
        Ok(self.values.get(name).cloned().unwrap_or(match kind {
            CollectionKind::Dictionary => Value::Map(BTreeMap::new()),
            CollectionKind::List | CollectionKind::Set => Value::List(Vec::new()),
        }))
    }

    fn get_backlinks(&self, name: &str) -> Result<Value, AccessError> {
        Ok(self.values.get(name).cloned().unwrap_or(Value::List(Vec::new())))
    }
}

/// Factory handing out empty `MemoryAccessor`s
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryAccessorFactory;

impl AccessorFactory for MemoryAccessorFactory {
    fn create(&self, schema: &str) -> Box<dyn ObjectAccessor> {
        Box::new(MemoryAccessor::new(schema))
    }
}

// =============================================================================
// Machine
// =============================================================================

#[derive(Debug, Clone)]
struct Instance {
    type_name: String,
    fields: HashMap<String, Value>,
    accessor: Option<AccessorId>,
}

/// Interpreter over one module
pub struct Machine<'m> {
    module: &'m Module,
    heap: Vec<Instance>,
    accessors: Vec<Box<dyn ObjectAccessor>>,
    factory: Option<Box<dyn AccessorFactory>>,
}

impl<'m> Machine<'m> {
    pub fn new(module: &'m Module) -> Self {
        Self {
            module,
            heap: Vec::new(),
            accessors: Vec::new(),
            factory: None,
        }
    }

    pub fn with_factory(mut self, factory: Box<dyn AccessorFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Allocate an unmanaged instance
    pub fn new_object(&mut self, type_name: &str) -> ExecResult<ObjectId> {
        self.type_def(type_name)?;
        self.heap.push(Instance {
            type_name: type_name.to_string(),
            fields: HashMap::new(),
            accessor: None,
        });
        Ok(self.heap.len() - 1)
    }

    /// Register an accessor not yet attached to an instance
    pub fn add_accessor(&mut self, accessor: Box<dyn ObjectAccessor>) -> AccessorId {
        self.accessors.push(accessor);
        self.accessors.len() - 1
    }

    /// Make an instance managed
    pub fn attach(&mut self, object: ObjectId, accessor: Box<dyn ObjectAccessor>) -> ExecResult<AccessorId> {
        let id = self.add_accessor(accessor);
        self.attach_existing(object, id)?;
        Ok(id)
    }

    /// Make an instance managed by a registered accessor of its own table
    pub fn attach_existing(&mut self, object: ObjectId, accessor: AccessorId) -> ExecResult<()> {
        let schema = self
            .accessors
            .get(accessor)
            .ok_or(ExecError::TypeMismatch { expected: "accessor", found: "null" })?
            .schema();
        let def = self.type_def(&self.instance(object)?.type_name)?;
        let expected = def.mapped_name().unwrap_or(&def.name);
        if schema != expected {
            return Err(ExecError::SchemaMismatch { expected: expected.to_string(), found: schema.to_string() });
        }
        self.instance_mut(object)?.accessor = Some(accessor);
        Ok(())
    }

    pub fn is_managed(&self, object: ObjectId) -> ExecResult<bool> {
        Ok(self.instance(object)?.accessor.is_some())
    }

    /// Raw field value, bypassing accessors
    pub fn field(&self, object: ObjectId, field: &str) -> ExecResult<Value> {
        Ok(self.instance(object)?.fields.get(field).cloned().unwrap_or(Value::Null))
    }

    pub fn accessor(&self, id: AccessorId) -> Option<&dyn ObjectAccessor> {
        self.accessors.get(id).map(|a| &**a)
    }

    /// Run a property getter
    pub fn get_property(&mut self, object: ObjectId, property: &str) -> ExecResult<Value> {
        let body = &self.accessor_def(object, property, true)?.body;
        self.run(body, Some(Value::Object(object)), None)
    }

    /// Run a property setter
    pub fn set_property(&mut self, object: ObjectId, property: &str, value: Value) -> ExecResult<()> {
        let body = &self.accessor_def(object, property, false)?.body;
        self.run(body, Some(Value::Object(object)), Some(value))?;
        Ok(())
    }

    /// Run a static method; `argument` is what `load_value` pushes
    pub fn call_static(&mut self, type_name: &str, method: &str, argument: Option<Value>) -> ExecResult<Value> {
        let def = self.method_def(type_name, method)?;
        self.run(&def.body, None, argument)
    }

    fn instance(&self, object: ObjectId) -> ExecResult<&Instance> {
        self.heap
            .get(object)
            .ok_or(ExecError::TypeMismatch { expected: "object", found: "null" })
    }

    fn instance_mut(&mut self, object: ObjectId) -> ExecResult<&mut Instance> {
        self.heap
            .get_mut(object)
            .ok_or(ExecError::TypeMismatch { expected: "object", found: "null" })
    }

    fn type_def(&self, type_name: &str) -> ExecResult<&'m TypeDef> {
        self.module
            .find_type(type_name)
            .ok_or_else(|| ExecError::UnknownType(type_name.to_string()))
    }

    /// Find a property on the instance's type or its local bases
    fn property_def(&self, object: ObjectId, property: &str) -> ExecResult<&'m PropertyDef> {
        let type_name = &self.instance(object)?.type_name;
        let mut current = Some(self.type_def(type_name)?);
        while let Some(def) = current {
            if let Some(prop) = def.property(property) {
                return Ok(prop);
            }
            current = def
                .base
                .as_ref()
                .filter(|b| b.module.as_deref().map_or(true, |m| m == self.module.name))
                .and_then(|b| self.module.find_type(&b.name));
        }
        Err(ExecError::UnknownMember { type_name: type_name.clone(), member: property.to_string() })
    }

    fn accessor_def(&self, object: ObjectId, property: &str, getter: bool) -> ExecResult<&'m crate::module::AccessorDef> {
        let prop = self.property_def(object, property)?;
        let accessor = if getter { prop.getter.as_ref() } else { prop.setter.as_ref() };
        accessor.ok_or_else(|| ExecError::UnknownMember {
            type_name: self.heap[object].type_name.clone(),
            member: if getter { prop.getter_name() } else { prop.setter_name() },
        })
    }

    fn method_def(&self, type_name: &str, method: &str) -> ExecResult<&'m MethodDef> {
        self.type_def(type_name)?.method(method).ok_or_else(|| ExecError::UnknownMember {
            type_name: type_name.to_string(),
            member: method.to_string(),
        })
    }

    fn run(&mut self, body: &MethodBody, this: Option<Value>, value: Option<Value>) -> ExecResult<Value> {
        let labels: HashMap<Label, usize> = body
            .instructions
            .iter()
            .enumerate()
            .filter_map(|(pc, i)| match i {
                Instruction::Label(l) => Some((*l, pc)),
                _ => None,
            })
            .collect();
        let jump = |label: &Label| labels.get(label).copied().ok_or(ExecError::UnknownLabel(*label));

        let mut stack: Vec<Value> = Vec::new();
        let mut pc = 0;
        let mut steps = 0;

        while pc < body.instructions.len() {
            steps += 1;
            if steps > STEP_LIMIT {
                return Err(ExecError::StepLimit);
            }

            let instruction = &body.instructions[pc];
            pc += 1;
            match instruction {
                Instruction::Nop | Instruction::Label(_) => {}
                Instruction::LoadSelf => stack.push(this.clone().ok_or(ExecError::NoReceiver)?),
                Instruction::LoadValue => stack.push(value.clone().ok_or(ExecError::NoValue)?),
                Instruction::LoadField(field) => {
                    let object = pop_object(&mut stack)?;
                    stack.push(self.field(object, field)?);
                }
                Instruction::StoreField(field) => {
                    let v = pop(&mut stack)?;
                    let object = pop_object(&mut stack)?;
                    self.instance_mut(object)?.fields.insert(field.clone(), v);
                }
                Instruction::LoadConst(constant) => stack.push(Value::from(constant)),
                Instruction::Call(method) => {
                    if let Some(result) = self.call(&method.declaring_type.name, &method.name, &mut stack)? {
                        stack.push(result);
                    }
                }
                Instruction::Accessor(call) => {
                    if let Some(result) = self.access(call.op, &call.property, &mut stack)? {
                        stack.push(result);
                    }
                }
                Instruction::NewObject(type_ref) => {
                    let object = self.new_object(&type_ref.name)?;
                    stack.push(Value::Object(object));
                }
                Instruction::Branch(label) => pc = jump(label)?,
                Instruction::BranchIfFalse(label) => match pop(&mut stack)? {
                    Value::Bool(true) => {}
                    Value::Bool(false) => pc = jump(label)?,
                    other => return Err(ExecError::TypeMismatch { expected: "bool", found: other.kind() }),
                },
                Instruction::Pop => {
                    pop(&mut stack)?;
                }
                Instruction::Dup => {
                    let top = stack.last().cloned().ok_or(ExecError::StackUnderflow)?;
                    stack.push(top);
                }
                Instruction::Return => return Ok(stack.pop().unwrap_or(Value::Null)),
            }
        }

        Ok(Value::Null)
    }

    /// Runtime intrinsics, then property accessors, then declared methods
    fn call(&mut self, declaring_type: &str, name: &str, stack: &mut Vec<Value>) -> ExecResult<Option<Value>> {
        match name {
            wellknown::IS_MANAGED => {
                let object = pop_object(stack)?;
                Ok(Some(Value::Bool(self.is_managed(object)?)))
            }
            wellknown::GET_ACCESSOR => {
                let object = pop_object(stack)?;
                let accessor = self.instance(object)?.accessor.ok_or(ExecError::NotManaged(object))?;
                Ok(Some(Value::Accessor(accessor)))
            }
            wellknown::CREATE_FOR_SCHEMA => {
                let schema = match pop(stack)? {
                    Value::String(s) => s,
                    other => return Err(ExecError::TypeMismatch { expected: "string", found: other.kind() }),
                };
                let accessor = self.factory.as_ref().ok_or(ExecError::NoAccessorFactory)?.create(&schema);
                Ok(Some(Value::Accessor(self.add_accessor(accessor))))
            }
            _ => {
                if let Some(property) = name.strip_prefix("get_") {
                    let object = pop_object(stack)?;
                    return self.get_property(object, property).map(Some);
                }
                if let Some(property) = name.strip_prefix("set_") {
                    let v = pop(stack)?;
                    let object = pop_object(stack)?;
                    self.set_property(object, property, v)?;
                    return Ok(None);
                }
                let def = self.method_def(declaring_type, name)?;
                let this = if def.is_static { None } else { Some(Value::Object(pop_object(stack)?)) };
                self.run(&def.body, this, None).map(Some)
            }
        }
    }

    fn access(&mut self, op: AccessorOp, property: &str, stack: &mut Vec<Value>) -> ExecResult<Option<Value>> {
        let incoming = match op {
            AccessorOp::Set | AccessorOp::SetUnique => Some(pop(stack)?),
            _ => None,
        };
        let id = match pop(stack)? {
            Value::Accessor(id) => id,
            other => return Err(ExecError::TypeMismatch { expected: "accessor", found: other.kind() }),
        };
        let accessor = self
            .accessors
            .get_mut(id)
            .ok_or(ExecError::TypeMismatch { expected: "accessor", found: "null" })?;

        let result = match (op, incoming) {
            (AccessorOp::Get, _) => Some(accessor.get(property)?),
            (AccessorOp::GetList, _) => Some(accessor.get_collection(property, CollectionKind::List)?),
            (AccessorOp::GetSet, _) => Some(accessor.get_collection(property, CollectionKind::Set)?),
            (AccessorOp::GetDictionary, _) => Some(accessor.get_collection(property, CollectionKind::Dictionary)?),
            (AccessorOp::GetBacklinks, _) => Some(accessor.get_backlinks(property)?),
            (AccessorOp::Set, Some(v)) => {
                accessor.set(property, v)?;
                None
            }
            (AccessorOp::SetUnique, Some(v)) => {
                accessor.set_unique(property, v)?;
                None
            }
            (AccessorOp::Set | AccessorOp::SetUnique, None) => return Err(ExecError::StackUnderflow),
        };
        Ok(result)
    }
}

fn pop(stack: &mut Vec<Value>) -> ExecResult<Value> {
    stack.pop().ok_or(ExecError::StackUnderflow)
}

fn pop_object(stack: &mut Vec<Value>) -> ExecResult<ObjectId> {
    match pop(stack)? {
        Value::Object(id) => Ok(id),
        other => Err(ExecError::TypeMismatch { expected: "object", found: other.kind() }),
    }
}
