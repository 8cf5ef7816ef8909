//! Type Graph
//!
//! Decides which declarations in a module are persistable, and in which
//! flavour, by walking base types across module boundaries until a root
//! marker is reached.
//!
//! This module is shared between:
//! - The weave pipeline (codegen)
//! - The `graph` and `schema` CLI commands
//!
//! Both consume the same analyzer so classification is consistent.

pub mod loader;
pub mod classify;
pub mod diagnostics;

pub use loader::{LoadConfig, ModuleResolver, ResolvedType};
pub use classify::{
    Classified, CollectionKind, PrimitiveKind, PropertyClassifier, StorageCategory, TargetType,
};
pub use diagnostics::{DiagnosticCode, DiagnosticItem, Diagnostics, Location, Severity};

use petgraph::dot::{Config, Dot};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::debug;

use crate::module::TypeKind;
use crate::wellknown;

// =============================================================================
// Variant
// =============================================================================

/// Persistable flavour of a type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    /// Not persistable
    None,
    /// Top-level object with its own table
    Standard,
    /// Owned by exactly one parent, no identity of its own
    Embedded,
    /// Write-only, never read back or linked
    Asymmetric,
}

impl Variant {
    pub fn is_persistable(&self) -> bool {
        !matches!(self, Variant::None)
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::None => write!(f, "none"),
            Variant::Standard => write!(f, "standard"),
            Variant::Embedded => write!(f, "embedded"),
            Variant::Asymmetric => write!(f, "asymmetric"),
        }
    }
}

// =============================================================================
// Hierarchy graph
// =============================================================================

/// Derived -> base edges discovered while classifying
#[derive(Debug, Default)]
struct HierarchyGraph {
    graph: DiGraph<String, ()>,
    nodes: HashMap<String, NodeIndex>,
}

impl HierarchyGraph {
    fn node(&mut self, identity: &str) -> NodeIndex {
        if let Some(&idx) = self.nodes.get(identity) {
            return idx;
        }
        let idx = self.graph.add_node(identity.to_string());
        self.nodes.insert(identity.to_string(), idx);
        idx
    }

    fn add_edge(&mut self, derived: &str, base: &str) {
        let from = self.node(derived);
        let to = self.node(base);
        if self.graph.find_edge(from, to).is_none() {
            self.graph.add_edge(from, to, ());
        }
    }
}

// =============================================================================
// TypeGraphAnalyzer
// =============================================================================

/// Classifies types by their base-type chain
pub struct TypeGraphAnalyzer<'r> {
    resolver: &'r ModuleResolver,
    /// Variant per type identity (`module::name`)
    cache: RefCell<HashMap<String, Variant>>,
    hierarchy: RefCell<HierarchyGraph>,
    diagnostics: RefCell<Diagnostics>,
}

impl<'r> TypeGraphAnalyzer<'r> {
    pub fn new(resolver: &'r ModuleResolver) -> Self {
        Self {
            resolver,
            cache: RefCell::new(HashMap::new()),
            hierarchy: RefCell::new(HierarchyGraph::default()),
            diagnostics: RefCell::new(Diagnostics::new()),
        }
    }

    pub fn resolver(&self) -> &'r ModuleResolver {
        self.resolver
    }

    /// Classify a resolved type.
    ///
    /// Declared capability interfaces win; otherwise the base chain is walked
    /// until a root marker (persistable) or an unresolvable / missing base
    /// (not persistable). Every type on the walked chain is cached.
    pub fn classify(&self, ty: &ResolvedType) -> Variant {
        if let Some(&variant) = self.cache.borrow().get(&ty.identity()) {
            return variant;
        }

        let mut chain: Vec<String> = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut current = ty.clone();

        let variant = loop {
            let identity = current.identity();
            if let Some(&variant) = self.cache.borrow().get(&identity) {
                break variant;
            }
            if !visited.insert(identity.clone()) {
                self.diagnostics.borrow_mut().on_type(
                    &ty.def().name,
                    DiagnosticCode::InheritanceCycle,
                    format!("base-type chain of '{}' loops back on '{}'", ty.def().name, identity),
                );
                break Variant::None;
            }
            chain.push(identity.clone());

            let def = current.def();
            if def.kind == TypeKind::Interface {
                break Variant::None;
            }
            if let Some(variant) = def
                .interfaces
                .iter()
                .find_map(|i| wellknown::root_variant_of(i, current.module_name()))
            {
                break variant;
            }

            let Some(base) = &def.base else {
                break Variant::None;
            };
            let base_identity = base.identity(current.module_name());
            self.hierarchy.borrow_mut().add_edge(&identity, &base_identity);

            if let Some(variant) = wellknown::root_variant_of(base, current.module_name()) {
                break variant;
            }

            match self.resolver.resolve_type(base, &current.module) {
                Some(next) => current = next,
                None => {
                    debug!(type_name = %def.name, base = %base, "base type unresolved, treating as plain");
                    break Variant::None;
                }
            }
        };

        let mut cache = self.cache.borrow_mut();
        for identity in chain {
            cache.insert(identity, variant);
        }
        drop(cache);

        self.record_resolution_failures();
        variant
    }

    /// Classify a type reference appearing in `from`
    pub fn classify_ref(&self, type_ref: &crate::module::TypeRef, from: &crate::module::Module) -> Option<(ResolvedType, Variant)> {
        let resolved = self.resolver.resolve_type(type_ref, from);
        self.record_resolution_failures();
        let resolved = resolved?;
        let variant = self.classify(&resolved);
        Some((resolved, variant))
    }

    /// All classes of the target module with their variant, in declaration order
    pub fn target_types(&self) -> Vec<(ResolvedType, Variant)> {
        let target = self.resolver.target();
        target
            .types
            .iter()
            .filter_map(|t| self.resolver.resolve_local(&t.name))
            .filter(|t| t.def().kind == TypeKind::Class)
            .map(|t| {
                let variant = self.classify(&t);
                (t, variant)
            })
            .collect()
    }

    fn record_resolution_failures(&self) {
        for (module, reason) in self.resolver.take_failures() {
            self.diagnostics.borrow_mut().push(
                DiagnosticItem::new(
                    DiagnosticCode::UnresolvedModule,
                    format!("module '{}' could not be loaded; its types are treated as non-persistable", module),
                )
                .with_context(reason),
            );
        }
    }

    /// Diagnostics produced while walking (cycles, unresolved modules)
    pub fn take_diagnostics(&self) -> Diagnostics {
        std::mem::take(&mut *self.diagnostics.borrow_mut())
    }

    /// Number of types with a cached variant
    pub fn cached_count(&self) -> usize {
        self.cache.borrow().len()
    }

    /// Graphviz rendering of the walked hierarchy
    pub fn to_dot(&self) -> String {
        let hierarchy = self.hierarchy.borrow();
        format!("{:?}", Dot::with_config(&hierarchy.graph, &[Config::EdgeNoLabel]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{Module, TypeDef, TypeRef};
    use semver::Version;

    fn module_with(types: Vec<TypeDef>) -> Module {
        let mut module = Module::new("Zoo", Version::new(1, 0, 0));
        module.types = types;
        module
    }

    fn derived(name: &str, base: TypeRef) -> TypeDef {
        let mut t = TypeDef::class(name);
        t.base = Some(base);
        t
    }

    #[test]
    fn test_classifies_root_variants() {
        let module = module_with(vec![
            derived("Zoo.Dog", wellknown::runtime_type(wellknown::PERSISTENT_OBJECT)),
            derived("Zoo.Collar", wellknown::runtime_type(wellknown::EMBEDDED_OBJECT)),
            derived("Zoo.Visit", wellknown::runtime_type(wellknown::ASYMMETRIC_OBJECT)),
            TypeDef::class("Zoo.Util"),
        ]);
        let resolver = ModuleResolver::new(module, &LoadConfig::default());
        let analyzer = TypeGraphAnalyzer::new(&resolver);

        let variants: Vec<Variant> = analyzer.target_types().into_iter().map(|(_, v)| v).collect();
        assert_eq!(
            variants,
            vec![Variant::Standard, Variant::Embedded, Variant::Asymmetric, Variant::None]
        );
    }

    #[test]
    fn test_walks_local_chain_and_caches_ancestors() {
        let module = module_with(vec![
            derived("Zoo.Poodle", TypeRef::local("Zoo.Dog")),
            derived("Zoo.Dog", TypeRef::local("Zoo.Animal")),
            derived("Zoo.Animal", wellknown::runtime_type(wellknown::PERSISTENT_OBJECT)),
        ]);
        let resolver = ModuleResolver::new(module, &LoadConfig::default());
        let analyzer = TypeGraphAnalyzer::new(&resolver);

        let poodle = resolver.resolve_local("Zoo.Poodle").unwrap();
        assert_eq!(analyzer.classify(&poodle), Variant::Standard);
        assert_eq!(analyzer.cached_count(), 3);
        assert!(analyzer.to_dot().contains("Zoo::Zoo.Animal"));
    }

    #[test]
    fn test_capability_interface_marks_type() {
        let mut t = TypeDef::class("Zoo.Tag");
        t.interfaces.push(wellknown::runtime_type(wellknown::IEMBEDDED_OBJECT));
        let resolver = ModuleResolver::new(module_with(vec![t]), &LoadConfig::default());
        let analyzer = TypeGraphAnalyzer::new(&resolver);

        let tag = resolver.resolve_local("Zoo.Tag").unwrap();
        assert_eq!(analyzer.classify(&tag), Variant::Embedded);
    }

    #[test]
    fn test_unresolvable_base_is_not_persistable() {
        let module = module_with(vec![derived(
            "Zoo.Widget",
            TypeRef::external("Platform.Only", "Platform.Control"),
        )]);
        let resolver = ModuleResolver::new(module, &LoadConfig::default());
        let analyzer = TypeGraphAnalyzer::new(&resolver);

        let widget = resolver.resolve_local("Zoo.Widget").unwrap();
        assert_eq!(analyzer.classify(&widget), Variant::None);

        let diags = analyzer.take_diagnostics();
        assert_eq!(diags.with_code(DiagnosticCode::UnresolvedModule).count(), 1);
        assert!(!diags.has_errors());
    }

    #[test]
    fn test_lookalike_marker_outside_runtime_is_plain() {
        let mut tagged = TypeDef::class("Zoo.Tagged");
        tagged.interfaces.push(TypeRef::external("Zoo.Fakes", wellknown::IPERSISTENT_OBJECT));
        let module = module_with(vec![
            TypeDef::class(wellknown::PERSISTENT_OBJECT),
            derived("Zoo.Fake", TypeRef::local(wellknown::PERSISTENT_OBJECT)),
            tagged,
        ]);
        let resolver = ModuleResolver::new(module, &LoadConfig::default());
        let analyzer = TypeGraphAnalyzer::new(&resolver);

        let fake = resolver.resolve_local("Zoo.Fake").unwrap();
        assert_eq!(analyzer.classify(&fake), Variant::None);
        let tagged = resolver.resolve_local("Zoo.Tagged").unwrap();
        assert_eq!(analyzer.classify(&tagged), Variant::None);
    }

    #[test]
    fn test_inheritance_cycle_terminates() {
        let module = module_with(vec![
            derived("Zoo.A", TypeRef::local("Zoo.B")),
            derived("Zoo.B", TypeRef::local("Zoo.A")),
        ]);
        let resolver = ModuleResolver::new(module, &LoadConfig::default());
        let analyzer = TypeGraphAnalyzer::new(&resolver);

        let a = resolver.resolve_local("Zoo.A").unwrap();
        assert_eq!(analyzer.classify(&a), Variant::None);
        assert_eq!(
            analyzer.take_diagnostics().with_code(DiagnosticCode::InheritanceCycle).count(),
            1
        );
    }
}
