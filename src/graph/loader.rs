//! Module Resolver
//!
//! Loads the module under transformation plus whatever it depends on, and
//! resolves type references across module boundaries. Dependency modules are
//! discovered by walking the configured search paths; the runtime module that
//! declares the root markers is also embedded in the binary as a fallback.
//!
//! All lookups are memoized (modules by name, types by `module::name`), so
//! walking a shared ancestor chain many times costs one resolution.

use include_dir::{include_dir, Dir};
use semver::{Version, VersionReq};
use serde::Deserialize;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{Result, WeaveError};
use crate::module::{Module, TypeDef, TypeRef};
use crate::wellknown;

/// Runtime marker module shipped with the weaver
static RUNTIME_DIR: Dir<'static> = include_dir!("$CARGO_MANIFEST_DIR/runtime");

/// Resolver configuration
#[derive(Debug, Clone)]
pub struct LoadConfig {
    /// Directories searched (recursively) for dependency modules
    pub search_paths: Vec<PathBuf>,
    /// File suffix identifying module files
    pub module_extension: String,
    /// Fall back to the embedded runtime module
    pub embedded_runtime: bool,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            search_paths: Vec::new(),
            module_extension: "module.json".to_string(),
            embedded_runtime: true,
        }
    }
}

/// Just enough of a module file to index it
#[derive(Deserialize)]
struct ModuleHeader {
    name: String,
    version: Version,
}

/// A type declaration together with the module that declares it
#[derive(Debug, Clone)]
pub struct ResolvedType {
    pub module: Rc<Module>,
    pub index: usize,
}

impl ResolvedType {
    pub fn def(&self) -> &TypeDef {
        &self.module.types[self.index]
    }

    pub fn module_name(&self) -> &str {
        &self.module.name
    }

    /// Absolute reference to this type
    pub fn type_ref(&self) -> TypeRef {
        TypeRef::external(self.module.name.clone(), self.def().name.clone())
    }

    /// `module::name`
    pub fn identity(&self) -> String {
        format!("{}::{}", self.module.name, self.def().name)
    }
}

/// Resolves modules and types for one weave invocation
pub struct ModuleResolver {
    target: Rc<Module>,
    /// module name -> (version, file) candidates
    index: HashMap<String, Vec<(Version, PathBuf)>>,
    embedded_runtime: bool,
    modules: RefCell<HashMap<String, Option<Rc<Module>>>>,
    types: RefCell<HashMap<String, Option<ResolvedType>>>,
    /// Modules that failed to load, drained by the analyzer
    failures: RefCell<Vec<(String, String)>>,
}

impl ModuleResolver {
    /// Build a resolver around an already-loaded target module
    pub fn new(target: Module, config: &LoadConfig) -> Self {
        let index = index_search_paths(&config.search_paths, &config.module_extension);
        debug!(
            modules = index.len(),
            paths = config.search_paths.len(),
            "indexed dependency search paths"
        );

        let target = Rc::new(target);
        let mut modules = HashMap::new();
        modules.insert(target.name.clone(), Some(Rc::clone(&target)));

        Self {
            target,
            index,
            embedded_runtime: config.embedded_runtime,
            modules: RefCell::new(modules),
            types: RefCell::new(HashMap::new()),
            failures: RefCell::new(Vec::new()),
        }
    }

    /// Load the target module from disk and build a resolver for it
    pub fn open(module_path: &Path, config: &LoadConfig) -> Result<Self> {
        let target = Module::load(module_path)?;
        info!(module = %target.name, version = %target.version, "loaded target module");
        Ok(Self::new(target, config))
    }

    /// The module under transformation
    pub fn target(&self) -> &Module {
        &self.target
    }

    /// Resolve a module by name, honouring an optional version requirement.
    pub fn resolve_module(&self, name: &str, requirement: Option<&VersionReq>) -> Result<Rc<Module>> {
        if let Some(cached) = self.modules.borrow().get(name) {
            return cached
                .clone()
                .ok_or_else(|| WeaveError::ModuleNotFound { name: name.to_string() });
        }

        let loaded = self.load_module(name, requirement);
        match &loaded {
            Ok(module) => {
                debug!(module = %name, version = %module.version, "resolved dependency");
                self.modules.borrow_mut().insert(name.to_string(), Some(Rc::clone(module)));
            }
            Err(e) => {
                debug!(module = %name, error = %e, "dependency unresolved");
                self.modules.borrow_mut().insert(name.to_string(), None);
                self.failures.borrow_mut().push((name.to_string(), e.to_string()));
            }
        }
        loaded
    }

    fn load_module(&self, name: &str, requirement: Option<&VersionReq>) -> Result<Rc<Module>> {
        let candidate = self.index.get(name).and_then(|candidates| {
            candidates
                .iter()
                .filter(|(version, _)| requirement.map(|r| r.matches(version)).unwrap_or(true))
                .max_by(|a, b| a.0.cmp(&b.0))
        });

        if let Some((_, path)) = candidate {
            return Ok(Rc::new(Module::load(path)?));
        }

        if name == wellknown::RUNTIME_MODULE && self.embedded_runtime {
            return embedded_runtime().map(Rc::new);
        }

        Err(WeaveError::ModuleNotFound { name: name.to_string() })
    }

    /// Resolve a type reference appearing in module `from`.
    ///
    /// Any failure (missing module, missing type) yields `None`; callers treat
    /// that as "unknown, not persistable".
    pub fn resolve_type(&self, type_ref: &TypeRef, from: &Module) -> Option<ResolvedType> {
        let identity = type_ref.identity(&from.name);
        if let Some(cached) = self.types.borrow().get(&identity) {
            return cached.clone();
        }

        let module_name = type_ref.module_or(&from.name);
        let requirement = from.reference(module_name).and_then(|r| r.version.as_ref());
        let resolved = self
            .resolve_module(module_name, requirement)
            .ok()
            .and_then(|module| {
                module
                    .type_index(&type_ref.name)
                    .map(|index| ResolvedType { module, index })
            });

        self.types.borrow_mut().insert(identity, resolved.clone());
        resolved
    }

    /// Resolve a type declared in the target module
    pub fn resolve_local(&self, name: &str) -> Option<ResolvedType> {
        self.target.type_index(name).map(|index| ResolvedType {
            module: Rc::clone(&self.target),
            index,
        })
    }

    /// Check that every root marker type is resolvable.
    ///
    /// Without them no type can be identified as persistable, so this is the
    /// one resolution failure that aborts the run.
    pub fn check_root_markers(&self) -> Result<()> {
        let missing: Vec<String> = wellknown::ROOT_CLASSES
            .iter()
            .filter(|(name, _)| {
                self.resolve_type(&wellknown::runtime_type(name), &self.target)
                    .is_none()
            })
            .map(|(name, _)| name.to_string())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(WeaveError::RootMarkersUnresolved { missing })
        }
    }

    /// Drain recorded module load failures as `(module, reason)`
    pub fn take_failures(&self) -> Vec<(String, String)> {
        std::mem::take(&mut *self.failures.borrow_mut())
    }
}

/// Parse the embedded runtime module
pub fn embedded_runtime() -> Result<Module> {
    let file_name = format!("{}.module.json", wellknown::RUNTIME_MODULE);
    let file = RUNTIME_DIR
        .get_file(&file_name)
        .ok_or_else(|| WeaveError::ModuleNotFound { name: wellknown::RUNTIME_MODULE.to_string() })?;
    let content = file
        .contents_utf8()
        .ok_or_else(|| WeaveError::ModuleNotFound { name: wellknown::RUNTIME_MODULE.to_string() })?;
    serde_json::from_str(content).map_err(|source| WeaveError::ModuleFormat {
        path: PathBuf::from(file_name),
        source,
    })
}

/// Walk search paths and index module files by declared name
fn index_search_paths(paths: &[PathBuf], extension: &str) -> HashMap<String, Vec<(Version, PathBuf)>> {
    let mut index: HashMap<String, Vec<(Version, PathBuf)>> = HashMap::new();

    for root in paths {
        for entry in WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.file_name().to_string_lossy().ends_with(extension))
        {
            let path = entry.path();
            let Ok(content) = std::fs::read_to_string(path) else { continue };
            let Ok(header) = serde_json::from_str::<ModuleHeader>(&content) else {
                debug!(path = %path.display(), "skipping unreadable module file");
                continue;
            };
            index
                .entry(header.name)
                .or_default()
                .push((header.version, path.to_path_buf()));
        }
    }

    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::TypeDef;

    fn write_module(dir: &Path, file: &str, module: &Module) {
        std::fs::write(dir.join(file), module.to_json(true).unwrap()).unwrap();
    }

    #[test]
    fn test_embedded_runtime_declares_root_markers() {
        let runtime = embedded_runtime().unwrap();
        for (name, _) in wellknown::ROOT_CLASSES {
            assert!(runtime.find_type(name).is_some(), "missing {}", name);
        }
    }

    #[test]
    fn test_root_markers_fail_without_runtime() {
        let config = LoadConfig { embedded_runtime: false, ..Default::default() };
        let resolver = ModuleResolver::new(Module::new("Zoo", Version::new(1, 0, 0)), &config);
        match resolver.check_root_markers() {
            Err(WeaveError::RootMarkersUnresolved { missing }) => assert_eq!(missing.len(), 3),
            other => panic!("expected RootMarkersUnresolved, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_resolves_dependency_from_search_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut core = Module::new("Core", Version::new(2, 1, 0));
        core.types.push(TypeDef::class("Core.Animal"));
        write_module(dir.path(), "core.module.json", &core);

        let config = LoadConfig { search_paths: vec![dir.path().to_path_buf()], ..Default::default() };
        let resolver = ModuleResolver::new(Module::new("Zoo", Version::new(1, 0, 0)), &config);

        let resolved = resolver
            .resolve_type(&TypeRef::external("Core", "Core.Animal"), resolver.target())
            .unwrap();
        assert_eq!(resolved.identity(), "Core::Core.Animal");
        assert!(resolver.take_failures().is_empty());
    }

    #[test]
    fn test_version_requirement_picks_highest_match() {
        let dir = tempfile::tempdir().unwrap();
        for (file, minor) in [("a.module.json", 1), ("b.module.json", 4)] {
            let mut core = Module::new("Core", Version::new(1, minor, 0));
            core.types.push(TypeDef::class(format!("Core.V{}", minor)));
            write_module(dir.path(), file, &core);
        }
        let mut target = Module::new("Zoo", Version::new(1, 0, 0));
        target.references.push(crate::module::ModuleReference {
            name: "Core".into(),
            version: Some(VersionReq::parse("<1.3").unwrap()),
        });

        let config = LoadConfig { search_paths: vec![dir.path().to_path_buf()], ..Default::default() };
        let resolver = ModuleResolver::new(target, &config);
        let module = resolver
            .resolve_module("Core", resolver.target().reference("Core").and_then(|r| r.version.as_ref()))
            .unwrap();
        assert_eq!(module.version, Version::new(1, 1, 0));
    }

    #[test]
    fn test_missing_module_is_soft_and_memoized() {
        let resolver = ModuleResolver::new(Module::new("Zoo", Version::new(1, 0, 0)), &LoadConfig::default());
        let missing = TypeRef::external("Platform.Only", "Platform.Widget");

        assert!(resolver.resolve_type(&missing, resolver.target()).is_none());
        assert!(resolver.resolve_type(&missing, resolver.target()).is_none());
        assert_eq!(resolver.take_failures().len(), 1);
    }
}
