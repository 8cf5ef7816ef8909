//! Diagnostics
//!
//! Collects infos, warnings and errors during the weave. Nothing in the
//! per-type passes aborts: every problem becomes an item here so one run
//! reports the whole surface.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::module::SequencePoint;

// =============================================================================
// Diagnostic Codes
// =============================================================================

/// Diagnostic code for categorizing issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticCode {
    // === Classification ===
    /// Property type has no storage mapping
    UnsupportedPropertyType,

    // === Primary key / index ===
    /// More than one primary key declared on a type
    DuplicatePrimaryKey,
    /// Primary key on a type that cannot be a key
    UnsupportedPrimaryKeyType,
    /// Embedded objects are owned by their parent and have no key
    EmbeddedPrimaryKey,
    /// Index on a type that cannot be indexed
    UnsupportedIndexType,
    /// `required` on a category that is never null
    RequiredNoOp,

    // === Naming ===
    /// Two fields persist under the same name
    DuplicateMappedName,
    /// Mapped name empty, reserved or too long
    InvalidMappedName,

    // === Relationships ===
    /// Collection property with a public setter
    CollectionWithSetter,
    /// Backlink property with a setter
    BacklinkWithSetter,
    /// Backlink inverse property does not exist
    BacklinkInverseMissing,
    /// Backlink inverse does not point back at the owner
    BacklinkInverseMismatch,
    /// Backlink annotation on a non-backlink property
    ConflictingAnnotations,
    /// Link to an asymmetric object from a non-asymmetric one
    AsymmetricLink,
    /// Set of embedded objects
    EmbeddedSet,

    // === Weaving ===
    /// Getter is not `return this.field`
    NotAutomatic,
    /// Getter matches the automatic shape more than once
    AmbiguousBackingField,

    // === Resolution ===
    /// Dependency module could not be loaded
    UnresolvedModule,
    /// Base-type chain loops back on itself
    InheritanceCycle,
}

impl DiagnosticCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnsupportedPropertyType => "E001",
            Self::DuplicatePrimaryKey => "E002",
            Self::UnsupportedPrimaryKeyType => "E003",
            Self::EmbeddedPrimaryKey => "E004",
            Self::UnsupportedIndexType => "E005",
            Self::DuplicateMappedName => "E006",
            Self::InvalidMappedName => "E007",
            Self::CollectionWithSetter => "E008",
            Self::BacklinkWithSetter => "E009",
            Self::BacklinkInverseMissing => "E010",
            Self::BacklinkInverseMismatch => "E011",
            Self::ConflictingAnnotations => "E012",
            Self::AsymmetricLink => "E013",
            Self::EmbeddedSet => "E014",
            Self::AmbiguousBackingField => "E015",
            Self::RequiredNoOp => "W001",
            Self::NotAutomatic => "W002",
            Self::InheritanceCycle => "W003",
            Self::UnresolvedModule => "I001",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::UnsupportedPropertyType
            | Self::DuplicatePrimaryKey
            | Self::UnsupportedPrimaryKeyType
            | Self::EmbeddedPrimaryKey
            | Self::UnsupportedIndexType
            | Self::DuplicateMappedName
            | Self::InvalidMappedName
            | Self::CollectionWithSetter
            | Self::BacklinkWithSetter
            | Self::BacklinkInverseMissing
            | Self::BacklinkInverseMismatch
            | Self::ConflictingAnnotations
            | Self::AsymmetricLink
            | Self::EmbeddedSet
            | Self::AmbiguousBackingField => Severity::Error,

            Self::RequiredNoOp | Self::NotAutomatic | Self::InheritanceCycle => Severity::Warning,

            Self::UnresolvedModule => Severity::Info,
        }
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Severity
// =============================================================================

/// Diagnostic severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

// =============================================================================
// Location
// =============================================================================

/// Where a diagnostic points in user code
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Owning type
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
    /// Source position of the property's getter, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SequencePoint>,
}

impl Location {
    pub fn of_type(type_name: impl Into<String>) -> Self {
        Self { type_name: type_name.into(), ..Default::default() }
    }

    pub fn of_property(type_name: impl Into<String>, property: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            property: Some(property.into()),
            source: None,
        }
    }

    pub fn with_source(mut self, source: Option<&SequencePoint>) -> Self {
        self.source = source.cloned();
        self
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.property {
            Some(property) => write!(f, "{}.{}", self.type_name, property)?,
            None => write!(f, "{}", self.type_name)?,
        }
        if let Some(sp) = &self.source {
            write!(f, " at {}:{}:{}", sp.document, sp.line, sp.column)?;
        }
        Ok(())
    }
}

// =============================================================================
// Diagnostic Item
// =============================================================================

/// A single diagnostic item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticItem {
    pub code: DiagnosticCode,
    pub severity: Severity,
    /// Human-readable message
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    /// Additional context (e.g., related types, hints)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<String>,
}

impl DiagnosticItem {
    pub fn new(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self {
            code,
            severity: code.severity(),
            message: message.into(),
            location: None,
            context: Vec::new(),
        }
    }

    pub fn at(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context.push(ctx.into());
        self
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }
}

impl fmt::Display for DiagnosticItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.code, self.severity, self.message)?;
        if let Some(location) = &self.location {
            write!(f, " ({})", location)?;
        }

        for ctx in &self.context {
            write!(f, "\n  - {}", ctx)?;
        }

        Ok(())
    }
}

// =============================================================================
// Diagnostics Collection
// =============================================================================

/// Collection of diagnostics from analysis passes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    items: Vec<DiagnosticItem>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a diagnostic item
    pub fn push(&mut self, item: DiagnosticItem) {
        self.items.push(item);
    }

    /// Add a diagnostic anchored at a type
    pub fn on_type(&mut self, type_name: &str, code: DiagnosticCode, message: impl Into<String>) {
        self.push(DiagnosticItem::new(code, message).at(Location::of_type(type_name)));
    }

    /// Add a diagnostic anchored at a property
    pub fn on_property(
        &mut self,
        type_name: &str,
        property: &str,
        code: DiagnosticCode,
        message: impl Into<String>,
    ) {
        self.push(DiagnosticItem::new(code, message).at(Location::of_property(type_name, property)));
    }

    /// Check if there are any errors
    pub fn has_errors(&self) -> bool {
        self.items.iter().any(|i| i.severity() == Severity::Error)
    }

    /// Get all errors
    pub fn errors(&self) -> impl Iterator<Item = &DiagnosticItem> {
        self.items.iter().filter(|i| i.severity() == Severity::Error)
    }

    /// Get all warnings
    pub fn warnings(&self) -> impl Iterator<Item = &DiagnosticItem> {
        self.items.iter().filter(|i| i.severity() == Severity::Warning)
    }

    /// Items with a given code
    pub fn with_code(&self, code: DiagnosticCode) -> impl Iterator<Item = &DiagnosticItem> {
        self.items.iter().filter(move |i| i.code == code)
    }

    /// Get all items
    pub fn all(&self) -> &[DiagnosticItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    pub fn warning_count(&self) -> usize {
        self.warnings().count()
    }

    /// Merge another Diagnostics into this one
    pub fn merge(&mut self, other: Diagnostics) {
        self.items.extend(other.items);
    }

    /// Raise every warning to an error
    pub fn escalate_warnings(&mut self) {
        for item in &mut self.items {
            if item.severity == Severity::Warning {
                item.severity = Severity::Error;
            }
        }
    }

    /// Format all diagnostics for display
    pub fn format_all(&self) -> String {
        let mut output = String::new();

        for item in &self.items {
            output.push_str(&format!("{}\n", item));
        }

        if self.has_errors() {
            output.push_str(&format!(
                "\n{} error(s), {} warning(s)\n",
                self.error_count(),
                self.warning_count()
            ));
        } else if self.warning_count() > 0 {
            output.push_str(&format!("\n{} warning(s)\n", self.warning_count()));
        }

        output
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_all())
    }
}

impl IntoIterator for Diagnostics {
    type Item = DiagnosticItem;
    type IntoIter = std::vec::IntoIter<DiagnosticItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a DiagnosticItem;
    type IntoIter = std::slice::Iter<'a, DiagnosticItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_severity() {
        assert_eq!(DiagnosticCode::DuplicatePrimaryKey.severity(), Severity::Error);
        assert_eq!(DiagnosticCode::RequiredNoOp.severity(), Severity::Warning);
        assert_eq!(DiagnosticCode::UnresolvedModule.severity(), Severity::Info);
    }

    #[test]
    fn test_diagnostics_collection() {
        let mut diags = Diagnostics::new();
        diags.on_property("Zoo.Dog", "Age", DiagnosticCode::UnsupportedIndexType, "float index");
        diags.on_property("Zoo.Dog", "Id", DiagnosticCode::RequiredNoOp, "no-op");
        diags.on_type("Zoo.Cat", DiagnosticCode::UnresolvedModule, "missing");

        assert_eq!(diags.error_count(), 1);
        assert_eq!(diags.warning_count(), 1);
        assert_eq!(diags.len(), 3);
        assert!(diags.has_errors());
    }

    #[test]
    fn test_escalate_warnings() {
        let mut diags = Diagnostics::new();
        diags.on_property("Zoo.Dog", "Name", DiagnosticCode::NotAutomatic, "manual getter");
        assert!(!diags.has_errors());

        diags.escalate_warnings();
        assert!(diags.has_errors());
    }

    #[test]
    fn test_display_includes_location() {
        let item = DiagnosticItem::new(DiagnosticCode::UnsupportedPrimaryKeyType, "unsupported primary key type")
            .at(Location::of_property("Zoo.IllegalKey", "Value"));
        assert_eq!(
            item.to_string(),
            "[E003] error: unsupported primary key type (Zoo.IllegalKey.Value)"
        );
    }
}
