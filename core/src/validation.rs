//! Field-level validation driven by per-entity accessor tables.
//!
//! Domain types do not share a validation interface beyond [`Validated`],
//! which hands out a [`Schema`]: a table mapping each field name to an
//! accessor function and the constraints declared for that field. The table
//! is built once per process and then used to check fields by name.
//!
//! Callers pick the fields to check and whether each is mandatory:
//!
//! ```
//! use std::sync::LazyLock;
//! use warehouse_sync_core::validation::{
//!     Constraint, FieldCheckError, FieldValidator, FieldValue, Schema, Validated,
//! };
//!
//! struct Pallet {
//!     label: Option<String>,
//!     weight_kg: Option<i64>,
//! }
//!
//! static PALLET: LazyLock<Schema<Pallet>> = LazyLock::new(|| {
//!     Schema::<Pallet>::builder("pallet")
//!         .field("label", |p| FieldValue::from(p.label.as_deref()), &[Constraint::NotBlank])
//!         .field("weight_kg", |p| FieldValue::from(p.weight_kg), &[Constraint::Positive])
//!         .build()
//! });
//!
//! impl Validated for Pallet {
//!     fn schema() -> &'static Schema<Self> {
//!         &PALLET
//!     }
//! }
//!
//! let pallet = Pallet { label: None, weight_kg: Some(-3) };
//!
//! // Optional and absent: fine.
//! assert!(FieldValidator::validate_required(&pallet, "label", false).is_ok());
//!
//! // Present but violating its constraint.
//! let err = FieldValidator::validate_required(&pallet, "weight_kg", false).unwrap_err();
//! assert_eq!(err.to_string(), "weight_kg must be greater than 0");
//!
//! // Asking for a field the schema does not know is a programming error.
//! assert!(matches!(
//!     FieldValidator::validate_required(&pallet, "colour", true),
//!     Err(FieldCheckError::UnknownField { .. })
//! ));
//! ```
//!
//! Sequence and map values are descended into: every non-null element is run
//! through the field's element constraints (or its own schema when it is an
//! object), and all element violations are folded into one message for the
//! field, prefixed with the element's index or key.

use std::collections::HashMap;
use thiserror::Error;

/// A required field is missing or a present field breaks a declared constraint.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{field} {message}")]
pub struct ValidationError {
    /// Name of the offending field.
    pub field: String,
    /// Constraint messages, joined by `"; "`.
    pub message: String,
}

impl ValidationError {
    /// Create a validation error for `field`.
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Failure of a field check.
///
/// Only [`FieldCheckError::Invalid`] describes bad input. The other variants
/// mean the caller asked for something the schema cannot answer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FieldCheckError {
    /// The inspected value failed validation.
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    /// The schema has no field with this name.
    #[error("unknown field '{field}' on {entity}")]
    UnknownField {
        /// Entity the schema describes.
        entity: &'static str,
        /// The requested field name.
        field: String,
    },

    /// An empty field name was passed.
    #[error("field name must not be empty")]
    MissingFieldName,
}

impl FieldCheckError {
    /// Returns `true` when the error describes bad input rather than a caller bug.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Invalid(_))
    }
}

/// Something that can report its own constraint violations.
///
/// Blanket-implemented for every [`Validated`] type so nested objects can sit
/// behind a trait object inside [`FieldValue`].
pub trait Validate {
    /// Violations of every declared constraint, as `"<field> <message>"` strings.
    fn violations(&self) -> Vec<String>;
}

/// A type that publishes a validation [`Schema`].
pub trait Validated: Sized + 'static {
    /// The schema for this type. Built once and shared.
    fn schema() -> &'static Schema<Self>;
}

impl<T: Validated> Validate for T {
    fn violations(&self) -> Vec<String> {
        T::schema().violations(self)
    }
}

/// A borrowed view of one field's value.
pub enum FieldValue<'a> {
    /// No value.
    Null,
    /// A string value.
    Text(&'a str),
    /// An integer value.
    Integer(i64),
    /// A nested object validated against its own schema.
    Object(&'a dyn Validate),
    /// A sequence of values.
    List(Vec<FieldValue<'a>>),
    /// A mapping of keys to values.
    Map(Vec<(&'a str, FieldValue<'a>)>),
}

impl<'a> FieldValue<'a> {
    /// A list of nested objects.
    #[must_use]
    pub fn objects<V: Validate + 'a>(items: &'a [V]) -> Self {
        Self::List(
            items
                .iter()
                .map(|item| FieldValue::Object(item as &dyn Validate))
                .collect(),
        )
    }

    /// A map of optional strings.
    #[must_use]
    pub fn text_map<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a Option<String>)>,
    {
        Self::Map(
            entries
                .into_iter()
                .map(|(key, value)| (key.as_str(), FieldValue::from(value.as_deref())))
                .collect(),
        )
    }

    /// Null, empty strings and empty collections count as absent.
    #[must_use]
    pub fn is_absent(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Text(text) => text.is_empty(),
            Self::List(items) => items.is_empty(),
            Self::Map(entries) => entries.is_empty(),
            Self::Integer(_) | Self::Object(_) => false,
        }
    }

    const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl<'a> From<Option<&'a str>> for FieldValue<'a> {
    fn from(value: Option<&'a str>) -> Self {
        value.map_or(Self::Null, Self::Text)
    }
}

impl From<Option<i64>> for FieldValue<'_> {
    fn from(value: Option<i64>) -> Self {
        value.map_or(Self::Null, Self::Integer)
    }
}

/// A declared constraint on a field or on the elements of a collection field.
///
/// Apart from [`Constraint::Required`], constraints pass on absent values and
/// on value kinds they do not apply to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Constraint {
    /// The value must be present.
    Required,
    /// Text must contain a non-whitespace character.
    NotBlank,
    /// Text length (in chars) or collection size must not exceed the limit.
    MaxLength(usize),
    /// Text length (in chars) must fall within the bounds.
    Length {
        /// Inclusive lower bound.
        min: usize,
        /// Inclusive upper bound.
        max: usize,
    },
    /// Integers must be strictly positive.
    Positive,
    /// Text must not contain lowercase characters.
    Uppercase,
    /// Sequences and maps must not contain null entries.
    NoNullElements,
}

impl Constraint {
    /// Check `value`, returning the violation message if it fails.
    #[must_use]
    pub fn check(&self, value: &FieldValue<'_>) -> Option<String> {
        match (self, value) {
            (Self::Required, v) if v.is_absent() => Some("is required".to_string()),
            (Self::NotBlank, FieldValue::Text(text)) if text.trim().is_empty() => {
                Some("must not be blank".to_string())
            },
            (Self::MaxLength(max), FieldValue::Text(text)) if text.chars().count() > *max => {
                Some(format!("length must be at most {max}"))
            },
            (Self::MaxLength(max), FieldValue::List(items)) if items.len() > *max => {
                Some(format!("size must be at most {max}"))
            },
            (Self::MaxLength(max), FieldValue::Map(entries)) if entries.len() > *max => {
                Some(format!("size must be at most {max}"))
            },
            (Self::Length { min, max }, FieldValue::Text(text)) => {
                let len = text.chars().count();
                (len < *min || len > *max)
                    .then(|| format!("length must be between {min} and {max}"))
            },
            (Self::Positive, FieldValue::Integer(n)) if *n <= 0 => {
                Some("must be greater than 0".to_string())
            },
            (Self::Uppercase, FieldValue::Text(text)) if text.chars().any(char::is_lowercase) => {
                Some("must be uppercase".to_string())
            },
            (Self::NoNullElements, FieldValue::List(items)) if items.iter().any(FieldValue::is_null) => {
                Some("must not contain null elements".to_string())
            },
            (Self::NoNullElements, FieldValue::Map(entries))
                if entries.iter().any(|(_, v)| v.is_null()) =>
            {
                Some("must not contain null elements".to_string())
            },
            _ => None,
        }
    }
}

/// Accessor from an entity to one of its fields.
pub type Accessor<T> = for<'a> fn(&'a T) -> FieldValue<'a>;

/// One entry of a [`Schema`].
pub struct FieldRule<T> {
    name: &'static str,
    accessor: Accessor<T>,
    constraints: Vec<Constraint>,
    element_constraints: Vec<Constraint>,
}

impl<T> FieldRule<T> {
    /// Field name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Constraints declared on the field value itself.
    #[must_use]
    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    fn is_mandatory(&self) -> bool {
        self.constraints.contains(&Constraint::Required)
    }

    /// Violations of a present value, element violations included.
    fn violations_of(&self, value: &FieldValue<'_>) -> Vec<String> {
        let mut violations: Vec<String> = self
            .constraints
            .iter()
            .filter_map(|c| c.check(value))
            .collect();

        match value {
            FieldValue::Object(nested) => violations.extend(nested.violations()),
            FieldValue::List(items) => {
                for (index, item) in items.iter().enumerate() {
                    violations.extend(
                        self.element_violations(item)
                            .into_iter()
                            .map(|v| format!("[{index}] {v}")),
                    );
                }
            },
            FieldValue::Map(entries) => {
                for (key, item) in entries {
                    violations.extend(
                        self.element_violations(item)
                            .into_iter()
                            .map(|v| format!("[{key}] {v}")),
                    );
                }
            },
            FieldValue::Null | FieldValue::Text(_) | FieldValue::Integer(_) => {},
        }

        violations
    }

    fn element_violations(&self, item: &FieldValue<'_>) -> Vec<String> {
        if item.is_null() {
            return Vec::new();
        }
        let mut violations: Vec<String> = self
            .element_constraints
            .iter()
            .filter_map(|c| c.check(item))
            .collect();
        if let FieldValue::Object(nested) = item {
            violations.extend(nested.violations());
        }
        violations
    }
}

/// Field accessor table for an entity type.
pub struct Schema<T> {
    entity: &'static str,
    rules: Vec<FieldRule<T>>,
    index: HashMap<&'static str, usize>,
}

impl<T> Schema<T> {
    /// Start building a schema for the named entity.
    #[must_use]
    pub fn builder(entity: &'static str) -> SchemaBuilder<T> {
        SchemaBuilder {
            entity,
            rules: Vec::new(),
        }
    }

    /// Name of the entity this schema describes.
    #[must_use]
    pub const fn entity(&self) -> &'static str {
        self.entity
    }

    /// Declared field names, in declaration order.
    pub fn field_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.rules.iter().map(|rule| rule.name)
    }

    /// Look up the rule for `field`.
    ///
    /// # Errors
    ///
    /// [`FieldCheckError::MissingFieldName`] for an empty name,
    /// [`FieldCheckError::UnknownField`] when the schema has no such field.
    pub fn rule(&self, field: &str) -> Result<&FieldRule<T>, FieldCheckError> {
        if field.is_empty() {
            return Err(FieldCheckError::MissingFieldName);
        }
        self.index
            .get(field)
            .and_then(|&i| self.rules.get(i))
            .ok_or_else(|| FieldCheckError::UnknownField {
                entity: self.entity,
                field: field.to_string(),
            })
    }

    /// Check one field of `object`.
    ///
    /// An absent value fails only when `required` is set. A present value is
    /// checked against every declared constraint.
    ///
    /// # Errors
    ///
    /// [`FieldCheckError::Invalid`] when the value is missing or breaks a
    /// constraint; see [`Schema::rule`] for the lookup errors.
    pub fn validate_required(
        &self,
        object: &T,
        field: &str,
        required: bool,
    ) -> Result<(), FieldCheckError> {
        let rule = self.rule(field)?;
        let value = (rule.accessor)(object);

        if value.is_absent() {
            if required {
                return Err(ValidationError::new(rule.name, "is required").into());
            }
            return Ok(());
        }

        let violations = rule.violations_of(&value);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::new(rule.name, violations.join("; ")).into())
        }
    }

    /// Check several fields in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// The first error returned by [`Schema::validate_required`].
    pub fn validate_required_many(
        &self,
        object: &T,
        required: bool,
        fields: &[&str],
    ) -> Result<(), FieldCheckError> {
        fields
            .iter()
            .try_for_each(|field| self.validate_required(object, field, required))
    }

    /// Check every declared field, treating each as optional unless it
    /// declares [`Constraint::Required`].
    ///
    /// # Errors
    ///
    /// The first failing field, in declaration order.
    pub fn validate_declared(&self, object: &T) -> Result<(), FieldCheckError> {
        self.rules.iter().try_for_each(|rule| {
            self.validate_required(object, rule.name, rule.is_mandatory())
        })
    }

    /// All violations of `object`, as `"<field> <message>"` strings.
    #[must_use]
    pub fn violations(&self, object: &T) -> Vec<String> {
        let mut violations = Vec::new();
        for rule in &self.rules {
            let value = (rule.accessor)(object);
            if value.is_absent() {
                if rule.is_mandatory() {
                    violations.push(format!("{} is required", rule.name));
                }
                continue;
            }
            violations.extend(
                rule.violations_of(&value)
                    .into_iter()
                    .map(|v| format!("{} {v}", rule.name)),
            );
        }
        violations
    }
}

/// Builder for [`Schema`].
pub struct SchemaBuilder<T> {
    entity: &'static str,
    rules: Vec<FieldRule<T>>,
}

impl<T> SchemaBuilder<T> {
    /// Declare a scalar or object field.
    #[must_use]
    pub fn field(
        self,
        name: &'static str,
        accessor: Accessor<T>,
        constraints: &[Constraint],
    ) -> Self {
        self.collection(name, accessor, constraints, &[])
    }

    /// Declare a sequence or map field with constraints for its elements.
    #[must_use]
    pub fn collection(
        mut self,
        name: &'static str,
        accessor: Accessor<T>,
        constraints: &[Constraint],
        element_constraints: &[Constraint],
    ) -> Self {
        self.rules.push(FieldRule {
            name,
            accessor,
            constraints: constraints.to_vec(),
            element_constraints: element_constraints.to_vec(),
        });
        self
    }

    /// Build the schema. A later declaration of the same name replaces the earlier one.
    #[must_use]
    pub fn build(self) -> Schema<T> {
        let mut rules: Vec<FieldRule<T>> = Vec::with_capacity(self.rules.len());
        let mut index = HashMap::with_capacity(self.rules.len());
        for rule in self.rules {
            if let Some(&existing) = index.get(rule.name) {
                if let Some(slot) = rules.get_mut(existing) {
                    *slot = rule;
                }
            } else {
                index.insert(rule.name, rules.len());
                rules.push(rule);
            }
        }
        Schema {
            entity: self.entity,
            rules,
            index,
        }
    }
}

/// Entry point for validating [`Validated`] types by field name.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldValidator;

impl FieldValidator {
    /// Check one named field of `object`.
    ///
    /// # Errors
    ///
    /// See [`Schema::validate_required`].
    pub fn validate_required<T: Validated>(
        object: &T,
        field: &str,
        required: bool,
    ) -> Result<(), FieldCheckError> {
        T::schema().validate_required(object, field, required)
    }

    /// Check several named fields of `object`, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// See [`Schema::validate_required_many`].
    pub fn validate_required_many<T: Validated>(
        object: &T,
        required: bool,
        fields: &[&str],
    ) -> Result<(), FieldCheckError> {
        T::schema().validate_required_many(object, required, fields)
    }

    /// Check every declared field of `object`.
    ///
    /// # Errors
    ///
    /// See [`Schema::validate_declared`].
    pub fn validate_declared<T: Validated>(object: &T) -> Result<(), FieldCheckError> {
        T::schema().validate_declared(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::LazyLock;

    struct Crate {
        code: Option<String>,
        count: Option<i64>,
    }

    struct Manifest {
        reference: Option<String>,
        crates: Vec<Crate>,
        labels: BTreeMap<String, Option<String>>,
        tags: Vec<Option<String>>,
    }

    static CRATE: LazyLock<Schema<Crate>> = LazyLock::new(|| {
        Schema::<Crate>::builder("crate")
            .field(
                "code",
                |c| FieldValue::from(c.code.as_deref()),
                &[Constraint::Required, Constraint::NotBlank],
            )
            .field(
                "count",
                |c| FieldValue::from(c.count),
                &[Constraint::Required, Constraint::Positive],
            )
            .build()
    });

    static MANIFEST: LazyLock<Schema<Manifest>> = LazyLock::new(|| {
        Schema::<Manifest>::builder("manifest")
            .field(
                "reference",
                |m| FieldValue::from(m.reference.as_deref()),
                &[Constraint::NotBlank, Constraint::MaxLength(8)],
            )
            .collection("crates", |m| FieldValue::objects(&m.crates), &[], &[])
            .collection(
                "labels",
                |m| FieldValue::text_map(&m.labels),
                &[],
                &[Constraint::NotBlank],
            )
            .collection(
                "tags",
                |m| FieldValue::List(m.tags.iter().map(|t| FieldValue::from(t.as_deref())).collect()),
                &[Constraint::NoNullElements],
                &[Constraint::Uppercase],
            )
            .build()
    });

    impl Validated for Crate {
        fn schema() -> &'static Schema<Self> {
            &CRATE
        }
    }

    impl Validated for Manifest {
        fn schema() -> &'static Schema<Self> {
            &MANIFEST
        }
    }

    fn crate_of(code: &str, count: i64) -> Crate {
        Crate {
            code: Some(code.to_string()),
            count: Some(count),
        }
    }

    fn manifest() -> Manifest {
        Manifest {
            reference: Some("M-1".to_string()),
            crates: vec![crate_of("A", 1), crate_of("B", 2)],
            labels: BTreeMap::new(),
            tags: Vec::new(),
        }
    }

    #[test]
    fn missing_required_field_is_reported() {
        let m = Manifest {
            reference: None,
            ..manifest()
        };
        let err = FieldValidator::validate_required(&m, "reference", true);
        assert_eq!(
            err,
            Err(FieldCheckError::Invalid(ValidationError::new("reference", "is required")))
        );
    }

    #[test]
    fn empty_string_counts_as_absent() {
        let m = Manifest {
            reference: Some(String::new()),
            ..manifest()
        };
        assert!(FieldValidator::validate_required(&m, "reference", false).is_ok());
        assert!(FieldValidator::validate_required(&m, "reference", true).is_err());
    }

    #[test]
    fn present_field_constraint_messages_are_joined() {
        let m = Manifest {
            reference: Some("          ".to_string()),
            ..manifest()
        };
        let Err(FieldCheckError::Invalid(err)) =
            FieldValidator::validate_required(&m, "reference", false)
        else {
            unreachable!("blank, over-long reference must fail");
        };
        assert_eq!(err.field, "reference");
        assert_eq!(err.message, "must not be blank; length must be at most 8");
    }

    #[test]
    fn collection_element_violations_are_aggregated() {
        let m = Manifest {
            crates: vec![crate_of("A", 1), crate_of(" ", 0), crate_of("C", 3)],
            ..manifest()
        };
        let err = FieldValidator::validate_required(&m, "crates", true);
        assert_eq!(
            err,
            Err(FieldCheckError::Invalid(ValidationError::new(
                "crates",
                "[1] code must not be blank; [1] count must be greater than 0"
            )))
        );
    }

    #[test]
    fn map_values_are_checked_and_nulls_skipped() {
        let mut labels = BTreeMap::new();
        labels.insert("dock".to_string(), Some("  ".to_string()));
        labels.insert("lane".to_string(), None);
        labels.insert("zone".to_string(), Some("Z1".to_string()));
        let m = Manifest { labels, ..manifest() };

        let err = FieldValidator::validate_required(&m, "labels", false);
        assert_eq!(
            err,
            Err(FieldCheckError::Invalid(ValidationError::new(
                "labels",
                "[dock] must not be blank"
            )))
        );
    }

    #[test]
    fn null_elements_fail_only_when_declared() {
        let m = Manifest {
            tags: vec![Some("FRAGILE".to_string()), None, Some("cold".to_string())],
            ..manifest()
        };
        let err = FieldValidator::validate_required(&m, "tags", false);
        assert_eq!(
            err,
            Err(FieldCheckError::Invalid(ValidationError::new(
                "tags",
                "must not contain null elements; [2] must be uppercase"
            )))
        );
    }

    #[test]
    fn unknown_field_is_a_programming_error() {
        let err = FieldValidator::validate_required(&manifest(), "weight", true);
        assert!(matches!(
            err,
            Err(FieldCheckError::UnknownField { entity: "manifest", ref field }) if field == "weight"
        ));
        if let Err(e) = &err {
            assert!(!e.is_validation());
        }
    }

    #[test]
    fn empty_field_name_is_a_precondition_failure() {
        assert_eq!(
            FieldValidator::validate_required(&manifest(), "", false),
            Err(FieldCheckError::MissingFieldName)
        );
    }

    #[test]
    fn many_stops_at_first_failure() {
        let m = Manifest {
            reference: None,
            crates: vec![crate_of("", 0)],
            ..manifest()
        };
        let err = FieldValidator::validate_required_many(&m, true, &["reference", "crates", "nope"]);
        assert_eq!(
            err,
            Err(FieldCheckError::Invalid(ValidationError::new("reference", "is required")))
        );
    }

    #[test]
    fn unrequested_fields_are_not_inspected() {
        let m = Manifest {
            reference: Some("way-too-long-reference".to_string()),
            ..manifest()
        };
        assert!(FieldValidator::validate_required(&m, "crates", true).is_ok());
    }

    #[test]
    fn declared_validation_uses_required_constraints() {
        let c = Crate {
            code: None,
            count: Some(4),
        };
        assert_eq!(
            FieldValidator::validate_declared(&c),
            Err(FieldCheckError::Invalid(ValidationError::new("code", "is required")))
        );
        assert_eq!(c.violations(), vec!["code is required".to_string()]);
    }

    #[test]
    fn field_names_follow_declaration_order() {
        let names: Vec<_> = Manifest::schema().field_names().collect();
        assert_eq!(names, vec!["reference", "crates", "labels", "tags"]);
    }
}
