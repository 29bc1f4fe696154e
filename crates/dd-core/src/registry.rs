//! The per-process type registry.
//!
//! Maps type tags to compiled [`TypeSchema`] tables and comparer names to
//! [`StringComparer`]s. Built once from descriptors, read-only afterwards —
//! safe for unrestricted concurrent read. Runtime polymorphic dispatch for
//! `Any` members resolves through this registry; tags with no schema fall
//! back to intrinsic equality.

use std::collections::HashMap;
use std::sync::OnceLock;

use log::{debug, warn};

use crate::descriptor::{TypeDescriptor, ValueKind};
use crate::equality::{
    StringComparer, COMPARER_ORDINAL, COMPARER_ORDINAL_IGNORE_CASE,
};
use crate::error::{DdError, Result};
use crate::schema::TypeSchema;

static GLOBAL: OnceLock<Registry> = OnceLock::new();

/// Read-only lookup tables for every registered type and comparer.
#[derive(Debug)]
pub struct Registry {
    types: HashMap<String, TypeSchema>,
    comparers: HashMap<String, StringComparer>,
}

impl Registry {
    /// An empty registry with the built-in comparers pre-registered.
    pub fn new() -> Registry {
        let mut comparers = HashMap::new();
        comparers.insert(COMPARER_ORDINAL.to_string(), StringComparer::Ordinal);
        comparers.insert(
            COMPARER_ORDINAL_IGNORE_CASE.to_string(),
            StringComparer::OrdinalIgnoreCase,
        );
        Registry {
            types: HashMap::new(),
            comparers,
        }
    }

    /// Compile and build a registry from descriptors, then run the
    /// cross-type checks.
    pub fn build(descriptors: &[TypeDescriptor]) -> Result<Registry> {
        let mut registry = Registry::new();
        for desc in descriptors {
            registry.register_type(desc)?;
        }
        registry.validate()?;
        Ok(registry)
    }

    /// Compile one descriptor into the registry. Duplicate tags are a
    /// schema error.
    pub fn register_type(&mut self, desc: &TypeDescriptor) -> Result<()> {
        let schema = TypeSchema::compile(desc)?;
        if self.types.contains_key(&schema.type_tag) {
            return Err(DdError::Schema(format!(
                "type tag '{}' registered twice",
                schema.type_tag
            )));
        }
        self.types.insert(schema.type_tag.clone(), schema);
        Ok(())
    }

    /// Register a named comparer for `custom_equality` members.
    pub fn register_comparer(&mut self, name: impl Into<String>, comparer: StringComparer) {
        self.comparers.insert(name.into(), comparer);
    }

    /// Cross-type validation, run once every type is registered:
    /// `key_members` must name members of a registered record element type,
    /// and `custom_equality` must name a registered comparer.
    pub fn validate(&self) -> Result<()> {
        for schema in self.types.values() {
            for member in schema.members() {
                if !member.key_members.is_empty() {
                    self.validate_key_members(schema, member)?;
                }
                if let Some(name) = &member.custom_equality {
                    if !self.comparers.contains_key(name) {
                        return Err(DdError::Schema(format!(
                            "member '{}.{}' names unknown comparer '{}'",
                            schema.type_tag, member.name, name
                        )));
                    }
                }
                if let ValueKind::Record { type_tag } = &member.kind {
                    if !self.types.contains_key(type_tag) {
                        // Legal: comparison falls back to intrinsic equality.
                        warn!(
                            "member '{}.{}' references unregistered type '{}'",
                            schema.type_tag, member.name, type_tag
                        );
                    }
                }
            }
        }
        Ok(())
    }

    fn validate_key_members(
        &self,
        schema: &TypeSchema,
        member: &crate::schema::Member,
    ) -> Result<()> {
        let element = match &member.kind {
            ValueKind::Seq { element } | ValueKind::Set { element } => element.as_ref(),
            _ => {
                return Err(DdError::Schema(format!(
                    "member '{}.{}' declares key_members but is not a collection",
                    schema.type_tag, member.name
                )))
            }
        };
        let ValueKind::Record { type_tag } = element else {
            return Err(DdError::Schema(format!(
                "member '{}.{}' declares key_members over non-record elements",
                schema.type_tag, member.name
            )));
        };
        let Some(element_schema) = self.types.get(type_tag) else {
            return Err(DdError::Schema(format!(
                "member '{}.{}' keys into unregistered type '{}'",
                schema.type_tag, member.name, type_tag
            )));
        };
        for key in &member.key_members {
            if element_schema.member_named(key).is_none() {
                return Err(DdError::Schema(format!(
                    "member '{}.{}': key member '{}' not found on '{}'",
                    schema.type_tag, member.name, key, type_tag
                )));
            }
        }
        Ok(())
    }

    pub fn schema(&self, type_tag: &str) -> Option<&TypeSchema> {
        self.types.get(type_tag)
    }

    pub fn comparer(&self, name: &str) -> Option<&StringComparer> {
        self.comparers.get(name)
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    /// Force eager resolution of a type's tables and those of every record
    /// type it references. Used by benchmark setup to move table faults out
    /// of the measured path.
    pub fn warm_up(&self, type_tag: &str) -> Result<()> {
        let schema = self
            .schema(type_tag)
            .ok_or_else(|| DdError::UnknownType(type_tag.to_string()))?;
        let mut touched = 0usize;
        for member in schema.members() {
            touched += 1;
            if let ValueKind::Record { type_tag: nested } = &member.kind {
                if let Some(s) = self.schema(nested) {
                    touched += s.member_count();
                }
            }
        }
        debug!("warmed up '{}': touched {} member slots", type_tag, touched);
        Ok(())
    }

    /// Install this registry as the process-global instance.
    ///
    /// May be called once; later calls fail and leave the original in
    /// place.
    pub fn install(self) -> Result<&'static Registry> {
        let mut installed = false;
        let global = GLOBAL.get_or_init(|| {
            installed = true;
            self
        });
        if installed {
            debug!("global registry installed ({} types)", global.type_count());
            Ok(global)
        } else {
            Err(DdError::InvalidInput(
                "global registry already installed".to_string(),
            ))
        }
    }

    /// The process-global registry, if one has been installed.
    pub fn global() -> Option<&'static Registry> {
        GLOBAL.get()
    }
}

impl Default for Registry {
    fn default() -> Registry {
        Registry::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::MemberDescriptor;

    fn item_desc() -> TypeDescriptor {
        TypeDescriptor::new("OrderItem")
            .member(MemberDescriptor::new("SKU", ValueKind::Str))
            .member(MemberDescriptor::new("Qty", ValueKind::I64))
    }

    fn order_desc() -> TypeDescriptor {
        TypeDescriptor::new("Order")
            .member(MemberDescriptor::new("Id", ValueKind::I64))
            .member(
                MemberDescriptor::new("Items", ValueKind::seq(ValueKind::record("OrderItem")))
                    .order_insensitive(true)
                    .key_members(&["SKU"]),
            )
    }

    #[test]
    fn build_registers_and_validates() {
        let reg = Registry::build(&[item_desc(), order_desc()]).unwrap();
        assert_eq!(reg.type_count(), 2);
        assert!(reg.schema("Order").is_some());
        assert!(reg.schema("Missing").is_none());
    }

    #[test]
    fn duplicate_tag_is_rejected() {
        let err = Registry::build(&[item_desc(), item_desc()]).unwrap_err();
        assert!(err.to_string().contains("registered twice"));
    }

    #[test]
    fn unresolved_key_member_is_rejected() {
        let bad = TypeDescriptor::new("Order").member(
            MemberDescriptor::new("Items", ValueKind::seq(ValueKind::record("OrderItem")))
                .key_members(&["Nope"]),
        );
        let err = Registry::build(&[item_desc(), bad]).unwrap_err();
        assert!(err.to_string().contains("key member 'Nope'"));
    }

    #[test]
    fn key_members_over_scalars_are_rejected() {
        let bad = TypeDescriptor::new("T").member(
            MemberDescriptor::new("Tags", ValueKind::seq(ValueKind::Str)).key_members(&["x"]),
        );
        assert!(Registry::build(&[bad]).is_err());
    }

    #[test]
    fn unknown_comparer_is_rejected() {
        let bad = TypeDescriptor::new("T").member(
            MemberDescriptor::new("Name", ValueKind::Str).custom_equality("no_such_comparer"),
        );
        assert!(Registry::build(&[bad]).is_err());
    }

    #[test]
    fn builtin_comparers_are_preregistered() {
        let reg = Registry::new();
        assert!(reg.comparer(COMPARER_ORDINAL).is_some());
        assert!(reg.comparer(COMPARER_ORDINAL_IGNORE_CASE).is_some());
    }

    #[test]
    fn warm_up_requires_a_known_tag() {
        let reg = Registry::build(&[item_desc(), order_desc()]).unwrap();
        assert!(reg.warm_up("Order").is_ok());
        assert!(matches!(
            reg.warm_up("Missing"),
            Err(DdError::UnknownType(_))
        ));
    }
}
