//! Compiled per-type tables.
//!
//! [`TypeSchema::compile`] turns a [`TypeDescriptor`] into the dense member
//! table the engines index into: projection and visibility filters applied,
//! stable 0-based indices assigned in declaration order, the dirty-word
//! width fixed. Member indices are the wire key inside delta operations and
//! must be identical across runs of the same schema.

use std::collections::HashMap;

use log::debug;

use crate::descriptor::{CompareKind, MemberDescriptor, TypeDescriptor, ValueKind};
use crate::dirty::DirtyWidth;
use crate::error::{DdError, Result};

/// Hard cap on comparable members per type; beyond this the bitfield
/// assignment overflows the supported spill width.
pub const MAX_MEMBERS: usize = 4096;

// ---------------------------------------------------------------------------
// Member
// ---------------------------------------------------------------------------

/// One compiled member: descriptor policy resolved against the type
/// defaults, pinned to its stable index.
#[derive(Debug, Clone)]
pub struct Member {
    pub index: u32,
    pub name: String,
    pub kind: ValueKind,
    pub compare_kind: CompareKind,
    pub order_insensitive: bool,
    pub key_members: Vec<String>,
    pub custom_equality: Option<String>,
    pub delta_shallow: bool,
    pub required_flags: u64,
    pub forbidden_flags: u64,
}

// ---------------------------------------------------------------------------
// TypeSchema
// ---------------------------------------------------------------------------

/// The compiled, read-only table for one record type.
#[derive(Debug, Clone)]
pub struct TypeSchema {
    pub type_tag: String,
    pub cycle_tracking: bool,
    pub dirty_tracking: bool,
    pub dirty_width: DirtyWidth,
    members: Vec<Member>,
    by_name: HashMap<String, u32>,
}

impl TypeSchema {
    /// Compile a descriptor into its member table.
    ///
    /// Fails with [`DdError::Schema`] on a conflicting include+ignore
    /// projection, a projection naming an unknown member, or more members
    /// than the bitfield supports. Cross-type checks (nested tags,
    /// `key_members`) run when the registry is assembled, once every type
    /// is known.
    pub fn compile(desc: &TypeDescriptor) -> Result<TypeSchema> {
        if !desc.include_members.is_empty() && !desc.ignore_members.is_empty() {
            return Err(DdError::Schema(format!(
                "type '{}' declares both an include and an ignore projection",
                desc.type_tag
            )));
        }

        for name in desc.include_members.iter().chain(desc.ignore_members.iter()) {
            if !desc.members.iter().any(|m| &m.name == name) {
                return Err(DdError::Schema(format!(
                    "type '{}' projects unknown member '{}'",
                    desc.type_tag, name
                )));
            }
        }

        let mut members = Vec::new();
        let mut by_name = HashMap::new();
        for md in &desc.members {
            if !Self::selected(desc, md) {
                continue;
            }
            let index = members.len() as u32;
            if by_name.insert(md.name.clone(), index).is_some() {
                return Err(DdError::Schema(format!(
                    "type '{}' declares member '{}' more than once",
                    desc.type_tag, md.name
                )));
            }
            members.push(Member {
                index,
                name: md.name.clone(),
                kind: md.kind.clone(),
                compare_kind: md.compare_kind,
                order_insensitive: md.order_insensitive.unwrap_or(desc.order_insensitive_default),
                key_members: md.key_members.clone(),
                custom_equality: md.custom_equality.clone(),
                delta_shallow: md.delta_shallow,
                required_flags: md.required_flags,
                forbidden_flags: md.forbidden_flags,
            });
        }

        if members.len() > MAX_MEMBERS {
            return Err(DdError::Schema(format!(
                "type '{}' has {} members; the bitfield supports at most {}",
                desc.type_tag,
                members.len(),
                MAX_MEMBERS
            )));
        }

        let dirty_width = DirtyWidth::for_member_count(members.len());
        debug!(
            "compiled schema '{}': {} members, dirty width {:?}",
            desc.type_tag,
            members.len(),
            dirty_width
        );

        Ok(TypeSchema {
            type_tag: desc.type_tag.clone(),
            cycle_tracking: desc.cycle_tracking,
            dirty_tracking: desc.dirty_tracking,
            dirty_width,
            members,
            by_name,
        })
    }

    fn selected(desc: &TypeDescriptor, md: &MemberDescriptor) -> bool {
        if md.from_base && !desc.include_base {
            return false;
        }
        if md.internal && !desc.include_internals {
            return false;
        }
        if !desc.include_members.is_empty() {
            return desc.include_members.iter().any(|n| n == &md.name);
        }
        if !desc.ignore_members.is_empty() {
            return !desc.ignore_members.iter().any(|n| n == &md.name);
        }
        true
    }

    pub fn member(&self, index: u32) -> Option<&Member> {
        self.members.get(index as usize)
    }

    pub fn member_named(&self, name: &str) -> Option<&Member> {
        self.by_name.get(name).map(|i| &self.members[*i as usize])
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
