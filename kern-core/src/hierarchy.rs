//! Explicit type-hierarchy walker.
//!
//! Stands in for runtime reflection: rather than inspecting a type's actual
//! inheritance at runtime, callers declare each tag's direct parents once,
//! up front, and `walk` materializes the full specificity-ordered chain.
//! Unknown tags are not an error — they simply have no parents.

use dashmap::DashMap;
use std::borrow::Cow;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeTag(Cow<'static, str>);

impl TypeTag {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }
}

impl From<&'static str> for TypeTag {
    fn from(s: &'static str) -> Self {
        TypeTag::new(s)
    }
}

impl std::fmt::Display for TypeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Declares `tag`'s direct parents, in declaration order. Declaring the
/// same tag twice replaces its parent list rather than appending to it —
/// the table is meant to be assembled once at startup.
#[derive(Default)]
pub struct TypeHierarchy {
    parents: DashMap<TypeTag, Vec<TypeTag>>,
}

impl TypeHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&self, tag: impl Into<TypeTag>, parents: Vec<TypeTag>) {
        self.parents.insert(tag.into(), parents);
    }

    /// `[tag] ++ direct_parents ++ walk(grandparents...)`, deduplicated and
    /// finite even in the presence of an accidental cycle in the declared
    /// table (a tag already emitted is never emitted again).
    pub fn walk(&self, tag: impl Into<TypeTag>) -> Vec<TypeTag> {
        let mut ordered = Vec::new();
        let mut seen = std::collections::HashSet::new();
        let mut queue = std::collections::VecDeque::new();
        queue.push_back(tag.into());

        while let Some(next) = queue.pop_front() {
            if !seen.insert(next.clone()) {
                continue;
            }
            ordered.push(next.clone());
            if let Some(parents) = self.parents.get(&next) {
                for parent in parents.iter() {
                    if !seen.contains(parent) {
                        queue.push_back(parent.clone());
                    }
                }
            }
        }
        ordered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_tag_yields_itself_only() {
        let h = TypeHierarchy::new();
        assert_eq!(h.walk("Ghost"), vec![TypeTag::new("Ghost")]);
    }

    #[test]
    fn walk_is_specificity_ordered() {
        let h = TypeHierarchy::new();
        h.declare("Admin", vec!["User".into()]);
        h.declare("User", vec!["Entity".into()]);
        assert_eq!(
            h.walk("Admin"),
            vec![
                TypeTag::new("Admin"),
                TypeTag::new("User"),
                TypeTag::new("Entity")
            ]
        );
    }

    #[test]
    fn diamond_parents_are_deduplicated() {
        let h = TypeHierarchy::new();
        h.declare("Admin", vec!["Staff".into(), "User".into()]);
        h.declare("Staff", vec!["Entity".into()]);
        h.declare("User", vec!["Entity".into()]);
        let walked = h.walk("Admin");
        let entity_count = walked.iter().filter(|t| **t == TypeTag::new("Entity")).count();
        assert_eq!(entity_count, 1);
    }

    #[test]
    fn accidental_cycle_terminates() {
        let h = TypeHierarchy::new();
        h.declare("A", vec!["B".into()]);
        h.declare("B", vec!["A".into()]);
        let walked = h.walk("A");
        assert_eq!(walked, vec![TypeTag::new("A"), TypeTag::new("B")]);
    }
}
