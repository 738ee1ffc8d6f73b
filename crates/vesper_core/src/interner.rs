//! Global String Interner
//!
//! Shader parameter names, global uniform names and instance uniform names are
//! compared and hashed on every material update. [`StringName`] interns them
//! once so those comparisons are integer comparisons.

use std::fmt;
use std::sync::LazyLock;

use lasso::{Spur, ThreadedRodeo};

/// Process-wide interner instance.
static INTERNER: LazyLock<ThreadedRodeo> = LazyLock::new(ThreadedRodeo::new);

/// Interned, case-sensitive identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StringName(Spur);

impl StringName {
    /// Interns `s`, returning the existing symbol if it was seen before.
    #[inline]
    #[must_use]
    pub fn new(s: &str) -> Self {
        Self(INTERNER.get_or_intern(s))
    }

    /// Looks up an already interned string without allocating.
    #[inline]
    #[must_use]
    pub fn lookup(s: &str) -> Option<Self> {
        INTERNER.get(s).map(Self)
    }

    /// The interned text.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        INTERNER.resolve(&self.0)
    }
}

impl fmt::Debug for StringName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "&{:?}", self.as_str())
    }
}

impl fmt::Display for StringName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for StringName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<&String> for StringName {
    fn from(s: &String) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_and_resolve() {
        let s1 = StringName::new("albedo");
        let s2 = StringName::new("albedo");
        let s3 = StringName::new("Albedo");

        assert_eq!(s1, s2);
        assert_ne!(s1, s3, "names are case-sensitive");
        assert_eq!(s1.as_str(), "albedo");
    }

    #[test]
    fn lookup_does_not_intern() {
        let _ = StringName::new("existing_name");
        assert!(StringName::lookup("existing_name").is_some());
        assert!(StringName::lookup("never_interned_name_xyz").is_none());
    }
}
