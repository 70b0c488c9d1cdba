//! Host-side symbols.
//!
//! A [`Symbol`] is a reference type: two symbols are the same only if they
//! share an allocation, regardless of description.

use std::hash::{Hash, Hasher};
use std::sync::{Arc, LazyLock};

#[derive(Debug)]
struct SymbolInner {
    description: Option<String>,
}

/// A unique host symbol, correlated with a guest `Symbol` by the arena.
#[derive(Clone, Debug)]
pub struct Symbol {
    inner: Arc<SymbolInner>,
}

impl Symbol {
    pub fn new(description: Option<impl Into<String>>) -> Self {
        Self {
            inner: Arc::new(SymbolInner {
                description: description.map(Into::into),
            }),
        }
    }

    pub fn description(&self) -> Option<&str> {
        self.inner.description.as_deref()
    }

    pub fn ptr_eq(&self, other: &Symbol) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    /// Host counterpart of `Symbol.iterator`.
    pub fn iterator() -> Symbol {
        WELL_KNOWN[0].1.clone()
    }

    /// Host counterpart of `Symbol.asyncIterator`.
    pub fn async_iterator() -> Symbol {
        WELL_KNOWN[1].1.clone()
    }

    /// Host counterpart of `Symbol.hasInstance`.
    pub fn has_instance() -> Symbol {
        WELL_KNOWN[2].1.clone()
    }

    /// Host counterpart of `Symbol.toPrimitive`.
    pub fn to_primitive() -> Symbol {
        WELL_KNOWN[3].1.clone()
    }

    /// Host counterpart of `Symbol.toStringTag`.
    pub fn to_string_tag() -> Symbol {
        WELL_KNOWN[4].1.clone()
    }

    /// Well-known symbols in the order the guest intrinsics report them.
    pub(crate) fn well_known() -> &'static [(&'static str, Symbol)] {
        &*WELL_KNOWN
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

static WELL_KNOWN: LazyLock<[(&'static str, Symbol); 5]> = LazyLock::new(|| {
    [
        ("Symbol.iterator", Symbol::new(Some("Symbol.iterator"))),
        ("Symbol.asyncIterator", Symbol::new(Some("Symbol.asyncIterator"))),
        ("Symbol.hasInstance", Symbol::new(Some("Symbol.hasInstance"))),
        ("Symbol.toPrimitive", Symbol::new(Some("Symbol.toPrimitive"))),
        ("Symbol.toStringTag", Symbol::new(Some("Symbol.toStringTag"))),
    ]
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_identity() {
        let a = Symbol::new(Some("tag"));
        let b = Symbol::new(Some("tag"));
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
        assert_eq!(a.description(), Some("tag"));
    }

    #[test]
    fn test_well_known_are_stable() {
        assert_eq!(Symbol::iterator(), Symbol::iterator());
        assert_ne!(Symbol::iterator(), Symbol::async_iterator());
        assert_eq!(Symbol::to_string_tag().description(), Some("Symbol.toStringTag"));
    }
}
