//! String interning for the IR library.
//!
//! Names show up everywhere in an IR — functions, blocks, annotation
//! strings, operand-bundle tags — and most of them repeat. The interner
//! stores each unique string once and hands out small copyable [`Symbol`]
//! handles, so name comparison is an integer comparison and IR nodes stay
//! `Copy`-friendly.

use std::{collections::HashMap, num::NonZeroU32};

/// A handle to an interned string.
///
/// Internally a `NonZeroU32`, so `Option<Symbol>` is pointer-sized and
/// symbols can live in packed IR structures for free.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct Symbol(NonZeroU32);

impl Default for Symbol {
    /// A sentinel symbol. It never resolves to a string and exists only so
    /// that types embedding a `Symbol` can derive `Default`.
    fn default() -> Self {
        Self(NonZeroU32::MAX)
    }
}

/// Deduplicating string storage.
///
/// Each unique string is stored exactly once; interning an already-known
/// string returns the existing [`Symbol`]. Lookups index straight into the
/// backing vector and are O(1).
#[derive(Debug, Default)]
pub struct Interner {
    /// Symbol index (minus one) to string.
    strings: Vec<Box<str>>,
    /// Reverse mapping for deduplication.
    map: HashMap<Box<str>, Symbol>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an interner sized for roughly `count` distinct strings.
    pub fn with_capacity(count: usize) -> Self {
        Self {
            strings: Vec::with_capacity(count),
            map: HashMap::with_capacity(count),
        }
    }

    /// Number of distinct strings interned so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Interns `name`, returning the symbol for it. Interning the same
    /// string twice returns the same symbol.
    pub fn intern(&mut self, name: &str) -> Symbol {
        if let Some(&sym) = self.map.get(name) {
            return sym;
        }
        let idx = u32::try_from(self.strings.len() + 1).expect("interner overflow");
        // Indices start at 1, so the NonZeroU32 constructor cannot fail.
        let sym = Symbol(NonZeroU32::new(idx).unwrap());
        self.strings.push(name.into());
        self.map.insert(name.into(), sym);
        sym
    }

    /// Resolves a symbol to its string.
    ///
    /// # Panics
    ///
    /// Panics if `sym` did not come from this interner.
    #[inline]
    pub fn lookup(&self, sym: Symbol) -> &str {
        &self.strings[sym.0.get() as usize - 1]
    }

    /// Resolves a symbol to its string, or `None` for a foreign or
    /// sentinel symbol.
    #[inline]
    pub fn get(&self, sym: Symbol) -> Option<&str> {
        self.strings
            .get(sym.0.get() as usize - 1)
            .map(|s| s.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_interner() {
        let interner = Interner::new();
        assert_eq!(interner.len(), 0);
        assert!(interner.is_empty());
    }

    #[test]
    fn intern_returns_stable_symbols() {
        let mut interner = Interner::new();
        let a = interner.intern("entry");
        let b = interner.intern("exit");
        let a2 = interner.intern("entry");

        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert_eq!(interner.len(), 2);
        assert_eq!(interner.lookup(a), "entry");
        assert_eq!(interner.lookup(b), "exit");
    }

    #[test]
    fn intern_empty_string() {
        let mut interner = Interner::new();
        let sym = interner.intern("");
        assert_eq!(interner.lookup(sym), "");
        assert_eq!(interner.intern(""), sym);
        assert_eq!(interner.len(), 1);
    }

    #[test]
    fn get_rejects_foreign_symbols() {
        let interner = Interner::new();
        assert_eq!(interner.get(Symbol::default()), None);
    }

    #[test]
    fn option_symbol_is_free() {
        use std::mem::size_of;
        assert_eq!(size_of::<Option<Symbol>>(), size_of::<Symbol>());
    }
}
