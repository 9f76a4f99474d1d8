//! Interned names. Every identifier in the AST, every tag, field and label
//! name is resolved to a [`Symbol`] on construction, so the rest of the
//! crate compares names by `u32` equality.

use std::fmt;
use std::sync::{LazyLock, Mutex};
use hashbrown::HashMap;

/// An interned string. Symbols are never freed; they live as long as the
/// process, which is also the lifetime of the interner itself.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

impl Symbol {
  /// The index of this symbol in the interner table.
  #[must_use] pub fn into_usize(self) -> usize { self.0 as usize }
}

/// The string interner. Normally accessed through the global [`intern`]
/// function; exposed for callers that want to pre-intern a batch of names.
#[derive(Default)]
pub struct Interner {
  names: HashMap<&'static str, Symbol>,
  strs: Vec<&'static str>,
}

impl Interner {
  /// Intern a string, returning the canonical symbol for it.
  pub fn intern(&mut self, s: &str) -> Symbol {
    if let Some(&sym) = self.names.get(s) { return sym }
    let sym = Symbol(u32::try_from(self.strs.len()).expect("too many symbols"));
    let s: &'static str = Box::leak(s.to_owned().into_boxed_str());
    self.strs.push(s);
    self.names.insert(s, sym);
    sym
  }

  fn get(&self, sym: Symbol) -> &'static str { self.strs[sym.into_usize()] }
}

static INTERNER: LazyLock<Mutex<Interner>> = LazyLock::new(Default::default);

/// Intern a string in the global interner.
#[must_use] pub fn intern(s: &str) -> Symbol { INTERNER.lock().unwrap().intern(s) }

impl Symbol {
  /// Get the string for this symbol.
  #[must_use] pub fn as_str(self) -> &'static str { INTERNER.lock().unwrap().get(self) }
}

impl fmt::Display for Symbol {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.as_str().fmt(f) }
}

impl fmt::Debug for Symbol {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.as_str().fmt(f) }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn interning_is_idempotent() {
    let a = intern("foo");
    let b = intern("foo");
    assert_eq!(a, b);
    assert_ne!(a, intern("bar"));
    assert_eq!(a.as_str(), "foo");
  }
}
