//! Process-wide string interning for operation names, attribute keys and
//! symbol references.

use std::cmp::Ordering;
use std::fmt;
use std::sync::LazyLock;

use lasso::{Rodeo, Spur};
use parking_lot::RwLock;

static INTERNER: LazyLock<RwLock<Rodeo>> = LazyLock::new(|| RwLock::new(Rodeo::default()));

/// Interned string with 4-byte keys.
///
/// Equality and hashing compare keys. [`Symbol::cmp_str`] orders by text,
/// which is what the attribute dictionary and printer use.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Symbol(Spur);

impl Symbol {
    /// Intern a static string. Prefer this over `from_dynamic` when possible.
    pub fn new(text: &'static str) -> Self {
        Self::get_or_else(text, |rodeo| rodeo.get_or_intern_static(text))
    }

    /// Intern a runtime string.
    pub fn from_dynamic(text: &str) -> Self {
        Self::get_or_else(text, |rodeo| rodeo.get_or_intern(text))
    }

    fn get_or_else(text: &str, f: impl for<'r> FnOnce(&'r mut Rodeo) -> Spur) -> Self {
        let mut lock = INTERNER.upgradable_read();
        Symbol(if let Some(spur) = lock.get(text) {
            spur
        } else {
            lock.with_upgraded(f)
        })
    }

    /// Access the symbol's text without allocating.
    ///
    /// Uses `read_recursive()` so nested `with_str` calls (Display, `==`)
    /// inside the closure cannot deadlock. Do not intern new symbols from
    /// inside the closure.
    pub fn with_str<R>(&self, f: impl FnOnce(&str) -> R) -> R {
        let interner = INTERNER.read_recursive();
        f(interner.resolve(&self.0))
    }

    /// Lexicographic comparison of the underlying text.
    pub fn cmp_str(&self, other: &Symbol) -> Ordering {
        if self == other {
            return Ordering::Equal;
        }
        let interner = INTERNER.read_recursive();
        interner.resolve(&self.0).cmp(interner.resolve(&other.0))
    }

    /// Split `dialect.op` at the first dot. Names without a dot have an
    /// empty dialect.
    pub fn dialect_prefix(&self) -> String {
        self.with_str(|s| s.split_once('.').map(|(d, _)| d).unwrap_or("").to_owned())
    }
}

impl From<&'static str> for Symbol {
    fn from(text: &'static str) -> Self {
        Symbol::new(text)
    }
}

impl From<&String> for Symbol {
    fn from(text: &String) -> Self {
        Symbol::from_dynamic(text)
    }
}

impl PartialEq<str> for Symbol {
    fn eq(&self, other: &str) -> bool {
        self.with_str(|s| s == other)
    }
}

impl PartialEq<&str> for Symbol {
    fn eq(&self, other: &&str) -> bool {
        self.with_str(|s| s == *other)
    }
}

impl PartialEq<Symbol> for &str {
    fn eq(&self, other: &Symbol) -> bool {
        other.with_str(|s| s == *self)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.with_str(|s| f.write_str(s))
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.with_str(|s| write!(f, "Symbol({s:?})"))
    }
}

/// Declare accessor functions for frequently used symbols.
///
/// ```
/// trellis_ir::symbols! {
///     ATTR_SYM_NAME => "sym_name",
/// }
/// assert_eq!(ATTR_SYM_NAME(), "sym_name");
/// ```
#[macro_export]
macro_rules! symbols {
    ($($(#[$attr:meta])* $name:ident => $text:literal),* $(,)?) => {
        $(
            $(#[$attr])*
            #[allow(non_snake_case)]
            #[inline]
            pub fn $name() -> $crate::Symbol {
                $crate::Symbol::new($text)
            }
        )*
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let a = Symbol::from_dynamic("custom.op1");
        let b = Symbol::new("custom.op1");
        assert_eq!(a, b);
        assert_eq!(a, "custom.op1");
    }

    #[test]
    fn cmp_str_orders_by_text_not_intern_order() {
        let z = Symbol::from_dynamic("zzz_interned_first");
        let a = Symbol::from_dynamic("aaa_interned_second");
        assert_eq!(a.cmp_str(&z), Ordering::Less);
        assert_eq!(z.cmp_str(&a), Ordering::Greater);
        assert_eq!(a.cmp_str(&a), Ordering::Equal);
    }

    #[test]
    fn dialect_prefix_splits_at_first_dot() {
        assert_eq!(Symbol::new("builtin.module").dialect_prefix(), "builtin");
        assert_eq!(Symbol::new("a.b.c").dialect_prefix(), "a");
        assert_eq!(Symbol::new("nodot").dialect_prefix(), "");
    }
}
