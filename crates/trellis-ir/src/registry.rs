//! Operation registry: structural contracts, verifiers and specialized views.
//!
//! The registry maps an operation name to an [`OpInfo`]. Verification uses
//! the declared arities and the optional verifier hook; the printer uses the
//! optional custom-form hook; [`IrContext::view`] uses the view factory.
//!
//! View resolution is memoized per name. Any registration that could change
//! the answer for a name invalidates its cache entry, including entries
//! that recorded "no specialized view".

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use crate::context::IrContext;
use crate::error::{IrError, Result};
use crate::printer::OpAsmPrinter;
use crate::refs::OpRef;
use crate::symbol::Symbol;

/// Custom structural check run after the arity checks pass.
pub type OpVerifier = fn(&IrContext, OpRef) -> std::result::Result<(), String>;

/// Builds a specialized view over an operation.
pub type ViewFactory = fn(OpRef) -> Box<dyn OpView>;

/// Prints the custom form of an operation, starting after the result list.
pub type CustomPrinter = fn(&mut OpAsmPrinter<'_>, OpRef) -> fmt::Result;

// ============================================================================
// Arity
// ============================================================================

/// Expected number of operands, results, regions or successors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Arity {
    Exactly(usize),
    AtLeast(usize),
    #[default]
    Any,
}

impl Arity {
    pub fn accepts(self, n: usize) -> bool {
        match self {
            Arity::Exactly(k) => n == k,
            Arity::AtLeast(k) => n >= k,
            Arity::Any => true,
        }
    }

    /// `requires one region`, `requires at least 2 operands`, ...
    pub(crate) fn requirement(self, noun: &str) -> String {
        let count = |k: usize| match k {
            0 => "zero".to_owned(),
            1 => "one".to_owned(),
            k => k.to_string(),
        };
        let plural = |k: usize| if k == 1 { "" } else { "s" };
        match self {
            Arity::Exactly(k) => format!("requires {} {noun}{}", count(k), plural(k)),
            Arity::AtLeast(k) => format!("requires at least {} {noun}{}", count(k), plural(k)),
            Arity::Any => format!("accepts any number of {noun}s"),
        }
    }
}

// ============================================================================
// OpInfo
// ============================================================================

/// Registered contract of one operation name.
#[derive(Clone)]
pub struct OpInfo {
    name: Symbol,
    operands: Arity,
    results: Arity,
    regions: Arity,
    successors: Arity,
    isolated_from_above: bool,
    verifier: Option<OpVerifier>,
    view: Option<ViewFactory>,
    printer: Option<CustomPrinter>,
}

impl OpInfo {
    pub fn new(name: &str) -> Self {
        Self {
            name: Symbol::from_dynamic(name),
            operands: Arity::Any,
            results: Arity::Any,
            regions: Arity::Any,
            successors: Arity::Any,
            isolated_from_above: false,
            verifier: None,
            view: None,
            printer: None,
        }
    }

    pub fn operands(mut self, arity: Arity) -> Self {
        self.operands = arity;
        self
    }

    pub fn results(mut self, arity: Arity) -> Self {
        self.results = arity;
        self
    }

    pub fn regions(mut self, arity: Arity) -> Self {
        self.regions = arity;
        self
    }

    pub fn successors(mut self, arity: Arity) -> Self {
        self.successors = arity;
        self
    }

    /// Nested operations may not use values defined outside this op.
    pub fn isolated_from_above(mut self) -> Self {
        self.isolated_from_above = true;
        self
    }

    pub fn verifier(mut self, f: OpVerifier) -> Self {
        self.verifier = Some(f);
        self
    }

    pub fn view(mut self, f: ViewFactory) -> Self {
        self.view = Some(f);
        self
    }

    pub fn custom_printer(mut self, f: CustomPrinter) -> Self {
        self.printer = Some(f);
        self
    }

    pub fn name(&self) -> Symbol {
        self.name
    }

    pub fn operand_arity(&self) -> Arity {
        self.operands
    }

    pub fn result_arity(&self) -> Arity {
        self.results
    }

    pub fn region_arity(&self) -> Arity {
        self.regions
    }

    pub fn successor_arity(&self) -> Arity {
        self.successors
    }

    pub fn is_isolated_from_above(&self) -> bool {
        self.isolated_from_above
    }

    pub fn verifier_fn(&self) -> Option<OpVerifier> {
        self.verifier
    }

    pub fn printer_fn(&self) -> Option<CustomPrinter> {
        self.printer
    }
}

impl fmt::Debug for OpInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpInfo")
            .field("name", &self.name)
            .field("operands", &self.operands)
            .field("results", &self.results)
            .field("regions", &self.regions)
            .field("successors", &self.successors)
            .field("isolated_from_above", &self.isolated_from_above)
            .field("has_verifier", &self.verifier.is_some())
            .field("has_view", &self.view.is_some())
            .field("has_printer", &self.printer.is_some())
            .finish()
    }
}

// ============================================================================
// Views
// ============================================================================

/// Capability surface shared by every view over an operation.
pub trait OpView: Any {
    fn op_ref(&self) -> OpRef;

    /// Name of the view kind, e.g. `"ModuleOp"` or `"OpView"`.
    fn view_name(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;
}

impl dyn OpView {
    /// Downcast to a concrete view type.
    pub fn downcast_ref<T: OpView>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

impl fmt::Debug for dyn OpView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.view_name(), self.op_ref())
    }
}

/// View used for names without a specialized factory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GenericView(pub OpRef);

impl OpView for GenericView {
    fn op_ref(&self) -> OpRef {
        self.0
    }

    fn view_name(&self) -> &'static str {
        "OpView"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// OpRegistry
// ============================================================================

/// What to do when registering a name that already has an entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RegisterMode {
    #[default]
    Reject,
    Replace,
}

#[derive(Default)]
pub struct OpRegistry {
    ops: HashMap<Symbol, OpInfo>,
    /// Fallback factories for every op of a dialect, keyed by dialect name.
    dialect_views: HashMap<String, ViewFactory>,
    view_cache: RefCell<HashMap<Symbol, Option<ViewFactory>>>,
}

impl OpRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, info: OpInfo, mode: RegisterMode) -> Result<()> {
        let name = info.name;
        if self.ops.contains_key(&name) {
            if mode == RegisterMode::Reject {
                return Err(IrError::AlreadyRegistered {
                    name: name.to_string(),
                });
            }
            debug!(%name, "replacing registered operation");
        }
        self.ops.insert(name, info);
        self.view_cache.borrow_mut().remove(&name);
        Ok(())
    }

    /// Register a view factory for every operation of `dialect` that has
    /// no op-level factory.
    pub fn register_dialect_view(&mut self, dialect: &str, factory: ViewFactory) {
        self.dialect_views.insert(dialect.to_owned(), factory);
        self.view_cache.borrow_mut().clear();
    }

    pub fn lookup(&self, name: Symbol) -> Option<&OpInfo> {
        self.ops.get(&name)
    }

    pub fn is_registered(&self, name: Symbol) -> bool {
        self.ops.contains_key(&name)
    }

    /// Whether any operation of `dialect` is registered.
    pub fn has_dialect(&self, dialect: &str) -> bool {
        self.dialect_views.contains_key(dialect)
            || self.ops.keys().any(|n| n.dialect_prefix() == dialect)
    }

    pub(crate) fn resolve_view(&self, name: Symbol) -> Option<ViewFactory> {
        if let Some(cached) = self.view_cache.borrow().get(&name) {
            return *cached;
        }
        let factory = self
            .ops
            .get(&name)
            .and_then(|info| info.view)
            .or_else(|| self.dialect_views.get(&name.dialect_prefix()).copied());
        self.view_cache.borrow_mut().insert(name, factory);
        factory
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl IrContext {
    /// Specialized view of `op`, or a [`GenericView`] for unregistered names.
    pub fn view(&self, op: OpRef) -> Result<Box<dyn OpView>> {
        let name = self.check_op(op)?.name();
        Ok(match self.registry.resolve_view(name) {
            Some(factory) => factory(op),
            None => Box::new(GenericView(op)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::OperationState;
    use crate::error::ErrorKind;

    #[derive(Debug)]
    struct CustomView(OpRef);

    impl OpView for CustomView {
        fn op_ref(&self) -> OpRef {
            self.0
        }

        fn view_name(&self) -> &'static str {
            "CustomView"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[derive(Debug)]
    struct ReplacementView(OpRef);

    impl OpView for ReplacementView {
        fn op_ref(&self) -> OpRef {
            self.0
        }

        fn view_name(&self) -> &'static str {
            "ReplacementView"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn arity_requirements_read_naturally() {
        assert_eq!(Arity::Exactly(1).requirement("region"), "requires one region");
        assert_eq!(Arity::Exactly(0).requirement("result"), "requires zero results");
        assert_eq!(
            Arity::AtLeast(2).requirement("operand"),
            "requires at least 2 operands"
        );
        assert!(Arity::Any.accepts(17));
        assert!(!Arity::Exactly(1).accepts(2));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = OpRegistry::new();
        registry
            .register(OpInfo::new("custom.op"), RegisterMode::Reject)
            .unwrap();
        let err = registry
            .register(OpInfo::new("custom.op"), RegisterMode::Reject)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Registry);
    }

    #[test]
    fn late_registration_overrides_cached_lookups() {
        let mut ctx = IrContext::new();
        let op = ctx.create_op(OperationState::new("custom.op")).unwrap();

        assert_eq!(ctx.view(op).unwrap().view_name(), "OpView");

        ctx.registry_mut()
            .register(
                OpInfo::new("custom.op").view(|op| Box::new(CustomView(op))),
                RegisterMode::Reject,
            )
            .unwrap();
        let view = ctx.view(op).unwrap();
        assert!(view.downcast_ref::<CustomView>().is_some());

        ctx.registry_mut()
            .register(
                OpInfo::new("custom.op").view(|op| Box::new(ReplacementView(op))),
                RegisterMode::Replace,
            )
            .unwrap();
        assert_eq!(ctx.view(op).unwrap().view_name(), "ReplacementView");
    }

    #[test]
    fn dialect_views_apply_to_every_op_of_the_dialect() {
        let mut ctx = IrContext::new();
        let a = ctx.create_op(OperationState::new("custom.a")).unwrap();
        let other = ctx.create_op(OperationState::new("other.b")).unwrap();
        assert_eq!(ctx.view(a).unwrap().view_name(), "OpView");

        ctx.registry_mut()
            .register_dialect_view("custom", |op| Box::new(CustomView(op)));
        assert_eq!(ctx.view(a).unwrap().view_name(), "CustomView");
        assert_eq!(ctx.view(other).unwrap().view_name(), "OpView");
        assert!(ctx.registry().has_dialect("custom"));
    }
}
