//! Structural verification against the operation registry.
//!
//! Checks run per operation, over the whole tree rooted at the verified
//! operation:
//!
//! 1. the name is registered, unless the context allows unknown dialects;
//! 2. operand, result, region and successor counts match the declared
//!    arities, then the registered verifier hook passes;
//! 3. operands reference live values and appear in their use lists;
//! 4. successors live in the region of the operation's block;
//! 5. nothing inside an isolated-from-above operation uses a value defined
//!    outside it.

use std::collections::HashSet;
use std::fmt;
use std::ops::ControlFlow;

use tracing::debug;

use crate::context::{IrContext, Use};
use crate::error::{IrError, Result};
use crate::printer::{PrintOptions, print_op};
use crate::refs::{OpRef, RegionRef, ValueRef};
use crate::types::Location;
use crate::walk::{WalkAction, WalkOrder, walk_op, walk_region};

// ============================================================================
// Diagnostics
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Note => "note",
        })
    }
}

/// A located message with optional attached notes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub location: Location,
    pub message: String,
    pub notes: Vec<Diagnostic>,
}

impl Diagnostic {
    pub fn error(location: Location, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            location,
            message: message.into(),
            notes: Vec::new(),
        }
    }

    pub fn with_note(mut self, location: Location, message: impl Into<String>) -> Self {
        self.notes.push(Diagnostic {
            severity: Severity::Note,
            location,
            message: message.into(),
            notes: Vec::new(),
        });
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.severity, self.location, self.message)?;
        for note in &self.notes {
            write!(f, "\n {note}")?;
        }
        Ok(())
    }
}

/// Every diagnostic produced by one failed verification.
#[derive(Clone, PartialEq, Eq)]
pub struct VerificationError {
    pub diagnostics: Vec<Diagnostic>,
}

impl fmt::Display for VerificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Verification failed:")?;
        for diag in &self.diagnostics {
            write!(f, "\n{diag}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for VerificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl std::error::Error for VerificationError {}

// ============================================================================
// Driver
// ============================================================================

impl IrContext {
    /// Verify `op` and everything nested in it.
    pub fn verify(&self, op: OpRef) -> Result<()> {
        let diagnostics = self.diagnostics(op)?;
        if diagnostics.is_empty() {
            return Ok(());
        }
        debug!(%op, count = diagnostics.len(), "verification failed");
        Err(IrError::Verification(VerificationError { diagnostics }))
    }

    /// Boolean form of [`IrContext::verify`]. Invalid handles count as
    /// invalid.
    pub fn is_valid(&self, op: OpRef) -> bool {
        self.verify(op).is_ok()
    }

    /// Collect the diagnostics of every check without failing.
    pub fn diagnostics(&self, op: OpRef) -> Result<Vec<Diagnostic>> {
        self.check_op(op)?;
        let mut verifier = Verifier {
            ctx: self,
            diagnostics: Vec::new(),
        };
        let _ = walk_op::<()>(self, op, WalkOrder::PreOrder, &mut |o| {
            verifier.verify_op(o);
            ControlFlow::Continue(WalkAction::Advance)
        });
        Ok(verifier.diagnostics)
    }
}

struct Verifier<'a> {
    ctx: &'a IrContext,
    diagnostics: Vec<Diagnostic>,
}

impl Verifier<'_> {
    fn emit(&mut self, op: OpRef, message: String) {
        let location = self.ctx.op_data(op).location();
        let generic = PrintOptions::default().generic(true);
        let current = print_op(self.ctx, op, &generic).unwrap_or_else(|e| e.to_string());
        self.diagnostics.push(
            Diagnostic::error(location, message)
                .with_note(location, format!("see current operation: {current}")),
        );
    }

    fn verify_op(&mut self, op: OpRef) {
        let ctx = self.ctx;
        let data = ctx.op_data(op);
        let name = data.name();

        for (i, &v) in data.operands().iter().enumerate() {
            if ctx.check_value(v).is_err() {
                self.emit(op, format!("'{name}' op operand #{i} does not reference a live value"));
                continue;
            }
            let expected = Use {
                user: op,
                operand_index: i as u32,
            };
            if !ctx.uses_unchecked(v).contains(&expected) {
                self.emit(
                    op,
                    format!("'{name}' op operand #{i} is missing from the use list of its value"),
                );
            }
        }

        if let Some(block) = data.parent_block() {
            let region = ctx.block_data(block).parent_region();
            for (i, &succ) in data.successors().iter().enumerate() {
                let same_region = ctx
                    .check_block(succ)
                    .is_ok_and(|b| b.parent_region() == region);
                if !same_region {
                    self.emit(
                        op,
                        format!("'{name}' op successor #{i} is not in the same region"),
                    );
                }
            }
        }

        let Some(info) = ctx.registry().lookup(name) else {
            if !ctx.options().allow_unregistered_dialects {
                self.emit(
                    op,
                    format!(
                        "unregistered operation '{name}' found in dialect ('{}') that does not allow unknown operations",
                        name.dialect_prefix()
                    ),
                );
            }
            return;
        };

        let counts = [
            (info.operand_arity(), data.operands().len(), "operand"),
            (info.result_arity(), data.results().len(), "result"),
            (info.region_arity(), data.regions().len(), "region"),
            (info.successor_arity(), data.successors().len(), "successor"),
        ];
        let mut arity_ok = true;
        for (arity, n, noun) in counts {
            if !arity.accepts(n) {
                arity_ok = false;
                self.emit(op, format!("'{name}' op {}", arity.requirement(noun)));
            }
        }
        if !arity_ok {
            return;
        }

        if let Some(hook) = info.verifier_fn()
            && let Err(message) = hook(ctx, op)
        {
            self.emit(op, format!("'{name}' op {message}"));
        }

        if info.is_isolated_from_above() {
            self.verify_isolation(op);
        }
    }

    /// Report every use, anywhere under `op`, of a value defined outside it.
    fn verify_isolation(&mut self, op: OpRef) {
        let ctx = self.ctx;
        let regions: Vec<RegionRef> = ctx.op_data(op).regions().to_vec();
        let mut defined: HashSet<ValueRef> = HashSet::new();
        for &region in &regions {
            let _ = walk_region::<()>(ctx, region, WalkOrder::PreOrder, &mut |o| {
                defined.extend(ctx.op_data(o).results().iter().copied());
                for &r in ctx.op_data(o).regions() {
                    for &b in ctx.region_data(r).blocks() {
                        defined.extend(ctx.block_data(b).args().iter().copied());
                    }
                }
                ControlFlow::Continue(WalkAction::Advance)
            });
            for &b in ctx.region_data(region).blocks() {
                defined.extend(ctx.block_data(b).args().iter().copied());
            }
        }

        let mut offenders = Vec::new();
        for &region in &regions {
            let _ = walk_region::<()>(ctx, region, WalkOrder::PreOrder, &mut |o| {
                if ctx
                    .op_data(o)
                    .operands()
                    .iter()
                    .any(|v| ctx.check_value(*v).is_ok() && !defined.contains(v))
                {
                    offenders.push(o);
                }
                ControlFlow::Continue(WalkAction::Advance)
            });
        }
        let owner = ctx.op_data(op).name();
        for o in offenders {
            let name = ctx.op_data(o).name();
            self.emit(
                o,
                format!(
                    "'{name}' op using value defined outside the region of isolated '{owner}'"
                ),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextOptions, OperationState};
    use crate::dialect::builtin::ModuleOp;
    use crate::error::ErrorKind;
    use crate::registry::{Arity, OpInfo, RegisterMode};

    #[test]
    fn fresh_module_verifies() {
        let mut ctx = IrContext::new();
        let module = ModuleOp::create(&mut ctx, Location::Unknown);
        assert!(ctx.verify(module.op_ref()).is_ok());
        assert!(ctx.is_valid(module.op_ref()));
    }

    #[test]
    fn module_without_region_reports_arity() {
        let mut ctx = IrContext::new();
        let op = ctx
            .create_op(OperationState::new("builtin.module"))
            .unwrap();
        let err = ctx.verify(op).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::VerificationFailure);
        let text = err.to_string();
        assert!(text.starts_with("Verification failed:"), "{text}");
        assert!(text.contains("'builtin.module' op requires one region"), "{text}");
        assert!(text.contains("see current operation: \"builtin.module\"() : () -> ()"));
    }

    #[test]
    fn unregistered_operations_depend_on_context_options() {
        let mut ctx = IrContext::new();
        let op = ctx.create_op(OperationState::new("custom.op")).unwrap();
        let diags = ctx.diagnostics(op).unwrap();
        assert_eq!(diags.len(), 1);
        assert_eq!(
            diags[0].message,
            "unregistered operation 'custom.op' found in dialect ('custom') that does not allow unknown operations"
        );

        let mut lenient = IrContext::with_options(ContextOptions {
            allow_unregistered_dialects: true,
        });
        let op = lenient.create_op(OperationState::new("custom.op")).unwrap();
        assert!(lenient.is_valid(op));
    }

    #[test]
    fn registered_verifier_hook_runs_after_arity() {
        let mut ctx = IrContext::new();
        ctx.registry_mut()
            .register(
                OpInfo::new("custom.pair")
                    .results(Arity::Exactly(2))
                    .verifier(|_, _| Err("pairs are never valid".to_owned())),
                RegisterMode::Reject,
            )
            .unwrap();
        let i32_ty = ctx.types.int(32);

        let short = ctx
            .create_op(OperationState::new("custom.pair").result(i32_ty))
            .unwrap();
        let diags = ctx.diagnostics(short).unwrap();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].message, "'custom.pair' op requires 2 results");

        let pair = ctx
            .create_op(OperationState::new("custom.pair").results([i32_ty, i32_ty]))
            .unwrap();
        let diags = ctx.diagnostics(pair).unwrap();
        assert_eq!(diags[0].message, "'custom.pair' op pairs are never valid");
    }

    #[test]
    fn isolated_regions_reject_outside_values() {
        let mut ctx = IrContext::with_options(ContextOptions {
            allow_unregistered_dialects: true,
        });
        let i32_ty = ctx.types.int(32);
        let outer = ctx
            .create_op(OperationState::new("custom.outer").regions(1))
            .unwrap();
        let outer_region = ctx.regions(outer).unwrap().get(0).unwrap();
        let outer_block = ctx.append_block(outer_region, &[i32_ty]).unwrap();
        let arg = ctx.block_args(outer_block).unwrap().get(0).unwrap();

        let module = ModuleOp::create(&mut ctx, Location::Unknown);
        ctx.append_op(outer_block, module.op_ref()).unwrap();
        let user = ctx
            .create_op(OperationState::new("custom.user").operand(arg))
            .unwrap();
        module.push(&mut ctx, user).unwrap();

        let diags = ctx.diagnostics(outer).unwrap();
        assert_eq!(diags.len(), 1);
        assert!(
            diags[0]
                .message
                .starts_with("'custom.user' op using value defined outside the region")
        );
    }

    #[test]
    fn verification_does_not_mutate_the_tree() {
        let mut ctx = IrContext::new();
        let op = ctx.create_op(OperationState::new("custom.op")).unwrap();
        let before = ctx.live_counts();
        assert!(!ctx.is_valid(op));
        assert_eq!(ctx.live_counts(), before);
        assert_eq!(ctx.op_name(op).unwrap(), "custom.op");
    }
}
