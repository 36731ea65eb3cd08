//! The `builtin` dialect: `builtin.module`.

use std::any::Any;
use std::fmt::{self, Write};

use crate::attributes::{Attribute, AttributeDict};
use crate::context::IrContext;
use crate::dialect::DialectOp;
use crate::error::Result;
use crate::printer::OpAsmPrinter;
use crate::refs::{BlockRef, OpRef, RegionRef};
use crate::registry::{Arity, OpInfo, OpRegistry, OpView, RegisterMode};
use crate::symbol::Symbol;
use crate::types::Location;

crate::symbols! {
    MODULE => "builtin.module",
}

/// Register the builtin operations. Called for every new context.
pub(crate) fn register(registry: &mut OpRegistry) {
    let module = OpInfo::new(ModuleOp::NAME)
        .operands(Arity::Exactly(0))
        .results(Arity::Exactly(0))
        .regions(Arity::Exactly(1))
        .successors(Arity::Exactly(0))
        .isolated_from_above()
        .verifier(verify_module)
        .view(|op| Box::new(ModuleOp(op)))
        .custom_printer(print_module);
    let _ = registry.register(module, RegisterMode::Replace);
}

fn verify_module(ctx: &IrContext, op: OpRef) -> std::result::Result<(), String> {
    let region = ctx.op_data(op).regions()[0];
    let blocks = ctx.region_data(region).blocks();
    if blocks.len() > 1 {
        return Err("expects region #0 to have 0 or 1 blocks".to_owned());
    }
    if let Some(&body) = blocks.first()
        && !ctx.block_data(body).args().is_empty()
    {
        return Err("expected body to have no arguments".to_owned());
    }
    if let Some(name) = ctx.op_data(op).attributes().get("sym_name")
        && !matches!(ctx.attrs.try_get(name), Some(Attribute::String(_)))
    {
        return Err("attribute 'sym_name' must be a string".to_owned());
    }
    Ok(())
}

/// `module [@name] [attributes {...}] { ... }`
fn print_module(p: &mut OpAsmPrinter<'_>, op: OpRef) -> fmt::Result {
    let ctx = p.ctx();
    let data = ctx.op_data(op);
    p.write_str("module")?;
    if let Some(Attribute::String(name)) = data
        .attributes()
        .get("sym_name")
        .and_then(|a| ctx.attrs.try_get(a))
    {
        p.write_char(' ')?;
        p.print_symbol(Symbol::from_dynamic(name))?;
    }
    p.print_optional_attr_dict_with_keyword(op, &["sym_name"])?;
    p.write_char(' ')?;
    p.print_region(data.regions()[0], false, false)
}

/// Top-level container operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModuleOp(OpRef);

impl DialectOp for ModuleOp {
    const NAME: &'static str = "builtin.module";

    fn wrap(op: OpRef) -> Self {
        ModuleOp(op)
    }

    fn op_ref(&self) -> OpRef {
        self.0
    }
}

impl OpView for ModuleOp {
    fn op_ref(&self) -> OpRef {
        self.0
    }

    fn view_name(&self) -> &'static str {
        "ModuleOp"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl ModuleOp {
    pub fn op_ref(&self) -> OpRef {
        self.0
    }

    /// Create a detached module with one empty body block.
    pub fn create(ctx: &mut IrContext, location: Location) -> Self {
        let op = ctx.alloc_op(MODULE(), location, &[], &[], AttributeDict::new(), 1, &[]);
        let region = ctx.op_data(op).regions()[0];
        ctx.alloc_block(region, &[]);
        ModuleOp(op)
    }

    pub fn body_region(&self, ctx: &IrContext) -> Result<RegionRef> {
        ctx.regions(self.0)?.get(0)
    }

    /// The single body block.
    pub fn body(&self, ctx: &IrContext) -> Result<BlockRef> {
        ctx.blocks(self.body_region(ctx)?)?.get(0)
    }

    /// Value of the `sym_name` attribute, if set.
    pub fn name(&self, ctx: &IrContext) -> Result<Option<String>> {
        let attrs = ctx.attributes(self.0)?;
        Ok(match attrs.get("sym_name").map(|a| ctx.attrs.try_get(a)) {
            Some(Some(Attribute::String(s))) => Some(s.clone()),
            _ => None,
        })
    }

    pub fn set_name(&self, ctx: &mut IrContext, name: &str) -> Result<()> {
        let attr = ctx.attrs.string(name);
        ctx.set_attribute(self.0, "sym_name", attr)?;
        Ok(())
    }

    /// Append a detached operation to the body block.
    pub fn push(&self, ctx: &mut IrContext, op: OpRef) -> Result<()> {
        let body = self.body(ctx)?;
        ctx.append_op(body, op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::OperationState;
    use crate::error::ErrorKind;
    use crate::printer::{PrintOptions, print_op};

    #[test]
    fn module_prints_in_custom_form() {
        let mut ctx = IrContext::new();
        let module = ModuleOp::create(&mut ctx, Location::Unknown);
        let op = ctx
            .create_op(OperationState::new("builtin.module").regions(1))
            .unwrap();
        let region = ctx.regions(op).unwrap().get(0).unwrap();
        ctx.append_block(region, &[]).unwrap();
        module.push(&mut ctx, op).unwrap();
        module.set_name(&mut ctx, "outer").unwrap();

        let text = print_op(&ctx, module.op_ref(), &PrintOptions::default()).unwrap();
        insta::assert_snapshot!(text, @r"
        module @outer {
          module {
          }
        }
        ");
    }

    #[test]
    fn empty_module_prints_braces() {
        let mut ctx = IrContext::new();
        let module = ModuleOp::create(&mut ctx, Location::Unknown);
        let text = print_op(&ctx, module.op_ref(), &PrintOptions::default()).unwrap();
        assert_eq!(text, "module {\n}");
    }

    #[test]
    fn invalid_module_falls_back_to_generic_form() {
        let mut ctx = IrContext::new();
        let op = ctx
            .create_op(OperationState::new("builtin.module").regions(2))
            .unwrap();
        let first = ctx.regions(op).unwrap().get(0).unwrap();
        ctx.append_block(first, &[]).unwrap();

        let text = print_op(&ctx, op, &PrintOptions::default()).unwrap();
        assert_eq!(text, "\"builtin.module\"() ({\n^bb0:\n}, {\n}) : () -> ()");
    }

    #[test]
    fn from_op_checks_the_name() {
        let mut ctx = IrContext::new();
        let module = ModuleOp::create(&mut ctx, Location::Unknown);
        assert!(ModuleOp::from_op(&ctx, module.op_ref()).is_ok());
        assert!(ModuleOp::matches(&ctx, module.op_ref()));

        let other = ctx.create_op(OperationState::new("custom.op")).unwrap();
        let err = ModuleOp::from_op(&ctx, other).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NameMismatch);
        assert_eq!(
            err.to_string(),
            "Expected a 'builtin.module' op, got: 'custom.op'"
        );
    }

    #[test]
    fn module_view_is_specialized() {
        let mut ctx = IrContext::new();
        let module = ModuleOp::create(&mut ctx, Location::Unknown);
        let view = ctx.view(module.op_ref()).unwrap();
        assert_eq!(view.view_name(), "ModuleOp");
        assert_eq!(view.downcast_ref::<ModuleOp>(), Some(&module));
    }

    #[test]
    fn module_name_round_trips() {
        let mut ctx = IrContext::new();
        let module = ModuleOp::create(&mut ctx, Location::Unknown);
        assert_eq!(module.name(&ctx).unwrap(), None);
        module.set_name(&mut ctx, "m").unwrap();
        assert_eq!(module.name(&ctx).unwrap().as_deref(), Some("m"));
    }
}
