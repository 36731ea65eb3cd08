use trellis_ir::{
    ErrorKind, IrContext, OpRef, OperationState, WalkOrder, WalkOutcome, WalkResult, parse_module,
};

const FUNC: &str = r#"module {
  "func.func"() ({
    "func.return"() : () -> ()
  }) : () -> ()
}"#;

fn lenient() -> IrContext {
    let mut ctx = IrContext::new();
    ctx.set_allow_unregistered_dialects(true);
    ctx
}

fn names(ctx: &IrContext, root: OpRef, order: WalkOrder, skip_root: bool) -> Vec<String> {
    let mut seen = Vec::new();
    ctx.walk(root, order, |op| {
        seen.push(ctx.op_name(op)?.to_string());
        if skip_root && op == root {
            return Ok::<_, trellis_ir::IrError>(WalkResult::Skip);
        }
        Ok(WalkResult::Advance)
    })
    .unwrap();
    seen
}

#[test]
fn test_default_order_is_post_order() {
    let mut ctx = lenient();
    let module = parse_module(&mut ctx, FUNC).unwrap();
    let root = module.op_ref();

    assert_eq!(WalkOrder::default(), WalkOrder::PostOrder);
    assert_eq!(
        names(&ctx, root, WalkOrder::default(), false),
        ["func.return", "func.func", "builtin.module"]
    );
    assert_eq!(
        names(&ctx, root, WalkOrder::PreOrder, false),
        ["builtin.module", "func.func", "func.return"]
    );
}

#[test]
fn test_skip_suppresses_descent_in_pre_order_only() {
    let mut ctx = lenient();
    let root = parse_module(&mut ctx, FUNC).unwrap().op_ref();

    assert_eq!(names(&ctx, root, WalkOrder::PreOrder, true), ["builtin.module"]);
    assert_eq!(
        names(&ctx, root, WalkOrder::PostOrder, true),
        ["func.return", "func.func", "builtin.module"]
    );
}

#[test]
fn test_interrupt_stops_after_current_node() {
    let mut ctx = lenient();
    let root = parse_module(&mut ctx, FUNC).unwrap().op_ref();

    let mut visited = 0;
    let outcome = ctx
        .walk(root, WalkOrder::PostOrder, |_| {
            visited += 1;
            Ok::<_, std::convert::Infallible>(if visited == 2 {
                WalkResult::Interrupt
            } else {
                WalkResult::Advance
            })
        })
        .unwrap();
    assert_eq!(outcome, WalkOutcome::Interrupted);
    assert!(outcome.was_interrupted());
    assert_eq!(visited, 2);
}

#[test]
fn test_callback_failure_is_not_an_interrupt() {
    let mut ctx = lenient();
    let root = parse_module(&mut ctx, FUNC).unwrap().op_ref();

    let mut visited = 0;
    let err = ctx
        .walk(root, WalkOrder::PreOrder, |_| {
            visited += 1;
            Err::<WalkResult, _>("visitor exploded")
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UserCallbackFailure);
    assert_eq!(err.to_string(), "walk callback failed: visitor exploded");
    assert_eq!(visited, 1);
}

#[test]
fn test_deep_nesting_does_not_overflow() {
    let mut ctx = lenient();
    let depth = 5_000;
    let root = ctx
        .create_op(OperationState::new("test.wrap").regions(1))
        .unwrap();
    let mut parent = root;
    for _ in 0..depth {
        let region = ctx.regions(parent).unwrap().get(0).unwrap();
        let block = ctx.append_block(region, &[]).unwrap();
        let child = ctx
            .create_op(OperationState::new("test.wrap").regions(1))
            .unwrap();
        ctx.append_op(block, child).unwrap();
        parent = child;
    }

    let mut count = 0usize;
    let outcome = ctx
        .walk(root, WalkOrder::PostOrder, |_| {
            count += 1;
            Ok::<_, std::convert::Infallible>(WalkResult::Advance)
        })
        .unwrap();
    assert_eq!(outcome, WalkOutcome::Completed);
    assert_eq!(count, depth + 1);
}
