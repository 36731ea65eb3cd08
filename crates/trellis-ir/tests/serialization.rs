use trellis_ir::{
    Arity, BytecodeConfig, ErrorKind, IrContext, OpInfo, OperationState, PrintOptions,
    RegisterMode, parse_bytes, parse_module, parse_op, print_op, write_bytecode,
    write_bytecode_to_path,
};

const PROGRAM: &str = r#"module @program {
  %0 = "test.const"() {value = dense<[1, 2, 3, 4]> : tensor<4xi32>} : () -> tensor<4xi32>
  %1:2 = "test.split"(%0) : (tensor<4xi32>) -> (tensor<2xi32>, tensor<2xi32>)
  "test.loop"(%1#0) ({
  ^bb0(%arg0: tensor<2xi32>):
    "test.br"(%arg0)[^bb1] : (tensor<2xi32>) -> ()
  ^bb1:
    "test.yield"(%1#1) : (tensor<2xi32>) -> ()
  }) {note = "loop", unit_flag} : (tensor<2xi32>) -> ()
}"#;

fn lenient() -> IrContext {
    let mut ctx = IrContext::new();
    ctx.set_allow_unregistered_dialects(true);
    ctx
}

#[test]
fn test_bytecode_round_trip_prints_identically() {
    let configs = [
        PrintOptions::default(),
        PrintOptions::default().generic(true),
        PrintOptions::default().elide_elements_above(2),
        PrintOptions::default().debug_info(true, false),
    ];
    for version in [1, 2] {
        let mut ctx = lenient();
        let module = parse_module(&mut ctx, PROGRAM).unwrap();
        let mut bytes = Vec::new();
        write_bytecode(
            &ctx,
            module.op_ref(),
            &BytecodeConfig::new().version(version),
            &mut bytes,
        )
        .unwrap();
        assert_eq!(&bytes[..4], &trellis_ir::bytecode::MAGIC);

        let mut fresh = lenient();
        let root = parse_bytes(&mut fresh, &bytes, "ignored").unwrap();
        for options in &configs {
            assert_eq!(
                print_op(&fresh, root, options).unwrap(),
                print_op(&ctx, module.op_ref(), options).unwrap(),
                "version {version}, options {options:?}"
            );
        }
    }
}

#[test]
fn test_bytecode_to_path() {
    let mut ctx = lenient();
    let module = parse_module(&mut ctx, PROGRAM).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("program.trb");
    write_bytecode_to_path(&ctx, module.op_ref(), &BytecodeConfig::default(), &path).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    let mut fresh = lenient();
    let root = parse_bytes(&mut fresh, &bytes, "program.trb").unwrap();
    assert_eq!(
        print_op(&fresh, root, &PrintOptions::default()).unwrap(),
        PROGRAM
    );
}

#[test]
fn test_text_elision_is_lossy_but_bytecode_is_not() {
    let mut ctx = lenient();
    let module = parse_module(&mut ctx, PROGRAM).unwrap();
    let elided = print_op(
        &ctx,
        module.op_ref(),
        &PrintOptions::default().elide_elements_above(2),
    )
    .unwrap();
    assert!(!elided.contains("dense<[1, 2, 3, 4]>"), "{elided}");

    let mut bytes = Vec::new();
    write_bytecode(&ctx, module.op_ref(), &BytecodeConfig::default(), &mut bytes).unwrap();
    let mut fresh = lenient();
    let root = parse_bytes(&mut fresh, &bytes, "-").unwrap();
    let full = print_op(&fresh, root, &PrintOptions::default()).unwrap();
    assert!(full.contains("dense<[1, 2, 3, 4]>"), "{full}");
}

#[test]
fn test_invalid_tree_stays_printable() {
    let mut ctx = lenient();
    let op = parse_op(&mut ctx, r#""builtin.module"() : () -> ()"#, "input.ir").unwrap();

    let err = ctx.verify(op).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::VerificationFailure);
    insta::assert_snapshot!(err.to_string(), @r#"
    Verification failed:
    error: "input.ir":1:1: 'builtin.module' op requires one region
     note: "input.ir":1:1: see current operation: "builtin.module"() : () -> ()
    "#);

    assert_eq!(
        print_op(&ctx, op, &PrintOptions::default()).unwrap(),
        r#""builtin.module"() : () -> ()"#
    );
}

#[test]
fn test_registry_replacement_changes_verification() {
    let mut ctx = IrContext::new();
    ctx.registry_mut()
        .register(
            OpInfo::new("test.op").operands(Arity::Exactly(1)),
            RegisterMode::Reject,
        )
        .unwrap();
    let op = ctx.create_op(OperationState::new("test.op")).unwrap();
    assert!(!ctx.is_valid(op));

    let err = ctx
        .registry_mut()
        .register(OpInfo::new("test.op"), RegisterMode::Reject)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Registry);

    ctx.registry_mut()
        .register(OpInfo::new("test.op"), RegisterMode::Replace)
        .unwrap();
    assert!(ctx.is_valid(op));
}
