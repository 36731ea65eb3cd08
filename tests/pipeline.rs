use trellis::pipeline::{Emit, Input, PipelineOptions, run};
use trellis_ir::{BytecodeConfig, ContextOptions, ErrorKind, PrintOptions};

const SOURCE: &str = r#"module @m {
  %0 = "test.const"() {value = 7 : i32} : () -> i32
  "test.region"(%0) ({
  ^bb0(%arg0: i32):
    "test.ret"(%arg0) : (i32) -> ()
  }) : (i32) -> ()
}"#;

fn options(emit: Emit) -> PipelineOptions {
    PipelineOptions {
        context: ContextOptions {
            allow_unregistered_dialects: true,
        },
        no_verify: false,
        emit,
    }
}

fn run_bytes(input: &Input, options: &PipelineOptions) -> Vec<u8> {
    let mut out = Vec::new();
    run(input, options, &mut out).expect("pipeline failed");
    out
}

#[test]
fn test_text_round_trip() {
    let input = Input::new("sample.ir", SOURCE);
    let out = run_bytes(&input, &options(Emit::default()));
    assert_eq!(String::from_utf8(out).unwrap(), format!("{SOURCE}\n"));
}

#[test]
fn test_bytecode_input_prints_like_text_input() {
    for version in [1, 2] {
        let text = Input::new("sample.ir", SOURCE);
        let bytecode = run_bytes(
            &text,
            &options(Emit::Bytecode(BytecodeConfig::new().version(version))),
        );
        assert!(trellis_ir::bytecode::is_bytecode(&bytecode));

        let reparsed = Input::new("sample.trb", bytecode);
        let printed = run_bytes(&reparsed, &options(Emit::default()));
        assert_eq!(String::from_utf8(printed).unwrap(), format!("{SOURCE}\n"));
    }
}

#[test]
fn test_generic_printing_with_locations() {
    let input = Input::new("sample.ir", "\"test.op\"() : () -> ()");
    let print = PrintOptions::default().generic(true).debug_info(true, false);
    let out = run_bytes(&input, &options(Emit::Text(print)));
    insta::assert_snapshot!(String::from_utf8(out).unwrap(), @r#"
    "builtin.module"() ({
      "test.op"() : () -> () loc("sample.ir":1:1)
    }) : () -> () loc("sample.ir":1:1)
    "#);
}

#[test]
fn test_parse_errors_surface() {
    let input = Input::new("broken.ir", "\"test.op\"(%0) : (i32) -> ()");
    let mut out = Vec::new();
    let err = run(&input, &options(Emit::default()), &mut out).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parse);
    assert!(out.is_empty());
}

#[test]
fn test_output_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sample.ir");
    std::fs::write(&path, SOURCE).unwrap();

    let input = Input::read(Some(&path)).unwrap();
    assert_eq!(input.name, path.display().to_string());
    let out = run_bytes(&input, &options(Emit::default()));
    assert!(String::from_utf8(out).unwrap().starts_with("module @m {"));
}
