//! The driver pipeline.
//!
//! ```text
//! input bytes (text or bytecode)
//!     │
//!     ▼
//! parse_bytes ─► module
//!     │
//!     ▼
//! verify (unless disabled)
//!     │
//!     ├─► [Emit::Text] ─► print_op ─► IR text
//!     │
//!     └─► [Emit::Bytecode] ─► write_bytecode ─► bytes
//! ```

use std::io::{Read, Write};
use std::path::Path;

use tracing::{debug, info};
use trellis_ir::{
    BytecodeConfig, ContextOptions, IrContext, OpRef, PrintOptions, Result, parse_bytes,
    print_op, write_bytecode,
};

/// Source name used for standard input.
pub const STDIN_NAME: &str = "<stdin>";

/// What the pipeline writes once the input is loaded.
#[derive(Clone, Debug)]
pub enum Emit {
    Text(PrintOptions),
    Bytecode(BytecodeConfig),
}

impl Default for Emit {
    fn default() -> Self {
        Emit::Text(PrintOptions::default())
    }
}

/// Settings for one pipeline run.
#[derive(Clone, Debug, Default)]
pub struct PipelineOptions {
    pub context: ContextOptions,
    /// Skip verification after parsing.
    pub no_verify: bool,
    pub emit: Emit,
}

/// An input buffer and the name used for its default locations.
pub struct Input {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl Input {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    /// Read `path`, or standard input when `path` is `None` or `-`.
    pub fn read(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) if path != Path::new("-") => {
                let bytes = std::fs::read(path)?;
                Ok(Self::new(path.display().to_string(), bytes))
            }
            _ => {
                let mut bytes = Vec::new();
                std::io::stdin().read_to_end(&mut bytes)?;
                Ok(Self::new(STDIN_NAME, bytes))
            }
        }
    }
}

/// Parse `input` into `ctx` and verify it unless disabled.
pub fn load(ctx: &mut IrContext, input: &Input, options: &PipelineOptions) -> Result<OpRef> {
    debug!(source = %input.name, len = input.bytes.len(), "parsing input");
    let root = parse_bytes(ctx, &input.bytes, &input.name)?;
    if !options.no_verify {
        ctx.verify(root)?;
    }
    Ok(root)
}

/// Parse and verify `input` without producing output.
pub fn check(input: &Input, context: &ContextOptions) -> Result<()> {
    let mut ctx = IrContext::with_options(context.clone());
    let root = parse_bytes(&mut ctx, &input.bytes, &input.name)?;
    ctx.verify(root)
}

/// Run the whole pipeline, writing the result to `out`.
pub fn run(input: &Input, options: &PipelineOptions, out: &mut impl Write) -> Result<()> {
    let mut ctx = IrContext::with_options(options.context.clone());
    let root = load(&mut ctx, input, options)?;
    match &options.emit {
        Emit::Text(print) => {
            let text = print_op(&ctx, root, print)?;
            out.write_all(text.as_bytes())?;
            out.write_all(b"\n")?;
        }
        Emit::Bytecode(config) => {
            info!(version = config.version, "emitting bytecode");
            write_bytecode(&ctx, root, config, out)?;
        }
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_ir::ErrorKind;

    fn lenient() -> PipelineOptions {
        PipelineOptions {
            context: ContextOptions {
                allow_unregistered_dialects: true,
            },
            ..Default::default()
        }
    }

    fn run_to_string(source: &str, options: &PipelineOptions) -> Result<String> {
        let mut out = Vec::new();
        run(&Input::new("test.ir", source), options, &mut out)?;
        Ok(String::from_utf8(out).unwrap())
    }

    #[test]
    fn prints_text_input() {
        let out = run_to_string("\"custom.op\"() : () -> ()", &lenient()).unwrap();
        assert_eq!(out, "module {\n  \"custom.op\"() : () -> ()\n}\n");
    }

    #[test]
    fn strict_context_rejects_unregistered_ops() {
        let err = run_to_string("\"custom.op\"() : () -> ()", &PipelineOptions::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::VerificationFailure);
    }

    #[test]
    fn check_reports_verification_failures() {
        let input = Input::new("test.ir", "\"custom.op\"() : () -> ()");
        let err = check(&input, &ContextOptions::default()).unwrap_err();
        assert!(err.to_string().starts_with("Verification failed:"), "{err}");
        check(
            &input,
            &ContextOptions {
                allow_unregistered_dialects: true,
            },
        )
        .unwrap();
    }

    #[test]
    fn no_verify_prints_generic_form() {
        let options = PipelineOptions {
            no_verify: true,
            ..Default::default()
        };
        let out = run_to_string("\"custom.op\"() : () -> ()", &options).unwrap();
        assert_eq!(
            out,
            "\"builtin.module\"() ({\n  \"custom.op\"() : () -> ()\n}) : () -> ()\n"
        );
    }
}
