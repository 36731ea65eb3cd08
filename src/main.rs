//! Trellis driver entry point.

mod cli;

use std::io::Write;
use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use cli::{Cli, Command, OutputArgs};
use tracing_subscriber::EnvFilter;
use trellis::pipeline::{self, Emit, Input, PipelineOptions};

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Print {
            input,
            output,
            print,
        } => Input::read(input.file.as_deref()).and_then(|source| {
            let options = input.pipeline_options(&output, Emit::Text(print.print_options()));
            emit(&source, &options, &output)
        }),
        Command::Emit {
            input,
            output,
            bytecode_version,
        } => Input::read(input.file.as_deref()).and_then(|source| {
            let config = cli::bytecode_config(bytecode_version);
            let options = input.pipeline_options(&output, Emit::Bytecode(config));
            emit(&source, &options, &output)
        }),
        Command::Verify { input } => Input::read(input.file.as_deref())
            .and_then(|source| pipeline::check(&source, &input.context_options())),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("TRELLIS_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn emit(source: &Input, options: &PipelineOptions, output: &OutputArgs) -> trellis_ir::Result<()> {
    match output.output.as_deref() {
        Some(path) if path != Path::new("-") => {
            let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
            pipeline::run(source, options, &mut file)?;
            file.flush()?;
            Ok(())
        }
        _ => pipeline::run(source, options, &mut std::io::stdout().lock()),
    }
}
