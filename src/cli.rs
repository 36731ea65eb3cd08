//! Command-line interface for the Trellis driver.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use trellis::pipeline::{Emit, PipelineOptions};
use trellis_ir::{BytecodeConfig, ContextOptions, PrintOptions, bytecode};

#[derive(Parser)]
#[command(name = "trellis", bin_name = "trellis")]
#[command(about = "Parse, verify, print and serialize Trellis IR", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print IR text (input may be text or bytecode)
    #[command(after_help = r#"EXAMPLES:
  trellis print input.ir
  trellis print --generic --debug-info input.trb
  cat input.ir | trellis print --allow-unregistered-dialects"#)]
    Print {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        output: OutputArgs,

        #[command(flatten)]
        print: PrintArgs,
    },

    /// Serialize IR to bytecode
    Emit {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        output: OutputArgs,

        /// Bytecode format version to write
        #[arg(long, value_name = "N", default_value_t = bytecode::CURRENT_VERSION)]
        bytecode_version: u32,
    },

    /// Verify IR and report diagnostics
    Verify {
        #[command(flatten)]
        input: InputArgs,
    },
}

#[derive(Args)]
pub struct InputArgs {
    /// Input file (text or bytecode); standard input when omitted or `-`
    #[arg(value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Accept operations from dialects that are not registered
    #[arg(long)]
    pub allow_unregistered_dialects: bool,
}

#[derive(Args)]
pub struct OutputArgs {
    /// Output file; standard output when omitted
    #[arg(long, short = 'o', value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Skip verification after parsing
    #[arg(long)]
    pub no_verify: bool,
}

#[derive(Args)]
pub struct PrintArgs {
    /// Print every operation in the generic form
    #[arg(long)]
    pub generic: bool,

    /// Append source locations
    #[arg(long)]
    pub debug_info: bool,

    /// Print locations without the loc(...) wrapper
    #[arg(long, requires = "debug_info")]
    pub pretty_debug_info: bool,

    /// Name values as if the printed operation were the whole program
    #[arg(long)]
    pub local_scope: bool,

    /// Use name locations as SSA value names
    #[arg(long)]
    pub name_loc_as_prefix: bool,

    /// Elide constant payloads with more than N elements
    #[arg(long, value_name = "N")]
    pub elide_elements_above: Option<usize>,

    /// Elide resource blobs larger than N bytes
    #[arg(long, value_name = "N")]
    pub elide_resources_above: Option<usize>,

    /// Do not print region bodies
    #[arg(long)]
    pub skip_regions: bool,

    /// Skip the verification that selects between custom and generic forms
    #[arg(long)]
    pub assume_verified: bool,
}

impl InputArgs {
    pub fn context_options(&self) -> ContextOptions {
        ContextOptions {
            allow_unregistered_dialects: self.allow_unregistered_dialects,
        }
    }

    pub fn pipeline_options(&self, output: &OutputArgs, emit: Emit) -> PipelineOptions {
        PipelineOptions {
            context: self.context_options(),
            no_verify: output.no_verify,
            emit,
        }
    }
}

impl PrintArgs {
    pub fn print_options(&self) -> PrintOptions {
        let mut options = PrintOptions::new()
            .generic(self.generic)
            .debug_info(self.debug_info, self.pretty_debug_info)
            .local_scope(self.local_scope)
            .name_loc_as_prefix(self.name_loc_as_prefix)
            .skip_regions(self.skip_regions)
            .assume_verified(self.assume_verified);
        if let Some(limit) = self.elide_elements_above {
            options = options.elide_elements_above(limit);
        }
        if let Some(limit) = self.elide_resources_above {
            options = options.elide_resources_above(limit);
        }
        options
    }
}

pub fn bytecode_config(version: u32) -> BytecodeConfig {
    BytecodeConfig::new().version(version)
}
