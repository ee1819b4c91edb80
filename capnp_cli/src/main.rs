use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod cmds;

#[derive(Parser)]
#[command(name = "capnp")]
#[command(about = "Struct layout compiler - layout analysis and record construction")]
#[command(version)]
struct Cli {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile schema records and report their layouts and constructors
    Analyze {
        /// Input YAML files containing record definitions
        #[arg(short = 'f', long = "files", value_name = "FILE", required = true)]
        files: Vec<PathBuf>,

        /// Only report this record
        #[arg(short = 'r', long = "record", value_name = "RECORD")]
        record: Option<String>,

        /// Print the layout IR after analysis
        #[arg(long = "print-ir")]
        print_ir: bool,

        /// Format to use when printing the layout IR
        #[arg(long = "ir-format", value_enum, default_value = "json")]
        ir_format: IrFormat,
    },

    /// Build one record from JSON arguments and hex-dump the buffer
    Construct {
        /// Input YAML files containing record definitions
        #[arg(short = 'f', long = "files", value_name = "FILE", required = true)]
        files: Vec<PathBuf>,

        /// Record to construct
        #[arg(short = 'r', long = "record", required = true)]
        record: String,

        /// Constructor name (`new`, or `new_<arm>` for union records)
        #[arg(short = 'c', long = "constructor", default_value = "new")]
        constructor: String,

        /// Arguments as a JSON object keyed by argument name
        #[arg(short = 'a', long = "args", default_value = "{}")]
        args: String,

        /// Write the raw buffer to this file instead of dumping it
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
enum IrFormat {
    Json,
    Yaml,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Analyze {
            files,
            record,
            print_ir,
            ir_format,
        } => {
            let format = match ir_format {
                IrFormat::Json => cmds::analyze::IrOutputFormat::Json,
                IrFormat::Yaml => cmds::analyze::IrOutputFormat::Yaml,
            };
            cmds::analyze::run(files, record, print_ir, format)?;
        }

        Commands::Construct {
            files,
            record,
            constructor,
            args,
            output,
        } => {
            cmds::construct::run(files, record, constructor, args, output)?;
        }
    }

    Ok(())
}
