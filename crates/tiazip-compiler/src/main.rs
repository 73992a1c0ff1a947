//! compiler binary

// SPDX-FileCopyrightText: © 2023 Marcus Rowe <undisbeliever@gmail.com>
//
// SPDX-License-Identifier: MIT

#![forbid(unsafe_code)]

use clap::{Args, Parser, Subcommand};

use compiler::{
    data::{load_project_file, ExportConfig, ProjectFile},
    export::{export_project, TiaExportType},
};

use std::fs;
use std::path::PathBuf;

macro_rules! error {
    ($($arg:tt)*) => {{
        eprintln!($($arg)*);
        std::process::exit(1);
    }};
}

#[derive(Parser)]
#[command(author, version)]
#[command(about = "TIAZIP audio compiler")]
#[command(arg_required_else_help = true)]
struct ArgParser {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a register-write project into ROM data artifacts
    Export(ExportArgs),

    /// Compile and validate without writing any artifacts
    Check(CheckArgs),

    /// Print the register-write dump to stdout
    Dump(DumpArgs),
}

#[derive(Args)]
struct ConfigArgs {
    #[arg(
        short = 'c',
        long = "config",
        value_name = "FILE",
        help = "export configuration file (romout.* options)"
    )]
    config: Option<PathBuf>,

    #[arg(
        short = 't',
        long = "export-type",
        value_name = "TYPE",
        help = "override romout.tiaExportType (RAW, BASIC, BASIC_RLE, TIACOMP, FSEQ, TIAZIP)"
    )]
    export_type: Option<String>,

    #[arg(long = "debug-output", help = "also emit RegisterDump.txt")]
    debug_output: bool,
}

#[derive(Args)]
struct ExportArgs {
    #[arg(
        short = 'o',
        long = "output",
        value_name = "DIR",
        help = "output directory"
    )]
    output: PathBuf,

    #[arg(value_name = "PROJECT_FILE", help = "project file")]
    project_file: PathBuf,

    #[command(flatten)]
    config: ConfigArgs,
}

#[derive(Args)]
struct CheckArgs {
    #[arg(value_name = "PROJECT_FILE", help = "project file")]
    project_file: PathBuf,

    #[command(flatten)]
    config: ConfigArgs,
}

#[derive(Args)]
struct DumpArgs {
    #[arg(value_name = "PROJECT_FILE", help = "project file")]
    project_file: PathBuf,
}

fn load_project(path: &PathBuf) -> ProjectFile {
    match load_project_file(path) {
        Ok(pf) => pf,
        Err(e) => error!("{}", e),
    }
}

fn load_config(args: &ConfigArgs) -> ExportConfig {
    let mut config = match &args.config {
        Some(path) => {
            let text = match fs::read_to_string(path) {
                Ok(text) => text,
                Err(e) => error!("Unable to open {}: {}", path.display(), e),
            };
            match ExportConfig::from_json(&text) {
                Ok(config) => config,
                Err(e) => error!("{}", e),
            }
        }
        None => ExportConfig::default(),
    };

    if let Some(t) = &args.export_type {
        config.export_type = match t.parse::<TiaExportType>() {
            Ok(t) => t,
            Err(e) => error!("{}", e),
        };
    }
    if args.debug_output {
        config.debug_output = true;
    }

    config
}

fn export(args: ExportArgs) {
    let project = load_project(&args.project_file);
    let config = load_config(&args.config);

    let outputs = match export_project(&project, &config) {
        Ok(outputs) => outputs,
        Err(e) => error!("{}", e),
    };

    if let Err(e) = fs::create_dir_all(&args.output) {
        error!("Unable to create {}: {}", args.output.display(), e);
    }
    for output in outputs {
        let path = args.output.join(&output.name);
        match fs::write(&path, &output.data) {
            Ok(()) => println!("wrote {}", path.display()),
            Err(e) => error!("Unable to write {}: {}", path.display(), e),
        }
    }
}

fn check(args: CheckArgs) {
    let project = load_project(&args.project_file);
    let config = load_config(&args.config);

    match export_project(&project, &config) {
        Ok(outputs) => {
            let total: usize = outputs.iter().map(|o| o.data.len()).sum();
            println!("OK: {} artifacts, {} bytes", outputs.len(), total);
        }
        Err(e) => error!("{}", e),
    }
}

fn dump(args: DumpArgs) {
    let project = load_project(&args.project_file);

    let config = ExportConfig {
        debug_output: true,
        ..ExportConfig::default()
    };
    match export_project(&project, &config) {
        Ok(outputs) => {
            for output in outputs {
                if output.name == compiler::export::REGISTER_DUMP_NAME {
                    print!("{}", String::from_utf8_lossy(&output.data));
                }
            }
        }
        Err(e) => error!("{}", e),
    }
}

fn main() {
    env_logger::init();

    let args = ArgParser::parse();

    match args.command {
        Command::Export(args) => export(args),
        Command::Check(args) => check(args),
        Command::Dump(args) => dump(args),
    }
}
