// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::{anyhow, Result};
use cdecode_core::Converter;
use clap::{ArgAction, Args, Parser, Subcommand};
use log::LevelFilter;
use std::fs;
use std::path::PathBuf;

trait CliCommand {
    fn run(&self) -> Result<()>;
}

#[derive(Args)]
struct DeclarationSource {
    /// Path to a preprocessed C source file. Can be given multiple times;
    /// declarations accumulate in order.
    #[arg(long = "source", required = true)]
    sources: Vec<PathBuf>,
}

impl DeclarationSource {
    fn converter(&self) -> Result<Converter> {
        let mut converter = Converter::new();
        for path in &self.sources {
            let text = fs::read_to_string(path)
                .map_err(|err| anyhow!("reading {}: {err}", path.display()))?;
            converter.add_source(&text);
        }
        converter.parse()?;
        Ok(converter)
    }
}

#[derive(Parser)]
struct ListDecls {
    #[command(flatten)]
    source: DeclarationSource,
}

impl CliCommand for ListDecls {
    fn run(&self) -> Result<()> {
        let converter = self.source.converter()?;
        let env = converter.env();

        for (name, record) in env.aggregates() {
            println!("{} {}", record.kind, name);
        }
        for name in env.enums() {
            println!("enum {name}");
        }
        for (name, _) in env.typedefs() {
            println!("typedef {name}");
        }
        for (name, value) in env.enumerators() {
            println!("enumerator {name} = {value}");
        }

        Ok(())
    }
}

#[derive(Parser)]
struct SizeOf {
    #[command(flatten)]
    source: DeclarationSource,

    /// Aggregate name to size.
    tag: String,
}

impl CliCommand for SizeOf {
    fn run(&self) -> Result<()> {
        let mut converter = self.source.converter()?;
        println!("{}", converter.size_of(&self.tag)?);

        Ok(())
    }
}

#[derive(Parser)]
struct Dump {
    #[command(flatten)]
    source: DeclarationSource,

    /// Path to the binary data to decode. Without it the view prints
    /// zero-initialized.
    #[arg(long)]
    data: Option<PathBuf>,

    /// Byte offset into the data to decode from.
    #[arg(long, default_value_t = 0)]
    offset: usize,

    /// Aggregate name to decode.
    tag: String,
}

impl CliCommand for Dump {
    fn run(&self) -> Result<()> {
        let mut converter = self.source.converter()?;

        let data = match &self.data {
            Some(path) => {
                fs::read(path).map_err(|err| anyhow!("reading {}: {err}", path.display()))?
            }
            None => Vec::new(),
        };

        let view = converter.decode(&self.tag, &data, self.offset)?;
        println!("{view}");
        println!("Size of {}: {}", self.tag, view.size());

        Ok(())
    }
}

#[derive(Subcommand)]
enum Subcommands {
    /// List every declaration found in the sources.
    ListDecls(ListDecls),
    /// Print the byte size of an aggregate.
    SizeOf(SizeOf),
    /// Decode binary data against an aggregate and pretty-print it.
    Dump(Dump),
}

impl Subcommands {
    fn as_cli_command(&self) -> &dyn CliCommand {
        match self {
            Self::ListDecls(c) => c,
            Self::SizeOf(c) => c,
            Self::Dump(c) => c,
        }
    }
}

#[derive(Parser)]
struct Cli {
    /// Increase logging verbosity. Can be specified multiple times
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Subcommands,
}

impl Cli {
    fn run() -> Result<()> {
        let cli = Self::parse();

        let log_level = match cli.verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        let mut builder = env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or(log_level.as_str()),
        );

        builder.init();

        let command = cli.command.as_cli_command();

        command.run()
    }
}

fn main() {
    let exit_code = match Cli::run() {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("Error: {err}");
            1
        }
    };

    std::process::exit(exit_code)
}
