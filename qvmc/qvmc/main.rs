mod options;

#[macro_use]
extern crate clap;

use crate::options::{CodegenOutput, ErrorStyle, Options};
use anyhow::{Context, Error};
use log::info;
use qvm_module::Module;
use qvmc::Compiler;
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::process;

#[derive(Clone, Debug, Serialize)]
pub struct SerializedQvmcError {
    error: String,
}

impl From<Error> for SerializedQvmcError {
    fn from(e: Error) -> Self {
        SerializedQvmcError {
            error: format!("{:#}", e),
        }
    }
}

fn main() {
    env_logger::init();

    let opts = match Options::get() {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(2);
        }
    };

    if let Err(err) = run(&opts) {
        match opts.error_style {
            ErrorStyle::Human => {
                eprintln!("Error: {:#}\n", err);
            }
            ErrorStyle::Json => {
                let errs: Vec<SerializedQvmcError> = vec![err.into()];
                match serde_json::to_string(&errs) {
                    Ok(json) => eprintln!("{}", json),
                    Err(e) => eprintln!("Error: {}", e),
                }
            }
        }
        process::exit(1);
    }
}

pub fn run(opts: &Options) -> Result<(), Error> {
    info!("qvmc {:?}", opts);

    let image = fs::read(&opts.input).with_context(|| format!("reading {:?}", opts.input))?;
    let module = match opts.map {
        Some(ref map) => {
            let map = fs::read_to_string(map).with_context(|| format!("reading {:?}", map))?;
            Module::load_with_map(&image, &map)?
        }
        None => Module::load(&image)?,
    };
    let compiler = Compiler::new(opts.opt_level)?;

    let report = match opts.codegen {
        CodegenOutput::Check => {
            let compiled = compiler.compile(&module)?;
            let native = compiled.entry_points().iter().filter(|&&p| p != 0).count();
            format!(
                "{}: {} instructions, {} functions compiled, segment {:#x}\n",
                opts.input.display(),
                module.instruction_count(),
                native,
                module.segment_size()
            )
        }
        CodegenOutput::Clif => compiler.clif(&module)?,
    };

    match opts.output {
        Some(ref path) => fs::write(path, report).with_context(|| format!("writing {:?}", path))?,
        None => io::stdout().write_all(report.as_bytes())?,
    }
    Ok(())
}
