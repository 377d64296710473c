#![deny(bare_trait_objects)]

#[macro_use]
extern crate clap;

use anyhow::{Context, Error};
use clap::Arg;
use colored::Colorize;
use log::debug;
use qvm_module::{FunctionSpec, InstrFlags, Module, Opcode};
use std::fs;
use std::path::PathBuf;
use std::process;

#[derive(Debug)]
struct Options {
    input: PathBuf,
    map: Option<PathBuf>,
    disassemble: bool,
}

impl Options {
    fn get() -> Options {
        let m = app_from_crate!()
            .arg(
                Arg::with_name("input")
                    .required(true)
                    .help("path to the qvm image"),
            )
            .arg(
                Arg::with_name("map")
                    .long("map")
                    .takes_value(true)
                    .help("symbol map for the image"),
            )
            .arg(
                Arg::with_name("no_disasm")
                    .long("no-disasm")
                    .help("only print the header and function table"),
            )
            .get_matches();
        Options {
            input: PathBuf::from(m.value_of("input").unwrap_or_default()),
            map: m.value_of("map").map(PathBuf::from),
            disassemble: !m.is_present("no_disasm"),
        }
    }
}

fn main() {
    env_logger::init();
    let opts = Options::get();
    if let Err(e) = run(&opts) {
        eprintln!("{} {:#}", "error:".red().bold(), e);
        process::exit(1);
    }
}

fn run(opts: &Options) -> Result<(), Error> {
    debug!("qvm-objdump {:?}", opts);
    let image = fs::read(&opts.input).with_context(|| format!("reading {:?}", opts.input))?;
    let module = match opts.map {
        Some(ref map) => {
            let map = fs::read_to_string(map).with_context(|| format!("reading {:?}", map))?;
            Module::load_with_map(&image, &map)?
        }
        None => Module::load(&image)?,
    };

    print_header(&module);
    println!();
    print_functions(&module, opts.disassemble);
    println!();
    print_jump_table(&module);
    Ok(())
}

fn print_header(module: &Module) {
    let h = module.header();
    println!("Header:");
    println!("  {:20}: {:?}", "version", h.version);
    println!("  {:20}: {}", "instructions", h.instruction_count);
    println!("  {:20}: {:#x}+{:#x}", "code", h.code_offset, h.code_length);
    println!("  {:20}: {:#x}+{:#x}", "data", h.data_offset, h.data_length);
    println!("  {:20}: {:#x}", "lit", h.lit_length);
    println!("  {:20}: {:#x}", "bss", h.bss_length);
    println!("  {:20}: {}", "jump targets", h.jump_target_count());
    println!("  {:20}: {:#x}", "segment size", module.segment_size());
    println!("  {:20}: {:#x}", "stack bottom", module.stack_bottom());
    if module.symbols().is_empty() {
        println!("  {:20}: {}", "symbols", "none".yellow());
    } else {
        println!("  {:20}: {}", "symbols", module.symbols().len());
    }
}

fn print_functions(module: &Module, disassemble: bool) {
    println!("Functions:");
    for f in module.functions() {
        let name = match module.symbols().at(f.entry) {
            Some(sym) => sym.name.as_str().green(),
            None => "None".red().bold(),
        };
        println!("  Function {} (name: {}):", f.ordinal, name);
        println!("    Instructions: {}..{}", f.entry, f.end);
        println!("    Frame size: {} bytes", f.frame_size);
        println!("    Max operand depth: {} slots", f.max_depth);
        if f.switch {
            println!("    Has {}", "computed jumps".yellow());
        }
        if disassemble {
            print_disassembly(module, f);
        }
    }
}

fn print_disassembly(module: &Module, f: &FunctionSpec) {
    let code = module.instructions();
    for pc in f.entry..f.end {
        let ins = code[pc];
        let marker = if ins.flags.contains(InstrFlags::JUMP_TARGET) {
            ">"
        } else {
            " "
        };
        let mut line = format!("    {}{:6}  [{:2}]  {}", marker, pc, ins.depth(), ins);
        if ins.flags.contains(InstrFlags::SWITCH) {
            line.push_str(&format!("  {}", "; computed".yellow()));
        }
        if ins.op == Opcode::Call && pc > f.entry {
            let prev = code[pc - 1];
            if prev.op == Opcode::Const {
                if prev.value < 0 {
                    line.push_str(&format!("  ; syscall {}", -1 - prev.value));
                } else {
                    line.push_str(&format!("  ; {}", module.symbolicate(prev.value as usize)));
                }
            }
        }
        println!("{}", line);
    }
}

fn print_jump_table(module: &Module) {
    println!("Jump Table:");
    if module.jump_table().is_empty() {
        println!("  None");
        return;
    }
    for (i, &target) in module.jump_table().iter().enumerate() {
        println!("  {:4}: {:6}  {}", i, target, module.symbolicate(target as usize));
    }
}
