//! `wasmi`, the command-line driver (§4.9) over the embedder API in
//! `wasmi`/`wasmi_wasi`.

mod args;
mod repl;
mod value_parse;

use std::cell::RefCell;
use std::fs;
use std::rc::Rc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use wasmi::{Config, Instance, Linker, MemoryCell, Module, TrapCode};
use wasmi_wasi::{wasi_snapshot_preview1, WasiCtxBuilder};

use args::Args;
use value_parse::parse_args_for;

fn main() {
    let args = Args::parse();

    if args.trace {
        tracing_subscriber::fmt().with_max_level(tracing::Level::TRACE).init();
    }

    match run(&args) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run(args: &Args) -> Result<i32> {
    if args.load.is_empty() {
        bail!("no module given; pass at least one --load FILE");
    }

    let config = Rc::new(Config::new().trace(args.trace));
    let mut linker = Linker::new();

    // WASI (if requested) is wired once, ahead of any instantiation, since
    // imports resolve against the linker at instantiate time. Only the main
    // module (the last `--load`) is expected to actually import it.
    let mem_cell = MemoryCell::new();
    if args.wasi {
        let mut builder = WasiCtxBuilder::new().args(std::iter::once("wasmi".to_string()).chain(args.invoke_args.iter().cloned()));
        for dir in &args.wasi_dir {
            let guest_path = dir.to_string_lossy().into_owned();
            builder = builder.preopened_dir(dir.clone(), guest_path);
        }
        let wasi_ctx = Rc::new(RefCell::new(builder.build()));
        linker.define_host_module(wasi_snapshot_preview1(wasi_ctx, mem_cell.clone()));
    }

    let last = args.load.len() - 1;
    let mut main_instance = None;
    for (i, path) in args.load.iter().enumerate() {
        let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let module = Module::new(&bytes).with_context(|| format!("failed to decode {}", path.display()))?;
        let instance = Instance::new(&module, &linker, Rc::clone(&config)).with_context(|| format!("failed to instantiate {}", path.display()))?;

        if i == last && args.wasi {
            mem_cell.bind(&instance);
        }

        if let Some(register_name) = args.register.get(i) {
            for (export_name, item) in instance.raw().exports.borrow().iter() {
                linker.define(register_name.clone(), export_name.clone(), item.clone());
            }
        }

        if i == last {
            main_instance = Some(instance);
        }
    }
    let instance = main_instance.expect("at least one module was loaded");

    if args.repl {
        return repl::run(&instance, &config);
    }

    let Some(invoke) = &args.invoke else {
        bail!("nothing to do: pass --invoke NAME or --repl");
    };

    let Some(func) = instance.get_func(invoke) else {
        bail!("no function export named {invoke:?}");
    };

    let call_args = parse_args_for(&func.ty(), &args.invoke_args)?;
    match func.call(Rc::clone(&config), &call_args) {
        Ok(results) => {
            for result in results {
                println!("{}", value_parse::format_value(&result));
            }
            Ok(0)
        }
        Err(trap) => match trap.code() {
            TrapCode::VoluntaryExit(code) => Ok(code as i32),
            _ => bail!("{trap}"),
        },
    }
}
