use std::path::PathBuf;

use clap::Parser;

/// Command-line driver for the `wasmi` embedder API (§4.9): loads one or
/// more modules, links them together, optionally wires up WASI, and either
/// invokes a single export or drops into an interactive REPL.
#[derive(Parser, Debug)]
#[command(name = "wasmi", version, about = "A WebAssembly interpreter")]
pub struct Args {
    /// Module to load. Repeatable; the first occurrence is the main module,
    /// later ones are only reachable once named with a matching `--register`.
    #[arg(long = "load", value_name = "FILE")]
    pub load: Vec<PathBuf>,

    /// Registers the module loaded at the same position under this
    /// import-object name, so a later `--load` can import from it.
    #[arg(long = "register", value_name = "NAME")]
    pub register: Vec<String>,

    /// Export to invoke on the main module.
    #[arg(long = "invoke", value_name = "NAME")]
    pub invoke: Option<String>,

    /// Arguments passed to the invoked export, parsed against its declared
    /// parameter types.
    #[arg(value_name = "ARGS")]
    pub invoke_args: Vec<String>,

    /// Wires up `wasmi_wasi`'s preview-1 host module.
    #[arg(long = "wasi")]
    pub wasi: bool,

    /// A host directory to preopen for WASI, guest-visible under the same
    /// path. Repeatable.
    #[arg(long = "wasi-dir", value_name = "PATH")]
    pub wasi_dir: Vec<PathBuf>,

    /// Installs a `tracing-subscriber` fmt layer at `TRACE` and turns on
    /// per-opcode execution tracing.
    #[arg(long = "trace")]
    pub trace: bool,

    /// Drops into an interactive invoke loop instead of a single `--invoke`.
    #[arg(long = "repl")]
    pub repl: bool,
}
