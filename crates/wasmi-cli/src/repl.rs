//! The `--repl` interactive invoke loop (§4.9): reads `name arg arg...`
//! lines and calls the named export, printing results or the trap message.

use std::io::{self, BufRead, Write};
use std::rc::Rc;

use anyhow::Result;
use wasmi::{Config, Instance};

use crate::value_parse::{format_value, parse_args_for};

pub fn run(instance: &Instance, config: &Rc<Config>) -> Result<i32> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        print!("wasmi> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(0);
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            return Ok(0);
        }

        let mut parts = line.split_whitespace();
        let Some(name) = parts.next() else { continue };
        let raw_args: Vec<String> = parts.map(str::to_owned).collect();

        let Some(func) = instance.get_func(name) else {
            println!("no function export named {name:?}");
            continue;
        };

        let call_args = match parse_args_for(&func.ty(), &raw_args) {
            Ok(args) => args,
            Err(err) => {
                println!("{err}");
                continue;
            }
        };

        match func.call(Rc::clone(config), &call_args) {
            Ok(results) => {
                for result in results {
                    println!("{}", format_value(&result));
                }
            }
            Err(trap) => println!("trap: {trap}"),
        }
    }
}
