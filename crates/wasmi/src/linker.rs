//! Import resolution (§4.3 step 1, §4.5).
//!
//! A [`Linker`] is an import object: a named table of externs, optionally
//! chained to a parent linker so resolution falls through to it on a miss.
//! This mirrors instantiating against "the supplied chain of import
//! objects" directly rather than flattening multiple sources into one map
//! up front.

use alloc::{collections::BTreeMap, rc::Rc, string::String, string::ToString};

use crate::instance::{Extern, HostModule};

#[derive(Default, Clone)]
pub struct Linker {
    entries: BTreeMap<(String, String), Extern>,
    parent: Option<Rc<Linker>>,
}

impl Linker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chains `self` in front of `parent`: a miss here falls through to it.
    pub fn chained(parent: Rc<Linker>) -> Self {
        Self {
            entries: BTreeMap::new(),
            parent: Some(parent),
        }
    }

    pub fn define(&mut self, module: impl Into<String>, name: impl Into<String>, item: Extern) -> &mut Self {
        self.entries.insert((module.into(), name.into()), item);
        self
    }

    /// Registers every function in a [`HostModule`] under its module name.
    pub fn define_host_module(&mut self, host_module: HostModule) -> &mut Self {
        for (name, func) in host_module.funcs {
            self.define(
                host_module.module_name.clone(),
                name,
                Extern::Func(crate::instance::FuncInst::Host(Rc::new(func))),
            );
        }
        self
    }

    pub fn resolve(&self, module: &str, name: &str) -> Option<Extern> {
        if let Some(item) = self.entries.get(&(module.to_string(), name.to_string())) {
            return Some(item.clone());
        }
        self.parent.as_ref().and_then(|p| p.resolve(module, name))
    }
}
