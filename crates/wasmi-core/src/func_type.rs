//! Function types (a parameter [`ValueType`] sequence and a result sequence).

use crate::value::ValueType;
use alloc::{sync::Arc, vec::Vec};

/// A Wasm function type: `(params) -> (results)`.
///
/// Cloning a [`FuncType`] is cheap — the parameter/result lists are shared
/// via an `Arc`, matching how the teacher shares interned function types
/// between a module's type section and every call site that references it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncType {
    inner: Arc<FuncTypeInner>,
}

#[derive(Debug, PartialEq, Eq)]
struct FuncTypeInner {
    params: Vec<ValueType>,
    results: Vec<ValueType>,
}

impl FuncType {
    pub fn new(params: impl IntoIterator<Item = ValueType>, results: impl IntoIterator<Item = ValueType>) -> Self {
        Self {
            inner: Arc::new(FuncTypeInner {
                params: params.into_iter().collect(),
                results: results.into_iter().collect(),
            }),
        }
    }

    pub fn params(&self) -> &[ValueType] {
        &self.inner.params
    }

    pub fn results(&self) -> &[ValueType] {
        &self.inner.results
    }

    /// Number of operand-stack cells the parameters occupy.
    pub fn params_cells(&self) -> u32 {
        self.inner.params.iter().map(|t| t.cells()).sum()
    }

    /// Number of operand-stack cells the results occupy.
    pub fn results_cells(&self) -> u32 {
        self.inner.results.iter().map(|t| t.cells()).sum()
    }
}

impl core::fmt::Display for FuncType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "(")?;
        for (i, p) in self.params().iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{p:?}")?;
        }
        write!(f, ") -> (")?;
        for (i, r) in self.results().iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{r:?}")?;
        }
        write!(f, ")")
    }
}
