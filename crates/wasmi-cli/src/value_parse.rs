//! Parses CLI/REPL argument strings against a function's declared
//! parameter types, and formats results back for display.

use anyhow::{anyhow, bail, Result};
use wasmi::{FuncType, Value, ValueType};
use wasmi_core::{F32, F64};

pub fn parse_args_for(ty: &FuncType, raw: &[String]) -> Result<Vec<Value>> {
    let params = ty.params();
    if raw.len() != params.len() {
        bail!("function takes {} argument(s), {} given", params.len(), raw.len());
    }
    params.iter().zip(raw).map(|(ty, text)| parse_value(*ty, text)).collect()
}

pub fn parse_value(ty: ValueType, text: &str) -> Result<Value> {
    Ok(match ty {
        ValueType::I32 => Value::I32(text.parse().map_err(|_| anyhow!("{text:?} is not a valid i32"))?),
        ValueType::I64 => Value::I64(text.parse().map_err(|_| anyhow!("{text:?} is not a valid i64"))?),
        ValueType::F32 => Value::F32(F32::from_float(text.parse::<f32>().map_err(|_| anyhow!("{text:?} is not a valid f32"))?)),
        ValueType::F64 => Value::F64(F64::from_float(text.parse::<f64>().map_err(|_| anyhow!("{text:?} is not a valid f64"))?)),
        other => bail!("cannot parse a CLI argument of type {other:?}"),
    })
}

pub fn format_value(v: &Value) -> String {
    match v {
        Value::I32(v) => v.to_string(),
        Value::I64(v) => v.to_string(),
        Value::F32(v) => v.to_float().to_string(),
        Value::F64(v) => v.to_float().to_string(),
        Value::V128(v) => format!("0x{v:032x}"),
        other => format!("{other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_matching_arity() {
        let ty = FuncType::new([ValueType::I32, ValueType::I64], []);
        let values = parse_args_for(&ty, &["1".into(), "2".into()]).unwrap();
        assert_eq!(values, vec![Value::I32(1), Value::I64(2)]);
    }

    #[test]
    fn rejects_wrong_arity() {
        let ty = FuncType::new([ValueType::I32], []);
        assert!(parse_args_for(&ty, &[]).is_err());
    }
}
