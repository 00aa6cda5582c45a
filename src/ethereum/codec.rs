//! Conversion between JSON values and ABI values, used by the command line
//! front-end for method parameters and printed results.

use alloy::{
    dyn_abi::{DynSolType, DynSolValue, Word},
    json_abi::Param,
    primitives::{Address, I256, U256},
};
use anyhow::{anyhow, Result};
use serde_json::Value;
use std::str::FromStr;

/// Converts JSON parameters, given either positionally (`[v1, v2]`) or by
/// name (`{"to": v1}`), into values for `inputs`.
pub fn json_to_params(
    inputs: &[Param],
    name: &str,
    parameters: &Value,
) -> Result<Vec<DynSolValue>> {
    let types = inputs
        .iter()
        .map(|input| {
            DynSolType::parse(&input.selector_type())
                .map_err(|e| anyhow!("Invalid type '{}' in ABI: {}", input.ty, e))
        })
        .collect::<Result<Vec<_>>>()?;

    match parameters {
        Value::Null if inputs.is_empty() => Ok(Vec::new()),
        Value::Array(params) => {
            if params.len() != inputs.len() {
                let expected: Vec<String> = inputs
                    .iter()
                    .map(|input| format!("{} {}", input.ty, input.name))
                    .collect();
                return Err(anyhow!(
                    "Parameter count mismatch for '{}': expected {} parameters, got {}.\nExpected parameters: [{}]",
                    name,
                    inputs.len(),
                    params.len(),
                    expected.join(", ")
                ));
            }

            params
                .iter()
                .zip(inputs.iter().zip(&types))
                .enumerate()
                .map(|(i, (value, (input, ty)))| {
                    json_to_dyn_sol_value(value, ty).map_err(|e| {
                        anyhow!(
                            "Invalid parameter #{} ('{}' of type '{}'): {}",
                            i + 1,
                            input.name,
                            input.ty,
                            e
                        )
                    })
                })
                .collect()
        }
        Value::Object(obj) => inputs
            .iter()
            .zip(&types)
            .map(|(input, ty)| {
                let value = obj.get(&input.name).ok_or_else(|| {
                    anyhow!(
                        "Missing required parameter '{}' of type '{}' for '{}'",
                        input.name,
                        input.ty,
                        name
                    )
                })?;
                json_to_dyn_sol_value(value, ty).map_err(|e| {
                    anyhow!(
                        "Invalid parameter '{}' of type '{}': {}",
                        input.name,
                        input.ty,
                        e
                    )
                })
            })
            .collect(),
        _ => Err(anyhow!(
            "Invalid parameter format for '{}'. Parameters must be a JSON array or object, got: {}",
            name,
            parameters
        )),
    }
}

/// Converts a JSON value into an ABI value of type `ty`.
pub fn json_to_dyn_sol_value(value: &Value, ty: &DynSolType) -> Result<DynSolValue> {
    match ty {
        DynSolType::Address => {
            let s = value
                .as_str()
                .ok_or_else(|| anyhow!("Address must be a string"))?;
            Ok(DynSolValue::Address(Address::from_str(s.trim())?))
        }
        DynSolType::Bool => value
            .as_bool()
            .map(DynSolValue::Bool)
            .ok_or_else(|| anyhow!("Bool parameter must be a boolean")),
        DynSolType::Uint(size) => Ok(DynSolValue::Uint(parse_uint(value)?, *size)),
        DynSolType::Int(size) => {
            let text = match value {
                Value::Number(n) if n.is_i64() || n.is_u64() => n.to_string(),
                Value::String(s) => s.clone(),
                _ => return Err(anyhow!("Int must be an integer or a decimal string")),
            };
            let num =
                I256::from_dec_str(&text).map_err(|_| anyhow!("Invalid int value: {}", text))?;
            Ok(DynSolValue::Int(num, *size))
        }
        DynSolType::String => value
            .as_str()
            .map(|s| DynSolValue::String(s.to_string()))
            .ok_or_else(|| anyhow!("String parameter must be a string")),
        DynSolType::Bytes => Ok(DynSolValue::Bytes(parse_hex(value)?)),
        DynSolType::FixedBytes(size) => {
            let bytes = parse_hex(value)?;
            if bytes.len() > *size {
                return Err(anyhow!(
                    "Expected at most {} bytes, got {}",
                    size,
                    bytes.len()
                ));
            }
            let mut word = Word::ZERO;
            word[..bytes.len()].copy_from_slice(&bytes);
            Ok(DynSolValue::FixedBytes(word, *size))
        }
        DynSolType::Array(inner) => {
            let items = value
                .as_array()
                .ok_or_else(|| anyhow!("Array parameter must be an array"))?;
            items
                .iter()
                .map(|item| json_to_dyn_sol_value(item, inner))
                .collect::<Result<Vec<_>>>()
                .map(DynSolValue::Array)
        }
        DynSolType::FixedArray(inner, len) => {
            let items = value
                .as_array()
                .ok_or_else(|| anyhow!("Array parameter must be an array"))?;
            if items.len() != *len {
                return Err(anyhow!("Expected {} elements, got {}", len, items.len()));
            }
            items
                .iter()
                .map(|item| json_to_dyn_sol_value(item, inner))
                .collect::<Result<Vec<_>>>()
                .map(DynSolValue::FixedArray)
        }
        DynSolType::Tuple(types) => {
            let items = value
                .as_array()
                .ok_or_else(|| anyhow!("Tuple parameter must be an array"))?;
            if items.len() != types.len() {
                return Err(anyhow!(
                    "Expected {} tuple elements, got {}",
                    types.len(),
                    items.len()
                ));
            }
            items
                .iter()
                .zip(types)
                .map(|(item, ty)| json_to_dyn_sol_value(item, ty))
                .collect::<Result<Vec<_>>>()
                .map(DynSolValue::Tuple)
        }
        _ => Err(anyhow!("Unsupported Solidity type: {}", ty)),
    }
}

fn parse_uint(value: &Value) -> Result<U256> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .map(U256::from)
            .ok_or_else(|| anyhow!("Invalid uint value: {}", n)),
        Value::String(s) => {
            if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                U256::from_str_radix(hex, 16).map_err(|_| anyhow!("Invalid uint string: {}", s))
            } else {
                U256::from_str(s).map_err(|_| anyhow!("Invalid uint string: {}", s))
            }
        }
        _ => Err(anyhow!("Uint must be a number or string")),
    }
}

fn parse_hex(value: &Value) -> Result<Vec<u8>> {
    let hex_str = value
        .as_str()
        .ok_or_else(|| anyhow!("Bytes must be a hex string"))?;
    hex::decode(hex_str.trim_start_matches("0x"))
        .map_err(|_| anyhow!("Invalid hex string: {}", hex_str))
}

/// Converts a list of returned values to JSON: a single value stays scalar.
pub fn dyn_sol_values_to_json(values: &[DynSolValue]) -> Value {
    match values {
        [] => Value::Null,
        [single] => dyn_sol_value_to_json(single),
        many => Value::Array(many.iter().map(dyn_sol_value_to_json).collect()),
    }
}

pub fn dyn_sol_value_to_json(value: &DynSolValue) -> Value {
    match value {
        DynSolValue::Address(addr) => Value::String(format!("{:?}", addr)),
        DynSolValue::Uint(num, _) => Value::String(num.to_string()),
        DynSolValue::Int(num, _) => Value::String(num.to_string()),
        DynSolValue::Bool(b) => Value::Bool(*b),
        DynSolValue::String(s) => Value::String(s.clone()),
        DynSolValue::Bytes(bytes) => Value::String(format!("0x{}", hex::encode(bytes))),
        DynSolValue::FixedBytes(word, size) => {
            Value::String(format!("0x{}", hex::encode(&word[..*size])))
        }
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
            Value::Array(items.iter().map(dyn_sol_value_to_json).collect())
        }
        other => Value::String(format!("{:?}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::json_abi::JsonAbi;
    use serde_json::json;

    fn blacklist_check_inputs() -> Vec<Param> {
        let abi: JsonAbi =
            serde_json::from_str(crate::contracts::SonmContract::Blacklist.abi_json()).unwrap();
        abi.function("Check").unwrap()[0].inputs.clone()
    }

    #[test]
    fn test_positional_and_named_params() {
        let inputs = blacklist_check_inputs();
        let who = "0x1111111111111111111111111111111111111111";
        let whom = "0x2222222222222222222222222222222222222222";

        let positional = json_to_params(&inputs, "Check", &json!([who, whom])).unwrap();
        let named = json_to_params(&inputs, "Check", &json!({"_who": who, "_whom": whom})).unwrap();
        assert_eq!(positional, named);
        assert_eq!(positional[0], DynSolValue::Address(Address::from_str(who).unwrap()));

        assert!(json_to_params(&inputs, "Check", &json!([who])).is_err());
        assert!(json_to_params(&inputs, "Check", &json!({"_who": who})).is_err());
        assert!(json_to_params(&inputs, "Check", &json!("nope")).is_err());
    }

    #[test]
    fn test_scalar_conversions() {
        assert_eq!(
            json_to_dyn_sol_value(&json!("0x10"), &DynSolType::Uint(8)).unwrap(),
            DynSolValue::Uint(U256::from(16), 8)
        );
        assert_eq!(
            json_to_dyn_sol_value(&json!(42), &DynSolType::Uint(256)).unwrap(),
            DynSolValue::Uint(U256::from(42), 256)
        );
        assert_eq!(
            json_to_dyn_sol_value(&json!(-5), &DynSolType::Int(256)).unwrap(),
            DynSolValue::Int(I256::from_dec_str("-5").unwrap(), 256)
        );
        assert_eq!(
            json_to_dyn_sol_value(&json!("0xdead"), &DynSolType::Bytes).unwrap(),
            DynSolValue::Bytes(vec![0xde, 0xad])
        );

        let fixed = json_to_dyn_sol_value(&json!("0xabcd"), &DynSolType::FixedBytes(32)).unwrap();
        let mut word = Word::ZERO;
        word[0] = 0xab;
        word[1] = 0xcd;
        assert_eq!(fixed, DynSolValue::FixedBytes(word, 32));

        assert!(json_to_dyn_sol_value(&json!(true), &DynSolType::Address).is_err());
        assert!(json_to_dyn_sol_value(&json!("0x0102"), &DynSolType::FixedBytes(1)).is_err());
    }

    #[test]
    fn test_values_to_json() {
        assert_eq!(dyn_sol_values_to_json(&[]), Value::Null);
        assert_eq!(dyn_sol_values_to_json(&[DynSolValue::Bool(true)]), json!(true));
        assert_eq!(
            dyn_sol_values_to_json(&[
                DynSolValue::Bytes(vec![1, 2]),
                DynSolValue::Uint(U256::from(7), 256)
            ]),
            json!(["0x0102", "7"])
        );
        assert_eq!(
            dyn_sol_value_to_json(&DynSolValue::FixedBytes(Word::repeat_byte(0xaa), 4)),
            json!("0xaaaaaaaa")
        );
    }
}
