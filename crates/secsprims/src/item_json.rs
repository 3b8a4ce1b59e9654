//! JSON notation for item bodies: one object per item, keyed by the SML
//! format name, e.g. `{"L":[{"U1":[5]},{"A":"AB"}]}`.

use secsprims_item::{Format, Item};
use serde_json::{Map, Number, Value};

use crate::exit::{CliError, CliResult, USAGE};

pub fn item_to_json(item: &Item) -> Value {
    let body = match item {
        Item::List(children) => Value::Array(children.iter().map(item_to_json).collect()),
        Item::Ascii(text) | Item::Jis8(text) => {
            Value::String(String::from_utf8_lossy(text).into_owned())
        }
        Item::Binary(values) | Item::U1(values) => numbers(values.iter().map(|&v| u64::from(v))),
        Item::Boolean(values) => Value::Array(values.iter().map(|&v| Value::Bool(v)).collect()),
        Item::I1(values) => signed(values.iter().map(|&v| i64::from(v))),
        Item::I2(values) => signed(values.iter().map(|&v| i64::from(v))),
        Item::I4(values) => signed(values.iter().map(|&v| i64::from(v))),
        Item::I8(values) => signed(values.iter().copied()),
        Item::U2(values) => numbers(values.iter().map(|&v| u64::from(v))),
        Item::U4(values) => numbers(values.iter().map(|&v| u64::from(v))),
        Item::U8(values) => numbers(values.iter().copied()),
        Item::F4(values) => floats(values.iter().map(|&v| f64::from(v))),
        Item::F8(values) => floats(values.iter().copied()),
    };

    let mut object = Map::with_capacity(1);
    object.insert(item.format().sml_name().to_string(), body);
    Value::Object(object)
}

fn numbers(values: impl Iterator<Item = u64>) -> Value {
    Value::Array(values.map(|v| Value::Number(v.into())).collect())
}

fn signed(values: impl Iterator<Item = i64>) -> Value {
    Value::Array(values.map(|v| Value::Number(v.into())).collect())
}

// Non-finite floats have no JSON number form.
fn floats(values: impl Iterator<Item = f64>) -> Value {
    Value::Array(
        values
            .map(|v| Number::from_f64(v).map_or(Value::Null, Value::Number))
            .collect(),
    )
}

/// Parse a body given as text on the command line.
pub fn parse_item(text: &str) -> CliResult<Item> {
    let value: Value = serde_json::from_str(text)
        .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
    item_from_json(&value).map_err(|msg| CliError::new(USAGE, format!("--json: {msg}")))
}

pub fn item_from_json(value: &Value) -> Result<Item, String> {
    let object = value
        .as_object()
        .filter(|object| object.len() == 1)
        .ok_or_else(|| format!("expected an object with one format key, got {value}"))?;
    let (name, body) = object
        .iter()
        .next()
        .ok_or_else(|| "empty item object".to_string())?;
    let format = Format::from_sml_name(name).ok_or_else(|| format!("unknown format {name:?}"))?;

    let item = match format {
        Format::List => {
            let children = elements(body, name)?
                .iter()
                .map(item_from_json)
                .collect::<Result<Vec<_>, _>>()?;
            Item::List(children)
        }
        Format::Ascii | Format::Jis8 => {
            let text = body
                .as_str()
                .ok_or_else(|| format!("{name} expects a string"))?;
            match format {
                Format::Ascii => Item::ascii(text),
                _ => Item::jis8(text.as_bytes()),
            }
        }
        Format::Boolean => Item::Boolean(
            elements(body, name)?
                .iter()
                .map(|v| v.as_bool().ok_or_else(|| format!("{name} expects booleans")))
                .collect::<Result<_, _>>()?,
        ),
        Format::Binary => Item::Binary(unsigned(body, name)?),
        Format::U1 => Item::U1(unsigned(body, name)?),
        Format::U2 => Item::U2(unsigned(body, name)?),
        Format::U4 => Item::U4(unsigned(body, name)?),
        Format::U8 => Item::U8(unsigned(body, name)?),
        Format::I1 => Item::I1(integers(body, name)?),
        Format::I2 => Item::I2(integers(body, name)?),
        Format::I4 => Item::I4(integers(body, name)?),
        Format::I8 => Item::I8(integers(body, name)?),
        Format::F4 => Item::F4(
            float_values(body, name)?
                .into_iter()
                .map(|v| v as f32)
                .collect(),
        ),
        Format::F8 => Item::F8(float_values(body, name)?),
    };
    Ok(item)
}

/// Array elements, or a single scalar as a one-element array.
fn elements<'a>(body: &'a Value, name: &str) -> Result<&'a [Value], String> {
    match body {
        Value::Array(values) => Ok(values),
        Value::Object(_) if name.eq_ignore_ascii_case("L") => {
            Err("L expects an array of items".to_string())
        }
        scalar => Ok(std::slice::from_ref(scalar)),
    }
}

fn unsigned<T: TryFrom<u64>>(body: &Value, name: &str) -> Result<Vec<T>, String> {
    elements(body, name)?
        .iter()
        .map(|v| {
            v.as_u64()
                .and_then(|n| T::try_from(n).ok())
                .ok_or_else(|| format!("{v} is not a valid {name} value"))
        })
        .collect()
}

fn integers<T: TryFrom<i64>>(body: &Value, name: &str) -> Result<Vec<T>, String> {
    elements(body, name)?
        .iter()
        .map(|v| {
            v.as_i64()
                .and_then(|n| T::try_from(n).ok())
                .ok_or_else(|| format!("{v} is not a valid {name} value"))
        })
        .collect()
}

fn float_values(body: &Value, name: &str) -> Result<Vec<f64>, String> {
    elements(body, name)?
        .iter()
        .map(|v| v.as_f64().ok_or_else(|| format!("{v} is not a valid {name} value")))
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn renders_nested_list() {
        let item = Item::list(vec![Item::value(5u8), Item::ascii("AB")]);
        assert_eq!(
            item_to_json(&item),
            json!({"L": [{"U1": [5]}, {"A": "AB"}]})
        );
    }

    #[test]
    fn parses_nested_list() {
        let item = parse_item(r#"{"L":[{"U1":[5]},{"A":"AB"}]}"#).expect("body should parse");
        assert_eq!(
            item,
            Item::list(vec![Item::value(5u8), Item::ascii("AB")])
        );
    }

    #[test]
    fn scalar_shorthand_and_case() {
        assert_eq!(
            item_from_json(&json!({"u4": 70000})).unwrap(),
            Item::value(70000u32)
        );
        assert_eq!(
            item_from_json(&json!({"BOOLEAN": true})).unwrap(),
            Item::value(true)
        );
        assert_eq!(
            item_from_json(&json!({"I2": [-3, 4]})).unwrap(),
            Item::values(vec![-3i16, 4])
        );
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        assert!(item_from_json(&json!({"U1": [256]})).is_err());
        assert!(item_from_json(&json!({"I1": [-129]})).is_err());
        assert!(item_from_json(&json!({"U2": [-1]})).is_err());
    }

    #[test]
    fn malformed_bodies_are_rejected() {
        assert!(item_from_json(&json!({"X9": []})).is_err());
        assert!(item_from_json(&json!({"A": 5})).is_err());
        assert!(item_from_json(&json!({"U1": [1], "A": "x"})).is_err());
        assert!(item_from_json(&json!([1, 2])).is_err());
        assert_eq!(parse_item("{").unwrap_err().code, USAGE);
    }

    #[test]
    fn non_finite_floats_render_as_null() {
        let item = Item::values(vec![1.5f64, f64::NAN]);
        assert_eq!(item_to_json(&item), json!({"F8": [1.5, null]}));
    }

    #[test]
    fn empty_items_keep_their_format() {
        let item = Item::empty(secsprims_item::Format::U2);
        let json = item_to_json(&item);
        assert_eq!(json, json!({"U2": []}));
        assert_eq!(item_from_json(&json).unwrap(), item);
    }
}
