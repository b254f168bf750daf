//! Case conversion filters on top of `heck`.

use std::collections::HashMap;

use heck::{
    ToKebabCase, ToLowerCamelCase, ToPascalCase, ToShoutySnakeCase, ToSnakeCase, ToTitleCase,
};
use tera::{Result, Value};

fn convert(name: &str, value: &Value, f: impl Fn(&str) -> String) -> Result<Value> {
    let s = value
        .as_str()
        .ok_or_else(|| tera::Error::msg(format!("{name} filter expects a string")))?;
    Ok(Value::String(f(s)))
}

pub(crate) fn snake_case(value: &Value, _args: &HashMap<String, Value>) -> Result<Value> {
    convert("snake_case", value, |s| s.to_snake_case())
}

pub(crate) fn pascal_case(value: &Value, _args: &HashMap<String, Value>) -> Result<Value> {
    convert("pascal_case", value, |s| s.to_pascal_case())
}

pub(crate) fn camel_case(value: &Value, _args: &HashMap<String, Value>) -> Result<Value> {
    convert("camel_case", value, |s| s.to_lower_camel_case())
}

pub(crate) fn kebab_case(value: &Value, _args: &HashMap<String, Value>) -> Result<Value> {
    convert("kebab_case", value, |s| s.to_kebab_case())
}

pub(crate) fn shouty_snake_case(value: &Value, _args: &HashMap<String, Value>) -> Result<Value> {
    convert("shouty_snake_case", value, |s| s.to_shouty_snake_case())
}

pub(crate) fn title_case(value: &Value, _args: &HashMap<String, Value>) -> Result<Value> {
    convert("title_case", value, |s| s.to_title_case())
}
