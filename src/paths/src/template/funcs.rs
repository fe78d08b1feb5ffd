//! Functions callable from templates

use std::borrow::Cow;

use serde_json::Value;

use super::TemplateError;
use super::exec::{Datum, datum_to_string, exec_error, type_name};
use super::regex_cache::RegexCache;
use crate::escape::escape;

const FUNCTIONS: &[&str] = &[
    "replace",
    "split",
    "escape",
    "isSet",
    "replaceRegex",
    "index",
    "len",
    "eq",
    "ne",
    "not",
    "and",
    "or",
    "print",
];

pub(super) fn is_defined(name: &str) -> bool {
    FUNCTIONS.contains(&name)
}

pub(super) fn call<'d>(
    name: &str,
    args: Vec<Datum<'d>>,
    regex_cache: &RegexCache,
) -> Result<Datum<'d>, TemplateError> {
    match name {
        "replace" => {
            let [input, from, to] = exact(name, args)?;
            if input.is_nil() {
                return Err(exec_error("input does not exist, cannot replace"));
            }
            let (from, to) = (string_arg(name, &from)?, string_arg(name, &to)?);
            let replaced = string_arg(name, &input)?.replace(from, to);
            Ok(Datum::owned(Value::String(replaced)))
        }
        "split" => {
            let [input, delimiter] = exact(name, args)?;
            let input = string_arg(name, &input)?;
            let delimiter = string_arg(name, &delimiter)?;
            let parts: Vec<Value> = if delimiter.is_empty() {
                input.chars().map(|c| Value::String(c.to_string())).collect()
            } else {
                input
                    .split(delimiter)
                    .map(|part| Value::String(part.to_string()))
                    .collect()
            };
            Ok(Datum::owned(Value::Array(parts)))
        }
        "escape" => {
            let [input] = exact(name, args)?;
            let escaped = escape(string_arg(name, &input)?);
            Ok(Datum::owned(Value::String(escaped)))
        }
        "isSet" => {
            let [value, key] = exact(name, args)?;
            let key = string_arg(name, &key)?;
            let set = matches!(value.value(), Some(Value::Object(map)) if map.contains_key(key));
            Ok(Datum::owned(Value::Bool(set)))
        }
        "replaceRegex" => {
            let [input, pattern, replacement] = exact(name, args)?;
            let regex = regex_cache
                .get_or_compile(string_arg(name, &pattern)?)
                .map_err(|e| exec_error(format!("failed to parse incoming regex string: {e}")))?;
            let replacement = string_arg(name, &replacement)?;
            let replaced = regex.replace_all(string_arg(name, &input)?, replacement);
            Ok(Datum::owned(Value::String(replaced.into_owned())))
        }
        "index" => {
            let mut args = args.into_iter();
            let item = args.next().ok_or_else(|| {
                exec_error("wrong number of args for index: want at least 1 got 0")
            })?;
            args.try_fold(item, index)
        }
        "len" => {
            let [item] = exact(name, args)?;
            let len = match item.value() {
                Some(Value::String(s)) => s.len(),
                Some(Value::Array(a)) => a.len(),
                Some(Value::Object(o)) => o.len(),
                Some(other) => {
                    return Err(exec_error(format!("len of type {}", type_name(other))));
                }
                None => return Err(exec_error("len of nil pointer")),
            };
            Ok(Datum::owned(Value::from(len)))
        }
        "eq" => {
            let mut args = args.into_iter();
            let (Some(first), true) = (args.next(), args.len() > 0) else {
                return Err(exec_error("missing argument for comparison"));
            };
            let equal = args.any(|other| equal(&first, &other));
            Ok(Datum::owned(Value::Bool(equal)))
        }
        "ne" => {
            let [a, b] = exact(name, args)?;
            Ok(Datum::owned(Value::Bool(!equal(&a, &b))))
        }
        "not" => {
            let [value] = exact(name, args)?;
            Ok(Datum::owned(Value::Bool(!value.truthy())))
        }
        "and" | "or" => {
            let want = name == "or";
            let mut last = None;
            for arg in args {
                if arg.truthy() == want {
                    return Ok(arg);
                }
                last = Some(arg);
            }
            let message = format!("wrong number of args for {name}: want at least 1 got 0");
            last.ok_or_else(|| exec_error(message))
        }
        "print" => {
            let mut out = String::new();
            let mut previous_is_string = true;
            for (idx, arg) in args.iter().enumerate() {
                let is_string = matches!(arg.value(), Some(Value::String(_)));
                if idx > 0 && !is_string && !previous_is_string {
                    out.push(' ');
                }
                out.push_str(&datum_to_string(arg));
                previous_is_string = is_string;
            }
            Ok(Datum::owned(Value::String(out)))
        }
        _ => Err(exec_error(format!("function {name:?} not defined"))),
    }
}

fn exact<'d, const N: usize>(
    name: &str,
    args: Vec<Datum<'d>>,
) -> Result<[Datum<'d>; N], TemplateError> {
    args.try_into().map_err(|args: Vec<Datum<'d>>| {
        exec_error(format!(
            "wrong number of args for {name}: want {N} got {}",
            args.len()
        ))
    })
}

fn string_arg<'x>(name: &str, datum: &'x Datum<'_>) -> Result<&'x str, TemplateError> {
    match datum.value() {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(exec_error(format!(
            "{name}: expected string, got {}",
            type_name(other)
        ))),
        None => Err(exec_error(format!("{name}: input does not exist"))),
    }
}

fn index<'d>(item: Datum<'d>, key: Datum<'d>) -> Result<Datum<'d>, TemplateError> {
    if item.is_nil() {
        return Err(exec_error("index of untyped nil"));
    }
    let Datum::Value(item) = item else {
        return Err(exec_error("index of untyped nil"));
    };

    match (item, key.value()) {
        (Cow::Borrowed(Value::Object(map)), Some(Value::String(key))) => {
            Ok(map.get(key).map_or(Datum::Missing, Datum::borrowed))
        }
        (Cow::Owned(Value::Object(mut map)), Some(Value::String(key))) => {
            Ok(map.remove(key).map_or(Datum::Missing, Datum::owned))
        }
        (item, Some(Value::Number(n))) if item.is_array() => {
            let len = item.as_array().map_or(0, Vec::len);
            let position = n
                .as_u64()
                .and_then(|i| usize::try_from(i).ok())
                .filter(|&i| i < len)
                .ok_or_else(|| exec_error(format!("index out of range: {n}")))?;
            Ok(match item {
                Cow::Borrowed(value) => value.get(position).map_or(Datum::Missing, Datum::borrowed),
                Cow::Owned(Value::Array(mut items)) => Datum::owned(items.swap_remove(position)),
                Cow::Owned(_) => Datum::Missing,
            })
        }
        (item, _) => Err(exec_error(format!(
            "can't index item of type {}",
            type_name(&item)
        ))),
    }
}

fn equal(a: &Datum<'_>, b: &Datum<'_>) -> bool {
    match (a.value(), b.value()) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x.as_f64() == y.as_f64(),
        (None | Some(Value::Null), None | Some(Value::Null)) => true,
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}
