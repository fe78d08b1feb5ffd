//! Evaluation of a parsed template against a JSON context

use std::borrow::Cow;

use serde_json::Value;

use super::TemplateError;
use super::funcs;
use super::parse::{Command, Node, Operand, Pipeline};
use super::regex_cache::RegexCache;

/// Printed for a map key that does not exist
const NO_VALUE: &str = "<no value>";

pub(super) fn exec_error(message: impl Into<String>) -> TemplateError {
    TemplateError::Exec(message.into())
}

/// A value flowing through a pipeline.
///
/// `Missing` is what a lookup of an absent key yields; it differs from an
/// explicit JSON `null` only in how it prints.
#[derive(Debug, Clone, PartialEq)]
pub(super) enum Datum<'v> {
    Missing,
    Value(Cow<'v, Value>),
}

impl<'v> Datum<'v> {
    pub(super) fn owned(value: Value) -> Self {
        Datum::Value(Cow::Owned(value))
    }

    pub(super) fn borrowed(value: &'v Value) -> Self {
        Datum::Value(Cow::Borrowed(value))
    }

    pub(super) fn value(&self) -> Option<&Value> {
        match self {
            Datum::Missing => None,
            Datum::Value(value) => Some(value.as_ref()),
        }
    }

    pub(super) fn is_nil(&self) -> bool {
        matches!(self.value(), None | Some(Value::Null))
    }

    pub(super) fn truthy(&self) -> bool {
        match self.value() {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Array(a)) => !a.is_empty(),
            Some(Value::Object(o)) => !o.is_empty(),
        }
    }

    /// Look up a key of a map value. Absent keys and nil bases yield `Missing`.
    pub(super) fn field(self, name: &str) -> Result<Datum<'v>, TemplateError> {
        match self {
            Datum::Missing => Ok(Datum::Missing),
            Datum::Value(Cow::Borrowed(value)) => match value {
                Value::Object(map) => Ok(map.get(name).map_or(Datum::Missing, Datum::borrowed)),
                Value::Null => Ok(Datum::Missing),
                other => Err(cannot_evaluate(name, other)),
            },
            Datum::Value(Cow::Owned(value)) => match value {
                Value::Object(mut map) => Ok(map.remove(name).map_or(Datum::Missing, Datum::owned)),
                Value::Null => Ok(Datum::Missing),
                other => Err(cannot_evaluate(name, &other)),
            },
        }
    }

    fn follow(self, chain: &[String]) -> Result<Datum<'v>, TemplateError> {
        chain.iter().try_fold(self, |datum, name| datum.field(name))
    }
}

fn cannot_evaluate(name: &str, value: &Value) -> TemplateError {
    exec_error(format!(
        "can't evaluate field {name} in type {}",
        type_name(value)
    ))
}

pub(super) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "nil",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float64",
        Value::Number(_) => "int",
        Value::String(_) => "string",
        Value::Array(_) => "[]interface {}",
        Value::Object(_) => "map[string]interface {}",
    }
}

/// Write a value the way the template language prints it.
pub(super) fn write_datum(datum: &Datum<'_>, out: &mut String) {
    match datum.value() {
        None => out.push_str(NO_VALUE),
        Some(value) => write_value(value, out),
    }
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("<nil>"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => out.push_str(s),
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(' ');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            out.push_str("map[");
            for (idx, (key, item)) in map.iter().enumerate() {
                if idx > 0 {
                    out.push(' ');
                }
                out.push_str(key);
                out.push(':');
                write_value(item, out);
            }
            out.push(']');
        }
    }
}

/// Renders a value to a string, as `print` does for a single operand.
pub(super) fn datum_to_string(datum: &Datum<'_>) -> String {
    let mut out = String::new();
    write_datum(datum, &mut out);
    out
}

pub(super) struct Exec<'a> {
    root: &'a Value,
    regex_cache: &'a RegexCache,
}

impl<'a> Exec<'a> {
    pub(super) fn new(root: &'a Value, regex_cache: &'a RegexCache) -> Self {
        Self { root, regex_cache }
    }

    pub(super) fn run(&self, nodes: &[Node]) -> Result<String, TemplateError> {
        let mut out = String::new();
        self.walk(nodes, &Datum::borrowed(self.root), &mut out)?;
        Ok(out)
    }

    fn walk<'d>(
        &'d self,
        nodes: &[Node],
        dot: &Datum<'d>,
        out: &mut String,
    ) -> Result<(), TemplateError> {
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Action(pipe) => {
                    let value = self.eval_pipeline(pipe, dot)?;
                    write_datum(&value, out);
                }
                Node::If {
                    cond,
                    then,
                    otherwise,
                } => {
                    if self.eval_pipeline(cond, dot)?.truthy() {
                        self.walk(then, dot, out)?;
                    } else {
                        self.walk(otherwise, dot, out)?;
                    }
                }
                Node::With {
                    pipe,
                    body,
                    otherwise,
                } => {
                    let value = self.eval_pipeline(pipe, dot)?;
                    if value.truthy() {
                        self.walk(body, &value, out)?;
                    } else {
                        self.walk(otherwise, dot, out)?;
                    }
                }
                Node::Range {
                    pipe,
                    body,
                    otherwise,
                } => {
                    let value = self.eval_pipeline(pipe, dot)?;
                    let items: Vec<Datum<'_>> = match value.value() {
                        None | Some(Value::Null) => Vec::new(),
                        Some(Value::Array(items)) => items.iter().map(Datum::borrowed).collect(),
                        Some(Value::Object(map)) => map.values().map(Datum::borrowed).collect(),
                        Some(other) => {
                            return Err(exec_error(format!(
                                "range can't iterate over {}",
                                type_name(other)
                            )));
                        }
                    };
                    if items.is_empty() {
                        self.walk(otherwise, dot, out)?;
                    }
                    for item in &items {
                        self.walk(body, item, out)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn eval_pipeline<'d>(
        &'d self,
        pipe: &Pipeline,
        dot: &Datum<'d>,
    ) -> Result<Datum<'d>, TemplateError> {
        let mut previous = None;
        for command in &pipe.commands {
            previous = Some(self.eval_command(command, dot, previous.take())?);
        }
        Ok(previous.unwrap_or(Datum::Missing))
    }

    fn eval_command<'d>(
        &'d self,
        command: &Command,
        dot: &Datum<'d>,
        piped: Option<Datum<'d>>,
    ) -> Result<Datum<'d>, TemplateError> {
        match command {
            Command::Call { name, args } => {
                let mut values = args
                    .iter()
                    .map(|arg| self.eval_operand(arg, dot))
                    .collect::<Result<Vec<_>, _>>()?;
                values.extend(piped);
                funcs::call(name, values, self.regex_cache)
            }
            Command::Operand(_) if piped.is_some() => {
                Err(exec_error("can't give argument to non-function"))
            }
            Command::Operand(operand) => self.eval_operand(operand, dot),
        }
    }

    fn eval_operand<'d>(
        &'d self,
        operand: &Operand,
        dot: &Datum<'d>,
    ) -> Result<Datum<'d>, TemplateError> {
        match operand {
            Operand::Dot => Ok(dot.clone()),
            Operand::Field(chain) => dot.clone().follow(chain),
            Operand::Root(chain) => Datum::borrowed(self.root).follow(chain),
            Operand::Literal(value) => Ok(Datum::owned(value.clone())),
            Operand::Call(name) => funcs::call(name, Vec::new(), self.regex_cache),
            Operand::Sub(pipe, chain) => self.eval_pipeline(pipe, dot)?.follow(chain),
        }
    }
}
