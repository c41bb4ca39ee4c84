//! Builtin functions available to every generator.

use std::cmp::Ordering;
use std::rc::Rc;

use atlas_core::Value;

use crate::error::{AtlasError, AtlasResult};
use crate::interp::compare;
use crate::namespace::{CallArgs, NativeFn, Signal};

type Builtin = fn(&CallArgs) -> AtlasResult<Value>;

/// Names of all builtins.
pub const BUILTIN_NAMES: &[&str] = &[
    "range", "len", "str", "int", "float", "join", "append", "sorted", "reversed", "sum", "min",
    "max", "abs", "contains",
];

/// Look up a builtin by name.
pub fn lookup(name: &str) -> Option<NativeFn> {
    let f: Builtin = match name {
        "range" => range,
        "len" => len,
        "str" => to_str,
        "int" => to_int,
        "float" => to_float,
        "join" => join,
        "append" => append,
        "sorted" => sorted,
        "reversed" => reversed,
        "sum" => sum,
        "min" => min,
        "max" => max,
        "abs" => abs,
        "contains" => contains,
        _ => return None,
    };
    Some(Rc::new(move |call: &CallArgs| f(call).map_err(Signal::from)))
}

fn arity(name: &str, call: &CallArgs, min: usize, max: usize) -> AtlasResult<()> {
    let n = call.args.len();
    if n < min || n > max {
        let expected = if min == max {
            format!("{}", min)
        } else {
            format!("{} to {}", min, max)
        };
        return Err(AtlasError::invalid_arguments(
            name,
            format!("expected {} positional arguments, got {}", expected, n),
        ));
    }
    Ok(())
}

fn int_arg(name: &str, value: &Value) -> AtlasResult<i64> {
    value.as_int().ok_or_else(|| {
        AtlasError::invalid_arguments(name, format!("expected int, got {}", value.type_name()))
    })
}

fn list_arg(name: &str, value: &Value) -> AtlasResult<Vec<Value>> {
    value.elements().ok_or_else(|| {
        AtlasError::invalid_arguments(
            name,
            format!("expected list or str, got {}", value.type_name()),
        )
    })
}

fn range(call: &CallArgs) -> AtlasResult<Value> {
    arity("range", call, 1, 3)?;
    let ints = call
        .args
        .iter()
        .map(|v| int_arg("range", v))
        .collect::<AtlasResult<Vec<_>>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => return Err(AtlasError::invalid_arguments("range", "expected 1 to 3 arguments")),
    };
    if step == 0 {
        return Err(AtlasError::invalid_arguments("range", "step must not be zero"));
    }
    let mut items = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        items.push(Value::Int(i));
        i += step;
    }
    Ok(Value::List(items))
}

fn len(call: &CallArgs) -> AtlasResult<Value> {
    arity("len", call, 1, 1)?;
    match &call.args[0] {
        Value::Str(s) => Ok(Value::from(s.chars().count())),
        Value::List(items) => Ok(Value::from(items.len())),
        other => Err(AtlasError::invalid_arguments(
            "len",
            format!("{} has no length", other.type_name()),
        )),
    }
}

fn to_str(call: &CallArgs) -> AtlasResult<Value> {
    arity("str", call, 1, 1)?;
    Ok(Value::Str(call.args[0].to_string()))
}

fn to_int(call: &CallArgs) -> AtlasResult<Value> {
    arity("int", call, 1, 1)?;
    match &call.args[0] {
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Bool(b) => Ok(Value::Int(*b as i64)),
        Value::Float(f) => Ok(Value::Int(f.trunc() as i64)),
        Value::Str(s) => s.trim().parse::<i64>().map(Value::Int).map_err(|_| {
            AtlasError::invalid_arguments("int", format!("cannot parse {:?} as int", s))
        }),
        other => Err(AtlasError::invalid_arguments(
            "int",
            format!("cannot convert {} to int", other.type_name()),
        )),
    }
}

fn to_float(call: &CallArgs) -> AtlasResult<Value> {
    arity("float", call, 1, 1)?;
    match &call.args[0] {
        Value::Str(s) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| {
            AtlasError::invalid_arguments("float", format!("cannot parse {:?} as float", s))
        }),
        other => other.as_float().map(Value::Float).ok_or_else(|| {
            AtlasError::invalid_arguments(
                "float",
                format!("cannot convert {} to float", other.type_name()),
            )
        }),
    }
}

fn join(call: &CallArgs) -> AtlasResult<Value> {
    arity("join", call, 1, 2)?;
    let items = list_arg("join", &call.args[0])?;
    let sep = match call.get(1, "sep") {
        None => String::new(),
        Some(Value::Str(s)) => s.clone(),
        Some(other) => {
            return Err(AtlasError::invalid_arguments(
                "join",
                format!("separator must be str, got {}", other.type_name()),
            ))
        }
    };
    let parts: Vec<String> = items.iter().map(Value::to_string).collect();
    Ok(Value::Str(parts.join(&sep)))
}

fn append(call: &CallArgs) -> AtlasResult<Value> {
    arity("append", call, 2, 2)?;
    match &call.args[0] {
        Value::List(items) => {
            let mut items = items.clone();
            items.push(call.args[1].clone());
            Ok(Value::List(items))
        }
        other => Err(AtlasError::invalid_arguments(
            "append",
            format!("expected list, got {}", other.type_name()),
        )),
    }
}

fn sorted(call: &CallArgs) -> AtlasResult<Value> {
    arity("sorted", call, 1, 1)?;
    let mut items = list_arg("sorted", &call.args[0])?;
    let mut failure = None;
    items.sort_by(|a, b| {
        compare(a, b).unwrap_or_else(|| {
            failure.get_or_insert_with(|| format!("cannot order {} and {}", a.type_name(), b.type_name()));
            Ordering::Equal
        })
    });
    match failure {
        Some(message) => Err(AtlasError::invalid_arguments("sorted", message)),
        None => Ok(Value::List(items)),
    }
}

fn reversed(call: &CallArgs) -> AtlasResult<Value> {
    arity("reversed", call, 1, 1)?;
    match &call.args[0] {
        Value::Str(s) => Ok(Value::Str(s.chars().rev().collect())),
        other => {
            let mut items = list_arg("reversed", other)?;
            items.reverse();
            Ok(Value::List(items))
        }
    }
}

fn sum(call: &CallArgs) -> AtlasResult<Value> {
    arity("sum", call, 1, 1)?;
    let items = list_arg("sum", &call.args[0])?;
    let mut int_total: i64 = 0;
    let mut float_total: Option<f64> = None;
    for item in &items {
        match item {
            Value::Int(i) => match float_total.as_mut() {
                Some(total) => *total += *i as f64,
                None => int_total += i,
            },
            Value::Float(f) => {
                let total = float_total.get_or_insert(int_total as f64);
                *total += f;
            }
            other => {
                return Err(AtlasError::invalid_arguments(
                    "sum",
                    format!("cannot add {}", other.type_name()),
                ))
            }
        }
    }
    Ok(float_total.map(Value::Float).unwrap_or(Value::Int(int_total)))
}

fn min(call: &CallArgs) -> AtlasResult<Value> {
    extremum("min", call, Ordering::Less)
}

fn max(call: &CallArgs) -> AtlasResult<Value> {
    extremum("max", call, Ordering::Greater)
}

fn extremum(name: &str, call: &CallArgs, wanted: Ordering) -> AtlasResult<Value> {
    let items = match call.args.as_slice() {
        [single] => list_arg(name, single)?,
        [] => return Err(AtlasError::invalid_arguments(name, "expected at least one argument")),
        many => many.to_vec(),
    };
    let mut best: Option<Value> = None;
    for item in items {
        best = Some(match best {
            None => item,
            Some(current) => match compare(&item, &current) {
                Some(ord) if ord == wanted => item,
                Some(_) => current,
                None => {
                    return Err(AtlasError::invalid_arguments(
                        name,
                        format!("cannot order {} and {}", item.type_name(), current.type_name()),
                    ))
                }
            },
        });
    }
    best.ok_or_else(|| AtlasError::invalid_arguments(name, "empty sequence"))
}

fn abs(call: &CallArgs) -> AtlasResult<Value> {
    arity("abs", call, 1, 1)?;
    match &call.args[0] {
        Value::Int(i) => Ok(Value::Int(i.abs())),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        other => Err(AtlasError::invalid_arguments(
            "abs",
            format!("expected number, got {}", other.type_name()),
        )),
    }
}

fn contains(call: &CallArgs) -> AtlasResult<Value> {
    arity("contains", call, 2, 2)?;
    match (&call.args[0], &call.args[1]) {
        (Value::Str(haystack), Value::Str(needle)) => Ok(Value::Bool(haystack.contains(needle.as_str()))),
        (Value::List(items), needle) => Ok(Value::Bool(items.contains(needle))),
        (other, _) => Err(AtlasError::invalid_arguments(
            "contains",
            format!("expected list or str, got {}", other.type_name()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: Vec<Value>) -> AtlasResult<Value> {
        let f = lookup(name).unwrap();
        f(&CallArgs::new(args)).map_err(|signal| signal.into_error("test"))
    }

    #[test]
    fn range_forms() {
        assert_eq!(call("range", vec![3.into()]).unwrap(), Value::from(vec![0, 1, 2]));
        assert_eq!(call("range", vec![1.into(), 4.into(), 2.into()]).unwrap(), Value::from(vec![1, 3]));
        assert_eq!(call("range", vec![3.into(), 0.into(), (-1).into()]).unwrap(), Value::from(vec![3, 2, 1]));
        assert!(call("range", vec![1.into(), 2.into(), 0.into()]).is_err());
    }

    #[test]
    fn join_and_len() {
        let list = Value::from(vec!["a", "b"]);
        assert_eq!(call("join", vec![list.clone(), "-".into()]).unwrap(), Value::from("a-b"));
        assert_eq!(call("len", vec![list]).unwrap(), Value::from(2));
        assert!(call("len", vec![Value::Null]).is_err());
    }

    #[test]
    fn sorted_rejects_mixed_types() {
        let ok = call("sorted", vec![Value::from(vec![3, 1, 2])]).unwrap();
        assert_eq!(ok, Value::from(vec![1, 2, 3]));
        let mixed = Value::List(vec![Value::from(1), Value::from("a")]);
        assert!(call("sorted", vec![mixed]).is_err());
    }

    #[test]
    fn numeric_helpers() {
        assert_eq!(call("sum", vec![Value::from(vec![1, 2])]).unwrap(), Value::from(3));
        assert_eq!(
            call("sum", vec![Value::List(vec![Value::from(1), Value::from(0.5)])]).unwrap(),
            Value::from(1.5)
        );
        assert_eq!(call("max", vec![2.into(), 7.into(), 5.into()]).unwrap(), Value::from(7));
        assert_eq!(call("min", vec![Value::from(vec![4, 2])]).unwrap(), Value::from(2));
        assert_eq!(call("abs", vec![(-4).into()]).unwrap(), Value::from(4));
        assert_eq!(call("int", vec!["12".into()]).unwrap(), Value::from(12));
    }

    #[test]
    fn every_name_resolves() {
        for name in BUILTIN_NAMES {
            assert!(lookup(name).is_some(), "{} missing", name);
        }
        assert!(lookup("Select").is_none());
    }
}
