//! Strings: `upper`, `lower`, `substr`, `trim`, `split`, `join`,
//! `contains`, `find`, `replace`, `len`.

use crate::ast::Position;
use crate::interpreter::builtins::arg_type_error;
use crate::interpreter::error::Flow;
use crate::interpreter::evaluator::Evaluator;
use crate::value::{BoxFuture, NamedArgs, Value};

pub(super) async fn register(ev: &mut Evaluator) {
    ev.register_builtin("upper", std::sync::Arc::new(upper)).await;
    ev.register_builtin("lower", std::sync::Arc::new(lower)).await;
    ev.register_builtin("substr", std::sync::Arc::new(substr)).await;
    ev.register_builtin("trim", std::sync::Arc::new(trim)).await;
    ev.register_builtin("split", std::sync::Arc::new(split)).await;
    ev.register_builtin("join", std::sync::Arc::new(join)).await;
    ev.register_builtin("contains", std::sync::Arc::new(contains)).await;
    ev.register_builtin("find", std::sync::Arc::new(find)).await;
    ev.register_builtin("replace", std::sync::Arc::new(replace)).await;
    ev.register_builtin("len", std::sync::Arc::new(len)).await;
}

fn as_str<'a>(ev: &Evaluator, args: &'a NamedArgs, i: usize, pos: Position, fn_name: &str) -> Result<&'a str, Flow> {
    match args.get_positional(i) {
        Some(Value::Str(s)) => Ok(s.as_ref()),
        _ => Err(arg_type_error(ev, pos, format!("{}() expects a string argument", fn_name))),
    }
}

fn upper(ev: &mut Evaluator, args: NamedArgs, pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move { Ok(Value::string(as_str(ev, &args, 0, pos, "upper")?.to_uppercase())) })
}

fn lower(ev: &mut Evaluator, args: NamedArgs, pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move { Ok(Value::string(as_str(ev, &args, 0, pos, "lower")?.to_lowercase())) })
}

fn trim(ev: &mut Evaluator, args: NamedArgs, pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move { Ok(Value::string(as_str(ev, &args, 0, pos, "trim")?.trim().to_string())) })
}

fn substr(ev: &mut Evaluator, args: NamedArgs, pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move {
        let s = as_str(ev, &args, 0, pos, "substr")?;
        let chars: Vec<char> = s.chars().collect();
        let start = args.get_positional(1).map(|v| v.to_number() as i64).unwrap_or(0).max(0) as usize;
        let start = start.min(chars.len());
        let len = args
            .get_positional(2)
            .map(|v| v.to_number() as i64)
            .map(|n| n.max(0) as usize)
            .unwrap_or(chars.len() - start);
        let end = (start + len).min(chars.len());
        Ok(Value::string(chars[start..end].iter().collect::<String>()))
    })
}

fn split(ev: &mut Evaluator, args: NamedArgs, pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move {
        let s = as_str(ev, &args, 0, pos, "split")?.to_string();
        let sep = args.get_positional(1).cloned().unwrap_or_else(|| Value::string(""));
        let parts: Vec<Value> = match &sep {
            Value::Str(sep) if !sep.is_empty() => s.split(sep.as_ref()).map(Value::string).collect(),
            _ => s.chars().map(|c| Value::string(c.to_string())).collect(),
        };
        Ok(Value::array(parts))
    })
}

fn join(ev: &mut Evaluator, args: NamedArgs, pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move {
        let Some(Value::Array(arr)) = args.get_positional(0) else {
            return Err(arg_type_error(ev, pos, "join() expects an array as its first argument"));
        };
        let sep = match args.get_positional(1) {
            Some(Value::Str(s)) => s.to_string(),
            _ => String::new(),
        };
        let guard = arr.read().await;
        let mut parts = Vec::with_capacity(guard.len());
        for v in guard.iter() {
            parts.push(v.to_display_string().await);
        }
        Ok(Value::string(parts.join(&sep)))
    })
}

fn contains(ev: &mut Evaluator, args: NamedArgs, pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move {
        match args.get_positional(0) {
            Some(Value::Str(s)) => {
                let needle = as_str(ev, &args, 1, pos, "contains")?;
                Ok(Value::Bool(s.contains(needle)))
            }
            Some(Value::Array(arr)) => {
                let needle = args.get_positional(1).cloned().unwrap_or(Value::Nil);
                for item in arr.read().await.iter() {
                    if item.structural_eq(&needle).await {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            _ => Err(arg_type_error(ev, pos, "contains() expects a string or array as its first argument")),
        }
    })
}

fn find(ev: &mut Evaluator, args: NamedArgs, pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move {
        let s = as_str(ev, &args, 0, pos, "find")?;
        let needle = as_str(ev, &args, 1, pos, "find")?;
        match s.find(needle) {
            Some(byte_idx) => Ok(Value::Number(s[..byte_idx].chars().count() as f64)),
            None => Ok(Value::Number(-1.0)),
        }
    })
}

fn replace(ev: &mut Evaluator, args: NamedArgs, pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move {
        let s = as_str(ev, &args, 0, pos, "replace")?.to_string();
        let from = as_str(ev, &args, 1, pos, "replace")?.to_string();
        let to = as_str(ev, &args, 2, pos, "replace")?.to_string();
        Ok(Value::string(s.replace(&from, &to)))
    })
}

fn len(ev: &mut Evaluator, args: NamedArgs, pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move {
        match args.get_positional(0) {
            // Strings are an immutable UTF-8 byte sequence; length is in
            // bytes, not codepoints (`spec.md` §3 "string").
            Some(Value::Str(s)) => Ok(Value::Number(s.len() as f64)),
            Some(Value::Array(arr)) => Ok(Value::Number(arr.read().await.len() as f64)),
            Some(Value::Object(obj)) => Ok(Value::Number(obj.read().await.len() as f64)),
            _ => Err(arg_type_error(ev, pos, "len() expects a string, array, or object")),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::DatastoreRegistry;
    use crate::runtime::process::ProcessRegistry;
    use std::sync::Arc;

    async fn new_eval() -> Evaluator {
        Evaluator::new("test.du", Arc::new(DatastoreRegistry::new()), Arc::new(ProcessRegistry::new())).await
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn split_and_join_roundtrip() {
        let mut ev = new_eval().await;
        let (out, _) = ev.execute(r#"print(join(split("a,b,c", ","), "-"))"#).await;
        assert_eq!(out, "a-b-c\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn substr_extracts_middle_slice() {
        let mut ev = new_eval().await;
        let (out, _) = ev.execute(r#"print(substr("hello world", 6, 5))"#).await;
        assert_eq!(out, "world\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn find_returns_negative_one_when_absent() {
        let mut ev = new_eval().await;
        let (out, _) = ev.execute(r#"print(find("abc", "z"))"#).await;
        assert_eq!(out, "-1\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn len_counts_bytes_not_codepoints() {
        let mut ev = new_eval().await;
        let (out, _) = ev.execute(r#"print(len("héllo"))"#).await;
        assert_eq!(out, "6\n");
    }
}
