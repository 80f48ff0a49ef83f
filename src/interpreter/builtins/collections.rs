//! Collections: `keys`, `values`, `push`, `pop`, `shift`, `unshift`,
//! `sort`, `map`, `filter`, `reduce`, `range`.

use crate::ast::Position;
use crate::interpreter::builtins::arg_type_error;
use crate::interpreter::error::Flow;
use crate::interpreter::evaluator::Evaluator;
use crate::value::{BoxFuture, NamedArgs, Value};

pub(super) async fn register(ev: &mut Evaluator) {
    ev.register_builtin("keys", std::sync::Arc::new(keys)).await;
    ev.register_builtin("values", std::sync::Arc::new(values)).await;
    ev.register_builtin("push", std::sync::Arc::new(push)).await;
    ev.register_builtin("pop", std::sync::Arc::new(pop)).await;
    ev.register_builtin("shift", std::sync::Arc::new(shift)).await;
    ev.register_builtin("unshift", std::sync::Arc::new(unshift)).await;
    ev.register_builtin("sort", std::sync::Arc::new(sort)).await;
    ev.register_builtin("map", std::sync::Arc::new(map)).await;
    ev.register_builtin("filter", std::sync::Arc::new(filter)).await;
    ev.register_builtin("reduce", std::sync::Arc::new(reduce)).await;
    ev.register_builtin("range", std::sync::Arc::new(range)).await;
}

fn as_array(ev: &Evaluator, args: &NamedArgs, i: usize, pos: Position, fn_name: &str) -> Result<std::sync::Arc<tokio::sync::RwLock<Vec<Value>>>, Flow> {
    match args.get_positional(i) {
        Some(Value::Array(arr)) => Ok(arr.clone()),
        _ => Err(arg_type_error(ev, pos, format!("{}() expects an array argument", fn_name))),
    }
}

fn keys(ev: &mut Evaluator, args: NamedArgs, pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move {
        match args.get_positional(0) {
            Some(Value::Object(obj)) => Ok(Value::array(obj.read().await.keys().cloned().map(Value::string).collect())),
            _ => Err(arg_type_error(ev, pos, "keys() expects an object")),
        }
    })
}

fn values(ev: &mut Evaluator, args: NamedArgs, pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move {
        match args.get_positional(0) {
            Some(Value::Object(obj)) => Ok(Value::array(obj.read().await.values().cloned().collect())),
            _ => Err(arg_type_error(ev, pos, "values() expects an object")),
        }
    })
}

fn push(ev: &mut Evaluator, args: NamedArgs, pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move {
        let arr = as_array(ev, &args, 0, pos, "push")?;
        let value = args.get_positional(1).cloned().unwrap_or(Value::Nil);
        let mut guard = arr.write().await;
        guard.push(value);
        Ok(Value::Number(guard.len() as f64))
    })
}

fn pop(ev: &mut Evaluator, args: NamedArgs, pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move {
        let arr = as_array(ev, &args, 0, pos, "pop")?;
        Ok(arr.write().await.pop().unwrap_or(Value::Nil))
    })
}

fn shift(ev: &mut Evaluator, args: NamedArgs, pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move {
        let arr = as_array(ev, &args, 0, pos, "shift")?;
        let mut guard = arr.write().await;
        if guard.is_empty() {
            Ok(Value::Nil)
        } else {
            Ok(guard.remove(0))
        }
    })
}

fn unshift(ev: &mut Evaluator, args: NamedArgs, pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move {
        let arr = as_array(ev, &args, 0, pos, "unshift")?;
        let value = args.get_positional(1).cloned().unwrap_or(Value::Nil);
        let mut guard = arr.write().await;
        guard.insert(0, value);
        Ok(Value::Number(guard.len() as f64))
    })
}

/// Sorts ascending by numeric/string ordering, or by an optional
/// comparator `fn(a, b) -> number` when given.
fn sort(ev: &mut Evaluator, args: NamedArgs, pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move {
        let arr = as_array(ev, &args, 0, pos, "sort")?;
        let comparator = args.get_positional(1).cloned();
        let mut items = arr.read().await.clone();
        match comparator {
            Some(cmp_fn) => {
                // Simple insertion sort so the comparator (a script call)
                // can be awaited without fighting a sort_by closure's
                // synchronous signature.
                for i in 1..items.len() {
                    let mut j = i;
                    while j > 0 {
                        let order = ev
                            .call_value(&cmp_fn, crate::value::NamedArgs::positional_only(vec![items[j - 1].clone(), items[j].clone()]), pos)
                            .await?
                            .to_number();
                        if order > 0.0 {
                            items.swap(j - 1, j);
                            j -= 1;
                        } else {
                            break;
                        }
                    }
                }
            }
            None => {
                items.sort_by(|a, b| match (a, b) {
                    (Value::Number(x), Value::Number(y)) => x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal),
                    (Value::Str(x), Value::Str(y)) => x.cmp(y),
                    _ => std::cmp::Ordering::Equal,
                });
            }
        }
        *arr.write().await = items.clone();
        Ok(Value::array(items))
    })
}

fn map(ev: &mut Evaluator, args: NamedArgs, pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move {
        let arr = as_array(ev, &args, 0, pos, "map")?;
        let Some(f) = args.get_positional(1).cloned() else {
            return Err(arg_type_error(ev, pos, "map() expects a function as its second argument"));
        };
        let items = arr.read().await.clone();
        let mut out = Vec::with_capacity(items.len());
        for (i, item) in items.into_iter().enumerate() {
            let mapped = ev.call_value(&f, crate::value::NamedArgs::positional_only(vec![item, Value::Number(i as f64)]), pos).await?;
            out.push(mapped);
        }
        Ok(Value::array(out))
    })
}

fn filter(ev: &mut Evaluator, args: NamedArgs, pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move {
        let arr = as_array(ev, &args, 0, pos, "filter")?;
        let Some(f) = args.get_positional(1).cloned() else {
            return Err(arg_type_error(ev, pos, "filter() expects a function as its second argument"));
        };
        let items = arr.read().await.clone();
        let mut out = Vec::new();
        for (i, item) in items.into_iter().enumerate() {
            let keep = ev
                .call_value(&f, crate::value::NamedArgs::positional_only(vec![item.clone(), Value::Number(i as f64)]), pos)
                .await?;
            if keep.is_truthy().await {
                out.push(item);
            }
        }
        Ok(Value::array(out))
    })
}

/// With no `init`, seeds the accumulator from the first element and
/// errors on an empty array (`spec.md` §4.C.1).
fn reduce(ev: &mut Evaluator, args: NamedArgs, pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move {
        let arr = as_array(ev, &args, 0, pos, "reduce")?;
        let Some(f) = args.get_positional(1).cloned() else {
            return Err(arg_type_error(ev, pos, "reduce() expects a function as its second argument"));
        };
        let mut items = arr.read().await.clone().into_iter();
        let mut acc = match args.get_positional(2).cloned() {
            Some(init) => init,
            None => items.next().ok_or_else(|| {
                ev.data_err(crate::interpreter::error::DuError::Index("reduce() of an empty array with no init value".into()), pos)
            })?,
        };
        for item in items {
            acc = ev.call_value(&f, crate::value::NamedArgs::positional_only(vec![acc, item]), pos).await?;
        }
        Ok(acc)
    })
}

fn range(ev: &mut Evaluator, args: NamedArgs, pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move {
        let (start, end, step) = match args.len() {
            1 => (0.0, args.get_positional(0).unwrap().to_number(), 1.0),
            2 => (args.get_positional(0).unwrap().to_number(), args.get_positional(1).unwrap().to_number(), 1.0),
            3 => (
                args.get_positional(0).unwrap().to_number(),
                args.get_positional(1).unwrap().to_number(),
                args.get_positional(2).unwrap().to_number(),
            ),
            _ => return Err(arg_type_error(ev, pos, "range() expects 1 to 3 numeric arguments")),
        };
        if step == 0.0 {
            return Err(arg_type_error(ev, pos, "range() step cannot be zero"));
        }
        let mut out = Vec::new();
        let mut i = start;
        while (step > 0.0 && i < end) || (step < 0.0 && i > end) {
            out.push(Value::Number(i));
            i += step;
        }
        Ok(Value::array(out))
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
    async fn map_doubles_each_element() {
        let mut ev = new_eval().await;
        let (out, err) = ev.execute("var a = map([1,2,3], fn(x) -> x * 2)\nprint(a)").await;
        assert!(err.is_none());
        assert_eq!(out, "[2,4,6]\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reduce_sums_elements() {
        let mut ev = new_eval().await;
        let (out, err) = ev.execute("print(reduce([1,2,3,4], fn(a,b) -> a + b, 0))").await;
        assert!(err.is_none());
        assert_eq!(out, "10\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reduce_without_init_seeds_from_first_element() {
        let mut ev = new_eval().await;
        let (out, err) = ev.execute("print(reduce([1,2,3,4], fn(a,b) -> a + b))").await;
        assert!(err.is_none());
        assert_eq!(out, "10\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reduce_without_init_on_empty_array_is_an_index_error() {
        let mut ev = new_eval().await;
        let (_, err) = ev.execute("reduce([], fn(a,b) -> a + b)").await;
        assert!(matches!(err.unwrap().kind, crate::interpreter::error::DuError::Index(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn range_generates_ascending_sequence() {
        let mut ev = new_eval().await;
        let (out, _) = ev.execute("print(range(3))").await;
        assert_eq!(out, "[0,1,2]\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sort_orders_numbers_ascending() {
        let mut ev = new_eval().await;
        let (out, _) = ev.execute("var a = [3, 1, 2]\nsort(a)\nprint(a)").await;
        assert_eq!(out, "[1,2,3]\n");
    }
}
