//! Time: `now`, `format_time`, `parse_time`, `sleep`.

use chrono::{DateTime, Utc};

use crate::ast::Position;
use crate::interpreter::builtins::arg_type_error;
use crate::interpreter::error::{DuError, Flow};
use crate::interpreter::evaluator::Evaluator;
use crate::value::{BoxFuture, NamedArgs, Value};

pub(super) async fn register(ev: &mut Evaluator) {
    ev.register_builtin("now", std::sync::Arc::new(now)).await;
    ev.register_builtin("format_time", std::sync::Arc::new(format_time)).await;
    ev.register_builtin("parse_time", std::sync::Arc::new(parse_time)).await;
    ev.register_builtin("sleep", std::sync::Arc::new(sleep)).await;
}

/// Unix epoch seconds as a float (`spec.md` §4.C builtin catalog, time
/// group). Returning floating seconds keeps `now() - started` usable
/// directly as a duration.
fn now(_ev: &mut Evaluator, _args: NamedArgs, _pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move { Ok(Value::Number(Utc::now().timestamp_millis() as f64 / 1000.0)) })
}

fn format_time(ev: &mut Evaluator, args: NamedArgs, pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move {
        let Some(epoch) = args.get_positional(0).map(|v| v.to_number()) else {
            return Err(arg_type_error(ev, pos, "format_time() expects a numeric epoch-seconds argument"));
        };
        let fmt = match args.get_positional(1) {
            Some(Value::Str(s)) => s.to_string(),
            _ => "%Y-%m-%dT%H:%M:%SZ".to_string(),
        };
        let millis = (epoch * 1000.0) as i64;
        let dt = DateTime::<Utc>::from_timestamp_millis(millis)
            .ok_or_else(|| ev.data_err(DuError::Type("epoch value out of range".into()), pos))?;
        Ok(Value::string(dt.format(&fmt).to_string()))
    })
}

fn parse_time(ev: &mut Evaluator, args: NamedArgs, pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move {
        let Some(Value::Str(s)) = args.get_positional(0) else {
            return Err(arg_type_error(ev, pos, "parse_time() expects a string argument"));
        };
        let fmt = match args.get_positional(1) {
            Some(Value::Str(f)) => f.to_string(),
            _ => "%Y-%m-%dT%H:%M:%SZ".to_string(),
        };
        let parsed = chrono::NaiveDateTime::parse_from_str(s, &fmt)
            .map_err(|e| ev.data_err(DuError::Type(format!("cannot parse time '{}': {}", s, e)), pos))?;
        Ok(Value::Number(parsed.and_utc().timestamp_millis() as f64 / 1000.0))
    })
}

/// Suspends the current evaluator, honoring cancellation (`spec.md` §5
/// "Suspension points").
fn sleep(ev: &mut Evaluator, args: NamedArgs, pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move {
        let seconds = args.get_positional(0).map(|v| v.to_number()).unwrap_or(0.0).max(0.0);
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs_f64(seconds);
        loop {
            ev.check_cancel()?;
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(Value::Nil);
            }
            tokio::time::sleep(remaining.min(std::time::Duration::from_millis(50))).await;
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
    async fn now_returns_a_positive_epoch() {
        let mut ev = new_eval().await;
        let (out, _) = ev.execute("print(now() > 0)").await;
        assert_eq!(out, "true\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn format_and_parse_time_roundtrip() {
        let mut ev = new_eval().await;
        let (out, err) = ev.execute("var t = format_time(0)\nprint(parse_time(t))").await;
        assert!(err.is_none());
        assert_eq!(out, "0\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sleep_suspends_for_roughly_the_requested_duration() {
        let mut ev = new_eval().await;
        let start = std::time::Instant::now();
        let (_, err) = ev.execute("sleep(0.05)").await;
        assert!(err.is_none());
        assert!(start.elapsed() >= std::time::Duration::from_millis(40));
    }
}
