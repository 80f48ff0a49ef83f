//! Statement execution (`spec.md` §4.C "Statement execution").

use crate::ast::{AssignOp, Block, Expr, ExprKind, Position, Stmt, StmtKind};
use crate::env::Env;
use crate::interpreter::error::{DuError, EvalResult, Flow};
use crate::interpreter::evaluator::Evaluator;
use crate::value::Value;

impl Evaluator {
    pub(crate) fn exec_block<'a>(
        &'a mut self,
        env: &'a Env,
        block: &'a Block,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = EvalResult<()>> + Send + 'a>> {
        Box::pin(async move {
            for stmt in block {
                self.exec_stmt(env, stmt).await?;
            }
            Ok(())
        })
    }

    pub(crate) fn exec_stmt<'a>(
        &'a mut self,
        env: &'a Env,
        stmt: &'a Stmt,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = EvalResult<()>> + Send + 'a>> {
        Box::pin(async move {
            self.current_env = Some(env.clone());
            self.check_cancel()?;
            self.maybe_breakpoint(env, stmt.pos).await?;
            match &stmt.kind {
                StmtKind::Expr(expr) => {
                    self.eval_expr(env, expr).await?;
                    Ok(())
                }
                StmtKind::VarDecl { name, value } => {
                    let v = match value {
                        Some(expr) => self.eval_expr(env, expr).await?,
                        None => Value::Nil,
                    };
                    env.define(name.clone(), v).await;
                    Ok(())
                }
                StmtKind::Assign { target, op, value } => {
                    let new_value = self.eval_compound_assign(env, target, *op, value, stmt.pos).await?;
                    self.assign_to(env, target, new_value, stmt.pos).await
                }
                StmtKind::PostIncrement { target } => {
                    let current = self.eval_expr(env, target).await?;
                    let n = match &current {
                        Value::Number(n) => *n,
                        other => {
                            return Err(self.data_err(
                                DuError::Type(format!("cannot increment {}", other.type_name())),
                                stmt.pos,
                            ))
                        }
                    };
                    self.assign_to(env, target, Value::Number(n + 1.0), stmt.pos).await
                }
                StmtKind::If { branches, else_branch } => {
                    for (cond, body) in branches {
                        if self.eval_expr(env, cond).await?.is_truthy().await {
                            let child = env.child();
                            return self.exec_block(&child, body).await;
                        }
                    }
                    if let Some(body) = else_branch {
                        let child = env.child();
                        self.exec_block(&child, body).await
                    } else {
                        Ok(())
                    }
                }
                StmtKind::While { cond, body } => {
                    while self.eval_expr(env, cond).await?.is_truthy().await {
                        self.check_cancel()?;
                        let child = env.child();
                        match self.exec_block(&child, body).await {
                            Ok(()) => {}
                            Err(Flow::Break) => break,
                            Err(Flow::Continue) => continue,
                            Err(other) => return Err(other),
                        }
                    }
                    Ok(())
                }
                StmtKind::ForRange { var, start, end, step, body } => {
                    let start_n = self.eval_expr(env, start).await?.to_number();
                    let end_n = self.eval_expr(env, end).await?.to_number();
                    let step_n = match step {
                        Some(s) => self.eval_expr(env, s).await?.to_number(),
                        None => 1.0,
                    };
                    if step_n == 0.0 {
                        return Err(self.data_err(DuError::Arithmetic("for-loop step cannot be zero".into()), stmt.pos));
                    }
                    let mut i = start_n;
                    loop {
                        if (step_n > 0.0 && i > end_n) || (step_n < 0.0 && i < end_n) {
                            break;
                        }
                        self.check_cancel()?;
                        let child = env.child();
                        child.define(var.clone(), Value::Number(i)).await;
                        match self.exec_block(&child, body).await {
                            Ok(()) => {}
                            Err(Flow::Break) => break,
                            Err(Flow::Continue) => {}
                            Err(other) => return Err(other),
                        }
                        i += step_n;
                    }
                    Ok(())
                }
                StmtKind::ForIn { var, iterable, body } => {
                    let iterable_value = self.eval_expr(env, iterable).await?;
                    let items: Vec<Value> = match &iterable_value {
                        Value::Array(arr) => arr.read().await.clone(),
                        Value::Object(obj) => obj.read().await.keys().map(|k| Value::string(k.clone())).collect(),
                        Value::Str(s) => s.chars().map(|c| Value::string(c.to_string())).collect(),
                        other => {
                            return Err(self.data_err(
                                DuError::Type(format!("cannot iterate over {}", other.type_name())),
                                stmt.pos,
                            ))
                        }
                    };
                    for item in items {
                        self.check_cancel()?;
                        let child = env.child();
                        child.define(var.clone(), item).await;
                        match self.exec_block(&child, body).await {
                            Ok(()) => {}
                            Err(Flow::Break) => break,
                            Err(Flow::Continue) => continue,
                            Err(other) => return Err(other),
                        }
                    }
                    Ok(())
                }
                StmtKind::FunctionDef { name, params, body } => {
                    let closure = crate::value::Closure {
                        name: Some(name.clone()),
                        params: params.clone(),
                        body: body.clone(),
                        env: env.clone(),
                    };
                    env.define(name.clone(), Value::Function(std::sync::Arc::new(closure))).await;
                    Ok(())
                }
                StmtKind::Return(expr) => {
                    let v = match expr {
                        Some(e) => self.eval_expr(env, e).await?,
                        None => Value::Nil,
                    };
                    Err(Flow::Return(v))
                }
                StmtKind::Break => Err(Flow::Break),
                StmtKind::Continue => Err(Flow::Continue),
                StmtKind::TryCatch { try_block, catch_var, catch_block } => {
                    let child = env.child();
                    match self.exec_block(&child, try_block).await {
                        Ok(()) => Ok(()),
                        Err(Flow::Error(re)) => {
                            let catch_env = env.child();
                            let err_value = match re.kind {
                                DuError::Throw(v) => v,
                                other => Value::string(other.to_string()),
                            };
                            catch_env.define(catch_var.clone(), err_value).await;
                            self.exec_block(&catch_env, catch_block).await
                        }
                        Err(other) => Err(other),
                    }
                }
                StmtKind::Block(inner) => {
                    let child = env.child();
                    self.exec_block(&child, inner).await
                }
            }
        })
    }

    async fn eval_compound_assign(
        &mut self,
        env: &Env,
        target: &Expr,
        op: AssignOp,
        value: &Expr,
        pos: Position,
    ) -> EvalResult<Value> {
        let rhs = self.eval_expr(env, value).await?;
        if matches!(op, AssignOp::Assign) {
            return Ok(rhs);
        }
        let current = self.eval_expr(env, target).await?;
        match op {
            AssignOp::AddAssign => self.value_add(current, rhs, pos).await,
            AssignOp::SubAssign => self.numeric_compound(current, rhs, pos, |a, b| a - b).await,
            AssignOp::MulAssign => self.numeric_compound(current, rhs, pos, |a, b| a * b).await,
            AssignOp::DivAssign => self.numeric_compound(current, rhs, pos, |a, b| a / b).await,
            AssignOp::ModAssign => self.numeric_compound(current, rhs, pos, |a, b| a % b).await,
            AssignOp::Assign => unreachable!(),
        }
    }

    async fn numeric_compound(
        &mut self,
        current: Value,
        rhs: Value,
        pos: Position,
        f: impl Fn(f64, f64) -> f64,
    ) -> EvalResult<Value> {
        match (&current, &rhs) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(f(*a, *b))),
            _ => Err(self.data_err(
                DuError::Type(format!("expected numbers, got {} and {}", current.type_name(), rhs.type_name())),
                pos,
            )),
        }
    }

    async fn assign_to(&mut self, env: &Env, target: &Expr, value: Value, pos: Position) -> EvalResult<()> {
        match &target.kind {
            ExprKind::Identifier(name) => {
                if !env.set(name, value.clone()).await {
                    env.define(name.clone(), value).await;
                }
                Ok(())
            }
            ExprKind::Index { target: inner, index } => {
                let container = self.eval_expr(env, inner).await?;
                let index_value = self.eval_expr(env, index).await?;
                match &container {
                    Value::Array(arr) => {
                        let i = index_value.to_number();
                        if i.is_nan() || i < 0.0 {
                            return Err(self.data_err(DuError::Index(format!("negative or invalid index {}", i)), pos));
                        }
                        let mut guard = arr.write().await;
                        let idx = i as usize;
                        if idx == guard.len() {
                            guard.push(value);
                        } else if idx < guard.len() {
                            guard[idx] = value;
                        } else {
                            return Err(self.data_err(DuError::Index(format!("index {} out of range", idx)), pos));
                        }
                        Ok(())
                    }
                    Value::Object(obj) => match &index_value {
                        Value::Str(key) => {
                            obj.write().await.insert(key.to_string(), value);
                            Ok(())
                        }
                        other => Err(self.data_err(
                            DuError::Type(format!("object keys must be strings, got {}", other.type_name())),
                            pos,
                        )),
                    },
                    other => Err(self.data_err(DuError::Type(format!("cannot index into {}", other.type_name())), pos)),
                }
            }
            ExprKind::Member { target: inner, name } => {
                let container = self.eval_expr(env, inner).await?;
                match &container {
                    Value::Object(obj) => {
                        obj.write().await.insert(name.clone(), value);
                        Ok(())
                    }
                    other => Err(self.data_err(
                        DuError::Type(format!("cannot assign member '{}' of {}", name, other.type_name())),
                        pos,
                    )),
                }
            }
            other => Err(self.data_err(DuError::Type(format!("invalid assignment target: {:?}", other)), pos)),
        }
    }
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
    async fn while_loop_breaks() {
        let mut ev = new_eval().await;
        let (out, err) = ev
            .execute("var i = 0\nwhile i < 10 do\n  if i == 3 do break end\n  print(i)\n  i += 1\nend")
            .await;
        assert!(err.is_none());
        assert_eq!(out, "0\n1\n2\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn for_range_counts_up() {
        let mut ev = new_eval().await;
        let (out, err) = ev.execute("for i = 1, 3 do\n  print(i)\nend").await;
        assert!(err.is_none());
        assert_eq!(out, "1\n2\n3\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn for_in_iterates_array() {
        let mut ev = new_eval().await;
        let (out, err) = ev.execute("for x in [10, 20, 30] do\n  print(x)\nend").await;
        assert!(err.is_none());
        assert_eq!(out, "10\n20\n30\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn try_catch_binds_thrown_value() {
        let mut ev = new_eval().await;
        let (out, err) = ev.execute(r#"try throw("boom") catch e print(e) end"#).await;
        assert!(err.is_none());
        assert_eq!(out, "boom\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn compound_assign_on_array_element() {
        let mut ev = new_eval().await;
        let (out, err) = ev.execute("var a = [1, 2]\na[0] += 10\nprint(a[0])").await;
        assert!(err.is_none());
        assert_eq!(out, "11\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn post_increment_updates_identifier() {
        let mut ev = new_eval().await;
        let (out, err) = ev.execute("var x = 5\nx++\nprint(x)").await;
        assert!(err.is_none());
        assert_eq!(out, "6\n");
    }
}
