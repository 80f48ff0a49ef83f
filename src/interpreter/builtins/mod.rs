//! Native builtin surface (`spec.md` §4.C "Native builtin surface").
//!
//! Each builtin is a plain `fn` (not a closure) returning a boxed future,
//! so it coerces directly to [`NativeFn`]'s higher-ranked signature
//! without an intermediate generic wrapper.

mod coercion;
mod collections;
mod concurrency;
mod control;
mod io;
mod json;
mod math;
mod strings;
mod time;

use crate::interpreter::evaluator::Evaluator;

pub async fn register_all(ev: &mut Evaluator) {
    io::register(ev).await;
    coercion::register(ev).await;
    strings::register(ev).await;
    collections::register(ev).await;
    math::register(ev).await;
    json::register(ev).await;
    time::register(ev).await;
    control::register(ev).await;
    concurrency::register(ev).await;
}

/// Builds a [`Flow::Error`] of kind [`crate::interpreter::error::DuError::Type`]
/// for an argument-shape mismatch; every builtin's entry check uses this.
pub(crate) fn arg_type_error(
    ev: &Evaluator,
    pos: crate::ast::Position,
    message: impl Into<String>,
) -> crate::interpreter::error::Flow {
    ev.data_err(crate::interpreter::error::DuError::Type(message.into()), pos)
}
