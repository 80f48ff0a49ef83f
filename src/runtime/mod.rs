//! Spawn / HTTP Dispatcher (`spec.md` §4.E).
//!
//! Everything here creates isolated child executions — `spawn`/`run`
//! launch a script on its own task, `parallel` fans out closures the same
//! way, and `http` serves a request-per-handler-script model. All three
//! share the process-wide datastore/process/http registries rather than
//! an evaluator's local environment.

pub mod dispatch;
pub mod http;
pub mod parallel;
pub mod process;
