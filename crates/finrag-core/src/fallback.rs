//! Ordered fallback strategies as data instead of nested control flow.

use anyhow::{anyhow, Result};
use tracing::debug;

/// One named way of producing a `T`.
pub struct Strategy<'a, T> {
    pub name: &'static str,
    pub run: Box<dyn FnOnce() -> Result<T> + 'a>,
}

impl<'a, T> Strategy<'a, T> {
    pub fn new(name: &'static str, run: impl FnOnce() -> Result<T> + 'a) -> Self {
        Self { name, run: Box::new(run) }
    }
}

/// Runs strategies in order and returns the first success. Fails only when
/// every strategy failed, with all failures in the error message.
pub fn try_in_order<T>(strategies: Vec<Strategy<'_, T>>) -> Result<T> {
    let mut failures = Vec::new();
    for strategy in strategies {
        match (strategy.run)() {
            Ok(value) => return Ok(value),
            Err(e) => {
                debug!(strategy = strategy.name, error = %e, "fallback strategy failed");
                failures.push(format!("{}: {}", strategy.name, e));
            }
        }
    }
    Err(anyhow!("all strategies failed: [{}]", failures.join("; ")))
}
