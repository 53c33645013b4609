// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-counter-logger project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use std::future::Future;

use async_trait::async_trait;

use super::ComponentHealth;

/// A probe producing the health of one component.
///
/// Returning an error is allowed: the orchestrator turns it into a
/// `Critical` result for that component only.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self) -> anyhow::Result<ComponentHealth>;
}

/// Adapter turning an async closure into a [`HealthCheck`].
///
/// ```no_run
/// use rust_counter_logger::health::{ComponentHealth, FnHealthCheck};
///
/// let check = FnHealthCheck::new(|| async { Ok::<_, anyhow::Error>(ComponentHealth::healthy("Foo")) });
/// ```
pub struct FnHealthCheck<F> {
    check: F,
}

impl<F> FnHealthCheck<F> {
    pub fn new(check: F) -> Self {
        Self { check }
    }
}

#[async_trait]
impl<F, Fut> HealthCheck for FnHealthCheck<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<ComponentHealth>> + Send,
{
    async fn check(&self) -> anyhow::Result<ComponentHealth> {
        (self.check)().await
    }
}
