use crate::context::VuContext;
use async_trait::async_trait;
use std::future::Future;

/// Work performed by a VU on every iteration. The engine owns the loop and
/// decides when to call it.
#[async_trait]
pub trait Scenario: Send + Sync + 'static {
    async fn iteration(&self, vu: &VuContext);
}

#[async_trait]
impl<F, Fut> Scenario for F
where
    F: Fn(VuContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn iteration(&self, vu: &VuContext) {
        (self)(vu.clone()).await
    }
}
