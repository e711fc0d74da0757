//! Counter handlers: getCounter, incrementBy, decrement.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::instrument;

use crate::rpc::context::RpcContext;
use crate::rpc::errors::RpcError;
use crate::rpc::registry::MethodHandler;
use crate::rpc::validation::require_i64_param;

/// Read the current counter value.
pub struct GetCounterHandler;

#[async_trait]
impl MethodHandler for GetCounterHandler {
    #[instrument(skip(self, ctx), fields(method = "getCounter"))]
    async fn handle(&self, _params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        Ok(json!(ctx.broker.get_counter()))
    }
}

/// Add `amount` to the counter.
pub struct IncrementByHandler;

#[async_trait]
impl MethodHandler for IncrementByHandler {
    #[instrument(skip(self, ctx), fields(method = "incrementBy"))]
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let amount = require_i64_param(params.as_ref(), "amount")?;
        Ok(json!(ctx.broker.increment_by(amount)))
    }
}

/// Subtract one from the counter.
pub struct DecrementHandler;

#[async_trait]
impl MethodHandler for DecrementHandler {
    #[instrument(skip(self, ctx), fields(method = "decrement"))]
    async fn handle(&self, _params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        Ok(json!(ctx.broker.decrement()))
    }
}
