//! Subscription handlers: subscribe, unsubscribe.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tally_broker::RemoteCallback;
use tally_core::{EventName, SubscriptionId};
use tracing::{debug, instrument};

use crate::rpc::context::RpcContext;
use crate::rpc::errors::RpcError;
use crate::rpc::registry::MethodHandler;
use crate::rpc::validation::{optional_bool_param, require_string_param};

/// Register a client-side callback for one event.
///
/// Params: `eventName`, `callbackId`, and optionally `ack: true` to have
/// each delivery wait for a `callbackResult` reply.
pub struct SubscribeHandler;

#[async_trait]
impl MethodHandler for SubscribeHandler {
    #[instrument(skip(self, ctx), fields(method = "subscribe"))]
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let event_name = require_string_param(params.as_ref(), "eventName")?;
        let callback_id = require_string_param(params.as_ref(), "callbackId")?;
        let ack = optional_bool_param(params.as_ref(), "ack")?.unwrap_or(false);

        let event: EventName = event_name.parse()?;
        let mut callback = RemoteCallback::new(ctx.connection.clone(), callback_id);
        if ack {
            callback = callback.acknowledged(ctx.callback_timeout);
        }

        let subscription_id = ctx.broker.subscribe(ctx.channel_id(), event, Arc::new(callback))?;
        debug!(%subscription_id, %event, ack, "subscription created");
        Ok(json!({ "subscriptionId": subscription_id }))
    }
}

/// Remove a subscription. Unknown ids report `removed: false`.
pub struct UnsubscribeHandler;

#[async_trait]
impl MethodHandler for UnsubscribeHandler {
    #[instrument(skip(self, ctx), fields(method = "unsubscribe"))]
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let subscription_id = SubscriptionId::from(require_string_param(params.as_ref(), "subscriptionId")?);
        let removed = ctx.broker.unsubscribe(&subscription_id);
        Ok(json!({ "removed": removed }))
    }
}
