//! Endpoint and lifecycle handlers: listEndpoints, notifyDeparture, ready,
//! whoAmI.

use async_trait::async_trait;
use serde_json::{Value, json};
use tally_core::EndpointId;
use tracing::{info, instrument, warn};

use crate::rpc::context::RpcContext;
use crate::rpc::errors::RpcError;
use crate::rpc::registry::MethodHandler;
use crate::rpc::validation::require_string_param;

/// List live endpoint identities.
pub struct ListEndpointsHandler;

#[async_trait]
impl MethodHandler for ListEndpointsHandler {
    #[instrument(skip(self, ctx), fields(method = "listEndpoints"))]
    async fn handle(&self, _params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        Ok(json!(ctx.broker.list_endpoints()))
    }
}

/// Announce that an endpoint is leaving.
///
/// Only the caller's own endpoint can depart: its channel's broker state
/// is torn down while the transport stays open, so a departed channel can
/// still read the counter but cannot subscribe. Any other id is a no-op.
pub struct NotifyDepartureHandler;

#[async_trait]
impl MethodHandler for NotifyDepartureHandler {
    #[instrument(skip(self, ctx), fields(method = "notifyDeparture"))]
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let endpoint_id = EndpointId::from(require_string_param(params.as_ref(), "endpointId")?);
        if ctx.broker.endpoint_of(ctx.channel_id()).as_ref() == Some(&endpoint_id) {
            info!(channel_id = %ctx.channel_id(), %endpoint_id, "departure notified");
            ctx.broker.notify_departure(&endpoint_id);
        } else {
            warn!(channel_id = %ctx.channel_id(), %endpoint_id, "ignoring departure for an endpoint this channel does not own");
        }
        Ok(json!({ "acknowledged": true }))
    }
}

/// Client is wired up: activate the channel now.
pub struct ReadyHandler;

#[async_trait]
impl MethodHandler for ReadyHandler {
    #[instrument(skip(self, ctx), fields(method = "ready"))]
    async fn handle(&self, _params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let endpoint_id = ctx.broker.ready(ctx.channel_id())?;
        Ok(json!({ "endpointId": endpoint_id }))
    }
}

/// Report the caller's identity, lifecycle state, and broker mode.
pub struct WhoAmIHandler;

#[async_trait]
impl MethodHandler for WhoAmIHandler {
    #[instrument(skip(self, ctx), fields(method = "whoAmI"))]
    async fn handle(&self, _params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let channel_id = ctx.channel_id();
        Ok(json!({
            "endpointId": ctx.broker.endpoint_of(channel_id),
            "state": ctx.broker.channel_state(channel_id),
            "mode": ctx.mode,
        }))
    }
}
