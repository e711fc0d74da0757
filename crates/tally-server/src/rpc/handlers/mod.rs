//! RPC handler modules and registration.

pub mod counter;
pub mod endpoints;
pub mod events;
pub mod system;

use crate::rpc::registry::MethodRegistry;

/// Register all RPC handlers with the registry.
pub fn register_all(registry: &mut MethodRegistry) {
    // Counter
    registry.register("getCounter", counter::GetCounterHandler);
    registry.register("incrementBy", counter::IncrementByHandler);
    registry.register("decrement", counter::DecrementHandler);

    // Events
    registry.register("subscribe", events::SubscribeHandler);
    registry.register("unsubscribe", events::UnsubscribeHandler);

    // Endpoints and lifecycle
    registry.register("listEndpoints", endpoints::ListEndpointsHandler);
    registry.register("notifyDeparture", endpoints::NotifyDepartureHandler);
    registry.register("ready", endpoints::ReadyHandler);
    registry.register("whoAmI", endpoints::WhoAmIHandler);

    // System
    registry.register("ping", system::PingHandler);
}
