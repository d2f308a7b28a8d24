//! AI-driven request routing.

mod router;

pub use router::{Router, RoutingDecision, ACTION_PARAM, ROUTER_CONTEXT_TURNS};
