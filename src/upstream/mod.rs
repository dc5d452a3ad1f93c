pub mod client;
pub mod health;
pub mod loadbalance;
pub mod store;

pub use client::{build_proxy_client, ProxyClient, DEFAULT_REQUEST_TIMEOUT};
pub use health::spawn_health_checkers;
pub use loadbalance::{InFlightGuard, LoadBalancer, Target};
pub use store::{Upstream, UpstreamStore};
