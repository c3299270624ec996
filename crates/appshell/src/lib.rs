//! Offline application-shell runtime: versioned asset caching with bounded
//! eviction, request interception strategies, and resilient resolution of
//! serverless function endpoints.
//!
//! The crate is built around two independent engines:
//!
//! - [`controller::CacheController`] owns two named cache partitions (a static
//!   partition populated from a manifest at install time and a bounded dynamic
//!   partition populated opportunistically), drives the install/activate
//!   lifecycle, and decides per request whether to serve from cache, from the
//!   network, or not intervene at all.
//! - [`resolver::EndpointResolver`] locates named serverless functions across
//!   an ordered list of candidate base paths, memoizing the first base that
//!   answers so later calls skip the probing.
//!
//! Both engines talk to the outside world through small injected traits
//! ([`fetch::Fetch`], [`cache::CacheStorage`], [`environment::ClassifyHost`])
//! so they can run against real HTTP clients and persistent stores or against
//! in-memory fakes in tests.

pub mod cache;
#[cfg(feature = "client")]
pub mod client;
pub mod controller;
pub mod environment;
pub mod fetch;
pub mod functions;
pub mod ratelimit;
pub mod resolver;

pub use cache::{CacheError, CacheNames, CachePartition, CacheStorage, RequestKey};
pub use controller::{
	CacheController, ControllerConfig, ControllerMessage, FetchDecision, InstallError,
	LifecycleState,
};
pub use environment::{ClassifyHost, Environment, HostRules};
pub use fetch::{Fetch, FetchError, FetchRequest, FetchResponse, RequestMode};
pub use resolver::{CallOptions, EndpointResolver, JsonCall, ResolveError, ResolverConfig};
