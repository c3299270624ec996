//! Ordered interception rules.
//!
//! Every intercepted request is classified by the first rule that matches;
//! the order of the chain is load-bearing. Method and origin checks come
//! before anything that could touch a cache, the development gate comes
//! before both serving strategies, and navigations are picked off before the
//! asset default.

use http::Method;

use super::ControllerConfig;
use crate::environment::Environment;
use crate::fetch::FetchRequest;

/// What the controller does with one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteAction {
	/// Not intercepted; the hosting runtime performs the request itself.
	Passthrough,
	/// Serve from the network, consulting the cache only on failure.
	NetworkFirst,
	/// Serve from the cache, consulting the network only on a miss.
	CacheFirst,
}

/// Everything a rule predicate may inspect.
pub struct RouteContext<'a> {
	pub request: &'a FetchRequest,
	pub config: &'a ControllerConfig,
	pub environment: Environment,
}

/// Outcome of routing one request: the action plus the name of the rule
/// that decided it, for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteMatch {
	pub action: RouteAction,
	pub rule: &'static str,
}

struct Rule {
	name: &'static str,
	matches: fn(&RouteContext<'_>) -> bool,
	action: RouteAction,
}

const RULES: &[Rule] = &[
	Rule {
		name: "non-get",
		matches: is_non_get,
		action: RouteAction::Passthrough,
	},
	Rule {
		name: "cross-origin",
		matches: is_cross_origin,
		action: RouteAction::Passthrough,
	},
	Rule {
		name: "tooling-path",
		matches: is_tooling_path,
		action: RouteAction::Passthrough,
	},
	Rule {
		name: "development-host",
		matches: is_development,
		action: RouteAction::Passthrough,
	},
	Rule {
		name: "navigation",
		matches: is_navigation,
		action: RouteAction::NetworkFirst,
	},
];

/// Classify one request against the rule chain.
pub fn route_request(ctx: &RouteContext<'_>) -> RouteMatch {
	for rule in RULES {
		if (rule.matches)(ctx) {
			return RouteMatch {
				action: rule.action,
				rule: rule.name,
			};
		}
	}
	// Whatever survives the chain is a same-origin GET asset.
	RouteMatch {
		action: RouteAction::CacheFirst,
		rule: "asset",
	}
}

fn is_non_get(ctx: &RouteContext<'_>) -> bool {
	ctx.request.method != Method::GET
}

fn is_cross_origin(ctx: &RouteContext<'_>) -> bool {
	// Relative URLs are same-origin by construction.
	let Some(authority) = ctx.request.uri.authority() else {
		return false;
	};
	if Some(authority) != ctx.config.origin.authority() {
		return true;
	}
	match (ctx.request.uri.scheme(), ctx.config.origin.scheme()) {
		(Some(request_scheme), Some(origin_scheme)) => request_scheme != origin_scheme,
		_ => false,
	}
}

fn is_tooling_path(ctx: &RouteContext<'_>) -> bool {
	let path = ctx.request.uri.path();
	ctx.config
		.bypass_prefixes
		.iter()
		.any(|prefix| path.starts_with(prefix.as_str()))
}

fn is_development(ctx: &RouteContext<'_>) -> bool {
	ctx.environment.is_development()
}

fn is_navigation(ctx: &RouteContext<'_>) -> bool {
	ctx.request.is_navigation()
}
