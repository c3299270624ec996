//! The offline cache controller.
//!
//! One controller instance corresponds to one deployed version of the
//! application shell. The hosting runtime drives it through install and
//! activate, posts it messages, and offers it every outgoing request for
//! interception. The controller owns two cache partitions named after its
//! version: a static partition populated from the manifest at install time
//! and a dynamic partition populated as successful asset responses stream
//! by, bounded by [`ControllerConfig::max_dynamic_entries`].

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::try_join_all;
use http::{StatusCode, Uri};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;

use crate::cache::{CacheError, CacheNames, CacheStorage, RequestKey};
use crate::environment::{ClassifyHost, Environment, HostRules};
use crate::fetch::{Fetch, FetchError, FetchRequest, FetchResponse};

pub mod routing;
mod strategies;


use routing::{RouteAction, RouteContext};

/// Default bound on dynamic partition entries.
pub const DEFAULT_MAX_DYNAMIC_ENTRIES: usize = 50;

/// Error type for the install transition
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
	#[error("failed to fetch manifest asset '{uri}': {source}")]
	AssetFetch {
		uri: String,
		#[source]
		source: FetchError,
	},
	#[error("manifest asset '{uri}' returned status {status}")]
	AssetStatus { uri: String, status: StatusCode },
	#[error("cache storage failed during install: {0}")]
	Storage(#[from] CacheError),
}

/// Lifecycle of one controller instance. The hosting runtime drives the
/// transitions forward; the only backwards move is into `Redundant` when an
/// install fails or a newer version takes over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
	/// Registered but not yet installed.
	#[default]
	Parsed,
	Installing,
	/// Install finished, awaiting activation.
	Installed,
	Activating,
	/// Eligible to intercept fetches.
	Activated,
	/// Taken out of service.
	Redundant,
}

/// Messages page code may post to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum ControllerMessage {
	/// Apply a waiting update now instead of waiting for every open page
	/// to navigate away.
	#[serde(rename = "SKIP_WAITING")]
	SkipWaiting,
}

/// Outcome of fetch interception.
#[derive(Debug)]
pub enum FetchDecision {
	/// Not intercepted; the caller performs the request itself.
	Passthrough,
	/// Intercepted and answered by the controller.
	Respond(FetchResponse),
}

/// Tunables for one deployed controller version.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
	/// Partition name prefix, shared across versions.
	pub cache_prefix: String,
	/// Version suffix. Bumping it supersedes every prior partition at the
	/// next activation.
	pub cache_version: String,
	/// Origin this controller serves. Its host drives environment
	/// classification, its authority the cross-origin rule.
	pub origin: Uri,
	/// Assets fetched into the static partition at install time.
	pub manifest: Vec<Uri>,
	/// Document served when a navigation misses both network and cache.
	pub offline_fallback: Uri,
	/// Path prefixes never intercepted: dev-server internals and unbundled
	/// source, which must never end up in a cache.
	pub bypass_prefixes: Vec<String>,
	/// Upper bound on dynamic partition entries.
	pub max_dynamic_entries: usize,
}

impl ControllerConfig {
	pub fn new(
		cache_prefix: impl Into<String>,
		cache_version: impl Into<String>,
		origin: Uri,
	) -> Self {
		Self {
			cache_prefix: cache_prefix.into(),
			cache_version: cache_version.into(),
			origin,
			manifest: vec![
				Uri::from_static("/"),
				Uri::from_static("/index.html"),
				Uri::from_static("/assets/index.js"),
				Uri::from_static("/assets/index.css"),
			],
			offline_fallback: Uri::from_static("/index.html"),
			bypass_prefixes: vec![
				"/@vite".to_string(),
				"/@id".to_string(),
				"/@fs".to_string(),
				"/src/".to_string(),
				"/node_modules/".to_string(),
			],
			max_dynamic_entries: DEFAULT_MAX_DYNAMIC_ENTRIES,
		}
	}

	pub fn with_manifest(mut self, manifest: Vec<Uri>) -> Self {
		self.manifest = manifest;
		self
	}

	pub fn with_offline_fallback(mut self, uri: Uri) -> Self {
		self.offline_fallback = uri;
		self
	}

	pub fn with_bypass_prefixes(mut self, prefixes: Vec<String>) -> Self {
		self.bypass_prefixes = prefixes;
		self
	}

	pub fn with_max_dynamic_entries(mut self, max: usize) -> Self {
		self.max_dynamic_entries = max;
		self
	}

	/// The versioned partition names this configuration owns.
	pub fn cache_names(&self) -> CacheNames {
		CacheNames::new(self.cache_prefix.clone(), self.cache_version.clone())
	}
}

/// The controller itself. See the module docs for the lifecycle; all methods
/// take `&self` and the instance is meant to be shared behind an [`Arc`].
pub struct CacheController {
	config: ControllerConfig,
	storage: Arc<dyn CacheStorage>,
	fetch: Arc<dyn Fetch>,
	classifier: Arc<dyn ClassifyHost>,
	state: RwLock<LifecycleState>,
	skip_waiting: AtomicBool,
	controls_clients: AtomicBool,
}

impl CacheController {
	pub fn new(
		config: ControllerConfig,
		storage: Arc<dyn CacheStorage>,
		fetch: Arc<dyn Fetch>,
	) -> Self {
		Self {
			config,
			storage,
			fetch,
			classifier: Arc::new(HostRules),
			state: RwLock::new(LifecycleState::Parsed),
			skip_waiting: AtomicBool::new(false),
			controls_clients: AtomicBool::new(false),
		}
	}

	/// Replace the default host rules, so embedders and tests can pin the
	/// classification.
	pub fn with_classifier(mut self, classifier: Arc<dyn ClassifyHost>) -> Self {
		self.classifier = classifier;
		self
	}

	pub fn config(&self) -> &ControllerConfig {
		&self.config
	}

	pub fn state(&self) -> LifecycleState {
		*self.state.read()
	}

	/// Whether immediate activation was requested, either by install itself
	/// or by a `SKIP_WAITING` message.
	pub fn skip_waiting_requested(&self) -> bool {
		self.skip_waiting.load(Ordering::SeqCst)
	}

	/// Whether this instance has claimed the open pages.
	pub fn controls_clients(&self) -> bool {
		self.controls_clients.load(Ordering::SeqCst)
	}

	fn environment(&self) -> Environment {
		self.classifier
			.classify(self.config.origin.host().unwrap_or(""))
	}

	/// Run the install transition: populate the static partition from the
	/// manifest as a single all-or-nothing batch.
	///
	/// On a development host population is skipped but the transition still
	/// completes, so the registration is never left broken. Any manifest
	/// fetch failure fails the whole install and marks the instance
	/// redundant; the hosting runtime may retry with a fresh instance.
	///
	/// Callers must await completion before reporting the instance
	/// installed, mirroring the runtime contract that the install event
	/// stays open around asynchronous work.
	pub async fn install(&self) -> Result<(), InstallError> {
		*self.state.write() = LifecycleState::Installing;
		let environment = self.environment();
		if environment.is_development() {
			tracing::debug!("development host, skipping static cache population");
		} else if let Err(err) = self.populate_static().await {
			*self.state.write() = LifecycleState::Redundant;
			return Err(err);
		}
		// Jump the waiting queue in both classifications; page code expects
		// a new version to take effect on the next load.
		self.skip_waiting.store(true, Ordering::SeqCst);
		*self.state.write() = LifecycleState::Installed;
		tracing::info!(
			"install complete for version '{}' ({:?})",
			self.config.cache_version,
			environment
		);
		Ok(())
	}

	async fn populate_static(&self) -> Result<(), InstallError> {
		let names = self.config.cache_names();
		let static_name = names.static_partition();
		let partition = self.storage.open(&static_name).await?;

		let fetches = self.config.manifest.iter().map(|uri| async move {
			let response = self
				.fetch
				.fetch(FetchRequest::get(uri.clone()))
				.await
				.map_err(|source| InstallError::AssetFetch {
					uri: uri.to_string(),
					source,
				})?;
			if response.status != StatusCode::OK {
				return Err(InstallError::AssetStatus {
					uri: uri.to_string(),
					status: response.status,
				});
			}
			Ok((RequestKey::get(uri), response))
		});

		let assets = match try_join_all(fetches).await {
			Ok(assets) => assets,
			Err(err) => {
				self.discard_partial_static(&static_name).await;
				return Err(err);
			},
		};
		for (key, response) in assets {
			if let Err(err) = partition.put(key, response).await {
				self.discard_partial_static(&static_name).await;
				return Err(InstallError::Storage(err));
			}
		}
		// Create the dynamic partition up front so both current names exist
		// from install onward.
		if let Err(err) = self.storage.open(&names.dynamic_partition()).await {
			self.discard_partial_static(&static_name).await;
			return Err(InstallError::Storage(err));
		}
		tracing::debug!(
			"static cache '{}' populated with {} assets",
			static_name,
			self.config.manifest.len()
		);
		Ok(())
	}

	/// All-or-nothing: a failed install must not leave any manifest asset
	/// behind.
	async fn discard_partial_static(&self, name: &str) {
		if let Err(err) = self.storage.delete(name).await {
			tracing::warn!("failed to remove partial static cache '{}': {}", name, err);
		}
	}

	/// Run the activate transition: garbage-collect partitions from prior
	/// versions (all partitions on a development host) and claim the open
	/// pages.
	///
	/// Storage failures are logged and swallowed; activation always reaches
	/// `Activated`. Callers must await completion before treating the
	/// instance as active.
	pub async fn activate(&self) {
		*self.state.write() = LifecycleState::Activating;
		let environment = self.environment();
		let names = self.config.cache_names();
		match self.storage.names().await {
			Ok(existing) => {
				for name in existing {
					if !environment.is_development() && names.is_current(&name) {
						continue;
					}
					match self.storage.delete(&name).await {
						Ok(true) => tracing::debug!("deleted stale cache partition '{}'", name),
						Ok(false) => {},
						Err(err) => {
							tracing::warn!("failed to delete cache partition '{}': {}", name, err)
						},
					}
				}
			},
			Err(err) => tracing::warn!("could not enumerate cache partitions: {}", err),
		}
		// Control open pages immediately rather than after their next
		// navigation.
		self.controls_clients.store(true, Ordering::SeqCst);
		*self.state.write() = LifecycleState::Activated;
		tracing::info!("version '{}' active", self.config.cache_version);
	}

	/// Handle a message posted by page code. Unrecognized messages are
	/// ignored, not errors.
	pub fn handle_message(&self, message: &Value) {
		match ControllerMessage::deserialize(message) {
			Ok(ControllerMessage::SkipWaiting) => {
				tracing::debug!("skip-waiting requested by page");
				self.skip_waiting.store(true, Ordering::SeqCst);
			},
			Err(_) => {
				tracing::trace!("ignoring unrecognized message");
			},
		}
	}

	/// Decide one intercepted request. Returns `Passthrough` until the
	/// instance is activated; afterwards the rule chain in [`routing`]
	/// decides, and the matching strategy serves.
	///
	/// The only error out of this path is a network failure on a request
	/// the cache could not answer; cache failures never surface here.
	pub async fn handle_fetch(&self, request: &FetchRequest) -> Result<FetchDecision, FetchError> {
		if self.state() != LifecycleState::Activated {
			return Ok(FetchDecision::Passthrough);
		}
		let ctx = RouteContext {
			request,
			config: &self.config,
			environment: self.environment(),
		};
		let matched = routing::route_request(&ctx);
		tracing::trace!(
			"{} {} routed as '{}'",
			request.method,
			request.uri,
			matched.rule
		);
		match matched.action {
			RouteAction::Passthrough => Ok(FetchDecision::Passthrough),
			RouteAction::NetworkFirst => self
				.serve_network_first(request)
				.await
				.map(FetchDecision::Respond),
			RouteAction::CacheFirst => self
				.serve_cache_first(request)
				.await
				.map(FetchDecision::Respond),
		}
	}
}

impl fmt::Debug for CacheController {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("CacheController")
			.field("config", &self.config)
			.field("state", &self.state())
			.finish_non_exhaustive()
	}
}
