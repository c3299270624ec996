//! Runtime host classification.
//!
//! Caching is a production behavior: on development hosts the controller
//! still walks its lifecycle but stores nothing and intercepts nothing, so
//! live-reload tooling never fights a stale cache.

/// Classification of the serving host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
	Development,
	Production,
}

impl Environment {
	pub fn is_development(self) -> bool {
		matches!(self, Environment::Development)
	}
}

/// Strategy turning a host name into an [`Environment`]. Injected into the
/// controller so tests can force either classification without depending on
/// the machine's real host names.
pub trait ClassifyHost: Send + Sync {
	fn classify(&self, host: &str) -> Environment;
}

/// Default rules: loopback hosts and preview deployments are development,
/// everything else is production.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostRules;

impl ClassifyHost for HostRules {
	fn classify(&self, host: &str) -> Environment {
		if host == "localhost" || host == "127.0.0.1" || host.contains("preview") {
			Environment::Development
		} else {
			Environment::Production
		}
	}
}

impl<F> ClassifyHost for F
where
	F: Fn(&str) -> Environment + Send + Sync,
{
	fn classify(&self, host: &str) -> Environment {
		self(host)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_default_host_rules() {
		let rules = HostRules;
		assert_eq!(rules.classify("localhost"), Environment::Development);
		assert_eq!(rules.classify("127.0.0.1"), Environment::Development);
		assert_eq!(
			rules.classify("preview.consultingsite.example"),
			Environment::Development
		);
		assert_eq!(
			rules.classify("deploy-preview-42.example.app"),
			Environment::Development
		);
		assert_eq!(
			rules.classify("consultingsite.example"),
			Environment::Production
		);
		// Only exact loopback strings count, not every 127.* address.
		assert_eq!(rules.classify("127.0.0.2"), Environment::Production);
	}

	#[test]
	fn test_closure_classifier() {
		let always_prod = |_host: &str| Environment::Production;
		assert_eq!(always_prod.classify("localhost"), Environment::Production);
	}
}
