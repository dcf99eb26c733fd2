//! Common utilities for registry integration tests.

use std::sync::{Arc, Mutex};

use trellis_registry::{
	BuiltRegistry, ContributionOptions, Contributor, Delta, MutationError, RegistryBuilder, RegistryChangeEvent,
};

/// Builds a dynamic registry with log output enabled.
pub fn registry(name: &str) -> BuiltRegistry {
	let _ = tracing_subscriber::fmt::try_init();
	RegistryBuilder::new(name).build()
}

/// Adds `source` for `contributor` as a dynamic, persisted contribution.
pub fn add(built: &BuiltRegistry, contributor: &Contributor, source: &str) -> Result<Delta, MutationError> {
	add_with(built, contributor, source, ContributionOptions::dynamic())
}

pub fn add_with(
	built: &BuiltRegistry,
	contributor: &Contributor,
	source: &str,
	options: ContributionOptions,
) -> Result<Delta, MutationError> {
	built.registry.add_contribution(
		source.as_bytes(),
		&format!("{}/plugin.kdl", contributor.name()),
		contributor,
		options,
		&built.token,
	)
}

/// Listener that keeps every event it receives.
#[derive(Clone, Default)]
pub struct Recorder {
	events: Arc<Mutex<Vec<RegistryChangeEvent>>>,
}

impl Recorder {
	pub fn listener(&self) -> impl Fn(&RegistryChangeEvent) + Send + Sync + 'static {
		let events = self.events.clone();
		move |event: &RegistryChangeEvent| events.lock().unwrap().push(event.clone())
	}

	pub fn take(&self) -> Vec<RegistryChangeEvent> {
		std::mem::take(&mut *self.events.lock().unwrap())
	}
}

/// Qualified ids of the extensions attached to `point`, in attachment order.
pub fn attached(built: &BuiltRegistry, point: &str) -> Vec<String> {
	built
		.registry
		.extension_point(point)
		.map(|p| {
			p.extensions()
				.unwrap()
				.iter()
				.map(|e| e.unique_identifier().unwrap().map(|id| id.to_string()).unwrap_or_default())
				.collect()
		})
		.unwrap_or_default()
}

pub fn namespaces(built: &BuiltRegistry) -> Vec<String> {
	built.registry.namespaces().iter().map(|ns| ns.to_string()).collect()
}
