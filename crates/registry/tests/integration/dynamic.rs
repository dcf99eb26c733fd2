use std::sync::{Arc, Mutex};

use pretty_assertions::assert_eq;
use trellis_registry::{
	Contributor, DeltaCause, DeltaKind, MutationError, RegistryChangeEvent, RegistryError,
};

use crate::common::{Recorder, add, attached, namespaces, registry};

const HOST: &str = r#"
extension-point "xp" label="Point"
extension "xp" id="own" {
    item "a" {
        detail "deep"
    }
}
"#;

#[test]
fn removed_records_leave_stale_handles() {
	let built = registry("stale");
	let host = Contributor::module("1", "host");
	add(&built, &host, HOST).unwrap();

	let point = built.registry.extension_point("host.xp").unwrap();
	let ext = built.registry.extension("host.own").unwrap();
	let item = ext.configuration_elements().unwrap().remove(0);
	let detail = item.children().unwrap().remove(0);

	let delta = built.registry.remove_contributor(host.id(), &built.token).unwrap();
	assert_eq!(delta.removed_extension_points, vec![Arc::<str>::from("host.xp")]);
	assert_eq!(delta.removed_extensions.len(), 1);

	assert!(!point.is_valid());
	assert!(!ext.is_valid());
	assert!(!item.is_valid());
	assert!(matches!(point.label(), Err(RegistryError::InvalidObject { .. })));
	assert!(ext.unique_identifier().unwrap_err().is_invalid_object());
	assert!(detail.value().unwrap_err().is_invalid_object());
	assert!(detail.parent().unwrap_err().is_invalid_object());

	// A new record reusing the freed slot does not revive the old handle.
	add(&built, &host, HOST).unwrap();
	let fresh = built.registry.extension_point("host.xp").unwrap();
	assert!(!point.is_valid());
	assert_ne!(fresh, point);
	assert_eq!(&*fresh.label().unwrap().unwrap(), "Point");
}

#[test]
fn handles_stay_valid_inside_the_removal_callback() {
	let built = registry("callback");
	let host = Contributor::module("1", "host");
	add(&built, &host, HOST).unwrap();

	let seen = Arc::new(Mutex::new(Vec::new()));
	let sink = seen.clone();
	built.registry.add_listener(
		move |event: &RegistryChangeEvent| {
			for delta in event.all_extension_deltas() {
				let names: Vec<String> = delta
					.extension
					.configuration_elements()
					.unwrap()
					.iter()
					.flat_map(|e| e.children().unwrap())
					.map(|e| e.value().unwrap().unwrap_or_default().to_string())
					.collect();
				sink.lock().unwrap().push((delta.kind, delta.extension.is_valid(), names));
			}
			for delta in event.all_extension_point_deltas() {
				assert_eq!(&*delta.extension_point.unique_identifier().unwrap(), "host.xp");
			}
		},
		None,
	);

	built.registry.remove_contributor(host.id(), &built.token).unwrap();
	assert_eq!(
		*seen.lock().unwrap(),
		vec![(DeltaKind::Removed, true, vec!["deep".to_string()])]
	);
}

#[test]
fn contributor_removal_is_scoped_to_its_records() {
	let built = registry("scoped");
	let host = Contributor::module("1", "host");
	let alpha = Contributor::module("2", "alpha");
	let beta = Contributor::module("3", "beta");
	add(&built, &host, HOST).unwrap();
	add(&built, &alpha, "extension-point \"own\"\nextension \"host.xp\" id=\"a\"").unwrap();
	add(&built, &beta, "extension \"host.xp\" id=\"b\"\nextension \"alpha.own\" id=\"b2\"").unwrap();

	assert_eq!(namespaces(&built), vec!["alpha", "beta", "host"]);
	assert_eq!(attached(&built, "host.xp"), vec!["host.own", "alpha.a", "beta.b"]);
	assert_eq!(built.registry.extensions_in("beta").len(), 2);

	let delta = built.registry.remove_contributor(alpha.id(), &built.token).unwrap();
	assert_eq!(delta.removed_extension_points, vec![Arc::<str>::from("alpha.own")]);
	let removed: Vec<_> = delta.removed_extensions.iter().map(|e| e.unique_id.clone()).collect();
	assert_eq!(removed, vec![Some(Arc::from("alpha.a"))]);
	let orphaned: Vec<_> = delta.orphaned.iter().map(|e| e.unique_id.clone()).collect();
	assert_eq!(orphaned, vec![Some(Arc::from("beta.b2"))]);

	assert_eq!(namespaces(&built), vec!["beta", "host"]);
	assert_eq!(attached(&built, "host.xp"), vec!["host.own", "beta.b"]);
	assert!(built.registry.extensions_in("alpha").is_empty());
	assert!(built.registry.extension("beta.b2").unwrap().is_orphaned().unwrap());
	assert_eq!(built.registry.contributors().len(), 2);

	// Redeclaring the point re-attaches the surviving orphan.
	let delta = add(&built, &alpha, "extension-point \"own\"").unwrap();
	assert_eq!(delta.attached.len(), 1);
	assert_eq!(attached(&built, "alpha.own"), vec!["beta.b2"]);
}

#[test]
fn removal_inside_a_shared_namespace_keeps_other_contributors() {
	let built = registry("shared-namespace");
	let owner = Contributor::module("a", "shared");
	let guest = Contributor::module("b", "guest");
	add(&built, &owner, "extension-point \"pa\"\nextension \"pa\" id=\"ea\" { item \"1\" }").unwrap();
	add(
		&built,
		&guest,
		"extension-point \"shared.pb\"\nextension \"shared.pa\" id=\"shared.eb\" { item \"2\" }",
	)
	.unwrap();

	let counts = |built: &trellis_registry::BuiltRegistry| {
		(
			built.registry.extension_points_in("shared").len(),
			built.registry.extensions_in("shared").len(),
		)
	};
	assert_eq!(counts(&built), (2, 2));
	assert_eq!(namespaces(&built), vec!["shared"]);
	assert!(built.registry.extension_points_in("guest").is_empty());
	assert_eq!(attached(&built, "shared.pa"), vec!["shared.ea", "shared.eb"]);

	let guest_ext = built.registry.extension("shared.eb").unwrap();
	let delta = built.registry.remove_contributor(guest.id(), &built.token).unwrap();
	assert_eq!(delta.removed_extension_points, vec![Arc::<str>::from("shared.pb")]);
	assert_eq!(delta.removed_extensions.len(), 1);
	assert!(delta.orphaned.is_empty());
	assert!(!guest_ext.is_valid());

	assert_eq!(counts(&built), (1, 1));
	assert_eq!(namespaces(&built), vec!["shared"]);
	let point = built.registry.extension_point("shared.pa").unwrap();
	assert_eq!(point.contributor().unwrap(), owner);
	assert_eq!(attached(&built, "shared.pa"), vec!["shared.ea"]);
	assert_eq!(built.registry.configuration_elements_for("shared.pa").unwrap().len(), 1);
	assert_eq!(built.registry.contributors(), vec![owner]);
}

fn failing(_: &RegistryChangeEvent) {
	panic!("listener failure");
}

#[test]
fn listener_panics_do_not_stop_delivery() {
	let built = registry("panics");
	let recorder = Recorder::default();
	built.registry.add_listener(failing, None);
	built.registry.add_listener(recorder.listener(), None);

	let host = Contributor::module("1", "host");
	add(&built, &host, HOST).unwrap();
	let events = recorder.take();
	assert_eq!(events.len(), 1);
	assert_eq!(events[0].extension_point_deltas("host").len(), 1);
	assert!(built.registry.extension_point("host.xp").is_some());
}

#[test]
fn namespace_filters_restrict_events() {
	let built = registry("filters");
	let all = Recorder::default();
	let host_only = Recorder::default();
	let other_only = Recorder::default();
	built.registry.add_listener(all.listener(), None);
	built.registry.add_listener(host_only.listener(), Some("host"));
	let other_id = built.registry.add_listener(other_only.listener(), Some("other"));

	let host = Contributor::module("1", "host");
	let other = Contributor::module("2", "other");
	add(&built, &host, "extension-point \"xp\"").unwrap();
	// Extensions report under the namespace of the point they target.
	add(&built, &other, "extension-point \"mine\"\nextension \"host.xp\" id=\"e\"").unwrap();

	let all = all.take();
	assert_eq!(all.len(), 2);
	assert_eq!(all[1].namespaces().collect::<Vec<_>>(), vec!["host", "other"]);

	let host_events = host_only.take();
	assert_eq!(host_events.len(), 2);
	assert_eq!(host_events[1].namespaces().collect::<Vec<_>>(), vec!["host"]);
	let ext = &host_events[1].extension_deltas("host")[0];
	assert_eq!((ext.kind, ext.cause), (DeltaKind::Added, DeltaCause::Record));
	assert_eq!(&*ext.extension_point_id, "host.xp");
	assert!(ext.extension_point.is_some());
	assert!(host_events[1].extension_point_deltas("other").is_empty());

	let other_events = other_only.take();
	assert_eq!(other_events.len(), 1);
	assert_eq!(other_events[0].extension_point_deltas("other").len(), 1);
	assert!(other_events[0].namespace("host").is_none());

	assert!(built.registry.remove_listener(other_id));
	assert!(!built.registry.remove_listener(other_id));
	built.registry.remove_contributor(other.id(), &built.token).unwrap();
	assert!(other_only.take().is_empty());
	assert_eq!(host_only.take().len(), 1);
}

#[test]
fn individual_records_can_be_removed() {
	let built = registry("individual");
	let recorder = Recorder::default();
	built.registry.add_listener(recorder.listener(), None);
	let host = Contributor::module("1", "host");
	let user = Contributor::module("2", "user");
	add(&built, &host, HOST).unwrap();
	add(&built, &user, "extension \"host.xp\" id=\"u\"").unwrap();
	recorder.take();

	let own = built.registry.extension("host.own").unwrap();
	let delta = built.registry.remove_extension(&own, &built.token).unwrap();
	assert_eq!(delta.removed_extensions.len(), 1);
	assert!(!own.is_valid());
	assert_eq!(attached(&built, "host.xp"), vec!["user.u"]);
	assert_eq!(built.registry.stats().configuration_elements, 0);

	// Stale handles are refused rather than silently ignored.
	assert!(matches!(
		built.registry.remove_extension(&own, &built.token),
		Err(MutationError::Invalid(_))
	));

	let point = built.registry.extension_point("host.xp").unwrap();
	let delta = built.registry.remove_extension_point(&point, &built.token).unwrap();
	assert_eq!(delta.removed_extension_points.len(), 1);
	assert_eq!(delta.orphaned.len(), 1);
	let user_ext = built.registry.extension("user.u").unwrap();
	assert!(user_ext.is_orphaned().unwrap());

	let events = recorder.take();
	assert_eq!(events.len(), 2);
	let linkage: Vec<_> = events[1]
		.all_extension_deltas()
		.map(|d| (d.kind, d.cause))
		.collect();
	assert_eq!(linkage, vec![(DeltaKind::Removed, DeltaCause::Linkage)]);

	// The contributor itself is still registered through its orphan.
	assert_eq!(built.registry.extensions_for(user.id()).len(), 1);
	assert!(built.registry.extension_points_for(host.id()).is_empty());
}

#[test]
fn concurrent_contributors_do_not_interfere() {
	let built = registry("threads");
	let host = Contributor::module("host", "host");
	add(&built, &host, "extension-point \"xp\"").unwrap();

	std::thread::scope(|scope| {
		for n in 0..8 {
			let built = &built;
			scope.spawn(move || {
				let contributor = Contributor::module(format!("c{n}"), format!("c{n}"));
				for _ in 0..10 {
					add(built, &contributor, "extension \"host.xp\" id=\"e\" { v \"1\" }").unwrap();
					built.registry.remove_contributor(contributor.id(), &built.token).unwrap();
				}
				add(built, &contributor, "extension \"host.xp\" id=\"e\" { v \"1\" }").unwrap();
				assert!(add(built, &contributor, "extension \"host.xp\" id=\"e\"").is_err());
			});
		}
	});

	let stats = built.registry.stats();
	assert_eq!(stats.extensions, 8);
	assert_eq!(stats.configuration_elements, 8);
	assert_eq!(stats.orphans, 0);
	assert_eq!(attached(&built, "host.xp").len(), 8);
}
