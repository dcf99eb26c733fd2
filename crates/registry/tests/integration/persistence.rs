use std::path::Path;
use std::time::Duration;

use pretty_assertions::assert_eq;
use trellis_registry::cache::{TimestampCheck, lazy_path, read_cache};
use trellis_registry::{
	BuiltRegistry, CacheOutcome, ContributionOptions, Contributor, ElementParent, RegistryBuilder,
};

use crate::common::{add, add_with, attached, namespaces};

const HOST: &str = r#"
extension-point "menus" label="Menus" schema="schema/menus.exsd"
extension "menus" id="main" label="Main menu" {
    menu "file" {
        group "open" {
            item "recent" shortcut="ctrl+r" {
                hint ""
                icon
            }
        }
    }
    separator
}
"#;

const USER: &str = r#"
extension "host.menus" id="extra" {
    item "x"
}
extension "absent.point" id="waiting"
"#;

fn open(path: &Path, timestamp: u64) -> BuiltRegistry {
	let _ = tracing_subscriber::fmt::try_init();
	RegistryBuilder::new("persisted")
		.timestamp(timestamp)
		.cache_path(path)
		.lazy_idle(Duration::from_secs(3600))
		.build()
}

fn populate(built: &BuiltRegistry) {
	add(built, &Contributor::module("1", "host"), HOST).unwrap();
	add(built, &Contributor::module("2", "user"), USER).unwrap();
}

/// Element tree of `extension` flattened as `(depth, name, value)`.
fn flatten(built: &BuiltRegistry, extension: &str) -> Vec<(usize, String, Option<String>)> {
	fn walk(
		element: &trellis_registry::ConfigurationElement,
		depth: usize,
		out: &mut Vec<(usize, String, Option<String>)>,
	) {
		out.push((
			depth,
			element.name().unwrap().to_string(),
			element.value().unwrap().map(|v| v.to_string()),
		));
		for child in element.children().unwrap() {
			walk(&child, depth + 1, out);
		}
	}

	let mut out = Vec::new();
	for root in built.registry.extension(extension).unwrap().configuration_elements().unwrap() {
		walk(&root, 0, &mut out);
	}
	out
}

fn some(value: &str) -> Option<String> {
	Some(value.to_string())
}

#[test]
fn cache_round_trip_restores_the_registry() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("registry.cache");

	let first = open(&path, 42);
	assert_eq!(first.cache, CacheOutcome::Rebuild);
	populate(&first);
	let expected_tree = flatten(&first, "host.main");
	let written = first.registry.stop(&first.token).unwrap().expect("cache written on stop");
	assert_eq!((written.extension_points, written.extensions), (1, 3));
	assert_eq!(written.timestamp, 42);

	let second = open(&path, 42);
	assert_eq!(
		second.cache,
		CacheOutcome::Adopted {
			timestamp: 42,
			extension_points: 1,
			extensions: 3,
		}
	);
	assert_eq!(namespaces(&second), vec!["host", "user"]);
	assert_eq!(attached(&second, "host.menus"), vec!["host.main", "user.extra"]);
	assert!(second.registry.extension("user.waiting").unwrap().is_orphaned().unwrap());
	assert_eq!(second.registry.stats().orphans, 1);

	let point = second.registry.extension_point("host.menus").unwrap();
	assert_eq!(point.label().unwrap().as_deref(), Some("Menus"));
	assert_eq!(point.schema_reference().unwrap().as_deref(), Some("schema/menus.exsd"));
	assert_eq!(point.contributor().unwrap(), Contributor::module("1", "host"));

	let tree = flatten(&second, "host.main");
	assert_eq!(tree, expected_tree);
	assert_eq!(
		tree,
		vec![
			(0, "menu".to_string(), some("file")),
			(1, "group".to_string(), some("open")),
			(2, "item".to_string(), some("recent")),
			(3, "hint".to_string(), some("")),
			(3, "icon".to_string(), None),
			(0, "separator".to_string(), None),
		]
	);

	let menu = second.registry.configuration_elements_for("host.menus").unwrap().remove(0);
	let group = menu.children().unwrap().remove(0);
	let item = group.children().unwrap().remove(0);
	assert_eq!(item.attribute("shortcut").unwrap().as_deref(), Some("ctrl+r"));
	assert!(matches!(item.parent().unwrap(), ElementParent::Element(_)));

	// The adopted registry is a full participant: new contributions link to cached points.
	let late = Contributor::module("3", "late");
	add(&second, &late, "extension \"host.menus\" id=\"l\"\nextension-point \"point\"").unwrap();
	assert_eq!(attached(&second, "host.menus"), vec!["host.main", "user.extra", "late.l"]);
	let delta = add(&second, &Contributor::module("4", "absent"), "extension-point \"point\"").unwrap();
	assert_eq!(delta.attached.len(), 1);
	assert!(!second.registry.extension("user.waiting").unwrap().is_orphaned().unwrap());
}

#[test]
fn orphan_arrival_order_survives_the_cache() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("registry.cache");
	let zeta = Contributor::module("z", "zeta");
	let alpha = Contributor::module("a", "alpha");
	let host = Contributor::module("h", "host");
	let waiting = "extension \"host.xp\" id=\"e\"";

	let live = open(&path, 5);
	add(&live, &zeta, waiting).unwrap();
	add(&live, &alpha, waiting).unwrap();
	live.registry.write_cache(&path).unwrap();

	let adopted = open(&path, 5);
	assert!(matches!(adopted.cache, CacheOutcome::Adopted { extensions: 2, .. }));
	assert_eq!(adopted.registry.stats().orphans, 2);

	for built in [&live, &adopted] {
		add(built, &host, "extension-point \"xp\"").unwrap();
		assert_eq!(attached(built, "host.xp"), vec!["zeta.e", "alpha.e"]);
	}
}

#[test]
fn mismatched_or_damaged_caches_are_rebuilt() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("registry.cache");
	let first = open(&path, 1);
	populate(&first);
	first.registry.stop(&first.token).unwrap();

	let stale = open(&path, 2);
	assert_eq!(stale.cache, CacheOutcome::Rebuild);
	assert!(stale.registry.extension_points().is_empty());

	let unchecked = RegistryBuilder::new("unchecked")
		.timestamp(2)
		.cache_path(&path)
		.check_timestamp(false)
		.build();
	assert!(matches!(unchecked.cache, CacheOutcome::Adopted { timestamp: 1, .. }));
	assert_eq!(unchecked.registry.extension_points().len(), 1);

	let mut bytes = std::fs::read(&path).unwrap();
	let last = bytes.len() - 1;
	bytes.truncate(last);
	std::fs::write(&path, &bytes).unwrap();
	assert!(read_cache(&path, TimestampCheck::NoCheck).is_none());
	let damaged = open(&path, 1);
	assert_eq!(damaged.cache, CacheOutcome::Rebuild);
	assert!(namespaces(&damaged).is_empty());
}

#[test]
fn transient_contributions_are_not_persisted() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("registry.cache");
	let first = open(&path, 1);
	populate(&first);
	add_with(
		&first,
		&Contributor::freestanding("t", "scratch"),
		"extension-point \"tmp\"\nextension \"host.menus\" id=\"tmp\"",
		ContributionOptions::transient(),
	)
	.unwrap();
	assert_eq!(attached(&first, "host.menus").len(), 3);
	let written = first.registry.stop(&first.token).unwrap().unwrap();
	assert_eq!((written.extension_points, written.extensions), (1, 3));

	let second = open(&path, 1);
	assert!(second.registry.extension_point("scratch.tmp").is_none());
	assert_eq!(attached(&second, "host.menus"), vec!["host.main", "user.extra"]);
	assert!(second.registry.contributors().iter().all(|c| c.id().as_str() != "t"));
}

#[test]
fn large_element_trees_page_in_lazily() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("registry.cache");
	let first = RegistryBuilder::new("lazy-writer")
		.timestamp(9)
		.cache_path(&path)
		.lazy_threshold(3)
		.build();
	populate(&first);
	add(
		&first,
		&Contributor::module("5", "bulk"),
		"extension \"host.menus\" id=\"bulk\" { a; b; c; d; e }",
	)
	.unwrap();
	let expected_main = flatten(&first, "host.main");
	let written = first.registry.stop(&first.token).unwrap().unwrap();
	assert_eq!(written.lazy_extensions, 2);
	assert!(lazy_path(&path).exists());

	let snapshot = read_cache(&path, TimestampCheck::Expect(9)).unwrap();
	assert!(snapshot.has_lazy_elements());
	let second = RegistryBuilder::new("lazy-reader")
		.timestamp(9)
		.cache_path(&path)
		.lazy_threshold(3)
		.lazy_idle(Duration::from_secs(3600))
		.with_snapshot(snapshot)
		.build();
	assert!(matches!(second.cache, CacheOutcome::Adopted { extensions: 4, .. }));

	// Only the inline tree of user.extra is allocated up front.
	let stats = second.registry.stats();
	assert_eq!(stats.configuration_elements, 1);
	assert!(!stats.lazy_resident);

	assert_eq!(flatten(&second, "host.main"), expected_main);
	assert!(second.registry.stats().lazy_resident);
	assert_eq!(second.registry.stats().configuration_elements, 7);

	second.registry.expire_lazy_data();
	assert!(!second.registry.stats().lazy_resident);
	assert_eq!(second.registry.stats().configuration_elements, 7);
	// Paged-in trees stay; the next lazy tree reloads the file.
	assert_eq!(flatten(&second, "host.main"), expected_main);
	assert!(!second.registry.stats().lazy_resident);
	let names: Vec<String> = flatten(&second, "bulk.bulk").into_iter().map(|(_, name, _)| name).collect();
	assert_eq!(names, vec!["a", "b", "c", "d", "e"]);
	assert!(second.registry.stats().lazy_resident);

	// Rewriting over the lazy file the registry was seeded from keeps it readable.
	let written = second.registry.write_cache(&path).unwrap();
	assert_eq!(written.lazy_extensions, 2);
	let third = open(&path, 9);
	assert_eq!(flatten(&third, "host.main"), expected_main);
}

#[test]
fn lazy_files_are_removed_when_no_longer_needed() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("registry.cache");
	let first = RegistryBuilder::new("lazy")
		.cache_path(&path)
		.lazy_threshold(1)
		.build();
	populate(&first);
	assert_eq!(first.registry.write_cache(&path).unwrap().lazy_extensions, 1);
	assert!(lazy_path(&path).exists());

	let host = Contributor::module("1", "host");
	first.registry.remove_contributor(host.id(), &first.token).unwrap();
	assert_eq!(first.registry.write_cache(&path).unwrap().lazy_extensions, 0);
	assert!(!lazy_path(&path).exists());
}

#[test]
fn stop_respects_write_on_stop() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("registry.cache");
	let built = RegistryBuilder::new("no-write")
		.cache_path(&path)
		.write_on_stop(false)
		.build();
	populate(&built);
	assert_eq!(built.registry.stop(&built.token).unwrap(), None);
	assert!(!path.exists());
}
