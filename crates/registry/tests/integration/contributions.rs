use pretty_assertions::assert_eq;
use trellis_registry::spec::ParseError;
use trellis_registry::{ContributionError, Contributor, ElementParent, MutationError};

use crate::common::{add, attached, namespaces, registry};

#[test]
fn rejected_contributions_leave_no_trace() {
	let built = registry("atomic");
	let contributor = Contributor::module("7", "testErrorHandling");

	// The first point lacks its identifier, the second is fine.
	let broken = r#"
extension-point label="A without id"
extension-point "xptErrorTestB" label="B"
"#;
	let err = add(&built, &contributor, broken).unwrap_err();
	assert!(matches!(
		err.rejection(),
		Some(ContributionError::MissingAttribute { attribute: "id", .. })
	));
	assert!(built.registry.extension_point("testErrorHandling.xptErrorTestA").is_none());
	assert!(built.registry.extension_point("testErrorHandling.xptErrorTestB").is_none());
	assert!(namespaces(&built).is_empty());
	assert!(built.registry.contributors().is_empty());

	let fixed = r#"
extension-point "xptErrorTestA" label="A"
extension-point "xptErrorTestB" label="B"
"#;
	let delta = add(&built, &contributor, fixed).unwrap();
	assert_eq!(delta.added_extension_points.len(), 2);
	assert!(built.registry.extension_point("testErrorHandling.xptErrorTestA").is_some());
	assert!(built.registry.extension_point("testErrorHandling.xptErrorTestB").is_some());
}

#[test]
fn syntax_errors_carry_the_source_name() {
	let built = registry("syntax");
	let contributor = Contributor::module("1", "broken");
	let err = add(&built, &contributor, "extension-point \"unterminated").unwrap_err();
	match err.rejection() {
		Some(ContributionError::Parse(ParseError::Syntax { source_name, .. })) => {
			assert_eq!(source_name, "broken/plugin.kdl");
		}
		other => panic!("unexpected rejection: {other:?}"),
	}
}

#[test]
fn non_singleton_modules_cannot_contribute() {
	let built = registry("singletons");
	let module = Contributor::non_singleton_module("1", "multi");
	let err = add(&built, &module, "extension-point \"xp\"").unwrap_err();
	assert!(matches!(
		err,
		MutationError::Rejected(ContributionError::NonSingleton { .. })
	));

	let fragment = Contributor::fragment("2", "frag", &module);
	let err = add(&built, &fragment, "extension-point \"xp\"").unwrap_err();
	assert!(matches!(
		err,
		MutationError::Rejected(ContributionError::NonSingletonHost { .. })
	));
	assert!(namespaces(&built).is_empty());
}

#[test]
fn fragments_contribute_into_the_host_namespace() {
	let built = registry("fragments");
	let host = Contributor::module("1", "H");
	let fragment = Contributor::fragment("2", "F", &host);
	assert!(fragment.is_fragment());
	assert!(!host.is_fragment());

	add(&built, &host, "extension-point \"xptH\"").unwrap();
	add(&built, &fragment, "extension-point \"xptFA\"\nextension \"xptH\" id=\"fe\"").unwrap();

	let point = built.registry.extension_point("H.xptFA").expect("fragment point in host namespace");
	assert_eq!(&*point.namespace().unwrap(), "H");
	assert_eq!(point.contributor().unwrap(), fragment);
	assert_eq!(namespaces(&built), vec!["H"]);
	assert!(built.registry.extension_points_in("F").is_empty());
	assert_eq!(attached(&built, "H.xptH"), vec!["H.fe"]);

	// Ownership stays with the fragment.
	assert_eq!(built.registry.extension_points_for(fragment.id()).len(), 1);
	assert_eq!(built.registry.extension_points_for(host.id()).len(), 1);
	built.registry.remove_contributor(fragment.id(), &built.token).unwrap();
	assert!(built.registry.extension_point("H.xptFA").is_none());
	assert!(built.registry.extension_point("H.xptH").is_some());
	assert!(attached(&built, "H.xptH").is_empty());
}

#[test]
fn arrival_order_does_not_matter() {
	let point = "extension-point \"xp\" label=\"Point\"";
	let ext_a = "extension \"host.xp\" id=\"a\" { item \"1\" }";
	let ext_b = "extension \"host.xp\" id=\"b\" { item \"2\" }";
	let host = Contributor::module("1", "host");
	let first = Contributor::module("2", "first");
	let second = Contributor::module("3", "second");

	let point_first = registry("point-first");
	add(&point_first, &host, point).unwrap();
	add(&point_first, &first, ext_a).unwrap();
	add(&point_first, &second, ext_b).unwrap();

	let point_last = registry("point-last");
	add(&point_last, &first, ext_a).unwrap();
	add(&point_last, &second, ext_b).unwrap();
	let delta = add(&point_last, &host, point).unwrap();
	assert_eq!(delta.attached.len(), 2);

	for built in [&point_first, &point_last] {
		assert_eq!(attached(built, "host.xp"), vec!["first.a", "second.b"]);
		let values: Vec<String> = built
			.registry
			.configuration_elements_for("host.xp")
			.unwrap()
			.iter()
			.map(|e| e.value().unwrap().unwrap().to_string())
			.collect();
		assert_eq!(values, vec!["1", "2"]);
		assert_eq!(built.registry.stats().orphans, 0);
	}
}

#[test]
fn live_identifiers_cannot_be_redeclared() {
	let built = registry("collisions");
	let owner = Contributor::module("1", "org.example");
	let intruder = Contributor::module("2", "intruder");
	add(&built, &owner, "extension-point \"xp\"\nextension \"xp\" id=\"e\"").unwrap();

	let err = add(&built, &intruder, "extension-point \"org.example.xp\"").unwrap_err();
	assert!(matches!(
		err.rejection(),
		Some(ContributionError::DuplicateExtensionPoint { owner, .. }) if owner.as_str() == "1"
	));
	let err = add(&built, &intruder, "extension \"org.example.xp\" id=\"org.example.e\"").unwrap_err();
	assert!(matches!(err.rejection(), Some(ContributionError::DuplicateExtension { .. })));

	assert_eq!(attached(&built, "org.example.xp"), vec!["org.example.e"]);
	assert!(built.registry.extensions_for(intruder.id()).is_empty());
}

#[test]
fn element_trees_are_navigable() {
	let built = registry("elements");
	let contributor = Contributor::module("1", "org.example");
	add(
		&built,
		&contributor,
		r#"
extension-point "actions" schema="schema/actions.exsd"
extension "actions" id="run" label="Run" {
    action "run" class="org.example.Run" enabled=#true {
        param "n" value="1"
        param name="m"
        note ""
    }
}
"#,
	)
	.unwrap();

	let point = built.registry.extension_point_in("org.example", "actions").unwrap();
	assert_eq!(point.schema_reference().unwrap().as_deref(), Some("schema/actions.exsd"));
	assert_eq!(&*point.simple_identifier().unwrap(), "actions");

	let ext = built.registry.extension_for_point("org.example.actions", "org.example.run").unwrap();
	assert_eq!(ext.label().unwrap().as_deref(), Some("Run"));
	assert_eq!(ext.simple_identifier().unwrap().as_deref(), Some("run"));
	assert_eq!(point.extension("org.example.run").unwrap(), Some(ext.clone()));

	let action = ext.configuration_elements().unwrap().remove(0);
	assert_eq!(&*action.name().unwrap(), "action");
	assert_eq!(action.value().unwrap().as_deref(), Some("run"));
	assert_eq!(action.attribute("enabled").unwrap().as_deref(), Some("true"));
	let names: Vec<String> = action.attribute_names().unwrap().iter().map(|n| n.to_string()).collect();
	assert_eq!(names, vec!["class", "enabled"]);

	let params = action.children_named("param").unwrap();
	assert_eq!(params.len(), 2);
	assert_eq!(params[0].value().unwrap().as_deref(), Some("n"));
	assert_eq!(params[1].value().unwrap(), None);
	assert_eq!(params[1].attribute("name").unwrap().as_deref(), Some("m"));

	let note = action.children().unwrap().remove(2);
	assert_eq!(note.value().unwrap().as_deref(), Some(""));
	assert_eq!(note.parent().unwrap(), ElementParent::Element(action.clone()));
	assert_eq!(action.parent().unwrap(), ElementParent::Extension(ext.clone()));
	assert_eq!(note.declaring_extension().unwrap(), ext);
	assert_eq!(&*note.namespace().unwrap(), "org.example");
	assert_eq!(note.contributor().unwrap(), contributor);
}

#[test]
fn orphans_are_not_returned_through_a_point() {
	let built = registry("orphans");
	let user = Contributor::module("1", "user");
	add(&built, &user, "extension \"host.xp\" id=\"e\"").unwrap();

	let ext = built.registry.extension("user.e").expect("orphans are indexed by id");
	assert!(ext.is_orphaned().unwrap());
	assert_eq!(&*ext.extension_point_unique_identifier().unwrap(), "host.xp");
	assert!(ext.extension_point().unwrap().is_none());
	assert!(built.registry.extension_for_point("host.xp", "user.e").is_none());
	assert!(built.registry.configuration_elements_for("host.xp").unwrap().is_empty());
}
