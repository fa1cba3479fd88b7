use std::sync::Arc;

use conflux_compose::types::{ConnectionDetail, ReadinessCheck, ReadinessCheckType};
use conflux_compose::{ComposedTemplate, Composer, ComposerOptions, Patch, PatchType, Transform};
use conflux_core::conditions::{self, Condition};
use conflux_core::error::StoreError;
use conflux_core::meta::{ObjectExt, TypedRef};
use conflux_core::xr::XrExt;
use conflux_core::{Document, ANNOTATION_RESOURCE_NAME};
use conflux_store::{FailureRule, MemoryStore, Mutation, Op, ResourceStore};
use serde_json::json;

fn composite() -> Document {
    json!({
        "apiVersion": "example.org/v1",
        "kind": "XDatabase",
        "metadata": {"name": "xdb"},
        "spec": {"size": 3, "region": "eu", "engine": "postgres"}
    })
}

fn template(name: &str, kind: &str, patches: Vec<Patch>) -> ComposedTemplate {
    ComposedTemplate {
        name: Some(name.into()),
        base: json!({"apiVersion": "db.example.org/v1", "kind": kind, "metadata": {"namespace": "infra"}, "spec": {}}),
        patches,
        readiness_checks: vec![ReadinessCheck {
            type_: ReadinessCheckType::None,
            field_path: None,
            match_string: None,
            match_integer: None,
            match_condition: None,
        }],
        ..Default::default()
    }
}

fn setup() -> (Arc<MemoryStore>, Composer, Document) {
    let store = Arc::new(MemoryStore::default());
    let xr = store.seed(composite());
    let composer = Composer::new(store.clone(), ComposerOptions::default());
    (store, composer, xr)
}

fn templates() -> Vec<ComposedTemplate> {
    vec![
        template("instance", "Instance", vec![
            Patch::from_composite("spec.size", "spec.forProvider.storageGb").with_transform(Transform::math(10)),
            Patch::from_composite("spec.region", "spec.forProvider.region").with_transform(Transform::map([("eu", "eu-west-1")])),
        ]),
        template("params", "ParameterGroup", vec![Patch::from_composite("spec.engine", "spec.forProvider.family").with_transform(Transform::format("%s16"))]),
    ]
}

#[tokio::test]
async fn renders_applies_and_records_references_first() {
    let (store, composer, mut xr) = setup();
    let res = composer.compose(&mut xr, templates()).await.unwrap();
    assert!(res.events.is_empty(), "{:?}", res.events);
    assert!(res.all_ready());

    let refs = xr.resource_refs();
    assert_eq!(refs.len(), 2);
    let instance = store.get(&refs[0]).await.unwrap();
    assert_eq!(instance["spec"]["forProvider"], json!({"storageGb": 30, "region": "eu-west-1"}));
    assert_eq!(instance.annotation(ANNOTATION_RESOURCE_NAME), Some("instance"));
    assert_eq!(instance.namespace(), Some("infra"));
    assert!(instance.name().starts_with("xdb-"));

    // The composite is written before either composed resource is created.
    let muts = store.mutations();
    assert!(matches!(&muts[0], Mutation::Update(r) if r.kind == "XDatabase"), "{:?}", muts);
    assert_eq!(muts.iter().filter(|m| matches!(m, Mutation::Create(_))).count(), 2);
}

#[tokio::test]
async fn second_pass_without_changes_writes_nothing() {
    let (store, composer, mut xr) = setup();
    composer.compose(&mut xr, templates()).await.unwrap();
    store.clear_mutations();
    let res = composer.compose(&mut xr, templates()).await.unwrap();
    assert!(res.events.is_empty());
    assert_eq!(store.mutations(), vec![]);
}

#[tokio::test]
async fn one_bad_template_does_not_stop_the_others() {
    let (store, composer, mut xr) = setup();
    let mut ts = templates();
    ts.insert(1, template("broken", "Subnet", vec![Patch::from_composite("spec.region", "spec.cidrBits").with_transform(Transform::math(2))]));
    let res = composer.compose(&mut xr, ts).await.unwrap();

    assert_eq!(res.events.len(), 1);
    let msg = &res.events[0].message;
    assert!(msg.contains("\"broken\""), "{}", msg);
    assert!(msg.contains("transform at index 0 failed"), "{}", msg);
    assert_eq!(store.all_of("Instance").len(), 1);
    assert_eq!(store.all_of("ParameterGroup").len(), 1);
    assert!(store.all_of("Subnet").is_empty());
    assert!(!res.all_ready());
    assert_eq!(res.ready_count(), 2);
    assert!(!res.resources[1].ready);
}

#[tokio::test]
async fn a_template_that_never_rendered_is_not_referenced() {
    let (store, composer, mut xr) = setup();
    let mut ts = templates();
    ts.insert(1, template("broken", "Subnet", vec![Patch::from_composite("spec.region", "spec.cidrBits").with_transform(Transform::math(2))]));
    composer.compose(&mut xr, ts.clone()).await.unwrap();
    let refs = xr.resource_refs();
    assert_eq!(refs.len(), 2);
    assert!(refs.iter().all(|r| r.kind != "Subnet"), "{:?}", refs);

    // Still broken: the composite is not rewritten on every pass.
    store.clear_mutations();
    let res = composer.compose(&mut xr, ts).await.unwrap();
    assert_eq!(res.events.len(), 1);
    assert_eq!(store.mutations(), vec![]);
}

#[tokio::test]
async fn removed_templates_are_garbage_collected() {
    let (store, composer, mut xr) = setup();
    composer.compose(&mut xr, templates()).await.unwrap();
    assert_eq!(store.all_of("ParameterGroup").len(), 1);

    let mut ts = templates();
    ts.truncate(1);
    let res = composer.compose(&mut xr, ts).await.unwrap();
    assert_eq!(res.deleted.len(), 1);
    assert!(store.all_of("ParameterGroup").is_empty());
    assert_eq!(xr.resource_refs().len(), 1);
}

#[tokio::test]
async fn apply_failures_become_warnings() {
    let (store, composer, mut xr) = setup();
    composer.compose(&mut xr, templates()).await.unwrap();

    let params = xr.resource_refs()[1].clone();
    store.fail(FailureRule { op: Op::Update, kind: None, name: params.name.clone(), error: StoreError::Other("boom".into()) });
    let mut ts = templates();
    ts[1].patches.push(Patch::from_composite("spec.size", "spec.forProvider.maxConnections"));
    let res = composer.compose(&mut xr, ts).await.unwrap();
    assert_eq!(res.events.len(), 1);
    assert!(res.events[0].message.contains("cannot apply composed resource \"params\""), "{}", res.events[0].message);
    assert!(res.events[0].message.contains("boom"));
    assert!(res.resources[0].ready);
    assert!(!res.resources[1].ready);
}

#[tokio::test]
async fn default_readiness_uses_the_ready_condition() {
    let (store, composer, mut xr) = setup();
    let mut ts = templates();
    ts.iter_mut().for_each(|t| t.readiness_checks.clear());
    let res = composer.compose(&mut xr, ts.clone()).await.unwrap();
    assert_eq!(res.ready_count(), 0);

    for r in xr.resource_refs() {
        let mut obj = store.get(&r).await.unwrap();
        conditions::set_conditions(&mut obj, [Condition::available()]);
        store.update_status(&obj).await.unwrap();
    }
    let res = composer.compose(&mut xr, ts).await.unwrap();
    assert!(res.all_ready());
}

#[tokio::test]
async fn connection_details_and_composite_patches() {
    let (store, composer, mut xr) = setup();
    store.seed(json!({
        "apiVersion": "v1", "kind": "Secret",
        "metadata": {"name": "instance-conn", "namespace": "infra"},
        "data": {"password": "czNjcjN0", "username": "YWRtaW4="}
    }));
    let mut t = template("instance", "Instance", vec![Patch {
        type_: PatchType::ToCompositeFieldPath,
        ..Patch::from_composite("spec.forProvider.endpoint", "status.endpoint")
    }]);
    t.base["spec"] = json!({"writeConnectionSecretToRef": {"name": "instance-conn"}, "forProvider": {"endpoint": "db.infra"}});
    t.connection_details = vec![
        ConnectionDetail { from_connection_secret_key: Some("password".into()), ..Default::default() },
        ConnectionDetail { name: Some("port".into()), value: Some("5432".into()), ..Default::default() },
    ];
    let res = composer.compose(&mut xr, vec![t]).await.unwrap();
    assert!(res.events.is_empty(), "{:?}", res.events);
    let keys: Vec<_> = res.connection_details.keys().map(String::as_str).collect();
    assert_eq!(keys, ["password", "port"]);
    assert_eq!(res.connection_details["password"], b"s3cr3t");
    assert_eq!(xr["status"]["endpoint"], "db.infra");
}

#[tokio::test]
async fn dry_run_rejections_skip_the_resource() {
    let store = Arc::new(MemoryStore::default());
    let mut xr = store.seed(composite());
    let composer = Composer::new(store.clone(), ComposerOptions { dry_run: true, ..Default::default() });
    let res = composer.compose(&mut xr, templates()).await.unwrap();
    assert!(res.events.is_empty());

    let instance: TypedRef = xr.resource_refs()[0].clone();
    store.fail(FailureRule { op: Op::DryRun, kind: None, name: instance.name.clone(), error: StoreError::Invalid("spec.size: too big".into()) });
    store.clear_mutations();
    let res = composer.compose(&mut xr, templates()).await.unwrap();
    assert_eq!(res.events.len(), 1);
    assert!(res.events[0].message.contains("too big"));
    assert!(store.mutations().is_empty());
}

#[tokio::test]
async fn spec_patches_back_onto_the_composite_are_persisted() {
    let (store, composer, mut xr) = setup();
    let mut t = template("instance", "Instance", vec![Patch {
        type_: PatchType::ToCompositeFieldPath,
        ..Patch::from_composite("spec.forProvider.endpoint", "spec.endpoint")
    }]);
    t.base["spec"] = json!({"forProvider": {"endpoint": "db.infra"}});
    composer.compose(&mut xr, vec![t.clone()]).await.unwrap();

    let stored = store.get(&TypedRef::of(&xr)).await.unwrap();
    assert_eq!(stored["spec"]["endpoint"], "db.infra");
    assert_eq!(stored.resource_version(), xr.resource_version());

    store.clear_mutations();
    composer.compose(&mut xr, vec![t]).await.unwrap();
    assert_eq!(store.mutations(), vec![]);
}
