//! Reconciliation behavior, run against every store implementation.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use cirrus_core::{Arn, Error, MemoryBackend, ResourceTypeParts};
use cirrus_store::{sync_data, DataRecord, MetadataStore, PathMetadataStore, SqliteMetadataStore};
use cirrus_test_utils::{bucket_aspects, init_test_logging, role_aspects};
use serde_json::json;

const ACCOUNT: &str = "111111111111";
const OTHER_ACCOUNT: &str = "222222222222";

async fn stores() -> Vec<(&'static str, Arc<dyn MetadataStore>)> {
    init_test_logging();
    let path = PathMetadataStore::new(Arc::new(MemoryBackend::new()), "aws").unwrap();
    let sqlite = SqliteMetadataStore::in_memory("aws").await.unwrap();
    vec![("path", Arc::new(path)), ("sqlite", Arc::new(sqlite))]
}

fn buckets(names: &[&str]) -> Vec<DataRecord> {
    names
        .iter()
        .map(|name| DataRecord::from_aspects(bucket_aspects(name, "us-east-1")).unwrap())
        .collect()
}

async fn listed(store: &dyn MetadataStore, account: &str, scope: &ResourceTypeParts) -> Vec<String> {
    let mut names: Vec<String> = store
        .list_resources(account, scope)
        .await
        .unwrap()
        .iter()
        .map(|arn| arn.resource_name().to_string())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn stale_resources_are_removed_and_new_ones_written() {
    let s3 = ResourceTypeParts::service("s3");
    for (kind, store) in stores().await {
        let store = store.as_ref();
        sync_data(&buckets(&["a", "b", "c"]), store, ACCOUNT, &s3, false)
            .await
            .unwrap();
        assert_eq!(listed(store, ACCOUNT, &s3).await, ["a", "b", "c"], "{kind}");

        let report = sync_data(&buckets(&["b", "c", "d"]), store, ACCOUNT, &s3, false)
            .await
            .unwrap();
        assert_eq!(report.removed, 1, "{kind}");
        assert_eq!(listed(store, ACCOUNT, &s3).await, ["b", "c", "d"], "{kind}");

        let gone = Arn::parse("arn:aws:s3:::a").unwrap();
        assert!(store
            .get_resource_metadata(ACCOUNT, &gone, "metadata")
            .await
            .unwrap()
            .is_none());
    }
}

#[tokio::test]
async fn write_only_keeps_unreported_resources() {
    let s3 = ResourceTypeParts::service("s3");
    for (kind, store) in stores().await {
        let store = store.as_ref();
        sync_data(&buckets(&["a", "b"]), store, ACCOUNT, &s3, false)
            .await
            .unwrap();
        let report = sync_data(&buckets(&["c"]), store, ACCOUNT, &s3, true)
            .await
            .unwrap();
        assert_eq!(report.removed, 0, "{kind}");
        assert_eq!(listed(store, ACCOUNT, &s3).await, ["a", "b", "c"], "{kind}");
    }
}

#[tokio::test]
async fn repeating_a_sync_changes_nothing() {
    let s3 = ResourceTypeParts::service("s3");
    for (kind, store) in stores().await {
        let store = store.as_ref();
        let records = buckets(&["a", "b"]);
        sync_data(&records, store, ACCOUNT, &s3, false).await.unwrap();
        let before = store.find_resource_metadata(Some(ACCOUNT), &s3).await.unwrap();

        let report = sync_data(&records, store, ACCOUNT, &s3, false).await.unwrap();
        assert_eq!(report.removed, 0, "{kind}");
        let after = store.find_resource_metadata(Some(ACCOUNT), &s3).await.unwrap();
        assert_eq!(before, after, "{kind}");
    }
}

#[tokio::test]
async fn other_scopes_and_accounts_are_untouched() {
    let s3 = ResourceTypeParts::service("s3");
    let roles = ResourceTypeParts::service("iam").with_resource_type("role");
    for (kind, store) in stores().await {
        let store = store.as_ref();
        let role = DataRecord::from_aspects(role_aspects(ACCOUNT, "deploy", &["ec2.amazonaws.com"]))
            .unwrap();
        sync_data(&[role], store, ACCOUNT, &roles, false).await.unwrap();
        sync_data(&buckets(&["a"]), store, ACCOUNT, &s3, false).await.unwrap();
        sync_data(&buckets(&["x"]), store, OTHER_ACCOUNT, &s3, false)
            .await
            .unwrap();

        sync_data(&[], store, ACCOUNT, &s3, false).await.unwrap();

        assert!(listed(store, ACCOUNT, &s3).await.is_empty(), "{kind}");
        assert_eq!(listed(store, ACCOUNT, &roles).await, ["deploy"], "{kind}");
        assert_eq!(listed(store, OTHER_ACCOUNT, &s3).await, ["x"], "{kind}");
    }
}

#[tokio::test]
async fn empty_aspects_clear_stored_values() {
    let s3 = ResourceTypeParts::service("s3");
    for (kind, store) in stores().await {
        let store = store.as_ref();
        sync_data(&buckets(&["a"]), store, ACCOUNT, &s3, false).await.unwrap();

        let arn = Arn::parse("arn:aws:s3:::a").unwrap();
        let cleared = DataRecord::new(arn.clone())
            .with_aspect("metadata", json!({"name": "a"}))
            .with_aspect("policy", json!({}));
        let report = sync_data(&[cleared], store, ACCOUNT, &s3, false).await.unwrap();
        assert_eq!((report.written, report.cleared), (1, 1), "{kind}");

        assert!(store
            .get_resource_metadata(ACCOUNT, &arn, "policy")
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            store.get_resource_metadata(ACCOUNT, &arn, "metadata").await.unwrap(),
            Some(json!({"name": "a"})),
            "{kind}"
        );
    }
}

#[tokio::test]
async fn metadata_selectors_filter_find() {
    for (kind, store) in stores().await {
        let store = store.as_ref();
        let s3 = ResourceTypeParts::service("s3");
        let records = vec![
            DataRecord::from_aspects(bucket_aspects("east", "us-east-1")).unwrap(),
            DataRecord::from_aspects(bucket_aspects("west", "us-west-2")).unwrap(),
        ];
        sync_data(&records, store, ACCOUNT, &s3, false).await.unwrap();

        let found = store
            .find_resource_metadata(None, &s3.clone().with_metadata("region", "us-west-2"))
            .await
            .unwrap();
        assert_eq!(found, vec![json!({"name": "west", "region": "us-west-2"})], "{kind}");
    }
}

#[tokio::test]
async fn selector_scoped_sync_keeps_other_regions() {
    let s3 = ResourceTypeParts::service("s3");
    let east_only = s3.clone().with_metadata("region", "us-east-1");
    for (kind, store) in stores().await {
        let store = store.as_ref();
        let east = DataRecord::from_aspects(bucket_aspects("east", "us-east-1")).unwrap();
        let west = DataRecord::from_aspects(bucket_aspects("west", "eu-west-1")).unwrap();
        sync_data(&[east.clone(), west], store, ACCOUNT, &s3, false)
            .await
            .unwrap();
        assert_eq!(listed(store, ACCOUNT, &east_only).await, ["east"], "{kind}");

        let report = sync_data(&[east], store, ACCOUNT, &east_only, false)
            .await
            .unwrap();
        assert_eq!(report.removed, 0, "{kind}");
        assert_eq!(listed(store, ACCOUNT, &s3).await, ["east", "west"], "{kind}");

        let removed = store.delete_scope(ACCOUNT, &east_only).await.unwrap();
        assert_eq!(removed, 1, "{kind}");
        assert_eq!(listed(store, ACCOUNT, &s3).await, ["west"], "{kind}");
    }
}

#[tokio::test]
async fn arn_regions_must_be_single_segments() {
    let sqs = ResourceTypeParts::service("sqs");
    for (kind, store) in stores().await {
        let store = store.as_ref();
        for raw in ["arn:aws:sqs:..:111111111111:queue", "arn:aws:sqs:a/b:111111111111:queue"] {
            let record = DataRecord::new(Arn::parse(raw).unwrap())
                .with_aspect("metadata", json!({"name": "queue"}));
            let err = sync_data(&[record], store, ACCOUNT, &sqs, false)
                .await
                .unwrap_err();
            assert!(matches!(err, Error::InvalidId { .. }), "{kind}: {raw}: {err}");
        }
        assert!(listed(store, ACCOUNT, &sqs).await.is_empty(), "{kind}");
    }
}

#[tokio::test]
async fn organization_policies_and_ram_shares_sync() {
    for (kind, store) in stores().await {
        let store = store.as_ref();
        for id in ["p-1", "p-2", "p-3"] {
            store
                .save_organization_policy_metadata("o-1", "SERVICE_CONTROL_POLICY", id, "policy", &json!({"Id": id}))
                .await
                .unwrap();
        }
        let current = vec!["p-2".to_string(), "p-3".to_string()];
        let removed = store
            .sync_organization_policies("o-1", "SERVICE_CONTROL_POLICY", &current)
            .await
            .unwrap();
        assert_eq!(removed, 1, "{kind}");
        assert_eq!(
            store
                .list_organization_policies("o-1", "SERVICE_CONTROL_POLICY")
                .await
                .unwrap(),
            current,
            "{kind}"
        );

        let east = Arn::parse("arn:aws:ram:us-east-1:111111111111:resource-share/east").unwrap();
        let west = Arn::parse("arn:aws:ram:us-west-2:111111111111:resource-share/west").unwrap();
        for arn in [&east, &west] {
            store
                .save_ram_resource(ACCOUNT, arn, &json!({"arn": arn.as_str()}))
                .await
                .unwrap();
        }
        let removed = store.sync_ram_resources(ACCOUNT, "us-east-1", &[]).await.unwrap();
        assert_eq!(removed, 1, "{kind}");
        assert!(store.get_ram_resource(ACCOUNT, &east).await.unwrap().is_none());
        assert!(store.get_ram_resource(ACCOUNT, &west).await.unwrap().is_some());
        assert_eq!(store.list_account_ids().await.unwrap(), [ACCOUNT], "{kind}");
    }
}
