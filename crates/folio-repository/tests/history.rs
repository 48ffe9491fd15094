//! Integration tests for version numbering, sibling version propagation,
//! deleted-resource recovery and history continuity across recreation.

use proptest::prelude::*;

use folio_core::{Property, ResourceTemplate, ResourceType, UserId};
use folio_repository::{
    PublishOptions, Repository, RequestContext, ResourceFilter, SiblingMode,
};

fn setup() -> (Repository, RequestContext) {
    let repo = Repository::in_memory().expect("failed to create repository");
    let user = UserId::new();
    let project = repo
        .create_project(&RequestContext::online(user), "Work", "")
        .expect("failed to create project");
    (repo, RequestContext::new(user, project.id))
}

async fn publish(repo: &Repository, ctx: &RequestContext, path: &str) {
    repo.publish_resources(ctx, &[path], PublishOptions::default())
        .expect("publish submission failed");
    repo.wait_while_running().await;
}

fn versions(repo: &Repository, ctx: &RequestContext, path: &str) -> Vec<u32> {
    repo.read_all_available_versions(ctx, path)
        .unwrap()
        .iter()
        .map(|entry| entry.version())
        .collect()
}

#[tokio::test]
async fn deleted_history_is_reconnected_by_import() {
    let (repo, ctx) = setup();
    let original = repo
        .create_resource(&ctx, "/f.txt", ResourceType::Plain, Some(b"v0"), &[])
        .unwrap();
    publish(&repo, &ctx, "/f.txt").await;

    repo.lock_resource(&ctx, "/f.txt").unwrap();
    repo.write_file(&ctx, "/f.txt", b"v1").unwrap();
    publish(&repo, &ctx, "/f.txt").await;

    repo.lock_resource(&ctx, "/f.txt").unwrap();
    repo.write_file(&ctx, "/f.txt", b"v2").unwrap();
    repo.delete_resource(&ctx, "/f.txt", SiblingMode::PreserveSiblings)
        .unwrap();
    publish(&repo, &ctx, "/f.txt").await;
    assert!(repo
        .read_resource(&ctx, "/f.txt", ResourceFilter::All)
        .is_err());

    repo.import_resource(
        &ctx,
        "/f.txt",
        &ResourceTemplate::from_resource(&original),
        None,
        &[],
    )
    .unwrap();
    let history = repo.read_all_available_versions(&ctx, "/f.txt").unwrap();
    let numbers: Vec<u32> = history.iter().map(|e| e.version()).collect();
    // The deletion moves the structure counter as well as the content one.
    assert_eq!(numbers, vec![4, 2, 1]);
    assert!(history[0].is_deleted());
    assert!(!history[1].is_deleted());

    let newest = repo
        .read_historical_file(&ctx, original.structure_id(), 4)
        .unwrap();
    assert_eq!(newest.contents, b"v2");
    let first = repo
        .read_historical_file(&ctx, original.structure_id(), 1)
        .unwrap();
    assert_eq!(first.contents, b"v0");
}

#[tokio::test]
async fn recreated_resource_starts_with_empty_history() {
    let (repo, ctx) = setup();
    let original = repo
        .create_resource(&ctx, "/f.txt", ResourceType::Plain, Some(b"old"), &[])
        .unwrap();
    publish(&repo, &ctx, "/f.txt").await;
    repo.lock_resource(&ctx, "/f.txt").unwrap();
    repo.delete_resource(&ctx, "/f.txt", SiblingMode::PreserveSiblings)
        .unwrap();
    publish(&repo, &ctx, "/f.txt").await;

    let recreated = repo
        .create_resource(&ctx, "/f.txt", ResourceType::Plain, Some(b"new"), &[])
        .unwrap();
    assert_ne!(recreated.structure_id(), original.structure_id());
    assert!(versions(&repo, &ctx, "/f.txt").is_empty());

    publish(&repo, &ctx, "/f.txt").await;
    let history = repo.read_all_available_versions(&ctx, "/f.txt").unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].structure_id, recreated.structure_id());
    assert_eq!(history[0].version(), 1);
}

#[tokio::test]
async fn moved_and_edited_resource_bumps_both_counters() {
    let (repo, ctx) = setup();
    let file = repo
        .create_resource(&ctx, "/a.txt", ResourceType::Plain, Some(b"v0"), &[])
        .unwrap();
    publish(&repo, &ctx, "/a.txt").await;

    repo.lock_resource(&ctx, "/a.txt").unwrap();
    repo.write_file(&ctx, "/a.txt", b"v1").unwrap();
    repo.move_resource(&ctx, "/a.txt", "/b.txt").unwrap();
    publish(&repo, &ctx, "/b.txt").await;

    let history = repo.read_all_available_versions(&ctx, "/b.txt").unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].structure_id, file.structure_id());
    assert_eq!(
        (history[0].structure_version, history[0].resource_version),
        (1, 2)
    );
    assert_eq!(history[0].version(), 3);
    assert_eq!(history[1].version(), 1);
}

#[tokio::test]
async fn content_publish_propagates_to_unlocked_sibling() {
    let (repo, ctx) = setup();
    repo.create_resource(&ctx, "/a.txt", ResourceType::Plain, Some(b"one"), &[])
        .unwrap();
    publish(&repo, &ctx, "/a.txt").await;
    let sibling = repo.create_sibling(&ctx, "/a.txt", "/b.txt", &[]).unwrap();
    publish(&repo, &ctx, "/b.txt").await;

    let before = repo.read_all_available_versions(&ctx, "/b.txt").unwrap();
    assert_eq!(versions(&repo, &ctx, "/b.txt"), vec![2, 1]);

    repo.lock_resource(&ctx, "/a.txt").unwrap();
    repo.write_file(&ctx, "/a.txt", b"two").unwrap();
    assert!(!repo
        .read_resource(&ctx, "/b.txt", ResourceFilter::Default)
        .unwrap()
        .state()
        .is_unchanged());
    publish(&repo, &ctx, "/a.txt").await;

    let after = repo.read_all_available_versions(&ctx, "/b.txt").unwrap();
    assert_eq!(after.len(), before.len() + 1);
    assert_eq!(after[0].structure_id, sibling.structure_id());
    assert_eq!(after[0].path, "/b.txt");
    assert_eq!(after[0].resource_version, before[0].resource_version + 1);
    assert_eq!(after[0].structure_version, before[0].structure_version);

    let read = repo
        .read_file(&ctx, "/b.txt", ResourceFilter::Default)
        .unwrap();
    assert_eq!(read.contents, b"two");
    assert!(read.resource.state().is_unchanged());
}

#[tokio::test]
async fn deleted_resources_listing_respects_recursion() {
    let (repo, ctx) = setup();
    repo.create_resource(&ctx, "/d/", ResourceType::Folder, None, &[])
        .unwrap();
    repo.create_resource(&ctx, "/d/a.txt", ResourceType::Plain, Some(b"a"), &[])
        .unwrap();
    repo.create_resource(&ctx, "/d/sub/", ResourceType::Folder, None, &[])
        .unwrap();
    repo.create_resource(&ctx, "/d/sub/b.txt", ResourceType::Plain, Some(b"b"), &[])
        .unwrap();
    repo.publish_project(&ctx).unwrap();
    repo.wait_while_running().await;

    repo.lock_resource(&ctx, "/d/").unwrap();
    repo.delete_resource(&ctx, "/d/a.txt", SiblingMode::PreserveSiblings)
        .unwrap();
    repo.delete_resource(&ctx, "/d/sub/b.txt", SiblingMode::PreserveSiblings)
        .unwrap();
    repo.publish_project(&ctx).unwrap();
    repo.wait_while_running().await;

    let direct: Vec<String> = repo
        .read_deleted_resources(&ctx, "/d/", false)
        .unwrap()
        .into_iter()
        .map(|e| e.path)
        .collect();
    assert_eq!(direct, vec!["/d/a.txt"]);

    let all: Vec<String> = repo
        .read_deleted_resources(&ctx, "/d/", true)
        .unwrap()
        .into_iter()
        .map(|e| e.path)
        .collect();
    assert_eq!(all, vec!["/d/a.txt", "/d/sub/b.txt"]);
}

#[derive(Debug, Clone)]
enum Op {
    Write(u8),
    Property(u8),
    Rename,
    Publish,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        any::<u8>().prop_map(Op::Write),
        any::<u8>().prop_map(Op::Property),
        Just(Op::Rename),
        Just(Op::Publish),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn newest_version_never_decreases(ops in prop::collection::vec(op(), 1..16)) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let (repo, ctx) = setup();
            let mut current = "/p0.txt".to_string();
            let file = repo
                .create_resource(&ctx, &current, ResourceType::Plain, Some(b"start"), &[])
                .unwrap();
            publish(&repo, &ctx, &current).await;

            let mut newest = 1;
            for (step, op) in ops.into_iter().enumerate() {
                if !matches!(op, Op::Publish) {
                    repo.lock_resource(&ctx, &current).unwrap();
                }
                match op {
                    Op::Write(byte) => {
                        repo.write_file(&ctx, &current, &[byte]).unwrap();
                    }
                    Op::Property(byte) => {
                        let property =
                            Property::new("title").with_structure_value(byte.to_string());
                        repo.write_property_object(&ctx, &current, &property).unwrap();
                    }
                    Op::Rename => {
                        let target = format!("/p{}.txt", step + 1);
                        repo.move_resource(&ctx, &current, &target).unwrap();
                        current = target;
                    }
                    Op::Publish => {
                        publish(&repo, &ctx, &current).await;
                    }
                }
                let listed = repo
                    .read_all_available_versions(&ctx, &current)
                    .unwrap();
                let version = listed.first().map(|e| e.version()).unwrap_or(0);
                assert!(version >= newest, "version went from {} to {}", newest, version);
                assert!(listed.iter().all(|e| e.structure_id == file.structure_id()));
                newest = version;
            }
            repo.shutdown().await;
        });
    }
}
