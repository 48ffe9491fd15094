//! Integration tests for the publish queue and engine: FIFO execution,
//! parent checks, partial failure and link validation.

use folio_core::{
    PublishJobState, PublishOutcome, RelationDirection, RelationType, Resource, ResourceType,
    UserId,
};
use folio_repository::{
    ExtractedLink, LockType, Permission, PublishOptions, Repository, RepositoryConfig,
    RepositoryError, RequestContext, ResourceFilter, ResourceOutcome,
};

fn context(repo: &Repository) -> RequestContext {
    let user = UserId::new();
    let project = repo
        .create_project(&RequestContext::online(user), "Work", "")
        .expect("failed to create project");
    RequestContext::new(user, project.id)
}

/// Treats every line of the form `link:<path>` as a hyperlink and every
/// `weak:<path>` line as a weak reference.
fn line_links(_resource: &Resource, contents: &[u8]) -> Vec<ExtractedLink> {
    String::from_utf8_lossy(contents)
        .lines()
        .filter_map(|line| {
            if let Some(target) = line.strip_prefix("link:") {
                Some(ExtractedLink::new(target.trim(), RelationType::Hyperlink))
            } else {
                line.strip_prefix("weak:")
                    .map(|target| ExtractedLink::new(target.trim(), RelationType::WeakReference))
            }
        })
        .collect()
}

#[tokio::test]
async fn queued_jobs_run_in_submission_order() {
    let repo = Repository::in_memory().unwrap();
    let ctx = context(&repo);
    repo.create_resource(&ctx, "/f/", ResourceType::Folder, None, &[])
        .unwrap();
    repo.publish_project(&ctx).unwrap();
    repo.wait_while_running().await;
    repo.lock_resource(&ctx, "/f/").unwrap();
    repo.create_resource(&ctx, "/f/a.txt", ResourceType::Plain, Some(b"a"), &[])
        .unwrap();
    repo.create_resource(&ctx, "/f/b.txt", ResourceType::Plain, Some(b"b"), &[])
        .unwrap();

    repo.stop_publishing();
    let first = repo
        .publish_resources(&ctx, &["/f/a.txt"], PublishOptions::default())
        .unwrap();
    let second = repo
        .publish_resources(&ctx, &["/f/"], PublishOptions::default())
        .unwrap();

    let queued: Vec<_> = repo.get_publish_queue().iter().map(|job| job.id).collect();
    assert_eq!(queued, vec![first, second]);
    // The second job does not claim what the first one already holds.
    let second_job = &repo.get_publish_queue()[1];
    assert_eq!(second_job.list.paths(), vec!["/f/b.txt"]);

    // Stopped: waiting returns without running anything.
    repo.wait_while_running().await;
    assert_eq!(repo.get_publish_queue().len(), 2);

    repo.start_publishing();
    repo.wait_while_running().await;
    let history = repo.get_publish_history();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].id, second);
    assert_eq!(history[1].id, first);
    assert!(history[1].tag < history[0].tag);
    assert!(history[1].finished_at <= history[0].started_at);
    assert_eq!(
        history[0].state,
        PublishJobState::Finished(PublishOutcome::Success)
    );

    let online = RequestContext::online(ctx.user);
    for path in ["/f/a.txt", "/f/b.txt"] {
        assert!(repo
            .read_resource(&online, path, ResourceFilter::Default)
            .is_ok());
    }
}

#[tokio::test]
async fn sibling_of_queued_resource_is_claimed_by_the_job() {
    let repo = Repository::in_memory().unwrap();
    let ctx = context(&repo);
    let other = RequestContext::new(UserId::new(), ctx.project);
    repo.create_resource(&ctx, "/a.txt", ResourceType::Plain, Some(b"a"), &[])
        .unwrap();
    repo.create_sibling(&ctx, "/a.txt", "/b.txt", &[]).unwrap();
    repo.unlock_resource(&ctx, "/b.txt").unwrap();

    repo.stop_publishing();
    repo.publish_resources(&ctx, &["/a.txt"], PublishOptions::default())
        .unwrap();

    let lock = repo.get_lock(&other, "/b.txt").unwrap();
    assert_eq!(lock.lock_type, LockType::Publish);
    assert_eq!(lock.sibling.as_deref(), Some("/a.txt"));
    let list = repo
        .get_publish_list(&other, &["/b.txt"], PublishOptions::default())
        .unwrap();
    assert!(list.is_empty());
    let err = repo.write_file(&other, "/b.txt", b"late").unwrap_err();
    assert!(matches!(err, RepositoryError::LockConflict(_)));

    repo.start_publishing();
    repo.wait_while_running().await;
    assert!(repo
        .get_lock(&other, "/b.txt")
        .unwrap()
        .lock_type
        .is_unlocked());
}

#[tokio::test]
async fn direct_publish_below_new_folder_is_rejected() {
    let repo = Repository::in_memory().unwrap();
    let ctx = context(&repo);
    repo.create_resource(&ctx, "/n/", ResourceType::Folder, None, &[])
        .unwrap();
    repo.create_resource(&ctx, "/n/a.txt", ResourceType::Plain, None, &[])
        .unwrap();

    let err = repo
        .publish_resources(&ctx, &["/n/a.txt"], PublishOptions::default())
        .unwrap_err();
    assert!(matches!(err, RepositoryError::ParentNotPublished(_)));
    assert_eq!(err.kind().code(), "PARENT_NOT_PUBLISHED");
    assert!(repo.get_publish_queue().is_empty());

    let list = repo
        .get_publish_list(&ctx, &["/n/", "/n/a.txt"], PublishOptions::default())
        .unwrap();
    assert_eq!(list.paths(), vec!["/n/", "/n/a.txt"]);
    repo.publish_list(&ctx, list).unwrap();
    repo.wait_while_running().await;
    assert!(repo
        .read_resource(&ctx, "/n/a.txt", ResourceFilter::Default)
        .unwrap()
        .state()
        .is_unchanged());
}

#[tokio::test]
async fn denied_resource_fails_without_stopping_the_job() {
    let repo = Repository::builder(RepositoryConfig::default())
        .with_permission_handler(|_: UserId, resource: &Resource, permission: Permission| {
            !(permission == Permission::Publish && resource.path() == "/secret.txt")
        })
        .build()
        .unwrap();
    let ctx = context(&repo);
    repo.create_resource(&ctx, "/ok.txt", ResourceType::Plain, Some(b"ok"), &[])
        .unwrap();
    repo.create_resource(&ctx, "/secret.txt", ResourceType::Plain, Some(b"no"), &[])
        .unwrap();

    let id = repo.publish_project(&ctx).unwrap();
    repo.wait_while_running().await;

    let report = repo.get_publish_report(id).unwrap();
    assert_eq!(report.published(), 1);
    assert_eq!(report.failed(), 1);
    assert!(report.has_errors());
    let failed = report
        .lines
        .iter()
        .find(|line| line.outcome.is_failure())
        .unwrap();
    assert_eq!(failed.path, "/secret.txt");
    assert!(matches!(failed.outcome, ResourceOutcome::Failed(_)));

    let history = repo.get_publish_history();
    assert_eq!(
        history[0].state,
        PublishJobState::Finished(PublishOutcome::PartialFailure)
    );

    // The failed resource is left as it was, lock included.
    let secret = repo
        .read_resource(&ctx, "/secret.txt", ResourceFilter::Default)
        .unwrap();
    assert!(secret.state().is_new());
    let lock = repo.get_lock(&ctx, "/secret.txt").unwrap();
    assert_eq!(lock.owner, Some(ctx.user));
    assert!(repo
        .read_resource(&RequestContext::online(ctx.user), "/ok.txt", ResourceFilter::Default)
        .is_ok());
}

#[tokio::test]
async fn validation_reports_links_to_unpublished_targets() {
    let repo = Repository::builder(RepositoryConfig::default())
        .with_link_extractor(line_links)
        .build()
        .unwrap();
    let ctx = context(&repo);
    repo.create_resource(
        &ctx,
        "/page.txt",
        ResourceType::Plain,
        Some(b"intro\nlink:/img.png\nlink:/missing.txt\n"),
        &[],
    )
    .unwrap();
    repo.create_resource(&ctx, "/img.png", ResourceType::Image, Some(b"png"), &[])
        .unwrap();

    let outgoing = repo
        .read_relations(&ctx, "/page.txt", RelationDirection::Outgoing)
        .unwrap();
    assert_eq!(outgoing.len(), 2);
    let incoming = repo
        .read_relations(&ctx, "/img.png", RelationDirection::Incoming)
        .unwrap();
    assert_eq!(incoming.len(), 1);

    let list = repo
        .get_publish_list(&ctx, &["/page.txt"], PublishOptions::default())
        .unwrap();
    let broken = repo.validate_relations(&list).unwrap();
    let mut targets: Vec<&str> = broken["/page.txt"]
        .iter()
        .map(|b| b.target_path.as_str())
        .collect();
    targets.sort();
    assert_eq!(targets, vec!["/img.png", "/missing.txt"]);

    let linked = repo.linked_resources(&ctx, &list).unwrap();
    assert_eq!(linked.paths(), vec!["/img.png"]);
    let merged = repo.merge_publish_lists(&ctx, &list, &linked).unwrap();
    assert_eq!(merged.len(), 2);
    let broken = repo.validate_relations(&merged).unwrap();
    let mut targets: Vec<&str> = broken["/page.txt"]
        .iter()
        .map(|b| b.target_path.as_str())
        .collect();
    targets.sort();
    assert_eq!(targets, vec!["/missing.txt"]);

    // The dangling link resolves once the target exists.
    repo.create_resource(&ctx, "/missing.txt", ResourceType::Plain, None, &[])
        .unwrap();
    let outgoing = repo
        .read_relations(&ctx, "/page.txt", RelationDirection::Outgoing)
        .unwrap();
    assert!(outgoing.iter().all(|relation| relation.target.id().is_some()));
}

#[tokio::test]
async fn related_resources_are_pending_sources_linking_into_the_list() {
    let repo = Repository::builder(RepositoryConfig::default())
        .with_link_extractor(line_links)
        .build()
        .unwrap();
    let ctx = context(&repo);
    repo.create_resource(&ctx, "/target.txt", ResourceType::Plain, Some(b"t"), &[])
        .unwrap();
    repo.create_resource(&ctx, "/unrelated.txt", ResourceType::Plain, Some(b"u"), &[])
        .unwrap();
    repo.publish_project(&ctx).unwrap();
    repo.wait_while_running().await;

    repo.lock_resource(&ctx, "/target.txt").unwrap();
    repo.write_file(&ctx, "/target.txt", b"t2").unwrap();
    repo.create_resource(
        &ctx,
        "/source.txt",
        ResourceType::Plain,
        Some(b"link:/target.txt\n"),
        &[],
    )
    .unwrap();

    let list = repo
        .get_publish_list(&ctx, &["/target.txt"], PublishOptions::default())
        .unwrap();
    let related = repo.related_resources(&ctx, &list).unwrap();
    assert_eq!(related.paths(), vec!["/source.txt"]);
    // The target links nowhere.
    assert!(repo.linked_resources(&ctx, &list).unwrap().is_empty());

    // Sources already in the list are not offered again.
    let merged = repo.merge_publish_lists(&ctx, &list, &related).unwrap();
    assert!(repo.related_resources(&ctx, &merged).unwrap().is_empty());
}

#[tokio::test]
async fn validation_flags_weak_references_with_their_type() {
    let repo = Repository::builder(RepositoryConfig::default())
        .with_link_extractor(line_links)
        .build()
        .unwrap();
    let ctx = context(&repo);
    repo.create_resource(
        &ctx,
        "/index.txt",
        ResourceType::Plain,
        Some(b"weak:/notes.txt\n"),
        &[],
    )
    .unwrap();

    let list = repo
        .get_publish_list(&ctx, &["/index.txt"], PublishOptions::default())
        .unwrap();
    let broken = repo.validate_relations(&list).unwrap();
    let flagged = &broken["/index.txt"];
    assert_eq!(flagged.len(), 1);
    assert_eq!(flagged[0].target_path, "/notes.txt");
    assert_eq!(flagged[0].relation_type, RelationType::WeakReference);
}
