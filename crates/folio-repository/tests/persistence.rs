//! Integration tests for the SQLite backend: state and queued publish jobs
//! survive a restart.

use folio_core::{PublishJobState, ResourceType, UserId};
use folio_repository::{
    PublishOptions, Repository, RepositoryConfig, RequestContext, ResourceFilter, StorageBackend,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn sqlite_config(dir: &tempfile::TempDir) -> RepositoryConfig {
    RepositoryConfig {
        storage: StorageBackend::Sqlite {
            path: dir
                .path()
                .join("folio.db")
                .to_string_lossy()
                .into_owned(),
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn queued_jobs_and_history_survive_restart() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let user = UserId::new();

    let (project, first_job, queued_job) = {
        let repo = Repository::open(sqlite_config(&dir)).unwrap();
        let project = repo
            .create_project(&RequestContext::online(user), "Work", "")
            .unwrap();
        let ctx = RequestContext::new(user, project.id);
        repo.create_resource(&ctx, "/a.txt", ResourceType::Plain, Some(b"alpha"), &[])
            .unwrap();
        let first_job = repo
            .publish_resources(&ctx, &["/a.txt"], PublishOptions::default())
            .unwrap();
        repo.wait_while_running().await;

        repo.stop_publishing();
        repo.create_resource(&ctx, "/b.txt", ResourceType::Plain, Some(b"beta"), &[])
            .unwrap();
        let queued_job = repo
            .publish_resources(&ctx, &["/b.txt"], PublishOptions::default())
            .unwrap();
        repo.shutdown().await;
        (project, first_job, queued_job)
    };

    let repo = Repository::open(sqlite_config(&dir)).unwrap();
    assert_eq!(repo.read_project(project.id).unwrap().name, "Work");
    let online = RequestContext::online(user);
    let a = repo
        .read_file(&online, "/a.txt", ResourceFilter::Default)
        .unwrap();
    assert_eq!(a.contents, b"alpha");

    repo.wait_while_running().await;
    let history = repo.get_publish_history();
    let ids: Vec<_> = history.iter().map(|job| job.id).collect();
    assert_eq!(ids, vec![queued_job, first_job]);
    assert!(matches!(history[0].state, PublishJobState::Finished(_)));
    assert!(history[0].tag > history[1].tag);

    let b = repo
        .read_file(&online, "/b.txt", ResourceFilter::Default)
        .unwrap();
    assert_eq!(b.contents, b"beta");
    let versions = repo
        .read_all_available_versions(&RequestContext::new(user, project.id), "/a.txt")
        .unwrap();
    assert_eq!(versions.len(), 1);
    repo.shutdown().await;
}

#[tokio::test]
async fn paused_start_keeps_recovered_jobs_queued() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let user = UserId::new();
    {
        let repo = Repository::open(sqlite_config(&dir)).unwrap();
        let project = repo
            .create_project(&RequestContext::online(user), "Work", "")
            .unwrap();
        let ctx = RequestContext::new(user, project.id);
        repo.stop_publishing();
        repo.create_resource(&ctx, "/a.txt", ResourceType::Plain, None, &[])
            .unwrap();
        repo.publish_project(&ctx).unwrap();
        repo.shutdown().await;
    }

    let mut config = sqlite_config(&dir);
    config.publish.start_paused = true;
    let repo = Repository::open(config).unwrap();
    assert!(repo.is_publishing_paused());
    let queue = repo.get_publish_queue();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].state, PublishJobState::Queued);
    assert_eq!(queue[0].list.paths(), vec!["/a.txt"]);

    repo.start_publishing();
    repo.wait_while_running().await;
    assert!(repo.get_publish_queue().is_empty());
    repo.shutdown().await;
}
