use chrono::Utc;

use folio_core::project::ONLINE_PROJECT_NAME;
use folio_core::{Project, ProjectId, Resource, ResourceState};

use crate::context::RequestContext;
use crate::error::RepositoryError;

use super::Repository;

impl Repository {
    /// Creates a project owned by the caller. Project names are unique.
    pub fn create_project(
        &self,
        ctx: &RequestContext,
        name: &str,
        description: &str,
    ) -> Result<Project, RepositoryError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RepositoryError::InvalidName(
                "project name must not be empty".to_string(),
            ));
        }
        self.inner.transaction(|store| {
            let taken = name.eq_ignore_ascii_case(ONLINE_PROJECT_NAME)
                || store.read_projects()?.iter().any(|p| p.name == name);
            if taken {
                return Err(RepositoryError::AlreadyExists(format!("project {}", name)));
            }
            let project = Project {
                id: ProjectId::new(),
                name: name.to_string(),
                description: description.to_string(),
                owner: ctx.user,
                date_created: Utc::now(),
            };
            store.write_project(&project)?;
            tracing::info!(project = %project.id, name = %project.name, "project created");
            Ok(project)
        })
    }

    pub fn read_project(&self, id: ProjectId) -> Result<Project, RepositoryError> {
        self.inner.read(|store| {
            store
                .read_project(id)?
                .ok_or_else(|| RepositoryError::not_found(format!("project {}", id)))
        })
    }

    /// All projects, the Online project included, ordered by name.
    pub fn read_projects(&self) -> Result<Vec<Project>, RepositoryError> {
        self.inner.read(|store| {
            let mut projects = store.read_projects()?;
            projects.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(projects)
        })
    }

    /// Unpublished resources last modified in `project`, optionally only
    /// those in `state`.
    pub fn read_project_view(
        &self,
        project: ProjectId,
        state: Option<ResourceState>,
    ) -> Result<Vec<Resource>, RepositoryError> {
        self.inner.read(|store| {
            if store.read_project(project)?.is_none() {
                return Err(RepositoryError::not_found(format!("project {}", project)));
            }
            let resources = store.read_resources_in_project(project)?;
            Ok(resources
                .into_iter()
                .filter(|r| state.map_or(true, |s| r.state() == s))
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::{ResourceType, UserId};

    #[tokio::test]
    async fn test_project_names_are_unique() {
        let repo = Repository::in_memory().unwrap();
        let ctx = RequestContext::online(UserId::new());
        let project = repo.create_project(&ctx, "Spring", "campaign").unwrap();
        assert_eq!(repo.read_project(project.id).unwrap().name, "Spring");

        let err = repo.create_project(&ctx, "Spring", "").unwrap_err();
        assert!(matches!(err, RepositoryError::AlreadyExists(_)));
        let err = repo.create_project(&ctx, "online", "").unwrap_err();
        assert!(matches!(err, RepositoryError::AlreadyExists(_)));
        let err = repo.create_project(&ctx, "  ", "").unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidName(_)));

        let names: Vec<String> = repo
            .read_projects()
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["Online", "Spring"]);
    }

    #[tokio::test]
    async fn test_project_view_filters_by_state() {
        let repo = Repository::in_memory().unwrap();
        let user = UserId::new();
        let first = repo
            .create_project(&RequestContext::online(user), "First", "")
            .unwrap();
        let second = repo
            .create_project(&RequestContext::online(user), "Second", "")
            .unwrap();
        let ctx = RequestContext::new(user, first.id);
        repo.create_resource(&ctx, "/a.txt", ResourceType::Plain, None, &[])
            .unwrap();
        repo.create_resource(&ctx, "/b.txt", ResourceType::Plain, None, &[])
            .unwrap();
        repo.delete_resource(&ctx, "/b.txt", Default::default())
            .unwrap();

        let all = repo.read_project_view(first.id, None).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].path(), "/a.txt");
        assert_eq!(
            repo.read_project_view(first.id, Some(ResourceState::Changed))
                .unwrap()
                .len(),
            0
        );
        assert!(repo.read_project_view(second.id, None).unwrap().is_empty());
        assert!(matches!(
            repo.read_project_view(ProjectId::new(), None),
            Err(RepositoryError::NotFound(_))
        ));
    }
}
