//! Project enumeration and maintenance.

use super::PlatformClient;
use crate::{Error, Result};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Configuration key holding a project's repository URL
const REPO_URL_KEY: &str = "scan.config.microengines.repoUrl";
/// Configuration key holding a project's scanned branch
const BRANCH_KEY: &str = "scan.handler.git.branch";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub repo_url: Option<String>,
    #[serde(default)]
    pub main_branch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProjectsResponse {
    #[serde(default)]
    projects: Option<Vec<Project>>,
}

#[derive(Debug, Deserialize)]
struct CreatedProject {
    id: String,
}

/// Body of `POST /api/projects/`
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProject {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main_branch: Option<String>,
}

/// One project-level setting as exposed by `/api/configuration/project`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationEntry {
    pub key: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub origin_level: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub value_type: String,
    #[serde(default)]
    pub allow_override: bool,
}

impl ConfigurationEntry {
    fn project_string(key: &str, name: &str, category: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            name: name.to_string(),
            category: category.to_string(),
            origin_level: "Project".to_string(),
            value: Value::String(value.to_string()),
            value_type: "String".to_string(),
            allow_override: true,
        }
    }

    pub fn repo_url(value: &str) -> Self {
        Self::project_string(REPO_URL_KEY, "repoUrl", "microengines", value)
    }

    pub fn branch(value: &str) -> Self {
        Self::project_string(BRANCH_KEY, "branch", "git", value)
    }
}

/// Settings that make a project scannable from its repository.
fn repository_entries(repo_url: Option<&str>, branch: Option<&str>) -> Vec<ConfigurationEntry> {
    let mut entries = Vec::new();
    if let Some(url) = repo_url.map(str::trim).filter(|u| !u.is_empty()) {
        entries.push(ConfigurationEntry::repo_url(url));
    }
    if let Some(branch) = branch.map(str::trim).filter(|b| !b.is_empty()) {
        entries.push(ConfigurationEntry::branch(branch));
    }
    entries
}

/// Pick a scan target at random. `None` when there are no projects.
pub fn pick_random(projects: &[Project]) -> Option<&Project> {
    projects.choose(&mut rand::thread_rng())
}

impl PlatformClient {
    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        let url = format!("{}/api/projects/", self.api_url());
        let resp: ProjectsResponse = self.send_json(&url, self.http().get(&url)).await?;
        Ok(resp.projects.unwrap_or_default())
    }

    /// Create a project and, when a repository or branch is given, point
    /// its scan configuration at them. Returns the new project id.
    pub async fn create_project(&self, project: &NewProject) -> Result<String> {
        if project.name.trim().is_empty() {
            return Err(Error::InvalidArgument("project name is empty".into()));
        }

        let url = format!("{}/api/projects/", self.api_url());
        let created: CreatedProject = self
            .send_json(&url, self.http().post(&url).json(project))
            .await?;
        tracing::info!("Created project '{}' ({})", project.name, created.id);

        let entries =
            repository_entries(project.repo_url.as_deref(), project.main_branch.as_deref());
        if !entries.is_empty() {
            self.update_configuration(&created.id, &entries).await?;
        }
        Ok(created.id)
    }

    /// Rename a project. The platform replaces the whole project record, so
    /// tags and groups not sent are cleared.
    pub async fn rename_project(&self, project_id: &str, name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(Error::InvalidArgument("project name is empty".into()));
        }
        let url = format!("{}/api/projects/{}", self.api_url(), project_id);
        let body = serde_json::json!({ "name": name.trim() });
        self.send(&url, self.http().put(&url).json(&body)).await?;
        tracing::info!("Renamed project {} to '{}'", project_id, name.trim());
        Ok(())
    }

    /// Set the repository URL and/or branch a project scans.
    pub async fn configure_repository(
        &self,
        project_id: &str,
        repo_url: Option<&str>,
        branch: Option<&str>,
    ) -> Result<()> {
        let entries = repository_entries(repo_url, branch);
        if entries.is_empty() {
            return Err(Error::InvalidArgument(
                "nothing to configure: give a repository URL or a branch".into(),
            ));
        }
        self.update_configuration(project_id, &entries).await
    }

    pub async fn update_configuration(
        &self,
        project_id: &str,
        entries: &[ConfigurationEntry],
    ) -> Result<()> {
        let url = format!("{}/api/configuration/project", self.api_url());
        let request = self
            .http()
            .patch(&url)
            .query(&[("project-id", project_id)])
            .json(entries);
        self.send(&url, request).await?;
        tracing::info!(
            "Updated {} configuration entries on project {}",
            entries.len(),
            project_id
        );
        Ok(())
    }

    pub async fn project_configuration(&self, project_id: &str) -> Result<Vec<ConfigurationEntry>> {
        let url = format!("{}/api/configuration/project", self.api_url());
        let request = self.http().get(&url).query(&[("project-id", project_id)]);
        let entries: Option<Vec<ConfigurationEntry>> = self.send_json(&url, request).await?;
        Ok(entries.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::client::tests::client_for;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn repository_body(repo_url: &str, branch: &str) -> Value {
        json!([
            {
                "key": "scan.config.microengines.repoUrl",
                "name": "repoUrl",
                "category": "microengines",
                "originLevel": "Project",
                "value": repo_url,
                "valueType": "String",
                "allowOverride": true
            },
            {
                "key": "scan.handler.git.branch",
                "name": "branch",
                "category": "git",
                "originLevel": "Project",
                "value": branch,
                "valueType": "String",
                "allowOverride": true
            }
        ])
    }

    #[tokio::test]
    async fn test_list_projects_tolerates_null() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/projects/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"totalCount": 0, "projects": null})),
            )
            .mount(&server)
            .await;

        let projects = client_for(&server).await.list_projects().await.unwrap();
        assert!(projects.is_empty());
    }

    #[tokio::test]
    async fn test_create_project_then_configures_repository() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/projects/"))
            .and(body_json(json!({
                "name": "payments",
                "repoUrl": "https://github.com/acme/payments",
                "mainBranch": "main"
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "p-1",
                "name": "payments"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/api/configuration/project"))
            .and(query_param("project-id", "p-1"))
            .and(body_json(repository_body(
                "https://github.com/acme/payments",
                "main",
            )))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let id = client_for(&server)
            .await
            .create_project(&NewProject {
                name: "payments".into(),
                repo_url: Some("https://github.com/acme/payments".into()),
                main_branch: Some("main".into()),
            })
            .await
            .unwrap();
        assert_eq!(id, "p-1");
    }

    #[tokio::test]
    async fn test_create_project_without_repository_skips_configuration() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/projects/"))
            .and(body_json(json!({"name": "bare"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "p-2"})))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&server)
            .await;

        let id = client_for(&server)
            .await
            .create_project(&NewProject {
                name: "bare".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(id, "p-2");
    }

    #[tokio::test]
    async fn test_rename_and_configure_existing_project() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/projects/p-1"))
            .and(body_json(json!({"name": "payments-v2"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/api/configuration/project"))
            .and(query_param("project-id", "p-1"))
            .and(body_json(json!([{
                "key": "scan.handler.git.branch",
                "name": "branch",
                "category": "git",
                "originLevel": "Project",
                "value": "release",
                "valueType": "String",
                "allowOverride": true
            }])))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        client.rename_project("p-1", " payments-v2 ").await.unwrap();
        client
            .configure_repository("p-1", None, Some("release"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_configure_requires_a_setting() {
        let server = MockServer::start().await;
        let err = client_for(&server)
            .await
            .configure_repository("p-1", Some(" "), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_rejected_update_carries_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/api/configuration/project"))
            .respond_with(ResponseTemplate::new(400).set_body_string("unknown key"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .configure_repository("p-1", Some("https://git.example/x"), None)
            .await
            .unwrap_err();
        match err {
            Error::Status { status, body, .. } => {
                assert_eq!(status, 400);
                assert_eq!(body, "unknown key");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_project_configuration_reads_entries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/configuration/project"))
            .and(query_param("project-id", "p-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"key": "scan.handler.git.branch", "value": "main", "originLevel": "Project"},
                {"key": "scan.config.sast.incremental", "value": false}
            ])))
            .mount(&server)
            .await;

        let entries = client_for(&server)
            .await
            .project_configuration("p-1")
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].value, json!("main"));
        assert_eq!(entries[1].value, json!(false));
    }

    #[test]
    fn test_pick_random() {
        assert!(pick_random(&[]).is_none());

        let projects: Vec<Project> =
            serde_json::from_value(json!([{"id": "a", "name": "A"}, {"id": "b", "name": "B"}]))
                .unwrap();
        for _ in 0..20 {
            let picked = pick_random(&projects).unwrap();
            assert!(picked.id == "a" || picked.id == "b");
        }
    }
}
