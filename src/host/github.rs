use reqwest::Method;
use reqwest::blocking::{Client, Response};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, LINK, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{
    BlobContent, BlobEncoding, Issue, ObjectId, ObjectStore, Provisioner, RepoHandle,
    RepoOptions, TreeEntry,
};
use crate::error::RemoteError;

pub const DEFAULT_API_URL: &str = "https://api.github.com";

#[derive(Debug, Deserialize)]
struct ApiMessage {
    message: String,
}

#[derive(Debug, Deserialize)]
struct Sha {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct RefResponse {
    object: Sha,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    tree: Sha,
}

#[derive(Debug, Deserialize)]
struct Owner {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RepoResponse {
    name: String,
    owner: Owner,
    default_branch: Option<String>,
    #[serde(default)]
    private: bool,
}

impl From<RepoResponse> for RepoHandle {
    fn from(r: RepoResponse) -> Self {
        RepoHandle {
            owner: r.owner.login,
            name: r.name,
            default_branch: r.default_branch.unwrap_or_else(|| "main".to_string()),
            private: r.private,
        }
    }
}

#[derive(Debug, Deserialize)]
struct IssueResponse {
    id: u64,
    number: u64,
    title: String,
    #[serde(default)]
    pull_request: Option<Value>,
}

impl From<IssueResponse> for Issue {
    fn from(i: IssueResponse) -> Self {
        Issue {
            id: i.id,
            number: i.number,
            title: i.title,
        }
    }
}

#[derive(Debug, Serialize)]
struct NewBlob {
    content: String,
    encoding: BlobEncoding,
}

#[derive(Debug, Serialize)]
struct NewTreeEntry<'a> {
    path: &'a str,
    mode: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
    sha: &'a str,
}

#[derive(Debug, Serialize)]
struct NewTree<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    base_tree: Option<&'a str>,
    tree: Vec<NewTreeEntry<'a>>,
}

#[derive(Debug, Serialize)]
struct NewCommit<'a> {
    message: &'a str,
    tree: &'a str,
    parents: [&'a str; 1],
}

#[derive(Debug, Serialize)]
struct NewRef<'a> {
    #[serde(rename = "ref")]
    reference: String,
    sha: &'a str,
}

#[derive(Debug, Serialize)]
struct RefUpdate<'a> {
    sha: &'a str,
    force: bool,
}

/// Authenticated client for the GitHub REST API.
#[derive(Debug, Clone)]
pub struct GitHub {
    client: Client,
    api: String,
}

impl GitHub {
    /// Build a client sending `token` as a bearer credential to `api_url`.
    pub fn new(api_url: &str, token: &str) -> Result<Self, RemoteError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static("expub"));
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| RemoteError::Rejected("access token is not a valid header".into()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let client = Client::builder().default_headers(headers).build()?;
        Ok(Self {
            client,
            api: api_url.trim_end_matches('/').to_string(),
        })
    }

    /// Object store scoped to `owner/name`.
    pub fn repo(&self, owner: &str, name: &str) -> GitHubRepo {
        GitHubRepo {
            gh: self.clone(),
            owner: owner.to_string(),
            name: name.to_string(),
        }
    }

    fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Response, RemoteError> {
        self.request_url(method, format!("{}{}", self.api, path), body)
    }

    fn request_url(
        &self,
        method: Method,
        url: String,
        body: Option<Value>,
    ) -> Result<Response, RemoteError> {
        log::debug!("{method} {url}");
        let mut req = self.client.request(method.clone(), &url);
        if let Some(b) = &body {
            req = req.json(b);
        }
        let resp = req.send()?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let text = resp.text().unwrap_or_default();
        let message = serde_json::from_str::<ApiMessage>(&text)
            .map(|m| m.message)
            .unwrap_or_else(|_| status.canonical_reason().unwrap_or("").to_string());
        if status.as_u16() == 404 {
            log::debug!("{method} {url}: not found");
        } else {
            log::warn!("{method} {url} received error {status}: {message}");
        }
        Err(RemoteError::Status {
            method: method.to_string(),
            url,
            status: status.as_u16(),
            message,
        })
    }

    fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T, RemoteError> {
        let resp = self.request(method, path, body)?;
        resp.json::<T>()
            .map_err(|e| RemoteError::Decode(format!("{path}: {e}")))
    }

    /// Login of the user the token belongs to.
    pub fn authenticated_login(&self) -> Result<String, RemoteError> {
        let owner: Owner = self.send(Method::GET, "/user", None)?;
        Ok(owner.login)
    }
}

/// Target of the `rel="next"` entry of a `Link` header.
fn next_page(headers: &HeaderMap) -> Option<String> {
    let link = headers.get(LINK)?.to_str().ok()?;
    link.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        params
            .split(';')
            .any(|p| p.trim() == r#"rel="next""#)
            .then(|| {
                target
                    .trim()
                    .trim_start_matches('<')
                    .trim_end_matches('>')
                    .to_string()
            })
    })
}

fn to_json(body: &impl Serialize) -> Result<Value, RemoteError> {
    serde_json::to_value(body).map_err(|e| RemoteError::Decode(e.to_string()))
}

impl Provisioner for GitHub {
    fn find_repository(&self, owner: &str, name: &str) -> Result<Option<RepoHandle>, RemoteError> {
        match self.send::<RepoResponse>(Method::GET, &format!("/repos/{owner}/{name}"), None) {
            Ok(r) => Ok(Some(r.into())),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn ensure_repository(
        &self,
        owner: &str,
        name: &str,
        opts: RepoOptions,
    ) -> Result<RepoHandle, RemoteError> {
        if self.find_repository(owner, name)?.is_some() {
            log::info!("repository {owner}/{name} exists, updating settings");
            let mut body = json!({ "is_template": opts.template });
            if let Some(private) = opts.private {
                body["private"] = json!(private);
            }
            let r: RepoResponse =
                self.send(Method::PATCH, &format!("/repos/{owner}/{name}"), Some(body))?;
            return Ok(r.into());
        }

        let mut body = json!({
            "name": name,
            "auto_init": true,
            "is_template": opts.template,
        });
        if let Some(private) = opts.private {
            body["private"] = json!(private);
        }
        log::info!("creating repository {owner}/{name}");
        let org_path = format!("/orgs/{owner}/repos");
        match self.send::<RepoResponse>(Method::POST, &org_path, Some(body.clone())) {
            Ok(r) => Ok(r.into()),
            // Not an organization: only the token's own account is a valid target.
            Err(e) if e.is_not_found() => {
                let login = self.authenticated_login()?;
                if !login.eq_ignore_ascii_case(owner) {
                    return Err(e);
                }
                let r: RepoResponse = self.send(Method::POST, "/user/repos", Some(body))?;
                Ok(r.into())
            }
            Err(e) => Err(e),
        }
    }

    fn protect_branch(
        &self,
        repo: &RepoHandle,
        branch: &str,
        required_reviews: u32,
    ) -> Result<(), RemoteError> {
        let body = json!({
            "required_status_checks": null,
            "enforce_admins": null,
            "restrictions": null,
            "required_pull_request_reviews": {
                "required_approving_review_count": required_reviews,
            },
        });
        let path = format!(
            "/repos/{}/{}/branches/{}/protection",
            repo.owner, repo.name, branch
        );
        self.request(Method::PUT, &path, Some(body))?;
        Ok(())
    }

    /// Every issue of the repository, following `Link: rel="next"` pages.
    fn list_issues(&self, repo: &RepoHandle) -> Result<Vec<Issue>, RemoteError> {
        let mut url = format!(
            "{}/repos/{}/{}/issues?state=all&per_page=100&page=1",
            self.api, repo.owner, repo.name
        );
        let mut out = Vec::new();
        loop {
            let resp = self.request_url(Method::GET, url.clone(), None)?;
            let next = next_page(resp.headers());
            let page: Vec<IssueResponse> = resp
                .json()
                .map_err(|e| RemoteError::Decode(format!("{url}: {e}")))?;
            out.extend(
                page.into_iter()
                    .filter(|i| i.pull_request.is_none())
                    .map(Issue::from),
            );
            match next {
                Some(n) => url = n,
                None => return Ok(out),
            }
        }
    }

    fn create_issue(
        &self,
        repo: &RepoHandle,
        title: &str,
        body: &str,
    ) -> Result<Issue, RemoteError> {
        let payload = json!({ "title": title, "body": body });
        let path = format!("/repos/{}/{}/issues", repo.owner, repo.name);
        let issue: IssueResponse = self.send(Method::POST, &path, Some(payload))?;
        Ok(issue.into())
    }

    fn add_issue_card(&self, column_id: u64, issue: &Issue) -> Result<(), RemoteError> {
        let body = json!({ "content_id": issue.id, "content_type": "Issue" });
        self.request(
            Method::POST,
            &format!("/projects/columns/{column_id}/cards"),
            Some(body),
        )?;
        Ok(())
    }

    fn grant_team(
        &self,
        repo: &RepoHandle,
        team_slug: &str,
        permission: Option<&str>,
    ) -> Result<(), RemoteError> {
        let body = match permission {
            Some(p) => json!({ "permission": p }),
            None => json!({}),
        };
        let path = format!(
            "/orgs/{}/teams/{}/repos/{}/{}",
            repo.owner, team_slug, repo.owner, repo.name
        );
        self.request(Method::PUT, &path, Some(body))?;
        Ok(())
    }
}

/// The git data API of one repository.
#[derive(Debug, Clone)]
pub struct GitHubRepo {
    gh: GitHub,
    owner: String,
    name: String,
}

impl GitHubRepo {
    fn path(&self, rest: &str) -> String {
        format!("/repos/{}/{}/git/{}", self.owner, self.name, rest)
    }
}

impl ObjectStore for GitHubRepo {
    fn create_blob(&self, content: &BlobContent) -> Result<ObjectId, RemoteError> {
        let body = NewBlob {
            content: content.wire_content(),
            encoding: content.encoding(),
        };
        let created: Sha = self
            .gh
            .send(Method::POST, &self.path("blobs"), Some(to_json(&body)?))?;
        Ok(ObjectId::new(created.sha))
    }

    fn create_tree(
        &self,
        base: Option<&ObjectId>,
        entries: &[TreeEntry],
    ) -> Result<ObjectId, RemoteError> {
        let body = NewTree {
            base_tree: base.map(ObjectId::as_str),
            tree: entries
                .iter()
                .map(|e| NewTreeEntry {
                    path: &e.path,
                    mode: TreeEntry::MODE_FILE,
                    kind: "blob",
                    sha: e.object_id.as_str(),
                })
                .collect(),
        };
        let created: Sha = self
            .gh
            .send(Method::POST, &self.path("trees"), Some(to_json(&body)?))?;
        Ok(ObjectId::new(created.sha))
    }

    fn create_commit(
        &self,
        tree: &ObjectId,
        parent: &ObjectId,
        message: &str,
    ) -> Result<ObjectId, RemoteError> {
        let body = NewCommit {
            message,
            tree: tree.as_str(),
            parents: [parent.as_str()],
        };
        let created: Sha = self
            .gh
            .send(Method::POST, &self.path("commits"), Some(to_json(&body)?))?;
        Ok(ObjectId::new(created.sha))
    }

    fn commit_tree(&self, commit: &ObjectId) -> Result<ObjectId, RemoteError> {
        let path = self.path(&format!("commits/{commit}"));
        let c: CommitResponse = self.gh.send(Method::GET, &path, None)?;
        Ok(ObjectId::new(c.tree.sha))
    }

    fn get_ref(&self, branch: &str) -> Result<Option<ObjectId>, RemoteError> {
        let path = self.path(&format!("ref/heads/{branch}"));
        match self.gh.send::<RefResponse>(Method::GET, &path, None) {
            Ok(r) => Ok(Some(ObjectId::new(r.object.sha))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn create_ref(&self, branch: &str, commit: &ObjectId) -> Result<(), RemoteError> {
        let body = NewRef {
            reference: format!("refs/heads/{branch}"),
            sha: commit.as_str(),
        };
        self.gh
            .request(Method::POST, &self.path("refs"), Some(to_json(&body)?))?;
        Ok(())
    }

    fn update_ref(&self, branch: &str, commit: &ObjectId) -> Result<(), RemoteError> {
        let body = RefUpdate {
            sha: commit.as_str(),
            force: false,
        };
        self.gh.request(
            Method::PATCH,
            &self.path(&format!("refs/heads/{branch}")),
            Some(to_json(&body)?),
        )?;
        Ok(())
    }
}
