//! Repository provisioning performed by `expub publish` before syncing.
//!
//! Only repository creation gates the sync. Branch protection, the tracking
//! issue and team grants are best effort: a failure is shown and logged and
//! the next step runs anyway.

use anyhow::{Context, Result};
use indicatif::MultiProgress;

use crate::error::RemoteError;
use crate::host::github::GitHub;
use crate::host::{Issue, Provisioner, RepoHandle, RepoOptions};
use crate::progress;
use crate::settings::{IssueConfig, Settings};
use crate::sync::{SyncOptions, build_jobs, dry_run, summarize, sync_all};

/// What happened to the tracking issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueOutcome {
    /// An issue with the configured title already exists; nothing was done.
    Existing(Issue),
    /// The issue was filed; `carded` tells whether it reached the board.
    Created { issue: Issue, carded: bool },
}

/// File the tracking issue unless one with the same title exists.
///
/// A newly created issue is attached to the configured project column. A
/// failure to attach is logged and reported through `carded`.
pub fn ensure_issue<P: Provisioner + ?Sized>(
    host: &P,
    repo: &RepoHandle,
    cfg: &IssueConfig,
) -> Result<IssueOutcome, RemoteError> {
    if let Some(existing) = host
        .list_issues(repo)?
        .into_iter()
        .find(|i| i.title == cfg.title)
    {
        return Ok(IssueOutcome::Existing(existing));
    }

    let issue = host.create_issue(repo, &cfg.title, &cfg.body)?;
    let carded = match cfg.column_id {
        Some(col) => match host.add_issue_card(col, &issue) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("could not add issue #{} to column {col}: {e}", issue.number);
                false
            }
        },
        None => false,
    };
    Ok(IssueOutcome::Created { issue, carded })
}

/// Grant every team access; failures are collected, not fatal.
pub fn grant_teams<P: Provisioner + ?Sized>(
    host: &P,
    repo: &RepoHandle,
    teams: &[String],
    permission: Option<&str>,
) -> Vec<(String, RemoteError)> {
    let mut failed = Vec::new();
    for team in teams {
        if let Err(e) = host.grant_team(repo, team, permission) {
            log::warn!("granting {team} on {}/{} failed: {e}", repo.owner, repo.name);
            failed.push((team.clone(), e));
        }
    }
    failed
}

/// Create or update the repository, then run the best-effort steps.
///
/// # Errors
/// Only a failure to create or update the repository itself.
pub fn provision<P: Provisioner + ?Sized>(
    host: &P,
    settings: &Settings,
    mp: &MultiProgress,
) -> Result<RepoHandle> {
    let name = &settings.layout.repo_name;
    let pb = progress::start(mp, format!("preparing {}/{}", settings.owner, name));
    let opts = RepoOptions {
        private: settings.private,
        template: settings.template,
    };
    let repo = match host.ensure_repository(&settings.owner, name, opts) {
        Ok(r) => {
            let vis = if r.private { "private" } else { "public" };
            progress::finish_ok(&pb, format!("repository {}/{} ({vis})", r.owner, r.name));
            r
        }
        Err(e) => {
            progress::finish_err(&pb, format!("repository {}/{}: {e}", settings.owner, name));
            return Err(e).with_context(|| {
                format!("failed to create or update {}/{}", settings.owner, name)
            });
        }
    };

    if settings.protection.enabled {
        let branch = settings
            .protection
            .branch
            .clone()
            .unwrap_or_else(|| repo.default_branch.clone());
        let reviews = settings.protection.required_approving_review_count;
        let pb = progress::start(mp, format!("protecting {branch}"));
        match host.protect_branch(&repo, &branch, reviews) {
            Ok(()) => progress::finish_ok(
                &pb,
                format!("{branch} requires {reviews} approving reviews"),
            ),
            Err(e) => {
                log::warn!("branch protection failed: {e}");
                progress::finish_err(&pb, format!("protecting {branch} (error: {e})"));
            }
        }
    }

    if settings.issue.enabled {
        let pb = progress::start(mp, format!("filing issue \"{}\"", settings.issue.title));
        match ensure_issue(host, &repo, &settings.issue) {
            Ok(IssueOutcome::Existing(i)) => {
                progress::finish_ok(&pb, format!("issue #{} already filed", i.number))
            }
            Ok(IssueOutcome::Created { issue, carded }) => {
                let board = if carded { " and added to board" } else { "" };
                progress::finish_ok(&pb, format!("filed issue #{}{board}", issue.number));
            }
            Err(e) => {
                log::warn!("issue filing failed: {e}");
                progress::finish_err(&pb, format!("filing issue (error: {e})"));
            }
        }
    }

    if !settings.teams.is_empty() {
        let pb = progress::start(mp, "granting team access");
        let failed = grant_teams(
            host,
            &repo,
            &settings.teams,
            settings.team_permission.as_deref(),
        );
        if failed.is_empty() {
            progress::finish_ok(&pb, format!("granted {}", settings.teams.join(", ")));
        } else {
            let names: Vec<_> = failed.iter().map(|(t, _)| t.as_str()).collect();
            progress::finish_err(&pb, format!("team grants failed: {}", names.join(", ")));
        }
    }

    Ok(repo)
}

/// CLI command: provision the repository and publish every branch folder.
///
/// Process:
/// 1. Create the repository (or update its template flag and, when given,
///    its visibility).
/// 2. Protect the default branch, file the tracking issue, grant teams.
/// 3. Sync each branch folder in turn, creating missing branches from the
///    default branch.
///
/// # Errors
/// - The repository cannot be created or updated.
/// - Any branch failed to sync (the others are still attempted).
pub fn cmd_publish(settings: &Settings) -> Result<()> {
    let mp = MultiProgress::new();
    if settings.dry_run {
        log::info!("dry run: skipping repository provisioning");
        return dry_run(settings, &mp);
    }

    let token = settings
        .token
        .as_deref()
        .context("no GitHub access token")?;
    let gh = GitHub::new(&settings.api_url, token).context("failed to build GitHub client")?;

    let repo = provision(&gh, settings, &mp)?;
    let store = gh.repo(&repo.owner, &repo.name);
    let opts = SyncOptions::new(settings, &repo.default_branch);
    summarize(sync_all(&store, &build_jobs(settings), &opts, &mp))?;
    Ok(())
}
