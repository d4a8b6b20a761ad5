use serde::Deserialize;
use std::env;
use std::fs;
use std::io;
use std::path::Path;

use crate::error::ConfigError;
use crate::host::github::DEFAULT_API_URL;
use crate::paths::{Layout, config_path, layout};

/// Owner used when neither the command line nor `expub.toml` names one.
pub const DEFAULT_OWNER: &str = "carlotrimarchi-test";

/// How the new tree relates to the branch's current tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Layer local files over the current tree; files deleted locally stay.
    #[default]
    Overlay,
    /// The new tree holds exactly the local files.
    Replace,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProtectionConfig {
    pub enabled: bool,
    /// Defaults to the repository's default branch.
    pub branch: Option<String>,
    pub required_approving_review_count: u32,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            branch: None,
            required_approving_review_count: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IssueConfig {
    pub enabled: bool,
    pub title: String,
    pub body: String,
    /// Project board column the issue is attached to when first created.
    pub column_id: Option<u64>,
}

impl Default for IssueConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            title: "Add CodeBuddy".to_string(),
            body: "I'm having a problem with this.".to_string(),
            column_id: Some(18829045),
        }
    }
}

/// Contents of `expub.toml`. Every key is optional.
///
/// Example:
/// ```toml
/// owner = "my-school"
/// private = true
/// mode = "replace"
/// teams = ["lecturers"]
///
/// [issue]
/// column_id = 12345
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub owner: Option<String>,
    /// Unset leaves the visibility of an existing repository alone.
    pub private: Option<bool>,
    pub template: bool,
    pub api_url: String,
    pub branches: Vec<String>,
    pub readme: String,
    pub commit_message: String,
    pub mode: SyncMode,
    pub upload_threads: Option<usize>,
    pub protection: ProtectionConfig,
    pub issue: IssueConfig,
    pub teams: Vec<String>,
    pub team_permission: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            owner: None,
            private: None,
            template: true,
            api_url: DEFAULT_API_URL.to_string(),
            branches: vec!["main".to_string(), "solution".to_string()],
            readme: "README.md".to_string(),
            commit_message: "Sync {branch} from local folder".to_string(),
            mode: SyncMode::Overlay,
            upload_threads: None,
            protection: ProtectionConfig::default(),
            issue: IssueConfig::default(),
            teams: vec!["curriculum-editors".to_string(), "lecturers".to_string()],
            team_permission: None,
        }
    }
}

/// Load `expub.toml` from `root`. A missing file yields the defaults.
///
/// # Errors
/// - [`ConfigError::ReadConfig`] if the file exists but cannot be read.
/// - [`ConfigError::ParseConfig`] if it is not valid TOML for [`Config`].
pub fn load_config(root: &Path) -> Result<Config, ConfigError> {
    let path = config_path(root);
    let txt = match fs::read_to_string(&path) {
        Ok(t) => t,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Config::default()),
        Err(source) => return Err(ConfigError::ReadConfig { path, source }),
    };
    let cfg: Config =
        toml::from_str(&txt).map_err(|source| ConfigError::ParseConfig { path, source })?;
    Ok(cfg)
}

/// Command-line values that take precedence over `expub.toml`.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub owner: Option<String>,
    pub private: Option<bool>,
    pub message: Option<String>,
    pub mode: Option<SyncMode>,
    pub dry_run: bool,
}

/// Everything a command needs, resolved once and passed down explicitly.
#[derive(Debug, Clone)]
pub struct Settings {
    pub owner: String,
    pub layout: Layout,
    /// `None` only in dry-run mode.
    pub token: Option<String>,
    pub api_url: String,
    /// `None` when neither the command line nor `expub.toml` sets it.
    pub private: Option<bool>,
    pub template: bool,
    pub commit_message: String,
    pub mode: SyncMode,
    pub upload_threads: usize,
    pub protection: ProtectionConfig,
    pub issue: IssueConfig,
    pub teams: Vec<String>,
    pub team_permission: Option<String>,
    pub dry_run: bool,
}

impl Settings {
    /// Combine `expub.toml` in `root`, command-line overrides and the token.
    ///
    /// # Errors
    /// Any [`ConfigError`]; a missing token is an error unless `dry_run` is set.
    pub fn resolve(
        root: &Path,
        ov: Overrides,
        token: Option<String>,
    ) -> Result<Settings, ConfigError> {
        let cfg = load_config(root)?;
        if cfg.branches.is_empty() {
            return Err(ConfigError::Invalid("`branches` must not be empty".into()));
        }
        if !ov.dry_run && token.is_none() {
            return Err(ConfigError::MissingCredential);
        }
        let layout = layout(root, &cfg.branches, &cfg.readme)?;

        let upload_threads = cfg
            .upload_threads
            .unwrap_or_else(|| num_cpus::get().min(8))
            .max(1);

        Ok(Settings {
            owner: ov
                .owner
                .or(cfg.owner)
                .unwrap_or_else(|| DEFAULT_OWNER.to_string()),
            layout,
            token,
            api_url: cfg.api_url,
            private: ov.private.or(cfg.private),
            template: cfg.template,
            commit_message: ov.message.unwrap_or(cfg.commit_message),
            mode: ov.mode.unwrap_or(cfg.mode),
            upload_threads,
            protection: cfg.protection,
            issue: cfg.issue,
            teams: cfg.teams,
            team_permission: cfg.team_permission,
            dry_run: ov.dry_run,
        })
    }

    /// Commit message for `branch`, with `{branch}` substituted.
    pub fn message_for(&self, branch: &str) -> String {
        self.commit_message.replace("{branch}", branch)
    }
}

/// Access token from `GITHUB_PAT`, falling back to `GITHUB_TOKEN`.
pub fn read_token() -> Option<String> {
    ["GITHUB_PAT", "GITHUB_TOKEN"]
        .iter()
        .filter_map(|k| env::var(k).ok())
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::CONFIG_FILE;
    use serial_test::serial;
    use tempfile::tempdir;

    fn exercise_dir() -> tempfile::TempDir {
        let td = tempdir().unwrap();
        fs::create_dir_all(td.path().join("ex/main")).unwrap();
        fs::create_dir_all(td.path().join("ex/solution")).unwrap();
        td
    }

    #[test]
    fn defaults_without_config_file() {
        let td = exercise_dir();
        let root = td.path().join("ex");
        let s = Settings::resolve(&root, Overrides::default(), Some("t".into())).unwrap();
        assert_eq!(s.owner, DEFAULT_OWNER);
        assert_eq!(s.mode, SyncMode::Overlay);
        assert_eq!(s.message_for("main"), "Sync main from local folder");
        assert!(s.upload_threads >= 1 && s.upload_threads <= 8);
        assert_eq!(s.issue.column_id, Some(18829045));
    }

    #[test]
    fn file_values_are_overridden_by_cli() {
        let td = exercise_dir();
        let root = td.path().join("ex");
        fs::write(
            root.join(CONFIG_FILE),
            r#"
owner = "school"
private = true
mode = "replace"
commit_message = "publish {branch}"
upload_threads = 3

[protection]
required_approving_review_count = 1
"#,
        )
        .unwrap();

        let s = Settings::resolve(&root, Overrides::default(), Some("t".into())).unwrap();
        assert_eq!(s.owner, "school");
        assert_eq!(s.private, Some(true));
        assert_eq!(s.mode, SyncMode::Replace);
        assert_eq!(s.upload_threads, 3);
        assert_eq!(s.protection.required_approving_review_count, 1);
        assert_eq!(s.message_for("solution"), "publish solution");

        let ov = Overrides {
            owner: Some("other".into()),
            private: Some(false),
            mode: Some(SyncMode::Overlay),
            ..Default::default()
        };
        let s = Settings::resolve(&root, ov, Some("t".into())).unwrap();
        assert_eq!(s.owner, "other");
        assert_eq!(s.private, Some(false));
        assert_eq!(s.mode, SyncMode::Overlay);
    }

    #[test]
    fn visibility_is_unset_without_flag_or_key() {
        let td = exercise_dir();
        let root = td.path().join("ex");
        fs::write(root.join(CONFIG_FILE), "owner = \"school\"\n").unwrap();
        let s = Settings::resolve(&root, Overrides::default(), Some("t".into())).unwrap();
        assert_eq!(s.private, None);

        let ov = Overrides {
            private: Some(false),
            ..Default::default()
        };
        let s = Settings::resolve(&root, ov, Some("t".into())).unwrap();
        assert_eq!(s.private, Some(false));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let td = exercise_dir();
        let root = td.path().join("ex");
        fs::write(root.join(CONFIG_FILE), "colour = \"blue\"\n").unwrap();
        assert!(matches!(
            load_config(&root),
            Err(ConfigError::ParseConfig { .. })
        ));
    }

    #[test]
    fn missing_token_fails_unless_dry_run() {
        let td = exercise_dir();
        let root = td.path().join("ex");
        assert!(matches!(
            Settings::resolve(&root, Overrides::default(), None),
            Err(ConfigError::MissingCredential)
        ));
        let ov = Overrides {
            dry_run: true,
            ..Default::default()
        };
        assert!(Settings::resolve(&root, ov, None).is_ok());
    }

    #[test]
    #[serial]
    fn token_prefers_github_pat() {
        // SAFETY: tests touching the environment are serialized.
        unsafe {
            env::set_var("GITHUB_PAT", "pat-value");
            env::set_var("GITHUB_TOKEN", "token-value");
        }
        assert_eq!(read_token().as_deref(), Some("pat-value"));

        unsafe {
            env::set_var("GITHUB_PAT", "  ");
        }
        assert_eq!(read_token().as_deref(), Some("token-value"));

        unsafe {
            env::remove_var("GITHUB_PAT");
            env::remove_var("GITHUB_TOKEN");
        }
        assert_eq!(read_token(), None);
    }
}
