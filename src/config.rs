use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::auth::Token;

/// Configuration file structure for the Buildkite CLI.
///
/// Maps Buildkite organizations to their API tokens and to the git remote
/// owners whose repositories they build.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    /// Organization to fall back to when no remote matches
    #[serde(default)]
    pub default: Option<String>,

    /// Keyed by Buildkite organization slug
    #[serde(default)]
    pub organizations: BTreeMap<String, Organization>,

    /// Buildkite organization -> repository owner, for orgs named differently on each side
    #[serde(default)]
    pub org_aliases: BTreeMap<String, String>,

    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    /// Filled from the map key after loading.
    #[serde(skip)]
    pub name: String,

    #[serde(default)]
    pub token: Option<String>,

    /// Git remote owners (e.g. a GitHub org) that map to this organization
    #[serde(default)]
    pub git_remotes: Vec<String>,

    /// Browser application for `open` ("Google Chrome", "Firefox", ...)
    #[serde(default)]
    pub browser_application: Option<String>,

    /// Browser profile name ("Default", "Profile 1", ...)
    #[serde(default)]
    pub browser_profile: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_rest_url")]
    pub rest_url: String,

    #[serde(default = "default_graphql_url")]
    pub graphql_url: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            rest_url: default_rest_url(),
            graphql_url: default_graphql_url(),
        }
    }
}

fn default_rest_url() -> String {
    "https://api.buildkite.com/".to_string()
}

fn default_graphql_url() -> String {
    "https://graphql.buildkite.com/v1".to_string()
}

const EXAMPLE_CONFIG: &str = r#"[organizations]

    [organizations.buildkite_org]
    token = "aabbccddeeff00"
    git_remotes = [ "github_org" ]"#;

const TOKEN_URL: &str = "https://buildkite.com/user/api-access-tokens";

/// Immutable lookup from Buildkite organization to repository owner.
///
/// Built once from defaults plus the config file and handed to the
/// pipeline resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrgAliases(BTreeMap<String, String>);

impl OrgAliases {
    pub fn new(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        Self(
            entries
                .into_iter()
                .map(|(org, owner)| (org.to_lowercase(), owner))
                .collect(),
        )
    }

    #[cfg(test)]
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    /// The repository owner to match candidate URLs against for `org`.
    pub fn repository_owner<'a>(&'a self, org: &'a str) -> &'a str {
        self.0
            .get(&org.to_lowercase())
            .map_or(org, String::as_str)
    }
}

impl Default for OrgAliases {
    fn default() -> Self {
        Self::new([("segment".to_string(), "segmentio".to_string())])
    }
}

impl FileConfig {
    /// Load configuration from a file.
    ///
    /// Searches for configuration files in this order:
    /// 1. Specified path
    /// 2. $XDG_CONFIG_HOME/buildkite
    /// 3. $HOME/cfg/buildkite
    /// 4. $HOME/.buildkite
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_path(path);
        }

        let candidates = Self::candidate_paths();
        for candidate in &candidates {
            if candidate.exists() {
                return Self::load_from_path(candidate);
            }
        }

        let checked = candidates
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(" or ");
        bail!(
            "Couldn't find a config file in {checked}.\n\n\
             Add a configuration file with your Buildkite token, like this:\n\n\
             {EXAMPLE_CONFIG}\n\n\
             Go to {TOKEN_URL} if you need to find your token."
        )
    }

    fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
            paths.push(PathBuf::from(xdg).join("buildkite"));
        }
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join("cfg").join("buildkite"));
            paths.push(home.join(".buildkite"));
        }
        paths
    }

    /// Load configuration from a specific file path.
    fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("");

        let mut config: Self = match extension {
            "toml" => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display()))?,
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?,
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?,
            _ => toml::from_str(&contents)
                .or_else(|_| serde_json::from_str(&contents))
                .or_else(|_| serde_yaml::from_str(&contents))
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
        };

        for (name, org) in &mut config.organizations {
            org.name.clone_from(name);
        }

        Ok(config)
    }

    /// Finds the organization serving a git remote owner. Case-insensitive.
    pub fn org_for_remote(&self, remote_owner: &str) -> Option<&Organization> {
        self.organizations.values().find(|org| {
            org.git_remotes
                .iter()
                .any(|rm| rm.eq_ignore_ascii_case(remote_owner))
        })
    }

    fn org_named(&self, name: &str) -> Option<&Organization> {
        self.organizations
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, org)| org)
    }

    /// The organization used for a remote: its mapped org, else the default.
    pub fn resolve_org(&self, remote_owner: &str) -> Result<&Organization> {
        if let Some(org) = self.org_for_remote(remote_owner) {
            return Ok(org);
        }
        if let Some(default) = &self.default {
            if let Some(org) = self
                .org_for_remote(default)
                .or_else(|| self.org_named(default))
            {
                return Ok(org);
            }
            bail!(
                "Couldn't find an organization for git remote {remote_owner} in the config.\n\n\
                 Go to {TOKEN_URL} if you need to create or find a token."
            );
        }
        bail!(
            "Couldn't find an organization for git remote {remote_owner} in the config.\n\n\
             Set one of your organizations to be the default:\n\n\
             default = \"myorg\"\n\n\
             [organizations]\n\n    \
             [organizations.myorg]\n    \
             token = \"abcdef-bcd-fgh\"\n\n\
             Or go to {TOKEN_URL} if you need to find your token."
        )
    }

    /// Finds the API token for a git remote owner.
    pub fn token(&self, remote_owner: &str) -> Result<Token> {
        let org = self.resolve_org(remote_owner)?;
        org.token
            .as_deref()
            .map(Token::from)
            .with_context(|| format!("No token configured for organization {}", org.name))
    }

    pub fn aliases(&self) -> OrgAliases {
        let mut entries: BTreeMap<String, String> = OrgAliases::default().0;
        entries.extend(
            self.org_aliases
                .iter()
                .map(|(org, owner)| (org.to_lowercase(), owner.clone())),
        );
        OrgAliases(entries)
    }
}
