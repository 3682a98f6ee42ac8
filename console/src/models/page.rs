//! Page models

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::PageId;

/// A repository + branch + build recipe that becomes a running service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub id: PageId,

    /// Login of the owning source-control account
    pub account_login: Option<String>,

    /// Repository identifier, `owner/name`
    pub repo: String,

    /// Display name; the service name is derived from it
    pub name: String,

    pub branch: String,

    /// Multi-line shell recipe run inside the working tree
    pub build_script: Option<String>,

    /// Subdirectory of the working tree holding the build output
    pub build_output_dir: Option<String>,

    /// Unit last written for this page, kept across renames until removed
    #[serde(default)]
    pub service: Option<String>,
}

impl Page {
    /// Whether a push to `repo` on `branch` should redeploy this page
    pub fn matches_push(&self, repo: &str, branch: &str) -> bool {
        self.repo == repo && self.branch == branch
    }

    /// The build recipe, treating a blank script as absent
    pub fn recipe(&self) -> Option<&str> {
        self.build_script
            .as_deref()
            .filter(|script| !script.trim().is_empty())
    }
}

/// One environment entry of a page. The value is opaque and may be sensitive.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

impl EnvVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl fmt::Debug for EnvVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvVar")
            .field("name", &self.name)
            .field("value", &"<redacted>")
            .finish()
    }
}
