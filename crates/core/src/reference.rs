use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::catalog::CatalogError;

/// Source of reference documents for cloud answers.
pub trait ReferenceProvider: Send + Sync {
    fn get_reference(&self, activity_id: &str) -> Option<String>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct Activity {
    pub id: String,
    pub display_name: String,
    pub aliases: Vec<String>,
    pub reference: Option<String>,
    pub keywords: Vec<String>,
    pub inject_keywords: bool,
    pub allowlist: Vec<String>,
}

impl Activity {
    fn answers_to(&self, name: &str) -> bool {
        self.id.eq_ignore_ascii_case(name)
            || self.display_name == name
            || self.aliases.iter().any(|alias| alias == name)
    }

    /// Vocabulary for prompt enrichment, empty when injection is switched off.
    pub fn prompt_keywords(&self) -> &[String] {
        if self.inject_keywords {
            &self.keywords
        } else {
            &[]
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ActivitiesFile {
    #[serde(default)]
    pub(crate) default: Option<String>,
    #[serde(default, rename = "activity")]
    pub(crate) activities: Vec<ActivityEntry>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ActivityEntry {
    id: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    aliases: Vec<String>,
    #[serde(default)]
    reference: Option<PathBuf>,
    #[serde(default)]
    keywords: Option<PathBuf>,
    #[serde(default = "default_inject_keywords")]
    inject_keywords: bool,
    #[serde(default)]
    allowlist: Vec<String>,
}

fn default_inject_keywords() -> bool {
    true
}

/// Activity registry with reference text and vocabulary read at load time.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReferenceLibrary {
    default_activity: Option<String>,
    activities: Vec<Activity>,
}

impl ReferenceLibrary {
    pub fn new(default_activity: Option<String>, activities: Vec<Activity>) -> Self {
        Self { default_activity, activities }
    }

    pub(crate) fn load(root: &Path, file: ActivitiesFile) -> Result<Self, CatalogError> {
        let mut activities = Vec::with_capacity(file.activities.len());
        let mut seen = BTreeSet::new();

        for entry in file.activities {
            let id = entry.id.trim().to_string();
            if id.is_empty() {
                return Err(CatalogError::Validation(
                    "activities.toml contains an activity with an empty id".to_string(),
                ));
            }
            if !seen.insert(id.to_ascii_lowercase()) {
                return Err(CatalogError::Validation(format!(
                    "activities.toml declares activity `{id}` more than once"
                )));
            }

            let reference = match &entry.reference {
                Some(path) => read_optional(root, path, &id, "reference")?,
                None => None,
            };
            let keywords = match &entry.keywords {
                Some(path) => read_optional(root, path, &id, "keywords")?
                    .map(|raw| parse_keyword_lines(&raw))
                    .unwrap_or_default(),
                None => Vec::new(),
            };

            activities.push(Activity {
                display_name: entry.display_name.unwrap_or_else(|| id.clone()),
                id,
                aliases: entry.aliases,
                reference,
                keywords,
                inject_keywords: entry.inject_keywords,
                allowlist: entry
                    .allowlist
                    .into_iter()
                    .map(|keyword| keyword.trim().to_string())
                    .filter(|keyword| !keyword.is_empty())
                    .collect(),
            });
        }

        let default_activity =
            file.default.map(|id| id.trim().to_string()).filter(|id| !id.is_empty());
        let library = Self { default_activity, activities };

        if let Some(default_id) = &library.default_activity {
            if library.find(default_id).is_none() {
                return Err(CatalogError::Validation(format!(
                    "activities.toml default `{default_id}` is not a declared activity"
                )));
            }
        }

        Ok(library)
    }

    pub fn activities(&self) -> &[Activity] {
        &self.activities
    }

    pub fn default_activity(&self) -> Option<&Activity> {
        self.default_activity.as_deref().and_then(|id| self.find(id))
    }

    /// Looks an activity up by id, display name or alias.
    pub fn find(&self, name: &str) -> Option<&Activity> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        self.activities.iter().find(|activity| activity.answers_to(name))
    }

    /// Explicit ids never fall back to the default, even when unknown.
    pub fn resolve(&self, requested: Option<&str>) -> Option<&Activity> {
        match requested {
            Some(name) => self.find(name),
            None => self.default_activity(),
        }
    }

    /// Union of allowlist keywords across every activity, first occurrence order.
    pub fn allowlist(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.activities
            .iter()
            .flat_map(|activity| activity.allowlist.iter())
            .filter(|keyword| seen.insert(keyword.as_str()))
            .cloned()
            .collect()
    }
}

impl ReferenceProvider for ReferenceLibrary {
    fn get_reference(&self, activity_id: &str) -> Option<String> {
        self.find(activity_id).and_then(|activity| activity.reference.clone())
    }
}

fn read_optional(
    root: &Path,
    relative: &Path,
    activity_id: &str,
    kind: &'static str,
) -> Result<Option<String>, CatalogError> {
    let path = root.join(relative);
    match fs::read_to_string(&path) {
        Ok(raw) => Ok(Some(raw)),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(
                event_name = "catalog.activity.file_missing",
                correlation_id = "bootstrap",
                activity_id,
                kind,
                path = %path.display(),
                "activity file not found; treating it as absent"
            );
            Ok(None)
        }
        Err(source) => Err(CatalogError::ReadFile { path, source }),
    }
}

fn parse_keyword_lines(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}
