use serde::{Deserialize, Serialize};

use crate::ItemKind;

pub const CORE_IDENTITY: &str = "corekey";

/// The item a lifecycle signal refers to. The identity of each variant is
/// what correlates signals that belong to the same logical operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum UpdateTarget {
    Core,
    Plugin { file: String },
    Theme { stylesheet: String },
    Translation { slug: String, language: String },
}

impl UpdateTarget {
    pub fn plugin(file: impl Into<String>) -> Self {
        Self::Plugin { file: file.into() }
    }

    pub fn theme(stylesheet: impl Into<String>) -> Self {
        Self::Theme {
            stylesheet: stylesheet.into(),
        }
    }

    pub fn translation(slug: impl Into<String>, language: impl Into<String>) -> Self {
        Self::Translation {
            slug: slug.into(),
            language: language.into(),
        }
    }

    pub fn kind(&self) -> ItemKind {
        match self {
            Self::Core => ItemKind::Core,
            Self::Plugin { .. } => ItemKind::Plugin,
            Self::Theme { .. } => ItemKind::Theme,
            Self::Translation { .. } => ItemKind::Translation,
        }
    }

    pub fn identity(&self) -> String {
        match self {
            Self::Core => CORE_IDENTITY.to_string(),
            Self::Plugin { file } => file.clone(),
            Self::Theme { stylesheet } => stylesheet.clone(),
            Self::Translation { slug, language } => format!("{slug}_{language}"),
        }
    }

    /// `{kind}:{identity}`, the key shared by the pending buffer, the snapshot
    /// store and the already-logged set.
    pub fn key(&self) -> String {
        format!("{}:{}", self.kind().as_str(), self.identity())
    }

    /// Short display slug: the plugin directory (or file stem for single-file
    /// plugins), the theme stylesheet, the translation slug.
    pub fn slug(&self) -> String {
        match self {
            Self::Core => "core".to_string(),
            Self::Plugin { file } => plugin_slug(file),
            Self::Theme { stylesheet } => stylesheet.clone(),
            Self::Translation { slug, .. } => slug.clone(),
        }
    }

    pub fn default_name(&self) -> String {
        match self {
            Self::Core => "Core".to_string(),
            Self::Plugin { file } => plugin_slug(file),
            Self::Theme { stylesheet } => stylesheet.clone(),
            Self::Translation { slug, language } => format!("{slug} ({language})"),
        }
    }
}

fn plugin_slug(file: &str) -> String {
    let trimmed = file.trim_matches('/');
    match trimmed.split_once('/') {
        Some((dir, _)) => dir.to_string(),
        None => trimmed
            .strip_suffix(".php")
            .unwrap_or(trimmed)
            .to_string(),
    }
}
