//! Advisor catalog.
//!
//! An advisor is a named photographer persona whose prompt style and
//! reference portfolio drive critique generation. The catalog is loaded from
//! a YAML file when `CRITIQUE_ADVISORS_FILE` is set, otherwise the built-in
//! set is used.
//!
//! ```yaml
//! advisors:
//!   - id: ansel_adams
//!     name: Ansel Adams
//!     persona: You are Ansel Adams ...
//!     focus_areas: [zone_system, large_format]
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};

/// A critique persona.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advisor {
    pub id: String,
    pub name: String,
    /// Base prompt used as the persona voice for both passes.
    pub persona: String,
    /// Techniques this advisor is known for; used as prompt hints.
    #[serde(default)]
    pub focus_areas: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    advisors: Vec<Advisor>,
}

/// Set of known advisors, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct AdvisorCatalog {
    advisors: BTreeMap<String, Advisor>,
}

impl AdvisorCatalog {
    /// Build a catalog from a list, rejecting blank or duplicate ids.
    pub fn new(advisors: Vec<Advisor>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for advisor in advisors {
            if advisor.id.trim().is_empty() {
                return Err(Error::Config("advisor id must not be empty".into()));
            }
            if advisor.persona.trim().is_empty() {
                return Err(Error::Config(format!(
                    "advisor '{}' has an empty persona",
                    advisor.id
                )));
            }
            let id = advisor.id.clone();
            if map.insert(id.clone(), advisor).is_some() {
                return Err(Error::Config(format!("duplicate advisor id '{}'", id)));
            }
        }
        Ok(Self { advisors: map })
    }

    /// Parse a YAML catalog.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let file: CatalogFile = serde_yaml::from_str(yaml)?;
        Self::new(file.advisors)
    }

    /// Load a YAML catalog from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let catalog = Self::from_yaml_str(&text)?;
        info!(
            path = %path.as_ref().display(),
            advisors = catalog.len(),
            "Loaded advisor catalog"
        );
        Ok(catalog)
    }

    /// Catalog from `CRITIQUE_ADVISORS_FILE`, or the built-in set.
    pub fn from_env() -> Result<Self> {
        match std::env::var(crate::defaults::ENV_ADVISORS_FILE) {
            Ok(path) if !path.trim().is_empty() => Self::load(path),
            _ => Ok(Self::builtin()),
        }
    }

    /// Built-in advisors.
    pub fn builtin() -> Self {
        let advisors = vec![
            Advisor {
                id: "ansel_adams".into(),
                name: "Ansel Adams".into(),
                persona: "You are Ansel Adams, master of landscape photography and co-creator \
                          of the Zone System. You judge tonal range, previsualization, and the \
                          grandeur of light on land. You speak plainly and demand technical \
                          discipline in service of expression."
                    .into(),
                focus_areas: vec![
                    "zone_system".into(),
                    "large_format".into(),
                    "tonal_range".into(),
                ],
            },
            Advisor {
                id: "henri_cartier_bresson".into(),
                name: "Henri Cartier-Bresson".into(),
                persona: "You are Henri Cartier-Bresson, who defined the decisive moment. You \
                          look for geometry, timing, and the quiet alignment of head, eye, and \
                          heart. You dislike cropping and artifice."
                    .into(),
                focus_areas: vec![
                    "decisive_moment".into(),
                    "geometry".into(),
                    "street".into(),
                ],
            },
            Advisor {
                id: "dorothea_lange".into(),
                name: "Dorothea Lange".into(),
                persona: "You are Dorothea Lange, documentary photographer. You value empathy, \
                          honesty, and the dignity of the subject above polish, and you ask \
                          what a photograph tells us about people and their circumstances."
                    .into(),
                focus_areas: vec!["documentary".into(), "portraiture".into()],
            },
        ];
        // Built-in ids are unique and personas non-empty.
        let mut map = BTreeMap::new();
        for advisor in advisors {
            map.insert(advisor.id.clone(), advisor);
        }
        Self { advisors: map }
    }

    pub fn get(&self, id: &str) -> Option<&Advisor> {
        self.advisors.get(id)
    }

    /// Look up an advisor, failing with a validation error when unknown.
    pub fn require(&self, id: &str) -> Result<&Advisor> {
        self.get(id)
            .ok_or_else(|| Error::Validation(format!("unknown advisor '{}'", id)))
    }

    pub fn list(&self) -> impl Iterator<Item = &Advisor> {
        self.advisors.values()
    }

    pub fn len(&self) -> usize {
        self.advisors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.advisors.is_empty()
    }
}
