pub mod service;

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::assets::Document;

/// Every resource the application caches locally.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Projects,
    Clients,
    TeamMembers,
    CompanySettings,
    Planning(String),
    Descriptif(String),
    Annotations(String),
}

impl ResourceKind {
    /// Local cache key. The namespace is shared with existing clients and must not change.
    pub fn cache_key(&self) -> String {
        match self {
            ResourceKind::Projects => "projectsData".to_string(),
            ResourceKind::Clients => "clientsData".to_string(),
            ResourceKind::TeamMembers => "teamMembersData".to_string(),
            ResourceKind::CompanySettings => "companySettingsData".to_string(),
            ResourceKind::Planning(id) => format!("project_{}_planning", id),
            ResourceKind::Descriptif(id) => format!("project_{}_descriptif", id),
            ResourceKind::Annotations(id) => format!("annotations-data-{}", id),
        }
    }

    pub fn remote_path(&self) -> String {
        match self {
            ResourceKind::Projects => "projects".to_string(),
            ResourceKind::Clients => "clients".to_string(),
            ResourceKind::TeamMembers => "team-members".to_string(),
            ResourceKind::CompanySettings => "company-settings".to_string(),
            ResourceKind::Planning(id) => format!("projects/{}/planning", id),
            ResourceKind::Descriptif(id) => format!("projects/{}/descriptif", id),
            ResourceKind::Annotations(id) => format!("projects/{}/annotations", id),
        }
    }

    /// Inverse of [`cache_key`](Self::cache_key).
    pub fn from_cache_key(key: &str) -> Option<Self> {
        match key {
            "projectsData" => return Some(ResourceKind::Projects),
            "clientsData" => return Some(ResourceKind::Clients),
            "teamMembersData" => return Some(ResourceKind::TeamMembers),
            "companySettingsData" => return Some(ResourceKind::CompanySettings),
            _ => {}
        }
        if let Some(id) = key.strip_prefix("annotations-data-") {
            return non_empty(id).map(|id| ResourceKind::Annotations(id.to_string()));
        }
        let rest = key.strip_prefix("project_")?;
        if let Some(id) = rest.strip_suffix("_planning") {
            return non_empty(id).map(|id| ResourceKind::Planning(id.to_string()));
        }
        if let Some(id) = rest.strip_suffix("_descriptif") {
            return non_empty(id).map(|id| ResourceKind::Descriptif(id.to_string()));
        }
        None
    }

    /// Whole-collection caches (`<resource>Data`). Only these may be trimmed to fit.
    pub fn is_bulk(&self) -> bool {
        matches!(
            self,
            ResourceKind::Projects | ResourceKind::Clients | ResourceKind::TeamMembers
        )
    }
}

fn non_empty(s: &str) -> Option<&str> {
    (!s.is_empty()).then_some(s)
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Projects => write!(f, "projects"),
            ResourceKind::Clients => write!(f, "clients"),
            ResourceKind::TeamMembers => write!(f, "team members"),
            ResourceKind::CompanySettings => write!(f, "company settings"),
            ResourceKind::Planning(id) => write!(f, "planning of project {}", id),
            ResourceKind::Descriptif(id) => write!(f, "descriptif of project {}", id),
            ResourceKind::Annotations(id) => write!(f, "annotations of project {}", id),
        }
    }
}

/// An element of a bulk collection.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync {
    fn id(&self) -> &str;
    fn set_id(&mut self, id: String);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMember {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

macro_rules! impl_entity {
    ($($ty:ty),*) => {
        $(impl Entity for $ty {
            fn id(&self) -> &str {
                &self.id
            }

            fn set_id(&mut self, id: String) {
                self.id = id;
            }
        })*
    };
}

impl_entity!(Project, Client, TeamMember);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanySettings {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// May hold an inline image until uploaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Planning {
    #[serde(default)]
    pub tasks: Vec<PlanningTask>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanningTask {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(default)]
    pub progress: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptif {
    #[serde(default)]
    pub lots: Vec<DescriptifLot>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptifLot {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A cached resource with its typed schema.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceData {
    Projects(Vec<Project>),
    Clients(Vec<Client>),
    TeamMembers(Vec<TeamMember>),
    CompanySettings(CompanySettings),
    Planning(Planning),
    Descriptif(Descriptif),
    Annotations(Vec<Document>),
}

impl ResourceData {
    /// Parse a cached JSON string as the schema of `kind`.
    pub fn decode(kind: &ResourceKind, raw: &str) -> serde_json::Result<Self> {
        Ok(match kind {
            ResourceKind::Projects => ResourceData::Projects(serde_json::from_str(raw)?),
            ResourceKind::Clients => ResourceData::Clients(serde_json::from_str(raw)?),
            ResourceKind::TeamMembers => ResourceData::TeamMembers(serde_json::from_str(raw)?),
            ResourceKind::CompanySettings => {
                ResourceData::CompanySettings(serde_json::from_str(raw)?)
            }
            ResourceKind::Planning(_) => ResourceData::Planning(serde_json::from_str(raw)?),
            ResourceKind::Descriptif(_) => ResourceData::Descriptif(serde_json::from_str(raw)?),
            ResourceKind::Annotations(_) => ResourceData::Annotations(serde_json::from_str(raw)?),
        })
    }

    /// One-line human summary.
    pub fn summary(&self) -> String {
        match self {
            ResourceData::Projects(items) => format!("{} project(s)", items.len()),
            ResourceData::Clients(items) => format!("{} client(s)", items.len()),
            ResourceData::TeamMembers(items) => format!("{} team member(s)", items.len()),
            ResourceData::CompanySettings(settings) => {
                format!("company settings for '{}'", settings.name)
            }
            ResourceData::Planning(planning) => format!("{} planning task(s)", planning.tasks.len()),
            ResourceData::Descriptif(descriptif) => {
                format!("{} descriptif lot(s)", descriptif.lots.len())
            }
            ResourceData::Annotations(docs) => {
                let annotations: usize = docs.iter().map(|d| d.annotations.len()).sum();
                format!("{} document(s), {} annotation(s)", docs.len(), annotations)
            }
        }
    }
}
