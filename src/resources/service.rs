use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::{
    Client, CompanySettings, Descriptif, Entity, Planning, Project, ResourceData, ResourceKind,
    TeamMember,
};
use crate::assets::Document;
use crate::error::SyncError;
use crate::fallback::{local_id, FallbackClient};
use crate::remote::RemoteClient;

pub type ProjectService = CollectionService<Project>;
pub type ClientService = CollectionService<Client>;
pub type TeamMemberService = CollectionService<TeamMember>;

/// A bulk collection (`projectsData`, `clientsData`, ...) behind the fallback client.
pub struct CollectionService<T> {
    kind: ResourceKind,
    remote: RemoteClient,
    fallback: Arc<FallbackClient>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> CollectionService<T> {
    pub fn new(kind: ResourceKind, remote: RemoteClient, fallback: Arc<FallbackClient>) -> Self {
        Self {
            kind,
            remote,
            fallback,
            _marker: PhantomData,
        }
    }

    pub async fn list(&self) -> Result<Vec<T>, SyncError> {
        let path = self.kind.remote_path();
        self.fallback
            .fetch(&self.kind.cache_key(), || self.remote.get::<Vec<T>>(&path))
            .await
    }

    /// Create `item`. Offline, it is kept under a local id and added to the cached list.
    pub async fn create(&self, item: T) -> Result<T, SyncError> {
        let path = self.kind.remote_path();
        let created = self
            .fallback
            .write_merged(
                &self.kind.cache_key(),
                || self.remote.post::<T, T>(&path, &item),
                || {
                    let mut local = item.clone();
                    local.set_id(local_id());
                    local
                },
                upsert::<T>,
            )
            .await?;
        debug!(kind = %self.kind, id = created.id(), "entity created");
        Ok(created)
    }

    pub async fn update(&self, item: T) -> Result<T, SyncError> {
        let path = format!("{}/{}", self.kind.remote_path(), item.id());
        self.fallback
            .write_merged(
                &self.kind.cache_key(),
                || self.remote.put::<T, T>(&path, &item),
                || item.clone(),
                upsert::<T>,
            )
            .await
    }

    pub async fn remove(&self, id: &str) -> Result<(), SyncError> {
        let path = format!("{}/{}", self.kind.remote_path(), id);
        self.fallback
            .delete_from(
                &self.kind.cache_key(),
                || self.remote.delete(&path),
                |mut cached: Vec<T>| {
                    cached.retain(|e| e.id() != id);
                    cached
                },
            )
            .await
    }
}

fn upsert<T: Entity>(cached: Option<Vec<T>>, saved: &T) -> Vec<T> {
    let mut list = cached.unwrap_or_default();
    match list.iter_mut().find(|e| e.id() == saved.id()) {
        Some(slot) => *slot = saved.clone(),
        None => list.push(saved.clone()),
    }
    list
}

/// One document per key: company settings, or a project's planning, descriptif or annotations.
pub struct SingletonService<T> {
    kind: ResourceKind,
    remote: RemoteClient,
    fallback: Arc<FallbackClient>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> SingletonService<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    pub fn new(kind: ResourceKind, remote: RemoteClient, fallback: Arc<FallbackClient>) -> Self {
        Self {
            kind,
            remote,
            fallback,
            _marker: PhantomData,
        }
    }

    pub async fn load(&self) -> Result<T, SyncError> {
        let path = self.kind.remote_path();
        self.fallback
            .fetch(&self.kind.cache_key(), || self.remote.get::<T>(&path))
            .await
    }

    pub async fn save(&self, value: T) -> Result<T, SyncError> {
        let path = self.kind.remote_path();
        self.fallback
            .write(
                &self.kind.cache_key(),
                || self.remote.put::<T, T>(&path, &value),
                || value.clone(),
            )
            .await
    }

    pub async fn clear(&self) -> Result<(), SyncError> {
        let path = self.kind.remote_path();
        self.fallback
            .delete(&self.kind.cache_key(), || self.remote.delete(&path))
            .await
    }
}

/// Load any resource through the fallback client, typed by its kind.
pub async fn fetch_resource(
    kind: &ResourceKind,
    remote: &RemoteClient,
    fallback: &Arc<FallbackClient>,
) -> Result<ResourceData, SyncError> {
    let (k, remote, fallback) = (kind.clone(), remote.clone(), fallback.clone());
    Ok(match kind {
        ResourceKind::Projects => {
            ResourceData::Projects(ProjectService::new(k, remote, fallback).list().await?)
        }
        ResourceKind::Clients => {
            ResourceData::Clients(ClientService::new(k, remote, fallback).list().await?)
        }
        ResourceKind::TeamMembers => {
            ResourceData::TeamMembers(TeamMemberService::new(k, remote, fallback).list().await?)
        }
        ResourceKind::CompanySettings => ResourceData::CompanySettings(
            SingletonService::<CompanySettings>::new(k, remote, fallback)
                .load()
                .await?,
        ),
        ResourceKind::Planning(_) => ResourceData::Planning(
            SingletonService::<Planning>::new(k, remote, fallback)
                .load()
                .await?,
        ),
        ResourceKind::Descriptif(_) => ResourceData::Descriptif(
            SingletonService::<Descriptif>::new(k, remote, fallback)
                .load()
                .await?,
        ),
        ResourceKind::Annotations(_) => ResourceData::Annotations(
            SingletonService::<Vec<Document>>::new(k, remote, fallback)
                .load()
                .await?,
        ),
    })
}
