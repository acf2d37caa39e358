//! Subject and provider lookups consumed by the booking engine.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageError;
use crate::models::TenantId;

/// The entity receiving the service, and who owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub owner_id: Uuid,
    pub name: String,
}

/// Identity lookups. Both are scoped to a tenant.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn find_subject(&self, scope: TenantId, id: Uuid) -> Result<Option<Subject>, StorageError>;

    async fn provider_exists(&self, scope: TenantId, id: Uuid) -> Result<bool, StorageError>;
}

#[derive(Default)]
pub struct InMemoryDirectory {
    subjects: RwLock<HashMap<Uuid, Subject>>,
    providers: RwLock<HashMap<Uuid, TenantId>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_subject(&self, subject: Subject) {
        self.subjects.write().insert(subject.id, subject);
    }

    pub fn add_provider(&self, scope: TenantId, provider_id: Uuid) {
        self.providers.write().insert(provider_id, scope);
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn find_subject(&self, scope: TenantId, id: Uuid) -> Result<Option<Subject>, StorageError> {
        Ok(self
            .subjects
            .read()
            .get(&id)
            .filter(|s| s.tenant_id == scope)
            .cloned())
    }

    async fn provider_exists(&self, scope: TenantId, id: Uuid) -> Result<bool, StorageError> {
        Ok(self.providers.read().get(&id) == Some(&scope))
    }
}
