//! # Reference Resolver
//!
//! Checks foreign identifiers before any write that embeds them.
//!
//! A reference resolves when the target exists and, for models, is not
//! soft-deleted. Every failure is `VaultError::Reference` naming the kind
//! and the offending id.

use crate::entities::{
    Comparison, Document, ExplainabilityAnalysis, FairnessAnalysis, Model, User,
};
use crate::store::{DocumentBackend, EntityStore};
use crate::{ModelId, UserId, Versioned, VaultError};

/// Read-only view of the store used to validate references.
pub struct ReferenceResolver<'a, B> {
    store: &'a EntityStore<B>,
}

impl<'a, B: DocumentBackend> ReferenceResolver<'a, B> {
    pub fn new(store: &'a EntityStore<B>) -> Self {
        Self { store }
    }

    /// Resolve any document kind by id.
    pub fn resolve<T: Document>(&self, id: &str) -> Result<Versioned<T>, VaultError> {
        self.store
            .get::<T>(id)?
            .ok_or_else(|| VaultError::reference(T::KIND, id))
    }

    pub fn resolve_user(&self, id: &UserId) -> Result<Versioned<User>, VaultError> {
        self.resolve(id.as_str())
    }

    /// Resolve a live model. Soft-deleted models do not resolve.
    pub fn resolve_model(&self, id: &ModelId) -> Result<Versioned<Model>, VaultError> {
        let model = self.resolve::<Model>(id.as_str())?;
        if model.value.is_deleted() {
            return Err(VaultError::reference(Model::KIND, id.as_str()));
        }
        Ok(model)
    }

    /// Resolve every id in one pass. The first failure aborts.
    pub fn resolve_models(&self, ids: &[ModelId]) -> Result<Vec<Versioned<Model>>, VaultError> {
        let mut models = Vec::with_capacity(ids.len());
        for id in ids {
            match self.resolve_model(id) {
                Ok(model) => models.push(model),
                Err(e) => {
                    tracing::debug!(model = %id, error = %e, "model reference did not resolve");
                    return Err(e);
                }
            }
        }
        Ok(models)
    }

    pub fn resolve_comparison(&self, id: &str) -> Result<Versioned<Comparison>, VaultError> {
        self.resolve(id)
    }

    pub fn resolve_explainability(&self, id: &str) -> Result<Versioned<ExplainabilityAnalysis>, VaultError> {
        self.resolve(id)
    }

    pub fn resolve_fairness(&self, id: &str) -> Result<Versioned<FairnessAnalysis>, VaultError> {
        self.resolve(id)
    }
}
