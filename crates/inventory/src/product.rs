use serde::{Deserialize, Serialize};

use pickledger_core::{ConsultantId, DomainError, DomainResult, Entity, ProductId};

/// Catalog product. Owned by the external catalog; the ledger only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub sku: String,
    pub name: String,
    pub unit: String,
}

impl Product {
    pub const DEFAULT_UNIT: &'static str = "UN";

    pub fn new(id: ProductId, sku: impl Into<String>, name: impl Into<String>) -> DomainResult<Self> {
        let sku = sku.into().trim().to_string();
        let name = name.into().trim().to_string();
        if sku.is_empty() {
            return Err(DomainError::validation("sku cannot be empty"));
        }
        if name.is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        Ok(Self {
            id,
            sku,
            name,
            unit: Self::DEFAULT_UNIT.to_string(),
        })
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        let unit = unit.into();
        if !unit.trim().is_empty() {
            self.unit = unit.trim().to_string();
        }
        self
    }
}

impl Entity for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Field consultant a pick request is placed on behalf of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consultant {
    pub id: ConsultantId,
    pub code: String,
    pub name: String,
}

impl Consultant {
    pub fn new(id: ConsultantId, code: impl Into<String>, name: impl Into<String>) -> DomainResult<Self> {
        let code = code.into().trim().to_string();
        if code.is_empty() {
            return Err(DomainError::validation("consultant code cannot be empty"));
        }
        Ok(Self {
            id,
            code,
            name: name.into(),
        })
    }
}

impl Entity for Consultant {
    type Id = ConsultantId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
