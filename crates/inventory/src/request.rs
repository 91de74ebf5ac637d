//! Pick requests and their lifecycle state machine.
//!
//! ```text
//! aberta ──► separacao ──► concluida
//!   │            │
//!   ├────────────┴───────► cancelada
//!   └────────────────────► concluida
//! ```
//!
//! `concluida` and `cancelada` are terminal. Planning a transition is pure; the
//! stock side effects of each [`Transition`] are carried out by the caller.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pickledger_core::{ConsultantId, DomainError, DomainResult, Entity, ProductId, Quantity, RequestId};

/// Request status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Aberta,
    Separacao,
    Concluida,
    Cancelada,
}

/// A permitted status change and the stock effect it implies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transition {
    /// `aberta -> separacao`: no stock effect, holds already exist.
    StartPicking,
    /// `-> concluida`: consume every hold.
    Complete,
    /// `-> cancelada`: release every hold.
    Cancel,
}

impl Transition {
    pub fn target(self) -> RequestStatus {
        match self {
            Transition::StartPicking => RequestStatus::Separacao,
            Transition::Complete => RequestStatus::Concluida,
            Transition::Cancel => RequestStatus::Cancelada,
        }
    }
}

impl RequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Aberta => "aberta",
            RequestStatus::Separacao => "separacao",
            RequestStatus::Concluida => "concluida",
            RequestStatus::Cancelada => "cancelada",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Concluida | RequestStatus::Cancelada)
    }

    /// Decide whether `self -> to` is allowed and which effect it carries.
    pub fn plan_transition(self, to: RequestStatus) -> DomainResult<Transition> {
        use RequestStatus::*;

        match (self, to) {
            (Aberta, Separacao) => Ok(Transition::StartPicking),
            (Aberta | Separacao, Concluida) => Ok(Transition::Complete),
            (Aberta | Separacao, Cancelada) => Ok(Transition::Cancel),
            (from, to) => Err(DomainError::invalid_transition(from.as_str(), to.as_str())),
        }
    }
}

impl core::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aberta" => Ok(RequestStatus::Aberta),
            "separacao" => Ok(RequestStatus::Separacao),
            "concluida" => Ok(RequestStatus::Concluida),
            "cancelada" => Ok(RequestStatus::Cancelada),
            other => Err(DomainError::validation(format!("unknown request status '{other}'"))),
        }
    }
}

/// Request header. `status` is the only field that changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub consultant_id: ConsultantId,
    status: RequestStatus,
    pub created_at: DateTime<Utc>,
}

impl Request {
    /// A new request, always in `aberta`.
    pub fn open(id: RequestId, consultant_id: ConsultantId, at: DateTime<Utc>) -> Self {
        Self {
            id,
            consultant_id,
            status: RequestStatus::Aberta,
            created_at: at,
        }
    }

    pub fn status(&self) -> RequestStatus {
        self.status
    }

    /// Plan and apply a status change to the header.
    pub fn transition(&mut self, to: RequestStatus) -> DomainResult<Transition> {
        let transition = self.status.plan_transition(to)?;
        self.status = transition.target();
        Ok(transition)
    }
}

impl Entity for Request {
    type Id = RequestId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Request line: product and quantity asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestItem {
    pub request_id: RequestId,
    pub line_no: u32,
    pub product_id: ProductId,
    pub quantity: Quantity,
}
