//! Append-only audit records of on-hand changes.

use core::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use pickledger_core::{Actor, DomainError, Entity, MovementId, ProductId, Quantity, RequestId};

/// What kind of on-hand change a movement documents.
///
/// Each variant carries only the fields that make sense for it: a restock is
/// never attributed to a request, an outbound movement may be.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tipo", rename_all = "lowercase")]
pub enum MovementKind {
    /// Inbound restock.
    Entrada,
    /// Outbound consumption, optionally on behalf of a request.
    Saida { request_id: Option<RequestId> },
}

/// Kind discriminant without payload, used for filtering.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementType {
    Entrada,
    Saida,
}

impl MovementType {
    pub fn as_str(self) -> &'static str {
        match self {
            MovementType::Entrada => "entrada",
            MovementType::Saida => "saida",
        }
    }
}

impl FromStr for MovementType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "entrada" => Ok(MovementType::Entrada),
            "saida" => Ok(MovementType::Saida),
            other => Err(DomainError::validation(format!("unknown movement type '{other}'"))),
        }
    }
}

/// One audit row. Never updated or deleted once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub id: MovementId,
    pub product_id: ProductId,
    pub quantity: Quantity,
    #[serde(flatten)]
    pub kind: MovementKind,
    pub actor: Actor,
    pub created_at: DateTime<Utc>,
}

impl Movement {
    pub fn entrada(product_id: ProductId, quantity: Quantity, actor: Actor, at: DateTime<Utc>) -> Self {
        Self {
            id: MovementId::new(),
            product_id,
            quantity,
            kind: MovementKind::Entrada,
            actor,
            created_at: at,
        }
    }

    pub fn saida(
        product_id: ProductId,
        quantity: Quantity,
        request_id: Option<RequestId>,
        actor: Actor,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MovementId::new(),
            product_id,
            quantity,
            kind: MovementKind::Saida { request_id },
            actor,
            created_at: at,
        }
    }

    pub fn movement_type(&self) -> MovementType {
        match self.kind {
            MovementKind::Entrada => MovementType::Entrada,
            MovementKind::Saida { .. } => MovementType::Saida,
        }
    }

    pub fn request_id(&self) -> Option<RequestId> {
        match self.kind {
            MovementKind::Entrada => None,
            MovementKind::Saida { request_id } => request_id,
        }
    }

    /// Effect on `on_hand`: positive for entradas, negative for saidas.
    pub fn signed_delta(&self) -> i64 {
        match self.kind {
            MovementKind::Entrada => self.quantity.get(),
            MovementKind::Saida { .. } => -self.quantity.get(),
        }
    }
}

impl Entity for Movement {
    type Id = MovementId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Conjunctive filter over the movement log. `None` fields match everything.
///
/// Date bounds are whole days, inclusive on both ends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementFilter {
    pub movement_type: Option<MovementType>,
    pub product_id: Option<ProductId>,
    pub request_id: Option<RequestId>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl MovementFilter {
    pub fn matches(&self, movement: &Movement) -> bool {
        if self.movement_type.is_some_and(|t| t != movement.movement_type()) {
            return false;
        }
        if self.product_id.is_some_and(|p| p != movement.product_id) {
            return false;
        }
        if self.request_id.is_some() && self.request_id != movement.request_id() {
            return false;
        }
        let day = movement.created_at.date_naive();
        if self.from.is_some_and(|from| day < from) {
            return false;
        }
        if self.to.is_some_and(|to| day > to) {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn q(v: i64) -> Quantity {
        Quantity::new(v).unwrap()
    }

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn entrada_has_no_request_and_positive_delta() {
        let m = Movement::entrada(ProductId::new(), q(5), Actor::system(), Utc::now());
        assert_eq!(m.movement_type(), MovementType::Entrada);
        assert_eq!(m.request_id(), None);
        assert_eq!(m.signed_delta(), 5);
    }

    #[test]
    fn saida_carries_request_and_negative_delta() {
        let request_id = RequestId::new();
        let m = Movement::saida(ProductId::new(), q(4), Some(request_id), Actor::new("Ana"), Utc::now());
        assert_eq!(m.request_id(), Some(request_id));
        assert_eq!(m.signed_delta(), -4);
    }

    #[test]
    fn serialized_movement_is_tagged_by_kind() {
        let m = Movement::saida(ProductId::new(), q(2), None, Actor::system(), Utc::now());
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["tipo"], "saida");
        assert_eq!(json["quantity"], 2);
        let back: Movement = serde_json::from_value(json).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn filter_combines_type_and_inclusive_date_range() {
        let product_id = ProductId::new();
        let inside = Movement::entrada(product_id, q(1), Actor::system(), at(2025, 3, 10));
        let edge = Movement::entrada(product_id, q(1), Actor::system(), at(2025, 3, 12));
        let outside = Movement::entrada(product_id, q(1), Actor::system(), at(2025, 3, 13));
        let saida = Movement::saida(product_id, q(1), None, Actor::system(), at(2025, 3, 11));

        let filter = MovementFilter {
            movement_type: Some(MovementType::Entrada),
            from: NaiveDate::from_ymd_opt(2025, 3, 10),
            to: NaiveDate::from_ymd_opt(2025, 3, 12),
            ..MovementFilter::default()
        };

        assert!(filter.matches(&inside));
        assert!(filter.matches(&edge));
        assert!(!filter.matches(&outside));
        assert!(!filter.matches(&saida));
    }

    #[test]
    fn request_filter_excludes_entradas() {
        let request_id = RequestId::new();
        let filter = MovementFilter {
            request_id: Some(request_id),
            ..MovementFilter::default()
        };
        let entrada = Movement::entrada(ProductId::new(), q(1), Actor::system(), Utc::now());
        let saida = Movement::saida(ProductId::new(), q(1), Some(request_id), Actor::system(), Utc::now());
        assert!(!filter.matches(&entrada));
        assert!(filter.matches(&saida));
    }

    #[test]
    fn unknown_movement_type_text_is_rejected() {
        assert_eq!("saida".parse::<MovementType>().unwrap(), MovementType::Saida);
        assert!("ajuste".parse::<MovementType>().is_err());
    }
}
