use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pickledger_core::{Entity, ProductId, Quantity, RequestId, ReservationId};

/// A live hold of `quantity` units of one product for one request.
///
/// Exists only while the hold does: deleted on release or consumption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub request_id: RequestId,
    pub product_id: ProductId,
    pub quantity: Quantity,
    pub created_at: DateTime<Utc>,
}

impl Reservation {
    pub fn new(request_id: RequestId, product_id: ProductId, quantity: Quantity, at: DateTime<Utc>) -> Self {
        Self {
            id: ReservationId::new(),
            request_id,
            product_id,
            quantity,
            created_at: at,
        }
    }
}

impl Entity for Reservation {
    type Id = ReservationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
