//! Request lifecycle manager.
//!
//! Creation places one hold per line item; transitions drive the stock side
//! effects planned by [`RequestStatus::plan_transition`]:
//!
//! - `StartPicking`: header only.
//! - `Complete`: consume every hold (one `saida` per hold).
//! - `Cancel`: release every hold (no movement).
//!
//! Each function runs inside the caller's transaction, so any failure leaves
//! no request, item, hold or counter change behind once the caller rolls back.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use pickledger_core::{Actor, ConsultantId, DomainError, DomainResult, ProductId, Quantity, RequestId};
use pickledger_inventory::{Consultant, Movement, Product, Request, RequestItem, RequestStatus, Reservation, Transition};

use crate::reservations;
use crate::storage::LedgerTx;

/// Input for a new request: consultant by code, lines by SKU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRequest {
    pub consultant_code: String,
    pub items: Vec<NewRequestItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRequestItem {
    pub sku: String,
    pub quantity: i64,
}

impl NewRequestItem {
    pub fn new(sku: impl Into<String>, quantity: i64) -> Self {
        Self {
            sku: sku.into(),
            quantity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedRequest {
    pub request: Request,
    pub items: Vec<RequestItem>,
    pub reservations: Vec<Reservation>,
}

/// Result of a status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub request_id: RequestId,
    pub from: RequestStatus,
    pub to: RequestStatus,
    /// `saida` rows written by a completion.
    pub movements: Vec<Movement>,
    /// Holds dropped by a cancellation.
    pub released: Vec<Reservation>,
}

/// A request line enriched with catalog data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestLine {
    pub line_no: u32,
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub quantity: Quantity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDetail {
    pub request: Request,
    pub consultant: Consultant,
    pub lines: Vec<RequestLine>,
    pub reservations: Vec<Reservation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSummary {
    pub request: Request,
    pub consultant_code: String,
    pub consultant_name: String,
    pub item_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFilter {
    pub status: Option<RequestStatus>,
    pub consultant_code: Option<String>,
}

/// Create a request in `aberta` and hold stock for every line.
#[instrument(skip(tx, input), fields(consultant = %input.consultant_code, lines = input.items.len()))]
pub fn create_request<T>(tx: &mut T, input: &NewRequest) -> DomainResult<CreatedRequest>
where
    T: LedgerTx + ?Sized,
{
    let code = input.consultant_code.trim();
    let consultant = tx
        .consultant_by_code(code)?
        .ok_or_else(|| DomainError::not_found(format!("consultant '{code}'")))?;

    let lines = resolve_lines(tx, &input.items)?;

    let request = Request::open(RequestId::new(), consultant.id, tx.now());
    tx.insert_request(request.clone())?;

    let mut items = Vec::with_capacity(lines.len());
    for (idx, (product, quantity)) in lines.iter().enumerate() {
        let item = RequestItem {
            request_id: request.id,
            line_no: idx as u32 + 1,
            product_id: product.id,
            quantity: *quantity,
        };
        tx.insert_request_item(item.clone())?;
        items.push(item);
    }

    // Holds are placed in product-id order to keep row-lock order consistent.
    let mut by_product: Vec<&RequestItem> = items.iter().collect();
    by_product.sort_by_key(|item| item.product_id);
    let mut holds = Vec::with_capacity(by_product.len());
    for item in by_product {
        holds.push(reservations::create_reservation(
            tx,
            request.id,
            item.product_id,
            item.quantity,
        )?);
    }

    info!(request_id = %request.id, holds = holds.len(), "request created");
    Ok(CreatedRequest {
        request,
        items,
        reservations: holds,
    })
}

/// Check quantities then SKUs, reporting every unknown SKU at once.
fn resolve_lines<T>(tx: &T, items: &[NewRequestItem]) -> DomainResult<Vec<(Product, Quantity)>>
where
    T: LedgerTx + ?Sized,
{
    let mut resolved = Vec::with_capacity(items.len());
    let mut missing = BTreeSet::new();
    for item in items {
        let quantity = Quantity::new(item.quantity)
            .map_err(|_| DomainError::validation(format!("quantity for SKU '{}' must be positive", item.sku)))?;
        match tx.product_by_sku(item.sku.trim())? {
            Some(product) => resolved.push((product, quantity)),
            None => {
                missing.insert(item.sku.trim().to_string());
            }
        }
    }
    if !missing.is_empty() {
        let list: Vec<String> = missing.into_iter().collect();
        return Err(DomainError::validation(format!("unknown SKU(s): {}", list.join(", "))));
    }
    Ok(resolved)
}

/// Move a request to `to`, carrying out the stock effect of the transition.
#[instrument(skip(tx, actor), fields(request_id = %request_id, to = %to))]
pub fn transition<T>(tx: &mut T, request_id: RequestId, to: RequestStatus, actor: &Actor) -> DomainResult<TransitionOutcome>
where
    T: LedgerTx + ?Sized,
{
    let mut request = tx
        .lock_request(request_id)?
        .ok_or_else(|| DomainError::not_found(format!("request {request_id}")))?;
    let from = request.status();
    let planned = request.transition(to)?;

    let mut outcome = TransitionOutcome {
        request_id,
        from,
        to,
        movements: Vec::new(),
        released: Vec::new(),
    };
    match planned {
        Transition::StartPicking => {}
        Transition::Complete => {
            outcome.movements = reservations::consume_all_for_request(tx, request_id, actor)?;
        }
        Transition::Cancel => {
            outcome.released = reservations::release_all_for_request(tx, request_id)?;
        }
    }
    tx.update_request(request)?;

    info!(%from, "request transitioned");
    Ok(outcome)
}

/// Like [`transition`], with the target given as text.
///
/// Text that names no status is an `InvalidTransition` from the current one.
pub fn transition_named<T>(tx: &mut T, request_id: RequestId, to: &str, actor: &Actor) -> DomainResult<TransitionOutcome>
where
    T: LedgerTx + ?Sized,
{
    match to.trim().parse::<RequestStatus>() {
        Ok(status) => transition(tx, request_id, status, actor),
        Err(_) => {
            let current = tx
                .request(request_id)?
                .ok_or_else(|| DomainError::not_found(format!("request {request_id}")))?;
            Err(DomainError::invalid_transition(current.status().as_str(), to.trim()))
        }
    }
}

pub fn get_request<T>(tx: &T, request_id: RequestId) -> DomainResult<RequestDetail>
where
    T: LedgerTx + ?Sized,
{
    let request = tx
        .request(request_id)?
        .ok_or_else(|| DomainError::not_found(format!("request {request_id}")))?;
    let consultant = require_consultant(tx, request.consultant_id)?;

    let mut lines = Vec::new();
    for item in tx.request_items(request_id)? {
        let product = tx
            .product(item.product_id)?
            .ok_or_else(|| DomainError::not_found(format!("product {}", item.product_id)))?;
        lines.push(RequestLine {
            line_no: item.line_no,
            product_id: item.product_id,
            sku: product.sku,
            name: product.name,
            quantity: item.quantity,
        });
    }

    Ok(RequestDetail {
        request,
        consultant,
        lines,
        reservations: tx.reservations_for_request(request_id)?,
    })
}

/// Requests matching `filter`, newest first.
pub fn list_requests<T>(tx: &T, filter: &RequestFilter) -> DomainResult<Vec<RequestSummary>>
where
    T: LedgerTx + ?Sized,
{
    let consultant_id = match filter.consultant_code.as_deref() {
        Some(code) => match tx.consultant_by_code(code.trim())? {
            Some(c) => Some(c.id),
            None => return Ok(Vec::new()),
        },
        None => None,
    };

    let mut requests: Vec<Request> = tx
        .requests()?
        .into_iter()
        .filter(|r| filter.status.is_none_or(|s| s == r.status()))
        .filter(|r| consultant_id.is_none_or(|id| id == r.consultant_id))
        .collect();
    requests.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));

    requests
        .into_iter()
        .map(|request| {
            let consultant = require_consultant(tx, request.consultant_id)?;
            let item_count = tx.request_items(request.id)?.len();
            Ok(RequestSummary {
                request,
                consultant_code: consultant.code,
                consultant_name: consultant.name,
                item_count,
            })
        })
        .collect()
}

fn require_consultant<T>(tx: &T, id: ConsultantId) -> DomainResult<Consultant>
where
    T: LedgerTx + ?Sized,
{
    tx.consultant(id)?
        .ok_or_else(|| DomainError::not_found(format!("consultant {id}")))
}
