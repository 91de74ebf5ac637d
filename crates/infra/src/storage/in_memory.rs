use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock, RwLockReadGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use pickledger_core::{ConsultantId, DomainError, DomainResult, ProductId, RequestId, ReservationId, index_by_id};
use pickledger_inventory::{Consultant, Movement, Product, Request, RequestItem, Reservation, StockRecord};

use super::{Catalog, LedgerStore, LedgerTx, Transaction};

/// Lockable row identity.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
enum RowKey {
    Stock(ProductId),
    Request(RequestId),
}

#[derive(Debug, Default)]
struct Tables {
    products: HashMap<ProductId, Product>,
    consultants: HashMap<ConsultantId, Consultant>,
    stock: HashMap<ProductId, StockRecord>,
    reservations: BTreeMap<ReservationId, Reservation>,
    movements: Vec<Movement>,
    requests: HashMap<RequestId, Request>,
    items: HashMap<RequestId, Vec<RequestItem>>,
}

#[derive(Debug)]
struct Shared {
    tables: RwLock<Tables>,
    /// Row key -> id of the transaction holding it.
    row_locks: Mutex<HashMap<RowKey, u64>>,
    row_released: Condvar,
    lock_timeout: Duration,
    next_tx: AtomicU64,
}

fn poisoned() -> DomainError {
    DomainError::transient("storage lock poisoned")
}

impl Shared {
    fn acquire(&self, key: RowKey, tx_id: u64) -> DomainResult<()> {
        let deadline = Instant::now() + self.lock_timeout;
        let mut held = self.row_locks.lock().map_err(|_| poisoned())?;

        loop {
            match held.get(&key).copied() {
                None => {
                    held.insert(key, tx_id);
                    return Ok(());
                }
                Some(owner) if owner == tx_id => return Ok(()),
                Some(owner) => {
                    let now = Instant::now();
                    if now >= deadline {
                        warn!(?key, tx_id, owner, "row lock wait timed out");
                        return Err(DomainError::transient(format!(
                            "lock wait timeout on {key:?} after {:?}",
                            self.lock_timeout
                        )));
                    }
                    debug!(?key, tx_id, owner, "waiting for row lock");
                    let (guard, _) = self
                        .row_released
                        .wait_timeout(held, deadline - now)
                        .map_err(|_| poisoned())?;
                    held = guard;
                }
            }
        }
    }

    fn release(&self, tx_id: u64, keys: &HashSet<RowKey>) {
        if keys.is_empty() {
            return;
        }
        let mut held = match self.row_locks.lock() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        };
        for key in keys {
            if held.get(key) == Some(&tx_id) {
                held.remove(key);
            }
        }
        drop(held);
        self.row_released.notify_all();
    }
}

/// In-memory transactional ledger store.
///
/// Intended for tests/dev and as the reference engine for the locking
/// contract documented on [`LedgerTx`]. Each transaction buffers its writes
/// and applies them under one write lock on commit, so readers see either
/// none or all of a transaction's effects.
#[derive(Debug, Clone)]
pub struct InMemoryLedgerStore {
    shared: Arc<Shared>,
}

impl InMemoryLedgerStore {
    pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(2_000);

    pub fn new() -> Self {
        Self::with_lock_timeout(Self::DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: RwLock::new(Tables::default()),
                row_locks: Mutex::new(HashMap::new()),
                row_released: Condvar::new(),
                lock_timeout,
                next_tx: AtomicU64::new(1),
            }),
        }
    }

    /// Load a product on behalf of the external catalog owner.
    pub fn register_product(&self, product: Product) -> DomainResult<()> {
        let mut tables = self.shared.tables.write().map_err(|_| poisoned())?;
        if tables
            .products
            .values()
            .any(|p| p.sku == product.sku && p.id != product.id)
        {
            return Err(DomainError::conflict(format!("sku '{}' already registered", product.sku)));
        }
        tables.products.insert(product.id, product);
        Ok(())
    }

    /// Load a consultant on behalf of the external owner.
    pub fn register_consultant(&self, consultant: Consultant) -> DomainResult<()> {
        let mut tables = self.shared.tables.write().map_err(|_| poisoned())?;
        if tables
            .consultants
            .values()
            .any(|c| c.code == consultant.code && c.id != consultant.id)
        {
            return Err(DomainError::conflict(format!(
                "consultant code '{}' already registered",
                consultant.code
            )));
        }
        tables.consultants.insert(consultant.id, consultant);
        Ok(())
    }
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerStore for InMemoryLedgerStore {
    type Tx = InMemoryTx;

    fn begin(&self) -> DomainResult<InMemoryTx> {
        let id = self.shared.next_tx.fetch_add(1, Ordering::Relaxed);
        Ok(InMemoryTx {
            shared: Arc::clone(&self.shared),
            id,
            started_at: Utc::now(),
            held: HashSet::new(),
            writes: WriteSet::default(),
        })
    }
}

#[derive(Debug, Default)]
struct WriteSet {
    stock: HashMap<ProductId, StockRecord>,
    inserted_reservations: BTreeMap<ReservationId, Reservation>,
    deleted_reservations: HashSet<ReservationId>,
    movements: Vec<Movement>,
    requests: HashMap<RequestId, Request>,
    items: Vec<RequestItem>,
}

/// Transaction over an [`InMemoryLedgerStore`].
///
/// Row locks are released when the transaction is dropped, committed or not.
#[derive(Debug)]
pub struct InMemoryTx {
    shared: Arc<Shared>,
    id: u64,
    started_at: DateTime<Utc>,
    held: HashSet<RowKey>,
    writes: WriteSet,
}

impl InMemoryTx {
    fn tables(&self) -> DomainResult<RwLockReadGuard<'_, Tables>> {
        self.shared.tables.read().map_err(|_| poisoned())
    }

    fn lock_row(&mut self, key: RowKey) -> DomainResult<()> {
        if self.held.contains(&key) {
            return Ok(());
        }
        self.shared.acquire(key, self.id)?;
        self.held.insert(key);
        Ok(())
    }

    fn require_lock(&self, key: RowKey) -> DomainResult<()> {
        if self.held.contains(&key) {
            Ok(())
        } else {
            Err(DomainError::invariant(format!("write to {key:?} without holding its row lock")))
        }
    }

    fn reservation_exists(&self, id: ReservationId) -> DomainResult<bool> {
        Ok(self.reservation(id)?.is_some())
    }
}

impl Drop for InMemoryTx {
    fn drop(&mut self) {
        self.shared.release(self.id, &self.held);
    }
}

impl Catalog for InMemoryTx {
    fn product(&self, id: ProductId) -> DomainResult<Option<Product>> {
        Ok(self.tables()?.products.get(&id).cloned())
    }

    fn product_by_sku(&self, sku: &str) -> DomainResult<Option<Product>> {
        Ok(self.tables()?.products.values().find(|p| p.sku == sku).cloned())
    }

    fn products(&self) -> DomainResult<Vec<Product>> {
        let mut products: Vec<Product> = self.tables()?.products.values().cloned().collect();
        products.sort_by(|a, b| a.sku.cmp(&b.sku));
        Ok(products)
    }

    fn consultant(&self, id: ConsultantId) -> DomainResult<Option<Consultant>> {
        Ok(self.tables()?.consultants.get(&id).cloned())
    }

    fn consultant_by_code(&self, code: &str) -> DomainResult<Option<Consultant>> {
        Ok(self.tables()?.consultants.values().find(|c| c.code == code).cloned())
    }
}

impl LedgerTx for InMemoryTx {
    fn now(&self) -> DateTime<Utc> {
        self.started_at
    }

    fn stock_record(&self, product_id: ProductId) -> DomainResult<Option<StockRecord>> {
        if let Some(record) = self.writes.stock.get(&product_id) {
            return Ok(Some(record.clone()));
        }
        Ok(self.tables()?.stock.get(&product_id).cloned())
    }

    fn lock_stock_record(&mut self, product_id: ProductId) -> DomainResult<Option<StockRecord>> {
        self.lock_row(RowKey::Stock(product_id))?;
        self.stock_record(product_id)
    }

    fn put_stock_record(&mut self, record: StockRecord) -> DomainResult<()> {
        self.require_lock(RowKey::Stock(record.product_id()))?;
        self.writes.stock.insert(record.product_id(), record);
        Ok(())
    }

    fn insert_reservation(&mut self, reservation: Reservation) -> DomainResult<()> {
        if self.reservation_exists(reservation.id)? {
            return Err(DomainError::conflict(format!(
                "reservation {} already exists",
                reservation.id
            )));
        }
        self.writes
            .inserted_reservations
            .insert(reservation.id, reservation);
        Ok(())
    }

    fn delete_reservation(&mut self, id: ReservationId) -> DomainResult<()> {
        if self.writes.inserted_reservations.remove(&id).is_some() {
            return Ok(());
        }
        if !self.reservation_exists(id)? {
            return Err(DomainError::not_found(format!("reservation {id}")));
        }
        self.writes.deleted_reservations.insert(id);
        Ok(())
    }

    fn reservation(&self, id: ReservationId) -> DomainResult<Option<Reservation>> {
        if let Some(reservation) = self.writes.inserted_reservations.get(&id) {
            return Ok(Some(reservation.clone()));
        }
        if self.writes.deleted_reservations.contains(&id) {
            return Ok(None);
        }
        Ok(self.tables()?.reservations.get(&id).cloned())
    }

    fn reservations_for_request(&self, request_id: RequestId) -> DomainResult<Vec<Reservation>> {
        Ok(self
            .reservations()?
            .into_iter()
            .filter(|r| r.request_id == request_id)
            .collect())
    }

    fn reservations(&self) -> DomainResult<Vec<Reservation>> {
        let tables = self.tables()?;
        let committed = tables
            .reservations
            .values()
            .filter(|r| !self.writes.deleted_reservations.contains(&r.id));
        let merged = index_by_id(
            committed
                .chain(self.writes.inserted_reservations.values())
                .cloned(),
        );
        Ok(merged.into_values().collect())
    }

    fn append_movement(&mut self, movement: Movement) -> DomainResult<()> {
        self.writes.movements.push(movement);
        Ok(())
    }

    fn movements(&self) -> DomainResult<Vec<Movement>> {
        let mut movements = self.tables()?.movements.clone();
        movements.extend(self.writes.movements.iter().cloned());
        Ok(movements)
    }

    fn insert_request(&mut self, request: Request) -> DomainResult<()> {
        if self.request(request.id)?.is_some() {
            return Err(DomainError::conflict(format!("request {} already exists", request.id)));
        }
        self.lock_row(RowKey::Request(request.id))?;
        self.writes.requests.insert(request.id, request);
        Ok(())
    }

    fn insert_request_item(&mut self, item: RequestItem) -> DomainResult<()> {
        self.require_lock(RowKey::Request(item.request_id))?;
        if self.request(item.request_id)?.is_none() {
            return Err(DomainError::not_found(format!("request {}", item.request_id)));
        }
        self.writes.items.push(item);
        Ok(())
    }

    fn request(&self, id: RequestId) -> DomainResult<Option<Request>> {
        if let Some(request) = self.writes.requests.get(&id) {
            return Ok(Some(request.clone()));
        }
        Ok(self.tables()?.requests.get(&id).cloned())
    }

    fn lock_request(&mut self, id: RequestId) -> DomainResult<Option<Request>> {
        self.lock_row(RowKey::Request(id))?;
        self.request(id)
    }

    fn update_request(&mut self, request: Request) -> DomainResult<()> {
        self.require_lock(RowKey::Request(request.id))?;
        let current = self
            .request(request.id)?
            .ok_or_else(|| DomainError::not_found(format!("request {}", request.id)))?;
        if current.consultant_id != request.consultant_id || current.created_at != request.created_at {
            return Err(DomainError::invariant(format!(
                "request {} may only change its status",
                request.id
            )));
        }
        self.writes.requests.insert(request.id, request);
        Ok(())
    }

    fn requests(&self) -> DomainResult<Vec<Request>> {
        let tables = self.tables()?;
        let merged = index_by_id(
            tables
                .requests
                .values()
                .chain(self.writes.requests.values())
                .cloned(),
        );
        let mut requests: Vec<Request> = merged.into_values().collect();
        requests.sort_by_key(|r| (r.created_at, r.id));
        Ok(requests)
    }

    fn request_items(&self, request_id: RequestId) -> DomainResult<Vec<RequestItem>> {
        let mut items: Vec<RequestItem> = self
            .tables()?
            .items
            .get(&request_id)
            .cloned()
            .unwrap_or_default();
        items.extend(
            self.writes
                .items
                .iter()
                .filter(|i| i.request_id == request_id)
                .cloned(),
        );
        items.sort_by_key(|i| i.line_no);
        Ok(items)
    }
}

impl Transaction for InMemoryTx {
    fn commit(mut self) -> DomainResult<()> {
        let writes = std::mem::take(&mut self.writes);
        let mut tables = self.shared.tables.write().map_err(|_| poisoned())?;

        for (product_id, record) in writes.stock {
            tables.stock.insert(product_id, record);
        }
        for id in writes.deleted_reservations {
            tables.reservations.remove(&id);
        }
        tables.reservations.extend(writes.inserted_reservations);
        tables.movements.extend(writes.movements);
        for (id, request) in writes.requests {
            tables.requests.insert(id, request);
        }
        for item in writes.items {
            tables.items.entry(item.request_id).or_default().push(item);
        }

        drop(tables);
        debug!(tx_id = self.id, rows_locked = self.held.len(), "transaction committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pickledger_core::{Actor, Quantity};
    use std::sync::mpsc;
    use std::thread;

    fn store_with_product() -> (InMemoryLedgerStore, ProductId) {
        let store = InMemoryLedgerStore::with_lock_timeout(Duration::from_millis(100));
        let product = Product::new(ProductId::new(), "SKU-1", "Batom").unwrap();
        let id = product.id;
        store.register_product(product).unwrap();
        (store, id)
    }

    fn seed_stock(store: &InMemoryLedgerStore, product_id: ProductId, on_hand: i64) {
        let mut tx = store.begin().unwrap();
        tx.lock_stock_record(product_id).unwrap();
        let record = StockRecord::with_on_hand(product_id, on_hand, tx.now()).unwrap();
        tx.put_stock_record(record).unwrap();
        tx.commit().unwrap();
    }

    #[test]
    fn committed_writes_become_visible_to_new_transactions() {
        let (store, product_id) = store_with_product();
        seed_stock(&store, product_id, 10);

        let tx = store.begin().unwrap();
        assert_eq!(tx.stock_record(product_id).unwrap().unwrap().on_hand(), 10);
    }

    #[test]
    fn dropped_transaction_rolls_back_every_write() {
        let (store, product_id) = store_with_product();
        {
            let mut tx = store.begin().unwrap();
            tx.lock_stock_record(product_id).unwrap();
            tx.put_stock_record(StockRecord::empty(product_id, tx.now())).unwrap();
            tx.append_movement(Movement::entrada(
                product_id,
                Quantity::new(1).unwrap(),
                Actor::system(),
                tx.now(),
            ))
            .unwrap();
        }

        let tx = store.begin().unwrap();
        assert!(tx.stock_record(product_id).unwrap().is_none());
        assert!(tx.movements().unwrap().is_empty());
    }

    #[test]
    fn writing_without_the_row_lock_is_refused() {
        let (store, product_id) = store_with_product();
        let mut tx = store.begin().unwrap();
        let err = tx
            .put_stock_record(StockRecord::empty(product_id, tx.now()))
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn locked_row_times_out_as_transient_error() {
        let (store, product_id) = store_with_product();
        let mut holder = store.begin().unwrap();
        holder.lock_stock_record(product_id).unwrap();

        let mut contender = store.begin().unwrap();
        let err = contender.lock_stock_record(product_id).unwrap_err();
        assert!(err.is_retryable());

        drop(holder);
        assert!(contender.lock_stock_record(product_id).is_ok());
    }

    #[test]
    fn waiter_acquires_lock_after_holder_commits_and_sees_its_write() {
        let store = InMemoryLedgerStore::with_lock_timeout(Duration::from_secs(5));
        let product_id = ProductId::new();
        store
            .register_product(Product::new(product_id, "SKU-1", "Batom").unwrap())
            .unwrap();

        let mut holder = store.begin().unwrap();
        holder.lock_stock_record(product_id).unwrap();

        let (tx_ready, rx_ready) = mpsc::channel();
        let waiter_store = store.clone();
        let waiter = thread::spawn(move || {
            let mut tx = waiter_store.begin().unwrap();
            tx_ready.send(()).unwrap();
            tx.lock_stock_record(product_id).unwrap().map(|r| r.on_hand())
        });

        rx_ready.recv().unwrap();
        thread::sleep(Duration::from_millis(50));
        holder
            .put_stock_record(StockRecord::with_on_hand(product_id, 7, holder.now()).unwrap())
            .unwrap();
        holder.commit().unwrap();

        assert_eq!(waiter.join().unwrap(), Some(7));
    }

    #[test]
    fn disjoint_rows_do_not_block() {
        let (store, first) = store_with_product();
        let second = ProductId::new();
        store
            .register_product(Product::new(second, "SKU-2", "Perfume").unwrap())
            .unwrap();

        let mut a = store.begin().unwrap();
        let mut b = store.begin().unwrap();
        a.lock_stock_record(first).unwrap();
        assert!(b.lock_stock_record(second).is_ok());
    }

    #[test]
    fn reservation_deleted_in_same_transaction_never_reaches_the_table() {
        let (store, product_id) = store_with_product();
        let request_id = RequestId::new();
        let mut tx = store.begin().unwrap();
        let r = Reservation::new(request_id, product_id, Quantity::new(2).unwrap(), tx.now());
        let id = r.id;
        tx.insert_reservation(r).unwrap();
        assert_eq!(tx.reservations_for_request(request_id).unwrap().len(), 1);
        tx.delete_reservation(id).unwrap();
        assert!(tx.reservations_for_request(request_id).unwrap().is_empty());
        assert!(matches!(tx.delete_reservation(id), Err(DomainError::NotFound(_))));
        assert!(tx.reservation(id).unwrap().is_none());
        tx.commit().unwrap();

        assert!(store.begin().unwrap().reservations().unwrap().is_empty());
    }

    #[test]
    fn request_rows_only_change_status() {
        let (store, _) = store_with_product();
        let mut tx = store.begin().unwrap();
        let request = Request::open(RequestId::new(), ConsultantId::new(), tx.now());
        tx.insert_request(request.clone()).unwrap();

        let mut tampered = request.clone();
        tampered.consultant_id = ConsultantId::new();
        assert!(tx.update_request(tampered).unwrap_err().is_fatal());

        let mut moved = request;
        moved.transition(pickledger_inventory::RequestStatus::Separacao).unwrap();
        tx.update_request(moved).unwrap();
    }

    #[test]
    fn duplicate_sku_registration_conflicts() {
        let (store, _) = store_with_product();
        let err = store
            .register_product(Product::new(ProductId::new(), "SKU-1", "Outro").unwrap())
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }
}
