//! Fake collaborators and fixtures shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::db::listing::{HouseType, Listing, ListingStatus, NewListing, PaymentStatus};
use crate::db::memory::MemoryListingStore;
use crate::lifecycle::{EngineSettings, LifecycleEngine};
use crate::services::geocoding::{Coordinates, GeocodeError, Geocoder, GeocodingResolver};
use crate::services::identity::{Identity, IdentityError, IdentityVerifier, Role};
use crate::services::notification::{Notifier, NotifyError};
use crate::services::payment::{GatewayError, PaymentGateway, PaymentInitiation, PaymentRequest};
use crate::services::retry::RetryPolicy;
use crate::services::storage::{ObjectStore, StorageError, Upload};

/// Gateway answering from a script of failures, then succeeding with a
/// fresh payment reference on every call.
#[derive(Default)]
pub struct ScriptedGateway {
    script: Mutex<VecDeque<GatewayError>>,
    requests: Mutex<Vec<Uuid>>,
    calls: AtomicUsize,
}

impl ScriptedGateway {
    pub fn failing_first(errors: Vec<GatewayError>) -> Self {
        Self {
            script: Mutex::new(errors.into()),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn request_ids(&self) -> Vec<Uuid> {
        self.requests.lock().expect("gateway mutex poisoned").clone()
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn initiate(&self, request: &PaymentRequest) -> Result<PaymentInitiation, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let request_id = Uuid::new_v4();
        self.requests.lock().expect("gateway mutex poisoned").push(request_id);

        if let Some(err) = self.script.lock().expect("gateway mutex poisoned").pop_front() {
            return Err(err);
        }
        Ok(PaymentInitiation {
            request_id,
            payment_id: Some(Uuid::new_v4()),
            provider_tx_ref: Some(format!("tx-{request_id}")),
            checkout_url: Some(format!("https://checkout.test/{}", request.property_id)),
        })
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(Uuid, String)>>,
    attempts: AtomicUsize,
    fail: AtomicBool,
    hang: AtomicBool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        let notifier = Self::default();
        notifier.fail.store(true, Ordering::SeqCst);
        notifier
    }

    /// Never answers, like a notification service that stopped responding.
    pub fn hanging() -> Self {
        let notifier = Self::default();
        notifier.hang.store(true, Ordering::SeqCst);
        notifier
    }

    pub fn sent(&self) -> Vec<(Uuid, String)> {
        self.sent.lock().expect("notifier mutex poisoned").clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, user_id: Uuid, message: &str) -> Result<(), NotifyError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotifyError::Rejected(503));
        }
        self.sent
            .lock()
            .expect("notifier mutex poisoned")
            .push((user_id, message.to_string()));
        Ok(())
    }
}

pub struct FixedGeocoder(pub Option<Coordinates>);

#[async_trait]
impl Geocoder for FixedGeocoder {
    async fn geocode(&self, _query: &str) -> Result<Coordinates, GeocodeError> {
        self.0.ok_or(GeocodeError::NoResult)
    }
}

#[derive(Default)]
pub struct StaticVerifier {
    identities: HashMap<String, Identity>,
}

impl StaticVerifier {
    pub fn with(mut self, identity: Identity) -> Self {
        self.identities.insert(identity.raw_token.clone(), identity);
        self
    }
}

#[async_trait]
impl IdentityVerifier for StaticVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, IdentityError> {
        self.identities.get(token).cloned().ok_or(IdentityError::InvalidToken)
    }
}

#[derive(Default)]
pub struct FakeObjectStore {
    uploads: AtomicUsize,
}

impl FakeObjectStore {
    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn upload(&self, upload: Upload) -> Result<String, StorageError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        let name = upload.file_name.unwrap_or_else(|| "blob".to_string());
        Ok(format!("https://cdn.test/images/{}-{name}", Uuid::new_v4()))
    }
}

pub fn settings() -> EngineSettings {
    EngineSettings {
        auto_initiate: false,
        notification_language: "en".to_string(),
        stale_after: chrono::Duration::days(7),
        payment_amount: Decimal::new(10000, 2),
        payment_retry: RetryPolicy::new(4, Duration::from_millis(5)),
        notify_deadline: Duration::from_millis(100),
    }
}

pub fn engine_with(
    store: MemoryListingStore,
    gateway: Arc<ScriptedGateway>,
    notifier: Arc<RecordingNotifier>,
    geocoder: FixedGeocoder,
    settings: EngineSettings,
) -> LifecycleEngine {
    let resolver = GeocodingResolver::new(Arc::new(geocoder), Duration::from_secs(3600));
    LifecycleEngine::new(Arc::new(store), gateway, notifier, Arc::new(resolver), settings)
}

pub fn engine(
    store: MemoryListingStore,
    gateway: Arc<ScriptedGateway>,
    notifier: Arc<RecordingNotifier>,
) -> LifecycleEngine {
    let geocoder = FixedGeocoder(Some(Coordinates { lat: 9.01, lon: 38.76 }));
    engine_with(store, gateway, notifier, geocoder, settings())
}

pub fn identity(role: Role) -> Identity {
    let user_id = Uuid::new_v4();
    Identity {
        user_id,
        role,
        raw_token: format!("token-{user_id}"),
    }
}

pub fn new_listing() -> NewListing {
    NewListing {
        title: "Family house".to_string(),
        description: "Three bedrooms with a garden".to_string(),
        location: "Bole".to_string(),
        price: Decimal::new(100000, 2),
        house_type: HouseType::PrivateHome,
        bedrooms: Some(3),
        bathrooms: Some(2),
        area_sqm: Some(180.0),
        amenities: vec!["WiFi".to_string(), "Parking".to_string()],
        photos: vec!["https://cdn.test/images/front.jpg".to_string()],
    }
}

/// A PENDING/PENDING listing created `age` ago.
pub fn pending_listing(age: chrono::Duration) -> Listing {
    let mut listing = Listing::create(Uuid::new_v4(), new_listing(), 9.0, 38.7);
    listing.created_at = Utc::now() - age;
    listing.updated_at = listing.created_at;
    listing
}

pub fn approved_listing(owner_id: Uuid) -> Listing {
    let mut listing = Listing::create(owner_id, new_listing(), 9.0, 38.7);
    listing.status = ListingStatus::Approved;
    listing.payment_status = PaymentStatus::Success;
    listing.payment_id = Some(Uuid::new_v4());
    listing.approval_timestamp = Some(Utc::now());
    listing
}
