// tests/common/mod.rs

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde_json::{Value, json};
use shopeasy::{
    config::Config,
    models::{
        product::{NewProduct, Product},
        user::{NewUser, User},
    },
    routes,
    services::{
        clock::ManualClock,
        notifier::{DeviceInfo, Notifier, NotifyError},
        registration::InMemoryRegistrationCache,
        saga::SagaCoordinator,
    },
    state::AppState,
    store::{MemoryStore, ProductStore, Stores, UserStore},
};

/// Captures outgoing mail instead of sending it. Each kind can be told to fail.
#[derive(Default)]
pub struct RecordingNotifier {
    otps: Mutex<HashMap<String, String>>,
    reset_urls: Mutex<HashMap<String, String>>,
    welcomes: Mutex<Vec<String>>,
    alerts: Mutex<Vec<(String, DeviceInfo)>>,
    pub fail_otp: AtomicBool,
    pub fail_reset: AtomicBool,
    pub fail_welcome: AtomicBool,
    pub fail_alert: AtomicBool,
}

impl RecordingNotifier {
    pub fn last_otp(&self, email: &str) -> Option<String> {
        self.otps.lock().unwrap().get(email).cloned()
    }

    pub fn last_reset_url(&self, email: &str) -> Option<String> {
        self.reset_urls.lock().unwrap().get(email).cloned()
    }

    /// The raw token at the end of the last reset link sent to `email`.
    pub fn last_reset_token(&self, email: &str) -> Option<String> {
        self.last_reset_url(email)
            .and_then(|url| url.rsplit('/').next().map(str::to_string))
    }

    pub fn welcome_count(&self) -> usize {
        self.welcomes.lock().unwrap().len()
    }

    pub fn alerts(&self) -> Vec<(String, DeviceInfo)> {
        self.alerts.lock().unwrap().clone()
    }
}

fn refuse(flag: &AtomicBool) -> Result<(), NotifyError> {
    if flag.load(Ordering::SeqCst) {
        return Err(NotifyError("smtp relay unavailable".to_string()));
    }
    Ok(())
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_otp(&self, email: &str, code: &str) -> Result<(), NotifyError> {
        refuse(&self.fail_otp)?;
        self.otps.lock().unwrap().insert(email.to_string(), code.to_string());
        Ok(())
    }

    async fn send_password_reset(&self, email: &str, url: &str) -> Result<(), NotifyError> {
        refuse(&self.fail_reset)?;
        self.reset_urls.lock().unwrap().insert(email.to_string(), url.to_string());
        Ok(())
    }

    async fn send_welcome(&self, email: &str, _name: &str) -> Result<(), NotifyError> {
        refuse(&self.fail_welcome)?;
        self.welcomes.lock().unwrap().push(email.to_string());
        Ok(())
    }

    async fn send_security_alert(&self, email: &str, device: &DeviceInfo) -> Result<(), NotifyError> {
        refuse(&self.fail_alert)?;
        self.alerts.lock().unwrap().push((email.to_string(), device.clone()));
        Ok(())
    }
}

pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
    pub store: MemoryStore,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub coordinator: SagaCoordinator,
}

/// Helper function to spawn the app on a random port for testing.
/// Runs on the in-memory store, so no database is needed.
pub async fn spawn_app() -> TestApp {
    let store = MemoryStore::default();
    let clock = Arc::new(ManualClock::default());
    let notifier = Arc::new(RecordingNotifier::default());

    let config = Config::for_tests("test_secret_for_integration_tests");
    let registrations = Arc::new(InMemoryRegistrationCache::new(clock.clone(), config.otp_ttl));

    let state = AppState::new(
        config,
        Stores::from_memory(store.clone()),
        registrations,
        notifier.clone(),
        clock.clone(),
    );
    let coordinator = state.saga_coordinator(clock.clone());

    let app = routes::create_router(state);

    // Bind to port 0 to get a random available port
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();

    // Spawn the server in the background
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestApp {
        address: format!("http://127.0.0.1:{}", port),
        client: reqwest::Client::new(),
        store,
        clock,
        notifier,
        coordinator,
    }
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    pub async fn post(&self, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn get_auth(&self, path: &str, token: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn send_auth(
        &self,
        method: reqwest::Method,
        path: &str,
        token: &str,
        body: Option<Value>,
    ) -> reqwest::Response {
        let mut request = self.client.request(method, self.url(path)).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(&body);
        }
        request.send().await.expect("Failed to execute request")
    }

    pub async fn signup(&self, email: &str, password: &str) -> reqwest::Response {
        self.post(
            "/api/auth/signup",
            json!({
                "name": "Test Shopper",
                "email": email,
                "password": password,
                "country": "US",
                "contact": "+1 555-010-1234",
            }),
        )
        .await
    }

    /// Full signup + OTP verification. Returns the session token.
    pub async fn register(&self, email: &str, password: &str) -> String {
        assert_eq!(self.signup(email, password).await.status().as_u16(), 200);
        let otp = self.notifier.last_otp(email).expect("otp was not sent");
        let response = self
            .post("/api/auth/verify-otp", json!({ "email": email, "otp": otp }))
            .await;
        assert_eq!(response.status().as_u16(), 201);
        let body: Value = response.json().await.unwrap();
        body["token"].as_str().unwrap().to_string()
    }

    /// Inserts an admin directly and logs in through the admin endpoint.
    pub async fn admin_token(&self) -> (User, String) {
        let admin = UserStore::create(
            &self.store,
            NewUser {
                name: "Admin".into(),
                email: "admin@shopeasy.test".into(),
                password: SecretString::from("admin-pass".to_string()),
                country: "US".into(),
                contact: "5550109999".into(),
                is_admin: true,
                is_active: true,
                email_verified: true,
                last_login: None,
            },
        )
        .await
        .unwrap();

        let response = self
            .post(
                "/api/admin/login",
                json!({ "email": "admin@shopeasy.test", "password": "admin-pass" }),
            )
            .await;
        assert_eq!(response.status().as_u16(), 200);
        let body: Value = response.json().await.unwrap();
        (admin, body["token"].as_str().unwrap().to_string())
    }

    pub async fn user_by_email(&self, email: &str) -> User {
        self.store.find_by_email(email).await.unwrap().expect("user exists")
    }

    pub async fn seed_product(&self, owner_id: i64, title: &str, price: Decimal, stock: i32) -> Product {
        ProductStore::create(
            &self.store,
            NewProduct {
                title: title.into(),
                price,
                category: "general".into(),
                description: String::new(),
                image: "https://img.example.com/p.png".into(),
                stock,
                owner_id,
                features: vec![],
            },
        )
        .await
        .unwrap()
    }

    pub async fn product(&self, id: i64) -> Option<Product> {
        ProductStore::find_by_id(&self.store, id).await.unwrap()
    }
}

pub fn shipping_address() -> Value {
    json!({
        "fullName": "Test Shopper",
        "address": "1 Market Street",
        "city": "Springfield",
        "postalCode": "12345",
        "country": "US",
        "phone": "5550101234",
        "email": "shopper@example.com",
    })
}

pub async fn json_body(response: reqwest::Response) -> Value {
    response.json().await.expect("response body is json")
}

/// Prices travel as decimal strings.
pub fn decimal(value: &Value) -> Decimal {
    value
        .as_str()
        .expect("decimal is serialized as a string")
        .parse()
        .expect("valid decimal")
}
