//! Axum route handlers for the deposit API.
//!
//! Request and response bodies are JSON with camelCase field names. Errors
//! are returned as `{"error": "..."}` with the status chosen by
//! [`ServerError`].

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use usdt_gate::intent::TransitionOutcome;
use usdt_gate::ledger::UserLedgerBalance;
use usdt_gate::reconcile::NetworkBalance;
use usdt_gate::scheduler::{CycleReport, TrackerStatus};
use usdt_gate::settlement::SettlementOutcome;
use usdt_gate::stats::PaymentStats;
use usdt_gate::{Network, PaymentIntent, ValidationError};
use uuid::Uuid;

use crate::error::ServerError;
use crate::state::AppState;

/// Body of `POST /payments`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentRequest {
    /// Paying user.
    pub user_id: String,
    /// Amount in USDT.
    pub amount: Decimal,
    /// Network name, e.g. `"TRC20"`.
    pub network: String,
}

/// Body of `POST /users`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterUserRequest {
    /// User to register.
    pub user_id: String,
}

/// Response of `POST /admin/settle`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProcessedResponse {
    /// Intents that reached `completed` or `failed`.
    pub processed: usize,
}

/// `POST /payments` — Creates a payment intent.
///
/// # Errors
///
/// Returns 400 if the user, amount or network is invalid.
pub async fn create_payment(
    State(state): State<AppState>,
    Json(body): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<PaymentIntent>), ServerError> {
    let network: Network = body.network.parse().map_err(ValidationError::from)?;
    let intent = state
        .store()
        .create_intent(&body.user_id, body.amount, network)
        .await?;
    Ok((StatusCode::CREATED, Json(intent)))
}

/// `GET /payments/{id}` — Returns one payment intent.
///
/// # Errors
///
/// Returns 404 if the intent does not exist.
pub async fn get_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PaymentIntent>, ServerError> {
    state
        .store()
        .get_intent(id)
        .await
        .map(Json)
        .ok_or(ServerError::IntentNotFound(id))
}

/// `GET /users/{user_id}/payments` — Lists a user's intents, newest first.
pub async fn list_user_payments(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Json<Vec<PaymentIntent>> {
    Json(state.store().list_intents_for_user(&user_id).await)
}

/// `POST /payments/{id}/cancel` — Cancels an open intent.
///
/// # Errors
///
/// Returns 404 if the intent does not exist, or 409 if it is no longer open.
pub async fn cancel_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PaymentIntent>, ServerError> {
    let store = state.store();
    match store.cancel_intent(id).await {
        TransitionOutcome::NotFound => return Err(ServerError::IntentNotFound(id)),
        TransitionOutcome::Refused { from, .. } => {
            return Err(ServerError::Conflict { id, status: from });
        }
        // Cancelling attaches no hash, so it is never claimed.
        TransitionOutcome::Applied | TransitionOutcome::HashClaimed { .. } => {}
    }
    let intent = store
        .get_intent(id)
        .await
        .ok_or(ServerError::IntentNotFound(id))?;
    tracing::info!(intent = %id, user = %intent.user_id, "Payment intent cancelled");
    Ok(Json(intent))
}

/// `GET /stats` — Aggregate payment statistics.
pub async fn get_stats(State(state): State<AppState>) -> Json<PaymentStats> {
    Json(state.store().stats().await)
}

/// `GET /balances` — Wallet balance and pending total per network.
pub async fn get_balances(State(state): State<AppState>) -> Json<Vec<NetworkBalance>> {
    Json(state.engine().network_balances().await)
}

/// `GET /tracker` — Background poller status.
pub async fn get_tracker(State(state): State<AppState>) -> Json<TrackerStatus> {
    Json(state.scheduler().status().await)
}

/// `POST /tracker/check` — Runs one reconciliation cycle now.
///
/// # Errors
///
/// Returns 409 if a cycle is already running.
pub async fn post_tracker_check(
    State(state): State<AppState>,
) -> Result<Json<CycleReport>, ServerError> {
    state
        .scheduler()
        .force_check()
        .await
        .map(Json)
        .ok_or(ServerError::Busy)
}

/// `POST /admin/settle` — Settles every confirmed intent.
pub async fn post_settle_all(State(state): State<AppState>) -> Json<ProcessedResponse> {
    let processed = state.settlement().process_all_confirmed().await;
    Json(ProcessedResponse { processed })
}

/// `POST /admin/payments/{id}/settle` — Settles one confirmed intent.
///
/// # Errors
///
/// Returns 404 if the intent does not exist, or 409 if it is not confirmed.
pub async fn post_settle_one(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SettlementOutcome>, ServerError> {
    Ok(Json(state.settlement().settle_intent(id).await?))
}

/// `POST /users` — Registers a user with the ledger.
///
/// # Errors
///
/// Returns 400 if the user id is empty.
pub async fn register_user(
    State(state): State<AppState>,
    Json(body): Json<RegisterUserRequest>,
) -> Result<(StatusCode, Json<UserLedgerBalance>), ServerError> {
    let user_id = body.user_id.trim();
    if user_id.is_empty() {
        return Err(ValidationError::EmptyUserId.into());
    }
    let balance = state.ledger().register_user(user_id).await;
    Ok((StatusCode::CREATED, Json(balance)))
}

/// `GET /users/{user_id}/balance` — A user's ledger balance.
///
/// # Errors
///
/// Returns 404 if the user is not registered.
pub async fn get_user_balance(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<UserLedgerBalance>, ServerError> {
    match state.ledger().balance(&user_id).await {
        Some(balance) => Ok(Json(balance)),
        None => Err(ServerError::UserNotFound(user_id)),
    }
}

/// `GET /health` — Liveness probe.
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Creates an Axum [`axum::Router`] with all deposit endpoints.
///
/// Endpoints:
/// - `POST /payments` — create a payment intent
/// - `GET /payments/{id}` — fetch an intent
/// - `POST /payments/{id}/cancel` — cancel an open intent
/// - `GET /users/{user_id}/payments` — list a user's intents
/// - `POST /users` — register a ledger user
/// - `GET /users/{user_id}/balance` — ledger balance
/// - `GET /stats` — payment statistics
/// - `GET /balances` — wallet balances
/// - `GET /tracker` — poller status
/// - `POST /tracker/check` — force a cycle
/// - `POST /admin/settle` — settle all confirmed intents
/// - `POST /admin/payments/{id}/settle` — settle one intent
/// - `GET /health` — liveness
pub fn gateway_router(state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/payments", axum::routing::post(create_payment))
        .route("/payments/{id}", axum::routing::get(get_payment))
        .route("/payments/{id}/cancel", axum::routing::post(cancel_payment))
        .route("/users", axum::routing::post(register_user))
        .route("/users/{user_id}/payments", axum::routing::get(list_user_payments))
        .route("/users/{user_id}/balance", axum::routing::get(get_user_balance))
        .route("/stats", axum::routing::get(get_stats))
        .route("/balances", axum::routing::get(get_balances))
        .route("/tracker", axum::routing::get(get_tracker))
        .route("/tracker/check", axum::routing::post(post_tracker_check))
        .route("/admin/settle", axum::routing::post(post_settle_all))
        .route(
            "/admin/payments/{id}/settle",
            axum::routing::post(post_settle_one),
        )
        .route("/health", axum::routing::get(health))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{Value, json};
    use tower::ServiceExt;
    use usdt_gate::chain::TransferStatus;
    use usdt_gate::ledger::InMemoryLedger;
    use usdt_gate::network::known_network;
    use usdt_gate::{
        AdapterRegistry, BlockchainTransfer, ChainAdapter, IntentStore, NetworkConfig,
        NetworkRegistry, PaymentSettings, UpstreamError,
    };

    use crate::state::Gateway;

    const WALLET: &str = "TWallet";

    /// Serves one fixed transfer at a fixed height.
    #[derive(Debug)]
    struct FixedAdapter {
        config: NetworkConfig,
        transfer: Option<BlockchainTransfer>,
    }

    #[async_trait]
    impl ChainAdapter for FixedAdapter {
        fn config(&self) -> &NetworkConfig {
            &self.config
        }

        async fn get_balance(&self, _address: &str) -> Result<Decimal, UpstreamError> {
            Ok(Decimal::from(500))
        }

        async fn list_incoming_transfers(
            &self,
            _address: &str,
            _limit: usize,
        ) -> Result<Vec<BlockchainTransfer>, UpstreamError> {
            Ok(self.transfer.iter().cloned().collect())
        }

        async fn get_transfer_by_hash(
            &self,
            hash: &str,
        ) -> Result<Option<BlockchainTransfer>, UpstreamError> {
            Ok(self.transfer.clone().filter(|t| t.hash == hash))
        }

        async fn get_current_block_height(&self) -> Result<u64, UpstreamError> {
            Ok(200)
        }
    }

    fn app_with(transfer: Option<BlockchainTransfer>) -> (axum::Router, AppState) {
        let config = known_network(Network::Trc20).unwrap().with_wallet(WALLET);
        let store = Arc::new(IntentStore::new(
            NetworkRegistry::new().with_config(config.clone()),
            PaymentSettings::default(),
        ));
        let adapter: Arc<dyn ChainAdapter> = Arc::new(FixedAdapter { config, transfer });
        let adapters = AdapterRegistry::new().with_adapter(adapter);
        let ledger = Arc::new(InMemoryLedger::new(Decimal::ONE, store.clock()));
        let state = Arc::new(Gateway::new(store, adapters, ledger));
        (gateway_router(Arc::clone(&state)), state)
    }

    fn app() -> axum::Router {
        app_with(None).0
    }

    async fn send(
        app: &axum::Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn create(app: &axum::Router, user: &str, amount: Value) -> (StatusCode, Value) {
        send(
            app,
            "POST",
            "/payments",
            Some(json!({"userId": user, "amount": amount, "network": "TRC20"})),
        )
        .await
    }

    #[tokio::test]
    async fn test_create_and_fetch_payment() {
        let app = app();
        let (status, created) = create(&app, "alice", json!("100")).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["status"], "pending");
        assert_eq!(created["destinationAddress"], WALLET);
        assert_eq!(created["requiredConfirmations"], 12);

        let id = created["id"].as_str().unwrap();
        let (status, fetched) = send(&app, "GET", &format!("/payments/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["id"], created["id"]);

        let (_, listed) = send(&app, "GET", "/users/alice/payments", None).await;
        assert_eq!(listed.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_validation_errors() {
        let app = app();
        let (status, body) = create(&app, "alice", json!("5")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("minimum"));

        let (status, _) = send(
            &app,
            "POST",
            "/payments",
            Some(json!({"userId": "alice", "amount": "50", "network": "SOL"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // Known network without a configured wallet.
        let (status, _) = send(
            &app,
            "POST",
            "/payments",
            Some(json!({"userId": "alice", "amount": "50", "network": "ERC20"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = create(&app, "", json!("50")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_missing_payment_is_404() {
        let app = app();
        let uri = format!("/payments/{}", Uuid::new_v4());
        let (status, body) = send(&app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().starts_with("payment intent not found"));
    }

    #[tokio::test]
    async fn test_cancel_only_open_intents() {
        let app = app();
        let (_, created) = create(&app, "bob", json!(20)).await;
        let uri = format!("/payments/{}/cancel", created["id"].as_str().unwrap());

        let (status, cancelled) = send(&app, "POST", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cancelled["status"], "cancelled");

        let (status, _) = send(&app, "POST", &uri, None).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_transfers_below_start_height_are_ignored() {
        let transfer = BlockchainTransfer {
            hash: "tx-1".into(),
            from: "TSender".into(),
            to: WALLET.into(),
            raw_value: "100000000".into(),
            block_number: 150,
            timestamp_millis: 0,
            status: TransferStatus::Success,
            confirmations: 0,
        };
        let (app, state) = app_with(Some(transfer));
        state.engine().initialize().await;

        let (status, _) = send(&app, "POST", "/users", Some(json!({"userId": "carol"}))).await;
        assert_eq!(status, StatusCode::CREATED);
        let (_, created) = create(&app, "carol", json!("100")).await;

        // The start height is the chain tip, so the transfer at 150 is history.
        let (status, report) = send(&app, "POST", "/tracker/check", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["reconcile"]["networks"][0]["skipped"], true);

        let (_, balance) = send(&app, "GET", "/users/carol/balance", None).await;
        assert_eq!(balance["usdBalance"], "0");
        let (_, intent) = send(
            &app,
            "GET",
            &format!("/payments/{}", created["id"].as_str().unwrap()),
            None,
        )
        .await;
        assert_eq!(intent["status"], "pending");
    }

    #[tokio::test]
    async fn test_cycle_from_genesis_credits_user() {
        let transfer = BlockchainTransfer {
            hash: "tx-2".into(),
            from: "TSender".into(),
            to: WALLET.into(),
            raw_value: "100000000".into(),
            block_number: 150,
            timestamp_millis: 0,
            status: TransferStatus::Success,
            confirmations: 0,
        };
        let (app, _state) = app_with(Some(transfer));

        send(&app, "POST", "/users", Some(json!({"userId": "dave"}))).await;
        let (_, created) = create(&app, "dave", json!("100")).await;

        let (status, report) = send(&app, "POST", "/tracker/check", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["settlement"]["completed"], 1);

        let (_, intent) = send(
            &app,
            "GET",
            &format!("/payments/{}", created["id"].as_str().unwrap()),
            None,
        )
        .await;
        assert_eq!(intent["status"], "completed");
        assert_eq!(intent["observedTransactionHash"], "tx-2");

        let (_, balance) = send(&app, "GET", "/users/dave/balance", None).await;
        assert_eq!(balance["usdBalance"], "100");

        let (_, stats) = send(&app, "GET", "/stats", None).await;
        assert_eq!(stats["completedPayments"], 1);

        let (status, settled) = send(&app, "POST", "/admin/settle", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(settled["processed"], 0);
    }

    #[tokio::test]
    async fn test_settle_one_requires_confirmed() {
        let app = app();
        let (_, created) = create(&app, "erin", json!("30")).await;
        let id = created["id"].as_str().unwrap();

        let uri = format!("/admin/payments/{id}/settle");
        let (status, body) = send(&app, "POST", &uri, None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().ends_with("is pending"));

        let (status, _) = send(
            &app,
            "POST",
            &format!("/admin/payments/{}/settle", Uuid::new_v4()),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_user_registration_and_balance() {
        let app = app();
        let (status, _) = send(&app, "GET", "/users/frank/balance", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, "POST", "/users", Some(json!({"userId": "  "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let body = json!({"userId": "frank"});
        let (status, balance) = send(&app, "POST", "/users", Some(body)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(balance["usdBalance"], "0");
    }

    #[tokio::test]
    async fn test_status_endpoints() {
        let app = app();
        let (_, tracker) = send(&app, "GET", "/tracker", None).await;
        assert_eq!(tracker["running"], false);

        create(&app, "gina", json!("40")).await;
        let (status, balances) = send(&app, "GET", "/balances", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(balances[0]["network"], "TRC20");
        assert_eq!(balances[0]["balance"], "500");
        assert_eq!(balances[0]["pendingAmount"], "40");

        let (status, health) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(health["status"], "ok");
    }
}
