// CashGuard - Web Server
// JSON API over the ledger controller

use anyhow::anyhow;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use cashguard::reporting::{cash_flow, custodian_history, invoices_in_tab, tab_counts};
use cashguard::{
    today, CashFlowPoint, CashGuard, Custodian, DateRange, Decision, Event, FinancialBrief,
    FinancialSummary, Invoice, InvoiceDraft, InvoiceTab, LedgerError, NewTransaction, NewUser,
    Persistence, ReconciliationReport, Settings, TabCounts, Transaction, TransactionFilter,
    TransactionType, User, View,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

type App = CashGuard<Box<dyn Persistence>>;

/// Shared application state
#[derive(Clone)]
struct AppState {
    app: Arc<Mutex<App>>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl ApiResponse<()> {
    fn err(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

/// Any failure, mapped to a status code by its ledger error kind
struct ApiError(anyhow::Error);

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError(err)
    }
}

fn status_for(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::NotFound { .. } => StatusCode::NOT_FOUND,
        LedgerError::NotAuthenticated | LedgerError::InvalidCredentials => {
            StatusCode::UNAUTHORIZED
        }
        LedgerError::Forbidden { .. } => StatusCode::FORBIDDEN,
        LedgerError::NonPositiveAmount { .. }
        | LedgerError::EmptyField { .. }
        | LedgerError::InvalidValue { .. }
        | LedgerError::SelfTransfer { .. }
        | LedgerError::Overflow { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        LedgerError::InvalidTransition { .. }
        | LedgerError::InvoiceLocked { .. }
        | LedgerError::InsufficientFunds { .. }
        | LedgerError::CustodianInUse { .. }
        | LedgerError::CustodianHoldsCash { .. }
        | LedgerError::DuplicateUsername { .. }
        | LedgerError::LastAdmin { .. } => StatusCode::CONFLICT,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.downcast_ref::<LedgerError>() {
            Some(err) => status_for(err),
            None => {
                tracing::error!(error = %format!("{:#}", self.0), "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(ApiResponse::err(self.0.to_string()))).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

const USER_HEADER: &str = "x-cashguard-user";
const PASSWORD_HEADER: &str = "x-cashguard-password";

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Run one operation as the user named in the request headers
fn with_session<T, F>(state: &AppState, headers: &HeaderMap, f: F) -> ApiResult<T>
where
    F: FnOnce(&mut App) -> anyhow::Result<T>,
{
    let (Some(username), Some(password)) =
        (header(headers, USER_HEADER), header(headers, PASSWORD_HEADER))
    else {
        return Err(ApiError(LedgerError::NotAuthenticated.into()));
    };

    let mut app = state
        .app
        .lock()
        .map_err(|_| anyhow!("application state lock poisoned"))?;

    app.login(username, password)?;
    let result = f(&mut app);
    app.logout();

    Ok(Json(ApiResponse::ok(result?)))
}

/// Credentials never leave the server
fn public(user: &User) -> User {
    User {
        password: None,
        ..user.clone()
    }
}

// ============================================================================
// Request bodies & queries
// ============================================================================

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Serialize)]
struct LoginResponse {
    user: User,
    landing_view: View,
}

#[derive(Deserialize)]
struct NameRequest {
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettleRequest {
    custodian_id: String,
    #[serde(default)]
    date: Option<NaiveDate>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferRequest {
    from_id: String,
    to_id: String,
    amount: Decimal,
}

#[derive(Serialize)]
struct TransferResponse {
    outgoing: Transaction,
    incoming: Transaction,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SettleResponse {
    invoice: Invoice,
    transaction: Transaction,
    new_balance: Decimal,
}

#[derive(Deserialize)]
struct InvoiceQuery {
    tab: Option<InvoiceTab>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
}

#[derive(Serialize)]
struct InvoiceList {
    counts: TabCounts,
    invoices: Vec<Invoice>,
}

#[derive(Deserialize)]
struct TransactionQuery {
    #[serde(rename = "type")]
    kind: Option<TransactionType>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// POST /api/login - Check credentials, return the user and landing view
async fn login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> ApiResult<LoginResponse> {
    let mut app = state
        .app
        .lock()
        .map_err(|_| anyhow!("application state lock poisoned"))?;

    let user = app.login(&req.username, &req.password)?;
    app.logout();

    Ok(Json(ApiResponse::ok(LoginResponse {
        landing_view: user.role.landing_view(),
        user: public(&user),
    })))
}

async fn get_summary(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<FinancialSummary> {
    with_session(&state, &headers, |app| app.summary())
}

async fn get_brief(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<FinancialBrief> {
    with_session(&state, &headers, |app| app.brief())
}

async fn get_reconciliation(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<ReconciliationReport> {
    with_session(&state, &headers, |app| app.reconcile())
}

async fn get_cash_flow(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Vec<CashFlowPoint>> {
    with_session(&state, &headers, |app| {
        // Same gate as the dashboard
        app.summary()?;
        Ok(cash_flow(app.ledger().transactions()))
    })
}

// --- custodians -------------------------------------------------------------

async fn list_custodians(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Vec<Custodian>> {
    with_session(&state, &headers, |app| Ok(app.ledger().custodians().to_vec()))
}

async fn create_custodian(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<NameRequest>,
) -> ApiResult<Custodian> {
    with_session(&state, &headers, |app| app.add_custodian(&req.name))
}

async fn delete_custodian(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<()> {
    with_session(&state, &headers, |app| app.delete_custodian(&id))
}

async fn get_custodian_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Vec<Transaction>> {
    with_session(&state, &headers, |app| {
        if app.ledger().custodian(&id).is_none() {
            return Err(LedgerError::not_found("custodian", &id).into());
        }
        Ok(custodian_history(app.ledger().transactions(), &id)
            .into_iter()
            .cloned()
            .collect())
    })
}

// --- invoices ---------------------------------------------------------------

async fn list_invoices(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<InvoiceQuery>,
) -> ApiResult<InvoiceList> {
    with_session(&state, &headers, |app| {
        let invoices = app.ledger().invoices();
        let tab = query.tab.unwrap_or(InvoiceTab::ToProcess);

        Ok(InvoiceList {
            counts: tab_counts(invoices),
            invoices: invoices_in_tab(invoices, tab, DateRange::new(query.from, query.to))
                .into_iter()
                .cloned()
                .collect(),
        })
    })
}

async fn create_invoice(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(draft): Json<InvoiceDraft>,
) -> ApiResult<Invoice> {
    with_session(&state, &headers, |app| app.add_invoice(draft))
}

async fn update_invoice(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(draft): Json<InvoiceDraft>,
) -> ApiResult<Invoice> {
    with_session(&state, &headers, |app| app.update_invoice(&id, draft))
}

async fn validate_invoice(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Invoice> {
    with_session(&state, &headers, |app| app.validate_invoice(&id))
}

async fn settle_invoice(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<SettleRequest>,
) -> ApiResult<SettleResponse> {
    with_session(&state, &headers, |app| {
        let settlement =
            app.settle_invoice(&id, &req.custodian_id, req.date.unwrap_or_else(today))?;
        Ok(SettleResponse {
            invoice: settlement.invoice,
            transaction: settlement.transaction,
            new_balance: settlement.new_balance,
        })
    })
}

async fn delete_invoice(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<()> {
    with_session(&state, &headers, |app| app.delete_invoice(&id))
}

// --- transactions -----------------------------------------------------------

async fn list_transactions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TransactionQuery>,
) -> ApiResult<Vec<Transaction>> {
    with_session(&state, &headers, |app| {
        let filter = TransactionFilter {
            kind: query.kind,
            range: DateRange::new(query.from, query.to),
        };
        Ok(filter
            .apply(app.ledger().transactions())
            .into_iter()
            .cloned()
            .collect())
    })
}

async fn create_transaction(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(new): Json<NewTransaction>,
) -> ApiResult<Transaction> {
    with_session(&state, &headers, |app| app.add_transaction(new))
}

async fn validate_transaction(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Transaction> {
    with_session(&state, &headers, |app| {
        app.validate_transaction(&id, Decision::Validate)
    })
}

async fn reject_transaction(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Transaction> {
    with_session(&state, &headers, |app| {
        app.validate_transaction(&id, Decision::Reject)
    })
}

async fn delete_transaction(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<()> {
    with_session(&state, &headers, |app| app.delete_transaction(&id))
}

async fn create_transfer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<TransferRequest>,
) -> ApiResult<TransferResponse> {
    with_session(&state, &headers, |app| {
        let transfer = app.transfer(&req.from_id, &req.to_id, req.amount, today())?;
        Ok(TransferResponse {
            outgoing: transfer.outgoing,
            incoming: transfer.incoming,
        })
    })
}

// --- users ------------------------------------------------------------------

async fn list_users(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Vec<User>> {
    with_session(&state, &headers, |app| {
        Ok(app.users()?.iter().map(public).collect())
    })
}

async fn create_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(new): Json<NewUser>,
) -> ApiResult<User> {
    with_session(&state, &headers, |app| app.add_user(new).map(|u| public(&u)))
}

async fn delete_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<()> {
    with_session(&state, &headers, |app| app.delete_user(&id))
}

/// GET /api/events/:entity/:id - Audit trail, newest first
async fn get_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((entity, id)): Path<(String, String)>,
) -> ApiResult<Vec<Event>> {
    with_session(&state, &headers, |app| app.history(&entity, &id))
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    println!("🌐 CashGuard v{} - Web Server", cashguard::VERSION);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let settings = Settings::from_env()?;
    let store = settings.connect()?;
    let app = CashGuard::open(store)?;
    println!("✓ Ledger loaded ({} backend)", settings.backend);

    // Create shared state
    let state = AppState {
        app: Arc::new(Mutex::new(app)),
    };

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/login", post(login))
        .route("/summary", get(get_summary))
        .route("/brief", get(get_brief))
        .route("/reconciliation", get(get_reconciliation))
        .route("/cash-flow", get(get_cash_flow))
        .route("/custodians", get(list_custodians).post(create_custodian))
        .route("/custodians/:id", axum::routing::delete(delete_custodian))
        .route("/custodians/:id/history", get(get_custodian_history))
        .route("/invoices", get(list_invoices).post(create_invoice))
        .route(
            "/invoices/:id",
            axum::routing::put(update_invoice).delete(delete_invoice),
        )
        .route("/invoices/:id/validate", post(validate_invoice))
        .route("/invoices/:id/settle", post(settle_invoice))
        .route("/transactions", get(list_transactions).post(create_transaction))
        .route("/transactions/:id", axum::routing::delete(delete_transaction))
        .route("/transactions/:id/validate", post(validate_transaction))
        .route("/transactions/:id/reject", post(reject_transaction))
        .route("/transfers", post(create_transfer))
        .route("/users", get(list_users).post(create_user))
        .route("/users/:id", axum::routing::delete(delete_user))
        .route("/events/:entity/:id", get(get_events))
        .with_state(state);

    // Build main router
    let app = Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive());

    // Start server
    let listener = tokio::net::TcpListener::bind(&settings.addr).await?;

    println!("\n🚀 Server running on http://{}", settings.addr);
    println!("   API: http://{}/api/summary", settings.addr);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app).await?;
    Ok(())
}
