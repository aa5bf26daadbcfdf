use axum::{
    Extension, Json, Router,
    extract::{Multipart, Path, Query, State},
    http::header,
    middleware,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal::ctrl_c;
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};
use tower_http::services::ServeDir;

use crate::config::Config;
use crate::error::{AppError, ImportError};
use crate::exporter::{self, ExportTable};
use crate::importer::{self, ImportSummary};
use crate::inventory::{self, Product, ProductVariant, ReturnStatus};
use crate::login::{self, AuthUser, Sessions, UserDirectory, require_edit};
use crate::saving;
use crate::store::{StockChange, Store};
use crate::variant::VariantKey;
use crate::view::{self, MasterQuery, Page, ProductDetail, StockRow};

const SNAPSHOT_FILENAME: &str = "csms-snapshot.bin.gz";

pub struct AppState {
    pub store: Store,
    pub users: UserDirectory,
    pub sessions: Sessions,
    pub config: Config,
}

impl AppState {
    /// Open the snapshot and users file under `config.data_dir`.
    pub fn open(config: Config) -> Result<Self, AppError> {
        Ok(AppState {
            store: Store::open(&config.data_dir)?,
            users: UserDirectory::open(&config.data_dir)?,
            sessions: Sessions::new(config.session_hours),
            config,
        })
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/mv", get(serve_master_view))
        .route("/product/:sku", get(serve_product_page))
        .route("/api/session", get(login::session_info))
        .route("/api/products", get(list_products))
        .route("/api/products/import", post(import_products))
        .route("/api/products/export", get(export_products))
        .route("/api/products/:sku", get(product_detail))
        .route("/api/products/:sku/on-hand-new", post(set_on_hand_new))
        .route("/api/products/:sku/on-hand-current", post(set_on_hand_current))
        .route("/api/products/:sku/committed", post(set_committed))
        .route("/api/products/:sku/stage", post(stage_additions))
        .route("/api/products/:sku/commit", post(commit_staged))
        .route("/api/products/:sku/undo", post(undo_change))
        .route("/api/products/:sku/variants", post(set_variant_on_hand_new))
        .route("/api/products/:sku/orders", post(record_order))
        .route("/api/products/:sku/returns", post(record_return))
        .route("/api/inventory/import", post(import_inventory))
        .route("/api/inventory/export", get(export_inventory))
        .route("/api/snapshot", get(download_snapshot).post(restore_snapshot))
        .route_layer(middleware::from_fn_with_state(state.clone(), login::require_auth));

    Router::new()
        .route("/", get(login::serve_index))
        .route("/login", get(login::serve_login_page).post(login::handle_login))
        .route("/signup", get(login::serve_signup_page))
        .route("/logout", get(login::handle_logout).post(login::handle_logout))
        .route("/api/users/create", post(login::create_user))
        .route("/api/users/set-role", post(login::set_role))
        .merge(protected)
        .nest_service("/static", ServeDir::new(&state.config.static_dir))
        .with_state(state)
}

pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let address = config.address();
    let state = Arc::new(AppState::open(config)?);
    let app = build_router(state);

    let listener = TcpListener::bind(&address).await?;
    info!("Listening on http://{}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn serve_master_view() -> Html<&'static str> {
    Html(include_str!("./static/mv.html"))
}

async fn serve_product_page(Path(_sku): Path<String>) -> Html<&'static str> {
    Html(include_str!("./static/product.html"))
}

/// Bytes of the multipart field called `name`.
async fn read_field(multipart: &mut Multipart, name: &str) -> Result<Option<Vec<u8>>, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        if field.name() == Some(name) {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| AppError::BadRequest(e.to_string()))?;
            return Ok(Some(bytes.to_vec()));
        }
    }
    Ok(None)
}

/// The uploaded `file` field as text, without a byte-order mark.
async fn read_csv_upload(multipart: &mut Multipart) -> Result<String, AppError> {
    let bytes = read_field(multipart, "file").await?.ok_or(ImportError::MissingFile)?;
    let text = String::from_utf8(bytes).map_err(|_| ImportError::Encoding)?;
    Ok(text.trim_start_matches('\u{feff}').to_string())
}

fn csv_download(table: &ExportTable) -> Result<Response, AppError> {
    let body = table.to_csv()?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", table.filename),
            ),
        ],
        body,
    )
        .into_response())
}

fn xlsx_download(table: &ExportTable) -> Result<Response, AppError> {
    let body = table.to_xlsx()?;
    Ok((
        [
            (
                header::CONTENT_TYPE,
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet".to_string(),
            ),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", table.xlsx_filename()),
            ),
        ],
        body,
    )
        .into_response())
}

#[derive(Serialize)]
struct MasterView {
    #[serde(flatten)]
    page: Page<StockRow>,
    /// Swatch colors for the SKUs on this page
    colors: BTreeMap<String, Vec<String>>,
}

async fn list_products(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MasterQuery>,
) -> Result<Json<MasterView>, AppError> {
    let products = state.store.fetch_products()?;
    let variants = state.store.fetch_all_variants()?;
    let page = view::master_view(&products, &variants, &query);

    let colors = page
        .items
        .iter()
        .map(|row| (row.sku.clone(), view::colors_for_sku(&products, &row.sku)))
        .collect();

    Ok(Json(MasterView { page, colors }))
}

async fn import_products(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    mut multipart: Multipart,
) -> Result<Json<ImportSummary>, AppError> {
    require_edit(&user)?;
    let text = read_csv_upload(&mut multipart).await?;
    let parsed = importer::parse_products(&text, &state.config.default_location)?;
    let summary = state.store.import_products(parsed)?;
    info!("{} imported products", user.email);
    Ok(Json(summary))
}

#[derive(Debug, Default, Deserialize)]
struct ExportQuery {
    format: Option<String>,
}

async fn export_products(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, AppError> {
    require_edit(&user)?;
    let products = state.store.fetch_products()?;
    let variants = state.store.fetch_all_variants()?;
    let last_headers = state.store.last_headers()?;
    let table = exporter::export_master(&products, &variants, &last_headers);

    match query.format.as_deref().unwrap_or("csv") {
        "csv" => csv_download(&table),
        "xlsx" => xlsx_download(&table),
        other => Err(AppError::BadRequest(format!("Unknown export format: {other}"))),
    }
}

#[derive(Debug, Default, Deserialize)]
struct DetailQuery {
    location: Option<String>,
    color: Option<String>,
    size: Option<String>,
}

#[derive(Serialize)]
struct DetailResponse {
    #[serde(flatten)]
    detail: ProductDetail,
    /// Location row picked by the `location` query
    selected: Option<Product>,
    colors: Vec<String>,
}

async fn product_detail(
    State(state): State<Arc<AppState>>,
    Path(sku): Path<String>,
    Query(query): Query<DetailQuery>,
) -> Result<Json<DetailResponse>, AppError> {
    let locations = state.store.fetch_products_by_sku(&sku)?;
    let colors = view::colors_for_sku(&locations, &sku);
    let selected = state
        .store
        .fetch_product_by_sku_location(&sku, query.location.as_deref())?;
    let variants = state.store.fetch_variants_by_sku(&sku)?;
    let recent = state.store.recent_changes(&sku)?;

    let detail = view::product_detail(
        locations,
        variants,
        query.color.as_deref(),
        query.size.as_deref(),
        recent,
    )
    .ok_or_else(|| AppError::NotFound(format!("No product with SKU {sku}")))?;

    Ok(Json(DetailResponse {
        detail,
        selected,
        colors,
    }))
}

#[derive(Debug, Deserialize)]
struct QuantityUpdate {
    location: String,
    value: i64,
}

async fn set_on_hand_new(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(sku): Path<String>,
    Json(body): Json<QuantityUpdate>,
) -> Result<Json<serde_json::Value>, AppError> {
    require_edit(&user)?;
    let updated = state.store.update_on_hand_new(&sku, &body.location, body.value)?;
    Ok(Json(json!({ "updated": updated })))
}

async fn set_on_hand_current(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(sku): Path<String>,
    Json(body): Json<QuantityUpdate>,
) -> Result<Json<serde_json::Value>, AppError> {
    require_edit(&user)?;
    let updated = state.store.update_on_hand_current(&sku, &body.location, body.value)?;
    Ok(Json(json!({ "updated": updated })))
}

async fn set_committed(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(sku): Path<String>,
    Json(body): Json<QuantityUpdate>,
) -> Result<Json<serde_json::Value>, AppError> {
    require_edit(&user)?;
    let updated = state.store.update_committed(&sku, &body.location, body.value)?;
    Ok(Json(json!({ "updated": updated })))
}

#[derive(Debug, Deserialize)]
struct Addition {
    location: String,
    quantity: i64,
}

#[derive(Debug, Deserialize)]
struct StageRequest {
    additions: Vec<Addition>,
}

async fn stage_additions(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(sku): Path<String>,
    Json(body): Json<StageRequest>,
) -> Result<Json<Vec<Product>>, AppError> {
    require_edit(&user)?;
    let entries: Vec<(String, i64)> = body
        .additions
        .into_iter()
        .map(|a| (a.location, a.quantity))
        .collect();
    Ok(Json(state.store.stage_additions(&sku, &entries)?))
}

#[derive(Serialize)]
struct Committed {
    products: Vec<Product>,
    variants: Vec<ProductVariant>,
}

async fn commit_staged(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(sku): Path<String>,
) -> Result<Json<Committed>, AppError> {
    require_edit(&user)?;
    let products = state.store.commit_staged(&sku)?;
    let variants = state.store.commit_variants(&sku)?;
    info!("{} committed stock for {}", user.email, sku);
    Ok(Json(Committed { products, variants }))
}

#[derive(Debug, Deserialize)]
struct UndoRequest {
    index: usize,
}

async fn undo_change(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(sku): Path<String>,
    Json(body): Json<UndoRequest>,
) -> Result<Json<StockChange>, AppError> {
    require_edit(&user)?;
    state
        .store
        .undo_change(&sku, body.index)?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("No recent change {} for {sku}", body.index)))
}

#[derive(Debug, Deserialize)]
struct VariantUpdate {
    location: String,
    #[serde(default)]
    color: String,
    #[serde(default)]
    size: String,
    value: i64,
}

async fn set_variant_on_hand_new(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(sku): Path<String>,
    Json(body): Json<VariantUpdate>,
) -> Result<Json<serde_json::Value>, AppError> {
    require_edit(&user)?;
    let key = VariantKey::new(&sku, &body.location, &body.color, &body.size);
    let updated = state.store.set_variant_on_hand_new(&key, body.value)?;
    Ok(Json(json!({ "updated": updated })))
}

fn positive(quantity: i64) -> Result<i64, AppError> {
    if quantity > 0 {
        Ok(quantity)
    } else {
        Err(AppError::BadRequest("quantity must be positive".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct OrderRequest {
    location: String,
    quantity: i64,
    #[serde(default)]
    fulfilled: bool,
}

async fn record_order(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(sku): Path<String>,
    Json(body): Json<OrderRequest>,
) -> Result<Json<Product>, AppError> {
    require_edit(&user)?;
    let quantity = positive(body.quantity)?;
    let product = state.store.apply_to_product(&sku, &body.location, |p| {
        if body.fulfilled {
            inventory::handle_order_fulfilled(p, quantity)
        } else {
            inventory::handle_order_placed(p, quantity)
        }
    })?;
    Ok(Json(product))
}

#[derive(Debug, Deserialize)]
struct ReturnRequest {
    location: String,
    quantity: i64,
    status: ReturnStatus,
}

async fn record_return(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(sku): Path<String>,
    Json(body): Json<ReturnRequest>,
) -> Result<Json<Product>, AppError> {
    require_edit(&user)?;
    let quantity = positive(body.quantity)?;
    let product = state
        .store
        .apply_to_product(&sku, &body.location, |p| inventory::handle_return(p, quantity, body.status))?;
    Ok(Json(product))
}

async fn import_inventory(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, AppError> {
    require_edit(&user)?;
    let text = read_csv_upload(&mut multipart).await?;
    if text.trim().is_empty() {
        info!("Inventory import file was empty");
        return Ok(Json(json!({ "inserted": 0, "updated": 0 })));
    }

    let records = importer::parse_inventory_records(&text)?;
    let processed = records.len();
    let upserted = state.store.upsert_inventory(records)?;
    info!("Imported {} inventory rows, {} upserted", processed, upserted);
    Ok(Json(json!({ "processed": processed, "upserted": upserted })))
}

async fn export_inventory(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let records = state.store.fetch_inventory()?;
    csv_download(&exporter::export_inventory(&records))
}

async fn download_snapshot(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Response, AppError> {
    require_edit(&user)?;
    let buffer = saving::snapshot_to_bytes(&state.store.snapshot()?)?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/gzip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{SNAPSHOT_FILENAME}\""),
            ),
        ],
        buffer,
    )
        .into_response())
}

async fn restore_snapshot(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, AppError> {
    require_edit(&user)?;
    let bytes = read_field(&mut multipart, "snapshot")
        .await?
        .ok_or_else(|| AppError::BadRequest("No snapshot data received".to_string()))?;
    let tables = saving::snapshot_from_bytes(&bytes)
        .map_err(|e| AppError::BadRequest(format!("Failed to load snapshot: {e}")))?;

    let products = tables.products.len();
    state.store.restore(tables)?;
    info!("{} restored a snapshot with {} products", user.email, products);
    Ok(Json(json!({ "ok": true, "products": products })))
}
