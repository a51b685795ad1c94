use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Path, Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post, put};
use axum::{Extension, Json, Router};
use chrono::Utc;
use futures::future::join_all;
use jotter_core::models::{NewNote, NoteChanges};
use jotter_core::reconcile::{reconcile_attachments, AttachmentReconciler, DeletionReport};
use jotter_core::services::DatabaseService;
use jotter_core::storage::{RemoteObjectStore, StoredObject, UploadRequest};
use jotter_core::{Attachment, Note, NoteId};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{AdminAuthenticator, AdminPrincipal, IssuedToken};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::forms::{read_image, NoteForm, UploadedFile};
use crate::rate_limit::{
    caller_fingerprint, ClientAddr, EndpointRateLimiter, ProtectedEndpoint,
    RateLimitMetricsSnapshot,
};

const PDF_CONTENT_TYPE: &str = "application/pdf";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    notes: DatabaseService,
    store: Arc<dyn RemoteObjectStore>,
    reconciler: Arc<AttachmentReconciler>,
    authenticator: Arc<AdminAuthenticator>,
    endpoint_rate_limiter: Arc<EndpointRateLimiter>,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        notes: DatabaseService,
        store: Arc<dyn RemoteObjectStore>,
    ) -> Self {
        Self {
            notes,
            store,
            reconciler: Arc::new(AttachmentReconciler::new(config.media.clone())),
            authenticator: Arc::new(AdminAuthenticator::new(config.clone())),
            endpoint_rate_limiter: Arc::new(EndpointRateLimiter::from_config(config.as_ref())),
            config,
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route("/notes", post(create_note))
        .route("/notes/{id}", put(update_note).delete(delete_note))
        .route("/images", post(upload_image))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    let api_routes = Router::new()
        .route("/auth/login", post(login))
        .route("/notes", get(list_notes))
        .route("/notes/{id}", get(get_note))
        .merge(admin_routes);

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/api", api_routes)
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    rate_limit: RateLimitMetricsSnapshot,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
        rate_limit: state.endpoint_rate_limiter.metrics_snapshot().await,
    })
}

/// Admin guard. Failed credential checks spend the caller's login budget,
/// and a caller whose budget is spent is refused before any check runs.
async fn require_admin(
    State(state): State<AppState>,
    ClientAddr(client): ClientAddr,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let limiter = &state.endpoint_rate_limiter;
    limiter
        .ensure_available(ProtectedEndpoint::Login, &client)
        .await?;

    let principal = match state.authenticator.authenticate(request.headers()) {
        Ok(principal) => principal,
        Err(error) => {
            limiter.check(ProtectedEndpoint::Login, &client).await?;
            tracing::warn!(
                client = caller_fingerprint(&client),
                "Rejected admin credentials"
            );
            return Err(error);
        }
    };
    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    password: Option<String>,
}

async fn login(
    State(state): State<AppState>,
    ClientAddr(client): ClientAddr,
    Json(request): Json<LoginRequest>,
) -> Result<Json<IssuedToken>, AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::Login, &client)
        .await?;

    let password = request
        .password
        .filter(|password| !password.trim().is_empty())
        .ok_or_else(|| AppError::bad_request("Password is required"))?;
    if !state.authenticator.password_matches(password.trim()) {
        tracing::warn!(client = caller_fingerprint(&client), "Rejected admin login");
        return Err(AppError::unauthorized("Invalid password"));
    }

    let token = state.authenticator.issue_token()?;
    tracing::info!(
        client = caller_fingerprint(&client),
        expires_at = token.expires_at,
        "Issued admin token"
    );
    Ok(Json(token))
}

async fn list_notes(State(state): State<AppState>) -> Result<Json<Vec<Note>>, AppError> {
    Ok(Json(state.notes.list_notes().await?))
}

async fn get_note(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Note>, AppError> {
    let id = parse_note_id(&id)?;
    let note = state
        .notes
        .get_note(&id)
        .await?
        .ok_or_else(|| AppError::not_found("Note not found"))?;
    Ok(Json(note))
}

#[derive(Debug, Serialize)]
struct NoteMutationResponse {
    note: Note,
    cleanup: DeletionReport,
}

async fn create_note(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminPrincipal>,
    mut multipart: Multipart,
) -> Result<Json<NoteMutationResponse>, AppError> {
    let form = NoteForm::read(&mut multipart, state.config.max_pdfs_per_request).await?;
    let mut new_note = NewNote::new(
        form.title.clone().unwrap_or_default(),
        form.content.clone().unwrap_or_default(),
        Vec::new(),
    )?;

    let uploaded = upload_pdfs(&state, &admin, &form).await?;
    new_note.attachments = uploaded.clone();

    let note = match state.notes.create_note(new_note).await {
        Ok(note) => note,
        Err(error) => {
            reclaim_uploads(&state, &uploaded).await;
            return Err(error.into());
        }
    };

    tracing::info!(
        note = %note.id,
        attachments = note.attachments.len(),
        via = ?admin.method,
        "Created note"
    );
    Ok(Json(NoteMutationResponse {
        note,
        cleanup: DeletionReport::default(),
    }))
}

async fn update_note(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminPrincipal>,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<NoteMutationResponse>, AppError> {
    let id = parse_note_id(&id)?;
    let form = NoteForm::read(&mut multipart, state.config.max_pdfs_per_request).await?;

    let mut changes = NoteChanges::default();
    if let Some(title) = form.title.clone() {
        changes = changes.with_title(title)?;
    }
    if let Some(content) = form.content.as_deref() {
        changes = changes.with_content(content);
    }
    if state.notes.get_note(&id).await?.is_none() {
        return Err(AppError::not_found("Note not found"));
    }

    let uploaded = upload_pdfs(&state, &admin, &form).await?;
    let remove: HashSet<String> = form.remove_pdfs.iter().cloned().collect();
    let reconciler = state.reconciler.as_ref();

    // Planned against the committed note so overlapping updates never drop
    // each other's uploads.
    let planned = state
        .notes
        .update_with(&id, |existing| {
            let orphaned_images = form
                .content
                .as_deref()
                .map(|content| reconciler.diff_embedded_refs(&existing.content, content))
                .unwrap_or_default();
            // Without a keep list every existing attachment stays.
            let keep: HashSet<String> = form.keep_pdfs.as_ref().map_or_else(
                || existing.attachment_urls().map(ToOwned::to_owned).collect(),
                |urls| urls.iter().cloned().collect(),
            );
            let reconciliation =
                reconcile_attachments(&existing.attachments, &uploaded, &keep, &remove);
            let to_delete: Vec<String> = reconciliation
                .to_delete
                .into_iter()
                .chain(orphaned_images)
                .collect();
            Ok((changes.with_attachments(reconciliation.final_list), to_delete))
        })
        .await;

    let (note, to_delete) = match planned {
        Ok(planned) => planned,
        Err(error) => {
            reclaim_uploads(&state, &uploaded).await;
            return Err(error.into());
        }
    };

    let to_delete = state.reconciler.unreferenced_by(&note, &to_delete);
    let cleanup = state
        .reconciler
        .apply_deletions(state.store.as_ref(), &to_delete)
        .await;

    tracing::info!(
        note = %note.id,
        uploaded = uploaded.len(),
        attachments = note.attachments.len(),
        deleted = cleanup.deleted,
        skipped = cleanup.skipped,
        failed = cleanup.failed_count(),
        via = ?admin.method,
        "Updated note"
    );
    Ok(Json(NoteMutationResponse { note, cleanup }))
}

#[derive(Debug, Serialize)]
struct DeleteNoteResponse {
    message: &'static str,
    note: Note,
    cleanup: DeletionReport,
}

async fn delete_note(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminPrincipal>,
    Path(id): Path<String>,
) -> Result<Json<DeleteNoteResponse>, AppError> {
    let id = parse_note_id(&id)?;
    let note = state
        .notes
        .delete_note(&id)
        .await?
        .ok_or_else(|| AppError::not_found("Note not found"))?;

    let reclaim = state.reconciler.handle_note_deleted(&note);
    let cleanup = state
        .reconciler
        .apply_deletions(state.store.as_ref(), &reclaim)
        .await;

    tracing::info!(
        note = %note.id,
        deleted = cleanup.deleted,
        failed = cleanup.failed_count(),
        via = ?admin.method,
        "Deleted note"
    );
    Ok(Json(DeleteNoteResponse {
        message: "Note deleted successfully",
        note,
        cleanup,
    }))
}

#[derive(Debug, Serialize)]
struct ImageUploadResponse {
    url: String,
}

async fn upload_image(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminPrincipal>,
    mut multipart: Multipart,
) -> Result<Json<ImageUploadResponse>, AppError> {
    let image = read_image(&mut multipart).await?;
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::MediaUpload, &admin.subject)
        .await?;

    let folder = state.config.media.images_folder();
    let stored = state
        .store
        .upload(UploadRequest {
            bytes: &image.bytes,
            folder: &folder,
            file_name: &image.file_name,
            content_type: image.content_type.as_deref(),
        })
        .await
        .map_err(|error| {
            tracing::error!(error = %error, "Inline image upload failed");
            AppError::external("Image upload failed")
        })?;

    tracing::info!(object_id = %stored.object_id, "Uploaded inline image");
    Ok(Json(ImageUploadResponse { url: stored.url }))
}

/// Upload every PDF of the form concurrently.
///
/// Any failure rejects the request; objects already published by it are
/// reclaimed first.
async fn upload_pdfs(
    state: &AppState,
    admin: &AdminPrincipal,
    form: &NoteForm,
) -> Result<Vec<Attachment>, AppError> {
    if form.pdfs.is_empty() {
        return Ok(Vec::new());
    }
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::MediaUpload, &admin.subject)
        .await?;

    let folder = state.config.media.pdfs_folder();
    let results = join_all(
        form.pdfs
            .iter()
            .map(|file| upload_one(state.store.as_ref(), &folder, file)),
    )
    .await;

    let mut attachments = Vec::with_capacity(results.len());
    let mut failures = 0_usize;
    for (index, (file, result)) in form.pdfs.iter().zip(results).enumerate() {
        match result {
            Ok(stored) => attachments.push(Attachment::from_upload(
                stored.url,
                form.pdf_title(index),
                &file.file_name,
            )),
            Err(error) => {
                tracing::error!(file = %file.file_name, error = %error, "PDF upload failed");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        reclaim_uploads(state, &attachments).await;
        return Err(AppError::external(format!(
            "{failures} of {} PDF uploads failed",
            form.pdfs.len()
        )));
    }
    Ok(attachments)
}

async fn upload_one(
    store: &dyn RemoteObjectStore,
    folder: &str,
    file: &UploadedFile,
) -> jotter_core::Result<StoredObject> {
    store
        .upload(UploadRequest {
            bytes: &file.bytes,
            folder,
            file_name: &file.file_name,
            content_type: Some(file.content_type.as_deref().unwrap_or(PDF_CONTENT_TYPE)),
        })
        .await
}

async fn reclaim_uploads(state: &AppState, uploaded: &[Attachment]) {
    if uploaded.is_empty() {
        return;
    }
    let report = state
        .reconciler
        .apply_deletions(
            state.store.as_ref(),
            uploaded.iter().map(|attachment| attachment.url.as_str()),
        )
        .await;
    if !report.is_clean() {
        tracing::warn!(
            failed = report.failed_count(),
            "Could not reclaim uploads of a rejected request"
        );
    }
}

fn parse_note_id(raw: &str) -> Result<NoteId, AppError> {
    raw.parse()
        .map_err(|_| AppError::bad_request("Invalid note id"))
}
