//! Image management. Every route here sits behind the auth gate.

use axum::{
    extract::{Multipart, Path, State, multipart::MultipartError},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Redirect, Response},
};

use crate::{
    auth::with_notice,
    documents::{copy_file, missing_or_fail, remove_file, serve_attachment},
    error::AppError,
    session::{Notice, Session},
    state::AppState,
    store::{self, StoreError},
    template,
};

/// Multipart field carrying the uploaded file.
const UPLOAD_FIELD: &str = "image_name";

pub async fn upload_form(session: Session) -> Response {
    Html(template::upload_page(&session.page_context()).into_string()).into_response()
}

pub async fn upload(
    State(state): State<AppState>,
    session: Session,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let mut upload = None;
    loop {
        // Oversized (413) and malformed (400) bodies are the client's fault.
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return Ok(refused_upload(e)),
        };
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        // Browsers may send a full client path; keep only the last component.
        let file_name = field
            .file_name()
            .and_then(|f| f.rsplit(['/', '\\']).next())
            .unwrap_or("")
            .to_string();
        let bytes = match field.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => return Ok(refused_upload(e)),
        };
        upload = Some((file_name, bytes));
        break;
    }

    let (name, bytes) = match upload {
        Some((name, bytes)) if !name.is_empty() => (name, bytes),
        _ => return Ok(rejected(&session, "No image selected.")),
    };

    match state.images.put(&name, &bytes).await {
        Ok(()) => {
            tracing::info!(image = %name, bytes = bytes.len(), "image uploaded");
            session.notify(Notice::success(format!("{name} has been uploaded.")));
            Ok(Redirect::to("/").into_response())
        }
        Err(StoreError::Io(e)) => Err(AppError::Io(e)),
        Err(e) => Ok(rejected(&session, &e.to_string())),
    }
}

fn refused_upload(e: MultipartError) -> Response {
    tracing::warn!(status = %e.status(), "upload refused: {}", e.body_text());
    e.into_response()
}

fn rejected(session: &Session, message: &str) -> Response {
    let ctx = with_notice(session, Notice::error(message));
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Html(template::upload_page(&ctx).into_string()),
    )
        .into_response()
}

pub async fn show(
    State(state): State<AppState>,
    session: Session,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    if let Err(e) = state.images.existing_path(&name).await {
        return missing_or_fail(&session, e);
    }
    let ctx = session.page_context();
    Ok(Html(template::show_image_page(&ctx, &name).into_string()).into_response())
}

/// Raw image bytes for the display page.
pub async fn raw(
    State(state): State<AppState>,
    session: Session,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    match state.images.read(&name).await {
        Ok(bytes) => Ok(([(header::CONTENT_TYPE, store::content_type(&name))], bytes).into_response()),
        Err(e) => missing_or_fail(&session, e),
    }
}

pub async fn download(
    State(state): State<AppState>,
    session: Session,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    serve_attachment(&state.images, &session, &name).await
}

pub async fn delete(
    State(state): State<AppState>,
    session: Session,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    remove_file(&state.images, &session, &name).await
}

pub async fn duplicate(
    State(state): State<AppState>,
    session: Session,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    copy_file(&state.images, &session, &name).await
}
