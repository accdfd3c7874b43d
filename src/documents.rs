use axum::{
    Form,
    body::Body,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Redirect, Response},
};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;
use tokio_util::io::ReaderStream;

use crate::{
    auth::with_notice,
    error::AppError,
    session::{Notice, Session},
    state::AppState,
    store::{self, FileStore, StoreError},
    template,
};

// ── Listing ───────────────────────────────────────────────────────────────────

pub async fn index(State(state): State<AppState>, session: Session) -> Result<Response, AppError> {
    let documents = state.documents.list().await?;
    let images = state.images.list().await?;
    let ctx = session.page_context();
    Ok(Html(template::index(&ctx, &documents, &images).into_string()).into_response())
}

// ── View / download ───────────────────────────────────────────────────────────

pub async fn view(
    State(state): State<AppState>,
    session: Session,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    let bytes = match state.documents.read(&name).await {
        Ok(b) => b,
        Err(e) => return missing_or_fail(&session, e),
    };

    if store::is_markdown(&name) {
        let text = String::from_utf8_lossy(&bytes);
        let html_body = render_markdown(&text);
        let ctx = session.page_context();
        return Ok(Html(template::markdown_page(&ctx, &name, &html_body).into_string()).into_response());
    }

    Ok((
        [(header::CONTENT_TYPE, store::content_type(&name))],
        bytes,
    )
        .into_response())
}

pub async fn download(
    State(state): State<AppState>,
    session: Session,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    serve_attachment(&state.documents, &session, &name).await
}

/// Stream a stored file with `Content-Disposition: attachment`.
pub async fn serve_attachment(
    files: &FileStore,
    session: &Session,
    name: &str,
) -> Result<Response, AppError> {
    let path = match files.existing_path(name).await {
        Ok(p) => p,
        Err(e) => return missing_or_fail(session, e),
    };

    let file = tokio::fs::File::open(&path).await.map_err(AppError::Io)?;
    let content_length = file.metadata().await.map_err(AppError::Io)?.len();
    let body = Body::from_stream(ReaderStream::new(file));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, store::content_type(name))
        .header(header::CONTENT_LENGTH, content_length)
        .header(header::CONTENT_DISPOSITION, attachment_disposition(name))
        .body(body)
        .map_err(|e| AppError::Internal(e.to_string()))
}

// ── Edit / submit ─────────────────────────────────────────────────────────────

pub async fn edit(
    State(state): State<AppState>,
    session: Session,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    let content = match state.documents.read_to_string(&name).await {
        Ok(c) => c,
        Err(e) => return missing_or_fail(&session, e),
    };
    let ctx = session.page_context();
    Ok(Html(template::edit_page(&ctx, &name, &content).into_string()).into_response())
}

#[derive(Deserialize)]
pub struct ContentForm {
    pub content: String,
}

pub async fn submit_changes(
    State(state): State<AppState>,
    session: Session,
    Path(name): Path<String>,
    Form(form): Form<ContentForm>,
) -> Result<Response, AppError> {
    if let Err(e) = state.documents.replace(&name, form.content.as_bytes()).await {
        return missing_or_fail(&session, e);
    }

    tracing::info!(document = %name, bytes = form.content.len(), "document updated");
    session.notify(Notice::success(format!("{name} has been updated.")));
    Ok(Redirect::to("/").into_response())
}

// ── Create ────────────────────────────────────────────────────────────────────

pub async fn new_document(session: Session) -> Response {
    Html(template::new_document_page(&session.page_context(), "").into_string()).into_response()
}

#[derive(Deserialize)]
pub struct CreateForm {
    #[serde(default)]
    pub document_name: String,
}

pub async fn create(
    State(state): State<AppState>,
    session: Session,
    Form(form): Form<CreateForm>,
) -> Result<Response, AppError> {
    match state.documents.create(&form.document_name).await {
        Ok(name) => {
            tracing::info!(document = %name, "document created");
            session.notify(Notice::success(format!("{name} has been created")));
            Ok(Redirect::to("/").into_response())
        }
        Err(StoreError::Io(e)) => Err(AppError::Io(e)),
        Err(e) => {
            let ctx = with_notice(&session, Notice::error(e.to_string()));
            let page = template::new_document_page(&ctx, form.document_name.trim());
            Ok((StatusCode::UNPROCESSABLE_ENTITY, Html(page.into_string())).into_response())
        }
    }
}

// ── Delete / duplicate ────────────────────────────────────────────────────────

pub async fn delete(
    State(state): State<AppState>,
    session: Session,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    remove_file(&state.documents, &session, &name).await
}

pub async fn duplicate(
    State(state): State<AppState>,
    session: Session,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    copy_file(&state.documents, &session, &name).await
}

/// Delete `name`, queueing a notice either way. An absent file is not an error.
pub async fn remove_file(
    files: &FileStore,
    session: &Session,
    name: &str,
) -> Result<Response, AppError> {
    match files.delete(name).await {
        Ok(()) => {
            tracing::info!(file = %name, dir = %files.dir().display(), "deleted");
            session.notify(Notice::success(format!("{name} has been deleted.")));
        }
        Err(StoreError::NotFound(_)) => {
            session.notify(Notice::error(format!("{name} does not exist.")));
        }
        Err(e) => return Err(e.into()),
    }
    Ok(Redirect::to("/").into_response())
}

pub async fn copy_file(
    files: &FileStore,
    session: &Session,
    name: &str,
) -> Result<Response, AppError> {
    match files.duplicate(name).await {
        Ok(copy) => {
            tracing::info!(file = %name, copy = %copy, "duplicated");
            session.notify(Notice::success(format!("{name} has been duplicated as {copy}.")));
            Ok(Redirect::to("/").into_response())
        }
        Err(e) => missing_or_fail(session, e),
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Absent (or unaddressable) files degrade to a redirect to the listing with
/// a queued notice. Anything else is a server fault.
pub fn missing_or_fail(session: &Session, e: StoreError) -> Result<Response, AppError> {
    match e {
        StoreError::NotFound(name) | StoreError::InvalidName(name) => {
            session.notify(Notice::error(format!("{name} does not exist.")));
            Ok(Redirect::to("/").into_response())
        }
        other => Err(other.into()),
    }
}

fn render_markdown(content: &str) -> String {
    let mut opts = markdown::Options::gfm();
    opts.compile.allow_dangerous_html = false;
    markdown::to_html_with_options(content, &opts).unwrap_or_else(|_| markdown::to_html(content))
}

fn attachment_disposition(name: &str) -> String {
    format!(
        "attachment; filename*=UTF-8''{}",
        utf8_percent_encode(name, NON_ALPHANUMERIC)
    )
}
