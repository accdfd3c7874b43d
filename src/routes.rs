use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::StatusCode,
    middleware,
    routing::{get, post},
};
use tower_cookies::CookieManagerLayer;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use crate::{auth, documents, images, state::AppState};

/// Build the whole application.
///
/// Static paths (`/new`, `/create`, `/upload`, ...) take precedence over the
/// `/{name}` captures, so documents with those exact names are not routable.
pub fn app(state: AppState, max_upload_bytes: usize) -> Router {
    let public = Router::new()
        .route("/healthz", get(|| async { StatusCode::OK }))
        .route("/", get(documents::index))
        .route("/{name}", get(documents::view))
        .route("/{name}/download", get(documents::download))
        .merge(auth::router());

    let protected = Router::new()
        .route("/new", get(documents::new_document))
        .route("/create", post(documents::create))
        .route("/{name}", post(documents::submit_changes))
        .route("/{name}/edit", get(documents::edit))
        .route("/{name}/delete", post(documents::delete))
        .route("/{name}/duplicate_file", post(documents::duplicate))
        .route("/upload", get(images::upload_form))
        .route("/upload_image", post(images::upload))
        .route("/{name}/show_image", get(images::show))
        .route("/{name}/image", get(images::raw))
        .route("/{name}/download_image", get(images::download))
        .route("/{name}/delete_image", post(images::delete))
        .route("/{name}/duplicate_image", post(images::duplicate))
        .merge(auth::signout_route())
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    // CatchPanicLayer is outermost so it recovers from panics anywhere in the stack.
    Router::new()
        .merge(public)
        .merge(protected)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
        .layer(CookieManagerLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::credentials::{CredentialStore, hash_password},
        config::key_from_secret,
        store::{Accept, FileStore},
    };
    use axum::{
        body::Body,
        http::{Request, Response, header},
    };
    use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
    use http_body_util::BodyExt;
    use std::{collections::BTreeMap, fs, path::PathBuf};
    use tempfile::TempDir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "----md-cms-test-boundary";

    /// Drives the router in-process and carries cookies between requests.
    struct Client {
        app: Router,
        jar: BTreeMap<String, String>,
        _tmp: TempDir,
        docs: PathBuf,
        imgs: PathBuf,
    }

    struct Reply {
        status: StatusCode,
        location: Option<String>,
        content_type: Option<String>,
        disposition: Option<String>,
        body: Vec<u8>,
    }

    impl Reply {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.body).to_string()
        }
    }

    impl Client {
        fn new() -> Self {
            Self::with_upload_limit(1024 * 1024)
        }

        fn with_upload_limit(max_upload_bytes: usize) -> Self {
            let tmp = TempDir::new().unwrap();
            let docs = tmp.path().join("data");
            let imgs = tmp.path().join("img");
            fs::create_dir_all(&docs).unwrap();
            fs::create_dir_all(&imgs).unwrap();
            fs::write(docs.join("changes.txt"), "There are many changes.").unwrap();
            fs::write(docs.join("about.md"), "# Python is...\n\nA language.").unwrap();
            fs::write(docs.join("history.txt"), "1993 - Yukihiro Matsumoto").unwrap();
            fs::write(imgs.join("logo.png"), b"\x89PNG logo").unwrap();

            let users = tmp.path().join("users.yaml");
            fs::write(&users, format!("admin: '{}'\n", hash_password("secret").unwrap())).unwrap();

            let state = AppState {
                documents: FileStore::new(&docs, Accept::Text),
                images: FileStore::new(&imgs, Accept::Images),
                credentials: CredentialStore::new(&users),
                cookie_key: key_from_secret("test secret"),
            };

            Client {
                app: app(state, max_upload_bytes),
                jar: BTreeMap::new(),
                _tmp: tmp,
                docs,
                imgs,
            }
        }

        async fn send(&mut self, mut req: Request<Body>) -> Reply {
            if !self.jar.is_empty() {
                let cookie = self
                    .jar
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join("; ");
                req.headers_mut()
                    .insert(header::COOKIE, cookie.parse().unwrap());
            }
            let res: Response<Body> = self.app.clone().oneshot(req).await.unwrap();
            self.store_cookies(&res);

            let header_str = |name: header::HeaderName| {
                res.headers()
                    .get(name)
                    .map(|v: &header::HeaderValue| v.to_str().unwrap().to_string())
            };
            let status = res.status();
            let location = header_str(header::LOCATION);
            let content_type = header_str(header::CONTENT_TYPE);
            let disposition = header_str(header::CONTENT_DISPOSITION);
            let body = res.into_body().collect().await.unwrap().to_bytes().to_vec();
            Reply {
                status,
                location,
                content_type,
                disposition,
                body,
            }
        }

        fn store_cookies(&mut self, res: &Response<Body>) {
            for value in res.headers().get_all(header::SET_COOKIE) {
                let value = value.to_str().unwrap();
                let mut parts = value.split(';');
                let (name, val) = parts.next().unwrap().trim().split_once('=').unwrap();
                let removed = parts.any(|p| p.trim().eq_ignore_ascii_case("Max-Age=0"));
                if removed {
                    self.jar.remove(name);
                } else {
                    self.jar.insert(name.to_string(), val.to_string());
                }
            }
        }

        async fn get(&mut self, uri: &str) -> Reply {
            let req = Request::get(uri).body(Body::empty()).unwrap();
            self.send(req).await
        }

        async fn post(&mut self, uri: &str, form: &str) -> Reply {
            let req = Request::post(uri)
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(form.to_string()))
                .unwrap();
            self.send(req).await
        }

        async fn upload(&mut self, file_name: &str, bytes: &[u8]) -> Reply {
            let mut body = Vec::new();
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image_name\"; \
                     filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

            let req = Request::post("/upload_image")
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={BOUNDARY}"),
                )
                .body(Body::from(body))
                .unwrap();
            self.send(req).await
        }

        async fn sign_in(&mut self) {
            let res = self.post("/users/signin", "username=admin&password=secret").await;
            assert!(res.status.is_redirection());
            assert_eq!(res.location.as_deref(), Some("/"));
            assert!(self.jar.contains_key("cms_session"));

            // Raw image bytes are gated but render no page, so queued notices survive.
            let gated = self.get("/logo.png/image").await;
            assert_eq!(gated.status, StatusCode::OK);
        }
    }

    // ── Listing and viewing ───────────────────────────────────────────────────

    #[tokio::test]
    async fn index_lists_documents() {
        let mut client = Client::new();
        let res = client.get("/").await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.content_type.as_deref(), Some("text/html; charset=utf-8"));
        let body = res.text();
        assert!(body.contains("changes.txt"));
        assert!(body.contains("about.md"));
        assert!(body.contains("history.txt"));
    }

    #[tokio::test]
    async fn index_tracks_directory_contents() {
        let mut client = Client::new();
        fs::write(client.docs.join("late.txt"), "").unwrap();
        fs::remove_file(client.docs.join("history.txt")).unwrap();

        let body = client.get("/").await.text();
        assert!(body.contains("late.txt"));
        assert!(!body.contains("history.txt"));
    }

    #[tokio::test]
    async fn text_document_is_served_raw() {
        let mut client = Client::new();
        let res = client.get("/changes.txt").await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.content_type.as_deref(), Some("text/plain; charset=utf-8"));
        assert_eq!(res.text(), "There are many changes.");
    }

    #[tokio::test]
    async fn markdown_document_is_rendered() {
        let mut client = Client::new();
        let res = client.get("/about.md").await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.content_type.as_deref(), Some("text/html; charset=utf-8"));
        assert!(res.text().contains("<h1>Python is...</h1>"));
    }

    #[tokio::test]
    async fn missing_document_notice_is_one_shot() {
        let mut client = Client::new();
        let res = client.get("/nonexistent.ext").await;
        assert!(res.status.is_redirection());
        assert_eq!(res.location.as_deref(), Some("/"));

        let first = client.get("/").await;
        assert_eq!(first.status, StatusCode::OK);
        assert!(first.text().contains("nonexistent.ext does not exist"));

        let second = client.get("/").await;
        assert!(!second.text().contains("nonexistent.ext does not exist"));
    }

    #[tokio::test]
    async fn download_forces_attachment() {
        let mut client = Client::new();
        let res = client.get("/history.txt/download").await;
        assert_eq!(res.status, StatusCode::OK);
        assert!(res.disposition.as_deref().unwrap().starts_with("attachment"));
        assert_eq!(res.text(), "1993 - Yukihiro Matsumoto");

        let missing = client.get("/ghost.txt/download").await;
        assert_eq!(missing.location.as_deref(), Some("/"));
    }

    // ── Auth gate ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn protected_routes_redirect_to_sign_in() {
        let mut client = Client::new();
        let before: Vec<_> = fs::read_dir(&client.docs).unwrap().collect();

        let attempts = [
            client.get("/changes.txt/edit").await,
            client.post("/changes.txt", "content=overwritten").await,
            client.get("/new").await,
            client.post("/create", "document_name=sneaky.txt").await,
            client.post("/changes.txt/delete", "").await,
            client.post("/changes.txt/duplicate_file", "").await,
            client.get("/upload").await,
            client.post("/users/signout", "").await,
        ];
        for res in &attempts {
            assert!(res.status.is_redirection());
            assert_eq!(res.location.as_deref(), Some("/users/signin"));
        }

        let page = client.get("/users/signin").await.text();
        assert!(page.contains("You must be signed in to do that."));

        assert_eq!(fs::read_dir(&client.docs).unwrap().count(), before.len());
        assert_eq!(
            fs::read_to_string(client.docs.join("changes.txt")).unwrap(),
            "There are many changes."
        );
    }

    #[tokio::test]
    async fn bad_credentials_leave_no_session() {
        let mut client = Client::new();
        let res = client.post("/users/signin", "username=admin&password=nope").await;
        assert_eq!(res.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(res.text().contains("Invalid credentials"));
        assert!(!client.jar.contains_key("cms_session"));

        let gated = client.get("/new").await;
        assert_eq!(gated.location.as_deref(), Some("/users/signin"));
    }

    #[tokio::test]
    async fn sign_in_unlocks_protected_routes_until_sign_out() {
        let mut client = Client::new();
        client.sign_in().await;

        let index = client.get("/").await.text();
        assert!(index.contains("Welcome"));
        assert!(index.contains("Signed in as admin"));

        assert_eq!(client.get("/new").await.status, StatusCode::OK);

        let res = client.post("/users/signout", "").await;
        assert_eq!(res.location.as_deref(), Some("/"));
        assert!(client.get("/").await.text().contains("You have been signed out"));
        assert_eq!(
            client.get("/new").await.location.as_deref(),
            Some("/users/signin")
        );
    }

    #[tokio::test]
    async fn tampered_session_cookie_is_ignored() {
        let mut client = Client::new();
        client.sign_in().await;
        assert_eq!(client.get("/new").await.status, StatusCode::OK);

        // The signed value is the MAC followed by the base64url payload.
        let genuine = URL_SAFE_NO_PAD.encode(r#"{"username":"admin","logged_in":true}"#);
        let forged = URL_SAFE_NO_PAD.encode(r#"{"username":"root","logged_in":true}"#);
        let value = client.jar.get("cms_session").unwrap().clone();
        assert!(value.ends_with(&genuine));
        client
            .jar
            .insert("cms_session".into(), value.replace(&genuine, &forged));

        let gated = client.get("/new").await;
        assert_eq!(gated.location.as_deref(), Some("/users/signin"));
    }

    #[tokio::test]
    async fn sign_up_then_sign_in() {
        let mut client = Client::new();

        let empty = client.post("/users/signup", "username=&password=pw").await;
        assert_eq!(empty.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(empty.text().contains("Username and Password are required."));

        let taken = client.post("/users/signup", "username=admin&password=pw").await;
        assert_eq!(taken.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(taken.text().contains("Username has been taken"));

        let ok = client.post("/users/signup", "username=newbie&password=pw").await;
        assert_eq!(ok.location.as_deref(), Some("/users/signin"));
        assert!(client.get("/users/signin").await.text().contains("User created."));

        let res = client.post("/users/signin", "username=newbie&password=pw").await;
        assert_eq!(res.location.as_deref(), Some("/"));
        assert_eq!(client.get("/new").await.status, StatusCode::OK);
    }

    // ── Document mutations ────────────────────────────────────────────────────

    #[tokio::test]
    async fn create_document_validation() {
        let mut client = Client::new();
        client.sign_in().await;
        client.get("/").await;

        let empty = client.post("/create", "document_name=").await;
        assert_eq!(empty.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(empty.text().contains("A name is required."));

        let bad_type = client.post("/create", "document_name=notes.pdf").await;
        assert_eq!(bad_type.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(bad_type.text().contains("Invalid file type."));
        assert!(!client.docs.join("notes.pdf").exists());

        let existing = client.post("/create", "document_name=changes.txt").await;
        assert_eq!(existing.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(existing.text().contains("changes.txt already exists."));
        assert_eq!(
            fs::read_to_string(client.docs.join("changes.txt")).unwrap(),
            "There are many changes."
        );

        let ok = client.post("/create", "document_name=fresh.md").await;
        assert_eq!(ok.location.as_deref(), Some("/"));
        assert_eq!(fs::read(client.docs.join("fresh.md")).unwrap(), b"");
        assert!(client.get("/").await.text().contains("fresh.md has been created"));
    }

    #[tokio::test]
    async fn edit_and_submit_replace_content() {
        let mut client = Client::new();
        client.sign_in().await;

        let form = client.get("/changes.txt/edit").await;
        assert_eq!(form.status, StatusCode::OK);
        assert!(form.text().contains("There are many changes."));

        let res = client.post("/changes.txt", "content=Only+this+now.").await;
        assert_eq!(res.location.as_deref(), Some("/"));
        assert_eq!(client.get("/changes.txt").await.text(), "Only this now.");
        assert!(client.get("/").await.text().contains("changes.txt has been updated."));

        let missing = client.get("/ghost.txt/edit").await;
        assert_eq!(missing.location.as_deref(), Some("/"));
    }

    #[tokio::test]
    async fn submit_never_creates_documents() {
        let mut client = Client::new();
        client.sign_in().await;

        let res = client.post("/evil.html", "content=%3Cscript%3E%3C%2Fscript%3E").await;
        assert_eq!(res.location.as_deref(), Some("/"));
        assert!(!client.docs.join("evil.html").exists());
        assert!(client.get("/").await.text().contains("evil.html does not exist."));
    }

    #[tokio::test]
    async fn non_utf8_document_still_opens_for_editing() {
        let mut client = Client::new();
        client.sign_in().await;
        fs::write(client.docs.join("latin1.txt"), b"caf\xe9").unwrap();

        let form = client.get("/latin1.txt/edit").await;
        assert_eq!(form.status, StatusCode::OK);
        assert!(form.text().contains("caf\u{fffd}"));
    }

    #[tokio::test]
    async fn delete_present_and_absent() {
        let mut client = Client::new();
        client.sign_in().await;
        client.get("/").await;

        let res = client.post("/history.txt/delete", "").await;
        assert_eq!(res.location.as_deref(), Some("/"));
        let index = client.get("/").await.text();
        assert!(index.contains("history.txt has been deleted."));
        assert!(!client.docs.join("history.txt").exists());

        let before = fs::read_dir(&client.docs).unwrap().count();
        client.post("/ghost.txt/delete", "").await;
        assert!(client.get("/").await.text().contains("ghost.txt does not exist."));
        assert_eq!(fs::read_dir(&client.docs).unwrap().count(), before);
    }

    #[tokio::test]
    async fn duplicate_keeps_extension_and_never_overwrites() {
        let mut client = Client::new();
        client.sign_in().await;

        client.post("/about.md/duplicate_file", "").await;
        client.post("/about.md/duplicate_file", "").await;

        assert!(client.docs.join("about(copy).md").exists());
        assert!(client.docs.join("about(copy 2).md").exists());
        let copy = client.get("/about(copy).md").await;
        assert!(copy.text().contains("<h1>Python is...</h1>"));
    }

    #[tokio::test]
    async fn duplicate_absent_document_reports_missing() {
        let mut client = Client::new();
        client.sign_in().await;
        let before = fs::read_dir(&client.docs).unwrap().count();

        let res = client.post("/ghost.txt/duplicate_file", "").await;
        assert_eq!(res.location.as_deref(), Some("/"));
        assert!(client.get("/").await.text().contains("ghost.txt does not exist."));
        assert_eq!(fs::read_dir(&client.docs).unwrap().count(), before);
    }

    // ── Images ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn image_lifecycle() {
        let mut client = Client::new();
        client.sign_in().await;

        let png = b"\x89PNG\r\n\x1a\nnot really";
        let res = client.upload("cat.png", png).await;
        assert_eq!(res.location.as_deref(), Some("/"));
        assert_eq!(fs::read(client.imgs.join("cat.png")).unwrap(), png);
        assert!(client.get("/").await.text().contains("cat.png has been uploaded."));

        let page = client.get("/cat.png/show_image").await;
        assert_eq!(page.status, StatusCode::OK);
        assert!(page.text().contains("/cat.png/image"));

        let raw = client.get("/cat.png/image").await;
        assert_eq!(raw.content_type.as_deref(), Some("image/png"));
        assert_eq!(raw.body, png);

        let dl = client.get("/cat.png/download_image").await;
        assert!(dl.disposition.as_deref().unwrap().starts_with("attachment"));

        client.post("/cat.png/duplicate_image", "").await;
        assert!(client.imgs.join("cat(copy).png").exists());

        client.post("/cat.png/delete_image", "").await;
        assert!(!client.imgs.join("cat.png").exists());
        assert!(client.get("/").await.text().contains("cat.png has been deleted."));
    }

    #[tokio::test]
    async fn upload_rejects_non_images_and_missing_files() {
        let mut client = Client::new();
        client.sign_in().await;

        let res = client.upload("notes.txt", b"text").await;
        assert_eq!(res.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(res.text().contains("Invalid file type."));
        assert!(!client.imgs.join("notes.txt").exists());

        let res = client.upload("", b"").await;
        assert_eq!(res.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(res.text().contains("No image selected."));
    }

    #[tokio::test]
    async fn oversized_upload_is_a_client_error() {
        let mut client = Client::with_upload_limit(1024);
        client.sign_in().await;

        let res = client.upload("big.png", &[0u8; 4096]).await;
        assert_eq!(res.status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(!client.imgs.join("big.png").exists());
    }

    #[tokio::test]
    async fn image_routes_are_gated() {
        let mut client = Client::new();
        fs::write(client.imgs.join("cat.png"), b"png").unwrap();

        let res = client.upload("dog.png", b"png").await;
        assert_eq!(res.location.as_deref(), Some("/users/signin"));
        assert!(!client.imgs.join("dog.png").exists());

        let attempts = [
            client.get("/cat.png/show_image").await,
            client.get("/cat.png/image").await,
            client.get("/cat.png/download_image").await,
            client.post("/cat.png/duplicate_image", "").await,
            client.post("/cat.png/delete_image", "").await,
        ];
        for res in &attempts {
            assert!(res.status.is_redirection());
            assert_eq!(res.location.as_deref(), Some("/users/signin"));
        }
        assert!(client.imgs.join("cat.png").exists());
        assert!(!client.imgs.join("cat(copy).png").exists());
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let mut client = Client::new();
        assert_eq!(client.get("/healthz").await.status, StatusCode::OK);
    }
}
