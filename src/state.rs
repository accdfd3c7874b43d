use tower_cookies::Key;

use crate::{auth::credentials::CredentialStore, store::FileStore};

/// Everything a handler needs, built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub documents: FileStore,
    pub images: FileStore,
    pub credentials: CredentialStore,
    /// Signs the session and notice cookies.
    pub cookie_key: Key,
}
