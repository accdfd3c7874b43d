use maud::{DOCTYPE, Markup, PreEscaped, html};
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};

use crate::session::{Level, Notice};

/// Characters escaped when a file name is used as a URL path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Percent-encode a file name for use as one URL path segment.
pub fn segment(name: &str) -> String {
    utf8_percent_encode(name, SEGMENT).to_string()
}

/// Per-request data every page shows: who is signed in and the notices
/// taken from the queue for this render.
#[derive(Default)]
pub struct PageContext {
    pub username: Option<String>,
    pub notices: Vec<Notice>,
}

// ── Shared page shell ──────────────────────────────────────────────────────────

fn shell(title: &str, ctx: &PageContext, body: Markup) -> Markup {
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="utf-8";
                meta name="viewport" content="width=device-width, initial-scale=1";
                title { (title) " · md-cms" }
                style { (PreEscaped(BASE_CSS)) }
            }
            body {
                header class="topbar" {
                    a class="brand" href="/" { "md-cms" }
                    @if let Some(user) = &ctx.username {
                        span class="whoami" { "Signed in as " (user) "." }
                        form method="post" action="/users/signout" class="inline" {
                            button type="submit" { "Sign Out" }
                        }
                    } @else {
                        a href="/users/signin" { "Sign In" }
                        " "
                        a href="/users/signup" { "Sign Up" }
                    }
                }
                @for notice in &ctx.notices {
                    p class=(notice_class(notice.level)) { (notice.message) }
                }
                main { (body) }
            }
        }
    }
}

fn notice_class(level: Level) -> &'static str {
    match level {
        Level::Info => "notice",
        Level::Success => "notice success",
        Level::Error => "notice error",
    }
}

// ── Index ──────────────────────────────────────────────────────────────────────

pub fn index(ctx: &PageContext, documents: &[String], images: &[String]) -> Markup {
    shell(
        "Documents",
        ctx,
        html! {
            h1 { "Documents" }
            @if documents.is_empty() {
                p { em { "No documents yet." } }
            } @else {
                ul class="listing" {
                    @for name in documents {
                        @let seg = segment(name);
                        li {
                            a href={ "/" (seg) } { (name) }
                            a href={ "/" (seg) "/edit" } { "Edit" }
                            a href={ "/" (seg) "/download" } { "Download" }
                            form method="post" action={ "/" (seg) "/duplicate_file" } class="inline" {
                                button type="submit" { "Duplicate" }
                            }
                            form method="post" action={ "/" (seg) "/delete" } class="inline" {
                                button type="submit" class="danger" { "Delete" }
                            }
                        }
                    }
                }
            }
            p { a href="/new" { "New Document" } }

            h2 { "Images" }
            @if images.is_empty() {
                p { em { "No images yet." } }
            } @else {
                ul class="listing" {
                    @for name in images {
                        @let seg = segment(name);
                        li {
                            a href={ "/" (seg) "/show_image" } { (name) }
                            a href={ "/" (seg) "/download_image" } { "Download" }
                            form method="post" action={ "/" (seg) "/duplicate_image" } class="inline" {
                                button type="submit" { "Duplicate" }
                            }
                            form method="post" action={ "/" (seg) "/delete_image" } class="inline" {
                                button type="submit" class="danger" { "Delete" }
                            }
                        }
                    }
                }
            }
            p { a href="/upload" { "Upload Image" } }
        },
    )
}

// ── Documents ──────────────────────────────────────────────────────────────────

/// Rendered markdown document.
pub fn markdown_page(ctx: &PageContext, name: &str, content_html: &str) -> Markup {
    shell(
        name,
        ctx,
        html! {
            article class="document" {
                (PreEscaped(content_html))
            }
            p { a href="/" { "Back" } }
        },
    )
}

pub fn edit_page(ctx: &PageContext, name: &str, content: &str) -> Markup {
    shell(
        &format!("Edit {name}"),
        ctx,
        html! {
            h1 { "Edit content of " (name) ":" }
            form method="post" action={ "/" (segment(name)) } {
                textarea name="content" rows="20" cols="80" { (content) }
                div { button type="submit" { "Save Changes" } }
            }
        },
    )
}

pub fn new_document_page(ctx: &PageContext, name: &str) -> Markup {
    shell(
        "New document",
        ctx,
        html! {
            h1 { "Add a new document" }
            form method="post" action="/create" {
                label for="document_name" { "Document name (.txt or .md):" }
                input type="text" id="document_name" name="document_name" value=(name) autofocus;
                button type="submit" { "Create" }
            }
        },
    )
}

// ── Users ──────────────────────────────────────────────────────────────────────

pub fn signin_page(ctx: &PageContext, username: &str) -> Markup {
    credentials_form(ctx, "Sign In", "/users/signin", username, "current-password")
}

pub fn signup_page(ctx: &PageContext, username: &str) -> Markup {
    credentials_form(ctx, "Sign Up", "/users/signup", username, "new-password")
}

fn credentials_form(
    ctx: &PageContext,
    title: &str,
    action: &str,
    username: &str,
    password_autocomplete: &str,
) -> Markup {
    shell(
        title,
        ctx,
        html! {
            h1 { (title) }
            form method="post" action=(action) class="credentials" {
                div {
                    label for="username" { "Username" }
                    input type="text" id="username" name="username" value=(username)
                        autocomplete="username" autofocus;
                }
                div {
                    label for="password" { "Password" }
                    input type="password" id="password" name="password"
                        autocomplete=(password_autocomplete);
                }
                button type="submit" { (title) }
            }
        },
    )
}

// ── Images ─────────────────────────────────────────────────────────────────────

pub fn upload_page(ctx: &PageContext) -> Markup {
    shell(
        "Upload image",
        ctx,
        html! {
            h1 { "Upload an image" }
            form method="post" action="/upload_image" enctype="multipart/form-data" {
                input type="file" name="image_name" accept="image/*";
                button type="submit" { "Upload" }
            }
        },
    )
}

pub fn show_image_page(ctx: &PageContext, name: &str) -> Markup {
    let seg = segment(name);
    shell(
        name,
        ctx,
        html! {
            h1 { (name) }
            figure {
                img src={ "/" (seg) "/image" } alt=(name);
            }
            p {
                a href={ "/" (seg) "/download_image" } { "Download" }
                " "
                a href="/" { "Back" }
            }
        },
    )
}

const BASE_CSS: &str = r#"
body { font-family: system-ui, sans-serif; max-width: 52rem; margin: 0 auto; padding: 1rem; color: #222; }
.topbar { display: flex; gap: 1rem; align-items: center; border-bottom: 1px solid #ddd; padding-bottom: .5rem; }
.brand { font-weight: 700; margin-right: auto; text-decoration: none; color: inherit; }
.notice { padding: .5rem .75rem; background: #eef; border-left: 4px solid #88a; }
.notice.success { background: #efe; border-color: #6a6; }
.notice.error { background: #fee; border-color: #c55; }
.listing li { display: flex; gap: .75rem; align-items: center; margin: .25rem 0; }
.listing li > a:first-child { min-width: 14rem; font-family: ui-monospace, monospace; }
form.inline { display: inline; margin: 0; }
button.danger { color: #a00; }
textarea { width: 100%; font-family: ui-monospace, monospace; }
figure img { max-width: 100%; }
"#;
