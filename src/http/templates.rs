//! Static page rendering: sign-in and error pages.
//!
//! Plain bundled HTML with placeholder substitution; all interpolated values
//! are escaped, the error page in particular renders provider-supplied
//! strings.

use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};

use crate::options::Options;

/// Fixed body served at `/robots.txt`.
pub const ROBOTS_TXT: &str = "User-agent: *\nDisallow: /";

/// Renders the error page with an escaped, human-readable message.
pub fn error_page(status: StatusCode, title: &str, message: &str) -> Response {
    let html = include_str!("templates/error.html")
        .replace("{ status }", status.as_str())
        .replace("{ title }", &html_escape::encode_text(title))
        .replace("{ message }", &html_escape::encode_text(message));
    (status, Html(html)).into_response()
}

/// Renders the sign-in page: the provider button, plus the password form
/// when an htpasswd file is configured.
pub fn sign_in_page(
    options: &Options,
    provider_name: &str,
    status: StatusCode,
    redirect: &str,
    show_password_form: bool,
) -> Response {
    let encoded_redirect: String =
        url::form_urlencoded::byte_serialize(redirect.as_bytes()).collect();
    let password_form = if show_password_form {
        include_str!("templates/sign_in_form.html")
            .replace("{ action }", &options.prefixed("/sign_in"))
            .replace(
                "{ redirect }",
                &html_escape::encode_double_quoted_attribute(redirect),
            )
    } else {
        String::new()
    };
    let html = include_str!("templates/sign_in.html")
        .replace(
            "{ provider_name }",
            &html_escape::encode_text(provider_name),
        )
        .replace(
            "{ start_url }",
            &format!("{}?rd={encoded_redirect}", options.prefixed("/start")),
        )
        .replace("{ password_form }", &password_form);
    (status, Html(html)).into_response()
}
