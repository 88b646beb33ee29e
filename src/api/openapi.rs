use super::handlers::{health, users};
use utoipa::openapi::{Contact, InfoBuilder, License, OpenApi, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> OpenApi {
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Documented routes. Anything registered here is both served and described
/// in `/openapi.json`; `/`, `/openapi.json` and `OPTIONS /health` are added
/// by the caller and stay undocumented.
pub(crate) fn api_router() -> OpenApiRouter {
    let mut router = OpenApiRouter::with_openapi(package_openapi())
        .routes(routes!(health::health))
        .routes(routes!(users::register))
        .routes(routes!(users::login))
        .routes(routes!(users::logout))
        .routes(routes!(users::refresh_token))
        .routes(routes!(users::change_password))
        .routes(routes!(users::current_user))
        .routes(routes!(users::update_account))
        .routes(routes!(users::update_avatar))
        .routes(routes!(users::update_cover_image));

    router.get_openapi_mut().tags = Some(vec![
        tag("users", "Registration, login, token refresh and profile updates"),
        tag("health", "Service and database status"),
    ]);

    router
}

fn tag(name: &str, description: &str) -> Tag {
    let mut tag = Tag::new(name);
    tag.description = Some(description.to_string());
    tag
}

// Info block comes from Cargo.toml package metadata.
fn package_openapi() -> OpenApi {
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(non_empty(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = package_contact(env!("CARGO_PKG_AUTHORS"));
    info.license = non_empty(env!("CARGO_PKG_LICENSE")).map(|spdx| {
        let mut license = License::new(spdx);
        license.identifier = Some(spdx.to_string());
        license
    });

    OpenApiBuilder::new().info(info).build()
}

/// First Cargo author (`;` separated, `Name <email>`) as the API contact.
fn package_contact(authors: &str) -> Option<Contact> {
    let primary = non_empty(authors.split(';').next()?)?;

    let (name, email) = match primary.split_once('<') {
        Some((name, rest)) => (non_empty(name), non_empty(rest.trim_end_matches('>'))),
        None => (Some(primary), None),
    };
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}
