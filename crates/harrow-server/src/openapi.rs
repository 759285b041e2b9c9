use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Harrow API",
        version = "0.3.0",
        description = "Operator API for the harrow crawler: checkpoints and account pool."
    ),
    paths(
        crate::routes::list_checkpoints,
        crate::routes::get_checkpoint,
        crate::routes::delete_checkpoint,
        crate::routes::pause_checkpoint,
        crate::routes::cleanup_checkpoints,
        crate::routes::list_accounts,
        crate::routes::create_account,
        crate::routes::get_account,
        crate::routes::update_account,
        crate::routes::delete_account,
        crate::routes::activate_account,
        crate::routes::disable_account,
        crate::routes::health,
    ),
    components(schemas(
        crate::dto::CheckpointResponse,
        crate::dto::CheckpointListResponse,
        crate::dto::CleanupResponse,
        crate::dto::AccountResponse,
        crate::dto::AccountListResponse,
        crate::dto::AccountStatsResponse,
        crate::dto::CreateAccountRequest,
        crate::dto::UpdateAccountRequest,
        crate::dto::HealthResponse,
        crate::dto::ErrorResponse,
    )),
    tags(
        (name = "checkpoints", description = "Crawl checkpoint management"),
        (name = "accounts", description = "Account pool management"),
        (name = "system", description = "Health and system status"),
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Adds Bearer token security scheme to the OpenAPI spec.
struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                utoipa::openapi::security::SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .bearer_format("token")
                        .description(Some(
                            "Operator API key. Set via HARROW_SERVER_API_KEY environment variable.",
                        ))
                        .build(),
                ),
            );
        }
    }
}
