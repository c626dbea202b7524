use std::sync::Arc;

use axum::{routing::get, Json, Router};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::models;
use crate::routes;

#[derive(OpenApi)]
#[openapi(
	paths(
		routes::health::health,
		routes::auth::register,
		routes::auth::login,
		routes::auth::me,
		routes::auth::logout,
		routes::permissions::list_role_rules,
		routes::permissions::create_role_rule,
		routes::permissions::update_role_rule,
		routes::permissions::deactivate_role_rule,
		routes::permissions::list_user_rules,
		routes::permissions::create_user_rule,
		routes::permissions::update_user_rule,
		routes::permissions::deactivate_user_rule,
		routes::permissions::batch_check,
		routes::impersonation::start_impersonation,
		routes::impersonation::end_impersonation,
		routes::security_events::list_security_events,
	),
	components(
		schemas(
			models::user::User,
			models::user::AuthResponse,
			models::user::LoginRequest,
			models::user::RegisterRequest,
			models::access_rule::RuleType,
			models::access_rule::AccessType,
			models::access_rule::RoleAccessRule,
			models::access_rule::RoleRuleCreateRequest,
			models::access_rule::RoleRuleUpdateRequest,
			models::access_rule::UserAccessRule,
			models::access_rule::UserRuleCreateRequest,
			models::access_rule::UserRuleUpdateRequest,
			models::access_rule::PermissionCheckItem,
			models::access_rule::BatchCheckRequest,
			models::access_rule::BatchCheckResponse,
			models::impersonation::ImpersonationStartRequest,
			models::impersonation::ImpersonationStartResponse,
			models::impersonation::ImpersonationEndRequest,
			models::security_event::SecurityEventEntry,
			routes::health::HealthResponse,
		)
	),
	modifiers(&SecurityAddon),
	tags(
		(name = "Health", description = "Liveness and database reachability"),
		(name = "Auth", description = "Authentication endpoints"),
		(name = "Permissions", description = "Role and individual access rules"),
		(name = "Impersonation", description = "Admin act-as sessions"),
		(name = "Security", description = "Security event audit trail")
	)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
	fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
		if let Some(components) = openapi.components.as_mut() {
			components.add_security_scheme(
				"bearerAuth",
				SecurityScheme::Http(
					HttpBuilder::new()
						.scheme(HttpAuthScheme::Bearer)
						.bearer_format("JWT")
						.build(),
				),
			);
		}
	}
}

pub fn build_openapi() -> utoipa::openapi::OpenApi {
	ApiDoc::openapi()
}

pub fn swagger_routes(doc: utoipa::openapi::OpenApi) -> Router {
	let swagger_config = utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"])
		.try_it_out_enabled(true)
		.persist_authorization(true);

	let doc_json = Arc::new(serde_json::json!(doc));

	let json_route = {
		let doc_json = Arc::clone(&doc_json);
		get(move || {
			let doc_json = Arc::clone(&doc_json);
			async move { Json((*doc_json).clone()) }
		})
	};

	Router::new()
		.route("/api-docs/openapi.json", json_route)
		.merge(SwaggerUi::new("/docs").config(swagger_config))
}
