//! Shared-secret authentication middleware.
//!
//! Grounded on the teacher's JWT authentication `Transform`/`Service`
//! pair, with token *validation* replaced by a constant-time comparison
//! against a configured shared secret -- this registry has no user
//! accounts to issue JWTs for.

use actix_service::forward_ready;
use actix_utils::future::{Ready, ok};
use actix_web::{
    Error, HttpMessage,
    body::EitherBody,
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http::Method,
    web::Data,
};
use futures::future::LocalBoxFuture;

use crate::state::AppState;

const AUTHORIZATION_HEADER: &str = "Authorization";
const BEARER_PREFIX: &str = "Bearer ";

pub struct SharedSecretAuth;

impl<S, B> Transform<S, ServiceRequest> for SharedSecretAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = SharedSecretAuthMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(SharedSecretAuthMiddleware { service })
    }
}

pub struct SharedSecretAuthMiddleware<S> {
    service: S,
}

fn extract_token(req: &ServiceRequest, header_name: &str) -> Option<String> {
    if let Some(header) = req.headers().get(header_name)
        && let Ok(s) = header.to_str()
    {
        let trimmed = s.trim();
        if !trimmed.is_empty() {
            return Some(trimmed.to_string());
        }
    }

    if let Some(header) = req.headers().get(AUTHORIZATION_HEADER)
        && let Ok(s) = header.to_str()
        && let Some(token) = s.trim().strip_prefix(BEARER_PREFIX)
    {
        let token = token.trim();
        if !token.is_empty() {
            return Some(token.to_string());
        }
    }

    if let Some(query) = req.uri().query() {
        for pair in query.split('&') {
            if let Some((key, value)) = pair.split_once('=')
                && key == header_name
                && !value.is_empty()
            {
                return Some(value.to_string());
            }
        }
    }

    None
}

impl<S, B> Service<ServiceRequest> for SharedSecretAuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        if Method::OPTIONS == *req.method() {
            let res = self.service.call(req);
            return Box::pin(async move { res.await.map(ServiceResponse::map_into_left_body) });
        }

        let Some(app_state) = req.app_data::<Data<AppState>>() else {
            tracing::error!("AppState missing from request app_data");
            let res = self.service.call(req);
            return Box::pin(async move { res.await.map(ServiceResponse::map_into_left_body) });
        };

        let Some(expected) = app_state.api_shared_secret.clone() else {
            let res = self.service.call(req);
            return Box::pin(async move { res.await.map(ServiceResponse::map_into_left_body) });
        };

        // Health-check liveness and cluster gossip intentionally stay
        // unauthenticated: peers must be able to probe each other before
        // exchanging a secret out of band.
        if req.path() == "/health" || req.path().starts_with("/internal/cluster/") {
            let res = self.service.call(req);
            return Box::pin(async move { res.await.map(ServiceResponse::map_into_left_body) });
        }

        let authorized = extract_token(&req, &app_state.security_header_name).is_some_and(|token| token == expected);
        if !authorized {
            let (req, _payload) = req.into_parts();
            let response = crate::http::unauthorized_response(req.path());
            let service_response = ServiceResponse::new(req, response).map_into_right_body();
            return Box::pin(async move { Ok(service_response) });
        }

        let res = self.service.call(req);
        Box::pin(async move { res.await.map(ServiceResponse::map_into_left_body) })
    }
}
