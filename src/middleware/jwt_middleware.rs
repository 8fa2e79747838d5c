/// JWT Authentication Middleware
///
/// Validates access tokens from the Authorization header or the accessToken
/// cookie and injects claims into request extensions for route handlers.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage, HttpResponse,
};
use futures::future::LocalBoxFuture;
use std::rc::Rc;

use crate::auth::validate_access_token;
use crate::configuration::JwtSettings;
use crate::response::ApiResponse;
use crate::routes::ACCESS_TOKEN_COOKIE;

/// JWT middleware for protecting routes
///
/// Must be applied to routes that require authentication. The access token
/// is taken from `Authorization: Bearer <token>` first, then from the
/// accessToken cookie set at login.
pub struct JwtMiddleware {
    jwt_config: JwtSettings,
}

impl JwtMiddleware {
    pub fn new(jwt_config: JwtSettings) -> Self {
        Self { jwt_config }
    }
}

impl<S, B> Transform<S, ServiceRequest> for JwtMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = JwtMiddlewareService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(JwtMiddlewareService {
            service: Rc::new(service),
            jwt_config: self.jwt_config.clone(),
        }))
    }
}

pub struct JwtMiddlewareService<S> {
    service: Rc<S>,
    jwt_config: JwtSettings,
}

impl<S, B> Service<ServiceRequest> for JwtMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let bearer_token = req
            .headers()
            .get("Authorization")
            .and_then(|h| h.to_str().ok())
            .and_then(|h| {
                if h.starts_with("Bearer ") {
                    Some(h[7..].to_string())
                } else {
                    None
                }
            });

        let token = bearer_token.or_else(|| {
            req.request()
                .cookie(ACCESS_TOKEN_COOKIE)
                .map(|cookie| cookie.value().to_string())
        });

        let jwt_config = self.jwt_config.clone();

        match token {
            None => {
                tracing::warn!("Missing access token in header and cookie");
                let response = HttpResponse::Unauthorized().json(ApiResponse::message_only(
                    401,
                    "Missing authentication token",
                ));
                Box::pin(async move {
                    Err(actix_web::error::InternalError::from_response(
                        "Unauthorized",
                        response,
                    )
                    .into())
                })
            }
            Some(token) => match validate_access_token(&token, &jwt_config) {
                Ok(claims) => {
                    req.extensions_mut().insert(claims.clone());

                    tracing::debug!(
                        user_id = %claims.sub,
                        username = %claims.username,
                        "Access token validated"
                    );

                    let service = self.service.clone();
                    Box::pin(async move { service.call(req).await })
                }
                Err(e) => {
                    tracing::warn!("Access token validation failed: {}", e);
                    let response = HttpResponse::Unauthorized().json(ApiResponse::message_only(
                        401,
                        "Invalid or expired token",
                    ));
                    Box::pin(async move {
                        Err(actix_web::error::InternalError::from_response(
                            "Invalid token",
                            response,
                        )
                        .into())
                    })
                }
            },
        }
    }
}
