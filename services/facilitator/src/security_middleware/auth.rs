use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage, HttpRequest,
};
use futures_util::future::LocalBoxFuture;
use security::api_keys::ApiKeyCache;
use security::rate_limiter::Caller;
use std::future::{ready, Ready};
use std::rc::Rc;
use std::sync::Arc;

pub const API_KEY_HEADER: &str = "X-API-KEY";

/// Classifies every request as authenticated or anonymous and stores the
/// resulting [`Caller`] in the request extensions. A missing or unknown key
/// is not an error.
pub struct ApiKeyAuth {
    cache: Arc<ApiKeyCache>,
}

impl ApiKeyAuth {
    pub fn new(cache: Arc<ApiKeyCache>) -> Self {
        Self { cache }
    }
}

impl<S, B> Transform<S, ServiceRequest> for ApiKeyAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = ApiKeyAuthMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(ApiKeyAuthMiddleware {
            service: Rc::new(service),
            cache: self.cache.clone(),
        }))
    }
}

pub struct ApiKeyAuthMiddleware<S> {
    service: Rc<S>,
    cache: Arc<ApiKeyCache>,
}

impl<S, B> Service<ServiceRequest> for ApiKeyAuthMiddleware<S>
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
        let presented = req
            .headers()
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|key| !key.is_empty());

        let caller = match presented {
            Some(key) if self.cache.is_valid(key) => Caller::Authenticated {
                api_key: key.to_string(),
            },
            _ => Caller::Anonymous {
                remote_addr: remote_addr(req.request()),
            },
        };

        req.extensions_mut().insert(caller);

        let fut = self.service.call(req);
        Box::pin(async move { fut.await })
    }
}

fn remote_addr(req: &HttpRequest) -> Option<String> {
    req.peer_addr().map(|addr| addr.ip().to_string())
}

/// Classification stored by [`ApiKeyAuth`]; anonymous when the middleware did not run
pub fn caller_of(req: &HttpRequest) -> Caller {
    req.extensions()
        .get::<Caller>()
        .cloned()
        .unwrap_or_else(|| Caller::Anonymous {
            remote_addr: remote_addr(req),
        })
}
