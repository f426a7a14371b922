use crate::headers;
use crate::identity::IdentityResolver;
use crate::rate_limit::admission::{Admission, AdmissionRequest, AdmissionResult};
use crate::rate_limit::store::WindowStore;
use futures::future::BoxFuture;
use http::{Request, Response, StatusCode};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

/// A layer that runs every request through an [`Admission`] filter.
pub struct AdmissionLayer<S, R> {
    admission: Arc<Admission<S>>,
    resolver: Arc<R>,
}

impl<S, R> AdmissionLayer<S, R> {
    /// Create a new admission layer.
    pub fn new(admission: Arc<Admission<S>>, resolver: R) -> Self {
        Self { admission, resolver: Arc::new(resolver) }
    }
}

impl<S, R> Clone for AdmissionLayer<S, R> {
    fn clone(&self) -> Self {
        Self { admission: self.admission.clone(), resolver: self.resolver.clone() }
    }
}

impl<Inner, S, R> Layer<Inner> for AdmissionLayer<S, R> {
    type Service = AdmissionService<Inner, S, R>;

    fn layer(&self, inner: Inner) -> Self::Service {
        AdmissionService {
            inner,
            admission: self.admission.clone(),
            resolver: self.resolver.clone(),
        }
    }
}

/// Middleware service that admits or rejects requests.
///
/// Admitted responses get `X-RateLimit-Limit` and `X-RateLimit-Remaining`. Rejected requests
/// never reach the inner service; they get an empty `429 Too Many Requests` carrying the same
/// headers plus `X-RateLimit-Reset` and `Retry-After`.
pub struct AdmissionService<Inner, S, R> {
    inner: Inner,
    admission: Arc<Admission<S>>,
    resolver: Arc<R>,
}

impl<Inner: Clone, S, R> Clone for AdmissionService<Inner, S, R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            admission: self.admission.clone(),
            resolver: self.resolver.clone(),
        }
    }
}

impl<Inner, S, R, ReqBody, ResBody> Service<Request<ReqBody>> for AdmissionService<Inner, S, R>
where
    Inner: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    Inner::Future: Send + 'static,
    Inner::Error: Send + 'static,
    S: WindowStore + 'static,
    R: IdentityResolver,
    ReqBody: Send + 'static,
    ResBody: Default + Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = Inner::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let admission = self.admission.clone();
        let resolver = self.resolver.clone();
        // Keep the instance that was polled ready; leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            if admission.is_exempt(req.uri().path()) {
                return inner.call(req).await;
            }

            let identity = resolver.resolve(req.headers(), req.extensions());
            let path = req.uri().path().to_owned();
            let method = req.method().clone();
            let result = admission
                .admit(AdmissionRequest { path: &path, method: &method, identity: &identity })
                .await;

            match result {
                AdmissionResult::Exempt => inner.call(req).await,
                AdmissionResult::Forward(verdict) => {
                    let mut response = inner.call(req).await?;
                    headers::apply(&verdict.decision, response.headers_mut());
                    Ok(response)
                }
                AdmissionResult::Reject(verdict) => {
                    let mut response = Response::new(ResBody::default());
                    *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
                    headers::apply(&verdict.decision, response.headers_mut());
                    Ok(response)
                }
            }
        })
    }
}
