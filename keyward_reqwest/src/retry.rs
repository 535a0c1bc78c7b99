use std::sync::Arc;

use keyward_tokens::{FailureClass, RetryKey, RetryPolicy};
use reqwest::{Request, Response};
use reqwest_middleware::{Middleware, Next, Result};

/// A middleware that retries requests failing with server errors
///
/// Network failures and 5xx responses are handed to a [`RetryPolicy`],
/// keyed by the request's method and path. While the policy authorizes
/// another attempt, the unmodified request is sent again. Once it refuses,
/// the last response or error is returned to the caller.
///
/// Requests whose bodies cannot be cloned are sent exactly once.
#[derive(Clone, Debug)]
pub struct RetryMiddleware {
    policy: Arc<RetryPolicy>,
}

impl RetryMiddleware {
    /// Constructs a new middleware following `policy`
    pub fn new(policy: Arc<RetryPolicy>) -> Self {
        Self { policy }
    }

    /// The policy this middleware follows
    pub fn policy(&self) -> &Arc<RetryPolicy> {
        &self.policy
    }
}

fn classify(result: &Result<Response>) -> Option<FailureClass> {
    match result {
        Ok(resp) if resp.status().is_server_error() => {
            Some(FailureClass::Status(resp.status().as_u16()))
        }
        Ok(_) => None,
        Err(reqwest_middleware::Error::Reqwest(error))
            if error.is_connect() || error.is_timeout() || error.is_request() =>
        {
            Some(FailureClass::Network)
        }
        Err(_) => Some(FailureClass::Other),
    }
}

#[async_trait::async_trait]
impl Middleware for RetryMiddleware {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        let key = RetryKey::new(req.method().as_str(), req.url().path());

        loop {
            let attempt = match req.try_clone() {
                Some(attempt) => attempt,
                None => {
                    tracing::trace!(%key, "request cannot be cloned, sending once");
                    return next.run(req, extensions).await;
                }
            };

            let result = next.clone().run(attempt, extensions).await;

            match classify(&result) {
                None => {
                    self.policy.record_success(&key);
                    return result;
                }
                Some(failure) => {
                    if !self.policy.should_retry(&key, failure).await {
                        return result;
                    }
                }
            }
        }
    }
}
