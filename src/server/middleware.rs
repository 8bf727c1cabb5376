//! Request filters that run ahead of route dispatch.
//!
//! Global middleware (registered on [`Router`](crate::Router)) runs in
//! registration order before a [`Host`](crate::Host) is asked to match a
//! route. A filter can let the request continue, short-circuit it with a
//! response of its own, or stop it with no match (falling through to the
//! host's 404).

use crate::{server::connection::ConnectionData, Handled, Request, Response};
use std::{future::Future, pin::Pin};

/// What a [`Middleware`] decided about a request.
pub enum Outcome {
    /// Let the request continue to the next filter, then route dispatch.
    Continue,
    /// Skip route dispatch; the filter already finished the response
    /// (via [`Response::body`] or [`Response::body_with`]), carried here as
    /// proof.
    Respond(Handled),
    /// Skip route dispatch without producing a response of its own; the
    /// caller falls through to the 404 handler.
    Stop,
}

/// A request filter run before route dispatch.
///
/// Mutations made via [`Request::bind_identity`](crate::Request) equivalents
/// -- in practice, writes through `&Request`'s interior-mutable capture maps
/// -- are visible to middleware registered after this one and to the route
/// handler that eventually runs.
///
/// # Examples
/// ```
/// use littleweb::{Middleware, Outcome, Request, Response, StatusCode};
///
/// struct RequireApiKey;
///
/// impl Middleware for RequireApiKey {
///     async fn filter(&self, _: &mut (), req: &Request, resp: &mut Response) -> Outcome {
///         match req.header(b"x-api-key") {
///             Some(_) => Outcome::Continue,
///             None => Outcome::Respond(resp.status(StatusCode::Unauthorized).body("missing api key")),
///         }
///     }
/// }
/// ```
pub trait Middleware<S = ()>: Send + Sync + 'static
where
    S: ConnectionData,
{
    fn filter(
        &self,
        connection_data: &mut S,
        request: &Request,
        response: &mut Response,
    ) -> impl Future<Output = Outcome> + Send;
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe stand-in for [`Middleware`], the same way
/// [`DynHandler`](crate::server::dispatcher::DynHandler) stands in for
/// [`Handler`](crate::Handler).
pub(crate) trait DynMiddleware<S>: Send + Sync {
    fn dyn_filter<'a>(
        &'a self,
        data: &'a mut S,
        request: &'a Request,
        response: &'a mut Response,
    ) -> BoxFuture<'a, Outcome>;
}

impl<S, M> DynMiddleware<S> for M
where
    M: Middleware<S>,
    S: ConnectionData,
{
    fn dyn_filter<'a>(
        &'a self,
        data: &'a mut S,
        request: &'a Request,
        response: &'a mut Response,
    ) -> BoxFuture<'a, Outcome> {
        Box::pin(self.filter(data, request, response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{limits::ReqLimits, limits::RespLimits, StatusCode};

    struct AlwaysContinue;

    impl Middleware for AlwaysContinue {
        async fn filter(&self, _: &mut (), _: &Request, _: &mut Response) -> Outcome {
            Outcome::Continue
        }
    }

    struct AlwaysStop;

    impl Middleware for AlwaysStop {
        async fn filter(&self, _: &mut (), _: &Request, _: &mut Response) -> Outcome {
            Outcome::Stop
        }
    }

    struct ShortCircuit;

    impl Middleware for ShortCircuit {
        async fn filter(&self, _: &mut (), _: &Request, resp: &mut Response) -> Outcome {
            Outcome::Respond(resp.status(StatusCode::Ok).body("short circuited"))
        }
    }

    #[tokio::test]
    async fn continue_lets_request_through() {
        let req = Request::new(&ReqLimits::default());
        let mut resp = Response::new(&RespLimits::default());
        let mut data = ();
        let outcome = AlwaysContinue.filter(&mut data, &req, &mut resp).await;
        assert!(matches!(outcome, Outcome::Continue));
    }

    #[tokio::test]
    async fn stop_carries_no_response() {
        let req = Request::new(&ReqLimits::default());
        let mut resp = Response::new(&RespLimits::default());
        let mut data = ();
        let outcome = AlwaysStop.filter(&mut data, &req, &mut resp).await;
        assert!(matches!(outcome, Outcome::Stop));
    }

    #[tokio::test]
    async fn respond_finishes_the_response() {
        let req = Request::new(&ReqLimits::default());
        let mut resp = Response::new(&RespLimits::default());
        let mut data = ();
        let outcome = ShortCircuit.filter(&mut data, &req, &mut resp).await;
        assert!(matches!(outcome, Outcome::Respond(_)));
    }
}
