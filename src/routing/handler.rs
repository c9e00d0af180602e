//! Route handlers.
//!
//! A [`RouteHandler`] receives the synthetic request and writes its output
//! into a [`ResponseSink`]. Anything that is already a tower `Service` over
//! HTTP (an axum `MethodRouter`, a whole axum `Router`, a `tower::service_fn`)
//! plugs in through [`ServiceHandler`].

use std::io;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use bytes::Bytes;
use futures_util::StreamExt;
use thiserror::Error;
use tower::{BoxError, Service, ServiceExt};

use crate::http::relay::ResponseSink;

/// Failure while serving one tunneled request.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Writing to the response sink failed.
    #[error("failed to write response: {0}")]
    Write(#[from] io::Error),
    /// The wrapped service returned an error.
    #[error("service error: {0}")]
    Service(#[source] BoxError),
    /// The response body failed mid-stream.
    #[error("response body error: {0}")]
    Body(#[source] axum::Error),
}

/// Handler registered under a routing key.
#[async_trait]
pub trait RouteHandler: Send + Sync {
    async fn serve(
        &self,
        request: Request<Bytes>,
        sink: &mut dyn ResponseSink,
    ) -> Result<(), HandlerError>;
}

/// Adapts a tower HTTP service into a [`RouteHandler`].
///
/// Status and headers are handed to the sink before the body is streamed
/// through it chunk by chunk.
#[derive(Debug, Clone)]
pub struct ServiceHandler<S> {
    service: S,
}

impl<S> ServiceHandler<S> {
    pub fn new(service: S) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S> RouteHandler for ServiceHandler<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + Sync + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send,
{
    async fn serve(
        &self,
        request: Request<Bytes>,
        sink: &mut dyn ResponseSink,
    ) -> Result<(), HandlerError> {
        let (parts, body) = request.into_parts();
        let request = Request::from_parts(parts, Body::from(body));

        let response = self
            .service
            .clone()
            .oneshot(request)
            .await
            .map_err(|e| HandlerError::Service(e.into()))?;

        let (parts, body) = response.into_parts();
        sink.set_status(parts.status);
        for (name, value) in parts.headers.iter() {
            sink.set_header(name.clone(), value.clone());
        }

        let mut stream = body.into_data_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(HandlerError::Body)?;
            write_all(sink, &chunk).await?;
        }
        Ok(())
    }
}

/// Write all of `data`, retrying on short writes.
pub async fn write_all(sink: &mut dyn ResponseSink, mut data: &[u8]) -> io::Result<()> {
    while !data.is_empty() {
        let written = sink.write(data).await?;
        if written == 0 {
            return Err(io::ErrorKind::WriteZero.into());
        }
        data = &data[written..];
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::relay::CapturedResponse;
    use axum::http::{header, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::{post, MethodRouter};

    fn request(body: &'static str) -> Request<Bytes> {
        Request::post("/any").body(Bytes::from_static(body.as_bytes())).unwrap()
    }

    #[tokio::test]
    async fn axum_handler_body_reaches_sink() {
        let route: MethodRouter = post(|body: Bytes| async move { body });
        let handler = ServiceHandler::new(route);
        let mut sink = CapturedResponse::default();

        handler.serve(request("ping"), &mut sink).await.unwrap();

        assert_eq!(sink.status, Some(StatusCode::OK));
        assert_eq!(sink.body, b"ping");
    }

    #[tokio::test]
    async fn status_and_headers_are_offered_to_sink() {
        let route: MethodRouter = post(|| async {
            (StatusCode::ACCEPTED, [(header::CONTENT_TYPE, "text/csv")], "a,b").into_response()
        });
        let handler = ServiceHandler::new(route);
        let mut sink = CapturedResponse::default();

        handler.serve(request(""), &mut sink).await.unwrap();

        assert_eq!(sink.status, Some(StatusCode::ACCEPTED));
        assert_eq!(sink.headers[header::CONTENT_TYPE], "text/csv");
        assert_eq!(sink.body, b"a,b");
    }

    #[tokio::test]
    async fn service_errors_surface() {
        let service = tower::service_fn(|_req: Request<Body>| async {
            Err::<Response<Body>, _>(io::Error::other("backend down"))
        });
        let handler = ServiceHandler::new(service);
        let mut sink = CapturedResponse::default();

        let err = handler.serve(request(""), &mut sink).await.unwrap_err();

        assert!(matches!(err, HandlerError::Service(_)));
        assert!(sink.body.is_empty());
    }

    struct Trickle(CapturedResponse);

    #[async_trait]
    impl ResponseSink for Trickle {
        fn set_status(&mut self, status: StatusCode) {
            self.0.set_status(status);
        }

        fn set_header(&mut self, name: header::HeaderName, value: header::HeaderValue) {
            self.0.set_header(name, value);
        }

        async fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            self.0.write(&data[..1]).await
        }
    }

    #[tokio::test]
    async fn write_all_handles_short_writes() {
        let mut sink = Trickle(CapturedResponse::default());
        write_all(&mut sink, b"abc").await.unwrap();
        assert_eq!(sink.0.body, b"abc");
    }
}
