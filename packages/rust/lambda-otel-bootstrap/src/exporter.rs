//! Span exporter wrapper for synchronous export from async code.
//!
//! `SimpleSpanProcessor` exports each span on the thread that ends it, which in
//! a Lambda function is a tokio worker. The OTLP exporter sends with reqwest's
//! blocking client, and that client must not run inside a runtime context.
//! [`BlockingSpanExporter`] moves the send to a scoped thread outside the
//! runtime whenever one is active. Export stays synchronous and one batch at a
//! time.

use opentelemetry_sdk::error::{OTelSdkError, OTelSdkResult};
use opentelemetry_sdk::trace::{SpanData, SpanExporter};
use opentelemetry_sdk::Resource;
use std::future::Future;

#[derive(Debug)]
pub(crate) struct BlockingSpanExporter<E> {
    inner: E,
}

impl<E: SpanExporter> BlockingSpanExporter<E> {
    pub(crate) fn new(inner: E) -> Self {
        Self { inner }
    }

    fn export_blocking(&self, batch: Vec<SpanData>) -> OTelSdkResult {
        if tokio::runtime::Handle::try_current().is_err() {
            return futures_executor::block_on(self.inner.export(batch));
        }

        let inner = &self.inner;
        std::thread::scope(|scope| {
            scope
                .spawn(move || futures_executor::block_on(inner.export(batch)))
                .join()
                .unwrap_or_else(|_| {
                    Err(OTelSdkError::InternalFailure(
                        "span export thread panicked".to_string(),
                    ))
                })
        })
    }
}

impl<E: SpanExporter> SpanExporter for BlockingSpanExporter<E> {
    fn export(&self, batch: Vec<SpanData>) -> impl Future<Output = OTelSdkResult> + Send {
        std::future::ready(self.export_blocking(batch))
    }

    fn shutdown(&mut self) -> OTelSdkResult {
        self.inner.shutdown()
    }

    fn force_flush(&mut self) -> OTelSdkResult {
        self.inner.force_flush()
    }

    fn set_resource(&mut self, resource: &Resource) {
        self.inner.set_resource(resource);
    }
}
