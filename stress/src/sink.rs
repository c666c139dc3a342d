use blocks_lmt::error::ExportResult;
use blocks_lmt::export::{Message, Sink};
use futures_util::future::BoxFuture;

/// Accepts every message and keeps nothing, so only the producer side is
/// measured.
#[derive(Debug)]
pub struct DiscardSink;

impl Sink for DiscardSink {
    fn send<'a>(&'a self, _message: &'a Message) -> BoxFuture<'a, ExportResult> {
        Box::pin(std::future::ready(Ok(())))
    }
}
