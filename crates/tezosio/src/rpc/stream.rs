//! Decoding of the node's chunked `/monitor/heads` stream.

use std::collections::VecDeque;

use bytes::Bytes;
use flashbake_primitives::block::BlockRef;
use futures::{stream::BoxStream, Stream, StreamExt};
use serde_json::Value;

use super::{error::ClientError, ClientResult};

/// Stream of new heads as the node announces them.
pub type HeadStream = BoxStream<'static, ClientResult<BlockRef>>;

/// Splits a byte stream of concatenated JSON objects back into headers.
///
/// Chunk boundaries are arbitrary: an object may span several chunks and a
/// chunk may hold several objects.
#[derive(Debug, Default)]
pub(crate) struct HeadDecoder {
    buf: Vec<u8>,
}

impl HeadDecoder {
    /// Buffers `chunk` and returns every header completed by it.
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<ClientResult<BlockRef>> {
        self.buf.extend_from_slice(chunk);

        let mut out = Vec::new();
        let mut iter = serde_json::Deserializer::from_slice(&self.buf).into_iter::<Value>();
        let consumed = loop {
            match iter.next() {
                Some(Ok(value)) => {
                    out.push(serde_json::from_value::<BlockRef>(value).map_err(ClientError::from));
                }
                // Incomplete object, wait for more bytes.
                Some(Err(e)) if e.is_eof() => break iter.byte_offset(),
                Some(Err(e)) => {
                    // The framing is lost, there's nothing to resync on but
                    // the next chunk.
                    out.push(Err(ClientError::MalformedResponse(e.to_string())));
                    break self.buf.len();
                }
                None => break iter.byte_offset(),
            }
        };

        self.buf.drain(..consumed);
        out
    }
}

/// Wraps a raw body stream into a [`HeadStream`].
pub(crate) fn decode_heads<S>(chunks: S) -> HeadStream
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    let state = (chunks.boxed(), HeadDecoder::default(), VecDeque::new());

    futures::stream::unfold(state, |(mut chunks, mut decoder, mut ready)| async move {
        loop {
            if let Some(item) = ready.pop_front() {
                return Some((item, (chunks, decoder, ready)));
            }

            match chunks.next().await {
                Some(Ok(bytes)) => ready.extend(decoder.push(&bytes)),
                Some(Err(e)) => return Some((Err(ClientError::from(e)), (chunks, decoder, ready))),
                None => return None,
            }
        }
    })
    .boxed()
}
