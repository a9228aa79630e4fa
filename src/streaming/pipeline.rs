//! Drives an open streaming response: transport reads → frame codec →
//! adapter event decoding → ordered chunk emission, with the final metadata
//! resolved on a separate channel.
//!
//! The chunk sequence is pull-based: the transport is read only when the
//! consumer polls, so a slow consumer never forces unbounded buffering.
//! Dropping the sequence drops the HTTP response (closing the socket) and
//! the metadata sender, so abandonment is observable on both outputs.

use std::time::Duration;

use futures_util::StreamExt;

use crate::adapter::{EventDecoder, FrameProtocol};
use crate::codec::{EventStreamCodec, FrameCodec, SseCodec};
use crate::error::LlmError;
use crate::streaming::{MetadataHandle, StreamChunk, StreamHandle, StreamMeta};

/// Wires an already-open response into a [`StreamHandle`].
///
/// Setup failures (connect errors, non-2xx statuses) are handled by the
/// caller before this point; everything from here on is a mid-stream
/// condition and terminates the chunk sequence in-band.
pub(crate) fn run_stream(
    response: reqwest::Response,
    mut decoder: Box<dyn EventDecoder>,
    protocol: FrameProtocol,
    read_timeout: Option<Duration>,
) -> StreamHandle {
    let (meta_tx, meta_rx) = tokio::sync::oneshot::channel::<Result<StreamMeta, LlmError>>();

    let chunks = async_stream::stream! {
        let mut codec: Box<dyn FrameCodec> = match protocol {
            FrameProtocol::Sse => Box::new(SseCodec::new()),
            FrameProtocol::AwsEventStream => Box::new(EventStreamCodec::new()),
        };
        let mut byte_stream = response.bytes_stream();
        let mut meta = StreamMeta::default();
        let mut sender = Some(meta_tx);

        loop {
            let read = match read_timeout {
                Some(limit) => match tokio::time::timeout(limit, byte_stream.next()).await {
                    Ok(read) => read,
                    Err(_) => {
                        let err = LlmError::timeout("timed out waiting for the next stream read");
                        if let Some(tx) = sender.take() {
                            let _ = tx.send(Err(err.clone()));
                        }
                        yield Err(err);
                        return;
                    }
                },
                None => byte_stream.next().await,
            };

            let bytes = match read {
                // Transport closed: the provider is done, unless the codec
                // holds a deferred framing error from its final frames.
                None => {
                    if let Err(err) = codec.feed(&[]) {
                        if let Some(tx) = sender.take() {
                            let _ = tx.send(Err(err.clone()));
                        }
                        yield Err(err);
                        return;
                    }
                    break;
                }
                Some(Err(source)) => {
                    let err = LlmError::from(source);
                    if let Some(tx) = sender.take() {
                        let _ = tx.send(Err(err.clone()));
                    }
                    yield Err(err);
                    return;
                }
                Some(Ok(bytes)) => bytes,
            };

            let frames = match codec.feed(&bytes) {
                Ok(frames) => frames,
                Err(err) => {
                    tracing::debug!(error = %err, "stream framing failed");
                    if let Some(tx) = sender.take() {
                        let _ = tx.send(Err(err.clone()));
                    }
                    yield Err(err);
                    return;
                }
            };

            for frame in frames {
                let decoded = match decoder.decode_event(&frame) {
                    Ok(chunks) => chunks,
                    Err(err) => {
                        if let Some(tx) = sender.take() {
                            let _ = tx.send(Err(err.clone()));
                        }
                        yield Err(err);
                        return;
                    }
                };
                for chunk in decoded {
                    if let StreamChunk::Meta {
                        usage,
                        finish_reason,
                    } = &chunk
                    {
                        if let Some(usage) = usage {
                            meta.usage.merge(usage);
                        }
                        if let Some(reason) = finish_reason {
                            meta.finish_reason = Some(reason.clone());
                        }
                    }
                    yield Ok(chunk);
                }
            }

            if codec.is_terminated() {
                break;
            }
        }

        if let Some(tx) = sender.take() {
            let _ = tx.send(Ok(meta));
        }
    };

    StreamHandle {
        chunks: Box::pin(chunks),
        metadata: MetadataHandle::new(meta_rx),
    }
}
