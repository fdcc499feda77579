//! Duplicates a response body onto the wire and into a bounded capture
//! buffer in one pass, so forwarding never waits on storage and storage
//! never holds up forwarding (§4.2 step 5: "no buffering on the forwarding
//! path"). Grounded in this codebase's MITM response path, which tees a
//! body into a logging channel while streaming the original to the caller.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use http_body::{Body, Frame, SizeHint};
use tokio::sync::oneshot;

/// What accumulated by the time the stream ended: the true on-wire length
/// (§8 "Size fidelity" — counted even past `cap`) and the captured bytes,
/// truncated at `cap`.
pub struct Captured {
	pub on_wire_len: u64,
	pub bytes: Bytes,
}

pub struct TeeBody<B> {
	inner: B,
	buf: BytesMut,
	cap: usize,
	on_wire_len: u64,
	done_tx: Option<oneshot::Sender<Captured>>,
}

impl<B> TeeBody<B> {
	pub fn new(inner: B, cap: usize) -> (Self, oneshot::Receiver<Captured>) {
		let (tx, rx) = oneshot::channel();
		(
			TeeBody {
				inner,
				buf: BytesMut::new(),
				cap,
				on_wire_len: 0,
				done_tx: Some(tx),
			},
			rx,
		)
	}

	fn finish(&mut self) {
		if let Some(tx) = self.done_tx.take() {
			let _ = tx.send(Captured {
				on_wire_len: self.on_wire_len,
				bytes: self.buf.split().freeze(),
			});
		}
	}
}

impl<B> Body for TeeBody<B>
where
	B: Body<Data = Bytes> + Unpin,
{
	type Data = Bytes;
	type Error = B::Error;

	fn poll_frame(
		self: Pin<&mut Self>,
		cx: &mut Context<'_>,
	) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
		let this = self.get_mut();
		match Pin::new(&mut this.inner).poll_frame(cx) {
			Poll::Ready(Some(Ok(frame))) => {
				if let Some(data) = frame.data_ref() {
					this.on_wire_len += data.len() as u64;
					if this.buf.len() < this.cap {
						let take = (this.cap - this.buf.len()).min(data.len());
						this.buf.extend_from_slice(&data[..take]);
					}
				}
				Poll::Ready(Some(Ok(frame)))
			}
			Poll::Ready(None) => {
				this.finish();
				Poll::Ready(None)
			}
			Poll::Ready(Some(Err(err))) => {
				this.finish();
				Poll::Ready(Some(Err(err)))
			}
			Poll::Pending => Poll::Pending,
		}
	}

	fn is_end_stream(&self) -> bool {
		self.inner.is_end_stream()
	}

	fn size_hint(&self) -> SizeHint {
		self.inner.size_hint()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use http_body_util::{BodyExt, StreamBody};

	fn chunked_body(chunks: Vec<&'static str>) -> impl Body<Data = Bytes, Error = std::convert::Infallible> {
		let stream = tokio_stream::iter(chunks.into_iter().map(|c| Ok(Frame::data(Bytes::from_static(c.as_bytes())))));
		StreamBody::new(stream)
	}

	#[tokio::test]
	async fn forwards_every_byte_while_capturing_up_to_cap() {
		let body = chunked_body(vec!["hello ", "world"]);
		let (tee, rx) = TeeBody::new(body, 100);
		let collected = tee.collect().await.unwrap().to_bytes();
		assert_eq!(&collected[..], b"hello world");

		let captured = rx.await.unwrap();
		assert_eq!(captured.on_wire_len, 11);
		assert_eq!(&captured.bytes[..], b"hello world");
	}

	#[tokio::test]
	async fn capture_truncates_at_cap_but_on_wire_len_counts_everything() {
		let body = chunked_body(vec!["0123456789", "abcdefghij"]);
		let (tee, rx) = TeeBody::new(body, 5);
		let collected = tee.collect().await.unwrap().to_bytes();
		assert_eq!(collected.len(), 20);

		let captured = rx.await.unwrap();
		assert_eq!(captured.on_wire_len, 20);
		assert_eq!(captured.bytes.len(), 5);
		assert_eq!(&captured.bytes[..], b"01234");
	}
}
