//! Shaped byte stream
//!
//! [`ShapedStream`] sits between a caller (plain proxying, or a TLS client)
//! and the raw connection. Writes are segmented inline by the fragment engine;
//! a background task injects noise through the same write half. Both take the
//! writer lock per segment so the peer never sees torn writes.

use crate::config::OutboundPlan;
use crate::obfuscation::{
    closed_error, inject_noise, Fragmenter, Pacer, RandomSampler, Sampler, Segment, SharedWriter,
};
use bytes::Bytes;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf, ReadHalf, WriteHalf};
use tokio::sync::{watch, Mutex};
use tracing::debug;

type WriteFuture = Pin<Box<dyn Future<Output = (WriteState, io::Result<usize>)> + Send>>;
type ShutdownFuture = Pin<Box<dyn Future<Output = io::Result<()>> + Send>>;

/// Fragmentation state carried from one write to the next
struct WriteState {
    fragmenter: Option<Fragmenter>,
    sampler: Box<dyn Sampler>,
}

impl WriteState {
    async fn write<W>(&mut self, data: &Bytes, writer: &SharedWriter<W>, pacer: &Pacer) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let segments = match self.fragmenter.as_mut() {
            Some(fragmenter) => fragmenter.segment(data, self.sampler.as_mut()),
            None => vec![Segment::immediate(data.clone())],
        };

        for segment in &segments {
            pacer.send(writer, &segment.bytes).await?;
            pacer.pause(segment.pause).await?;
        }
        Ok(())
    }
}

/// A write that has started but not yet been reported to the caller
struct InFlight {
    data: Bytes,
    future: WriteFuture,
}

/// Async stream that applies an [`OutboundPlan`] to everything written to it
pub struct ShapedStream<S> {
    reader: ReadHalf<S>,
    writer: SharedWriter<WriteHalf<S>>,
    pacer: Pacer,
    noise_ready: watch::Receiver<bool>,
    state: Option<WriteState>,
    pending_write: Option<InFlight>,
    pending_shutdown: Option<ShutdownFuture>,
    shutdown_done: bool,
}

impl<S> ShapedStream<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Wrap `stream`. Must be called from within a Tokio runtime when the plan
    /// carries noise, since the noise task is spawned here.
    pub fn new(stream: S, plan: Arc<OutboundPlan>) -> Self {
        Self::with_sampler(stream, plan, Box::new(RandomSampler::new()))
    }

    /// Wrap `stream`, drawing every random decision from `sampler`
    pub fn with_sampler(stream: S, plan: Arc<OutboundPlan>, mut sampler: Box<dyn Sampler>) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        let writer = Arc::new(Mutex::new(writer));
        let pacer = Pacer::new();

        let noise_ready = if plan.noise.is_empty() {
            watch::channel(true).1
        } else {
            let (tx, rx) = watch::channel(false);
            tokio::spawn(inject_noise(
                Arc::new(plan.noise.clone()),
                Arc::clone(&writer),
                pacer.clone(),
                sampler.fork(),
                tx,
            ));
            rx
        };

        let fragmenter = plan
            .fragment
            .as_ref()
            .map(|fragment| Fragmenter::new(Arc::new(fragment.clone())));

        Self {
            reader,
            writer,
            pacer,
            noise_ready,
            state: Some(WriteState {
                fragmenter,
                sampler,
            }),
            pending_write: None,
            pending_shutdown: None,
            shutdown_done: false,
        }
    }
}

impl<S> ShapedStream<S> {
    /// Stop the noise task and any pending fragment delay
    pub fn close(&self) {
        self.pacer.close();
    }

    pub fn is_closed(&self) -> bool {
        self.pacer.is_closed()
    }

    /// Drive the in-flight write, if any, to completion. Yields the bytes it
    /// carried with its result.
    fn poll_in_flight(&mut self, cx: &mut Context<'_>) -> Poll<Option<(Bytes, io::Result<usize>)>> {
        let Some(in_flight) = self.pending_write.as_mut() else {
            return Poll::Ready(None);
        };
        let (state, result) = ready!(in_flight.future.as_mut().poll(cx));
        let data = in_flight.data.clone();
        self.pending_write = None;
        self.state = Some(state);
        Poll::Ready(Some((data, result)))
    }
}

impl<S> Drop for ShapedStream<S> {
    fn drop(&mut self) {
        self.pacer.close();
    }
}

/// One shaped write: wait for the first noise round, then send every segment
async fn shaped_write<W>(
    mut state: WriteState,
    data: Bytes,
    writer: SharedWriter<W>,
    pacer: Pacer,
    mut noise_ready: watch::Receiver<bool>,
) -> (WriteState, io::Result<usize>)
where
    W: AsyncWrite + Unpin,
{
    tokio::select! {
        biased;
        _ = pacer.closed() => return (state, Err(closed_error())),
        // An error means the noise task ended early; real data goes out anyway
        _ = async { noise_ready.wait_for(|ready| *ready).await.is_ok() } => {}
    }

    let result = state.write(&data, &writer, &pacer).await;
    if let Err(e) = &result {
        debug!(bytes = data.len(), error = %e, "shaped write failed");
    }
    (state, result.map(|()| data.len()))
}

impl<S> AsyncRead for ShapedStream<S>
where
    S: AsyncRead,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.reader).poll_read(cx, buf)
    }
}

impl<S> AsyncWrite for ShapedStream<S>
where
    S: AsyncWrite + Send + 'static,
{
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = &mut *self;

        // A write whose caller gave up is finished before anything else. Its
        // result only answers a poll that resubmits the same bytes.
        if let Some(in_flight) = &this.pending_write {
            let resubmitted = in_flight.data[..] == *buf;
            match ready!(this.poll_in_flight(cx)) {
                Some((_, result)) if resubmitted => return Poll::Ready(result),
                Some((data, Err(e))) => {
                    debug!(bytes = data.len(), error = %e, "abandoned write failed");
                    return Poll::Ready(Err(e));
                }
                Some((data, Ok(_))) => {
                    debug!(bytes = data.len(), "abandoned write completed");
                }
                None => {}
            }
        }

        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        let Some(state) = this.state.take() else {
            return Poll::Ready(Err(closed_error()));
        };
        let data = Bytes::copy_from_slice(buf);
        this.pending_write = Some(InFlight {
            data: data.clone(),
            future: Box::pin(shaped_write(
                state,
                data,
                Arc::clone(&this.writer),
                this.pacer.clone(),
                this.noise_ready.clone(),
            )),
        });

        match ready!(this.poll_in_flight(cx)) {
            Some((_, result)) => Poll::Ready(result),
            None => Poll::Ready(Ok(0)),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // Every segment is flushed as it is written; only an unfinished write
        // needs driving here.
        if let Some((_, Err(e))) = ready!(self.poll_in_flight(cx)) {
            return Poll::Ready(Err(e));
        }
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = &mut *self;
        if this.shutdown_done {
            return Poll::Ready(Ok(()));
        }
        if this.pending_shutdown.is_none() {
            this.pacer.close();
            let writer = Arc::clone(&this.writer);
            this.pending_shutdown = Some(Box::pin(async move {
                let mut writer = writer.lock().await;
                writer.shutdown().await
            }));
        }
        let Some(future) = this.pending_shutdown.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        let result = ready!(future.as_mut().poll(cx));
        this.pending_shutdown = None;
        this.shutdown_done = result.is_ok();
        Poll::Ready(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Bounds, FragmentMode, FragmentPlan, NoiseDescriptor, NoiseKind, NoisePayload, NoisePlan};
    use crate::obfuscation::SequenceSampler;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Records every write call separately so segment boundaries are visible
    #[derive(Clone, Default)]
    struct Recorder {
        writes: Arc<StdMutex<Vec<Vec<u8>>>>,
        fail: bool,
    }

    impl Recorder {
        fn writes(&self) -> Vec<Vec<u8>> {
            self.writes.lock().unwrap().clone()
        }
    }

    impl AsyncRead for Recorder {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            buf.put_slice(b"pong");
            Poll::Ready(Ok(()))
        }
    }

    impl AsyncWrite for Recorder {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            if self.fail {
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")));
            }
            self.writes.lock().unwrap().push(buf.to_vec());
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn tcp_range(length: u64, interval: Bounds) -> Arc<OutboundPlan> {
        Arc::new(OutboundPlan {
            fragment: Some(FragmentPlan::new(
                FragmentMode::TcpRange,
                Bounds::fixed(length),
                interval,
            )),
            ..Default::default()
        })
    }

    fn literal_noise(bytes: &'static [u8]) -> NoiseDescriptor {
        NoiseDescriptor {
            kind: NoiseKind::Literal,
            payload: NoisePayload::Bytes(Bytes::from_static(bytes)),
            delay: None,
            count: None,
        }
    }

    #[tokio::test]
    async fn test_passthrough_without_plan() {
        let recorder = Recorder::default();
        let mut stream = ShapedStream::new(recorder.clone(), Arc::new(OutboundPlan::default()));

        stream.write_all(b"hello").await.unwrap();
        stream.flush().await.unwrap();
        assert_eq!(recorder.writes(), vec![b"hello".to_vec()]);

        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[tokio::test]
    async fn test_tcp_range_segments_reach_inner_stream() {
        let recorder = Recorder::default();
        let mut stream = ShapedStream::new(recorder.clone(), tcp_range(10, Bounds::fixed(0)));

        let data: Vec<u8> = (0u8..25).collect();
        stream.write_all(&data).await.unwrap();

        let writes = recorder.writes();
        let sizes: Vec<usize> = writes.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![10, 10, 5]);
        assert_eq!(writes.concat(), data);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_between_chunks() {
        let recorder = Recorder::default();
        let mut stream = ShapedStream::new(recorder.clone(), tcp_range(2, Bounds::fixed(100)));

        let start = tokio::time::Instant::now();
        stream.write_all(b"abcdef").await.unwrap();
        // Three chunks, two pauses
        assert_eq!(start.elapsed(), Duration::from_millis(200));
        assert_eq!(recorder.writes().len(), 3);
    }

    #[tokio::test]
    async fn test_close_cancels_pending_delay() {
        let recorder = Recorder::default();
        let mut stream = ShapedStream::new(recorder.clone(), tcp_range(1, Bounds::fixed(3_600_000)));
        let closer = stream.pacer.clone();

        let writer = tokio::spawn(async move { stream.write_all(b"ab").await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        closer.close();

        let result = tokio::time::timeout(Duration::from_secs(5), writer)
            .await
            .expect("write should stop promptly")
            .unwrap();
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(recorder.writes(), vec![b"a".to_vec()]);
    }

    #[tokio::test]
    async fn test_noise_goes_before_first_write() {
        let recorder = Recorder::default();
        let plan = Arc::new(OutboundPlan {
            noise: NoisePlan {
                descriptors: vec![literal_noise(b"n1"), literal_noise(b"n2")],
                keep_alive_secs: 0,
            },
            ..Default::default()
        });
        let mut stream = ShapedStream::new(recorder.clone(), plan);

        stream.write_all(b"data").await.unwrap();
        assert_eq!(
            recorder.writes(),
            vec![b"n1".to_vec(), b"n2".to_vec(), b"data".to_vec()]
        );
    }

    #[tokio::test]
    async fn test_random_noise_with_fixed_sampler() {
        let recorder = Recorder::default();
        let plan = Arc::new(OutboundPlan {
            noise: NoisePlan {
                descriptors: vec![NoiseDescriptor {
                    kind: NoiseKind::Random,
                    payload: NoisePayload::Random {
                        length_min: 3,
                        length_max: 9,
                    },
                    delay: None,
                    count: Some(Bounds::fixed(2)),
                }],
                keep_alive_secs: 0,
            },
            ..Default::default()
        });
        let sampler = SequenceSampler::new(vec![0, 2, 4, 6]).with_fill_byte(0x7f);
        let mut stream = ShapedStream::with_sampler(recorder.clone(), plan, Box::new(sampler));

        stream.write_all(b"x").await.unwrap();
        // delay 0, count 2, lengths 4 and 6
        assert_eq!(
            recorder.writes(),
            vec![vec![0x7f; 4], vec![0x7f; 6], b"x".to_vec()]
        );
    }

    #[tokio::test]
    async fn test_write_error_propagates() {
        let recorder = Recorder {
            fail: true,
            ..Default::default()
        };
        let mut stream = ShapedStream::new(recorder, tcp_range(4, Bounds::fixed(0)));
        let err = stream.write_all(b"abcdefgh").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }

    #[tokio::test]
    async fn test_shutdown_stops_noise() {
        let recorder = Recorder::default();
        let plan = Arc::new(OutboundPlan {
            noise: NoisePlan {
                descriptors: vec![literal_noise(b"n")],
                keep_alive_secs: 1,
            },
            ..Default::default()
        });
        let mut stream = ShapedStream::new(recorder.clone(), plan);
        stream.write_all(b"d").await.unwrap();
        stream.shutdown().await.unwrap();
        assert!(stream.is_closed());

        let seen = recorder.writes().len();
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(recorder.writes().len(), seen);
        assert!(stream.write_all(b"late").await.is_err());
    }
    #[tokio::test]
    async fn test_shutdown_twice() {
        let recorder = Recorder::default();
        let mut stream = ShapedStream::new(recorder.clone(), Arc::new(OutboundPlan::default()));
        stream.write_all(b"bye").await.unwrap();

        stream.shutdown().await.unwrap();
        stream.shutdown().await.unwrap();
        assert!(stream.is_closed());
        assert_eq!(recorder.writes(), vec![b"bye".to_vec()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_after_timed_out_write() {
        let recorder = Recorder::default();
        let mut stream = ShapedStream::new(recorder.clone(), tcp_range(1, Bounds::fixed(100)));

        let slow = [7u8; 64];
        let timed_out =
            tokio::time::timeout(Duration::from_millis(250), stream.write_all(&slow)).await;
        assert!(timed_out.is_err());

        // The unfinished write completes first; the new one reports its own length
        assert_eq!(stream.write(b"hi").await.unwrap(), 2);

        let mut expected = slow.to_vec();
        expected.extend_from_slice(b"hi");
        assert_eq!(recorder.writes().concat(), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_same_buffer_after_timeout() {
        let recorder = Recorder::default();
        let mut stream = ShapedStream::new(recorder.clone(), tcp_range(1, Bounds::fixed(100)));

        let data = [3u8; 64];
        let timed_out =
            tokio::time::timeout(Duration::from_millis(250), stream.write_all(&data)).await;
        assert!(timed_out.is_err());

        stream.write_all(&data).await.unwrap();
        assert_eq!(recorder.writes().concat(), data.to_vec());
    }
}
