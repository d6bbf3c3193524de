use futures::Stream;
use reqwest::{Body, Request, Response};
use resilient_http::{Error, Result, Transport};
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

/// What the scripted transport does for one attempt.
#[derive(Debug, Clone, Copy)]
pub enum Step {
    /// Answer with this status and a small streamed body.
    Status(u16),
    /// Answer with this status and a body of the given size, announced in `Content-Length`.
    Sized(u16, usize),
    /// Like `Sized`, without a `Content-Length` header.
    Unsized(u16, usize),
    /// Answer with this status, then never deliver the body.
    Stall(u16),
    /// Fail without producing a response.
    Fail,
    /// Never answer.
    Hang,
}

/// In-process transport that plays back a script of outcomes, repeating the last step once the
/// script runs out.
///
/// Every response body it hands out is tracked, so tests can check that a discarded response was
/// released before the next attempt started. Hand it to the client with
/// `ClientBuilder::with_arc_transport(transport.clone())` to keep inspecting it.
pub struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    last: Mutex<Step>,
    calls: AtomicU32,
    live_bodies: Arc<AtomicUsize>,
    bytes_served: Arc<AtomicUsize>,
    leaked: AtomicBool,
    bodies_seen: Mutex<Vec<Option<Vec<u8>>>>,
}

impl ScriptedTransport {
    pub fn new<I>(steps: I) -> Arc<Self>
    where
        I: IntoIterator<Item = Step>,
    {
        let steps: VecDeque<Step> = steps.into_iter().collect();
        let last = *steps.back().expect("script must not be empty");
        Arc::new(Self {
            steps: Mutex::new(steps),
            last: Mutex::new(last),
            calls: AtomicU32::new(0),
            live_bodies: Arc::new(AtomicUsize::new(0)),
            bytes_served: Arc::new(AtomicUsize::new(0)),
            leaked: AtomicBool::new(false),
            bodies_seen: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// True if an attempt started while an earlier response body was still alive.
    pub fn leaked(&self) -> bool {
        self.leaked.load(Ordering::SeqCst)
    }

    pub fn live_bodies(&self) -> usize {
        self.live_bodies.load(Ordering::SeqCst)
    }

    /// Response body bytes handed to the client so far.
    pub fn bytes_served(&self) -> usize {
        self.bytes_served.load(Ordering::SeqCst)
    }

    /// The buffered request body of every attempt, `None` for streams and empty requests.
    pub fn bodies_seen(&self) -> Vec<Option<Vec<u8>>> {
        self.bodies_seen.lock().unwrap().clone()
    }

    fn next_step(&self) -> Step {
        let mut steps = self.steps.lock().unwrap();
        match steps.pop_front() {
            Some(step) => {
                *self.last.lock().unwrap() = step;
                step
            }
            None => *self.last.lock().unwrap(),
        }
    }
}

#[async_trait::async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, req: Request) -> Result<Response> {
        if self.live_bodies() != 0 {
            self.leaked.store(true, Ordering::SeqCst);
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.bodies_seen
            .lock()
            .unwrap()
            .push(req.body().and_then(Body::as_bytes).map(<[u8]>::to_vec));

        let (code, payload, announce, stall) = match self.next_step() {
            Step::Status(code) => (code, format!("status {code}").into_bytes(), false, false),
            Step::Sized(code, len) => (code, vec![b'x'; len], true, false),
            Step::Unsized(code, len) => (code, vec![b'x'; len], false, false),
            Step::Stall(code) => (code, Vec::new(), false, true),
            Step::Fail => {
                return Err(Error::transport(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection reset by peer",
                )))
            }
            Step::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        };

        self.live_bodies.fetch_add(1, Ordering::SeqCst);
        let mut builder = http::Response::builder().status(code);
        if announce {
            builder = builder.header(http::header::CONTENT_LENGTH, payload.len());
        }
        let body = TrackedBody {
            payload,
            stall,
            served: self.bytes_served.clone(),
            live: self.live_bodies.clone(),
        };
        Ok(builder.body(Body::wrap_stream(body)).unwrap().into())
    }
}

const CHUNK_SIZE: usize = 512;

/// Body stream served in small chunks that decrements a counter when dropped.
struct TrackedBody {
    payload: Vec<u8>,
    stall: bool,
    served: Arc<AtomicUsize>,
    live: Arc<AtomicUsize>,
}

impl Stream for TrackedBody {
    type Item = std::result::Result<Vec<u8>, std::io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.stall {
            return Poll::Pending;
        }
        if self.payload.is_empty() {
            return Poll::Ready(None);
        }
        let take = self.payload.len().min(CHUNK_SIZE);
        let chunk: Vec<u8> = self.payload.drain(..take).collect();
        self.served.fetch_add(chunk.len(), Ordering::SeqCst);
        Poll::Ready(Some(Ok(chunk)))
    }
}

impl Drop for TrackedBody {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}
