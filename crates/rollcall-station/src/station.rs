use chrono::Utc;
use rollcall_core::attendance::EnrollError;
use rollcall_core::{
    enroll, mark_attendance, CaptureAdapter, CaptureError, EnrollOutcome, EuclideanMatcher, Frame, MarkOutcome, RecordError, Signature, Storage, StoreError,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum StationError {
    #[error("a capture is already in progress")]
    Busy,
    #[error("capture unavailable: {0}")]
    CaptureUnavailable(String),
    #[error("capture failed: {0}")]
    Capture(CaptureError),
    #[error("invalid identity: {0}")]
    InvalidIdentity(#[from] RecordError),
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    #[error("failed to start station thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("station thread exited")]
    ChannelClosed,
}

impl From<CaptureError> for StationError {
    fn from(e: CaptureError) -> Self {
        match e {
            CaptureError::Unavailable(msg) => StationError::CaptureUnavailable(msg),
            other => StationError::Capture(other),
        }
    }
}

impl From<EnrollError> for StationError {
    fn from(e: EnrollError) -> Self {
        match e {
            EnrollError::Record(e) => StationError::InvalidIdentity(e),
            EnrollError::Store(e) => StationError::Store(e),
        }
    }
}

/// What the caller hands the station for one cycle.
pub enum Probe {
    /// A camera frame, run through the capture adapter.
    Frame(Frame),
    /// A signature already extracted by an external model (`None`: no face).
    Signature(Option<Signature>),
}

/// Messages sent from handles to the station thread.
enum StationRequest {
    Mark {
        probe: Probe,
        reply: oneshot::Sender<Result<MarkOutcome, StationError>>,
    },
    Enroll {
        id: Option<String>,
        name: String,
        probe: Probe,
        reply: oneshot::Sender<Result<EnrollOutcome, StationError>>,
    },
}

/// Clone-safe handle to the station thread.
#[derive(Clone)]
pub struct StationHandle {
    tx: mpsc::Sender<StationRequest>,
    busy: Arc<AtomicBool>,
}

impl StationHandle {
    /// Capture, match and (maybe) record attendance.
    pub async fn mark(&self, probe: Probe) -> Result<MarkOutcome, StationError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.submit(StationRequest::Mark {
            probe,
            reply: reply_tx,
        })?;
        reply_rx.await.map_err(|_| StationError::ChannelClosed)?
    }

    /// Capture a signature and enroll it under `name`.
    pub async fn enroll(
        &self,
        id: Option<String>,
        name: String,
        probe: Probe,
    ) -> Result<EnrollOutcome, StationError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.submit(StationRequest::Enroll {
            id,
            name,
            probe,
            reply: reply_tx,
        })?;
        reply_rx.await.map_err(|_| StationError::ChannelClosed)?
    }

    /// Whether a cycle is currently in flight.
    pub fn is_busy(&self) -> bool {
        !self.tx.is_closed() && self.busy.load(Ordering::Acquire)
    }

    // Takes the flag and queues the request before the caller's first await.
    fn submit(&self, req: StationRequest) -> Result<(), StationError> {
        if self.tx.is_closed() {
            return Err(StationError::ChannelClosed);
        }
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!("request rejected: station busy");
            return Err(StationError::Busy);
        }
        self.tx.try_send(req).map_err(|_| {
            self.busy.store(false, Ordering::Release);
            StationError::ChannelClosed
        })
    }
}

/// Spawn the station on a dedicated OS thread.
///
/// The thread owns `storage` and `adapter` and serves one request at a
/// time. The busy flag is cleared by the thread itself once a cycle has
/// finished, just before the reply goes out.
pub fn spawn_station<S>(
    storage: S,
    adapter: Option<Box<dyn CaptureAdapter>>,
    threshold: f32,
) -> Result<StationHandle, StationError>
where
    S: Storage + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<StationRequest>(1);
    let busy = Arc::new(AtomicBool::new(false));
    let station_busy = Arc::clone(&busy);

    let mut station = Station {
        storage,
        adapter,
        threshold,
    };

    std::thread::Builder::new()
        .name("rollcall-station".into())
        .spawn(move || {
            tracing::info!(threshold, "station thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    StationRequest::Mark { probe, reply } => {
                        let result = {
                            let _cycle = CycleGuard(&station_busy);
                            station.run_mark(probe)
                        };
                        let _ = reply.send(result);
                    }
                    StationRequest::Enroll {
                        id,
                        name,
                        probe,
                        reply,
                    } => {
                        let result = {
                            let _cycle = CycleGuard(&station_busy);
                            station.run_enroll(id, &name, probe)
                        };
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("station thread exiting");
        })
        .map_err(StationError::Spawn)?;

    Ok(StationHandle { tx, busy })
}

/// Clears the busy flag when a cycle ends, including by panic.
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Station<S> {
    storage: S,
    adapter: Option<Box<dyn CaptureAdapter>>,
    threshold: f32,
}

impl<S: Storage> Station<S> {
    fn capture(&mut self, probe: Probe) -> Result<Option<Signature>, StationError> {
        match probe {
            Probe::Signature(sig) => Ok(sig),
            Probe::Frame(frame) => {
                let adapter = self.adapter.as_mut().ok_or_else(|| {
                    StationError::CaptureUnavailable("no embedding backend configured".into())
                })?;
                let started = std::time::Instant::now();
                let sig = adapter.capture_signature(&frame)?;
                tracing::debug!(
                    width = frame.width,
                    height = frame.height,
                    face = sig.is_some(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "frame captured"
                );
                Ok(sig)
            }
        }
    }

    fn run_mark(&mut self, probe: Probe) -> Result<MarkOutcome, StationError> {
        // Skip the (slow) capture when there is nobody to match against.
        if self.storage.list_enrolled()?.is_empty() {
            return Ok(MarkOutcome::NoEnrollments);
        }
        let sig = self.capture(probe)?;
        let outcome = mark_attendance(
            &mut self.storage,
            &EuclideanMatcher,
            sig.as_ref(),
            self.threshold,
            Utc::now(),
        )?;
        tracing::info!(%outcome, "mark cycle finished");
        Ok(outcome)
    }

    fn run_enroll(
        &mut self,
        id: Option<String>,
        name: &str,
        probe: Probe,
    ) -> Result<EnrollOutcome, StationError> {
        let sig = self.capture(probe)?;
        Ok(enroll(&mut self.storage, id, name, sig)?)
    }
}
