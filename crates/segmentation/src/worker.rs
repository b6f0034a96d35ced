use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::{
    DecodeOutput, Embedding, ImageInputs, LoadProgress, LoadedModel, ModelLoader, Point,
    SegmentError, SegmentImage, SegmentPhase, WorkerEvent, WorkerFailure, WorkerRequest,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Uninitialized,
    Loading,
    Ready,
    Encoding,
    Encoded,
    Decoding,
}

struct EncodedImage {
    inputs: ImageInputs,
    embedding: Embedding,
}

/// Segmentation state machine. Requests are handled one at a time, in the
/// order given; every outcome, including misuse, comes back as events.
pub struct SegmentWorker {
    loader: Box<dyn ModelLoader>,
    state: WorkerState,
    model: Option<LoadedModel>,
    session: Option<EncodedImage>,
    ready_sent: bool,
}

impl SegmentWorker {
    pub fn new(loader: impl ModelLoader) -> Self {
        Self {
            loader: Box::new(loader),
            state: WorkerState::Uninitialized,
            model: None,
            session: None,
            ready_sent: false,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Run the state machine on a dedicated thread.
    pub fn spawn(loader: impl ModelLoader) -> WorkerHandle {
        let id = Uuid::new_v4();
        let (tx_req, rx_req) = unbounded::<WorkerRequest>();
        let (tx_ev, rx_ev) = unbounded::<WorkerEvent>();
        let cancel = Arc::new(AtomicBool::new(false));
        let mut worker = SegmentWorker::new(loader);

        let cancel_thread = cancel.clone();
        let spawned = thread::Builder::new()
            .name(format!("segment-worker-{}", &id.simple().to_string()[..8]))
            .spawn(move || {
                let span = info_span!("segment_worker", %id);
                let _enter = span.enter();
                info!("worker started");
                for request in rx_req.iter() {
                    if cancel_thread.load(Ordering::Acquire) {
                        break;
                    }
                    worker.handle(request, &mut |event| {
                        if !cancel_thread.load(Ordering::Acquire) {
                            let _ = tx_ev.send(event);
                        }
                    });
                }
                info!(state = ?worker.state, "worker stopped");
            });
        if let Err(e) = &spawned {
            warn!(%id, "could not start segmentation worker thread: {e}");
        }

        WorkerHandle {
            id,
            tx: spawned.is_ok().then_some(tx_req),
            rx: rx_ev,
            cancel,
        }
    }

    pub fn handle(&mut self, request: WorkerRequest, emit: &mut dyn FnMut(WorkerEvent)) {
        match request {
            WorkerRequest::Init => self.init(emit),
            WorkerRequest::Segment(image) => {
                if let Err(e) = self.segment(image, emit) {
                    self.fail(&e, emit);
                }
            }
            WorkerRequest::Decode(points) => match self.decode(&points) {
                Ok(output) => emit(WorkerEvent::DecodeResult(output)),
                Err(e) => self.fail(&e, emit),
            },
            WorkerRequest::Reset => {
                self.session = None;
                self.state = if self.model.is_some() {
                    WorkerState::Ready
                } else {
                    WorkerState::Uninitialized
                };
                debug!("embedding cleared");
            }
        }
    }

    fn init(&mut self, emit: &mut dyn FnMut(WorkerEvent)) {
        if self.model.is_some() {
            debug!("init ignored, model already loaded");
            return;
        }
        self.state = WorkerState::Loading;
        let mut forward = |p: LoadProgress| emit(WorkerEvent::LoadingProgress(p));
        match self.loader.load(&mut forward) {
            Ok(model) => {
                info!(model_id = model.model.model_id(), "model ready");
                self.model = Some(model);
                self.state = WorkerState::Ready;
                if !self.ready_sent {
                    self.ready_sent = true;
                    emit(WorkerEvent::Ready);
                }
            }
            Err(e) => {
                self.state = WorkerState::Uninitialized;
                self.fail(&e, emit);
            }
        }
    }

    fn segment(
        &mut self,
        image: SegmentImage,
        emit: &mut dyn FnMut(WorkerEvent),
    ) -> Result<(), SegmentError> {
        let loaded = self.model.as_ref().ok_or(SegmentError::NotReady)?;
        emit(WorkerEvent::SegmentResult(SegmentPhase::Start));
        self.session = None;
        self.state = WorkerState::Encoding;

        let decoded = image::load_from_memory(&image.bytes).map_err(|e| {
            self.state = WorkerState::Ready;
            SegmentError::from(e)
        })?;
        let inputs = loaded.processor.preprocess(&decoded);
        emit(WorkerEvent::LoadingProgress(LoadProgress::stage(
            "Computing embeddings...",
            75.0,
        )));
        let embedding = match loaded.model.embed(&inputs) {
            Ok(embedding) => embedding,
            Err(e) => {
                self.state = WorkerState::Ready;
                return Err(e);
            }
        };
        info!(
            width = inputs.original_size.width,
            height = inputs.original_size.height,
            "image encoded"
        );
        self.session = Some(EncodedImage { inputs, embedding });
        self.state = WorkerState::Encoded;
        emit(WorkerEvent::SegmentResult(SegmentPhase::Done));
        Ok(())
    }

    fn decode(&mut self, points: &[Point]) -> Result<DecodeOutput, SegmentError> {
        let loaded = self.model.as_ref().ok_or(SegmentError::NotReady)?;
        let session = self.session.as_ref().ok_or(SegmentError::NotEncoded)?;
        if points.is_empty() {
            return Err(SegmentError::NoPoints);
        }
        self.state = WorkerState::Decoding;
        let (coords, labels) = loaded.processor.map_points(&session.inputs, points);
        let result = loaded
            .model
            .decode(&session.embedding, &coords, &labels)
            .map(|out| DecodeOutput {
                masks: loaded.processor.post_process_masks(&session.inputs, &out),
                scores: out.scores,
            });
        self.state = WorkerState::Encoded;
        debug!(points = points.len(), ok = result.is_ok(), "decode finished");
        result
    }

    fn fail(&self, err: &SegmentError, emit: &mut dyn FnMut(WorkerEvent)) {
        warn!(state = ?self.state, "segmentation error: {err}");
        emit(WorkerEvent::Error(WorkerFailure::from(err)));
    }
}

/// Caller side of a spawned worker. Dropping the handle terminates it.
pub struct WorkerHandle {
    id: Uuid,
    tx: Option<Sender<WorkerRequest>>,
    rx: Receiver<WorkerEvent>,
    cancel: Arc<AtomicBool>,
}

impl WorkerHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_terminated(&self) -> bool {
        self.tx.is_none()
    }

    pub fn send(&self, request: WorkerRequest) -> Result<(), SegmentError> {
        let tx = self.tx.as_ref().ok_or(SegmentError::Disconnected)?;
        tx.send(request).map_err(|_| SegmentError::Disconnected)
    }

    pub fn try_recv(&self) -> Option<WorkerEvent> {
        if self.is_terminated() {
            return None;
        }
        self.rx.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<WorkerEvent> {
        if self.is_terminated() {
            return None;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// A handle with no thread behind it: requests land in the returned
    /// receiver and events are fed through the returned sender.
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, Receiver<WorkerRequest>, Sender<WorkerEvent>) {
        let (tx_req, rx_req) = unbounded();
        let (tx_ev, rx_ev) = unbounded();
        let handle = WorkerHandle {
            id: Uuid::new_v4(),
            tx: Some(tx_req),
            rx: rx_ev,
            cancel: Arc::new(AtomicBool::new(false)),
        };
        (handle, rx_req, tx_ev)
    }

    /// Stop the worker. Work already running finishes on its own thread but
    /// nothing it produces reaches this handle.
    pub fn terminate(&mut self) {
        if self.tx.take().is_some() {
            self.cancel.store(true, Ordering::Release);
            info!(id = %self.id, "worker terminated");
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Creates a fresh worker for each overlay session.
pub trait WorkerSpawner {
    fn spawn_worker(&self) -> WorkerHandle;
}

impl<F> WorkerSpawner for F
where
    F: Fn() -> WorkerHandle,
{
    fn spawn_worker(&self) -> WorkerHandle {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AffinityLoader, PointLabel};

    fn png(w: u32, h: u32) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(w, h, image::Rgba([40, 160, 90, 255]));
        crate::encode_png(&img).unwrap()
    }

    fn collect(worker: &mut SegmentWorker, request: WorkerRequest) -> Vec<WorkerEvent> {
        let mut events = Vec::new();
        worker.handle(request, &mut |e| events.push(e));
        events
    }

    #[test]
    fn test_ready_is_emitted_once() {
        let mut worker = SegmentWorker::new(AffinityLoader::builtin());
        let first = collect(&mut worker, WorkerRequest::Init);
        assert_eq!(first.last(), Some(&WorkerEvent::Ready));
        assert!(first
            .iter()
            .any(|e| matches!(e, WorkerEvent::LoadingProgress(p) if p.status == "Loading processor...")));
        assert!(collect(&mut worker, WorkerRequest::Init).is_empty());
        assert_eq!(worker.state(), WorkerState::Ready);
    }

    #[test]
    fn test_segment_before_ready_is_an_error() {
        let mut worker = SegmentWorker::new(AffinityLoader::builtin());
        let events = collect(&mut worker, WorkerRequest::Segment(SegmentImage::new(png(8, 8))));
        assert!(matches!(events.as_slice(), [WorkerEvent::Error(_)]));
        assert_eq!(worker.state(), WorkerState::Uninitialized);
    }

    #[test]
    fn test_segment_emits_start_progress_done() {
        let mut worker = SegmentWorker::new(AffinityLoader::builtin());
        collect(&mut worker, WorkerRequest::Init);
        let events = collect(&mut worker, WorkerRequest::Segment(SegmentImage::new(png(40, 20))));
        assert_eq!(events.first(), Some(&WorkerEvent::SegmentResult(SegmentPhase::Start)));
        assert!(matches!(&events[1], WorkerEvent::LoadingProgress(p) if p.progress == 75.0));
        assert_eq!(events.last(), Some(&WorkerEvent::SegmentResult(SegmentPhase::Done)));
        assert_eq!(worker.state(), WorkerState::Encoded);
    }

    #[test]
    fn test_bad_image_returns_to_ready() {
        let mut worker = SegmentWorker::new(AffinityLoader::builtin());
        collect(&mut worker, WorkerRequest::Init);
        let events = collect(&mut worker, WorkerRequest::Segment(SegmentImage::new(b"nope".to_vec())));
        assert!(matches!(events.last(), Some(WorkerEvent::Error(_))));
        assert_eq!(worker.state(), WorkerState::Ready);
        let events = collect(&mut worker, WorkerRequest::Decode(vec![Point::include(0.5, 0.5)]));
        assert!(matches!(events.as_slice(), [WorkerEvent::Error(f)] if f.message.contains("segment")));
    }

    #[test]
    fn test_reset_drops_embedding() {
        let mut worker = SegmentWorker::new(AffinityLoader::builtin());
        collect(&mut worker, WorkerRequest::Init);
        collect(&mut worker, WorkerRequest::Segment(SegmentImage::new(png(16, 16))));
        assert!(collect(&mut worker, WorkerRequest::Reset).is_empty());
        assert_eq!(worker.state(), WorkerState::Ready);
        let events = collect(
            &mut worker,
            WorkerRequest::Decode(vec![Point {
                point: [0.5, 0.5],
                label: PointLabel::Include,
            }]),
        );
        assert!(matches!(events.as_slice(), [WorkerEvent::Error(_)]));
    }

    #[test]
    fn test_terminated_handle_rejects_sends() {
        let mut handle = SegmentWorker::spawn(AffinityLoader::builtin());
        handle.terminate();
        assert!(handle.is_terminated());
        assert!(matches!(handle.send(WorkerRequest::Init), Err(SegmentError::Disconnected)));
        assert!(handle.try_recv().is_none());
    }
}
