use chrono::NaiveDateTime;
use rollcall_core::{
    AttendanceLedger, AttendanceRecord, AttendanceStore, EuclideanMatcher, FaceBox, FaceEncoder, Gallery,
    MarkOutcome, MatchPolicy, MatchResult, Matcher, Session, StoreError,
};
use rollcall_hw::{CameraError, Frame, FrameSource};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("attendance store error: {0}")]
    Store(#[from] StoreError),
}

/// What happened to one face in one frame.
#[derive(Debug, Clone)]
pub struct FaceOutcome {
    pub bbox: FaceBox,
    pub result: MatchResult,
    pub mark: MarkOutcome,
}

/// Totals for one recognition session.
#[derive(Debug, Default)]
pub struct SessionSummary {
    pub frames: usize,
    pub dark_frames: usize,
    pub faces: usize,
    pub unknown_faces: usize,
    /// Records appended during this session, in marking order.
    pub marked: Vec<AttendanceRecord>,
}

/// One attendance session: gallery, thresholds, ledger, and the set of
/// identities already marked.
pub struct Recognition<E, S> {
    encoder: E,
    gallery: Gallery,
    policy: MatchPolicy,
    ledger: AttendanceLedger<S>,
    session: Session,
}

/// False when both sides name an embedding model and the names differ.
///
/// Embeddings from different models are not comparable; every face would come out Unknown.
pub fn models_agree(gallery: Option<&str>, encoder: Option<&str>) -> bool {
    match (gallery, encoder) {
        (Some(gallery), Some(encoder)) => gallery == encoder,
        _ => true,
    }
}

impl<E: FaceEncoder, S: AttendanceStore> Recognition<E, S> {
    pub fn new(encoder: E, gallery: Gallery, policy: MatchPolicy, ledger: AttendanceLedger<S>) -> Self {
        if !models_agree(gallery.model_version(), encoder.model_version()) {
            tracing::warn!(
                gallery = gallery.model_version().unwrap_or_default(),
                encoder = encoder.model_version().unwrap_or_default(),
                "gallery was built with a different embedding model; run `rollcall encode` again"
            );
        }
        Self {
            encoder,
            gallery,
            policy,
            ledger,
            session: Session::new(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn ledger(&self) -> &AttendanceLedger<S> {
        &self.ledger
    }

    /// Match every face in `frame` and mark accepted identities.
    ///
    /// An encoder failure counts as a frame without faces.
    pub fn process_frame(&mut self, frame: &Frame, now: NaiveDateTime) -> Result<Vec<FaceOutcome>, EngineError> {
        let faces = match self.encoder.encode(&frame.data, frame.width, frame.height) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(error = %e, seq = frame.sequence, "encoding failed; skipping frame");
                Vec::new()
            }
        };

        let mut outcomes = Vec::with_capacity(faces.len());
        for face in faces {
            let result = EuclideanMatcher.compare(&face.embedding, self.gallery.references(), self.policy);
            let mark = self.ledger.try_mark(&mut self.session, &result.identity, now)?;

            tracing::debug!(
                identity = %result.identity,
                distance = result.distance,
                accepted = result.accepted,
                top = face.bbox.top,
                left = face.bbox.left,
                width = face.bbox.width(),
                height = face.bbox.height(),
                "face"
            );

            outcomes.push(FaceOutcome {
                bbox: face.bbox,
                result,
                mark,
            });
        }
        Ok(outcomes)
    }

    /// Pull frames until cancelled, the source runs dry, or `max_frames` is reached.
    ///
    /// Cancellation is checked between frames; a frame in progress always completes.
    pub fn run<F: FrameSource>(
        &mut self,
        source: &mut F,
        cancel: &CancellationToken,
        max_frames: Option<usize>,
        mut clock: impl FnMut() -> NaiveDateTime,
    ) -> Result<SessionSummary, EngineError> {
        tracing::info!(references = self.gallery.len(), "recognition session started");
        let mut summary = SessionSummary::default();

        loop {
            if cancel.is_cancelled() {
                tracing::info!("session cancelled");
                break;
            }
            if max_frames.is_some_and(|max| summary.frames >= max) {
                tracing::info!(frames = summary.frames, "frame limit reached");
                break;
            }
            let Some(frame) = source.next_frame()? else {
                tracing::info!("frame source exhausted");
                break;
            };
            summary.frames += 1;

            if frame.is_dark {
                summary.dark_frames += 1;
                tracing::trace!(seq = frame.sequence, brightness = frame.avg_brightness(), "skipping dark frame");
                continue;
            }

            for outcome in self.process_frame(&frame, clock())? {
                summary.faces += 1;
                if !outcome.result.accepted {
                    summary.unknown_faces += 1;
                }
                if let MarkOutcome::Marked(record) = outcome.mark {
                    summary.marked.push(record);
                }
            }
        }

        tracing::info!(
            frames = summary.frames,
            faces = summary.faces,
            marked = summary.marked.len(),
            present = self.session.len(),
            "recognition session finished"
        );
        Ok(summary)
    }
}
