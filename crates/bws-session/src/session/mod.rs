//! Capture/upload orchestration for one verification or enrollment attempt.
//!
//! The session is a single-threaded state machine fed with [`Event`]s:
//! camera frames, fired timers and finished background jobs. It fetches a
//! token, optionally waits for a face, captures reference/motion image
//! pairs, uploads them, and finally asks the webservice to verify or enroll.
//! All blocking work goes through the [`Executor`]; session state is only
//! touched from [`Session::handle_event`] and the lifecycle methods.

use std::collections::HashMap;
use std::sync::Arc;

use bws_client::{BwsApi, TokenProvider};
use bws_core::{
    motion, BwsError, BwsToken, Disposition, GrayscaleImage, ImageError, MovementDirection,
};
use thiserror::Error;
use uuid::Uuid;

use crate::executor::{deliver, BackgroundWork, Event, Executor, TaskHandle, TaskOutput, Timer};
use crate::mode::{CapturePair, Mode};
use crate::ports::{FaceDetector, Frame, Message, UnavailableFaceDetector, View};
use crate::settings::SessionSettings;

#[cfg(test)]
mod tests;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Unknown,
    RequestingPermission,
    Granted,
    Denied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageDetectionState {
    Idle,
    WaitingForImageWithFace,
    WaitingForReferenceImage,
    WaitingForImageWithMotion,
}

/// Coarse progress of the attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    FetchingToken,
    Capturing,
    Finalizing,
    Finished { success: bool },
}

/// Failures the session does not handle. They escalate to the host, which
/// is expected to terminate.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("unhandled biometric error: {0}")]
    Fatal(#[source] BwsError),
    #[error("unusable camera frame: {0}")]
    Frame(#[from] ImageError),
    #[error("background job panicked: {0}")]
    TaskPanicked(String),
    #[error("{job} returned an unexpected result")]
    UnexpectedOutput { job: &'static str },
    #[error("no token for the current attempt")]
    MissingToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImageRole {
    Reference,
    Motion,
}

/// Background job the session is waiting on.
enum Job {
    FetchToken,
    Upload(ImageRole),
    Finalize,
    MotionCheck(Arc<GrayscaleImage>),
}

pub struct Session<E: Executor, V: View> {
    id: Uuid,
    mode: Mode,
    settings: SessionSettings,
    tokens: Arc<dyn TokenProvider>,
    api: Arc<dyn BwsApi>,
    detector: Box<dyn FaceDetector>,
    executor: E,
    view: V,

    permission: PermissionState,
    detection: ImageDetectionState,
    stage: Stage,
    token: Option<Arc<BwsToken>>,
    pairs: Vec<CapturePair>,
    pair_index: usize,
    /// Upload sequence number of the next reference image.
    index: u32,
    current_direction: MovementDirection,
    destination_direction: MovementDirection,
    successful_uploads: u32,
    failed_uploads: u32,
    /// Failed verify/enroll calls with the current token.
    failed_operations: u32,
    reference_image: Option<Arc<GrayscaleImage>>,
    reference_uploaded: bool,
    motion_uploaded: bool,
    motion_check_pending: bool,
    face_timer: Option<TaskHandle>,
    motion_timer: Option<TaskHandle>,
    jobs: HashMap<TaskHandle, Job>,
}

impl<E: Executor, V: View> Session<E, V> {
    pub fn new(
        mode: Mode,
        settings: SessionSettings,
        tokens: Arc<dyn TokenProvider>,
        api: Arc<dyn BwsApi>,
        executor: E,
        view: V,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            mode,
            settings,
            tokens,
            api,
            detector: Box::new(UnavailableFaceDetector),
            executor,
            view,
            permission: PermissionState::Unknown,
            detection: ImageDetectionState::Idle,
            stage: Stage::Idle,
            token: None,
            pairs: Vec::new(),
            pair_index: 0,
            index: 0,
            current_direction: MovementDirection::Any,
            destination_direction: MovementDirection::Any,
            successful_uploads: 0,
            failed_uploads: 0,
            failed_operations: 0,
            reference_image: None,
            reference_uploaded: false,
            motion_uploaded: false,
            motion_check_pending: false,
            face_timer: None,
            motion_timer: None,
            jobs: HashMap::new(),
        }
    }

    pub fn with_face_detector(mut self, detector: Box<dyn FaceDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn permission_state(&self) -> PermissionState {
        self.permission
    }

    pub fn detection_state(&self) -> ImageDetectionState {
        self.detection
    }

    pub fn successful_uploads(&self) -> u32 {
        self.successful_uploads
    }

    pub fn failed_uploads(&self) -> u32 {
        self.failed_uploads
    }

    pub fn failed_operations(&self) -> u32 {
        self.failed_operations
    }

    /// `Some(success)` once the attempt has ended.
    pub fn outcome(&self) -> Option<bool> {
        match self.stage {
            Stage::Finished { success } => Some(success),
            _ => None,
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// The capture screen became visible (first start or re-entry).
    pub fn on_resume(&mut self) -> Result<(), SessionError> {
        match self.permission {
            PermissionState::Unknown => {
                self.permission = PermissionState::RequestingPermission;
                self.view.request_camera_permission();
            }
            PermissionState::RequestingPermission => {}
            PermissionState::Denied => {
                self.view.show_camera_permission_denied();
                self.view.navigate_back(false);
            }
            PermissionState::Granted if self.stage == Stage::Idle => {
                // A token issued before the pause is still good.
                if self.token.is_some() {
                    return self.start_capture_sequence();
                }
                self.start_biometric_operation();
            }
            PermissionState::Granted => {}
        }
        Ok(())
    }

    /// The capture screen went away. Drops the capture in progress; the
    /// token and the failed verify/enroll count survive until resume.
    pub fn on_pause(&mut self) {
        if self.outcome().is_some() {
            return;
        }
        self.reset_attempt();
        self.stage = Stage::Idle;
    }

    /// The camera will deliver no more frames. An attempt that is waiting
    /// for one cannot progress and ends unsuccessfully; uploads and retries
    /// already underway are left to run.
    pub fn on_frames_exhausted(&mut self) {
        if self.stage != Stage::Capturing {
            return;
        }
        let starved = match self.detection {
            ImageDetectionState::Idle => false,
            ImageDetectionState::WaitingForImageWithFace
            | ImageDetectionState::WaitingForReferenceImage => true,
            ImageDetectionState::WaitingForImageWithMotion => !self.motion_check_pending,
        };
        if starved {
            tracing::warn!(session = %self.id, detection = ?self.detection, "out of camera frames");
            self.finish(false);
        }
    }

    pub fn on_permission_result(&mut self, granted: bool) {
        if granted {
            tracing::info!(session = %self.id, "camera permission granted");
            self.permission = PermissionState::Granted;
            self.start_biometric_operation();
        } else {
            tracing::warn!(session = %self.id, "camera permission denied");
            self.permission = PermissionState::Denied;
            self.view.show_camera_permission_denied();
            self.finish(false);
        }
    }

    /// Start a new attempt with a fresh token, e.g. after the user
    /// acknowledged a failure.
    pub fn restart(&mut self) {
        if self.permission == PermissionState::Granted {
            self.start_biometric_operation();
        }
    }

    // ── Event dispatch ───────────────────────────────────────────────────────

    pub fn handle_event(&mut self, event: Event) -> Result<(), SessionError> {
        match event {
            Event::Frame(frame) => self.on_frame(frame),
            Event::TimerFired { handle, timer } => {
                if !self.executor.settle(handle) {
                    tracing::trace!(session = %self.id, ?timer, "ignoring cancelled timer");
                    return Ok(());
                }
                self.on_timer(timer)
            }
            Event::TaskFinished { handle, result } => {
                if !self.executor.settle(handle) {
                    tracing::debug!(session = %self.id, "discarding result of abandoned job");
                    return Ok(());
                }
                match self.jobs.remove(&handle) {
                    Some(job) => self.on_job_finished(job, result),
                    None => Ok(()),
                }
            }
            Event::TaskPanicked { handle, message } => {
                if !self.executor.settle(handle) {
                    tracing::debug!(session = %self.id, %message, "abandoned job panicked");
                    return Ok(());
                }
                Err(SessionError::TaskPanicked(message))
            }
        }
    }

    fn on_timer(&mut self, timer: Timer) -> Result<(), SessionError> {
        match timer {
            Timer::FaceDetectionTimeout => {
                self.face_timer = None;
                if self.detection != ImageDetectionState::WaitingForImageWithFace {
                    return Ok(());
                }
                // The webservice checks for a face on upload anyway.
                tracing::info!(session = %self.id, "no face found locally, capturing anyway");
                self.start_pair()
            }
            Timer::MotionDetectionTimeout => {
                self.motion_timer = None;
                tracing::warn!(
                    session = %self.id,
                    direction = %self.destination_direction,
                    "no motion detected in time"
                );
                self.reset_attempt();
                self.view.show_warning(bws_core::Warning::MotionDetectionFailed);
                self.finish(false);
                Ok(())
            }
            Timer::RetryPair => self.start_pair(),
            Timer::RestartSequence => self.start_capture_sequence(),
        }
    }

    fn on_job_finished(
        &mut self,
        job: Job,
        result: Result<TaskOutput, BwsError>,
    ) -> Result<(), SessionError> {
        match job {
            Job::FetchToken => deliver(
                result,
                self,
                |s| {
                    s.view.hide_message();
                    Ok(())
                },
                Self::on_token_received,
                Self::on_attempt_error,
            ),
            Job::Upload(role) => deliver(
                result,
                self,
                |_| Ok(()),
                |s, output| s.on_upload_finished(role, output),
                |s, e| s.on_upload_failed(role, e),
            ),
            Job::MotionCheck(frame) => deliver(
                result,
                self,
                |s| {
                    s.motion_check_pending = false;
                    Ok(())
                },
                |s, output| s.on_motion_checked(frame, output),
                Self::on_attempt_error,
            ),
            Job::Finalize => deliver(
                result,
                self,
                |s| {
                    s.view.hide_message();
                    Ok(())
                },
                Self::on_finalized,
                Self::on_finalize_failed,
            ),
        }
    }

    fn on_frame(&mut self, frame: Frame) -> Result<(), SessionError> {
        if self.stage != Stage::Capturing {
            return Ok(());
        }
        match self.detection {
            ImageDetectionState::Idle => Ok(()),
            ImageDetectionState::WaitingForImageWithFace => {
                let image = frame.image.rotate(frame.rotation_degrees)?;
                if !self.detector.contains_face(&image) {
                    return Ok(());
                }
                if let Some(handle) = self.face_timer.take() {
                    self.executor.cancel(handle);
                }
                tracing::debug!(session = %self.id, "face detected");
                self.start_pair()
            }
            ImageDetectionState::WaitingForReferenceImage => {
                let image = Arc::new(frame.image.rotate(frame.rotation_degrees)?);
                self.capture_reference(image)
            }
            ImageDetectionState::WaitingForImageWithMotion => {
                // One comparison at a time; frames arriving meanwhile are dropped.
                if self.motion_check_pending {
                    return Ok(());
                }
                let Some(reference) = self.reference_image.clone() else {
                    return Ok(());
                };
                let image = Arc::new(frame.image.rotate(frame.rotation_degrees)?);
                let current = Arc::clone(&image);
                self.motion_check_pending = true;
                let handle = self.executor.run_in_background(Box::new(move || {
                    Ok::<_, BwsError>(TaskOutput::Motion(motion::detect(&reference, &current)))
                }));
                self.jobs.insert(handle, Job::MotionCheck(image));
                Ok(())
            }
        }
    }

    // ── Attempt flow ─────────────────────────────────────────────────────────

    fn start_biometric_operation(&mut self) {
        self.reset_attempt();
        self.token = None;
        self.failed_operations = 0;
        self.stage = Stage::FetchingToken;
        self.view.show_message(Message::Initializing);

        let tokens = Arc::clone(&self.tokens);
        let work: BackgroundWork = match self.mode {
            Mode::Verify => Box::new(move || {
                tokens
                    .request_verification_token()
                    .map(|t| TaskOutput::Token(t.into_inner()))
            }),
            Mode::Enroll(_) => Box::new(move || {
                tokens
                    .request_enrollment_token()
                    .map(|t| TaskOutput::Token(t.into_inner()))
            }),
        };
        let handle = self.executor.run_in_background(work);
        self.jobs.insert(handle, Job::FetchToken);
        tracing::info!(session = %self.id, task = self.mode.task().as_str(), "requesting token");
    }

    fn on_token_received(&mut self, output: TaskOutput) -> Result<(), SessionError> {
        let TaskOutput::Token(token) = output else {
            return Err(SessionError::UnexpectedOutput {
                job: "token request",
            });
        };
        tracing::info!(
            session = %self.id,
            token = %token.fingerprint(),
            task = token.task_bits(),
            max_tries = token.max_tries(),
            challenge = token.is_challenge_response(),
            "token received"
        );
        self.token = Some(Arc::new(token));
        self.failed_operations = 0;
        self.start_capture_sequence()
    }

    fn start_capture_sequence(&mut self) -> Result<(), SessionError> {
        let token = self.token.clone().ok_or(SessionError::MissingToken)?;
        // Upload counters and the image index run across finalize retries.
        self.reset_pair();
        self.pair_index = 0;
        self.view.hide_message();
        self.pairs = self.mode.capture_pairs(&token, self.failed_operations);
        self.stage = Stage::Capturing;
        tracing::info!(
            session = %self.id,
            pairs = self.pairs.len(),
            failed_operations = self.failed_operations,
            failed_uploads = self.failed_uploads,
            "capture sequence started"
        );

        if self.mode.waits_for_face() {
            self.enter_face_wait()
        } else {
            self.start_pair()
        }
    }

    fn enter_face_wait(&mut self) -> Result<(), SessionError> {
        if !self.detector.is_ready() {
            tracing::debug!(session = %self.id, "face detector not ready, skipping face wait");
            return self.start_pair();
        }
        self.detection = ImageDetectionState::WaitingForImageWithFace;
        self.view.show_message(Message::FindingFace);
        self.face_timer = Some(
            self.executor
                .run_after_delay(self.settings.face_detection_timeout, Timer::FaceDetectionTimeout),
        );
        Ok(())
    }

    fn start_pair(&mut self) -> Result<(), SessionError> {
        let Some(pair) = self.pairs.get(self.pair_index).copied() else {
            return self.finalize();
        };
        self.current_direction = pair.current;
        self.destination_direction = pair.destination;
        self.reference_image = None;
        self.reference_uploaded = false;
        self.motion_uploaded = false;
        self.detection = ImageDetectionState::WaitingForReferenceImage;

        self.view.show_movement_indicator(pair.current);
        self.view.show_message(match pair.current {
            MovementDirection::Any => Message::LookIntoCamera,
            direction => Message::TurnHead(direction),
        });
        tracing::debug!(
            session = %self.id,
            pair = self.pair_index,
            current = %pair.current,
            destination = %pair.destination,
            "waiting for reference image"
        );
        Ok(())
    }

    fn capture_reference(&mut self, image: Arc<GrayscaleImage>) -> Result<(), SessionError> {
        self.reference_image = Some(Arc::clone(&image));
        self.detection = ImageDetectionState::WaitingForImageWithMotion;
        self.upload(image, self.current_direction, self.index, ImageRole::Reference)?;
        self.motion_timer = Some(self.executor.run_after_delay(
            self.settings.motion_detection_timeout,
            Timer::MotionDetectionTimeout,
        ));

        self.view.show_movement_indicator(self.destination_direction);
        self.view.show_message(match self.destination_direction {
            MovementDirection::Any => Message::MoveHeadSlightly,
            direction => Message::TurnHead(direction),
        });
        Ok(())
    }

    fn on_motion_checked(
        &mut self,
        frame: Arc<GrayscaleImage>,
        output: TaskOutput,
    ) -> Result<(), SessionError> {
        let TaskOutput::Motion(moved) = output else {
            return Err(SessionError::UnexpectedOutput {
                job: "motion check",
            });
        };
        if !moved || self.detection != ImageDetectionState::WaitingForImageWithMotion {
            return Ok(());
        }
        if let Some(handle) = self.motion_timer.take() {
            self.executor.cancel(handle);
        }
        tracing::debug!(session = %self.id, pair = self.pair_index, "motion detected");

        self.detection = ImageDetectionState::Idle;
        self.view.hide_movement_indicator();
        self.view.show_message(Message::Uploading);
        self.upload(frame, self.destination_direction, self.index + 1, ImageRole::Motion)
    }

    fn upload(
        &mut self,
        image: Arc<GrayscaleImage>,
        direction: MovementDirection,
        index: u32,
        role: ImageRole,
    ) -> Result<(), SessionError> {
        let token = self.token.clone().ok_or(SessionError::MissingToken)?;
        let api = Arc::clone(&self.api);
        let handle = self.executor.run_in_background(Box::new(move || {
            api.upload_image(&image, &token, direction, index)
                .map(TaskOutput::Uploaded)
        }));
        self.jobs.insert(handle, Job::Upload(role));
        tracing::debug!(
            session = %self.id,
            index,
            direction = %direction,
            ?role,
            "uploading image"
        );
        Ok(())
    }

    fn on_upload_finished(
        &mut self,
        role: ImageRole,
        output: TaskOutput,
    ) -> Result<(), SessionError> {
        let TaskOutput::Uploaded(outcome) = output else {
            return Err(SessionError::UnexpectedOutput { job: "image upload" });
        };
        match outcome.into_result() {
            Ok(()) => self.record_upload(role, true),
            Err(e) => self.on_upload_failed(role, e),
        }
    }

    fn record_upload(&mut self, role: ImageRole, accepted: bool) -> Result<(), SessionError> {
        if accepted {
            self.successful_uploads += 1;
        }
        match role {
            ImageRole::Reference => self.reference_uploaded = true,
            ImageRole::Motion => self.motion_uploaded = true,
        }
        tracing::debug!(
            session = %self.id,
            ?role,
            successful_uploads = self.successful_uploads,
            "upload settled"
        );
        if !(self.reference_uploaded && self.motion_uploaded) {
            return Ok(());
        }

        self.index += 2;
        self.pair_index += 1;
        self.reference_uploaded = false;
        self.motion_uploaded = false;
        if self.pair_index < self.pairs.len() {
            self.start_pair()
        } else {
            self.finalize()
        }
    }

    fn on_upload_failed(&mut self, role: ImageRole, error: BwsError) -> Result<(), SessionError> {
        let warning = match error.disposition() {
            Disposition::Fatal => return Err(SessionError::Fatal(error)),
            Disposition::Error => {
                tracing::error!(session = %self.id, error = %error, "upload failed, aborting");
                self.view.show_error(&error);
                self.finish(false);
                return Ok(());
            }
            Disposition::Warning(warning) => warning,
        };
        if self.in_challenge() && is_row_completing(&error) {
            // Let the row run to completion; verification will fail and the
            // retry moves on to the next row.
            tracing::info!(
                session = %self.id,
                error = %error,
                "challenge row continues after rejection"
            );
            return self.record_upload(role, false);
        }

        self.failed_uploads += 1;
        tracing::warn!(
            session = %self.id,
            error = %error,
            failed_uploads = self.failed_uploads,
            max = self.settings.max_failed_uploads,
            "upload rejected"
        );
        self.view.show_warning(warning);

        if self.failed_uploads >= self.settings.max_failed_uploads {
            self.finish(false);
            return Ok(());
        }

        // The pair is replayed from the reference image; forget its
        // already accepted half.
        let settled = u32::from(self.reference_uploaded) + u32::from(self.motion_uploaded);
        self.successful_uploads = self.successful_uploads.saturating_sub(settled);
        self.reset_pair();
        self.executor
            .run_after_delay(self.settings.retry_delay, Timer::RetryPair);
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), SessionError> {
        let token = self.token.clone().ok_or(SessionError::MissingToken)?;
        self.stage = Stage::Finalizing;
        self.detection = ImageDetectionState::Idle;
        self.view.hide_movement_indicator();
        self.view.show_message(match self.mode {
            Mode::Verify => Message::Verifying,
            Mode::Enroll(_) => Message::Enrolling,
        });

        let api = Arc::clone(&self.api);
        let task = self.mode.task();
        let handle = self.executor.run_in_background(Box::new(move || {
            api.finalize(&token, task).map(|()| TaskOutput::Finalized)
        }));
        self.jobs.insert(handle, Job::Finalize);
        tracing::info!(
            session = %self.id,
            task = task.as_str(),
            uploads = self.successful_uploads,
            "finalizing"
        );
        Ok(())
    }

    fn on_finalized(&mut self, output: TaskOutput) -> Result<(), SessionError> {
        let TaskOutput::Finalized = output else {
            return Err(SessionError::UnexpectedOutput {
                job: "verify/enroll call",
            });
        };
        tracing::info!(
            session = %self.id,
            task = self.mode.task().as_str(),
            "biometric operation succeeded"
        );
        match self.mode {
            Mode::Verify => self.view.show_verification_success(),
            Mode::Enroll(_) => self.view.show_enrollment_success(),
        }
        self.finish(true);
        Ok(())
    }

    fn on_finalize_failed(&mut self, error: BwsError) -> Result<(), SessionError> {
        let warning = match error.disposition() {
            Disposition::Fatal => return Err(SessionError::Fatal(error)),
            Disposition::Error => {
                tracing::error!(
                    session = %self.id,
                    error = %error,
                    "biometric operation failed, aborting"
                );
                self.view.show_error(&error);
                self.finish(false);
                return Ok(());
            }
            Disposition::Warning(warning) => warning,
        };

        self.failed_operations += 1;
        let max_tries = self.token.as_ref().map_or(1, |t| t.max_tries());
        tracing::warn!(
            session = %self.id,
            error = %error,
            failed_operations = self.failed_operations,
            max_tries,
            "biometric operation failed"
        );
        self.view.show_warning(warning);

        if self.failed_operations >= max_tries {
            self.finish(false);
            return Ok(());
        }
        self.reset_pair();
        self.executor
            .run_after_delay(self.settings.retry_delay, Timer::RestartSequence);
        Ok(())
    }

    /// Error outside upload/finalize handling: token fetch or motion check.
    fn on_attempt_error(&mut self, error: BwsError) -> Result<(), SessionError> {
        match error.disposition() {
            Disposition::Fatal => return Err(SessionError::Fatal(error)),
            Disposition::Error => self.view.show_error(&error),
            Disposition::Warning(warning) => self.view.show_warning(warning),
        }
        tracing::error!(session = %self.id, error = %error, "attempt aborted");
        self.finish(false);
        Ok(())
    }

    fn in_challenge(&self) -> bool {
        matches!(self.mode, Mode::Verify)
            && self
                .token
                .as_ref()
                .is_some_and(|t| t.is_challenge_response())
    }

    // ── Resets ───────────────────────────────────────────────────────────────

    /// Drop everything tied to the current image pair. Token, failed
    /// verify/enroll count and permission survive.
    fn reset_pair(&mut self) {
        self.executor.cancel_all();
        self.executor.unsubscribe_all();
        self.jobs.clear();
        self.face_timer = None;
        self.motion_timer = None;
        self.reference_image = None;
        self.reference_uploaded = false;
        self.motion_uploaded = false;
        self.motion_check_pending = false;
        self.current_direction = MovementDirection::Any;
        self.destination_direction = MovementDirection::Any;
        self.detection = ImageDetectionState::Idle;
        self.view.hide_movement_indicator();
    }

    /// [`Self::reset_pair`] plus upload counters and messages.
    fn reset_attempt(&mut self) {
        self.reset_pair();
        self.successful_uploads = 0;
        self.failed_uploads = 0;
        self.index = 0;
        self.pair_index = 0;
        self.view.hide_message();
    }

    fn finish(&mut self, success: bool) {
        if self.outcome().is_some() {
            return;
        }
        self.reset_attempt();
        self.token = None;
        self.stage = Stage::Finished { success };
        self.view.navigate_back(success);
    }
}

/// Rejections a challenge row tolerates without a mid-row retry.
fn is_row_completing(error: &BwsError) -> bool {
    matches!(error, BwsError::NoFaceFound | BwsError::LiveDetectionFailed)
}
