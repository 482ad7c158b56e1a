use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::rc::Rc;
use std::sync::Mutex;
use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use bws_client::{BwsTask, RejectReason, UploadOutcome};
use bws_core::{EnrollmentToken, VerificationToken, Warning};
use serde_json::json;

use super::*;

// ── Test doubles ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct ExecutorState {
    next: u64,
    timers: BTreeMap<TaskHandle, (Duration, Timer)>,
    jobs: BTreeMap<TaskHandle, BackgroundWork>,
    subscribed: HashSet<TaskHandle>,
}

/// Executor driven by the test: timers fire and jobs run only on request.
#[derive(Clone, Default)]
struct ManualExecutor(Rc<RefCell<ExecutorState>>);

impl ManualExecutor {
    fn armed(&self, timer: Timer) -> Option<TaskHandle> {
        self.0
            .borrow()
            .timers
            .iter()
            .find(|(_, (_, t))| *t == timer)
            .map(|(h, _)| *h)
    }

    fn delay_of(&self, timer: Timer) -> Option<Duration> {
        self.0
            .borrow()
            .timers
            .values()
            .find(|(_, t)| *t == timer)
            .map(|(d, _)| *d)
    }

    fn armed_count(&self) -> usize {
        self.0.borrow().timers.len()
    }

    fn pending_jobs(&self) -> usize {
        self.0.borrow().jobs.len()
    }

    fn take_job(&self) -> Option<(TaskHandle, BackgroundWork)> {
        self.0.borrow_mut().jobs.pop_first()
    }
}

impl Executor for ManualExecutor {
    fn run_after_delay(&mut self, delay: Duration, timer: Timer) -> TaskHandle {
        let mut state = self.0.borrow_mut();
        state.next += 1;
        let handle = TaskHandle(state.next);
        state.timers.insert(handle, (delay, timer));
        handle
    }

    fn cancel(&mut self, handle: TaskHandle) {
        self.0.borrow_mut().timers.remove(&handle);
    }

    fn cancel_all(&mut self) {
        self.0.borrow_mut().timers.clear();
    }

    fn run_in_background(&mut self, work: BackgroundWork) -> TaskHandle {
        let mut state = self.0.borrow_mut();
        state.next += 1;
        let handle = TaskHandle(state.next);
        state.jobs.insert(handle, work);
        state.subscribed.insert(handle);
        handle
    }

    fn unsubscribe(&mut self, handle: TaskHandle) {
        self.0.borrow_mut().subscribed.remove(&handle);
    }

    fn unsubscribe_all(&mut self) {
        self.0.borrow_mut().subscribed.clear();
    }

    fn settle(&mut self, handle: TaskHandle) -> bool {
        let mut state = self.0.borrow_mut();
        state.timers.remove(&handle).is_some() || state.subscribed.remove(&handle)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum ViewCall {
    RequestPermission,
    PermissionDenied,
    Message(Message),
    HideMessage,
    Indicator(MovementDirection),
    HideIndicator,
    Warning(Warning),
    Error(BwsError),
    VerificationSuccess,
    EnrollmentSuccess,
    NavigateBack(bool),
}

#[derive(Clone, Default)]
struct RecordingView(Rc<RefCell<Vec<ViewCall>>>);

impl RecordingView {
    fn calls(&self) -> Vec<ViewCall> {
        self.0.borrow().clone()
    }

    fn count(&self, call: &ViewCall) -> usize {
        self.0.borrow().iter().filter(|c| *c == call).count()
    }

    fn navigations(&self) -> Vec<bool> {
        self.0
            .borrow()
            .iter()
            .filter_map(|c| match c {
                ViewCall::NavigateBack(success) => Some(*success),
                _ => None,
            })
            .collect()
    }

    fn warnings(&self) -> Vec<Warning> {
        self.0
            .borrow()
            .iter()
            .filter_map(|c| match c {
                ViewCall::Warning(w) => Some(*w),
                _ => None,
            })
            .collect()
    }

    fn push(&self, call: ViewCall) {
        self.0.borrow_mut().push(call);
    }
}

impl View for RecordingView {
    fn request_camera_permission(&mut self) {
        self.push(ViewCall::RequestPermission);
    }
    fn show_camera_permission_denied(&mut self) {
        self.push(ViewCall::PermissionDenied);
    }
    fn show_message(&mut self, message: Message) {
        self.push(ViewCall::Message(message));
    }
    fn hide_message(&mut self) {
        self.push(ViewCall::HideMessage);
    }
    fn show_movement_indicator(&mut self, direction: MovementDirection) {
        self.push(ViewCall::Indicator(direction));
    }
    fn hide_movement_indicator(&mut self) {
        self.push(ViewCall::HideIndicator);
    }
    fn show_warning(&mut self, warning: Warning) {
        self.push(ViewCall::Warning(warning));
    }
    fn show_error(&mut self, error: &BwsError) {
        self.push(ViewCall::Error(error.clone()));
    }
    fn show_verification_success(&mut self) {
        self.push(ViewCall::VerificationSuccess);
    }
    fn show_enrollment_success(&mut self) {
        self.push(ViewCall::EnrollmentSuccess);
    }
    fn navigate_back(&mut self, success: bool) {
        self.push(ViewCall::NavigateBack(success));
    }
}

/// Token provider and webservice with scripted answers. Unscripted uploads
/// are accepted and unscripted verify/enroll calls succeed.
struct ScriptedService {
    token: Result<String, BwsError>,
    uploads: Mutex<VecDeque<Result<UploadOutcome, BwsError>>>,
    finalizes: Mutex<VecDeque<Result<(), BwsError>>>,
    upload_log: Mutex<Vec<(MovementDirection, u32)>>,
    finalize_log: Mutex<Vec<BwsTask>>,
}

impl ScriptedService {
    fn new(claims: serde_json::Value) -> Self {
        Self::with_token(Ok(raw_token(claims)))
    }

    fn with_token(token: Result<String, BwsError>) -> Self {
        Self {
            token,
            uploads: Mutex::new(VecDeque::new()),
            finalizes: Mutex::new(VecDeque::new()),
            upload_log: Mutex::new(Vec::new()),
            finalize_log: Mutex::new(Vec::new()),
        }
    }

    fn uploads(self, script: Vec<Result<UploadOutcome, BwsError>>) -> Self {
        self.uploads.lock().unwrap().extend(script);
        self
    }

    fn finalizes(self, script: Vec<Result<(), BwsError>>) -> Self {
        self.finalizes.lock().unwrap().extend(script);
        self
    }

    fn upload_log(&self) -> Vec<(MovementDirection, u32)> {
        self.upload_log.lock().unwrap().clone()
    }

    fn finalize_log(&self) -> Vec<BwsTask> {
        self.finalize_log.lock().unwrap().clone()
    }
}

impl TokenProvider for ScriptedService {
    fn request_verification_token(&self) -> Result<VerificationToken, BwsError> {
        VerificationToken::decode(self.token.as_ref().map_err(Clone::clone)?)
    }

    fn request_enrollment_token(&self) -> Result<EnrollmentToken, BwsError> {
        EnrollmentToken::decode(self.token.as_ref().map_err(Clone::clone)?)
    }
}

impl BwsApi for ScriptedService {
    fn upload_image(
        &self,
        _image: &GrayscaleImage,
        _token: &BwsToken,
        direction: MovementDirection,
        index: u32,
    ) -> Result<UploadOutcome, BwsError> {
        self.upload_log.lock().unwrap().push((direction, index));
        self.uploads
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(UploadOutcome::Accepted))
    }

    fn finalize(&self, _token: &BwsToken, task: BwsTask) -> Result<(), BwsError> {
        self.finalize_log.lock().unwrap().push(task);
        self.finalizes.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

struct StubDetector {
    face: bool,
}

impl FaceDetector for StubDetector {
    fn is_ready(&self) -> bool {
        true
    }

    fn contains_face(&mut self, _image: &GrayscaleImage) -> bool {
        self.face
    }
}

fn raw_token(claims: serde_json::Value) -> String {
    format!("header.{}.signature", URL_SAFE_NO_PAD.encode(claims.to_string()))
}

fn still() -> GrayscaleImage {
    GrayscaleImage::filled(200, 200, 40)
}

/// Same scene as [`still`] with a head-sized block changed in the centre.
fn moved() -> GrayscaleImage {
    let mut img = still();
    for y in 80..120 {
        for x in 80..120 {
            img.set_pixel(x, y, 200);
        }
    }
    img
}

// ── Harness ──────────────────────────────────────────────────────────────────

struct Harness {
    session: Session<ManualExecutor, RecordingView>,
    executor: ManualExecutor,
    view: RecordingView,
    service: Arc<ScriptedService>,
}

impl Harness {
    fn new(mode: Mode, service: ScriptedService) -> Self {
        let executor = ManualExecutor::default();
        let view = RecordingView::default();
        let service = Arc::new(service);
        let session = Session::new(
            mode,
            SessionSettings::default(),
            service.clone(),
            service.clone(),
            executor.clone(),
            view.clone(),
        );
        Self {
            session,
            executor,
            view,
            service,
        }
    }

    fn with_detector(mut self, detector: StubDetector) -> Self {
        self.session = self.session.with_face_detector(Box::new(detector));
        self
    }

    /// Grant permission and process the token request.
    fn start(&mut self) -> Result<(), SessionError> {
        self.session.on_resume()?;
        self.session.on_permission_result(true);
        self.run_jobs()
    }

    fn run_jobs(&mut self) -> Result<(), SessionError> {
        while let Some((handle, work)) = self.executor.take_job() {
            let result = work();
            self.session
                .handle_event(Event::TaskFinished { handle, result })?;
        }
        Ok(())
    }

    fn fire(&mut self, timer: Timer) -> Result<(), SessionError> {
        let handle = self
            .executor
            .armed(timer)
            .unwrap_or_else(|| panic!("{timer:?} is not armed"));
        self.session.handle_event(Event::TimerFired { handle, timer })
    }

    fn frame(&mut self, image: GrayscaleImage) -> Result<(), SessionError> {
        self.session.handle_event(Event::Frame(Frame::upright(image)))
    }

    /// Reference frame, moved frame, then let every job finish.
    fn capture_pair(&mut self) -> Result<(), SessionError> {
        self.frame(still())?;
        self.frame(moved())?;
        self.run_jobs()
    }
}

fn plain_verification() -> serde_json::Value {
    // MaxTries 5, live detection
    json!({"task": 261, "traits": 3, "exp": 4102444800i64})
}

fn challenge_verification() -> serde_json::Value {
    json!({
        "task": 0x305,
        "traits": 1,
        "exp": 4102444800i64,
        "challenge": r#"[["up","down"],["left","right"]]"#,
    })
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[test]
fn verification_succeeds_after_one_pair() {
    let mut h = Harness::new(Mode::Verify, ScriptedService::new(plain_verification()));
    h.start().unwrap();
    assert_eq!(h.session.stage(), Stage::Capturing);
    assert_eq!(
        h.session.detection_state(),
        ImageDetectionState::WaitingForReferenceImage
    );

    h.capture_pair().unwrap();

    assert_eq!(
        h.service.upload_log(),
        vec![(MovementDirection::Any, 0), (MovementDirection::Any, 1)]
    );
    assert_eq!(h.service.finalize_log(), vec![BwsTask::Verify]);
    let calls = h.view.calls();
    assert_eq!(calls.last(), Some(&ViewCall::NavigateBack(true)));
    let success = calls
        .iter()
        .position(|c| *c == ViewCall::VerificationSuccess)
        .unwrap();
    assert!(success < calls.len() - 1);
    assert_eq!(h.view.navigations(), vec![true]);
    assert_eq!(h.session.outcome(), Some(true));
    assert_eq!(h.executor.armed_count(), 0);
}

#[test]
fn enrollment_uploads_four_prompted_pairs() {
    let mut h = Harness::new(
        Mode::enroll(),
        ScriptedService::new(json!({"task": 293, "traits": 1, "exp": 4102444800i64})),
    );
    h.start().unwrap();
    for _ in 0..4 {
        h.capture_pair().unwrap();
    }

    use MovementDirection::*;
    assert_eq!(
        h.service.upload_log(),
        vec![
            (Any, 0),
            (Up, 1),
            (Any, 2),
            (Down, 3),
            (Any, 4),
            (Left, 5),
            (Any, 6),
            (Right, 7)
        ]
    );
    assert_eq!(h.service.finalize_log(), vec![BwsTask::Enroll]);
    assert_eq!(h.view.count(&ViewCall::Message(Message::TurnHead(Left))), 1);
    assert_eq!(h.view.count(&ViewCall::EnrollmentSuccess), 1);
    assert_eq!(h.view.navigations(), vec![true]);
}

#[test]
fn three_rejected_uploads_abort_once() {
    let rejected = || Ok(UploadOutcome::Rejected(RejectReason::NoFace));
    let service = ScriptedService::new(plain_verification())
        .uploads(vec![rejected(), rejected(), rejected()]);
    let mut h = Harness::new(Mode::Verify, service);
    h.start().unwrap();

    h.frame(still()).unwrap();
    h.run_jobs().unwrap();
    assert_eq!(h.session.failed_uploads(), 1);
    assert_eq!(h.executor.delay_of(Timer::RetryPair), Some(Duration::from_secs(3)));
    assert!(h.executor.armed(Timer::MotionDetectionTimeout).is_none());

    h.fire(Timer::RetryPair).unwrap();
    h.frame(still()).unwrap();
    h.run_jobs().unwrap();
    assert_eq!(h.session.failed_uploads(), 2);

    h.fire(Timer::RetryPair).unwrap();
    h.frame(still()).unwrap();
    h.run_jobs().unwrap();

    assert_eq!(h.view.warnings(), vec![Warning::NoFaceFound; 3]);
    assert_eq!(h.view.navigations(), vec![false]);
    assert_eq!(h.executor.armed_count(), 0);
    assert!(h.service.finalize_log().is_empty());
    assert_eq!(h.session.outcome(), Some(false));
}

#[test]
fn rejected_motion_image_replays_whole_pair() {
    let service = ScriptedService::new(plain_verification()).uploads(vec![
        Ok(UploadOutcome::Accepted),
        Ok(UploadOutcome::Rejected(RejectReason::MultipleFaces)),
    ]);
    let mut h = Harness::new(Mode::Verify, service);
    h.start().unwrap();

    h.capture_pair().unwrap();
    assert_eq!(h.session.successful_uploads(), 0);
    assert_eq!(h.session.failed_uploads(), 1);
    assert_eq!(h.view.warnings(), vec![Warning::MultipleFacesFound]);

    h.fire(Timer::RetryPair).unwrap();
    h.capture_pair().unwrap();

    use MovementDirection::Any;
    assert_eq!(
        h.service.upload_log(),
        vec![(Any, 0), (Any, 1), (Any, 0), (Any, 1)]
    );
    assert_eq!(h.view.navigations(), vec![true]);
}

#[test]
fn failed_verifications_stop_at_max_tries() {
    // MaxTries 2
    let service = ScriptedService::new(json!({"task": 0x102, "traits": 1, "exp": 4102444800i64}))
        .finalizes(vec![Err(BwsError::NotRecognized), Err(BwsError::NotRecognized)]);
    let mut h = Harness::new(Mode::Verify, service);
    h.start().unwrap();

    h.capture_pair().unwrap();
    assert_eq!(h.session.failed_operations(), 1);
    assert_eq!(h.view.warnings(), vec![Warning::NotRecognized]);
    assert!(h.view.navigations().is_empty());

    h.fire(Timer::RestartSequence).unwrap();
    h.capture_pair().unwrap();

    // The image index keeps counting across the restart.
    // The image index keeps counting across the restart.
    use MovementDirection::Any;
    assert_eq!(
        h.service.upload_log(),
        vec![(Any, 0), (Any, 1), (Any, 2), (Any, 3)]
    );
    assert_eq!(h.service.finalize_log().len(), 2);
    assert_eq!(h.view.navigations(), vec![false]);
    assert_eq!(h.executor.armed_count(), 0);
}

#[test]
fn rejected_uploads_count_across_verification_retries() {
    let rejected = || Ok(UploadOutcome::Rejected(RejectReason::NoFace));
    let service = ScriptedService::new(plain_verification())
        .uploads(vec![
            rejected(),
            Ok(UploadOutcome::Accepted),
            Ok(UploadOutcome::Accepted),
            rejected(),
            rejected(),
        ])
        .finalizes(vec![Err(BwsError::NotRecognized)]);
    let mut h = Harness::new(Mode::Verify, service);
    h.start().unwrap();

    h.frame(still()).unwrap();
    h.run_jobs().unwrap();
    assert_eq!(h.session.failed_uploads(), 1);
    h.fire(Timer::RetryPair).unwrap();
    h.capture_pair().unwrap();
    assert_eq!(h.session.failed_operations(), 1);

    h.fire(Timer::RestartSequence).unwrap();
    assert_eq!(h.session.failed_uploads(), 1);
    assert_eq!(h.session.successful_uploads(), 2);

    h.frame(still()).unwrap();
    h.run_jobs().unwrap();
    assert_eq!(h.session.failed_uploads(), 2);
    assert!(h.view.navigations().is_empty());
    h.fire(Timer::RetryPair).unwrap();
    h.frame(still()).unwrap();
    h.run_jobs().unwrap();

    // Third rejection overall ends the attempt although this sequence saw two.
    use MovementDirection::Any;
    assert_eq!(
        h.service.upload_log(),
        vec![(Any, 0), (Any, 0), (Any, 1), (Any, 2), (Any, 2)]
    );
    assert_eq!(h.service.finalize_log().len(), 1);
    assert_eq!(h.view.navigations(), vec![false]);
    assert_eq!(h.session.stage(), Stage::Finished { success: false });
    assert_eq!(h.executor.armed_count(), 0);
}

#[test]
fn challenge_retry_moves_to_next_row() {
    let service = ScriptedService::new(challenge_verification())
        .finalizes(vec![Err(BwsError::ChallengeResponseFailed)]);
    let mut h = Harness::new(Mode::Verify, service);
    h.start().unwrap();

    h.capture_pair().unwrap();
    assert_eq!(h.view.warnings(), vec![Warning::ChallengeResponseFailed]);

    h.fire(Timer::RestartSequence).unwrap();
    assert_eq!(
        h.view.calls().last(),
        Some(&ViewCall::Message(Message::TurnHead(MovementDirection::Left)))
    );
    h.capture_pair().unwrap();

    use MovementDirection::*;
    assert_eq!(
        h.service.upload_log(),
        vec![(Up, 0), (Down, 1), (Left, 2), (Right, 3)]
    );
    assert_eq!(h.view.navigations(), vec![true]);
}

#[test]
fn challenge_row_tolerates_missing_face() {
    let service = ScriptedService::new(challenge_verification())
        .uploads(vec![Ok(UploadOutcome::Rejected(RejectReason::NoFace))]);
    let mut h = Harness::new(Mode::Verify, service);
    h.start().unwrap();

    h.capture_pair().unwrap();

    assert!(h.view.warnings().is_empty());
    assert_eq!(h.service.upload_log().len(), 2);
    assert_eq!(h.service.finalize_log(), vec![BwsTask::Verify]);
    assert_eq!(h.view.navigations(), vec![true]);
}

#[test]
fn missing_motion_ends_attempt() {
    let mut h = Harness::new(Mode::Verify, ScriptedService::new(plain_verification()));
    h.start().unwrap();
    h.frame(still()).unwrap();
    h.run_jobs().unwrap();
    assert_eq!(
        h.executor.delay_of(Timer::MotionDetectionTimeout),
        Some(Duration::from_secs(12))
    );

    // Frames without movement keep the wait going.
    h.frame(still()).unwrap();
    h.run_jobs().unwrap();
    assert_eq!(
        h.session.detection_state(),
        ImageDetectionState::WaitingForImageWithMotion
    );

    h.fire(Timer::MotionDetectionTimeout).unwrap();
    assert_eq!(h.view.warnings(), vec![Warning::MotionDetectionFailed]);
    assert_eq!(h.view.navigations(), vec![false]);
    assert_eq!(h.session.outcome(), Some(false));
    assert_eq!(h.executor.armed_count(), 0);
}

#[test]
fn frames_are_dropped_while_motion_check_runs() {
    let mut h = Harness::new(Mode::Verify, ScriptedService::new(plain_verification()));
    h.start().unwrap();

    h.frame(still()).unwrap();
    h.frame(moved()).unwrap();
    h.frame(moved()).unwrap();
    h.frame(moved()).unwrap();
    // Reference upload plus a single motion check.
    assert_eq!(h.executor.pending_jobs(), 2);
}

#[test]
fn face_wait_ends_when_face_is_found() {
    let mut h = Harness::new(Mode::Verify, ScriptedService::new(plain_verification()))
        .with_detector(StubDetector { face: true });
    h.start().unwrap();
    assert_eq!(
        h.session.detection_state(),
        ImageDetectionState::WaitingForImageWithFace
    );
    assert_eq!(
        h.executor.delay_of(Timer::FaceDetectionTimeout),
        Some(Duration::from_secs(4))
    );

    h.frame(still()).unwrap();
    assert!(h.executor.armed(Timer::FaceDetectionTimeout).is_none());
    assert_eq!(
        h.session.detection_state(),
        ImageDetectionState::WaitingForReferenceImage
    );
    // The detection frame is not uploaded.
    assert_eq!(h.executor.pending_jobs(), 0);
}

#[test]
fn face_wait_timeout_captures_anyway() {
    let mut h = Harness::new(Mode::Verify, ScriptedService::new(plain_verification()))
        .with_detector(StubDetector { face: false });
    h.start().unwrap();
    h.frame(still()).unwrap();
    assert_eq!(
        h.session.detection_state(),
        ImageDetectionState::WaitingForImageWithFace
    );

    h.fire(Timer::FaceDetectionTimeout).unwrap();
    assert_eq!(
        h.session.detection_state(),
        ImageDetectionState::WaitingForReferenceImage
    );
    h.capture_pair().unwrap();
    assert_eq!(h.view.navigations(), vec![true]);
}

#[test]
fn enrollment_skips_face_wait() {
    let mut h = Harness::new(
        Mode::enroll(),
        ScriptedService::new(json!({"task": 293, "traits": 1, "exp": 4102444800i64})),
    )
    .with_detector(StubDetector { face: false });
    h.start().unwrap();
    assert_eq!(
        h.session.detection_state(),
        ImageDetectionState::WaitingForReferenceImage
    );
}

#[test]
fn denied_permission_is_resurfaced_on_resume() {
    let mut h = Harness::new(Mode::Verify, ScriptedService::new(plain_verification()));
    h.session.on_resume().unwrap();
    assert_eq!(
        h.session.permission_state(),
        PermissionState::RequestingPermission
    );
    // A second resume while the prompt is up does not prompt again.
    h.session.on_resume().unwrap();
    h.session.on_permission_result(false);
    h.session.on_resume().unwrap();

    assert_eq!(h.view.count(&ViewCall::RequestPermission), 1);
    assert_eq!(h.view.count(&ViewCall::PermissionDenied), 2);
    assert_eq!(h.view.navigations(), vec![false, false]);
    assert_eq!(h.executor.pending_jobs(), 0);
}

#[test]
fn results_from_abandoned_attempt_are_ignored() {
    let mut h = Harness::new(Mode::Verify, ScriptedService::new(plain_verification()));
    h.start().unwrap();
    h.frame(still()).unwrap();

    // The reference upload is still in flight when the screen goes away.
    h.session.on_pause();
    assert_eq!(h.session.stage(), Stage::Idle);
    assert!(h.executor.armed(Timer::MotionDetectionTimeout).is_none());

    // Resuming reuses the token and starts a fresh capture sequence.
    h.session.on_resume().unwrap();
    assert_eq!(h.session.stage(), Stage::Capturing);
    h.run_jobs().unwrap();

    assert_eq!(h.service.upload_log().len(), 1);
    assert_eq!(h.session.successful_uploads(), 0);
    assert_eq!(
        h.session.detection_state(),
        ImageDetectionState::WaitingForReferenceImage
    );

    h.capture_pair().unwrap();
    assert_eq!(
        h.service.upload_log()[1..],
        [(MovementDirection::Any, 0), (MovementDirection::Any, 1)]
    );
    assert_eq!(h.view.navigations(), vec![true]);
}

#[test]
fn pause_during_token_fetch_requests_new_token() {
    let mut h = Harness::new(Mode::Verify, ScriptedService::new(plain_verification()));
    h.session.on_resume().unwrap();
    h.session.on_permission_result(true);
    assert_eq!(h.session.stage(), Stage::FetchingToken);

    h.session.on_pause();
    h.session.on_resume().unwrap();
    assert_eq!(h.session.stage(), Stage::FetchingToken);
    // First token response is stale, the second one starts capture.
    assert_eq!(h.executor.pending_jobs(), 2);
    h.run_jobs().unwrap();
    assert_eq!(h.session.stage(), Stage::Capturing);
}

#[test]
fn invalid_token_escalates() {
    let mut h = Harness::new(
        Mode::Verify,
        ScriptedService::with_token(Ok("not-a-token".to_string())),
    );
    let err = h.start().unwrap_err();
    assert!(matches!(err, SessionError::Fatal(BwsError::Validation(_))));
    assert!(h.view.navigations().is_empty());
}

#[test]
fn enrollment_token_rejected_for_verification() {
    let mut h = Harness::new(
        Mode::Verify,
        ScriptedService::new(json!({"task": 0x20, "traits": 1, "exp": 1})),
    );
    assert!(matches!(
        h.start(),
        Err(SessionError::Fatal(BwsError::Validation(_)))
    ));
}

#[test]
fn unreachable_service_aborts_with_error() {
    let mut h = Harness::new(
        Mode::Verify,
        ScriptedService::with_token(Err(BwsError::NoConnection("refused".into()))),
    );
    h.start().unwrap();
    assert_eq!(
        h.view.count(&ViewCall::Error(BwsError::NoConnection("refused".into()))),
        1
    );
    assert_eq!(h.view.navigations(), vec![false]);
}

#[test]
fn wrong_credentials_abort_without_retry() {
    let service =
        ScriptedService::new(plain_verification()).uploads(vec![Err(BwsError::WrongCredentials)]);
    let mut h = Harness::new(Mode::Verify, service);
    h.start().unwrap();
    h.frame(still()).unwrap();
    h.run_jobs().unwrap();

    assert_eq!(h.view.count(&ViewCall::Error(BwsError::WrongCredentials)), 1);
    assert!(h.view.warnings().is_empty());
    assert_eq!(h.view.navigations(), vec![false]);
    assert_eq!(h.executor.armed_count(), 0);
}

#[test]
fn restart_after_failure_fetches_new_token() {
    let service = ScriptedService::new(plain_verification())
        .uploads(vec![Err(BwsError::Technical("HTTP 500".into()))]);
    let mut h = Harness::new(Mode::Verify, service);
    h.start().unwrap();
    h.frame(still()).unwrap();
    h.run_jobs().unwrap();
    assert_eq!(h.session.outcome(), Some(false));

    h.session.restart();
    assert_eq!(h.session.stage(), Stage::FetchingToken);
    h.run_jobs().unwrap();
    h.capture_pair().unwrap();
    assert_eq!(h.view.navigations(), vec![false, true]);
}

#[test]
fn panicked_job_escalates() {
    let mut h = Harness::new(Mode::Verify, ScriptedService::new(plain_verification()));
    h.session.on_resume().unwrap();
    h.session.on_permission_result(true);
    let (handle, _) = h.executor.take_job().unwrap();

    let err = h
        .session
        .handle_event(Event::TaskPanicked {
            handle,
            message: "boom".into(),
        })
        .unwrap_err();
    assert!(matches!(err, SessionError::TaskPanicked(m) if m == "boom"));
}

#[test]
fn panic_of_abandoned_job_is_ignored() {
    let mut h = Harness::new(Mode::Verify, ScriptedService::new(plain_verification()));
    h.start().unwrap();
    h.frame(still()).unwrap();
    let (handle, _) = h.executor.take_job().unwrap();

    // The reference upload no longer matters once the screen is gone.
    h.session.on_pause();
    h.session
        .handle_event(Event::TaskPanicked {
            handle,
            message: "boom".into(),
        })
        .unwrap();
    assert_eq!(h.session.stage(), Stage::Idle);

    // Unknown handles are ignored as well.
    h.session
        .handle_event(Event::TaskPanicked {
            handle: TaskHandle(42),
            message: "boom".into(),
        })
        .unwrap();

    h.session.on_resume().unwrap();
    h.capture_pair().unwrap();
    assert_eq!(h.view.navigations(), vec![true]);
}

#[test]
fn running_out_of_frames_ends_capture() {
    let mut h = Harness::new(Mode::Verify, ScriptedService::new(plain_verification()));
    h.session.on_resume().unwrap();
    h.session.on_permission_result(true);

    // Nothing to starve while the token is on its way.
    h.session.on_frames_exhausted();
    assert_eq!(h.session.stage(), Stage::FetchingToken);

    h.run_jobs().unwrap();
    assert_eq!(
        h.session.detection_state(),
        ImageDetectionState::WaitingForReferenceImage
    );
    h.session.on_frames_exhausted();
    assert_eq!(h.view.navigations(), vec![false]);
    assert_eq!(h.executor.armed_count(), 0);
    assert!(h.service.upload_log().is_empty());
}

#[test]
fn pending_motion_check_outlives_the_frame_source() {
    let mut h = Harness::new(Mode::Verify, ScriptedService::new(plain_verification()));
    h.start().unwrap();
    h.frame(still()).unwrap();
    h.frame(moved()).unwrap();

    // The moved frame is already being compared.
    h.session.on_frames_exhausted();
    assert!(h.view.navigations().is_empty());

    h.run_jobs().unwrap();
    h.session.on_frames_exhausted();
    assert_eq!(h.view.navigations(), vec![true]);
}

#[test]
fn motion_wait_without_frames_fails() {
    let mut h = Harness::new(Mode::Verify, ScriptedService::new(plain_verification()));
    h.start().unwrap();
    h.frame(still()).unwrap();
    h.frame(still()).unwrap();
    h.run_jobs().unwrap();

    // No motion in the last frame and none coming.
    assert_eq!(
        h.session.detection_state(),
        ImageDetectionState::WaitingForImageWithMotion
    );
    h.session.on_frames_exhausted();
    assert_eq!(h.view.navigations(), vec![false]);
}

#[test]
fn unsupported_rotation_is_a_frame_error() {
    let mut h = Harness::new(Mode::Verify, ScriptedService::new(plain_verification()));
    h.start().unwrap();
    let err = h
        .session
        .handle_event(Event::Frame(Frame {
            image: still(),
            rotation_degrees: 45,
        }))
        .unwrap_err();
    assert!(matches!(err, SessionError::Frame(_)));
}
