use super::config::{SessionConfig, SetupPayload};
use super::events::{EventSource, SessionEvent};
use super::state::SessionState;
use crate::analysis::{process, PostProcessConfig, ProcessedOutput};
use crate::config::ServerSettings;
use crate::core::{Centroid, CropWindow};
use crate::engine::{
    plane_queue, EstimatorFactory, FrameErrorPolicy, PlaneInit, PlaneReceiver, PlaneSender,
    PlaneWorker, RawResult,
};
use crate::error::{ConfigError, ProtocolError, SourceError};
use crate::observability::{MetricsCollector, PlaneMetrics, SessionMonitor};
use crate::sources::{discovery, FilePicker, FrameDecoder, FrameSource, SpatialMasks, TrialFrames};
use crate::storage::{OutputWriter, RawOutput};
use anyhow::{anyhow, bail, Context, Result};
use log::{debug, error, info, warn};
use ndarray::{s, Array2, Axis};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, VecDeque};
use std::future::pending;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::{JoinError, JoinHandle, JoinSet};

/// External collaborators the controller drives
#[derive(Clone)]
pub struct Collaborators {
    pub decoder: Arc<dyn FrameDecoder>,
    pub picker: Arc<dyn FilePicker>,
    pub estimators: Arc<dyn EstimatorFactory>,
}

/// How a session ended
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Completed,
    Aborted { reason: String },
}

struct SetupOutput {
    workers: Vec<PlaneWorker>,
    run_dir: PathBuf,
}

/// Everything the off-loop setup task needs, moved in by value
struct SetupJob {
    folder: PathBuf,
    use_picker: bool,
    mask_path: Option<PathBuf>,
    source: FrameSource,
    picker: Arc<dyn FilePicker>,
    estimators: Arc<dyn EstimatorFactory>,
    receivers: Vec<PlaneReceiver>,
    metrics: Vec<Arc<PlaneMetrics>>,
    cancel: Arc<AtomicBool>,
    crop: CropWindow,
    capacity: usize,
    report_every: usize,
    error_policy: FrameErrorPolicy,
}

enum Step {
    Message(Option<String>),
    SetupFinished(Result<Result<SetupOutput>, JoinError>),
    DrainFinished(Result<Result<Vec<RawResult>>, JoinError>),
    Interrupted,
}

async fn join_if_running<T>(task: &mut Option<JoinHandle<T>>) -> Result<T, JoinError> {
    match task.as_mut() {
        Some(handle) => handle.await,
        None => pending().await,
    }
}

async fn wait_for_interrupt(rx: &mut Option<broadcast::Receiver<()>>) {
    if let Some(receiver) = rx.as_mut() {
        let received = receiver.recv().await;
        if !matches!(received, Err(broadcast::error::RecvError::Closed)) {
            return;
        }
        // Sender dropped: no interrupt can ever arrive
        *rx = None;
    }
    pending::<()>().await
}

fn clock() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

/// Event router and owner of all plane workers for one session.
///
/// Every field is touched only from the control loop. Seed loading,
/// estimator initialisation, acquisition decoding, draining and output
/// writing all run on blocking threads.
pub struct SessionController {
    settings: ServerSettings,
    config: SessionConfig,
    state: SessionState,
    collaborators: Collaborators,
    source: Option<FrameSource>,

    senders: Vec<PlaneSender>,
    workers: Vec<PlaneWorker>,
    setup_task: Option<JoinHandle<Result<SetupOutput>>>,
    drain_task: Option<JoinHandle<Result<Vec<RawResult>>>>,
    deferred: VecDeque<SessionEvent>,
    cancel: Arc<AtomicBool>,
    shutdown_rx: Option<broadcast::Receiver<()>>,
    run_dir: Option<PathBuf>,

    trial_lengths: Vec<usize>,
    trialtimes: Vec<String>,
    trialtimes_all: Vec<String>,
    log_entries: BTreeMap<String, Vec<Value>>,
    session_done: bool,

    metrics: MetricsCollector,
    results: Vec<RawResult>,
    processed: Option<ProcessedOutput>,
    outcome: Option<SessionOutcome>,
}

impl SessionController {
    pub fn new(settings: ServerSettings, collaborators: Collaborators) -> Self {
        let config = SessionConfig::from_settings(&settings);
        Self {
            settings,
            config,
            state: SessionState::Uninitialized,
            collaborators,
            source: None,
            senders: Vec::new(),
            workers: Vec::new(),
            setup_task: None,
            drain_task: None,
            deferred: VecDeque::new(),
            cancel: Arc::new(AtomicBool::new(false)),
            shutdown_rx: None,
            run_dir: None,
            trial_lengths: Vec::new(),
            trialtimes: Vec::new(),
            trialtimes_all: Vec::new(),
            log_entries: BTreeMap::new(),
            session_done: false,
            metrics: MetricsCollector::new(),
            results: Vec::new(),
            processed: None,
            outcome: None,
        }
    }

    /// Abort the session when anything is sent on `rx` (operator interrupt)
    pub fn with_shutdown(mut self, rx: broadcast::Receiver<()>) -> Self {
        self.shutdown_rx = Some(rx);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Trial lengths recorded by the controller (first plane's frame count)
    pub fn trial_lengths(&self) -> &[usize] {
        &self.trial_lengths
    }

    pub fn trialtimes(&self) -> &[String] {
        &self.trialtimes
    }

    pub fn trialtimes_all(&self) -> &[String] {
        &self.trialtimes_all
    }

    pub fn log_entries(&self) -> &BTreeMap<String, Vec<Value>> {
        &self.log_entries
    }

    /// Total items ever pushed onto `plane`'s queue
    pub fn enqueued(&self, plane: usize) -> Option<u64> {
        self.senders.get(plane).map(PlaneSender::enqueued)
    }

    pub fn results(&self) -> &[RawResult] {
        &self.results
    }

    pub fn processed(&self) -> Option<&ProcessedOutput> {
        self.processed.as_ref()
    }

    pub fn outcome(&self) -> Option<&SessionOutcome> {
        self.outcome.as_ref()
    }

    /// Folder holding this run's estimator snapshots
    pub fn run_dir(&self) -> Option<&Path> {
        self.run_dir.as_deref()
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Control loop: route events in arrival order until the session is done
    /// or aborted. Returns the final state.
    pub async fn run(&mut self, events: &mut dyn EventSource) -> SessionState {
        info!("Session controller waiting for events");
        let mut events_open = true;

        while !self.state.is_terminal() {
            let step = {
                let setup_task = &mut self.setup_task;
                let drain_task = &mut self.drain_task;
                let shutdown_rx = &mut self.shutdown_rx;
                tokio::select! {
                    msg = events.next_message(), if events_open => Step::Message(msg),
                    res = join_if_running(setup_task) => Step::SetupFinished(res),
                    res = join_if_running(drain_task) => Step::DrainFinished(res),
                    _ = wait_for_interrupt(shutdown_rx) => Step::Interrupted,
                }
            };

            match step {
                Step::Message(Some(text)) => self.handle_message(&text).await,
                Step::Message(None) => {
                    events_open = false;
                    if self.session_done {
                        info!("Event channel closed, waiting for planes to finish");
                    } else {
                        self.shutdown("event channel closed").await;
                    }
                }
                Step::SetupFinished(res) => {
                    self.setup_task = None;
                    self.on_setup_finished(res).await;
                }
                Step::DrainFinished(res) => {
                    self.drain_task = None;
                    self.on_drain_finished(res).await;
                }
                Step::Interrupted => self.shutdown("operator interrupt").await,
            }
        }

        info!("Session finished in state {}", self.state.name());
        self.state
    }

    /// Parse and route one raw message. Protocol errors are logged and dropped.
    pub async fn handle_message(&mut self, text: &str) {
        match SessionEvent::parse(text) {
            Ok(event) => self.dispatch(event).await,
            Err(e @ ProtocolError::UnknownEventType(_)) => error!("{}", e),
            Err(e) => warn!("Dropping message: {}", e),
        }
    }

    /// Await an in-flight SETUP and apply its result
    pub async fn wait_for_setup(&mut self) {
        if let Some(handle) = self.setup_task.take() {
            let res = handle.await;
            self.on_setup_finished(res).await;
        }
    }

    /// Await the drain started by START and finalize
    pub async fn wait_for_drain(&mut self) {
        if let Some(handle) = self.drain_task.take() {
            let res = handle.await;
            self.on_drain_finished(res).await;
        }
    }

    fn transition(&mut self, target: SessionState) -> bool {
        if !self.state.can_transition_to(&target) {
            warn!(
                "Ignoring invalid transition {} -> {}",
                self.state.name(),
                target.name()
            );
            return false;
        }
        info!("Session {} -> {}", self.state.name(), target.name());
        self.state = target;
        true
    }

    fn wrong_state(&self, event: &'static str) -> ProtocolError {
        ProtocolError::WrongState {
            event,
            state: self.state.name(),
        }
    }

    async fn dispatch(&mut self, event: SessionEvent) {
        if self.state.is_terminal() {
            warn!("{} ignored, session is {}", event.name(), self.state.name());
            return;
        }

        if self.state == SessionState::SetupInProgress
            && matches!(
                event,
                SessionEvent::Start | SessionEvent::AcqDone { .. } | SessionEvent::SessionDone
            )
        {
            info!("{} deferred until setup completes", event.name());
            self.deferred.push_back(event);
            return;
        }

        let result = match event {
            SessionEvent::Setup(payload) => self.on_setup(payload).await,
            SessionEvent::Start => self.on_start(),
            SessionEvent::AcqDone { filename } => self.on_acq_done(filename).await,
            SessionEvent::SessionDone => self.on_session_done(),
            SessionEvent::Test => {
                debug!("TEST event received");
                Ok(())
            }
            SessionEvent::Uhoh => {
                error!("UHOH received, aborting session");
                self.shutdown("UHOH event").await;
                Ok(())
            }
            SessionEvent::Log(fields) => {
                self.on_log(fields);
                Ok(())
            }
        };

        if let Err(e) = result {
            warn!("{}", e);
        }
    }

    fn on_log(&mut self, fields: Map<String, Value>) {
        for (key, value) in fields {
            info!("LOG {} = {}", key, value);
            self.log_entries.entry(key).or_default().push(value);
        }
    }

    async fn on_setup(&mut self, payload: SetupPayload) -> Result<(), ProtocolError> {
        if !matches!(self.state, SessionState::Uninitialized | SessionState::Ready) {
            return Err(self.wrong_state("SETUP"));
        }

        self.config.apply(payload);
        let folder = match self
            .config
            .validate()
            .and_then(|_| self.config.folder().map(Path::to_path_buf))
        {
            Ok(folder) => folder,
            Err(e) => {
                error!("SETUP failed: {}", e);
                self.shutdown(&format!("invalid setup: {}", e)).await;
                return Ok(());
            }
        };

        // A repeated SETUP from READY discards the idle planes built before
        self.workers.clear();
        self.senders.clear();
        self.trial_lengths.clear();
        self.trialtimes.clear();
        self.trialtimes_all.clear();
        self.metrics.clear();

        let source = FrameSource::new(
            self.collaborators.decoder.clone(),
            self.config.nplanes,
            self.config.nchannels,
            self.settings.min_trial_frames,
        );

        let mut receivers = Vec::with_capacity(self.config.nplanes);
        let mut metrics = Vec::with_capacity(self.config.nplanes);
        for plane in 0..self.config.nplanes {
            let (tx, rx) = plane_queue(plane);
            self.senders.push(tx);
            receivers.push(rx);
            metrics.push(self.metrics.plane(plane));
        }

        let job = SetupJob {
            folder,
            use_picker: self.config.use_picker,
            mask_path: self.settings.mask_path.clone(),
            source: source.clone(),
            picker: self.collaborators.picker.clone(),
            estimators: self.collaborators.estimators.clone(),
            receivers,
            metrics,
            cancel: self.cancel.clone(),
            crop: self.config.crop,
            capacity: self.config.num_frames_max,
            report_every: self.settings.report_every,
            error_policy: self.settings.frame_error_policy,
        };
        self.source = Some(source);
        self.transition(SessionState::SetupInProgress);
        info!(
            "Preparing {} planes ({} channels) with {}",
            self.config.nplanes,
            self.config.nchannels,
            self.collaborators.estimators.name()
        );
        self.setup_task = Some(tokio::spawn(prepare_planes(job)));
        Ok(())
    }

    async fn on_setup_finished(&mut self, res: Result<Result<SetupOutput>, JoinError>) {
        let output = match res {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                error!("Setup failed: {:#}", e);
                self.shutdown(&format!("setup failed: {:#}", e)).await;
                return;
            }
            Err(e) => {
                error!("Setup task failed: {}", e);
                self.shutdown("setup task failed").await;
                return;
            }
        };

        if self.state != SessionState::SetupInProgress {
            debug!("Discarding setup result, session is {}", self.state.name());
            return;
        }

        self.workers = output.workers;
        self.run_dir = Some(output.run_dir);
        self.transition(SessionState::Ready);
        info!("All {} planes ready", self.workers.len());

        while let Some(event) = self.deferred.pop_front() {
            debug!("Replaying deferred {}", event.name());
            self.dispatch(event).await;
        }
    }

    fn on_start(&mut self) -> Result<(), ProtocolError> {
        if self.state != SessionState::Ready {
            return Err(self.wrong_state("START"));
        }

        let workers = std::mem::take(&mut self.workers);
        let senders = self.senders.clone();
        let cancel = self.cancel.clone();
        self.drain_task = Some(tokio::spawn(drain_planes(workers, senders, cancel)));
        self.transition(SessionState::Streaming);
        Ok(())
    }

    async fn on_acq_done(&mut self, filename: Option<PathBuf>) -> Result<(), ProtocolError> {
        if self.session_done {
            return Err(ProtocolError::AfterSessionDone("ACQDONE"));
        }
        if !matches!(self.state, SessionState::Ready | SessionState::Streaming) {
            return Err(self.wrong_state("ACQDONE"));
        }
        let (Some(source), Ok(folder)) = (self.source.clone(), self.config.folder()) else {
            return Err(self.wrong_state("ACQDONE"));
        };
        let folder = folder.to_path_buf();

        self.trialtimes_all.push(clock());
        let delay = self.settings.settle_delay();
        let min_bytes = self.settings.min_acq_file_bytes;
        let ingest = async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            tokio::task::spawn_blocking(move || -> Result<(PathBuf, TrialFrames), SourceError> {
                let path = match filename {
                    Some(name) if name.is_absolute() => name,
                    Some(name) => folder.join(name),
                    None => discovery::latest_acquisition(&folder, source.file_pattern(), min_bytes)?,
                };
                let trial = source.read_trial(&path)?;
                Ok((path, trial))
            })
            .await
        };

        let read = tokio::select! {
            read = ingest => Some(read),
            _ = wait_for_interrupt(&mut self.shutdown_rx) => None,
        };
        let Some(read) = read else {
            self.shutdown("operator interrupt").await;
            return Ok(());
        };

        let (path, trial) = match read {
            Ok(Ok(read)) => read,
            Ok(Err(SourceError::TooShort { frames, min })) => {
                warn!(
                    "Trial has only {} frames per plane (minimum {}), skipping it",
                    frames, min
                );
                return Ok(());
            }
            Ok(Err(e)) => {
                // Normal for the final trial, whose file may still be open
                warn!("Acquisition dropped: {}. Expected only for the last trial", e);
                return Ok(());
            }
            Err(e) => {
                error!("Acquisition read task failed: {}", e);
                return Ok(());
            }
        };

        for (sender, frames) in self.senders.iter().zip(trial.planes()) {
            if let Err(e) = sender.push_trial(frames) {
                error!("Could not queue trial for plane {}: {:#}", sender.plane(), e);
            }
        }
        self.trial_lengths.push(trial.len());
        self.trialtimes.push(clock());
        info!(
            "Trial {} queued from {:?}: {} frames per plane",
            self.trial_lengths.len(),
            path,
            trial.len()
        );
        Ok(())
    }

    fn on_session_done(&mut self) -> Result<(), ProtocolError> {
        if self.session_done {
            return Err(ProtocolError::AfterSessionDone("SESSIONDONE"));
        }
        if self.state != SessionState::Streaming {
            return Err(self.wrong_state("SESSIONDONE"));
        }

        self.session_done = true;
        self.stop_queues();
        info!(
            "SESSIONDONE after {} trials, waiting for planes to drain",
            self.trial_lengths.len()
        );
        Ok(())
    }

    fn stop_queues(&self) {
        for sender in &self.senders {
            if let Err(e) = sender.stop() {
                debug!("{:#}", e);
            }
        }
    }

    async fn on_drain_finished(&mut self, res: Result<Result<Vec<RawResult>>, JoinError>) {
        let results = match res {
            Ok(Ok(results)) => results,
            Ok(Err(e)) => {
                error!("Streaming failed: {:#}", e);
                self.shutdown(&format!("streaming failed: {:#}", e)).await;
                return;
            }
            Err(e) => {
                error!("Drain task failed: {}", e);
                self.shutdown("drain task failed").await;
                return;
            }
        };

        if !self.transition(SessionState::Finalizing) {
            return;
        }
        self.finalize(results).await;
        self.senders.clear();
        self.transition(SessionState::Done);
        self.outcome = Some(SessionOutcome::Completed);
    }

    async fn finalize(&mut self, mut results: Vec<RawResult>) {
        results.sort_by_key(|r| r.plane);
        for result in &results {
            if result.trial_lengths.len() != self.trial_lengths.len() {
                warn!(
                    "Plane {} saw {} trials, controller queued {}",
                    result.plane,
                    result.trial_lengths.len(),
                    self.trial_lengths.len()
                );
            }
        }

        let raw = RawOutput {
            traces: concat_planes(&results),
            trial_lengths: self.trial_lengths.clone(),
            trialtimes: self.trialtimes.clone(),
            trialtimes_all: self.trialtimes_all.clone(),
            log: self.log_entries.clone(),
        };
        let centroids: Vec<(usize, Vec<Centroid>)> = results
            .iter()
            .map(|r| (r.plane, r.centroids.clone()))
            .collect();
        let post = self.config.post_process();
        let folder = self.config.folder.clone().unwrap_or_default();
        let writer = OutputWriter::new(folder, self.settings.output_folder.clone());

        info!(
            "Finalizing {} cells × {} frames across {} planes",
            raw.traces.nrows(),
            raw.traces.ncols(),
            results.len()
        );
        match tokio::task::spawn_blocking(move || save_outputs(&writer, &raw, &centroids, post)).await {
            Ok(processed) => self.processed = processed,
            Err(e) => error!("Output task failed: {}", e),
        }

        let monitor = SessionMonitor::new(&self.metrics, &self.trial_lengths);
        for plane in monitor.lagging_planes() {
            warn!("Plane {} fell behind the queued trials", plane);
        }
        info!("{}", monitor.generate_report());
        self.results = results;
    }

    /// Tear the session down from any state. Safe to call more than once.
    ///
    /// Queues get their Stop marker, queued frames are dropped, and any frame
    /// already inside the estimator is allowed to finish.
    pub async fn shutdown(&mut self, reason: &str) {
        if self.state.is_terminal() {
            debug!("Shutdown ({}) ignored, session already {}", reason, self.state.name());
            return;
        }
        warn!("Shutting down session: {}", reason);

        self.cancel.store(true, Ordering::Release);
        self.stop_queues();
        if let Some(handle) = self.setup_task.take() {
            handle.abort();
        }
        self.workers.clear();
        if let Some(handle) = self.drain_task.take() {
            match handle.await {
                Ok(Ok(results)) => debug!("{} planes stopped cleanly", results.len()),
                Ok(Err(e)) => debug!("Planes stopped with error: {:#}", e),
                Err(e) => debug!("Drain task ended: {}", e),
            }
        }
        self.senders.clear();
        self.deferred.clear();

        self.transition(SessionState::Aborted);
        self.outcome = Some(SessionOutcome::Aborted {
            reason: reason.to_string(),
        });
    }
}

/// Resolve seed files and build every plane worker in parallel
async fn prepare_planes(job: SetupJob) -> Result<SetupOutput> {
    let SetupJob {
        folder,
        use_picker,
        mask_path,
        source,
        picker,
        estimators,
        receivers,
        metrics,
        cancel,
        crop,
        capacity,
        report_every,
        error_policy,
    } = job;

    let mut files = if use_picker {
        Vec::new()
    } else {
        discovery::seed_files(&folder, source.file_pattern())?
    };
    if files.is_empty() {
        info!("No seed files in {:?}, asking the operator", folder);
        let hint = folder.clone();
        files = tokio::task::spawn_blocking(move || picker.pick_files(&hint))
            .await
            .context("File picker task failed")?
            .filter(|picked| !picked.is_empty())
            .ok_or_else(|| anyhow!("No seed files found in {:?} and none were picked", folder))?;
    }
    info!("Initialising from {} seed files", files.len());

    let run_dir = discovery::run_folder(&folder)?;
    let state_dir = run_dir.join("out");
    let files = Arc::new(files);

    let mut handles = Vec::with_capacity(receivers.len());
    for (plane, (receiver, metrics)) in receivers.into_iter().zip(metrics).enumerate() {
        let source = source.clone();
        let files = files.clone();
        let estimators = estimators.clone();
        let mask_path = mask_path.clone();
        let cancel = cancel.clone();
        let init = PlaneInit {
            plane,
            crop,
            capacity,
            report_every,
            error_policy,
            state_dir: Some(state_dir.clone()),
        };

        handles.push(tokio::task::spawn_blocking(move || -> Result<PlaneWorker> {
            let seed = source
                .read_seed(&files, plane)
                .with_context(|| format!("Plane {}: could not read seed frames", plane))?;
            let masks = match &mask_path {
                Some(path) => Some(SpatialMasks::load(path, plane, &crop)?),
                None => None,
            };
            PlaneWorker::initialize(
                init,
                &seed,
                masks.as_ref(),
                estimators.as_ref(),
                receiver,
                metrics,
                cancel,
            )
        }));
    }

    let mut workers = Vec::with_capacity(handles.len());
    let mut failures = Vec::new();
    for (plane, handle) in handles.into_iter().enumerate() {
        match handle.await {
            Ok(Ok(worker)) => workers.push(worker),
            Ok(Err(e)) => failures.push(format!("{:#}", e)),
            Err(e) => failures.push(format!("Plane {}: initialisation task failed: {}", plane, e)),
        }
    }
    if !failures.is_empty() {
        bail!("{}", failures.join("; "));
    }

    Ok(SetupOutput { workers, run_dir })
}

/// Drain every plane on its own blocking thread and collect their results.
///
/// Planes are joined as they finish. The first failure stops the others so
/// the join cannot hang waiting for a SESSIONDONE.
async fn drain_planes(
    workers: Vec<PlaneWorker>,
    senders: Vec<PlaneSender>,
    cancel: Arc<AtomicBool>,
) -> Result<Vec<RawResult>> {
    let mut tasks = JoinSet::new();
    for worker in workers {
        tasks.spawn_blocking(move || worker.drain());
    }

    let mut results = Vec::with_capacity(tasks.len());
    let mut failures = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let failure = match joined {
            Ok(Ok(result)) => {
                results.push(result);
                continue;
            }
            Ok(Err(e)) => format!("{:#}", e),
            Err(e) => format!("Drain task failed: {}", e),
        };
        error!("{}", failure);
        if failures.is_empty() {
            cancel.store(true, Ordering::Release);
            for sender in &senders {
                let _ = sender.stop();
            }
        }
        failures.push(failure);
    }

    if !failures.is_empty() {
        bail!("{}", failures.join("; "));
    }
    results.sort_by_key(|r| r.plane);
    Ok(results)
}

/// Concatenate plane traces along the cell axis, truncated to the shortest plane
fn concat_planes(results: &[RawResult]) -> Array2<f64> {
    let n_frames = results.iter().map(RawResult::n_frames).min().unwrap_or(0);
    if results.iter().any(|r| r.n_frames() != n_frames) {
        warn!("Planes processed different frame counts, truncating to {}", n_frames);
    }
    let views: Vec<_> = results
        .iter()
        .map(|r| r.traces.slice(s![.., ..n_frames]))
        .collect();
    ndarray::concatenate(Axis(0), &views).unwrap_or_else(|_| Array2::zeros((0, n_frames)))
}

/// Raw output first, derived outputs after. Nothing here propagates.
fn save_outputs(
    writer: &OutputWriter,
    raw: &RawOutput,
    centroids: &[(usize, Vec<Centroid>)],
    post: Result<PostProcessConfig, ConfigError>,
) -> Option<ProcessedOutput> {
    if let Err(e) = writer.save_raw(raw) {
        error!("Failed to save raw traces: {:#}", e);
    }
    if let Err(e) = writer.save_centroids(centroids) {
        error!("Failed to save centroids: {:#}", e);
    }

    let processed = match post.and_then(|cfg| process(raw.traces.view(), &raw.trial_lengths, &cfg)) {
        Ok(processed) => processed,
        Err(e) => {
            error!("Post-processing failed: {}", e);
            return None;
        }
    };
    if let Err(e) = writer.save_processed(&processed) {
        error!("Failed to save processed traces: {:#}", e);
    }
    Some(processed)
}
