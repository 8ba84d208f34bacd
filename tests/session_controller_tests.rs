use anyhow::{anyhow, Result};
use ndarray::ArrayView2;
use planestream::config::ServerSettings;
use planestream::core::FrameStack;
use planestream::engine::{Estimates, Estimator, EstimatorFactory, FrameErrorPolicy, RoiMeanFactory};
use planestream::session::{Collaborators, SessionController, SessionOutcome, SessionState};
use planestream::sources::mock::{SimulatedDecoder, StaticPicker};
use planestream::sources::SpatialMasks;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;

struct Rig {
    dir: TempDir,
    decoder: Arc<SimulatedDecoder>,
    picker: Arc<StaticPicker>,
}

impl Rig {
    /// Session folder holding one 20-frame seed acquisition
    fn new() -> Self {
        Self::with_picker(StaticPicker::cancelled())
    }

    fn with_picker(picker: StaticPicker) -> Self {
        let dir = tempdir().unwrap();
        let decoder = Arc::new(SimulatedDecoder::new(4, 4));
        let seed = dir.path().join("seed_000.sim");
        fs::write(&seed, b"seed").unwrap();
        decoder.register(&seed, 20);
        Self {
            dir,
            decoder,
            picker: Arc::new(picker),
        }
    }

    fn empty_folder(picker: StaticPicker) -> Self {
        Self {
            dir: tempdir().unwrap(),
            decoder: Arc::new(SimulatedDecoder::new(4, 4)),
            picker: Arc::new(picker),
        }
    }

    fn folder(&self) -> &Path {
        self.dir.path()
    }

    fn controller(&self, settings: ServerSettings) -> SessionController {
        self.controller_with(settings, Arc::new(RoiMeanFactory::default()))
    }

    fn controller_with(
        &self,
        settings: ServerSettings,
        estimators: Arc<dyn EstimatorFactory>,
    ) -> SessionController {
        SessionController::new(
            settings,
            Collaborators {
                decoder: self.decoder.clone(),
                picker: self.picker.clone(),
                estimators,
            },
        )
    }

    /// Register an acquisition with `raw_frames` interleaved frames
    fn trial(&self, name: &str, raw_frames: usize) -> PathBuf {
        let path = self.folder().join(name);
        self.decoder.register(&path, raw_frames);
        path
    }

    fn setup(&self) -> String {
        json!({
            "EVENTTYPE": "SETUP",
            "nplanes": 2,
            "nchannels": 1,
            "fr": 10.0,
            "folder": self.folder(),
        })
        .to_string()
    }
}

fn settings() -> ServerSettings {
    ServerSettings {
        acq_settle_ms: 0,
        report_every: 10,
        ..Default::default()
    }
}

fn event(kind: &str) -> String {
    json!({ "EVENTTYPE": kind }).to_string()
}

fn acq_done(path: &Path) -> String {
    json!({ "EVENTTYPE": "ACQDONE", "filename": path }).to_string()
}

async fn streaming(rig: &Rig) -> SessionController {
    let mut controller = rig.controller(settings());
    controller.handle_message(&rig.setup()).await;
    assert_eq!(controller.state(), SessionState::SetupInProgress);
    controller.wait_for_setup().await;
    assert_eq!(controller.state(), SessionState::Ready);
    controller.handle_message(&event("START")).await;
    assert_eq!(controller.state(), SessionState::Streaming);
    controller
}

#[tokio::test]
async fn test_two_trials_end_to_end() {
    let rig = Rig::new();
    let first = rig.trial("trial_001.sim", 40);
    let second = rig.trial("trial_002.sim", 40);

    let mut controller = streaming(&rig).await;
    controller.handle_message(&acq_done(&first)).await;
    controller.handle_message(&acq_done(&second)).await;
    controller.handle_message(&event("SESSIONDONE")).await;
    controller.wait_for_drain().await;

    assert_eq!(controller.state(), SessionState::Done);
    assert_eq!(controller.outcome(), Some(&SessionOutcome::Completed));
    assert_eq!(controller.trial_lengths(), &[20, 20]);

    let results = controller.results();
    assert_eq!(results.len(), 2);
    for (plane, result) in results.iter().enumerate() {
        assert_eq!(result.plane, plane);
        assert_eq!(result.trial_lengths, vec![20, 20]);
        assert_eq!(result.n_frames(), 40);
        // 10 seed frames per plane, counter starts one past them
        assert_eq!(result.t, 11 + 40);
        assert_eq!(result.centroids.len(), result.n_cells());
    }

    let processed = controller.processed().unwrap();
    assert_eq!(processed.traces.dim(), (2, 40));
    assert_eq!(processed.psths.dim(), (2, 2, 20));

    let folder = rig.folder();
    for name in [
        "raw_data.json",
        "traces.npy",
        "traces_data.json",
        "psths.npy",
        "normalized.npy",
        "centroids.json",
        "centroids.csv",
    ] {
        assert!(folder.join(name).exists(), "{} missing", name);
    }
    let run_dir = controller.run_dir().unwrap();
    assert!(run_dir.join("out").join("engine_plane_1.json").exists());

    let raw: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(folder.join("raw_data.json")).unwrap()).unwrap();
    assert_eq!(raw["splits"], json!([20, 20]));
    assert_eq!(raw["c"].as_array().unwrap().len(), 2);
    assert_eq!(raw["trialtimes"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_partial_volume_keeps_planes_in_step() {
    let rig = Rig::new();
    let first = rig.trial("trial_001.sim", 41);
    let second = rig.trial("trial_002.sim", 41);

    let mut controller = streaming(&rig).await;
    controller.handle_message(&acq_done(&first)).await;
    controller.handle_message(&acq_done(&second)).await;
    assert_eq!(controller.enqueued(0), controller.enqueued(1));
    controller.handle_message(&event("SESSIONDONE")).await;
    controller.wait_for_drain().await;

    assert_eq!(controller.state(), SessionState::Done);
    assert_eq!(controller.trial_lengths(), &[20, 20]);
    for result in controller.results() {
        assert_eq!(result.trial_lengths, vec![20, 20]);
        assert_eq!(result.n_frames(), 40);
    }
    assert_eq!(controller.processed().unwrap().traces.ncols(), 40);
}

#[tokio::test]
async fn test_short_trial_is_dropped() {
    let rig = Rig::new();
    let glitch = rig.trial("glitch.sim", 6);

    let mut controller = streaming(&rig).await;
    let before = controller.enqueued(0);
    controller.handle_message(&acq_done(&glitch)).await;

    assert_eq!(controller.enqueued(0), before);
    assert_eq!(controller.enqueued(1), Some(0));
    assert!(controller.trial_lengths().is_empty());
    assert_eq!(controller.trialtimes_all().len(), 1);
    assert_eq!(controller.state(), SessionState::Streaming);
}

#[tokio::test]
async fn test_acq_done_after_session_done_is_rejected() {
    let rig = Rig::new();
    let first = rig.trial("trial_001.sim", 40);
    let late = rig.trial("trial_002.sim", 40);

    let mut controller = streaming(&rig).await;
    controller.handle_message(&acq_done(&first)).await;
    controller.handle_message(&event("SESSIONDONE")).await;

    let before: Vec<_> = (0..2).map(|p| controller.enqueued(p)).collect();
    controller.handle_message(&acq_done(&late)).await;
    let after: Vec<_> = (0..2).map(|p| controller.enqueued(p)).collect();
    assert_eq!(before, after);
    assert_eq!(controller.trial_lengths(), &[20]);

    controller.wait_for_drain().await;
    assert_eq!(controller.state(), SessionState::Done);
    assert_eq!(controller.results()[0].trial_lengths, vec![20]);
}

#[tokio::test]
async fn test_unreadable_acquisition_is_dropped() {
    let rig = Rig::new();
    let mut controller = streaming(&rig).await;

    let unfinished = rig.folder().join("still_writing.sim");
    controller.handle_message(&acq_done(&unfinished)).await;

    assert_eq!(controller.state(), SessionState::Streaming);
    assert!(controller.trial_lengths().is_empty());
    assert_eq!(controller.enqueued(0), Some(0));
}

#[tokio::test]
async fn test_acq_done_without_filename_uses_latest_file() {
    let rig = Rig::new();
    let mut controller = streaming(&rig).await;

    let newest = rig.trial("trial_001.sim", 40);
    fs::write(&newest, b"acquired").unwrap();
    controller
        .handle_message(&json!({ "EVENTTYPE": "ACQDONE" }).to_string())
        .await;

    assert_eq!(controller.trial_lengths(), &[20]);
    assert_eq!(controller.enqueued(0), Some(22));
}

#[tokio::test]
async fn test_bad_messages_are_dropped() {
    let rig = Rig::new();
    let mut controller = rig.controller(settings());

    controller.handle_message(r#"{"filename": "x.sim"}"#).await;
    controller.handle_message(&event("REBOOT")).await;
    controller.handle_message("not json").await;
    controller.handle_message(&event("START")).await;
    controller.handle_message(&event("TEST")).await;

    assert_eq!(controller.state(), SessionState::Uninitialized);
    assert!(controller.outcome().is_none());
}

#[tokio::test]
async fn test_second_setup_in_flight_is_rejected() {
    let rig = Rig::new();
    let mut controller = rig.controller(settings());

    controller.handle_message(&rig.setup()).await;
    let again = json!({
        "EVENTTYPE": "SETUP",
        "nplanes": 3,
        "fr": 30.0,
        "folder": rig.folder(),
    })
    .to_string();
    controller.handle_message(&again).await;

    assert_eq!(controller.config().nplanes, 2);
    assert_eq!(controller.config().fr, Some(10.0));
    controller.wait_for_setup().await;
    assert_eq!(controller.state(), SessionState::Ready);
}

#[tokio::test]
async fn test_unknown_setup_field_leaves_session_untouched() {
    let rig = Rig::new();
    let mut controller = rig.controller(settings());

    let setup = json!({
        "EVENTTYPE": "SETUP",
        "nplanes": 2,
        "fr": 10.0,
        "folder": rig.folder(),
        "zoom": 2,
    })
    .to_string();
    controller.handle_message(&setup).await;

    assert_eq!(controller.state(), SessionState::Uninitialized);
    assert_eq!(controller.config().fr, None);
}

#[tokio::test]
async fn test_setup_without_frame_rate_aborts() {
    let rig = Rig::new();
    let mut controller = rig.controller(settings());

    let setup = json!({ "EVENTTYPE": "SETUP", "nplanes": 2, "folder": rig.folder() }).to_string();
    controller.handle_message(&setup).await;

    assert_eq!(controller.state(), SessionState::Aborted);
}

#[tokio::test]
async fn test_missing_seed_files_abort_setup() {
    let rig = Rig::empty_folder(StaticPicker::cancelled());
    let mut controller = rig.controller(settings());

    controller.handle_message(&rig.setup()).await;
    controller.wait_for_setup().await;

    assert_eq!(rig.picker.calls(), 1);
    assert_eq!(controller.state(), SessionState::Aborted);
    assert!(matches!(
        controller.outcome(),
        Some(SessionOutcome::Aborted { .. })
    ));
}

#[tokio::test]
async fn test_picker_supplies_seed_files() {
    let seed = PathBuf::from("/elsewhere/seed.sim");
    let rig = Rig::empty_folder(StaticPicker::new(Some(vec![seed.clone()])));
    rig.decoder.register(&seed, 30);
    let mut controller = rig.controller(settings());

    controller.handle_message(&rig.setup()).await;
    controller.wait_for_setup().await;

    assert_eq!(rig.picker.calls(), 1);
    assert_eq!(controller.state(), SessionState::Ready);
}

#[tokio::test]
async fn test_events_during_setup_are_replayed() {
    let rig = Rig::new();
    let trial = rig.trial("trial_001.sim", 40);
    let mut controller = rig.controller(settings());

    controller.handle_message(&rig.setup()).await;
    controller.handle_message(&event("START")).await;
    controller.handle_message(&acq_done(&trial)).await;
    assert_eq!(controller.state(), SessionState::SetupInProgress);
    assert!(controller.trial_lengths().is_empty());

    controller.wait_for_setup().await;
    assert_eq!(controller.state(), SessionState::Streaming);
    assert_eq!(controller.trial_lengths(), &[20]);
}

#[tokio::test]
async fn test_uhoh_aborts_while_streaming() {
    let rig = Rig::new();
    let trial = rig.trial("trial_001.sim", 40);
    let mut controller = streaming(&rig).await;
    controller.handle_message(&acq_done(&trial)).await;

    controller.handle_message(&event("UHOH")).await;
    assert_eq!(controller.state(), SessionState::Aborted);

    // A second shutdown is harmless
    controller.shutdown("again").await;
    assert_eq!(
        controller.outcome(),
        Some(&SessionOutcome::Aborted {
            reason: "UHOH event".to_string()
        })
    );
    controller.handle_message(&event("SESSIONDONE")).await;
    assert_eq!(controller.state(), SessionState::Aborted);
}

#[tokio::test]
async fn test_log_events_are_persisted() {
    let rig = Rig::new();
    let trial = rig.trial("trial_001.sim", 40);
    let mut controller = streaming(&rig).await;

    controller
        .handle_message(&json!({ "EVENTTYPE": "LOG", "mouse": "cm101", "depth": 250 }).to_string())
        .await;
    controller
        .handle_message(&json!({ "EVENTTYPE": "LOG", "depth": 300 }).to_string())
        .await;
    controller.handle_message(&acq_done(&trial)).await;
    controller.handle_message(&event("SESSIONDONE")).await;
    controller.wait_for_drain().await;

    assert_eq!(controller.log_entries()["depth"], vec![json!(250), json!(300)]);
    let raw: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(rig.folder().join("raw_data.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(raw["log"]["mouse"], json!(["cm101"]));
}

#[tokio::test]
async fn test_outputs_are_mirrored_to_output_folder() {
    let rig = Rig::new();
    let mirror = tempdir().unwrap();
    let trial = rig.trial("trial_001.sim", 40);

    let mut controller = rig.controller(ServerSettings {
        output_folder: Some(mirror.path().to_path_buf()),
        ..settings()
    });
    controller.handle_message(&rig.setup()).await;
    controller.wait_for_setup().await;
    controller.handle_message(&event("START")).await;
    controller.handle_message(&acq_done(&trial)).await;
    controller.handle_message(&event("SESSIONDONE")).await;
    controller.wait_for_drain().await;

    assert!(rig.folder().join("raw_data.json").exists());
    assert!(mirror.path().join("raw_data.json").exists());
    assert!(mirror.path().join("psths.npy").exists());
}

#[tokio::test]
async fn test_run_consumes_channel_until_done() {
    let rig = Rig::new();
    let trial = rig.trial("trial_001.sim", 40);
    let mut controller = rig.controller(settings());

    let (tx, mut rx) = mpsc::channel(16);
    for msg in [
        rig.setup(),
        event("START"),
        acq_done(&trial),
        event("SESSIONDONE"),
    ] {
        tx.send(msg).await.unwrap();
    }

    let state = controller.run(&mut rx).await;
    assert_eq!(state, SessionState::Done);
    assert_eq!(controller.results().len(), 2);
    drop(tx);
}

#[tokio::test]
async fn test_interrupt_stops_run() {
    let rig = Rig::new();
    let (_tx, mut rx) = mpsc::channel::<String>(16);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let mut controller = rig.controller(settings()).with_shutdown(shutdown_rx);

    shutdown_tx.send(()).unwrap();
    let state = controller.run(&mut rx).await;

    assert_eq!(state, SessionState::Aborted);
    assert_eq!(
        controller.outcome(),
        Some(&SessionOutcome::Aborted {
            reason: "operator interrupt".to_string()
        })
    );
}

/// Estimator that rejects every streamed frame of plane 1.
///
/// With two planes and one channel, plane 1's seed starts at raw frame 1,
/// which is how the factory tells the planes apart.
struct SecondPlaneFails;

struct Rejecting {
    inner: Box<dyn Estimator>,
}

impl Estimator for Rejecting {
    fn fit_next(&mut self, _t: usize, _frame: ArrayView2<'_, f32>) -> Result<()> {
        Err(anyhow!("plane 1 estimator crashed"))
    }

    fn estimates(&self) -> Estimates {
        self.inner.estimates()
    }
}

impl EstimatorFactory for SecondPlaneFails {
    fn name(&self) -> &str {
        "second-plane-fails"
    }

    fn initialize(
        &self,
        seed: &FrameStack,
        masks: Option<&SpatialMasks>,
        capacity: usize,
    ) -> Result<Box<dyn Estimator>> {
        let inner = RoiMeanFactory::default().initialize(seed, masks, capacity)?;
        if seed.frame(0)[[0, 0]] == SimulatedDecoder::pixel(1, 0, 0) {
            Ok(Box::new(Rejecting { inner }))
        } else {
            Ok(inner)
        }
    }
}

#[tokio::test]
async fn test_failed_plane_aborts_without_session_done() {
    let rig = Rig::new();
    let trial = rig.trial("trial_001.sim", 40);
    let mut controller = rig.controller_with(
        ServerSettings {
            frame_error_policy: FrameErrorPolicy::Propagate,
            ..settings()
        },
        Arc::new(SecondPlaneFails),
    );

    let (tx, mut rx) = mpsc::channel(16);
    for msg in [rig.setup(), event("START"), acq_done(&trial)] {
        tx.send(msg).await.unwrap();
    }

    // No SESSIONDONE: plane 0 keeps waiting unless the failure stops it
    let state = timeout(Duration::from_secs(10), controller.run(&mut rx))
        .await
        .expect("session did not abort after a plane failed");
    assert_eq!(state, SessionState::Aborted);
    match controller.outcome() {
        Some(SessionOutcome::Aborted { reason }) => {
            assert!(reason.contains("plane 1 estimator crashed"), "{}", reason)
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    drop(tx);
}

#[tokio::test]
async fn test_interrupt_cuts_acquisition_wait_short() {
    let rig = Rig::new();
    let trial = rig.trial("trial_001.sim", 40);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let mut controller = rig
        .controller(ServerSettings {
            acq_settle_ms: 60_000,
            ..settings()
        })
        .with_shutdown(shutdown_rx);
    controller.handle_message(&rig.setup()).await;
    controller.wait_for_setup().await;
    controller.handle_message(&event("START")).await;

    shutdown_tx.send(()).unwrap();
    timeout(Duration::from_secs(10), controller.handle_message(&acq_done(&trial)))
        .await
        .expect("interrupt was not noticed during the settle delay");

    assert_eq!(controller.state(), SessionState::Aborted);
    assert!(controller.trial_lengths().is_empty());
    assert_eq!(
        controller.outcome(),
        Some(&SessionOutcome::Aborted {
            reason: "operator interrupt".to_string()
        })
    );
}
