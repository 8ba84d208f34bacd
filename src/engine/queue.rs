use crate::core::{Frame, FrameStack};
use anyhow::{anyhow, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Items flowing from the session controller to a plane worker
#[derive(Debug, Clone)]
pub enum PlaneMessage {
    Frame { data: Frame, index: u64 },
    TrialStart,
    TrialEnd,
    Stop,
}

#[derive(Debug, Default)]
struct QueueCounters {
    enqueued: AtomicU64,
    frames: AtomicU64,
    stopped: AtomicBool,
}

/// Producer half of a plane queue. Cheap to clone; all clones share counters.
#[derive(Debug, Clone)]
pub struct PlaneSender {
    plane: usize,
    tx: Sender<PlaneMessage>,
    counters: Arc<QueueCounters>,
}

/// Consumer half, owned by the plane worker
#[derive(Debug)]
pub struct PlaneReceiver {
    plane: usize,
    rx: Receiver<PlaneMessage>,
}

/// Create the unbounded FIFO feeding one plane
pub fn plane_queue(plane: usize) -> (PlaneSender, PlaneReceiver) {
    let (tx, rx) = unbounded();
    (
        PlaneSender {
            plane,
            tx,
            counters: Arc::new(QueueCounters::default()),
        },
        PlaneReceiver { plane, rx },
    )
}

impl PlaneSender {
    pub fn plane(&self) -> usize {
        self.plane
    }

    fn send(&self, msg: PlaneMessage) -> Result<()> {
        if self.counters.stopped.load(Ordering::Acquire) {
            return Err(anyhow!("Plane {} queue is already stopped", self.plane));
        }
        self.tx
            .send(msg)
            .map_err(|_| anyhow!("Plane {} worker is gone", self.plane))?;
        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn push_frame(&self, data: Frame) -> Result<()> {
        let index = self.counters.frames.fetch_add(1, Ordering::Relaxed);
        self.send(PlaneMessage::Frame { data, index })
    }

    /// Enqueue a whole trial bracketed by start/end markers
    pub fn push_trial(&self, frames: &FrameStack) -> Result<()> {
        self.send(PlaneMessage::TrialStart)?;
        for frame in frames.frames() {
            self.push_frame(frame.to_owned())?;
        }
        self.send(PlaneMessage::TrialEnd)
    }

    /// Send the stop sentinel. Only the first call has any effect.
    pub fn stop(&self) -> Result<()> {
        if self.counters.stopped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.tx
            .send(PlaneMessage::Stop)
            .map_err(|_| anyhow!("Plane {} worker is gone", self.plane))?;
        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn is_stopped(&self) -> bool {
        self.counters.stopped.load(Ordering::Acquire)
    }

    /// Total items ever enqueued (frames, markers and the stop sentinel)
    pub fn enqueued(&self) -> u64 {
        self.counters.enqueued.load(Ordering::Relaxed)
    }

    /// Items waiting for the worker
    pub fn pending(&self) -> usize {
        self.tx.len()
    }
}

impl PlaneReceiver {
    pub fn plane(&self) -> usize {
        self.plane
    }

    /// Block until the next item. `None` once every sender is dropped.
    pub fn recv(&self) -> Option<PlaneMessage> {
        self.rx.recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
