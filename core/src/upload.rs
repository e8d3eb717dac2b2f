use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ImportConfig;
use crate::error::CoreError;
use crate::models::MediaRecord;
use crate::pairing::PairingMap;

#[path = "upload/client.rs"]
pub mod client;

pub use client::{AssetApi, AssetMetadata, HttpAssetApi, JobHandle, JobTotals, UploadOutcome};

/// Natural order with every paired back moved right after its front.
pub fn build_upload_order(len: usize, pairing: &PairingMap) -> Vec<usize> {
    let mut order = Vec::with_capacity(len);
    for pos in 0..len {
        // a back is emitted right after its front, unless that front is out of range
        if pairing.front_of(pos).map_or(false, |front| front < len) {
            continue;
        }
        order.push(pos);
        if let Some(back) = pairing.back_of(pos).filter(|back| *back < len) {
            order.push(back);
        }
    }
    order
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadProgress {
    pub total: u64,
    pub processed: u64,
    pub imported: u64,
    pub skipped: u64,
    pub failed: u64,
    pub paused: bool,
    pub cancelled: bool,
    /// Time spent uploading, excluding batch pauses.
    pub elapsed: Duration,
}

impl UploadProgress {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.processed as f64 * 100.0 / self.total as f64
    }

    pub fn estimate_remaining(&self) -> Option<Duration> {
        if self.processed == 0 {
            return None;
        }
        let left = self.total.saturating_sub(self.processed);
        Some(self.elapsed.mul_f64(left as f64 / self.processed as f64))
    }

    fn totals(&self) -> JobTotals {
        JobTotals {
            imported: self.imported,
            skipped: self.skipped,
            failed: self.failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchDecision {
    Continue,
    ContinueWithoutPauses,
    Stop,
}

/// Raised after each full batch; the run stays parked until `reply` is used.
#[derive(Debug)]
pub struct BatchPause {
    pub after: u64,
    pub progress: UploadProgress,
    pub reply: oneshot::Sender<BatchDecision>,
}

impl BatchPause {
    pub fn respond(self, decision: BatchDecision) {
        // a closed receiver means the run already ended
        let _ = self.reply.send(decision);
    }
}

/// Orchestrator side of the control channels.
pub struct UploadControls {
    cancel: CancellationToken,
    pauses: mpsc::Sender<BatchPause>,
    progress: watch::Sender<UploadProgress>,
}

/// Caller side of the control channels.
pub struct UploadHandle {
    pub cancel: CancellationToken,
    pub pauses: mpsc::Receiver<BatchPause>,
    pub progress: watch::Receiver<UploadProgress>,
}

pub fn upload_channels() -> (UploadControls, UploadHandle) {
    let cancel = CancellationToken::new();
    let (pause_tx, pause_rx) = mpsc::channel(1);
    let (progress_tx, progress_rx) = watch::channel(UploadProgress::default());
    (
        UploadControls {
            cancel: cancel.clone(),
            pauses: pause_tx,
            progress: progress_tx,
        },
        UploadHandle {
            cancel,
            pauses: pause_rx,
            progress: progress_rx,
        },
    )
}

impl UploadControls {
    fn publish(&self, progress: &UploadProgress) {
        self.progress.send_replace(progress.clone());
    }

    /// `None` when cancelled while parked. A vanished controller reads as Stop.
    async fn await_decision(&self, progress: &UploadProgress) -> Option<BatchDecision> {
        let (reply, decision) = oneshot::channel();
        let request = BatchPause {
            after: progress.processed,
            progress: progress.clone(),
            reply,
        };
        let delivered = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return None,
            sent = self.pauses.send(request) => sent.is_ok(),
        };
        if !delivered {
            return Some(BatchDecision::Stop);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            answer = decision => Some(answer.unwrap_or(BatchDecision::Stop)),
        }
    }
}

struct ActiveClock {
    banked: Duration,
    since: Option<Instant>,
}

impl ActiveClock {
    fn start() -> Self {
        Self {
            banked: Duration::ZERO,
            since: Some(Instant::now()),
        }
    }

    fn pause(&mut self) {
        if let Some(since) = self.since.take() {
            self.banked += since.elapsed();
        }
    }

    fn resume(&mut self) {
        self.since.get_or_insert_with(Instant::now);
    }

    fn elapsed(&self) -> Duration {
        self.banked + self.since.map(|s| s.elapsed()).unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct UploadReport {
    pub job_id: String,
    pub progress: UploadProgress,
    /// Record position → server asset id, for imported and known duplicates.
    pub asset_ids: BTreeMap<usize, String>,
}

pub struct UploadOrchestrator<A> {
    api: A,
    config: ImportConfig,
    session_id: String,
}

impl<A: AssetApi> UploadOrchestrator<A> {
    pub fn new(api: A, config: ImportConfig, session_id: impl Into<String>) -> Self {
        Self {
            api,
            config,
            session_id: session_id.into(),
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Uploads `records` one at a time in pairing order.
    ///
    /// Per-item failures are counted and skipped over. Only starting or
    /// completing the server job is fatal; the job is completed even after a
    /// cancel or a stop so the server sees the partial counts.
    pub async fn run(
        &self,
        records: &[MediaRecord],
        pairing: &PairingMap,
        controls: UploadControls,
    ) -> Result<UploadReport, CoreError> {
        let order = build_upload_order(records.len(), pairing);
        let albums: Vec<String> = records
            .iter()
            .filter_map(|r| r.album.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let mut progress = UploadProgress {
            total: order.len() as u64,
            ..UploadProgress::default()
        };
        controls.publish(&progress);

        let job = self
            .api
            .start_job(&self.session_id, &albums)
            .await
            .map_err(|e| CoreError::Job(format!("could not start import job: {}", e)))?;
        info!(job_id = %job.job_id, total = progress.total, albums = albums.len(), "upload started");

        let batch_size = self.config.batch_size.max(1) as u64;
        let mut pauses_enabled = self.config.pause_between_batches;
        let mut asset_ids: BTreeMap<usize, String> = BTreeMap::new();
        let mut clock = ActiveClock::start();

        for (step, &pos) in order.iter().enumerate() {
            if controls.cancel.is_cancelled() {
                progress.cancelled = true;
                break;
            }
            let record = &records[pos];
            let back_of = pairing
                .front_of(pos)
                .and_then(|front| asset_ids.get(&front).cloned());
            let metadata = AssetMetadata::for_record(record, &job, back_of);

            match self.api.upload_asset(&job, &record.content, &metadata).await {
                Ok(UploadOutcome::Imported { asset_id }) => {
                    progress.imported += 1;
                    if record.has_annotations() {
                        if let Err(err) = self
                            .api
                            .upload_batch(&job, &asset_id, &record.comments, &record.reactions)
                            .await
                        {
                            warn!(asset_id = %asset_id, error = %err, "annotation upload failed");
                        }
                    }
                    asset_ids.insert(pos, asset_id);
                }
                Ok(UploadOutcome::Duplicate { asset_id }) => {
                    progress.skipped += 1;
                    if let Some(asset_id) = asset_id {
                        asset_ids.insert(pos, asset_id);
                    }
                }
                Ok(UploadOutcome::Failed { reason }) => {
                    progress.failed += 1;
                    warn!(file = %record.filename, reason = %reason, "asset rejected");
                }
                Err(err) => {
                    progress.failed += 1;
                    warn!(file = %record.filename, error = %err, "asset upload failed");
                }
            }
            progress.processed += 1;
            progress.elapsed = clock.elapsed();
            controls.publish(&progress);

            let more_left = step + 1 < order.len();
            if pauses_enabled && more_left && progress.processed % batch_size == 0 {
                clock.pause();
                progress.paused = true;
                controls.publish(&progress);
                debug!(after = progress.processed, "batch pause");
                let decision = controls.await_decision(&progress).await;
                progress.paused = false;
                clock.resume();
                match decision {
                    Some(BatchDecision::Continue) => {}
                    Some(BatchDecision::ContinueWithoutPauses) => pauses_enabled = false,
                    Some(BatchDecision::Stop) | None => {
                        progress.cancelled = true;
                        break;
                    }
                }
            }
        }

        progress.elapsed = clock.elapsed();
        controls.publish(&progress);
        if progress.cancelled {
            info!(processed = progress.processed, "upload halted early");
        }
        self.api
            .complete_job(&job, &progress.totals())
            .await
            .map_err(|e| CoreError::Job(format!("could not complete import job: {}", e)))?;
        info!(
            imported = progress.imported,
            skipped = progress.skipped,
            failed = progress.failed,
            "upload finished"
        );
        Ok(UploadReport {
            job_id: job.job_id,
            progress,
            asset_ids,
        })
    }
}
