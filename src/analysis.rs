use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::clients::CodeAnalyzer;
use crate::models::{AnalysisReport, AnalysisResult, AnalysisState};
use crate::utils::Liveness;

/// Debounced static analysis of the document content.
///
/// Every change restarts a quiescence timer; when it runs out the latest
/// content is sent for analysis under a fresh generation number. Only the
/// response for the newest generation is ever shown.
pub struct AnalysisClient {
    changes: mpsc::UnboundedSender<String>,
    state_rx: watch::Receiver<AnalysisState>,
    liveness: Liveness,
    worker: JoinHandle<()>,
    followers: Mutex<Vec<JoinHandle<()>>>,
}

impl AnalysisClient {
    pub fn new(analyzer: Arc<dyn CodeAnalyzer>, debounce: Duration, timeout: Duration) -> Self {
        let (changes, changes_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(AnalysisState::default());
        let liveness = Liveness::new();
        let worker = tokio::spawn(run_worker(
            analyzer,
            changes_rx,
            state_tx,
            debounce,
            timeout,
            liveness.clone(),
        ));
        Self {
            changes,
            state_rx,
            liveness,
            worker,
            followers: Mutex::new(Vec::new()),
        }
    }

    pub fn on_content_change(&self, code: &str) {
        if !self.liveness.is_alive() {
            return;
        }
        if self.changes.send(code.to_string()).is_err() {
            debug!("Analysis worker gone, dropping change");
        }
    }

    pub fn state(&self) -> AnalysisState {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AnalysisState> {
        self.state_rx.clone()
    }

    /// Feed every value of `content`, starting with the current one
    pub fn follow(&self, mut content: watch::Receiver<String>) {
        let changes = self.changes.clone();
        let liveness = self.liveness.clone();
        let follower = tokio::spawn(async move {
            loop {
                let code = content.borrow_and_update().clone();
                if !liveness.is_alive() || changes.send(code).is_err() {
                    break;
                }
                if content.changed().await.is_err() {
                    break;
                }
            }
        });
        if let Ok(mut followers) = self.followers.lock() {
            followers.retain(|f| !f.is_finished());
            followers.push(follower);
        }
    }

    /// Stop analysing. A response still in flight is never applied.
    pub fn shutdown(&self) {
        if !self.liveness.kill() {
            return;
        }
        self.worker.abort();
        if let Ok(mut followers) = self.followers.lock() {
            for follower in followers.drain(..) {
                follower.abort();
            }
        }
        info!("Analysis client shut down");
    }
}

impl Drop for AnalysisClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_worker(
    analyzer: Arc<dyn CodeAnalyzer>,
    mut changes: mpsc::UnboundedReceiver<String>,
    state_tx: watch::Sender<AnalysisState>,
    debounce: Duration,
    timeout: Duration,
    liveness: Liveness,
) {
    let mut pending: Option<String> = None;
    let mut generation: u64 = 0;
    let mut requests: JoinSet<AnalysisResult> = JoinSet::new();
    let quiet = tokio::time::sleep(debounce);
    tokio::pin!(quiet);

    loop {
        tokio::select! {
            change = changes.recv() => match change {
                Some(code) => {
                    pending = Some(code);
                    quiet.as_mut().reset(Instant::now() + debounce);
                }
                None => break,
            },
            () = &mut quiet, if pending.is_some() => {
                let Some(code) = pending.take() else { continue };
                generation += 1;

                if code.trim().is_empty() {
                    debug!("Generation {}: empty content, skipping request", generation);
                    state_tx.send_replace(AnalysisState {
                        result: AnalysisResult::empty(generation),
                        analyzing: false,
                    });
                    continue;
                }

                debug!("Generation {}: analysing {} chars", generation, code.chars().count());
                state_tx.send_modify(|state| state.analyzing = true);
                let analyzer = analyzer.clone();
                let issued = generation;
                requests.spawn(async move {
                    match tokio::time::timeout(timeout, analyzer.analyze(&code)).await {
                        Ok(Ok(body)) => AnalysisResult::from_report(AnalysisReport::from_json(&body), issued),
                        Ok(Err(e)) => {
                            warn!("Analysis request {} failed: {}", issued, e);
                            AnalysisResult::failed(issued)
                        }
                        Err(_) => {
                            warn!("Analysis request {} timed out after {:?}", issued, timeout);
                            AnalysisResult::failed(issued)
                        }
                    }
                });
            },
            Some(joined) = requests.join_next(), if !requests.is_empty() => match joined {
                Ok(result) if result.generation == generation && liveness.is_alive() => {
                    state_tx.send_replace(AnalysisState { result, analyzing: false });
                }
                Ok(result) => debug!("Discarding stale analysis for generation {}", result.generation),
                Err(e) => warn!("Analysis request task failed: {}", e),
            },
        }
    }
}
