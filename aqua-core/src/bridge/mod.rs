//! The bridge context.
//!
//! A [`Bridge`] is built once at startup and owns every piece of state the
//! control process needs: the compiled layout, the mapped region, the
//! telemetry reader and its counter baselines, the control writer and the
//! optional ground-truth connections. Nothing is global.

mod config;
mod dump;
mod observation;

pub use config::{BridgeConfig, DEFAULT_SCHEMA_PATH};
pub use dump::{CacheHeader, RegionDump, ServerReservoirs};
pub use observation::{Observation, ObservationLog};

use crate::alias::{ActionEncoder, ActionMessage};
use crate::clock::{ClockProvider, SystemClock};
use crate::error::Result;
use crate::features::{ActiveServers, FeatureProcessor, ServerFeatures};
use crate::ground_truth::GroundTruthChannel;
use crate::layout::Layout;
use crate::pointer::PointerTree;
use crate::region::{ControlLock, SharedRegion};
use crate::ring::{ControlWriter, FrameRing, TelemetryReader};
use crate::schema::SchemaDocument;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Control-process side of the shared region.
pub struct Bridge {
    layout: Layout,
    tree: PointerTree,
    region: SharedRegion,
    _lock: ControlLock,
    reader: TelemetryReader,
    processor: FeatureProcessor,
    encoder: ActionEncoder,
    ground_truth: Option<GroundTruthChannel>,
    /// Frame consumed from the ring whose ground truth could not be fetched.
    pending: Option<ServerFeatures>,
    log: Option<ObservationLog>,
    poll_interval: Duration,
}

impl Bridge {
    /// Attach to the region described by `config`, stamping control frames
    /// with the system clock.
    pub async fn open(config: BridgeConfig) -> Result<Self> {
        Self::open_with_clock(config, Arc::new(SystemClock)).await
    }

    /// Attach with an explicit clock.
    ///
    /// Fails if the schema does not compile, the region file has the wrong
    /// size, another process holds the control lock, or a ground-truth
    /// endpoint cannot be reached.
    pub async fn open_with_clock(config: BridgeConfig, clock: Arc<dyn ClockProvider>) -> Result<Self> {
        let doc = SchemaDocument::load(&config.schema_path)?;
        let layout = Layout::compile(&doc)?;
        let constants = layout.constants();
        if !layout.is_exact() {
            debug!(
                used = layout.end_offset(),
                size = constants.shm_size,
                "Layout leaves the tail of the region unused"
            );
        }
        let tree = PointerTree::build(&layout);

        let region_path = config
            .region_path
            .clone()
            .unwrap_or_else(|| constants.region_path());
        let region = SharedRegion::open(&region_path, constants.shm_size)?;
        let lock = ControlLock::acquire(&region_path)?;

        let roles = layout.roles();
        let telemetry = FrameRing::from_tree(&layout, &tree, &roles.frames_out)?;
        let processor = FeatureProcessor::new(&layout, &tree, &telemetry)?.with_deploy(config.deploy);
        let reader = TelemetryReader::new(telemetry);

        let control = FrameRing::from_tree(&layout, &tree, &roles.frames_in)?;
        let resume = resume_id(&control, &region)?;
        let encoder = ActionEncoder::new(&layout, ControlWriter::new(control).with_next_id(resume), clock)?;

        let ground_truth = match &config.ground_truth {
            Some(gt) => Some(GroundTruthChannel::connect(gt).await?),
            None => None,
        };
        let log = config.record_path.as_ref().map(ObservationLog::open).transpose()?;
        let poll_interval = config
            .poll_interval
            .unwrap_or(constants.update_interval);

        info!(
            region = %region_path.display(),
            n_bin = constants.n_bin,
            n_frame = constants.n_frame,
            features = processor.schema().len(),
            next_control_id = resume,
            ground_truth = ground_truth.is_some(),
            "Bridge attached"
        );

        Ok(Self {
            layout,
            tree,
            region,
            _lock: lock,
            reader,
            processor,
            encoder,
            ground_truth,
            pending: None,
            log,
            poll_interval,
        })
    }

    /// Compiled layout.
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Pointer tree over the region.
    pub fn tree(&self) -> &PointerTree {
        &self.tree
    }

    /// The mapped region.
    pub fn region(&self) -> &SharedRegion {
        &self.region
    }

    /// Region file path.
    pub fn region_path(&self) -> &Path {
        self.region.path()
    }

    /// Poll loop period.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Per-server feature names, in column order.
    pub fn feature_names(&self) -> Vec<String> {
        self.processor.schema().names()
    }

    /// Load-balancer feature names, in column order.
    pub fn lb_feature_names(&self) -> Vec<String> {
        self.processor.schema().lb_names()
    }

    /// Highest telemetry id seen so far.
    pub fn last_seen(&self) -> u32 {
        self.reader.last_seen()
    }

    /// Process the newest telemetry frame.
    ///
    /// Calling this twice without a new frame in between re-reads the same
    /// frame; its cumulative counters then report zero deltas. A frame whose
    /// ground-truth fetch failed is retried first.
    pub async fn latest_observation(&mut self) -> Result<Option<Observation>> {
        let features = match self.pending.take() {
            Some(features) => features,
            None => match self.reader.latest_frame(&self.region)? {
                Some(frame) => self.processor.process(&frame, &self.region)?,
                None => return Ok(None),
            },
        };
        self.observe(features).await.map(Some)
    }

    /// Process the oldest telemetry frame not yet seen.
    ///
    /// A frame whose ground-truth fetch failed is retried first.
    pub async fn next_observation(&mut self) -> Result<Option<Observation>> {
        let features = match self.pending.take() {
            Some(features) => features,
            None => match self.reader.next_frame(&self.region)? {
                Some(frame) => self.processor.process(&frame, &self.region)?,
                None => return Ok(None),
            },
        };
        self.observe(features).await.map(Some)
    }

    async fn observe(&mut self, features: ServerFeatures) -> Result<Observation> {
        let ground_truth = match self.ground_truth.as_mut() {
            Some(channel) => match channel.fetch(&features.active).await {
                Ok(samples) => Some(samples),
                Err(e) => {
                    debug!(sequence_id = features.sequence_id, "Holding frame for ground-truth retry");
                    self.pending = Some(features);
                    return Err(e);
                }
            },
            None => None,
        };
        let observation = Observation::new(features, ground_truth);
        if let Some(log) = self.log.as_mut() {
            log.append(&observation)?;
        }
        Ok(observation)
    }

    /// Publish a weight vector of length `SHM_N_BIN` as the next control
    /// frame.
    pub fn publish_weights(&mut self, weights: &[f64]) -> Result<ActionMessage> {
        self.encoder.publish(&mut self.region, weights)
    }

    /// Active servers of the newest telemetry frame, with its sequence id.
    pub fn active_servers(&mut self) -> Result<Option<(u32, ActiveServers)>> {
        match self.reader.latest_frame(&self.region)? {
            Some(frame) => Ok(Some((frame.sequence_id, self.processor.active_servers(&frame)?))),
            None => Ok(None),
        }
    }

    /// Read bookkeeping fields and the reservoirs of `servers`.
    pub fn dump(&self, servers: &[usize]) -> Result<RegionDump> {
        RegionDump::capture(&self.layout, &self.tree, &self.region, servers)
    }

    /// Process every new frame each poll period until `shutdown` resolves.
    ///
    /// Transient failures (ground truth, overruns) are logged and the loop
    /// carries on at the next period; fatal errors end it. Returns the number
    /// of observations produced.
    pub async fn run<S, F>(&mut self, shutdown: S, mut on_observation: F) -> Result<u64>
    where
        S: Future<Output = ()>,
        F: FnMut(&Observation),
    {
        tokio::pin!(shutdown);
        let mut processed = 0u64;
        loop {
            let started = Instant::now();
            loop {
                match self.next_observation().await {
                    Ok(Some(observation)) => {
                        processed += 1;
                        debug!(
                            sequence_id = observation.sequence_id,
                            active = observation.active.len(),
                            "Observation"
                        );
                        on_observation(&observation);
                    }
                    Ok(None) => break,
                    Err(e) if e.is_fatal() => {
                        error!(error = %e, code = e.code(), "Bridge loop stopped");
                        return Err(e);
                    }
                    Err(e) => {
                        warn!(error = %e, code = e.code(), "Poll failed, retrying next period");
                        break;
                    }
                }
            }

            let pause = self.poll_interval.saturating_sub(started.elapsed());
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }
        info!(processed, "Bridge loop finished");
        Ok(processed)
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("region", &self.region)
            .field("last_seen", &self.reader.last_seen())
            .field("encoder", &self.encoder)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

/// First control id after whatever a previous writer left in the ring, so a
/// restarted bridge is not ignored by a data plane that saw higher ids.
fn resume_id(ring: &FrameRing, region: &SharedRegion) -> Result<u32> {
    let mut highest = 0;
    for slot in 0..ring.len() {
        highest = highest.max(ring.load_id(region, slot)?);
    }
    Ok(match highest.wrapping_add(1) {
        0 => 1,
        n => n,
    })
}
