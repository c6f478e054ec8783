//! Poll/write coordinator
//!
//! [`Coordinator`] owns the transport behind one async mutex. A poll cycle, a
//! raw write and a command with its follow-up poll each hold the lock for
//! their whole duration, so exchanges with the device never interleave.
//!
//! Snapshots are published through a `watch` channel: readers always see
//! either the previous snapshot or the complete new one.

use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::commands::{self, Feature, HumidityPreset, PendingCommand, RegisterWrite};
use crate::config::FuturaConfig;
use crate::error::{FuturaError, FuturaResult};
use crate::reader::SegmentedReader;
use crate::snapshot::{Snapshot, VentilationMode};
use crate::transport::{ConnectionState, RegisterTransport, TcpSession, TransportStats};

/// Result of an issued command.
///
/// Returned once every write was acknowledged; `refresh` carries the outcome
/// of the follow-up poll separately.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub command: PendingCommand,
    pub refresh: FuturaResult<Arc<Snapshot>>,
}

impl CommandOutcome {
    /// Snapshot from the follow-up poll, if it succeeded
    pub fn snapshot(&self) -> Option<&Arc<Snapshot>> {
        self.refresh.as_ref().ok()
    }
}

pub struct Coordinator<T: RegisterTransport> {
    transport: Mutex<T>,
    reader: SegmentedReader,
    snapshot_tx: watch::Sender<Option<Arc<Snapshot>>>,
    last_error: StdMutex<Option<FuturaError>>,
    poll_interval: Duration,
}

impl Coordinator<TcpSession> {
    /// Coordinator over a [`TcpSession`] built from `config`, validated first.
    pub fn from_config(config: &FuturaConfig) -> FuturaResult<Self> {
        config.validate()?;
        Self::new(TcpSession::from_config(config), config.poll_interval())
    }
}

impl<T: RegisterTransport> Coordinator<T> {
    /// Wrap `transport`; a zero `poll_interval` is rejected.
    pub fn new(transport: T, poll_interval: Duration) -> FuturaResult<Self> {
        if poll_interval.is_zero() {
            return Err(FuturaError::configuration("poll interval must be positive"));
        }
        let (snapshot_tx, _) = watch::channel(None);
        Ok(Self {
            transport: Mutex::new(transport),
            reader: SegmentedReader::new(),
            snapshot_tx,
            last_error: StdMutex::new(None),
            poll_interval,
        })
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Latest published snapshot; `None` before the first successful poll
    pub fn get_snapshot(&self) -> Option<Arc<Snapshot>> {
        self.snapshot_tx.borrow().clone()
    }

    /// Receiver notified on every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Snapshot>>> {
        self.snapshot_tx.subscribe()
    }

    /// Error of the most recent failed poll, cleared by the next success
    pub fn last_error(&self) -> Option<FuturaError> {
        self.last_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_last_error(&self, error: Option<FuturaError>) {
        *self
            .last_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = error;
    }

    /// Run one full poll cycle and publish its snapshot.
    ///
    /// On failure the previous snapshot stays current and the error is
    /// recorded in [`Coordinator::last_error`].
    pub async fn poll(&self) -> FuturaResult<Arc<Snapshot>> {
        let mut transport = self.transport.lock().await;
        self.poll_locked(&mut transport).await
    }

    async fn poll_locked(&self, transport: &mut T) -> FuturaResult<Arc<Snapshot>> {
        let result = match self.reader.read_cycle(transport).await {
            Ok(raw) => Snapshot::from_raw(&raw).map(Arc::new),
            Err(e) => Err(e),
        };

        match result {
            Ok(snapshot) => {
                self.snapshot_tx.send_replace(Some(snapshot.clone()));
                self.set_last_error(None);
                debug!(
                    "Snapshot published: mode {}, {} satellite(s)",
                    snapshot.mode_text,
                    snapshot.satellite_count()
                );
                Ok(snapshot)
            }
            Err(e) => {
                warn!("Poll failed: {}", e);
                self.set_last_error(Some(e.clone()));
                Err(e)
            }
        }
    }

    /// Write one holding register. No follow-up poll.
    pub async fn write_u16(&self, address: u16, value: u16) -> FuturaResult<()> {
        let mut transport = self.transport.lock().await;
        transport.write_register(address, value).await.inspect_err(|e| {
            warn!("Write of holding {} failed: {}", address, e);
        })
    }

    /// Write a 32-bit value at `address`, `address + 1`. No follow-up poll.
    pub async fn write_u32(&self, address: u16, value: u32) -> FuturaResult<()> {
        let mut transport = self.transport.lock().await;
        transport.write_u32(address, value).await.inspect_err(|e| {
            warn!("32-bit write at holding {} failed: {}", address, e);
        })
    }

    /// Issue the writes of `command` in order, then poll once.
    ///
    /// The lock is held across both so no scheduled poll can slip between
    /// the command and its refresh.
    pub async fn execute(&self, command: PendingCommand) -> FuturaResult<CommandOutcome> {
        let mut transport = self.transport.lock().await;
        info!("Issuing {}", command);

        for write in &command.writes {
            let written = match write {
                RegisterWrite::Single { address, value } => {
                    transport.write_register(*address, *value).await
                }
                RegisterWrite::Multiple { address, values } => {
                    transport.write_registers(*address, values).await
                }
            };
            if let Err(e) = written {
                warn!("{} failed at holding {}: {}", command.label, write.address(), e);
                return Err(e);
            }
        }

        let refresh = self.poll_locked(&mut transport).await;
        if let Err(e) = &refresh {
            warn!("Refresh after {} failed: {}", command.label, e);
        }
        Ok(CommandOutcome { command, refresh })
    }

    /// Switch the ventilation mode
    pub async fn set_mode(&self, mode: VentilationMode) -> FuturaResult<CommandOutcome> {
        self.execute(commands::set_mode(mode)).await
    }

    /// Boost timer in seconds (0..=7200)
    pub async fn arm_boost(&self, seconds: u32) -> FuturaResult<CommandOutcome> {
        self.execute(commands::arm_boost(seconds)?).await
    }

    /// Boost timer in minutes, floored to 15-minute steps
    pub async fn arm_boost_minutes(&self, minutes: u32) -> FuturaResult<CommandOutcome> {
        self.execute(commands::arm_boost_minutes(minutes)?).await
    }

    /// Boost for [`commands::BOOST_PRESET_SECONDS`]
    pub async fn start_boost_preset(&self) -> FuturaResult<CommandOutcome> {
        self.arm_boost(commands::BOOST_PRESET_SECONDS).await
    }

    /// Circulation timer in seconds (0..=7200)
    pub async fn arm_circulation(&self, seconds: u32) -> FuturaResult<CommandOutcome> {
        self.execute(commands::arm_circulation(seconds)?).await
    }

    /// Circulation timer in minutes (0..=120)
    pub async fn arm_circulation_minutes(&self, minutes: u32) -> FuturaResult<CommandOutcome> {
        self.execute(commands::arm_circulation_minutes(minutes)?).await
    }

    /// Circulation for [`commands::CIRCULATION_PRESET_SECONDS`]
    pub async fn start_circulation_preset(&self) -> FuturaResult<CommandOutcome> {
        self.arm_circulation(commands::CIRCULATION_PRESET_SECONDS).await
    }

    /// Night timer, clamped to 0..=10 hours
    pub async fn set_night_hours(&self, hours: i64) -> FuturaResult<CommandOutcome> {
        self.execute(commands::set_night_hours(hours)).await
    }

    /// Party timer, clamped to 0..=8 hours
    pub async fn set_party_hours(&self, hours: i64) -> FuturaResult<CommandOutcome> {
        self.execute(commands::set_party_hours(hours)).await
    }

    /// Target temperature in °C (15.0..=28.0)
    pub async fn set_temperature_setpoint(&self, celsius: f64) -> FuturaResult<CommandOutcome> {
        self.execute(commands::set_temperature_setpoint(celsius)?)
            .await
    }

    /// Target relative humidity in % (0.0..=100.0)
    pub async fn set_humidity_setpoint(&self, percent: f64) -> FuturaResult<CommandOutcome> {
        self.execute(commands::set_humidity_setpoint(percent)?)
            .await
    }

    /// Humidity setpoint from a named preset
    pub async fn set_humidity_preset(&self, preset: HumidityPreset) -> FuturaResult<CommandOutcome> {
        self.execute(commands::set_humidity_preset(preset)).await
    }

    /// Turn one of the unit's switches on or off
    pub async fn set_feature(&self, feature: Feature, enabled: bool) -> FuturaResult<CommandOutcome> {
        self.execute(commands::set_feature(feature, enabled)).await
    }

    /// Schedule the away window. A missing `begin` means now; a missing or
    /// non-increasing `end` becomes `begin` plus seven days.
    pub async fn set_away_window(
        &self,
        begin: Option<i64>,
        end: Option<i64>,
    ) -> FuturaResult<CommandOutcome> {
        let command = commands::set_away_window(begin, end, Utc::now().timestamp())?;
        self.execute(command).await
    }

    /// Zero both away timestamps
    pub async fn clear_away_window(&self) -> FuturaResult<CommandOutcome> {
        self.execute(commands::clear_away_window()).await
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.transport.lock().await.connection_state()
    }

    pub async fn stats(&self) -> TransportStats {
        self.transport.lock().await.stats()
    }

    /// Close the session; a later call reconnects.
    pub async fn close(&self) -> FuturaResult<()> {
        self.transport.lock().await.close().await
    }

    /// Poll every interval until `shutdown` resolves, then close the session.
    ///
    /// The first poll runs immediately. A failed cycle is logged and the
    /// next tick is the retry.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!("Polling every {:?}", self.poll_interval);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    // Failures are recorded in last_error
                    let _ = self.poll().await;
                }
            }
        }

        if let Err(e) = self.close().await {
            warn!("Close on shutdown failed: {}", e);
        }
        info!("Polling stopped");
    }
}
