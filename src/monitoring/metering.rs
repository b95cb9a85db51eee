use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

use crate::billing::{BillingLedger, ResourceShape};
use crate::core::orchestrator::VmOrchestrator;
use crate::core::vm::{VmId, VmState};
use crate::errors::{BillingError, ConfigError, FleetResult, VmError};

/// Outcome of one metering pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MeterReport {
    pub billed: usize,
    pub charged: f64,
    /// Bindings dropped because their VM no longer exists.
    pub dropped: usize,
}

/// Bills running VMs to the users they are assigned to, once per interval.
///
/// The ledger never learns which VM a charge came from; the meter only hands
/// it the resource shape.
pub struct UsageMeter {
    orchestrator: Arc<VmOrchestrator>,
    ledger: Arc<BillingLedger>,
    assignments: Mutex<HashMap<VmId, String>>,
}

impl UsageMeter {
    pub fn new(orchestrator: Arc<VmOrchestrator>, ledger: Arc<BillingLedger>) -> Self {
        Self {
            orchestrator,
            ledger,
            assignments: Mutex::new(HashMap::new()),
        }
    }

    /// Bills `vm_id` to `user_id` from the next tick on. Reassigning a VM
    /// replaces the previous owner.
    pub async fn assign(&self, vm_id: VmId, user_id: &str) -> FleetResult<()> {
        if self.orchestrator.get_vm(vm_id).await.is_none() {
            return Err(VmError::NotFound { vm_id }.into());
        }
        if self.ledger.get_record(user_id).await.is_none() {
            return Err(BillingError::NotFound { user_id: user_id.to_string() }.into());
        }

        let previous = self.assignments.lock().await.insert(vm_id, user_id.to_string());
        info!(
            vm_id = %vm_id,
            user_id = %user_id,
            previous = ?previous,
            "VM assigned for metering"
        );
        Ok(())
    }

    pub async fn unassign(&self, vm_id: VmId) -> Option<String> {
        self.assignments.lock().await.remove(&vm_id)
    }

    pub async fn assignments(&self) -> Vec<(VmId, String)> {
        let mut bindings: Vec<_> = self
            .assignments
            .lock()
            .await
            .iter()
            .map(|(vm_id, user_id)| (*vm_id, user_id.clone()))
            .collect();
        bindings.sort();
        bindings
    }

    /// One metering pass: every assigned VM that is `RUNNING` right now is
    /// charged one interval of usage.
    ///
    /// Each VM is billed from the snapshot read at the start of its step. A
    /// VM deleted after that read still pays for the interval it was running
    /// in; its binding is dropped on the next pass and it is never billed
    /// again.
    pub async fn tick(&self) -> MeterReport {
        let bindings = self.assignments().await;
        let mut report = MeterReport::default();

        for (vm_id, user_id) in bindings {
            let Some(vm) = self.orchestrator.get_vm(vm_id).await else {
                self.assignments.lock().await.remove(&vm_id);
                warn!(
                    vm_id = %vm_id,
                    user_id = %user_id,
                    "Dropping metering binding for deleted VM"
                );
                report.dropped += 1;
                continue;
            };

            if vm.state != VmState::Running {
                debug!(vm_id = %vm_id, state = %vm.state, "Skipping idle VM");
                continue;
            }

            let shape = ResourceShape::from(&vm);
            match self.ledger.accrue(&user_id, Some(shape)).await {
                Ok(cost) => {
                    report.billed += 1;
                    report.charged += cost;
                }
                Err(e) => {
                    error!(
                        vm_id = %vm_id,
                        user_id = %user_id,
                        error = %e,
                        "Failed to meter VM usage"
                    );
                }
            }
        }

        debug!(
            billed = report.billed,
            charged = report.charged,
            dropped = report.dropped,
            "Metering pass finished"
        );
        report
    }

    /// Runs [`UsageMeter::tick`] every `period` until the handle is shut down.
    /// The first pass happens one full period after spawning. A zero period
    /// is rejected before any task is started.
    pub fn spawn(self: Arc<Self>, period: Duration) -> FleetResult<MeterHandle> {
        if period.is_zero() {
            return Err(ConfigError::Invalid {
                setting: "metering.interval_seconds",
                reason: "interval must be greater than zero".to_string(),
            }
            .into());
        }

        info!("Starting usage metering with {}s interval", period.as_secs());
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.tick().await;
                    }
                    _ = &mut shutdown_rx => {
                        info!("Usage metering stopped");
                        break;
                    }
                }
            }
        });

        Ok(MeterHandle {
            shutdown: shutdown_tx,
            task,
        })
    }
}

pub struct MeterHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl MeterHandle {
    pub async fn shutdown(self) {
        // The task may already be gone; either way we wait for it.
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            error!(error = %e, "Metering task ended abnormally");
        }
    }
}
