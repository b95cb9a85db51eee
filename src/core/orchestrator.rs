use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::core::catalog::ImageCatalog;
use crate::core::vm::{VirtualMachine, VmConfig, VmId, VmOperation, VmState};
use crate::errors::{FleetResult, ImageError, ResourceType, VmError};

// One lock per machine. `retired` flips under that lock when the machine is
// deleted, so anyone who grabbed the slot before removal sees it gone.
#[derive(Debug)]
struct VmSlot {
    vm: VirtualMachine,
    retired: bool,
}

type SharedSlot = Arc<Mutex<VmSlot>>;

/// Owns the VM inventory and enforces the lifecycle state machine.
///
/// The inventory lock is only held to find, insert or remove a slot; state
/// changes happen under the per-VM lock, so transitions on different machines
/// never contend.
pub struct VmOrchestrator {
    catalog: Arc<dyn ImageCatalog>,
    inventory: RwLock<BTreeMap<VmId, SharedSlot>>,
}

impl VmOrchestrator {
    pub fn new(catalog: Arc<dyn ImageCatalog>) -> Self {
        Self {
            catalog,
            inventory: RwLock::new(BTreeMap::new()),
        }
    }

    /// Provisions a VM from a catalog image. The machine starts out `STOPPED`.
    pub async fn create_vm(
        &self,
        os_image: &str,
        cpu_cores: u32,
        ram_gb: u32,
        storage_gb: u32,
    ) -> FleetResult<VirtualMachine> {
        if self.catalog.lookup(os_image).await.is_none() {
            warn!(image = %os_image, "VM creation rejected: unknown OS image");
            return Err(ImageError::NotFound { name: os_image.to_string() }.into());
        }

        for (resource_type, amount) in [
            (ResourceType::Cpu, cpu_cores),
            (ResourceType::Memory, ram_gb),
            (ResourceType::Storage, storage_gb),
        ] {
            if amount == 0 {
                warn!(image = %os_image, %resource_type, "VM creation rejected: empty allocation");
                return Err(VmError::InvalidResource { resource_type }.into());
            }
        }

        let config = VmConfig {
            os_image: os_image.to_string(),
            cpu_cores,
            ram_gb,
            storage_gb,
        };

        let mut inventory = self.inventory.write().await;
        let mut id = VmId::generate();
        while inventory.contains_key(&id) {
            id = VmId::generate();
        }

        let vm = VirtualMachine::new(id, config);
        inventory.insert(
            id,
            Arc::new(Mutex::new(VmSlot {
                vm: vm.clone(),
                retired: false,
            })),
        );

        info!(
            vm_id = %id,
            image = %vm.os_image,
            cpu_cores,
            ram_gb,
            storage_gb,
            "VM created"
        );
        Ok(vm)
    }

    pub async fn start_vm(&self, id: VmId) -> FleetResult<VirtualMachine> {
        self.transition(id, VmOperation::Start).await
    }

    pub async fn stop_vm(&self, id: VmId) -> FleetResult<VirtualMachine> {
        self.transition(id, VmOperation::Stop).await
    }

    pub async fn pause_vm(&self, id: VmId) -> FleetResult<VirtualMachine> {
        self.transition(id, VmOperation::Pause).await
    }

    /// Stop-then-start in a single critical section; the intermediate
    /// `STOPPED` is never observable.
    pub async fn restart_vm(&self, id: VmId) -> FleetResult<VirtualMachine> {
        self.transition(id, VmOperation::Restart).await
    }

    /// Forced teardown: allowed from any state. Returns the final snapshot.
    pub async fn delete_vm(&self, id: VmId) -> FleetResult<VirtualMachine> {
        let slot = self
            .inventory
            .write()
            .await
            .remove(&id)
            .ok_or(VmError::NotFound { vm_id: id })?;

        let mut slot = slot.lock().await;
        slot.retired = true;
        info!(vm_id = %id, state = %slot.vm.state, "VM deleted");
        Ok(slot.vm.clone())
    }

    pub async fn get_vm(&self, id: VmId) -> Option<VirtualMachine> {
        let slot = self.inventory.read().await.get(&id).cloned()?;
        let slot = slot.lock().await;
        debug!(vm_id = %id, retired = slot.retired, "VM lookup");
        (!slot.retired).then(|| slot.vm.clone())
    }

    /// Snapshots of every live VM, ordered by id.
    pub async fn list_vms(&self) -> Vec<VirtualMachine> {
        let slots: Vec<SharedSlot> = self.inventory.read().await.values().cloned().collect();

        let mut vms = Vec::with_capacity(slots.len());
        for slot in slots {
            let slot = slot.lock().await;
            if !slot.retired {
                vms.push(slot.vm.clone());
            }
        }
        vms
    }

    pub async fn count_by_state(&self) -> HashMap<VmState, usize> {
        let mut counts = HashMap::new();
        for vm in self.list_vms().await {
            *counts.entry(vm.state).or_insert(0) += 1;
        }
        counts
    }

    async fn slot(&self, id: VmId) -> FleetResult<SharedSlot> {
        self.inventory
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| VmError::NotFound { vm_id: id }.into())
    }

    async fn transition(&self, id: VmId, operation: VmOperation) -> FleetResult<VirtualMachine> {
        let slot = self.slot(id).await?;
        let mut slot = slot.lock().await;
        if slot.retired {
            return Err(VmError::NotFound { vm_id: id }.into());
        }

        let state = slot.vm.state;
        let Some(next) = state.apply(operation) else {
            warn!(vm_id = %id, %state, %operation, "Rejected illegal VM transition");
            return Err(VmError::InvalidTransition {
                vm_id: id,
                state,
                operation,
            }
            .into());
        };

        slot.vm.state = next;
        info!(vm_id = %id, from = %state, to = %next, %operation, "VM transitioned");
        Ok(slot.vm.clone())
    }
}
