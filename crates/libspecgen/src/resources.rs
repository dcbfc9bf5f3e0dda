//! Cgroup resource limits.
//!
//! Every limit is optional and only emitted when set. [`ResourcePlan`]
//! remembers whether anything was set at all, since a rootless container on
//! a host without the unified hierarchy cannot have limits enforced.

use oci_spec::runtime::{
    LinuxBlockIo, LinuxCpu, LinuxCpuBuilder, LinuxDeviceCgroup, LinuxMemory, LinuxMemoryBuilder,
    LinuxPids, LinuxPidsBuilder, LinuxResources, LinuxResourcesBuilder,
};
use oci_spec::OciSpecError;

use crate::config::Resources;

/// Scheduler period the `cpus` convenience value is expressed against.
pub const CPU_PERIOD: u64 = 100000;

#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("invalid configuration, cannot set resources with rootless containers not using cgroups v2 unified mode")]
    RootlessWithoutUnified,
    #[error(transparent)]
    OciSpec(#[from] OciSpecError),
}

type Result<T> = std::result::Result<T, ResourceError>;

#[derive(Debug, Clone, Default)]
pub(crate) struct ResourcePlan {
    pub memory: Option<LinuxMemory>,
    pub cpu: Option<LinuxCpu>,
    pub pids: Option<LinuxPids>,
    pub block_io: Option<LinuxBlockIo>,
    /// Whether any limit was requested.
    pub added: bool,
}

impl ResourcePlan {
    pub fn from_config(resources: &Resources) -> Result<Self> {
        let mut plan = ResourcePlan::default();
        plan.memory = plan.memory_limits(resources)?;
        plan.cpu = plan.cpu_limits(resources)?;
        if resources.pids_limit != 0 {
            plan.pids = Some(LinuxPidsBuilder::default().limit(resources.pids_limit).build()?);
            plan.added = true;
        }
        Ok(plan)
    }

    fn memory_limits(&mut self, resources: &Resources) -> Result<Option<LinuxMemory>> {
        let mut memory = LinuxMemoryBuilder::default();
        let mut any = false;

        if resources.memory != 0 {
            memory = memory.limit(resources.memory);
            if resources.memory_swap == 0 {
                memory = memory.swap(resources.memory.saturating_mul(2));
            }
            self.added = true;
            any = true;
        }
        if resources.memory_reservation != 0 {
            memory = memory.reservation(resources.memory_reservation);
            self.added = true;
            any = true;
        }
        if resources.memory_swap != 0 {
            memory = memory.swap(resources.memory_swap);
            self.added = true;
            any = true;
        }
        if resources.kernel_memory != 0 {
            memory = memory.kernel(resources.kernel_memory);
            self.added = true;
            any = true;
        }
        if let Ok(swappiness) = u64::try_from(resources.memory_swappiness) {
            memory = memory.swappiness(swappiness);
            self.added = true;
            any = true;
        }
        if resources.disable_oom_killer {
            memory = memory.disable_oom_killer(true);
            any = true;
        }

        Ok(if any { Some(memory.build()?) } else { None })
    }

    fn cpu_limits(&mut self, resources: &Resources) -> Result<Option<LinuxCpu>> {
        let mut cpu = LinuxCpuBuilder::default();
        let mut any = false;

        if resources.cpu_shares != 0 {
            cpu = cpu.shares(resources.cpu_shares);
            any = true;
        }
        if resources.cpu_quota != 0 {
            cpu = cpu.quota(resources.cpu_quota);
            any = true;
        }
        if resources.cpu_period != 0 {
            cpu = cpu.period(resources.cpu_period);
            any = true;
        }
        if resources.cpus != 0.0 {
            cpu = cpu
                .period(CPU_PERIOD)
                .quota((resources.cpus * CPU_PERIOD as f64) as i64);
            any = true;
        }
        if resources.cpu_rt_runtime != 0 {
            cpu = cpu.realtime_runtime(resources.cpu_rt_runtime);
            any = true;
        }
        if resources.cpu_rt_period != 0 {
            cpu = cpu.realtime_period(resources.cpu_rt_period);
            any = true;
        }
        if !resources.cpuset_cpus.is_empty() {
            cpu = cpu.cpus(resources.cpuset_cpus.clone());
            any = true;
        }
        if !resources.cpuset_mems.is_empty() {
            cpu = cpu.mems(resources.cpuset_mems.clone());
            any = true;
        }

        if !any {
            return Ok(None);
        }
        self.added = true;
        Ok(Some(cpu.build()?))
    }

    pub fn set_block_io(&mut self, block_io: Option<LinuxBlockIo>) {
        if block_io.is_some() {
            self.added = true;
        }
        self.block_io = block_io;
    }

    /// Builds the resources block. `rootless_unified` is `Some` for rootless
    /// callers and tells whether the host runs the unified hierarchy.
    pub fn into_resources(
        self,
        device_rules: Vec<LinuxDeviceCgroup>,
        rootless_unified: Option<bool>,
    ) -> Result<LinuxResources> {
        if let Some(unified) = rootless_unified {
            tracing::debug!(unified, added = self.added, "rootless cgroup check");
            if !unified {
                if self.added {
                    return Err(ResourceError::RootlessWithoutUnified);
                }
                return Ok(LinuxResources::default());
            }
        }

        let mut builder = LinuxResourcesBuilder::default().devices(device_rules);
        if let Some(memory) = self.memory {
            builder = builder.memory(memory);
        }
        if let Some(cpu) = self.cpu {
            builder = builder.cpu(cpu);
        }
        if let Some(pids) = self.pids {
            builder = builder.pids(pids);
        }
        if let Some(block_io) = self.block_io {
            builder = builder.block_io(block_io);
        }
        Ok(builder.build()?)
    }
}
