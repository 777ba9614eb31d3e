//! # Remote Side
//!
//! The booted unit's half of the link. It finds the resource table the
//! controller published, learns its role from the ring placement, and
//! talks back over the shared notification channel.

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::notify::{NotificationChannel, Signal};
use crate::role::{Role, RoleCell};
use crate::rsc_table::{validate_header, ResourceTable, VringSpec};
use crate::{RprocError, RprocResult};

/// Remote-side view of a remote processor link
pub struct LocalProc {
    role: Role,
    table: ResourceTable,
    channel: Arc<NotificationChannel>,
}

impl LocalProc {
    /// Attach to the resource table in `table_bytes`.
    ///
    /// The role is fixed in `cell` from the first ring of the table; a
    /// table without rings makes this unit the controller. When the unit
    /// is the remote, `on_kick` is armed for the kicks it receives.
    pub fn attach<F>(
        table_bytes: &[u8],
        max_version: u32,
        channel: Arc<NotificationChannel>,
        cell: &RoleCell,
        on_kick: F,
    ) -> RprocResult<Self>
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        let header = validate_header(table_bytes, max_version)?;
        let table = ResourceTable::decode(table_bytes)?;

        log::info!(
            "rproc: resource table v{} with {} entries",
            header.version,
            header.entry_count
        );
        for vdev in table.vdevs() {
            for vring in &vdev.vrings {
                log::debug!(
                    "rproc: vring da {:#x} num {} notifyid {}",
                    vring.device_addr,
                    vring.buffer_count,
                    vring.notify_id
                );
            }
        }

        let probe = table.first_vring().copied().unwrap_or_default();
        let role = cell.determine(&probe);

        if role == Role::Remote {
            channel.register(Role::Remote, move |signal| match signal {
                Signal::Kick(vq) => on_kick(vq),
                Signal::BootAck => log::warn!("rproc: boot confirmation sent to the remote"),
            });
        }

        Ok(Self {
            role,
            table,
            channel,
        })
    }

    /// Role of this unit
    pub fn role(&self) -> Role {
        self.role
    }

    /// The table as attached
    pub fn table(&self) -> &ResourceTable {
        &self.table
    }

    /// Notification ids of every ring
    pub fn vring_notify_ids(&self) -> Vec<u32> {
        self.table
            .vdevs()
            .flat_map(|v| v.vrings.iter().map(|r: &VringSpec| r.notify_id))
            .collect()
    }

    fn require_remote(&self) -> RprocResult<()> {
        if self.role != Role::Remote {
            return Err(RprocError::RoleMismatch {
                expected: Role::Remote,
                actual: self.role,
            });
        }
        Ok(())
    }

    /// Tell the controller this unit finished booting.
    pub fn confirm_boot(&self) -> RprocResult<()> {
        self.require_remote()?;
        log::info!("rproc: sending boot confirmation");
        self.channel.signal(Role::Controller, Signal::BootAck);
        Ok(())
    }

    /// Tell the controller that virtqueue `vq` has work.
    pub fn kick(&self, vq: u32) -> RprocResult<()> {
        self.require_remote()?;
        log::debug!("rproc: kicking controller, vq {}", vq);
        self.channel.signal(Role::Controller, Signal::Kick(vq));
        Ok(())
    }
}

impl Drop for LocalProc {
    fn drop(&mut self) {
        if self.role == Role::Remote {
            self.channel.unregister(Role::Remote);
        }
    }
}

impl core::fmt::Debug for LocalProc {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LocalProc")
            .field("role", &self.role)
            .field("entries", &self.table.entries().len())
            .finish()
    }
}
