//! # Remote Processor Controller
//!
//! Controller-side lifecycle of one remote unit: load its firmware, hand it
//! a boot session, release it and wait for the acknowledgment, then kick it
//! while it runs.
//!
//! ## Boot Sequence
//!
//! 1. Claim the lifecycle (`Idle`/`Failed` -> `Starting`)
//! 2. Refuse units the host kernel already runs on
//! 3. Parse the image and validate its resource table
//! 4. Back carveouts and rings with DMA memory
//! 5. Load segments and publish the negotiated table
//! 6. Build boot parameters, command line and ramdisk
//! 7. Arm the confirmation handler and release the unit
//! 8. Wait for the acknowledgment or the timeout
//!
//! Any failure on the way returns every buffer acquired so far and leaves
//! the lifecycle in `Failed`.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::boot_params::{BootParams, BOOT_PARAMS_SIZE};
use crate::config::RprocConfig;
use crate::elf::{self, ParsedImage};
use crate::lifecycle::{BootSession, BufferKind, RprocState, StateCell};
use crate::loader::{load_segments, AddressTranslator};
use crate::locator::{find_loaded_resource_table, find_resource_table};
use crate::notify::{NotificationChannel, Signal};
use crate::platform::Platform;
use crate::role::{Role, RoleCell};
use crate::rsc_table::{vring_size, ResourceTable, VirtioStatus};
use crate::{RprocError, RprocResult};

/// Where the negotiated table lives in target memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LoadedTable {
    device_addr: u64,
    size: usize,
}

/// Controller for one remote unit
pub struct RemoteProc<P: Platform> {
    /// Tunables
    config: RprocConfig,
    /// Kernel capabilities
    platform: P,
    /// Link to the remote unit
    channel: Arc<NotificationChannel>,
    /// Lifecycle state, shared with the confirmation handler
    state: Arc<StateCell>,
    /// Buffers of the current boot, if any
    session: Option<BootSession>,
    /// Location of the published table
    loaded_table: Option<LoadedTable>,
}

fn to_u32(addr: u64, what: &'static str) -> RprocResult<u32> {
    u32::try_from(addr).map_err(|_| {
        log::error!("rproc: {} at {:#x} is beyond 32-bit reach", what, addr);
        RprocError::ResourceExhausted(what)
    })
}

impl<P: Platform> RemoteProc<P> {
    /// Create a controller.
    ///
    /// `role` must already say this unit is the controller.
    pub fn new(
        config: RprocConfig,
        platform: P,
        channel: Arc<NotificationChannel>,
        role: &RoleCell,
    ) -> RprocResult<Self> {
        config.validate()?;

        match role.get() {
            Some(Role::Controller) => {},
            Some(actual) => {
                return Err(RprocError::RoleMismatch {
                    expected: Role::Controller,
                    actual,
                })
            },
            None => return Err(RprocError::InvalidConfig("role not determined")),
        }

        Ok(Self {
            config,
            platform,
            channel,
            state: Arc::new(StateCell::new()),
            session: None,
            loaded_table: None,
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> RprocState {
        self.state.get()
    }

    /// Active configuration
    pub fn config(&self) -> &RprocConfig {
        &self.config
    }

    /// Platform capabilities
    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Notification channel shared with the remote unit
    pub fn channel(&self) -> &Arc<NotificationChannel> {
        &self.channel
    }

    /// Buffers of the running boot
    pub fn session(&self) -> Option<&BootSession> {
        self.session.as_ref()
    }

    /// Fetch the firmware blob `name` and [`start`](Self::start) it.
    pub fn start_firmware(&mut self, name: &str) -> RprocResult<()> {
        let firmware = self.platform.request_firmware(name).ok_or_else(|| {
            log::error!("rproc: request_firmware failed for \"{}\"", name);
            RprocError::FirmwareNotFound(name.into())
        })?;
        self.start(&firmware)
    }

    /// Boot the remote unit with `firmware`.
    ///
    /// Valid from `Idle`, or from `Failed` to retry. Returns once the
    /// remote acknowledged the boot or the confirmation timed out.
    pub fn start(&mut self, firmware: &[u8]) -> RprocResult<()> {
        let from = self.state.get();
        if !matches!(from, RprocState::Idle | RprocState::Failed) {
            return Err(RprocError::InvalidState {
                expected: RprocState::Idle,
                actual: from,
            });
        }
        self.state
            .transition(from, RprocState::Starting)
            .map_err(|actual| RprocError::InvalidState {
                expected: RprocState::Idle,
                actual,
            })?;

        let unit = self.config.boot_unit;
        log::info!(
            "rproc: powering up unit {}, params \"{}\"",
            unit,
            self.config.cmdline_override.as_deref().unwrap_or("")
        );

        let mut session = BootSession::new(unit);
        let outcome = self.boot(&mut session, firmware);

        match outcome {
            Ok(loaded_table) => {
                self.session = Some(session);
                self.loaded_table = loaded_table;
                self.arm_kick_handler();
                Ok(())
            },
            Err(err) => {
                // Confirmation and timeout settle Awaiting themselves
                if self.state.get() == RprocState::Starting {
                    let _ = self.state.transition(RprocState::Starting, RprocState::Failed);
                }
                // A failed attempt takes no further confirmations
                self.channel.unregister(Role::Controller);
                session.release(&self.platform);
                log::error!("rproc: boot of unit {} failed: {}", unit, err);
                Err(err)
            },
        }
    }

    /// Everything between claiming the lifecycle and the acknowledgment
    fn boot(&self, session: &mut BootSession, firmware: &[u8]) -> RprocResult<Option<LoadedTable>> {
        let unit = session.unit();
        if self.platform.is_present(unit) {
            log::error!("rproc: unit {} is used by this kernel", unit);
            return Err(RprocError::TargetBusy(unit));
        }

        let image = elf::parse(firmware)?;
        let max_version = self.config.max_fw_version;

        let mut table = match find_resource_table(&image, max_version)? {
            Some(location) => {
                let bytes = location
                    .bytes(&image)
                    .ok_or(RprocError::InvalidResourceTable("resource table truncated"))?;
                Some(ResourceTable::decode(bytes)?)
            },
            None => {
                log::debug!("rproc: firmware has no resource table");
                None
            },
        };

        if let Some(table) = table.as_mut() {
            self.handle_resources(session, table)?;
        }

        let stats = load_segments(&image, session)?;
        log::debug!("rproc: {}", stats);

        let loaded = match table {
            Some(table) => Some(self.publish_table(&image, session, &table)?),
            None => None,
        };

        let params_dma = self.prepare_boot_params(session)?;

        // Acknowledgments still queued belong to an earlier attempt
        self.channel.discard(Role::Controller);

        let completion = session.completion();
        let state = self.state.clone();
        self.channel.register(Role::Controller, move |signal| {
            if signal != Signal::BootAck {
                log::warn!("rproc: {:?} before boot confirmation", signal);
                return;
            }
            completion.store(true, Ordering::Release);
            match state.transition(RprocState::AwaitingConfirmation, RprocState::Running) {
                Ok(()) => log::info!("rproc: got a boot confirmation from remote"),
                Err(RprocState::Starting | RprocState::Running) => {},
                Err(actual) => log::warn!("rproc: late boot confirmation, unit is {}", actual),
            }
        });

        let entry = image.entry_point();
        if let Err(code) = self.platform.boot_remote(unit, entry, params_dma) {
            log::error!("rproc: failed to boot ({})", code);
            return Err(RprocError::BootFailed(code));
        }

        self.state
            .transition(RprocState::Starting, RprocState::AwaitingConfirmation)
            .map_err(|actual| RprocError::InvalidState {
                expected: RprocState::Starting,
                actual,
            })?;

        self.wait_for_confirmation(&session.completion())?;
        Ok(loaded)
    }

    /// Back carveouts and rings of `table` with DMA memory.
    fn handle_resources(&self, session: &mut BootSession, table: &mut ResourceTable) -> RprocResult<()> {
        for carveout in table.carveouts_mut() {
            let fixed = (!carveout.wants_any_address()).then_some(u64::from(carveout.device_addr));
            let buf = session.acquire(&self.platform, BufferKind::Carveout, carveout.length as usize, fixed)?;

            let dma = to_u32(buf.dma_addr(), "carveout")?;
            if carveout.wants_any_address() {
                carveout.device_addr = dma;
            }
            carveout.phys_addr = dma;

            log::info!(
                "rproc: carveout {} da {:#x} pa {:#x} len {:#x}",
                carveout.name().unwrap_or("?"),
                carveout.device_addr,
                carveout.phys_addr,
                carveout.length
            );
        }

        for vdev in table.vdevs_mut() {
            for vring in vdev.vrings.iter_mut().filter(|v| v.device_addr == 0) {
                let size = vring_size(vring.buffer_count, vring.alignment);
                let buf = session.acquire(&self.platform, BufferKind::Vring, size, None)?;
                vring.device_addr = to_u32(buf.dma_addr(), "vring")?;

                log::debug!(
                    "rproc: vring notifyid {} da {:#x} num {}",
                    vring.notify_id,
                    vring.device_addr,
                    vring.buffer_count
                );
            }
        }

        #[cfg(feature = "debug_loader")]
        for (offset, entry) in table.offsets().iter().zip(table.entries()) {
            log::trace!("rproc: rsc @{:#x}: {:?}", offset, entry);
        }

        Ok(())
    }

    /// Write `table` over its loaded copy so the remote sees our choices.
    fn publish_table(
        &self,
        image: &ParsedImage<'_>,
        session: &mut BootSession,
        table: &ResourceTable,
    ) -> RprocResult<LoadedTable> {
        let location = find_resource_table(image, self.config.max_fw_version)?
            .ok_or(RprocError::InvalidResourceTable("resource table vanished"))?;
        let dst = find_loaded_resource_table(image, self.config.max_fw_version, session)?
            .ok_or(RprocError::InvalidResourceTable("resource table vanished"))?;
        table.encode_into(dst)?;

        Ok(LoadedTable {
            device_addr: location.device_addr,
            size: location.size,
        })
    }

    /// Allocate and fill the boot parameters, command line and ramdisk.
    ///
    /// Returns the DMA address of the boot parameter block.
    fn prepare_boot_params(&self, session: &mut BootSession) -> RprocResult<u64> {
        let params = session.acquire(&self.platform, BufferKind::BootParams, BOOT_PARAMS_SIZE, None)?;
        let params_dma = params.dma_addr();
        BootParams::from_template(&mut params.buf.mem, self.platform.boot_params_template())?;

        let cmdline = self.config.cmdline();
        let buf = session.acquire(&self.platform, BufferKind::CmdLine, cmdline.len() + 1, None)?;
        buf.buf.mem[..cmdline.len()].copy_from_slice(cmdline.as_bytes());
        buf.buf.mem[cmdline.len()] = 0;
        let cmdline_dma = buf.dma_addr();

        let name = self.config.ramdisk_name.as_str();
        let ramdisk = self.platform.request_firmware(name).ok_or_else(|| {
            log::error!("rproc: request_firmware failed for \"{}\"", name);
            RprocError::FirmwareNotFound(name.into())
        })?;
        let buf = session.acquire(&self.platform, BufferKind::Ramdisk, ramdisk.len(), None)?;
        buf.buf.mem[..ramdisk.len()].copy_from_slice(&ramdisk);
        let ramdisk_dma = buf.dma_addr();

        let params = session
            .buffer_mut(BufferKind::BootParams)
            .ok_or(RprocError::InvalidBootParams)?;
        let mut bp = BootParams::new(&mut params.buf.mem)?;
        bp.set_cmdline_ptr(cmdline_dma);
        bp.set_ramdisk(ramdisk_dma, ramdisk.len() as u64);

        log::info!(
            "rproc: PAs: initrd {:#x}-{:#x} ({}b) cmdline {:#x}-{:#x} ({}b) boot_params {:#x}-{:#x} ({}b)",
            ramdisk_dma,
            ramdisk_dma + ramdisk.len() as u64,
            ramdisk.len(),
            cmdline_dma,
            cmdline_dma + cmdline.len() as u64,
            cmdline.len(),
            params_dma,
            params_dma + BOOT_PARAMS_SIZE as u64,
            BOOT_PARAMS_SIZE
        );
        log::info!("rproc: cmdline: {}", cmdline);

        Ok(params_dma)
    }

    /// Poll for the acknowledgment until the configured timeout.
    ///
    /// Pending controller signals are drained on every iteration, so the
    /// confirmation arrives even where no interrupt is wired up.
    fn wait_for_confirmation(&self, completion: &AtomicBool) -> RprocResult<()> {
        let timeout_us = self.config.boot_timeout_ms.saturating_mul(1000);
        let start = self.platform.now_us();

        loop {
            self.channel.handle_interrupt(Role::Controller);

            if completion.load(Ordering::Acquire) {
                // The handler may have run before the unit was awaiting
                match self
                    .state
                    .transition(RprocState::AwaitingConfirmation, RprocState::Running)
                {
                    Ok(()) => log::info!("rproc: got a boot confirmation from remote"),
                    Err(RprocState::Running) => {},
                    Err(actual) => {
                        return Err(RprocError::InvalidState {
                            expected: RprocState::AwaitingConfirmation,
                            actual,
                        })
                    },
                }
                return Ok(());
            }

            let elapsed = self.platform.now_us().saturating_sub(start);
            if elapsed > timeout_us {
                return match self
                    .state
                    .transition(RprocState::AwaitingConfirmation, RprocState::Failed)
                {
                    Ok(()) => {
                        log::error!("rproc: didn't get a boot confirmation from remote");
                        Err(RprocError::ConfirmationTimeout {
                            waited_ms: elapsed / 1000,
                        })
                    },
                    // Confirmation won the race
                    Err(RprocState::Running) => Ok(()),
                    Err(actual) => Err(RprocError::InvalidState {
                        expected: RprocState::AwaitingConfirmation,
                        actual,
                    }),
                };
            }

            self.platform.relax();
        }
    }

    /// Replace the confirmation handler with the steady-state one.
    fn arm_kick_handler(&self) {
        self.channel.register(Role::Controller, |signal| match signal {
            Signal::Kick(vq) => log::info!("rproc: got a kick from remote (vq {})", vq),
            Signal::BootAck => log::warn!("rproc: duplicate boot confirmation"),
        });

        if !self.channel.is_armed(Role::Controller) {
            log::warn!("rproc: failed to set the steady-state handler, kicks will be missed");
        }
    }

    /// Power the remote unit off and release its session.
    ///
    /// Valid from `Running` or `Failed`; a no-op from `Idle`.
    pub fn stop(&mut self) -> RprocResult<()> {
        let from = self.state.get();
        match from {
            RprocState::Idle => return Ok(()),
            RprocState::Running | RprocState::Failed => {},
            actual => {
                return Err(RprocError::InvalidState {
                    expected: RprocState::Running,
                    actual,
                })
            },
        }

        self.state
            .transition(from, RprocState::Stopping)
            .map_err(|actual| RprocError::InvalidState {
                expected: from,
                actual,
            })?;

        log::info!("rproc: powering off unit {}", self.config.boot_unit);

        self.channel.unregister(Role::Controller);
        self.loaded_table = None;
        if let Some(session) = self.session.take() {
            session.release(&self.platform);
        }

        self.state
            .transition(RprocState::Stopping, RprocState::Idle)
            .map_err(|actual| RprocError::InvalidState {
                expected: RprocState::Stopping,
                actual,
            })
    }

    /// Tell the remote unit that virtqueue `vq` has work.
    ///
    /// Fire-and-forget; valid only while `Running`.
    pub fn kick(&self, vq: u32) -> RprocResult<()> {
        let actual = self.state.get();
        if actual != RprocState::Running {
            return Err(RprocError::InvalidState {
                expected: RprocState::Running,
                actual,
            });
        }

        log::info!("rproc: kicking virtqueue id #{}", vq);
        self.channel.signal(Role::Remote, Signal::Kick(vq));
        Ok(())
    }

    /// Resolve the loaded table, or fail outside of an active boot.
    fn loaded_table_bytes(&mut self) -> RprocResult<Option<&mut [u8]>> {
        let actual = self.state.get();
        if !actual.is_active() {
            return Err(RprocError::InvalidState {
                expected: RprocState::Running,
                actual,
            });
        }

        let (location, session) = match (self.loaded_table, self.session.as_mut()) {
            (Some(location), Some(session)) => (location, session),
            _ => return Ok(None),
        };

        session
            .translate(location.device_addr, location.size)
            .map(Some)
            .ok_or(RprocError::UnmappableSegment {
                device_addr: location.device_addr,
                size: location.size as u64,
            })
    }

    /// Decode the table as the remote unit currently sees it.
    ///
    /// Returns `None` for firmware without a resource table.
    pub fn loaded_resource_table(&mut self) -> RprocResult<Option<ResourceTable>> {
        match self.loaded_table_bytes()? {
            Some(bytes) => ResourceTable::decode(bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Write `status` into every virtio device of the loaded table.
    pub fn publish_vdev_status(&mut self, status: VirtioStatus) -> RprocResult<()> {
        let bytes = match self.loaded_table_bytes()? {
            Some(bytes) => bytes,
            None => return Ok(()),
        };

        let mut table = ResourceTable::decode(bytes)?;
        for vdev in table.vdevs_mut() {
            vdev.status = status;
        }
        table.encode_into(bytes)
    }
}

impl<P: Platform> Drop for RemoteProc<P> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            log::warn!("rproc: controller dropped while unit {} is up", session.unit());
            self.channel.unregister(Role::Controller);
            session.release(&self.platform);
        }
    }
}

impl<P: Platform> core::fmt::Debug for RemoteProc<P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RemoteProc")
            .field("unit", &self.config.boot_unit)
            .field("state", &self.state.get())
            .field("session", &self.session)
            .finish()
    }
}
