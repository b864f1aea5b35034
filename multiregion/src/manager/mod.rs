//! Multi-region session manager
//!
//! Keeps one LoRaWAN session per region in flash and moves the live MAC
//! between them:
//! - [`MultiRegionManager::join_region`] acquires a session over the air
//! - [`MultiRegionManager::switch_to_region`] resumes a stored session as ABP
//! - [`MultiRegionManager::auto_switch_for_location`] picks the region for a GPS fix

use core::sync::atomic::{AtomicBool, Ordering};

use embedded_hal::blocking::delay::DelayMs;
use embedded_storage::nor_flash::NorFlash;

use crate::{
    config::{DevAddr, DeviceConfig, ManagerConfig, EUI64},
    context::{RegionContext, SessionIdentity},
    crypto::{key_check_value, KCV_SIZE},
    error::{Error, StoreError},
    geo::{self, RegionIndex},
    lorawan::{
        mac::{ActivationType, MacStack, NvmContext, SessionKey},
        region::Region,
    },
    store::{FlashStore, LoadStatus, SessionStore, MAX_CONTEXTS},
};

mod join;
mod switch;

/// Millisecond tick source
pub trait Clock {
    /// Milliseconds since an arbitrary epoch, wrapping
    fn now_ms(&self) -> u32;
}

/// Flags shared between interrupt context and the manager
///
/// The MAC's join-complete callback calls [`EventFlags::on_join_result`];
/// the application's uplink timer checks [`EventFlags::in_prejoin`].
#[derive(Debug, Default)]
pub struct EventFlags {
    join_success: AtomicBool,
    in_prejoin: AtomicBool,
    cancel: AtomicBool,
}

impl EventFlags {
    /// All flags clear
    pub const fn new() -> Self {
        Self {
            join_success: AtomicBool::new(false),
            in_prejoin: AtomicBool::new(false),
            cancel: AtomicBool::new(false),
        }
    }

    /// Join-complete callback
    pub fn on_join_result(&self, success: bool) {
        if success {
            self.join_success.store(true, Ordering::Release);
        }
    }

    /// Whether a join completed since the last clear
    pub fn join_succeeded(&self) -> bool {
        self.join_success.load(Ordering::Acquire)
    }

    pub(crate) fn clear_join(&self) {
        self.join_success.store(false, Ordering::Release);
    }

    /// Whether all regions are being pre-joined; periodic uplinks must hold off
    pub fn in_prejoin(&self) -> bool {
        self.in_prejoin.load(Ordering::Acquire)
    }

    pub(crate) fn set_prejoin(&self, active: bool) {
        self.in_prejoin.store(active, Ordering::Release);
    }

    /// Ask a running join to give up
    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    /// Consume a pending cancel request
    pub(crate) fn take_cancel(&self) -> bool {
        self.cancel.swap(false, Ordering::AcqRel)
    }
}

/// Slot usage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Number of slots
    pub total: usize,
    /// Slots holding a valid session
    pub used: usize,
}

/// Session summary printed for network server provisioning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKeyReport {
    /// Active region
    pub region: Region,
    /// Device EUI used in the region
    pub dev_eui: EUI64,
    /// Device address
    pub dev_addr: DevAddr,
    /// Key check value of the AppSKey
    pub app_s_key_kcv: [u8; KCV_SIZE],
    /// Key check value of the NwkSKey
    pub nwk_s_key_kcv: [u8; KCV_SIZE],
    /// Uplink frame counter
    pub uplink_counter: u32,
    /// Downlink frame counter
    pub downlink_counter: u32,
}

#[derive(Debug, Clone, Copy)]
struct JoinAttempt {
    region: Region,
    started_at: u32,
    last_trigger: u32,
}

/// Multi-region session manager
///
/// Owns the MAC stack handle, the store flash, a timer and the geospatial
/// index. All operations are blocking and must be called from one context.
pub struct MultiRegionManager<'a, M, F, T, G>
where
    M: MacStack,
    F: NorFlash,
    T: DelayMs<u32> + Clock,
    G: RegionIndex,
{
    mac: M,
    store: FlashStore<F>,
    timer: T,
    geo: G,
    flags: &'a EventFlags,
    device: DeviceConfig,
    config: ManagerConfig,
    state: SessionStore,
    initialized: bool,
    /// Region whose session the MAC is running right now
    live_region: Option<Region>,
    join: Option<JoinAttempt>,
}

impl<'a, M, F, T, G> MultiRegionManager<'a, M, F, T, G>
where
    M: MacStack,
    F: NorFlash,
    T: DelayMs<u32> + Clock,
    G: RegionIndex,
{
    /// Create a manager; the store page is `config.store_offset` in `flash`
    pub fn new(
        mac: M,
        flash: F,
        timer: T,
        geo: G,
        flags: &'a EventFlags,
        device: DeviceConfig,
        config: ManagerConfig,
    ) -> Result<Self, StoreError> {
        let store = FlashStore::new(flash, config.store_offset)?;
        Ok(Self {
            mac,
            store,
            timer,
            geo,
            flags,
            device,
            config,
            state: SessionStore::new(),
            initialized: false,
            live_region: None,
            join: None,
        })
    }

    /// Load the session store. Runs once; later calls do nothing.
    ///
    /// A missing or unreadable store is replaced by a fresh one. A store
    /// with a damaged image keeps its intact records and is written back.
    pub fn init(&mut self) {
        if self.initialized {
            return;
        }
        info!("Initializing multi-region session manager");

        let rewrite = match self.store.load() {
            Ok(Some((state, LoadStatus::Intact))) => {
                self.state = state;
                false
            }
            Ok(Some((state, LoadStatus::Salvaged { dropped }))) => {
                warn!("Recovered session store, {} records lost", dropped);
                self.state = state;
                true
            }
            Ok(None) => {
                info!("No session store found, starting fresh");
                self.state = SessionStore::new();
                true
            }
            Err(_) => {
                error!("Session store read failed, starting fresh");
                self.state = SessionStore::new();
                true
            }
        };
        if rewrite {
            // fresh in-memory state stays usable; the next commit retries
            let _ = self.commit();
        }

        self.initialized = true;
        info!(
            "Session manager ready: {} of {} slots used",
            self.state.num_valid(),
            MAX_CONTEXTS
        );
    }

    /// Whether `init` has run
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Region of the active slot
    pub fn active_region(&self) -> Option<Region> {
        self.state.active_region()
    }

    /// Region whose session the MAC is running, `None` until a join or
    /// switch has completed since boot
    pub fn live_region(&self) -> Option<Region> {
        self.live_region
    }

    /// Whether a valid session is stored for `region`
    pub fn is_region_joined(&self, region: Region) -> bool {
        self.state
            .find_slot(region)
            .and_then(|slot| self.state.context(slot))
            .is_some_and(RegionContext::is_valid)
    }

    /// Capture the live session into its slot and persist the store
    pub fn save_current_context(&mut self) -> Result<(), Error<M::Error>> {
        self.ensure_initialized()?;
        let region = self.live_region.ok_or(Error::NotJoined)?;
        let now = self.timer.now_ms();

        let slot = self.state.allocate_slot(region, now).ok_or(Error::NoSlot)?;
        let ctx = self.state.context_mut(slot).ok_or(Error::NoSlot)?;
        if !ctx.is_populated() {
            // slot was just allocated; identity comes from the running MAC once
            let dev_eui = self
                .device
                .dev_eui(region)
                .ok_or(Error::NotProvisioned(region))?;
            let identity = live_identity(&mut self.mac, dev_eui);
            *ctx = RegionContext::provision(region, ActivationType::Abp, identity, now);
        }
        ctx.capture_from(&mut self.mac, now);
        let (up, down) = (ctx.uplink_counter, ctx.downlink_counter);

        self.state.set_active_slot(Some(slot));
        self.commit()?;
        debug!("Saved {} session (FCntUp {}, FCntDown {})", region.name(), up, down);
        Ok(())
    }

    /// Capture the live session, if any, and persist every slot
    pub fn save_all_contexts(&mut self) -> Result<(), Error<M::Error>> {
        self.ensure_initialized()?;
        if self.live_region.is_some() {
            return self.save_current_context();
        }
        self.commit()?;
        Ok(())
    }

    /// Reload the store from flash, discarding unsaved changes
    pub fn restore_contexts(&mut self) -> Result<(), Error<M::Error>> {
        self.ensure_initialized()?;
        match self.store.load()? {
            Some((state, status)) => {
                self.state = state;
                if let LoadStatus::Salvaged { dropped } = status {
                    warn!("Restored damaged session store, {} records lost", dropped);
                    self.commit()?;
                }
            }
            None => {
                warn!("No session store on flash, resetting");
                self.state = SessionStore::new();
            }
        }
        if self.live_region.is_some_and(|r| self.state.find_slot(r).is_none()) {
            self.live_region = None;
        }
        info!("Restored {} sessions", self.state.num_valid());
        Ok(())
    }

    /// Slot usage
    pub fn stats(&self) -> Stats {
        Stats {
            total: MAX_CONTEXTS,
            used: self.state.num_valid(),
        }
    }

    /// Empty every slot and persist
    pub fn clear_all_contexts(&mut self) -> Result<(), Error<M::Error>> {
        self.ensure_initialized()?;
        self.state.clear_all();
        self.live_region = None;
        self.commit()?;
        info!("All sessions cleared");
        Ok(())
    }

    /// Store an ABP session provisioned on the network server.
    ///
    /// Radio parameters start from the region's defaults; the DevEUI is
    /// the one configured for the region.
    pub fn initialize_region_from_chirpstack(
        &mut self,
        region: Region,
        dev_addr: DevAddr,
        app_s_key: &[u8],
        nwk_s_key: &[u8],
    ) -> Result<(), Error<M::Error>> {
        self.ensure_initialized()?;
        if !region.is_managed() {
            return Err(Error::UnsupportedRegion(region));
        }
        let app_s_key: [u8; 16] = app_s_key.try_into().map_err(|_| Error::InvalidKey)?;
        let nwk_s_key: [u8; 16] = nwk_s_key.try_into().map_err(|_| Error::InvalidKey)?;
        if dev_addr == 0 || dev_addr == u32::MAX {
            return Err(Error::InvalidDevAddr);
        }
        let dev_eui = self
            .device
            .dev_eui(region)
            .ok_or(Error::NotProvisioned(region))?;

        let now = self.timer.now_ms();
        let slot = self.state.allocate_slot(region, now).ok_or(Error::NoSlot)?;
        let identity = SessionIdentity {
            dev_eui,
            dev_addr,
            app_s_key,
            nwk_s_key,
        };
        let ctx = RegionContext::provision(region, ActivationType::Abp, identity, now);
        if let Some(stored) = self.state.context_mut(slot) {
            *stored = ctx;
        }
        if self.live_region == Some(region) {
            // the MAC still runs the replaced session
            self.live_region = None;
        }

        self.commit()?;
        info!("Imported {} session into slot {}, DevAddr {:X}", region.name(), slot, dev_addr);
        Ok(())
    }

    /// Log the active session's identity for network server setup.
    ///
    /// Keys are printed as check values; the raw keys are printed too with
    /// the `display-keys` feature.
    pub fn display_session_keys(&self) -> Result<SessionKeyReport, Error<M::Error>> {
        self.ensure_initialized()?;
        let ctx = self
            .state
            .active_slot()
            .and_then(|slot| self.state.context(slot))
            .ok_or(Error::NoActiveRegion)?;
        let region = ctx.region.ok_or(Error::NoActiveRegion)?;

        let report = SessionKeyReport {
            region,
            dev_eui: ctx.dev_eui,
            dev_addr: ctx.dev_addr,
            app_s_key_kcv: key_check_value(&ctx.app_s_key),
            nwk_s_key_kcv: key_check_value(&ctx.nwk_s_key),
            uplink_counter: ctx.uplink_counter,
            downlink_counter: ctx.downlink_counter,
        };

        info!("Session keys for {}", region.name());
        info!("  DevEUI  {:?}", report.dev_eui);
        info!("  DevAddr {:X}", report.dev_addr);
        info!("  AppSKey KCV {:?}", report.app_s_key_kcv);
        info!("  NwkSKey KCV {:?}", report.nwk_s_key_kcv);
        info!("  FCntUp {} FCntDown {}", report.uplink_counter, report.downlink_counter);
        #[cfg(feature = "display-keys")]
        {
            info!("  AppSKey {}", hex::<32>(&ctx.app_s_key).as_str());
            info!("  NwkSKey {}", hex::<32>(&ctx.nwk_s_key).as_str());
        }

        Ok(report)
    }

    /// Move to the region a GPS fix falls in.
    ///
    /// Does nothing unless auto-switch is enabled. Fixes that point at the
    /// live region, or at a region without a stored session, succeed
    /// without touching the MAC.
    pub fn auto_switch_for_location(&mut self, lat: f32, lon: f32) -> Result<(), Error<M::Error>> {
        if !self.config.auto_switch {
            return Ok(());
        }
        self.ensure_initialized()?;
        if !geo::valid_coordinates(lat, lon) {
            return Err(Error::InvalidCoordinates);
        }

        let current = self.live_region.or(self.state.active_region());
        let Some(target) = geo::detect_region(&self.geo, &self.config.geo, lat, lon, current) else {
            return Ok(());
        };
        if Some(target) == self.live_region {
            return Ok(());
        }
        if !self.is_region_joined(target) {
            info!("Location suggests {}, but no session stored", target.name());
            return Ok(());
        }

        info!("Location suggests switch to {}", target.name());
        self.switch_to_region(target)
    }

    /// The in-memory session store
    pub fn sessions(&self) -> &SessionStore {
        &self.state
    }

    /// Event flags shared with the MAC callbacks
    pub fn flags(&self) -> &'a EventFlags {
        self.flags
    }

    /// MAC stack handle
    pub fn mac(&self) -> &M {
        &self.mac
    }

    /// Mutable MAC stack handle, for the application's own uplinks
    pub fn mac_mut(&mut self) -> &mut M {
        &mut self.mac
    }

    /// Timer
    pub fn timer(&self) -> &T {
        &self.timer
    }

    /// Give back the MAC, flash, timer and index
    pub fn into_parts(self) -> (M, F, T, G) {
        (self.mac, self.store.release(), self.timer, self.geo)
    }

    fn ensure_initialized(&self) -> Result<(), Error<M::Error>> {
        if self.initialized {
            Ok(())
        } else {
            Err(Error::NotInitialized)
        }
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.store.commit(&self.state).map_err(|e| {
            error!("Session store commit failed");
            e
        })
    }
}

/// Identity of the session the MAC is running
fn live_identity<M: MacStack>(mac: &mut M, dev_eui: EUI64) -> SessionIdentity {
    let dev_addr = mac.dev_addr();
    let (app_s_key, nwk_s_key) = match mac.nvm_context() {
        Some(nvm) => (nvm.key(SessionKey::AppSKey), nvm.key(SessionKey::NwkSEncKey)),
        None => {
            warn!("MAC has no NVM context, session keys unknown");
            ([0; 16], [0; 16])
        }
    };
    SessionIdentity {
        dev_eui,
        dev_addr,
        app_s_key,
        nwk_s_key,
    }
}

#[cfg(feature = "display-keys")]
fn hex<const N: usize>(bytes: &[u8]) -> heapless::String<N> {
    use core::fmt::Write;

    let mut out = heapless::String::new();
    for b in bytes {
        let _ = write!(out, "{:02X}", b);
    }
    out
}
