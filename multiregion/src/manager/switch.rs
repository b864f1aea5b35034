use embedded_hal::blocking::delay::DelayMs;
use embedded_storage::nor_flash::NorFlash;

use super::{Clock, MultiRegionManager};
use crate::{
    context::RegionContext,
    crypto::key_check_value,
    error::Error,
    geo::RegionIndex,
    lorawan::{
        mac::{ActivationType, MacStack, NvmContext, SessionKey},
        region::Region,
    },
};

const REINIT_SETTLE_MS: u32 = 100;
const CONFIGURE_SETTLE_MS: u32 = 50;
const START_SETTLE_MS: u32 = 200;
const PUMP_STEP_MS: u32 = 10;
const PUMP_ROUNDS: u32 = 10;
const BUSY_BACKOFF_MS: u32 = 500;
const EXTENDED_PUMP_ROUNDS: u32 = 20;

impl<'a, M, F, T, G> MultiRegionManager<'a, M, F, T, G>
where
    M: MacStack,
    F: NorFlash,
    T: DelayMs<u32> + Clock,
    G: RegionIndex,
{
    /// Resume the stored session of `region` on the live MAC as ABP.
    ///
    /// Switching to the live region is a no-op. The outgoing session is
    /// saved first. Once the MAC has been restarted a failed readback is
    /// only logged; a MAC that stays busy yields [`Error::MacBusy`] and
    /// leaves no live session.
    pub fn switch_to_region(&mut self, region: Region) -> Result<(), Error<M::Error>> {
        self.ensure_initialized()?;
        if self.live_region == Some(region) {
            debug!("Already on {}", region.name());
            return Ok(());
        }
        let slot = self.state.find_slot(region).ok_or(Error::SlotMissing(region))?;
        if !self.state.context(slot).is_some_and(RegionContext::crc_valid) {
            warn!("Stored {} session failed CRC", region.name());
            return Err(Error::IntegrityFault(region));
        }
        if self.mac.is_busy() {
            return Err(Error::MacBusy);
        }

        if let Some(outgoing) = self.live_region {
            if self.save_current_context().is_err() {
                warn!("Could not save outgoing {} session", outgoing.name());
            }
        }

        let slot = self.state.find_slot(region).ok_or(Error::SlotMissing(region))?;
        let ctx = self.state.context(slot).cloned().ok_or(Error::SlotMissing(region))?;

        info!("Switching to {} (slot {})", region.name(), slot);
        self.live_region = None;
        self.restore_session(region, &ctx)?;

        if !self.settle() {
            error!("MAC still busy after switch to {}", region.name());
            return Err(Error::MacBusy);
        }
        self.verify_session(&ctx);

        let now = self.timer.now_ms();
        if let Some(stored) = self.state.context_mut(slot) {
            stored.touch(now);
        }
        self.state.set_active_slot(Some(slot));
        self.live_region = Some(region);
        if self.commit().is_err() {
            warn!("Switch to {} not persisted", region.name());
        }

        info!("Switched to {}, FCntUp {}", region.name(), ctx.uplink_counter);
        Ok(())
    }

    /// Rebuild the MAC around a stored session. The order is fixed: each
    /// step overwrites whatever the previous one may have restored from the
    /// stack's own NVM.
    fn restore_session(&mut self, region: Region, ctx: &RegionContext) -> Result<(), Error<M::Error>> {
        debug!("Reinitializing stack for {}", region.name());
        self.mac.reinit(region).map_err(Error::Mac)?;
        self.timer.delay_ms(REINIT_SETTLE_MS);

        debug!("Configuring handler");
        self.mac.configure(region).map_err(Error::Mac)?;
        self.timer.delay_ms(CONFIGURE_SETTLE_MS);

        debug!("Injecting identity, DevAddr {:X}", ctx.dev_addr);
        self.mac.set_dev_eui(&ctx.dev_eui).map_err(Error::Mac)?;
        self.mac
            .set_session_keys(&ctx.app_s_key, &ctx.nwk_s_key)
            .map_err(Error::Mac)?;
        self.mac.set_dev_addr(ctx.dev_addr).map_err(Error::Mac)?;
        self.mac.set_activation(ActivationType::Abp).map_err(Error::Mac)?;

        match self.mac.nvm_context() {
            Some(nvm) => {
                debug!(
                    "Restoring counters FCntUp {} NFCntDown {}",
                    ctx.uplink_counter, ctx.downlink_counter
                );
                nvm.set_fcnt_up(ctx.uplink_counter);
                nvm.set_nfcnt_down(ctx.downlink_counter);
                nvm.set_last_rx_mic(ctx.last_rx_mic);
                nvm.set_network_activation(ActivationType::Abp);
                nvm.set_key(SessionKey::AppSKey, &ctx.app_s_key);
                for id in SessionKey::NETWORK {
                    nvm.set_key(id, &ctx.nwk_s_key);
                }
            }
            None => warn!("MAC has no NVM context, counters not restored"),
        }

        if let Some(mask) = region.channel_mask() {
            debug!("Applying channel mask {:?}", mask.banks());
            self.mac.set_channel_mask(&mask).map_err(Error::Mac)?;
            self.mac.set_default_channel_mask(&mask).map_err(Error::Mac)?;
        }
        self.mac
            .set_rx2(ctx.rx2_frequency, ctx.rx2_datarate)
            .map_err(Error::Mac)?;
        self.mac.set_datarate(ctx.datarate).map_err(Error::Mac)?;
        self.mac.set_adr(ctx.adr_enabled).map_err(Error::Mac)?;

        debug!("Starting MAC");
        self.mac.start().map_err(Error::Mac)?;
        self.timer.delay_ms(START_SETTLE_MS);

        // start may reload the address from NVM
        self.mac.set_dev_addr(ctx.dev_addr).map_err(Error::Mac)?;
        if self.mac.dev_addr() != ctx.dev_addr {
            warn!("DevAddr not accepted after start: {:X}", self.mac.dev_addr());
        }
        Ok(())
    }

    /// Pump the MAC until idle; `false` if it never gets there
    fn settle(&mut self) -> bool {
        self.pump_rounds(PUMP_ROUNDS);
        if !self.mac.is_busy() {
            return true;
        }
        warn!("MAC busy after switch, waiting longer");
        self.timer.delay_ms(BUSY_BACKOFF_MS);
        self.pump_rounds(EXTENDED_PUMP_ROUNDS);
        !self.mac.is_busy()
    }

    fn pump_rounds(&mut self, rounds: u32) {
        for _ in 0..rounds {
            self.mac.process();
            self.timer.delay_ms(PUMP_STEP_MS);
        }
    }

    /// Read identity back from the MAC and log any difference
    fn verify_session(&mut self, ctx: &RegionContext) {
        let dev_addr = self.mac.dev_addr();
        if dev_addr != ctx.dev_addr {
            warn!("DevAddr mismatch: MAC {:X}, stored {:X}", dev_addr, ctx.dev_addr);
        }

        let Some(nvm) = self.mac.nvm_context() else {
            return;
        };
        let app_s_key = nvm.key(SessionKey::AppSKey);
        let nwk_s_key = nvm.key(SessionKey::NwkSEncKey);
        if app_s_key != ctx.app_s_key {
            warn!(
                "AppSKey mismatch: MAC KCV {:?}, stored KCV {:?}",
                key_check_value(&app_s_key),
                key_check_value(&ctx.app_s_key)
            );
        }
        if nwk_s_key != ctx.nwk_s_key {
            warn!(
                "NwkSKey mismatch: MAC KCV {:?}, stored KCV {:?}",
                key_check_value(&nwk_s_key),
                key_check_value(&ctx.nwk_s_key)
            );
        }
    }
}
