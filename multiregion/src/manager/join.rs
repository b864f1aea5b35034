use embedded_hal::blocking::delay::DelayMs;
use embedded_storage::nor_flash::NorFlash;

use super::{live_identity, Clock, JoinAttempt, MultiRegionManager};
use crate::{
    context::RegionContext,
    error::Error,
    geo::RegionIndex,
    lorawan::{
        mac::{ActivationType, MacStack},
        region::Region,
    },
};

/// Port of the uplinks sent right after a join
const POST_JOIN_PORT: u8 = 2;
const POST_JOIN_PAYLOAD: [u8; 1] = [0x00];

impl<'a, M, F, T, G> MultiRegionManager<'a, M, F, T, G>
where
    M: MacStack,
    F: NorFlash,
    T: DelayMs<u32> + Clock,
    G: RegionIndex,
{
    /// Join `region` over the air, blocking until the join completes.
    ///
    /// Retries forever unless a timeout is configured or a cancel is
    /// requested through the event flags. On success the new session is
    /// stored and becomes active.
    pub fn join_region(&mut self, region: Region) -> Result<(), Error<M::Error>> {
        self.start_join(region)?;
        loop {
            match self.poll_join() {
                Ok(()) => return Ok(()),
                Err(nb::Error::Other(e)) => return Err(e),
                Err(nb::Error::WouldBlock) => self.timer.delay_ms(self.config.join.poll_interval_ms),
            }
        }
    }

    /// Prepare the MAC for `region` and send the first join request
    pub fn start_join(&mut self, region: Region) -> Result<(), Error<M::Error>> {
        self.ensure_initialized()?;
        if !region.is_managed() {
            return Err(Error::UnsupportedRegion(region));
        }
        let dev_eui = self
            .device
            .dev_eui(region)
            .ok_or(Error::NotProvisioned(region))?;

        if self.live_region.is_some() && self.save_current_context().is_err() {
            warn!("Could not save outgoing session before join");
        }

        info!("Joining {}", region.name());
        if self.mac.is_joined() || self.live_region.is_some() {
            self.mac.reinit(region).map_err(Error::Mac)?;
        } else {
            self.mac.set_active_region(region);
        }
        self.live_region = None;

        // a stale identity in the stack's own NVM must not come back
        self.mac.erase_nvm().map_err(Error::Mac)?;

        // configure may restore the DevEUI from NVM, so it is set on both sides
        self.mac.set_dev_eui(&dev_eui).map_err(Error::Mac)?;
        self.mac.configure(region).map_err(Error::Mac)?;
        self.mac.set_dev_eui(&dev_eui).map_err(Error::Mac)?;

        self.mac.set_join_eui(&self.device.join_eui).map_err(Error::Mac)?;
        self.mac.set_app_key(&self.device.app_key).map_err(Error::Mac)?;
        self.mac.set_nwk_key(&self.device.nwk_key).map_err(Error::Mac)?;

        self.flags.clear_join();
        self.flags.take_cancel();
        self.mac.join_otaa().map_err(Error::Mac)?;

        let now = self.timer.now_ms();
        self.join = Some(JoinAttempt {
            region,
            started_at: now,
            last_trigger: now,
        });
        Ok(())
    }

    /// Drive a join started with [`start_join`](Self::start_join).
    ///
    /// Runs the MAC once and returns `WouldBlock` until the join-complete
    /// flag is raised. The join request is re-sent every retrigger
    /// interval.
    pub fn poll_join(&mut self) -> nb::Result<(), Error<M::Error>> {
        let mut attempt = self.join.ok_or(nb::Error::Other(Error::JoinNotStarted))?;

        self.mac.process();

        if self.flags.join_succeeded() {
            self.join = None;
            return self.finish_join(attempt.region).map_err(nb::Error::Other);
        }

        if self.flags.take_cancel() {
            warn!("Join {} cancelled", attempt.region.name());
            self.join = None;
            return Err(nb::Error::Other(Error::JoinCancelled));
        }

        let now = self.timer.now_ms();
        let timing = self.config.join;
        if let Some(timeout) = timing.timeout_ms {
            if now.wrapping_sub(attempt.started_at) >= timeout {
                warn!("Join {} timed out", attempt.region.name());
                self.join = None;
                return Err(nb::Error::Other(Error::JoinTimeout));
            }
        }

        if now.wrapping_sub(attempt.last_trigger) >= timing.retrigger_interval_ms {
            debug!("Re-sending join request for {}", attempt.region.name());
            if self.mac.join_otaa().is_err() {
                warn!("Join request rejected, retrying later");
            }
            attempt.last_trigger = now;
            self.join = Some(attempt);
        }

        Err(nb::Error::WouldBlock)
    }

    /// Join every managed region in turn, then switch to the home region.
    ///
    /// Failures of individual regions are logged and skipped; a cancel
    /// stops the run. Returns the number of regions joined.
    pub fn pre_join_all_regions(&mut self) -> Result<usize, Error<M::Error>> {
        self.ensure_initialized()?;
        self.flags.set_prejoin(true);
        let result = self.pre_join_inner();
        self.flags.set_prejoin(false);
        result
    }

    fn pre_join_inner(&mut self) -> Result<usize, Error<M::Error>> {
        info!("Pre-joining {} regions", Region::MANAGED.len());
        self.mac.erase_nvm().map_err(Error::Mac)?;

        let mut joined = 0;
        for (i, region) in Region::MANAGED.into_iter().enumerate() {
            if i > 0 {
                self.timer.delay_ms(self.config.join.pre_join_gap_ms);
            }
            match self.join_region(region) {
                Ok(()) => joined += 1,
                Err(Error::JoinCancelled) => return Err(Error::JoinCancelled),
                Err(Error::NotProvisioned(_)) => {
                    warn!("{} has no DevEUI, skipping", region.name());
                }
                Err(_) => warn!("Pre-join of {} failed", region.name()),
            }
        }
        info!("Pre-join done, {} of {} regions joined", joined, Region::MANAGED.len());

        let home = self.config.home_region;
        if self.is_region_joined(home) {
            self.switch_to_region(home)?;
        } else {
            warn!("Home region {} not joined, staying put", home.name());
        }
        Ok(joined)
    }

    fn finish_join(&mut self, region: Region) -> Result<(), Error<M::Error>> {
        let timing = self.config.join;
        self.timer.delay_ms(timing.settle_ms);

        let dev_eui = self
            .device
            .dev_eui(region)
            .ok_or(Error::NotProvisioned(region))?;
        let identity = live_identity(&mut self.mac, dev_eui);
        let now = self.timer.now_ms();
        let mut ctx = RegionContext::provision(region, ActivationType::Otaa, identity, now);
        ctx.capture_from(&mut self.mac, now);

        let slot = self.state.allocate_slot(region, now).ok_or(Error::NoSlot)?;
        if let Some(stored) = self.state.context_mut(slot) {
            *stored = ctx;
        }
        self.state.set_active_slot(Some(slot));
        self.live_region = Some(region);
        info!("Joined {}, DevAddr {:X}, slot {}", region.name(), identity.dev_addr, slot);
        if self.commit().is_err() {
            warn!("Joined session not persisted yet");
        }

        // let the network push its MAC commands down
        for _ in 0..timing.post_join_uplinks {
            if self.mac.send_unconfirmed(POST_JOIN_PORT, &POST_JOIN_PAYLOAD).is_err() {
                warn!("Post-join uplink rejected");
            }
            self.pump(timing.uplink_gap_ms);
        }

        // the session is live either way; a later save retries the commit
        match self.save_current_context() {
            Err(Error::Store(_)) => {
                warn!("Post-join session not persisted yet");
                Ok(())
            }
            result => result,
        }
    }

    /// Run the MAC for `duration_ms`
    fn pump(&mut self, duration_ms: u32) {
        let step = self.config.join.poll_interval_ms.max(1);
        let mut elapsed = 0;
        while elapsed < duration_ms {
            self.mac.process();
            self.timer.delay_ms(step);
            elapsed += step;
        }
    }
}
