use multiregion::{
    config::{DeviceConfig, ManagerConfig},
    context::{RegionContext, SessionIdentity},
    lorawan::{
        mac::{ActivationType, NvmContext, SessionKey},
        region::Region,
    },
    manager::{EventFlags, MultiRegionManager},
    store::{FlashStore, SessionStore},
    Error,
};
use pretty_assertions::assert_eq;

use mock::{
    dev_eui, fresh, manager, manager_config, BoxIndex, MockFlash, MockMac, MockTimer, Op, TestManager,
    APP_KEY, FLASH_PAGES, JOIN_EUI, NWK_KEY, STORE_OFFSET,
};

fn stored(m: &TestManager<'_>, region: Region) -> RegionContext {
    let slot = m.sessions().find_slot(region).unwrap();
    m.sessions().context(slot).unwrap().clone()
}

fn with_timeout(flags: &EventFlags, timeout_ms: u32) -> TestManager<'_> {
    let mut config = manager_config();
    config.join.timeout_ms = Some(timeout_ms);
    let mut m = manager(flags, MockFlash::new(FLASH_PAGES), config);
    m.init();
    m.mac_mut().join_after_polls = None;
    m
}

#[test]
fn join_stores_otaa_session() {
    let flags = EventFlags::new();
    let mut m = fresh(&flags);

    m.join_region(Region::US915).unwrap();

    assert!(m.is_region_joined(Region::US915));
    assert_eq!(m.active_region(), Some(Region::US915));
    assert_eq!(m.live_region(), Some(Region::US915));

    let ctx = stored(&m, Region::US915);
    assert_eq!(ctx.activation, ActivationType::Otaa);
    assert_eq!(ctx.dev_eui, dev_eui(Region::US915));
    assert_eq!(ctx.dev_addr, m.mac().dev_addr);
    assert_eq!(ctx.app_s_key, m.mac().nvm.key(SessionKey::AppSKey));
    assert_eq!(ctx.nwk_s_key, m.mac().nvm.key(SessionKey::NwkSEncKey));
    assert_eq!(ctx.uplink_counter, 2);
    assert!(ctx.is_valid());
}

#[test]
fn join_sends_two_post_join_uplinks() {
    let flags = EventFlags::new();
    let mut m = fresh(&flags);
    m.join_region(Region::EU868).unwrap();

    let ports: Vec<u8> = m.mac().uplinks.iter().map(|(port, _)| *port).collect();
    assert_eq!(ports, vec![2, 2]);
}

#[test]
fn join_programs_identity_around_configure() {
    let flags = EventFlags::new();
    let mut m = fresh(&flags);
    m.join_region(Region::US915).unwrap();

    let eui = dev_eui(Region::US915);
    assert_eq!(
        &m.mac().ops[..9],
        &[
            Op::SetActiveRegion(Region::US915),
            Op::EraseNvm,
            Op::SetDevEui(eui),
            Op::Configure(Region::US915),
            Op::SetDevEui(eui),
            Op::SetJoinEui,
            Op::SetAppKey,
            Op::SetNwkKey,
            Op::JoinOtaa,
        ]
    );
    assert_eq!(m.mac().join_eui, JOIN_EUI);
    assert_eq!(m.mac().app_key, APP_KEY);
    assert_eq!(m.mac().nwk_key, NWK_KEY);
}

#[test]
fn joining_second_region_reinitializes_and_keeps_first() {
    let flags = EventFlags::new();
    let mut m = fresh(&flags);
    m.join_region(Region::US915).unwrap();
    let us = stored(&m, Region::US915);

    m.join_region(Region::EU868).unwrap();

    assert!(m.mac().position(Op::Reinit(Region::EU868)).is_some());
    assert!(m.mac().position(Op::SetActiveRegion(Region::EU868)).is_none());
    assert_eq!(m.mac().join_dev_euis.last(), Some(&dev_eui(Region::EU868)));

    assert_eq!(stored(&m, Region::US915).dev_addr, us.dev_addr);
    assert_eq!(stored(&m, Region::US915).app_s_key, us.app_s_key);
    assert_ne!(stored(&m, Region::EU868).dev_addr, us.dev_addr);
    assert_eq!(m.stats().used, 2);
    assert_eq!(m.active_region(), Some(Region::EU868));
}

#[test]
fn join_request_is_resent_until_timeout() {
    let flags = EventFlags::new();
    let mut m = with_timeout(&flags, 65_000);

    assert_eq!(m.join_region(Region::US915), Err(Error::JoinTimeout));
    // t = 0, 30 s and 60 s
    assert_eq!(m.mac().join_requests, 3);
    assert!(!m.is_region_joined(Region::US915));
    assert_eq!(m.live_region(), None);
}

#[test]
fn cancel_stops_a_running_join() {
    let flags = EventFlags::new();
    let mut m = fresh(&flags);
    m.mac_mut().join_after_polls = None;

    m.start_join(Region::AS923).unwrap();
    assert_eq!(m.poll_join(), Err(nb::Error::WouldBlock));

    flags.request_cancel();
    assert_eq!(m.poll_join(), Err(nb::Error::Other(Error::JoinCancelled)));
    assert_eq!(m.poll_join(), Err(nb::Error::Other(Error::JoinNotStarted)));
    assert!(!m.is_region_joined(Region::AS923));
}

#[test]
fn poll_join_without_start() {
    let flags = EventFlags::new();
    let mut m = fresh(&flags);
    assert_eq!(m.poll_join(), Err(nb::Error::Other(Error::JoinNotStarted)));
}

#[test]
fn non_blocking_join_completes_on_flag() {
    let flags = EventFlags::new();
    let mut m = fresh(&flags);

    m.start_join(Region::KR920).unwrap();
    let mut waits = 0;
    loop {
        match m.poll_join() {
            Ok(()) => break,
            Err(nb::Error::WouldBlock) => waits += 1,
            Err(nb::Error::Other(e)) => panic!("join failed: {:?}", e),
        }
    }
    // the simulated network accepts on the third process call
    assert_eq!(waits, 2);
    assert!(flags.join_succeeded());
    assert!(m.is_region_joined(Region::KR920));
}

#[test]
fn join_rejects_unmanaged_region() {
    let flags = EventFlags::new();
    let mut m = fresh(&flags);
    assert_eq!(
        m.join_region(Region::RU864),
        Err(Error::UnsupportedRegion(Region::RU864))
    );
    assert_eq!(m.mac().mutations(), 0);
}

#[test]
fn join_requires_region_dev_eui() {
    let flags = EventFlags::new();
    let device = DeviceConfig::new(JOIN_EUI, APP_KEY, NWK_KEY).with_dev_eui(Region::US915, dev_eui(Region::US915));
    let mut m = MultiRegionManager::new(
        MockMac::new(&flags),
        MockFlash::new(FLASH_PAGES),
        MockTimer::new(),
        BoxIndex::world(),
        &flags,
        device,
        manager_config(),
    )
    .unwrap();
    m.init();

    assert_eq!(
        m.join_region(Region::KR920),
        Err(Error::NotProvisioned(Region::KR920))
    );
    assert_eq!(m.mac().mutations(), 0);
}

#[test]
fn pre_join_covers_every_region_and_returns_home() {
    let flags = EventFlags::new();
    let mut m = fresh(&flags);

    assert_eq!(m.pre_join_all_regions(), Ok(6));

    assert_eq!(m.stats().used, 6);
    for region in Region::MANAGED {
        assert!(m.is_region_joined(region), "{} not joined", region);
    }
    assert_eq!(m.mac().join_dev_euis, Region::MANAGED.map(dev_eui).to_vec());
    assert_eq!(m.mac().prejoin_requests, 6);
    assert!(!flags.in_prejoin());

    assert_eq!(m.active_region(), Some(Region::US915));
    assert_eq!(m.live_region(), Some(Region::US915));
    assert_eq!(m.mac().dev_addr, stored(&m, Region::US915).dev_addr);
}

#[test]
fn pre_join_survives_failed_regions() {
    let flags = EventFlags::new();
    let mut m = with_timeout(&flags, 1_000);

    assert_eq!(m.pre_join_all_regions(), Ok(0));
    assert_eq!(m.stats().used, 0);
    assert_eq!(m.mac().join_requests, 6);
    assert!(!flags.in_prejoin());
    assert_eq!(m.live_region(), None);
}

#[test]
fn pre_join_home_region_is_configurable() {
    let flags = EventFlags::new();
    let config = ManagerConfig {
        home_region: Region::EU868,
        ..manager_config()
    };
    let mut m = manager(&flags, MockFlash::new(FLASH_PAGES), config);
    m.init();

    m.pre_join_all_regions().unwrap();
    assert_eq!(m.active_region(), Some(Region::EU868));
}

#[test]
fn saved_counters_never_decrease() {
    let flags = EventFlags::new();
    let mut m = fresh(&flags);
    m.join_region(Region::US915).unwrap();
    m.mac_mut().downlink_on_uplink = true;

    let mut previous = stored(&m, Region::US915).uplink_counter;
    for _ in 0..5 {
        m.mac_mut().uplink(b"telemetry");
        m.save_current_context().unwrap();
        let ctx = stored(&m, Region::US915);
        assert!(ctx.uplink_counter >= previous);
        previous = ctx.uplink_counter;
    }
    let ctx = stored(&m, Region::US915);
    assert_eq!(ctx.uplink_counter, 7);
    assert_eq!(ctx.downlink_counter, 5);
    assert_eq!(ctx.last_rx_mic, m.mac().nvm.last_rx_mic());

    // a MAC that reports zero for a moment does not roll the record back
    m.mac_mut().nvm.fcnt_up = 0;
    m.save_current_context().unwrap();
    assert_eq!(stored(&m, Region::US915).uplink_counter, 7);
}

#[test]
fn capture_never_rereads_identity() {
    let flags = EventFlags::new();
    let mut m = fresh(&flags);
    m.join_region(Region::AU915).unwrap();
    let before = stored(&m, Region::AU915);

    // transient zeroed identity inside the MAC
    m.mac_mut().dev_addr = 0;
    m.mac_mut().nvm.keys = [[0; 16]; 4];
    m.mac_mut().dev_eui = [0; 8];
    m.save_current_context().unwrap();

    let after = stored(&m, Region::AU915);
    assert_eq!(after.identity(), before.identity());
    assert!(after.is_valid());
}

fn with_failing_flash(flags: &EventFlags) -> TestManager<'_> {
    let mut flash = MockFlash::new(FLASH_PAGES);
    flash.fail_erase = true;
    let mut m = manager(flags, flash, manager_config());
    m.init();
    m
}

#[test]
fn join_succeeds_when_store_commit_fails() {
    let flags = EventFlags::new();
    let mut m = with_failing_flash(&flags);

    assert_eq!(m.join_region(Region::US915), Ok(()));
    assert_eq!(m.live_region(), Some(Region::US915));
    assert_eq!(m.active_region(), Some(Region::US915));
    assert_eq!(stored(&m, Region::US915).uplink_counter, 2);

    // an explicit save still reports the fault
    assert!(matches!(m.save_current_context(), Err(Error::Store(_))));
}

#[test]
fn pre_join_counts_regions_joined_without_flash() {
    let flags = EventFlags::new();
    let mut m = with_failing_flash(&flags);

    assert_eq!(m.pre_join_all_regions(), Ok(6));
    assert_eq!(m.stats().used, 6);
    assert_eq!(m.live_region(), Some(Region::US915));
}

#[test]
fn join_evicts_session_of_unmanaged_region() {
    // a store left behind by firmware that also served RU864
    let mut sessions = SessionStore::new();
    let regions = [Region::US915, Region::RU864, Region::EU868, Region::AS923, Region::AU915, Region::IN865];
    for (slot, region) in regions.into_iter().enumerate() {
        let identity = SessionIdentity {
            dev_eui: dev_eui(region),
            dev_addr: 0x2600_0100 + slot as u32,
            app_s_key: [0x11; 16],
            nwk_s_key: [0x22; 16],
        };
        *sessions.context_mut(slot).unwrap() =
            RegionContext::provision(region, ActivationType::Abp, identity, 10 * slot as u32);
    }
    let mut flash = FlashStore::new(MockFlash::new(FLASH_PAGES), STORE_OFFSET).unwrap();
    flash.commit(&sessions).unwrap();

    let flags = EventFlags::new();
    let mut m = manager(&flags, flash.release(), manager_config());
    m.init();
    assert_eq!(m.stats().used, 6);

    m.join_region(Region::KR920).unwrap();

    assert_eq!(m.sessions().find_slot(Region::KR920), Some(1));
    assert_eq!(m.sessions().find_slot(Region::RU864), None);
    assert!(m.is_region_joined(Region::US915));
    assert_eq!(m.stats().used, 6);
}
