//! Tests that drive the whole driver against a simulated chip.

extern crate std;


use alloc::{boxed::Box, sync::Arc, vec, vec::Vec};
use spin::Mutex;
use nic_buffers::fake::FakeDmaAllocator;
use nic_buffers::{DmaAllocator, PacketBuffer};
use nic_descriptors::*;
use pci::fake::FakeConfigSpace;
use pci::{PciCapability, PCI_COMMAND};
use network_interface_card::{KernelDebugger, LinkStatus, MediumIndex, MediumType, NetworkInterfaceCard, OutputStatus};
use crate::config::DEFAULT_RX_BUFFER_SIZE;
use crate::filter::{ether_crc32, multicast_hash_index, station_address_words};
use crate::phy::{build_medium_table, link_code, resolve_medium, NegotiationOutcome, PhyState};
use crate::power::SystemPowerState;
use self::chip::*;
use super::*;

/// Where the fake config space puts the power management capability.
const PM_CAP_OFFSET: u8 = 0x50;
/// PME from D3hot, PM spec version 1.1.
const PM_CAPABILITIES: [u8; 4] = [0x02, 0x40, 0x00, 0x00];

const AUTO: MediumIndex = MediumIndex(4);
const MEDIUM_100FD: MediumIndex = MediumIndex(3);
const MEDIUM_10FD: MediumIndex = MediumIndex(1);

struct Harness {
    nic: Dp83816Nic,
    chip: FakeChip,
    alloc: FakeDmaAllocator,
    pci: SharedConfigSpace,
    events: FakeEvents,
    queue: FakeOutputQueue,
    slept_ms: Arc<Mutex<u64>>,
    spun_us: Arc<Mutex<u64>>,
}

struct Platform {
    pci: SharedConfigSpace,
    chip: FakeChip,
    alloc: FakeDmaAllocator,
    events: FakeEvents,
    queue: FakeOutputQueue,
    slept_ms: Arc<Mutex<u64>>,
    spun_us: Arc<Mutex<u64>>,
    auto_step: bool,
}

impl Platform {
    fn new(device_id: u16, auto_step: bool, pm: bool) -> Platform {
        let mut space = FakeConfigSpace::new(NATSEMI_VEND, device_id);
        if pm {
            space.add_capability(PM_CAP_OFFSET, PciCapability::PowerManagement as u8, &PM_CAPABILITIES);
        }
        let alloc = FakeDmaAllocator::new();
        Platform {
            pci: SharedConfigSpace(Arc::new(Mutex::new(space))),
            chip: FakeChip::new(alloc.clone()),
            alloc,
            events: FakeEvents::default(),
            queue: FakeOutputQueue::default(),
            slept_ms: Arc::new(Mutex::new(0)),
            spun_us: Arc::new(Mutex::new(0)),
            auto_step,
        }
    }

    fn parts(&self) -> (Box<dyn PciConfigSpace>, Box<dyn RegisterAccess>, Dp83816Services) {
        let services = Dp83816Services {
            allocator: Box::new(self.alloc.clone()),
            delay: Box::new(FakeDelay {
                chip: self.chip.clone(),
                auto_step: self.auto_step,
                slept_ms: self.slept_ms.clone(),
                spun_us: self.spun_us.clone(),
            }),
            events: Box::new(self.events.clone()),
            output_queue: Box::new(self.queue.clone()),
        };
        (Box::new(self.pci.clone()), Box::new(self.chip.clone()), services)
    }
}

fn test_config() -> Dp83816Config {
    Dp83816Config {
        rx_ring_size: 4,
        tx_ring_size: 8,
        tx_max_segments: 4,
        autoneg_timeout_ms: 100,
        link_timeout_ms: 100,
        polled_spin_limit: 50,
        ..Dp83816Config::default()
    }
}

fn build(config: Dp83816Config, auto_step: bool, pm: bool, setup: impl FnOnce(&mut ChipState)) -> Result<Harness> {
    let platform = Platform::new(DP83816_DEV, auto_step, pm);
    setup(&mut *platform.chip.lock());
    let (pci, regs, services) = platform.parts();
    let nic = Dp83816Nic::new(pci, regs, services, config)?;
    Ok(Harness {
        nic,
        chip: platform.chip,
        alloc: platform.alloc,
        pci: platform.pci,
        events: platform.events,
        queue: platform.queue,
        slept_ms: platform.slept_ms,
        spun_us: platform.spun_us,
    })
}

fn harness() -> Harness {
    build(test_config(), false, false, |_| { }).unwrap()
}

/// Builds a packet out of one DMA region per entry of `sizes`;
/// fragment `i` is filled with the byte `i + 1`.
fn fragmented_packet(alloc: &FakeDmaAllocator, sizes: &[usize]) -> PacketBuffer {
    let fragments = sizes.iter().enumerate().map(|(i, &size)| {
        let mut memory = alloc.allocate(size, 4).unwrap();
        memory.as_slice_mut().fill(i as u8 + 1);
        (memory, size)
    }).collect();
    PacketBuffer::from_fragments(fragments).unwrap()
}

fn frame_of(length: usize) -> Vec<u8> {
    (0..length).map(|i| i as u8).collect()
}

// ---- probe, bring-up and tear-down ----

#[test]
fn probe_reads_identity_and_media() {
    let h = harness();
    assert_eq!(h.nic.mac_address(), EEPROM_MAC);
    assert_eq!(h.nic.activation_level(), ActivationLevel::None);
    assert_eq!(h.nic.link_status(), (LinkStatus::UNKNOWN, None));

    let media = h.nic.media();
    assert_eq!(media.len(), 5);
    assert_eq!(media[0].medium_type, MediumType::Ethernet10BaseT);
    assert!(!media[0].full_duplex);
    assert_eq!(media[MEDIUM_100FD.0].speed_mbps, 100);
    assert!(media[MEDIUM_100FD.0].full_duplex);
    assert_eq!(media[AUTO.0].medium_type, MediumType::Auto);

    let command = h.pci.0.lock().get_16(PCI_COMMAND);
    assert_eq!(command & (PCI_COMMAND_MEMORY_SPACE | PCI_COMMAND_BUS_MASTER),
        PCI_COMMAND_MEMORY_SPACE | PCI_COMMAND_BUS_MASTER);
    assert!(!h.nic.wake_on_lan().is_magic_supported());
    // probing allocates nothing
    assert_eq!(h.alloc.live_regions(), 0);
}

#[test]
fn probe_rejects_other_devices() {
    let platform = Platform::new(0x0022, false, false);
    let (pci, regs, services) = platform.parts();
    let result = Dp83816Nic::new(pci, regs, services, test_config());
    assert!(matches!(result.err(), Some(Error::Unsupported(_))));
}

#[test]
fn probe_rejects_bad_config() {
    let config = Dp83816Config { rx_ring_size: 6, ..test_config() };
    assert!(matches!(build(config, false, false, |_| { }).err(), Some(Error::InvalidConfig(_))));
    let config = Dp83816Config { tx_ring_size: 4, tx_max_segments: 4, ..test_config() };
    assert!(matches!(build(config, false, false, |_| { }).err(), Some(Error::InvalidConfig(_))));
    let config = Dp83816Config { polled_spin_us: 0, ..test_config() };
    assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
}

#[test]
fn probe_fails_without_phy_media() {
    let result = build(test_config(), false, false, |chip| chip.bmsr_caps = 0);
    assert!(matches!(result.err(), Some(Error::Unsupported(_))));
}

#[test]
fn init_registers_callbacks_and_refuses_a_second_instance() {
    let platform = Platform::new(DP83816_DEV, false, false);

    // a failed registration leaves nothing registered and no instance behind
    platform.events.log.lock().fail_timer_registration = true;
    let (pci, regs, services) = platform.parts();
    assert!(matches!(init(pci, regs, services, test_config()).err(), Some(Error::EventSource(_))));
    {
        let log = platform.events.log.lock();
        assert!(log.interrupt_handler.is_none());
        assert!(log.timer_handler.is_none());
    }
    assert!(get_dp83816_nic().is_none());
    platform.events.log.lock().fail_timer_registration = false;

    let (pci, regs, services) = platform.parts();
    let nic_ref = init(pci, regs, services, test_config()).unwrap();
    {
        let log = platform.events.log.lock();
        assert!(log.interrupt_handler.is_some());
        assert!(log.timer_handler.is_some());
    }
    // both callbacks are harmless while the hardware is off
    dp83816_interrupt_handler();
    dp83816_watchdog_handler();
    assert_eq!(nic_ref.lock().activation_level(), ActivationLevel::None);
    assert!(get_dp83816_nic().is_some());

    let (pci, regs, services) = platform.parts();
    assert!(matches!(init(pci, regs, services, test_config()).err(), Some(Error::Unsupported(_))));
}

#[test]
fn enable_then_disable_releases_everything() {
    let mut h = harness();
    h.nic.enable().unwrap();
    assert_eq!(h.nic.activation_level(), ActivationLevel::FullyUp);
    assert!(h.pci.0.lock().is_open);
    {
        let log = h.events.log.lock();
        assert!(log.interrupt_enabled);
        assert_eq!(log.timeout_ms, Some(1000));
    }
    {
        let log = h.queue.log.lock();
        assert_eq!(log.capacity, 256);
        assert!(log.running);
    }
    // rx ring, four rx buffers, tx ring, debug buffer
    assert_eq!(h.alloc.live_regions(), 7);
    {
        let chip = h.chip.lock();
        assert_eq!(chip.resets, 1);
        assert_eq!(chip.reg(REG_IER), IER_IE);
        assert_eq!(chip.reg(REG_IMR), InterruptStatus::INTERESTING.bits());
        assert!(chip.tx_enabled && chip.rx_enabled);
        let rxq = h.nic.rx_queue.as_ref().unwrap();
        assert_eq!(chip.reg(REG_RXDP), rxq.rx_descs.phys_base());
        let txq = h.nic.tx_queue.as_ref().unwrap();
        assert_eq!(chip.reg(REG_TXDP), txq.tx_descs.phys_base());
    }

    h.queue.log.lock().queued = 3;
    h.nic.disable().unwrap();
    assert_eq!(h.nic.activation_level(), ActivationLevel::None);
    assert_eq!(h.alloc.live_regions(), 0);
    assert!(!h.pci.0.lock().is_open);
    assert_eq!(h.nic.link_status(), (LinkStatus::DOWN, None));
    {
        let log = h.events.log.lock();
        assert!(!log.interrupt_enabled);
        assert_eq!(log.timeout_ms, None);
    }
    {
        let log = h.queue.log.lock();
        assert_eq!(log.capacity, 0);
        assert!(!log.running);
        assert_eq!(log.flushes, 1);
        assert_eq!(log.queued, 0);
    }
    let chip = h.chip.lock();
    assert!(!chip.tx_enabled && !chip.rx_enabled);
    assert_eq!(chip.reg(REG_IER), 0);
}

#[test]
fn setting_the_current_level_touches_nothing() {
    let mut h = harness();
    let chip_before = h.chip.accesses();
    let pci_before = h.pci.0.lock().accesses;
    h.nic.set_activation_level(ActivationLevel::None).unwrap();
    h.nic.disable().unwrap();
    h.nic.disable_debugger().unwrap();
    assert_eq!(h.chip.accesses(), chip_before);
    assert_eq!(h.pci.0.lock().accesses, pci_before);

    h.nic.enable_debugger().unwrap();
    let chip_before = h.chip.accesses();
    let allocations = h.alloc.total_allocations();
    h.nic.set_activation_level(ActivationLevel::DebugOnly).unwrap();
    h.nic.enable_debugger().unwrap();
    assert_eq!(h.chip.accesses(), chip_before);
    assert_eq!(h.alloc.total_allocations(), allocations);
}

#[test]
fn client_intents_choose_the_level() {
    let mut h = harness();
    h.nic.enable_debugger().unwrap();
    assert_eq!(h.nic.activation_level(), ActivationLevel::DebugOnly);
    assert!(!h.events.log.lock().interrupt_enabled);
    assert!(!h.queue.log.lock().running);

    h.nic.enable().unwrap();
    assert_eq!(h.nic.activation_level(), ActivationLevel::FullyUp);

    // the network stack still needs everything
    h.nic.disable_debugger().unwrap();
    assert_eq!(h.nic.activation_level(), ActivationLevel::FullyUp);

    h.nic.disable().unwrap();
    assert_eq!(h.nic.activation_level(), ActivationLevel::None);
}

#[test]
fn reset_timeout_leaves_the_device_off() {
    let mut h = build(test_config(), false, false, |chip| chip.stuck_reset = true).unwrap();
    assert_eq!(h.nic.enable(), Err(Error::HardwareTimeout("chip reset")));
    assert_eq!(h.nic.activation_level(), ActivationLevel::None);
    assert_eq!(h.alloc.live_regions(), 0);
    assert!(!h.pci.0.lock().is_open);
    // a failed attach isn't remembered
    assert!(!h.nic.clients.network_stack);
}

#[test]
fn busy_pci_function_fails_bring_up() {
    let mut h = harness();
    h.pci.0.lock().refuse_open = true;
    assert_eq!(h.nic.enable_debugger(), Err(Error::DeviceBusy));
    assert_eq!(h.nic.activation_level(), ActivationLevel::None);
    assert_eq!(h.alloc.total_allocations(), 0);
    assert!(!h.nic.clients.debugger);
}

#[test]
fn allocation_failure_fails_bring_up_cleanly() {
    let mut h = harness();
    h.alloc.fail_after(Some(3));
    assert_eq!(h.nic.enable(), Err(Error::Allocation));
    assert_eq!(h.nic.activation_level(), ActivationLevel::None);
    assert_eq!(h.alloc.live_regions(), 0);
    assert!(!h.pci.0.lock().is_open);

    h.alloc.fail_after(None);
    h.nic.enable().unwrap();
    assert_eq!(h.nic.activation_level(), ActivationLevel::FullyUp);
}

#[test]
fn quiesce_failure_keeps_the_rings() {
    let mut h = harness();
    h.nic.enable().unwrap();
    h.chip.lock().stuck_quiesce = true;

    assert_eq!(h.nic.disable(), Err(Error::HardwareTimeout("transmit/receive engines to stop")));
    assert_eq!(h.nic.activation_level(), ActivationLevel::DebugOnly);
    assert!(h.nic.rx_queue.is_some());
    assert!(h.nic.tx_queue.is_some());
    assert!(h.pci.0.lock().is_open);
    // the detach itself is still recorded
    assert!(!h.nic.clients.network_stack);

    h.chip.lock().stuck_quiesce = false;
    h.nic.disable().unwrap();
    assert_eq!(h.nic.activation_level(), ActivationLevel::None);
    assert_eq!(h.alloc.live_regions(), 0);
}

// ---- transmit ----

#[test]
fn tx_chain_occupies_consecutive_descriptors() {
    let mut h = harness();
    h.nic.enable().unwrap();
    assert_eq!(h.nic.tx_queue.as_ref().unwrap().free_count(), 7);

    let packet = fragmented_packet(&h.alloc, &[64, 600, 100]);
    assert!(matches!(h.nic.output_packet(packet), OutputStatus::Sent));
    {
        let txq = h.nic.tx_queue.as_ref().unwrap();
        assert_eq!(txq.tx_tail, 3);
        assert_eq!(txq.free_count(), 4);
        let slot = &txq.tx_slots[0];
        assert!(slot.packet.is_some());
        assert_eq!(slot.desc_last, Some(2));
        assert_eq!(slot.desc_count, 3);
        assert_eq!(slot.next_index, 3);
        assert!(!txq.tx_slots[1].is_in_use());

        let descs = txq.tx_descs.descs();
        for (i, len) in [64u32, 600, 100].iter().enumerate() {
            assert_eq!(descs[i].ownership(), Ownership::Nic);
            assert_eq!(descs[i].cmd_status() & CMDSTS_SIZE_MASK, *len);
        }
        assert_ne!(descs[0].cmd_status() & CMDSTS_MORE, 0);
        assert_ne!(descs[1].cmd_status() & CMDSTS_MORE, 0);
        assert_eq!(descs[2].cmd_status() & CMDSTS_MORE, 0);
        // with an 8-entry ring and 4 segments, every packet asks for an interrupt
        assert_ne!(descs[2].cmd_status() & CMDSTS_INTR, 0);
    }
    assert_eq!(h.chip.lock().writes.last(), Some(&(REG_CR, CR_TXE)));

    assert_eq!(h.chip.step(), 3);
    {
        let chip = h.chip.lock();
        assert_eq!(chip.sent_frames.len(), 1);
        let frame = &chip.sent_frames[0];
        assert_eq!(frame.len(), 764);
        assert_eq!((frame[0], frame[64], frame[664], frame[763]), (1, 2, 3, 3));
    }

    assert_eq!(h.nic.service_tx_ring(), 1);
    let txq = h.nic.tx_queue.as_ref().unwrap();
    assert!(txq.is_idle());
    assert_eq!(txq.free_count(), 7);
    assert!(txq.tx_descs.descs()[..3].iter().all(|d| d.cmd_status() == 0));
    assert_eq!(h.nic.net_stats.output_packets, 1);
    assert_eq!(h.nic.ether_stats.collision_histogram[0], 1);
    assert_eq!(h.queue.log.lock().services, 1);
}

#[test]
fn tx_stalls_when_the_ring_is_short() {
    let mut h = harness();
    h.nic.enable().unwrap();
    let a = fragmented_packet(&h.alloc, &[64, 600, 100]);
    let b = fragmented_packet(&h.alloc, &[128]);
    assert!(matches!(h.nic.output_packet(a), OutputStatus::Sent));
    assert!(matches!(h.nic.output_packet(b), OutputStatus::Sent));
    assert_eq!(h.nic.tx_queue.as_ref().unwrap().free_count(), 3);

    let c = fragmented_packet(&h.alloc, &[64]);
    match h.nic.output_packet(c) {
        OutputStatus::Stalled(p) => assert_eq!(p.len(), 64),
        other => panic!("expected a stall, got {:?}", other),
    }
    let txq = h.nic.tx_queue.as_ref().unwrap();
    assert_eq!(txq.tx_tail, 4);
    assert!(!txq.tx_descs.descs()[4..].iter().any(|d| d.ownership() == Ownership::Nic));
    assert_eq!(h.nic.net_stats.output_errors, 0);
}

#[test]
fn tx_drain_waits_for_the_terminal_descriptor() {
    let mut h = harness();
    h.nic.enable().unwrap();
    let a = fragmented_packet(&h.alloc, &[64, 600, 100]);
    let b = fragmented_packet(&h.alloc, &[128]);
    assert!(matches!(h.nic.output_packet(a), OutputStatus::Sent));
    assert!(matches!(h.nic.output_packet(b), OutputStatus::Sent));

    assert_eq!(h.chip.lock().complete_tx(2), 2);
    assert_eq!(h.nic.service_tx_ring(), 0);
    assert_eq!(h.nic.tx_queue.as_ref().unwrap().tx_head, 0);
    assert_eq!(h.queue.log.lock().services, 0);

    assert_eq!(h.chip.lock().complete_tx(1), 1);
    assert_eq!(h.nic.service_tx_ring(), 1);
    assert_eq!(h.nic.tx_queue.as_ref().unwrap().tx_head, 3);

    h.chip.step();
    assert_eq!(h.nic.service_tx_ring(), 1);
    assert!(h.nic.tx_queue.as_ref().unwrap().is_idle());
    assert_eq!(h.nic.net_stats.output_packets, 2);
    assert_eq!(h.queue.log.lock().services, 2);
    assert!(h.nic.deferred_free.is_empty());
}

#[test]
fn tx_coalesces_packets_with_too_many_fragments() {
    let mut h = harness();
    h.nic.enable().unwrap();
    let packet = fragmented_packet(&h.alloc, &[10, 20, 30, 40, 50, 60]);
    assert!(matches!(h.nic.output_packet(packet), OutputStatus::Sent));
    let txq = h.nic.tx_queue.as_ref().unwrap();
    assert_eq!(txq.tx_slots[0].desc_count, 1);
    assert_eq!(txq.tx_descs.descs()[0].cmd_status() & CMDSTS_SIZE_MASK, 210);

    h.chip.step();
    let chip = h.chip.lock();
    assert_eq!(chip.sent_frames[0].len(), 210);
    assert_eq!(chip.sent_frames[0][209], 6);
}

#[test]
fn tx_errors_and_collisions_are_counted() {
    let mut h = harness();
    h.nic.enable().unwrap();
    h.chip.lock().tx_status = TX_STATUS_OWC | (3 << 16);
    let packet = fragmented_packet(&h.alloc, &[100]);
    assert!(matches!(h.nic.output_packet(packet), OutputStatus::Sent));
    h.chip.step();
    assert_eq!(h.nic.service_tx_ring(), 1);

    assert_eq!(h.nic.net_stats.output_packets, 0);
    assert_eq!(h.nic.net_stats.output_errors, 1);
    assert_eq!(h.nic.net_stats.collisions, 3);
    assert_eq!(h.nic.ether_stats.late_collisions, 1);
    assert_eq!(h.nic.ether_stats.multiple_collision_frames, 1);
    assert_eq!(h.nic.ether_stats.collision_histogram[3], 1);
}

#[test]
fn tx_collisions_on_a_good_send_are_not_errors() {
    let mut h = harness();
    h.nic.enable().unwrap();
    h.chip.lock().tx_status = 2 << 16;
    let packet = fragmented_packet(&h.alloc, &[100]);
    assert!(matches!(h.nic.output_packet(packet), OutputStatus::Sent));
    h.chip.step();
    assert_eq!(h.nic.service_tx_ring(), 1);

    assert_eq!(h.nic.net_stats.output_packets, 1);
    assert_eq!(h.nic.net_stats.output_errors, 0);
    assert_eq!(h.nic.net_stats.collisions, 2);
    assert_eq!(h.nic.ether_stats.multiple_collision_frames, 1);
    let ether = &h.nic.ether_stats;
    assert_eq!(
        (ether.transmit_aborts, ether.late_collisions, ether.excessive_collisions, ether.deferred_transmissions),
        (0, 0, 0, 0)
    );
}

#[test]
fn tx_while_off_drops_the_packet() {
    let mut h = harness();
    let packet = fragmented_packet(&h.alloc, &[100]);
    assert!(matches!(h.nic.output_packet(packet), OutputStatus::Dropped));
    assert_eq!(h.nic.net_stats.output_errors, 1);
    assert_eq!(h.alloc.live_regions(), 0);
}

#[test]
fn tx_refuses_oversized_frames() {
    let mut h = harness();
    h.nic.enable().unwrap();
    let packet = fragmented_packet(&h.alloc, &[1000, 600]);
    assert!(matches!(h.nic.output_packet(packet), OutputStatus::Dropped));
    assert!(h.nic.tx_queue.as_ref().unwrap().is_idle());
}

// ---- receive ----

#[test]
fn rx_good_frame_is_delivered_and_slot_rearmed() {
    let mut h = harness();
    h.nic.enable().unwrap();
    let frame = frame_of(64);
    let old_phys = h.nic.rx_queue.as_ref().unwrap().rx_buf_phys[0];

    assert!(h.chip.receive(&frame));
    assert_eq!(h.nic.rx_queue.as_ref().unwrap().rx_descs.descs()[0].ownership(), Ownership::Driver);
    assert_eq!(h.nic.service_rx_ring(), 1);

    {
        let rxq = h.nic.rx_queue.as_ref().unwrap();
        assert_eq!(rxq.rx_cur, 1);
        let desc = &rxq.rx_descs.descs()[0];
        assert_eq!(desc.ownership(), Ownership::Nic);
        assert_eq!(desc.cmd_status(), CMDSTS_INTR | CMDSTS_INCCRC | DEFAULT_RX_BUFFER_SIZE as u32);
        assert!(rxq.slot_is_consistent(0));
        assert_ne!(rxq.rx_buf_phys[0], old_phys);
    }
    let received = h.nic.get_received_frame().unwrap();
    assert_eq!(received.len(), 64);
    assert_eq!(received.0.as_slice().unwrap(), &frame[..]);
    assert!(h.nic.get_received_frame().is_none());
    assert_eq!(h.nic.net_stats.input_packets, 1);
    assert_eq!(h.chip.lock().writes.last(), Some(&(REG_CR, CR_RXE)));
}

#[test]
fn rx_bad_frames_are_counted_and_recycled() {
    let mut h = harness();
    h.nic.enable().unwrap();
    let live = h.alloc.live_regions();
    {
        let mut chip = h.chip.lock();
        assert!(chip.complete_rx(&frame_of(64), RX_STATUS_CRCE));
        assert!(chip.complete_rx(&frame_of(64), CMDSTS_OK | CMDSTS_MORE));
        assert!(chip.complete_rx(&frame_of(40), CMDSTS_OK));
        assert!(chip.complete_rx(&frame_of(MAX_RX_FRAME_SIZE + 1), CMDSTS_OK));
    }
    assert_eq!(h.nic.service_rx_ring(), 0);
    assert!(h.nic.get_received_frame().is_none());

    let stats = &h.nic.ether_stats;
    assert_eq!(h.nic.net_stats.input_errors, 4);
    assert_eq!(stats.fcs_errors, 1);
    assert_eq!(stats.frame_too_longs, 2);
    assert_eq!(stats.runt_frames, 1);

    let rxq = h.nic.rx_queue.as_ref().unwrap();
    assert_eq!(rxq.rx_cur, 0);
    for i in 0..rxq.len() {
        assert_eq!(rxq.rx_descs.descs()[i].ownership(), Ownership::Nic);
        assert!(rxq.slot_is_consistent(i));
    }
    assert_eq!(h.alloc.live_regions(), live);
}

#[test]
fn rx_accepts_both_ends_of_the_length_window() {
    let mut h = harness();
    h.nic.enable().unwrap();
    assert!(h.chip.receive(&frame_of(MIN_RX_FRAME_SIZE)));
    assert!(h.chip.receive(&frame_of(MAX_RX_FRAME_SIZE)));
    assert_eq!(h.nic.service_rx_ring(), 2);
    assert_eq!(h.nic.get_received_frame().unwrap().len(), MIN_RX_FRAME_SIZE);
    assert_eq!(h.nic.get_received_frame().unwrap().len(), MAX_RX_FRAME_SIZE);
}

#[test]
fn rx_shortage_copies_the_frame_out() {
    let mut h = harness();
    h.nic.enable().unwrap();
    let frame = frame_of(64);
    let old_phys = h.nic.rx_queue.as_ref().unwrap().rx_buf_phys[0];
    assert!(h.chip.receive(&frame));

    // the replacement buffer fails, the exact-size copy succeeds
    h.alloc.fail_next(1);
    assert_eq!(h.nic.service_rx_ring(), 1);
    let received = h.nic.get_received_frame().unwrap();
    assert_eq!(received.0.as_slice().unwrap(), &frame[..]);
    assert_eq!(received.0.capacity(), 64);
    assert_eq!(h.nic.ether_stats.resource_errors, 1);
    assert_eq!(h.nic.net_stats.input_errors, 0);

    let rxq = h.nic.rx_queue.as_ref().unwrap();
    assert_eq!(rxq.rx_buf_phys[0], old_phys);
    assert!(rxq.slot_is_consistent(0));
    assert_eq!(rxq.rx_descs.descs()[0].ownership(), Ownership::Nic);
}

#[test]
fn rx_shortage_without_memory_drops_the_frame() {
    let mut h = harness();
    h.nic.enable().unwrap();
    assert!(h.chip.receive(&frame_of(64)));
    h.alloc.fail_next(2);
    assert_eq!(h.nic.service_rx_ring(), 0);
    assert!(h.nic.get_received_frame().is_none());
    assert_eq!(h.nic.ether_stats.resource_errors, 1);
    assert_eq!(h.nic.net_stats.input_errors, 1);
    let rxq = h.nic.rx_queue.as_ref().unwrap();
    assert_eq!(rxq.rx_cur, 1);
    assert_eq!(rxq.rx_descs.descs()[0].ownership(), Ownership::Nic);
}

#[test]
fn rx_ring_wraps_around() {
    let mut h = harness();
    h.nic.enable().unwrap();
    for round in 0..3 {
        for _ in 0..4 {
            assert!(h.chip.receive(&frame_of(100)));
        }
        // every descriptor is the driver's now; the next frame is missed
        assert!(!h.chip.receive(&frame_of(100)));
        assert_eq!(h.nic.service_rx_ring(), 4, "round {}", round);
    }
    assert_eq!(h.nic.received_frames.len(), 12);
    assert_eq!(h.chip.lock().missed, 3);
}

// ---- interrupts and the watchdog ----

#[test]
fn interrupts_are_ignored_below_fully_up() {
    let mut h = harness();
    h.nic.enable_debugger().unwrap();
    assert!(h.chip.receive(&frame_of(64)));
    let before = h.chip.accesses();
    assert!(!h.nic.handle_interrupt());
    assert_eq!(h.chip.accesses(), before);
    assert!(h.nic.get_received_frame().is_none());
    assert_ne!(h.chip.lock().isr, 0);
}

#[test]
fn interrupt_dispatches_rx_tx_and_link() {
    let mut h = harness();
    h.nic.enable().unwrap();
    assert!(h.chip.receive(&frame_of(64)));
    let packet = fragmented_packet(&h.alloc, &[100]);
    assert!(matches!(h.nic.output_packet(packet), OutputStatus::Sent));
    h.chip.step();

    assert!(h.nic.handle_interrupt());
    assert_eq!(h.nic.get_received_frame().map(|f| f.len()), Some(64));
    assert!(h.nic.tx_queue.as_ref().unwrap().is_idle());
    // negotiation left a PHY event pending
    assert_eq!(h.nic.link_status(), (LinkStatus::UP, Some(MEDIUM_100FD)));
    let chip = h.chip.lock();
    assert_eq!(chip.reg(REG_TXCFG) & TXCFG_FULL_DUPLEX, TXCFG_FULL_DUPLEX);
    assert_eq!(chip.reg(REG_RXCFG) & RXCFG_ATX, RXCFG_ATX);
    assert_eq!(chip.isr, 0);
}

#[test]
fn interrupt_with_nothing_pending_is_not_ours() {
    let mut h = harness();
    h.nic.enable().unwrap();
    assert!(h.nic.handle_interrupt());
    assert!(!h.nic.handle_interrupt());
}

#[test]
fn bus_errors_are_logged_not_fatal() {
    let mut h = harness();
    h.nic.enable().unwrap();
    h.nic.handle_interrupt();
    h.chip.raise(InterruptStatus::SSERR | InterruptStatus::RMABT);
    assert!(h.nic.handle_interrupt());
    assert_eq!(h.nic.activation_level(), ActivationLevel::FullyUp);
    assert!(h.chip.lock().tx_enabled);
}

#[test]
fn underrun_raises_the_drain_threshold() {
    let mut h = harness();
    h.nic.enable().unwrap();
    h.chip.raise(InterruptStatus::TXURN);
    assert!(h.nic.handle_interrupt());
    assert_eq!(h.chip.lock().reg(REG_TXCFG) & TXCFG_DRTH_MASK, TX_DRTH_DEFAULT + 1);
}

#[test]
fn watchdog_folds_missed_frames_and_rearms() {
    let mut h = harness();
    h.nic.enable().unwrap();
    h.chip.lock().missed = 3;
    h.events.log.lock().timeout_ms = None;
    h.nic.watchdog_tick();
    assert_eq!(h.nic.ether_stats.missed_frames, 3);
    assert_eq!(h.nic.net_stats.input_errors, 3);
    assert_eq!(h.chip.lock().missed, 0);
    assert_eq!(h.events.log.lock().timeout_ms, Some(1000));
}

#[test]
fn watchdog_does_nothing_while_off() {
    let mut h = harness();
    let before = h.chip.accesses();
    h.nic.watchdog_tick();
    assert_eq!(h.chip.accesses(), before);
    assert_eq!(h.events.log.lock().timeout_ms, None);
}

// ---- PHY and link ----

#[test]
fn link_holdoff_delays_polled_link_reports() {
    let mut h = harness();
    h.nic.enable().unwrap();
    assert_eq!(h.nic.link_status().0, LinkStatus::UNKNOWN);
    h.nic.watchdog_tick();
    h.nic.watchdog_tick();
    assert_eq!(h.nic.link_status().0, LinkStatus::UNKNOWN);
    h.nic.watchdog_tick();
    assert_eq!(h.nic.link_status(), (LinkStatus::UP, Some(MEDIUM_100FD)));
}

#[test]
fn negotiation_with_wait_reports_the_link() {
    let mut h = harness();
    h.nic.enable_debugger().unwrap();
    assert_eq!(h.nic.select_medium_and_negotiate(AUTO, true), Ok(NegotiationOutcome::LinkValid));
    assert_eq!(h.nic.link_status(), (LinkStatus::UP, Some(MEDIUM_100FD)));
    assert_eq!(h.chip.lock().reg(REG_ANAR), ANAR_10HD | ANAR_10FD | ANAR_100HD | ANAR_100FD | ANAR_SELECTOR_8023);
}

#[test]
fn negotiation_without_a_partner_times_out() {
    let mut h = build(test_config(), false, false, |chip| chip.link_partner = None).unwrap();
    h.nic.enable_debugger().unwrap();
    let slept = *h.slept_ms.lock();
    assert_eq!(h.nic.select_medium_and_negotiate(AUTO, true), Ok(NegotiationOutcome::TimedOut));
    assert!(*h.slept_ms.lock() - slept >= 100);
    assert_eq!(h.nic.link_status().0, LinkStatus::UNKNOWN);
    assert_eq!(h.nic.activation_level(), ActivationLevel::DebugOnly);
}

#[test]
fn waiting_bring_up_tolerates_a_missing_link() {
    let config = Dp83816Config { wait_for_link_on_enable: true, ..test_config() };
    let mut h = build(config, false, false, |chip| chip.link_partner = None).unwrap();
    h.nic.enable().unwrap();
    assert_eq!(h.nic.activation_level(), ActivationLevel::FullyUp);
}

#[test]
fn phy_reset_timeout_doesnt_stop_bring_up() {
    let mut h = build(test_config(), false, false, |chip| chip.stuck_phy_reset = true).unwrap();
    h.nic.enable().unwrap();
    assert_eq!(h.nic.activation_level(), ActivationLevel::FullyUp);
    assert_eq!(h.nic.select_medium(AUTO), Err(Error::HardwareTimeout("PHY reset")));
}

#[test]
fn phy_reset_applies_the_dsp_fixup() {
    let mut h = harness();
    h.nic.enable_debugger().unwrap();
    let chip = h.chip.lock();
    let reset_at = chip.writes.iter().position(|w| *w == (REG_BMCR, BMCR_RESET)).unwrap();
    let after_reset = &chip.writes[reset_at..];
    let mut fixups = PHY_DSP_FIXUP.iter();
    let mut next = fixups.next();
    for write in after_reset {
        if Some(write) == next {
            next = fixups.next();
        }
    }
    assert_eq!(next, None, "DSP fixup writes missing or out of order");
    assert_eq!(chip.phy_resets, 1);
}

#[test]
fn fixed_medium_is_remembered_and_advertised() {
    let mut h = build(test_config(), false, false, |chip| chip.link_partner = Some(CFG_LNKSTS | CFG_FDUP)).unwrap();
    h.nic.select_medium(MEDIUM_10FD).unwrap();
    assert_eq!(h.chip.lock().writes.iter().filter(|w| w.0 == REG_ANAR).count(), 0);

    h.nic.enable().unwrap();
    assert_eq!(h.chip.lock().reg(REG_ANAR), ANAR_10FD | ANAR_SELECTOR_8023);
    assert!(h.nic.handle_interrupt());
    assert_eq!(h.nic.link_status(), (LinkStatus::UP, Some(MEDIUM_10FD)));
    assert_eq!(h.chip.lock().reg(REG_TXCFG) & TXCFG_FULL_DUPLEX, TXCFG_FULL_DUPLEX);
}

#[test]
fn every_fixed_medium_reports_back_as_itself() {
    let media = build_medium_table(BMSR_10HD | BMSR_10FD | BMSR_100TXHD | BMSR_100TXFD);
    assert_eq!(media.len(), 5);
    assert_eq!(media[4].index, AUTO);
    let fixed: Vec<_> = media.iter().filter(|m| m.medium_type != MediumType::Auto).collect();
    assert_eq!(fixed.len(), 4);

    let mut h = harness();
    h.nic.enable().unwrap();
    assert_eq!(h.nic.phy.media.len(), media.len());

    for medium in &fixed {
        let code = link_code(medium).unwrap();
        assert_eq!(resolve_medium(&media, code), Some(medium.index));

        h.nic.select_medium(medium.index).unwrap();
        {
            let mut chip = h.chip.lock();
            chip.link_partner = Some(code);
            chip.link_up = true;
        }
        h.nic.report_link_status();
        assert_eq!(h.nic.link_status(), (LinkStatus::UP, Some(medium.index)));
        let full_duplex = h.chip.lock().reg(REG_TXCFG) & TXCFG_FULL_DUPLEX != 0;
        assert_eq!(full_duplex, medium.full_duplex);
    }

    // under Auto the chip's resolved link maps back to the same entries
    h.nic.select_medium(AUTO).unwrap();
    for medium in &fixed {
        {
            let mut chip = h.chip.lock();
            chip.link_partner = link_code(medium);
            chip.link_up = true;
        }
        h.nic.report_link_status();
        assert_eq!(h.nic.link_status(), (LinkStatus::UP, Some(medium.index)));
    }
}

#[test]
fn phy_state_tracks_negotiation_and_link() {
    let mut h = harness();
    assert_eq!(h.nic.phy.state, PhyState::Unreset);
    h.nic.enable().unwrap();
    assert_eq!(h.nic.phy.state, PhyState::Negotiating);
    assert!(h.nic.handle_interrupt());
    assert_eq!(h.nic.phy.state, PhyState::LinkUp);

    h.chip.lock().link_up = false;
    h.chip.raise(InterruptStatus::PHY);
    h.nic.handle_interrupt();
    assert_eq!(h.nic.phy.state, PhyState::LinkDown);

    // the watchdog notices the link returning without an interrupt, after the holdoff
    h.chip.lock().link_up = true;
    for _ in 0..3 {
        h.nic.watchdog_tick();
    }
    assert_eq!(h.nic.phy.state, PhyState::LinkUp);
    assert_eq!(h.nic.link_status().0, LinkStatus::UP);

    h.nic.disable().unwrap();
    assert_eq!(h.nic.phy.state, PhyState::Unreset);
}

#[test]
fn invalid_medium_is_rejected() {
    let mut h = harness();
    assert_eq!(h.nic.select_medium(MediumIndex(9)), Err(Error::InvalidMedium));
    h.nic.enable().unwrap();
    assert_eq!(h.nic.select_medium(MediumIndex(5)), Err(Error::InvalidMedium));
}

#[test]
fn link_loss_is_reported_down_and_duplex_follows() {
    let mut h = harness();
    h.nic.enable().unwrap();
    h.nic.handle_interrupt();
    assert_eq!(h.nic.link_status().0, LinkStatus::UP);

    h.chip.lock().link_up = false;
    h.chip.raise(InterruptStatus::PHY);
    h.nic.handle_interrupt();
    assert_eq!(h.nic.link_status(), (LinkStatus::DOWN, None));

    {
        let mut chip = h.chip.lock();
        chip.link_partner = Some(CFG_LNKSTS | CFG_SPEED100);
        chip.link_up = true;
    }
    h.chip.raise(InterruptStatus::PHY);
    h.nic.handle_interrupt();
    assert_eq!(h.nic.link_status(), (LinkStatus::UP, Some(MediumIndex(2))));
    assert_eq!(h.chip.lock().reg(REG_TXCFG) & TXCFG_FULL_DUPLEX, 0);
}

// ---- polled debugger path ----

#[test]
fn polled_send_waits_for_the_hardware() {
    let mut h = build(test_config(), true, false, |_| { }).unwrap();
    h.nic.enable_debugger().unwrap();
    let data = [0xABu8; 100];
    h.nic.send_packet_polled(&data).unwrap();

    assert_eq!(h.chip.lock().sent_frames, vec![data.to_vec()]);
    {
        let txq = h.nic.tx_queue.as_ref().unwrap();
        let slot = &txq.tx_slots[0];
        assert!(slot.packet.is_none());
        assert_eq!(slot.desc_count, 1);
        let desc = &txq.tx_descs.descs()[0];
        assert_eq!(desc.ownership(), Ownership::Driver);
        assert_ne!(desc.cmd_status() & CMDSTS_INTR, 0);
        let debug_phys = h.nic.debug_buffer.as_ref().unwrap().phys_addr().as_u32();
        assert_eq!(Some(desc.buffer_ptr()), debug_phys);
        assert!(!txq.is_idle());
    }

    // interrupts are off, so the watchdog retires it
    h.nic.watchdog_tick();
    assert!(h.nic.tx_queue.as_ref().unwrap().is_idle());
    assert_eq!(h.nic.net_stats.output_packets, 1);
}

#[test]
fn polled_send_times_out_if_the_nic_never_finishes() {
    let mut h = harness();
    h.nic.enable_debugger().unwrap();
    assert_eq!(h.nic.send_packet_polled(&[1, 2, 3]), Err(Error::HardwareTimeout("polled transmit")));
}

#[test]
fn polled_send_needs_active_hardware() {
    let mut h = harness();
    assert_eq!(h.nic.send_packet_polled(&[1, 2, 3]), Err(Error::NotActive));
}

#[test]
fn polled_send_truncates_long_frames() {
    let mut h = build(test_config(), true, false, |_| { }).unwrap();
    h.nic.enable_debugger().unwrap();
    h.nic.send_packet_polled(&[7u8; 2000]).unwrap();
    assert_eq!(h.chip.lock().sent_frames[0].len(), MAX_FRAME_SIZE);
}

#[test]
fn polled_receive_returns_a_frame_and_rearms() {
    let mut h = harness();
    h.nic.enable_debugger().unwrap();
    let frame = frame_of(80);
    assert!(h.chip.receive(&frame));

    let mut buffer = [0u8; 2048];
    assert_eq!(h.nic.receive_packet_polled(&mut buffer, 1000), 80);
    assert_eq!(&buffer[..80], &frame[..]);
    let rxq = h.nic.rx_queue.as_ref().unwrap();
    assert_eq!(rxq.rx_cur, 1);
    assert_eq!(rxq.rx_descs.descs()[0].ownership(), Ownership::Nic);
    // the debugger's frame never reaches the network stack
    assert!(h.nic.received_frames.is_empty());
}

#[test]
fn polled_receive_times_out_without_advancing() {
    let mut h = harness();
    h.nic.enable_debugger().unwrap();
    let mut buffer = [0u8; 2048];
    assert_eq!(h.nic.receive_packet_polled(&mut buffer, 100), 0);
    assert_eq!(h.nic.rx_queue.as_ref().unwrap().rx_cur, 0);
    assert_eq!(*h.spun_us.lock(), 100);
}

#[test]
fn polled_receive_wait_is_capped_by_the_spin_limit() {
    let config = Dp83816Config { polled_spin_limit: 5, polled_spin_us: 10, ..test_config() };
    let mut h = build(config, false, false, |_| { }).unwrap();
    h.nic.enable_debugger().unwrap();
    let mut buffer = [0u8; 2048];
    assert_eq!(h.nic.receive_packet_polled(&mut buffer, u32::MAX), 0);
    assert_eq!(*h.spun_us.lock(), 50);
    assert_eq!(h.nic.rx_queue.as_ref().unwrap().rx_cur, 0);
}

#[test]
fn polled_receive_recycles_bad_frames() {
    let mut h = harness();
    h.nic.enable_debugger().unwrap();
    assert!(h.chip.lock().complete_rx(&frame_of(64), RX_STATUS_FAE));
    let mut buffer = [0u8; 2048];
    assert_eq!(h.nic.receive_packet_polled(&mut buffer, 100), 0);
    assert_eq!(h.nic.rx_queue.as_ref().unwrap().rx_cur, 1);
    assert_eq!(h.nic.ether_stats.alignment_errors, 1);
}

#[test]
fn polled_receive_truncates_to_the_callers_buffer() {
    let mut h = harness();
    h.nic.enable_debugger().unwrap();
    assert!(h.chip.receive(&frame_of(200)));
    let mut buffer = [0u8; 16];
    assert_eq!(h.nic.receive_packet_polled(&mut buffer, 100), 16);
    assert_eq!(buffer[15], 15);
}

// ---- receive filter and station address ----

#[test]
fn ether_crc_matches_known_values() {
    assert_eq!(ether_crc32(&[0x01, 0x00, 0x5e, 0x00, 0x00, 0x01]), 0x7fa3_2d9b);
    assert_eq!(ether_crc32(&[0x33, 0x33, 0x00, 0x00, 0x00, 0x01]), 0xf99b_aaba);
    assert_eq!(ether_crc32(&[0xff; 6]), 0xff48_647d);
    assert_eq!(multicast_hash_index(&[0x01, 0x00, 0x5e, 0x7f, 0xff, 0xfa]), 348);
}

#[test]
fn multicast_list_sets_exactly_the_hashed_bits() {
    let mut h = harness();
    h.nic.enable_debugger().unwrap();
    h.nic.set_multicast_list(&[[0x01, 0x00, 0x5e, 0x00, 0x00, 0x01], [0x33, 0x33, 0x00, 0x00, 0x00, 0x01]]).unwrap();

    let chip = h.chip.lock();
    let hash = &chip.filter_ram[(RFADDR_HASH / 2) as usize..];
    for (i, word) in hash.iter().enumerate() {
        let expected = match i {
            // bit 255: byte 31, bit 7
            15 => 0x8000,
            // bit 499: byte 62, bit 3
            31 => 0x0008,
            _ => 0,
        };
        assert_eq!(*word, expected, "hash word {}", i);
    }
    assert_eq!(chip.reg(REG_RFCR), RFCR_RFEN | RFCR_AAB | RFCR_APM | RFCR_MHEN);
}

#[test]
fn filter_modes_select_the_right_bits() {
    let mut h = harness();
    h.nic.enable_debugger().unwrap();
    h.nic.set_multicast_mode(true).unwrap();
    assert_eq!(h.chip.lock().reg(REG_RFCR), RFCR_RFEN | RFCR_AAB | RFCR_APM | RFCR_AAM);
    h.nic.set_promiscuous_mode(true).unwrap();
    assert_eq!(h.chip.lock().reg(REG_RFCR), RFCR_RFEN | RFCR_AAB | RFCR_APM | RFCR_AAM | RFCR_AAU);
    h.nic.set_promiscuous_mode(false).unwrap();
    h.nic.set_multicast_mode(false).unwrap();
    assert_eq!(h.chip.lock().reg(REG_RFCR), RFCR_RFEN | RFCR_AAB | RFCR_APM | RFCR_MHEN);
}

#[test]
fn filter_set_while_off_is_applied_at_bring_up() {
    let mut h = harness();
    let before = h.chip.accesses();
    h.nic.set_multicast_list(&[[0xff; 6]]).unwrap();
    assert_eq!(h.chip.accesses(), before);

    h.nic.enable().unwrap();
    // bit 510: byte 63, bit 6
    assert_eq!(h.chip.lock().filter_ram[(RFADDR_HASH / 2) as usize + 31], 0x4000);
    assert!(h.nic.filter.hash_bit_is_set(510));
}

#[test]
fn station_address_round_trips_through_the_filter() {
    let mut h = harness();
    h.nic.enable_debugger().unwrap();
    let mac = [0x02, 0x11, 0x22, 0x33, 0x44, 0x55];
    h.nic.set_mac_address(mac).unwrap();
    assert_eq!(h.nic.mac_address(), mac);

    {
        let chip = h.chip.lock();
        let words = station_address_words(&mac);
        for i in 0..3 {
            assert_eq!(chip.filter_ram[i] as u32, words[i]);
        }
        assert_ne!(chip.reg(REG_RFCR) & RFCR_RFEN, 0);
    }

    // reading back through the filter window gives the new address
    let mut regs = h.chip.clone();
    assert_eq!(Dp83816Nic::read_mac_address_from_nic(&mut regs), mac);
    assert_eq!(h.nic.mac_hardware, EEPROM_MAC);
}

// ---- power management ----

#[test]
fn magic_packet_wake_needs_pme_support() {
    let mut h = harness();
    assert!(matches!(h.nic.set_wake_on_magic_packet(true), Err(Error::Unsupported(_))));
    h.nic.set_wake_on_magic_packet(false).unwrap();
}

#[test]
fn sleep_arms_magic_packet_wake_and_wake_restores_clients() {
    let mut h = build(test_config(), false, true, |_| { }).unwrap();
    assert!(h.nic.wake_on_lan().is_magic_supported());
    h.nic.set_wake_on_magic_packet(true).unwrap();
    h.nic.enable().unwrap();
    assert_eq!(h.chip.lock().reg(REG_WCSR), WCSR_WKMAG);

    h.nic.set_power_state(SystemPowerState::Sleep).unwrap();
    assert_eq!(h.nic.activation_level(), ActivationLevel::None);
    assert_eq!(h.alloc.live_regions(), 0);
    assert!(h.nic.wake_on_lan().is_asleep());
    {
        let chip = h.chip.lock();
        assert_eq!(chip.reg(REG_WCSR), WCSR_WKMAG);
        assert_ne!(chip.reg(REG_CCSR) & CCSR_PMEEN, 0);
        assert_eq!(chip.reg(REG_RXDP), 0);
        assert!(chip.rx_enabled);
    }
    let pmcsr = h.pci.0.lock().get_16(PM_CAP_OFFSET + 4);
    assert_ne!(pmcsr & (1 << 8), 0);

    h.nic.set_power_state(SystemPowerState::Wake).unwrap();
    assert_eq!(h.nic.activation_level(), ActivationLevel::FullyUp);
    assert!(!h.nic.wake_on_lan().is_asleep());
    assert_eq!(h.chip.lock().reg(REG_CCSR) & CCSR_PMEEN, 0);
    let pmcsr = h.pci.0.lock().get_16(PM_CAP_OFFSET + 4);
    assert_eq!(pmcsr & (1 << 8), 0);
}

#[test]
fn client_changes_while_asleep_wait_for_wake() {
    let mut h = build(test_config(), false, true, |_| { }).unwrap();
    h.nic.set_wake_on_magic_packet(true).unwrap();
    h.nic.enable().unwrap();
    h.nic.set_power_state(SystemPowerState::Sleep).unwrap();
    let resets = h.chip.lock().resets;

    h.nic.enable_debugger().unwrap();
    h.nic.disable().unwrap();
    assert_eq!(h.nic.activation_level(), ActivationLevel::None);
    assert!(h.nic.wake_on_lan().is_asleep());
    assert_eq!(h.alloc.live_regions(), 0);
    {
        let chip = h.chip.lock();
        assert_eq!(chip.resets, resets);
        assert_eq!(chip.reg(REG_WCSR), WCSR_WKMAG);
        assert_ne!(chip.reg(REG_CCSR) & CCSR_PMEEN, 0);
    }

    h.nic.set_power_state(SystemPowerState::Wake).unwrap();
    assert_eq!(h.nic.activation_level(), ActivationLevel::DebugOnly);
    assert!(!h.nic.wake_on_lan().is_asleep());
    assert_eq!(h.chip.lock().reg(REG_CCSR) & CCSR_PMEEN, 0);
}

#[test]
fn sleep_without_wake_leaves_the_receiver_off() {
    let mut h = build(test_config(), false, true, |_| { }).unwrap();
    h.nic.enable_debugger().unwrap();
    h.nic.set_power_state(SystemPowerState::Sleep).unwrap();
    {
        let chip = h.chip.lock();
        assert_eq!(chip.reg(REG_WCSR), 0);
        assert_eq!(chip.reg(REG_CCSR) & CCSR_PMEEN, 0);
        assert!(!chip.rx_enabled);
    }
    h.nic.set_power_state(SystemPowerState::Wake).unwrap();
    assert_eq!(h.nic.activation_level(), ActivationLevel::DebugOnly);
}
