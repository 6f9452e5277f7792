// Paging, eviction, pinning and stack-growth behavior.
use alloc::vec;
use alloc::vec::Vec;
use x86_64::structures::paging::Page;
use x86_64::VirtAddr;

use crate::memory::fault::{handle_page_fault, FaultCode};
use crate::memory::page::{self, PageLocation};
use crate::memory::{PAGE_SIZE, STACK_LIMIT};
use crate::process::Pid;
use crate::syscall::validate::{self, PinSet};

use super::support::{boot, user_load, user_store, TEST_ESP};

fn vpage(addr: u64) -> Page {
    Page::containing_address(VirtAddr::new(addr))
}

#[test]
fn demand_load_zero_fills() {
    let (kernel, _) = boot(4, 8);
    let proc = kernel.procs.spawn("p");
    let addr = VirtAddr::new(0x1000_0000);

    proc.page_map.lock().alloc_zero(vpage(0x1000_0000), true).unwrap();
    let esp = VirtAddr::new(TEST_ESP);
    let data = user_load(&kernel, &proc, esp, addr, PAGE_SIZE).unwrap();
    assert!(data.iter().all(|&b| b == 0));

    // Loading again does not reallocate
    let kpage_before = match proc.page_map.lock().lookup(vpage(0x1000_0000)).unwrap().location {
        PageLocation::InFrame(k) => k,
        other => panic!("expected resident page, got {:?}", other),
    };
    let kpage_after = page::force_load(&kernel, &proc, vpage(0x1000_0000)).unwrap();
    assert_eq!(kpage_before, kpage_after);
    assert_eq!(kernel.frames.len(), 1);
}

#[test]
fn stack_growth_window() {
    let (kernel, _) = boot(8, 8);
    let proc = kernel.procs.spawn("p");

    // Each case faults on a page nothing has touched before
    let esp_a = VirtAddr::new(STACK_LIMIT + 0x10_0000);
    assert!(handle_page_fault(&kernel, &proc, esp_a - 4u64, esp_a, FaultCode::WRITE).is_ok());

    let esp_b = VirtAddr::new(STACK_LIMIT + 0x20_0000);
    assert!(handle_page_fault(&kernel, &proc, esp_b - 32u64, esp_b, FaultCode::WRITE).is_ok());

    let esp_c = VirtAddr::new(STACK_LIMIT + 0x30_0000);
    assert!(handle_page_fault(&kernel, &proc, esp_c, esp_c, FaultCode::WRITE).is_ok());

    // More than 32 bytes below the stack pointer is not plausible
    let esp_d = VirtAddr::new(STACK_LIMIT + 0x40_0000);
    assert_eq!(
        handle_page_fault(&kernel, &proc, esp_d - 33u64, esp_d, FaultCode::WRITE),
        Err(crate::syscall::Trap::Exit(-1))
    );

    // Below the stack region entirely
    let low = VirtAddr::new(STACK_LIMIT - PAGE_SIZE as u64);
    assert!(handle_page_fault(&kernel, &proc, low, esp_a, FaultCode::WRITE).is_err());

    // Addresses above the window on an already-grown page succeed
    assert!(handle_page_fault(&kernel, &proc, esp_a - 8u64, esp_a, FaultCode::WRITE).is_ok());
}

#[test]
fn eviction_recovers_page_contents() {
    // Twice as many pages as frames, so reads force swap round trips
    let (kernel, _) = boot(4, 32);
    let proc = kernel.procs.spawn("p");
    let esp = VirtAddr::new(STACK_LIMIT);

    let pages = 8usize;
    for i in 0..pages {
        let addr = VirtAddr::new(STACK_LIMIT + (i * PAGE_SIZE) as u64);
        let fill = vec![i as u8 + 1; PAGE_SIZE];
        assert!(user_store(&kernel, &proc, esp, addr, &fill));
    }

    // The pool never exceeds its frame count
    assert!(kernel.frames.len() <= 4);
    let (swap_used, _) = kernel.swap.stats();
    assert!(swap_used > 0, "workload should have spilled to swap");

    for i in 0..pages {
        let addr = VirtAddr::new(STACK_LIMIT + (i * PAGE_SIZE) as u64);
        let data = user_load(&kernel, &proc, esp, addr, PAGE_SIZE).unwrap();
        assert!(
            data.iter().all(|&b| b == i as u8 + 1),
            "page {} lost its contents",
            i
        );
    }
}

#[test]
fn frame_table_matches_page_tables() {
    let (kernel, _) = boot(4, 32);
    let a = kernel.procs.spawn("a");
    let b = kernel.procs.spawn("b");
    let esp = VirtAddr::new(STACK_LIMIT);

    for i in 0..3usize {
        let addr = VirtAddr::new(STACK_LIMIT + (i * PAGE_SIZE) as u64);
        assert!(user_store(&kernel, &a, esp, addr, b"aa"));
        assert!(user_store(&kernel, &b, esp, addr, b"bb"));
    }

    let mut from_frames: Vec<(Pid, Page, u64)> = kernel
        .frames
        .snapshot()
        .into_iter()
        .map(|(kpage, owner, upage, _)| (owner, upage, kpage.as_u64()))
        .collect();
    from_frames.sort();

    let mut from_spts: Vec<(Pid, Page, u64)> = Vec::new();
    for proc in [&a, &b] {
        let spt = proc.page_map.lock();
        for (upage, slot) in spt.iter() {
            if let PageLocation::InFrame(kpage) = slot.location {
                from_spts.push((proc.pid, *upage, kpage.as_u64()));
            }
        }
    }
    from_spts.sort();

    assert_eq!(from_frames, from_spts);
}

#[test]
fn swap_bitmap_matches_descriptors() {
    let (kernel, _) = boot(2, 32);
    let proc = kernel.procs.spawn("p");
    let esp = VirtAddr::new(STACK_LIMIT);

    for i in 0..6usize {
        let addr = VirtAddr::new(STACK_LIMIT + (i * PAGE_SIZE) as u64);
        assert!(user_store(&kernel, &proc, esp, addr, &[i as u8; 64]));
    }

    let mut from_spt: Vec<usize> = Vec::new();
    {
        let spt = proc.page_map.lock();
        for (_, slot) in spt.iter() {
            if let PageLocation::InSwap(idx) = slot.location {
                from_spt.push(idx);
            }
        }
    }
    from_spt.sort_unstable();

    let mut from_bitmap = kernel.swap.used_slots();
    from_bitmap.sort_unstable();
    assert_eq!(from_spt, from_bitmap);
    assert!(!from_bitmap.is_empty());
}

#[test]
fn pinned_pages_survive_eviction_pressure() {
    let (kernel, _) = boot(4, 64);
    let a = kernel.procs.spawn("a");
    let b = kernel.procs.spawn("b");
    let esp = VirtAddr::new(STACK_LIMIT);

    // Two pages of state, then pin them the way the syscall gate would
    let pinned_base = VirtAddr::new(STACK_LIMIT + 0x10_0000);
    assert!(user_store(&kernel, &a, esp, pinned_base, &[0xaa; 2 * PAGE_SIZE]));

    let mut pins = PinSet::new();
    validate::validate_range(&kernel, &a, esp, &mut pins, pinned_base, 2 * PAGE_SIZE as u32)
        .unwrap();

    let resident_at = |addr: VirtAddr| match a
        .page_map
        .lock()
        .lookup(Page::containing_address(addr))
        .unwrap()
        .location
    {
        PageLocation::InFrame(k) => Some(k),
        _ => None,
    };
    let before = (
        resident_at(pinned_base).unwrap(),
        resident_at(pinned_base + PAGE_SIZE as u64).unwrap(),
    );

    // Hammer the pool from another process
    for i in 0..10usize {
        let addr = VirtAddr::new(STACK_LIMIT + (i * PAGE_SIZE) as u64);
        assert!(user_store(&kernel, &b, esp, addr, &[0xbb; 32]));
    }

    let after = (
        resident_at(pinned_base).expect("pinned page was evicted"),
        resident_at(pinned_base + PAGE_SIZE as u64).expect("pinned page was evicted"),
    );
    assert_eq!(before, after);

    // Released pages are fair game again
    validate::unpin_all(&kernel, &a, &mut pins);
    for i in 0..10usize {
        let addr = VirtAddr::new(STACK_LIMIT + 0x20_0000 + (i * PAGE_SIZE) as u64);
        assert!(user_store(&kernel, &b, esp, addr, &[0xcc; 32]));
    }
    assert!(
        resident_at(pinned_base).is_none() || resident_at(pinned_base + PAGE_SIZE as u64).is_none(),
        "unpinned cold pages should lose their frames under pressure"
    );

    // And their contents still come back intact
    let data = user_load(&kernel, &a, esp, pinned_base, 2 * PAGE_SIZE).unwrap();
    assert!(data.iter().all(|&x| x == 0xaa));
}

#[test]
fn dirty_file_pages_write_back_on_eviction() {
    let (kernel, _) = boot(2, 16);
    let proc = kernel.procs.spawn("p");
    let esp = VirtAddr::new(TEST_ESP);

    super::support::make_file(&kernel, "seg.bin", &[0x11; 300]);
    let file = kernel.filesys.lock().open("seg.bin").unwrap();

    let addr = VirtAddr::new(0x2000_0000);
    proc.page_map
        .lock()
        .alloc_file(vpage(0x2000_0000), file, 0, 300, None, true)
        .unwrap();

    assert!(user_store(&kernel, &proc, esp, addr, &[0x22; 16]));

    // Force the file page out by filling the two-frame pool
    for i in 0..4usize {
        let stack_addr = VirtAddr::new(STACK_LIMIT + (i * PAGE_SIZE) as u64);
        assert!(user_store(&kernel, &proc, VirtAddr::new(STACK_LIMIT), stack_addr, &[1; 8]));
    }

    {
        let spt = proc.page_map.lock();
        let slot = spt.lookup(vpage(0x2000_0000)).unwrap();
        assert_eq!(slot.location, PageLocation::InFile, "file page went to swap");
    }

    let on_disk = super::support::read_file(&kernel, "seg.bin");
    assert_eq!(&on_disk[..16], &[0x22; 16]);
    assert_eq!(&on_disk[16..], &[0x11; 284]);

    // And it reloads with the written contents
    let back = user_load(&kernel, &proc, esp, addr, 300).unwrap();
    assert_eq!(&back[..16], &[0x22; 16]);
}

#[test]
fn concurrent_faulting_processes_stay_consistent() {
    use std::thread;

    let (kernel, _) = boot(4, 64);
    let a = kernel.procs.spawn("a");
    let b = kernel.procs.spawn("b");
    let esp = VirtAddr::new(STACK_LIMIT);

    thread::scope(|scope| {
        for (proc, fill) in [(&a, 0x11u8), (&b, 0x22u8)] {
            let kernel = &kernel;
            scope.spawn(move || {
                for round in 0..3 {
                    for i in 0..6usize {
                        let addr = VirtAddr::new(STACK_LIMIT + (i * PAGE_SIZE) as u64);
                        assert!(user_store(kernel, proc, esp, addr, &[fill; 128]));
                    }
                    for i in 0..6usize {
                        let addr = VirtAddr::new(STACK_LIMIT + (i * PAGE_SIZE) as u64);
                        let data = user_load(kernel, proc, esp, addr, 128).unwrap();
                        assert!(
                            data.iter().all(|&x| x == fill),
                            "round {}: page {} corrupted",
                            round,
                            i
                        );
                    }
                }
            });
        }
    });

    assert!(kernel.frames.len() <= 4);

    // Nothing is left pinned once the dust settles
    assert!(kernel.frames.snapshot().iter().all(|&(_, _, _, pinned)| !pinned));
}
