//! The logical-to-physical address map: a radix tree of fixed-fanout pages
//! stored inside the database file.
//!
//! Each page is `[shape_word, height, entry_0 .. entry_{fanout-1}]`. Leaves
//! (height 0) hold target physical addresses; branches hold child page
//! addresses. The index of a logical address within a page of height `h` is
//! bits `h*PAGE_SHIFT .. (h+1)*PAGE_SHIFT` of the address.
//!
//! Both for efficiency and to avoid a circular dependency, the map performs
//! its own raw word I/O rather than going through the codec: assignment runs
//! during commit, and commit is the codec's client.

use crate::allocator::Allocator;
use crate::database::Database;
use crate::error::ErrorCode;
use crate::fixedspace::FixedAddress;
use crate::mapping::Mapping;
use crate::{LogicalAddress, PhysicalAddress, CHUNK_SIZE, PAGE_FANOUT, PAGE_SHIFT, PHYSICAL_UNASSIGNED};

/// Resolve a logical address to the physical address recorded for it, or
/// the unassigned sentinel when no mapping exists. Reports `WRONG_STORAGE`
/// if the root page fails its shape check.
pub(crate) fn lookup(db: &Database, mem: &Mapping, logical: LogicalAddress) -> PhysicalAddress {
    let base = db.root_snapshot().address_map_addr;
    if !verify_tree_page(db, mem, base) {
        return PHYSICAL_UNASSIGNED;
    }

    let height = mem.word(base + 1);

    // Any address with bits above the root's window is unassigned by
    // definition.
    let window = (height as u64 + 1) * PAGE_SHIFT as u64;
    if window < 32 && (logical as u64 >> window) != 0 {
        return PHYSICAL_UNASSIGNED;
    }

    lookup_in(db, mem, base, logical)
}

fn lookup_in(
    db: &Database,
    mem: &Mapping,
    page_base: PhysicalAddress,
    logical: LogicalAddress,
) -> PhysicalAddress {
    if !verify_tree_page(db, mem, page_base) {
        return PHYSICAL_UNASSIGNED;
    }

    let height = mem.word(page_base + 1);
    let index = page_index(logical, height);
    let value = mem.word(page_base + 2 + index);

    if height == 0 || value == PHYSICAL_UNASSIGNED {
        value
    } else {
        lookup_in(db, mem, value, logical)
    }
}

/// Record `physical` as the location of `logical`, growing the tree upward
/// and creating intermediate pages on demand. New pages are allocated
/// through the allocator and extend the file when they run past the mapped
/// extent; a root change marks the root record dirty.
pub(crate) fn assign(
    db: &Database,
    mem: &mut Mapping,
    allocator: &Allocator,
    logical: LogicalAddress,
    physical: PhysicalAddress,
) {
    let mut required_height = 0u32;
    let mut copied = logical;
    loop {
        copied >>= PAGE_SHIFT;
        if copied == 0 {
            break;
        }
        required_height += 1;
    }

    let mut base = db.root_snapshot().address_map_addr;
    if !verify_tree_page(db, mem, base) {
        return;
    }

    let height = mem.word(base + 1);
    if height < required_height {
        // Grow upward: each new level's index 0 covers the address window
        // the old root served.
        let mut previous = base;
        for new_height in height + 1..=required_height {
            let new_page = create_tree_page(db, mem, allocator, new_height);
            if new_page == PHYSICAL_UNASSIGNED {
                return;
            }
            mem.set_word(new_page + 2, previous);
            previous = new_page;
        }
        base = previous;
        db.set_address_map_root(previous);
    }

    assign_in(db, mem, allocator, base, logical, physical);
}

fn assign_in(
    db: &Database,
    mem: &mut Mapping,
    allocator: &Allocator,
    page_base: PhysicalAddress,
    key: LogicalAddress,
    value: PhysicalAddress,
) {
    if !verify_tree_page(db, mem, page_base) {
        return;
    }

    let height = mem.word(page_base + 1);
    let index = page_index(key, height);

    if height == 0 {
        mem.set_word(page_base + 2 + index, value);
    } else {
        let mut next_page = mem.word(page_base + 2 + index);
        if next_page == PHYSICAL_UNASSIGNED {
            next_page = create_tree_page(db, mem, allocator, height - 1);
            if next_page == PHYSICAL_UNASSIGNED {
                return;
            }
            mem.set_word(page_base + 2 + index, next_page);
        }
        assign_in(db, mem, allocator, next_page, key, value);
    }
}

/// Isolate the height-th `PAGE_SHIFT`-bit window of a logical address.
fn page_index(logical: LogicalAddress, height: u32) -> u32 {
    let shift = (PAGE_SHIFT as u64) * (height as u64);
    if shift >= 32 {
        return 0;
    }
    ((logical as u64 >> shift) as u32) & (PAGE_FANOUT - 1)
}

/// Allocate and initialize a page of the given height, entries all
/// unassigned. Returns the unassigned sentinel if allocation fails.
fn create_tree_page(
    db: &Database,
    mem: &mut Mapping,
    allocator: &Allocator,
    height: u32,
) -> PhysicalAddress {
    let base = allocator.allocate_physical(CHUNK_SIZE + 2);
    if base == PHYSICAL_UNASSIGNED {
        return base;
    }

    while base as u64 + (CHUNK_SIZE + 2) as u64 > mem.words() as u64 {
        if mem.grow(db.growth_size()).is_err() {
            return PHYSICAL_UNASSIGNED;
        }
    }

    mem.set_word(base, FixedAddress::AddrTreePageShape.address());
    mem.set_word(base + 1, height);
    for i in 0..CHUNK_SIZE {
        mem.set_word(base + 2 + i, PHYSICAL_UNASSIGNED);
    }

    base
}

fn verify_tree_page(db: &Database, mem: &Mapping, base: PhysicalAddress) -> bool {
    if mem.word(base) != FixedAddress::AddrTreePageShape.address() {
        db.report_error(ErrorCode::WrongStorage, Some("The address map is corrupted."));
        false
    } else {
        true
    }
}
