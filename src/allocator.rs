//! The simplest possible allocator: a one-up counter for logical addresses
//! and a bump counter for physical addresses.
//!
//! Its state is persisted as a slotted object with the fixed-space
//! `OblAllocator` shape (slots `next_logical`, `next_physical`, both integer
//! objects). Because the slot integers are mutated through the ordinary
//! object API, the updated counters join the write set and are persisted by
//! the commit that consumed them.

use std::sync::Arc;

use crate::error::ErrorCode;
use crate::fixedspace::{self, FixedAddress};
use crate::object::ObjectRef;
use crate::session::Session;
use crate::{LogicalAddress, PhysicalAddress, LOGICAL_UNASSIGNED, PHYSICAL_UNASSIGNED};

/// Resolved handle over the persisted allocator record.
pub struct Allocator {
    next_logical: ObjectRef,
    next_physical: ObjectRef,
}

impl Allocator {
    /// Load the allocator named by the root record through `session`.
    /// Reports `MISSING_SYSTEM_OBJECT` and returns `None` if the object
    /// there does not carry the allocator shape.
    pub fn resolve(session: &Session) -> Option<Allocator> {
        let db = session.database().clone();
        let address = db.root_snapshot().allocator_addr;
        let allocator = session.at_address(address);

        let expected = fixedspace::shape_at(FixedAddress::AllocatorShape);
        if !Arc::ptr_eq(&allocator.shape(), &expected) {
            db.report_error(
                ErrorCode::MissingSystemObject,
                Some("Allocator has incorrect shape."),
            );
            return None;
        }

        Some(Allocator {
            next_logical: allocator.slotted_at(0),
            next_physical: allocator.slotted_at(1),
        })
    }

    /// Wrap already-materialized counter objects; the bootstrap uses this
    /// before the allocator has ever been written.
    pub(crate) fn from_parts(next_logical: ObjectRef, next_physical: ObjectRef) -> Allocator {
        Allocator {
            next_logical,
            next_physical,
        }
    }

    /// Hand out the next free logical address and advance the counter.
    /// Returns the unassigned sentinel if the counter object is damaged.
    pub fn allocate_logical(&self) -> LogicalAddress {
        let result = self.next_logical.integer_value();
        if result == 0 {
            return LOGICAL_UNASSIGNED;
        }
        advance(&self.next_logical, result + 1);
        result as LogicalAddress
    }

    /// Hand out `size` words of file space and advance the counter.
    pub fn allocate_physical(&self, size: u32) -> PhysicalAddress {
        let result = self.next_physical.integer_value();
        if result == 0 {
            return PHYSICAL_UNASSIGNED;
        }
        advance(&self.next_physical, result + size as i32);
        result as PhysicalAddress
    }
}

/// Move a counter forward. The updated integer joins any open transaction's
/// write set, but allocation never opens (or commits) one itself: it runs in
/// the middle of commit, where the ordinary mutation path would recurse.
fn advance(counter: &ObjectRef, new_value: i32) {
    if let Some(session) = counter.session_ref() {
        session.mark_dirty(counter);
    }
    counter.integer_set_raw(new_value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Object;
    use crate::DbOptions;

    #[test]
    fn counters_advance() {
        let logical = Object::integer(2);
        let physical = Object::integer(1);
        let alloc = Allocator::from_parts(logical, physical);

        assert_eq!(alloc.allocate_logical(), 2);
        assert_eq!(alloc.allocate_logical(), 3);
        assert_eq!(alloc.allocate_logical(), 4);

        assert_eq!(alloc.allocate_physical(10), 1);
        assert_eq!(alloc.allocate_physical(5), 11);
        assert_eq!(alloc.allocate_physical(256), 16);
    }

    #[test]
    fn damaged_counter_yields_unassigned() {
        // A nil where an integer should be reads as zero, and zero is the
        // unassigned sentinel.
        let alloc = Allocator::from_parts(crate::nil(), crate::nil());
        assert_eq!(alloc.allocate_logical(), LOGICAL_UNASSIGNED);
        assert_eq!(alloc.allocate_physical(4), PHYSICAL_UNASSIGNED);
    }

    #[test]
    fn resolve_from_bootstrapped_database() {
        let dir = tempfile::tempdir().unwrap();
        let db = DbOptions::new(dir.path().join("alloc.obl")).open().unwrap();
        let session = db.session();

        let alloc = Allocator::resolve(&session).unwrap();
        // Three bootstrap objects consumed logical addresses 1 through 3.
        assert_eq!(alloc.allocate_logical(), 4);
        // Bootstrap physical allocation ended past the first tree page.
        assert!(alloc.allocate_physical(2) > 5);
        assert!(db.ok());
    }

    #[test]
    fn wrong_shape_reports_missing_system_object() {
        let dir = tempfile::tempdir().unwrap();
        let db = DbOptions::new(dir.path().join("bad_alloc.obl")).open().unwrap();
        let session = db.session();

        // Replace the allocator's read-set entry with a plain integer.
        let imposter = Object::integer(9);
        imposter.set_logical(db.root_snapshot().allocator_addr);
        db.read_set_insert(imposter);

        assert!(Allocator::resolve(&session).is_none());
        assert_eq!(
            db.last_error().unwrap().code,
            ErrorCode::MissingSystemObject
        );
    }
}
