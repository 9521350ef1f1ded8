//! Transactions: write-set collection and the commit protocol.
//!
//! A transaction is a write set (ordered by logical address) hanging off
//! its session. Mutators enter objects into it via `mark_dirty`; commit
//! drains it in ascending address order and serializes each object,
//! allocating addresses and growing the file on the way. Abort throws the
//! write set away; the file is untouched.
//!
//! Commit writes in passes: serializing new objects advances the allocator,
//! whose counter objects join the write set mid-commit and are drained by a
//! follow-up pass. A root record moved by address-map growth is rewritten
//! last.

use crate::allocator::Allocator;
use crate::codec;
use crate::database::Database;
use crate::error::{DbError, ErrorCode};
use crate::mapping::Mapping;
use crate::object::{Object, ObjectRef};
use crate::session::Session;
use crate::set::{logical_address_key, ObjSet};
use crate::{addressmap, LOGICAL_UNASSIGNED, PHYSICAL_UNASSIGNED};

/// One open transaction. Owned by its session; at most one at a time.
pub(crate) struct Transaction {
    pub(crate) write_set: ObjSet,
}

pub(crate) struct SessionState {
    pub(crate) current: Option<Transaction>,
}

impl Session {
    /// Open a transaction. Reports (and returns) `ALREADY_IN_TRANSACTION`
    /// if one is open on this session.
    pub fn begin(&self) -> Result<(), DbError> {
        let mut state = self.state().lock().expect("session lock");
        if state.current.is_some() {
            drop(state);
            self.database()
                .report_error(ErrorCode::AlreadyInTransaction, None);
            return Err(DbError::with_default(ErrorCode::AlreadyInTransaction));
        }
        state.current = Some(Transaction {
            write_set: ObjSet::new(logical_address_key),
        });
        Ok(())
    }

    /// Open a transaction unless one already is. Returns whether this call
    /// created it (and therefore owes the matching commit).
    pub fn ensure(&self) -> bool {
        let mut state = self.state().lock().expect("session lock");
        match state.current {
            Some(_) => false,
            None => {
                state.current = Some(Transaction {
                    write_set: ObjSet::new(logical_address_key),
                });
                true
            }
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.state().lock().expect("session lock").current.is_some()
    }

    /// Enter an object into the current transaction's write set. A no-op
    /// without an open transaction or an assigned logical address.
    pub fn mark_dirty(&self, object: &ObjectRef) {
        if object.logical() == LOGICAL_UNASSIGNED {
            return;
        }
        let mut state = self.state().lock().expect("session lock");
        if let Some(tx) = state.current.as_mut() {
            tx.write_set.insert(object.clone());
        }
    }

    /// Serialize the write set in ascending logical-address order and end
    /// the transaction. Without an open transaction this is a no-op.
    pub fn commit(&self) -> Result<(), DbError> {
        let db = self.database().clone();

        // Resolving the allocator may read the file; do it before the map
        // is locked for writing.
        let needs_write = {
            let state = self.state().lock().expect("session lock");
            match &state.current {
                None => return Ok(()),
                Some(tx) => !tx.write_set.is_empty(),
            }
        };

        if needs_write {
            let Some(allocator) = Allocator::resolve(self) else {
                return Err(self
                    .database()
                    .last_error()
                    .unwrap_or_else(|| DbError::with_default(ErrorCode::MissingSystemObject)));
            };

            // Serializing a pass can dirty the allocator counters; keep
            // draining until the write set stays empty.
            loop {
                let batch = {
                    let mut state = self.state().lock().expect("session lock");
                    match state.current.as_mut() {
                        Some(tx) => tx.write_set.drain_inorder(),
                        None => break,
                    }
                };
                if batch.is_empty() {
                    break;
                }

                let mut guard = db.content().write().expect("content lock");
                let Some(mem) = guard.as_mut() else {
                    db.report_error(ErrorCode::DatabaseNotOpen, None);
                    return Err(DbError::with_default(ErrorCode::DatabaseNotOpen));
                };
                for object in &batch {
                    write_object_allocating(&db, mem, &allocator, object);
                }
            }

            // Address-map growth moves the root; rewrite it once, last.
            if db.root_snapshot().dirty {
                let mut guard = db.content().write().expect("content lock");
                if let Some(mem) = guard.as_mut() {
                    db.write_root(mem);
                }
            }
        }

        self.state().lock().expect("session lock").current = None;
        Ok(())
    }

    /// Throw the write set away and end the transaction. In-memory objects
    /// keep their modified state; the file keeps its old one.
    pub fn abort(&self) {
        let mut state = self.state().lock().expect("session lock");
        if state.current.take().is_none() {
            tracing::debug!("abort with no open transaction");
        }
    }
}

/// Write one object, allocating its addresses if it has none: a fresh
/// logical address from the allocator, then file space sized by the codec,
/// file growth when the extent runs past the mapped words, and the
/// address-map entry, before serializing.
fn write_object_allocating(db: &Database, mem: &mut Mapping, allocator: &Allocator, object: &ObjectRef) {
    if object.logical() == LOGICAL_UNASSIGNED {
        let address = allocator.allocate_logical();
        if address == LOGICAL_UNASSIGNED {
            return;
        }
        object.set_logical(address);
    }

    if object.physical() == PHYSICAL_UNASSIGNED {
        let size = codec::word_size(object);
        if size == 0 {
            return;
        }
        let physical = allocator.allocate_physical(size);
        if physical == PHYSICAL_UNASSIGNED {
            return;
        }

        while physical as u64 + size as u64 > mem.words() as u64 {
            if mem.grow(db.growth_size()).is_err() {
                return;
            }
        }

        object.set_physical(physical);
        addressmap::assign(db, mem, allocator, object.logical(), physical);
    }

    codec::write_object(object, mem);
}

/// The ensure-and-mark step shared by the object mutators: locate the
/// session, open a transaction if none is, and enter the object into the
/// write set. Returns what `finish_mutation` needs to close the loop.
pub(crate) fn mutation_guard(object: &Object) -> Option<(Session, bool)> {
    let session = object.session_ref()?;
    let created = session.ensure();

    if object.logical() != LOGICAL_UNASSIGNED {
        // The write set stores shared handles; recover this object's from
        // the read set (the uniqueness invariant makes them the same).
        if let Some(handle) = session.database().read_set_lookup(object.logical()) {
            if std::ptr::eq(std::sync::Arc::as_ptr(&handle), object as *const Object) {
                session.mark_dirty(&handle);
            }
        }
    }

    Some((session, created))
}

/// Commit the transaction a mutation created for itself.
pub(crate) fn finish_mutation(guard: Option<(Session, bool)>) {
    if let Some((session, true)) = guard {
        let _ = session.commit();
    }
}
