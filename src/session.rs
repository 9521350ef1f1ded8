//! Sessions: per-user handles onto a database.
//!
//! A session carries the current transaction (guarded by the session mutex)
//! and stamps itself onto every object it materializes, so that later
//! mutations of those objects know which write set to join. Dropping the
//! last handle to a session aborts any transaction still open on it.

use std::sync::{Arc, Mutex, Weak};

use crate::allocator::Allocator;
use crate::database::Database;
use crate::object::{self, ObjectRef};
use crate::transaction::SessionState;
use crate::{LogicalAddress, LOGICAL_UNASSIGNED};

pub(crate) struct SessionInner {
    pub(crate) db: Database,
    pub(crate) state: Mutex<SessionState>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        // An open transaction dies with its session: dropping the write set
        // without writing is an abort.
        if let Ok(state) = self.state.get_mut() {
            if state.current.take().is_some() {
                tracing::debug!("session dropped with an open transaction; aborted");
            }
        }
    }
}

/// Handle to one session. Clone freely; all clones share the same
/// transaction state.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub(crate) fn new(db: Database) -> Session {
        Session {
            inner: Arc::new(SessionInner {
                db,
                state: Mutex::new(SessionState { current: None }),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<SessionInner>) -> Session {
        Session { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<SessionInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn state(&self) -> &Mutex<SessionState> {
        &self.inner.state
    }

    pub fn database(&self) -> &Database {
        &self.inner.db
    }

    /// The most basic query: the object living at a known logical address,
    /// materialized to the database's default stub depth. Never returns a
    /// stub; an unassigned address yields nil.
    pub fn at_address(&self, address: LogicalAddress) -> ObjectRef {
        self.at_address_depth(address, self.inner.db.default_stub_depth())
    }

    /// As [`Session::at_address`] with an explicit depth budget. References
    /// deeper than the budget load lazily on access.
    pub fn at_address_depth(&self, address: LogicalAddress, depth: i32) -> ObjectRef {
        let object = self
            .inner
            .db
            .at_address_depth_internal(Some(self), address, depth);
        // Depth 0 registers a stub; resolve it so client code never sees
        // one.
        object::resolve_stub(object)
    }

    /// Adopt a client-created object for persistence: attach this session,
    /// assign a logical address, register it in the read set, and enter it
    /// into the current transaction's write set. Creates (and immediately
    /// commits) a transaction when none is open. Returns the assigned
    /// logical address, or the unassigned sentinel on failure.
    pub fn persist(&self, object: &ObjectRef) -> LogicalAddress {
        object.attach_database(&self.inner.db);
        object.attach_session(self);

        let created = self.ensure();

        if object.logical() == LOGICAL_UNASSIGNED {
            let Some(allocator) = Allocator::resolve(self) else {
                if created {
                    self.abort();
                }
                return LOGICAL_UNASSIGNED;
            };
            let address = allocator.allocate_logical();
            if address == LOGICAL_UNASSIGNED {
                if created {
                    self.abort();
                }
                return LOGICAL_UNASSIGNED;
            }
            object.set_logical(address);
        }

        self.inner.db.read_set_insert(object.clone());
        self.mark_dirty(object);

        if created {
            let _ = self.commit();
        }
        object.logical()
    }

    /// Drop an object from this session's write set, if present.
    pub(crate) fn release(&self, object: &ObjectRef) {
        let mut state = self.inner.state.lock().expect("session lock");
        if let Some(tx) = state.current.as_mut() {
            tx.write_set.remove(object);
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("in_transaction", &self.in_transaction())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Object;
    use crate::{DbOptions, StorageTag};

    fn open_temp(name: &str) -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = DbOptions::new(dir.path().join(name)).open().unwrap();
        (dir, db)
    }

    #[test]
    fn materialized_objects_carry_the_session() {
        let (_dir, db) = open_temp("carry.obl");
        let session = db.session();

        let allocator = session.at_address(db.root_snapshot().allocator_addr);
        let carried = allocator.session_ref().unwrap();
        assert!(Arc::ptr_eq(&carried.inner, &session.inner));
    }

    #[test]
    fn persist_assigns_addresses_and_commits() {
        let (_dir, db) = open_temp("persist.obl");
        let session = db.session();

        let o = Object::integer(900);
        // No transaction open: persist creates one and commits it.
        let address = session.persist(&o);
        assert_ne!(address, LOGICAL_UNASSIGNED);
        assert!(!session.in_transaction());
        assert_ne!(o.physical(), 0);

        // The object is now the canonical occupant of its address.
        let read_back = session.at_address(address);
        assert!(Arc::ptr_eq(&read_back, &o));
    }

    #[test]
    fn persist_within_transaction_defers_to_commit() {
        let (_dir, db) = open_temp("persist_tx.obl");
        let session = db.session();

        session.begin().unwrap();
        let o = Object::integer(31337);
        let address = session.persist(&o);
        assert_ne!(address, LOGICAL_UNASSIGNED);
        assert!(session.in_transaction());
        // Not written yet.
        assert_eq!(o.physical(), 0);

        session.commit().unwrap();
        assert_ne!(o.physical(), 0);
    }

    #[test]
    fn depth_limited_reads_resolve_transparently() {
        let (_dir, db) = open_temp("stubs.obl");
        let session = db.session();

        let members: Vec<ObjectRef> = [427, 3442, 37].iter().map(|&v| Object::integer(v)).collect();
        let tuple = Object::fixed(3);
        session.begin().unwrap();
        for (i, member) in members.iter().enumerate() {
            session.persist(member);
            tuple.fixed_at_put(i as u32, member.clone());
        }
        let tuple_address = session.persist(&tuple);
        session.commit().unwrap();
        db.close();

        // Fresh process-view: reopen and load with a depth budget of 1, so
        // the members come back as stubs behind the tuple.
        let db = DbOptions::new(db.filename()).open().unwrap();
        let session = db.session();
        let loaded = session.at_address_depth(tuple_address, 1);
        assert_eq!(loaded.storage_tag(), StorageTag::Fixed);
        assert!(loaded.fixed_at_raw(0).unwrap().is_stub());

        // Public access resolves the stub in place.
        let first = loaded.fixed_at(0);
        assert!(!first.is_stub());
        assert_eq!(first.integer_value(), 427);
        assert_eq!(loaded.fixed_at(2).integer_value(), 37);
    }

    #[test]
    fn dropping_a_session_aborts_its_transaction() {
        let (_dir, db) = open_temp("drop_abort.obl");
        let address;
        {
            let session = db.session();
            session.begin().unwrap();
            let o = Object::integer(1);
            address = session.persist(&o);
            assert_ne!(address, LOGICAL_UNASSIGNED);
            // Session goes out of scope with the transaction open.
        }

        // Nothing reached the file: a fresh open finds no mapping for the
        // address. (The logical address was consumed in memory only.)
        db.close();
        let db = DbOptions::new(db.filename()).open().unwrap();
        let session = db.session();
        assert!(session.at_address(address).is_nil());
    }
}
