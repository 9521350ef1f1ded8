//! The database: an environment object mediating access to a single
//! ObjectLite file.
//!
//! A `Database` is a cheap handle over shared state (the mapped file, the
//! root record, the read set, the last-error slot); clone it freely. The
//! read set is the authority on which objects are live: at most one
//! in-memory representation exists per logical address, and lookups consult
//! it before ever touching the file.
//!
//! Locking follows the loader pattern: the read-set mutex is held around
//! lookups and insertions but never across deserialization, which can
//! itself trigger nested loads.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock, Weak};

use crate::addressmap;
use crate::allocator::Allocator;
use crate::codec::{self, LoadCtx};
use crate::error::{DbError, ErrorCode};
use crate::fixedspace::{self, FixedAddress};
use crate::logging::{LogConfig, LogLevel};
use crate::mapping::Mapping;
use crate::object::{Object, ObjectRef};
use crate::session::Session;
use crate::set::{logical_address_key, ObjSet};
use crate::{
    LogicalAddress, PhysicalAddress, DEFAULT_GROWTH_SIZE, DEFAULT_STUB_DEPTH, LOGICAL_UNASSIGNED,
    MAGIC_WORD, PHYSICAL_UNASSIGNED,
};

/// The root record: words 1..=4 of the file, plus a dirty flag. The root is
/// not an object and never joins a write set; the flag marks it for rewrite
/// at the end of the commit that moved it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RootRecord {
    /// Physical address of the address map's root tree page.
    pub address_map_addr: PhysicalAddress,
    /// Logical address of the persisted allocator record.
    pub allocator_addr: LogicalAddress,
    /// Reserved: root of the name dictionary. Never written with live data.
    pub name_map_addr: LogicalAddress,
    /// Reserved: root of the shape dictionary. Never written with live data.
    pub shape_map_addr: LogicalAddress,
    pub dirty: bool,
}

/// On-disk image of the magic word and root record, big-endian fields.
#[derive(Clone, Copy, bytemuck::Zeroable, bytemuck::Pod)]
#[repr(C)]
struct RawRoot {
    magic: u32,
    address_map: u32,
    allocator: u32,
    name_map: u32,
    shape_map: u32,
}

const ROOT_BYTES: usize = std::mem::size_of::<RawRoot>();

pub(crate) struct DbCore {
    filename: PathBuf,
    log_config: LogConfig,
    default_stub_depth: i32,
    growth_size: u32,
    last_error: Mutex<Option<DbError>>,
    root: Mutex<RootRecord>,
    content: RwLock<Option<Mapping>>,
    read_set: Mutex<ObjSet>,
}

/// Options recognized at database creation, builder style.
#[derive(Debug, Clone)]
pub struct DbOptions {
    filename: PathBuf,
    log_level: LogLevel,
    log_file: Option<PathBuf>,
    default_stub_depth: i32,
    growth_size: u32,
    allow_creation: bool,
}

impl DbOptions {
    pub fn new(filename: impl Into<PathBuf>) -> DbOptions {
        DbOptions {
            filename: filename.into(),
            log_level: LogLevel::Default,
            log_file: None,
            default_stub_depth: DEFAULT_STUB_DEPTH,
            growth_size: DEFAULT_GROWTH_SIZE,
            allow_creation: true,
        }
    }

    pub fn log_level(mut self, level: LogLevel) -> DbOptions {
        self.log_level = level;
        self
    }

    pub fn log_file(mut self, path: impl Into<PathBuf>) -> DbOptions {
        self.log_file = Some(path.into());
        self
    }

    /// How deep object graphs materialize before leaving stubs.
    pub fn default_stub_depth(mut self, depth: i32) -> DbOptions {
        self.default_stub_depth = depth.max(0);
        self
    }

    /// File growth increment, in words.
    pub fn growth_size(mut self, words: u32) -> DbOptions {
        self.growth_size = words.max(1);
        self
    }

    /// Whether opening may bootstrap a file that does not exist yet.
    pub fn allow_creation(mut self, allow: bool) -> DbOptions {
        self.allow_creation = allow;
        self
    }

    pub fn open(self) -> Result<Database, DbError> {
        Database::open(self)
    }
}

/// Handle to one open ObjectLite database.
#[derive(Clone)]
pub struct Database {
    core: Arc<DbCore>,
}

impl Database {
    /// Open (optionally creating and bootstrapping) the database named by
    /// `options`. The error, if any, is also left in the last-error slot.
    pub fn open(options: DbOptions) -> Result<Database, DbError> {
        let core = Arc::new(DbCore {
            filename: options.filename,
            log_config: LogConfig {
                level: options.log_level,
                file: options.log_file,
            },
            default_stub_depth: options.default_stub_depth,
            growth_size: options.growth_size,
            last_error: Mutex::new(None),
            root: Mutex::new(RootRecord::default()),
            content: RwLock::new(None),
            read_set: Mutex::new(ObjSet::new(logical_address_key)),
        });
        let db = Database { core };
        db.open_file(options.allow_creation)?;
        Ok(db)
    }

    pub(crate) fn from_core(core: Arc<DbCore>) -> Database {
        Database { core }
    }

    pub(crate) fn downgrade(&self) -> Weak<DbCore> {
        Arc::downgrade(&self.core)
    }

    fn open_file(&self, allow_creation: bool) -> Result<(), DbError> {
        let (mapping, fresh) =
            match Mapping::open(&self.core.filename, allow_creation, self.core.growth_size) {
                Ok(opened) => opened,
                Err(error) => {
                    self.store_error(error.clone());
                    return Err(error);
                }
            };

        *self.core.content.write().expect("content lock") = Some(mapping);

        if fresh {
            self.bootstrap();
        } else {
            self.read_root()?;
        }

        tracing::debug!(file = %self.core.filename.display(), fresh, "database opened");
        Ok(())
    }

    /// Populate an empty file: magic word, root record, the allocator and
    /// its two counters, and one leaf page of the address map.
    fn bootstrap(&self) {
        let allocator_shape = fixedspace::shape_at(FixedAddress::AllocatorShape);
        let allocator = Object::slotted(&allocator_shape);
        let next_physical = Object::integer(0);
        let next_logical = Object::integer(0);
        let tree_page = Object::addr_tree_page(0);

        for object in [&allocator, &next_physical, &next_logical, &tree_page] {
            object.attach_database(self);
        }

        // Logical 0 is the unassigned sentinel. Physical 0 holds the magic
        // word and 1..=4 the root record; allocation begins at 5.
        let mut current_logical: LogicalAddress = 1;
        let mut current_physical: PhysicalAddress = 5;

        allocator.set_logical(current_logical);
        allocator.set_physical(current_physical);
        current_logical += 1;
        current_physical += codec::word_size(&allocator);

        next_physical.set_logical(current_logical);
        next_physical.set_physical(current_physical);
        allocator.slotted_at_str_put("next_physical", next_physical.clone());
        current_logical += 1;
        current_physical += codec::word_size(&next_physical);

        next_logical.set_logical(current_logical);
        next_logical.set_physical(current_physical);
        allocator.slotted_at_str_put("next_logical", next_logical.clone());
        current_logical += 1;
        current_physical += codec::word_size(&next_logical);

        // Address map pages are not assigned logical addresses.
        tree_page.set_physical(current_physical);
        current_physical += codec::word_size(&tree_page);

        {
            let mut root = self.core.root.lock().expect("root lock");
            root.address_map_addr = tree_page.physical();
            root.allocator_addr = allocator.logical();
            root.name_map_addr = LOGICAL_UNASSIGNED;
            root.shape_map_addr = LOGICAL_UNASSIGNED;
        }
        next_physical.integer_set_raw(current_physical as i32);
        next_logical.integer_set_raw(current_logical as i32);

        let mut guard = self.core.content.write().expect("content lock");
        let mem = guard.as_mut().expect("bootstrap on an open database");
        while current_physical as u64 > mem.words() as u64 {
            if mem.grow(self.core.growth_size).is_err() {
                return;
            }
        }

        self.write_root(mem);
        codec::write_object(&allocator, mem);
        codec::write_object(&next_physical, mem);
        codec::write_object(&next_logical, mem);
        codec::write_object(&tree_page, mem);

        let boot_allocator = Allocator::from_parts(next_logical.clone(), next_physical.clone());
        for object in [&allocator, &next_physical, &next_logical] {
            addressmap::assign(self, mem, &boot_allocator, object.logical(), object.physical());
        }
        drop(guard);

        let mut read_set = self.core.read_set.lock().expect("read set lock");
        read_set.insert(allocator);
        read_set.insert(next_physical);
        read_set.insert(next_logical);
    }

    fn read_root(&self) -> Result<(), DbError> {
        let raw: RawRoot = {
            let guard = self.core.content.read().expect("content lock");
            let mem = guard.as_ref().expect("read_root on an open database");
            bytemuck::pod_read_unaligned(mem.bytes(ROOT_BYTES))
        };

        if u32::from_be(raw.magic) != MAGIC_WORD {
            let error = DbError::new(
                ErrorCode::UnableToReadFile,
                format!(
                    "<{}> is not an ObjectLite database.",
                    self.core.filename.display()
                ),
            );
            self.store_error(error.clone());
            *self.core.content.write().expect("content lock") = None;
            return Err(error);
        }

        let mut root = self.core.root.lock().expect("root lock");
        root.address_map_addr = u32::from_be(raw.address_map);
        root.allocator_addr = u32::from_be(raw.allocator);
        root.name_map_addr = u32::from_be(raw.name_map);
        root.shape_map_addr = u32::from_be(raw.shape_map);
        root.dirty = false;
        Ok(())
    }

    /// Serialize the root record (and magic word) back into the file and
    /// clear the dirty flag.
    pub(crate) fn write_root(&self, mem: &mut Mapping) {
        let mut root = self.core.root.lock().expect("root lock");
        let raw = RawRoot {
            magic: MAGIC_WORD.to_be(),
            address_map: root.address_map_addr.to_be(),
            allocator: root.allocator_addr.to_be(),
            name_map: root.name_map_addr.to_be(),
            shape_map: root.shape_map_addr.to_be(),
        };
        mem.bytes_mut(ROOT_BYTES).copy_from_slice(bytemuck::bytes_of(&raw));
        root.dirty = false;
    }

    /// Unmap the file. Loaded objects stay usable from the read set, but
    /// anything not yet materialized is out of reach until reopened.
    pub fn close(&self) {
        let mut guard = self.core.content.write().expect("content lock");
        if guard.is_none() {
            tracing::warn!("database already closed.");
            return;
        }
        if let Some(mem) = guard.as_ref() {
            let _ = mem.flush();
        }
        *guard = None;
        tracing::debug!(file = %self.core.filename.display(), "database closed");
    }

    pub fn is_open(&self) -> bool {
        self.core.content.read().expect("content lock").is_some()
    }

    /// Open a session against this database.
    pub fn session(&self) -> Session {
        Session::new(self.clone())
    }

    pub fn filename(&self) -> &std::path::Path {
        &self.core.filename
    }

    pub fn log_config(&self) -> &LogConfig {
        &self.core.log_config
    }

    pub fn default_stub_depth(&self) -> i32 {
        self.core.default_stub_depth
    }

    pub fn growth_size(&self) -> u32 {
        self.core.growth_size
    }

    /* Error channel: last error per database. */

    /// Whether the database has no active error.
    pub fn ok(&self) -> bool {
        self.core.last_error.lock().expect("error lock").is_none()
    }

    pub fn last_error(&self) -> Option<DbError> {
        self.core.last_error.lock().expect("error lock").clone()
    }

    /// Unset any active error.
    pub fn clear_error(&self) {
        *self.core.last_error.lock().expect("error lock") = None;
    }

    /// Record an error against this database. A `None` message uses the
    /// code's default text.
    pub fn report_error(&self, code: ErrorCode, message: Option<&str>) {
        let message = message
            .map(str::to_owned)
            .unwrap_or_else(|| code.default_message().to_owned());
        tracing::error!(?code, "{message}");
        *self.core.last_error.lock().expect("error lock") = Some(DbError::new(code, message));
    }

    pub(crate) fn store_error(&self, error: DbError) {
        tracing::error!(code = ?error.code, "{}", error.message);
        *self.core.last_error.lock().expect("error lock") = Some(error);
    }

    /* Root record. */

    pub fn root_snapshot(&self) -> RootRecord {
        *self.core.root.lock().expect("root lock")
    }

    /// Point the root at a new address-map page and flag it for rewrite.
    pub(crate) fn set_address_map_root(&self, page: PhysicalAddress) {
        let mut root = self.core.root.lock().expect("root lock");
        root.address_map_addr = page;
        root.dirty = true;
    }

    /* Read set. */

    pub(crate) fn read_set_lookup(&self, address: LogicalAddress) -> Option<ObjectRef> {
        self.core
            .read_set
            .lock()
            .expect("read set lock")
            .lookup(address as u64)
    }

    pub(crate) fn read_set_insert(&self, object: ObjectRef) {
        self.core.read_set.lock().expect("read set lock").insert(object);
    }

    /// Drop an object from the read set and from its session's write set,
    /// if any. The next load of its address re-reads the file.
    pub fn forget(&self, object: &ObjectRef) {
        self.core.read_set.lock().expect("read set lock").remove(object);
        if let Some(session) = object.session_ref() {
            session.release(object);
        }
    }

    pub(crate) fn content(&self) -> &RwLock<Option<Mapping>> {
        &self.core.content
    }

    /* Materialization. */

    /// Retrieve the object at a logical address: fixed space, then the read
    /// set, then the address map and codec. A zero or unmapped address
    /// yields nil. `depth <= 0` registers and returns a stub.
    pub(crate) fn at_address_depth_internal(
        &self,
        session: Option<&Session>,
        address: LogicalAddress,
        depth: i32,
    ) -> ObjectRef {
        if fixedspace::is_fixed_address(address) {
            return fixedspace::at(address).expect("fixed address in range");
        }
        if address == LOGICAL_UNASSIGNED {
            return fixedspace::nil();
        }

        {
            let read_set = self.core.read_set.lock().expect("read set lock");
            if let Some(existing) = read_set.lookup(address as u64) {
                if !existing.is_stub() || depth <= 0 {
                    return existing;
                }
            }
        }

        let guard = self.core.content.read().expect("content lock");
        match guard.as_ref() {
            Some(mem) => self.load_at(session, mem, address, depth),
            None => {
                self.report_error(ErrorCode::DatabaseNotOpen, None);
                fixedspace::nil()
            }
        }
    }

    /// The loader proper, shared with the codec's recursive reference
    /// resolution. `mem` is the region the whole load consumes; growth
    /// cannot happen while any loader is running.
    pub(crate) fn load_at(
        &self,
        session: Option<&Session>,
        mem: &Mapping,
        address: LogicalAddress,
        depth: i32,
    ) -> ObjectRef {
        if fixedspace::is_fixed_address(address) {
            return fixedspace::at(address).expect("fixed address in range");
        }
        if address == LOGICAL_UNASSIGNED {
            return fixedspace::nil();
        }

        let existing = {
            let read_set = self.core.read_set.lock().expect("read set lock");
            read_set.lookup(address as u64)
        };
        if let Some(existing) = existing {
            if !existing.is_stub() || depth <= 0 {
                return existing;
            }
        }

        if depth > 0 {
            let physical = addressmap::lookup(self, mem, address);
            if physical == PHYSICAL_UNASSIGNED {
                return fixedspace::nil();
            }

            let ctx = LoadCtx {
                db: self,
                session,
                mem,
            };
            let object = codec::read_object(&ctx, physical, depth);
            if object.is_nil() {
                // Corrupt storage; the codec has already reported it.
                return object;
            }
            object.set_logical(address);

            // Deserialization ran without the database lock held; inserting
            // now replaces any stub registered in the meantime.
            self.core.read_set.lock().expect("read set lock").insert(object.clone());
            object
        } else {
            let stub = Object::stub(address);
            stub.attach_database(self);
            if let Some(session) = session {
                stub.attach_session(session);
            }
            self.core.read_set.lock().expect("read set lock").insert(stub.clone());
            stub
        }
    }

    /* Test access to the mapped region. */

    #[cfg(test)]
    pub(crate) fn with_mem<R>(&self, f: impl FnOnce(&Mapping) -> R) -> R {
        let guard = self.core.content.read().expect("content lock");
        f(guard.as_ref().expect("database is open"))
    }

    #[cfg(test)]
    pub(crate) fn with_mem_mut<R>(&self, f: impl FnOnce(&mut Mapping) -> R) -> R {
        let mut guard = self.core.content.write().expect("content lock");
        f(guard.as_mut().expect("database is open"))
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("filename", &self.core.filename)
            .field("open", &self.is_open())
            .finish()
    }
}
