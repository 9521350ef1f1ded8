//! In-memory representation of storable objects.
//!
//! Every object couples a shape reference (metadata describing how its
//! payload is stored and, for slotted records, its ordered slot names) with
//! a tagged payload. Objects are shared behind [`ObjectRef`]; mutable pieces
//! (addresses, collection payloads, integer values) use interior mutability
//! so a loaded graph can be threaded through sessions without cloning.
//!
//! Accessors validate the storage tag and report `WRONG_STORAGE` against the
//! owning database on mismatch, returning a benign value (nil, zero, or an
//! empty string) instead of failing.

use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock, RwLock, Weak};

use crate::database::{Database, DbCore};
use crate::error::ErrorCode;
use crate::session::{Session, SessionInner};
use crate::{fixedspace, transaction};
use crate::{LogicalAddress, PhysicalAddress, CHUNK_SIZE};

/// Shared handle to an [`Object`].
pub type ObjectRef = Arc<Object>;

/// Internal storage formats. The discriminants are persisted in shape
/// records, so their values are part of the file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum StorageTag {
    Shape = 0,
    Slotted = 1,
    Fixed = 2,
    Chunk = 3,
    AddrTreePage = 4,
    Integer = 5,
    Float = 6,
    Double = 7,
    Char = 8,
    String = 9,
    Boolean = 10,
    Nil = 11,
    Stub = 12,
}

impl StorageTag {
    pub const MAX: u32 = StorageTag::Stub as u32;

    /// Decode a persisted storage-format word.
    pub fn from_word(word: u32) -> Option<StorageTag> {
        Some(match word {
            0 => StorageTag::Shape,
            1 => StorageTag::Slotted,
            2 => StorageTag::Fixed,
            3 => StorageTag::Chunk,
            4 => StorageTag::AddrTreePage,
            5 => StorageTag::Integer,
            6 => StorageTag::Float,
            7 => StorageTag::Double,
            8 => StorageTag::Char,
            9 => StorageTag::String,
            10 => StorageTag::Boolean,
            11 => StorageTag::Nil,
            12 => StorageTag::Stub,
            _ => return None,
        })
    }
}

/// Shape payload: the metadata object describing instances.
pub struct ShapeStorage {
    /// The shape's base name.
    pub(crate) name: ObjectRef,
    /// Fixed collection of slot name strings, in instance order. Shapes of
    /// objects without named slots hold an empty collection.
    pub(crate) slot_names: ObjectRef,
    /// Migration destination for instances of this shape, persisted but
    /// never acted on. Left empty only while fixed space is being wired.
    pub(crate) current_shape: OnceLock<ObjectRef>,
    /// Storage format for instances of this shape.
    pub(crate) storage_format: StorageTag,
}

/// One address-map tree page: a height and `PAGE_FANOUT` entries. Leaves
/// (height 0) hold target physical addresses; branches hold child page
/// addresses.
pub struct TreePageStorage {
    pub(crate) height: u32,
    pub(crate) entries: RwLock<Vec<PhysicalAddress>>,
}

/// Tagged object payload.
pub enum Storage {
    Shape(ShapeStorage),
    Slotted(RwLock<Vec<ObjectRef>>),
    Fixed(RwLock<Vec<ObjectRef>>),
    AddrTreePage(TreePageStorage),
    Integer(AtomicI32),
    String(Vec<u16>),
    Boolean(bool),
    Nil,
    /// Stand-in for an object that has not been loaded yet; holds only its
    /// logical address. Stubs never escape the public accessors.
    Stub(LogicalAddress),
}

impl Storage {
    /// The tag this payload was constructed as, independent of any shape.
    pub(crate) fn tag(&self) -> StorageTag {
        match self {
            Storage::Shape(_) => StorageTag::Shape,
            Storage::Slotted(_) => StorageTag::Slotted,
            Storage::Fixed(_) => StorageTag::Fixed,
            Storage::AddrTreePage(_) => StorageTag::AddrTreePage,
            Storage::Integer(_) => StorageTag::Integer,
            Storage::String(_) => StorageTag::String,
            Storage::Boolean(_) => StorageTag::Boolean,
            Storage::Nil => StorageTag::Nil,
            Storage::Stub(_) => StorageTag::Stub,
        }
    }
}

/// A storable object: shape + payload + addresses + owning database and
/// session.
///
/// An object is in one of three persistence states: transient (no logical
/// address), assigned (logical address but no file location yet), or
/// persisted (both). Stubs are a sibling state that only appears inside
/// read sets during depth-limited loads.
pub struct Object {
    db: RwLock<Weak<DbCore>>,
    session: RwLock<Weak<SessionInner>>,
    logical: AtomicU32,
    physical: AtomicU32,
    shape: OnceLock<ObjectRef>,
    pub(crate) storage: Storage,
}

impl Object {
    pub(crate) fn build(shape: Option<ObjectRef>, storage: Storage) -> ObjectRef {
        let object = Arc::new(Object {
            db: RwLock::new(Weak::new()),
            session: RwLock::new(Weak::new()),
            logical: AtomicU32::new(0),
            physical: AtomicU32::new(0),
            shape: OnceLock::new(),
            storage,
        });
        if let Some(shape) = shape {
            let _ = object.shape.set(shape);
        }
        object
    }

    /* Constructors translating native values into objects. */

    /// A signed 32-bit integer object.
    pub fn integer(value: i32) -> ObjectRef {
        Object::build(
            Some(fixedspace::shape_at(fixedspace::FixedAddress::IntegerShape)),
            Storage::Integer(AtomicI32::new(value)),
        )
    }

    /// A string object. Contents are stored as UTF-16 code units.
    pub fn string(contents: &str) -> ObjectRef {
        Object::string_from_units(contents.encode_utf16().collect())
    }

    /// A string object from raw UTF-16 code units.
    pub fn string_from_units(units: Vec<u16>) -> ObjectRef {
        Object::build(
            Some(fixedspace::shape_at(fixedspace::FixedAddress::StringShape)),
            Storage::String(units),
        )
    }

    /// A fixed-size collection of `length` references, nil-filled.
    pub fn fixed(length: u32) -> ObjectRef {
        let contents = (0..length).map(|_| fixedspace::nil()).collect();
        Object::build(
            Some(fixedspace::shape_at(fixedspace::FixedAddress::FixedShape)),
            Storage::Fixed(RwLock::new(contents)),
        )
    }

    /// A slotted record of the given shape, every slot nil. Reports
    /// `WRONG_STORAGE` and returns nil if `shape` is not a shape object.
    pub fn slotted(shape: &ObjectRef) -> ObjectRef {
        if shape.storage_tag() != StorageTag::Shape {
            shape.report(
                ErrorCode::WrongStorage,
                "Object::slotted requires a SHAPE object.",
            );
            return fixedspace::nil();
        }
        let slots = (0..shape.shape_slot_count()).map(|_| fixedspace::nil()).collect();
        Object::build(Some(shape.clone()), Storage::Slotted(RwLock::new(slots)))
    }

    /// A shape object from already-constructed name and slot-name objects.
    pub fn shape_from_parts(
        name: ObjectRef,
        slot_names: ObjectRef,
        storage_format: StorageTag,
    ) -> ObjectRef {
        let current_shape = OnceLock::new();
        let _ = current_shape.set(fixedspace::nil());
        Object::build(
            Some(fixedspace::nil()),
            Storage::Shape(ShapeStorage {
                name,
                slot_names,
                current_shape,
                storage_format,
            }),
        )
    }

    /// A shape object built from native strings, for convenience.
    pub fn shape_named(name: &str, slot_names: &[&str], storage_format: StorageTag) -> ObjectRef {
        let slots = Object::fixed(slot_names.len() as u32);
        for (i, slot) in slot_names.iter().enumerate() {
            slots.put_fixed_raw(i as u32, Object::string(slot));
        }
        Object::shape_from_parts(Object::string(name), slots, storage_format)
    }

    /// One page of the address map tree, entries all unassigned.
    pub fn addr_tree_page(height: u32) -> ObjectRef {
        Object::build(
            Some(fixedspace::shape_at(fixedspace::FixedAddress::AddrTreePageShape)),
            Storage::AddrTreePage(TreePageStorage {
                height,
                entries: RwLock::new(vec![0; CHUNK_SIZE as usize]),
            }),
        )
    }

    /// Placeholder for a deferred load. Only the materializer creates these.
    pub(crate) fn stub(address: LogicalAddress) -> ObjectRef {
        let object = Object::build(
            Some(fixedspace::shape_at(fixedspace::FixedAddress::StubShape)),
            Storage::Stub(address),
        );
        object.set_logical(address);
        object
    }

    /* Addresses and ownership. */

    pub fn logical(&self) -> LogicalAddress {
        self.logical.load(Ordering::Acquire)
    }

    pub(crate) fn set_logical(&self, address: LogicalAddress) {
        self.logical.store(address, Ordering::Release);
    }

    pub fn physical(&self) -> PhysicalAddress {
        self.physical.load(Ordering::Acquire)
    }

    pub(crate) fn set_physical(&self, address: PhysicalAddress) {
        self.physical.store(address, Ordering::Release);
    }

    /// The shape of this object, without resolving through stubs. Shape
    /// objects themselves answer nil.
    pub fn shape(&self) -> ObjectRef {
        self.shape.get().cloned().unwrap_or_else(fixedspace::nil)
    }

    pub(crate) fn set_shape(&self, shape: ObjectRef) {
        let _ = self.shape.set(shape);
    }

    /// The database this object is stored in, if any.
    pub fn database(&self) -> Option<Database> {
        self.db
            .read()
            .expect("object db lock")
            .upgrade()
            .map(Database::from_core)
    }

    pub(crate) fn attach_database(&self, db: &Database) {
        *self.db.write().expect("object db lock") = db.downgrade();
    }

    pub(crate) fn session_ref(&self) -> Option<Session> {
        self.session
            .read()
            .expect("object session lock")
            .upgrade()
            .map(Session::from_inner)
    }

    pub(crate) fn attach_session(&self, session: &Session) {
        *self.session.write().expect("object session lock") = session.downgrade();
    }

    /* Classification. */

    /// The effective storage tag: `Shape` when the shape pointer is nil
    /// (shape-of-shape), otherwise the shape's recorded storage format.
    pub fn storage_tag(&self) -> StorageTag {
        match self.shape.get() {
            // Only reachable mid-bootstrap, before back-patching.
            None => self.storage.tag(),
            Some(shape) if shape.is_nil() => StorageTag::Shape,
            Some(shape) => shape.shape_storage_format(),
        }
    }

    /// Whether this object is the nil singleton (or shares its storage).
    pub fn is_nil(&self) -> bool {
        matches!(self.storage, Storage::Nil)
    }

    /// Whether this object stands in for a not-yet-loaded one.
    pub fn is_stub(&self) -> bool {
        matches!(self.storage, Storage::Stub(_))
    }

    pub(crate) fn stub_address(&self) -> Option<LogicalAddress> {
        match self.storage {
            Storage::Stub(address) => Some(address),
            _ => None,
        }
    }

    /* INTEGER objects. */

    /// The value of an integer object, or 0 with `WRONG_STORAGE` reported.
    pub fn integer_value(&self) -> i32 {
        match &self.storage {
            Storage::Integer(value) if self.storage_tag() == StorageTag::Integer => {
                value.load(Ordering::Acquire)
            }
            _ => {
                self.report(
                    ErrorCode::WrongStorage,
                    "integer_value called with a non-INTEGER object.",
                );
                0
            }
        }
    }

    /// Replace the value of an integer object, marking it dirty in its
    /// session's transaction (creating and committing one if none is open).
    pub fn integer_set(&self, value: i32) {
        let Storage::Integer(cell) = &self.storage else {
            self.report(
                ErrorCode::WrongStorage,
                "integer_set requires an object with INTEGER storage.",
            );
            return;
        };
        let guard = transaction::mutation_guard(self);
        cell.store(value, Ordering::Release);
        transaction::finish_mutation(guard);
    }

    /// Value store without transaction bookkeeping; the allocator and the
    /// bootstrap use this to avoid re-entering the commit machinery.
    pub(crate) fn integer_set_raw(&self, value: i32) {
        if let Storage::Integer(cell) = &self.storage {
            cell.store(value, Ordering::Release);
        }
    }

    /* BOOLEAN objects. */

    /// Truth value of a boolean object. Non-booleans are assumed true.
    pub fn boolean_value(&self) -> bool {
        match &self.storage {
            Storage::Boolean(value) => *value,
            _ => {
                tracing::warn!("non-boolean object: assuming truth");
                true
            }
        }
    }

    /* STRING objects. */

    /// Length of a string object in UTF-16 code units.
    pub fn string_len(&self) -> u32 {
        match &self.storage {
            Storage::String(units) if self.storage_tag() == StorageTag::String => {
                units.len() as u32
            }
            _ => {
                self.report(
                    ErrorCode::WrongStorage,
                    "string_len requires an object with STRING storage.",
                );
                0
            }
        }
    }

    /// Decode a string object. Reports `CONVERSION_ERROR` and returns an
    /// empty string when the stored code units are not valid UTF-16.
    pub fn string_value(&self) -> String {
        match &self.storage {
            Storage::String(units) if self.storage_tag() == StorageTag::String => {
                match String::from_utf16(units) {
                    Ok(s) => s,
                    Err(_) => {
                        self.report(
                            ErrorCode::ConversionError,
                            "string contents are not valid UTF-16.",
                        );
                        String::new()
                    }
                }
            }
            _ => {
                self.report(
                    ErrorCode::WrongStorage,
                    "string_value called with a non-STRING object.",
                );
                String::new()
            }
        }
    }

    pub(crate) fn string_units(&self) -> &[u16] {
        match &self.storage {
            Storage::String(units) => units,
            _ => &[],
        }
    }

    /// Whether two string objects hold identical code units. False when
    /// either is not a string.
    pub fn string_eq(&self, other: &Object) -> bool {
        match (&self.storage, &other.storage) {
            (Storage::String(a), Storage::String(b)) => a == b,
            _ => false,
        }
    }

    /// Compare a string object against a native string.
    pub fn string_eq_str(&self, expected: &str) -> bool {
        match &self.storage {
            Storage::String(units) => expected.encode_utf16().eq(units.iter().copied()),
            _ => {
                self.report(
                    ErrorCode::WrongStorage,
                    "string_eq_str requires a STRING object.",
                );
                false
            }
        }
    }

    /* FIXED objects. */

    /// Number of elements in a fixed collection.
    pub fn fixed_len(&self) -> u32 {
        match &self.storage {
            Storage::Fixed(contents) if self.storage_tag() == StorageTag::Fixed => {
                contents.read().expect("fixed lock").len() as u32
            }
            _ => {
                self.report(
                    ErrorCode::WrongStorage,
                    "fixed_len requires an object with FIXED storage.",
                );
                0
            }
        }
    }

    /// Element at a zero-based index, with any stub resolved in place.
    pub fn fixed_at(&self, index: u32) -> ObjectRef {
        let Storage::Fixed(contents) = &self.storage else {
            self.report(
                ErrorCode::WrongStorage,
                "fixed_at requires an object with FIXED storage.",
            );
            return fixedspace::nil();
        };
        let contents = contents.read().expect("fixed lock");
        match contents.get(index as usize) {
            Some(element) => resolve_stub(element.clone()),
            None => {
                drop(contents);
                self.report_bad_index("fixed_at", index, self.fixed_len());
                fixedspace::nil()
            }
        }
    }

    /// Replace an element, marking the collection dirty in its session's
    /// transaction (creating and committing one if none is open).
    pub fn fixed_at_put(&self, index: u32, value: ObjectRef) {
        if self.storage.tag() != StorageTag::Fixed {
            self.report(
                ErrorCode::WrongStorage,
                "fixed_at_put requires an object with FIXED storage.",
            );
            return;
        }
        if index >= self.fixed_len() {
            self.report_bad_index("fixed_at_put", index, self.fixed_len());
            return;
        }

        let guard = transaction::mutation_guard(self);
        self.put_fixed_raw(index, value);
        transaction::finish_mutation(guard);
    }

    /// Payload write without transaction bookkeeping. The codec and the
    /// bootstrap use this; everything else goes through `fixed_at_put`.
    pub(crate) fn put_fixed_raw(&self, index: u32, value: ObjectRef) {
        if let Storage::Fixed(contents) = &self.storage {
            let mut contents = contents.write().expect("fixed lock");
            if let Some(slot) = contents.get_mut(index as usize) {
                *slot = value;
            }
        }
    }

    /// Element without stub resolution; the serializer wants raw references.
    pub(crate) fn fixed_at_raw(&self, index: u32) -> Option<ObjectRef> {
        match &self.storage {
            Storage::Fixed(contents) => {
                contents.read().expect("fixed lock").get(index as usize).cloned()
            }
            _ => None,
        }
    }

    /* SLOTTED objects. */

    /// The object held in a slot, by index, stubs resolved.
    pub fn slotted_at(&self, index: u32) -> ObjectRef {
        let Storage::Slotted(slots) = &self.storage else {
            self.report(
                ErrorCode::WrongStorage,
                "slotted_at requires a SLOTTED object.",
            );
            return fixedspace::nil();
        };
        let slots = slots.read().expect("slotted lock");
        match slots.get(index as usize) {
            Some(slot) => resolve_stub(slot.clone()),
            None => {
                let maximum = slots.len() as u32;
                drop(slots);
                self.report_bad_index("slotted_at", index, maximum);
                fixedspace::nil()
            }
        }
    }

    /// The object held in a slot, by slot-name object.
    pub fn slotted_at_named(&self, slot_name: &ObjectRef) -> ObjectRef {
        match self.shape().shape_slot_index(slot_name) {
            Some(index) => self.slotted_at(index),
            None => {
                self.report(ErrorCode::InvalidIndex, "no slot with the requested name.");
                fixedspace::nil()
            }
        }
    }

    /// The object held in a slot, by native slot name.
    pub fn slotted_at_str(&self, slot_name: &str) -> ObjectRef {
        match self.shape().shape_slot_index_str(slot_name) {
            Some(index) => self.slotted_at(index),
            None => {
                self.report(ErrorCode::InvalidIndex, "no slot with the requested name.");
                fixedspace::nil()
            }
        }
    }

    /// Replace a slot by index, with transaction bookkeeping.
    pub fn slotted_at_put(&self, index: u32, value: ObjectRef) {
        if self.storage.tag() != StorageTag::Slotted {
            self.report(
                ErrorCode::WrongStorage,
                "slotted_at_put requires a SLOTTED object.",
            );
            return;
        }
        let maximum = match &self.storage {
            Storage::Slotted(slots) => slots.read().expect("slotted lock").len() as u32,
            _ => 0,
        };
        if index >= maximum {
            self.report_bad_index("slotted_at_put", index, maximum);
            return;
        }

        let guard = transaction::mutation_guard(self);
        self.put_slot_raw(index, value);
        transaction::finish_mutation(guard);
    }

    /// Replace a slot by native name.
    pub fn slotted_at_str_put(&self, slot_name: &str, value: ObjectRef) {
        match self.shape().shape_slot_index_str(slot_name) {
            Some(index) => self.slotted_at_put(index, value),
            None => {
                self.report(ErrorCode::InvalidIndex, "no slot with the requested name.");
            }
        }
    }

    pub(crate) fn put_slot_raw(&self, index: u32, value: ObjectRef) {
        if let Storage::Slotted(slots) = &self.storage {
            let mut slots = slots.write().expect("slotted lock");
            if let Some(slot) = slots.get_mut(index as usize) {
                *slot = value;
            }
        }
    }

    pub(crate) fn slotted_at_raw(&self, index: u32) -> Option<ObjectRef> {
        match &self.storage {
            Storage::Slotted(slots) => {
                slots.read().expect("slotted lock").get(index as usize).cloned()
            }
            _ => None,
        }
    }

    /// Slot count straight from the payload. Matches the shape's slot count
    /// by invariant, but involves no shape traversal (and so no stub
    /// resolution); the serializer depends on that.
    pub(crate) fn slotted_len_raw(&self) -> u32 {
        match &self.storage {
            Storage::Slotted(slots) => slots.read().expect("slotted lock").len() as u32,
            _ => 0,
        }
    }

    /* SHAPE objects. */

    /// The shape's name string, stubs resolved.
    pub fn shape_name(&self) -> ObjectRef {
        match &self.storage {
            Storage::Shape(shape) => resolve_stub(shape.name.clone()),
            _ => {
                self.report(
                    ErrorCode::WrongStorage,
                    "shape_name invoked with a non SHAPE object.",
                );
                fixedspace::nil()
            }
        }
    }

    /// The shape's slot-name collection, stubs resolved.
    pub fn shape_slot_names(&self) -> ObjectRef {
        match &self.storage {
            Storage::Shape(shape) => resolve_stub(shape.slot_names.clone()),
            _ => {
                self.report(
                    ErrorCode::WrongStorage,
                    "shape_slot_names invoked with a non SHAPE object.",
                );
                fixedspace::nil()
            }
        }
    }

    /// Number of slots instances of this shape carry.
    pub fn shape_slot_count(&self) -> u32 {
        match &self.storage {
            Storage::Shape(_) => self.shape_slot_names().fixed_len(),
            _ => {
                self.report(
                    ErrorCode::WrongStorage,
                    "shape_slot_count invoked with a non SHAPE object.",
                );
                0
            }
        }
    }

    /// Zero-based index of the slot with the given name object.
    pub fn shape_slot_index(&self, name: &ObjectRef) -> Option<u32> {
        if !matches!(self.storage, Storage::Shape(_)) {
            self.report(
                ErrorCode::WrongStorage,
                "shape_slot_index invoked with a non SHAPE object.",
            );
            return None;
        }
        let slots = self.shape_slot_names();
        (0..slots.fixed_len()).find(|&i| slots.fixed_at(i).string_eq(name))
    }

    /// Zero-based index of the slot with the given native name.
    pub fn shape_slot_index_str(&self, name: &str) -> Option<u32> {
        if !matches!(self.storage, Storage::Shape(_)) {
            self.report(
                ErrorCode::WrongStorage,
                "shape_slot_index_str invoked with a non SHAPE object.",
            );
            return None;
        }
        let slots = self.shape_slot_names();
        (0..slots.fixed_len()).find(|&i| slots.fixed_at(i).string_eq_str(name))
    }

    /// The migration target recorded on this shape, usually nil.
    pub fn shape_current_shape(&self) -> ObjectRef {
        match &self.storage {
            Storage::Shape(shape) => match shape.current_shape.get() {
                Some(current) => resolve_stub(current.clone()),
                None => fixedspace::nil(),
            },
            _ => {
                self.report(
                    ErrorCode::WrongStorage,
                    "shape_current_shape invoked with a non SHAPE object.",
                );
                fixedspace::nil()
            }
        }
    }

    /// Storage format instances of this shape serialize as.
    pub fn shape_storage_format(&self) -> StorageTag {
        match &self.storage {
            Storage::Shape(shape) => shape.storage_format,
            _ => {
                self.report(
                    ErrorCode::WrongStorage,
                    "shape_storage_format invoked with a non SHAPE object.",
                );
                StorageTag::Shape
            }
        }
    }

    /// Raw shape fields for the serializer: name, slot names, migration
    /// target (nil when unset), and storage format, none stub-resolved.
    pub(crate) fn shape_parts_raw(&self) -> Option<(ObjectRef, ObjectRef, ObjectRef, StorageTag)> {
        match &self.storage {
            Storage::Shape(shape) => Some((
                shape.name.clone(),
                shape.slot_names.clone(),
                shape
                    .current_shape
                    .get()
                    .cloned()
                    .unwrap_or_else(fixedspace::nil),
                shape.storage_format,
            )),
            _ => None,
        }
    }

    /* ADDRTREEPAGE objects. */

    /// Position of this page within the address map; leaves are height 0.
    pub fn page_height(&self) -> u32 {
        match &self.storage {
            Storage::AddrTreePage(page) => page.height,
            _ => {
                self.report(
                    ErrorCode::WrongStorage,
                    "page_height requires an ADDRTREEPAGE object.",
                );
                0
            }
        }
    }

    /// One page entry: a target physical address on leaves, a child page
    /// address on branches.
    pub fn page_entry(&self, index: u32) -> PhysicalAddress {
        match &self.storage {
            Storage::AddrTreePage(page) => page
                .entries
                .read()
                .expect("tree page lock")
                .get(index as usize)
                .copied()
                .unwrap_or(0),
            _ => {
                self.report(
                    ErrorCode::WrongStorage,
                    "page_entry requires an ADDRTREEPAGE object.",
                );
                0
            }
        }
    }

    pub fn page_entry_put(&self, index: u32, address: PhysicalAddress) {
        if let Storage::AddrTreePage(page) = &self.storage {
            let mut entries = page.entries.write().expect("tree page lock");
            if let Some(entry) = entries.get_mut(index as usize) {
                *entry = address;
            }
        }
    }

    /* Bootstrap plumbing. */

    /// Fill the deferred fields of a shape created during fixed-space
    /// wiring: its migration target becomes nil and its name and slot-name
    /// objects receive their own shapes. Cells already set are left alone.
    pub(crate) fn backpatch_shape(
        &self,
        nil: &ObjectRef,
        string_shape: &ObjectRef,
        fixed_shape: &ObjectRef,
    ) {
        if let Storage::Shape(shape) = &self.storage {
            let _ = shape.current_shape.set(nil.clone());
            shape.name.set_shape(string_shape.clone());
            shape.slot_names.set_shape(fixed_shape.clone());
        }
    }

    /* Error plumbing. */

    pub(crate) fn report(&self, code: ErrorCode, message: &str) {
        match self.database() {
            Some(db) => db.report_error(code, Some(message)),
            None => tracing::error!(?code, message, "error on an object with no database"),
        }
    }

    fn report_bad_index(&self, operation: &str, index: u32, maximum: u32) {
        self.report(
            ErrorCode::InvalidIndex,
            &format!("{operation} called with an invalid index ({index}, valid 0..{maximum})"),
        );
    }
}

impl std::fmt::Debug for Object {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Object")
            .field("logical", &self.logical())
            .field("physical", &self.physical())
            .field("storage", &self.storage.tag())
            .finish()
    }
}

/// Follow a stub to the real object it stands for; anything that is not a
/// stub passes through unchanged.
pub(crate) fn resolve_stub(object: ObjectRef) -> ObjectRef {
    let Some(address) = object.stub_address() else {
        return object;
    };
    let Some(db) = object.database() else {
        // A stub can only have been created by a materializer, which always
        // attaches the database; nothing sane can be done without one.
        tracing::error!(address, "stub with no owning database");
        return fixedspace::nil();
    };
    let session = object.session_ref();
    db.at_address_depth_internal(session.as_ref(), address, db.default_stub_depth().max(1))
}
