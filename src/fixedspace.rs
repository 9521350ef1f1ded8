//! Fixed space: the reserved high range of logical addresses mapping to
//! singleton, in-memory-only objects.
//!
//! One table is shared by every live database in the process. It holds nil,
//! true, false, and the primitive shape objects. The `FixedCollection`,
//! `String`, `Undefined` shapes and `nil` form a self-referential cycle
//! (shapes hold string names; `String`'s name has the `String` shape;
//! `nil`'s shape is `Undefined`), so those four are constructed with
//! dangling shape cells and back-patched before anything else exists. The
//! table is initialized lazily, exactly once, and never mutated afterward.

use std::sync::{OnceLock, RwLock};

use crate::object::{Object, ObjectRef, ShapeStorage, Storage, StorageTag};
use crate::{LogicalAddress, ADDRESS_MAX, PHYSICAL_UNASSIGNED};

/// Number of reserved fixed-space addresses.
pub const FIXED_SIZE: usize = 15;

/// Lowest logical address within fixed space.
pub const FIXED_ADDR_MIN: LogicalAddress = ADDRESS_MAX - FIXED_SIZE as u32 + 1;

/// The reserved logical addresses, allocated from the top of the address
/// range downward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FixedAddress {
    /// The nil singleton.
    Nil = FIXED_ADDR_MIN,
    /// The true singleton.
    True,
    /// The false singleton.
    False,

    /* The primitive shape objects. */
    IntegerShape,
    FloatShape,
    DoubleShape,
    CharShape,
    StringShape,

    /* Built-in collection shape objects. */
    FixedShape,
    ChunkShape,
    AddrTreePageShape,
    AllocatorShape,

    /* Virtual shape objects. */
    NilShape,
    BooleanShape,
    StubShape,
}

impl FixedAddress {
    pub fn address(self) -> LogicalAddress {
        self as u32
    }
}

/// Whether a logical address falls within fixed space.
pub fn is_fixed_address(address: LogicalAddress) -> bool {
    address >= FIXED_ADDR_MIN
}

static SPACE: OnceLock<Vec<ObjectRef>> = OnceLock::new();

fn space() -> &'static [ObjectRef] {
    SPACE.get_or_init(build)
}

/// The fixed-space object at a reserved logical address, or `None` for
/// addresses outside the reserved range.
pub(crate) fn at(address: LogicalAddress) -> Option<ObjectRef> {
    if !is_fixed_address(address) {
        return None;
    }
    Some(space()[(address - FIXED_ADDR_MIN) as usize].clone())
}

pub(crate) fn shape_at(address: FixedAddress) -> ObjectRef {
    space()[(address.address() - FIXED_ADDR_MIN) as usize].clone()
}

/// The single instance of nil.
pub fn nil() -> ObjectRef {
    shape_at(FixedAddress::Nil)
}

/// The single object representing truth.
pub fn truth() -> ObjectRef {
    shape_at(FixedAddress::True)
}

/// The single object representing falsehood.
pub fn falsehood() -> ObjectRef {
    shape_at(FixedAddress::False)
}

/* Raw constructors that must not consult fixed space: they run while it is
 * being built. */

fn raw_string(contents: &str) -> ObjectRef {
    Object::build(None, Storage::String(contents.encode_utf16().collect()))
}

fn raw_shape(name: ObjectRef, slot_names: ObjectRef, storage_format: StorageTag) -> ObjectRef {
    Object::build(
        None,
        Storage::Shape(ShapeStorage {
            name,
            slot_names,
            current_shape: OnceLock::new(),
            storage_format,
        }),
    )
}

/// A fully wired shape, buildable once the cyclic four exist.
fn cshape(
    name: &str,
    slot_names: &[&str],
    storage_format: StorageTag,
    nil: &ObjectRef,
    string_shape: &ObjectRef,
    fixed_shape: &ObjectRef,
) -> ObjectRef {
    let slots: Vec<ObjectRef> = slot_names
        .iter()
        .map(|slot| {
            let o = raw_string(slot);
            o.set_shape(string_shape.clone());
            o
        })
        .collect();
    let slots_object = Object::build(Some(fixed_shape.clone()), Storage::Fixed(RwLock::new(slots)));

    let shape = raw_shape(raw_string(name), slots_object, storage_format);
    shape.set_shape(nil.clone());
    shape.backpatch_shape(nil, string_shape, fixed_shape);
    shape
}

fn build() -> Vec<ObjectRef> {
    // The cyclic four, created with dangling shape cells.
    let fixed_shape = raw_shape(
        raw_string("FixedCollection"),
        Object::build(None, Storage::Fixed(RwLock::new(Vec::new()))),
        StorageTag::Fixed,
    );
    let string_shape = raw_shape(
        raw_string("String"),
        Object::build(None, Storage::Fixed(RwLock::new(Vec::new()))),
        StorageTag::String,
    );
    let undefined_shape = raw_shape(
        raw_string("Undefined"),
        Object::build(None, Storage::Fixed(RwLock::new(Vec::new()))),
        StorageTag::Nil,
    );
    let nil = Object::build(None, Storage::Nil);

    for shape in [&fixed_shape, &string_shape, &undefined_shape] {
        shape.set_shape(nil.clone());
        shape.backpatch_shape(&nil, &string_shape, &fixed_shape);
    }
    nil.set_shape(undefined_shape.clone());

    // The remaining primitive shapes can be wired directly.
    let integer_shape = cshape("Integer", &[], StorageTag::Integer, &nil, &string_shape, &fixed_shape);
    let float_shape = cshape("Float", &[], StorageTag::Float, &nil, &string_shape, &fixed_shape);
    let double_shape = cshape("Double", &[], StorageTag::Double, &nil, &string_shape, &fixed_shape);
    let char_shape = cshape("Character", &[], StorageTag::Char, &nil, &string_shape, &fixed_shape);
    let chunk_shape = cshape("OblChunk", &[], StorageTag::Chunk, &nil, &string_shape, &fixed_shape);
    let treepage_shape = cshape(
        "OblAddressTreePage",
        &[],
        StorageTag::AddrTreePage,
        &nil,
        &string_shape,
        &fixed_shape,
    );
    let allocator_shape = cshape(
        "OblAllocator",
        &["next_logical", "next_physical"],
        StorageTag::Slotted,
        &nil,
        &string_shape,
        &fixed_shape,
    );
    let boolean_shape = cshape("Boolean", &[], StorageTag::Boolean, &nil, &string_shape, &fixed_shape);
    let stub_shape = cshape("OblStub", &[], StorageTag::Stub, &nil, &string_shape, &fixed_shape);

    let truth = Object::build(Some(boolean_shape.clone()), Storage::Boolean(true));
    let falsehood = Object::build(Some(boolean_shape.clone()), Storage::Boolean(false));

    let table = vec![
        nil,
        truth,
        falsehood,
        integer_shape,
        float_shape,
        double_shape,
        char_shape,
        string_shape,
        fixed_shape,
        chunk_shape,
        treepage_shape,
        allocator_shape,
        undefined_shape,
        boolean_shape,
        stub_shape,
    ];

    // Fixed-space singletons carry their reserved logical address and are
    // never persisted.
    for (index, object) in table.iter().enumerate() {
        object.set_logical(FIXED_ADDR_MIN + index as u32);
        object.set_physical(PHYSICAL_UNASSIGNED);
    }

    table
}
