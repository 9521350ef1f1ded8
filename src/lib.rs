//! ObjectLite: an embedded, single-file object database.
//!
//! A process opens one database file, creates objects of a handful of
//! built-in shapes (integers, booleans, strings, fixed-size tuples, slotted
//! records, shape metadata, address-map tree pages), navigates them through a
//! logical-to-physical address map, reads and writes them through a
//! memory-mapped region, and commits changes transactionally.
//!
//! Values are content-addressed inside the file by 32-bit word offset
//! ("physical addresses"); identities are expressed by logical addresses
//! that survive relocation. The word is the unit of addressing and I/O:
//! an unsigned 32-bit integer, big-endian on disk.
//!
//! ```no_run
//! use objectlite::{DbOptions, Object};
//!
//! let db = DbOptions::new("example.obl").open().unwrap();
//! let session = db.session();
//!
//! session.begin().unwrap();
//! let answer = Object::integer(42);
//! let address = session.persist(&answer);
//! session.commit().unwrap();
//!
//! let read_back = session.at_address(address);
//! assert_eq!(read_back.integer_value(), 42);
//! ```

pub mod addressmap;
pub mod allocator;
pub mod cache;
pub mod codec;
mod database;
mod error;
mod fixedspace;
pub mod logging;
mod mapping;
pub mod object;
mod session;
pub mod set;
mod transaction;

pub use database::{Database, DbOptions, RootRecord};
pub use error::{DbError, ErrorCode};
pub use fixedspace::{falsehood, is_fixed_address, nil, truth, FixedAddress};
pub use logging::{LogConfig, LogLevel};
pub use object::{Object, ObjectRef, StorageTag};
pub use session::Session;

/// A single on-disk word.
pub type Word = u32;

/// Stable 32-bit identifier of an object; survives movement in the file.
pub type LogicalAddress = u32;

/// 32-bit word offset into the database file.
pub type PhysicalAddress = u32;

/// Denotes an object that has not been assigned a logical address.
pub const LOGICAL_UNASSIGNED: LogicalAddress = 0;

/// Denotes an object that has not been serialized to a file location.
pub const PHYSICAL_UNASSIGNED: PhysicalAddress = 0;

/// Highest assignable address, logical or physical.
pub const ADDRESS_MAX: u32 = u32::MAX;

/// The number of words allocated to an object chunk and to one address-map
/// tree page. Must be a power of two, or the address map breaks (among other
/// things).
pub const CHUNK_SIZE: u32 = 256;

/// log2 of [`CHUNK_SIZE`].
pub const CHUNK_SIZE_LOG2: u32 = 8;

/// Bits of a logical address consumed per level of the address map.
pub const PAGE_SHIFT: u32 = CHUNK_SIZE_LOG2;

/// Fanout of one address-map tree page.
pub const PAGE_FANOUT: u32 = 1 << PAGE_SHIFT;

/// Default number of buckets in the LRU cache. A prime relatively close to
/// the default cache capacity.
pub const DEFAULT_CACHE_BUCKETS: usize = 1021;

/// Default depth to which object graphs are materialized before leaving
/// stubs.
pub const DEFAULT_STUB_DEPTH: i32 = 4;

/// Extend the database file by this many words each time an allocation runs
/// past the mapped extent.
pub const DEFAULT_GROWTH_SIZE: u32 = 4096;

/// The first word of every database file: the bytes `'o' 'b' 'l' '\0'`.
pub const MAGIC_WORD: Word = 0x6F62_6C00;
