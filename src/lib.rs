pub mod codec;
pub mod encoder;
pub mod error;
pub mod header;
pub mod index;
pub mod io_stream;
pub mod manager;
pub mod record;
pub mod source;
pub mod strings;
pub mod variable;

pub use error::{ArzError, Result};
pub use header::ArzHeader;
pub use index::RecordInfo;
pub use io_stream::{ArzReader, ArzWriter};
pub use manager::{ArzManager, SyncOptions, SyncReport, SyncStatus};
pub use record::RawRecord;
pub use source::{Field, FieldClass, FieldKind, RecordParser, ResolvedRecord, TimeSource};
pub use strings::StringTable;
