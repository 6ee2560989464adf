//! Shared protocol constants for the Filestash backup transport

// Protocol version carried in every request and response header
pub const VERSION: u8 = 1;

// Fixed request prefix: uid (4) | version (1) | op (1) | name_len (2)
pub const HEADER_SIZE: usize = 8;

// Width of the trailing size field on store requests and success responses
pub const SIZE_FIELD: usize = 4;

// Unit of every payload read/write, and the single receive used for the header
pub const CHUNK_SIZE: usize = 1024;

// Largest payload a store request may declare (2^32 - 1)
pub const MAX_STORE_SIZE: u64 = u32::MAX as u64;

// Synthetic listing-file name: 32 random alphanumerics + extension
pub const LIST_NAME_RANDOM_LEN: usize = 32;
pub const LIST_NAME_EXT: &str = ".txt";

// Operation codes (numeric values are wire-stable)
pub mod op {
    pub const STORE: u8 = 100;
    pub const FETCH: u8 = 200;
    pub const DELETE: u8 = 201;
    pub const LIST: u8 = 202;
}

// Response status codes.
// STORED and ERASED intentionally share 212; the client tells them apart by the
// operation it sent.
pub mod status {
    pub const FETCHED: u16 = 210;
    pub const LISTED: u16 = 211;
    pub const STORED: u16 = 212;
    pub const ERASED: u16 = 212;
    pub const FILE_NOT_FOUND: u16 = 1001;
    pub const NO_CONTENT: u16 = 1002;
    pub const INTERNAL_ERROR: u16 = 1003;
}

/// Request operation, produced only by validation of a decoded header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Store,
    Fetch,
    Delete,
    List,
}

impl Operation {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            op::STORE => Some(Operation::Store),
            op::FETCH => Some(Operation::Fetch),
            op::DELETE => Some(Operation::Delete),
            op::LIST => Some(Operation::List),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Operation::Store => op::STORE,
            Operation::Fetch => op::FETCH,
            Operation::Delete => op::DELETE,
            Operation::List => op::LIST,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Operation::Store => "store",
            Operation::Fetch => "fetch",
            Operation::Delete => "delete",
            Operation::List => "list",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome reported to the client in a response header.
///
/// `Stored` and `Erased` encode to the same wire value; see [`Status::from_wire`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    Fetched,
    Listed,
    Stored,
    Erased,
    FileNotFound,
    NoContent,
    InternalError,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::Fetched => status::FETCHED,
            Status::Listed => status::LISTED,
            Status::Stored => status::STORED,
            Status::Erased => status::ERASED,
            Status::FileNotFound => status::FILE_NOT_FOUND,
            Status::NoContent => status::NO_CONTENT,
            Status::InternalError => status::INTERNAL_ERROR,
        }
    }

    /// Interpret a wire status in the context of the operation that was sent.
    /// Returns `None` for codes this protocol does not define.
    pub fn from_wire(code: u16, sent: Operation) -> Option<Self> {
        match code {
            status::FETCHED => Some(Status::Fetched),
            status::LISTED => Some(Status::Listed),
            status::STORED if sent == Operation::Delete => Some(Status::Erased),
            status::STORED => Some(Status::Stored),
            status::FILE_NOT_FOUND => Some(Status::FileNotFound),
            status::NO_CONTENT => Some(Status::NoContent),
            status::INTERNAL_ERROR => Some(Status::InternalError),
            _ => None,
        }
    }

    pub fn is_success(self) -> bool {
        matches!(
            self,
            Status::Fetched | Status::Listed | Status::Stored | Status::Erased
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Status::Fetched => "GET_FILE_SUC",
            Status::Listed => "GET_LIST_SUC",
            Status::Stored => "BACKUP_FILE_SUC",
            Status::Erased => "ERASE_FILE_SUC",
            Status::FileNotFound => "FILE_NOT_FOUND",
            Status::NoContent => "NO_CONTENT",
            Status::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}
