// Numan Thabit 2025
#![forbid(unsafe_code)]

mod dom;
pub mod hwloc;
pub mod read;
pub mod save;

pub use hwloc::assign_hwloc_files;
pub use read::load_machine;
pub use save::save_machine;

use thiserror::Error;

/// File format version accepted on load and produced on save.
pub const FILE_VERSION: &str = "3.0";

#[derive(Debug, Error)]
pub enum XmlError {
    #[error("xml syntax: {0}")]
    Syntax(#[from] quick_xml::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported file version {found:?}, expected {expected:?}")]
    BadVersion { found: String, expected: String },
    #[error("unexpected element <{0}>")]
    UnexpectedElement(String),
    #[error("element <{element}> is missing attribute {attribute}")]
    MissingAttribute {
        element: String,
        attribute: &'static str,
    },
    #[error("cannot parse {what} from {value:?}")]
    BadNumber { what: &'static str, value: String },
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Model(#[from] fabric_model::FabricError),
}

pub type Result<T> = std::result::Result<T, XmlError>;
