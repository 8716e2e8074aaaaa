//! The error taxonomy threaded through every adapter and the pipeline.
//!
//! This is a single currency (not a type per failure site) so that `?`
//! works uniformly from CLI down through the deepest adapter internals.
//! The variants mirror the error-kind table in the project's design notes.

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("unknown source label or index: {0}")]
    UnknownLabel(String),

    #[error("no source to download: provide --file or register a url for this dataset")]
    MissingSource,

    #[error("could not determine the archive format of {0}")]
    UnknownFormat(String),

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),

    #[error(transparent)]
    Http(#[from] Box<ureq::Error>),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    TomlSer(#[from] toml::ser::Error),

    #[error("row rejected: {0}")]
    ParseFailed(String),

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("duplicate identifier dropped: {0}")]
    DuplicateIdentifier(String),

    #[error("walked off the end of the archive: {0}")]
    Archive(String),
}

impl From<ureq::Error> for Error {
    fn from(err: ureq::Error) -> Self {
        Error::Http(Box::new(err))
    }
}

#[derive(thiserror::Error, Debug)]
pub enum LookupError {
    #[error("cannot find dataset in archive: {0}")]
    Dataset(String),

    #[error("cannot find name in archive: {0}")]
    Name(String),

    #[error("cannot find parent taxon for: {0}")]
    Parent(String),

    #[error("cannot find reference for: {0}")]
    Reference(String),
}

/// How a [`crate::sources::csv_import::ParseFailed`]-level row error should be
/// handled, controlled by the `--wrong-fields-num` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, Default)]
pub enum WrongFieldsPolicy {
    /// Abort the whole conversion on the first malformed row.
    Stop,
    /// Drop the row, log a warning, and continue.
    #[default]
    Ignore,
    /// Attempt to coerce the row (pad/truncate fields) and continue.
    Process,
}
