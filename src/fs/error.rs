pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    /// Underlying device I/O failure, carrying the OS errno.
    Storage(libc::c_int),

    /// A path component does not exist.
    NotFound,

    /// No free inode, no free data block, or a leaf name too long
    /// for a directory slot.
    NoSpace,

    /// The rename target already exists.
    Exists,

    /// The superblock's magic field does not match.
    InvalidSuperblock,
}

impl From<libc::c_int> for Error {
    fn from(errno: libc::c_int) -> Self {
        Self::Storage(errno)
    }
}

impl From<Error> for libc::c_int {
    fn from(err: Error) -> Self {
        match err {
            Error::Storage(errno) => errno,
            Error::NotFound => libc::ENOENT,
            Error::NoSpace => libc::ENOSPC,
            Error::Exists => libc::EACCES,
            Error::InvalidSuperblock => libc::EINVAL,
        }
    }
}
