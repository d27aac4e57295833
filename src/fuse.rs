use std::{
    ffi::OsStr,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use fuser::{FileAttr, FileType, TimeOrNow};

use crate::{
    block::{BLOCK_SIZE, storage::Storage},
    fs::{
        self, Attr,
        dir::NAME_MAX,
        inode::{InodeKind, InodeNo},
    },
};

/// How long the kernel should cache node attributes.
const TTL: Duration = Duration::from_secs(1);

/// Dispatches kernel filesystem requests into [`fs::Filesystem`].
///
/// FUSE numbers inodes from 1 with 1 as the root; the core numbers them
/// from 0 with 0 as the root. The shim shifts by one in both directions.
pub struct Fuse<S: Storage> {
    fs: fs::Filesystem<S>,
}

impl<S: Storage> Fuse<S> {
    pub fn new(fs: fs::Filesystem<S>) -> Self {
        Self { fs }
    }
}

fn node(ino: u64) -> InodeNo {
    (ino - 1) as InodeNo
}

fn fuse_ino(ino: InodeNo) -> u64 {
    ino as u64 + 1
}

impl<S: Storage> fuser::Filesystem for Fuse<S> {
    fn init(
        &mut self,
        _req: &fuser::Request<'_>,
        _config: &mut fuser::KernelConfig,
    ) -> Result<(), libc::c_int> {
        Ok(())
    }

    fn destroy(&mut self) {}

    fn lookup(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEntry,
    ) {
        let name = match name.to_str() {
            Some(name) => name,
            None => return reply.error(libc::EILSEQ),
        };
        let res = self
            .fs
            .lookup_at(node(parent), name)
            .and_then(|found| match found {
                Some(ino) => self.fs.attr(ino),
                None => Err(fs::error::Error::NotFound),
            });
        match res {
            Ok(attr) => reply.entry(&TTL, &file_attr(&attr), 0),
            Err(e) => reply.error(e.into()),
        }
    }

    fn getattr(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: Option<u64>,
        reply: fuser::ReplyAttr,
    ) {
        match self.fs.attr(node(ino)) {
            Ok(attr) => reply.attr(&TTL, &file_attr(&attr)),
            Err(e) => reply.error(e.into()),
        }
    }

    fn setattr(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: fuser::ReplyAttr,
    ) {
        let ino = node(ino);

        if let Some(size) = size {
            if let Err(e) = self.fs.resize(ino, size) {
                return reply.error(e.into());
            }
        }

        if atime.is_some() || mtime.is_some() {
            let attr = match self.fs.attr(ino) {
                Ok(attr) => attr,
                Err(e) => return reply.error(e.into()),
            };
            let atime = atime.map_or(attr.atime, timestamp);
            let mtime = mtime.map_or(attr.mtime, timestamp);
            if let Err(e) = self.fs.set_times(ino, atime, mtime) {
                return reply.error(e.into());
            }
        }

        match self.fs.attr(ino) {
            Ok(attr) => reply.attr(&TTL, &file_attr(&attr)),
            Err(e) => reply.error(e.into()),
        }
    }

    fn mknod(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: fuser::ReplyEntry,
    ) {
        let name = match name.to_str() {
            Some(name) => name,
            None => return reply.error(libc::EILSEQ),
        };
        let res = self
            .fs
            .create_at(node(parent), name, InodeKind::File)
            .and_then(|ino| self.fs.attr(ino));
        match res {
            Ok(attr) => reply.entry(&TTL, &file_attr(&attr), 0),
            Err(e) => reply.error(e.into()),
        }
    }

    fn mkdir(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: fuser::ReplyEntry,
    ) {
        let name = match name.to_str() {
            Some(name) => name,
            None => return reply.error(libc::EILSEQ),
        };
        let res = self
            .fs
            .create_at(node(parent), name, InodeKind::Directory)
            .and_then(|ino| self.fs.attr(ino));
        match res {
            Ok(attr) => reply.entry(&TTL, &file_attr(&attr), 0),
            Err(e) => reply.error(e.into()),
        }
    }

    fn unlink(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEmpty,
    ) {
        let name = match name.to_str() {
            Some(name) => name,
            None => return reply.error(libc::EILSEQ),
        };
        match self.fs.remove_at(node(parent), name) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.into()),
        }
    }

    fn rmdir(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEmpty,
    ) {
        let name = match name.to_str() {
            Some(name) => name,
            None => return reply.error(libc::EILSEQ),
        };
        match self.fs.remove_at(node(parent), name) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.into()),
        }
    }

    fn rename(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: fuser::ReplyEmpty,
    ) {
        let name = match name.to_str() {
            Some(name) => name,
            None => return reply.error(libc::EILSEQ),
        };
        let newname = match newname.to_str() {
            Some(name) => name,
            None => return reply.error(libc::EILSEQ),
        };
        match self
            .fs
            .rename_at(node(parent), name, node(newparent), newname)
        {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.into()),
        }
    }

    fn read(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: fuser::ReplyData,
    ) {
        let mut buf = vec![0u8; size as usize];
        match self.fs.read(node(ino), offset as u64, &mut buf) {
            Ok(read) => reply.data(&buf[..read as usize]),
            Err(e) => reply.error(e.into()),
        }
    }

    fn write(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: fuser::ReplyWrite,
    ) {
        match self.fs.write(node(ino), offset as u64, data) {
            Ok(written) => reply.written(written as u32),
            Err(e) => reply.error(e.into()),
        }
    }

    fn readdir(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: fuser::ReplyDirectory,
    ) {
        let entries = match self.fs.read_dir(node(ino)) {
            Ok(entries) => entries,
            Err(e) => return reply.error(e.into()),
        };

        for (i, entry) in entries.iter().enumerate().skip(offset as usize) {
            let ino = entry.ino.get();
            let kind = match self.fs.attr(ino) {
                Ok(attr) => filetype(attr.kind),
                Err(e) => return reply.error(e.into()),
            };
            let is_full = reply.add(fuse_ino(ino), (i + 1) as i64, kind, entry.name_lossy());
            if is_full {
                break;
            }
        }
        reply.ok();
    }

    fn statfs(&mut self, _req: &fuser::Request<'_>, _ino: u64, reply: fuser::ReplyStatfs) {
        let stat = match self.fs.statfs() {
            Ok(stat) => stat,
            Err(e) => return reply.error(e.into()),
        };
        reply.statfs(
            stat.data_block_num_tot as u64,
            stat.data_block_num_free as u64,
            stat.data_block_num_free as u64,
            stat.inode_num_tot as u64,
            stat.inode_num_free as u64,
            stat.block_size,
            NAME_MAX as u32,
            stat.block_size,
        );
    }
}

fn file_attr(attr: &Attr) -> FileAttr {
    let perm = match attr.kind {
        InodeKind::Directory => 0o755,
        InodeKind::File => 0o644,
    };

    FileAttr {
        ino: fuse_ino(attr.ino),
        size: attr.size as u64,
        blocks: (attr.size as u64).div_ceil(BLOCK_SIZE as u64),
        atime: systime(attr.atime),
        mtime: systime(attr.mtime),
        ctime: systime(attr.ctime),
        crtime: systime(attr.ctime),
        kind: filetype(attr.kind),
        perm,
        nlink: 1,
        uid: 0,
        gid: 0,
        rdev: 0,
        blksize: BLOCK_SIZE,
        flags: 0,
    }
}

fn filetype(kind: InodeKind) -> FileType {
    match kind {
        InodeKind::File => FileType::RegularFile,
        InodeKind::Directory => FileType::Directory,
    }
}

fn systime(secs: u32) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs as u64)
}

fn timestamp(time: TimeOrNow) -> u32 {
    let time = match time {
        TimeOrNow::SpecificTime(time) => time,
        TimeOrNow::Now => SystemTime::now(),
    };
    time.duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as u32)
}
