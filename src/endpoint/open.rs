// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    fs::{self, File, OpenOptions},
    io,
    os::unix::fs::{FileTypeExt, MetadataExt, OpenOptionsExt},
    path::Path,
    sync::Arc,
};

use tracing::{debug, info};

use crate::{
    endpoint::{Endpoint, EndpointKind, OpenError, OpenFlags, Role},
    transport::{
        any::AnyTransport,
        backing::FileBacking,
        file::{FileTransport, Handle},
        target::{CapacityReport, CdbTarget},
    },
};

/// Character major of the Linux SCSI generic driver.
const SG_MAJOR: u32 = 21;
/// `/dev/null` is character device 1:3.
const MEM_MAJOR: u32 = 1;
const NULL_MINOR: u32 = 3;

fn major(dev: u64) -> u32 {
    (((dev >> 8) & 0xfff) | ((dev >> 32) & !0xfff)) as u32
}

fn minor(dev: u64) -> u32 {
    ((dev & 0xff) | ((dev >> 12) & !0xff)) as u32
}

/// What `path` refers to, judged from its metadata.
///
/// `Ok(None)` means the path does not exist yet.
pub fn detect_kind(path: &Path) -> io::Result<Option<EndpointKind>> {
    if path.as_os_str() == "-" {
        return Ok(Some(EndpointKind::StdStream));
    }
    if path.as_os_str() == "." {
        return Ok(Some(EndpointKind::NullSink));
    }
    let meta = match fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let ft = meta.file_type();
    let kind = if ft.is_block_device() {
        EndpointKind::BlockDevice
    } else if ft.is_char_device() {
        match (major(meta.rdev()), minor(meta.rdev())) {
            (SG_MAJOR, _) => EndpointKind::CommandDevice,
            (MEM_MAJOR, NULL_MINOR) => EndpointKind::NullSink,
            _ => EndpointKind::Fifo,
        }
    } else if ft.is_fifo() || ft.is_socket() {
        EndpointKind::Fifo
    } else if ft.is_file() {
        EndpointKind::RegularFile
    } else {
        return Err(io::Error::other("not a file, device or fifo"));
    };
    Ok(Some(kind))
}

fn open_file(path: &Path, role: Role, flags: OpenFlags, kind: EndpointKind) -> io::Result<File> {
    let mut opts = OpenOptions::new();
    let mut custom = 0;
    if flags.contains(OpenFlags::DIRECT) {
        custom |= libc::O_DIRECT;
    }
    if flags.contains(OpenFlags::SYNC) {
        custom |= libc::O_SYNC;
    }
    if flags.contains(OpenFlags::EXCLUSIVE) {
        custom |= libc::O_EXCL;
    }
    match role {
        Role::Source => {
            opts.read(true);
        },
        Role::Destination => {
            opts.write(true);
            // verify reads the output back; fifos stay write-only
            opts.read(kind != EndpointKind::Fifo && !flags.contains(OpenFlags::APPEND));
            if flags.contains(OpenFlags::APPEND) {
                opts.append(true);
            }
            if kind == EndpointKind::RegularFile && !flags.contains(OpenFlags::NO_CREATE) {
                opts.create(true);
            }
        },
    }
    opts.custom_flags(custom).open(path)
}

/// Open `path` for `role`.
///
/// `-` is stdin or stdout and `.` is the null sink. Everything else is
/// classified from its metadata. A SCSI generic node cannot be driven
/// directly; `FORCE_RAW` turns a regular file or block device into a
/// command device served by the CDB-interpreting target.
pub fn open(
    path: impl AsRef<Path>,
    role: Role,
    flags: OpenFlags,
    block_size: u32,
) -> Result<Endpoint<AnyTransport>, OpenError> {
    let path = path.as_ref();
    if block_size == 0 {
        return Err(OpenError::new(path, "block size must be positive"));
    }
    let detected = detect_kind(path).map_err(|e| OpenError::new(path, e))?;
    let kind = match (detected, role) {
        (Some(kind), _) => kind,
        (None, Role::Destination) if !flags.contains(OpenFlags::NO_CREATE) => {
            EndpointKind::RegularFile
        },
        (None, _) => return Err(OpenError::new(path, "no such file or device")),
    };

    let (kind, transport): (EndpointKind, AnyTransport) = match kind {
        EndpointKind::StdStream => {
            let handle = match role {
                Role::Source => Handle::Stdin,
                Role::Destination => Handle::Stdout,
            };
            (kind, FileTransport::new(handle, block_size, false).into())
        },
        EndpointKind::NullSink => (kind, FileTransport::new(Handle::Null, block_size, true).into()),
        EndpointKind::CommandDevice => {
            return Err(OpenError::new(
                path,
                "SCSI generic pass-through is not available, use a file or block device \
                 with ForceRaw",
            ));
        },
        EndpointKind::RegularFile | EndpointKind::BlockDevice
            if flags.contains(OpenFlags::FORCE_RAW) =>
        {
            let file = open_file(path, role, flags, kind).map_err(|e| OpenError::new(path, e))?;
            let target = CdbTarget::new(FileBacking::new(Arc::new(file)), block_size)
                .with_capacity(CapacityReport::FromBacking);
            info!(?path, was = kind.name(), "driving through command descriptors");
            (EndpointKind::CommandDevice, target.into())
        },
        EndpointKind::RegularFile | EndpointKind::BlockDevice | EndpointKind::Fifo => {
            let file = open_file(path, role, flags, kind).map_err(|e| OpenError::new(path, e))?;
            let positioned = kind.is_seekable() && !flags.contains(OpenFlags::APPEND);
            let handle = Handle::File(Arc::new(file));
            (kind, FileTransport::new(handle, block_size, positioned).into())
        },
    };

    debug!(?path, %role, kind = kind.name(), ?flags, "opened");
    Ok(Endpoint::with_transport(role, kind, block_size, transport)
        .with_path(path)
        .with_flags(flags))
}
