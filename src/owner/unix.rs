// volsnap backup system.
// Copyright 2022 Stephanie Aelmore.
// Copyright 2015-2024 Martin Pool.

// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

//! Unix implementation of file ownership.

use std::fs;
use std::os::unix::fs::{lchown, MetadataExt};
use std::path::Path;
use std::sync::Mutex;

use lazy_static::lazy_static;
use nix::errno::Errno;
use uzers::{Groups, Users, UsersCache};

use super::Owner;
use crate::{Error, Result};

lazy_static! {
    static ref USERS_CACHE: Mutex<UsersCache> = Mutex::new(UsersCache::new());
}

impl From<&fs::Metadata> for Owner {
    fn from(mdata: &fs::Metadata) -> Self {
        let users_cache = USERS_CACHE.lock().unwrap();
        let user = users_cache
            .get_user_by_uid(mdata.uid())
            .and_then(|user| user.name().to_str().map(String::from));
        let group = users_cache
            .get_group_by_gid(mdata.gid())
            .and_then(|group| group.name().to_str().map(String::from));
        Owner { user, group }
    }
}

/// Set the owner of a file, directory or symlink (not following the link).
///
/// Names unknown on this machine are left unchanged. Lacking permission to
/// change ownership is not an error, since restores usually don't run as root.
pub(crate) fn set_owner(owner: &Owner, path: &Path) -> Result<()> {
    let users_cache = USERS_CACHE.lock().unwrap();
    let uid = owner
        .user
        .as_ref()
        .and_then(|user| users_cache.get_user_by_name(user))
        .map(|user| user.uid());
    let gid = owner
        .group
        .as_ref()
        .and_then(|group| users_cache.get_group_by_name(group))
        .map(|group| group.gid());
    drop(users_cache);
    if uid.is_none() && gid.is_none() {
        return Ok(());
    }
    match lchown(path, uid, gid) {
        Ok(()) => Ok(()),
        Err(err) if err.raw_os_error() == Some(Errno::EPERM as i32) => Ok(()),
        Err(source) => Err(Error::SetOwner {
            path: path.to_path_buf(),
            source,
        }),
    }
}
