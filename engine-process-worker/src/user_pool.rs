// Copyright (c) 2022 MASSA LABS <info@massa.net>

use engine_process_exports::ProcessError;
use std::collections::{HashSet, VecDeque};
use tracing::warn;

/// Unprivileged OS identity a sandbox child runs as.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct User {
    /// user id
    pub uid: u32,
    /// group id, equal to `uid`
    pub gid: u32,
    /// account name
    pub name: String,
}

/// Fixed range of sandbox users, each held by at most one live process.
///
/// Released users go to the back of the queue so the least recently used
/// one is handed out first.
#[derive(Debug)]
pub struct UserPool {
    free: VecDeque<User>,
    in_use: HashSet<u32>,
    capacity: usize,
}

impl UserPool {
    /// Users `uid_base .. uid_base + count`.
    pub fn new(uid_base: u32, count: usize) -> Result<Self, ProcessError> {
        if count == 0 {
            return Err(ProcessError::InvalidConfig(
                "the sandbox user pool cannot be empty".into(),
            ));
        }
        let count_u32 = u32::try_from(count)
            .map_err(|_| ProcessError::InvalidConfig(format!("{} sandbox users", count)))?;
        if uid_base.checked_add(count_u32).is_none() {
            return Err(ProcessError::InvalidConfig(format!(
                "sandbox uids {} + {} overflow",
                uid_base, count
            )));
        }
        let free = (uid_base..uid_base + count_u32)
            .map(|uid| User {
                uid,
                gid: uid,
                name: format!("sbx{}", uid),
            })
            .collect();
        Ok(UserPool {
            free,
            in_use: HashSet::new(),
            capacity: count,
        })
    }

    /// Takes a free user.
    pub fn acquire(&mut self) -> Result<User, ProcessError> {
        let user = self.free.pop_front().ok_or(ProcessError::UserPoolExhausted)?;
        self.in_use.insert(user.uid);
        Ok(user)
    }

    /// Gives a user back. Unknown or already free users are ignored.
    pub fn release(&mut self, user: User) {
        if !self.in_use.remove(&user.uid) {
            warn!("released user {} which was not in use", user.name);
            return;
        }
        self.free.push_back(user);
    }

    /// number of free users
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// number of users in the pool
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
