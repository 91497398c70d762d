//! Slow peripherals.
//!
//! Each device holds at most one outstanding request. A request is issued by
//! an instruction and completes in a later post-execute phase once its
//! latency has elapsed; completion raises the device's interrupt.

use std::fmt;
use serde::{Serialize, Deserialize};
use crate::cpu::registers::RegId;

/// A single-slot device queue.
#[derive(Debug, Clone)]
pub struct Device<R> {
    request: Option<R>,
    remaining: u32,
    fresh: bool,
}

impl<R> Device<R> {
    pub fn new() -> Self {
        Self { request: None, remaining: 0, fresh: false }
    }

    pub fn is_busy(&self) -> bool {
        self.request.is_some()
    }

    /// Ticks left before the outstanding request completes.
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Record a request. Returns `false` and drops it if the device is busy.
    pub fn issue(&mut self, request: R, latency: u32) -> bool {
        if self.is_busy() {
            return false;
        }
        self.request = Some(request);
        self.remaining = latency;
        self.fresh = true;
        true
    }

    /// Advance the device by one post-execute phase.
    ///
    /// The phase of the issuing instruction does not count. After that the
    /// countdown runs to zero, and the following phase hands back the
    /// request for completion.
    pub fn tick(&mut self) -> Option<R> {
        if self.request.is_none() {
            return None;
        }
        if self.fresh {
            self.fresh = false;
            None
        } else if self.remaining > 0 {
            self.remaining -= 1;
            None
        } else {
            self.request.take()
        }
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }
}

impl<R: fmt::Display> Device<R> {
    pub fn status(&self) -> DeviceStatus {
        DeviceStatus {
            busy: self.is_busy(),
            remaining: self.remaining,
            request: self.request.as_ref().map(ToString::to_string),
        }
    }
}

impl<R> Default for Device<R> {
    fn default() -> Self {
        Self::new()
    }
}

/// Direction of a disk transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiskOp {
    /// Block into page.
    Load,
    /// Page into block.
    Store,
}

/// An outstanding disk transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskRequest {
    pub op: DiskOp,
    pub page: usize,
    pub block: usize,
}

impl fmt::Display for DiskRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            DiskOp::Load => write!(f, "load block {} into page {}", self.block, self.page),
            DiskOp::Store => write!(f, "store page {} into block {}", self.page, self.block),
        }
    }
}

/// An outstanding console operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsoleRequest {
    /// Read a line into a register.
    Read { target: RegId },
    /// Print text captured when the request was issued.
    Print { text: String },
}

impl fmt::Display for ConsoleRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsoleRequest::Read { target } => write!(f, "read into {}", target),
            ConsoleRequest::Print { text } => write!(f, "print {:?}", text),
        }
    }
}

/// Serializable view of a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub busy: bool,
    pub remaining: u32,
    pub request: Option<String>,
}
