//! Block request model
//!
//! A [`Request`] is built by the storage stack, moved into the host on
//! submission and handed back through [`MmcClient::request_done`] once every
//! command and data phase it carries has been resolved.
//!
//! [`MmcClient::request_done`]: crate::hal::MmcClient::request_done

use bitflags::bitflags;
use core::ptr::NonNull;

/// Maximum scatter-gather entries per data phase
pub const MAX_SEGS: usize = 128;

/// Resolution of a command or data phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmcError {
    /// Hardware or watchdog timeout
    Timeout,
    /// CRC, end-bit or index mismatch reported by the controller
    Protocol,
    /// The command cannot be expressed to this controller
    Invalid,
    /// The controller disappeared while the request was active
    NoMedium,
}

impl core::fmt::Display for MmcError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            MmcError::Timeout => f.write_str("timed out"),
            MmcError::Protocol => f.write_str("CRC/end-bit/index error"),
            MmcError::Invalid => f.write_str("unsupported command"),
            MmcError::NoMedium => f.write_str("controller removed"),
        }
    }
}

bitflags! {
    /// Expected response shape and checks
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RespFlags: u8 {
        const PRESENT = 1 << 0;
        /// 136-bit response
        const LONG = 1 << 1;
        const CRC = 1 << 2;
        /// Card signals busy on DAT0 after the response
        const BUSY = 1 << 3;
        /// Response carries the command index
        const OPCODE = 1 << 4;
    }
}

impl RespFlags {
    pub const NONE: Self = Self::empty();
    pub const R1: Self = Self::PRESENT.union(Self::CRC).union(Self::OPCODE);
    pub const R1B: Self = Self::R1.union(Self::BUSY);
    pub const R2: Self = Self::PRESENT.union(Self::LONG).union(Self::CRC);
    pub const R3: Self = Self::PRESENT;
    pub const R6: Self = Self::R1;
    pub const R7: Self = Self::R1;
}

/// One SD/MMC command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub opcode: u8,
    pub arg: u32,
    pub flags: RespFlags,
    /// Busy timeout for R1b commands without data, in milliseconds
    pub busy_timeout_ms: u32,
    /// Response words, most significant first for 136-bit responses
    pub resp: [u32; 4],
    pub error: Option<MmcError>,
}

impl Command {
    pub fn new(opcode: u8, arg: u32, flags: RespFlags) -> Self {
        Self {
            opcode,
            arg,
            flags,
            busy_timeout_ms: 0,
            resp: [0; 4],
            error: None,
        }
    }

    pub fn with_busy_timeout(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }
}

/// Data phase direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// One contiguous memory region of a scatter list
///
/// The region is borrowed from the submitter for the lifetime of the
/// request; the host and the DMA engine read or write it while the request
/// is in flight.
#[derive(Debug)]
pub struct Segment {
    ptr: NonNull<u8>,
    len: usize,
}

// Safety: a segment is an exclusive claim on its region, see constructors
unsafe impl Send for Segment {}

impl Segment {
    /// Claim a region for the lifetime of the program
    pub fn from_static(buf: &'static mut [u8]) -> Self {
        let len = buf.len();
        Self {
            ptr: NonNull::from(buf).cast(),
            len,
        }
    }

    /// Build a segment over a raw region
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes and nothing
    /// else may access the region until the segment is dropped.
    pub unsafe fn from_raw_parts(ptr: NonNull<u8>, len: usize) -> Self {
        Self { ptr, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// CPU address of the region, for DMA mapping
    pub fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

/// Data phase of a request
#[derive(Debug)]
pub struct Data {
    pub direction: Direction,
    pub blksz: u32,
    pub blocks: u32,
    pub sg: heapless::Vec<Segment, MAX_SEGS>,
    pub bytes_xfered: u32,
    pub error: Option<MmcError>,
}

impl Data {
    pub fn new(direction: Direction, blksz: u32, blocks: u32) -> Self {
        Self {
            direction,
            blksz,
            blocks,
            sg: heapless::Vec::new(),
            bytes_xfered: 0,
            error: None,
        }
    }

    /// Append a region; hands it back if the list is full
    pub fn push_segment(&mut self, segment: Segment) -> Result<(), Segment> {
        self.sg.push(segment)
    }

    pub fn with_segment(mut self, segment: Segment) -> Result<Self, Segment> {
        self.push_segment(segment)?;
        Ok(self)
    }

    pub fn is_read(&self) -> bool {
        self.direction == Direction::Read
    }

    /// Bytes the data phase moves
    pub fn len(&self) -> u64 {
        self.blksz as u64 * self.blocks as u64
    }

    pub fn sg_len(&self) -> usize {
        self.sg.iter().map(Segment::len).sum()
    }
}

/// A block request: optional CMD23, command, optional data and stop
#[derive(Debug)]
pub struct Request {
    /// SET_BLOCK_COUNT sent ahead of the command
    pub sbc: Option<Command>,
    pub cmd: Command,
    pub data: Option<Data>,
    /// Stop command terminating an open-ended or failed transfer
    pub stop: Option<Command>,
}

impl Request {
    pub fn new(cmd: Command) -> Self {
        Self {
            sbc: None,
            cmd,
            data: None,
            stop: None,
        }
    }

    pub fn with_sbc(mut self, sbc: Command) -> Self {
        self.sbc = Some(sbc);
        self
    }

    pub fn with_data(mut self, data: Data) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_stop(mut self, stop: Command) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Any command or data phase failed
    pub fn has_error(&self) -> bool {
        self.sbc.as_ref().is_some_and(|c| c.error.is_some())
            || self.cmd.error.is_some()
            || self.data.as_ref().is_some_and(|d| d.error.is_some())
            || self.stop.as_ref().is_some_and(|c| c.error.is_some())
    }

    /// First error in protocol order
    pub fn first_error(&self) -> Option<MmcError> {
        self.sbc
            .as_ref()
            .and_then(|c| c.error)
            .or(self.cmd.error)
            .or(self.data.as_ref().and_then(|d| d.error))
            .or(self.stop.as_ref().and_then(|c| c.error))
    }
}

/// Which command of the active request is outstanding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdSlot {
    Sbc,
    Main,
    Stop,
}

impl Request {
    pub(crate) fn command(&self, slot: CmdSlot) -> Option<&Command> {
        match slot {
            CmdSlot::Sbc => self.sbc.as_ref(),
            CmdSlot::Main => Some(&self.cmd),
            CmdSlot::Stop => self.stop.as_ref(),
        }
    }

    pub(crate) fn command_mut(&mut self, slot: CmdSlot) -> Option<&mut Command> {
        match slot {
            CmdSlot::Sbc => self.sbc.as_mut(),
            CmdSlot::Main => Some(&mut self.cmd),
            CmdSlot::Stop => self.stop.as_mut(),
        }
    }
}
