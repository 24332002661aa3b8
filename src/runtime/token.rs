//! Operation tokens for io_uring completion correlation.
//!
//! Each submitted operation carries a token (user_data) that identifies
//! the operation type and the connection slot it belongs to. The token is
//! self-describing, so no side table is needed to resolve a completion:
//!
//! ```text
//!  63      56 55            32 31                 0
//! +----------+----------------+--------------------+
//! |  op kind |   generation   |     slot index     |
//! +----------+----------------+--------------------+
//! ```
//!
//! The generation is truncated to 24 bits. A slot has to be reused 2^24
//! times while one stale operation is still outstanding before a stale
//! completion could be mistaken for a live one.

/// Slot index reserved for operations that do not belong to a connection
/// (accept on the listener, ticks).
pub const LISTENER_INDEX: u32 = u32::MAX;

const INDEX_BITS: u32 = 32;
const GENERATION_BITS: u32 = 24;
const GENERATION_MASK: u32 = (1 << GENERATION_BITS) - 1;
const OP_SHIFT: u32 = INDEX_BITS + GENERATION_BITS;

/// Handle to a connection slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId {
    index: u32,
    generation: u32,
}

impl ConnId {
    /// Id used to tag listener-level operations.
    pub const LISTENER: ConnId = ConnId {
        index: LISTENER_INDEX,
        generation: 0,
    };

    pub fn new(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation: generation & GENERATION_MASK,
        }
    }

    pub fn index(self) -> usize {
        self.index as usize
    }

    pub fn generation(self) -> u32 {
        self.generation
    }

    #[cfg(test)]
    pub fn is_listener(self) -> bool {
        self.index == LISTENER_INDEX
    }
}

/// Type of in-flight operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpKind {
    /// Accept on the listener socket.
    Accept = 1,
    /// Receive into the slot's buffer.
    Read = 2,
    /// Send from the slot's buffer.
    Write = 3,
    /// Periodic timeout driving idle sweeps.
    Tick = 4,
    /// Cancellation of another operation.
    Cancel = 5,
}

impl OpKind {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(OpKind::Accept),
            2 => Some(OpKind::Read),
            3 => Some(OpKind::Write),
            4 => Some(OpKind::Tick),
            5 => Some(OpKind::Cancel),
            _ => None,
        }
    }
}

/// The datum attached to a submitted operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub conn: ConnId,
    pub op: OpKind,
}

impl Token {
    pub fn new(conn: ConnId, op: OpKind) -> Self {
        Self { conn, op }
    }

    pub fn accept() -> Self {
        Self::new(ConnId::LISTENER, OpKind::Accept)
    }

    pub fn tick() -> Self {
        Self::new(ConnId::LISTENER, OpKind::Tick)
    }

    /// Pack into an io_uring user_data value.
    pub fn encode(self) -> u64 {
        ((self.op as u64) << OP_SHIFT)
            | (((self.conn.generation & GENERATION_MASK) as u64) << INDEX_BITS)
            | self.conn.index as u64
    }

    /// Unpack a user_data value. Returns `None` for an unknown op kind.
    pub fn decode(user_data: u64) -> Option<Self> {
        let op = OpKind::from_u8((user_data >> OP_SHIFT) as u8)?;
        let generation = ((user_data >> INDEX_BITS) as u32) & GENERATION_MASK;
        let index = user_data as u32;
        Some(Self {
            conn: ConnId { index, generation },
            op,
        })
    }
}
