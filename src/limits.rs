// Hard limits for values arriving over the network.

/// Max operations in one scheduled batch.
pub const MAX_BATCH_SIZE: usize = 1_000;

/// Max byte length of a reservation description.
pub const MAX_DESCRIPTION_LEN: usize = 4_096;

/// Max byte length of hotel, category and room names.
pub const MAX_NAME_LEN: usize = 256;

/// Max atoms (room changes) in one reservation.
pub const MAX_ATOMS_PER_RESERVATION: usize = 256;

/// Max length of one protocol frame body.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Max encoded size of one journal record. Replay treats a larger length
/// prefix as a torn tail.
pub const MAX_RECORD_LEN: usize = 32 * 1024 * 1024;

/// Max concurrently open streams per client session.
pub const MAX_STREAMS_PER_SESSION: usize = 64;

/// Journal appends between compactions when nothing else is configured.
pub const DEFAULT_COMPACT_THRESHOLD: u64 = 1_000;
