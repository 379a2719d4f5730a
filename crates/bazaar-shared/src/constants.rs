/// Application name
pub const APP_NAME: &str = "Bazaar";

/// Width of a short fixed field (usernames, product names, ids, opcodes)
pub const SHORT_FIELD_LEN: usize = 1024;

/// Width of a chat message body field
pub const BODY_FIELD_LEN: usize = 4096;

/// Width of the big-endian length prefix in front of every blob
pub const LENGTH_PREFIX_LEN: usize = 16;

/// Default upper bound for a single blob payload (32 MiB)
pub const DEFAULT_MAX_PAYLOAD: usize = 32 * 1024 * 1024;

/// Success flag byte
pub const FLAG_OK: u8 = b'1';

/// Failure flag byte
pub const FLAG_FAIL: u8 = b'0';

/// Chat-status byte for "currently chatting with you"
pub const FLAG_IN_CHAT: u8 = b'2';

/// Handshake token selecting login
pub const AUTH_LOGIN: &str = "yes";

/// Handshake token selecting signup
pub const AUTH_SIGNUP: &str = "no";

/// Separator between display name and password in the signup field, and
/// between product name and seller in product lookups
pub const FIELD_SEPARATOR: char = '|';

/// Token returned by propose-transaction on failure
pub const TRANSACTION_ERROR: &str = "error";

/// Length of a transaction id token
pub const TRANSACTION_ID_LEN: usize = 8;

/// Reserved chat body accepting the newest purchase proposal
pub const CONFIRM_TOKEN: &str = "CONFIRM";

/// Reserved chat body rejecting the newest purchase proposal
pub const DENY_TOKEN: &str = "DENY";

/// Marker identifying a free-text purchase proposal
pub const PROPOSAL_MARKER: &str = "PURCHASE PROPOSAL";

/// Lowest accepted rating score
pub const MIN_SCORE: i64 = 1;

/// Highest accepted rating score
pub const MAX_SCORE: i64 = 5;

/// Default TCP port of the marketplace server
pub const DEFAULT_PORT: u16 = 5050;

/// Default number of messages returned by chat-history
pub const DEFAULT_HISTORY_LIMIT: u32 = 50;
