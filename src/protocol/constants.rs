//! SOCKS5 Protocol Constants

// SOCKS5 Protocol Version
pub const SOCKS5_VERSION: u8 = 0x05;

// Reserved field value
pub const SOCKS5_RESERVED: u8 = 0x00;

// SOCKS5 Commands
pub const SOCKS5_CMD_CONNECT: u8 = 0x01;
pub const SOCKS5_CMD_BIND: u8 = 0x02;
pub const SOCKS5_CMD_UDP_ASSOCIATE: u8 = 0x03;

// Address Types
pub const SOCKS5_ADDR_IPV4: u8 = 0x01;
pub const SOCKS5_ADDR_DOMAIN: u8 = 0x03;
pub const SOCKS5_ADDR_IPV6: u8 = 0x04;

// Authentication Methods
pub const SOCKS5_AUTH_NONE: u8 = 0x00;
pub const SOCKS5_AUTH_GSSAPI: u8 = 0x01;
pub const SOCKS5_AUTH_USERPASS: u8 = 0x02;
pub const SOCKS5_AUTH_IANA_FIRST: u8 = 0x03;
pub const SOCKS5_AUTH_IANA_LAST: u8 = 0x7F;
pub const SOCKS5_AUTH_PRIVATE_FIRST: u8 = 0x80;
pub const SOCKS5_AUTH_PRIVATE_LAST: u8 = 0xFE;
pub const SOCKS5_AUTH_NO_ACCEPTABLE: u8 = 0xFF;

// Response Codes
pub const SOCKS5_REPLY_SUCCESS: u8 = 0x00;
pub const SOCKS5_REPLY_GENERAL_FAILURE: u8 = 0x01;
pub const SOCKS5_REPLY_CONNECTION_NOT_ALLOWED: u8 = 0x02;
pub const SOCKS5_REPLY_NETWORK_UNREACHABLE: u8 = 0x03;
pub const SOCKS5_REPLY_HOST_UNREACHABLE: u8 = 0x04;
pub const SOCKS5_REPLY_CONNECTION_REFUSED: u8 = 0x05;
pub const SOCKS5_REPLY_TTL_EXPIRED: u8 = 0x06;
pub const SOCKS5_REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;
pub const SOCKS5_REPLY_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;
pub const SOCKS5_REPLY_UNASSIGNED: u8 = 0x09;

// Replies are assembled in a fixed scratch buffer of this size
pub const SOCKS5_REPLY_BUFFER_LEN: usize = 100;

// VER REP RSV ATYP LEN + PORT
pub const SOCKS5_REPLY_OVERHEAD: usize = 7;

// Longest server host that still fits the reply buffer
pub const SOCKS5_MAX_IDENTITY_HOST_LEN: usize = SOCKS5_REPLY_BUFFER_LEN - SOCKS5_REPLY_OVERHEAD;
