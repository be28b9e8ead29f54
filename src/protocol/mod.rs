//! RESP Protocol Implementation
//!
//! The wire surface of the server, kept apart from command semantics.
//!
//! ## Modules
//!
//! - `frame`: splits the read buffer into request tokens (zero-copy)
//! - `reply`: the [`Reply`] values commands produce and their encoding
//!
//! ## Example
//!
//! ```
//! use tablekv::protocol::{frame, Reply};
//! use bytes::BytesMut;
//!
//! let mut buf = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n"[..]);
//! let tokens = frame::decode(&mut buf).unwrap().unwrap();
//! assert_eq!(tokens.len(), 2);
//!
//! let mut out = BytesMut::new();
//! Reply::bulk("alice").encode(&mut out);
//! assert_eq!(&out[..], b"$5\r\nalice\r\n");
//! ```

pub mod frame;
pub mod reply;

pub use frame::FrameError;
pub use reply::Reply;
