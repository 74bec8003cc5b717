mod codec;
mod types;

pub use self::codec::{CmdPacket, StatusPacket, MAX_SEQUENCE_NUMBER};
pub use self::types::{Command, Status};
