//! Fuzz target for SFTP packet parsing.
//!
//! This fuzzer tests the packet reader and attribute parser against random
//! input to find:
//! - Panics
//! - Memory safety issues
//! - Incorrect error handling
//!
//! Run with:
//! ```bash
//! cd crates/proto
//! cargo +nightly fuzz run sftp_packet -- -max_total_time=300
//! ```

#![no_main]
use libfuzzer_sys::fuzz_target;
use skiff_proto::sftp::codec::PacketReader;
use skiff_proto::sftp::message::SftpMessageType;
use skiff_proto::sftp::types::FileAttributes;

fuzz_target!(|data: &[u8]| {
    // Walk the data the way the dispatcher does: header, type, request id,
    // then a handful of typed fields
    let mut reader = PacketReader::new(data);
    let _ = reader.read_u32();
    if let Ok(type_byte) = reader.read_u8() {
        let _ = SftpMessageType::from_u8(type_byte);
    }
    let _ = reader.read_u32();
    let _ = reader.read_string();
    let _ = reader.read_u64();

    // The attribute block parser must reject malformed input, never panic
    let mut reader = PacketReader::new(data);
    if let Ok(attrs) = FileAttributes::read_from(&mut reader) {
        // a parsed block must re-serialize within its estimated size
        assert!(attrs.wire_len() >= 4);
    }
});
