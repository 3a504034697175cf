//! Fuzz target: `parse_commands`
//!
//! Feeds arbitrary bytes to the `/commands` body parser and checks:
//! - No panics under any byte sequence
//! - Output never exceeds the command buffer capacity
//! - Every parsed command has a non-empty id
//! - A parse error always leaves the buffer empty
//!
//! cargo fuzz run fuzz_command_parser

#![no_main]

use libfuzzer_sys::fuzz_target;
use probelink::cloud::commands::{parse_commands, CommandBuffer, CommandRegistry, CommandType};

fuzz_target!(|data: &[u8]| {
    let mut registry = CommandRegistry::new();
    let _ = registry.register("calibrate");

    let mut out = CommandBuffer::new();
    match parse_commands(data, &registry, &mut out) {
        Ok(()) => {
            assert!(out.len() <= out.capacity());
            for cmd in &out {
                assert!(!cmd.id.is_empty(), "command without id accepted");
                if let CommandType::Custom(i) = cmd.kind {
                    assert_eq!(i, 0, "only one custom type is registered");
                }
            }
        }
        Err(_) => assert!(out.is_empty(), "failed parse left commands behind"),
    }
});
